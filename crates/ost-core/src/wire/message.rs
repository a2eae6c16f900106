use bytes::Bytes;

use crate::error::{CoreError, Result, codes};
use crate::status::Status;

use super::codec::{ByteOrder, WireReader, WireStruct, WireWriter, decode_array, padded_len};
use super::opcode::Opcode;

/// 信封魔数。接收端以小端读取，若得到的是其字节翻转值则判定对端为大端。
pub const MSG_MAGIC: u32 = 0x0BD0_0BD0;

/// 单条消息允许携带的最大缓冲数。
pub const MAX_BUFFERS: usize = 16;

const REQUEST_HEADER_LEN: usize = 32;
const REPLY_HEADER_LEN: usize = 40;

/// 请求头标志位。
pub mod msg_flags {
    /// 恢复窗口内客户端发送的最后一条重放请求。
    pub const LAST_REPLAY: u32 = 0x0000_0001;
    pub const RESENT: u32 = 0x0000_0002;
    pub const REPLAY: u32 = 0x0000_0004;
}

/// 导出句柄：连接建立时由目标分配，后续请求据此定位导出。`0` 表示未连接。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct ExportHandle(pub u64);

impl ExportHandle {
    pub const NONE: ExportHandle = ExportHandle(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

fn detect_order(frame: &Bytes) -> Result<ByteOrder> {
    if frame.len() < 4 {
        return Err(CoreError::new(
            codes::WIRE_MALFORMED,
            format!("frame of {} bytes has no magic", frame.len()),
        ));
    }
    let magic = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    if magic == MSG_MAGIC {
        Ok(ByteOrder::Little)
    } else if magic.swap_bytes() == MSG_MAGIC {
        Ok(ByteOrder::Big)
    } else {
        Err(CoreError::new(
            codes::WIRE_BAD_MAGIC,
            format!("bad message magic {:#010x}", magic),
        ))
    }
}

fn read_buffers(reader: &mut WireReader, count: u32) -> Result<Vec<Bytes>> {
    let count = count as usize;
    if count > MAX_BUFFERS {
        return Err(CoreError::new(
            codes::WIRE_MALFORMED,
            format!("{} buffers exceeds limit {}", count, MAX_BUFFERS),
        ));
    }
    let mut lens = Vec::with_capacity(count);
    for _ in 0..count {
        lens.push(reader.u32("buflen")? as usize);
    }
    let lens_bytes = count * 4;
    reader.skip(padded_len(lens_bytes) - lens_bytes, "buflen padding")?;

    let mut buffers = Vec::with_capacity(count);
    for (idx, len) in lens.into_iter().enumerate() {
        let data = reader.bytes(len, "message buffer")?;
        buffers.push(data);
        // 末尾缓冲允许省略填充。
        let pad = padded_len(len) - len;
        if idx + 1 < count || reader.remaining() >= pad {
            reader.skip(pad, "buffer padding")?;
        }
    }
    Ok(buffers)
}

fn write_buffers(writer: &mut WireWriter, buffers: &[Bytes]) {
    for buf in buffers {
        writer.put_u32(buf.len() as u32);
    }
    writer.pad8();
    for buf in buffers {
        writer.put_slice(buf);
        writer.pad8();
    }
}

/// 解码后的请求信封。
///
/// 头部字段已按对端字节序归一化；各缓冲保持原始字节，由 [`RequestMessage::body`] 与
/// [`RequestMessage::array`] 在读取时按同一字节序逐字段转换。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestMessage {
    opcode: u32,
    xid: u64,
    flags: u32,
    export: ExportHandle,
    order: ByteOrder,
    buffers: Vec<Bytes>,
}

impl RequestMessage {
    pub fn new(opcode: u32, xid: u64) -> Self {
        Self {
            opcode,
            xid,
            flags: 0,
            export: ExportHandle::NONE,
            order: ByteOrder::Little,
            buffers: Vec::new(),
        }
    }

    pub fn for_op(opcode: Opcode, xid: u64) -> Self {
        Self::new(opcode.as_wire(), xid)
    }

    pub fn with_export(mut self, export: ExportHandle) -> Self {
        self.export = export;
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// 指定缓冲内容所使用的字节序。缓冲必须已经按该字节序编码。
    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_buffer(mut self, buffer: Bytes) -> Self {
        self.buffers.push(buffer);
        self
    }

    pub fn decode(frame: Bytes) -> Result<Self> {
        let order = detect_order(&frame)?;
        if frame.len() < REQUEST_HEADER_LEN {
            return Err(CoreError::new(
                codes::WIRE_MALFORMED,
                format!("request header truncated at {} bytes", frame.len()),
            ));
        }
        let mut reader = WireReader::new(frame, order);
        let _magic = reader.u32("magic")?;
        let opcode = reader.u32("opcode")?;
        let xid = reader.u64("xid")?;
        let flags = reader.u32("flags")?;
        let buf_count = reader.u32("buf_count")?;
        let export = ExportHandle(reader.u64("export")?);
        let buffers = read_buffers(&mut reader, buf_count)?;
        Ok(Self {
            opcode,
            xid,
            flags,
            export,
            order,
            buffers,
        })
    }

    /// 以自身记录的字节序编码。
    pub fn encode(&self) -> Bytes {
        let mut writer = WireWriter::new(self.order);
        writer.put_u32(MSG_MAGIC);
        writer.put_u32(self.opcode);
        writer.put_u64(self.xid);
        writer.put_u32(self.flags);
        writer.put_u32(self.buffers.len() as u32);
        writer.put_u64(self.export.0);
        write_buffers(&mut writer, &self.buffers);
        writer.freeze()
    }

    pub fn opcode_raw(&self) -> u32 {
        self.opcode
    }

    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_wire(self.opcode)
    }

    pub fn xid(&self) -> u64 {
        self.xid
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn export(&self) -> ExportHandle {
        self.export
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// 对端字节序与本端不同，读取时需要翻转。
    pub fn is_swabbed(&self) -> bool {
        self.order == ByteOrder::Big
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffer(&self, idx: usize) -> Option<&Bytes> {
        self.buffers.get(idx)
    }

    fn reader(&self, idx: usize, what: &'static str) -> Result<WireReader> {
        self.buffers
            .get(idx)
            .map(|buf| WireReader::new(buf.clone(), self.order))
            .ok_or_else(|| {
                CoreError::new(
                    codes::WIRE_MALFORMED,
                    format!("missing {} buffer at index {}", what, idx),
                )
            })
    }

    /// 以对端字节序解码第 `idx` 个缓冲中的单个结构体，缓冲短于结构体时返回 `Malformed`。
    pub fn body<T: WireStruct>(&self, idx: usize, what: &'static str) -> Result<T> {
        let mut reader = self.reader(idx, what)?;
        T::decode(&mut reader)
    }

    /// 以对端字节序解码第 `idx` 个缓冲中的结构体数组。
    pub fn array<T: WireStruct>(&self, idx: usize, what: &'static str) -> Result<Vec<T>> {
        decode_array(self.reader(idx, what)?, what)
    }
}

/// 回复信封。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyMessage {
    pub opcode: u32,
    pub xid: u64,
    pub status: Status,
    pub transno: u64,
    pub last_committed: u64,
    pub buffers: Vec<Bytes>,
}

impl ReplyMessage {
    /// 以请求的操作码与 xid 初始化一个成功的空回复。
    pub fn for_request(request: &RequestMessage) -> Self {
        Self {
            opcode: request.opcode_raw(),
            xid: request.xid(),
            status: Status::OK,
            transno: 0,
            last_committed: 0,
            buffers: Vec::new(),
        }
    }

    /// 只携带错误状态的回复。
    pub fn error(request: &RequestMessage, status: Status) -> Self {
        Self {
            status,
            ..Self::for_request(request)
        }
    }

    pub fn with_buffer(mut self, buffer: Bytes) -> Self {
        self.buffers.push(buffer);
        self
    }

    /// 回复总以小端编码。
    pub fn encode(&self) -> Bytes {
        let mut writer = WireWriter::new(ByteOrder::Little);
        writer.put_u32(MSG_MAGIC);
        writer.put_u32(self.opcode);
        writer.put_u64(self.xid);
        writer.put_i32(self.status.raw());
        writer.put_u32(self.buffers.len() as u32);
        writer.put_u64(self.transno);
        writer.put_u64(self.last_committed);
        write_buffers(&mut writer, &self.buffers);
        writer.freeze()
    }

    pub fn decode(frame: Bytes) -> Result<Self> {
        let order = detect_order(&frame)?;
        if order != ByteOrder::Little {
            return Err(CoreError::new(
                codes::WIRE_MALFORMED,
                "replies are always little-endian",
            ));
        }
        if frame.len() < REPLY_HEADER_LEN {
            return Err(CoreError::new(
                codes::WIRE_MALFORMED,
                format!("reply header truncated at {} bytes", frame.len()),
            ));
        }
        let mut reader = WireReader::new(frame, order);
        let _magic = reader.u32("magic")?;
        let opcode = reader.u32("opcode")?;
        let xid = reader.u64("xid")?;
        let status = Status::from_raw(reader.i32("status")?);
        let buf_count = reader.u32("buf_count")?;
        let transno = reader.u64("transno")?;
        let last_committed = reader.u64("last_committed")?;
        let buffers = read_buffers(&mut reader, buf_count)?;
        Ok(Self {
            opcode,
            xid,
            status,
            transno,
            last_committed,
            buffers,
        })
    }

    /// 解码第 `idx` 个缓冲中的结构体。
    pub fn body<T: WireStruct>(&self, idx: usize, what: &'static str) -> Result<T> {
        let buf = self.buffers.get(idx).cloned().ok_or_else(|| {
            CoreError::new(
                codes::WIRE_MALFORMED,
                format!("missing {} buffer at index {}", what, idx),
            )
        })?;
        T::decode(&mut WireReader::new(buf, ByteOrder::Little))
    }

    pub fn array<T: WireStruct>(&self, idx: usize, what: &'static str) -> Result<Vec<T>> {
        let buf = self.buffers.get(idx).cloned().ok_or_else(|| {
            CoreError::new(
                codes::WIRE_MALFORMED,
                format!("missing {} buffer at index {}", what, idx),
            )
        })?;
        decode_array(WireReader::new(buf, ByteOrder::Little), what)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::body::ObjectAttrs;
    use crate::wire::codec::encode_one;

    #[test]
    fn big_endian_request_is_normalised() {
        let oa = ObjectAttrs::for_object(42, 7);
        let frame = RequestMessage::for_op(Opcode::Getattr, 0x1122_3344_5566_7788)
            .with_byte_order(ByteOrder::Big)
            .with_export(ExportHandle(9))
            .with_buffer(encode_one(&oa, ByteOrder::Big))
            .encode();
        assert_eq!(&frame[..4], &MSG_MAGIC.to_be_bytes());

        let decoded = RequestMessage::decode(frame).unwrap();
        assert!(decoded.is_swabbed());
        assert_eq!(decoded.opcode(), Some(Opcode::Getattr));
        assert_eq!(decoded.xid(), 0x1122_3344_5566_7788);
        assert_eq!(decoded.export(), ExportHandle(9));
        let body: ObjectAttrs = decoded.body(0, "body").unwrap();
        assert_eq!(body, oa);
    }

    #[test]
    fn bad_magic_and_truncation_are_rejected() {
        let err = RequestMessage::decode(Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8])).unwrap_err();
        assert_eq!(err.code(), codes::WIRE_BAD_MAGIC);

        let mut frame = RequestMessage::for_op(Opcode::Ping, 1)
            .with_buffer(Bytes::from_static(b"0123456789"))
            .encode()
            .to_vec();
        frame.truncate(frame.len() - 10);
        let err = RequestMessage::decode(Bytes::from(frame)).unwrap_err();
        assert_eq!(err.code(), codes::WIRE_MALFORMED);
    }

    #[test]
    fn short_body_is_malformed() {
        let req = RequestMessage::for_op(Opcode::Setattr, 3).with_buffer(Bytes::from_static(&[0; 10]));
        let err = req.body::<ObjectAttrs>(0, "body").unwrap_err();
        assert_eq!(err.status(), Status::EFAULT);
        assert!(req.body::<ObjectAttrs>(1, "body").is_err());
    }

    #[test]
    fn reply_round_trip_keeps_header() {
        let req = RequestMessage::for_op(Opcode::Read, 77);
        let mut reply = ReplyMessage::for_request(&req).with_buffer(Bytes::from_static(b"abc"));
        reply.status = Status::from_count(8192);
        reply.transno = 5;
        reply.last_committed = 4;
        let decoded = ReplyMessage::decode(reply.encode()).unwrap();
        assert_eq!(decoded, reply);
    }
}
