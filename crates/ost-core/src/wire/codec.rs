use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CoreError, Result, codes};

/// 线上字节序。发送端总是以小端编码；接收端依据魔数判断是否需要翻转。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// 有界读取器：所有字段读取都先校验剩余长度，短缓冲返回 `Malformed` 而不是 panic。
#[derive(Debug, Clone)]
pub struct WireReader {
    buf: Bytes,
    order: ByteOrder,
}

impl WireReader {
    pub fn new(buf: Bytes, order: ByteOrder) -> Self {
        Self { buf, order }
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize, what: &'static str) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(CoreError::new(
                codes::WIRE_MALFORMED,
                format!(
                    "truncated {}: need {} bytes, {} remain",
                    what,
                    needed,
                    self.buf.remaining()
                ),
            ));
        }
        Ok(())
    }

    pub fn u32(&mut self, what: &'static str) -> Result<u32> {
        self.ensure(4, what)?;
        Ok(match self.order {
            ByteOrder::Little => self.buf.get_u32_le(),
            ByteOrder::Big => self.buf.get_u32(),
        })
    }

    pub fn i32(&mut self, what: &'static str) -> Result<i32> {
        self.ensure(4, what)?;
        Ok(match self.order {
            ByteOrder::Little => self.buf.get_i32_le(),
            ByteOrder::Big => self.buf.get_i32(),
        })
    }

    pub fn u64(&mut self, what: &'static str) -> Result<u64> {
        self.ensure(8, what)?;
        Ok(match self.order {
            ByteOrder::Little => self.buf.get_u64_le(),
            ByteOrder::Big => self.buf.get_u64(),
        })
    }

    pub fn i64(&mut self, what: &'static str) -> Result<i64> {
        self.ensure(8, what)?;
        Ok(match self.order {
            ByteOrder::Little => self.buf.get_i64_le(),
            ByteOrder::Big => self.buf.get_i64(),
        })
    }

    /// 原样切出 `len` 字节（不做字节序转换）。
    pub fn bytes(&mut self, len: usize, what: &'static str) -> Result<Bytes> {
        self.ensure(len, what)?;
        Ok(self.buf.split_to(len))
    }

    pub fn skip(&mut self, len: usize, what: &'static str) -> Result<()> {
        self.ensure(len, what)?;
        self.buf.advance(len);
        Ok(())
    }
}

/// 编码器，字节序可选，便于测试构造“对端字节序”的请求。
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
    order: ByteOrder,
}

impl WireWriter {
    pub fn new(order: ByteOrder) -> Self {
        Self {
            buf: BytesMut::new(),
            order,
        }
    }

    pub fn with_capacity(order: ByteOrder, capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            order,
        }
    }

    pub fn put_u32(&mut self, value: u32) {
        match self.order {
            ByteOrder::Little => self.buf.put_u32_le(value),
            ByteOrder::Big => self.buf.put_u32(value),
        }
    }

    pub fn put_i32(&mut self, value: i32) {
        match self.order {
            ByteOrder::Little => self.buf.put_i32_le(value),
            ByteOrder::Big => self.buf.put_i32(value),
        }
    }

    pub fn put_u64(&mut self, value: u64) {
        match self.order {
            ByteOrder::Little => self.buf.put_u64_le(value),
            ByteOrder::Big => self.buf.put_u64(value),
        }
    }

    pub fn put_i64(&mut self, value: i64) {
        match self.order {
            ByteOrder::Little => self.buf.put_i64_le(value),
            ByteOrder::Big => self.buf.put_i64(value),
        }
    }

    pub fn put_slice(&mut self, src: &[u8]) {
        self.buf.put_slice(src);
    }

    /// 以零补齐到 8 字节边界。
    pub fn pad8(&mut self) {
        let pad = padded_len(self.buf.len()) - self.buf.len();
        self.buf.put_bytes(0, pad);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

pub const fn padded_len(len: usize) -> usize {
    (len + 7) & !7
}

/// 固定长度的线上结构体。
///
/// 解码时每个字段都经过 [`WireReader`] 的字节序处理，数组中的每个元素同样如此。
pub trait WireStruct: Sized {
    const WIRE_SIZE: usize;

    fn decode(reader: &mut WireReader) -> Result<Self>;

    fn encode(&self, writer: &mut WireWriter);
}

/// 把整个缓冲解码为结构体数组，长度必须是结构体大小的整数倍。
pub fn decode_array<T: WireStruct>(mut reader: WireReader, what: &'static str) -> Result<Vec<T>> {
    let total = reader.remaining();
    if total % T::WIRE_SIZE != 0 {
        return Err(CoreError::new(
            codes::WIRE_MALFORMED,
            format!(
                "{} buffer of {} bytes is not a multiple of {}",
                what,
                total,
                T::WIRE_SIZE
            ),
        ));
    }
    let count = total / T::WIRE_SIZE;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(T::decode(&mut reader)?);
    }
    Ok(out)
}

/// 编码结构体数组为单个缓冲。
pub fn encode_array<T: WireStruct>(items: &[T], order: ByteOrder) -> Bytes {
    let mut writer = WireWriter::with_capacity(order, items.len() * T::WIRE_SIZE);
    for item in items {
        item.encode(&mut writer);
    }
    writer.freeze()
}

/// 编码单个结构体。
pub fn encode_one<T: WireStruct>(item: &T, order: ByteOrder) -> Bytes {
    let mut writer = WireWriter::with_capacity(order, T::WIRE_SIZE);
    item.encode(&mut writer);
    writer.freeze()
}
