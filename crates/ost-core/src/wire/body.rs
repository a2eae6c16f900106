//! 请求/回复体中的定长结构体。

use crate::error::Result;

use super::codec::{WireReader, WireStruct, WireWriter};

/// `ObjectAttrs::valid` 的位标志，指示哪些字段有效。
pub mod valid {
    pub const ID: u64 = 0x0000_0001;
    pub const ATIME: u64 = 0x0000_0002;
    pub const MTIME: u64 = 0x0000_0004;
    pub const CTIME: u64 = 0x0000_0008;
    pub const SIZE: u64 = 0x0000_0010;
    pub const BLOCKS: u64 = 0x0000_0020;
    pub const BLKSIZE: u64 = 0x0000_0040;
    pub const MODE: u64 = 0x0000_0080;
    pub const TYPE: u64 = 0x0000_0100;
    pub const UID: u64 = 0x0000_0200;
    pub const GID: u64 = 0x0000_0400;
    pub const FLAGS: u64 = 0x0000_0800;
    pub const NLINK: u64 = 0x0000_2000;
    pub const GROUP: u64 = 0x0000_4000;
    pub const CKSUM: u64 = 0x0010_0000;
}

/// 对象属性（单对象操作的请求/回复体）。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectAttrs {
    pub id: u64,
    pub group: u64,
    pub valid: u64,
    pub size: u64,
    pub blocks: u64,
    pub blksize: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub flags: u32,
    pub nlink: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub cksum: u64,
}

impl ObjectAttrs {
    pub fn for_object(id: u64, group: u64) -> Self {
        Self {
            id,
            group,
            valid: valid::ID | valid::GROUP,
            ..Self::default()
        }
    }

    /// 是否同时具备 `mask` 中的全部标志。
    pub fn has(&self, mask: u64) -> bool {
        self.valid & mask == mask
    }

    pub fn set_checksum(&mut self, cksum: u32) {
        self.cksum = u64::from(cksum);
        self.valid |= valid::CKSUM;
    }

    /// 客户端提供的校验和（仅当 `CKSUM` 标志存在）。
    pub fn checksum(&self) -> Option<u32> {
        self.has(valid::CKSUM).then_some(self.cksum as u32)
    }
}

impl WireStruct for ObjectAttrs {
    const WIRE_SIZE: usize = 96;

    fn decode(r: &mut WireReader) -> Result<Self> {
        Ok(Self {
            id: r.u64("oa.id")?,
            group: r.u64("oa.group")?,
            valid: r.u64("oa.valid")?,
            size: r.u64("oa.size")?,
            blocks: r.u64("oa.blocks")?,
            blksize: r.u32("oa.blksize")?,
            mode: r.u32("oa.mode")?,
            uid: r.u32("oa.uid")?,
            gid: r.u32("oa.gid")?,
            flags: r.u32("oa.flags")?,
            nlink: r.u32("oa.nlink")?,
            atime: r.i64("oa.atime")?,
            mtime: r.i64("oa.mtime")?,
            ctime: r.i64("oa.ctime")?,
            cksum: r.u64("oa.cksum")?,
        })
    }

    fn encode(&self, w: &mut WireWriter) {
        w.put_u64(self.id);
        w.put_u64(self.group);
        w.put_u64(self.valid);
        w.put_u64(self.size);
        w.put_u64(self.blocks);
        w.put_u32(self.blksize);
        w.put_u32(self.mode);
        w.put_u32(self.uid);
        w.put_u32(self.gid);
        w.put_u32(self.flags);
        w.put_u32(self.nlink);
        w.put_i64(self.atime);
        w.put_i64(self.mtime);
        w.put_i64(self.ctime);
        w.put_u64(self.cksum);
    }
}

/// 批量 I/O 的对象描述符：对象身份 + 该对象的区间描述符数量。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IoObject {
    pub id: u64,
    pub group: u64,
    pub kind: u32,
    pub range_count: u32,
}

impl IoObject {
    pub fn new(id: u64, group: u64, range_count: u32) -> Self {
        Self {
            id,
            group,
            kind: 0,
            range_count,
        }
    }
}

impl WireStruct for IoObject {
    const WIRE_SIZE: usize = 24;

    fn decode(r: &mut WireReader) -> Result<Self> {
        Ok(Self {
            id: r.u64("ioo.id")?,
            group: r.u64("ioo.group")?,
            kind: r.u32("ioo.kind")?,
            range_count: r.u32("ioo.range_count")?,
        })
    }

    fn encode(&self, w: &mut WireWriter) {
        w.put_u64(self.id);
        w.put_u64(self.group);
        w.put_u32(self.kind);
        w.put_u32(self.range_count);
    }
}

/// 远端区间描述符：客户端声明的字节区间。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RemoteRange {
    pub offset: u64,
    pub len: u32,
    pub flags: u32,
}

impl RemoteRange {
    pub const fn new(offset: u64, len: u32, flags: u32) -> Self {
        Self { offset, len, flags }
    }

    pub const fn end(&self) -> u64 {
        self.offset + self.len as u64
    }
}

impl WireStruct for RemoteRange {
    const WIRE_SIZE: usize = 16;

    fn decode(r: &mut WireReader) -> Result<Self> {
        Ok(Self {
            offset: r.u64("rnb.offset")?,
            len: r.u32("rnb.len")?,
            flags: r.u32("rnb.flags")?,
        })
    }

    fn encode(&self, w: &mut WireWriter) {
        w.put_u64(self.offset);
        w.put_u32(self.len);
        w.put_u32(self.flags);
    }
}

/// 容量统计。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
}

impl WireStruct for StatFs {
    const WIRE_SIZE: usize = 48;

    fn decode(r: &mut WireReader) -> Result<Self> {
        Ok(Self {
            blocks: r.u64("statfs.blocks")?,
            bfree: r.u64("statfs.bfree")?,
            bavail: r.u64("statfs.bavail")?,
            files: r.u64("statfs.files")?,
            ffree: r.u64("statfs.ffree")?,
            bsize: r.u32("statfs.bsize")?,
            namelen: r.u32("statfs.namelen")?,
        })
    }

    fn encode(&self, w: &mut WireWriter) {
        w.put_u64(self.blocks);
        w.put_u64(self.bfree);
        w.put_u64(self.bavail);
        w.put_u64(self.files);
        w.put_u64(self.ffree);
        w.put_u32(self.bsize);
        w.put_u32(self.namelen);
    }
}

/// 连接请求体：客户端 UUID，线上为 40 字节、以 NUL 填充。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectData {
    pub client_uuid: String,
}

impl ConnectData {
    pub const UUID_LEN: usize = 40;

    pub fn new(client_uuid: impl Into<String>) -> Self {
        Self {
            client_uuid: client_uuid.into(),
        }
    }
}

impl WireStruct for ConnectData {
    const WIRE_SIZE: usize = Self::UUID_LEN;

    fn decode(r: &mut WireReader) -> Result<Self> {
        let raw = r.bytes(Self::UUID_LEN, "connect.uuid")?;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        Ok(Self {
            client_uuid: String::from_utf8_lossy(&raw[..end]).into_owned(),
        })
    }

    fn encode(&self, w: &mut WireWriter) {
        let mut raw = [0u8; Self::UUID_LEN];
        let src = self.client_uuid.as_bytes();
        let n = src.len().min(Self::UUID_LEN - 1);
        raw[..n].copy_from_slice(&src[..n]);
        w.put_slice(&raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::codec::{ByteOrder, decode_array, encode_array, encode_one};

    #[test]
    fn struct_sizes_match_encoding() {
        let oa = ObjectAttrs::for_object(1, 0);
        assert_eq!(encode_one(&oa, ByteOrder::Little).len(), ObjectAttrs::WIRE_SIZE);
        assert_eq!(
            encode_one(&IoObject::new(1, 0, 2), ByteOrder::Little).len(),
            IoObject::WIRE_SIZE
        );
        assert_eq!(
            encode_one(&StatFs::default(), ByteOrder::Little).len(),
            StatFs::WIRE_SIZE
        );
    }

    #[test]
    fn range_arrays_decode_every_element_in_peer_order() {
        let ranges = [RemoteRange::new(0, 4096, 1), RemoteRange::new(8192, 100, 2)];
        let raw = encode_array(&ranges, ByteOrder::Big);
        let decoded: Vec<RemoteRange> =
            decode_array(WireReader::new(raw, ByteOrder::Big), "ranges").unwrap();
        assert_eq!(decoded, ranges);
    }

    #[test]
    fn checksum_requires_valid_flag() {
        let mut oa = ObjectAttrs::default();
        oa.cksum = 5;
        assert_eq!(oa.checksum(), None);
        oa.set_checksum(0xdead_beef);
        assert_eq!(oa.checksum(), Some(0xdead_beef));
    }

    #[test]
    fn uuid_is_nul_trimmed() {
        let raw = encode_one(&ConnectData::new("client-7"), ByteOrder::Little);
        let mut reader = WireReader::new(raw, ByteOrder::Little);
        assert_eq!(ConnectData::decode(&mut reader).unwrap().client_uuid, "client-7");
    }
}
