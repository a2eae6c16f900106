//! 线协议。
//!
//! # 信封布局
//! 请求：`magic:u32 | opcode:u32 | xid:u64 | flags:u32 | buf_count:u32 | export:u64 |
//! buflen:u32 × buf_count | pad8 | buffer₀ pad8 | buffer₁ pad8 | …`
//!
//! 回复：`magic:u32 | opcode:u32 | xid:u64 | status:i32 | buf_count:u32 | transno:u64 |
//! last_committed:u64 | buflens | buffers`
//!
//! 批量读写请求携带三个缓冲：对象属性体、对象描述符数组、扁平区间描述符数组
//! （长度等于各对象区间数之和）。接收端以魔数判断对端字节序，并在读取每个字段、
//! 每个数组元素时统一转换。SAN 直连读写沿用同样的三缓冲布局，回复的第二个缓冲是
//! 翻译成设备块地址的区间数组。

pub mod body;
pub mod codec;
pub mod message;
pub mod opcode;

pub use body::{ConnectData, IoObject, ObjectAttrs, RemoteRange, StatFs, valid};
pub use codec::{ByteOrder, WireReader, WireStruct, WireWriter, encode_array, encode_one};
pub use message::{ExportHandle, MSG_MAGIC, ReplyMessage, RequestMessage, msg_flags};
pub use opcode::Opcode;

/// 批量请求中各缓冲的位置。
pub mod bulk_buffers {
    pub const BODY: usize = 0;
    pub const OBJECTS: usize = 1;
    pub const RANGES: usize = 2;
}
