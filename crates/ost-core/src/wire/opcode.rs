use core::fmt;

/// 存储目标识别的操作码。数值与线协议保持一致，不可重排。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    Getattr = 1,
    Setattr = 2,
    Read = 3,
    Write = 4,
    Create = 5,
    Destroy = 6,
    Connect = 8,
    Disconnect = 9,
    Punch = 10,
    Open = 11,
    Close = 12,
    Statfs = 13,
    SanRead = 14,
    SanWrite = 15,
    Syncfs = 16,
    LockEnqueue = 101,
    LockConvert = 102,
    LockCancel = 103,
    LockBlockingCallback = 104,
    LockCompletionCallback = 105,
    Ping = 400,
}

impl Opcode {
    /// 解析线上数值；未知数值返回 `None`，由调度层回复 `NotSupported`。
    pub fn from_wire(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => Opcode::Getattr,
            2 => Opcode::Setattr,
            3 => Opcode::Read,
            4 => Opcode::Write,
            5 => Opcode::Create,
            6 => Opcode::Destroy,
            8 => Opcode::Connect,
            9 => Opcode::Disconnect,
            10 => Opcode::Punch,
            11 => Opcode::Open,
            12 => Opcode::Close,
            13 => Opcode::Statfs,
            14 => Opcode::SanRead,
            15 => Opcode::SanWrite,
            16 => Opcode::Syncfs,
            101 => Opcode::LockEnqueue,
            102 => Opcode::LockConvert,
            103 => Opcode::LockCancel,
            104 => Opcode::LockBlockingCallback,
            105 => Opcode::LockCompletionCallback,
            400 => Opcode::Ping,
            _ => return None,
        })
    }

    pub const fn as_wire(self) -> u32 {
        self as u32
    }

    pub const fn name(self) -> &'static str {
        match self {
            Opcode::Getattr => "getattr",
            Opcode::Setattr => "setattr",
            Opcode::Read => "read",
            Opcode::Write => "write",
            Opcode::Create => "create",
            Opcode::Destroy => "destroy",
            Opcode::Connect => "connect",
            Opcode::Disconnect => "disconnect",
            Opcode::Punch => "punch",
            Opcode::Open => "open",
            Opcode::Close => "close",
            Opcode::Statfs => "statfs",
            Opcode::SanRead => "san_read",
            Opcode::SanWrite => "san_write",
            Opcode::Syncfs => "syncfs",
            Opcode::LockEnqueue => "lock_enqueue",
            Opcode::LockConvert => "lock_convert",
            Opcode::LockCancel => "lock_cancel",
            Opcode::LockBlockingCallback => "lock_bl_callback",
            Opcode::LockCompletionCallback => "lock_cp_callback",
            Opcode::Ping => "ping",
        }
    }

    /// 携带批量数据的操作。
    pub const fn is_bulk(self) -> bool {
        matches!(self, Opcode::Read | Opcode::Write)
    }

    /// 只做块地址转换、数据由客户端直接访问共享存储的读写。
    pub const fn is_san(self) -> bool {
        matches!(self, Opcode::SanRead | Opcode::SanWrite)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
