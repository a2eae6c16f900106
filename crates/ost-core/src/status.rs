//! 回复状态码。
//!
//! 回复信封中的 `status` 字段沿用 Linux errno 的取负约定：`0` 与正值表示成功
//! （批量读以正值携带传输字节数），负值表示失败。客户端据此区分可重试与不可重试的错误。

use core::fmt;

/// 常用 errno 数值（正值）。
pub mod errno {
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const EAGAIN: i32 = 11;
    pub const ENOMEM: i32 = 12;
    pub const EFAULT: i32 = 14;
    pub const EEXIST: i32 = 17;
    pub const ENODEV: i32 = 19;
    pub const EINVAL: i32 = 22;
    pub const EFBIG: i32 = 27;
    pub const ENOSPC: i32 = 28;
    pub const EPROTO: i32 = 71;
    pub const EBADMSG: i32 = 74;
    pub const EOPNOTSUPP: i32 = 95;
    pub const ENOTCONN: i32 = 107;
    pub const ETIMEDOUT: i32 = 110;
}

/// 回复状态码，内部以有符号 32 位整数承载。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Status(i32);

impl Status {
    pub const OK: Status = Status(0);
    pub const ENOENT: Status = Status::from_errno(errno::ENOENT);
    pub const EIO: Status = Status::from_errno(errno::EIO);
    pub const EAGAIN: Status = Status::from_errno(errno::EAGAIN);
    pub const ENOMEM: Status = Status::from_errno(errno::ENOMEM);
    pub const EFAULT: Status = Status::from_errno(errno::EFAULT);
    pub const EEXIST: Status = Status::from_errno(errno::EEXIST);
    pub const ENODEV: Status = Status::from_errno(errno::ENODEV);
    pub const EINVAL: Status = Status::from_errno(errno::EINVAL);
    pub const EFBIG: Status = Status::from_errno(errno::EFBIG);
    pub const ENOSPC: Status = Status::from_errno(errno::ENOSPC);
    pub const EPROTO: Status = Status::from_errno(errno::EPROTO);
    pub const EBADMSG: Status = Status::from_errno(errno::EBADMSG);
    pub const EOPNOTSUPP: Status = Status::from_errno(errno::EOPNOTSUPP);
    pub const ENOTCONN: Status = Status::from_errno(errno::ENOTCONN);
    pub const ETIMEDOUT: Status = Status::from_errno(errno::ETIMEDOUT);

    /// 以原始线上数值构造。
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// 以正 errno 构造失败状态；传入负值时按绝对值处理。
    pub const fn from_errno(errno: i32) -> Self {
        if errno < 0 { Self(errno) } else { Self(-errno) }
    }

    /// 成功状态，携带一个非负的计数（例如批量读传输的字节数）。
    pub fn from_count(count: usize) -> Self {
        Self(i32::try_from(count).unwrap_or(i32::MAX))
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn is_ok(self) -> bool {
        self.0 >= 0
    }

    pub const fn is_err(self) -> bool {
        self.0 < 0
    }

    /// 若为失败状态则返回对应的正 errno。
    pub const fn errno(self) -> Option<i32> {
        if self.0 < 0 { Some(-self.0) } else { None }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errno() {
            Some(errno) => write!(f, "-{}", errno),
            None => write!(f, "{}", self.0),
        }
    }
}
