//! 处理器内部的错误枚举及其到 [`CoreError`] 的转换。

use ost_core::{CoreError, codes};
use thiserror::Error;

/// 区间描述符校验失败。
///
/// 每个变体都携带出错的对象下标与区间下标（均从 0 开始，区间下标为对象内的相对位置），
/// 便于在日志中直接定位客户端发来的哪一条描述符有问题。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    #[error("object {object} range {range}: zero length at offset {offset}")]
    ZeroLength {
        object: usize,
        range: usize,
        offset: u64,
    },

    #[error(
        "object {object} range {range}: offset {offset} does not follow previous offset {previous}"
    )]
    NotIncreasing {
        object: usize,
        range: usize,
        offset: u64,
        previous: u64,
    },

    #[error("object {object} range {range}: offset {offset} + len {len} overflows")]
    Overflow {
        object: usize,
        range: usize,
        offset: u64,
        len: u32,
    },

    #[error("objects declare {declared} ranges but {actual} were sent")]
    CountMismatch { declared: u64, actual: usize },

    #[error("object {object} expands to {pages} pages, more than a descriptor can count")]
    TooManyPages { object: usize, pages: u64 },
}

impl From<SplitError> for CoreError {
    fn from(err: SplitError) -> Self {
        CoreError::new(codes::BRW_MALFORMED_RANGES, err.to_string()).with_cause(err)
    }
}

/// 读流水线发现短读之后仍有页带回数据。
pub(crate) fn short_read_violation(page: usize, rc: i32) -> CoreError {
    CoreError::new(
        codes::BRW_SHORT_READ_VIOLATION,
        format!("page {} returned {} bytes after a short page", page, rc),
    )
}

pub(crate) fn malformed(what: impl Into<String>) -> CoreError {
    CoreError::new(codes::WIRE_MALFORMED, what.into())
}

pub(crate) fn invalid_argument(what: impl Into<String>) -> CoreError {
    CoreError::new(codes::DISPATCH_INVALID_ARGUMENT, what.into())
}

pub(crate) fn unsupported(opcode: u32) -> CoreError {
    CoreError::new(
        codes::DISPATCH_UNSUPPORTED,
        format!("unexpected opcode {}", opcode),
    )
}
