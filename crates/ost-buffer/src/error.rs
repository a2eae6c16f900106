use std::time::Duration;

use ost_core::{CoreError, codes};

use crate::buffer::BufferHandle;

/// 缓冲池操作的失败路径。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("pool already initialised with {bundles} bundles of {buf_size} bytes")]
    AlreadyInitialized { bundles: usize, buf_size: usize },
    #[error("pool is not initialised")]
    NotInitialized,
    /// 初始化过程中分配失败。已分配的 bundle 保留在池中。
    #[error("allocated {allocated} of {requested} bundles before running out of memory")]
    OutOfMemory { allocated: usize, requested: usize },
    #[error("requested {requested} bytes but pool buffers hold {buf_size}")]
    SizeMismatch { requested: usize, buf_size: usize },
    #[error("gave up after {waited:?} waiting for {count} buffers ({available} free)")]
    Timeout {
        count: usize,
        available: usize,
        waited: Duration,
    },
    #[error("failed to register issued buffer {handle}")]
    RegistrationFailed { handle: BufferHandle },
    #[error("buffer {handle} is not checked out from this pool")]
    NotFound { handle: BufferHandle },
    #[error("returned {actual} pages but the bundle has {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("cannot check out {count} buffers from a pool of {total}")]
    CountExceedsCapacity { count: usize, total: usize },
}

impl PoolError {
    pub fn code(&self) -> &'static str {
        match self {
            PoolError::AlreadyInitialized { .. } => codes::POOL_ALREADY_INITIALIZED,
            PoolError::NotInitialized => codes::POOL_NOT_INITIALIZED,
            PoolError::OutOfMemory { .. } => codes::POOL_OUT_OF_MEMORY,
            PoolError::SizeMismatch { .. } => codes::POOL_SIZE_MISMATCH,
            PoolError::Timeout { .. } => codes::POOL_TIMEOUT,
            PoolError::RegistrationFailed { .. } => codes::POOL_REGISTRATION_FAILED,
            PoolError::NotFound { .. } => codes::POOL_NOT_FOUND,
            PoolError::LengthMismatch { .. } => codes::POOL_LENGTH_MISMATCH,
            PoolError::CountExceedsCapacity { .. } => codes::POOL_COUNT_EXCEEDS_CAPACITY,
        }
    }
}

impl From<PoolError> for CoreError {
    fn from(err: PoolError) -> Self {
        let code = err.code();
        CoreError::new(code, err.to_string()).with_cause(err)
    }
}
