use std::borrow::Cow;
use std::error::Error;
use std::fmt;

use crate::status::Status;

/// `ErrorCause` 封装底层原因，保持 `Send + Sync` 以方便跨线程传递。
pub type ErrorCause = Box<dyn Error + Send + Sync + 'static>;

/// 数据面统一的 `Result` 别名，默认错误类型为 [`CoreError`]。
pub type Result<T, E = CoreError> = core::result::Result<T, E>;

/// 稳定错误码。
///
/// # 命名约定
/// - 统一采用 `ost.<域>.<语义>`，域取值 `wire`、`pool`、`bulk`、`brw`、`dispatch`、
///   `recovery`、`export`、`device`、`config`、`rpc`。
/// - 码值一经发布不得修改语义；新增语义时追加新码值。
pub mod codes {
    pub const WIRE_MALFORMED: &str = "ost.wire.malformed";
    pub const WIRE_BAD_MAGIC: &str = "ost.wire.bad_magic";
    pub const BUFFER_OUT_OF_BOUNDS: &str = "ost.buffer.out_of_bounds";
    pub const BUFFER_STALE: &str = "ost.buffer.stale";

    pub const POOL_ALREADY_INITIALIZED: &str = "ost.pool.already_initialized";
    pub const POOL_NOT_INITIALIZED: &str = "ost.pool.not_initialized";
    pub const POOL_OUT_OF_MEMORY: &str = "ost.pool.out_of_memory";
    pub const POOL_SIZE_MISMATCH: &str = "ost.pool.size_mismatch";
    pub const POOL_TIMEOUT: &str = "ost.pool.timeout";
    pub const POOL_REGISTRATION_FAILED: &str = "ost.pool.registration_failed";
    pub const POOL_NOT_FOUND: &str = "ost.pool.not_found";
    pub const POOL_LENGTH_MISMATCH: &str = "ost.pool.length_mismatch";
    pub const POOL_COUNT_EXCEEDS_CAPACITY: &str = "ost.pool.count_exceeds_capacity";

    pub const BULK_TIMEOUT: &str = "ost.bulk.timeout";
    pub const BULK_ABORTED: &str = "ost.bulk.aborted";
    pub const BULK_FAILED: &str = "ost.bulk.failed";
    pub const BULK_ALREADY_SUBMITTED: &str = "ost.bulk.already_submitted";
    pub const BULK_CHANNEL_CLOSED: &str = "ost.bulk.channel_closed";
    pub const BULK_WRONG_DIRECTION: &str = "ost.bulk.wrong_direction";
    pub const RPC_DUPLICATE_XID: &str = "ost.rpc.duplicate_xid";

    pub const BRW_MALFORMED_RANGES: &str = "ost.brw.malformed_ranges";
    pub const BRW_SHORT_READ_VIOLATION: &str = "ost.brw.short_read_violation";
    pub const BRW_CHECKSUM_MISMATCH: &str = "ost.brw.checksum_mismatch";

    pub const DISPATCH_UNSUPPORTED: &str = "ost.dispatch.unsupported";
    pub const DISPATCH_INVALID_ARGUMENT: &str = "ost.dispatch.invalid_argument";
    pub const RECOVERY_NOT_PERMITTED: &str = "ost.recovery.not_permitted";
    pub const EXPORT_NOT_CONNECTED: &str = "ost.export.not_connected";

    pub const DEVICE_FAILURE: &str = "ost.device.failure";
    pub const DEVICE_INACTIVE: &str = "ost.device.inactive";

    pub const CONFIG_INVALID: &str = "ost.config.invalid";
}

/// 错误分类决定该错误最终以何种状态码回复客户端，以及是否需要升级处理（驱逐、告警）。
///
/// # 契约说明（What）
/// - 本地错误（格式、参数、资源、能力、恢复窗口）转换为回复状态码；
/// - `CommunicationsFailure` 属于系统性错误：处理器不回复，而是驱逐对应导出；
/// - `ChecksumMismatch` 只记录日志，不影响回复状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// 请求格式或描述符违反协议。
    Malformed,
    /// 参数组合不合法（例如 punch 缺少 size/blocks 标志）。
    InvalidArgument,
    /// 资源耗尽，客户端可稍后重试。
    ResourceExhausted,
    /// 操作码或能力不受支持。
    NotSupported,
    /// 恢复窗口内禁止的操作。
    NotPermittedDuringRecovery,
    /// 批量传输失败或超时。
    CommunicationsFailure,
    /// 校验和不一致。
    ChecksumMismatch,
    /// 请求未关联有效导出。
    NotConnected,
    /// 设备层返回的原始 errno（正值）。
    Device(i32),
}

impl ErrorCategory {
    /// 分类对应的回复状态码。
    pub fn status(self) -> Status {
        match self {
            ErrorCategory::Malformed => Status::EFAULT,
            ErrorCategory::InvalidArgument => Status::EINVAL,
            ErrorCategory::ResourceExhausted => Status::ETIMEDOUT,
            ErrorCategory::NotSupported => Status::EOPNOTSUPP,
            ErrorCategory::NotPermittedDuringRecovery => Status::EAGAIN,
            ErrorCategory::CommunicationsFailure => Status::EIO,
            ErrorCategory::ChecksumMismatch => Status::EBADMSG,
            ErrorCategory::NotConnected => Status::ENOTCONN,
            ErrorCategory::Device(errno) => Status::from_errno(errno),
        }
    }

    /// 客户端能否直接重试同一请求。
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCategory::ResourceExhausted | ErrorCategory::NotPermittedDuringRecovery
        )
    }

    /// 是否需要升级为驱逐导出。
    pub fn escalates(self) -> bool {
        matches!(self, ErrorCategory::CommunicationsFailure)
    }
}

/// 按错误码推导的默认分类，调用方可通过 [`CoreError::with_category`] 覆盖。
fn default_category(code: &str) -> ErrorCategory {
    match code {
        codes::POOL_TIMEOUT | codes::POOL_OUT_OF_MEMORY => ErrorCategory::ResourceExhausted,
        codes::POOL_SIZE_MISMATCH
        | codes::POOL_LENGTH_MISMATCH
        | codes::POOL_COUNT_EXCEEDS_CAPACITY => ErrorCategory::InvalidArgument,
        codes::BULK_TIMEOUT
        | codes::BULK_ABORTED
        | codes::BULK_FAILED
        | codes::BULK_CHANNEL_CLOSED => ErrorCategory::CommunicationsFailure,
        codes::BRW_CHECKSUM_MISMATCH => ErrorCategory::ChecksumMismatch,
        codes::DISPATCH_UNSUPPORTED => ErrorCategory::NotSupported,
        codes::DISPATCH_INVALID_ARGUMENT
        | codes::CONFIG_INVALID
        | codes::BUFFER_OUT_OF_BOUNDS
        | codes::BUFFER_STALE
        | codes::BULK_ALREADY_SUBMITTED
        | codes::BULK_WRONG_DIRECTION
        | codes::RPC_DUPLICATE_XID => ErrorCategory::InvalidArgument,
        codes::RECOVERY_NOT_PERMITTED => ErrorCategory::NotPermittedDuringRecovery,
        codes::EXPORT_NOT_CONNECTED => ErrorCategory::NotConnected,
        codes::DEVICE_INACTIVE => ErrorCategory::Device(crate::status::errno::ENODEV),
        codes::DEVICE_FAILURE | codes::POOL_NOT_INITIALIZED => {
            ErrorCategory::Device(crate::status::errno::EIO)
        }
        _ => ErrorCategory::Malformed,
    }
}

/// `CoreError` 提供稳定的错误码、分类与根因链路，是数据面错误分层的最底层。
///
/// # 设计背景（Why）
/// - 缓冲池、传输与处理器各自产生的故障需要合流为统一的错误码，处理器据此决定
///   回复状态码或驱逐动作。
///
/// # 契约说明（What）
/// - `code`：稳定字符串，使用 [`codes`] 中的常量。
/// - `message`：人类可读描述，避免包含敏感信息。
/// - `category`：默认由 `code` 推导，可显式覆盖。
/// - `cause`：可选底层原因。
#[derive(Debug)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    category: ErrorCategory,
    cause: Option<ErrorCause>,
}

impl CoreError {
    /// 构造核心错误，分类按错误码推导。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            category: default_category(code),
            cause: None,
        }
    }

    /// 构造携带设备 errno 的错误。
    pub fn device(errno: i32, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::DEVICE_FAILURE, message).with_category(ErrorCategory::Device(errno.abs()))
    }

    /// 覆盖分类。
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }

    /// 附带底层原因并返回新的核心错误。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    /// 该错误应回复给客户端的状态码。
    pub fn status(&self) -> Status {
        self.category.status()
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|boxed| boxed.as_ref() as &(dyn Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_follows_code_and_maps_to_status() {
        let err = CoreError::new(codes::POOL_TIMEOUT, "pool exhausted");
        assert_eq!(err.category(), ErrorCategory::ResourceExhausted);
        assert_eq!(err.status(), Status::ETIMEDOUT);
        assert!(err.category().is_retryable());

        let err = CoreError::new(codes::BRW_MALFORMED_RANGES, "offset went backwards");
        assert_eq!(err.status(), Status::EFAULT);

        let err = CoreError::new(codes::BULK_TIMEOUT, "no completion");
        assert!(err.category().escalates());
    }

    #[test]
    fn oversized_checkout_is_an_invalid_argument() {
        let err = CoreError::new(codes::POOL_COUNT_EXCEEDS_CAPACITY, "9 of 8 bundles");
        assert_eq!(err.category(), ErrorCategory::InvalidArgument);
        assert_eq!(err.status(), Status::EINVAL);
        assert!(!err.category().is_retryable());
    }

    #[test]
    fn device_errors_keep_their_errno() {
        let err = CoreError::device(-28, "no space left");
        assert_eq!(err.category(), ErrorCategory::Device(28));
        assert_eq!(err.status().errno(), Some(28));
        assert_eq!(err.to_string(), "[ost.device.failure] no space left");
    }

    #[test]
    fn cause_is_exposed_through_source() {
        let io = std::io::Error::other("disk gone");
        let err = CoreError::new(codes::DEVICE_FAILURE, "commit failed").with_cause(io);
        assert!(err.source().is_some());
    }
}
