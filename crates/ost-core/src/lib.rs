#![doc = r#"
# ost-core

## 定位
- 对象存储目标（OST）数据面的契约层：错误模型、状态码、线协议信封与结构体、页缓冲抽象、配置与日志引导。
- 上层 crate（`ost-buffer`、`ost-transport`、`ost-target`）只依赖这里声明的类型进行协作，彼此之间不共享实现细节。

## 模块速览
- [`error`]：`CoreError` + `ErrorCategory`，以及稳定错误码 [`error::codes`]。
- [`status`]：回复中携带的负 errno 状态码。
- [`wire`]：请求/回复信封、字节序检测与结构体编解码。
- [`buffer`]：池化页缓冲的读写契约 [`PageBuffer`]。
- [`config`]：TOML 配置模型。
- [`observability`]：`tracing` 订阅器引导。
"#]

pub mod buffer;
pub mod config;
pub mod error;
pub mod observability;
pub mod status;
pub mod wire;

pub use buffer::{PAGE_SHIFT, PAGE_SIZE, PageBuffer, SharedPage};
pub use config::{BulkConfig, ConfigError, PoolConfig, ServiceConfig, TargetConfig};
pub use error::{CoreError, ErrorCategory, ErrorCause, Result, codes};
pub use status::Status;
