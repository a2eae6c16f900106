#![doc = r#"
# ost-target

## 定位
- 对象存储目标的请求处理器：解码请求、恢复窗口门控、按操作码分发，批量读写走
  “拆分 → 设备准备 → 传输 → 设备提交 → 回复”的流水线。
- 设备、导出、恢复队列与锁服务都以 trait 形式接入，本 crate 附带它们的最小内存实现。

## 模块速览
- [`splitter`]：远端区间到页对齐本地区间的拆分与校验；
- [`device`]：`ObjectDevice` 能力接口与设备生命周期守卫；
- [`memory_device`]：基于缓冲池的内存对象设备；
- [`recovery`]、[`export`]、[`lock`]：恢复窗口、导出登记、锁服务接缝；
- [`handler`]：`Target` 本体与 [`Disposition`]；
- [`service`]：工作池服务循环。

## 失败处理
- 格式错误：直接错误回复，不改变状态；
- 恢复窗口拒绝：`EAGAIN` 错误回复；
- 批量传输失败：不回复，驱逐导出；
- 单对象操作失败：正常回复，状态码为设备错误；
- 缓冲池耗尽：可重试的 `ETIMEDOUT`。
"#]

mod brw;
pub mod device;
pub mod error;
pub mod export;
pub mod handler;
pub mod lock;
pub mod memory_device;
pub mod recovery;
pub mod service;
pub mod splitter;

pub use brw::{bulk_checksum, decode_range_codes, encode_range_codes};
pub use device::{DeviceLifecycle, DeviceState, IoKind, LocalPage, ObjectDevice, PreparedIo};
pub use error::SplitError;
pub use export::{ExportInfo, ExportRegistry, InMemoryExports};
pub use handler::{Disposition, Target, TargetBuilder, export_from_reply};
pub use lock::{LockService, UnsupportedLocks};
pub use memory_device::MemoryDevice;
pub use recovery::{FifoRecoveryQueue, RecoveryQueue, TargetLifecycle};
pub use service::{ReplySink, TargetService};
