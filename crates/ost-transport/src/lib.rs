#![doc = r#"
# ost-transport

存储目标依赖的最小批量传输原语：

- [`BulkDescriptor`]：把池化页绑定到一次在途传输，提供 `attach_page → submit_put/submit_get →
  await_completion` 的生命周期，以及超时后的 `abort`；
- [`BulkChannel`]：消息传递底座的抽象，负责把描述符中的页推送给对端或从对端拉取；
- [`LoopbackChannel`]：基于 tokio mpsc 的进程内实现，可注入投递、挂起、失败三种故障；
- [`ReplyMatcher`]：按 `xid` 关联请求与回复。

完成通知通过每个描述符独立的 `tokio::sync::Notify` 送达，只唤醒该描述符的等待者，调用任务
在等待期间让出执行权而不是轮询。
"#]

pub mod channel;
pub mod descriptor;
mod error;
pub mod loopback;
pub mod matcher;

pub use channel::BulkChannel;
pub use descriptor::{BulkDescriptor, BulkSegment, CompletionState, Direction};
pub use loopback::{ClientMemory, Fault, LoopbackChannel};
pub use matcher::ReplyMatcher;
