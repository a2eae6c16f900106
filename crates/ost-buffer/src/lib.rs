#![doc = r#"
# ost-buffer

## 设计动机（Why）
- 批量读写需要大块、定长、可复用的内存；运行期按请求分配既慢又不可控，因此在启动时一次性分配
  固定数量的 bundle，由 [`BundlePool`] 统一借还。
- 池耗尽时租借方以指数退避阻塞等待，超过等待预算即返回可重试的超时错误，把背压传递给客户端。

## 核心契约（What）
- 每个 bundle 在任一时刻恰好处于“空闲链表”或“已借出”之一，`current_length ≤ total_length`；
- 已借出的缓冲以稳定句柄（池 id + 槽位 + 代号）登记在发放表中，归还时据此校验，重复归还或
  外来缓冲返回 `NotFound`；
- 空闲链表、发放表与初始化标志分别由独立的临界区保护。

## 模块
- [`pool`]：`BundlePool` 本体；
- [`buffer`]：借出后对调用方可见的 `BufferRef`/`PageRef`/`PageArray`；
- [`memory`]：bundle 内存与可替换的分配器；
- [`error`]：`PoolError`。
"#]

pub mod buffer;
pub mod error;
pub mod memory;
pub mod pool;

pub use buffer::{BufferHandle, BufferRef, PageArray, PageRef};
pub use error::PoolError;
pub use memory::{BundleAllocator, HeapAllocator};
pub use pool::{BundlePool, PoolStats, TeardownReport};
