use async_trait::async_trait;
use ost_core::Result;

use crate::descriptor::BulkDescriptor;

/// 批量传输的消息传递底座。
///
/// # 契约说明（What）
/// - `post_put`/`post_get` 只负责把描述符交给底座，返回 `Ok` 表示已受理，不代表已完成；
///   传输结束时底座必须调用 [`BulkDescriptor::complete`] 或 [`BulkDescriptor::fail`]；
/// - `cancel` 通知对端该 xid 的传输不再被期待，之后底座不得再写入描述符的页；
/// - 受理失败时返回错误，描述符随即被置为 `Failed`。
#[async_trait]
pub trait BulkChannel: Send + Sync + 'static {
    async fn post_put(&self, descriptor: BulkDescriptor) -> Result<()>;

    async fn post_get(&self, descriptor: BulkDescriptor) -> Result<()>;

    fn cancel(&self, xid: u64);
}
