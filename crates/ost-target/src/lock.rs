//! 锁服务接缝。锁协议本身不在本 crate 内实现，目标只负责把请求转交出去。

use async_trait::async_trait;
use ost_core::Result;
use ost_core::wire::{ReplyMessage, RequestMessage};

use crate::error;

#[async_trait]
pub trait LockService: Send + Sync + 'static {
    async fn enqueue(&self, request: &RequestMessage) -> Result<ReplyMessage>;

    async fn convert(&self, request: &RequestMessage) -> Result<ReplyMessage>;

    async fn cancel(&self, request: &RequestMessage) -> Result<ReplyMessage>;
}

/// 未接入锁管理器时的默认实现，所有锁请求以 `EOPNOTSUPP` 回复。
#[derive(Clone, Copy, Debug, Default)]
pub struct UnsupportedLocks;

#[async_trait]
impl LockService for UnsupportedLocks {
    async fn enqueue(&self, request: &RequestMessage) -> Result<ReplyMessage> {
        Err(error::unsupported(request.opcode_raw()))
    }

    async fn convert(&self, request: &RequestMessage) -> Result<ReplyMessage> {
        Err(error::unsupported(request.opcode_raw()))
    }

    async fn cancel(&self, request: &RequestMessage) -> Result<ReplyMessage> {
        Err(error::unsupported(request.opcode_raw()))
    }
}
