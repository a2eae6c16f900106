//! 恢复窗口。
//!
//! 目标重启后进入恢复窗口，等待旧客户端重放未提交的请求。窗口内只有一部分操作可以继续：
//! 连接与断开立即处理；会修改状态的操作交给 [`RecoveryQueue`]，由队列决定现在处理还是
//! 留待重放；其余操作以 `EAGAIN` 拒绝。
//!
//! [`TargetLifecycle`] 由调用方持有并注入目标，不依赖任何进程级全局状态。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use ost_core::wire::{ReplyMessage, RequestMessage};
use parking_lot::Mutex;
use tracing::{debug, info};

/// 恢复窗口的状态标志。
#[derive(Debug, Default)]
pub struct TargetLifecycle {
    recovering: AtomicBool,
    abort_requested: AtomicBool,
}

impl TargetLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以恢复窗口开启的状态创建。
    pub fn recovering() -> Self {
        let lifecycle = Self::new();
        lifecycle.begin_recovery();
        lifecycle
    }

    pub fn begin_recovery(&self) {
        self.abort_requested.store(false, Ordering::Release);
        self.recovering.store(true, Ordering::Release);
        info!("recovery window opened");
    }

    /// 请求放弃恢复；下一个到达的请求会结束窗口并照常处理。
    pub fn request_abort(&self) {
        self.abort_requested.store(true, Ordering::Release);
    }

    pub fn end_recovery(&self) {
        if self.recovering.swap(false, Ordering::AcqRel) {
            info!("recovery window closed");
        }
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::Acquire)
    }

    pub fn abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::Acquire)
    }

    /// 若有放弃请求则结束恢复窗口，返回是否发生了放弃。
    pub(crate) fn take_abort(&self) -> bool {
        if !self.abort_requested.swap(false, Ordering::AcqRel) {
            return false;
        }
        if self.recovering.swap(false, Ordering::AcqRel) {
            info!("recovery aborted, resuming normal service");
        }
        true
    }
}

/// 恢复期间的请求排队策略。
pub trait RecoveryQueue: Send + Sync + 'static {
    /// 返回 `true` 表示请求应立即处理，`false` 表示已被排队。
    fn queue_for_recovery(&self, request: &RequestMessage) -> bool;

    /// 保存带 `LAST_REPLAY` 标志的请求的回复，待恢复结束时统一发送。
    fn queue_final_reply(&self, request: &RequestMessage, reply: ReplyMessage);
}

/// 先进先出的恢复队列。
///
/// 默认排队所有请求，调用方在窗口结束后用 [`FifoRecoveryQueue::take_queued`] 取回并重新提交；
/// [`FifoRecoveryQueue::pass_through`] 构造的队列则放行所有请求。
#[derive(Debug, Default)]
pub struct FifoRecoveryQueue {
    pass_through: bool,
    queued: Mutex<VecDeque<RequestMessage>>,
    final_replies: Mutex<Vec<ReplyMessage>>,
}

impl FifoRecoveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pass_through() -> Self {
        Self {
            pass_through: true,
            ..Self::default()
        }
    }

    pub fn queued_len(&self) -> usize {
        self.queued.lock().len()
    }

    pub fn take_queued(&self) -> Vec<RequestMessage> {
        self.queued.lock().drain(..).collect()
    }

    pub fn take_final_replies(&self) -> Vec<ReplyMessage> {
        std::mem::take(&mut *self.final_replies.lock())
    }
}

impl RecoveryQueue for FifoRecoveryQueue {
    fn queue_for_recovery(&self, request: &RequestMessage) -> bool {
        if self.pass_through {
            return true;
        }
        debug!(xid = request.xid(), "queued for recovery");
        self.queued.lock().push_back(request.clone());
        false
    }

    fn queue_final_reply(&self, request: &RequestMessage, reply: ReplyMessage) {
        debug!(xid = request.xid(), "final replay reply queued");
        self.final_replies.lock().push(reply);
    }
}
