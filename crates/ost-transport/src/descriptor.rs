use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ost_core::buffer::check_bounds;
use ost_core::{Result, SharedPage};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::channel::BulkChannel;
use crate::error::{self, ATTACH, OperationKind};

/// 传输方向，以服务端视角命名。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// 服务端页是数据源，推送给客户端（批量读）。
    PutSource,
    /// 服务端页是接收端，从客户端拉取（批量写）。
    GetSink,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionState {
    Pending,
    Completed,
    TimedOut,
    Aborted,
    Failed,
}

/// 绑定到描述符的一段页区间。
#[derive(Clone)]
pub struct BulkSegment {
    pub page: SharedPage,
    pub offset: usize,
    pub len: usize,
}

impl fmt::Debug for BulkSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkSegment")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

struct DescriptorState {
    submitted: bool,
    completion: CompletionState,
    segments: Vec<BulkSegment>,
    transferred: usize,
}

struct DescriptorInner {
    xid: u64,
    direction: Direction,
    channel: Arc<dyn BulkChannel>,
    state: Mutex<DescriptorState>,
    notify: Notify,
}

/// 一次在途批量传输。
///
/// # 生命周期（How）
/// 1. `prepare` 创建描述符，状态为 `Pending`；
/// 2. `attach_page` 按顺序绑定页区间，提交后再绑定会失败；
/// 3. `submit_put`/`submit_get` 把描述符交给通道；
/// 4. 通道在传输结束时调用 `complete`/`fail`，描述符唤醒自己的等待者；
/// 5. `await_completion` 在期限内等待，超时则置为 `TimedOut`；调用方随后应 `abort`。
///
/// 状态只会从 `Pending` 迁出一次（`abort` 额外允许 `TimedOut → Aborted`），之后到达的完成
/// 通知被忽略。
#[derive(Clone)]
pub struct BulkDescriptor {
    inner: Arc<DescriptorInner>,
}

impl fmt::Debug for BulkDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkDescriptor")
            .field("xid", &self.inner.xid)
            .field("direction", &self.inner.direction)
            .field("state", &self.state())
            .finish()
    }
}

impl BulkDescriptor {
    pub fn prepare(xid: u64, direction: Direction, channel: Arc<dyn BulkChannel>) -> Self {
        Self {
            inner: Arc::new(DescriptorInner {
                xid,
                direction,
                channel,
                state: Mutex::new(DescriptorState {
                    submitted: false,
                    completion: CompletionState::Pending,
                    segments: Vec::new(),
                    transferred: 0,
                }),
                notify: Notify::new(),
            }),
        }
    }

    pub fn xid(&self) -> u64 {
        self.inner.xid
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    /// 追加一段页区间。
    pub fn attach_page(&self, page: SharedPage, offset: usize, len: usize) -> Result<()> {
        check_bounds(page.capacity(), offset, len)?;
        let mut state = self.inner.state.lock();
        if state.submitted {
            return Err(error::already_submitted(ATTACH, self.inner.xid));
        }
        state.segments.push(BulkSegment { page, offset, len });
        Ok(())
    }

    pub async fn submit_put(&self) -> Result<()> {
        self.submit(Direction::PutSource).await
    }

    pub async fn submit_get(&self) -> Result<()> {
        self.submit(Direction::GetSink).await
    }

    async fn submit(&self, expected: Direction) -> Result<()> {
        let kind = OperationKind::for_direction(expected);
        if self.inner.direction != expected {
            return Err(error::wrong_direction(kind, self.inner.xid, self.inner.direction));
        }
        {
            let mut state = self.inner.state.lock();
            if state.submitted {
                return Err(error::already_submitted(kind, self.inner.xid));
            }
            state.submitted = true;
        }
        let posted = match expected {
            Direction::PutSource => self.inner.channel.post_put(self.clone()).await,
            Direction::GetSink => self.inner.channel.post_get(self.clone()).await,
        };
        if posted.is_err() {
            self.settle(CompletionState::Failed, 0);
        }
        posted
    }

    /// 在 `timeout` 内等待完成。返回值为终态，或在期限到达时的 `TimedOut`。
    pub async fn await_completion(&self, timeout: Duration) -> CompletionState {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inner.notify.notified();
            let mut notified = std::pin::pin!(notified);
            // 先登记再检查状态，避免错过检查与等待之间到达的通知。
            notified.as_mut().enable();
            let state = self.state();
            if state != CompletionState::Pending {
                return state;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                if self.settle(CompletionState::TimedOut, 0) {
                    warn!(
                        xid = self.inner.xid,
                        direction = ?self.inner.direction,
                        timeout_ms = timeout.as_millis() as u64,
                        "bulk transfer timed out"
                    );
                }
                return self.state();
            }
        }
    }

    /// 通道报告传输成功。返回 `false` 表示描述符已处于终态，本次通知被忽略。
    pub fn complete(&self, transferred: usize) -> bool {
        self.settle(CompletionState::Completed, transferred)
    }

    /// 通道报告传输失败。
    pub fn fail(&self) -> bool {
        self.settle(CompletionState::Failed, 0)
    }

    fn settle(&self, to: CompletionState, transferred: usize) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.completion != CompletionState::Pending {
                debug!(
                    xid = self.inner.xid,
                    current = ?state.completion,
                    ignored = ?to,
                    "late bulk completion ignored"
                );
                return false;
            }
            state.completion = to;
            state.transferred = transferred;
        }
        self.inner.notify.notify_waiters();
        true
    }

    /// 放弃传输：解除页绑定并通知对端不再期待完成。已完成的描述符不受影响。
    pub fn abort(&self) {
        {
            let mut state = self.inner.state.lock();
            match state.completion {
                CompletionState::Completed | CompletionState::Aborted => return,
                _ => {}
            }
            state.completion = CompletionState::Aborted;
            state.segments.clear();
        }
        self.inner.channel.cancel(self.inner.xid);
        self.inner.notify.notify_waiters();
        debug!(xid = self.inner.xid, "bulk transfer aborted");
    }

    pub fn state(&self) -> CompletionState {
        self.inner.state.lock().completion
    }

    pub fn is_submitted(&self) -> bool {
        self.inner.state.lock().submitted
    }

    /// 当前绑定的页区间快照。
    pub fn segments(&self) -> Vec<BulkSegment> {
        self.inner.state.lock().segments.clone()
    }

    pub fn total_len(&self) -> usize {
        self.inner.state.lock().segments.iter().map(|s| s.len).sum()
    }

    pub fn transferred(&self) -> usize {
        self.inner.state.lock().transferred
    }

    /// 把终态折算为结果：只有 `Completed` 视为成功。
    pub fn outcome(&self) -> Result<usize> {
        let kind = OperationKind::for_direction(self.inner.direction);
        let xid = self.inner.xid;
        let state = self.inner.state.lock();
        match state.completion {
            CompletionState::Completed => Ok(state.transferred),
            CompletionState::TimedOut => Err(error::timeout_error(kind, xid)),
            CompletionState::Aborted => Err(error::aborted_error(kind, xid)),
            CompletionState::Failed => Err(error::failed_error(kind, xid, "peer reported failure")),
            CompletionState::Pending => Err(error::failed_error(kind, xid, "still pending")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 只记录调用，不做任何传输。
    #[derive(Default)]
    struct Recorder {
        posts: AtomicUsize,
        cancels: AtomicUsize,
    }

    #[async_trait]
    impl BulkChannel for Recorder {
        async fn post_put(&self, _descriptor: BulkDescriptor) -> Result<()> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn post_get(&self, _descriptor: BulkDescriptor) -> Result<()> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn cancel(&self, _xid: u64) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Debug)]
    struct Scratch;

    impl ost_core::PageBuffer for Scratch {
        fn capacity(&self) -> usize {
            ost_core::PAGE_SIZE
        }
        fn read_at(&self, _offset: usize, _dst: &mut [u8]) -> Result<()> {
            Ok(())
        }
        fn write_at(&self, _offset: usize, _src: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn completion_wakes_waiter_and_late_signals_are_ignored() {
        let channel = Arc::new(Recorder::default());
        let desc = BulkDescriptor::prepare(1, Direction::PutSource, channel.clone());
        desc.attach_page(Arc::new(Scratch), 0, 4096).unwrap();
        desc.submit_put().await.unwrap();
        assert!(desc.attach_page(Arc::new(Scratch), 0, 1).is_err());
        assert!(desc.submit_put().await.is_err());

        let signaller = desc.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            signaller.complete(4096);
        });
        assert_eq!(
            desc.await_completion(Duration::from_secs(5)).await,
            CompletionState::Completed
        );
        assert!(!desc.fail());
        assert_eq!(desc.outcome().unwrap(), 4096);
        assert_eq!(channel.posts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_then_abort_unbinds_pages_and_notifies_peer() {
        let channel = Arc::new(Recorder::default());
        let desc = BulkDescriptor::prepare(2, Direction::GetSink, channel.clone());
        desc.attach_page(Arc::new(Scratch), 0, 100).unwrap();
        assert!(desc.submit_put().await.is_err());
        desc.submit_get().await.unwrap();

        assert_eq!(
            desc.await_completion(Duration::from_secs(100)).await,
            CompletionState::TimedOut
        );
        desc.abort();
        assert_eq!(desc.state(), CompletionState::Aborted);
        assert!(desc.segments().is_empty());
        assert_eq!(channel.cancels.load(Ordering::SeqCst), 1);
        assert!(!desc.complete(100));
        assert_eq!(
            desc.outcome().unwrap_err().code(),
            ost_core::codes::BULK_ABORTED
        );
    }
}
