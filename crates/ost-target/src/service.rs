//! 工作池服务循环。
//!
//! 帧通过有界 mpsc 队列进入，`workers` 个任务竞争取帧、解码并交给 [`Target::handle`]，
//! 需要立即回复的结果编码后交给 [`ReplySink`]。任务之间不共享其他状态，请求之间也不保证顺序。

use std::sync::Arc;

use bytes::Bytes;
use ost_core::wire::{ReplyMessage, RequestMessage};
use ost_core::{CoreError, Result, ServiceConfig, codes};
use ost_transport::ReplyMatcher;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::handler::{Disposition, Target};

/// 回复的出口。
pub trait ReplySink: Send + Sync + 'static {
    fn send(&self, frame: Bytes);
}

/// 进程内客户端：解码回复帧并按 xid 交给等待者。
impl ReplySink for ReplyMatcher {
    fn send(&self, frame: Bytes) {
        match ReplyMessage::decode(frame) {
            Ok(reply) => {
                self.deliver(reply);
            }
            Err(err) => warn!(error = %err, "dropping undecodable reply frame"),
        }
    }
}

pub struct TargetService {
    tx: mpsc::Sender<Bytes>,
    workers: Vec<JoinHandle<()>>,
}

impl TargetService {
    /// 在当前 tokio 运行时上启动工作任务。
    pub fn start(target: Arc<Target>, config: &ServiceConfig, sink: Arc<dyn ReplySink>) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..config.workers.max(1))
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    Arc::clone(&target),
                    Arc::clone(&rx),
                    Arc::clone(&sink),
                ))
            })
            .collect::<Vec<_>>();
        info!(
            workers = workers.len(),
            queue_depth = config.queue_depth,
            "target service started"
        );
        Self { tx, workers }
    }

    /// 提交一帧请求；队列满时等待。
    pub async fn submit(&self, frame: Bytes) -> Result<()> {
        self.tx.send(frame).await.map_err(|_| {
            CoreError::new(codes::DEVICE_INACTIVE, "target service has shut down")
        })
    }

    /// 关闭入口并等待所有工作任务处理完已入队的帧。
    pub async fn shutdown(self) {
        drop(self.tx);
        for handle in self.workers {
            if let Err(err) = handle.await {
                warn!(error = %err, "service worker ended abnormally");
            }
        }
        info!("target service stopped");
    }
}

async fn worker(
    id: usize,
    target: Arc<Target>,
    rx: Arc<Mutex<mpsc::Receiver<Bytes>>>,
    sink: Arc<dyn ReplySink>,
) {
    loop {
        let frame = rx.lock().await.recv().await;
        let Some(frame) = frame else {
            break;
        };
        let request = match RequestMessage::decode(frame) {
            Ok(request) => request,
            Err(err) => {
                warn!(worker = id, error = %err, "dropping undecodable request frame");
                continue;
            }
        };
        match target.handle(request).await {
            Disposition::Reply(reply) => sink.send(reply.encode()),
            other => debug!(worker = id, disposition = ?other, "no immediate reply"),
        }
    }
    debug!(worker = id, "service worker exiting");
}
