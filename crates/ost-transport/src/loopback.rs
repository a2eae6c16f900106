//! 进程内回环通道。
//!
//! 模拟“客户端内存 + 消息传递底座”：批量读（put）把服务端页的内容拷入客户端接收区，
//! 批量写（get）从客户端预置的数据拷入服务端页。所有传输由一个后台任务串行执行，
//! 通过 mpsc 命令队列驱动，完成后回调描述符，与真实网络底座的事件模型一致。
//!
//! 每次投递前可按顺序注入故障：
//! - `Deliver`：正常传输；
//! - `Stall`：受理但永不完成，直到 `release_stalled` 触发迟到的完成；
//! - `Fail`：受理后立即报告失败。

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use ost_core::Result;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::channel::BulkChannel;
use crate::descriptor::{BulkDescriptor, CompletionState, Direction};
use crate::error::{self, OperationKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Fault {
    #[default]
    Deliver,
    Stall,
    Fail,
}

/// 模拟的客户端内存，按 xid 组织。
#[derive(Debug, Default)]
pub struct ClientMemory {
    outgoing: DashMap<u64, Bytes>,
    incoming: DashMap<u64, Bytes>,
}

impl ClientMemory {
    /// 预置批量写要发送的数据。
    pub fn stage(&self, xid: u64, data: impl Into<Bytes>) {
        self.outgoing.insert(xid, data.into());
    }

    /// 取走批量读收到的数据。
    pub fn take_received(&self, xid: u64) -> Option<Bytes> {
        self.incoming.remove(&xid).map(|(_, data)| data)
    }
}

enum Command {
    Transfer {
        descriptor: BulkDescriptor,
        fault: Fault,
    },
    Cancel(u64),
    ReleaseStalled,
}

pub struct LoopbackChannel {
    tx: mpsc::UnboundedSender<Command>,
    client: Arc<ClientMemory>,
    faults: Mutex<VecDeque<Fault>>,
    cancelled: DashMap<u64, ()>,
}

impl LoopbackChannel {
    /// 创建通道并在当前 tokio 运行时上启动后台传输任务。
    pub fn spawn() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(ClientMemory::default());
        tokio::spawn(run(rx, Arc::clone(&client)));
        Arc::new(Self {
            tx,
            client,
            faults: Mutex::new(VecDeque::new()),
            cancelled: DashMap::new(),
        })
    }

    pub fn client(&self) -> &Arc<ClientMemory> {
        &self.client
    }

    /// 为接下来的投递依次安排故障；队列耗尽后恢复为正常传输。
    pub fn inject(&self, faults: impl IntoIterator<Item = Fault>) {
        self.faults.lock().extend(faults);
    }

    /// 让所有挂起的传输迟到地完成。
    pub fn release_stalled(&self) {
        let _ = self.tx.send(Command::ReleaseStalled);
    }

    pub fn was_cancelled(&self, xid: u64) -> bool {
        self.cancelled.contains_key(&xid)
    }

    fn enqueue(&self, descriptor: BulkDescriptor) -> Result<()> {
        let kind = OperationKind::for_direction(descriptor.direction());
        let xid = descriptor.xid();
        let fault = self.faults.lock().pop_front().unwrap_or_default();
        self.tx
            .send(Command::Transfer { descriptor, fault })
            .map_err(|_| error::channel_closed(kind, xid))
    }
}

#[async_trait]
impl BulkChannel for LoopbackChannel {
    async fn post_put(&self, descriptor: BulkDescriptor) -> Result<()> {
        self.enqueue(descriptor)
    }

    async fn post_get(&self, descriptor: BulkDescriptor) -> Result<()> {
        self.enqueue(descriptor)
    }

    fn cancel(&self, xid: u64) {
        self.cancelled.insert(xid, ());
        let _ = self.tx.send(Command::Cancel(xid));
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>, client: Arc<ClientMemory>) {
    let mut stalled: Vec<BulkDescriptor> = Vec::new();
    while let Some(command) = rx.recv().await {
        match command {
            Command::Transfer { descriptor, fault } => match fault {
                Fault::Deliver => deliver(&descriptor, &client),
                Fault::Stall => {
                    debug!(xid = descriptor.xid(), "loopback stalling transfer");
                    stalled.push(descriptor);
                }
                Fault::Fail => {
                    debug!(xid = descriptor.xid(), "loopback failing transfer");
                    descriptor.fail();
                }
            },
            Command::Cancel(xid) => stalled.retain(|d| d.xid() != xid),
            Command::ReleaseStalled => {
                for descriptor in stalled.drain(..) {
                    // 描述符通常已超时或被放弃，此处的完成应被忽略。
                    descriptor.complete(descriptor.total_len());
                }
            }
        }
    }
}

fn deliver(descriptor: &BulkDescriptor, client: &ClientMemory) {
    if descriptor.state() != CompletionState::Pending {
        return;
    }
    let xid = descriptor.xid();
    let result = match descriptor.direction() {
        Direction::PutSource => push_to_client(descriptor, client),
        Direction::GetSink => pull_from_client(descriptor, client),
    };
    match result {
        Ok(moved) => {
            descriptor.complete(moved);
        }
        Err(reason) => {
            warn!(xid, reason, "loopback transfer failed");
            descriptor.fail();
        }
    }
}

fn push_to_client(
    descriptor: &BulkDescriptor,
    client: &ClientMemory,
) -> std::result::Result<usize, &'static str> {
    let segments = descriptor.segments();
    let total = segments.iter().map(|s| s.len).sum();
    let mut out = BytesMut::zeroed(total);
    let mut cursor = 0;
    for segment in &segments {
        segment
            .page
            .read_at(segment.offset, &mut out[cursor..cursor + segment.len])
            .map_err(|_| "server page unreadable")?;
        cursor += segment.len;
    }
    client.incoming.insert(descriptor.xid(), out.freeze());
    Ok(total)
}

fn pull_from_client(
    descriptor: &BulkDescriptor,
    client: &ClientMemory,
) -> std::result::Result<usize, &'static str> {
    let data = client
        .outgoing
        .remove(&descriptor.xid())
        .map(|(_, data)| data)
        .ok_or("client staged no data")?;
    let segments = descriptor.segments();
    let total: usize = segments.iter().map(|s| s.len).sum();
    if data.len() < total {
        return Err("client data shorter than descriptor");
    }
    let mut cursor = 0;
    for segment in &segments {
        segment
            .page
            .write_at(segment.offset, &data[cursor..cursor + segment.len])
            .map_err(|_| "server page unwritable")?;
        cursor += segment.len;
    }
    Ok(total)
}
