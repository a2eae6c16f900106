use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ost_core::wire::ReplyMessage;
use ost_core::{CoreError, Result, codes};
use tokio::sync::oneshot;
use tracing::debug;

/// 按 `xid` 关联在途请求与回复。
///
/// 发送方在发出请求前 `register`，拿到一次性接收端；回复到达时 `deliver` 取出对应发送端并投递。
/// 无人认领的回复（请求已取消或 xid 未知）被丢弃并返回 `false`。
#[derive(Debug, Default)]
pub struct ReplyMatcher {
    pending: DashMap<u64, oneshot::Sender<ReplyMessage>>,
}

impl ReplyMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, xid: u64) -> Result<oneshot::Receiver<ReplyMessage>> {
        match self.pending.entry(xid) {
            Entry::Occupied(_) => Err(CoreError::new(
                codes::RPC_DUPLICATE_XID,
                format!("xid {} already awaits a reply", xid),
            )),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(tx);
                Ok(rx)
            }
        }
    }

    pub fn deliver(&self, reply: ReplyMessage) -> bool {
        let xid = reply.xid;
        match self.pending.remove(&xid) {
            Some((_, tx)) => tx.send(reply).is_ok(),
            None => {
                debug!(xid, "dropping reply with no matching request");
                false
            }
        }
    }

    pub fn cancel(&self, xid: u64) -> bool {
        self.pending.remove(&xid).is_some()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
