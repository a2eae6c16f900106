//! 存储目标请求处理器。
//!
//! # 处理流程（How）
//! 1. 非连接请求必须携带有效导出，否则回复 `ENOTCONN`；
//! 2. 恢复窗口内执行门控：放弃恢复的请求结束窗口，否则按操作码放行、排队或以 `EAGAIN` 拒绝；
//! 3. 设备生命周期守卫：设备不在 `Active` 状态时回复 `ENODEV`；
//! 4. 按操作码分发，批量读写与 SAN 直连读写进入 [`crate::brw`]；
//! 5. 收尾：通信故障驱逐导出且不回复；成功时回填 `last_committed` 与事务号；
//!    带 `LAST_REPLAY` 标志的请求在恢复窗口内走最终回复队列。

use std::sync::Arc;

use ost_core::wire::{
    ByteOrder, ConnectData, ExportHandle, ObjectAttrs, Opcode, ReplyMessage, RequestMessage,
    StatFs, WireReader, WireWriter, encode_one, msg_flags, valid,
};
use ost_core::{BulkConfig, CoreError, Result, Status, codes};
use ost_transport::BulkChannel;
use tracing::{Instrument, debug, debug_span, error, info, warn};

use crate::brw::{self, BulkContext};
use crate::device::{DeviceLifecycle, IoKind, ObjectDevice};
use crate::error;
use crate::export::{ExportRegistry, InMemoryExports};
use crate::lock::{LockService, UnsupportedLocks};
use crate::recovery::{FifoRecoveryQueue, RecoveryQueue, TargetLifecycle};

/// 一次请求处理的去向。
#[derive(Debug)]
pub enum Disposition {
    /// 立即发送的回复。
    Reply(ReplyMessage),
    /// 恢复窗口内被排队，稍后重放。
    Queued,
    /// `LAST_REPLAY` 请求的回复已交给恢复队列。
    QueuedFinal,
    /// 批量传输失败，导出已被驱逐，不发送回复。
    Evicted(ExportHandle),
}

/// 分发成功后的回复与本次事务号。
#[derive(Debug)]
pub(crate) struct Handled {
    pub reply: ReplyMessage,
    pub transno: u64,
}

impl Handled {
    pub(crate) fn new(reply: ReplyMessage) -> Self {
        Self { reply, transno: 0 }
    }
}

/// 挂载到设备上的存储目标。
pub struct Target {
    device: Arc<dyn ObjectDevice>,
    device_state: Arc<DeviceLifecycle>,
    lifecycle: Arc<TargetLifecycle>,
    exports: Arc<dyn ExportRegistry>,
    recovery: Arc<dyn RecoveryQueue>,
    locks: Arc<dyn LockService>,
    channel: Arc<dyn BulkChannel>,
    bulk: BulkConfig,
}

/// [`Target`] 的装配器，未指定的协作者使用内存实现。
pub struct TargetBuilder {
    device: Arc<dyn ObjectDevice>,
    channel: Arc<dyn BulkChannel>,
    bulk: BulkConfig,
    device_state: Option<Arc<DeviceLifecycle>>,
    lifecycle: Option<Arc<TargetLifecycle>>,
    exports: Option<Arc<dyn ExportRegistry>>,
    recovery: Option<Arc<dyn RecoveryQueue>>,
    locks: Option<Arc<dyn LockService>>,
}

impl TargetBuilder {
    pub fn with_bulk_config(mut self, bulk: BulkConfig) -> Self {
        self.bulk = bulk;
        self
    }

    pub fn with_device_state(mut self, state: Arc<DeviceLifecycle>) -> Self {
        self.device_state = Some(state);
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<TargetLifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn with_exports(mut self, exports: Arc<dyn ExportRegistry>) -> Self {
        self.exports = Some(exports);
        self
    }

    pub fn with_recovery_queue(mut self, recovery: Arc<dyn RecoveryQueue>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    pub fn with_locks(mut self, locks: Arc<dyn LockService>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// 完成装配并激活设备。
    pub fn attach(self) -> Target {
        let device_state = self.device_state.unwrap_or_default();
        if !device_state.activate() {
            warn!(state = ?device_state.state(), "device was not in setup state at attach");
        }
        info!(
            timeout_secs = self.bulk.timeout_secs,
            checksum = self.bulk.checksum,
            "storage target attached"
        );
        Target {
            device: self.device,
            device_state,
            lifecycle: self.lifecycle.unwrap_or_default(),
            exports: self
                .exports
                .unwrap_or_else(|| Arc::new(InMemoryExports::new())),
            recovery: self
                .recovery
                .unwrap_or_else(|| Arc::new(FifoRecoveryQueue::new())),
            locks: self.locks.unwrap_or_else(|| Arc::new(UnsupportedLocks)),
            channel: self.channel,
            bulk: self.bulk,
        }
    }
}

impl Target {
    pub fn builder(device: Arc<dyn ObjectDevice>, channel: Arc<dyn BulkChannel>) -> TargetBuilder {
        TargetBuilder {
            device,
            channel,
            bulk: BulkConfig::default(),
            device_state: None,
            lifecycle: None,
            exports: None,
            recovery: None,
            locks: None,
        }
    }

    pub fn lifecycle(&self) -> &Arc<TargetLifecycle> {
        &self.lifecycle
    }

    pub fn device_state(&self) -> &Arc<DeviceLifecycle> {
        &self.device_state
    }

    pub fn exports(&self) -> &Arc<dyn ExportRegistry> {
        &self.exports
    }

    /// 停止接收新请求。
    pub fn stop(&self) {
        self.device_state.begin_stopping();
        info!("storage target stopping");
    }

    /// 处理一个已解码的请求。
    pub async fn handle(&self, request: RequestMessage) -> Disposition {
        let span = debug_span!(
            "ost.request",
            xid = request.xid(),
            opcode = request.opcode_raw()
        );
        self.process(&request).instrument(span).await
    }

    async fn process(&self, request: &RequestMessage) -> Disposition {
        let opcode = request.opcode();
        if opcode != Some(Opcode::Connect) {
            if self.exports.lookup(request.export()).is_none() {
                error!(
                    opcode = request.opcode_raw(),
                    export = request.export().0,
                    "operation on unconnected target"
                );
                return Disposition::Reply(ReplyMessage::error(request, Status::ENOTCONN));
            }
            if !self.lifecycle.take_abort() && self.lifecycle.is_recovering() {
                if let Some(early) = self.recovery_gate(request, opcode) {
                    return early;
                }
            }
        }

        if let Err(err) = self.device_state.ensure_active() {
            warn!(error = %err, "rejecting request on inactive device");
            return Disposition::Reply(ReplyMessage::error(request, err.status()));
        }

        let op = match opcode {
            Some(Opcode::LockBlockingCallback | Opcode::LockCompletionCallback) => {
                error!("lock callbacks should not reach a storage target");
                return Disposition::Reply(ReplyMessage::error(request, Status::EOPNOTSUPP));
            }
            Some(op) => op,
            None => {
                error!(opcode = request.opcode_raw(), "unexpected opcode");
                return Disposition::Reply(ReplyMessage::error(request, Status::EOPNOTSUPP));
            }
        };

        let result = self.dispatch(request, op).await;
        self.finish(request, op, result)
    }

    /// 恢复窗口内的门控；返回 `None` 表示继续处理。
    fn recovery_gate(&self, request: &RequestMessage, opcode: Option<Opcode>) -> Option<Disposition> {
        match opcode {
            Some(Opcode::Connect | Opcode::Disconnect) => None,
            Some(
                Opcode::Ping
                | Opcode::Close
                | Opcode::Create
                | Opcode::Destroy
                | Opcode::Open
                | Opcode::Punch
                | Opcode::Setattr
                | Opcode::Syncfs
                | Opcode::Write
                | Opcode::LockEnqueue,
            ) => {
                if self.recovery.queue_for_recovery(request) {
                    None
                } else {
                    Some(Disposition::Queued)
                }
            }
            _ => {
                let err = CoreError::new(
                    codes::RECOVERY_NOT_PERMITTED,
                    format!("opcode {} during recovery", request.opcode_raw()),
                );
                warn!(code = err.code(), "not permitted during recovery");
                Some(Disposition::Reply(ReplyMessage::error(request, err.status())))
            }
        }
    }

    async fn dispatch(&self, request: &RequestMessage, op: Opcode) -> Result<Handled> {
        debug!(op = op.name(), "dispatch");
        match op {
            Opcode::Connect => self.connect(request),
            Opcode::Disconnect => self.disconnect(request),
            Opcode::Ping => Ok(Handled::new(ReplyMessage::for_request(request))),
            Opcode::Getattr
            | Opcode::Setattr
            | Opcode::Create
            | Opcode::Destroy
            | Opcode::Open
            | Opcode::Close
            | Opcode::Punch => self.object_op(request, op).await,
            Opcode::Statfs => self.statfs(request).await,
            Opcode::Syncfs => self.syncfs(request).await,
            Opcode::Read => brw::brw_read(&self.bulk_context(), request).await,
            Opcode::Write => brw::brw_write(&self.bulk_context(), request).await,
            Opcode::SanRead => brw::san_brw(self.device.as_ref(), request, IoKind::Read).await,
            Opcode::SanWrite => brw::san_brw(self.device.as_ref(), request, IoKind::Write).await,
            Opcode::LockEnqueue => self.locks.enqueue(request).await.map(Handled::new),
            Opcode::LockConvert => self.locks.convert(request).await.map(Handled::new),
            Opcode::LockCancel => self.locks.cancel(request).await.map(Handled::new),
            Opcode::LockBlockingCallback | Opcode::LockCompletionCallback => {
                Err(error::unsupported(op.as_wire()))
            }
        }
    }

    fn finish(&self, request: &RequestMessage, op: Opcode, result: Result<Handled>) -> Disposition {
        let (mut reply, transno, clean) = match result {
            Ok(Handled { reply, transno }) => (reply, transno, true),
            Err(err) if err.category().escalates() => {
                let export = request.export();
                error!(
                    export = export.0,
                    code = err.code(),
                    error = %err,
                    "bulk transfer failed, evicting export"
                );
                self.exports.evict(export);
                return Disposition::Evicted(export);
            }
            Err(err) => {
                debug!(code = err.code(), status = %err.status(), error = %err, "request failed");
                (ReplyMessage::error(request, err.status()), 0, false)
            }
        };

        // 断开后导出已不存在，不再回填。
        if clean && op != Opcode::Disconnect {
            if self.device.no_transno() {
                debug!("not sending last_committed update");
            } else {
                reply.last_committed = self.device.last_committed();
            }
        }

        if request.has_flag(msg_flags::LAST_REPLAY) {
            if self.lifecycle.is_recovering() {
                debug!("LAST_REPLAY, queuing reply");
                self.recovery.queue_final_reply(request, reply);
                return Disposition::QueuedFinal;
            }
            warn!("LAST_REPLAY after recovery already ended");
            return Disposition::Reply(ReplyMessage::error(request, Status::ENOTCONN));
        }

        if clean {
            reply.transno = transno;
        }
        Disposition::Reply(reply)
    }

    fn bulk_context(&self) -> BulkContext<'_> {
        BulkContext {
            device: self.device.as_ref(),
            channel: &self.channel,
            config: &self.bulk,
        }
    }

    fn connect(&self, request: &RequestMessage) -> Result<Handled> {
        let data: ConnectData = request.body(0, "connect data")?;
        if data.client_uuid.is_empty() {
            return Err(error::malformed("connect without client uuid"));
        }
        let handle = self.exports.connect(&data.client_uuid);
        let mut writer = WireWriter::new(ByteOrder::Little);
        writer.put_u64(handle.0);
        Ok(Handled::new(
            ReplyMessage::for_request(request).with_buffer(writer.freeze()),
        ))
    }

    fn disconnect(&self, request: &RequestMessage) -> Result<Handled> {
        if !self.exports.disconnect(request.export()) {
            return Err(CoreError::new(
                codes::EXPORT_NOT_CONNECTED,
                format!("export {} already gone", request.export().0),
            ));
        }
        Ok(Handled::new(ReplyMessage::for_request(request)))
    }

    /// 单对象操作：设备错误作为回复状态返回，回复体携带操作后的属性。
    async fn object_op(&self, request: &RequestMessage, op: Opcode) -> Result<Handled> {
        let mut attrs: ObjectAttrs = request.body(0, "ost body")?;
        if op == Opcode::Punch && !attrs.has(valid::SIZE | valid::BLOCKS) {
            return Err(error::invalid_argument(
                "punch requires both size and blocks to be valid",
            ));
        }
        let device = self.device.as_ref();
        let outcome = match op {
            Opcode::Getattr => device.getattr(&mut attrs).await.map(|()| 0),
            Opcode::Setattr => device.setattr(&mut attrs).await,
            Opcode::Create => device.create(&mut attrs).await,
            Opcode::Destroy => device.destroy(&attrs).await,
            Opcode::Open => device.open(&mut attrs).await,
            Opcode::Close => device.close(&mut attrs).await,
            Opcode::Punch => {
                let (start, end) = (attrs.size, attrs.blocks);
                device.punch(&mut attrs, start, end).await
            }
            other => return Err(error::unsupported(other.as_wire())),
        };
        let mut reply = ReplyMessage::for_request(request);
        let transno = match outcome {
            Ok(transno) => transno,
            Err(err) => {
                debug!(op = op.name(), object = attrs.id, error = %err, "object operation failed");
                reply.status = err.status();
                0
            }
        };
        Ok(Handled {
            reply: reply.with_buffer(encode_one(&attrs, ByteOrder::Little)),
            transno,
        })
    }

    async fn statfs(&self, request: &RequestMessage) -> Result<Handled> {
        let (status, statfs) = match self.device.statfs().await {
            Ok(statfs) => (Status::OK, statfs),
            Err(err) => {
                error!(error = %err, "statfs failed");
                (err.status(), StatFs::default())
            }
        };
        let mut reply =
            ReplyMessage::for_request(request).with_buffer(encode_one(&statfs, ByteOrder::Little));
        reply.status = status;
        Ok(Handled::new(reply))
    }

    async fn syncfs(&self, request: &RequestMessage) -> Result<Handled> {
        if let Err(err) = self.device.syncfs().await {
            error!(error = %err, "syncfs failed");
            return Err(err);
        }
        Ok(Handled::new(ReplyMessage::for_request(request)))
    }
}

/// 从连接回复中取出导出句柄。
pub fn export_from_reply(reply: &ReplyMessage) -> Result<ExportHandle> {
    let buf = reply
        .buffers
        .first()
        .cloned()
        .ok_or_else(|| error::malformed("connect reply without export handle"))?;
    let mut reader = WireReader::new(buf, ByteOrder::Little);
    Ok(ExportHandle(reader.u64("export handle")?))
}
