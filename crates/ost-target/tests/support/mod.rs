//! 集成测试共用的装配与请求构造。
#![allow(dead_code)]

use std::sync::Arc;

use ost_buffer::BundlePool;
use ost_core::wire::{
    ByteOrder, ConnectData, ExportHandle, IoObject, ObjectAttrs, Opcode, RemoteRange,
    ReplyMessage, RequestMessage, encode_array, encode_one,
};
use ost_core::{BulkConfig, PAGE_SIZE, PoolConfig};
use ost_target::{
    Disposition, FifoRecoveryQueue, InMemoryExports, MemoryDevice, Target, TargetLifecycle,
    export_from_reply,
};
use ost_transport::LoopbackChannel;

pub struct HarnessConfig {
    pub bundles: usize,
    pub pages_per_bundle: usize,
    pub pool: PoolConfig,
    pub bulk: BulkConfig,
    pub recovery: FifoRecoveryQueue,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            bundles: 4,
            pages_per_bundle: 4,
            pool: PoolConfig::default(),
            bulk: BulkConfig::default(),
            recovery: FifoRecoveryQueue::new(),
        }
    }
}

pub struct Harness {
    pub pool: BundlePool,
    pub device: Arc<MemoryDevice>,
    pub channel: Arc<LoopbackChannel>,
    pub exports: Arc<InMemoryExports>,
    pub recovery: Arc<FifoRecoveryQueue>,
    pub lifecycle: Arc<TargetLifecycle>,
    pub target: Arc<Target>,
}

impl Harness {
    /// 必须在 tokio 运行时内调用：回环通道会启动后台任务。
    pub fn new() -> Self {
        Self::build(HarnessConfig::default())
    }

    pub fn build(config: HarnessConfig) -> Self {
        let pool = BundlePool::new(&config.pool);
        pool.init(config.bundles, config.pages_per_bundle * PAGE_SIZE)
            .unwrap();
        let device = Arc::new(MemoryDevice::new(pool.clone()));
        let channel = LoopbackChannel::spawn();
        let exports = Arc::new(InMemoryExports::new());
        let recovery = Arc::new(config.recovery);
        let lifecycle = Arc::new(TargetLifecycle::new());
        let target = Target::builder(device.clone(), channel.clone())
            .with_bulk_config(config.bulk)
            .with_exports(exports.clone())
            .with_recovery_queue(recovery.clone())
            .with_lifecycle(lifecycle.clone())
            .attach();
        Self {
            pool,
            device,
            channel,
            exports,
            recovery,
            lifecycle,
            target: Arc::new(target),
        }
    }

    pub async fn connect(&self, uuid: &str) -> ExportHandle {
        let reply = expect_reply(self.target.handle(connect_request(1, uuid)).await);
        assert!(reply.status.is_ok(), "connect failed: {}", reply.status);
        export_from_reply(&reply).unwrap()
    }

    pub fn pool_is_whole(&self) -> bool {
        let stats = self.pool.stats();
        stats.current_length == stats.total_length
    }
}

pub fn expect_reply(disposition: Disposition) -> ReplyMessage {
    match disposition {
        Disposition::Reply(reply) => reply,
        other => panic!("expected an immediate reply, got {:?}", other),
    }
}

pub fn connect_request(xid: u64, uuid: &str) -> RequestMessage {
    RequestMessage::for_op(Opcode::Connect, xid)
        .with_buffer(encode_one(&ConnectData::new(uuid), ByteOrder::Little))
}

pub fn simple_request(op: Opcode, xid: u64, export: ExportHandle) -> RequestMessage {
    RequestMessage::for_op(op, xid).with_export(export)
}

pub fn attrs_request(
    op: Opcode,
    xid: u64,
    export: ExportHandle,
    attrs: &ObjectAttrs,
) -> RequestMessage {
    simple_request(op, xid, export).with_buffer(encode_one(attrs, ByteOrder::Little))
}

pub fn read_request(
    xid: u64,
    export: ExportHandle,
    id: u64,
    ranges: &[RemoteRange],
) -> RequestMessage {
    bulk_request(
        Opcode::Read,
        xid,
        export,
        &ObjectAttrs::for_object(id, 0),
        &[IoObject::new(id, 0, ranges.len() as u32)],
        ranges,
        ByteOrder::Little,
    )
}

pub fn write_request(
    xid: u64,
    export: ExportHandle,
    body: &ObjectAttrs,
    objects: &[IoObject],
    ranges: &[RemoteRange],
) -> RequestMessage {
    bulk_request(
        Opcode::Write,
        xid,
        export,
        body,
        objects,
        ranges,
        ByteOrder::Little,
    )
}

pub fn bulk_request(
    op: Opcode,
    xid: u64,
    export: ExportHandle,
    body: &ObjectAttrs,
    objects: &[IoObject],
    ranges: &[RemoteRange],
    order: ByteOrder,
) -> RequestMessage {
    RequestMessage::for_op(op, xid)
        .with_export(export)
        .with_byte_order(order)
        .with_buffer(encode_one(body, order))
        .with_buffer(encode_array(objects, order))
        .with_buffer(encode_array(ranges, order))
}
