//! 批量读写流水线：数据搬运、短读、校验和、区间结果码，以及传输失败时的提交与驱逐。

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use ost_core::status::errno;
use ost_core::wire::{IoObject, ObjectAttrs, Opcode, RemoteRange, StatFs};
use ost_core::{
    BulkConfig, CoreError, PAGE_SIZE, PageBuffer, PoolConfig, Result, SharedPage, Status, codes,
};
use ost_target::{
    Disposition, ExportRegistry, IoKind, LocalPage, ObjectDevice, PreparedIo, Target,
    decode_range_codes,
};
use ost_transport::{Fault, LoopbackChannel};
use support::{Harness, HarnessConfig, expect_reply, read_request, simple_request, write_request};

const PAGE: u64 = PAGE_SIZE as u64;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn read_pushes_object_bytes_and_reports_count() {
    let h = Harness::new();
    let export = h.connect("client-a").await;
    let data = pattern(6000);
    h.device.insert_object(1, data.clone());

    let ranges = [RemoteRange::new(100, 5000, 0)];
    let reply = expect_reply(h.target.handle(read_request(10, export, 1, &ranges)).await);

    assert_eq!(reply.status, Status::from_count(5000));
    assert_eq!(
        h.channel.client().take_received(10).unwrap().as_ref(),
        &data[100..5100]
    );
    assert_eq!((h.device.prepare_count(), h.device.commit_count()), (1, 1));
    assert!(h.pool_is_whole());
}

#[tokio::test(flavor = "multi_thread")]
async fn read_past_end_of_object_is_short() {
    let h = Harness::new();
    let export = h.connect("client-a").await;
    let data = pattern(5000);
    h.device.insert_object(1, data.clone());

    let ranges = [RemoteRange::new(0, 3 * PAGE_SIZE as u32, 0)];
    let reply = expect_reply(h.target.handle(read_request(11, export, 1, &ranges)).await);

    assert_eq!(reply.status, Status::from_count(5000));
    assert_eq!(h.channel.client().take_received(11).unwrap().as_ref(), &data[..]);
}

#[tokio::test(flavor = "multi_thread")]
async fn read_stamps_checksum_when_configured() {
    let h = Harness::build(HarnessConfig {
        bulk: BulkConfig {
            checksum: true,
            ..BulkConfig::default()
        },
        ..HarnessConfig::default()
    });
    let export = h.connect("client-a").await;
    let data = pattern(PAGE_SIZE + 77);
    h.device.insert_object(4, data.clone());

    let ranges = [RemoteRange::new(0, data.len() as u32, 0)];
    let reply = expect_reply(h.target.handle(read_request(12, export, 4, &ranges)).await);

    let body: ObjectAttrs = reply.body(0, "ost body").unwrap();
    assert_eq!(body.checksum(), Some(crc32fast::hash(&data)));
}

#[tokio::test(flavor = "multi_thread")]
async fn write_lands_data_and_reports_per_range_codes() {
    let h = Harness::new();
    let export = h.connect("client-a").await;
    h.device.insert_object(3, Vec::new());
    h.device.insert_object(4, Vec::new());
    h.device.fail_page(3, 3 * PAGE, errno::ENOSPC);

    let objects = [IoObject::new(3, 0, 2), IoObject::new(4, 0, 1)];
    let ranges = [
        RemoteRange::new(0, 100, 0),
        RemoteRange::new(2 * PAGE, 2 * PAGE_SIZE as u32, 0),
        RemoteRange::new(0, 10, 0),
    ];
    let payload = pattern(100 + 2 * PAGE_SIZE + 10);
    h.channel.client().stage(20, payload.clone());

    let reply = expect_reply(
        h.target
            .handle(write_request(
                20,
                export,
                &ObjectAttrs::for_object(3, 0),
                &objects,
                &ranges,
            ))
            .await,
    );

    assert_eq!(reply.status, Status::OK);
    assert_eq!(
        decode_range_codes(&reply.buffers[1]).unwrap(),
        vec![0, -errno::ENOSPC, 0]
    );
    assert!(reply.transno > 0);
    assert_eq!(reply.last_committed, reply.transno);

    let third = h.device.object_data(3).unwrap();
    assert_eq!(third.len(), 3 * PAGE_SIZE);
    assert_eq!(&third[..100], &payload[..100]);
    assert_eq!(&third[2 * PAGE_SIZE..], &payload[100..100 + PAGE_SIZE]);
    assert_eq!(h.device.object_data(4).unwrap(), &payload[100 + 2 * PAGE_SIZE..]);
    assert!(h.pool_is_whole());
}

#[tokio::test(flavor = "multi_thread")]
async fn write_checksum_mismatch_is_not_fatal() {
    let h = Harness::new();
    let export = h.connect("client-a").await;
    h.device.insert_object(5, Vec::new());
    h.channel.client().stage(21, vec![1u8; 64]);

    let mut body = ObjectAttrs::for_object(5, 0);
    body.set_checksum(0xDEAD_BEEF);
    let ranges = [RemoteRange::new(0, 64, 0)];
    let reply = expect_reply(
        h.target
            .handle(write_request(21, export, &body, &[IoObject::new(5, 0, 1)], &ranges))
            .await,
    );
    assert_eq!(reply.status, Status::OK);
    assert_eq!(h.device.object_data(5).unwrap(), vec![1u8; 64]);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_write_descriptors_are_rejected_before_prepare() {
    let h = Harness::new();
    let export = h.connect("client-a").await;
    h.device.insert_object(6, Vec::new());
    let body = ObjectAttrs::for_object(6, 0);

    let empty = expect_reply(h.target.handle(write_request(22, export, &body, &[], &[])).await);
    assert_eq!(empty.status, Status::EFAULT);

    let zero = expect_reply(
        h.target
            .handle(write_request(23, export, &body, &[IoObject::new(6, 0, 0)], &[]))
            .await,
    );
    assert_eq!(zero.status, Status::EFAULT);

    let unordered = [RemoteRange::new(PAGE, 10, 0), RemoteRange::new(0, 10, 0)];
    let reply = expect_reply(
        h.target
            .handle(write_request(24, export, &body, &[IoObject::new(6, 0, 2)], &unordered))
            .await,
    );
    assert_eq!(reply.status, Status::EFAULT);
    assert_eq!(h.device.prepare_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn stalled_read_times_out_commits_and_evicts() {
    let h = Harness::build(HarnessConfig {
        bulk: BulkConfig {
            timeout_secs: 1,
            checksum: false,
        },
        ..HarnessConfig::default()
    });
    let export = h.connect("client-a").await;
    h.device.insert_object(1, pattern(PAGE_SIZE));
    h.channel.inject([Fault::Stall]);

    let ranges = [RemoteRange::new(0, PAGE_SIZE as u32, 0)];
    let outcome = h.target.handle(read_request(30, export, 1, &ranges)).await;

    assert!(matches!(outcome, Disposition::Evicted(handle) if handle == export));
    assert!(h.exports.was_evicted(export));
    assert!(h.channel.was_cancelled(30));
    assert_eq!((h.device.prepare_count(), h.device.commit_count()), (1, 1));
    assert!(h.pool_is_whole());

    let after = expect_reply(h.target.handle(simple_request(Opcode::Ping, 31, export)).await);
    assert_eq!(after.status, Status::ENOTCONN);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_write_transfer_commits_and_evicts() {
    let h = Harness::new();
    let export = h.connect("client-a").await;
    h.device.insert_object(2, vec![9u8; 16]);
    h.channel.inject([Fault::Fail]);
    h.channel.client().stage(32, vec![0u8; 16]);

    let ranges = [RemoteRange::new(0, 16, 0)];
    let outcome = h
        .target
        .handle(write_request(
            32,
            export,
            &ObjectAttrs::for_object(2, 0),
            &[IoObject::new(2, 0, 1)],
            &ranges,
        ))
        .await;

    assert!(matches!(outcome, Disposition::Evicted(_)));
    assert_eq!((h.device.prepare_count(), h.device.commit_count()), (1, 1));
    assert_eq!(h.device.object_data(2).unwrap(), vec![9u8; 16]);
    assert!(h.pool_is_whole());
}

#[tokio::test(flavor = "multi_thread")]
async fn stalled_write_times_out_commits_and_leaves_object_alone() {
    let h = Harness::build(HarnessConfig {
        bulk: BulkConfig {
            timeout_secs: 1,
            checksum: false,
        },
        ..HarnessConfig::default()
    });
    let export = h.connect("client-a").await;
    h.device.insert_object(2, vec![9u8; 16]);
    h.channel.inject([Fault::Stall]);
    h.channel.client().stage(34, vec![1u8; 16]);

    let ranges = [RemoteRange::new(0, 16, 0)];
    let outcome = h
        .target
        .handle(write_request(
            34,
            export,
            &ObjectAttrs::for_object(2, 0),
            &[IoObject::new(2, 0, 1)],
            &ranges,
        ))
        .await;

    assert!(matches!(outcome, Disposition::Evicted(handle) if handle == export));
    assert!(h.channel.was_cancelled(34));
    assert_eq!((h.device.prepare_count(), h.device.commit_count()), (1, 1));
    assert_eq!(h.device.object_data(2).unwrap(), vec![9u8; 16]);
    assert!(h.pool_is_whole());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_write_does_not_leak_bytes_from_a_reused_bundle() {
    let h = Harness::build(HarnessConfig {
        bundles: 1,
        ..HarnessConfig::default()
    });
    let export = h.connect("client-a").await;
    h.device.insert_object(1, b"SECRET-OF-OBJECT-ONE".to_vec());
    h.device.insert_object(2, vec![9u8; 20]);

    let ranges = [RemoteRange::new(0, 20, 0)];
    let reply = expect_reply(h.target.handle(read_request(35, export, 1, &ranges)).await);
    assert_eq!(reply.status, Status::from_count(20));

    h.channel.inject([Fault::Fail]);
    let outcome = h
        .target
        .handle(write_request(
            36,
            export,
            &ObjectAttrs::for_object(2, 0),
            &[IoObject::new(2, 0, 1)],
            &ranges,
        ))
        .await;

    assert!(matches!(outcome, Disposition::Evicted(_)));
    assert_eq!(h.device.object_data(2).unwrap(), vec![9u8; 20]);
    assert!(h.pool_is_whole());
}

#[tokio::test(flavor = "multi_thread")]
async fn commit_failure_becomes_error_reply() {
    let h = Harness::new();
    let export = h.connect("client-a").await;
    h.device.insert_object(2, Vec::new());
    h.device.fail_next_commit(errno::EIO);
    h.channel.client().stage(33, vec![0u8; 16]);

    let ranges = [RemoteRange::new(0, 16, 0)];
    let reply = expect_reply(
        h.target
            .handle(write_request(
                33,
                export,
                &ObjectAttrs::for_object(2, 0),
                &[IoObject::new(2, 0, 1)],
                &ranges,
            ))
            .await,
    );
    assert_eq!(reply.status, Status::EIO);
    assert_eq!(reply.transno, 0);
    assert!(h.pool_is_whole());
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_pool_yields_retryable_timeout() {
    let h = Harness::build(HarnessConfig {
        bundles: 1,
        pool: PoolConfig {
            wait_budget_ms: 50,
            ..PoolConfig::default()
        },
        ..HarnessConfig::default()
    });
    let export = h.connect("client-a").await;
    h.device.insert_object(1, pattern(64));
    let held = h.pool.checkout_one(h.pool.buf_size()).unwrap();

    let ranges = [RemoteRange::new(0, 64, 0)];
    let reply = expect_reply(h.target.handle(read_request(40, export, 1, &ranges)).await);
    assert_eq!(reply.status, Status::ETIMEDOUT);
    assert_eq!(h.device.commit_count(), 0);

    h.pool.return_buffer(held).unwrap();
    let reply = expect_reply(h.target.handle(read_request(41, export, 1, &ranges)).await);
    assert_eq!(reply.status, Status::from_count(64));
}

/// 读准备返回“短页之后仍有数据”的设备。
#[derive(Default)]
struct HoleyDevice {
    commits: AtomicUsize,
}

#[derive(Debug)]
struct Scratch;

impl PageBuffer for Scratch {
    fn capacity(&self) -> usize {
        PAGE_SIZE
    }
    fn read_at(&self, _offset: usize, dst: &mut [u8]) -> Result<()> {
        dst.fill(0);
        Ok(())
    }
    fn write_at(&self, _offset: usize, _src: &[u8]) -> Result<()> {
        Ok(())
    }
}

fn unsupported() -> CoreError {
    CoreError::new(codes::DEVICE_FAILURE, "not used by this test")
}

#[async_trait]
impl ObjectDevice for HoleyDevice {
    async fn prepare_read(
        &self,
        objects: &[IoObject],
        ranges: &[RemoteRange],
    ) -> Result<PreparedIo> {
        let rcs = [10, PAGE_SIZE as i32];
        let pages = ranges
            .iter()
            .zip(rcs)
            .map(|(range, rc)| {
                let page: SharedPage = Arc::new(Scratch);
                LocalPage {
                    offset: range.offset,
                    len: range.len as usize,
                    page,
                    rc,
                }
            })
            .collect();
        Ok(PreparedIo {
            kind: IoKind::Read,
            objects: objects.to_vec(),
            pages,
            buffers: Vec::new(),
            transferred: false,
        })
    }

    async fn prepare_write(&self, _: &[IoObject], _: &[RemoteRange]) -> Result<PreparedIo> {
        Err(unsupported())
    }

    async fn commit(&self, _io: &mut PreparedIo) -> Result<u64> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    async fn san_preprw(&self, _: IoKind, _: &[IoObject], _: &mut [RemoteRange]) -> Result<()> {
        Err(unsupported())
    }

    async fn getattr(&self, _: &mut ObjectAttrs) -> Result<()> {
        Err(unsupported())
    }

    async fn setattr(&self, _: &mut ObjectAttrs) -> Result<u64> {
        Err(unsupported())
    }

    async fn create(&self, _: &mut ObjectAttrs) -> Result<u64> {
        Err(unsupported())
    }

    async fn destroy(&self, _: &ObjectAttrs) -> Result<u64> {
        Err(unsupported())
    }

    async fn open(&self, _: &mut ObjectAttrs) -> Result<u64> {
        Err(unsupported())
    }

    async fn close(&self, _: &mut ObjectAttrs) -> Result<u64> {
        Err(unsupported())
    }

    async fn punch(&self, _: &mut ObjectAttrs, _: u64, _: u64) -> Result<u64> {
        Err(unsupported())
    }

    async fn statfs(&self) -> Result<StatFs> {
        Err(unsupported())
    }

    async fn syncfs(&self) -> Result<()> {
        Err(unsupported())
    }

    fn last_committed(&self) -> u64 {
        0
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn data_after_a_short_page_is_rejected_but_still_committed() {
    let device = Arc::new(HoleyDevice::default());
    let channel = LoopbackChannel::spawn();
    let target = Target::builder(device.clone(), channel.clone()).attach();
    let export = target.exports().connect("client-a");

    let ranges = [
        RemoteRange::new(0, PAGE_SIZE as u32, 0),
        RemoteRange::new(PAGE, PAGE_SIZE as u32, 0),
    ];
    let reply = expect_reply(target.handle(read_request(50, export, 1, &ranges)).await);

    assert_eq!(reply.status, Status::EFAULT);
    assert_eq!(device.commits.load(Ordering::SeqCst), 1);
    assert!(channel.client().take_received(50).is_none());
}
