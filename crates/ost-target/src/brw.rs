//! 批量读写流水线。
//!
//! 两个方向共用同一骨架：
//!
//! ```text
//! 解码 body / 对象描述符 / 区间 → 拆分 → prepare → 绑定页 → 传输 → 等待 → commit → 回复
//! ```
//!
//! `prepare` 成功之后无论传输成败都必须 `commit`，设备借此释放缓冲；传输未完成的写只释放、
//! 不落盘。传输失败（超时、对端失败、通道关闭）属于通信故障，错误向上传播后由处理器驱逐导出，
//! 不发送回复。

use std::sync::Arc;

use bytes::Bytes;
use ost_core::wire::{
    ByteOrder, IoObject, ObjectAttrs, RemoteRange, ReplyMessage, RequestMessage, WireReader,
    WireWriter, bulk_buffers, encode_array, encode_one,
};
use ost_core::{BulkConfig, CoreError, PageBuffer, Result, Status, codes};
use ost_transport::{BulkChannel, BulkDescriptor, BulkSegment, Direction};
use tracing::{debug, error};

use crate::device::{IoKind, LocalPage, ObjectDevice};
use crate::error::{self, short_read_violation};
use crate::handler::Handled;
use crate::splitter::{page_count, split};

/// 流水线运行所需的协作者。
pub(crate) struct BulkContext<'a> {
    pub device: &'a dyn ObjectDevice,
    pub channel: &'a Arc<dyn BulkChannel>,
    pub config: &'a BulkConfig,
}

/// 批量读：把对象数据推送给客户端，成功时回复状态为传输的字节数。
pub(crate) async fn brw_read(ctx: &BulkContext<'_>, request: &RequestMessage) -> Result<Handled> {
    let mut body: ObjectAttrs = request.body(bulk_buffers::BODY, "ost body")?;
    let mut objects: Vec<IoObject> = request.array(bulk_buffers::OBJECTS, "io object")?;
    if objects.len() != 1 {
        return Err(error::malformed(format!(
            "read carries {} object descriptors, expected 1",
            objects.len()
        )));
    }
    let ranges: Vec<RemoteRange> = request.array(bulk_buffers::RANGES, "remote range")?;
    let local = split(&mut objects, &ranges)?;

    let mut prepared = ctx.device.prepare_read(&objects, &local).await?;
    let transfer = push_pages(ctx, request.xid(), &prepared.pages).await;
    prepared.transferred = transfer.is_ok();
    let committed = ctx.device.commit(&mut prepared).await;
    let (nob, checksum) = transfer?;
    committed?;

    if let Some(cksum) = checksum {
        body.set_checksum(cksum);
    }
    debug!(xid = request.xid(), nob, pages = local.len(), "bulk read complete");
    let mut reply =
        ReplyMessage::for_request(request).with_buffer(encode_one(&body, ByteOrder::Little));
    reply.status = Status::from_count(nob);
    Ok(Handled::new(reply))
}

/// 批量写：从客户端拉取数据写入对象，回复携带每个远端区间的结果码。
pub(crate) async fn brw_write(ctx: &BulkContext<'_>, request: &RequestMessage) -> Result<Handled> {
    let body: ObjectAttrs = request.body(bulk_buffers::BODY, "ost body")?;
    let mut objects: Vec<IoObject> = request.array(bulk_buffers::OBJECTS, "io object")?;
    if objects.is_empty() {
        return Err(error::malformed("write carries no object descriptors"));
    }
    if let Some(idx) = objects.iter().position(|o| o.range_count == 0) {
        return Err(error::malformed(format!("object {} declares no ranges", idx)));
    }
    let ranges: Vec<RemoteRange> = request.array(bulk_buffers::RANGES, "remote range")?;
    let local = split(&mut objects, &ranges)?;

    let mut prepared = ctx.device.prepare_write(&objects, &local).await?;
    let transfer = pull_pages(ctx, request.xid(), &body, &prepared.pages).await;
    prepared.transferred = transfer.is_ok();
    let committed = ctx.device.commit(&mut prepared).await;
    transfer?;
    let transno = committed?;

    let rcs = fold_range_codes(&ranges, &prepared.pages);
    debug!(xid = request.xid(), transno, ranges = rcs.len(), "bulk write complete");
    let reply = ReplyMessage::for_request(request)
        .with_buffer(encode_one(&body, ByteOrder::Little))
        .with_buffer(encode_range_codes(&rcs));
    Ok(Handled { reply, transno })
}

/// SAN 直连读写：设备把区间就地翻译成块地址，数据不经过批量通道，也不借用缓冲池。
///
/// 描述符缺失或数量不符属于畸形请求；零长度或对象内偏移不递增回复 `EINVAL`。
/// 设备拒绝时回复只携带 body 与设备给出的状态码。
pub(crate) async fn san_brw(
    device: &dyn ObjectDevice,
    request: &RequestMessage,
    kind: IoKind,
) -> Result<Handled> {
    let body: ObjectAttrs = request.body(bulk_buffers::BODY, "ost body")?;
    let objects: Vec<IoObject> = request.array(bulk_buffers::OBJECTS, "io object")?;
    if objects.is_empty() {
        return Err(error::malformed("SAN request carries no object descriptors"));
    }
    let mut ranges: Vec<RemoteRange> = request.array(bulk_buffers::RANGES, "remote range")?;
    let declared: u64 = objects.iter().map(|o| u64::from(o.range_count)).sum();
    if declared != ranges.len() as u64 {
        return Err(error::malformed(format!(
            "objects declare {} ranges but {} were sent",
            declared,
            ranges.len()
        )));
    }

    let mut cursor = 0usize;
    for object in &objects {
        let slice = &ranges[cursor..cursor + object.range_count as usize];
        for (idx, range) in slice.iter().enumerate() {
            if range.len == 0 {
                return Err(error::invalid_argument(format!(
                    "zero length SAN range: object {} buf {}",
                    object.id, idx
                )));
            }
            if idx > 0 && range.offset <= slice[idx - 1].offset {
                return Err(error::invalid_argument(format!(
                    "unordered SAN range: object {} buf {} offset {} <= {}",
                    object.id,
                    idx,
                    range.offset,
                    slice[idx - 1].offset
                )));
            }
        }
        cursor += slice.len();
    }

    let mut reply =
        ReplyMessage::for_request(request).with_buffer(encode_one(&body, ByteOrder::Little));
    match device.san_preprw(kind, &objects, &mut ranges).await {
        Ok(()) => {
            debug!(xid = request.xid(), ?kind, ranges = ranges.len(), "SAN ranges translated");
            reply = reply.with_buffer(encode_array(&ranges, ByteOrder::Little));
        }
        Err(err) => {
            debug!(xid = request.xid(), ?kind, error = %err, "SAN preprocessing failed");
            reply.status = err.status();
        }
    }
    Ok(Handled::new(reply))
}

async fn push_pages(
    ctx: &BulkContext<'_>,
    xid: u64,
    pages: &[LocalPage],
) -> Result<(usize, Option<u32>)> {
    let desc = BulkDescriptor::prepare(xid, Direction::PutSource, Arc::clone(ctx.channel));
    let mut nob = 0usize;
    let mut short = false;
    for (idx, page) in pages.iter().enumerate() {
        if page.rc < 0 {
            return Err(CoreError::device(
                -page.rc,
                format!("read page {} failed with {}", idx, page.rc),
            ));
        }
        // 短页之后的页必须全部为空。
        if short && page.rc != 0 {
            error!(xid, page = idx, rc = page.rc, "data after short read");
            return Err(short_read_violation(idx, page.rc));
        }
        if page.rc > 0 {
            desc.attach_page(page.page.clone(), page.page_offset(), page.rc as usize)?;
            nob += page.rc as usize;
        }
        if (page.rc as usize) < page.len {
            short = true;
        }
    }

    desc.submit_put().await?;
    wait(ctx, &desc).await?;
    let checksum = if ctx.config.checksum {
        Some(bulk_checksum(&desc.segments())?)
    } else {
        None
    };
    Ok((nob, checksum))
}

async fn pull_pages(
    ctx: &BulkContext<'_>,
    xid: u64,
    body: &ObjectAttrs,
    pages: &[LocalPage],
) -> Result<()> {
    let desc = BulkDescriptor::prepare(xid, Direction::GetSink, Arc::clone(ctx.channel));
    for page in pages {
        desc.attach_page(page.page.clone(), page.page_offset(), page.len)?;
    }
    desc.submit_get().await?;
    wait(ctx, &desc).await?;

    // 客户端附带校验和时总是核对，不一致只记录。
    if let Some(client) = body.checksum() {
        let server = bulk_checksum(&desc.segments())?;
        if client != server {
            let err = CoreError::new(
                codes::BRW_CHECKSUM_MISMATCH,
                format!("client {:#010x}, server {:#010x}", client, server),
            );
            error!(xid, code = err.code(), error = %err, "bad bulk checksum");
        }
    }
    Ok(())
}

/// 等待传输结束；未完成的传输先放弃再返回错误。
async fn wait(ctx: &BulkContext<'_>, desc: &BulkDescriptor) -> Result<usize> {
    desc.await_completion(ctx.config.timeout()).await;
    match desc.outcome() {
        Ok(moved) => Ok(moved),
        Err(err) => {
            desc.abort();
            error!(
                xid = desc.xid(),
                direction = ?desc.direction(),
                code = err.code(),
                "bulk transfer did not complete"
            );
            Err(err)
        }
    }
}

/// 按页顺序对传输的字节计算 CRC-32。
pub fn bulk_checksum(segments: &[BulkSegment]) -> Result<u32> {
    let mut hasher = crc32fast::Hasher::new();
    for segment in segments {
        let data = segment.page.copy_out(segment.offset, segment.len)?;
        hasher.update(&data);
    }
    Ok(hasher.finalize())
}

/// 把页结果码折叠回远端区间：组成区间的页中出现负值时取第一个负值，否则为 0。
pub(crate) fn fold_range_codes(ranges: &[RemoteRange], pages: &[LocalPage]) -> Vec<i32> {
    let mut rcs = Vec::with_capacity(ranges.len());
    let mut cursor = 0usize;
    for range in ranges {
        let span = page_count(range) as usize;
        let end = (cursor + span).min(pages.len());
        let rc = pages[cursor..end]
            .iter()
            .map(|p| p.rc)
            .find(|rc| *rc < 0)
            .unwrap_or(0);
        rcs.push(rc);
        cursor = end;
    }
    debug_assert_eq!(cursor, pages.len());
    rcs
}

pub fn encode_range_codes(rcs: &[i32]) -> Bytes {
    let mut writer = WireWriter::with_capacity(ByteOrder::Little, rcs.len() * 4);
    for rc in rcs {
        writer.put_i32(*rc);
    }
    writer.freeze()
}

/// 解码写回复中的区间结果码数组。
pub fn decode_range_codes(buf: &Bytes) -> Result<Vec<i32>> {
    if buf.len() % 4 != 0 {
        return Err(error::malformed(format!(
            "range code buffer of {} bytes is not a multiple of 4",
            buf.len()
        )));
    }
    let mut reader = WireReader::new(buf.clone(), ByteOrder::Little);
    (0..buf.len() / 4)
        .map(|_| reader.i32("range rc"))
        .collect()
}
