//! 远端区间到页对齐本地区间的拆分。
//!
//! 客户端按对象发送若干 `(offset, len, flags)` 区间，设备层与传输层都以页为单位工作，
//! 因此每个区间要按页边界切开：首段从区间起点到所在页末尾，中间段为整页，末段为剩余部分。
//!
//! 拆分后各对象的 `range_count` 被改写为该对象的页数，调用方随后按新的计数遍历本地区间，
//! 这一改写是拆分契约的一部分。

use std::borrow::Cow;

use ost_core::wire::{IoObject, RemoteRange};
use ost_core::{PAGE_SHIFT, PAGE_SIZE};

use crate::error::SplitError;

const PAGE_MASK: u64 = PAGE_SIZE as u64 - 1;

/// 区间覆盖的页数。`len` 为 0 时返回 0。
pub fn page_count(range: &RemoteRange) -> u64 {
    if range.len == 0 {
        return 0;
    }
    let first = range.offset >> PAGE_SHIFT;
    let last = (range.offset + range.len as u64 - 1) >> PAGE_SHIFT;
    last - first + 1
}

/// 校验并拆分区间。
///
/// - 每个对象内部的区间偏移必须严格递增，长度非零；
/// - `ranges` 的长度必须等于各对象 `range_count` 之和；
/// - 若每个区间恰好落在一页内，原样借用返回，不做任何分配，对象计数保持不变；
/// - 否则返回展开后的列表，每个页段继承其来源区间的 `flags`。
pub fn split<'a>(
    objects: &mut [IoObject],
    ranges: &'a [RemoteRange],
) -> Result<Cow<'a, [RemoteRange]>, SplitError> {
    let declared: u64 = objects.iter().map(|o| o.range_count as u64).sum();
    if declared != ranges.len() as u64 {
        return Err(SplitError::CountMismatch {
            declared,
            actual: ranges.len(),
        });
    }

    let mut per_object = Vec::with_capacity(objects.len());
    let mut total_pages = 0u64;
    let mut cursor = 0usize;
    for (object_idx, object) in objects.iter().enumerate() {
        let count = object.range_count as usize;
        let slice = &ranges[cursor..cursor + count];
        let mut pages = 0u64;
        for (range_idx, range) in slice.iter().enumerate() {
            validate(object_idx, range_idx, range, slice)?;
            pages += page_count(range);
        }
        let counted = u32::try_from(pages).map_err(|_| SplitError::TooManyPages {
            object: object_idx,
            pages,
        })?;
        per_object.push(counted);
        total_pages += pages;
        cursor += count;
    }

    if total_pages == ranges.len() as u64 {
        return Ok(Cow::Borrowed(ranges));
    }

    let mut local = Vec::with_capacity(total_pages as usize);
    for range in ranges {
        push_pages(&mut local, range);
    }
    for (object, pages) in objects.iter_mut().zip(per_object) {
        object.range_count = pages;
    }
    Ok(Cow::Owned(local))
}

fn validate(
    object: usize,
    range_idx: usize,
    range: &RemoteRange,
    slice: &[RemoteRange],
) -> Result<(), SplitError> {
    if range.len == 0 {
        return Err(SplitError::ZeroLength {
            object,
            range: range_idx,
            offset: range.offset,
        });
    }
    if range.offset.checked_add(range.len as u64).is_none() {
        return Err(SplitError::Overflow {
            object,
            range: range_idx,
            offset: range.offset,
            len: range.len,
        });
    }
    if range_idx > 0 {
        let previous = slice[range_idx - 1].offset;
        if range.offset <= previous {
            return Err(SplitError::NotIncreasing {
                object,
                range: range_idx,
                offset: range.offset,
                previous,
            });
        }
    }
    Ok(())
}

fn push_pages(out: &mut Vec<RemoteRange>, range: &RemoteRange) {
    let mut offset = range.offset;
    let mut remaining = range.len as u64;
    while remaining > 0 {
        let room = PAGE_SIZE as u64 - (offset & PAGE_MASK);
        let len = room.min(remaining);
        out.push(RemoteRange::new(offset, len as u32, range.flags));
        offset += len;
        remaining -= len;
    }
}
