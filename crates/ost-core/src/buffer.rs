//! 页缓冲契约。
//!
//! 缓冲池把 bundle 切分为页后，以 [`PageBuffer`] 的形式交给设备与传输层。
//! 两者只通过偏移读写访问内存，不持有裸指针，也不假设页之间物理连续。

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{CoreError, Result, codes};

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// 可按偏移读写的定长页缓冲。
///
/// # 契约说明（What）
/// - `capacity()` 在对象生命周期内不变；
/// - `read_at`/`write_at` 越界时返回 `ost.buffer.out_of_bounds`，不做部分写入；
/// - 实现必须是 `Send + Sync`，设备提交与传输投递可能在不同任务上并发访问同一页的不同区间。
pub trait PageBuffer: Send + Sync + fmt::Debug + 'static {
    fn capacity(&self) -> usize;

    fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<()>;

    fn write_at(&self, offset: usize, src: &[u8]) -> Result<()>;

    /// 复制出指定区间，便于写入回复或计算校验和。
    fn copy_out(&self, offset: usize, len: usize) -> Result<Bytes> {
        let mut out = vec![0u8; len];
        self.read_at(offset, &mut out)?;
        Ok(Bytes::from(out))
    }

    /// 以零填充指定区间。
    fn zero(&self, offset: usize, len: usize) -> Result<()> {
        self.write_at(offset, &vec![0u8; len])
    }
}

pub type SharedPage = Arc<dyn PageBuffer>;

/// 校验 `[offset, offset + len)` 落在容量之内。
pub fn check_bounds(capacity: usize, offset: usize, len: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(CoreError::new(
            codes::BUFFER_OUT_OF_BOUNDS,
            format!(
                "access [{}, +{}) exceeds page capacity {}",
                offset, len, capacity
            ),
        )),
    }
}
