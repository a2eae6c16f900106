use std::fmt;

use ost_core::buffer::check_bounds;
use ost_core::{CoreError, Result, codes};
use parking_lot::RwLock;

/// bundle 内存的分配来源。
///
/// 默认实现 [`HeapAllocator`] 使用可失败的预留，使初始化阶段的内存不足能够以
/// `OutOfMemory` 的形式暴露，而不是直接中止进程。
pub trait BundleAllocator: Send + Sync + 'static {
    /// 分配 `size` 字节的零初始化内存；失败返回 `None`。
    fn allocate(&self, size: usize) -> Option<Box<[u8]>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl BundleAllocator for HeapAllocator {
    fn allocate(&self, size: usize) -> Option<Box<[u8]>> {
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(size).ok()?;
        bytes.resize(size, 0);
        Some(bytes.into_boxed_slice())
    }
}

struct BundleState {
    bytes: Box<[u8]>,
    /// 当前租约代号；`0` 表示未借出。
    lease: u64,
}

/// 一个 bundle 的连续内存。
///
/// 访问必须携带租约代号，代号与当前租约不一致（已归还、已被回收或再次借出）时拒绝访问，
/// 防止过期引用写坏下一位租借者的数据。
pub(crate) struct BundleMemory {
    state: RwLock<BundleState>,
    size: usize,
}

impl BundleMemory {
    pub(crate) fn new(bytes: Box<[u8]>) -> Self {
        let size = bytes.len();
        Self {
            state: RwLock::new(BundleState { bytes, lease: 0 }),
            size,
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn lease(&self, generation: u64) {
        self.state.write().lease = generation;
    }

    pub(crate) fn revoke(&self) {
        self.state.write().lease = 0;
    }

    fn stale(generation: u64) -> CoreError {
        CoreError::new(
            codes::BUFFER_STALE,
            format!("buffer lease {} is no longer valid", generation),
        )
    }

    pub(crate) fn read(&self, generation: u64, offset: usize, dst: &mut [u8]) -> Result<()> {
        let state = self.state.read();
        if state.lease != generation {
            return Err(Self::stale(generation));
        }
        check_bounds(self.size, offset, dst.len())?;
        dst.copy_from_slice(&state.bytes[offset..offset + dst.len()]);
        Ok(())
    }

    pub(crate) fn write(&self, generation: u64, offset: usize, src: &[u8]) -> Result<()> {
        let mut state = self.state.write();
        if state.lease != generation {
            return Err(Self::stale(generation));
        }
        check_bounds(self.size, offset, src.len())?;
        state.bytes[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }
}

impl fmt::Debug for BundleMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleMemory")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
