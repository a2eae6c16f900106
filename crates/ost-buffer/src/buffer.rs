use std::fmt;
use std::sync::Arc;

use ost_core::buffer::check_bounds;
use ost_core::{PAGE_SIZE, PageBuffer, Result};

use crate::memory::BundleMemory;

/// 已借出缓冲的稳定句柄。
///
/// 发放表以句柄为键：`pool` 区分不同池实例，`slot` 定位 bundle，`generation`
/// 每次借出单调递增，因此同一槽位的前后两次借出不会相互混淆。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    pub pool: u32,
    pub slot: u32,
    pub generation: u64,
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.pool, self.slot, self.generation)
    }
}

/// 整块借出的 bundle。
///
/// 克隆只复制引用，不复制内存；归还后所有克隆都会失效。
#[derive(Clone, Debug)]
pub struct BufferRef {
    handle: BufferHandle,
    memory: Arc<BundleMemory>,
}

impl BufferRef {
    pub(crate) fn new(handle: BufferHandle, memory: Arc<BundleMemory>) -> Self {
        Self { handle, memory }
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn len(&self) -> usize {
        self.memory.size()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.size() == 0
    }

    /// 把第 `index` 页作为独立的页视图。
    pub fn page(&self, index: usize) -> Option<PageRef> {
        (index < self.memory.size() / PAGE_SIZE).then(|| PageRef {
            handle: self.handle,
            memory: Arc::clone(&self.memory),
            index,
        })
    }
}

impl PageBuffer for BufferRef {
    fn capacity(&self) -> usize {
        self.memory.size()
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.memory.read(self.handle.generation, offset, dst)
    }

    fn write_at(&self, offset: usize, src: &[u8]) -> Result<()> {
        self.memory.write(self.handle.generation, offset, src)
    }
}

/// bundle 中的一页。
#[derive(Clone, Debug)]
pub struct PageRef {
    handle: BufferHandle,
    memory: Arc<BundleMemory>,
    index: usize,
}

impl PageRef {
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn index(&self) -> usize {
        self.index
    }

    fn base(&self) -> usize {
        self.index * PAGE_SIZE
    }
}

impl PageBuffer for PageRef {
    fn capacity(&self) -> usize {
        PAGE_SIZE
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        check_bounds(PAGE_SIZE, offset, dst.len())?;
        self.memory
            .read(self.handle.generation, self.base() + offset, dst)
    }

    fn write_at(&self, offset: usize, src: &[u8]) -> Result<()> {
        check_bounds(PAGE_SIZE, offset, src.len())?;
        self.memory
            .write(self.handle.generation, self.base() + offset, src)
    }
}

/// 以页数组形式借出的 bundle。归还时页数必须与 bundle 页数一致。
#[derive(Clone, Debug)]
pub struct PageArray {
    handle: BufferHandle,
    pages: Vec<PageRef>,
}

impl PageArray {
    pub(crate) fn new(handle: BufferHandle, memory: Arc<BundleMemory>) -> Self {
        let pages = (0..memory.size() / PAGE_SIZE)
            .map(|index| PageRef {
                handle,
                memory: Arc::clone(&memory),
                index,
            })
            .collect();
        Self { handle, pages }
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn pages(&self) -> &[PageRef] {
        &self.pages
    }

    /// 可变访问页列表。调用方若增删页，归还时会因页数不符而被拒绝。
    pub fn pages_mut(&mut self) -> &mut Vec<PageRef> {
        &mut self.pages
    }

    pub fn get(&self, index: usize) -> Option<&PageRef> {
        self.pages.get(index)
    }
}
