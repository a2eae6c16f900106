use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ost_core::{PAGE_SIZE, PoolConfig};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferHandle, BufferRef, PageArray};
use crate::error::PoolError;
use crate::memory::{BundleAllocator, BundleMemory, HeapAllocator};

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// `BundlePool` 管理固定数量、定长的 bundle，按整块或页数组借出。
///
/// # 核心机制（How）
/// - `free`：`parking_lot::Mutex<FreeList>` + `Condvar`。租借方持锁进入等待循环，每次退避
///   都通过 `Condvar::wait_for` 释放锁，使归还与其他租借得以穿插；
/// - `issued`：`DashMap<BufferHandle, Issued>` 发放表，归还时以句柄定位 bundle，不依赖地址；
/// - `lifecycle`：初始化标志，仅在 `init`/`teardown` 时持有。
///
/// 三者是相互独立的临界区；`init`/`teardown` 按 `lifecycle → free` 的顺序嵌套获取，
/// 其他路径从不同时持有两把锁。
///
/// # 契约说明（What）
/// - 每个 bundle 恰好处于空闲链表或发放表之一；
/// - 租借总数超过 `total_length` 时立即失败，不进入等待；
/// - 阻塞的租借之间不保证 FIFO。
///
/// # 设计取舍（Trade-offs）
/// - 归还时使用 `notify_all`：等待者需要的数量各不相同，只唤醒一个可能唤醒了仍然不够的那个。
#[derive(Clone)]
pub struct BundlePool {
    inner: Arc<PoolInner>,
}

/// 池状态快照。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub total_length: usize,
    pub current_length: usize,
    pub issued: usize,
    pub buf_size: usize,
    pub pages_per_bundle: usize,
    pub timeouts: u64,
}

/// `teardown` 的诊断结果。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// 从空闲链表释放的 bundle 数。
    pub freed: usize,
    /// 仍处于借出状态、被强制回收的 bundle 数。
    pub forgotten: usize,
    pub forgotten_bytes: usize,
}

#[derive(Debug)]
struct Bundle {
    slot: u32,
    /// 所属的初始化轮次；拆除后重建的池不接收上一轮的 bundle。
    epoch: u64,
    memory: Arc<BundleMemory>,
}

impl Bundle {
    fn pages(&self) -> usize {
        self.memory.size() / PAGE_SIZE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IssueKind {
    Whole,
    Pages,
}

#[derive(Debug)]
struct Issued {
    bundle: Bundle,
    kind: IssueKind,
}

#[derive(Debug, Default)]
struct FreeList {
    bundles: VecDeque<Bundle>,
    current_length: usize,
    total_length: usize,
    /// `0` 表示池尚未初始化。
    buf_size: usize,
    pages_per_bundle: usize,
    epoch: u64,
}

#[derive(Debug, Default)]
struct Lifecycle {
    initialized: bool,
    epoch: u64,
}

struct PoolInner {
    id: u32,
    backoff_initial: Duration,
    backoff_cap: Duration,
    wait_budget: Duration,
    allocator: Arc<dyn BundleAllocator>,
    lifecycle: Mutex<Lifecycle>,
    free: Mutex<FreeList>,
    available: Condvar,
    issued: DashMap<BufferHandle, Issued>,
    /// 登记冲突的 bundle：仍视为借出，由 `teardown` 回收。
    orphaned: Mutex<Vec<Bundle>>,
    generation: AtomicU64,
    timeouts: AtomicU64,
}

impl Default for BundlePool {
    fn default() -> Self {
        Self::new(&PoolConfig::default())
    }
}

impl BundlePool {
    /// 创建未初始化的池，退避参数取自配置。
    pub fn new(config: &PoolConfig) -> Self {
        Self::with_allocator(config, Arc::new(HeapAllocator))
    }

    pub fn with_allocator(config: &PoolConfig, allocator: Arc<dyn BundleAllocator>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                backoff_initial: config.backoff_initial(),
                backoff_cap: config.backoff_cap(),
                wait_budget: config.wait_budget(),
                allocator,
                lifecycle: Mutex::new(Lifecycle::default()),
                free: Mutex::new(FreeList::default()),
                available: Condvar::new(),
                issued: DashMap::new(),
                orphaned: Mutex::new(Vec::new()),
                generation: AtomicU64::new(0),
                timeouts: AtomicU64::new(0),
            }),
        }
    }

    /// 按配置中的数量与大小创建并初始化。
    pub fn from_config(config: &PoolConfig) -> Result<Self, PoolError> {
        let pool = Self::new(config);
        pool.init(config.bundles, config.buffer_size)?;
        Ok(pool)
    }

    /// 分配 `n_bundles` 个 bundle，大小为 `requested_size` 向上取整到 2 的幂页数（至少一页）。
    ///
    /// # 契约说明（What）
    /// - **返回值**：实际的 `buf_size`；
    /// - **重复初始化**：返回 `AlreadyInitialized`，池状态不变；
    /// - **部分失败**：已分配的 bundle 保留，池进入已初始化状态，返回
    ///   `OutOfMemory { allocated, requested }`，调用方可据此决定继续运行或 `teardown`。
    pub fn init(&self, n_bundles: usize, requested_size: usize) -> Result<usize, PoolError> {
        let inner = &self.inner;
        let mut lifecycle = inner.lifecycle.lock();
        if lifecycle.initialized {
            let free = inner.free.lock();
            return Err(PoolError::AlreadyInitialized {
                bundles: free.total_length,
                buf_size: free.buf_size,
            });
        }

        let pages = requested_size.div_ceil(PAGE_SIZE).max(1).next_power_of_two();
        let buf_size = pages * PAGE_SIZE;
        lifecycle.epoch += 1;
        let epoch = lifecycle.epoch;

        let mut bundles = VecDeque::with_capacity(n_bundles);
        for slot in 0..n_bundles {
            match inner.allocator.allocate(buf_size) {
                Some(bytes) => bundles.push_back(Bundle {
                    slot: slot as u32,
                    epoch,
                    memory: Arc::new(BundleMemory::new(bytes)),
                }),
                None => break,
            }
        }
        let allocated = bundles.len();

        {
            let mut free = inner.free.lock();
            *free = FreeList {
                bundles,
                current_length: allocated,
                total_length: allocated,
                buf_size,
                pages_per_bundle: pages,
                epoch,
            };
        }
        lifecycle.initialized = true;

        if allocated < n_bundles {
            error!(
                pool = inner.id,
                allocated,
                requested = n_bundles,
                buf_size,
                "bundle allocation failed during pool init"
            );
            return Err(PoolError::OutOfMemory {
                allocated,
                requested: n_bundles,
            });
        }
        info!(pool = inner.id, bundles = allocated, buf_size, "bundle pool initialised");
        Ok(buf_size)
    }

    /// 借出 `count` 个整块缓冲。
    ///
    /// `expected_size` 大于 `buf_size` 返回 `SizeMismatch`；小于时记录告警并照常借出整块。
    /// 空闲数量不足时按指数退避等待，超过等待预算返回 `Timeout`。
    pub fn checkout_many(
        &self,
        count: usize,
        expected_size: usize,
    ) -> Result<Vec<BufferRef>, PoolError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let bundles = self.inner.take(count, expected_size)?;
        let mut out = Vec::with_capacity(count);
        let mut bundles = bundles.into_iter();
        while let Some(bundle) = bundles.next() {
            let memory = Arc::clone(&bundle.memory);
            match self.inner.register(bundle, IssueKind::Whole) {
                Ok(handle) => out.push(BufferRef::new(handle, memory)),
                Err(err) => {
                    // 调用方拿不到任何句柄：已登记的撤销登记，未登记的直接放回空闲链表。
                    for buffer in out {
                        if let Some((_, issued)) = self.inner.issued.remove(&buffer.handle()) {
                            self.inner.release(issued.bundle);
                        }
                    }
                    for rest in bundles.by_ref() {
                        self.inner.release(rest);
                    }
                    return Err(err);
                }
            }
        }
        Ok(out)
    }

    pub fn checkout_one(&self, expected_size: usize) -> Result<BufferRef, PoolError> {
        let mut buffers = self.checkout_many(1, expected_size)?;
        buffers.pop().ok_or(PoolError::NotInitialized)
    }

    /// 借出一个 bundle 并拆分为逐页可寻址的页数组。
    ///
    /// 页数策略与 `checkout_many` 的大小策略一致：多于 bundle 页数返回 `SizeMismatch`，
    /// 少于时告警并返回完整页数组。
    pub fn checkout_page_array(&self, page_count: usize) -> Result<PageArray, PoolError> {
        let expected = page_count.saturating_mul(PAGE_SIZE);
        let mut bundles = self.inner.take(1, expected)?;
        let bundle = bundles.pop().ok_or(PoolError::NotInitialized)?;
        let memory = Arc::clone(&bundle.memory);
        let handle = self.inner.register(bundle, IssueKind::Pages)?;
        Ok(PageArray::new(handle, memory))
    }

    /// 归还整块缓冲。句柄不在发放表中（重复归还、外来缓冲、池已拆除）返回 `NotFound`。
    pub fn return_buffer(&self, buffer: BufferRef) -> Result<(), PoolError> {
        let handle = buffer.handle();
        let (_, issued) = self
            .inner
            .issued
            .remove(&handle)
            .ok_or(PoolError::NotFound { handle })?;
        debug_assert_eq!(issued.kind, IssueKind::Whole);
        self.inner.release(issued.bundle);
        Ok(())
    }

    /// 归还页数组。页数与 bundle 不符时返回 `LengthMismatch`，bundle 保持借出状态。
    pub fn return_page_array(&self, pages: PageArray) -> Result<(), PoolError> {
        let handle = pages.handle();
        let actual = pages.len();
        match self
            .inner
            .issued
            .remove_if(&handle, |_, issued| issued.bundle.pages() == actual)
        {
            Some((_, issued)) => {
                self.inner.release(issued.bundle);
                Ok(())
            }
            None => match self.inner.issued.get(&handle) {
                Some(issued) => Err(PoolError::LengthMismatch {
                    expected: issued.bundle.pages(),
                    actual,
                }),
                None => Err(PoolError::NotFound { handle }),
            },
        }
    }

    /// 释放全部 bundle。仍处于借出状态的会被强制回收并记录告警；其引用随即失效。
    /// 未初始化的池直接返回空报告。拆除后可再次 `init`。
    pub fn teardown(&self) -> TeardownReport {
        let inner = &self.inner;
        let mut lifecycle = inner.lifecycle.lock();
        if !lifecycle.initialized {
            debug!(pool = inner.id, "teardown of uninitialised pool ignored");
            return TeardownReport::default();
        }

        let (freed, buf_size) = {
            let mut free = inner.free.lock();
            let freed = free.bundles.len();
            let buf_size = free.buf_size;
            *free = FreeList::default();
            (freed, buf_size)
        };

        let handles: Vec<BufferHandle> = inner.issued.iter().map(|entry| *entry.key()).collect();
        let mut forgotten = 0;
        for handle in handles {
            if let Some((_, issued)) = inner.issued.remove(&handle) {
                issued.bundle.memory.revoke();
                forgotten += 1;
            }
        }
        for bundle in inner.orphaned.lock().drain(..) {
            bundle.memory.revoke();
            forgotten += 1;
        }

        lifecycle.initialized = false;
        inner.available.notify_all();

        let report = TeardownReport {
            freed,
            forgotten,
            forgotten_bytes: forgotten * buf_size,
        };
        if forgotten > 0 {
            warn!(
                pool = inner.id,
                forgotten = report.forgotten,
                bytes = report.forgotten_bytes,
                "reclaimed buffers that were never returned"
            );
        }
        info!(pool = inner.id, freed, "bundle pool torn down");
        report
    }

    pub fn buf_size(&self) -> usize {
        self.inner.free.lock().buf_size
    }

    pub fn pages_per_bundle(&self) -> usize {
        self.inner.free.lock().pages_per_bundle
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lifecycle.lock().initialized
    }

    pub fn stats(&self) -> PoolStats {
        let (total_length, current_length, buf_size, pages_per_bundle) = {
            let free = self.inner.free.lock();
            (
                free.total_length,
                free.current_length,
                free.buf_size,
                free.pages_per_bundle,
            )
        };
        PoolStats {
            total_length,
            current_length,
            issued: self.inner.issued.len(),
            buf_size,
            pages_per_bundle,
            timeouts: self.inner.timeouts.load(Ordering::Relaxed),
        }
    }
}

impl PoolInner {
    /// 从空闲链表取出 `count` 个 bundle，必要时退避等待。
    fn take(&self, count: usize, expected_size: usize) -> Result<Vec<Bundle>, PoolError> {
        let mut free = self.free.lock();
        if free.buf_size == 0 {
            return Err(PoolError::NotInitialized);
        }
        if expected_size > free.buf_size {
            return Err(PoolError::SizeMismatch {
                requested: expected_size,
                buf_size: free.buf_size,
            });
        }
        if expected_size < free.buf_size {
            warn!(
                pool = self.id,
                requested = expected_size,
                buf_size = free.buf_size,
                "requested size below pool buffer size, handing out a full buffer"
            );
        }
        if count > free.total_length {
            return Err(PoolError::CountExceedsCapacity {
                count,
                total: free.total_length,
            });
        }

        self.wait_for(&mut free, count)?;

        let taken: Vec<Bundle> = free.bundles.drain(..count).collect();
        free.current_length -= count;
        Ok(taken)
    }

    /// 等待空闲数量达到 `count`。退避步长从初始值翻倍到上限，累计超过预算即超时。
    fn wait_for(&self, free: &mut MutexGuard<'_, FreeList>, count: usize) -> Result<(), PoolError> {
        let started = Instant::now();
        let mut step = self.backoff_initial;
        while free.current_length < count {
            if free.buf_size == 0 {
                return Err(PoolError::NotInitialized);
            }
            let waited = started.elapsed();
            if waited >= self.wait_budget {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                error!(
                    pool = self.id,
                    count,
                    available = free.current_length,
                    waited_ms = waited.as_millis() as u64,
                    "timed out waiting for pool buffers"
                );
                return Err(PoolError::Timeout {
                    count,
                    available: free.current_length,
                    waited,
                });
            }
            let remaining = self.wait_budget - waited;
            self.available.wait_for(free, step.min(remaining));
            step = (step * 2).min(self.backoff_cap);
        }
        Ok(())
    }

    fn register(&self, bundle: Bundle, kind: IssueKind) -> Result<BufferHandle, PoolError> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = BufferHandle {
            pool: self.id,
            slot: bundle.slot,
            generation,
        };
        match self.issued.entry(handle) {
            Entry::Occupied(_) => {
                error!(pool = self.id, %handle, "issued-buffer registry already holds handle");
                self.orphaned.lock().push(bundle);
                Err(PoolError::RegistrationFailed { handle })
            }
            Entry::Vacant(slot) => {
                bundle.memory.lease(generation);
                slot.insert(Issued { bundle, kind });
                Ok(handle)
            }
        }
    }

    fn release(&self, bundle: Bundle) {
        bundle.memory.revoke();
        {
            let mut free = self.free.lock();
            if free.epoch != bundle.epoch {
                // 归还与拆除交错时，上一轮的 bundle 直接丢弃。
                return;
            }
            free.bundles.push_back(bundle);
            free.current_length += 1;
            debug_assert!(free.current_length <= free.total_length);
        }
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use ost_core::PageBuffer;
    use tracing_test::traced_test;

    fn fast_config() -> PoolConfig {
        PoolConfig {
            backoff_initial_ms: 1,
            backoff_cap_ms: 8,
            wait_budget_ms: 40,
            ..PoolConfig::default()
        }
    }

    fn pool_of(n: usize, size: usize) -> BundlePool {
        let pool = BundlePool::new(&fast_config());
        pool.init(n, size).unwrap();
        pool
    }

    struct LimitedAllocator {
        remaining: AtomicUsize,
    }

    impl BundleAllocator for LimitedAllocator {
        fn allocate(&self, size: usize) -> Option<Box<[u8]>> {
            self.remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .ok()?;
            HeapAllocator.allocate(size)
        }
    }

    #[test]
    fn init_rounds_to_power_of_two_pages() {
        assert_eq!(BundlePool::default().init(1, 0).unwrap(), PAGE_SIZE);
        assert_eq!(BundlePool::default().init(1, 5000).unwrap(), 2 * PAGE_SIZE);
        assert_eq!(BundlePool::default().init(1, 3 * PAGE_SIZE).unwrap(), 4 * PAGE_SIZE);
        let pool = BundlePool::default();
        assert_eq!(pool.init(2, 1 << 20).unwrap(), 1 << 20);
        assert_eq!(pool.pages_per_bundle(), 256);
    }

    #[test]
    fn second_init_fails_without_changing_state() {
        let pool = pool_of(3, PAGE_SIZE);
        let before = pool.stats();
        assert_eq!(
            pool.init(10, 1 << 20),
            Err(PoolError::AlreadyInitialized {
                bundles: 3,
                buf_size: PAGE_SIZE
            })
        );
        assert_eq!(pool.stats(), before);
    }

    #[test]
    fn partial_allocation_keeps_what_was_allocated() {
        let allocator = Arc::new(LimitedAllocator {
            remaining: AtomicUsize::new(2),
        });
        let pool = BundlePool::with_allocator(&fast_config(), allocator);
        assert_eq!(
            pool.init(5, PAGE_SIZE),
            Err(PoolError::OutOfMemory {
                allocated: 2,
                requested: 5
            })
        );
        assert!(pool.is_initialized());
        assert_eq!(pool.stats().total_length, 2);
        assert_eq!(pool.checkout_many(2, PAGE_SIZE).unwrap().len(), 2);
    }

    #[test]
    fn checkout_and_return_conserve_bundles() {
        let pool = pool_of(4, PAGE_SIZE);
        let buffers = pool.checkout_many(3, PAGE_SIZE).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.current_length, 1);
        assert_eq!(stats.issued, 3);
        for buffer in buffers {
            pool.return_buffer(buffer).unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.current_length, 4);
        assert_eq!(stats.issued, 0);
    }

    #[test]
    fn double_and_foreign_returns_are_not_found() {
        let pool = pool_of(2, PAGE_SIZE);
        let other = pool_of(2, PAGE_SIZE);
        let buffer = pool.checkout_one(PAGE_SIZE).unwrap();
        let copy = buffer.clone();
        pool.return_buffer(buffer).unwrap();
        assert!(matches!(
            pool.return_buffer(copy),
            Err(PoolError::NotFound { .. })
        ));

        let foreign = other.checkout_one(PAGE_SIZE).unwrap();
        assert!(matches!(
            pool.return_buffer(foreign),
            Err(PoolError::NotFound { .. })
        ));
        assert_eq!(pool.stats().current_length, 2);
    }

    #[test]
    fn stale_references_cannot_touch_reissued_memory() {
        let pool = pool_of(1, PAGE_SIZE);
        let first = pool.checkout_one(PAGE_SIZE).unwrap();
        first.write_at(0, b"mine").unwrap();
        let stale = first.clone();
        pool.return_buffer(first).unwrap();

        let second = pool.checkout_one(PAGE_SIZE).unwrap();
        assert!(stale.write_at(0, b"oops").is_err());
        let mut out = [0u8; 4];
        second.read_at(0, &mut out).unwrap();
        assert_eq!(&out, b"mine");
    }

    #[test]
    #[traced_test]
    fn smaller_request_warns_and_larger_request_fails() {
        let pool = pool_of(2, 2 * PAGE_SIZE);
        let buffer = pool.checkout_one(100).unwrap();
        assert_eq!(buffer.len(), 2 * PAGE_SIZE);
        assert!(logs_contain("requested size below pool buffer size"));

        assert_eq!(
            pool.checkout_one(3 * PAGE_SIZE).unwrap_err(),
            PoolError::SizeMismatch {
                requested: 3 * PAGE_SIZE,
                buf_size: 2 * PAGE_SIZE
            }
        );
        assert!(matches!(
            pool.checkout_page_array(3),
            Err(PoolError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn oversized_count_fails_fast() {
        let pool = pool_of(2, PAGE_SIZE);
        let started = Instant::now();
        assert_eq!(
            pool.checkout_many(3, PAGE_SIZE).unwrap_err(),
            PoolError::CountExceedsCapacity { count: 3, total: 2 }
        );
        assert!(started.elapsed() < Duration::from_millis(40));
        assert!(pool.checkout_many(0, PAGE_SIZE).unwrap().is_empty());
    }

    #[test]
    #[traced_test]
    fn registration_conflict_rolls_back_the_whole_checkout() {
        let pool = pool_of(3, PAGE_SIZE);
        let next = pool.inner.generation.load(Ordering::Relaxed);
        let taken = BufferHandle {
            pool: pool.inner.id,
            slot: 1,
            generation: next + 2,
        };
        let squatter = Bundle {
            slot: 1,
            epoch: 0,
            memory: Arc::new(BundleMemory::new(vec![0u8; PAGE_SIZE].into_boxed_slice())),
        };
        pool.inner.issued.insert(
            taken,
            Issued {
                bundle: squatter,
                kind: IssueKind::Whole,
            },
        );

        assert_eq!(
            pool.checkout_many(3, PAGE_SIZE).unwrap_err(),
            PoolError::RegistrationFailed { handle: taken }
        );
        assert!(logs_contain("issued-buffer registry already holds handle"));
        let stats = pool.stats();
        assert_eq!(stats.issued, 1);
        assert_eq!(stats.current_length, 2);
        assert_eq!(pool.inner.orphaned.lock().len(), 1);

        pool.inner.issued.remove(&taken);
        let again = pool.checkout_many(2, PAGE_SIZE).unwrap();
        assert_eq!(again.len(), 2);
        for buffer in again {
            pool.return_buffer(buffer).unwrap();
        }
        assert_eq!(pool.teardown().forgotten, 1);
    }

    #[test]
    fn exhaustion_times_out_after_budget() {
        let pool = pool_of(1, PAGE_SIZE);
        let _held = pool.checkout_one(PAGE_SIZE).unwrap();
        let started = Instant::now();
        let err = pool.checkout_one(PAGE_SIZE).unwrap_err();
        assert!(matches!(err, PoolError::Timeout { count: 1, available: 0, .. }));
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(pool.stats().timeouts, 1);
    }

    #[test]
    fn page_array_length_is_checked_on_return() {
        let pool = pool_of(1, 4 * PAGE_SIZE);
        let mut pages = pool.checkout_page_array(2).unwrap();
        assert_eq!(pages.len(), 4);
        pages.get(3).unwrap().write_at(PAGE_SIZE - 2, b"zz").unwrap();

        let full = pages.clone();
        pages.pages_mut().pop();
        assert_eq!(
            pool.return_page_array(pages),
            Err(PoolError::LengthMismatch {
                expected: 4,
                actual: 3
            })
        );
        assert_eq!(pool.stats().issued, 1);
        pool.return_page_array(full).unwrap();
        assert_eq!(pool.stats().current_length, 1);
    }

    #[test]
    #[traced_test]
    fn teardown_reclaims_forgotten_buffers_and_allows_reinit() {
        let pool = pool_of(3, PAGE_SIZE);
        let leaked = pool.checkout_many(2, PAGE_SIZE).unwrap();
        let report = pool.teardown();
        assert_eq!(
            report,
            TeardownReport {
                freed: 1,
                forgotten: 2,
                forgotten_bytes: 2 * PAGE_SIZE
            }
        );
        assert!(logs_contain("reclaimed buffers that were never returned"));
        assert!(!pool.is_initialized());
        assert!(leaked[0].write_at(0, b"x").is_err());
        assert!(matches!(
            pool.return_buffer(leaked[1].clone()),
            Err(PoolError::NotFound { .. })
        ));

        assert_eq!(pool.teardown(), TeardownReport::default());
        assert_eq!(pool.checkout_one(PAGE_SIZE).unwrap_err(), PoolError::NotInitialized);

        pool.init(2, 2 * PAGE_SIZE).unwrap();
        assert_eq!(pool.stats().current_length, 2);
    }
}
