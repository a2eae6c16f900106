//! 进程内对象设备。
//!
//! 对象数据保存在内存中的 `Vec<u8>`，批量读写的页从 [`BundlePool`] 借出，在提交时归还。
//! 每个修改操作分配递增的事务号，内存存储没有异步落盘，`last_committed` 随之立即前进。
//! 对象大小与写入区间都以设备容量为上限，越界返回 `EFBIG`。
//!
//! 测试可通过 `fail_*` 系列方法注入故障：下一次准备/提交失败、某页返回错误码、
//! statfs/syncfs 失败。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use ost_buffer::{BufferRef, BundlePool};
use ost_core::status::errno;
use ost_core::wire::{IoObject, ObjectAttrs, RemoteRange, StatFs, valid};
use ost_core::{CoreError, PAGE_SHIFT, PAGE_SIZE, PageBuffer, Result, SharedPage, codes};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::device::{IoKind, LocalPage, ObjectDevice, PreparedIo};

const DEFAULT_CAPACITY: u64 = 1 << 30;
const MAX_OBJECTS: u64 = 1 << 20;

#[derive(Debug, Default)]
struct StoredObject {
    attrs: ObjectAttrs,
    data: Vec<u8>,
    opens: u32,
}

impl StoredObject {
    fn snapshot(&self) -> ObjectAttrs {
        let size = self.data.len() as u64;
        ObjectAttrs {
            size,
            blocks: size.div_ceil(512),
            blksize: PAGE_SIZE as u32,
            valid: self.attrs.valid | valid::SIZE | valid::BLOCKS | valid::BLKSIZE,
            ..self.attrs.clone()
        }
    }
}

#[derive(Debug, Default)]
struct DeviceFaults {
    prepare: Option<i32>,
    commit: Option<i32>,
    statfs: Option<i32>,
    syncfs: Option<i32>,
    pages: HashMap<(u64, u64), i32>,
}

pub struct MemoryDevice {
    pool: BundlePool,
    objects: DashMap<u64, StoredObject>,
    next_id: AtomicU64,
    transno: AtomicU64,
    last_committed: AtomicU64,
    no_transno: AtomicBool,
    capacity: u64,
    faults: Mutex<DeviceFaults>,
    prepares: AtomicUsize,
    commits: AtomicUsize,
}

impl MemoryDevice {
    /// 以已初始化的缓冲池创建设备。
    pub fn new(pool: BundlePool) -> Self {
        Self::with_capacity(pool, DEFAULT_CAPACITY)
    }

    /// `capacity` 同时是 statfs 报告的容量与单个对象的大小上限。
    pub fn with_capacity(pool: BundlePool, capacity: u64) -> Self {
        Self {
            pool,
            objects: DashMap::new(),
            next_id: AtomicU64::new(1),
            transno: AtomicU64::new(0),
            last_committed: AtomicU64::new(0),
            no_transno: AtomicBool::new(false),
            capacity,
            faults: Mutex::new(DeviceFaults::default()),
            prepares: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
        }
    }

    /// SAN 地址空间中每个对象占据的区段长度：对象 `id` 的块地址从 `id * SAN_EXTENT` 开始。
    pub const SAN_EXTENT: u64 = 1 << 40;

    pub fn pool(&self) -> &BundlePool {
        &self.pool
    }

    /// 直接写入一个对象，覆盖已有内容。
    pub fn insert_object(&self, id: u64, data: impl Into<Vec<u8>>) {
        self.next_id.fetch_max(id + 1, Ordering::AcqRel);
        self.objects.insert(
            id,
            StoredObject {
                attrs: ObjectAttrs::for_object(id, 0),
                data: data.into(),
                opens: 0,
            },
        );
    }

    pub fn object_data(&self, id: u64) -> Option<Vec<u8>> {
        self.objects.get(&id).map(|obj| obj.data.clone())
    }

    pub fn contains(&self, id: u64) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn open_count(&self, id: u64) -> Option<u32> {
        self.objects.get(&id).map(|obj| obj.opens)
    }

    pub fn fail_next_prepare(&self, errno: i32) {
        self.faults.lock().prepare = Some(errno);
    }

    pub fn fail_next_commit(&self, errno: i32) {
        self.faults.lock().commit = Some(errno);
    }

    pub fn fail_next_statfs(&self, errno: i32) {
        self.faults.lock().statfs = Some(errno);
    }

    pub fn fail_next_syncfs(&self, errno: i32) {
        self.faults.lock().syncfs = Some(errno);
    }

    /// 让对象 `id` 中包含 `offset` 的那一页在之后每次准备时返回 `-errno`。
    pub fn fail_page(&self, id: u64, offset: u64, errno: i32) {
        self.faults
            .lock()
            .pages
            .insert((id, offset >> PAGE_SHIFT), errno);
    }

    pub fn set_no_transno(&self, value: bool) {
        self.no_transno.store(value, Ordering::Release);
    }

    pub fn prepare_count(&self) -> usize {
        self.prepares.load(Ordering::Acquire)
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::Acquire)
    }

    fn next_transno(&self) -> u64 {
        let transno = self.transno.fetch_add(1, Ordering::AcqRel) + 1;
        self.last_committed.fetch_max(transno, Ordering::AcqRel);
        transno
    }

    /// `[offset, offset + len)` 是否落在容量之内。
    fn fits(&self, offset: u64, len: u64) -> bool {
        offset
            .checked_add(len)
            .is_some_and(|end| end <= self.capacity)
    }

    fn page_fault(&self, id: u64, offset: u64) -> Option<i32> {
        self.faults
            .lock()
            .pages
            .get(&(id, offset >> PAGE_SHIFT))
            .copied()
    }

    /// 以一次原子的多 bundle 借出满足 `pages` 个页，避免分批借出时相互等待。
    async fn checkout(&self, pages: usize) -> Result<Vec<BufferRef>> {
        if pages == 0 {
            return Ok(Vec::new());
        }
        let per_bundle = self.pool.pages_per_bundle().max(1);
        let bundles = pages.div_ceil(per_bundle);
        let pool = self.pool.clone();
        let size = pool.buf_size();
        tokio::task::spawn_blocking(move || pool.checkout_many(bundles, size))
            .await
            .map_err(|err| {
                CoreError::new(
                    codes::DEVICE_FAILURE,
                    format!("pool checkout task failed: {}", err),
                )
            })?
            .map_err(CoreError::from)
    }

    fn release(&self, buffers: Vec<BufferRef>) {
        for buffer in buffers {
            let handle = buffer.handle();
            if let Err(err) = self.pool.return_buffer(buffer) {
                warn!(%handle, error = %err, "failed to return bulk buffer to pool");
            }
        }
    }

    async fn prepare(
        &self,
        kind: IoKind,
        objects: &[IoObject],
        ranges: &[RemoteRange],
    ) -> Result<PreparedIo> {
        self.prepares.fetch_add(1, Ordering::AcqRel);
        let injected = self.faults.lock().prepare.take();
        if let Some(errno) = injected {
            return Err(CoreError::device(errno, "injected prepare failure"));
        }
        let owners = owners(objects, ranges.len())?;
        for object in objects {
            if !self.objects.contains_key(&object.id) {
                return Err(missing(object.id));
            }
        }

        let buffers = self.checkout(ranges.len()).await?;
        match self.fill(kind, &owners, ranges, &buffers) {
            Ok(pages) => {
                debug!(?kind, pages = pages.len(), bundles = buffers.len(), "prepared bulk pages");
                Ok(PreparedIo {
                    kind,
                    objects: objects.to_vec(),
                    pages,
                    buffers,
                    transferred: false,
                })
            }
            Err(err) => {
                self.release(buffers);
                Err(err)
            }
        }
    }

    fn fill(
        &self,
        kind: IoKind,
        owners: &[u64],
        ranges: &[RemoteRange],
        buffers: &[BufferRef],
    ) -> Result<Vec<LocalPage>> {
        let per_bundle = self.pool.pages_per_bundle();
        let mut slots = buffers
            .iter()
            .flat_map(|buffer| (0..per_bundle).filter_map(move |idx| buffer.page(idx)));
        let mut pages = Vec::with_capacity(ranges.len());
        for (range, &owner) in ranges.iter().zip(owners) {
            let slot = slots.next().ok_or_else(|| {
                CoreError::new(codes::DEVICE_FAILURE, "pool handed out too few pages")
            })?;
            let page: SharedPage = Arc::new(slot);
            let mut local = LocalPage {
                offset: range.offset,
                len: range.len as usize,
                page,
                rc: 0,
            };
            if let Some(errno) = self.page_fault(owner, range.offset) {
                local.rc = -errno;
            } else if kind == IoKind::Read {
                local.rc = self.read_into(owner, &local)?;
            } else if !self.fits(local.offset, local.len as u64) {
                local.rc = -errno::EFBIG;
            } else {
                // bundle 复用时不清空，未被客户端覆盖的字节不能带出上一次的内容。
                local.page.zero(local.page_offset(), local.len)?;
            }
            pages.push(local);
        }
        Ok(pages)
    }

    fn read_into(&self, owner: u64, local: &LocalPage) -> Result<i32> {
        let object = self.objects.get(&owner).ok_or_else(|| missing(owner))?;
        let size = object.data.len() as u64;
        if local.offset >= size {
            return Ok(0);
        }
        let start = local.offset as usize;
        let end = (local.offset + local.len as u64).min(size) as usize;
        local
            .page
            .write_at(local.page_offset(), &object.data[start..end])?;
        Ok((end - start) as i32)
    }

    fn apply_writes(&self, io: &mut PreparedIo) -> Result<u64> {
        if let Some(errno) = self.faults.lock().commit.take() {
            return Err(CoreError::device(errno, "injected commit failure"));
        }
        let owners = owners(&io.objects, io.pages.len())?;
        let mut scratch = vec![0u8; PAGE_SIZE];
        for (local, owner) in io.pages.iter_mut().zip(owners) {
            if local.rc < 0 {
                continue;
            }
            if !self.fits(local.offset, local.len as u64) {
                local.rc = -errno::EFBIG;
                continue;
            }
            let Some(mut object) = self.objects.get_mut(&owner) else {
                local.rc = -errno::ENOENT;
                continue;
            };
            let chunk = &mut scratch[..local.len];
            local.page.read_at(local.page_offset(), chunk)?;
            let start = local.offset as usize;
            let end = start + local.len;
            if object.data.len() < end {
                object.data.resize(end, 0);
            }
            object.data[start..end].copy_from_slice(chunk);
        }
        Ok(self.next_transno())
    }
}

impl fmt::Debug for MemoryDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDevice")
            .field("objects", &self.objects.len())
            .field("transno", &self.transno.load(Ordering::Relaxed))
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// 按对象的区间计数展开每个本地区间所属的对象 id。
fn owners(objects: &[IoObject], count: usize) -> Result<Vec<u64>> {
    let mut owners = Vec::with_capacity(count);
    for object in objects {
        owners.extend(std::iter::repeat_n(object.id, object.range_count as usize));
    }
    if owners.len() != count {
        return Err(CoreError::new(
            codes::BRW_MALFORMED_RANGES,
            format!(
                "objects cover {} ranges but {} were prepared",
                owners.len(),
                count
            ),
        ));
    }
    Ok(owners)
}

fn missing(id: u64) -> CoreError {
    CoreError::device(errno::ENOENT, format!("object {} does not exist", id))
}

#[async_trait]
impl ObjectDevice for MemoryDevice {
    async fn prepare_read(
        &self,
        objects: &[IoObject],
        ranges: &[RemoteRange],
    ) -> Result<PreparedIo> {
        self.prepare(IoKind::Read, objects, ranges).await
    }

    async fn prepare_write(
        &self,
        objects: &[IoObject],
        ranges: &[RemoteRange],
    ) -> Result<PreparedIo> {
        self.prepare(IoKind::Write, objects, ranges).await
    }

    async fn commit(&self, io: &mut PreparedIo) -> Result<u64> {
        self.commits.fetch_add(1, Ordering::AcqRel);
        let result = match io.kind {
            IoKind::Read => Ok(0),
            IoKind::Write if io.transferred => self.apply_writes(io),
            IoKind::Write => {
                debug!(pages = io.pages.len(), "bulk transfer incomplete, discarding write");
                Ok(0)
            }
        };
        self.release(std::mem::take(&mut io.buffers));
        result
    }

    async fn san_preprw(
        &self,
        kind: IoKind,
        objects: &[IoObject],
        ranges: &mut [RemoteRange],
    ) -> Result<()> {
        self.prepares.fetch_add(1, Ordering::AcqRel);
        let injected = self.faults.lock().prepare.take();
        if let Some(errno) = injected {
            return Err(CoreError::device(errno, "injected prepare failure"));
        }
        let owners = owners(objects, ranges.len())?;
        for object in objects {
            if !self.objects.contains_key(&object.id) {
                return Err(missing(object.id));
            }
        }
        let limit = self.capacity.min(Self::SAN_EXTENT);
        for (range, owner) in ranges.iter_mut().zip(owners) {
            let end = range.offset.checked_add(u64::from(range.len));
            let base = owner.checked_mul(Self::SAN_EXTENT);
            match (end, base) {
                (Some(end), Some(base)) if end <= limit => range.offset += base,
                _ => {
                    return Err(CoreError::device(
                        errno::EFBIG,
                        format!(
                            "object {} range at {} does not fit the SAN extent",
                            owner, range.offset
                        ),
                    ));
                }
            }
        }
        debug!(?kind, ranges = ranges.len(), "translated SAN block ranges");
        Ok(())
    }

    async fn getattr(&self, attrs: &mut ObjectAttrs) -> Result<()> {
        let object = self.objects.get(&attrs.id).ok_or_else(|| missing(attrs.id))?;
        *attrs = object.snapshot();
        Ok(())
    }

    async fn setattr(&self, attrs: &mut ObjectAttrs) -> Result<u64> {
        let mut object = self
            .objects
            .get_mut(&attrs.id)
            .ok_or_else(|| missing(attrs.id))?;
        if attrs.has(valid::SIZE) {
            if attrs.size > self.capacity {
                return Err(CoreError::device(
                    errno::EFBIG,
                    format!(
                        "size {} exceeds device capacity {}",
                        attrs.size, self.capacity
                    ),
                ));
            }
            object.data.resize(attrs.size as usize, 0);
        }
        let stored = &mut object.attrs;
        if attrs.has(valid::MODE) {
            stored.mode = attrs.mode;
        }
        if attrs.has(valid::UID) {
            stored.uid = attrs.uid;
        }
        if attrs.has(valid::GID) {
            stored.gid = attrs.gid;
        }
        if attrs.has(valid::FLAGS) {
            stored.flags = attrs.flags;
        }
        if attrs.has(valid::ATIME) {
            stored.atime = attrs.atime;
        }
        if attrs.has(valid::MTIME) {
            stored.mtime = attrs.mtime;
        }
        if attrs.has(valid::CTIME) {
            stored.ctime = attrs.ctime;
        }
        stored.valid |= attrs.valid & !(valid::SIZE | valid::BLOCKS | valid::CKSUM);
        *attrs = object.snapshot();
        drop(object);
        Ok(self.next_transno())
    }

    async fn create(&self, attrs: &mut ObjectAttrs) -> Result<u64> {
        if attrs.id == 0 {
            attrs.id = self.next_id.fetch_add(1, Ordering::AcqRel);
        }
        let id = attrs.id;
        let mut stored = attrs.clone();
        stored.valid |= valid::ID | valid::GROUP;
        stored.valid &= !(valid::SIZE | valid::BLOCKS | valid::CKSUM);
        match self.objects.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(CoreError::device(
                    errno::EEXIST,
                    format!("object {} already exists", id),
                ));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let object = slot.insert(StoredObject {
                    attrs: stored,
                    data: Vec::new(),
                    opens: 0,
                });
                *attrs = object.snapshot();
            }
        }
        self.next_id.fetch_max(id + 1, Ordering::AcqRel);
        debug!(object = id, "object created");
        Ok(self.next_transno())
    }

    async fn destroy(&self, attrs: &ObjectAttrs) -> Result<u64> {
        self.objects
            .remove(&attrs.id)
            .ok_or_else(|| missing(attrs.id))?;
        debug!(object = attrs.id, "object destroyed");
        Ok(self.next_transno())
    }

    async fn open(&self, attrs: &mut ObjectAttrs) -> Result<u64> {
        let mut object = self
            .objects
            .get_mut(&attrs.id)
            .ok_or_else(|| missing(attrs.id))?;
        object.opens += 1;
        *attrs = object.snapshot();
        Ok(0)
    }

    async fn close(&self, attrs: &mut ObjectAttrs) -> Result<u64> {
        let mut object = self
            .objects
            .get_mut(&attrs.id)
            .ok_or_else(|| missing(attrs.id))?;
        object.opens = object.opens.saturating_sub(1);
        *attrs = object.snapshot();
        Ok(0)
    }

    async fn punch(&self, attrs: &mut ObjectAttrs, start: u64, end: u64) -> Result<u64> {
        if end < start {
            return Err(CoreError::device(
                errno::EINVAL,
                format!("punch end {} precedes start {}", end, start),
            ));
        }
        let mut object = self
            .objects
            .get_mut(&attrs.id)
            .ok_or_else(|| missing(attrs.id))?;
        let len = object.data.len() as u64;
        if end == u64::MAX || end >= len {
            object.data.truncate(start.min(len) as usize);
        } else if start < len {
            object.data[start as usize..end as usize].fill(0);
        }
        *attrs = object.snapshot();
        drop(object);
        Ok(self.next_transno())
    }

    async fn statfs(&self) -> Result<StatFs> {
        if let Some(errno) = self.faults.lock().statfs.take() {
            return Err(CoreError::device(errno, "injected statfs failure"));
        }
        let used: u64 = self
            .objects
            .iter()
            .map(|entry| (entry.data.len() as u64).div_ceil(PAGE_SIZE as u64))
            .sum();
        let blocks = self.capacity / PAGE_SIZE as u64;
        let bfree = blocks.saturating_sub(used);
        let files = self.objects.len() as u64;
        Ok(StatFs {
            blocks,
            bfree,
            bavail: bfree,
            files: MAX_OBJECTS,
            ffree: MAX_OBJECTS.saturating_sub(files),
            bsize: PAGE_SIZE as u32,
            namelen: 255,
        })
    }

    async fn syncfs(&self) -> Result<()> {
        if let Some(errno) = self.faults.lock().syncfs.take() {
            return Err(CoreError::device(errno, "injected syncfs failure"));
        }
        let latest = self.transno.load(Ordering::Acquire);
        self.last_committed.fetch_max(latest, Ordering::AcqRel);
        Ok(())
    }

    fn last_committed(&self) -> u64 {
        self.last_committed.load(Ordering::Acquire)
    }

    fn no_transno(&self) -> bool {
        self.no_transno.load(Ordering::Acquire)
    }
}
