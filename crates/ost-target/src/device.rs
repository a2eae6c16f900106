//! 存储设备能力接口。
//!
//! 处理器不关心对象如何落盘，只通过 [`ObjectDevice`] 调用准备、提交与元数据操作。
//! 设备在目标挂载时解析一次，以 `Arc<dyn ObjectDevice>` 的形式常驻，之后每次分发前
//! 由 [`DeviceLifecycle`] 检查设备是否处于可服务状态。

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use ost_buffer::BufferRef;
use ost_core::wire::{IoObject, ObjectAttrs, RemoteRange, StatFs};
use ost_core::{CoreError, PAGE_SIZE, Result, SharedPage, codes};

/// 批量操作方向。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoKind {
    Read,
    Write,
}

/// 一页本地区间：对象内偏移、长度（不超过一页）、承载数据的页与结果码。
///
/// 读方向的 `rc` 为该页实际可读字节数（可小于 `len`，0 表示文件末尾之后），负值为 errno；
/// 写方向的 `rc` 为 0 或负 errno。
#[derive(Clone)]
pub struct LocalPage {
    pub offset: u64,
    pub len: usize,
    pub page: SharedPage,
    pub rc: i32,
}

impl LocalPage {
    /// 数据在页内的起始位置。
    pub fn page_offset(&self) -> usize {
        (self.offset & (PAGE_SIZE as u64 - 1)) as usize
    }
}

impl fmt::Debug for LocalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalPage")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("rc", &self.rc)
            .finish_non_exhaustive()
    }
}

/// `prepare_read`/`prepare_write` 的产物，交给 [`ObjectDevice::commit`] 收尾。
///
/// `buffers` 是页所在的池化 bundle，由设备在提交时归还。
#[derive(Debug)]
pub struct PreparedIo {
    pub kind: IoKind,
    pub objects: Vec<IoObject>,
    pub pages: Vec<LocalPage>,
    pub buffers: Vec<BufferRef>,
    /// 批量传输是否完整结束；为假时写提交只释放资源，不落盘。
    pub transferred: bool,
}

/// 对象存储设备。
///
/// # 契约说明（What）
/// - `prepare_*` 接收已按页拆分的区间，返回与区间一一对应的本地页；
/// - 每次成功的 `prepare_*` 之后恰好调用一次 `commit`，无论中间的传输是否成功，
///   设备借此释放缓冲；写方向只有 [`PreparedIo::transferred`] 为真时才落盘；
/// - `prepare_write` 返回的页区间已清零；
/// - `san_preprw` 就地把区间偏移翻译成设备地址，不经过缓冲池；
/// - 会修改状态的操作返回本次事务号，`0` 表示未分配；
/// - `no_transno` 为真时处理器不在回复中携带 `last_committed`。
#[async_trait]
pub trait ObjectDevice: Send + Sync + 'static {
    async fn prepare_read(&self, objects: &[IoObject], ranges: &[RemoteRange])
    -> Result<PreparedIo>;

    async fn prepare_write(
        &self,
        objects: &[IoObject],
        ranges: &[RemoteRange],
    ) -> Result<PreparedIo>;

    async fn commit(&self, io: &mut PreparedIo) -> Result<u64>;

    /// SAN 直连读写的预处理：校验对象并把 `ranges` 的偏移改写为设备块地址。
    async fn san_preprw(
        &self,
        kind: IoKind,
        objects: &[IoObject],
        ranges: &mut [RemoteRange],
    ) -> Result<()>;

    async fn getattr(&self, attrs: &mut ObjectAttrs) -> Result<()>;

    async fn setattr(&self, attrs: &mut ObjectAttrs) -> Result<u64>;

    async fn create(&self, attrs: &mut ObjectAttrs) -> Result<u64>;

    async fn destroy(&self, attrs: &ObjectAttrs) -> Result<u64>;

    async fn open(&self, attrs: &mut ObjectAttrs) -> Result<u64>;

    async fn close(&self, attrs: &mut ObjectAttrs) -> Result<u64>;

    /// 释放 `[start, end)` 区间；`end == u64::MAX` 表示截断到 `start`。
    async fn punch(&self, attrs: &mut ObjectAttrs, start: u64, end: u64) -> Result<u64>;

    async fn statfs(&self) -> Result<StatFs>;

    async fn syncfs(&self) -> Result<()>;

    fn last_committed(&self) -> u64;

    fn no_transno(&self) -> bool {
        false
    }
}

/// 设备生命周期阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceState {
    SettingUp = 0,
    Active = 1,
    Stopping = 2,
}

/// 设备生命周期守卫。
///
/// 新建时处于 `SettingUp`，目标挂载完成后置为 `Active`；开始停机后进入 `Stopping`，
/// 此后不再接受新请求。只有 `Active` 状态下 [`DeviceLifecycle::ensure_active`] 才会放行。
#[derive(Debug)]
pub struct DeviceLifecycle {
    state: AtomicU8,
}

impl Default for DeviceLifecycle {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(DeviceState::SettingUp as u8),
        }
    }
}

impl DeviceLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DeviceState {
        match self.state.load(Ordering::Acquire) {
            1 => DeviceState::Active,
            2 => DeviceState::Stopping,
            _ => DeviceState::SettingUp,
        }
    }

    /// 从 `SettingUp` 进入 `Active`；已在停机的设备不会被重新激活。
    pub fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                DeviceState::SettingUp as u8,
                DeviceState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn begin_stopping(&self) {
        self.state
            .store(DeviceState::Stopping as u8, Ordering::Release);
    }

    pub fn ensure_active(&self) -> Result<()> {
        match self.state() {
            DeviceState::Active => Ok(()),
            other => Err(CoreError::new(
                codes::DEVICE_INACTIVE,
                format!("device is {:?}", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ost_core::Status;

    #[test]
    fn guard_only_admits_active_devices() {
        let guard = DeviceLifecycle::new();
        assert_eq!(guard.ensure_active().unwrap_err().status(), Status::ENODEV);
        assert!(guard.activate());
        assert!(!guard.activate());
        assert!(guard.ensure_active().is_ok());
        guard.begin_stopping();
        assert!(!guard.activate());
        assert_eq!(guard.state(), DeviceState::Stopping);
        assert!(guard.ensure_active().is_err());
    }
}
