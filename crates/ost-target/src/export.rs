//! 导出（已连接客户端）登记表。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ost_core::wire::ExportHandle;
use tracing::{info, warn};

/// 一个已连接客户端在服务端的状态。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportInfo {
    pub handle: ExportHandle,
    pub client_uuid: Arc<str>,
}

/// 导出登记表。
///
/// # 契约说明（What）
/// - `connect`：同一客户端 UUID 重连时返回原有句柄；
/// - `disconnect`：正常断开，返回句柄是否存在；
/// - `evict`：通信故障后强制断开，语义上与 `disconnect` 相同，但需要留下记录供排障；
/// - 句柄从不复用，[`ExportHandle::NONE`] 永远查不到。
pub trait ExportRegistry: Send + Sync + 'static {
    fn connect(&self, client_uuid: &str) -> ExportHandle;

    fn disconnect(&self, handle: ExportHandle) -> bool;

    fn lookup(&self, handle: ExportHandle) -> Option<ExportInfo>;

    fn evict(&self, handle: ExportHandle) -> bool;
}

/// 基于 `DashMap` 的内存登记表。
#[derive(Debug)]
pub struct InMemoryExports {
    by_handle: DashMap<u64, ExportInfo>,
    by_uuid: DashMap<Arc<str>, ExportHandle>,
    evicted: DashMap<u64, Arc<str>>,
    next: AtomicU64,
}

impl Default for InMemoryExports {
    fn default() -> Self {
        Self {
            by_handle: DashMap::new(),
            by_uuid: DashMap::new(),
            evicted: DashMap::new(),
            next: AtomicU64::new(1),
        }
    }
}

impl InMemoryExports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    pub fn was_evicted(&self, handle: ExportHandle) -> bool {
        self.evicted.contains_key(&handle.0)
    }

    fn remove(&self, handle: ExportHandle) -> Option<ExportInfo> {
        let (_, info) = self.by_handle.remove(&handle.0)?;
        self.by_uuid
            .remove_if(&info.client_uuid, |_, current| *current == handle);
        Some(info)
    }
}

impl ExportRegistry for InMemoryExports {
    fn connect(&self, client_uuid: &str) -> ExportHandle {
        match self.by_uuid.entry(Arc::from(client_uuid)) {
            Entry::Occupied(existing) => *existing.get(),
            Entry::Vacant(slot) => {
                let handle = ExportHandle(self.next.fetch_add(1, Ordering::AcqRel));
                self.by_handle.insert(
                    handle.0,
                    ExportInfo {
                        handle,
                        client_uuid: Arc::clone(slot.key()),
                    },
                );
                slot.insert(handle);
                info!(client = client_uuid, export = handle.0, "client connected");
                handle
            }
        }
    }

    fn disconnect(&self, handle: ExportHandle) -> bool {
        match self.remove(handle) {
            Some(info) => {
                info!(client = %info.client_uuid, export = handle.0, "client disconnected");
                true
            }
            None => false,
        }
    }

    fn lookup(&self, handle: ExportHandle) -> Option<ExportInfo> {
        if handle.is_none() {
            return None;
        }
        self.by_handle.get(&handle.0).map(|info| info.clone())
    }

    fn evict(&self, handle: ExportHandle) -> bool {
        match self.remove(handle) {
            Some(info) => {
                warn!(client = %info.client_uuid, export = handle.0, "export evicted");
                self.evicted.insert(handle.0, info.client_uuid);
                true
            }
            None => false,
        }
    }
}
