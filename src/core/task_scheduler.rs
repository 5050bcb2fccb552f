//! 生成闸门：全局单飞的生成许可
//!
//! 容量为 1 的 Semaphore：任何时刻最多一个非 User 生成在途。User 请求走旁路，
//! 有空闲许可时同样占用它（此时其它普通请求需要等待），没有时直接放行。
//! `allow_concurrent_bursts` 打开后闸门失效，所有请求都直接放行。

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 生成任务 ID
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskId {
    pub fn new() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// 生成许可；drop 时释放
#[derive(Debug)]
pub enum GatePermit {
    /// 占用了全局许可
    Exclusive(OwnedSemaphorePermit),
    /// 旁路（User 请求或闸门关闭）
    Bypass(Arc<AtomicUsize>),
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        if let GatePermit::Bypass(counter) = self {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[derive(Debug)]
pub struct GenerationGate {
    semaphore: Arc<Semaphore>,
    unbounded: bool,
    bypassed: Arc<AtomicUsize>,
}

impl GenerationGate {
    pub fn new(allow_concurrent_bursts: bool) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
            unbounded: allow_concurrent_bursts,
            bypassed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 是否有占用全局许可的生成在途
    pub fn is_busy(&self) -> bool {
        !self.unbounded && self.semaphore.available_permits() == 0
    }

    /// 当前在途的生成数（含旁路）
    pub fn in_flight(&self) -> usize {
        let exclusive = usize::from(self.semaphore.available_permits() == 0);
        exclusive + self.bypassed.load(Ordering::SeqCst)
    }

    fn bypass(&self) -> GatePermit {
        self.bypassed.fetch_add(1, Ordering::SeqCst);
        GatePermit::Bypass(self.bypassed.clone())
    }

    /// 尝试获取许可；普通请求在闸门被占用时返回 None，User 请求总能拿到许可
    pub fn try_enter(&self, user: bool) -> Option<GatePermit> {
        if self.unbounded {
            return Some(self.bypass());
        }
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Some(GatePermit::Exclusive(permit)),
            Err(_) if user => Some(self.bypass()),
            Err(_) => None,
        }
    }
}

impl Default for GenerationGate {
    fn default() -> Self {
        Self::new(false)
    }
}
