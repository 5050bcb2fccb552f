//! 请求池：未绑定发起者的请求，由区域内第一个合格 Agent 认领

use parking_lot::Mutex;

use crate::talk::DialogueRequest;
use crate::world::{AgentId, RegionId, World};

#[derive(Debug, Default)]
pub struct RequestPool {
    entries: Mutex<Vec<DialogueRequest>>,
}

impl RequestPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入池中；没有区域标记的请求无法被认领，直接丢弃
    pub fn add(&self, request: DialogueRequest) -> bool {
        if request.region.is_none() {
            tracing::warn!(kind = %request.kind, "Pooled request without region dropped");
            return false;
        }
        self.entries.lock().push(request);
        true
    }

    /// 认领该区域内最早的有效请求（移出池并绑定发起者），同时清理过期项
    pub fn claim(
        &self,
        agent: AgentId,
        region: RegionId,
        world: &dyn World,
        now: u64,
    ) -> Option<DialogueRequest> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|r| !r.is_expired(world, now));
        if entries.len() < before {
            tracing::debug!(dropped = before - entries.len(), "Expired pooled requests dropped");
        }
        let at = entries.iter().position(|r| r.region == Some(region))?;
        let request = entries.remove(at);
        Some(request.claimed_by(agent))
    }

    /// 认领后未能开始生成时放回队首
    pub fn restore(&self, mut request: DialogueRequest) {
        request.initiator = None;
        self.entries.lock().insert(0, request);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
