//! Tick 驱动：宿主每个 tick 调用一次
//!
//! 刷新注册表、发出缺少配置的常驻提示、选出发起者并按优先级尝试：
//! 区域请求池 → 自身队列中的下一个请求 → 谈谈当前处境的兜底请求。

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::core::selector::select_next;
use crate::core::{TalkService, TalkTask};
use crate::talk::DialogueRequest;
use crate::world::{has_passed, ticks_for_secs, AgentId, Faction};

pub struct TickDriver {
    service: Arc<TalkService>,
    last_refresh: Option<u64>,
    last_attempt: Option<u64>,
    rng: StdRng,
}

impl TickDriver {
    pub fn new(service: Arc<TalkService>) -> Self {
        Self::with_rng(service, StdRng::from_entropy())
    }

    /// 测试用固定种子
    pub fn with_rng(service: Arc<TalkService>, rng: StdRng) -> Self {
        Self {
            service,
            last_refresh: None,
            last_attempt: None,
            rng,
        }
    }

    pub fn service(&self) -> &Arc<TalkService> {
        &self.service
    }

    /// 推进一个 tick；开始了生成时返回该任务
    pub fn tick(&mut self) -> Option<TalkTask> {
        let service = self.service.clone();
        let world = service.world().clone();
        let now = world.current_tick();
        let cfg = service.talk_config();
        if !cfg.enabled {
            return None;
        }

        let refresh_ticks = ticks_for_secs(cfg.refresh_interval_secs);
        if self.last_refresh.map_or(true, |last| has_passed(last, now, refresh_ticks)) {
            service.registry().refresh(world.as_ref());
            self.last_refresh = Some(now);
        }

        if !service.providers().has_active_config() {
            service.reporter().report_config_missing();
        }

        let talk_interval = service.talk_interval_ticks();
        let selection = select_next(service.registry(), world.as_ref(), now, talk_interval, &mut self.rng)?;
        let due = self.last_attempt.map_or(true, |last| has_passed(last, now, talk_interval));
        if !due && !selection.user_request {
            return None;
        }
        self.last_attempt = Some(now);

        let agent = selection.agent;
        if let Some(task) = self.try_pool(agent, now) {
            return Some(task);
        }
        if let Some(task) = self.try_queued(agent, now) {
            return Some(task);
        }
        service.generate(DialogueRequest::ambient(agent, now)).ok()
    }

    /// 自由殖民者且不在危险中时，认领所在区域的池中请求；未能开始则放回
    fn try_pool(&self, agent: AgentId, now: u64) -> Option<TalkTask> {
        let service = &self.service;
        let world = service.world();
        if service.pool().is_empty() || world.is_in_danger(agent) {
            return None;
        }
        let colonist = service
            .registry()
            .get(agent)
            .is_some_and(|s| s.lock().faction == Faction::FreeColonist);
        if !colonist {
            return None;
        }
        let region = world.region_of(agent)?;
        let request = service.pool().claim(agent, region, world.as_ref(), now)?;
        match service.generate(request.clone()) {
            Ok(task) => Some(task),
            Err(_) => {
                service.pool().restore(request);
                None
            }
        }
    }

    /// 队列中的下一个有效请求；成功开始后才移出队列
    fn try_queued(&self, agent: AgentId, now: u64) -> Option<TalkTask> {
        let service = &self.service;
        let state = service.registry().get(agent)?;
        let request = state.lock().next_request(service.world().as_ref(), now).cloned()?;
        let task = service.generate(request).ok()?;
        state.lock().take_request();
        Some(task)
    }
}
