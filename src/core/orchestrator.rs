//! 对话编排：校验请求、组装上下文、调用服务商并把流式台词分发到说话人的队列
//!
//! generate 在调用方线程同步完成校验与上下文构建，随后 spawn 一个任务负责检索记忆、
//! 流式生成与收尾。发起者的 generating 标记在 spawn 前置位，任务结束时无论成败都会清除。
//! 展示端通过 poll_display / consume 按自己的节奏取走台词。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{AppConfig, TalkSection};
use crate::core::context::{
    build_context, decorate_prompt, instruction_or_default, parse_search_params, person_block, search_request,
    strip_format, SearchParams,
};
use crate::core::{
    FailureReporter, GatePermit, GenerationGate, PhaseTracker, RejectReason, TalkError, TalkPhase, TaskId,
};
use crate::llm::{default_factory, ChunkSink, ProviderRegistry, StreamingJsonAssembler};
use crate::memory::{
    dedup_entries, format_for_prompt, InMemoryLongTerm, LongTermMemory, Message, NoopLongTerm, TalkLog,
};
use crate::observability::Stats;
use crate::talk::{
    validate_transcript, AgentRegistry, DialogueRequest, DialogueResponse, RequestPool, SharedState, TalkKind, TalkLine,
};
use crate::world::{has_passed, ticks_for_secs, AgentId, AgentStatus, World, TICKS_PER_SECOND};

/// 一次已开始的生成
#[derive(Debug)]
pub struct TalkTask {
    pub id: TaskId,
    pub initiator: AgentId,
    /// 阶段投影
    pub phase: watch::Receiver<TalkPhase>,
    /// 成功时返回分发出去的台词数
    pub handle: JoinHandle<Result<usize, TalkError>>,
}

/// 通过校验的请求与其占用的资源
struct Validated {
    request: DialogueRequest,
    initiator: AgentId,
    state: SharedState,
    permit: GatePermit,
    nearby: Vec<AgentId>,
    status: AgentStatus,
}

pub struct TalkService {
    world: Arc<dyn World>,
    registry: Arc<AgentRegistry>,
    pool: Arc<RequestPool>,
    providers: Arc<ProviderRegistry>,
    memory: Arc<dyn LongTermMemory>,
    reporter: Arc<FailureReporter>,
    gate: GenerationGate,
    stats: Arc<Stats>,
    talk: TalkSection,
    default_results: usize,
}

impl TalkService {
    pub fn new(
        world: Arc<dyn World>,
        providers: Arc<ProviderRegistry>,
        reporter: Arc<FailureReporter>,
        talk: TalkSection,
    ) -> Self {
        Self {
            world,
            registry: Arc::new(AgentRegistry::new(Arc::new(TalkLog::new()))),
            pool: Arc::new(RequestPool::new()),
            providers,
            memory: Arc::new(NoopLongTerm),
            reporter,
            gate: GenerationGate::new(talk.allow_concurrent_bursts),
            stats: Arc::new(Stats::new()),
            talk,
            default_results: 5,
        }
    }

    /// 按配置构建：默认客户端工厂、共享的失败通知与长期记忆
    pub fn from_config(world: Arc<dyn World>, cfg: &AppConfig) -> Self {
        let reporter = Arc::new(FailureReporter::new());
        let providers = Arc::new(
            ProviderRegistry::new(
                cfg.llm.providers.clone(),
                cfg.llm.current_index,
                default_factory(cfg.llm.timeouts.clone()),
            )
            .with_reporter(reporter.clone()),
        );
        let memory: Arc<dyn LongTermMemory> = if cfg.memory.enabled {
            Arc::new(InMemoryLongTerm::new(cfg.memory.max_entries))
        } else {
            Arc::new(NoopLongTerm)
        };
        Self::new(world, providers, reporter, cfg.talk.clone())
            .with_memory(memory)
            .with_default_results(cfg.memory.default_results)
    }

    pub fn with_memory(mut self, memory: Arc<dyn LongTermMemory>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_default_results(mut self, n: usize) -> Self {
        self.default_results = n.max(1);
        self
    }

    pub fn world(&self) -> &Arc<dyn World> {
        &self.world
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<RequestPool> {
        &self.pool
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn reporter(&self) -> &Arc<FailureReporter> {
        &self.reporter
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn gate(&self) -> &GenerationGate {
        &self.gate
    }

    pub fn talk_config(&self) -> &TalkSection {
        &self.talk
    }

    pub fn talk_interval_ticks(&self) -> u64 {
        ticks_for_secs(self.talk.talk_interval_secs)
    }

    /// 事件入口：无发起者但带区域的请求进入请求池，其余进入发起者队列
    pub fn request_talk(&self, request: DialogueRequest) -> bool {
        if request.initiator.is_none() && request.region.is_some() {
            return self.pool.add(request);
        }
        self.registry.enqueue(request)
    }

    /// 校验并开始一次生成；未开始时返回原因
    pub fn generate(&self, request: DialogueRequest) -> Result<TalkTask, RejectReason> {
        let (phase, phase_rx) = PhaseTracker::new();
        phase.advance(TalkPhase::Validating);
        let initiator_hint = request.initiator;
        let kind = request.kind;

        let validated = match self.validate(request) {
            Ok(v) => v,
            Err(reason) => {
                phase.abort();
                match initiator_hint {
                    Some(id) => tracing::debug!(agent = %id, kind = %kind, %reason, "Talk request rejected"),
                    None => tracing::debug!(kind = %kind, %reason, "Talk request rejected"),
                }
                return Err(reason);
            }
        };
        let Validated {
            request,
            initiator,
            state,
            permit,
            nearby,
            status,
        } = validated;

        phase.advance(TalkPhase::ContextBuilding);
        let job = self.prepare(request, initiator, nearby, status);
        state.lock().set_generating(true);

        let id = TaskId::new();
        tracing::info!(
            task = %id,
            agent = %initiator,
            kind = %job.kind,
            participants = job.participants,
            "Dialogue generation started"
        );
        let handle = tokio::spawn(async move {
            let _permit: GatePermit = permit;
            let result = job.run(&phase).await;
            if let Some(state) = job.registry.get(initiator) {
                state.lock().set_generating(false);
            }
            match &result {
                Ok(lines) => {
                    phase.advance(TalkPhase::Idle);
                    tracing::info!(task = %id, lines, "Dialogue generation finished");
                }
                Err(e) => {
                    phase.abort();
                    job.reporter.report_failure(e);
                    tracing::debug!(task = %id, error = %e, "Dialogue generation aborted");
                }
            }
            result
        });

        Ok(TalkTask {
            id,
            initiator,
            phase: phase_rx,
            handle,
        })
    }

    fn validate(&self, mut request: DialogueRequest) -> Result<Validated, RejectReason> {
        if !self.talk.enabled {
            return Err(RejectReason::Disabled);
        }
        if !self.providers.has_active_config() {
            self.reporter.report_config_missing();
            return Err(RejectReason::NoActiveConfig);
        }
        let user = request.is_user();
        let permit = self.gate.try_enter(user).ok_or(RejectReason::Busy)?;

        let initiator = request.initiator.ok_or(RejectReason::NoInitiator)?;
        // 注册表只在刷新时同步，两次刷新之间离开的 Agent 也按未知处理
        let state = self
            .registry
            .get(initiator)
            .filter(|_| self.world.is_eligible(initiator))
            .ok_or(RejectReason::UnknownInitiator)?;
        let now = self.world.current_tick();
        let display_strict = self.world.can_display_strict(initiator);
        {
            let s = state.lock();
            if s.is_generating() {
                return Err(RejectReason::AlreadyGenerating);
            }
            if !user && !s.can_generate(display_strict, now, self.talk_interval_ticks()) {
                return Err(RejectReason::CannotGenerate);
            }
        }
        if !user && !self.talk.allow_simultaneous_conversations && self.registry.any_unread() {
            return Err(RejectReason::PendingResponses);
        }

        // 无效接收者直接去掉，不拒绝请求
        if let Some(recipient) = request.recipient {
            if recipient == initiator
                || !self.registry.contains(recipient)
                || !self.world.is_eligible(recipient)
                || !self.world.can_display_strict(recipient)
            {
                tracing::debug!(agent = %initiator, recipient = %recipient, "Dropped invalid recipient");
                request.recipient = None;
            }
        }

        // 防复读：状态未变时非 User 请求最多连续被拒两次
        let nearby = self.world.nearby_agents(initiator, self.talk.nearby_limit);
        let status = self.world.status(initiator, &nearby);
        {
            let mut s = state.lock();
            if user {
                s.reject_count = 0;
                s.last_status = status.text.clone();
            } else if !s.admit_status(&status.text) {
                return Err(RejectReason::StatusUnchanged);
            }
        }

        Ok(Validated {
            request,
            initiator,
            state,
            permit,
            nearby,
            status,
        })
    }

    /// 参与者与上下文；返回交给后台任务的全部数据
    fn prepare(
        &self,
        mut request: DialogueRequest,
        initiator: AgentId,
        nearby: Vec<AgentId>,
        status: AgentStatus,
    ) -> GenerationJob {
        if !request.is_user() && status.in_danger && request.kind != TalkKind::Urgent {
            tracing::debug!(agent = %initiator, from = %request.kind, "Initiator in danger, upgraded to Urgent");
            request.kind = TalkKind::Urgent;
        }

        let mut participants = vec![initiator];
        participants.extend(request.recipient);
        for id in &nearby {
            let quiet = self.registry.get(*id).is_some_and(|s| !s.lock().has_unread());
            if quiet && self.world.can_display_strict(*id) {
                participants.push(*id);
            }
        }
        let mut seen = Vec::with_capacity(participants.len());
        participants.retain(|id| {
            if seen.contains(id) {
                return false;
            }
            seen.push(*id);
            true
        });
        participants.truncate(self.talk.max_participants.max(1));
        request.monologue = participants.len() == 1;

        let mut names = Vec::with_capacity(participants.len());
        let mut blocks = Vec::with_capacity(participants.len());
        for id in &participants {
            let Some(state) = self.registry.get(*id) else {
                continue;
            };
            let description = self.world.describe(*id);
            let mut s = state.lock();
            let block = person_block(&description, &s.personality);
            s.context = block.clone();
            names.push(s.name.clone());
            blocks.push(block);
        }
        let instruction = build_context(instruction_or_default(&self.talk.instruction), &blocks);
        let situation = self.world.situation();
        let prompt = decorate_prompt(&request, &names, &status.text, &situation);

        // 参与者与附近旁听者都会记住这轮对话
        let mut involved = participants.clone();
        for id in nearby {
            if !involved.contains(&id) && self.registry.contains(id) {
                involved.push(id);
            }
        }
        let mut speakers: HashMap<String, AgentId> = HashMap::new();
        let mut listeners = Vec::with_capacity(involved.len());
        for id in &involved {
            let Some(state) = self.registry.get(*id) else {
                continue;
            };
            let name = state.lock().name.clone();
            match speakers.get(&name) {
                Some(existing) if *existing != *id => {
                    tracing::warn!(name = %name, kept = %existing, skipped = %id, "Duplicate speaker name in conversation");
                }
                Some(_) => {}
                None => {
                    speakers.insert(name.clone(), *id);
                    listeners.push(name);
                }
            }
        }

        let history = self
            .registry
            .get(initiator)
            .map(|s| s.lock().history.messages().to_vec())
            .unwrap_or_default();

        GenerationJob {
            world: self.world.clone(),
            registry: self.registry.clone(),
            providers: self.providers.clone(),
            memory: self.memory.clone(),
            reporter: self.reporter.clone(),
            stats: self.stats.clone(),
            kind: request.kind,
            instruction,
            prompt,
            history,
            speakers,
            listeners,
            involved,
            participants: participants.len(),
            date: situation.date,
            default_results: self.default_results,
        }
    }

    /// 展示节奏：返回下一个可以展示队首台词的 Agent（每次至多一个）
    ///
    /// 父句被忽略或当前无法展示的队首台词会被忽略并移除；处于危险中时只保留 Urgent / User 台词，
    /// 回复等待缩短为 1 秒。
    pub fn poll_display(&self) -> Option<AgentId> {
        let now = self.world.current_tick();
        let talk_interval = self.talk_interval_ticks();
        let reply_interval = ticks_for_secs(self.talk.reply_interval_secs);
        let log = self.registry.talk_log();

        for id in self.registry.ids() {
            let Some(state) = self.registry.get(id) else {
                continue;
            };
            let can_display = self.world.can_display(id);
            let in_danger = self.world.is_in_danger(id);
            let mut s = state.lock();

            let Some(head) = s.peek_response() else {
                continue;
            };
            if log.is_ignored(head.parent) || !can_display {
                if let Some(dropped) = s.pop_response() {
                    log.ignore(dropped.id, now);
                    tracing::debug!(agent = %s.name, line = %dropped.id, "Ignored undisplayable line");
                }
                continue;
            }
            if !head.is_reply() && !has_passed(s.last_talk_tick, now, talk_interval) {
                continue;
            }

            let mut interval = reply_interval;
            if in_danger {
                interval = TICKS_PER_SECOND;
                let dropped = s.retain_responses(|r| matches!(r.kind, TalkKind::Urgent | TalkKind::User));
                for line in &dropped {
                    log.ignore(line.id, now);
                }
            }

            let Some(head) = s.peek_response() else {
                continue;
            };
            let Some(spoken) = log.spoken_tick(head.parent) else {
                continue;
            };
            if !has_passed(spoken, now, interval) {
                continue;
            }
            return Some(id);
        }
        None
    }

    /// 取走并记录队首台词
    pub fn consume(&self, agent: AgentId) -> Option<DialogueResponse> {
        let state = self.registry.get(agent)?;
        let now = self.world.current_tick();
        let mut s = state.lock();
        let response = s.pop_response()?;
        self.registry.talk_log().mark_spoken(response.id, now);
        s.last_talk_tick = now;
        Some(response)
    }
}

/// 后台生成所需的全部数据
struct GenerationJob {
    world: Arc<dyn World>,
    registry: Arc<AgentRegistry>,
    providers: Arc<ProviderRegistry>,
    memory: Arc<dyn LongTermMemory>,
    reporter: Arc<FailureReporter>,
    stats: Arc<Stats>,
    kind: TalkKind,
    instruction: String,
    prompt: String,
    history: Vec<Message>,
    speakers: HashMap<String, AgentId>,
    listeners: Vec<String>,
    involved: Vec<AgentId>,
    participants: usize,
    date: String,
    default_results: usize,
}

impl GenerationJob {
    async fn run(&self, phase: &PhaseTracker) -> Result<usize, TalkError> {
        phase.advance(TalkPhase::AwaitingProvider);
        let memories = self.recall().await;
        let prompt = format!("{memories}{}", self.prompt);

        let mut messages = self.history.clone();
        messages.push(Message::user(prompt));

        let mut sink = RoutingSink {
            assembler: StreamingJsonAssembler::new(),
            speakers: &self.speakers,
            registry: &self.registry,
            world: self.world.as_ref(),
            phase,
            kind: self.kind,
            parent: Uuid::nil(),
            routed: 0,
        };
        let payload = self
            .providers
            .stream_with_failover(&self.instruction, &messages, &mut sink)
            .await?;
        let routed = sink.routed;
        if phase.current() == TalkPhase::AwaitingProvider {
            phase.advance(TalkPhase::Streaming);
        }

        phase.advance(TalkPhase::Finalizing);
        if !self.world.is_running() {
            tracing::info!("Host stopped, discarding generation result");
            return Ok(0);
        }
        // 已分发的台词保留在队列中
        let lines = validate_transcript(&payload.response)?;
        self.stats.record_call(payload.token_count);

        let transcript = serde_json::to_string(&lines).unwrap_or_default();
        let history_prompt = strip_format(&self.prompt);
        for id in &self.involved {
            if let Some(state) = self.registry.get(*id) {
                state.lock().history.push_exchange(history_prompt.clone(), transcript.clone());
            }
        }
        self.remember(lines);
        Ok(routed)
    }

    /// 生成检索词并查询长期记忆；任何失败都只会让 prompt 少一段记忆
    async fn recall(&self) -> String {
        if !self.memory.enabled() {
            return String::new();
        }
        let search = [Message::user(search_request(&self.prompt))];
        let params = match self.providers.complete_with_failover("", &search).await {
            Ok(payload) => {
                self.stats.record_call(payload.token_count);
                parse_search_params(&payload.response, &self.prompt, self.default_results)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Search query generation failed, using prompt");
                SearchParams::fallback(&self.prompt, self.default_results)
            }
        };
        match self.memory.query(&params.content, &self.listeners, params.num).await {
            Ok(entries) => {
                let entries = dedup_entries(entries);
                tracing::debug!(found = entries.len(), "Recalled memories");
                format_for_prompt(&entries)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Memory query failed");
                String::new()
            }
        }
    }

    fn remember(&self, lines: Vec<TalkLine>) {
        if !self.memory.enabled() || lines.is_empty() {
            return;
        }
        let memory = self.memory.clone();
        let kind = self.kind;
        let listeners = self.listeners.clone();
        let date = self.date.clone();
        tokio::spawn(async move {
            if let Err(e) = memory.store(&lines, kind, &listeners, &date).await {
                tracing::warn!(error = %e, "Memory store failed");
            }
        });
    }
}

/// 把流式解析出的台词按说话人分发到各自的待展示队列
struct RoutingSink<'a> {
    assembler: StreamingJsonAssembler<TalkLine>,
    speakers: &'a HashMap<String, AgentId>,
    registry: &'a AgentRegistry,
    world: &'a dyn World,
    phase: &'a PhaseTracker,
    kind: TalkKind,
    parent: Uuid,
    routed: usize,
}

impl ChunkSink for RoutingSink<'_> {
    fn on_chunk(&mut self, chunk: &str) {
        if self.phase.current() == TalkPhase::AwaitingProvider {
            self.phase.advance(TalkPhase::Streaming);
        }
        for line in self.assembler.feed(chunk) {
            if !self.world.is_running() {
                return;
            }
            let Some(&speaker) = self.speakers.get(line.name.trim()) else {
                tracing::warn!(name = %line.name, "Line from unknown speaker skipped");
                continue;
            };
            let Some(state) = self.registry.get(speaker) else {
                continue;
            };
            let response = DialogueResponse::new(line, self.parent, self.kind);
            self.parent = response.id;
            state.lock().push_response(response);
            self.routed += 1;
        }
    }

    fn restart(&mut self) {
        self.assembler.clear();
        self.parent = Uuid::nil();
    }
}
