//! 对话编排端到端测试：沙盒世界 + Mock 服务商

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use talkloom::config::{ProviderConfig, ProviderKind, TalkSection};
    use talkloom::core::{select_next, FailureReporter, Notice, ProviderError, TalkError, TalkPhase};
    use talkloom::llm::{ChatProvider, MockChatProvider, Payload, ProviderFactory, ProviderRegistry};
    use talkloom::memory::{InMemoryLongTerm, Message};
    use talkloom::talk::{DialogueRequest, TalkKind, TalkLine};
    use talkloom::world::{AgentId, Faction, SandboxAgent, SandboxWorld};
    use talkloom::{TalkService, TickDriver};

    /// 记录最后一次流式调用收到的消息
    struct RecordingProvider {
        inner: MockChatProvider,
        last_messages: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl ChatProvider for RecordingProvider {
        fn model(&self) -> &str {
            self.inner.model()
        }

        async fn complete(&self, instruction: &str, messages: &[Message]) -> Result<Payload, ProviderError> {
            self.inner.complete(instruction, messages).await
        }

        async fn complete_stream(
            &self,
            instruction: &str,
            messages: &[Message],
            on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
        ) -> Result<Payload, ProviderError> {
            *self.last_messages.lock() = messages.to_vec();
            self.inner.complete_stream(instruction, messages, on_chunk).await
        }
    }

    fn transcript(lines: &[(&str, &str)]) -> String {
        let lines: Vec<TalkLine> = lines
            .iter()
            .map(|(name, text)| TalkLine {
                name: name.to_string(),
                text: text.to_string(),
            })
            .collect();
        serde_json::to_string(&lines).unwrap()
    }

    fn two_colonists() -> Arc<SandboxWorld> {
        let world = Arc::new(SandboxWorld::new());
        world.add(SandboxAgent::new(1, "Ann", Faction::FreeColonist).doing("sowing rice"));
        world.add(SandboxAgent::new(2, "Bob", Faction::FreeColonist).at(2.0, 0.0));
        world.set_tick(1000);
        world
    }

    /// 按模型名分派到不同的客户端
    fn by_model(clients: Vec<(&'static str, Arc<dyn ChatProvider>)>) -> ProviderFactory {
        Arc::new(move |cfg: &ProviderConfig| -> Arc<dyn ChatProvider> {
            clients
                .iter()
                .find(|(model, _)| *model == cfg.model)
                .map(|(_, client)| client.clone())
                .unwrap_or_else(|| Arc::new(MockChatProvider::new(cfg.model.clone())))
        })
    }

    fn service_with(world: Arc<SandboxWorld>, configs: Vec<ProviderConfig>, factory: ProviderFactory) -> TalkService {
        let reporter = Arc::new(FailureReporter::new());
        let providers = Arc::new(ProviderRegistry::new(configs, 0, factory).with_reporter(reporter.clone()));
        let service = TalkService::new(world.clone(), providers, reporter, TalkSection::default());
        service.registry().refresh(world.as_ref());
        service
    }

    fn reset_agents(service: &TalkService) {
        for id in service.registry().ids() {
            let state = service.registry().get(id).unwrap();
            let mut s = state.lock();
            while s.pop_response().is_some() {}
            s.last_talk_tick = 0;
        }
    }

    #[test]
    fn test_selection_proportion_colonist_vs_prisoner() {
        let world = SandboxWorld::new();
        world.add(SandboxAgent::new(1, "Ann", Faction::FreeColonist).with_chattiness(1.0));
        world.add(SandboxAgent::new(2, "Cid", Faction::Prisoner).with_chattiness(0.3));
        let registry = talkloom::talk::AgentRegistry::new(Arc::new(talkloom::memory::TalkLog::new()));
        registry.refresh(&world);

        let mut rng = StdRng::seed_from_u64(99);
        let trials = 20_000;
        let ann = (0..trials)
            .filter_map(|_| select_next(&registry, &world, 10_000, 300, &mut rng))
            .filter(|s| s.agent == AgentId(1))
            .count();
        let share = ann as f64 / trials as f64;
        assert!((share - 1.0 / 1.3).abs() < 0.02, "share = {share}");
    }

    #[test]
    fn test_urgent_expires_once_danger_passes() {
        let world = two_colonists();
        world.update(AgentId(1), |a| a.in_danger = true);
        let service = service_with(world.clone(), vec![ProviderConfig::new(ProviderKind::Mock, "mock")], by_model(vec![]));

        assert!(service.request_talk(DialogueRequest::new(TalkKind::Urgent, "raid!", AgentId(1), 1000)));
        let ann = service.registry().get(AgentId(1)).unwrap();
        assert!(ann.lock().next_request(world.as_ref(), 1000).is_some());

        world.update(AgentId(1), |a| a.in_danger = false);
        assert!(ann.lock().next_request(world.as_ref(), 1000).is_none());
        assert_eq!(ann.lock().pending_len(), 0);
    }

    #[tokio::test]
    async fn test_malformed_final_transcript_keeps_streamed_lines() {
        // 已流出的台词不会被撤回，这是已知的不一致
        let world = two_colonists();
        let truncated = r#"[{"name":"Ann","text":"Look at the sky"},{"name":"Bob","text":"Rain soon"}"#;
        let mock: Arc<dyn ChatProvider> =
            Arc::new(MockChatProvider::new("mock").with_streams(vec![Ok(truncated.to_string())]));
        let service = service_with(
            world,
            vec![ProviderConfig::new(ProviderKind::Mock, "mock")],
            by_model(vec![("mock", mock)]),
        );

        let task = service.generate(DialogueRequest::ambient(AgentId(1), 1000)).unwrap();
        let err = task.handle.await.unwrap().unwrap_err();
        assert!(matches!(err, TalkError::MalformedResponse(_)));
        assert_eq!(*task.phase.borrow(), TalkPhase::Aborted);

        let ann = service.registry().get(AgentId(1)).unwrap();
        let bob = service.registry().get(AgentId(2)).unwrap();
        assert_eq!(ann.lock().ready_len(), 1);
        assert_eq!(bob.lock().ready_len(), 1);
        assert!(ann.lock().history.is_empty());
        assert!(!ann.lock().is_generating());
        assert_eq!(service.stats().snapshot().total_calls, 0);
    }

    #[tokio::test]
    async fn test_stream_failover_to_next_provider() {
        let world = two_colonists();
        let failing: Arc<dyn ChatProvider> = Arc::new(
            MockChatProvider::new("primary").with_streams(vec![Err(ProviderError::QuotaExceeded("429".into()))]),
        );
        let backup = Arc::new(MockChatProvider::new("backup"));
        let service = service_with(
            world,
            vec![
                ProviderConfig::new(ProviderKind::OpenAi, "primary").with_key("k"),
                ProviderConfig::new(ProviderKind::DeepSeek, "backup").with_key("k"),
            ],
            by_model(vec![("primary", failing), ("backup", backup.clone() as Arc<dyn ChatProvider>)]),
        );
        let mut notices = service.reporter().subscribe();

        let task = service.generate(DialogueRequest::ambient(AgentId(1), 1000)).unwrap();
        assert_eq!(task.handle.await.unwrap().unwrap(), 2);
        assert_eq!(backup.stream_calls(), 1);
        assert_eq!(service.providers().current_index(), 1);
        assert!(matches!(
            notices.try_recv().unwrap(),
            Notice::Retrying { quota: true, ref next_model } if next_model == "backup"
        ));
    }

    #[tokio::test]
    async fn test_memories_recalled_into_prompt() {
        let world = two_colonists();
        let search = r#"```json
{"content":["harvest"],"num":3}
```"#;
        let provider = Arc::new(RecordingProvider {
            inner: MockChatProvider::new("mock")
                .with_completions(vec![Ok(search.to_string()), Ok(search.to_string())])
                .with_streams(vec![Ok(transcript(&[
                    ("Ann", "The harvest looks great"),
                    ("Bob", "Best harvest in years"),
                ]))]),
            last_messages: Mutex::new(Vec::new()),
        });
        let memory = Arc::new(InMemoryLongTerm::new(100));
        let service = service_with(
            world.clone(),
            vec![ProviderConfig::new(ProviderKind::Mock, "mock")],
            by_model(vec![("mock", provider.clone() as Arc<dyn ChatProvider>)]),
        )
        .with_memory(memory.clone());

        let first = service.generate(DialogueRequest::ambient(AgentId(1), 1000)).unwrap();
        first.handle.await.unwrap().unwrap();
        for _ in 0..10 {
            if !memory.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(memory.len(), 2);

        reset_agents(&service);
        world.update(AgentId(1), |a| a.activity = "threshing grain".to_string());
        let second = service.generate(DialogueRequest::ambient(AgentId(1), 1000)).unwrap();
        second.handle.await.unwrap().unwrap();

        let messages = provider.last_messages.lock().clone();
        // 上一轮的 prompt + 台词，再加本轮 prompt
        assert_eq!(messages.len(), 3);
        let prompt = &messages[2].content;
        assert!(prompt.contains("[Key memories]"));
        assert!(prompt.contains("Best harvest in years"));
        assert_eq!(service.stats().snapshot().total_calls, 4);
    }

    #[tokio::test]
    async fn test_driver_displays_reply_chain_in_order() {
        let world = two_colonists();
        let service = Arc::new(service_with(
            world.clone(),
            vec![ProviderConfig::new(ProviderKind::Mock, "mock")],
            by_model(vec![]),
        ));
        let mut driver = TickDriver::with_rng(service.clone(), StdRng::seed_from_u64(5));

        let mut shown = Vec::new();
        for _ in 0..1200 {
            let now = world.advance(1);
            if let Some(task) = driver.tick() {
                task.handle.await.unwrap().ok();
            }
            if let Some(agent) = service.poll_display() {
                let line = service.consume(agent).unwrap();
                assert_eq!(service.registry().talk_log().spoken_tick(line.id), Some(now));
                shown.push(line);
            }
        }

        assert!(shown.len() >= 2, "shown {} lines", shown.len());
        for pair in shown.windows(2) {
            if pair[1].is_reply() {
                assert_eq!(pair[1].parent, pair[0].id);
            }
        }
        assert!(!service.gate().is_busy());
    }
}
