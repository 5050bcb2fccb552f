//! Talkloom 演示程序
//!
//! 在内存沙盒中运行一个小殖民地：加载配置、初始化日志、构建编排服务与 tick 驱动，
//! 按固定节奏推进时钟并打印展示出的台词。没有可用服务商配置时使用 Mock 客户端。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use talkloom::config::{load_or_default, ProviderConfig, ProviderKind};
use talkloom::core::Notice;
use talkloom::observability;
use talkloom::talk::{DialogueRequest, TalkKind};
use talkloom::world::{AgentId, Faction, SandboxAgent, SandboxWorld, World, TICKS_PER_SECOND};
use talkloom::{TalkService, TickDriver};

/// 演示时长（tick）
const DEMO_TICKS: u64 = 90 * TICKS_PER_SECOND;
/// 每个 tick 的真实耗时
const TICK_DURATION: Duration = Duration::from_millis(5);

fn build_colony() -> SandboxWorld {
    let world = SandboxWorld::new();
    world.add(
        SandboxAgent::new(1, "Ann", Faction::FreeColonist)
            .with_personality("cheerful cook who hums while working")
            .doing("cooking a simple meal"),
    );
    world.add(
        SandboxAgent::new(2, "Bob", Faction::FreeColonist)
            .with_chattiness(1.3)
            .with_personality("grumpy miner")
            .at(4.0, 1.0)
            .doing("hauling steel"),
    );
    world.add(
        SandboxAgent::new(3, "Cid", Faction::Prisoner)
            .with_chattiness(0.6)
            .at(6.0, 3.0)
            .doing("sitting in a cell"),
    );
    world.add(
        SandboxAgent::new(4, "Dee", Faction::Visitor)
            .at(30.0, 30.0)
            .doing("browsing trade goods"),
    );
    world
}

/// 演示中按时间点注入的事件
fn inject_events(service: &TalkService, world: &SandboxWorld, now: u64) {
    match now {
        t if t == 10 * TICKS_PER_SECOND => {
            service.request_talk(DialogueRequest::pooled(TalkKind::Event, "A meteorite crashed nearby", 0, now));
        }
        t if t == 30 * TICKS_PER_SECOND => {
            service.request_talk(DialogueRequest::user(
                "What should we plant this season?",
                AgentId(1),
                Some(AgentId(2)),
                now,
            ));
        }
        t if t == 50 * TICKS_PER_SECOND => {
            world.update(AgentId(2), |a| {
                a.in_danger = true;
                a.activity = "fleeing a manhunting boar".to_string();
            });
            service.request_talk(DialogueRequest::new(TalkKind::Urgent, "A boar is charging!", AgentId(2), now));
        }
        t if t == 60 * TICKS_PER_SECOND => {
            world.update(AgentId(2), |a| {
                a.in_danger = false;
                a.activity = "resting".to_string();
            });
        }
        _ => {}
    }
}

async fn run_colony(service: Arc<TalkService>, world: Arc<SandboxWorld>, cancel: CancellationToken) -> anyhow::Result<()> {
    let mut driver = TickDriver::new(service.clone());
    let mut interval = tokio::time::interval(TICK_DURATION);

    while world.current_tick() < DEMO_TICKS {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(tick = world.current_tick(), "Stopping colony");
                break;
            }
            _ = interval.tick() => {}
        }
        let now = world.advance(1);
        inject_events(&service, &world, now);
        driver.tick();

        if let Some(agent) = service.poll_display() {
            if let Some(line) = service.consume(agent) {
                println!("[{}] {}: {}", chrono::Local::now().format("%H:%M:%S"), line.name, line.text);
            }
        }
    }

    world.set_running(false);
    let stats = service.stats().snapshot();
    tracing::info!(
        calls = stats.total_calls,
        tokens = stats.total_tokens,
        avg_tokens = stats.avg_tokens_per_call,
        "Colony run finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut cfg = load_or_default(None);
    if !cfg.llm.providers.iter().any(ProviderConfig::is_valid) {
        tracing::warn!("No valid provider configured, using Mock provider");
        cfg.llm.providers.push(ProviderConfig::new(ProviderKind::Mock, "mock"));
        cfg.llm.current_index = cfg.llm.providers.len() - 1;
    }

    let world = Arc::new(build_colony());
    let service = Arc::new(TalkService::from_config(world.clone(), &cfg));

    let mut notices = service.reporter().subscribe();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            match notice {
                Notice::QuotaExceeded(msg) => eprintln!("! quota exceeded: {msg}"),
                Notice::GenerationFailed(msg) => eprintln!("! generation failed: {msg}"),
                Notice::Retrying { next_model, .. } => eprintln!("! retrying with {next_model}"),
                Notice::ConfigurationMissing => eprintln!("! no provider configured"),
            }
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    run_colony(service, world, cancel).await.context("Colony run failed")?;
    Ok(())
}
