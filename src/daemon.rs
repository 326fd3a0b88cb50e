//! Daemon assembly: builds the store, agent runner, and synthesis client from
//! configuration and drives the three long-running loops until shutdown.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use drover_core::agent::ProcessAgentRunner;
use drover_core::config::{DroverConfig, StoreBackend};
use drover_core::coordinator::{Coordinator, recover_stale_tasks};
use drover_core::error::DroverResult;
use drover_core::learning::{EpisodeRecorder, RuleDistiller, RuleSelector};
use drover_core::llm::{AnthropicClient, SynthesisClient};
use drover_core::store::{HttpStore, MemoryStore, TaskStore};

fn build_store(config: &DroverConfig) -> DroverResult<Arc<dyn TaskStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store; queue state is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Http => Ok(Arc::new(HttpStore::new(&config.store)?)),
    }
}

fn build_synthesis(config: &DroverConfig) -> DroverResult<Arc<dyn SynthesisClient>> {
    Ok(Arc::new(AnthropicClient::new(config.synthesis.clone())?))
}

/// Run the full daemon: coordinator, episode recorder, and rule distiller,
/// each on its own task, until Ctrl-C.
pub async fn run(config: DroverConfig) -> DroverResult<()> {
    let store = build_store(&config)?;
    let synthesis = build_synthesis(&config)?;
    let runner = Arc::new(ProcessAgentRunner::new(config.agent.clone()));
    let selector = Arc::new(RuleSelector::new(store.clone(), &config.learning));

    let coordinator = Coordinator::new(
        store.clone(),
        runner,
        selector,
        config.coordinator.clone(),
        config.agent.clone(),
    );
    let recorder = EpisodeRecorder::new(store.clone(), synthesis.clone(), config.learning.clone());
    let distiller = RuleDistiller::new(store, synthesis, config.learning.clone());

    let shutdown = CancellationToken::new();

    let coordinator_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { coordinator.run(shutdown).await }
    });
    let recorder_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { recorder.run(shutdown).await }
    });
    let distiller_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { distiller.run(shutdown).await }
    });

    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received, draining");
    shutdown.cancel();

    for (name, handle) in [
        ("coordinator", coordinator_handle),
        ("recorder", recorder_handle),
        ("distiller", distiller_handle),
    ] {
        if let Err(error) = handle.await {
            tracing::warn!(%error, loop_name = name, "loop task panicked");
        }
    }

    tracing::info!("drover stopped");
    Ok(())
}

/// Run a single distillation pass and report the outcome.
pub async fn distill_once(config: DroverConfig) -> DroverResult<()> {
    let store = build_store(&config)?;
    let synthesis = build_synthesis(&config)?;
    let distiller = RuleDistiller::new(store, synthesis, config.learning.clone());

    let outcome = distiller.run_once().await?;
    println!("{outcome}");
    Ok(())
}

/// Run a single stale-claim sweep and report how many tasks were reset.
pub async fn recover_once(config: DroverConfig) -> DroverResult<()> {
    let store = build_store(&config)?;
    let recovered = recover_stale_tasks(store.as_ref(), config.coordinator.stale_after).await?;
    println!("reset {recovered} stale task(s) to pending");
    Ok(())
}
