//! Owns config and every runner/worker, starts them in dependency order, and drives graceful
//! shutdown in reverse dependency order.

use crate::capabilities::{AlertSink, EmbeddingProvider, LLMProvider, MarketPlatform, NewsSource};
use crate::config::Config;
use crate::embedding::EmbeddingWorker;
use crate::ingest::NewsIngestor;
use crate::matching::MatchingWorker;
use crate::runner::{BackoffConfig, LoopRunner};
use crate::store::Store;
use crate::sync::MarketSyncer;
use crate::validation::ValidationWorker;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Everything external the coordinator needs wired in — the concrete capability
/// implementations themselves are out of scope; only these trait objects cross the
/// boundary, typically built from a `Registry` (`src/capabilities/registry.rs`).
pub struct Capabilities {
    pub news_sources: Vec<Arc<dyn NewsSource>>,
    pub market_platforms: Vec<Arc<dyn MarketPlatform>>,
    pub embedding_provider: Arc<dyn EmbeddingProvider>,
    pub llm_provider: Arc<dyn LLMProvider>,
    pub alert_sink: Arc<dyn AlertSink>,
}

const RETENTION_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(86_400);

pub struct Coordinator {
    store: Store,
    ingestor_runners: Vec<LoopRunner>,
    syncer_runners: Vec<LoopRunner>,
    embedding_runner: LoopRunner,
    matching_runner: LoopRunner,
    validation_runner: LoopRunner,
    retention_handle: tokio::task::JoinHandle<()>,
}

impl Coordinator {
    pub fn new(config: &Config, store: Store, caps: Capabilities) -> Self {
        let worker_backoff = BackoffConfig {
            min_delay: config.worker_poll_interval,
            ..BackoffConfig::WORKER
        };
        let platform_sync_backoff = BackoffConfig {
            min_delay: config.platform_sync_interval,
            ..BackoffConfig::PLATFORM_SYNC
        };
        let news_ingestion_backoff = BackoffConfig {
            min_delay: config.news_ingestion_interval,
            ..BackoffConfig::NEWS_INGESTION
        };

        let embedding_worker = Arc::new(EmbeddingWorker::new(
            caps.embedding_provider,
            store.clone(),
            config.embedding_batch_size,
        ));

        let platforms_by_name: HashMap<String, Arc<dyn MarketPlatform>> = caps
            .market_platforms
            .iter()
            .map(|p| (p.name().to_string(), p.clone()))
            .collect();

        let matching_worker = Arc::new(MatchingWorker::new(
            store.clone(),
            config.matching_batch_size,
            config.match_top_n,
            config.min_similarity,
        ));

        let validation_worker = Arc::new(ValidationWorker::new(
            store.clone(),
            caps.llm_provider,
            caps.alert_sink,
            platforms_by_name,
            config.validation_batch_size,
            config.validation_candidates_per_article,
            config.validation_chunk_size,
            config.min_confidence,
            config.alert_cooldown_minutes,
            config.trading_enabled,
            config.dry_run,
        ));

        let ingestor_runners = caps
            .news_sources
            .into_iter()
            .map(|source| {
                let name = format!("ingestor:{}", source.name());
                let ingestor = Arc::new(NewsIngestor::new(source, store.clone()));
                let mut runner = LoopRunner::new(name, news_ingestion_backoff);
                runner.start(move || {
                    let ingestor = ingestor.clone();
                    async move { ingestor.run_once().await }
                });
                runner
            })
            .collect();

        let syncer_runners = caps
            .market_platforms
            .into_iter()
            .map(|platform| {
                let name = format!("syncer:{}", platform.name());
                let syncer = Arc::new(
                    MarketSyncer::new(platform, store.clone()).with_embedder(embedding_worker.clone()),
                );
                let mut runner = LoopRunner::new(name, platform_sync_backoff);
                runner.start(move || {
                    let syncer = syncer.clone();
                    async move { syncer.run_once().await }
                });
                runner
            })
            .collect();

        let mut embedding_runner = LoopRunner::new("embedding", worker_backoff);
        embedding_runner.start(move || {
            let worker = embedding_worker.clone();
            async move { worker.run_once().await }
        });

        let mut matching_runner = LoopRunner::new("matching", worker_backoff);
        matching_runner.start(move || {
            let worker = matching_worker.clone();
            async move { worker.run_once().await }
        });

        let mut validation_runner = LoopRunner::new("validation", worker_backoff);
        validation_runner.start(move || {
            let worker = validation_worker.clone();
            async move { worker.run_once().await }
        });

        let retention_days = config.retention_days;
        let retention_store = store.clone();
        let retention_handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(RETENTION_SWEEP_INTERVAL).await;
                match retention_store.retention_sweep(retention_days).await {
                    Ok(deleted) if deleted > 0 => info!(deleted, "retention.swept"),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "retention sweep failed"),
                }
            }
        });

        info!("coordinator started all runners");

        Self {
            store,
            ingestor_runners,
            syncer_runners,
            embedding_runner,
            matching_runner,
            validation_runner,
            retention_handle,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Blocks until SIGINT or SIGTERM, then stops every runner in reverse dependency order:
    /// validation → matching → embedding → syncers → ingestors.
    pub async fn run_until_shutdown(mut self) -> anyhow::Result<()> {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, stopping runners");
        self.shutdown().await;
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        let _ = self.validation_runner.stop().await;
        let _ = self.matching_runner.stop().await;
        let _ = self.embedding_runner.stop().await;
        for runner in &mut self.syncer_runners {
            let _ = runner.stop().await;
        }
        for runner in &mut self.ingestor_runners {
            let _ = runner.stop().await;
        }
        self.retention_handle.abort();
        info!("all runners stopped");
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
