//! marketpulse — continuously matches incoming news against prediction-market contracts,
//! validates candidate matches with an LLM, and alerts on high-confidence ones.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use marketpulse::capabilities::registry::Registry;
use marketpulse::capabilities::{AlertSink, EmbeddingProvider, LLMProvider, MarketPlatform, NewsSource};
use marketpulse::coordinator::Capabilities;
use marketpulse::store::Store;
use marketpulse::{Config, Coordinator};
use std::collections::HashMap;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "marketpulse", version, about = "News-to-market matching pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline until SIGINT/SIGTERM.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(problems = ?e.problems, "configuration fault, refusing to start");
            std::process::exit(1);
        }
    };

    match cli.command {
        Command::Run => run(config).await,
    }
}

async fn run(config: Config) -> Result<()> {
    let store = Store::open(&config.database_path).context("failed to open store")?;
    info!(path = %config.database_path, "store opened");

    let capabilities = match resolve_capabilities(&config) {
        Ok(c) => c,
        Err(problems) => {
            error!(?problems, "configuration fault, refusing to start");
            std::process::exit(1);
        }
    };

    let coordinator = Coordinator::new(&config, store, capabilities);
    coordinator.run_until_shutdown().await
}

/// Builds the registries for each capability kind and resolves the configured names against
/// them. No concrete capability implementations are registered here — wiring a real news
/// source, market platform, embedding provider, LLM, or alert sink in is left to whoever embeds
/// this binary; an empty registry simply means every configured name fails fast with "unknown
/// capability".
fn resolve_capabilities(config: &Config) -> Result<Capabilities, Vec<String>> {
    let news_registry: Registry<dyn NewsSource> = Registry::new();
    let platform_registry: Registry<dyn MarketPlatform> = Registry::new();
    let embedding_registry: Registry<dyn EmbeddingProvider> = Registry::new();
    let llm_registry: Registry<dyn LLMProvider> = Registry::new();
    let alert_registry: Registry<dyn AlertSink> = Registry::new();

    let settings: HashMap<String, String> = std::env::vars().collect();
    let mut problems = Vec::new();

    let news_sources = config
        .news_sources
        .iter()
        .filter_map(|name| match news_registry.build(name, &settings) {
            Ok(s) => Some(s),
            Err(e) => {
                problems.push(format!("news source '{name}': {e}"));
                None
            }
        })
        .collect();

    let market_platforms = config
        .market_platforms
        .iter()
        .filter_map(|name| match platform_registry.build(name, &settings) {
            Ok(p) => Some(p),
            Err(e) => {
                problems.push(format!("market platform '{name}': {e}"));
                None
            }
        })
        .collect();

    let embedding_provider = match &config.embedding_provider {
        Some(name) => match embedding_registry.build(name, &settings) {
            Ok(p) => Some(p),
            Err(e) => {
                problems.push(format!("embedding provider '{name}': {e}"));
                None
            }
        },
        None => {
            problems.push("EMBEDDING_PROVIDER is not configured".to_string());
            None
        }
    };

    let llm_provider = match &config.llm_provider {
        Some(name) => match llm_registry.build(name, &settings) {
            Ok(p) => Some(p),
            Err(e) => {
                problems.push(format!("llm provider '{name}': {e}"));
                None
            }
        },
        None => {
            problems.push("LLM_PROVIDER is not configured".to_string());
            None
        }
    };

    let alert_sinks: Vec<(Box<dyn AlertSink>, f64)> = config
        .alert_sinks
        .iter()
        .filter_map(|name| match alert_registry.build(name, &settings) {
            Ok(s) => Some((name, s)),
            Err(e) => {
                problems.push(format!("alert sink '{name}': {e}"));
                None
            }
        })
        .map(|(name, s): (&String, std::sync::Arc<dyn AlertSink>)| -> (Box<dyn AlertSink>, f64) {
            let threshold = config
                .alert_sink_thresholds
                .get(name)
                .copied()
                .unwrap_or(config.min_confidence);
            (Box::new(ArcSink(s)), threshold)
        })
        .collect();

    if !problems.is_empty() || embedding_provider.is_none() || llm_provider.is_none() {
        return Err(problems);
    }

    Ok(Capabilities {
        news_sources,
        market_platforms,
        embedding_provider: embedding_provider.unwrap(),
        llm_provider: llm_provider.unwrap(),
        alert_sink: std::sync::Arc::new(marketpulse::capabilities::CompositeSink::new(alert_sinks)),
    })
}

/// Adapts an `Arc<dyn AlertSink>` into the `Box<dyn AlertSink>` the `CompositeSink` combinator
/// takes, since `Registry` hands back `Arc`s for shared ownership but `CompositeSink` owns its
/// sinks outright.
struct ArcSink(std::sync::Arc<dyn AlertSink>);

#[async_trait::async_trait]
impl AlertSink for ArcSink {
    fn name(&self) -> &str {
        self.0.name()
    }
    async fn send(&self, payload: &marketpulse::capabilities::AlertPayload) -> Result<()> {
        self.0.send(payload).await
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marketpulse=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
