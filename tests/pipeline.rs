//! Drives a full `PENDING → VALIDATED` cycle against fake capability implementations and a
//! `tempfile`-backed store, the same shape as the teacher's `tests/backtest_run_integration.rs`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use marketpulse::capabilities::{
    AlertPayload, AlertSink, EmbeddingProvider, LLMProvider, MarketPlatform, Metadata, NewsItem,
    NewsSource, OrderAck, OrderRequest, PlatformListing, RawContract,
};
use marketpulse::embedding::EmbeddingWorker;
use marketpulse::ingest::NewsIngestor;
use marketpulse::matching::MatchingWorker;
use marketpulse::store::Store;
use marketpulse::sync::MarketSyncer;
use marketpulse::validation::ValidationWorker;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct FakeSource {
    items: Mutex<Vec<NewsItem>>,
}

#[async_trait]
impl NewsSource for FakeSource {
    fn name(&self) -> &str {
        "wire"
    }
    async fn fetch_latest(&self) -> Result<Vec<NewsItem>> {
        Ok(self.items.lock().unwrap().clone())
    }
}

struct FakePlatform {
    contracts: Mutex<Vec<RawContract>>,
}

#[async_trait]
impl MarketPlatform for FakePlatform {
    fn name(&self) -> &str {
        "kalshi"
    }
    async fn list_all(&self) -> Result<PlatformListing> {
        Ok(PlatformListing::Flat(self.contracts.lock().unwrap().clone()))
    }
    async fn get_contract(&self, _ticker: &str) -> Result<Option<RawContract>> {
        Ok(None)
    }
    async fn place_order(&self, _req: OrderRequest) -> Result<OrderAck> {
        unimplemented!("trading is disabled in this test")
    }
}

/// Embeds everything to the same fixed vector, so every article/market pair is a perfect cosine
/// match regardless of its actual text.
struct FixedEmbedder;

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }
}

/// Answers the article-parse prompt with a fixed insight, and the chunk-validation prompt with a
/// single relevant, high-confidence "buy" for whichever contract id it's asked about.
struct ScriptedLlm;

#[async_trait]
impl LLMProvider for ScriptedLlm {
    async fn complete(&self, prompt: &str, _system: Option<&str>) -> Result<String> {
        if prompt.contains("Extract entities") {
            return Ok(r#"{"entities": ["Fed"], "events": ["rate cut"], "sentiment": "positive", "relevance_score": 0.9}"#.to_string());
        }

        let contract_id = prompt
            .lines()
            .find(|l| l.trim_start().starts_with("- id="))
            .and_then(|l| l.trim_start().strip_prefix("- id="))
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();

        Ok(format!(
            r#"```json
[{{"contract_id": "{contract_id}", "is_relevant": true, "relevance_score": 0.9,
"reasoning": "Fed rate cut directly resolves this contract", "suggested_position": "buy",
"confidence": 0.95}}]
```"#
        ))
    }
}

struct RecordingSink {
    sent: Mutex<Vec<AlertPayload>>,
}

#[async_trait]
impl AlertSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }
    async fn send(&self, payload: &AlertPayload) -> Result<()> {
        self.sent.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

fn contract(ticker: &str, title: &str) -> RawContract {
    RawContract {
        contract_ticker: ticker.to_string(),
        title: title.to_string(),
        yes_price: 0.62,
        no_price: 0.38,
        volume: 10_000.0,
        liquidity: 5_000.0,
        end_date: None,
        metadata: Metadata::new(),
    }
}

fn news_item(id: &str, title: &str) -> NewsItem {
    NewsItem {
        id: id.to_string(),
        source: "wire".to_string(),
        title: title.to_string(),
        content: Some("The Federal Reserve cut interest rates by 25 basis points today.".to_string()),
        summary: None,
        url: Some("https://wire.example/a".to_string()),
        author: None,
        published_at: None,
        tags: vec![],
        metadata: Metadata::new(),
    }
}

#[tokio::test]
async fn full_pipeline_matches_validates_and_alerts_once_within_cooldown() {
    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("pipeline.db");
    let store = Store::open(db_path.to_str().unwrap()).unwrap();

    let embedder = Arc::new(EmbeddingWorker::new(Arc::new(FixedEmbedder), store.clone(), 50));

    let platform = Arc::new(FakePlatform {
        contracts: Mutex::new(vec![
            contract("KXFED-25MAR-Y", "Fed cuts rates by 25bps"),
            contract("KXFED-25MAR-N", "Fed does not cut rates"),
        ]),
    });
    let syncer = MarketSyncer::new(platform.clone(), store.clone()).with_embedder(embedder.clone());
    syncer.run_once().await;

    let source = Arc::new(FakeSource {
        items: Mutex::new(vec![news_item("a1", "Fed Announces Surprise Rate Cut")]),
    });
    let ingestor = NewsIngestor::new(source, store.clone());
    ingestor.run_once().await;

    embedder.run_once().await;
    let pending = store.claim_pending_articles(10).await.unwrap();
    assert!(pending.is_empty(), "article should have been embedded");

    let matcher = MatchingWorker::new(store.clone(), 10, 20, 0.1);
    matcher.run_once().await;

    let alert_sink = Arc::new(RecordingSink {
        sent: Mutex::new(Vec::new()),
    });
    let mut platforms_by_name: HashMap<String, Arc<dyn MarketPlatform>> = HashMap::new();
    platforms_by_name.insert("kalshi".to_string(), platform.clone());

    let validator = ValidationWorker::new(
        store.clone(),
        Arc::new(ScriptedLlm),
        alert_sink.clone(),
        platforms_by_name,
        10,
        10,
        10,
        0.7,
        60,
        false,
        true,
    );
    validator.run_once().await;

    assert_eq!(alert_sink.sent.lock().unwrap().len(), 1, "exactly one alert expected");

    // A second validation pass (simulating a re-run before the cooldown elapses) must not
    // re-send, since the match is already validated and `alert_sent` is set.
    validator.run_once().await;
    assert_eq!(alert_sink.sent.lock().unwrap().len(), 1, "cooldown/validated guard should suppress re-alert");
}

#[tokio::test]
async fn sync_then_resync_without_market_deactivates_it() {
    let store = Store::open_in_memory().unwrap();
    let platform = Arc::new(FakePlatform {
        contracts: Mutex::new(vec![contract("KXGDP-25Q1-Y", "GDP grows above 2%")]),
    });
    let syncer = MarketSyncer::new(platform.clone(), store.clone());
    syncer.run_once().await;

    platform.contracts.lock().unwrap().clear();
    syncer.run_once().await;

    let markets = store
        .get_markets_by_ids(&["nonexistent".to_string()])
        .await
        .unwrap();
    assert!(markets.is_empty());
}

#[tokio::test]
async fn embedding_failure_marks_article_failed_not_silently_dropped() {
    struct BrokenEmbedder;
    #[async_trait]
    impl EmbeddingProvider for BrokenEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(anyhow::anyhow!("upstream outage"))
        }
    }

    let store = Store::open_in_memory().unwrap();
    let source = Arc::new(FakeSource {
        items: Mutex::new(vec![news_item("b1", "Some headline")]),
    });
    NewsIngestor::new(source, store.clone()).run_once().await;

    let worker = EmbeddingWorker::new(Arc::new(BrokenEmbedder), store.clone(), 10);
    worker.run_once().await;

    let claimed = store.claim_pending_articles(10).await.unwrap();
    assert!(claimed.is_empty(), "failed articles must not remain claimable as pending");
}
