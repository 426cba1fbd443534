//! The four external capability traits plus the alert sink. Each is a narrow `async_trait`
//! boundary; concrete news-source, market-platform, LLM, and embedding-provider integrations are
//! out of scope — only the interfaces, their payload types, and the `CompositeSink` combinator
//! live here.

pub mod registry;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub type Metadata = HashMap<String, serde_json::Value>;

/// One item returned by a `NewsSource` fetch.
#[derive(Debug, Clone)]
pub struct NewsItem {
    pub id: String,
    pub source: String,
    pub title: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub url: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub metadata: Metadata,
}

#[async_trait]
pub trait NewsSource: Send + Sync {
    /// A stable name used only for logging; the store key is `(source, external_id)`.
    fn name(&self) -> &str;
    async fn fetch_latest(&self) -> Result<Vec<NewsItem>>;
}

/// A flat contract as returned directly by a platform, before grouping into markets.
#[derive(Debug, Clone)]
pub struct RawContract {
    pub contract_ticker: String,
    pub title: String,
    pub yes_price: f64,
    pub no_price: f64,
    pub volume: f64,
    pub liquidity: f64,
    pub end_date: Option<DateTime<Utc>>,
    pub metadata: Metadata,
}

/// A market with its contracts already grouped by the platform (the "Grouped" shape).
#[derive(Debug, Clone)]
pub struct MarketWithContracts {
    pub event_ticker: String,
    pub series_ticker: Option<String>,
    pub title: Option<String>,
    pub category: Option<String>,
    pub end_date: Option<DateTime<Utc>>,
    pub contracts: Vec<RawContract>,
}

/// The two shapes a `MarketPlatform::list_all` may return; the syncer adapts to whichever it
/// gets.
#[derive(Debug, Clone)]
pub enum PlatformListing {
    Grouped(Vec<MarketWithContracts>),
    Flat(Vec<RawContract>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub contract_ticker: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
    pub status: String,
    pub filled_qty: u64,
    pub avg_price: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait MarketPlatform: Send + Sync {
    /// Stable namespace string used as the `platform` column value.
    fn name(&self) -> &str;
    async fn list_all(&self) -> Result<PlatformListing>;
    async fn get_contract(&self, ticker: &str) -> Result<Option<RawContract>>;
    async fn place_order(&self, req: OrderRequest) -> Result<OrderAck>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds each text, returning one vector per input in the same order and a fixed
    /// per-deployment dimension.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct AlertPayload {
    pub news_title: String,
    pub news_url: Option<String>,
    pub market_title: String,
    pub market_url: String,
    pub contract_title: String,
    pub position: crate::store::models::Position,
    pub confidence: f64,
    pub current_price: f64,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    /// A stable name used for logging and for matching the sink to its configured confidence
    /// threshold.
    fn name(&self) -> &str;
    async fn send(&self, payload: &AlertPayload) -> Result<()>;
}

/// Fans a payload out to every configured sink (email + desktop + chat) — the combinator itself
/// is in scope; concrete senders are not. Each sink carries its own confidence threshold, applied
/// before that sink is called; a payload below one sink's threshold can still reach another.
pub struct CompositeSink {
    sinks: Vec<(Box<dyn AlertSink>, f64)>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<(Box<dyn AlertSink>, f64)>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AlertSink for CompositeSink {
    fn name(&self) -> &str {
        "composite"
    }

    async fn send(&self, payload: &AlertPayload) -> Result<()> {
        let mut called = 0usize;
        let mut first_err = None;
        for (sink, threshold) in &self.sinks {
            if payload.confidence < *threshold {
                tracing::info!(
                    sink = sink.name(),
                    confidence = payload.confidence,
                    threshold,
                    "alert below sink's confidence threshold, skipping"
                );
                continue;
            }
            called += 1;
            if let Err(e) = sink.send(payload).await {
                tracing::warn!(sink = sink.name(), error = %e, "alert sink failed, continuing with remaining sinks");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) if called == 1 => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingSink {
        name: &'static str,
        sent: Arc<Mutex<Vec<f64>>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        fn name(&self) -> &str {
            self.name
        }
        async fn send(&self, payload: &AlertPayload) -> Result<()> {
            self.sent.lock().unwrap().push(payload.confidence);
            Ok(())
        }
    }

    fn payload(confidence: f64) -> AlertPayload {
        AlertPayload {
            news_title: "Fed cuts rates".to_string(),
            news_url: None,
            market_title: "Fed Rate Decision".to_string(),
            market_url: "https://kalshi/market/fed".to_string(),
            contract_title: "Cut 25bps".to_string(),
            position: crate::store::models::Position::Buy,
            confidence,
            current_price: 0.6,
            reasoning: "test".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn below_sink_threshold_is_skipped_even_above_global_minimum() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            name: "email",
            sent: sent.clone(),
        };
        let composite = CompositeSink::new(vec![(Box::new(sink), 0.9)]);

        // A confidence of 0.75 clears a typical global `min_confidence` of 0.7 but not this
        // sink's own 0.9 threshold.
        composite.send(&payload(0.75)).await.unwrap();
        composite.send(&payload(0.95)).await.unwrap();

        assert_eq!(&*sent.lock().unwrap(), &[0.95]);
    }

    #[tokio::test]
    async fn each_sink_applies_its_own_threshold_independently() {
        let low_sent = Arc::new(Mutex::new(Vec::new()));
        let high_sent = Arc::new(Mutex::new(Vec::new()));
        let low = RecordingSink {
            name: "desktop",
            sent: low_sent.clone(),
        };
        let high = RecordingSink {
            name: "email",
            sent: high_sent.clone(),
        };
        let composite = CompositeSink::new(vec![(Box::new(low), 0.5), (Box::new(high), 0.9)]);

        composite.send(&payload(0.6)).await.unwrap();

        assert_eq!(&*low_sent.lock().unwrap(), &[0.6]);
        assert!(high_sent.lock().unwrap().is_empty());
    }
}
