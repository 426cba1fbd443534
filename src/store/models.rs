//! Row types for the four state-bearing entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArticleStatus {
    Pending,
    Embedded,
    Matched,
    Validated,
    Failed,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Embedded => "embedded",
            Self::Matched => "matched",
            Self::Validated => "validated",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "embedded" => Some(Self::Embedded),
            "matched" => Some(Self::Matched),
            "validated" => Some(Self::Validated),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Position {
    Buy,
    Sell,
    Hold,
}

impl Position {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Hold => "hold",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            "hold" => Some(Self::Hold),
            _ => None,
        }
    }
}

pub type Metadata = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub external_id: String,
    pub source: String,
    pub title: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub url: Option<String>,
    pub author: Option<String>,
    pub published_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub metadata: Metadata,
    pub status: ArticleStatus,
    pub embedding: Option<Vec<f32>>,
    pub embedded_at: Option<DateTime<Utc>>,
    pub matched_at: Option<DateTime<Utc>>,
    pub validated_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Fields supplied by a `NewsSource` for a brand-new article.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub external_id: String,
    pub source: String,
    pub title: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub url: Option<String>,
    pub author: Option<String>,
    pub published_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub platform: String,
    pub event_ticker: String,
    pub series_ticker: Option<String>,
    pub title: String,
    pub url: String,
    pub category: Option<String>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub last_synced_at: DateTime<Utc>,
    pub embedding: Option<Vec<f32>>,
    pub embedding_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: String,
    pub contract_ticker: String,
    pub market_id: String,
    pub title: String,
    pub yes_price: f64,
    pub no_price: f64,
    pub volume: f64,
    pub liquidity: f64,
    pub is_active: bool,
    pub last_synced_at: DateTime<Utc>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsMarketMatch {
    pub id: String,
    pub news_article_id: String,
    pub market_id: String,
    pub similarity: f64,
    pub is_validated: bool,
    pub is_relevant: Option<bool>,
    pub relevance_score: Option<f64>,
    pub confidence: Option<f64>,
    pub suggested_position: Option<Position>,
    pub reasoning: Option<String>,
    pub validated_at: Option<DateTime<Utc>>,
    pub alert_sent: bool,
    pub alert_sent_at: Option<DateTime<Utc>>,
}

/// A match row joined with its market and (at most one) active contract, as loaded for the
/// validator.
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub m: NewsMarketMatch,
    pub market: Market,
    pub contract: Option<Contract>,
}
