//! ValidationWorker: asks the LLM which candidate contracts are actionable, writes the
//! relevance/confidence/position columns, emits alerts above threshold.

use crate::capabilities::{
    AlertPayload, AlertSink, LLMProvider, MarketPlatform, OrderRequest, OrderSide, OrderType,
};
use crate::runner::WorkerOutcome;
use crate::store::matches::ValidationWrite;
use crate::store::models::{Article, MatchCandidate, Position};
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const POSITIVE_WORDS: &[&str] = &[
    "surge", "growth", "gain", "rally", "beat", "strong", "win", "approve", "rise", "boost",
    "record", "upgrade", "recovery",
];
const NEGATIVE_WORDS: &[&str] = &[
    "crash", "plunge", "loss", "decline", "fail", "weak", "default", "reject", "fall", "cut",
    "downgrade", "recession", "crisis",
];

#[derive(Debug, Clone, Default)]
struct Insight {
    entities: Vec<String>,
    events: Vec<String>,
    relevance_score: f64,
    sentiment: String,
}

#[derive(Debug, Clone, serde::Deserialize, Default)]
struct RawContractValidation {
    contract_id: Option<String>,
    is_relevant: Option<bool>,
    relevance_score: Option<f64>,
    matched_entities: Option<Vec<String>>,
    matched_events: Option<Vec<String>>,
    reasoning: Option<String>,
    suggested_position: Option<String>,
    confidence: Option<f64>,
}

#[derive(Debug, Clone)]
struct ContractValidation {
    contract_id: String,
    is_relevant: bool,
    relevance_score: f64,
    reasoning: String,
    suggested_position: Position,
    confidence: f64,
}

fn synthesized_default(contract_id: &str) -> ContractValidation {
    ContractValidation {
        contract_id: contract_id.to_string(),
        is_relevant: false,
        relevance_score: 0.0,
        reasoning: "validation unavailable, defaulted to hold".to_string(),
        suggested_position: Position::Hold,
        confidence: 0.0,
    }
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

pub struct ValidationWorker {
    store: Store,
    llm: Arc<dyn LLMProvider>,
    alert_sink: Arc<dyn AlertSink>,
    platforms: HashMap<String, Arc<dyn MarketPlatform>>,
    batch_size: i64,
    candidates_per_article: i64,
    chunk_size: usize,
    min_confidence: f64,
    cooldown: chrono::Duration,
    trading_enabled: bool,
    dry_run: bool,
    alert_history: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl ValidationWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        llm: Arc<dyn LLMProvider>,
        alert_sink: Arc<dyn AlertSink>,
        platforms: HashMap<String, Arc<dyn MarketPlatform>>,
        batch_size: i64,
        candidates_per_article: i64,
        chunk_size: i64,
        min_confidence: f64,
        cooldown_minutes: i64,
        trading_enabled: bool,
        dry_run: bool,
    ) -> Self {
        Self {
            store,
            llm,
            alert_sink,
            platforms,
            batch_size,
            candidates_per_article,
            chunk_size: chunk_size.max(1) as usize,
            min_confidence,
            cooldown: chrono::Duration::minutes(cooldown_minutes),
            trading_enabled,
            dry_run,
            alert_history: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run_once(&self) -> WorkerOutcome {
        let claimed = match self
            .store
            .claim_matched_articles_needing_validation(self.batch_size)
            .await
        {
            Ok(a) => a,
            Err(e) => return WorkerOutcome::Failed(format!("claim matched articles: {e}")),
        };
        if claimed.is_empty() {
            return WorkerOutcome::Idle;
        }

        let mut validated_any = false;
        for article in claimed {
            match self.validate_article(&article).await {
                Ok(count) => {
                    if count > 0 {
                        validated_any = true;
                    }
                    info!(article_id = %article.id, count, "match.validated");
                }
                Err(e) => {
                    warn!(article_id = %article.id, error = %e, "validation failed for article");
                }
            }
        }

        if validated_any {
            WorkerOutcome::Worked
        } else {
            WorkerOutcome::Idle
        }
    }

    async fn validate_article(&self, article: &Article) -> anyhow::Result<usize> {
        let candidates = self
            .store
            .load_validation_candidates(&article.id, self.candidates_per_article)
            .await?;
        if candidates.is_empty() {
            return Ok(0);
        }

        let insight = self.parse_article(article).await;

        let mut validated_count = 0usize;
        for chunk in candidates.chunks(self.chunk_size) {
            let results = match self.validate_chunk(chunk, &insight).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(article_id = %article.id, error = %e, "chunk validation failed, falling back per contract");
                    let mut per_contract = Vec::with_capacity(chunk.len());
                    for candidate in chunk {
                        per_contract.push(self.validate_one_contract(candidate, &insight).await);
                    }
                    per_contract
                }
            };

            for (candidate, validation) in chunk.iter().zip(results.into_iter()) {
                self.store
                    .write_validation(&ValidationWrite {
                        match_id: candidate.m.id.clone(),
                        is_relevant: validation.is_relevant,
                        relevance_score: validation.relevance_score,
                        confidence: validation.confidence,
                        suggested_position: validation.suggested_position,
                        reasoning: validation.reasoning.clone(),
                    })
                    .await?;
                validated_count += 1;

                if validation.is_relevant
                    && validation.confidence >= self.min_confidence
                    && validation.suggested_position != Position::Hold
                {
                    self.emit_alert(article, candidate, &validation).await;
                }
            }
        }

        if self.store.all_matches_validated(&article.id).await? {
            self.store.set_article_validated(&article.id).await?;
        }

        Ok(validated_count)
    }

    /// Parses the article via the LLM into a structured insight; falls back to a
    /// keyword-based sentiment heuristic when the LLM call or parse fails.
    async fn parse_article(&self, article: &Article) -> Insight {
        let prompt = format!(
            "Extract entities, events, and sentiment from this news article as JSON: \
             {{\"entities\": [...], \"events\": [...], \"sentiment\": \"positive|negative|neutral\", \
             \"relevance_score\": 0.0-1.0}}.\n\nTitle: {}\n\n{}",
            article.title,
            article.content.as_deref().unwrap_or(""),
        );
        let response = match self.llm.complete(&prompt, Some("You are a news analyst.")).await {
            Ok(r) => r,
            Err(e) => {
                warn!(article_id = %article.id, error = %e, "article parse LLM call failed, using keyword heuristic");
                return keyword_sentiment_insight(article);
            }
        };

        match extract_json_object(&response).and_then(|s| serde_json::from_str::<RawInsight>(&s).ok()) {
            Some(raw) => Insight {
                entities: raw.entities.unwrap_or_default(),
                events: raw.events.unwrap_or_default(),
                relevance_score: clamp01(raw.relevance_score.unwrap_or(0.5)),
                sentiment: raw.sentiment.unwrap_or_else(|| "neutral".to_string()),
            },
            None => keyword_sentiment_insight(article),
        }
    }

    /// One LLM call for up to `chunk_size` candidates.
    async fn validate_chunk(
        &self,
        chunk: &[MatchCandidate],
        insight: &Insight,
    ) -> anyhow::Result<Vec<ContractValidation>> {
        let prompt = build_chunk_prompt(chunk, insight);
        let response = self
            .llm
            .complete(&prompt, Some("You are a prediction-market analyst."))
            .await?;
        let recovered = extract_json_array(&response)
            .ok_or_else(|| anyhow::anyhow!("no JSON array found in LLM response"))?;
        let raw: Vec<RawContractValidation> = serde_json::from_str(&recovered)
            .map_err(|e| anyhow::anyhow!("LLM response array did not parse: {e}"))?;

        let by_id: HashMap<String, RawContractValidation> = raw
            .into_iter()
            .filter_map(|r| r.contract_id.clone().map(|id| (id, r)))
            .collect();

        Ok(chunk
            .iter()
            .map(|candidate| {
                let contract_id = candidate
                    .contract
                    .as_ref()
                    .map(|c| c.id.clone())
                    .unwrap_or_else(|| candidate.market.id.clone());
                match by_id.get(&contract_id) {
                    Some(r) => ContractValidation {
                        contract_id: contract_id.clone(),
                        is_relevant: r.is_relevant.unwrap_or(false),
                        relevance_score: clamp01(r.relevance_score.unwrap_or(0.0)),
                        reasoning: r.reasoning.clone().unwrap_or_default(),
                        suggested_position: r
                            .suggested_position
                            .as_deref()
                            .and_then(Position::parse)
                            .unwrap_or(Position::Hold),
                        confidence: clamp01(r.confidence.unwrap_or(0.0)),
                    },
                    None => synthesized_default(&contract_id),
                }
            })
            .collect())
    }

    /// Single-contract fallback when the whole chunk call failed to parse. Tries
    /// one more direct LLM call; if that also fails, falls back to keyword matching.
    async fn validate_one_contract(
        &self,
        candidate: &MatchCandidate,
        insight: &Insight,
    ) -> ContractValidation {
        match self.validate_chunk(std::slice::from_ref(candidate), insight).await {
            Ok(mut results) if !results.is_empty() => results.remove(0),
            _ => keyword_match_contract(candidate, insight),
        }
    }

    async fn emit_alert(
        &self,
        article: &Article,
        candidate: &MatchCandidate,
        validation: &ContractValidation,
    ) {
        let market_url = candidate.market.url.clone();

        {
            let mut history = self.alert_history.lock().unwrap();
            if let Some(last_sent) = history.get(&market_url) {
                if Utc::now() - *last_sent < self.cooldown {
                    info!(market_url = %market_url, "alert.suppressed.cooldown");
                    return;
                }
            }
        }

        let Some(contract) = &candidate.contract else {
            return;
        };
        let current_price = match validation.suggested_position {
            Position::Buy => contract.yes_price,
            _ => contract.no_price,
        };

        let payload = AlertPayload {
            news_title: article.title.clone(),
            news_url: article.url.clone(),
            market_title: candidate.market.title.clone(),
            market_url: market_url.clone(),
            contract_title: contract.title.clone(),
            position: validation.suggested_position,
            confidence: validation.confidence,
            current_price,
            reasoning: validation.reasoning.clone(),
            timestamp: Utc::now(),
        };

        match self.alert_sink.send(&payload).await {
            Ok(()) => {
                self.alert_history
                    .lock()
                    .unwrap()
                    .insert(market_url.clone(), Utc::now());
                if let Err(e) = self.store.mark_alert_sent(&candidate.m.id).await {
                    warn!(match_id = %candidate.m.id, error = %e, "failed to mark alert sent");
                }
                info!(market_url = %market_url, "alert.sent");
                self.maybe_place_order(candidate, contract, validation).await;
            }
            Err(e) => warn!(market_url = %market_url, error = %e, "alert sink failed"),
        }
    }

    /// Order placement: `quantity = 10 * floor(confidence * 5)`, limit
    /// order at `current_price`. Dry-run/disabled just logs intent.
    async fn maybe_place_order(
        &self,
        candidate: &MatchCandidate,
        contract: &crate::store::models::Contract,
        validation: &ContractValidation,
    ) {
        let quantity = 10 * (validation.confidence * 5.0).floor() as u64;
        let side = match validation.suggested_position {
            Position::Buy => OrderSide::Yes,
            Position::Sell => OrderSide::No,
            Position::Hold => return,
        };
        let price = match side {
            OrderSide::Yes => contract.yes_price,
            OrderSide::No => contract.no_price,
        };

        if !self.trading_enabled || self.dry_run {
            info!(
                contract = %contract.contract_ticker,
                quantity,
                price,
                dry_run = self.dry_run,
                "position created (simulated)"
            );
            return;
        }

        let Some(platform) = self.platforms.get(&candidate.market.platform) else {
            warn!(platform = %candidate.market.platform, "no platform capability registered, skipping order");
            return;
        };

        let req = OrderRequest {
            contract_ticker: contract.contract_ticker.clone(),
            side,
            quantity,
            order_type: OrderType::Limit,
            limit_price: Some(price),
        };
        match platform.place_order(req).await {
            Ok(ack) => info!(order_id = %ack.order_id, "order placed"),
            Err(e) => warn!(contract = %contract.contract_ticker, error = %e, "order placement failed"),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize, Default)]
struct RawInsight {
    entities: Option<Vec<String>>,
    events: Option<Vec<String>>,
    sentiment: Option<String>,
    relevance_score: Option<f64>,
}

fn keyword_sentiment_insight(article: &Article) -> Insight {
    let haystack = format!(
        "{} {}",
        article.title.to_lowercase(),
        article.content.as_deref().unwrap_or("").to_lowercase()
    );
    let positive = POSITIVE_WORDS.iter().filter(|w| haystack.contains(*w)).count();
    let negative = NEGATIVE_WORDS.iter().filter(|w| haystack.contains(*w)).count();
    let sentiment = if positive > negative {
        "positive"
    } else if negative > positive {
        "negative"
    } else {
        "neutral"
    };
    Insight {
        entities: Vec::new(),
        events: Vec::new(),
        relevance_score: 0.5,
        sentiment: sentiment.to_string(),
    }
}

/// Keyword matching fallback: entity names and event words of at least 4
/// characters matched case-insensitively against the contract title.
fn keyword_match_contract(candidate: &MatchCandidate, insight: &Insight) -> ContractValidation {
    let contract_id = candidate
        .contract
        .as_ref()
        .map(|c| c.id.clone())
        .unwrap_or_else(|| candidate.market.id.clone());
    let title = candidate
        .contract
        .as_ref()
        .map(|c| c.title.to_lowercase())
        .unwrap_or_else(|| candidate.market.title.to_lowercase());

    let words = insight
        .entities
        .iter()
        .chain(insight.events.iter())
        .flat_map(|s| s.split_whitespace())
        .filter(|w| w.chars().count() >= 4)
        .map(|w| w.to_lowercase());

    let matched = words.filter(|w| title.contains(w.as_str())).count();
    let is_relevant = matched > 0;
    let position = if !is_relevant {
        Position::Hold
    } else if insight.sentiment == "positive" {
        Position::Buy
    } else if insight.sentiment == "negative" {
        Position::Sell
    } else {
        Position::Hold
    };

    ContractValidation {
        contract_id,
        is_relevant,
        relevance_score: if is_relevant { 0.5 } else { 0.0 },
        reasoning: format!("keyword fallback: {matched} matched term(s)"),
        suggested_position: position,
        confidence: if is_relevant { 0.5 } else { 0.0 },
    }
}

fn build_chunk_prompt(chunk: &[MatchCandidate], insight: &Insight) -> String {
    let mut lines = vec![
        "Given the article analysis below, score each contract's relevance to the news.".to_string(),
        format!(
            "Article sentiment: {}. Relevance score: {:.2}. Entities: {}.",
            insight.sentiment,
            insight.relevance_score,
            insight.entities.join(", ")
        ),
        "Respond with a JSON array, one object per contract: {\"contract_id\", \"is_relevant\", \
         \"relevance_score\", \"reasoning\", \"suggested_position\" (buy|sell|hold), \"confidence\"}."
            .to_string(),
        "Contracts:".to_string(),
    ];
    for candidate in chunk {
        let contract_id = candidate
            .contract
            .as_ref()
            .map(|c| c.id.clone())
            .unwrap_or_else(|| candidate.market.id.clone());
        let title = candidate
            .contract
            .as_ref()
            .map(|c| c.title.clone())
            .unwrap_or_else(|| candidate.market.title.clone());
        lines.push(format!("- id={contract_id} title=\"{title}\""));
    }
    lines.join("\n")
}

/// Strips a fenced code block wrapper (```json ... ``` or ``` ... ```) if present.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let after_open = after_open.strip_prefix("json").unwrap_or(after_open);
    let after_open = after_open.strip_prefix('\n').unwrap_or(after_open);
    after_open.rfind("```").map(|idx| &after_open[..idx]).unwrap_or(after_open).trim()
}

/// Locates the first balanced `[...]` in `text`, tracking string/escape state so brackets inside
/// string literals don't confuse the walk.
fn extract_json_array(text: &str) -> Option<String> {
    find_balanced(strip_fences(text), '[', ']')
}

fn extract_json_object(text: &str) -> Option<String> {
    find_balanced(strip_fences(text), '{', '}')
}

fn find_balanced(text: &str, open: char, close: char) -> Option<String> {
    let start = text.find(open)?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(text[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_array_strips_fenced_block() {
        let text = "Here you go:\n```json\n[{\"a\": 1}]\n```\nthanks";
        assert_eq!(extract_json_array(text).unwrap(), "[{\"a\": 1}]");
    }

    #[test]
    fn extract_json_array_ignores_brackets_inside_strings() {
        let text = "[{\"reasoning\": \"uses [brackets] inside\"}]";
        let recovered = extract_json_array(text).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&recovered).unwrap();
        assert!(parsed.is_array());
    }

    #[test]
    fn extract_json_array_returns_none_without_brackets() {
        assert!(extract_json_array("not json at all").is_none());
    }

    #[test]
    fn keyword_sentiment_detects_positive_words() {
        let article = Article {
            id: "1".to_string(),
            external_id: "e".to_string(),
            source: "s".to_string(),
            title: "Stocks rally on strong earnings".to_string(),
            content: None,
            summary: None,
            url: None,
            author: None,
            published_at: Utc::now(),
            tags: vec![],
            metadata: Default::default(),
            status: crate::store::models::ArticleStatus::Matched,
            embedding: None,
            embedded_at: None,
            matched_at: None,
            validated_at: None,
            error_message: None,
            fetched_at: Utc::now(),
        };
        let insight = keyword_sentiment_insight(&article);
        assert_eq!(insight.sentiment, "positive");
    }
}
