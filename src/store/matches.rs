//! Match insert, cosine top-k query, validation candidate loading and write-back
//!

use super::markets::{row_to_contract, row_to_market, CONTRACT_COLUMNS, MARKET_COLUMNS};
use super::models::{Contract, Market, MatchCandidate, NewsMarketMatch, Position};
use super::vector::pack;
use super::Store;
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Row};

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

fn opt_ts(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.map(from_ts)
}

const MATCH_COLUMNS: &str = "id, news_article_id, market_id, similarity, is_validated, \
     is_relevant, relevance_score, confidence, suggested_position, reasoning, validated_at, \
     alert_sent, alert_sent_at";

fn row_to_match(row: &Row) -> rusqlite::Result<NewsMarketMatch> {
    let suggested: Option<String> = row.get("suggested_position")?;
    Ok(NewsMarketMatch {
        id: row.get("id")?,
        news_article_id: row.get("news_article_id")?,
        market_id: row.get("market_id")?,
        similarity: row.get("similarity")?,
        is_validated: row.get::<_, i64>("is_validated")? != 0,
        is_relevant: row
            .get::<_, Option<i64>>("is_relevant")?
            .map(|v| v != 0),
        relevance_score: row.get("relevance_score")?,
        confidence: row.get("confidence")?,
        suggested_position: suggested.and_then(|s| Position::parse(&s)),
        reasoning: row.get("reasoning")?,
        validated_at: opt_ts(row.get("validated_at")?),
        alert_sent: row.get::<_, i64>("alert_sent")? != 0,
        alert_sent_at: opt_ts(row.get("alert_sent_at")?),
    })
}

/// A market ranked against a query vector, as returned by the cosine top-k query.
#[derive(Debug, Clone)]
pub struct RankedMarket {
    pub market_id: String,
    pub similarity: f64,
}

#[derive(Debug, Clone)]
pub struct ValidationWrite {
    pub match_id: String,
    pub is_relevant: bool,
    pub relevance_score: f64,
    pub confidence: f64,
    pub suggested_position: Position,
    pub reasoning: String,
}

impl Store {
    /// Top-k active markets with a non-null embedding, ranked by cosine similarity descending,
    /// filtered to `similarity >= min_similarity`.
    pub async fn top_k_markets(
        &self,
        query_vector: &[f32],
        top_n: i64,
        min_similarity: f64,
    ) -> Result<Vec<RankedMarket>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, cosine_similarity(embedding, ?1) AS sim FROM markets \
             WHERE is_active = 1 AND embedding IS NOT NULL AND sim >= ?2 \
             ORDER BY sim DESC LIMIT ?3",
        )?;
        let packed = pack(query_vector);
        let rows = stmt
            .query_map(params![packed, min_similarity, top_n], |row| {
                Ok(RankedMarket {
                    market_id: row.get(0)?,
                    similarity: row.get(1)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Inserts a match row, ignoring a duplicate `(news_article_id, market_id)`.
    pub async fn insert_match_if_absent(
        &self,
        article_id: &str,
        market_id: &str,
        similarity: f64,
    ) -> Result<()> {
        let id = uuid::Uuid::new_v4().to_string();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO news_market_matches \
             (id, news_article_id, market_id, similarity, is_validated, is_relevant, \
              relevance_score, confidence, suggested_position, reasoning, validated_at, \
              alert_sent, alert_sent_at) \
             VALUES (?1, ?2, ?3, ?4, 0, NULL, NULL, NULL, NULL, NULL, NULL, 0, NULL)",
            params![id, article_id, market_id, similarity],
        )
        .context("insert match")?;
        Ok(())
    }

    /// Up to `limit` highest-similarity unvalidated matches for an article, each joined with its
    /// market and (at most one) active contract.
    pub async fn load_validation_candidates(
        &self,
        article_id: &str,
        limit: i64,
    ) -> Result<Vec<MatchCandidate>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {MATCH_COLUMNS} FROM news_market_matches \
             WHERE news_article_id = ?1 AND is_validated = 0 \
             ORDER BY similarity DESC LIMIT ?2"
        );
        let matches: Vec<NewsMarketMatch> = {
            let mut stmt = conn.prepare_cached(&sql)?;
            stmt.query_map(params![article_id, limit], row_to_match)?
                .filter_map(|r| r.ok())
                .collect()
        };

        let mut out = Vec::with_capacity(matches.len());
        for m in matches {
            let market_sql = format!("SELECT {MARKET_COLUMNS} FROM markets WHERE id = ?1");
            let market: Market = conn
                .query_row(&market_sql, params![m.market_id], row_to_market)
                .context("load market for candidate")?;

            let contract_sql = format!(
                "SELECT {CONTRACT_COLUMNS} FROM contracts WHERE market_id = ?1 AND is_active = 1 \
                 ORDER BY volume DESC LIMIT 1"
            );
            let contract: Option<Contract> = conn
                .query_row(&contract_sql, params![m.market_id], row_to_contract)
                .ok();

            out.push(MatchCandidate {
                m,
                market,
                contract,
            });
        }
        Ok(out)
    }

    /// Writes the four LLM-derived columns and marks the match validated.
    pub async fn write_validation(&self, w: &ValidationWrite) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE news_market_matches SET is_validated = 1, is_relevant = ?1, \
             relevance_score = ?2, confidence = ?3, suggested_position = ?4, reasoning = ?5, \
             validated_at = ?6 WHERE id = ?7",
            params![
                w.is_relevant as i64,
                w.relevance_score,
                w.confidence,
                w.suggested_position.as_str(),
                w.reasoning,
                ts(Utc::now()),
                w.match_id,
            ],
        )
        .context("write validation")?;
        Ok(())
    }

    pub async fn mark_alert_sent(&self, match_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE news_market_matches SET alert_sent = 1, alert_sent_at = ?1 WHERE id = ?2",
            params![ts(Utc::now()), match_id],
        )
        .context("mark alert sent")?;
        Ok(())
    }

    /// Whether every match for `article_id` has been validated.
    pub async fn all_matches_validated(&self, article_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let remaining: i64 = conn.query_row(
            "SELECT COUNT(*) FROM news_market_matches WHERE news_article_id = ?1 AND is_validated = 0",
            params![article_id],
            |r| r.get(0),
        )?;
        Ok(remaining == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::markets::UpsertMarketInput;

    #[tokio::test]
    async fn duplicate_match_insert_is_ignored() {
        let store = Store::open_in_memory().unwrap();
        let (market_id, _) = store
            .upsert_market(UpsertMarketInput {
                platform: "kalshi".to_string(),
                event_ticker: "KX-A".to_string(),
                series_ticker: None,
                title: "A".to_string(),
                url: "https://x/a".to_string(),
                category: None,
                end_date: None,
            })
            .await
            .unwrap();
        store
            .insert_match_if_absent("article-1", &market_id, 0.5)
            .await
            .unwrap();
        store
            .insert_match_if_absent("article-1", &market_id, 0.9)
            .await
            .unwrap();

        let conn = store.conn.lock().await;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM news_market_matches WHERE news_article_id = 'article-1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn top_k_filters_below_min_similarity() {
        let store = Store::open_in_memory().unwrap();
        let (market_id, _) = store
            .upsert_market(UpsertMarketInput {
                platform: "kalshi".to_string(),
                event_ticker: "KX-A".to_string(),
                series_ticker: None,
                title: "A".to_string(),
                url: "https://x/a".to_string(),
                category: None,
                end_date: None,
            })
            .await
            .unwrap();
        store
            .set_market_embedding(&market_id, &[1.0, 0.0, 0.0])
            .await
            .unwrap();

        let close = store.top_k_markets(&[1.0, 0.0, 0.0], 10, 0.3).await.unwrap();
        assert_eq!(close.len(), 1);

        let far = store.top_k_markets(&[0.0, 1.0, 0.0], 10, 0.3).await.unwrap();
        assert!(far.is_empty());
    }
}
