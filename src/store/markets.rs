//! Market/Contract upsert by natural key, batched deactivation.

use super::models::{Contract, Market, Metadata};
use super::vector::{pack, unpack};
use super::Store;
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashSet;

/// Bound-parameter headroom for `IN (...)` deactivation statements.
pub const DEACTIVATE_BATCH_SIZE: usize = 10_000;

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

fn opt_ts(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.map(from_ts)
}

pub(crate) const MARKET_COLUMNS: &str = "id, platform, event_ticker, series_ticker, title, url, category, \
     end_date, is_active, last_synced_at, embedding, embedding_updated_at";

pub(crate) fn row_to_market(row: &Row) -> rusqlite::Result<Market> {
    let embedding_blob: Option<Vec<u8>> = row.get("embedding")?;
    Ok(Market {
        id: row.get("id")?,
        platform: row.get("platform")?,
        event_ticker: row.get("event_ticker")?,
        series_ticker: row.get("series_ticker")?,
        title: row.get("title")?,
        url: row.get("url")?,
        category: row.get("category")?,
        end_date: opt_ts(row.get("end_date")?),
        is_active: row.get::<_, i64>("is_active")? != 0,
        last_synced_at: from_ts(row.get("last_synced_at")?),
        embedding: embedding_blob.map(|b| unpack(&b)),
        embedding_updated_at: opt_ts(row.get("embedding_updated_at")?),
    })
}

pub(crate) const CONTRACT_COLUMNS: &str = "id, contract_ticker, market_id, title, yes_price, no_price, \
     volume, liquidity, is_active, last_synced_at, metadata";

pub(crate) fn row_to_contract(row: &Row) -> rusqlite::Result<Contract> {
    let metadata_json: String = row.get("metadata")?;
    Ok(Contract {
        id: row.get("id")?,
        contract_ticker: row.get("contract_ticker")?,
        market_id: row.get("market_id")?,
        title: row.get("title")?,
        yes_price: row.get("yes_price")?,
        no_price: row.get("no_price")?,
        volume: row.get("volume")?,
        liquidity: row.get("liquidity")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        last_synced_at: from_ts(row.get("last_synced_at")?),
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
    })
}

#[derive(Debug, Clone)]
pub struct UpsertMarketInput {
    pub platform: String,
    pub event_ticker: String,
    pub series_ticker: Option<String>,
    pub title: String,
    pub url: String,
    pub category: Option<String>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct UpsertMarketOutcome {
    pub created: bool,
    pub title_changed: bool,
}

#[derive(Debug, Clone)]
pub struct UpsertContractInput {
    pub contract_ticker: String,
    pub market_id: String,
    pub title: String,
    pub yes_price: f64,
    pub no_price: f64,
    pub volume: f64,
    pub liquidity: f64,
    pub metadata: Metadata,
}

impl Store {
    /// Upserts a market by `(platform, event_ticker)`. Returns the market id and
    /// whether it was newly created / had a title change, both of which gate embedding refresh.
    pub async fn upsert_market(
        &self,
        input: UpsertMarketInput,
    ) -> Result<(String, UpsertMarketOutcome)> {
        let now = ts(Utc::now());
        let conn = self.conn.lock().await;

        let existing: Option<(String, String, String, Option<String>)> = conn
            .query_row(
                "SELECT id, title, url, category FROM markets WHERE platform = ?1 AND event_ticker = ?2",
                params![input.platform, input.event_ticker],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                    ))
                },
            )
            .optional()
            .context("lookup existing market")?;

        if let Some((id, old_title, old_url, old_category)) = existing {
            let changed =
                old_title != input.title || old_url != input.url || old_category != input.category;
            if changed {
                conn.execute(
                    "UPDATE markets SET title = ?1, url = ?2, category = ?3, end_date = ?4, \
                     is_active = 1, last_synced_at = ?5 WHERE id = ?6",
                    params![
                        input.title,
                        input.url,
                        input.category,
                        input.end_date.map(ts),
                        now,
                        id
                    ],
                )
                .context("update changed market")?;
            } else {
                conn.execute(
                    "UPDATE markets SET is_active = 1, last_synced_at = ?1 WHERE id = ?2",
                    params![now, id],
                )
                .context("touch unchanged market")?;
            }
            let title_changed = old_title != input.title;
            return Ok((
                id,
                UpsertMarketOutcome {
                    created: false,
                    title_changed,
                },
            ));
        }

        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO markets \
             (id, platform, event_ticker, series_ticker, title, url, category, end_date, \
              is_active, last_synced_at, embedding, embedding_updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, NULL, NULL)",
            params![
                id,
                input.platform,
                input.event_ticker,
                input.series_ticker,
                input.title,
                input.url,
                input.category,
                input.end_date.map(ts),
                now,
            ],
        )
        .context("insert market")?;

        Ok((
            id,
            UpsertMarketOutcome {
                created: true,
                title_changed: false,
            },
        ))
    }

    /// Upserts a contract by `contract_ticker`.
    pub async fn upsert_contract(&self, input: UpsertContractInput) -> Result<String> {
        let now = ts(Utc::now());
        let metadata_json = serde_json::to_string(&input.metadata)?;
        let conn = self.conn.lock().await;

        let existing: Option<(String, String, f64, f64, f64, f64, String)> = conn
            .query_row(
                "SELECT id, title, yes_price, no_price, volume, liquidity, metadata \
                 FROM contracts WHERE contract_ticker = ?1",
                params![input.contract_ticker],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()
            .context("lookup existing contract")?;

        if let Some((id, title, yes_price, no_price, volume, liquidity, metadata)) = existing {
            let changed = title != input.title
                || (yes_price - input.yes_price).abs() > f64::EPSILON
                || (no_price - input.no_price).abs() > f64::EPSILON
                || (volume - input.volume).abs() > f64::EPSILON
                || (liquidity - input.liquidity).abs() > f64::EPSILON
                || metadata != metadata_json;
            if changed {
                conn.execute(
                    "UPDATE contracts SET title = ?1, yes_price = ?2, no_price = ?3, volume = ?4, \
                     liquidity = ?5, metadata = ?6, is_active = 1, last_synced_at = ?7 WHERE id = ?8",
                    params![
                        input.title,
                        input.yes_price,
                        input.no_price,
                        input.volume,
                        input.liquidity,
                        metadata_json,
                        now,
                        id
                    ],
                )
                .context("update changed contract")?;
            } else {
                conn.execute(
                    "UPDATE contracts SET is_active = 1, last_synced_at = ?1 WHERE id = ?2",
                    params![now, id],
                )
                .context("touch unchanged contract")?;
            }
            return Ok(id);
        }

        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO contracts \
             (id, contract_ticker, market_id, title, yes_price, no_price, volume, liquidity, \
              is_active, last_synced_at, metadata) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?10)",
            params![
                id,
                input.contract_ticker,
                input.market_id,
                input.title,
                input.yes_price,
                input.no_price,
                input.volume,
                input.liquidity,
                now,
                metadata_json,
            ],
        )
        .context("insert contract")?;
        Ok(id)
    }

    /// Deactivates active markets for `platform` whose `event_ticker` was not in `seen`,
    /// batched at `DEACTIVATE_BATCH_SIZE`.
    pub async fn deactivate_stale_markets(&self, platform: &str, seen: &HashSet<String>) -> Result<usize> {
        let conn = self.conn.lock().await;
        let active: Vec<String> = {
            let mut stmt = conn.prepare_cached(
                "SELECT event_ticker FROM markets WHERE platform = ?1 AND is_active = 1",
            )?;
            stmt.query_map(params![platform], |r| r.get(0))?
                .filter_map(|r| r.ok())
                .collect()
        };
        let stale: Vec<String> = active.into_iter().filter(|t| !seen.contains(t)).collect();

        let mut total = 0usize;
        for chunk in stale.chunks(DEACTIVATE_BATCH_SIZE) {
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!(
                "UPDATE markets SET is_active = 0 WHERE platform = ? AND event_ticker IN ({placeholders})"
            );
            let mut params_vec: Vec<&dyn rusqlite::ToSql> = vec![&platform];
            for t in chunk {
                params_vec.push(t);
            }
            total += conn
                .execute(&sql, params_vec.as_slice())
                .context("deactivate stale markets batch")?;
        }
        Ok(total)
    }

    /// Deactivates active contracts belonging to `platform` whose `contract_ticker` was not in
    /// `seen`, batched at `DEACTIVATE_BATCH_SIZE`.
    pub async fn deactivate_stale_contracts(
        &self,
        platform: &str,
        seen: &HashSet<String>,
    ) -> Result<usize> {
        let conn = self.conn.lock().await;
        let active: Vec<String> = {
            let mut stmt = conn.prepare_cached(
                "SELECT c.contract_ticker FROM contracts c JOIN markets m ON c.market_id = m.id \
                 WHERE m.platform = ?1 AND c.is_active = 1",
            )?;
            stmt.query_map(params![platform], |r| r.get(0))?
                .filter_map(|r| r.ok())
                .collect()
        };
        let stale: Vec<String> = active.into_iter().filter(|t| !seen.contains(t)).collect();

        let mut total = 0usize;
        for chunk in stale.chunks(DEACTIVATE_BATCH_SIZE) {
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!(
                "UPDATE contracts SET is_active = 0 WHERE contract_ticker IN ({placeholders})"
            );
            let params_vec: Vec<&dyn rusqlite::ToSql> =
                chunk.iter().map(|t| t as &dyn rusqlite::ToSql).collect();
            total += conn
                .execute(&sql, params_vec.as_slice())
                .context("deactivate stale contracts batch")?;
        }
        Ok(total)
    }

    pub async fn get_markets_by_ids(&self, ids: &[String]) -> Result<Vec<Market>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().await;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT {MARKET_COLUMNS} FROM markets WHERE id IN ({placeholders})");
        let params_vec: Vec<&dyn rusqlite::ToSql> =
            ids.iter().map(|i| i as &dyn rusqlite::ToSql).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_vec.as_slice(), row_to_market)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Markets with no embedding yet, for `platform`, oldest `last_synced_at` first, capped at
    /// `limit`.
    pub async fn list_markets_without_embedding(
        &self,
        platform: &str,
        limit: i64,
    ) -> Result<Vec<Market>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {MARKET_COLUMNS} FROM markets WHERE platform = ?1 AND embedding IS NULL \
             ORDER BY last_synced_at ASC LIMIT ?2"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![platform, limit], row_to_market)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub async fn set_market_embedding(&self, id: &str, embedding: &[f32]) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE markets SET embedding = ?1, embedding_updated_at = ?2 WHERE id = ?3",
            params![pack(embedding), ts(Utc::now()), id],
        )
        .context("set market embedding")?;
        Ok(())
    }

    /// One active contract for a market, preferring the highest-volume row, for the validator's
    /// per-market candidate input.
    pub async fn get_active_contract_for_market(&self, market_id: &str) -> Result<Option<Contract>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {CONTRACT_COLUMNS} FROM contracts WHERE market_id = ?1 AND is_active = 1 \
             ORDER BY volume DESC LIMIT 1"
        );
        conn.query_row(&sql, params![market_id], row_to_contract)
            .optional()
            .context("get active contract for market")
    }
}
