//! Durable state: articles, markets, contracts, matches; in-process cosine top-k query.
//!
//! A single `rusqlite::Connection` behind `Arc<tokio::sync::Mutex<Connection>>`, the same shape
//! as the teacher's `VaultDb` (`vault/vault_db.rs`) — every logical operation takes the lock for
//! one short critical section, never across an `.await` on a capability call.

pub mod articles;
pub mod markets;
pub mod matches;
pub mod models;
pub mod vector;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open store db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();

        vector::register_cosine_similarity(&conn).context("register cosine_similarity fn")?;
        Self::migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory store db")?;
        vector::register_cosine_similarity(&conn).context("register cosine_similarity fn")?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                external_id TEXT NOT NULL,
                source TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT,
                summary TEXT,
                url TEXT,
                author TEXT,
                published_at INTEGER NOT NULL,
                tags TEXT NOT NULL,
                metadata TEXT NOT NULL,
                status TEXT NOT NULL,
                embedding BLOB,
                embedded_at INTEGER,
                matched_at INTEGER,
                validated_at INTEGER,
                error_message TEXT,
                fetched_at INTEGER NOT NULL,
                UNIQUE(source, external_id)
            );
            CREATE INDEX IF NOT EXISTS idx_articles_status_fetched ON articles(status, fetched_at ASC);
            CREATE INDEX IF NOT EXISTS idx_articles_status_embedded ON articles(status, embedded_at ASC);

            CREATE TABLE IF NOT EXISTS markets (
                id TEXT PRIMARY KEY,
                platform TEXT NOT NULL,
                event_ticker TEXT NOT NULL,
                series_ticker TEXT,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                category TEXT,
                end_date INTEGER,
                is_active INTEGER NOT NULL,
                last_synced_at INTEGER NOT NULL,
                embedding BLOB,
                embedding_updated_at INTEGER,
                UNIQUE(platform, event_ticker)
            );
            CREATE INDEX IF NOT EXISTS idx_markets_platform_active ON markets(platform, is_active);

            CREATE TABLE IF NOT EXISTS contracts (
                id TEXT PRIMARY KEY,
                contract_ticker TEXT NOT NULL UNIQUE,
                market_id TEXT NOT NULL REFERENCES markets(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                yes_price REAL NOT NULL,
                no_price REAL NOT NULL,
                volume REAL NOT NULL,
                liquidity REAL NOT NULL,
                is_active INTEGER NOT NULL,
                last_synced_at INTEGER NOT NULL,
                metadata TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_contracts_market ON contracts(market_id);

            CREATE TABLE IF NOT EXISTS news_market_matches (
                id TEXT PRIMARY KEY,
                news_article_id TEXT NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
                market_id TEXT NOT NULL REFERENCES markets(id) ON DELETE CASCADE,
                similarity REAL NOT NULL,
                is_validated INTEGER NOT NULL,
                is_relevant INTEGER,
                relevance_score REAL,
                confidence REAL,
                suggested_position TEXT,
                reasoning TEXT,
                validated_at INTEGER,
                alert_sent INTEGER NOT NULL,
                alert_sent_at INTEGER,
                UNIQUE(news_article_id, market_id)
            );
            CREATE INDEX IF NOT EXISTS idx_matches_article_validated ON news_market_matches(news_article_id, is_validated);
            ",
        )
        .context("create schema")?;
        Ok(())
    }
}
