//! Article CRUD, claim-next-N, bulk status update, retention sweep.

use super::models::{Article, ArticleStatus, Metadata, NewArticle};
use super::vector::{pack, unpack};
use super::Store;
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension, Row};

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

fn row_to_article(row: &Row) -> rusqlite::Result<Article> {
    let tags_json: String = row.get("tags")?;
    let metadata_json: String = row.get("metadata")?;
    let status_str: String = row.get("status")?;
    let embedding_blob: Option<Vec<u8>> = row.get("embedding")?;
    let published_at: i64 = row.get("published_at")?;
    let embedded_at: Option<i64> = row.get("embedded_at")?;
    let matched_at: Option<i64> = row.get("matched_at")?;
    let validated_at: Option<i64> = row.get("validated_at")?;
    let fetched_at: i64 = row.get("fetched_at")?;

    Ok(Article {
        id: row.get("id")?,
        external_id: row.get("external_id")?,
        source: row.get("source")?,
        title: row.get("title")?,
        content: row.get("content")?,
        summary: row.get("summary")?,
        url: row.get("url")?,
        author: row.get("author")?,
        published_at: from_ts(published_at),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        metadata: serde_json::from_str::<Metadata>(&metadata_json).unwrap_or_default(),
        status: ArticleStatus::parse(&status_str).unwrap_or(ArticleStatus::Pending),
        embedding: embedding_blob.map(|b| unpack(&b)),
        embedded_at: embedded_at.map(from_ts),
        matched_at: matched_at.map(from_ts),
        validated_at: validated_at.map(from_ts),
        error_message: row.get("error_message")?,
        fetched_at: from_ts(fetched_at),
    })
}

const ARTICLE_COLUMNS: &str = "id, external_id, source, title, content, summary, url, author, \
     published_at, tags, metadata, status, embedding, embedded_at, matched_at, validated_at, \
     error_message, fetched_at";

impl Store {
    /// Inserts a `Pending` article unless `(source, external_id)` already exists.
    /// Returns `true` iff a row was inserted.
    pub async fn insert_article_if_absent(&self, item: NewArticle) -> Result<bool> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let tags_json = serde_json::to_string(&item.tags)?;
        let metadata_json = serde_json::to_string(&item.metadata)?;

        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO articles \
             (id, external_id, source, title, content, summary, url, author, published_at, tags, \
              metadata, status, embedding, embedded_at, matched_at, validated_at, error_message, fetched_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, NULL, NULL, NULL, NULL, NULL, ?13)",
            params![
                id,
                item.external_id,
                item.source,
                item.title,
                item.content,
                item.summary,
                item.url,
                item.author,
                ts(item.published_at),
                tags_json,
                metadata_json,
                ArticleStatus::Pending.as_str(),
                ts(now),
            ],
        )
        .context("insert article")?;
        Ok(changed > 0)
    }

    pub async fn get_article(&self, id: &str) -> Result<Option<Article>> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?1");
        conn.query_row(&sql, params![id], row_to_article)
            .optional()
            .context("get article")
    }

    /// Claims up to `batch_size` `Pending` articles, oldest `fetched_at` first.
    pub async fn claim_pending_articles(&self, batch_size: i64) -> Result<Vec<Article>> {
        self.claim_by_status_ordered(ArticleStatus::Pending, "fetched_at", batch_size)
            .await
    }

    /// Claims up to `batch_size` `Embedded` articles, oldest `embedded_at` first.
    pub async fn claim_embedded_articles(&self, batch_size: i64) -> Result<Vec<Article>> {
        self.claim_by_status_ordered(ArticleStatus::Embedded, "embedded_at", batch_size)
            .await
    }

    async fn claim_by_status_ordered(
        &self,
        status: ArticleStatus,
        order_col: &str,
        batch_size: i64,
    ) -> Result<Vec<Article>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE status = ?1 ORDER BY {order_col} ASC LIMIT ?2"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![status.as_str(), batch_size], row_to_article)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Claims up to `batch_size` `Matched` articles that still have an unvalidated match,
    /// oldest `matched_at` first.
    pub async fn claim_matched_articles_needing_validation(
        &self,
        batch_size: i64,
    ) -> Result<Vec<Article>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles \
             WHERE status = ?1 AND EXISTS ( \
                 SELECT 1 FROM news_market_matches m \
                 WHERE m.news_article_id = articles.id AND m.is_validated = 0 \
             ) ORDER BY matched_at ASC LIMIT ?2"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(
                params![ArticleStatus::Matched.as_str(), batch_size],
                row_to_article,
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Stores an embedding and promotes the article to `Embedded`.
    pub async fn set_article_embedded(&self, id: &str, embedding: &[f32]) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE articles SET status = ?1, embedding = ?2, embedded_at = ?3 WHERE id = ?4",
            params![
                ArticleStatus::Embedded.as_str(),
                pack(embedding),
                ts(Utc::now()),
                id
            ],
        )
        .context("set article embedded")?;
        Ok(())
    }

    /// Promotes the article to `Matched`, even with zero matches produced.
    pub async fn set_article_matched(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE articles SET status = ?1, matched_at = ?2 WHERE id = ?3",
            params![ArticleStatus::Matched.as_str(), ts(Utc::now()), id],
        )
        .context("set article matched")?;
        Ok(())
    }

    /// Promotes the article to `Validated` once every match has been scored.
    pub async fn set_article_validated(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE articles SET status = ?1, validated_at = ?2 WHERE id = ?3",
            params![ArticleStatus::Validated.as_str(), ts(Utc::now()), id],
        )
        .context("set article validated")?;
        Ok(())
    }

    pub async fn mark_article_failed(&self, id: &str, error_message: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE articles SET status = ?1, error_message = ?2 WHERE id = ?3",
            params![ArticleStatus::Failed.as_str(), error_message, id],
        )
        .context("mark article failed")?;
        Ok(())
    }

    /// Marks every id `Failed` with the same message — used when a batch-wide provider error
    /// means no individual article in the claimed batch can be embedded.
    pub async fn mark_articles_failed_bulk(&self, ids: &[String], error_message: &str) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock().await;
        for id in ids {
            conn.execute(
                "UPDATE articles SET status = ?1, error_message = ?2 WHERE id = ?3",
                params![ArticleStatus::Failed.as_str(), error_message, id],
            )
            .context("mark articles failed bulk")?;
        }
        Ok(())
    }

    /// Deletes articles older than `retention_days` from `fetched_at`, cascading to matches.
    /// Returns the number of deleted articles.
    pub async fn retention_sweep(&self, retention_days: i64) -> Result<usize> {
        let cutoff = ts(Utc::now()) - retention_days * 86_400;
        let conn = self.conn.lock().await;
        let deleted = conn
            .execute("DELETE FROM articles WHERE fetched_at < ?1", params![cutoff])
            .context("retention sweep")?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::NewArticle;

    fn sample(external_id: &str) -> NewArticle {
        NewArticle {
            external_id: external_id.to_string(),
            source: "reuters".to_string(),
            title: "Federal Reserve Announces Rate Cut".to_string(),
            content: Some("The Fed cut rates by 25 basis points today.".to_string()),
            summary: None,
            url: Some("https://example.com/a".to_string()),
            author: None,
            published_at: Utc::now(),
            tags: vec!["fed".to_string(), "rates".to_string()],
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn duplicate_external_id_inserts_once() {
        let store = Store::open_in_memory().unwrap();
        assert!(store
            .insert_article_if_absent(sample("ext-1"))
            .await
            .unwrap());
        assert!(!store
            .insert_article_if_absent(sample("ext-1"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn claim_pending_then_embed_promotes_status() {
        let store = Store::open_in_memory().unwrap();
        store.insert_article_if_absent(sample("ext-2")).await.unwrap();

        let claimed = store.claim_pending_articles(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, ArticleStatus::Pending);

        store
            .set_article_embedded(&claimed[0].id, &[0.1, 0.2, 0.3])
            .await
            .unwrap();

        let fetched = store.get_article(&claimed[0].id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ArticleStatus::Embedded);
        assert_eq!(fetched.embedding, Some(vec![0.1, 0.2, 0.3]));
    }

    #[tokio::test]
    async fn retention_sweep_deletes_old_articles() {
        let store = Store::open_in_memory().unwrap();
        store.insert_article_if_absent(sample("ext-3")).await.unwrap();
        let claimed = store.claim_pending_articles(10).await.unwrap();
        {
            let conn = store.conn.lock().await;
            conn.execute(
                "UPDATE articles SET fetched_at = ?1 WHERE id = ?2",
                params![ts(Utc::now()) - 10 * 86_400, claimed[0].id],
            )
            .unwrap();
        }
        let deleted = store.retention_sweep(7).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_article(&claimed[0].id).await.unwrap().is_none());
    }
}
