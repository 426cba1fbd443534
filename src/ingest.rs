//! NewsIngestor: one per news source, polling and deduping into `Pending` articles.

use crate::capabilities::NewsSource;
use crate::runner::WorkerOutcome;
use crate::store::models::NewArticle;
use crate::store::Store;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

pub struct NewsIngestor {
    source: Arc<dyn NewsSource>,
    store: Store,
}

impl NewsIngestor {
    pub fn new(source: Arc<dyn NewsSource>, store: Store) -> Self {
        Self { source, store }
    }

    /// One poll cycle: fetch, dedupe-insert, return `Worked` iff anything new landed.
    pub async fn run_once(&self) -> WorkerOutcome {
        let started = std::time::Instant::now();
        let items = match self.source.fetch_latest().await {
            Ok(items) => items,
            Err(e) => return WorkerOutcome::Failed(format!("fetch_latest: {e}")),
        };

        let mut inserted = 0usize;
        for item in items {
            let published_at = item.published_at.unwrap_or_else(Utc::now);
            let new_article = NewArticle {
                external_id: item.id.clone(),
                source: self.source.name().to_string(),
                title: item.title,
                content: item.content,
                summary: item.summary,
                url: item.url,
                author: item.author,
                published_at,
                tags: item.tags,
                metadata: item.metadata,
            };
            match self.store.insert_article_if_absent(new_article).await {
                Ok(true) => inserted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(source = self.source.name(), external_id = %item.id, error = %e, "failed to insert article, skipping");
                }
            }
        }

        info!(
            source = self.source.name(),
            inserted,
            duration_ms = started.elapsed().as_millis() as u64,
            "news.fetched"
        );

        if inserted > 0 {
            WorkerOutcome::Worked
        } else {
            WorkerOutcome::Idle
        }
    }
}
