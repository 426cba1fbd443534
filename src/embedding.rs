//! EmbeddingWorker: embeds `Pending` articles in batches; also the market-embedding refresh path
//! invoked opportunistically by the syncer.

use crate::capabilities::EmbeddingProvider;
use crate::runner::WorkerOutcome;
use crate::store::models::Article;
use crate::store::Store;
use crate::sync::market_embedding_text;
use std::sync::Arc;
use tracing::{info, warn};

pub struct EmbeddingWorker {
    provider: Arc<dyn EmbeddingProvider>,
    store: Store,
    batch_size: i64,
}

impl EmbeddingWorker {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, store: Store, batch_size: i64) -> Self {
        Self {
            provider,
            store,
            batch_size,
        }
    }

    /// Claims up to `batch_size` pending articles and embeds them.
    pub async fn run_once(&self) -> WorkerOutcome {
        let started = std::time::Instant::now();
        let claimed = match self.store.claim_pending_articles(self.batch_size).await {
            Ok(a) => a,
            Err(e) => return WorkerOutcome::Failed(format!("claim_pending_articles: {e}")),
        };
        if claimed.is_empty() {
            return WorkerOutcome::Idle;
        }

        let texts: Vec<String> = claimed.iter().map(embedding_text).collect();
        let vectors = match self.provider.embed(&texts).await {
            Ok(v) => v,
            Err(e) => {
                let ids: Vec<String> = claimed.iter().map(|a| a.id.clone()).collect();
                let msg = format!("embedding provider failed: {e}");
                if let Err(e2) = self.store.mark_articles_failed_bulk(&ids, &msg).await {
                    warn!(error = %e2, "failed to mark batch as failed after provider error");
                }
                return WorkerOutcome::Failed(msg);
            }
        };

        let mut success_count = 0usize;
        for (article, vector) in claimed.iter().zip(vectors.into_iter()) {
            if vector.is_empty() {
                if let Err(e) = self
                    .store
                    .mark_article_failed(&article.id, "empty embedding returned")
                    .await
                {
                    warn!(article_id = %article.id, error = %e, "failed to mark article failed");
                }
                continue;
            }
            match self.store.set_article_embedded(&article.id, &vector).await {
                Ok(()) => success_count += 1,
                Err(e) => warn!(article_id = %article.id, error = %e, "failed to store embedding"),
            }
        }

        info!(
            count = success_count,
            duration_ms = started.elapsed().as_millis() as u64,
            "article.embedded"
        );

        if success_count > 0 {
            WorkerOutcome::Worked
        } else {
            WorkerOutcome::Idle
        }
    }

    /// Refreshes embeddings for the markets a sync cycle flagged as needing one. Same
    /// provider/batching/error policy as article embedding.
    pub async fn refresh_market_embeddings(&self, market_ids: &[String]) -> anyhow::Result<usize> {
        if market_ids.is_empty() {
            return Ok(0);
        }
        let markets = self.store.get_markets_by_ids(market_ids).await?;
        if markets.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = markets
            .iter()
            .map(|m| market_embedding_text(&m.title, m.category.as_deref()))
            .collect();
        let vectors = self.provider.embed(&texts).await?;

        let mut success_count = 0usize;
        for (market, vector) in markets.iter().zip(vectors.into_iter()) {
            if vector.is_empty() {
                warn!(market_id = %market.id, "empty market embedding returned, skipping");
                continue;
            }
            self.store.set_market_embedding(&market.id, &vector).await?;
            success_count += 1;
        }
        Ok(success_count)
    }
}

/// Embedding text for an article: title, blank line, summary or first 500 chars of
/// content, blank line, `"Tags: t1, t2, ..."` when non-empty.
fn embedding_text(article: &Article) -> String {
    let mut parts = vec![article.title.clone()];

    let body = article
        .summary
        .clone()
        .or_else(|| article.content.as_ref().map(|c| truncate_chars(c, 500)));
    if let Some(body) = body {
        parts.push(String::new());
        parts.push(body);
    }

    if !article.tags.is_empty() {
        parts.push(String::new());
        parts.push(format!("Tags: {}", article.tags.join(", ")));
    }

    parts.join("\n")
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
