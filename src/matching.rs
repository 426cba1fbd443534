//! MatchingWorker: for each `Embedded` article, find top-k markets by cosine similarity and
//! write match rows.

use crate::runner::WorkerOutcome;
use crate::store::Store;
use tracing::{info, warn};

pub struct MatchingWorker {
    store: Store,
    batch_size: i64,
    top_n: i64,
    min_similarity: f64,
}

impl MatchingWorker {
    pub fn new(store: Store, batch_size: i64, top_n: i64, min_similarity: f64) -> Self {
        Self {
            store,
            batch_size,
            top_n,
            min_similarity,
        }
    }

    pub async fn run_once(&self) -> WorkerOutcome {
        let claimed = match self.store.claim_embedded_articles(self.batch_size).await {
            Ok(a) => a,
            Err(e) => return WorkerOutcome::Failed(format!("claim_embedded_articles: {e}")),
        };
        if claimed.is_empty() {
            return WorkerOutcome::Idle;
        }

        let mut matched_count = 0usize;
        for article in claimed {
            let embedding = match &article.embedding {
                Some(e) => e.clone(),
                None => {
                    warn!(article_id = %article.id, "embedded article missing vector, marking failed");
                    let _ = self
                        .store
                        .mark_article_failed(&article.id, "Matching failed: missing embedding")
                        .await;
                    continue;
                }
            };

            match self
                .store
                .top_k_markets(&embedding, self.top_n, self.min_similarity)
                .await
            {
                Ok(ranked) => {
                    for r in &ranked {
                        if let Err(e) = self
                            .store
                            .insert_match_if_absent(&article.id, &r.market_id, r.similarity)
                            .await
                        {
                            warn!(article_id = %article.id, market_id = %r.market_id, error = %e, "failed to insert match");
                        }
                    }
                    if let Err(e) = self.store.set_article_matched(&article.id).await {
                        warn!(article_id = %article.id, error = %e, "failed to promote article to matched");
                        continue;
                    }
                    info!(article_id = %article.id, count = ranked.len(), "match.found");
                    matched_count += 1;
                }
                Err(e) => {
                    let msg = format!("Matching failed: {e}");
                    let _ = self.store.mark_article_failed(&article.id, &msg).await;
                    warn!(article_id = %article.id, error = %e, "matching failed for article");
                }
            }
        }

        if matched_count > 0 {
            WorkerOutcome::Worked
        } else {
            WorkerOutcome::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::markets::UpsertMarketInput;
    use crate::store::models::NewArticle;
    use chrono::Utc;

    #[tokio::test]
    async fn zero_matches_still_promotes_article_to_matched() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_article_if_absent(NewArticle {
                external_id: "a".to_string(),
                source: "reuters".to_string(),
                title: "Headline".to_string(),
                content: None,
                summary: None,
                url: None,
                author: None,
                published_at: Utc::now(),
                tags: vec![],
                metadata: Default::default(),
            })
            .await
            .unwrap();
        let claimed = store.claim_pending_articles(10).await.unwrap();
        store
            .set_article_embedded(&claimed[0].id, &[1.0, 0.0, 0.0])
            .await
            .unwrap();

        let worker = MatchingWorker::new(store.clone(), 10, 20, 0.3);
        let outcome = worker.run_once().await;
        assert!(matches!(outcome, WorkerOutcome::Worked));

        let article = store.get_article(&claimed[0].id).await.unwrap().unwrap();
        assert_eq!(article.status, crate::store::models::ArticleStatus::Matched);
    }

    #[tokio::test]
    async fn inserts_a_match_for_each_ranked_market() {
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
        store.set_market_embedding(&market_id, &[1.0, 0.0, 0.0]).await.unwrap();

        store
            .insert_article_if_absent(NewArticle {
                external_id: "a".to_string(),
                source: "reuters".to_string(),
                title: "Headline".to_string(),
                content: None,
                summary: None,
                url: None,
                author: None,
                published_at: Utc::now(),
                tags: vec![],
                metadata: Default::default(),
            })
            .await
            .unwrap();
        let claimed = store.claim_pending_articles(10).await.unwrap();
        store
            .set_article_embedded(&claimed[0].id, &[1.0, 0.0, 0.0])
            .await
            .unwrap();

        let worker = MatchingWorker::new(store.clone(), 10, 20, 0.3);
        worker.run_once().await;

        let candidates = store
            .load_validation_candidates(&claimed[0].id, 10)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
    }
}
