//! MarketSyncer: one per market platform, reconciling its market/contract universe into the
//! store.

pub mod title;

use crate::capabilities::{MarketPlatform, MarketWithContracts, PlatformListing, RawContract};
use crate::embedding::EmbeddingWorker;
use crate::runner::WorkerOutcome;
use crate::store::markets::{UpsertContractInput, UpsertMarketInput};
use crate::store::Store;
use std::collections::HashSet;
use std::sync::Arc;
use title::{derive_market_title, extract_event_ticker, ContractInput};
use tracing::{info, warn};

/// Markets touched this cycle that need an embedding refresh (newly created, title-changed, or
/// still embedding-less), handed back to the caller for the embedding path.
pub struct SyncSummary {
    pub markets_seen: usize,
    pub contracts_seen: usize,
    pub markets_deactivated: usize,
    pub contracts_deactivated: usize,
    pub markets_needing_embedding: Vec<String>,
}

pub struct MarketSyncer {
    platform: Arc<dyn MarketPlatform>,
    store: Store,
    embedder: Option<Arc<EmbeddingWorker>>,
}

const EMBED_QUEUE_CAP: usize = 200;

impl MarketSyncer {
    pub fn new(platform: Arc<dyn MarketPlatform>, store: Store) -> Self {
        Self {
            platform,
            store,
            embedder: None,
        }
    }

    /// Attaches the embedding worker the syncer opportunistically calls into after each cycle
    /// rather than via its own polling loop.
    pub fn with_embedder(mut self, embedder: Arc<EmbeddingWorker>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub async fn run_once(&self) -> WorkerOutcome {
        let started = std::time::Instant::now();
        let listing = match self.platform.list_all().await {
            Ok(l) => l,
            Err(e) => return WorkerOutcome::Failed(format!("list_all: {e}")),
        };

        let groups = match listing {
            PlatformListing::Grouped(groups) => groups,
            PlatformListing::Flat(contracts) => group_flat_contracts(contracts),
        };

        match self.reconcile(groups).await {
            Ok(summary) => {
                info!(
                    platform = self.platform.name(),
                    markets_seen = summary.markets_seen,
                    contracts_seen = summary.contracts_seen,
                    markets_deactivated = summary.markets_deactivated,
                    contracts_deactivated = summary.contracts_deactivated,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "market.synced"
                );

                if let Some(embedder) = &self.embedder {
                    if !summary.markets_needing_embedding.is_empty() {
                        if let Err(e) = embedder
                            .refresh_market_embeddings(&summary.markets_needing_embedding)
                            .await
                        {
                            warn!(platform = self.platform.name(), error = %e, "market embedding refresh failed");
                        }
                    }
                }

                if summary.markets_seen > 0 || summary.markets_deactivated > 0 {
                    WorkerOutcome::Worked
                } else {
                    WorkerOutcome::Idle
                }
            }
            Err(e) => WorkerOutcome::Failed(format!("reconcile: {e}")),
        }
    }

    async fn reconcile(&self, groups: Vec<MarketWithContracts>) -> anyhow::Result<SyncSummary> {
        let mut seen_markets = HashSet::new();
        let mut seen_contracts = HashSet::new();
        let mut needing_embedding = Vec::new();

        for group in &groups {
            let title = group.title.clone().unwrap_or_else(|| {
                derive_market_title(
                    &group
                        .contracts
                        .iter()
                        .map(|c| ContractInput {
                            title: c.title.clone(),
                            metadata: c.metadata.clone(),
                        })
                        .collect::<Vec<_>>(),
                )
            });

            let url = format!("https://{}/market/{}", self.platform.name(), group.event_ticker);

            let (market_id, outcome) = self
                .store
                .upsert_market(UpsertMarketInput {
                    platform: self.platform.name().to_string(),
                    event_ticker: group.event_ticker.clone(),
                    series_ticker: group.series_ticker.clone(),
                    title,
                    url,
                    category: group.category.clone(),
                    end_date: group.end_date,
                })
                .await?;
            seen_markets.insert(group.event_ticker.clone());

            if needing_embedding.len() < EMBED_QUEUE_CAP && (outcome.created || outcome.title_changed) {
                needing_embedding.push(market_id.clone());
            }

            for contract in &group.contracts {
                self.store
                    .upsert_contract(UpsertContractInput {
                        contract_ticker: contract.contract_ticker.clone(),
                        market_id: market_id.clone(),
                        title: contract.title.clone(),
                        yes_price: contract.yes_price,
                        no_price: contract.no_price,
                        volume: contract.volume,
                        liquidity: contract.liquidity,
                        metadata: contract.metadata.clone(),
                    })
                    .await?;
                seen_contracts.insert(contract.contract_ticker.clone());
            }
        }

        let markets_deactivated = self
            .store
            .deactivate_stale_markets(self.platform.name(), &seen_markets)
            .await?;
        let contracts_deactivated = self
            .store
            .deactivate_stale_contracts(self.platform.name(), &seen_contracts)
            .await?;

        if needing_embedding.len() < EMBED_QUEUE_CAP {
            let remaining = EMBED_QUEUE_CAP - needing_embedding.len();
            let stale_embedding = self
                .store
                .list_markets_without_embedding(self.platform.name(), remaining as i64)
                .await?;
            for m in stale_embedding {
                if !needing_embedding.contains(&m.id) {
                    needing_embedding.push(m.id);
                }
            }
        }

        Ok(SyncSummary {
            markets_seen: seen_markets.len(),
            contracts_seen: seen_contracts.len(),
            markets_deactivated,
            contracts_deactivated,
            markets_needing_embedding: needing_embedding,
        })
    }
}

/// Groups a flat contract list by event ticker. Contracts with no extractable
/// ticker form singleton groups keyed `__ungrouped__<contract_id>`.
fn group_flat_contracts(contracts: Vec<RawContract>) -> Vec<MarketWithContracts> {
    let mut groups: Vec<MarketWithContracts> = Vec::new();
    let mut index_by_ticker: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for contract in contracts {
        let ticker = extract_event_ticker(&contract.contract_ticker, &contract.metadata)
            .unwrap_or_else(|| format!("__ungrouped__{}", contract.contract_ticker));

        if let Some(&idx) = index_by_ticker.get(&ticker) {
            groups[idx].contracts.push(contract);
        } else {
            index_by_ticker.insert(ticker.clone(), groups.len());
            groups.push(MarketWithContracts {
                event_ticker: ticker,
                series_ticker: None,
                title: None,
                category: None,
                end_date: contract.end_date,
                contracts: vec![contract],
            });
        }
    }

    groups
}

/// Builds the embedding input text for a market.
pub fn market_embedding_text(title: &str, category: Option<&str>) -> String {
    match category {
        Some(cat) if !cat.is_empty() => format!("{title}. Category: {cat}"),
        _ => title.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Metadata;
    use anyhow::Result;
    use async_trait::async_trait;

    struct FakePlatform {
        name: String,
        listing: std::sync::Mutex<Option<PlatformListing>>,
    }

    #[async_trait]
    impl MarketPlatform for FakePlatform {
        fn name(&self) -> &str {
            &self.name
        }
        async fn list_all(&self) -> Result<PlatformListing> {
            Ok(self.listing.lock().unwrap().take().unwrap_or(PlatformListing::Flat(vec![])))
        }
        async fn get_contract(&self, _ticker: &str) -> Result<Option<RawContract>> {
            Ok(None)
        }
        async fn place_order(
            &self,
            _req: crate::capabilities::OrderRequest,
        ) -> Result<crate::capabilities::OrderAck> {
            unimplemented!()
        }
    }

    fn contract(ticker: &str, title: &str) -> RawContract {
        RawContract {
            contract_ticker: ticker.to_string(),
            title: title.to_string(),
            yes_price: 0.5,
            no_price: 0.5,
            volume: 100.0,
            liquidity: 10.0,
            end_date: None,
            metadata: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn flat_contracts_group_by_extracted_ticker_into_one_market() {
        let store = Store::open_in_memory().unwrap();
        let platform = std::sync::Arc::new(FakePlatform {
            name: "kalshi".to_string(),
            listing: std::sync::Mutex::new(None),
        });
        let syncer = MarketSyncer::new(platform, store);
        let groups = group_flat_contracts(vec![
            contract("KXFED-25MAR-Y", "Cut 25bps"),
            contract("KXFED-25MAR-N", "No cut"),
        ]);
        let summary = syncer.reconcile(groups).await.unwrap();
        assert_eq!(summary.markets_seen, 1);
        assert_eq!(summary.contracts_seen, 2);
        assert_eq!(summary.markets_needing_embedding.len(), 1);
    }

    #[tokio::test]
    async fn second_cycle_without_a_market_deactivates_it() {
        let store = Store::open_in_memory().unwrap();
        let platform = std::sync::Arc::new(FakePlatform {
            name: "kalshi".to_string(),
            listing: std::sync::Mutex::new(None),
        });
        let syncer = MarketSyncer::new(platform, store);

        let first = group_flat_contracts(vec![contract("KXFED-25MAR-Y", "Cut")]);
        syncer.reconcile(first).await.unwrap();

        let summary = syncer.reconcile(vec![]).await.unwrap();
        assert_eq!(summary.markets_deactivated, 1);
        assert_eq!(summary.contracts_deactivated, 1);
    }

    #[test]
    fn embedding_text_appends_category() {
        assert_eq!(
            market_embedding_text("Fed Rate Decision", Some("economics")),
            "Fed Rate Decision. Category: economics"
        );
        assert_eq!(market_embedding_text("Fed Rate Decision", None), "Fed Rate Decision");
    }
}
