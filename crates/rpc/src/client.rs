use std::sync::Arc;

use alloy::primitives::Address;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use chainidx_common::error::IndexerError;
use chainidx_common::types::BlockSummary;
use chrono::{TimeZone, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::retry::{with_retry, RetryPolicy};

/// Typed chain reads with retry/backoff, timeout, error classification, and
/// null-block tolerance. Object-safe so the core can depend on
/// `Arc<dyn ChainRpc>` without committing to a concrete provider.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn latest_block(&self) -> Result<u64, IndexerError>;

    /// `head - confirmations`; fails if `head <= confirmations`.
    async fn safe_block(&self, confirmations: u64) -> Result<u64, IndexerError>;

    /// `None` is an expected null slot, never an error.
    async fn get_block(&self, number: u64) -> Result<Option<BlockSummary>, IndexerError>;

    /// Preserves ascending order, omits null slots, bounded by `concurrency`.
    async fn get_blocks_in_range(
        &self,
        from: u64,
        to: u64,
        concurrency: usize,
    ) -> Result<Vec<BlockSummary>, IndexerError>;

    /// Empty `addresses` returns empty without a round trip.
    async fn get_logs(
        &self,
        addresses: &[Address],
        from: u64,
        to: u64,
    ) -> Result<Vec<Log>, IndexerError>;
}

/// `ChainRpc` implementation backed by an `alloy` HTTP provider.
pub struct AlloyRpcClient {
    provider: DynProvider,
    policy: RetryPolicy,
}

impl AlloyRpcClient {
    pub fn connect(rpc_url: &str, policy: RetryPolicy) -> Result<Self, IndexerError> {
        let url = rpc_url
            .parse()
            .map_err(|e| IndexerError::Config(format!("invalid chain.rpc_url: {e}")))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();
        Ok(Self { provider, policy })
    }

    fn classify(op: &str, err: impl std::fmt::Display) -> IndexerError {
        IndexerError::Rpc(format!("{op}: {err}"))
    }
}

#[async_trait]
impl ChainRpc for AlloyRpcClient {
    async fn latest_block(&self) -> Result<u64, IndexerError> {
        with_retry(&self.policy, "latest_block", || async {
            self.provider
                .get_block_number()
                .await
                .map_err(|e| Self::classify("latest_block", e))
        })
        .await
    }

    async fn safe_block(&self, confirmations: u64) -> Result<u64, IndexerError> {
        let head = self.latest_block().await?;
        head.checked_sub(confirmations).ok_or_else(|| {
            IndexerError::Integrity(format!(
                "head {head} <= confirmations {confirmations}; no safe block yet"
            ))
        })
    }

    async fn get_block(&self, number: u64) -> Result<Option<BlockSummary>, IndexerError> {
        let block = with_retry(&self.policy, "get_block", || async {
            self.provider
                .get_block_by_number(number.into())
                .await
                .map_err(|e| Self::classify("get_block", e))
        })
        .await?;

        let Some(block) = block else {
            tracing::debug!(number, "null slot");
            return Ok(None);
        };

        let timestamp = Utc
            .timestamp_opt(block.header.timestamp as i64, 0)
            .single()
            .unwrap_or_else(Utc::now);

        Ok(Some(BlockSummary {
            number: block.header.number,
            hash: format!("{:#x}", block.header.hash),
            timestamp,
        }))
    }

    async fn get_blocks_in_range(
        &self,
        from: u64,
        to: u64,
        concurrency: usize,
    ) -> Result<Vec<BlockSummary>, IndexerError> {
        if to < from {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for number in from..=to {
            let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                IndexerError::Rpc(format!("semaphore closed while scheduling block fetches: {e}"))
            })?;
            let provider = self.provider.clone();
            let policy = self.policy;
            tasks.spawn(async move {
                let _permit = permit;
                let result = with_retry(&policy, "get_block_in_range", || async {
                    provider
                        .get_block_by_number(number.into())
                        .await
                        .map_err(|e| AlloyRpcClient::classify("get_block_in_range", e))
                })
                .await;
                (number, result)
            });
        }

        let mut by_number = std::collections::BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (number, result) = joined.map_err(|e| {
                IndexerError::Rpc(format!("block fetch task panicked: {e}"))
            })?;
            if let Some(block) = result? {
                let timestamp = Utc
                    .timestamp_opt(block.header.timestamp as i64, 0)
                    .single()
                    .unwrap_or_else(Utc::now);
                by_number.insert(
                    number,
                    BlockSummary {
                        number: block.header.number,
                        hash: format!("{:#x}", block.header.hash),
                        timestamp,
                    },
                );
            }
        }

        Ok(by_number.into_values().collect())
    }

    async fn get_logs(
        &self,
        addresses: &[Address],
        from: u64,
        to: u64,
    ) -> Result<Vec<Log>, IndexerError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let filter = Filter::new()
            .from_block(from)
            .to_block(to)
            .address(addresses.to_vec());

        with_retry(&self.policy, "get_logs", || async {
            self.provider
                .get_logs(&filter)
                .await
                .map_err(|e| Self::classify("get_logs", e))
        })
        .await
    }
}
