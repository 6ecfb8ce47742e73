use std::time::Duration;

use chainidx_common::error::IndexerError;
use chainidx_common::types::ChainId;
use chainidx_store::cursor::CursorStore;
use chainidx_store::lock::ProcessLock;
use chainidx_store::Schema;
use sqlx::PgPool;
use tokio::sync::watch;

use crate::fetcher::BlockFetcher;
use crate::reorg::ReorgDetector;

const MAX_BACKOFF: Duration = Duration::from_secs(60);
const BACKOFF_UNIT: Duration = Duration::from_secs(1);
const BACKOFF_CAP_MULTIPLIER: u32 = 5;

/// Message-passing shutdown: a "stop requested" channel the loop polls
/// between phases, plus a "stopped" signal the coordinator flips before
/// returning.
pub struct ShutdownHandle {
    stop_tx: watch::Sender<bool>,
    stopped_rx: watch::Receiver<bool>,
}

impl ShutdownHandle {
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub async fn await_stopped(&mut self) {
        let _ = self.stopped_rx.wait_for(|stopped| *stopped).await;
    }
}

/// The `acquire -> initialize -> loop{detect, fetch, process, sleep} ->
/// backoff -> shutdown` state machine driving one chain's indexing loop.
pub struct Coordinator {
    pool: PgPool,
    schema: Schema,
    chain_id: ChainId,
    start_block: u64,
    auto_handle_reorgs: bool,
    max_consecutive_errors: u32,
    poll_delay: Duration,
    detector: ReorgDetector,
    fetcher: BlockFetcher,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        schema: Schema,
        chain_id: ChainId,
        start_block: u64,
        auto_handle_reorgs: bool,
        max_consecutive_errors: u32,
        poll_delay: Duration,
        detector: ReorgDetector,
        fetcher: BlockFetcher,
    ) -> Self {
        Self {
            pool,
            schema,
            chain_id,
            start_block,
            auto_handle_reorgs,
            max_consecutive_errors,
            poll_delay,
            detector,
            fetcher,
        }
    }

    /// Runs the full lifecycle: acquires the process lock, initializes the
    /// cursor, then drives detect/fetch/process until `stop_rx` flips or a
    /// fatal condition is hit. `process_batch` is supplied as a closure so
    /// the caller can own the domain repositories' lifetimes independently
    /// of the coordinator's.
    pub async fn run<F, Fut>(
        &self,
        mut stop_rx: watch::Receiver<bool>,
        stopped_tx: watch::Sender<bool>,
        mut process_batch: F,
    ) -> Result<(), IndexerError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<crate::processor::ProcessedPointer>, IndexerError>>,
    {
        let lock = ProcessLock::acquire(&self.pool, &self.schema, self.chain_id as i64).await?;

        let result = self.run_inner(&mut stop_rx, &mut process_batch).await;

        lock.release().await?;
        stopped_tx.send_replace(true);
        result
    }

    async fn run_inner<F, Fut>(&self, stop_rx: &mut watch::Receiver<bool>, process_batch: &mut F) -> Result<(), IndexerError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<crate::processor::ProcessedPointer>, IndexerError>>,
    {
        {
            let mut tx = self.pool.begin().await?;
            let chain_id_db = self.chain_id as i64;
            CursorStore::initialize(&mut tx, &self.schema, chain_id_db, self.start_block as i64 - 1).await?;
            tx.commit().await?;
        }

        let mut consecutive_errors: u32 = 0;

        loop {
            if *stop_rx.borrow() {
                return Ok(());
            }

            match self.run_phase(process_batch).await {
                Ok(fetched) => {
                    consecutive_errors = 0;
                    if fetched.is_none() {
                        tokio::select! {
                            _ = tokio::time::sleep(self.poll_delay) => {}
                            _ = stop_rx.changed() => {}
                        }
                    }
                }
                Err(err) => {
                    consecutive_errors += 1;
                    let backoff = BACKOFF_UNIT
                        .saturating_mul(consecutive_errors.min(BACKOFF_CAP_MULTIPLIER))
                        .min(MAX_BACKOFF);
                    tracing::error!(error = %err, consecutive_errors, backoff_secs = backoff.as_secs(), "coordinator phase failed");

                    if consecutive_errors >= self.max_consecutive_errors {
                        return Err(err);
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = stop_rx.changed() => {}
                    }
                }
            }
        }
    }

    async fn run_phase<F, Fut>(&self, process_batch: &mut F) -> Result<Option<u64>, IndexerError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<crate::processor::ProcessedPointer>, IndexerError>>,
    {
        if let Some(reorg_block) = self.detector.detect().await? {
            if self.auto_handle_reorgs {
                self.detector.handle(reorg_block).await?;
            } else {
                return Err(IndexerError::ReorgUnhandled(reorg_block));
            }
        }

        let fetch_result = self.fetcher.fetch().await?;
        process_batch().await?;

        Ok(fetch_result.map(|r| r.to))
    }
}

/// Creates the linked `stop`/`stopped` channel pair.
pub fn shutdown_channel() -> (ShutdownHandle, watch::Receiver<bool>, watch::Sender<bool>) {
    let (stop_tx, stop_rx) = watch::channel(false);
    let (stopped_tx, stopped_rx) = watch::channel(false);
    (
        ShutdownHandle { stop_tx, stopped_rx },
        stop_rx,
        stopped_tx,
    )
}
