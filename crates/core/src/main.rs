use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{address, Address};
use chainidx_common::config::AppConfig;
use chainidx_common::db;
use chainidx_core::coordinator::{shutdown_channel, Coordinator};
use chainidx_core::fetcher::BlockFetcher;
use chainidx_core::processor::EventProcessor;
use chainidx_core::reorg::ReorgDetector;
use chainidx_decode::account_metadata::AccountMetadataDecoder;
use chainidx_decode::generic::GenericDecoder;
use chainidx_decode::DecoderRegistry;
use chainidx_domain::context::{PgAccountsRepo, PgGenericEventsRepo};
use chainidx_domain::HandlerRegistry;
use chainidx_rpc::{AlloyRpcClient, RetryPolicy};
use chainidx_store::Schema;

/// Placeholder contract address the sample `AccountMetadataEmitted` decoder
/// is bound to. Real chain-config address resolution (one bundle per
/// `network`) is out of scope; a production deployment supplies its own
/// fixed address set here.
fn sample_contract_address(_network: &str) -> Address {
    address!("0000000000000000000000000000000000000001")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chainidx_core=info,chainidx_rpc=info,chainidx_store=info".into()),
        )
        .json()
        .init();

    tracing::info!("chainidx starting...");

    let config = AppConfig::from_env()?;

    let schema = Schema::try_new(config.database_schema.clone())
        .map_err(|e| anyhow::anyhow!("invalid database.schema: {e}"))?;

    let pool = db::create_pool(&config.database_url, schema.as_str(), config.db_max_connections).await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("database migrations applied");

    let chain_id: u64 = config.network.parse().unwrap_or(0);

    let retry_policy = RetryPolicy::default();
    let rpc: Arc<dyn chainidx_rpc::ChainRpc> =
        Arc::new(AlloyRpcClient::connect(&config.chain_rpc_url, retry_policy)?);

    let account_address = sample_contract_address(&config.network);
    let mut decoders = DecoderRegistry::new();
    decoders.register(account_address, Box::new(AccountMetadataDecoder::new()));
    decoders.register(
        account_address,
        Box::new(GenericDecoder::new("FallbackEvent")),
    );
    let decoders = Arc::new(decoders);

    let handlers = HandlerRegistry::with_defaults();
    let accounts_repo = PgAccountsRepo::new(schema.clone());
    let generic_events_repo = PgGenericEventsRepo::new(schema.clone());

    let fetcher = BlockFetcher::new(
        pool.clone(),
        schema.clone(),
        chain_id,
        rpc.clone(),
        decoders.clone(),
        config.confirmations as u64,
        config.fetch_batch_size as u64,
        config.insert_chunk_size as usize,
        config.rpc_concurrency as usize,
    );

    let detector = ReorgDetector::new(
        pool.clone(),
        schema.clone(),
        chain_id,
        rpc.clone(),
        config.start_block,
    );

    let processor = EventProcessor::new(
        pool.clone(),
        schema.clone(),
        chain_id,
        &decoders,
        &handlers,
        &accounts_repo,
        &generic_events_repo,
        config.visibility_threshold_block_number,
        config.process_batch_size,
    );

    let coordinator = Coordinator::new(
        pool,
        schema,
        chain_id,
        config.start_block,
        config.auto_handle_reorgs,
        config.max_consecutive_errors,
        Duration::from_millis(config.poll_delay_ms),
        detector,
        fetcher,
    );

    let (shutdown, stop_rx, stopped_tx) = shutdown_channel();

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let run_fut = coordinator.run(stop_rx, stopped_tx, || async { processor.process_batch().await });
    tokio::pin!(run_fut);

    tokio::select! {
        result = &mut run_fut => {
            match result {
                Ok(()) => {
                    tracing::info!("coordinator stopped");
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(error = %e, "coordinator exited with error");
                    Err(e.into())
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down gracefully...");
            shutdown.stop();
            run_fut.await?;
            Ok(())
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, shutting down gracefully...");
            shutdown.stop();
            run_fut.await?;
            Ok(())
        }
    }
}
