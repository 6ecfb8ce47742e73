//! Orphan inspection
//!
//! Prints domain rows whose stored event pointer no longer matches any
//! `RawEvent`. Read-only — it never deletes anything, it only reports what
//! a reorg's cleanup may have missed.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin orphans
//! ```

use chainidx_common::config::AppConfig;
use chainidx_common::db;
use chainidx_core::reorg::find_orphans;
use chainidx_store::Schema;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("orphans=info,warn")
        .init();

    let config = AppConfig::from_env()?;
    let schema = Schema::try_new(config.database_schema.clone())
        .map_err(|e| anyhow::anyhow!("invalid database.schema: {e}"))?;
    let pool = db::create_pool(&config.database_url, schema.as_str(), config.db_max_connections).await?;
    let chain_id: i64 = config.network.parse().unwrap_or(0);

    let orphans = find_orphans(&pool, &schema, chain_id).await?;

    if orphans.is_empty() {
        println!("No orphans found in schema \"{}\".", schema.as_str());
        return Ok(());
    }

    println!("Found {} orphan row(s):", orphans.len());
    println!();
    for orphan in &orphans {
        println!(
            "  table={:<20} account_id={:<24} pointer=({}, {}, {})",
            orphan.table_name,
            orphan.account_id,
            orphan.last_event_block,
            orphan.last_event_tx_index,
            orphan.last_event_log_index
        );
    }

    Ok(())
}
