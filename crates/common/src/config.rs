use serde::Deserialize;

/// Maximum length of a Postgres identifier this indexer is willing to
/// splice into SQL (schema names, discovered `*_events` table names).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// `database.schema` must match `[A-Za-z_][A-Za-z0-9_]{0,62}`. Shared with
/// `chainidx-store`'s table-name validator so both enforce the exact same
/// grammar.
pub fn is_valid_identifier(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN {
        return false;
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap();
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Global application configuration loaded from environment variables.
///
/// `from_env` validates eagerly and fails fast on the first missing or
/// malformed required option.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Selects the chain-config bundle (`network`). Opaque to the core.
    pub network: String,

    /// PostgreSQL connection string (`database.url`).
    pub database_url: String,

    /// Target schema; validated against the identifier grammar at load time
    /// rather than at first query (`database.schema`).
    pub database_schema: String,

    /// JSON-RPC endpoint for chain reads (`chain.rpc_url`).
    pub chain_rpc_url: String,

    /// Lag from head treated as "safe" (`chain.confirmations`, default 1).
    pub confirmations: u32,

    /// First block to index, inclusive (`chain.start_block`).
    pub start_block: u64,

    /// Opaque value threaded into `HandlerContext`, never interpreted by
    /// the core (`chain.visibility_threshold_block_number`).
    pub visibility_threshold_block_number: u64,

    /// Max blocks per fetch window (`indexer.fetch_batch_size`, default 500).
    pub fetch_batch_size: u32,

    /// Raw-event insert chunk size (`indexer.insert_chunk_size`, default 1000).
    pub insert_chunk_size: u32,

    /// Events per processor transaction (`indexer.process_batch_size`, default 100).
    pub process_batch_size: u32,

    /// Sleep when caught up, in milliseconds (`indexer.poll_delay_ms`, default 5000).
    pub poll_delay_ms: u64,

    /// Coordinator failure threshold (`indexer.max_consecutive_errors`, default 10).
    pub max_consecutive_errors: u32,

    /// Per-range block-lookup parallelism (`indexer.rpc_concurrency`, default 10).
    pub rpc_concurrency: u32,

    /// Whether the coordinator recovers from a detected reorg automatically,
    /// or treats it as fatal (`indexer.auto_handle_reorgs`, default false).
    pub auto_handle_reorgs: bool,

    /// Maximum PostgreSQL connections in the pool (default 20).
    pub db_max_connections: u32,

    /// External HTTP health endpoint port. Accepted and stored, never bound
    /// — health serving is out of core scope (`health.port`).
    pub health_port: Option<u16>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_schema = std::env::var("DATABASE_SCHEMA")
            .map_err(|_| anyhow::anyhow!("DATABASE_SCHEMA environment variable is required"))?;
        if !is_valid_identifier(&database_schema) {
            return Err(anyhow::anyhow!(
                "DATABASE_SCHEMA '{}' is not a valid identifier (must match [A-Za-z_][A-Za-z0-9_]{{0,62}})",
                database_schema
            ));
        }

        Ok(Self {
            network: std::env::var("NETWORK")
                .map_err(|_| anyhow::anyhow!("NETWORK environment variable is required"))?,
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            database_schema,
            chain_rpc_url: std::env::var("CHAIN_RPC_URL")
                .map_err(|_| anyhow::anyhow!("CHAIN_RPC_URL environment variable is required"))?,
            confirmations: parse_env_or("CONFIRMATIONS", 1)?,
            start_block: std::env::var("START_BLOCK")
                .map_err(|_| anyhow::anyhow!("START_BLOCK environment variable is required"))?
                .parse()
                .map_err(|_| anyhow::anyhow!("START_BLOCK must be a valid u64"))?,
            visibility_threshold_block_number: parse_env_or(
                "VISIBILITY_THRESHOLD_BLOCK_NUMBER",
                0,
            )?,
            fetch_batch_size: parse_env_or("FETCH_BATCH_SIZE", 500)?,
            insert_chunk_size: parse_env_or("INSERT_CHUNK_SIZE", 1000)?,
            process_batch_size: parse_env_or("PROCESS_BATCH_SIZE", 100)?,
            poll_delay_ms: parse_env_or("POLL_DELAY_MS", 5000)?,
            max_consecutive_errors: parse_env_or("MAX_CONSECUTIVE_ERRORS", 10)?,
            rpc_concurrency: parse_env_or("RPC_CONCURRENCY", 10)?,
            auto_handle_reorgs: parse_env_or("AUTO_HANDLE_REORGS", false)?,
            db_max_connections: parse_env_or("DB_MAX_CONNECTIONS", 20)?,
            health_port: std::env::var("HEALTH_PORT").ok().map_or(Ok(None), |v| {
                v.parse::<u16>()
                    .map(Some)
                    .map_err(|_| anyhow::anyhow!("HEALTH_PORT must be a valid u16 if set"))
            })?,
        })
    }
}

/// Parse an optional environment variable with a typed default, producing a
/// descriptive error if present but malformed.
fn parse_env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} must be a valid value")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_identifiers() {
        assert!(is_valid_identifier("drips"));
        assert!(is_valid_identifier("_drips_1"));
        assert!(is_valid_identifier("a"));
    }

    #[test]
    fn rejects_invalid_identifiers() {
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1drips"));
        assert!(!is_valid_identifier("drips;DROP TABLE"));
        assert!(!is_valid_identifier("drips-prod"));
        assert!(!is_valid_identifier(&"a".repeat(64)));
    }

    #[test]
    fn max_len_identifier_is_valid() {
        assert!(is_valid_identifier(&"a".repeat(63)));
    }
}
