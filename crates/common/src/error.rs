use thiserror::Error;

/// Errors shared across the indexer's library crates.
///
/// `is_transient` is the single classifier consulted at both retry
/// boundaries (the RPC client's internal retry loop, and the repository-call
/// boundary the coordinator's outer backoff consults). A `thiserror` enum
/// rather than a bare `anyhow::Error` so that boundary can match on kind
/// instead of string-sniffing a message.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("rpc timeout after {0} attempts")]
    RpcTimeout(u32),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("reorg depth exceeded: tail-to-mismatch depth {depth} > cap {cap}")]
    ReorgDepthExceeded { depth: u64, cap: u64 },

    #[error("reorg detected at block {0} and auto_handle_reorgs is disabled")]
    ReorgUnhandled(u64),

    #[error("advisory lock unavailable: {0}")]
    LockUnavailable(String),

    #[error("cursor not initialized for chain {0}")]
    CursorNotInitialized(u64),
}

impl IndexerError {
    /// Whether this error should be retried at the boundary that observed
    /// it, vs. surfaced immediately as permanent.
    ///
    /// Transient DB errors (serialization failure, deadlock, connection
    /// lost, lock timeout) and transient RPC errors (network, rate-limit,
    /// generic timeout) retry; everything else — decode errors, integrity
    /// violations, depth-cap and lock failures — does not.
    pub fn is_transient(&self) -> bool {
        match self {
            IndexerError::Database(e) => is_transient_db_error(e),
            IndexerError::Rpc(msg) => is_transient_rpc_message(msg),
            IndexerError::RpcTimeout(_) => true,
            _ => false,
        }
    }
}

/// Classifies a `sqlx::Error` as transient (connection loss, pool exhaustion,
/// serialization failure, deadlock, lock timeout) or permanent (everything
/// else, including constraint violations and malformed queries).
pub fn is_transient_db_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            // serialization_failure, deadlock_detected, lock_not_available
            Some("40001") | Some("40P01") | Some("55P03") => true,
            _ => false,
        },
        _ => false,
    }
}

/// Classifies a raw JSON-RPC/transport error message. Specific JSON-RPC
/// codes {-32600, -32601, -32602} (invalid request, method not found,
/// invalid params) are permanent; everything else observed at this layer
/// (network, timeout, rate-limit) is treated as transient.
pub fn is_transient_rpc_message(message: &str) -> bool {
    const PERMANENT_CODES: [&str; 3] = ["-32600", "-32601", "-32602"];
    !PERMANENT_CODES.iter().any(|code| message.contains(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_json_rpc_codes_are_not_transient() {
        assert!(!is_transient_rpc_message("error -32601: method not found"));
        assert!(!is_transient_rpc_message("-32600 invalid request"));
        assert!(!is_transient_rpc_message("-32602 invalid params"));
    }

    #[test]
    fn other_rpc_errors_are_transient() {
        assert!(is_transient_rpc_message("connection reset by peer"));
        assert!(is_transient_rpc_message("request timed out"));
        assert!(is_transient_rpc_message("429 too many requests"));
    }

    #[test]
    fn pool_errors_are_transient() {
        let err = IndexerError::Database(sqlx::Error::PoolTimedOut);
        assert!(err.is_transient());
    }

    #[test]
    fn decode_errors_are_not_transient() {
        let err = IndexerError::Decode("bad abi".into());
        assert!(!err.is_transient());
    }

    #[test]
    fn reorg_depth_exceeded_is_not_transient() {
        let err = IndexerError::ReorgDepthExceeded { depth: 200, cap: 100 };
        assert!(!err.is_transient());
    }
}
