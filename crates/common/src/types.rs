use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of the chain a single indexer instance is bound to.
///
/// Stored as `bigint` in Postgres; kept as `u64` everywhere in Rust so
/// progress math never touches a float and never silently loses precision
/// above 2^53.
pub type ChainId = u64;

/// `(block_number, tx_index, log_index)` — uniquely identifies a log within
/// a chain and totally orders events for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventPointer {
    pub block_number: u64,
    pub tx_index: u32,
    pub log_index: u32,
}

impl EventPointer {
    pub fn new(block_number: u64, tx_index: u32, log_index: u32) -> Self {
        Self {
            block_number,
            tx_index,
            log_index,
        }
    }
}

impl std::fmt::Display for EventPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.block_number, self.tx_index, self.log_index
        )
    }
}

/// Lifecycle of a raw event row. `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Processed,
    Failed,
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventStatus::Pending => write!(f, "pending"),
            EventStatus::Processed => write!(f, "processed"),
            EventStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A block header summary, the unit the reorg window and the fetcher's
/// block-timestamp lookup are built from. Hashes are kept as `0x`-prefixed
/// hex strings so this crate stays free of a chain-client dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub number: u64,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
}

/// Durable "fetched-to" high-water mark for one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub chain_id: ChainId,
    pub fetched_to_block: u64,
    pub updated_at: DateTime<Utc>,
}

/// A raw event as decoded off-chain, ready for `EventStore::insert_batch`.
/// Carries no `id`/timestamps — those are assigned by the store on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRawEvent {
    pub chain_id: ChainId,
    pub pointer: EventPointer,
    pub block_hash: String,
    pub block_timestamp: DateTime<Utc>,
    pub transaction_hash: String,
    pub contract_address: String,
    pub event_name: String,
    pub event_signature: String,
    pub args: serde_json::Value,
}

/// A persisted raw event row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RawEvent {
    pub id: i64,
    pub chain_id: i64,
    pub block_number: i64,
    pub tx_index: i32,
    pub log_index: i32,
    pub block_hash: String,
    pub block_timestamp: DateTime<Utc>,
    pub transaction_hash: String,
    pub contract_address: String,
    pub event_name: String,
    pub event_signature: String,
    pub args: serde_json::Value,
    pub status: EventStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl RawEvent {
    pub fn pointer(&self) -> EventPointer {
        EventPointer::new(
            self.block_number as u64,
            self.tx_index as u32,
            self.log_index as u32,
        )
    }
}

/// Candidate domain kind for a newly-minted NFT that parked in
/// `_pending_nft_transfers` because its type isn't yet determinable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum PendingNftKind {
    DripList,
    EcosystemMainAccount,
}

/// A row parked in `_pending_nft_transfers`, awaiting the disambiguating
/// metadata event. Migrates atomically into the resolved domain table when
/// a handler resolves `candidate_kind`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingNftTransfer {
    pub token_id: String,
    pub candidate_kind: Option<PendingNftKind>,
    pub created_at: DateTime<Utc>,
    pub last_event_block: i64,
    pub last_event_tx_index: i32,
    pub last_event_log_index: i32,
}

/// An orphan diagnostic: a domain row whose event pointer no longer matches
/// any `RawEvent`. Advisory only — the core never deletes these on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanRow {
    pub table_name: String,
    pub account_id: String,
    pub last_event_block: u64,
    pub last_event_tx_index: u32,
    pub last_event_log_index: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_pointer_orders_lexicographically() {
        let a = EventPointer::new(10, 0, 5);
        let b = EventPointer::new(10, 1, 0);
        let c = EventPointer::new(11, 0, 0);
        assert!(a < b);
        assert!(b < c);
        assert!(a < c);
    }

    #[test]
    fn event_pointer_equal_fields_are_equal() {
        assert_eq!(EventPointer::new(1, 2, 3), EventPointer::new(1, 2, 3));
    }

    #[test]
    fn event_status_display_matches_db_rendering() {
        assert_eq!(EventStatus::Pending.to_string(), "pending");
        assert_eq!(EventStatus::Processed.to_string(), "processed");
        assert_eq!(EventStatus::Failed.to_string(), "failed");
    }
}
