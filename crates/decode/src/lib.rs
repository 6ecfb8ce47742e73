pub mod account_metadata;
pub mod generic;

use std::collections::HashMap;

use alloy::primitives::{Address, Log, B256};
use serde_json::Value;

/// Tagged-variant sum type covering every decoded event shape this workspace
/// knows about. `Generic` is the fallback carrying raw topics/data for
/// signatures that have no dedicated variant.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    AccountMetadataEmitted {
        account_id: String,
        metadata: Value,
    },
    OwnerUpdated {
        account_id: String,
        owner: String,
    },
    SplitsSet {
        account_id: String,
        receivers: Value,
    },
    Transfer {
        token_id: String,
        from: String,
        to: String,
    },
    Generic {
        topics: Vec<String>,
        data: String,
    },
}

impl DomainEvent {
    /// Stable name used for handler dispatch and log/skip messages.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::AccountMetadataEmitted { .. } => "AccountMetadataEmitted",
            DomainEvent::OwnerUpdated { .. } => "OwnerUpdated",
            DomainEvent::SplitsSet { .. } => "SplitsSet",
            DomainEvent::Transfer { .. } => "Transfer",
            DomainEvent::Generic { .. } => "Generic",
        }
    }
}

/// Result of attempting to decode one log.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    Decoded(DomainEvent),
    MissingHandler { event_name: String },
    DecodeError { reason: String },
    MissingFields,
}

/// A decoder bound to exactly one `(contract address, topic0)` pair.
/// Implementers decode ABI-known event shapes; `decode` never needs to
/// branch on signature since the registry has already routed the log here.
pub trait EventDecoder: Send + Sync {
    fn event_signature(&self) -> B256;
    fn event_name(&self) -> &'static str;
    fn decode(&self, log: &Log) -> DecodeOutcome;
}

/// Pure mapping from `(contract_address, first_topic)` to a registered
/// decoder. No "first decoder match wins" scanning — one exact key, one
/// handler.
#[derive(Default)]
pub struct DecoderRegistry {
    by_key: HashMap<(Address, B256), Box<dyn EventDecoder>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, address: Address, decoder: Box<dyn EventDecoder>) {
        let key = (address, decoder.event_signature());
        self.by_key.insert(key, decoder);
    }

    /// Deduplicated contract addresses this registry has a decoder for —
    /// the set `BlockFetcher` passes to `ChainRpc::get_logs`.
    pub fn contract_addresses(&self) -> Vec<Address> {
        let mut addrs: Vec<Address> = self.by_key.keys().map(|(addr, _)| *addr).collect();
        addrs.sort();
        addrs.dedup();
        addrs
    }

    pub fn resolve_handler(&self, address: Address, topic0: B256) -> Option<&dyn EventDecoder> {
        self.by_key.get(&(address, topic0)).map(|b| b.as_ref())
    }

    /// Decodes a single log. `MissingHandler` (ABI known, no registered
    /// decoder) and `MissingFields` (log lacks topics) are skip-and-log
    /// outcomes, never errors (decision recorded in DESIGN.md).
    pub fn decode(&self, log: &Log) -> DecodeOutcome {
        let Some(topic0) = log.topics().first() else {
            return DecodeOutcome::MissingFields;
        };

        match self.resolve_handler(log.address, *topic0) {
            Some(decoder) => decoder.decode(log),
            None => DecodeOutcome::MissingHandler {
                event_name: format!("{:#x}", topic0),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generic::GenericDecoder;
    use alloy::primitives::address;

    #[test]
    fn registry_dedupes_and_sorts_addresses() {
        let mut registry = DecoderRegistry::new();
        let a = address!("0000000000000000000000000000000000000001");
        let b = address!("0000000000000000000000000000000000000002");
        registry.register(a, Box::new(GenericDecoder::new("EventA")));
        registry.register(b, Box::new(GenericDecoder::new("EventB")));
        registry.register(a, Box::new(GenericDecoder::new("EventC")));

        let addrs = registry.contract_addresses();
        assert_eq!(addrs, vec![a, b]);
    }

    #[test]
    fn unregistered_topic_is_missing_handler() {
        let registry = DecoderRegistry::new();
        let addr = address!("0000000000000000000000000000000000000001");
        let topic = B256::repeat_byte(7);
        assert!(registry.resolve_handler(addr, topic).is_none());
    }
}
