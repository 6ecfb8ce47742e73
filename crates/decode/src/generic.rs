use alloy::primitives::{keccak256, Log};

use crate::{DecodeOutcome, DomainEvent, EventDecoder};

/// Fallback decoder that records a log's raw topics and data verbatim as
/// `DomainEvent::Generic` instead of interpreting its ABI.
///
/// Registered explicitly for whatever `(address, event signature text)`
/// pairs a deployment wants a raw audit trail for. Unlike an unconditional
/// catch-all, this registry has no room for wildcard matching: every
/// signature text a deployment cares about needs its own registration.
pub struct GenericDecoder {
    signature_text: &'static str,
    signature: alloy::primitives::B256,
}

impl GenericDecoder {
    pub fn new(signature_text: &'static str) -> Self {
        Self {
            signature_text,
            signature: keccak256(signature_text),
        }
    }
}

impl EventDecoder for GenericDecoder {
    fn event_signature(&self) -> alloy::primitives::B256 {
        self.signature
    }

    fn event_name(&self) -> &'static str {
        self.signature_text
    }

    fn decode(&self, log: &Log) -> DecodeOutcome {
        if log.topics().is_empty() {
            return DecodeOutcome::MissingFields;
        }

        let topics = log.topics().iter().map(|t| format!("{:#x}", t)).collect();
        let data = format!("0x{}", alloy::hex::encode(log.data.data.as_ref()));

        DecodeOutcome::Decoded(DomainEvent::Generic { topics, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, B256};

    fn log_with_topics(topics: Vec<B256>) -> Log {
        Log::new_unchecked(
            address!("0000000000000000000000000000000000000001"),
            topics,
            Default::default(),
        )
    }

    #[test]
    fn decodes_topics_and_data_verbatim() {
        let decoder = GenericDecoder::new("SomeEvent(uint256)");
        let topic0 = decoder.event_signature();
        let log = log_with_topics(vec![topic0]);

        match decoder.decode(&log) {
            DecodeOutcome::Decoded(DomainEvent::Generic { topics, .. }) => {
                assert_eq!(topics, vec![format!("{:#x}", topic0)]);
            }
            other => panic!("expected Decoded(Generic), got {other:?}"),
        }
    }

    #[test]
    fn missing_topics_is_missing_fields() {
        let decoder = GenericDecoder::new("SomeEvent(uint256)");
        let log = log_with_topics(vec![]);
        assert_eq!(decoder.decode(&log), DecodeOutcome::MissingFields);
    }
}
