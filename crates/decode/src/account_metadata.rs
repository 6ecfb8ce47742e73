use alloy::primitives::{keccak256, Log, B256};
use serde_json::json;

use crate::{DecodeOutcome, DomainEvent, EventDecoder};

/// Decodes `AccountMetadataEmitted(uint256 indexed accountId, bytes32 key, bytes value)`.
///
/// One of the two illustrative decoders this workspace ships end-to-end,
/// exercising the decode -> dispatch -> transaction contract without
/// encoding real protocol business rules.
pub struct AccountMetadataDecoder {
    signature: B256,
}

impl AccountMetadataDecoder {
    pub fn new() -> Self {
        Self {
            signature: keccak256("AccountMetadataEmitted(uint256,bytes32,bytes)"),
        }
    }
}

impl Default for AccountMetadataDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDecoder for AccountMetadataDecoder {
    fn event_signature(&self) -> B256 {
        self.signature
    }

    fn event_name(&self) -> &'static str {
        "AccountMetadataEmitted"
    }

    fn decode(&self, log: &Log) -> DecodeOutcome {
        let Some(account_id_topic) = log.topics().get(1) else {
            return DecodeOutcome::MissingFields;
        };

        let account_id = u128::from_be_bytes(
            account_id_topic.as_slice()[16..32]
                .try_into()
                .unwrap_or([0u8; 16]),
        )
        .to_string();

        let data = log.data.data.as_ref();
        if data.len() < 32 {
            return DecodeOutcome::DecodeError {
                reason: format!("expected >= 32 bytes of ABI-encoded data, got {}", data.len()),
            };
        }

        let key = format!("0x{}", alloy::hex::encode(&data[0..32]));
        let value = format!("0x{}", alloy::hex::encode(&data[32..]));

        DecodeOutcome::Decoded(DomainEvent::AccountMetadataEmitted {
            account_id,
            metadata: json!({ "key": key, "value": value }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, U256};

    fn topic_for(account_id: u128) -> B256 {
        B256::from(U256::from(account_id))
    }

    #[test]
    fn decodes_account_id_from_topic() {
        let decoder = AccountMetadataDecoder::new();
        let log = Log::new_unchecked(
            address!("0000000000000000000000000000000000000001"),
            vec![decoder.event_signature(), topic_for(42)],
            vec![0u8; 64].into(),
        );

        match decoder.decode(&log) {
            DecodeOutcome::Decoded(DomainEvent::AccountMetadataEmitted { account_id, .. }) => {
                assert_eq!(account_id, "42");
            }
            other => panic!("expected Decoded(AccountMetadataEmitted), got {other:?}"),
        }
    }

    #[test]
    fn missing_account_id_topic_is_missing_fields() {
        let decoder = AccountMetadataDecoder::new();
        let log = Log::new_unchecked(
            address!("0000000000000000000000000000000000000001"),
            vec![decoder.event_signature()],
            Default::default(),
        );
        assert_eq!(decoder.decode(&log), DecodeOutcome::MissingFields);
    }

    #[test]
    fn short_data_is_decode_error() {
        let decoder = AccountMetadataDecoder::new();
        let log = Log::new_unchecked(
            address!("0000000000000000000000000000000000000001"),
            vec![decoder.event_signature(), topic_for(1)],
            vec![0u8; 4].into(),
        );
        assert!(matches!(decoder.decode(&log), DecodeOutcome::DecodeError { .. }));
    }
}
