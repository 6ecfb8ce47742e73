pub mod block_hash;
pub mod cursor;
pub mod events;
pub mod identifier;
pub mod lock;

use chainidx_common::error::IndexerError;

/// A schema name that has already passed [`identifier::is_valid_identifier`].
///
/// Every table-qualifying helper in this crate goes through a `Schema`
/// rather than taking a raw `&str`, so there is exactly one place a caller
/// can smuggle an unvalidated name into a query: constructing this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Schema(String);

impl Schema {
    pub fn try_new(name: impl Into<String>) -> Result<Self, IndexerError> {
        let name = name.into();
        if !identifier::is_valid_identifier(&name) {
            return Err(IndexerError::InvalidIdentifier(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `"schema"."table"` with both idents quoted. `table` must already be a
    /// validated identifier — this does not re-check it, so callers must
    /// only pass compile-time literals or a name that has been through
    /// [`identifier::is_valid_identifier`] itself (as `events::discover_event_log_tables` does).
    pub fn qualify(&self, table: &str) -> String {
        format!("\"{}\".\"{}\"", self.0, table)
    }
}

/// Postgres bind-parameter ceiling; batch inserts must chunk beneath it.
pub(crate) const MAX_BIND_PARAMS: usize = 65_535;

pub(crate) fn chunk_size(columns_per_row: usize) -> usize {
    (MAX_BIND_PARAMS / columns_per_row.max(1)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_rejects_invalid_names() {
        assert!(Schema::try_new("drips").is_ok());
        assert!(Schema::try_new("drips; DROP TABLE x;").is_err());
    }

    #[test]
    fn qualify_quotes_both_parts() {
        let schema = Schema::try_new("drips").unwrap();
        assert_eq!(schema.qualify("_cursor"), "\"drips\".\"_cursor\"");
    }
}
