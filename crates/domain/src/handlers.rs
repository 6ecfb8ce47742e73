use async_trait::async_trait;
use chainidx_common::error::IndexerError;
use chainidx_common::types::EventPointer;
use chainidx_decode::DomainEvent;
use sqlx::{Postgres, Transaction};

use crate::context::HandlerContext;

/// A handler maps one decoded `DomainEvent` variant to domain writes, all
/// through the supplied transaction handle. These two implementations exist
/// to exercise the processor's transactional contract end-to-end; they are
/// intentionally inert beyond updating an event pointer.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ctx: &HandlerContext<'_>,
        event: &DomainEvent,
        pointer: EventPointer,
        transaction_hash: &str,
    ) -> Result<(), IndexerError>;
}

pub struct AccountMetadataHandler;

#[async_trait]
impl Handler for AccountMetadataHandler {
    async fn handle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ctx: &HandlerContext<'_>,
        event: &DomainEvent,
        pointer: EventPointer,
        _transaction_hash: &str,
    ) -> Result<(), IndexerError> {
        let DomainEvent::AccountMetadataEmitted { account_id, metadata } = event else {
            return Err(IndexerError::Integrity(format!(
                "AccountMetadataHandler invoked with {}",
                event.name()
            )));
        };

        ctx.accounts
            .upsert_metadata(tx, account_id, metadata.clone(), pointer)
            .await
    }
}

pub struct GenericSinkHandler;

#[async_trait]
impl Handler for GenericSinkHandler {
    async fn handle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ctx: &HandlerContext<'_>,
        event: &DomainEvent,
        pointer: EventPointer,
        transaction_hash: &str,
    ) -> Result<(), IndexerError> {
        let DomainEvent::Generic { topics, data } = event else {
            return Err(IndexerError::Integrity(format!(
                "GenericSinkHandler invoked with {}",
                event.name()
            )));
        };

        let payload = serde_json::json!({ "topics": topics, "data": data });
        ctx.generic_events
            .insert(
                tx,
                transaction_hash,
                pointer.log_index as i32,
                event.name(),
                payload,
                pointer.block_number,
            )
            .await
    }
}

/// Maps `DomainEvent` names to handlers, keyed by event name.
#[derive(Default)]
pub struct HandlerRegistry {
    by_name: std::collections::HashMap<&'static str, Box<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The two illustrative handlers wired up out of the box.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("AccountMetadataEmitted", Box::new(AccountMetadataHandler));
        registry.register("Generic", Box::new(GenericSinkHandler));
        registry
    }

    pub fn register(&mut self, event_name: &'static str, handler: Box<dyn Handler>) {
        self.by_name.insert(event_name, handler);
    }

    pub fn resolve(&self, event_name: &str) -> Option<&dyn Handler> {
        self.by_name.get(event_name).map(|h| h.as_ref())
    }
}
