pub mod context;
pub mod handlers;

pub use context::{AccountsRepo, GenericEventsRepo, HandlerContext, PgAccountsRepo, PgGenericEventsRepo};
pub use handlers::{AccountMetadataHandler, GenericSinkHandler, Handler, HandlerRegistry};
