pub mod client;
pub mod retry;

pub use client::{AlloyRpcClient, ChainRpc};
pub use retry::RetryPolicy;
