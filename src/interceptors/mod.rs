//! Built-in pipeline stages.
//!
//! Each stage is an `async fn intercept(chain)` driven by
//! [`Chain::proceed`](crate::Chain::proceed); see [`crate::interceptor`]
//! for the order they run in.

pub(crate) mod bridge;
pub(crate) mod cache;
pub(crate) mod call_server;
pub(crate) mod connect;
pub(crate) mod retry_and_follow_up;
