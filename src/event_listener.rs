//! Call lifecycle events.
//!
//! An [`EventListener`] observes one call: when it starts and ends, each
//! connection attempt, and each connection it holds.  Listeners are created
//! per call by the client's [`EventListenerFactory`], so per-call state can
//! live in the listener itself.
//!
//! Every method has an empty default body.  Events fire on whatever thread
//! is driving the call, so implementations must be quick.

use crate::address::Route;
use crate::error::Error;
use crate::protocol::Protocol;
use crate::request::Request;
use crate::response::Response;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

/// Observes the lifecycle of a single call.
#[allow(unused_variables)]
pub trait EventListener: Send + Sync {
    /// The call was executed or enqueued and is about to run.
    fn call_start(&self, request: &Request) {}

    /// A name lookup for `host` is starting.
    fn dns_start(&self, host: &str) {}

    /// A name lookup finished with `addresses`.
    fn dns_end(&self, host: &str, addresses: &[SocketAddr]) {}

    /// A connection attempt over `route` is starting.
    fn connect_start(&self, route: &Route) {}

    /// A connection over `route` was established and will speak
    /// `protocol`.
    fn connect_end(&self, route: &Route, protocol: Protocol) {}

    /// A connection attempt over `route` failed.  The call may still
    /// succeed over another route.
    fn connect_failed(&self, route: &Route, error: &Error) {}

    /// A connection was assigned to the call.  `pooled` is `true` when it
    /// was reused from the pool.
    fn connection_acquired(&self, route: &Route, pooled: bool) {}

    /// The call no longer holds the connection over `route`.
    fn connection_released(&self, route: &Route) {}

    /// The response head arrived.
    fn response_headers_end(&self, response: &Response) {}

    /// The call finished with a response.
    fn call_end(&self, request: &Request) {}

    /// The call finished with an error.
    fn call_failed(&self, request: &Request, error: &Error) {}

    /// [`cancel()`](crate::RealCall::cancel) was called.
    fn canceled(&self, request: &Request) {}
}

/// Creates a listener for each new call.
pub trait EventListenerFactory: Send + Sync {
    /// A listener for the call about to be made for `request`.
    fn create(&self, request: &Request) -> Arc<dyn EventListener>;
}

impl<F> EventListenerFactory for F
where
    F: Fn(&Request) -> Arc<dyn EventListener> + Send + Sync,
{
    fn create(&self, request: &Request) -> Arc<dyn EventListener> {
        self(request)
    }
}

/// Ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvents;

impl EventListener for NoEvents {}

/// Hands the same listener to every call.
pub(crate) struct SharedListener(pub(crate) Arc<dyn EventListener>);

impl EventListenerFactory for SharedListener {
    fn create(&self, _request: &Request) -> Arc<dyn EventListener> {
        Arc::clone(&self.0)
    }
}

pub(crate) fn none() -> Arc<dyn EventListenerFactory> {
    static NONE: OnceLock<Arc<SharedListener>> = OnceLock::new();
    NONE.get_or_init(|| Arc::new(SharedListener(Arc::new(NoEvents))))
        .clone()
}
