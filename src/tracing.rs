//! Internal logging shims.
//!
//! With the `tracing` feature these forward to [`tracing`]; without it they
//! expand to nothing, so call-sites in the engine, pool and dispatcher
//! never carry `#[cfg]` noise.

// Only one side of each cfg pair is active at a time.
#![allow(unused_macros)]

#[cfg(feature = "tracing")]
macro_rules! trace {
    ($($tt:tt)*) => { tracing::trace!($($tt)*) }
}

#[cfg(feature = "tracing")]
macro_rules! debug {
    ($($tt:tt)*) => { tracing::debug!($($tt)*) }
}

#[cfg(feature = "tracing")]
macro_rules! warn {
    ($($tt:tt)*) => { tracing::warn!($($tt)*) }
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace {
    ($($tt:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug {
    ($($tt:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn {
    ($($tt:tt)*) => {};
}

/// Subscriber that accepts everything and records nothing, so field
/// expressions inside the shims are evaluated under test.
#[cfg(all(test, feature = "tracing"))]
pub(crate) struct SinkSubscriber;

#[cfg(all(test, feature = "tracing"))]
impl ::tracing::Subscriber for SinkSubscriber {
    fn enabled(&self, _: &::tracing::Metadata<'_>) -> bool {
        true
    }
    fn new_span(&self, _: &::tracing::span::Attributes<'_>) -> ::tracing::span::Id {
        ::tracing::span::Id::from_u64(1)
    }
    fn record(&self, _: &::tracing::span::Id, _: &::tracing::span::Record<'_>) {}
    fn record_follows_from(&self, _: &::tracing::span::Id, _: &::tracing::span::Id) {}
    fn event(&self, _: &::tracing::Event<'_>) {}
    fn enter(&self, _: &::tracing::span::Id) {}
    fn exit(&self, _: &::tracing::span::Id) {}
}

#[cfg(all(test, feature = "tracing"))]
#[test]
fn shims_evaluate_fields_under_sink() {
    let _guard = ::tracing::subscriber::set_default(SinkSubscriber);
    let url = crate::UnoUrl::get("https://user:pw@example.com/a").unwrap();
    trace!(url = %url.redact(), "trace shim");
    debug!(host = url.host(), port = url.port(), "debug shim");
    warn!("warn shim for {}", url.redact());
    let span = ::tracing::trace_span!("call", url = %url.redact());
    let _entered = span.enter();
}
