//! The interceptor chain.
//!
//! Every call runs through a fixed list of stages:
//!
//! 1. application interceptors, in the order they were added
//! 2. retry and follow-up (redirects, auth challenges, connection retries)
//! 3. bridge (transport headers, cookies, gzip)
//! 4. cache
//! 5. connect (pooled or new connection)
//! 6. network interceptors (skipped for WebSocket handshakes)
//! 7. call server (the wire exchange)
//!
//! A stage receives a [`Chain`] positioned at the next stage and either
//! calls [`Chain::proceed`] or returns a response of its own.  Network
//! interceptors must call `proceed` exactly once and must not change the
//! request's host or port; breaking either rule fails the call with an
//! illegal-state error.

use crate::address::Route;
use crate::client::Httpd;
use crate::error::Error;
use crate::event_listener::EventListener;
use crate::interceptors;
use crate::pool::Lease;
use crate::request::Request;
use crate::response::Response;
use crate::util::{Shared, lock_or_clear};
use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Observes, rewrites or short-circuits calls.
///
/// ```rust
/// use futures_util::FutureExt;
/// use uno::interceptor;
///
/// let tag_user_agent = interceptor::from_fn(|chain| {
///     async move {
///         let request = chain.request().new_builder().header("User-Agent", "demo/1.0").build()?;
///         chain.proceed(request).await
///     }
///     .boxed()
/// });
/// let client = uno::Httpd::builder().add_interceptor(tag_user_agent).build();
/// # drop(client);
/// ```
pub trait Interceptor: Send + Sync {
    /// Handle the request in `chain`.
    fn intercept<'a>(&'a self, chain: Chain<'a>) -> BoxFuture<'a, crate::Result<Response>>;

    /// A name for error messages.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// An [`Interceptor`] backed by a closure.  See [`from_fn`].
pub struct FnInterceptor<F> {
    f: F,
}

impl<F> fmt::Debug for FnInterceptor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnInterceptor")
    }
}

/// Wrap a closure as an [`Interceptor`].
pub fn from_fn<F>(f: F) -> FnInterceptor<F>
where
    F: for<'a> Fn(Chain<'a>) -> BoxFuture<'a, crate::Result<Response>> + Send + Sync,
{
    FnInterceptor { f }
}

impl<F> Interceptor for FnInterceptor<F>
where
    F: for<'a> Fn(Chain<'a>) -> BoxFuture<'a, crate::Result<Response>> + Send + Sync,
{
    fn intercept<'a>(&'a self, chain: Chain<'a>) -> BoxFuture<'a, crate::Result<Response>> {
        (self.f)(chain)
    }
}

/// One step of the pipeline.
#[derive(Clone)]
pub(crate) enum Stage {
    Application(Shared<dyn Interceptor>),
    RetryAndFollowUp,
    Bridge,
    Cache,
    Connect,
    Network(Shared<dyn Interceptor>),
    CallServer,
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Application(i) => write!(f, "Application({})", i.name()),
            Stage::RetryAndFollowUp => f.write_str("RetryAndFollowUp"),
            Stage::Bridge => f.write_str("Bridge"),
            Stage::Cache => f.write_str("Cache"),
            Stage::Connect => f.write_str("Connect"),
            Stage::Network(i) => write!(f, "Network({})", i.name()),
            Stage::CallServer => f.write_str("CallServer"),
        }
    }
}

/// The stage list for a call made by `client`.
pub(crate) fn stages(client: &Httpd, for_web_socket: bool) -> Vec<Stage> {
    let mut stages: Vec<Stage> = client
        .interceptors()
        .iter()
        .cloned()
        .map(Stage::Application)
        .collect();
    stages.extend([Stage::RetryAndFollowUp, Stage::Bridge, Stage::Cache, Stage::Connect]);
    if !for_web_socket {
        stages.extend(client.network_interceptors().iter().cloned().map(Stage::Network));
    }
    stages.push(Stage::CallServer);
    stages
}

/// State shared by every stage of one call.
pub(crate) struct CallContext {
    pub(crate) client: Httpd,
    pub(crate) listener: Arc<dyn EventListener>,
    pub(crate) canceled: Arc<AtomicBool>,
    /// Set by the connect stage, taken by the call-server stage.
    pub(crate) connection: Mutex<Option<Lease>>,
}

impl CallContext {
    pub(crate) fn new(client: Httpd, listener: Arc<dyn EventListener>, canceled: Arc<AtomicBool>) -> Self {
        CallContext {
            client,
            listener,
            canceled,
            connection: Mutex::new(None),
        }
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    pub(crate) fn set_connection(&self, lease: Option<Lease>) -> Option<Lease> {
        std::mem::replace(&mut *lock_or_clear(&self.connection), lease)
    }

    pub(crate) fn take_connection(&self) -> Option<Lease> {
        lock_or_clear(&self.connection).take()
    }

    fn route(&self) -> Option<Route> {
        lock_or_clear(&self.connection).as_ref().and_then(|l| l.route().cloned())
    }
}

/// A request positioned at one stage of the pipeline.
///
/// Cloning a chain lets a stage proceed more than once (for example to
/// retry); network interceptors may still proceed only once.
#[derive(Clone)]
pub struct Chain<'a> {
    stages: &'a [Stage],
    index: usize,
    request: Request,
    ctx: &'a CallContext,
    calls: Arc<AtomicUsize>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl fmt::Debug for Chain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("stage", &self.stages.get(self.index))
            .field("request", &self.request)
            .finish()
    }
}

impl<'a> Chain<'a> {
    /// A chain positioned at the first stage.
    pub(crate) fn start(stages: &'a [Stage], request: Request, ctx: &'a CallContext) -> Self {
        let client = &ctx.client;
        Chain {
            stages,
            index: 0,
            request,
            ctx,
            calls: Arc::new(AtomicUsize::new(0)),
            connect_timeout: client.connect_timeout(),
            read_timeout: client.read_timeout(),
            write_timeout: client.write_timeout(),
        }
    }

    /// The request as it reached this stage.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The route of the connection carrying this call.  Set only for
    /// network interceptors.
    pub fn route(&self) -> Option<Route> {
        self.ctx.route()
    }

    /// `true` once the call was canceled.
    pub fn is_canceled(&self) -> bool {
        self.ctx.is_canceled()
    }

    /// Connect timeout for the remaining stages.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    /// Read timeout for the remaining stages.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Write timeout for the remaining stages.
    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    /// Override the connect timeout downstream.  `None` disables it.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the read timeout downstream.  `None` disables it.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Override the write timeout downstream.  `None` disables it.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub(crate) fn ctx(&self) -> &'a CallContext {
        self.ctx
    }

    pub(crate) fn client(&self) -> &'a Httpd {
        &self.ctx.client
    }

    /// Hand `request` to the next stage and wait for its response.
    pub fn proceed(self, request: Request) -> BoxFuture<'a, crate::Result<Response>> {
        let calls = self.calls.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(Stage::Network(previous)) = self.index.checked_sub(1).and_then(|i| self.stages.get(i)) {
            if calls > 1 {
                return future::ready(Err(Error::illegal_state(format!(
                    "network interceptor {} must call proceed() exactly once",
                    previous.name()
                ))))
                .boxed();
            }
            if let Some(route) = self.ctx.route() {
                let address = route.address();
                if request.url().host() != address.host() || request.url().port() != address.port() {
                    return future::ready(Err(Error::illegal_state(format!(
                        "network interceptor {} must retain the same host and port",
                        previous.name()
                    ))))
                    .boxed();
                }
            }
        }
        if self.ctx.is_canceled() {
            return future::ready(Err(Error::canceled())).boxed();
        }
        let next = Chain {
            index: self.index + 1,
            request,
            calls: Arc::new(AtomicUsize::new(0)),
            ..self
        };
        match self.stages.get(self.index) {
            Some(Stage::Application(interceptor)) => interceptor.0.intercept(next),
            Some(Stage::Network(interceptor)) => {
                let calls = Arc::clone(&next.calls);
                async move {
                    let response = interceptor.0.intercept(next).await?;
                    if calls.load(Ordering::Acquire) != 1 {
                        return Err(Error::illegal_state(format!(
                            "network interceptor {} must call proceed() exactly once",
                            interceptor.name()
                        )));
                    }
                    Ok(response)
                }
                .boxed()
            }
            Some(Stage::RetryAndFollowUp) => interceptors::retry_and_follow_up::intercept(next).boxed(),
            Some(Stage::Bridge) => interceptors::bridge::intercept(next).boxed(),
            Some(Stage::Cache) => interceptors::cache::intercept(next).boxed(),
            Some(Stage::Connect) => interceptors::connect::intercept(next).boxed(),
            Some(Stage::CallServer) => interceptors::call_server::intercept(next).boxed(),
            None => future::ready(Err(Error::illegal_state("no stage after call server"))).boxed(),
        }
    }
}
