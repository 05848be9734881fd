//! HTTP client and builder.
//!
//! [`Httpd`] is the main entry point.  Create one via [`Httpd::builder()`],
//! configure timeouts and policies, then call
//! [`.build()`](HttpdBuilder::build).  `Httpd` is cheap to clone (`Arc`
//! internally); clones share the dispatcher, connection pool, cookie jar
//! and cache.

use crate::address::Address;
use crate::authenticator::{self, Authenticator};
use crate::cache::Cache;
use crate::call::RealCall;
use crate::cookie_jar::{CookieJar, NoCookies};
use crate::dispatcher::Dispatcher;
use crate::dns::{self, Dns};
use crate::error::Error;
use crate::event_listener::{self, EventListener, EventListenerFactory, SharedListener};
use crate::interceptor::Interceptor;
use crate::pool::ConnectionPool;
use crate::protocol::{self, Protocol};
use crate::proxy::{EnvProxySelector, Proxy, ProxySelector};
use crate::redirect::{self, PolicyInner};
use crate::request::Request;
use crate::retry;
use crate::tls::{CertificatePinner, ConnectionSpec, HostnameVerifier, TlsConnector};
use crate::url::UnoUrl;
use crate::util::Shared;
use crate::websocket::{WebSocket, WebSocketFactory, WebSocketListener};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// An HTTP client: the policies every call shares.
///
/// ```rust
/// use std::time::Duration;
///
/// let client = uno::Httpd::builder()
///     .connect_timeout(Duration::from_secs(5))
///     .call_timeout(Duration::from_secs(30))
///     .build();
/// let call = client.new_call(uno::Request::get("http://localhost/")?);
/// assert!(!call.is_executed());
/// # Ok::<(), uno::Error>(())
/// ```
#[derive(Clone)]
pub struct Httpd {
    inner: Arc<HttpdInner>,
}

struct HttpdInner {
    dispatcher: Dispatcher,
    connection_pool: ConnectionPool,
    interceptors: Vec<Shared<dyn Interceptor>>,
    network_interceptors: Vec<Shared<dyn Interceptor>>,
    event_listener_factory: Arc<dyn EventListenerFactory>,
    retry_on_connection_failure: bool,
    retry_policy: retry::Policy,
    authenticator: Shared<dyn Authenticator>,
    proxy_authenticator: Shared<dyn Authenticator>,
    redirect: redirect::Policy,
    follow_ssl_redirects: bool,
    cookie_jar: Shared<dyn CookieJar>,
    cache: Option<Shared<dyn Cache>>,
    dns: Shared<dyn Dns>,
    proxy: Option<Proxy>,
    proxy_selector: Shared<dyn ProxySelector>,
    tls_connector: Option<Shared<dyn TlsConnector>>,
    hostname_verifier: Option<Shared<dyn HostnameVerifier>>,
    certificate_pinner: Option<Shared<dyn CertificatePinner>>,
    connection_specs: Vec<ConnectionSpec>,
    protocols: Vec<Protocol>,
    user_agent: String,
    call_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    web_socket_factory: Option<Arc<dyn WebSocketFactory>>,
}

impl fmt::Debug for Httpd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = &self.inner;
        f.debug_struct("Httpd")
            .field("protocols", &inner.protocols)
            .field("interceptors", &inner.interceptors.len())
            .field("network_interceptors", &inner.network_interceptors.len())
            .field("call_timeout", &inner.call_timeout)
            .field("connect_timeout", &inner.connect_timeout)
            .field("read_timeout", &inner.read_timeout)
            .field("write_timeout", &inner.write_timeout)
            .field("redirect", &inner.redirect)
            .field("user_agent", &inner.user_agent)
            .finish_non_exhaustive()
    }
}

impl Default for Httpd {
    fn default() -> Self {
        Self::new()
    }
}

impl Httpd {
    /// A client with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// A builder with default settings.
    pub fn builder() -> HttpdBuilder {
        HttpdBuilder::new()
    }

    /// A builder starting from this client's settings.  The built client
    /// shares this one's dispatcher, pool, cookie jar and cache.
    pub fn new_builder(&self) -> HttpdBuilder {
        let inner = &self.inner;
        HttpdBuilder {
            dispatcher: Some(inner.dispatcher.clone()),
            connection_pool: Some(inner.connection_pool.clone()),
            interceptors: inner.interceptors.clone(),
            network_interceptors: inner.network_interceptors.clone(),
            event_listener_factory: Arc::clone(&inner.event_listener_factory),
            retry_on_connection_failure: inner.retry_on_connection_failure,
            retry: RetrySetting::Built(inner.retry_policy.clone()),
            authenticator: inner.authenticator.clone(),
            proxy_authenticator: inner.proxy_authenticator.clone(),
            redirect: inner.redirect.clone(),
            follow_ssl_redirects: inner.follow_ssl_redirects,
            cookie_jar: inner.cookie_jar.clone(),
            cache: inner.cache.clone(),
            dns: inner.dns.clone(),
            proxy: inner.proxy.clone(),
            proxy_selector: Some(inner.proxy_selector.clone()),
            tls_connector: inner.tls_connector.clone(),
            hostname_verifier: inner.hostname_verifier.clone(),
            certificate_pinner: inner.certificate_pinner.clone(),
            connection_specs: inner.connection_specs.clone(),
            protocols: inner.protocols.clone(),
            user_agent: inner.user_agent.clone(),
            call_timeout: inner.call_timeout,
            connect_timeout: inner.connect_timeout,
            read_timeout: inner.read_timeout,
            write_timeout: inner.write_timeout,
            web_socket_factory: inner.web_socket_factory.clone(),
        }
    }

    /// Prepare `request` to be executed.
    pub fn new_call(&self, request: Request) -> RealCall {
        RealCall::new(self.clone(), request, false)
    }

    /// Prepare a WebSocket opening handshake.  Network interceptors are
    /// skipped for such calls.
    pub fn new_web_socket_call(&self, request: Request) -> RealCall {
        RealCall::new(self.clone(), request, true)
    }

    /// Open a WebSocket through the configured [`WebSocketFactory`].
    pub fn new_web_socket(
        &self,
        request: Request,
        listener: Arc<dyn WebSocketListener>,
    ) -> crate::Result<Box<dyn WebSocket>> {
        let factory = self
            .inner
            .web_socket_factory
            .as_ref()
            .ok_or_else(|| Error::builder("no WebSocket factory configured"))?;
        factory.new_web_socket(self, request, listener)
    }

    /// The [`Address`] calls to `url` connect to.
    pub fn address(&self, url: &UnoUrl) -> crate::Result<Address> {
        let inner = &self.inner;
        Address::builder(url)
            .dns(inner.dns.clone())
            .proxy_authenticator(inner.proxy_authenticator.clone())
            .protocols(inner.protocols.clone())
            .connection_specs(inner.connection_specs.clone())
            .proxy_selector(inner.proxy_selector.clone())
            .proxy(inner.proxy.clone())
            .tls(
                inner.tls_connector.clone(),
                inner.hostname_verifier.clone(),
                inner.certificate_pinner.clone(),
            )
            .build()
    }

    /// The dispatcher running this client's enqueued calls.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// The pool holding this client's idle connections.
    pub fn connection_pool(&self) -> &ConnectionPool {
        &self.inner.connection_pool
    }

    /// Application interceptors, outermost first.
    pub fn interceptors(&self) -> &[Shared<dyn Interceptor>] {
        &self.inner.interceptors
    }

    /// Network interceptors, outermost first.
    pub fn network_interceptors(&self) -> &[Shared<dyn Interceptor>] {
        &self.inner.network_interceptors
    }

    pub(crate) fn event_listener_factory(&self) -> &Arc<dyn EventListenerFactory> {
        &self.inner.event_listener_factory
    }

    /// Whether failed connection attempts and resets are retried.
    pub fn retry_on_connection_failure(&self) -> bool {
        self.inner.retry_on_connection_failure
    }

    pub(crate) fn retry_policy(&self) -> &retry::Policy {
        &self.inner.retry_policy
    }

    /// Answers 401 challenges.
    pub fn authenticator(&self) -> &Shared<dyn Authenticator> {
        &self.inner.authenticator
    }

    /// Answers 407 challenges.
    pub fn proxy_authenticator(&self) -> &Shared<dyn Authenticator> {
        &self.inner.proxy_authenticator
    }

    /// Whether 3xx responses are followed.
    pub fn follow_redirects(&self) -> bool {
        !matches!(self.inner.redirect.inner, PolicyInner::None)
    }

    /// Whether redirects between `http` and `https` are followed.
    pub fn follow_ssl_redirects(&self) -> bool {
        self.inner.follow_ssl_redirects
    }

    /// The cap on follow-up requests per call.
    pub fn max_follow_ups(&self) -> u32 {
        match self.inner.redirect.inner {
            PolicyInner::Limited(max) => max,
            PolicyInner::None => redirect::DEFAULT_MAX_FOLLOW_UPS,
        }
    }

    /// Where cookies come from and go to.
    pub fn cookie_jar(&self) -> &Shared<dyn CookieJar> {
        &self.inner.cookie_jar
    }

    /// The response cache, if any.
    pub fn cache(&self) -> Option<&Shared<dyn Cache>> {
        self.inner.cache.as_ref()
    }

    /// The `User-Agent` sent when a request has none.
    pub fn user_agent(&self) -> &str {
        &self.inner.user_agent
    }

    /// The protocols offered to servers.
    pub fn protocols(&self) -> &[Protocol] {
        &self.inner.protocols
    }

    /// The deadline for a whole call, redirects included.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.inner.call_timeout
    }

    /// The deadline for DNS, TCP connect, proxy tunnel and TLS handshake.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.inner.connect_timeout
    }

    /// The deadline for each read.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.inner.read_timeout
    }

    /// The deadline for each write.
    pub fn write_timeout(&self) -> Option<Duration> {
        self.inner.write_timeout
    }
}

/// Either a builder still to be built or a policy carried over from an
/// existing client, so that `new_builder` keeps the retry budget.
enum RetrySetting {
    Builder(retry::Builder),
    Built(retry::Policy),
}

/// Builder for configuring and constructing an [`Httpd`].
///
/// Obtain via [`Httpd::builder()`] or [`Httpd::new_builder()`].
pub struct HttpdBuilder {
    dispatcher: Option<Dispatcher>,
    connection_pool: Option<ConnectionPool>,
    interceptors: Vec<Shared<dyn Interceptor>>,
    network_interceptors: Vec<Shared<dyn Interceptor>>,
    event_listener_factory: Arc<dyn EventListenerFactory>,
    retry_on_connection_failure: bool,
    retry: RetrySetting,
    authenticator: Shared<dyn Authenticator>,
    proxy_authenticator: Shared<dyn Authenticator>,
    redirect: redirect::Policy,
    follow_ssl_redirects: bool,
    cookie_jar: Shared<dyn CookieJar>,
    cache: Option<Shared<dyn Cache>>,
    dns: Shared<dyn Dns>,
    proxy: Option<Proxy>,
    proxy_selector: Option<Shared<dyn ProxySelector>>,
    tls_connector: Option<Shared<dyn TlsConnector>>,
    hostname_verifier: Option<Shared<dyn HostnameVerifier>>,
    certificate_pinner: Option<Shared<dyn CertificatePinner>>,
    connection_specs: Vec<ConnectionSpec>,
    protocols: Vec<Protocol>,
    user_agent: String,
    call_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    web_socket_factory: Option<Arc<dyn WebSocketFactory>>,
}

impl fmt::Debug for HttpdBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpdBuilder")
            .field("protocols", &self.protocols)
            .field("interceptors", &self.interceptors.len())
            .field("network_interceptors", &self.network_interceptors.len())
            .field("call_timeout", &self.call_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

impl Default for HttpdBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn default_tls_connector() -> Option<Shared<dyn TlsConnector>> {
    #[cfg(feature = "rustls")]
    {
        let connector: Arc<dyn TlsConnector> = Arc::new(crate::tls::RustlsConnector::new());
        Some(Shared(connector))
    }
    #[cfg(not(feature = "rustls"))]
    {
        None
    }
}

impl HttpdBuilder {
    /// Default settings: 10 second connect, read and write timeouts, no
    /// call timeout, redirects followed up to 20 times, proxies from the
    /// environment.
    pub fn new() -> Self {
        HttpdBuilder {
            dispatcher: None,
            connection_pool: None,
            interceptors: Vec::new(),
            network_interceptors: Vec::new(),
            event_listener_factory: event_listener::none(),
            retry_on_connection_failure: true,
            retry: RetrySetting::Builder(retry::Builder::connection_resets()),
            authenticator: authenticator::none(),
            proxy_authenticator: authenticator::none(),
            redirect: redirect::Policy::default(),
            follow_ssl_redirects: true,
            cookie_jar: Shared(Arc::new(NoCookies)),
            cache: None,
            dns: dns::system(),
            proxy: None,
            proxy_selector: None,
            tls_connector: None,
            hostname_verifier: None,
            certificate_pinner: None,
            connection_specs: vec![ConnectionSpec::MODERN_TLS, ConnectionSpec::CLEARTEXT],
            protocols: vec![Protocol::Http2, Protocol::Http11],
            user_agent: concat!("uno/", env!("CARGO_PKG_VERSION")).to_owned(),
            call_timeout: None,
            connect_timeout: Some(DEFAULT_TIMEOUT),
            read_timeout: Some(DEFAULT_TIMEOUT),
            write_timeout: Some(DEFAULT_TIMEOUT),
            web_socket_factory: None,
        }
    }

    // -- Timeouts --

    /// Deadline for a whole call, redirects and retries included.
    ///
    /// Default: none.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Deadline for DNS, TCP connect, proxy tunnel and TLS handshake.
    /// A zero duration means no limit.
    ///
    /// Default: 10 seconds.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Deadline for each read.  A zero duration means no limit.
    ///
    /// Default: 10 seconds.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Deadline for each write.  A zero duration means no limit.
    ///
    /// Default: 10 seconds.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    // -- Interceptors and events --

    /// Append an application interceptor.  It sees each call once, with
    /// the caller's request and the final response.
    #[must_use]
    pub fn add_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        let interceptor: Arc<dyn Interceptor> = Arc::new(interceptor);
        self.interceptors.push(Shared(interceptor));
        self
    }

    /// Append a network interceptor.  It sees each network exchange and
    /// must call [`Chain::proceed`](crate::Chain::proceed) exactly once.
    #[must_use]
    pub fn add_network_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        let interceptor: Arc<dyn Interceptor> = Arc::new(interceptor);
        self.network_interceptors.push(Shared(interceptor));
        self
    }

    /// Hand the same listener to every call.
    #[must_use]
    pub fn event_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.event_listener_factory = Arc::new(SharedListener(listener));
        self
    }

    /// Create a listener per call.
    #[must_use]
    pub fn event_listener_factory(mut self, factory: impl EventListenerFactory + 'static) -> Self {
        self.event_listener_factory = Arc::new(factory);
        self
    }

    // -- Follow-ups and retries --

    /// Set the redirect policy.
    ///
    /// Default: follow up to 20 times.
    #[must_use]
    pub fn redirect(mut self, policy: redirect::Policy) -> Self {
        self.redirect = policy;
        self
    }

    /// Follow redirects that switch between `http` and `https`.
    ///
    /// Default: `true`.
    #[must_use]
    pub fn follow_ssl_redirects(mut self, follow: bool) -> Self {
        self.follow_ssl_redirects = follow;
        self
    }

    /// Retry unreachable routes, connection resets and `408`/`503`
    /// responses that allow it.
    ///
    /// Default: `true`.
    #[must_use]
    pub fn retry_on_connection_failure(mut self, retry: bool) -> Self {
        self.retry_on_connection_failure = retry;
        self
    }

    /// Set the retry classification and budget.
    ///
    /// Default: retry connection resets, with a budget.
    #[must_use]
    pub fn retry(mut self, policy: retry::Builder) -> Self {
        self.retry = RetrySetting::Builder(policy);
        self
    }

    /// Answer `401` challenges.
    #[must_use]
    pub fn authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        let authenticator: Arc<dyn Authenticator> = Arc::new(authenticator);
        self.authenticator = Shared(authenticator);
        self
    }

    /// Answer `407` challenges, including those of a tunnel.
    #[must_use]
    pub fn proxy_authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        let authenticator: Arc<dyn Authenticator> = Arc::new(authenticator);
        self.proxy_authenticator = Shared(authenticator);
        self
    }

    // -- State --

    /// Store and send cookies through `jar`.
    ///
    /// Default: [`NoCookies`].
    #[must_use]
    pub fn cookie_jar(mut self, jar: Arc<dyn CookieJar>) -> Self {
        self.cookie_jar = Shared(jar);
        self
    }

    /// Serve and store responses through `cache`.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(Shared(cache));
        self
    }

    /// Run enqueued calls on `dispatcher`.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Keep idle connections in `pool`.
    #[must_use]
    pub fn connection_pool(mut self, pool: ConnectionPool) -> Self {
        self.connection_pool = Some(pool);
        self
    }

    // -- Routing --

    /// Resolve hosts with `dns`.
    #[must_use]
    pub fn dns(mut self, dns: impl Dns + 'static) -> Self {
        let dns: Arc<dyn Dns> = Arc::new(dns);
        self.dns = Shared(dns);
        self
    }

    /// Send every call through `proxy`, ignoring the proxy selector.
    #[must_use]
    pub fn proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Pick proxies per URL.
    ///
    /// Default: from `HTTP_PROXY`, `HTTPS_PROXY`, `ALL_PROXY` and
    /// `NO_PROXY`, read when the client is built.
    #[must_use]
    pub fn proxy_selector(mut self, selector: impl ProxySelector + 'static) -> Self {
        let selector: Arc<dyn ProxySelector> = Arc::new(selector);
        self.proxy_selector = Some(Shared(selector));
        self
    }

    // -- TLS --

    /// Set the TLS connector.
    ///
    /// Default: rustls with the Mozilla roots (`rustls` feature).
    #[must_use]
    pub fn tls_connector(mut self, connector: impl TlsConnector + 'static) -> Self {
        let connector: Arc<dyn TlsConnector> = Arc::new(connector);
        self.tls_connector = Some(Shared(connector));
        self
    }

    /// Check hostnames after the handshake.
    #[must_use]
    pub fn hostname_verifier(mut self, verifier: impl HostnameVerifier + 'static) -> Self {
        let verifier: Arc<dyn HostnameVerifier> = Arc::new(verifier);
        self.hostname_verifier = Some(Shared(verifier));
        self
    }

    /// Check peer certificates against pins after the handshake.
    #[must_use]
    pub fn certificate_pinner(mut self, pinner: impl CertificatePinner + 'static) -> Self {
        let pinner: Arc<dyn CertificatePinner> = Arc::new(pinner);
        self.certificate_pinner = Some(Shared(pinner));
        self
    }

    /// Set the TLS configurations to try, in order.  Include
    /// [`ConnectionSpec::CLEARTEXT`] to allow `http` URLs.
    #[must_use]
    pub fn connection_specs(mut self, specs: Vec<ConnectionSpec>) -> Self {
        self.connection_specs = specs;
        self
    }

    /// Set the protocols to offer.
    ///
    /// The list must contain `http/1.1` or consist of prior-knowledge h2
    /// alone, and must not contain `http/1.0`.  Duplicates are removed.
    ///
    /// ```rust
    /// use uno::Protocol;
    ///
    /// assert!(uno::Httpd::builder().protocols(vec![Protocol::Http11]).is_ok());
    /// assert!(uno::Httpd::builder().protocols(vec![Protocol::Http10]).is_err());
    /// ```
    pub fn protocols(mut self, protocols: Vec<Protocol>) -> crate::Result<Self> {
        self.protocols = protocol::validate(&protocols)?;
        Ok(self)
    }

    /// Set the `User-Agent` sent when a request has none.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Open WebSockets with `factory`.
    #[must_use]
    pub fn web_socket_factory(mut self, factory: impl WebSocketFactory + 'static) -> Self {
        self.web_socket_factory = Some(Arc::new(factory));
        self
    }

    /// Build the client.
    pub fn build(self) -> Httpd {
        let proxy_selector = self.proxy_selector.unwrap_or_else(|| {
            let selector: Arc<dyn ProxySelector> = Arc::new(EnvProxySelector::from_env());
            Shared(selector)
        });
        let tls_connector = self.tls_connector.or_else(default_tls_connector);
        let retry_policy = match self.retry {
            RetrySetting::Builder(builder) => builder.into_policy(),
            RetrySetting::Built(policy) => policy,
        };

        debug!(
            call_timeout = ?self.call_timeout,
            connect_timeout = ?self.connect_timeout,
            read_timeout = ?self.read_timeout,
            write_timeout = ?self.write_timeout,
            protocols = ?self.protocols,
            interceptors = self.interceptors.len(),
            network_interceptors = self.network_interceptors.len(),
            "building client",
        );

        Httpd {
            inner: Arc::new(HttpdInner {
                dispatcher: self.dispatcher.unwrap_or_default(),
                connection_pool: self.connection_pool.unwrap_or_default(),
                interceptors: self.interceptors,
                network_interceptors: self.network_interceptors,
                event_listener_factory: self.event_listener_factory,
                retry_on_connection_failure: self.retry_on_connection_failure,
                retry_policy,
                authenticator: self.authenticator,
                proxy_authenticator: self.proxy_authenticator,
                redirect: self.redirect,
                follow_ssl_redirects: self.follow_ssl_redirects,
                cookie_jar: self.cookie_jar,
                cache: self.cache,
                dns: self.dns,
                proxy: self.proxy,
                proxy_selector,
                tls_connector,
                hostname_verifier: self.hostname_verifier,
                certificate_pinner: self.certificate_pinner,
                connection_specs: self.connection_specs,
                protocols: self.protocols,
                user_agent: self.user_agent,
                call_timeout: self.call_timeout,
                connect_timeout: self.connect_timeout,
                read_timeout: self.read_timeout,
                write_timeout: self.write_timeout,
                web_socket_factory: self.web_socket_factory,
            }),
        }
    }
}
