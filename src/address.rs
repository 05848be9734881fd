//! Connection identity.
//!
//! An [`Address`] holds everything needed to open a connection to an
//! origin except the resolved IP.  A [`Route`] adds the proxy and the socket
//! address actually dialed; it is the unit of connection reuse.
//!
//! Strategy objects (DNS, TLS, authenticators, selectors) are compared by
//! instance, through [`Shared`].

use crate::authenticator::{self, Authenticator};
use crate::dns::{self, Dns};
use crate::error::Error;
use crate::protocol::Protocol;
use crate::proxy::{DirectSelector, Proxy, ProxySelector};
use crate::tls::{CertificatePinner, ConnectionSpec, HostnameVerifier, TlsConnector};
use crate::url::UnoUrl;
use crate::util::Shared;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

/// Everything needed to reach an origin, minus the resolved IP.
#[derive(Clone)]
pub struct Address {
    /// `scheme://host:port/`
    url: UnoUrl,
    dns: Shared<dyn Dns>,
    proxy_authenticator: Shared<dyn Authenticator>,
    protocols: Vec<Protocol>,
    connection_specs: Vec<ConnectionSpec>,
    proxy_selector: Shared<dyn ProxySelector>,
    proxy: Option<Proxy>,
    tls_connector: Option<Shared<dyn TlsConnector>>,
    hostname_verifier: Option<Shared<dyn HostnameVerifier>>,
    certificate_pinner: Option<Shared<dyn CertificatePinner>>,
}

impl Address {
    /// An [`AddressBuilder`] for the origin of `url`.
    ///
    /// Unset strategy objects default to process-wide instances, so two
    /// default addresses for the same origin compare equal.
    pub fn builder(url: &UnoUrl) -> AddressBuilder {
        AddressBuilder {
            url: url.clone(),
            dns: dns::system(),
            proxy_authenticator: authenticator::none(),
            protocols: vec![Protocol::Http2, Protocol::Http11],
            connection_specs: vec![ConnectionSpec::MODERN_TLS, ConnectionSpec::CLEARTEXT],
            proxy_selector: direct_selector(),
            proxy: None,
            tls_connector: None,
            hostname_verifier: None,
            certificate_pinner: None,
        }
    }

    /// The origin, as `scheme://host:port/`.
    pub fn url(&self) -> &UnoUrl {
        &self.url
    }

    /// The origin host.
    pub fn host(&self) -> &str {
        self.url.host()
    }

    /// The origin port.
    pub fn port(&self) -> u16 {
        self.url.port()
    }

    /// The resolver.
    pub fn dns(&self) -> &Shared<dyn Dns> {
        &self.dns
    }

    /// Answers proxy 407 challenges.
    pub fn proxy_authenticator(&self) -> &Shared<dyn Authenticator> {
        &self.proxy_authenticator
    }

    /// Protocols the client may negotiate.
    pub fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    /// Acceptable connection specs, in preference order.
    pub fn connection_specs(&self) -> &[ConnectionSpec] {
        &self.connection_specs
    }

    /// Consulted when no explicit proxy is set.
    pub fn proxy_selector(&self) -> &Shared<dyn ProxySelector> {
        &self.proxy_selector
    }

    /// An explicit proxy overriding the selector.
    pub fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    /// The TLS connector; `None` for cleartext origins.
    pub fn tls_connector(&self) -> Option<&Shared<dyn TlsConnector>> {
        self.tls_connector.as_ref()
    }

    /// Extra handshake check; `None` for cleartext origins.
    pub fn hostname_verifier(&self) -> Option<&Shared<dyn HostnameVerifier>> {
        self.hostname_verifier.as_ref()
    }

    /// Certificate pins; `None` for cleartext origins.
    pub fn certificate_pinner(&self) -> Option<&Shared<dyn CertificatePinner>> {
        self.certificate_pinner.as_ref()
    }

    /// `true` for `https` origins.
    pub fn is_https(&self) -> bool {
        self.url.is_https()
    }

    /// `true` if a connection to `self` could serve `other` apart from the
    /// destination host and port: same scheme and every routing
    /// strategy, list and proxy setting equal.
    pub fn equals_non_host(&self, other: &Address) -> bool {
        self.url.scheme() == other.url.scheme()
            && self.dns == other.dns
            && self.proxy_authenticator == other.proxy_authenticator
            && self.protocols == other.protocols
            && self.connection_specs == other.connection_specs
            && self.proxy_selector == other.proxy_selector
            && self.proxy == other.proxy
            && self.tls_connector == other.tls_connector
            && self.hostname_verifier == other.hostname_verifier
            && self.certificate_pinner == other.certificate_pinner
    }

    fn hash_non_host<H: Hasher>(&self, state: &mut H) {
        self.url.scheme().hash(state);
        self.dns.hash(state);
        self.proxy_authenticator.hash(state);
        self.protocols.hash(state);
        self.connection_specs.hash(state);
        self.proxy_selector.hash(state);
        self.proxy.hash(state);
        self.tls_connector.hash(state);
        self.hostname_verifier.hash(state);
        self.certificate_pinner.hash(state);
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url && self.equals_non_host(other)
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
        self.hash_non_host(state);
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Address");
        d.field("host", &self.host()).field("port", &self.port());
        match &self.proxy {
            Some(proxy) => d.field("proxy", proxy),
            None => d.field("proxy_selector", &self.proxy_selector),
        };
        d.finish()
    }
}

fn direct_selector() -> Shared<dyn ProxySelector> {
    static DIRECT: OnceLock<Arc<DirectSelector>> = OnceLock::new();
    let arc: Arc<dyn ProxySelector> = DIRECT.get_or_init(|| Arc::new(DirectSelector)).clone();
    Shared(arc)
}

/// Builds an [`Address`].
pub struct AddressBuilder {
    url: UnoUrl,
    dns: Shared<dyn Dns>,
    proxy_authenticator: Shared<dyn Authenticator>,
    protocols: Vec<Protocol>,
    connection_specs: Vec<ConnectionSpec>,
    proxy_selector: Shared<dyn ProxySelector>,
    proxy: Option<Proxy>,
    tls_connector: Option<Shared<dyn TlsConnector>>,
    hostname_verifier: Option<Shared<dyn HostnameVerifier>>,
    certificate_pinner: Option<Shared<dyn CertificatePinner>>,
}

impl fmt::Debug for AddressBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressBuilder").field("url", &self.url).finish()
    }
}

impl AddressBuilder {
    /// Set the resolver.
    #[must_use]
    pub fn dns(mut self, dns: Shared<dyn Dns>) -> Self {
        self.dns = dns;
        self
    }

    /// Set the proxy authenticator.
    #[must_use]
    pub fn proxy_authenticator(mut self, authenticator: Shared<dyn Authenticator>) -> Self {
        self.proxy_authenticator = authenticator;
        self
    }

    /// Set the protocol list.
    #[must_use]
    pub fn protocols(mut self, protocols: Vec<Protocol>) -> Self {
        self.protocols = protocols;
        self
    }

    /// Set the connection specs.
    #[must_use]
    pub fn connection_specs(mut self, specs: Vec<ConnectionSpec>) -> Self {
        self.connection_specs = specs;
        self
    }

    /// Set the proxy selector.
    #[must_use]
    pub fn proxy_selector(mut self, selector: Shared<dyn ProxySelector>) -> Self {
        self.proxy_selector = selector;
        self
    }

    /// Set an explicit proxy.
    #[must_use]
    pub fn proxy(mut self, proxy: Option<Proxy>) -> Self {
        self.proxy = proxy;
        self
    }

    /// Set the TLS strategies.  Ignored for `http` origins.
    #[must_use]
    pub fn tls(
        mut self,
        connector: Option<Shared<dyn TlsConnector>>,
        verifier: Option<Shared<dyn HostnameVerifier>>,
        pinner: Option<Shared<dyn CertificatePinner>>,
    ) -> Self {
        self.tls_connector = connector;
        self.hostname_verifier = verifier;
        self.certificate_pinner = pinner;
        self
    }

    /// Finish the address.
    pub fn build(self) -> crate::Result<Address> {
        let origin = self
            .url
            .new_builder()
            .username("")
            .password("")
            .encoded_path("/")?
            .query(None)
            .fragment(None)
            .build()
            .map_err(Error::from)?;
        let https = origin.is_https();
        Ok(Address {
            url: origin,
            dns: self.dns,
            proxy_authenticator: self.proxy_authenticator,
            protocols: self.protocols,
            connection_specs: self.connection_specs,
            proxy_selector: self.proxy_selector,
            proxy: self.proxy,
            tls_connector: self.tls_connector.filter(|_| https),
            hostname_verifier: self.hostname_verifier.filter(|_| https),
            certificate_pinner: self.certificate_pinner.filter(|_| https),
        })
    }
}

/// A concrete path to an origin: address, proxy and the socket address
/// dialed (the origin's, or the proxy's).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Route {
    address: Address,
    proxy: Proxy,
    socket_address: SocketAddr,
}

impl Route {
    /// Assemble a route.
    pub fn new(address: Address, proxy: Proxy, socket_address: SocketAddr) -> Self {
        Route {
            address,
            proxy,
            socket_address,
        }
    }

    /// The address served.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The proxy, or [`Proxy::direct()`].
    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    /// The socket address dialed.
    pub fn socket_address(&self) -> SocketAddr {
        self.socket_address
    }

    /// `true` when a TLS origin is reached through an HTTP proxy, which
    /// takes a `CONNECT` tunnel.
    pub fn requires_tunnel(&self) -> bool {
        self.address.tls_connector.is_some() && self.proxy.is_http()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Route({}:{} via {:?} at {})",
            self.address.host(),
            self.address.port(),
            self.proxy,
            self.socket_address
        )
    }
}
