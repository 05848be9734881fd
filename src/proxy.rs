//! Proxies and proxy selection.
//!
//! A [`Proxy`] is either a direct connection or an HTTP proxy.  HTTP
//! targets are forwarded through it with absolute-form request targets;
//! HTTPS targets are tunneled through `CONNECT`.
//!
//! Which proxies a call may use is decided by a [`ProxySelector`].  The
//! default [`EnvProxySelector`] reads `HTTP_PROXY`, `HTTPS_PROXY`,
//! `ALL_PROXY` and `NO_PROXY` once, when the client is built.

use crate::error::Error;
use crate::url::UnoUrl;
use crate::util::read_env_var;
use std::fmt;

/// A proxy, or the absence of one.
///
/// # Example
///
/// ```rust
/// use uno::Proxy;
///
/// let proxy = Proxy::http("http://proxy.internal:3128")?.basic_auth("me", "secret");
/// assert_eq!(proxy.port(), 3128);
/// # Ok::<(), uno::Error>(())
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Proxy {
    kind: ProxyKind,
    host: String,
    port: u16,
    /// Basic credentials sent as `Proxy-Authorization`.
    creds: Option<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ProxyKind {
    Direct,
    Http,
}

impl Proxy {
    /// No proxy: connect to the origin directly.
    pub fn direct() -> Proxy {
        Proxy {
            kind: ProxyKind::Direct,
            host: String::new(),
            port: 0,
            creds: None,
        }
    }

    /// An HTTP proxy at `url`.
    ///
    /// The URL needs an `http://` or `https://` scheme and a host.  SOCKS
    /// is rejected.  Userinfo in the URL becomes the proxy credentials.
    pub fn http(url: &str) -> crate::Result<Proxy> {
        if url.is_empty() {
            return Err(Error::builder("proxy URL must not be empty"));
        }
        if url.starts_with("socks5://") || url.starts_with("socks4://") || url.starts_with("socks5h://") {
            return Err(Error::builder(format!("SOCKS proxies are not supported: {url:?}")));
        }
        let parsed = UnoUrl::get(url)
            .map_err(|e| Error::builder(format!("invalid proxy URL {url:?}")).with_source(e))?;
        let creds = (!parsed.username().is_empty())
            .then(|| (parsed.username().to_owned(), parsed.password().to_owned()));
        Ok(Proxy {
            kind: ProxyKind::Http,
            host: parsed.host().to_owned(),
            port: parsed.port(),
            creds,
        })
    }

    /// Send Basic credentials to the proxy.
    #[must_use]
    pub fn basic_auth(mut self, username: &str, password: &str) -> Proxy {
        self.creds = Some((username.to_owned(), password.to_owned()));
        self
    }

    /// `true` for [`Proxy::direct()`].
    pub fn is_direct(&self) -> bool {
        self.kind == ProxyKind::Direct
    }

    /// `true` for an HTTP proxy.
    pub fn is_http(&self) -> bool {
        self.kind == ProxyKind::Http
    }

    /// Proxy host; empty when direct.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Proxy port; 0 when direct.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The `Proxy-Authorization` value for the configured credentials.
    pub(crate) fn authorization(&self) -> Option<String> {
        let (user, pass) = self.creds.as_ref()?;
        Some(crate::authenticator::basic_value(user, pass))
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ProxyKind::Direct => f.write_str("Proxy(DIRECT)"),
            ProxyKind::Http => write!(
                f,
                "Proxy(HTTP {}:{}{})",
                self.host,
                self.port,
                if self.creds.is_some() { " +auth" } else { "" }
            ),
        }
    }
}

/// Picks proxies for a URL.
pub trait ProxySelector: Send + Sync {
    /// Proxies to try for `url`, most preferred first.  An empty list means
    /// connect directly.
    fn select(&self, url: &UnoUrl) -> Vec<Proxy>;

    /// Called when connecting through `proxy` failed.
    fn connect_failed(&self, _url: &UnoUrl, _proxy: &Proxy, _error: &Error) {}
}

/// Always connects directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectSelector;

impl ProxySelector for DirectSelector {
    fn select(&self, _url: &UnoUrl) -> Vec<Proxy> {
        vec![Proxy::direct()]
    }
}

/// Selects proxies from environment variables.
///
/// `HTTP_PROXY`/`http_proxy` serve `http` URLs, `HTTPS_PROXY`/`https_proxy`
/// serve `https` URLs, and `ALL_PROXY`/`all_proxy` fills in for either.
/// Hosts listed in `NO_PROXY`/`no_proxy` connect directly.  Values without
/// a scheme are treated as `http://`.  Unparseable values are ignored.
#[derive(Debug, Clone, Default)]
pub struct EnvProxySelector {
    http: Option<Proxy>,
    https: Option<Proxy>,
    no_proxy: NoProxy,
}

impl EnvProxySelector {
    /// Read the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(read_env_var)
    }

    /// Read variables through `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let first = |names: &[&str]| names.iter().find_map(|n| lookup(*n));
        let all = first(&["ALL_PROXY", "all_proxy"]);
        let http = first(&["HTTP_PROXY", "http_proxy"]).or_else(|| all.clone());
        let https = first(&["HTTPS_PROXY", "https_proxy"]).or(all);
        let no_proxy = first(&["NO_PROXY", "no_proxy"])
            .and_then(|s| NoProxy::from_string(&s))
            .unwrap_or_default();

        trace!(
            http_proxy = http.as_deref().unwrap_or("<none>"),
            https_proxy = https.as_deref().unwrap_or("<none>"),
            no_proxy_count = no_proxy.patterns.len(),
            "proxy config from env",
        );

        EnvProxySelector {
            http: http.as_deref().and_then(parse_env_proxy),
            https: https.as_deref().and_then(parse_env_proxy),
            no_proxy,
        }
    }
}

fn parse_env_proxy(value: &str) -> Option<Proxy> {
    let result = if value.contains("://") {
        Proxy::http(value)
    } else {
        Proxy::http(&format!("http://{value}"))
    };
    match result {
        Ok(proxy) => Some(proxy),
        Err(e) => {
            warn!(value, error = %e, "ignoring unusable proxy variable");
            None
        }
    }
}

impl ProxySelector for EnvProxySelector {
    fn select(&self, url: &UnoUrl) -> Vec<Proxy> {
        if self.no_proxy.matches(url.host()) {
            trace!(host = url.host(), "proxy select: NO_PROXY match -> direct");
            return vec![Proxy::direct()];
        }
        let configured = if url.is_https() { &self.https } else { &self.http };
        match configured {
            Some(proxy) => vec![proxy.clone()],
            None => vec![Proxy::direct()],
        }
    }
}

/// Hosts that bypass the proxy.
///
/// Parsed from a comma-separated list: `*` matches everything, a leading
/// dot or any dotted name matches that domain and its subdomains, and a
/// dotless name (`localhost`) matches only itself.
#[derive(Debug, Clone, Default)]
pub struct NoProxy {
    patterns: Vec<NoProxyPattern>,
}

impl NoProxy {
    /// Parse a `NO_PROXY` list.  `None` if it names nothing.
    pub fn from_string(s: &str) -> Option<Self> {
        let patterns = parse_no_proxy(s);
        if patterns.is_empty() {
            None
        } else {
            Some(Self { patterns })
        }
    }

    /// `true` if `host` bypasses the proxy.
    pub fn matches(&self, host: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(host))
    }
}

#[derive(Debug, Clone)]
enum NoProxyPattern {
    Wildcard,
    /// Case-insensitive exact host.
    Exact(String),
    /// Domain and subdomains, stored lowercased without a leading dot.
    DomainSuffix(String),
}

impl NoProxyPattern {
    fn matches(&self, host: &str) -> bool {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let host_lower = host.to_ascii_lowercase();
        match self {
            NoProxyPattern::Wildcard => true,
            NoProxyPattern::Exact(exact) => host_lower == *exact,
            NoProxyPattern::DomainSuffix(suffix) => {
                host_lower == *suffix
                    || host_lower
                        .strip_suffix(suffix.as_str())
                        .is_some_and(|rest| rest.ends_with('.'))
            }
        }
    }
}

fn parse_no_proxy(value: &str) -> Vec<NoProxyPattern> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s == "*" {
                NoProxyPattern::Wildcard
            } else if let Some(suffix) = s.strip_prefix('.') {
                NoProxyPattern::DomainSuffix(suffix.to_ascii_lowercase())
            } else if s.contains('.') {
                NoProxyPattern::DomainSuffix(s.to_ascii_lowercase())
            } else {
                NoProxyPattern::Exact(s.to_ascii_lowercase())
            }
        })
        .collect()
}
