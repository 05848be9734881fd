//! Establishing connections.
//!
//! [`RealConnection::connect`] dials a [`Route`]: TCP, then a `CONNECT`
//! tunnel when an HTTPS origin sits behind an HTTP proxy, then TLS.  TLS
//! connections try each TLS [`ConnectionSpec`] of the address in order,
//! dialing afresh for every fallback.

use crate::address::Route;
use crate::error::Error;
use crate::exchange::{ExchangeCodec, Http1Codec};
use crate::protocol::Protocol;
use crate::request::Request;
use crate::response::Response;
use crate::tls::{BoxedIo, ConnectionSpec, Handshake, TlsStream};
use crate::util::with_timeout;
use futures_util::FutureExt;
use http::Method;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::net::TcpStream;

/// Proxy authentication rounds allowed before a tunnel gives up.
const MAX_TUNNEL_ATTEMPTS: usize = 21;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Timeouts and headers used while connecting.
#[derive(Debug, Clone)]
pub(crate) struct ConnectOptions {
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) write_timeout: Option<Duration>,
    pub(crate) user_agent: String,
}

/// An open HTTP/1.1 connection.
pub(crate) struct RealConnection {
    id: u64,
    route: Route,
    protocol: Protocol,
    handshake: Option<Handshake>,
    io: BufReader<BoxedIo>,
}

impl fmt::Debug for RealConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealConnection")
            .field("id", &self.id)
            .field("route", &self.route)
            .field("protocol", &self.protocol)
            .finish()
    }
}

impl RealConnection {
    /// Wrap an already-connected stream.
    pub(crate) fn new(route: Route, protocol: Protocol, handshake: Option<Handshake>, io: BoxedIo) -> Self {
        RealConnection {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            route,
            protocol,
            handshake,
            io: BufReader::new(io),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn route(&self) -> &Route {
        &self.route
    }

    pub(crate) fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub(crate) fn handshake(&self) -> Option<&Handshake> {
        self.handshake.as_ref()
    }

    /// A codec for one exchange.  Plain HTTP through a proxy uses the
    /// absolute request form.
    pub(crate) fn codec(&mut self, read_timeout: Option<Duration>, write_timeout: Option<Duration>) -> Http1Codec<'_> {
        let absolute_form = self.route.proxy().is_http() && !self.route.address().is_https();
        Http1Codec::new(&mut self.io, read_timeout, write_timeout, absolute_form)
    }

    /// `false` if the peer closed, sent unsolicited bytes, or errored.
    pub(crate) fn is_healthy(&mut self) -> bool {
        if !self.io.buffer().is_empty() {
            return false;
        }
        let mut probe = [0u8; 1];
        self.io.get_mut().read(&mut probe).now_or_never().is_none()
    }

    /// Dial `route`.
    pub(crate) async fn connect(route: &Route, options: &ConnectOptions) -> crate::Result<RealConnection> {
        let address = route.address();
        if !address.is_https() {
            let io = connect_and_tunnel(route, options).await?;
            return Ok(RealConnection::new(route.clone(), Protocol::Http11, None, io));
        }

        let specs: Vec<&ConnectionSpec> = address.connection_specs().iter().filter(|s| s.is_tls()).collect();
        if specs.is_empty() {
            return Err(Error::connect("no TLS connection specs configured for https"));
        }
        let mut last = None;
        for (i, spec) in specs.iter().enumerate() {
            let io = connect_and_tunnel(route, options).await?;
            match tls_connect(route, io, spec, options).await {
                Ok(stream) => return verify(route, stream),
                Err(e) if i + 1 < specs.len() => {
                    debug!(route = ?route, versions = ?spec.tls_versions(), error = %e, "TLS handshake failed; falling back");
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| Error::connect("TLS handshake failed")))
    }
}

async fn connect_socket(route: &Route, options: &ConnectOptions) -> crate::Result<BoxedIo> {
    let target = route.socket_address();
    trace!(route = ?route, "connecting socket");
    let stream = with_timeout(options.connect_timeout, "connect", async {
        TcpStream::connect(target).await.map_err(Error::connect_io)
    })
    .await?;
    if let Err(e) = stream.set_nodelay(true) {
        trace!(error = %e, "set_nodelay failed");
    }
    Ok(Box::new(stream))
}

/// A socket to the route's first hop, tunneled to the origin if the route
/// needs it.
async fn connect_and_tunnel(route: &Route, options: &ConnectOptions) -> crate::Result<BoxedIo> {
    if !route.requires_tunnel() {
        return connect_socket(route, options).await;
    }
    let mut request = tunnel_request(route, options)?;
    let mut kept: Option<BufReader<BoxedIo>> = None;
    for _ in 0..MAX_TUNNEL_ATTEMPTS {
        let mut stream = match kept.take() {
            Some(stream) => stream,
            None => BufReader::new(connect_socket(route, options).await?),
        };
        match create_tunnel(&mut stream, &request, route, options).await? {
            None => {
                if stream.buffer().is_empty() {
                    return Ok(stream.into_inner());
                }
                return Err(Error::protocol("TLS tunnel buffered too many bytes"));
            }
            Some((next, keep_alive)) => {
                request = next;
                if keep_alive {
                    kept = Some(stream);
                }
            }
        }
    }
    Err(Error::protocol(format!(
        "too many tunnel connections attempted: {MAX_TUNNEL_ATTEMPTS}"
    )))
}

/// The `CONNECT` request for `route`.
fn tunnel_request(route: &Route, options: &ConnectOptions) -> crate::Result<Request> {
    let address = route.address();
    let mut builder = Request::builder()
        .url(address.url())
        .header("Host", &authority(address.host(), address.port()))
        .header("Proxy-Connection", "Keep-Alive")
        .header("User-Agent", &options.user_agent)
        .method(Method::CONNECT, None);
    if let Some(value) = route.proxy().authorization() {
        builder = builder.header("Proxy-Authorization", &value);
    }
    builder.build()
}

fn authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Run one `CONNECT` exchange.  `None` when the tunnel is open; otherwise
/// the authenticated retry and whether `stream` may carry it.
async fn create_tunnel(
    stream: &mut BufReader<BoxedIo>,
    request: &Request,
    route: &Route,
    options: &ConnectOptions,
) -> crate::Result<Option<(Request, bool)>> {
    let address = route.address();
    let line = format!("CONNECT {} HTTP/1.1", authority(address.host(), address.port()));
    let mut codec = Http1Codec::new(stream, options.read_timeout, options.write_timeout, false);
    codec.write_head(&line, request.headers()).await?;
    codec.finish_request().await?;
    let head = codec.read_response_headers().await?;
    // Drains a 407 body so the socket can be reused.
    codec.read_response_body(&head, &Method::CONNECT).await?;

    match head.code.as_u16() {
        200 => {
            trace!(route = ?route, "tunnel established");
            Ok(None)
        }
        407 => {
            let response = Response::builder()
                .request(request.clone())
                .protocol(head.protocol)
                .code(head.code)
                .message(head.message)
                .headers(&head.headers)
                .build()?;
            let next = address
                .proxy_authenticator()
                .authenticate(Some(route), &response)?
                .ok_or_else(|| Error::protocol("failed to authenticate with proxy").with_status(head.code))?;
            let close = response
                .header("Connection")
                .is_some_and(|v| v.eq_ignore_ascii_case("close"));
            Ok(Some((next, !close && codec.is_reusable())))
        }
        code => Err(Error::protocol(format!("unexpected response code for CONNECT: {code}")).with_status(head.code)),
    }
}

/// Handshake over `io` with the versions `spec` allows.
async fn tls_connect(
    route: &Route,
    io: BoxedIo,
    spec: &ConnectionSpec,
    options: &ConnectOptions,
) -> crate::Result<TlsStream> {
    let address = route.address();
    let connector = address
        .tls_connector()
        .ok_or_else(|| Error::connect("no TLS connector configured for https"))?;
    let host = address.host();
    let alpn = [Protocol::Http11];
    with_timeout(options.connect_timeout, "TLS handshake", async {
        connector.connect(host, io, spec, &alpn).await.map_err(Error::connect_io)
    })
    .await
}

/// Run the hostname verifier and pinner over a completed handshake.
/// Failures here are final; no other spec is tried.
fn verify(route: &Route, stream: TlsStream) -> crate::Result<RealConnection> {
    let address = route.address();
    let host = address.host();
    if let Some(verifier) = address.hostname_verifier()
        && !verifier.verify(host, &stream.handshake)
    {
        return Err(Error::connect(format!("hostname {host} not verified")));
    }
    if let Some(pinner) = address.certificate_pinner() {
        pinner
            .check(host, stream.handshake.peer_certificates())
            .map_err(|e| Error::connect(format!("certificate pinning failure for {host}")).with_source(e))?;
    }
    let protocol = match stream.handshake.alpn_protocol() {
        Some(Protocol::Http10) => Protocol::Http10,
        _ => Protocol::Http11,
    };
    trace!(route = ?route, version = stream.handshake.tls_version().as_str(), "TLS established");
    Ok(RealConnection::new(route.clone(), protocol, Some(stream.handshake), stream.io))
}
