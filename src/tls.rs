//! TLS seam: connection specs, handshakes and the connector trait.
//!
//! The engine never implements TLS itself.  It hands a connected socket to
//! a [`TlsConnector`] together with the [`ConnectionSpec`] to try, then runs
//! the configured [`HostnameVerifier`] and [`CertificatePinner`] over the
//! resulting [`Handshake`].  With the `rustls` feature, [`RustlsConnector`]
//! is the default connector.

use crate::error::Error;
use crate::protocol::Protocol;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream: a TCP socket, or TLS over one.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

/// A boxed [`Io`].
pub type BoxedIo = Box<dyn Io>;

/// TLS protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsVersion {
    /// TLS 1.3.
    Tls13,
    /// TLS 1.2.
    Tls12,
    /// TLS 1.1.
    Tls11,
    /// TLS 1.0.
    Tls10,
}

impl TlsVersion {
    /// The Java-style name, e.g. `TLSv1.3`.
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls13 => "TLSv1.3",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls10 => "TLSv1",
        }
    }
}

/// What a connection may negotiate: cleartext, or TLS with a set of
/// versions.
///
/// A client lists specs in preference order.  Cleartext URLs need
/// [`CLEARTEXT`](ConnectionSpec::CLEARTEXT) in the list; TLS connections
/// try each TLS spec in turn until a handshake succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionSpec {
    is_tls: bool,
    tls_versions: &'static [TlsVersion],
}

impl ConnectionSpec {
    /// TLS 1.3 and 1.2.
    pub const MODERN_TLS: ConnectionSpec = ConnectionSpec {
        is_tls: true,
        tls_versions: &[TlsVersion::Tls13, TlsVersion::Tls12],
    };

    /// Every TLS version down to 1.0, for old servers.
    pub const COMPATIBLE_TLS: ConnectionSpec = ConnectionSpec {
        is_tls: true,
        tls_versions: &[
            TlsVersion::Tls13,
            TlsVersion::Tls12,
            TlsVersion::Tls11,
            TlsVersion::Tls10,
        ],
    };

    /// Unencrypted, for `http` URLs.
    pub const CLEARTEXT: ConnectionSpec = ConnectionSpec {
        is_tls: false,
        tls_versions: &[],
    };

    /// A TLS spec allowing exactly `versions`.
    pub const fn tls(versions: &'static [TlsVersion]) -> ConnectionSpec {
        ConnectionSpec {
            is_tls: true,
            tls_versions: versions,
        }
    }

    /// `true` unless this is [`CLEARTEXT`](Self::CLEARTEXT).
    pub fn is_tls(&self) -> bool {
        self.is_tls
    }

    /// Allowed TLS versions, most preferred first.
    pub fn tls_versions(&self) -> &'static [TlsVersion] {
        self.tls_versions
    }
}

/// What a completed TLS handshake agreed on.
#[derive(Clone, PartialEq, Eq)]
pub struct Handshake {
    tls_version: TlsVersion,
    alpn_protocol: Option<Protocol>,
    peer_certificates: Vec<Bytes>,
}

impl Handshake {
    /// Record a handshake.  `peer_certificates` are DER, leaf first.
    pub fn new(tls_version: TlsVersion, alpn_protocol: Option<Protocol>, peer_certificates: Vec<Bytes>) -> Self {
        Handshake {
            tls_version,
            alpn_protocol,
            peer_certificates,
        }
    }

    /// The negotiated version.
    pub fn tls_version(&self) -> TlsVersion {
        self.tls_version
    }

    /// The ALPN result, if the server picked one.
    pub fn alpn_protocol(&self) -> Option<Protocol> {
        self.alpn_protocol
    }

    /// The server's DER certificates, leaf first.
    pub fn peer_certificates(&self) -> &[Bytes] {
        &self.peer_certificates
    }
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("tls_version", &self.tls_version)
            .field("alpn_protocol", &self.alpn_protocol)
            .field("peer_certificates", &self.peer_certificates.len())
            .finish()
    }
}

/// A stream after a successful handshake.
pub struct TlsStream {
    /// The encrypted stream.
    pub io: BoxedIo,
    /// What the handshake agreed on.
    pub handshake: Handshake,
}

/// Performs TLS handshakes.
pub trait TlsConnector: Send + Sync {
    /// Handshake with `host` over `io`, limited to `spec`'s versions and
    /// offering `alpn` protocols.
    fn connect<'a>(
        &'a self,
        host: &'a str,
        io: BoxedIo,
        spec: &'a ConnectionSpec,
        alpn: &'a [Protocol],
    ) -> BoxFuture<'a, io::Result<TlsStream>>;
}

/// Checks that a handshake is acceptable for a host, beyond what the
/// connector already verified.
pub trait HostnameVerifier: Send + Sync {
    /// `true` to accept.
    fn verify(&self, host: &str, handshake: &Handshake) -> bool;
}

/// Accepts every handshake the connector accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectorVerified;

impl HostnameVerifier for ConnectorVerified {
    fn verify(&self, _host: &str, _handshake: &Handshake) -> bool {
        true
    }
}

/// Restricts which certificates a host may present.
pub trait CertificatePinner: Send + Sync {
    /// `Err` to reject the connection.
    fn check(&self, host: &str, peer_certificates: &[Bytes]) -> Result<(), Error>;
}

/// Pins nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPinning;

impl CertificatePinner for NoPinning {
    fn check(&self, _host: &str, _peer_certificates: &[Bytes]) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(feature = "rustls")]
pub use self::rustls_impl::RustlsConnector;

#[cfg(feature = "rustls")]
mod rustls_impl {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::Arc;
    use tokio_rustls::rustls;
    use tokio_rustls::rustls::pki_types::ServerName;

    /// A [`TlsConnector`] backed by rustls, trusting the webpki roots.
    ///
    /// rustls speaks only TLS 1.2 and 1.3; older versions in a spec are
    /// ignored, and a spec naming neither fails the handshake.
    #[derive(Clone)]
    pub struct RustlsConnector {
        roots: Arc<rustls::RootCertStore>,
    }

    impl fmt::Debug for RustlsConnector {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("RustlsConnector")
                .field("roots", &self.roots.len())
                .finish()
        }
    }

    impl Default for RustlsConnector {
        fn default() -> Self {
            Self::new()
        }
    }

    impl RustlsConnector {
        /// A connector trusting the Mozilla root program.
        pub fn new() -> Self {
            let roots = rustls::RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };
            Self::with_roots(roots)
        }

        /// A connector trusting exactly `roots`.
        pub fn with_roots(roots: rustls::RootCertStore) -> Self {
            RustlsConnector {
                roots: Arc::new(roots),
            }
        }

        fn config(&self, spec: &ConnectionSpec, alpn: &[Protocol]) -> io::Result<rustls::ClientConfig> {
            let versions: Vec<&'static rustls::SupportedProtocolVersion> = spec
                .tls_versions()
                .iter()
                .filter_map(|v| match v {
                    TlsVersion::Tls13 => Some(&rustls::version::TLS13),
                    TlsVersion::Tls12 => Some(&rustls::version::TLS12),
                    TlsVersion::Tls11 | TlsVersion::Tls10 => None,
                })
                .collect();
            if versions.is_empty() {
                return Err(io::Error::other("connection spec has no TLS version rustls supports"));
            }
            let provider = Arc::new(rustls::crypto::ring::default_provider());
            let mut config = rustls::ClientConfig::builder_with_provider(provider)
                .with_protocol_versions(&versions)
                .map_err(io::Error::other)?
                .with_root_certificates(Arc::clone(&self.roots))
                .with_no_client_auth();
            config.alpn_protocols = alpn
                .iter()
                .filter(|p| matches!(p, Protocol::Http11 | Protocol::Http2))
                .map(|p| p.as_str().as_bytes().to_vec())
                .collect();
            Ok(config)
        }
    }

    fn version_of(v: rustls::ProtocolVersion) -> TlsVersion {
        match v {
            rustls::ProtocolVersion::TLSv1_3 => TlsVersion::Tls13,
            rustls::ProtocolVersion::TLSv1_1 => TlsVersion::Tls11,
            rustls::ProtocolVersion::TLSv1_0 => TlsVersion::Tls10,
            _ => TlsVersion::Tls12,
        }
    }

    impl TlsConnector for RustlsConnector {
        fn connect<'a>(
            &'a self,
            host: &'a str,
            io: BoxedIo,
            spec: &'a ConnectionSpec,
            alpn: &'a [Protocol],
        ) -> BoxFuture<'a, io::Result<TlsStream>> {
            async move {
                let config = self.config(spec, alpn)?;
                let bare = host.trim_start_matches('[').trim_end_matches(']').to_owned();
                let server_name = ServerName::try_from(bare)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                let stream = tokio_rustls::TlsConnector::from(Arc::new(config))
                    .connect(server_name, io)
                    .await?;
                let (_, conn) = stream.get_ref();
                let handshake = Handshake::new(
                    conn.protocol_version().map_or(TlsVersion::Tls12, version_of),
                    conn.alpn_protocol()
                        .and_then(|p| std::str::from_utf8(p).ok())
                        .and_then(|p| Protocol::get(p).ok()),
                    conn.peer_certificates()
                        .unwrap_or_default()
                        .iter()
                        .map(|c| Bytes::copy_from_slice(c.as_ref()))
                        .collect(),
                );
                trace!(host, version = handshake.tls_version().as_str(), "tls handshake complete");
                Ok(TlsStream {
                    io: Box::new(stream),
                    handshake,
                })
            }
            .boxed()
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_presets() {
        assert!(ConnectionSpec::MODERN_TLS.is_tls());
        assert!(!ConnectionSpec::CLEARTEXT.is_tls());
        assert_eq!(ConnectionSpec::COMPATIBLE_TLS.tls_versions().len(), 4);
        assert_ne!(ConnectionSpec::MODERN_TLS, ConnectionSpec::COMPATIBLE_TLS);
        assert_eq!(ConnectionSpec::tls(&[TlsVersion::Tls13, TlsVersion::Tls12]), ConnectionSpec::MODERN_TLS);
    }

    #[test]
    fn default_policies_accept() {
        let handshake = Handshake::new(TlsVersion::Tls13, Some(Protocol::Http11), vec![Bytes::from_static(b"der")]);
        assert!(ConnectorVerified.verify("example.com", &handshake));
        assert!(NoPinning.check("example.com", handshake.peer_certificates()).is_ok());
        assert_eq!(TlsVersion::Tls10.as_str(), "TLSv1");
        assert!(format!("{handshake:?}").contains("peer_certificates: 1"));
    }
}
