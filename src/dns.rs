//! Host name resolution.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::io;
use std::net::IpAddr;
use std::sync::{Arc, OnceLock};

use crate::util::Shared;

/// Resolves host names to IP addresses.
///
/// Implementations must be cheap to call concurrently.  The returned
/// addresses are tried in order.
pub trait Dns: Send + Sync {
    /// Addresses for `host`.  An empty success is treated as a failure.
    fn lookup(&self, host: &str) -> BoxFuture<'static, io::Result<Vec<IpAddr>>>;
}

/// The operating system resolver, via [`tokio::net::lookup_host`].
///
/// IP literals are returned without a lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDns;

impl Dns for SystemDns {
    fn lookup(&self, host: &str) -> BoxFuture<'static, io::Result<Vec<IpAddr>>> {
        let host = host.trim_start_matches('[').trim_end_matches(']').to_owned();
        async move {
            if let Ok(ip) = host.parse::<IpAddr>() {
                return Ok(vec![ip]);
            }
            let mut ips: Vec<IpAddr> = Vec::new();
            for addr in tokio::net::lookup_host((host.as_str(), 0)).await? {
                if !ips.contains(&addr.ip()) {
                    ips.push(addr.ip());
                }
            }
            trace!(host = %host, count = ips.len(), "dns lookup");
            if ips.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses for {host}"),
                ));
            }
            Ok(ips)
        }
        .boxed()
    }
}

/// The process-wide [`SystemDns`] instance.
///
/// Every default-configured client shares it, so their addresses compare
/// equal and their connections pool together.
pub(crate) fn system() -> Shared<dyn Dns> {
    static SYSTEM: OnceLock<Arc<SystemDns>> = OnceLock::new();
    let arc: Arc<dyn Dns> = SYSTEM.get_or_init(|| Arc::new(SystemDns)).clone();
    Shared(arc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ip_literals_skip_lookup() {
        // (host, expected)
        let cases: &[(&str, &str)] = &[
            ("127.0.0.1", "127.0.0.1"),
            ("::1", "::1"),
            ("[::1]", "::1"),
        ];
        for &(host, expected) in cases {
            let ips = SystemDns.lookup(host).await.unwrap();
            assert_eq!(ips, vec![expected.parse::<IpAddr>().unwrap()], "{host}");
        }
    }

    #[tokio::test]
    async fn localhost_resolves() {
        let ips = SystemDns.lookup("localhost").await.unwrap();
        assert!(ips.iter().all(|ip| ip.is_loopback()), "{ips:?}");
    }

    #[test]
    fn system_is_a_singleton() {
        assert_eq!(system(), system());
    }
}
