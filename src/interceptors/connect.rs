//! Finds a connection for the call: a healthy pooled one for the same
//! address, or a new one over the first route that connects.

use crate::address::{Address, Route};
use crate::connection::{ConnectOptions, RealConnection};
use crate::error::Error;
use crate::interceptor::Chain;
use crate::proxy::Proxy;
use crate::response::Response;
use crate::util::with_timeout;
use std::net::SocketAddr;

pub(crate) async fn intercept(chain: Chain<'_>) -> crate::Result<Response> {
    let ctx = chain.ctx();
    let client = chain.client();
    let request = chain.request().clone();
    let address = client.address(request.url())?;
    if !address.is_https() && !address.connection_specs().iter().any(|s| !s.is_tls()) {
        return Err(Error::connect("CLEARTEXT communication not enabled for client"));
    }

    let lease = match client.connection_pool().acquire(&address) {
        Some(lease) => {
            if let Some(route) = lease.route() {
                trace!(route = ?route, "acquired pooled connection");
                ctx.listener.connection_acquired(route, true);
            }
            lease
        }
        None => {
            let conn = connect(&chain, &address).await?;
            trace!(route = ?conn.route(), id = conn.id(), "acquired new connection");
            ctx.listener.connection_acquired(conn.route(), false);
            client.connection_pool().lease(conn)
        }
    };
    drop(ctx.set_connection(Some(lease)));

    let result = chain.proceed(request).await;
    // Left over when a network interceptor answered without proceeding.
    if let Some(unused) = ctx.take_connection() {
        if let Some(route) = unused.route() {
            ctx.listener.connection_released(route);
        }
        if result.is_ok() {
            client.connection_pool().release(unused);
        }
    }
    result
}

/// The proxies to try for `address`, most preferred first.
fn proxies(address: &Address) -> Vec<Proxy> {
    if let Some(proxy) = address.proxy() {
        return vec![proxy.clone()];
    }
    let mut proxies = address.proxy_selector().select(address.url());
    if proxies.is_empty() {
        proxies.push(Proxy::direct());
    }
    proxies
}

/// Resolve and dial each route in turn until one connects.
async fn connect(chain: &Chain<'_>, address: &Address) -> crate::Result<RealConnection> {
    let ctx = chain.ctx();
    let client = chain.client();
    let listener = &ctx.listener;
    let options = ConnectOptions {
        connect_timeout: chain.connect_timeout(),
        read_timeout: chain.read_timeout(),
        write_timeout: chain.write_timeout(),
        user_agent: client.user_agent().to_owned(),
    };

    let mut last: Option<Error> = None;
    for proxy in proxies(address) {
        let (host, port) = if proxy.is_direct() {
            (address.host().to_owned(), address.port())
        } else {
            (proxy.host().to_owned(), proxy.port())
        };

        listener.dns_start(&host);
        let lookup = address.dns().lookup(&host);
        let resolved = with_timeout(chain.connect_timeout(), "dns lookup", async {
            lookup.await.map_err(Error::connect_io)
        })
        .await;
        let ips = match resolved {
            Ok(ips) if !ips.is_empty() => ips,
            Ok(_) => {
                last = Some(Error::connect(format!("no addresses for {host}")));
                continue;
            }
            Err(e) => {
                debug!(host = %host, error = %e, "dns lookup failed");
                if !proxy.is_direct() {
                    address.proxy_selector().connect_failed(address.url(), &proxy, &e);
                }
                last = Some(e);
                continue;
            }
        };
        let targets: Vec<SocketAddr> = ips.into_iter().map(|ip| SocketAddr::new(ip, port)).collect();
        listener.dns_end(&host, &targets);

        for target in targets {
            if ctx.is_canceled() {
                return Err(Error::canceled());
            }
            let route = Route::new(address.clone(), proxy.clone(), target);
            listener.connect_start(&route);
            match RealConnection::connect(&route, &options).await {
                Ok(conn) => {
                    listener.connect_end(&route, conn.protocol());
                    return Ok(conn);
                }
                Err(e) => {
                    debug!(route = ?route, error = %e, "connect failed");
                    listener.connect_failed(&route, &e);
                    if !proxy.is_direct() {
                        address.proxy_selector().connect_failed(address.url(), &proxy, &e);
                    }
                    if !client.retry_on_connection_failure() {
                        return Err(e);
                    }
                    last = Some(e);
                }
            }
        }
    }
    Err(last.unwrap_or_else(|| Error::connect(format!("no route to {}", address.host()))))
}
