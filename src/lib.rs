#![doc = include_str!("../README.md")]
#![deny(missing_docs)]

#[macro_use]
mod tracing;

mod address;
/// Authentication challenge responders.
pub mod authenticator;
mod body;
/// Response caching.
pub mod cache;
mod cache_control;
mod call;
mod challenge;
mod client;
mod connection;
/// Cookie parsing and matching.
pub mod cookie;
/// Cookie storage.
pub mod cookie_jar;
/// HTTP-date formatting and parsing.
pub mod dates;
mod dispatcher;
/// Host name resolution.
pub mod dns;
mod error;
/// Call lifecycle events.
pub mod event_listener;
mod exchange;
/// Header blocks.
pub mod headers;
mod host;
/// The interceptor chain.
pub mod interceptor;
mod interceptors;
mod percent;
mod pool;
mod protocol;
/// Proxy configuration and selection.
pub mod proxy;
/// Redirect policy.
pub mod redirect;
mod request;
mod response;
/// Retry classification and budgets.
pub mod retry;
/// TLS connector, verifier and pinner seams.
pub mod tls;
/// URL model.
pub mod url;
mod util;
/// WebSocket seam.
pub mod websocket;

pub use address::{Address, AddressBuilder, Route};
pub use body::{RequestBody, ResponseBody};
pub use cache_control::CacheControl;
pub use call::{Call, Callback, RealCall};
pub use challenge::Challenge;
pub use client::{Httpd, HttpdBuilder};
pub use cookie::Cookie;
pub use cookie_jar::{CookieJar, MemoryCookieJar, NoCookies};
pub use dispatcher::Dispatcher;
pub use error::Error;
pub use headers::Headers;
pub use interceptor::{Chain, Interceptor};
pub use pool::ConnectionPool;
pub use protocol::Protocol;
pub use proxy::{NoProxy, Proxy};
pub use request::{Request, RequestBuilder};
pub use response::{Response, ResponseBuilder};
pub use url::{IntoUrl, ParseError, UnoUrl};
pub use util::Shared;

pub use bytes::Bytes;
pub use http::{Method, StatusCode};

/// A `Result` alias where the `Err` case is [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
