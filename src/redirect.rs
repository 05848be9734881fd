//! Redirect policy and 3xx follow-up requests.
//!
//! [`Policy`] caps how many follow-ups (redirects and auth retries
//! together) one call may make.  [`follow_redirect`] turns a 3xx response
//! into the next request, or `None` when the redirect should be handed to
//! the caller instead.

use crate::request::{Request, permits_request_body};
use crate::response::Response;
use http::Method;

/// The follow-up cap used when none is configured.
pub const DEFAULT_MAX_FOLLOW_UPS: u32 = 20;

/// A redirect policy.
///
/// ```rust
/// use uno::redirect;
///
/// let client = uno::Httpd::builder()
///     .redirect(redirect::Policy::limited(5))
///     .build();
/// # drop(client);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub(crate) inner: PolicyInner,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PolicyInner {
    /// Follow up to this many times.
    Limited(u32),
    /// Return every 3xx to the caller.
    None,
}

impl Policy {
    /// Follow at most `max` times per call.  Exceeding the cap fails the
    /// call with a redirect error.
    pub fn limited(max: usize) -> Self {
        Self {
            inner: PolicyInner::Limited(u32::try_from(max).unwrap_or(u32::MAX)),
        }
    }

    /// Never follow redirects.  Auth challenges are still answered.
    pub fn none() -> Self {
        Self {
            inner: PolicyInner::None,
        }
    }
}

impl Default for Policy {
    /// `limited(20)`.
    fn default() -> Self {
        Self::limited(DEFAULT_MAX_FOLLOW_UPS as usize)
    }
}

/// `true` if a redirected `method` keeps its body.
fn redirects_with_body(method: &Method) -> bool {
    method.as_str() == "PROPFIND"
}

/// `true` if a redirected `method` becomes a `GET`.
fn redirects_to_get(method: &Method) -> bool {
    method.as_str() != "PROPFIND"
}

/// `true` if `a` and `b` would share a connection: same scheme, host and
/// port.
pub(crate) fn same_connection(a: &crate::UnoUrl, b: &crate::UnoUrl) -> bool {
    a.scheme() == b.scheme() && a.host() == b.host() && a.port() == b.port()
}

/// The request that follows the 3xx `response`, if any.
///
/// `307` and `308` are followed for `GET` and `HEAD` only.  Other methods
/// become a bodiless `GET` (except `PROPFIND`, which keeps its method and
/// body).  Crossing between `http` and `https` requires
/// `follow_ssl_redirects`.  `Authorization` is dropped when the target is a
/// different origin.
pub(crate) fn follow_redirect(response: &Response, follow_ssl_redirects: bool) -> crate::Result<Option<Request>> {
    let request = response.request();
    let method = request.method();
    match response.code().as_u16() {
        307 | 308 if method != Method::GET && method != Method::HEAD => return Ok(None),
        300..=303 | 307 | 308 => {}
        _ => return Ok(None),
    }

    let Some(location) = response.header("Location") else {
        return Ok(None);
    };
    // Unsupported schemes resolve to nothing.
    let Some(url) = request.url().resolve(location) else {
        debug!(location, "redirect target unusable; not following");
        return Ok(None);
    };
    if url.scheme() != request.url().scheme() && !follow_ssl_redirects {
        debug!(from = request.url().scheme(), to = url.scheme(), "scheme-changing redirect disabled");
        return Ok(None);
    }

    let mut builder = request.new_builder();
    if permits_request_body(method) {
        let keep_body = redirects_with_body(method);
        builder = if redirects_to_get(method) {
            builder.method(Method::GET, None)
        } else {
            let body = if keep_body { request.body().cloned() } else { None };
            builder.method(method.clone(), body)
        };
        if !keep_body {
            builder = builder
                .remove_header("Transfer-Encoding")
                .remove_header("Content-Length")
                .remove_header("Content-Type");
        }
    }
    if !same_connection(request.url(), &url) {
        builder = builder.remove_header("Authorization");
    }
    trace!(code = response.code().as_u16(), to = %url.redact(), "following redirect");
    builder.url(url).build().map(Some)
}
