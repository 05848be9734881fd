//! Answering authentication challenges.
//!
//! When a server answers 401, or a proxy answers 407, the retry stage asks
//! the configured [`Authenticator`] for a follow-up request carrying
//! credentials.  Returning `None` gives up and hands the challenge response
//! to the caller.

use crate::address::Route;
use crate::request::Request;
use crate::response::Response;
use crate::util::Shared;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::StatusCode;
use std::sync::{Arc, OnceLock};

/// Produces authenticated follow-ups for 401 and 407 responses.
pub trait Authenticator: Send + Sync {
    /// A request answering the challenge in `response`, or `None` to give
    /// up.  `route` is the route the challenge arrived over, when known.
    fn authenticate(&self, route: Option<&Route>, response: &Response) -> crate::Result<Option<Request>>;
}

/// Never answers a challenge.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthenticator;

impl Authenticator for NoAuthenticator {
    fn authenticate(&self, _route: Option<&Route>, _response: &Response) -> crate::Result<Option<Request>> {
        Ok(None)
    }
}

pub(crate) fn none() -> Shared<dyn Authenticator> {
    static NONE: OnceLock<Arc<NoAuthenticator>> = OnceLock::new();
    let arc: Arc<dyn Authenticator> = NONE.get_or_init(|| Arc::new(NoAuthenticator)).clone();
    Shared(arc)
}

/// `Authorization` header values.
#[derive(Debug)]
pub struct Credentials;

impl Credentials {
    /// `Basic <base64(user:password)>`.
    pub fn basic(username: &str, password: &str) -> String {
        basic_value(username, password)
    }
}

pub(crate) fn basic_value(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

/// Answers `Basic` challenges with fixed credentials.
///
/// Gives up when the challenged request already carried credentials, so a
/// wrong password fails once instead of looping.
#[derive(Clone)]
pub struct BasicAuthenticator {
    value: String,
}

impl std::fmt::Debug for BasicAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BasicAuthenticator")
    }
}

impl BasicAuthenticator {
    /// Authenticate as `username`.
    pub fn new(username: &str, password: &str) -> Self {
        BasicAuthenticator {
            value: basic_value(username, password),
        }
    }
}

impl Authenticator for BasicAuthenticator {
    fn authenticate(&self, _route: Option<&Route>, response: &Response) -> crate::Result<Option<Request>> {
        let header = if response.code() == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            "Proxy-Authorization"
        } else {
            "Authorization"
        };
        if response.request().header(header).is_some() {
            debug!(header, "credentials already rejected; giving up");
            return Ok(None);
        }
        let offers_basic = response
            .challenges()
            .iter()
            .any(|c| c.scheme().eq_ignore_ascii_case("Basic"));
        if !offers_basic {
            return Ok(None);
        }
        response
            .request()
            .new_builder()
            .header(header, &self.value)
            .build()
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::tests::response;

    #[test]
    fn credentials_basic() {
        assert_eq!(
            Credentials::basic("Aladdin", "open sesame"),
            "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="
        );
        assert_eq!(Credentials::basic("", ""), "Basic Og==");
    }

    #[test]
    fn basic_authenticator_table() {
        let auth = BasicAuthenticator::new("u", "p");
        // (code, headers, request already authorized, expected header set, desc)
        let cases: &[(u16, &[(&str, &str)], bool, Option<&str>, &str)] = &[
            (401, &[("WWW-Authenticate", "Basic realm=\"x\"")], false, Some("Authorization"), "server"),
            (
                407,
                &[("Proxy-Authenticate", "Basic realm=\"x\"")],
                false,
                Some("Proxy-Authorization"),
                "proxy",
            ),
            (401, &[("WWW-Authenticate", "Digest realm=\"x\"")], false, None, "non-basic"),
            (401, &[], false, None, "no challenge"),
            (401, &[("WWW-Authenticate", "Basic realm=\"x\"")], true, None, "already tried"),
        ];
        for &(code, headers, already, expected, desc) in cases {
            let mut resp = response(code, headers);
            if already {
                let req = resp.request().new_builder().header("Authorization", "Basic old").build().unwrap();
                resp = resp.new_builder().request(req).build().unwrap();
            }
            let follow_up = auth.authenticate(None, &resp).unwrap();
            match expected {
                Some(header) => {
                    let req = follow_up.unwrap_or_else(|| panic!("{desc}: expected follow-up"));
                    assert_eq!(req.header(header), Some("Basic dTpw"), "{desc}");
                }
                None => assert!(follow_up.is_none(), "{desc}"),
            }
        }
    }

    #[test]
    fn no_authenticator_declines() {
        let resp = response(401, &[("WWW-Authenticate", "Basic realm=\"x\"")]);
        assert!(NoAuthenticator.authenticate(None, &resp).unwrap().is_none());
        assert_eq!(none(), none());
    }
}
