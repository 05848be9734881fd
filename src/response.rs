//! Responses.
//!
//! A [`Response`] pairs the request that produced it with the status line,
//! headers and buffered body.  Responses produced by the engine also carry
//! provenance links:
//!
//! - [`network_response()`](Response::network_response): what the server
//!   sent, before the bridge and cache stages rewrote it.
//! - [`cache_response()`](Response::cache_response): the stored entry the
//!   cache served or revalidated.
//! - [`prior_response()`](Response::prior_response): the redirect or auth
//!   challenge that triggered this follow-up.
//!
//! Linked responses never carry a body, and network or cache responses
//! never carry further links, so the chain cannot form a cycle.

use crate::address::Route;
use crate::body::ResponseBody;
use crate::cache_control::CacheControl;
use crate::challenge::Challenge;
use crate::error::Error;
use crate::headers::Headers;
use crate::protocol::Protocol;
use crate::request::Request;
use crate::tls::Handshake;
use crate::url::UnoUrl;
use http::StatusCode;
use std::fmt;

/// An HTTP response.
#[derive(Clone)]
pub struct Response {
    request: Request,
    protocol: Protocol,
    code: StatusCode,
    message: String,
    headers: Headers,
    body: Option<ResponseBody>,
    network_response: Option<Box<Response>>,
    cache_response: Option<Box<Response>>,
    prior_response: Option<Box<Response>>,
    sent_request_at_millis: i64,
    received_response_at_millis: i64,
    handshake: Option<Handshake>,
    pub(crate) route: Option<Route>,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("protocol", &self.protocol)
            .field("code", &self.code.as_u16())
            .field("message", &self.message)
            .field("url", &self.request.url().redact())
            .finish()
    }
}

impl Response {
    /// A fresh [`ResponseBuilder`].
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder::default()
    }

    /// The request that produced this response.  After redirects this is
    /// the final request, not the one the caller built.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// URL of [`request()`](Self::request).
    pub fn url(&self) -> &UnoUrl {
        self.request.url()
    }

    /// The protocol the response arrived over.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// The status code.
    pub fn code(&self) -> StatusCode {
        self.code
    }

    /// The reason phrase.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// `true` for 2xx codes.
    pub fn is_successful(&self) -> bool {
        self.code.is_success()
    }

    /// `true` for the redirect codes a client may follow: 300, 301, 302,
    /// 303, 307 and 308.
    pub fn is_redirect(&self) -> bool {
        matches!(self.code.as_u16(), 300 | 301 | 302 | 303 | 307 | 308)
    }

    /// All headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The last value of `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Every value of `name`, in order.
    pub fn headers_named(&self, name: &str) -> Vec<&str> {
        self.headers.values(name)
    }

    /// The body.  `None` on linked responses.
    pub fn body(&self) -> Option<&ResponseBody> {
        self.body.as_ref()
    }

    /// Take the body, leaving `None`.
    pub fn take_body(&mut self) -> Option<ResponseBody> {
        self.body.take()
    }

    /// The body decoded as UTF-8; empty when there is no body.
    pub fn text(&self) -> crate::Result<String> {
        match &self.body {
            Some(body) => body.text(),
            None => Ok(String::new()),
        }
    }

    /// The raw response from the network, if the network was used.
    pub fn network_response(&self) -> Option<&Response> {
        self.network_response.as_deref()
    }

    /// The stored response the cache used, if any.
    pub fn cache_response(&self) -> Option<&Response> {
        self.cache_response.as_deref()
    }

    /// The response that triggered this follow-up, if any.
    pub fn prior_response(&self) -> Option<&Response> {
        self.prior_response.as_deref()
    }

    /// Number of responses in the [`prior_response()`](Self::prior_response)
    /// chain.
    pub fn prior_response_count(&self) -> usize {
        std::iter::successors(self.prior_response(), |r| r.prior_response()).count()
    }

    /// Challenges answering a 401 (`WWW-Authenticate`) or 407
    /// (`Proxy-Authenticate`).  Empty for other codes.
    pub fn challenges(&self) -> Vec<Challenge> {
        let header = match self.code {
            StatusCode::UNAUTHORIZED => "WWW-Authenticate",
            StatusCode::PROXY_AUTHENTICATION_REQUIRED => "Proxy-Authenticate",
            _ => return Vec::new(),
        };
        self.headers.parse_challenges(header)
    }

    /// Directives from this response's `Cache-Control` and `Pragma` headers.
    pub fn cache_control(&self) -> CacheControl {
        CacheControl::parse(&self.headers)
    }

    /// Wall-clock millis when the request headers were sent.  For cached
    /// responses this is the original network request time.
    pub fn sent_request_at_millis(&self) -> i64 {
        self.sent_request_at_millis
    }

    /// Wall-clock millis when the response headers arrived.
    pub fn received_response_at_millis(&self) -> i64 {
        self.received_response_at_millis
    }

    /// TLS handshake details for `https` responses from the network.
    pub fn handshake(&self) -> Option<&Handshake> {
        self.handshake.as_ref()
    }

    /// A builder seeded with this response.
    pub fn new_builder(&self) -> ResponseBuilder {
        ResponseBuilder {
            request: Some(self.request.clone()),
            protocol: Some(self.protocol),
            code: Some(self.code),
            message: Some(self.message.clone()),
            headers: self.headers.new_builder(),
            body: self.body.clone(),
            network_response: self.network_response.clone(),
            cache_response: self.cache_response.clone(),
            prior_response: self.prior_response.clone(),
            sent_request_at_millis: self.sent_request_at_millis,
            received_response_at_millis: self.received_response_at_millis,
            handshake: self.handshake.clone(),
            route: self.route.clone(),
        }
    }

    /// A copy fit to be linked from another response: no body, no network
    /// or cache links.  The prior chain is kept.
    pub fn stripped(&self) -> Response {
        Response {
            body: None,
            network_response: None,
            cache_response: None,
            ..self.clone()
        }
    }
}

/// Builds a [`Response`].
///
/// Request, protocol, code and message are required.
#[derive(Default)]
pub struct ResponseBuilder {
    request: Option<Request>,
    protocol: Option<Protocol>,
    code: Option<StatusCode>,
    message: Option<String>,
    headers: crate::headers::Builder,
    body: Option<ResponseBody>,
    network_response: Option<Box<Response>>,
    cache_response: Option<Box<Response>>,
    prior_response: Option<Box<Response>>,
    sent_request_at_millis: i64,
    received_response_at_millis: i64,
    handshake: Option<Handshake>,
    route: Option<Route>,
}

impl fmt::Debug for ResponseBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBuilder")
            .field("code", &self.code)
            .field("message", &self.message)
            .finish()
    }
}

impl ResponseBuilder {
    /// The request this answers.
    #[must_use]
    pub fn request(mut self, request: Request) -> Self {
        self.request = Some(request);
        self
    }

    /// The wire protocol.
    #[must_use]
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// The status code.
    #[must_use]
    pub fn code(mut self, code: StatusCode) -> Self {
        self.code = Some(code);
        self
    }

    /// The reason phrase.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Replace every header.
    #[must_use]
    pub fn headers(mut self, headers: &Headers) -> Self {
        self.headers = headers.new_builder();
        self
    }

    /// Set `name` to `value` without validation.  Response headers come from
    /// the network and are accepted as is.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.set_lenient(name, value);
        self
    }

    /// Add a header line without validation.
    #[must_use]
    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.add_lenient(name, value);
        self
    }

    /// Remove every `name` line.
    #[must_use]
    pub fn remove_header(mut self, name: &str) -> Self {
        self.headers.remove_all_in_place(name);
        self
    }

    /// Set or clear the body.
    #[must_use]
    pub fn body(mut self, body: Option<ResponseBody>) -> Self {
        self.body = body;
        self
    }

    /// Link the raw network response.
    #[must_use]
    pub fn network_response(mut self, response: Option<Response>) -> Self {
        self.network_response = response.map(Box::new);
        self
    }

    /// Link the cached response.
    #[must_use]
    pub fn cache_response(mut self, response: Option<Response>) -> Self {
        self.cache_response = response.map(Box::new);
        self
    }

    /// Link the response that caused this follow-up.
    #[must_use]
    pub fn prior_response(mut self, response: Option<Response>) -> Self {
        self.prior_response = response.map(Box::new);
        self
    }

    /// When the request was sent.
    #[must_use]
    pub fn sent_request_at_millis(mut self, millis: i64) -> Self {
        self.sent_request_at_millis = millis;
        self
    }

    /// When the response arrived.
    #[must_use]
    pub fn received_response_at_millis(mut self, millis: i64) -> Self {
        self.received_response_at_millis = millis;
        self
    }

    /// TLS handshake details.
    #[must_use]
    pub fn handshake(mut self, handshake: Option<Handshake>) -> Self {
        self.handshake = handshake;
        self
    }

    #[must_use]
    pub(crate) fn route(mut self, route: Option<Route>) -> Self {
        self.route = route;
        self
    }

    /// Finish the response.
    ///
    /// Fails when a required field is missing, when a network or cache
    /// response carries a body or links of its own, or when the prior
    /// response carries a body.
    pub fn build(self) -> crate::Result<Response> {
        let request = self.request.ok_or_else(|| Error::builder("request == null"))?;
        let protocol = self.protocol.ok_or_else(|| Error::builder("protocol == null"))?;
        let code = self.code.ok_or_else(|| Error::builder("code == null"))?;
        let message = self.message.ok_or_else(|| Error::builder("message == null"))?;
        if let Some(r) = &self.network_response {
            check_linked("network_response", r)?;
        }
        if let Some(r) = &self.cache_response {
            check_linked("cache_response", r)?;
        }
        if let Some(r) = &self.prior_response {
            check_prior(r)?;
        }
        Ok(Response {
            request,
            protocol,
            code,
            message,
            headers: self.headers.build(),
            body: self.body,
            network_response: self.network_response,
            cache_response: self.cache_response,
            prior_response: self.prior_response,
            sent_request_at_millis: self.sent_request_at_millis,
            received_response_at_millis: self.received_response_at_millis,
            handshake: self.handshake,
            route: self.route,
        })
    }
}

fn check_linked(name: &str, response: &Response) -> Result<(), Error> {
    if response.body.is_some() {
        return Err(Error::builder(format!("{name}.body != null")));
    }
    if response.network_response.is_some() {
        return Err(Error::builder(format!("{name}.network_response != null")));
    }
    if response.cache_response.is_some() {
        return Err(Error::builder(format!("{name}.cache_response != null")));
    }
    if response.prior_response.is_some() {
        return Err(Error::builder(format!("{name}.prior_response != null")));
    }
    Ok(())
}

fn check_prior(response: &Response) -> Result<(), Error> {
    if response.body.is_some() {
        return Err(Error::builder("prior_response.body != null"));
    }
    if response.network_response.is_some() || response.cache_response.is_some() {
        return Err(Error::builder("prior_response must be stripped of links"));
    }
    Ok(())
}
