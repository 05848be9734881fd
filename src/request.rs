//! Requests.
//!
//! A [`Request`] is an immutable value: URL, method, headers, optional
//! body and a type-keyed tag map.  Build one with [`Request::builder()`]
//! and hand it to [`Httpd::new_call()`](crate::Httpd::new_call).

use crate::body::RequestBody;
use crate::cache_control::CacheControl;
use crate::error::Error;
use crate::headers::Headers;
use crate::url::{IntoUrl, UnoUrl};
use http::Method;

/// An HTTP request.
///
/// Cloning is cheap: the body is reference-counted.
#[derive(Clone)]
pub struct Request {
    url: UnoUrl,
    method: Method,
    headers: Headers,
    body: Option<RequestBody>,
    tags: http::Extensions,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.redact())
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish()
    }
}

impl Request {
    /// A fresh [`RequestBuilder`] for a `GET` with no URL set.
    pub fn builder() -> RequestBuilder {
        RequestBuilder::new()
    }

    /// Shorthand for a bodiless `GET` of `url`.
    pub fn get<U: IntoUrl>(url: U) -> crate::Result<Request> {
        Request::builder().url(url).build()
    }

    /// The request URL.
    pub fn url(&self) -> &UnoUrl {
        &self.url
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// All headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The last value of `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Every value of `name`, in order.
    pub fn headers_named(&self, name: &str) -> Vec<&str> {
        self.headers.values(name)
    }

    /// The body, if any.
    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    /// The tag of type `T`, if one was attached.
    pub fn tag<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.tags.get::<T>()
    }

    /// `true` for `https` URLs.
    pub fn is_https(&self) -> bool {
        self.url.is_https()
    }

    /// Directives from this request's `Cache-Control` and `Pragma` headers.
    pub fn cache_control(&self) -> CacheControl {
        CacheControl::parse(&self.headers)
    }

    /// A builder seeded with this request.
    pub fn new_builder(&self) -> RequestBuilder {
        RequestBuilder {
            url: Some(Ok(self.url.clone())),
            method: self.method.clone(),
            headers: self.headers.new_builder(),
            body: self.body.clone(),
            tags: self.tags.clone(),
            error: None,
        }
    }

    /// `false` if the body is one-shot and so cannot be sent again.
    pub(crate) fn is_replayable(&self) -> bool {
        self.body.as_ref().is_none_or(|b| !b.is_one_shot())
    }
}

/// `true` if `method` may carry a request body.
pub fn permits_request_body(method: &Method) -> bool {
    !(method == Method::GET || method == Method::HEAD)
}

/// `true` if `method` must carry a request body.
pub fn requires_request_body(method: &Method) -> bool {
    matches!(method.as_str(), "POST" | "PUT" | "PATCH" | "PROPPATCH" | "REPORT")
}

/// Builds a [`Request`].
///
/// Errors from individual setters are deferred to [`build()`](Self::build),
/// so calls can be chained without `?` at each step.
///
/// # Example
///
/// ```rust
/// use uno::{Request, RequestBody};
///
/// let request = Request::builder()
///     .url("https://example.com/upload")
///     .header("X-Trace", "1")
///     .post(RequestBody::new(Some("text/plain"), "hello"))
///     .build()?;
/// assert_eq!(request.method(), "POST");
/// # Ok::<(), uno::Error>(())
/// ```
pub struct RequestBuilder {
    url: Option<Result<UnoUrl, Error>>,
    method: Method,
    headers: crate::headers::Builder,
    body: Option<RequestBody>,
    tags: http::Extensions,
    error: Option<Error>,
}

impl std::fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let url = match &self.url {
            Some(Ok(u)) => u.redact(),
            Some(Err(_)) => "<invalid>".to_owned(),
            None => "<unset>".to_owned(),
        };
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("url", &url)
            .finish()
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    /// A `GET` builder with no URL.
    pub fn new() -> Self {
        RequestBuilder {
            url: None,
            method: Method::GET,
            headers: Headers::builder(),
            body: None,
            tags: http::Extensions::new(),
            error: None,
        }
    }

    /// Set the target URL.
    #[must_use]
    pub fn url<U: IntoUrl>(mut self, url: U) -> Self {
        self.url = Some(url.into_url());
        self
    }

    /// Set the header `name` to `value`, replacing earlier values.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers = match std::mem::take(&mut self.headers).set(name, value) {
            Ok(b) => b,
            Err(e) => {
                self.error.get_or_insert(e);
                Headers::builder()
            }
        };
        self
    }

    /// Add a header line without removing existing values.
    #[must_use]
    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers = match std::mem::take(&mut self.headers).add(name, value) {
            Ok(b) => b,
            Err(e) => {
                self.error.get_or_insert(e);
                Headers::builder()
            }
        };
        self
    }

    /// Remove every value of `name`.
    #[must_use]
    pub fn remove_header(mut self, name: &str) -> Self {
        self.headers = std::mem::take(&mut self.headers).remove_all(name);
        self
    }

    /// Replace all headers.
    #[must_use]
    pub fn headers(mut self, headers: &Headers) -> Self {
        self.headers = headers.new_builder();
        self
    }

    /// Set or clear the `Cache-Control` header.
    #[must_use]
    pub fn cache_control(self, cache_control: &CacheControl) -> Self {
        let value = cache_control.to_string();
        if value.is_empty() {
            self.remove_header("Cache-Control")
        } else {
            self.header("Cache-Control", &value)
        }
    }

    /// Set the method and body together.
    ///
    /// `GET` and `HEAD` may not have a body; `POST`, `PUT`, `PATCH`,
    /// `PROPPATCH` and `REPORT` must.
    #[must_use]
    pub fn method(mut self, method: Method, body: Option<RequestBody>) -> Self {
        if body.is_some() && !permits_request_body(&method) {
            self.error
                .get_or_insert(Error::builder(format!("method {method} must not have a request body")));
        } else if body.is_none() && requires_request_body(&method) {
            self.error
                .get_or_insert(Error::builder(format!("method {method} must have a request body")));
        }
        self.method = method;
        self.body = body;
        self
    }

    /// `GET` without a body.
    #[must_use]
    pub fn get(self) -> Self {
        self.method(Method::GET, None)
    }

    /// `HEAD` without a body.
    #[must_use]
    pub fn head(self) -> Self {
        self.method(Method::HEAD, None)
    }

    /// `POST` with `body`.
    #[must_use]
    pub fn post(self, body: impl Into<RequestBody>) -> Self {
        self.method(Method::POST, Some(body.into()))
    }

    /// `PUT` with `body`.
    #[must_use]
    pub fn put(self, body: impl Into<RequestBody>) -> Self {
        self.method(Method::PUT, Some(body.into()))
    }

    /// `PATCH` with `body`.
    #[must_use]
    pub fn patch(self, body: impl Into<RequestBody>) -> Self {
        self.method(Method::PATCH, Some(body.into()))
    }

    /// `DELETE`, optionally with a body.
    #[must_use]
    pub fn delete(self, body: Option<RequestBody>) -> Self {
        self.method(Method::DELETE, body)
    }

    /// Attach a tag, replacing any earlier tag of the same type.
    #[must_use]
    pub fn tag<T: Clone + Send + Sync + 'static>(mut self, tag: T) -> Self {
        self.tags.insert(tag);
        self
    }

    /// Finish the request.  Reports the first deferred setter error, or a
    /// missing URL.
    pub fn build(self) -> crate::Result<Request> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let url = self.url.ok_or_else(|| Error::builder("url == null"))??;
        Ok(Request {
            url,
            method: self.method,
            headers: self.headers.build(),
            body: self.body,
            tags: self.tags,
        })
    }
}
