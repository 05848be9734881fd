//! Error type for uno.
//!
//! Every failure the engine surfaces is an [`Error`] carrying a kind
//! classification.  The query methods ([`is_builder()`](Error::is_builder),
//! [`is_connect()`](Error::is_connect), [`is_canceled()`](Error::is_canceled),
//! ...) let callers branch on the failure class without matching on
//! message text.
//!
//! HTTP error statuses are never converted into an `Error`: a 404 or 500
//! is a successful call that produced a [`Response`](crate::Response).

use crate::url::UnoUrl;
use http::StatusCode;
use std::fmt;
use std::io;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The error type for uno operations.
///
/// When a request URL is available it is included in the `Display` output.
pub struct Error {
    pub(crate) kind: ErrorKind,
    pub(crate) message: String,
    pub(crate) source: Option<BoxError>,
    pub(crate) status: Option<StatusCode>,
    pub(crate) url: Option<Box<UnoUrl>>,
}

/// Classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    /// Invalid builder argument (bad protocol list, zero timeout, ...).
    Builder,
    /// Malformed URL.
    Url,
    /// Malformed header name/value or cookie.
    Malformed,
    /// DNS, TCP or TLS handshake failure.
    Connect,
    /// Connect, read, write or whole-call deadline elapsed.
    Timeout,
    /// Malformed status line, header block or premature EOF.
    Protocol,
    /// The call was canceled.
    Canceled,
    /// Too many follow-up requests.
    Redirect,
    /// Other request-phase I/O failure.
    Request,
    /// Request or response body failure.
    Body,
    /// Response body decoding failure (gzip, charset).
    Decode,
    /// API contract violation: double execute, interceptor that proceeds
    /// twice or never.
    IllegalState,
}

impl Error {
    /// Returns `true` if this is a configuration error raised by a builder.
    pub fn is_builder(&self) -> bool {
        matches!(self.kind, ErrorKind::Builder)
    }

    /// Returns `true` if a URL could not be parsed.
    pub fn is_url(&self) -> bool {
        matches!(self.kind, ErrorKind::Url)
    }

    /// Returns `true` if a header or cookie was rejected as malformed.
    pub fn is_malformed(&self) -> bool {
        matches!(self.kind, ErrorKind::Malformed)
    }

    /// Returns `true` if this is a connection error.
    ///
    /// Connection errors include DNS resolution failures, refused TCP
    /// connections and TLS handshake failures.
    pub fn is_connect(&self) -> bool {
        matches!(self.kind, ErrorKind::Connect)
    }

    /// Returns `true` if a deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Returns `true` if the peer violated the HTTP protocol.
    pub fn is_protocol(&self) -> bool {
        matches!(self.kind, ErrorKind::Protocol)
    }

    /// Returns `true` if the call was canceled.
    pub fn is_canceled(&self) -> bool {
        matches!(self.kind, ErrorKind::Canceled)
    }

    /// Returns `true` if the follow-up limit was exceeded.
    pub fn is_redirect(&self) -> bool {
        matches!(self.kind, ErrorKind::Redirect)
    }

    /// Returns `true` if this is a request-phase I/O error.
    pub fn is_request(&self) -> bool {
        matches!(self.kind, ErrorKind::Request)
    }

    /// Returns `true` if this is a body error.
    pub fn is_body(&self) -> bool {
        matches!(self.kind, ErrorKind::Body)
    }

    /// Returns `true` if a response body could not be decoded.
    pub fn is_decode(&self) -> bool {
        matches!(self.kind, ErrorKind::Decode)
    }

    /// Returns `true` if an API contract was violated.
    pub fn is_illegal_state(&self) -> bool {
        matches!(self.kind, ErrorKind::IllegalState)
    }

    /// Returns `true` if the underlying I/O error kind is one of `kinds`.
    pub(crate) fn has_io_kind(&self, kinds: &[io::ErrorKind]) -> bool {
        use std::error::Error as _;
        let mut cur: Option<&(dyn std::error::Error + 'static)> = self.source();
        while let Some(e) = cur {
            if let Some(io_err) = e.downcast_ref::<io::Error>()
                && kinds.contains(&io_err.kind())
            {
                return true;
            }
            cur = e.source();
        }
        false
    }

    /// Returns `true` if the peer reset or closed the connection before
    /// answering.  These failures are safe to retry on a fresh connection.
    pub(crate) fn is_connection_reset(&self) -> bool {
        self.has_io_kind(&[
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::UnexpectedEof,
        ])
    }

    /// Returns the HTTP status code attached to this error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Returns the request URL associated with this error, if available.
    pub fn url(&self) -> Option<&UnoUrl> {
        self.url.as_deref()
    }

    /// Strips the URL from this error.
    #[must_use]
    pub fn without_url(mut self) -> Self {
        self.url = None;
        self
    }

    /// Attach a request URL to this error (builder pattern).
    #[must_use]
    pub fn with_url(mut self, url: UnoUrl) -> Self {
        self.url = Some(Box::new(url));
        self
    }

    /// Attach a source error (builder pattern).
    #[must_use]
    pub(crate) fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attach a status code.
    #[must_use]
    pub(crate) fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// The human-readable detail message.
    pub fn message(&self) -> &str {
        &self.message
    }

    // -- Internal constructors --

    fn with_kind(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            source: None,
            status: None,
            url: None,
        }
    }

    pub(crate) fn builder(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Builder, msg)
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Malformed, msg)
    }

    pub(crate) fn connect(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Connect, msg)
    }

    pub(crate) fn timeout(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Timeout, msg)
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Protocol, msg)
    }

    pub(crate) fn canceled() -> Self {
        Self::with_kind(ErrorKind::Canceled, "Canceled")
    }

    pub(crate) fn redirect(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Redirect, msg)
    }

    pub(crate) fn request(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Request, msg)
    }

    pub(crate) fn body(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Body, msg)
    }

    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Decode, msg)
    }

    pub(crate) fn illegal_state(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::IllegalState, msg)
    }

    /// Wrap an I/O error raised while connecting.
    pub(crate) fn connect_io(err: io::Error) -> Self {
        let kind = if err.kind() == io::ErrorKind::TimedOut {
            ErrorKind::Timeout
        } else {
            ErrorKind::Connect
        };
        Self::with_kind(kind, err.to_string()).with_source(err)
    }

    /// Wrap an I/O error raised on an established connection.
    pub(crate) fn io(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => ErrorKind::Protocol,
            _ => ErrorKind::Request,
        };
        Self::with_kind(kind, err.to_string()).with_source(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Builder => write!(f, "builder error: {}", self.message)?,
            ErrorKind::Url => write!(f, "invalid URL: {}", self.message)?,
            ErrorKind::Malformed => write!(f, "malformed input: {}", self.message)?,
            ErrorKind::Connect => f.write_str("error trying to connect")?,
            ErrorKind::Timeout => f.write_str("operation timed out")?,
            ErrorKind::Protocol => write!(f, "protocol error: {}", self.message)?,
            ErrorKind::Canceled => f.write_str("Canceled")?,
            ErrorKind::Redirect => write!(f, "error following redirect: {}", self.message)?,
            ErrorKind::Request => f.write_str("error sending request")?,
            ErrorKind::Body => f.write_str("request or response body error")?,
            ErrorKind::Decode => f.write_str("error decoding response body")?,
            ErrorKind::IllegalState => write!(f, "illegal state: {}", self.message)?,
        }
        if let Some(url) = &self.url {
            write!(f, " for url ({})", url.redact())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("url", &self.url)
            .field("status", &self.status)
            .field("source", &self.source)
            .finish()
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| &**e as &(dyn std::error::Error + 'static))
    }
}

impl From<crate::url::ParseError> for Error {
    fn from(err: crate::url::ParseError) -> Self {
        Self::with_kind(ErrorKind::Url, err.to_string()).with_source(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err)
    }
}

impl From<futures_util::future::Aborted> for Error {
    fn from(_: futures_util::future::Aborted) -> Self {
        Error::canceled()
    }
}
