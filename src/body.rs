//! Request and response bodies.
//!
//! Both are fully buffered [`Bytes`].  A [`RequestBody`] can be marked
//! one-shot, which stops the engine from replaying it on retries and
//! redirects.

use bytes::Bytes;
use std::fmt;

/// A request body with an optional media type.
///
/// # Example
///
/// ```rust
/// use uno::RequestBody;
///
/// let body = RequestBody::new(Some("application/json"), r#"{"a":1}"#);
/// assert_eq!(body.content_length(), 7);
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RequestBody {
    content_type: Option<String>,
    data: Bytes,
    one_shot: bool,
}

impl RequestBody {
    /// A body of `data` with the given `Content-Type`.
    pub fn new(content_type: Option<&str>, data: impl Into<Bytes>) -> Self {
        RequestBody {
            content_type: content_type.map(str::to_owned),
            data: data.into(),
            one_shot: false,
        }
    }

    /// A zero-length body without a media type.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Forbid replaying this body on retries and follow-ups.
    #[must_use]
    pub fn one_shot(mut self) -> Self {
        self.one_shot = true;
        self
    }

    /// `true` if the body must be sent at most once.
    pub fn is_one_shot(&self) -> bool {
        self.one_shot
    }

    /// The media type sent as `Content-Type`.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Length in bytes.
    pub fn content_length(&self) -> u64 {
        self.data.len() as u64
    }

    /// The body bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody")
            .field("content_type", &self.content_type)
            .field("length", &self.data.len())
            .field("one_shot", &self.one_shot)
            .finish()
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(v: Vec<u8>) -> Self {
        RequestBody::new(None, v)
    }
}

impl From<&'static [u8]> for RequestBody {
    fn from(s: &'static [u8]) -> Self {
        RequestBody::new(None, Bytes::from_static(s))
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::new(Some("text/plain; charset=utf-8"), s)
    }
}

impl From<&'static str> for RequestBody {
    fn from(s: &'static str) -> Self {
        RequestBody::new(Some("text/plain; charset=utf-8"), Bytes::from_static(s.as_bytes()))
    }
}

impl From<Bytes> for RequestBody {
    fn from(b: Bytes) -> Self {
        RequestBody::new(None, b)
    }
}

/// A response body, read in full before the connection is released.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ResponseBody {
    content_type: Option<String>,
    data: Bytes,
}

impl ResponseBody {
    /// A body of `data` with the given `Content-Type`.
    pub fn new(content_type: Option<&str>, data: impl Into<Bytes>) -> Self {
        ResponseBody {
            content_type: content_type.map(str::to_owned),
            data: data.into(),
        }
    }

    /// A zero-length body.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The `Content-Type` the body arrived with.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Length in bytes.
    pub fn content_length(&self) -> u64 {
        self.data.len() as u64
    }

    /// The body bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Consume into the body bytes.
    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// Decode as UTF-8.
    ///
    /// Only UTF-8 (and its ASCII subset) is supported; a `charset`
    /// parameter naming anything else is a decode error.
    pub fn text(&self) -> crate::Result<String> {
        if let Some(charset) = self.content_type.as_deref().and_then(charset_param) {
            let charset = charset.to_ascii_lowercase();
            if !matches!(charset.as_str(), "utf-8" | "utf8" | "us-ascii" | "ascii") {
                return Err(crate::Error::decode(format!("unsupported charset: {charset}")));
            }
        }
        String::from_utf8(self.data.to_vec())
            .map_err(|e| crate::Error::decode("response body is not valid UTF-8").with_source(e))
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("content_type", &self.content_type)
            .field("length", &self.data.len())
            .finish()
    }
}

/// The `charset` parameter of a media type, unquoted.
fn charset_param(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}
