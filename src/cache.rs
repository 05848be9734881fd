//! HTTP response caching (RFC 7234).
//!
//! [`CacheStrategy`] decides, for one request and an optional stored
//! response, whether to use the network, the cache, or both (a conditional
//! request).  [`Cache`] is the storage seam; [`MemoryCache`] keeps entries
//! in process memory.

use crate::dates;
use crate::headers::Headers;
use crate::request::Request;
use crate::response::Response;
use crate::util::lock_or_clear;
use http::{Method, StatusCode};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

const ONE_DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Storage for cached responses, shared by every call of a client.
///
/// Stored responses keep their body and drop every provenance link.
pub trait Cache: Send + Sync {
    /// A stored response for `request`, or `None`.
    fn get(&self, request: &Request) -> Option<Response>;

    /// Store `response`, which answered `response.request()`.
    fn put(&self, response: &Response);

    /// Drop any entry for `request`.
    fn remove(&self, request: &Request);

    /// Replace the stored `cached` entry with `updated` after a 304.
    fn update(&self, cached: &Response, updated: &Response);

    /// Called once per call that consulted the cache.
    fn track_response(&self, _strategy: &CacheStrategy) {}

    /// Called when a conditional request came back 304.
    fn track_conditional_cache_hit(&self) {}
}

/// Given a request and a stored response, which of network and cache to
/// use.
///
/// | `network_request` | `cache_response` | meaning                          |
/// |-------------------|------------------|----------------------------------|
/// | `None`            | `None`           | `only-if-cached` miss: 504       |
/// | `None`            | `Some`           | serve from cache                 |
/// | `Some`            | `None`           | plain network request            |
/// | `Some`            | `Some`           | conditional request; 304 merges  |
#[derive(Debug, Clone)]
pub struct CacheStrategy {
    network_request: Option<Request>,
    cache_response: Option<Response>,
}

impl CacheStrategy {
    /// The request to send, if the network is needed.
    pub fn network_request(&self) -> Option<&Request> {
        self.network_request.as_ref()
    }

    /// The cached response to return or validate.
    pub fn cache_response(&self) -> Option<&Response> {
        self.cache_response.as_ref()
    }

    pub(crate) fn into_parts(self) -> (Option<Request>, Option<Response>) {
        (self.network_request, self.cache_response)
    }

    /// Compute the strategy at `now_millis` for `request` and the stored
    /// `candidate`.
    pub fn compute(now_millis: i64, request: &Request, candidate: Option<Response>) -> CacheStrategy {
        let strategy = compute_candidate(now_millis, request, candidate);
        if strategy.network_request.is_some() && request.cache_control().only_if_cached() {
            trace!(url = %request.url().redact(), "only-if-cached request cannot be satisfied");
            return CacheStrategy {
                network_request: None,
                cache_response: None,
            };
        }
        strategy
    }
}

/// Header-derived timing facts about a stored response.
struct Candidate {
    response: Response,
    served_date: Option<i64>,
    served_date_string: Option<String>,
    last_modified: Option<i64>,
    last_modified_string: Option<String>,
    expires: Option<i64>,
    etag: Option<String>,
    age_seconds: Option<i64>,
}

impl Candidate {
    fn new(response: Response) -> Candidate {
        let headers = response.headers();
        let date = |name: &str| headers.get_date(name).map(dates::to_millis);
        Candidate {
            served_date: date("Date"),
            served_date_string: headers.get("Date").map(str::to_owned),
            last_modified: date("Last-Modified"),
            last_modified_string: headers.get("Last-Modified").map(str::to_owned),
            expires: date("Expires"),
            etag: headers.get("ETag").map(str::to_owned),
            age_seconds: headers
                .get("Age")
                .and_then(|v| v.trim().parse::<i64>().ok())
                .map(|v| v.max(0)),
            response,
        }
    }

    /// Current age of the response in millis (RFC 7234 §4.2.3).
    fn age_millis(&self, now_millis: i64) -> i64 {
        let sent = self.response.sent_request_at_millis();
        let received = self.response.received_response_at_millis();
        let apparent = self
            .served_date
            .map_or(0, |served| (received - served).max(0));
        let received_age = match self.age_seconds {
            Some(age) => apparent.max(age.saturating_mul(1000)),
            None => apparent,
        };
        let response_duration = received - sent;
        let resident_duration = now_millis - received;
        received_age + response_duration + resident_duration
    }

    /// How long the response is fresh for, in millis, counted from when it
    /// was served.
    fn freshness_lifetime_millis(&self) -> i64 {
        if let Some(max_age) = self.response.cache_control().max_age_seconds() {
            return i64::from(max_age) * 1000;
        }
        if let Some(expires) = self.expires {
            let served = self
                .served_date
                .unwrap_or(self.response.received_response_at_millis());
            return (expires - served).max(0);
        }
        if let Some(last_modified) = self.last_modified
            && self.response.request().url().query().is_none()
        {
            // Heuristic: 10% of the time since last modification
            // (RFC 7234 §4.2.2).  Never applied to URLs with a query.
            let served = self
                .served_date
                .unwrap_or(self.response.sent_request_at_millis());
            let delta = served - last_modified;
            return if delta > 0 { delta / 10 } else { 0 };
        }
        0
    }

    fn is_freshness_lifetime_heuristic(&self) -> bool {
        self.response.cache_control().max_age_seconds().is_none() && self.expires.is_none()
    }
}

fn compute_candidate(now_millis: i64, request: &Request, candidate: Option<Response>) -> CacheStrategy {
    let network = |request: &Request| CacheStrategy {
        network_request: Some(request.clone()),
        cache_response: None,
    };
    let Some(response) = candidate else {
        return network(request);
    };
    if request.is_https() && response.handshake().is_none() {
        return network(request);
    }
    if !is_cacheable(&response, request) {
        return network(request);
    }
    let request_caching = request.cache_control();
    if request_caching.no_cache() || has_conditions(request) {
        return network(request);
    }

    let candidate = Candidate::new(response);
    let response_caching = candidate.response.cache_control();

    let age = candidate.age_millis(now_millis);
    let mut fresh = candidate.freshness_lifetime_millis();
    if let Some(max_age) = request_caching.max_age_seconds() {
        fresh = fresh.min(i64::from(max_age) * 1000);
    }
    let min_fresh = request_caching
        .min_fresh_seconds()
        .map_or(0, |s| i64::from(s) * 1000);
    let max_stale = match request_caching.max_stale_seconds() {
        Some(s) if !response_caching.must_revalidate() => i64::from(s) * 1000,
        _ => 0,
    };

    if !response_caching.no_cache() && age + min_fresh < fresh + max_stale {
        let mut builder = candidate.response.new_builder();
        if age + min_fresh >= fresh {
            builder = builder.add_header("Warning", "110 HttpURLConnection \"Response is stale\"");
        }
        if age > ONE_DAY_MILLIS && candidate.is_freshness_lifetime_heuristic() {
            builder = builder.add_header("Warning", "113 HttpURLConnection \"Heuristic expiration\"");
        }
        return match builder.build() {
            Ok(response) => CacheStrategy {
                network_request: None,
                cache_response: Some(response),
            },
            Err(_) => network(request),
        };
    }

    // Stale: validate with whatever the stored response offers.
    let (name, value) = if let Some(etag) = &candidate.etag {
        ("If-None-Match", etag.clone())
    } else if let Some(last_modified) = &candidate.last_modified_string {
        ("If-Modified-Since", last_modified.clone())
    } else if let Some(served) = &candidate.served_date_string {
        ("If-Modified-Since", served.clone())
    } else {
        return network(request);
    };

    let mut headers = request.headers().new_builder();
    headers.set_lenient(name, &value);
    match request.new_builder().headers(&headers.build()).build() {
        Ok(conditional) => CacheStrategy {
            network_request: Some(conditional),
            cache_response: Some(candidate.response),
        },
        Err(_) => network(request),
    }
}

/// `true` if the caller already made `request` conditional; the cache
/// cannot answer for them.
fn has_conditions(request: &Request) -> bool {
    request.header("If-Modified-Since").is_some() || request.header("If-None-Match").is_some()
}

/// `true` if `response` may be stored and later served for `request`.
pub fn is_cacheable(response: &Response, request: &Request) -> bool {
    match response.code().as_u16() {
        200 | 203 | 204 | 300 | 301 | 308 | 404 | 405 | 410 | 414 | 501 => {}
        302 | 307 => {
            let cc = response.cache_control();
            let explicit = response.header("Expires").is_some()
                || cc.max_age_seconds().is_some()
                || cc.is_public()
                || cc.is_private();
            if !explicit {
                return false;
            }
        }
        _ => return false,
    }
    !response.cache_control().no_store() && !request.cache_control().no_store()
}

/// `true` if a request with `method` makes stored responses for its URL
/// stale.
pub fn invalidates_cache(method: &Method) -> bool {
    matches!(method.as_str(), "POST" | "PATCH" | "PUT" | "DELETE" | "MOVE")
}

/// `true` if `response` is expected to carry a body.
pub(crate) fn promises_body(response: &Response) -> bool {
    if response.request().method() == Method::HEAD {
        return false;
    }
    let code = response.code().as_u16();
    if (code < 100 || code >= 200) && code != 204 && code != 304 {
        return true;
    }
    response.headers().content_length().is_some()
        || response
            .header("Transfer-Encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
}

/// Merge a stored response's headers with a 304's.
///
/// End-to-end headers from the 304 win.  Content headers always come from
/// the stored response, and `1xx` warnings are dropped.
pub fn combine(cached: &Headers, network: &Headers) -> Headers {
    let mut builder = Headers::builder();
    for (name, value) in cached.iter() {
        if name.eq_ignore_ascii_case("Warning") && value.starts_with('1') {
            continue;
        }
        if is_content_specific(name) || !is_end_to_end(name) || network.get(name).is_none() {
            builder.add_lenient(name, value);
        }
    }
    for (name, value) in network.iter() {
        if !is_content_specific(name) && is_end_to_end(name) {
            builder.add_lenient(name, value);
        }
    }
    builder.build()
}

fn is_content_specific(name: &str) -> bool {
    ["Content-Length", "Content-Encoding", "Content-Type"]
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

fn is_end_to_end(name: &str) -> bool {
    ![
        "Connection",
        "Keep-Alive",
        "Proxy-Authenticate",
        "Proxy-Authorization",
        "TE",
        "Trailers",
        "Transfer-Encoding",
        "Upgrade",
    ]
    .iter()
    .any(|h| h.eq_ignore_ascii_case(name))
}

/// An in-memory [`Cache`] keyed by URL.
///
/// Only `GET` responses are stored.  Responses with `Vary: *` are never
/// stored; other `Vary` responses are served only to requests whose
/// varying headers match the ones stored.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    request_count: AtomicUsize,
    network_count: AtomicUsize,
    hit_count: AtomicUsize,
}

#[derive(Debug)]
struct Entry {
    vary_request_headers: Headers,
    response: Response,
}

impl MemoryCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn size(&self) -> usize {
        lock_or_clear(&self.entries).len()
    }

    /// Drop every entry.
    pub fn evict_all(&self) {
        lock_or_clear(&self.entries).clear();
    }

    /// Calls that consulted the cache.
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Calls that needed the network.
    pub fn network_count(&self) -> usize {
        self.network_count.load(Ordering::Relaxed)
    }

    /// Calls served by the cache, including 304 revalidations.
    pub fn hit_count(&self) -> usize {
        self.hit_count.load(Ordering::Relaxed)
    }

    fn key(request: &Request) -> String {
        request.url().as_str().to_owned()
    }

    fn to_stored(response: &Response) -> Option<Response> {
        response
            .new_builder()
            .network_response(None)
            .cache_response(None)
            .prior_response(None)
            .build()
            .ok()
    }
}

impl Cache for MemoryCache {
    fn get(&self, request: &Request) -> Option<Response> {
        if request.method() != Method::GET {
            return None;
        }
        let entries = lock_or_clear(&self.entries);
        let entry = entries.get(&Self::key(request))?;
        if !Headers::vary_matches(
            entry.response.headers(),
            &entry.vary_request_headers,
            request.headers(),
        ) {
            return None;
        }
        entry.response.new_builder().request(request.clone()).build().ok()
    }

    fn put(&self, response: &Response) {
        let request = response.request();
        if invalidates_cache(request.method()) {
            self.remove(request);
            return;
        }
        if request.method() != Method::GET || response.headers().has_vary_all() {
            return;
        }
        let Some(stored) = Self::to_stored(response) else {
            return;
        };
        debug!(url = %request.url().redact(), code = response.code().as_u16(), "caching response");
        let entry = Entry {
            vary_request_headers: Headers::vary_headers(request.headers(), response.headers()),
            response: stored,
        };
        lock_or_clear(&self.entries).insert(Self::key(request), entry);
    }

    fn remove(&self, request: &Request) {
        lock_or_clear(&self.entries).remove(&Self::key(request));
    }

    fn update(&self, cached: &Response, updated: &Response) {
        let Some(stored) = Self::to_stored(updated) else {
            return;
        };
        let mut entries = lock_or_clear(&self.entries);
        if let Some(entry) = entries.get_mut(&Self::key(cached.request())) {
            entry.response = stored;
        }
    }

    fn track_response(&self, strategy: &CacheStrategy) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        if strategy.network_request.is_some() {
            self.network_count.fetch_add(1, Ordering::Relaxed);
        } else if strategy.cache_response.is_some() {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn track_conditional_cache_hit(&self) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// The response returned when `only-if-cached` cannot be satisfied.
pub(crate) fn unsatisfiable(request: &Request, now_millis: i64) -> crate::Result<Response> {
    Response::builder()
        .request(request.clone())
        .protocol(crate::Protocol::Http11)
        .code(StatusCode::GATEWAY_TIMEOUT)
        .message("Unsatisfiable Request (only-if-cached)")
        .body(Some(crate::ResponseBody::empty()))
        .sent_request_at_millis(-1)
        .received_response_at_millis(now_millis)
        .build()
}
