//! Cookie persistence policy.
//!
//! The bridge stage asks the jar for cookies before each network request
//! and hands it every `Set-Cookie` that comes back.  Storage is entirely
//! up to the implementation; [`NoCookies`] (the default) stores nothing.

use crate::cookie::Cookie;
use crate::dates;
use crate::url::UnoUrl;
use crate::util::lock_or_clear;
use std::sync::Mutex;

/// Storage for cookies, shared by every call of a client.
pub trait CookieJar: Send + Sync {
    /// Store cookies received in a response from `url`.
    fn save_from_response(&self, url: &UnoUrl, cookies: Vec<Cookie>);

    /// Cookies to send with a request to `url`.  The caller does not
    /// re-check them, so an implementation must only return matches.
    fn load_for_request(&self, url: &UnoUrl) -> Vec<Cookie>;
}

/// A jar that never stores or returns anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCookies;

impl CookieJar for NoCookies {
    fn save_from_response(&self, _url: &UnoUrl, _cookies: Vec<Cookie>) {}

    fn load_for_request(&self, _url: &UnoUrl) -> Vec<Cookie> {
        Vec::new()
    }
}

/// An in-memory jar.
///
/// A new cookie replaces any stored cookie with the same name, domain and
/// path.  Expired cookies are dropped lazily on the next load.
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    cookies: Mutex<Vec<Cookie>>,
}

impl MemoryCookieJar {
    /// An empty jar.
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of every stored cookie, including expired ones not yet
    /// evicted.
    pub fn all(&self) -> Vec<Cookie> {
        lock_or_clear(&self.cookies).clone()
    }

    /// Remove every cookie.
    pub fn clear(&self) {
        lock_or_clear(&self.cookies).clear();
    }
}

impl CookieJar for MemoryCookieJar {
    fn save_from_response(&self, url: &UnoUrl, cookies: Vec<Cookie>) {
        let mut stored = lock_or_clear(&self.cookies);
        for cookie in cookies {
            trace!(name = cookie.name(), url = %url.redact(), "storing cookie");
            stored.retain(|existing| !existing.same_identity(&cookie));
            stored.push(cookie);
        }
    }

    fn load_for_request(&self, url: &UnoUrl) -> Vec<Cookie> {
        let now = dates::now_millis();
        let mut stored = lock_or_clear(&self.cookies);
        stored.retain(|c| !c.is_expired_at(now));
        stored
            .iter()
            .filter(|c| c.matches_at(url, now))
            .cloned()
            .collect()
    }
}
