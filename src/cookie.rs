//! `Set-Cookie` / `Cookie` handling (RFC 6265).
//!
//! Parsing is forgiving: an attribute that cannot be understood is skipped
//! and the rest of the cookie is kept.  Only a malformed name/value pair or
//! a `Domain` that does not cover the setting host rejects the cookie.

use crate::dates::{self, MAX_DATE_MILLIS};
use crate::headers::Headers;
use crate::host;
use crate::url::UnoUrl;
use crate::{Error, Result};
use std::fmt;

/// `expires_at` of a cookie that is already expired (`Max-Age` <= 0).
pub const EXPIRED: i64 = i64::MIN;

/// One HTTP cookie.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Cookie {
    name: String,
    value: String,
    expires_at: i64,
    domain: String,
    path: String,
    secure: bool,
    http_only: bool,
    persistent: bool,
    host_only: bool,
    same_site: Option<String>,
}

impl Cookie {
    /// A fresh [`Builder`].
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Parse one `Set-Cookie` value received from `url`.
    ///
    /// Returns `None` if the cookie is malformed or its `Domain` does not
    /// cover `url`'s host.
    pub fn parse(url: &UnoUrl, set_cookie: &str) -> Option<Cookie> {
        Cookie::parse_at(dates::now_millis(), url, set_cookie)
    }

    /// Every acceptable `Set-Cookie` line of `headers`, in order.
    pub fn parse_all(url: &UnoUrl, headers: &Headers) -> Vec<Cookie> {
        let now = dates::now_millis();
        headers
            .values("Set-Cookie")
            .into_iter()
            .filter_map(|line| Cookie::parse_at(now, url, line))
            .collect()
    }

    pub(crate) fn parse_at(now: i64, url: &UnoUrl, set_cookie: &str) -> Option<Cookie> {
        let pair_end = set_cookie.find(';').unwrap_or(set_cookie.len());
        let (name, value) = set_cookie[..pair_end].split_once('=')?;
        let name = trim(name);
        let value = trim(value);
        if name.is_empty() || has_control_or_non_ascii(name) || has_control_or_non_ascii(value) {
            return None;
        }

        let mut expires_at = MAX_DATE_MILLIS;
        let mut max_age: Option<i64> = None;
        let mut domain: Option<String> = None;
        let mut path: Option<String> = None;
        let mut secure = false;
        let mut http_only = false;
        let mut host_only = true;
        let mut persistent = false;
        let mut same_site = None;

        let attributes = set_cookie.get(pair_end + 1..).unwrap_or("");
        for attribute in attributes.split(';') {
            let (attr_name, attr_value) = match attribute.split_once('=') {
                Some((n, v)) => (trim(n), trim(v)),
                None => (trim(attribute), ""),
            };
            match attr_name.to_ascii_lowercase().as_str() {
                "expires" => {
                    if let Some(at) = parse_expires(attr_value) {
                        expires_at = at;
                        persistent = true;
                    }
                }
                "max-age" => {
                    if let Some(delta) = parse_max_age(attr_value) {
                        max_age = Some(delta);
                        persistent = true;
                    }
                }
                "domain" => {
                    if let Some(d) = parse_domain(attr_value) {
                        domain = Some(d);
                        host_only = false;
                    }
                }
                "path" => path = Some(attr_value.to_owned()),
                "secure" => secure = true,
                "httponly" => http_only = true,
                "samesite" => same_site = Some(attr_value.to_owned()),
                _ => {}
            }
        }

        // Max-Age wins over Expires regardless of order.
        match max_age {
            Some(EXPIRED) => expires_at = EXPIRED,
            Some(delta_seconds) => {
                let delta_millis = delta_seconds.saturating_mul(1000);
                expires_at = match now.checked_add(delta_millis) {
                    Some(at) if at <= MAX_DATE_MILLIS => at,
                    _ => MAX_DATE_MILLIS,
                };
            }
            None => {}
        }

        let url_host = url.host();
        let domain = match domain {
            None => url_host.to_owned(),
            Some(d) if domain_match(url_host, &d) && !is_bare_suffix(url_host, &d) => d,
            Some(d) => {
                debug!(cookie = name, domain = %d, host = url_host, "rejecting cookie for foreign domain");
                return None;
            }
        };

        let path = match path {
            Some(p) if p.starts_with('/') => p,
            _ => default_path(url),
        };

        Some(Cookie {
            name: name.to_owned(),
            value: value.to_owned(),
            expires_at,
            domain,
            path,
            secure,
            http_only,
            persistent,
            host_only,
            same_site,
        })
    }

    /// Cookie name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cookie value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Expiry in milliseconds since the epoch; [`EXPIRED`] for a cookie
    /// that was expired on arrival.
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// `true` if an `Expires` or `Max-Age` attribute was present.
    pub fn persistent(&self) -> bool {
        self.persistent
    }

    /// `true` if the cookie only matches its exact domain.
    pub fn host_only(&self) -> bool {
        self.host_only
    }

    /// The domain the cookie applies to.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The path prefix the cookie applies to; always starts with `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `true` if the cookie is only sent over HTTPS.
    pub fn secure(&self) -> bool {
        self.secure
    }

    /// `true` if the cookie is hidden from scripts.
    pub fn http_only(&self) -> bool {
        self.http_only
    }

    /// The `SameSite` attribute as sent.
    pub fn same_site(&self) -> Option<&str> {
        self.same_site.as_deref()
    }

    /// `true` if the cookie has expired at `now` (epoch millis).
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    /// `true` if this cookie should be sent with a request to `url` now.
    pub fn matches(&self, url: &UnoUrl) -> bool {
        self.matches_at(url, dates::now_millis())
    }

    pub(crate) fn matches_at(&self, url: &UnoUrl, now: i64) -> bool {
        if self.is_expired_at(now) {
            return false;
        }
        let domain_ok = if self.host_only {
            url.host() == self.domain
        } else {
            domain_match(url.host(), &self.domain)
        };
        domain_ok && path_match(url, &self.path) && (!self.secure || url.is_https())
    }

    /// `true` if `other` has the same name, domain, path and host-only flag,
    /// meaning it replaces this cookie in a store.
    pub fn same_identity(&self, other: &Cookie) -> bool {
        self.name == other.name
            && self.domain == other.domain
            && self.path == other.path
            && self.host_only == other.host_only
    }

    /// Serialize as a `Set-Cookie` value.  `legacy` prefixes the domain
    /// with a dot for RFC 2965 peers.
    pub fn to_set_cookie_string(&self, legacy: bool) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if self.persistent {
            if self.expires_at == EXPIRED {
                out.push_str("; max-age=0");
            } else {
                out.push_str("; expires=");
                out.push_str(&dates::format_http_date(dates::from_millis(self.expires_at)));
            }
        }
        if !self.host_only {
            out.push_str("; domain=");
            if legacy {
                out.push('.');
            }
            out.push_str(&self.domain);
        }
        out.push_str("; path=");
        out.push_str(&self.path);
        if self.secure {
            out.push_str("; secure");
        }
        if self.http_only {
            out.push_str("; httponly");
        }
        if let Some(same_site) = &self.same_site {
            out.push_str("; samesite=");
            out.push_str(same_site);
        }
        out
    }

    /// Serialize the matching cookies as a `Cookie` request header value.
    pub fn header_value<'a>(cookies: impl IntoIterator<Item = &'a Cookie>) -> String {
        cookies
            .into_iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_set_cookie_string(false))
    }
}

/// `true` if `url_host` equals `domain` or is a subdomain of it.  IP
/// literals never match by suffix.
pub fn domain_match(url_host: &str, domain: &str) -> bool {
    if url_host == domain {
        return true;
    }
    url_host.len() > domain.len()
        && url_host.ends_with(domain)
        && url_host.as_bytes()[url_host.len() - domain.len() - 1] == b'.'
        && !host::is_ip_literal(url_host)
}

/// `true` if the cookie path covers `url`'s path.
fn path_match(url: &UnoUrl, path: &str) -> bool {
    let url_path = url.encoded_path();
    if url_path == path {
        return true;
    }
    url_path.starts_with(path)
        && (path.ends_with('/') || url_path.as_bytes().get(path.len()) == Some(&b'/'))
}

/// Single-label domains such as `com` may not be claimed by a subdomain.
fn is_bare_suffix(url_host: &str, domain: &str) -> bool {
    url_host != domain && !domain.contains('.') && !host::is_ip_literal(domain)
}

fn default_path(url: &UnoUrl) -> String {
    let encoded_path = url.encoded_path();
    match encoded_path.rfind('/') {
        Some(0) | None => "/".to_owned(),
        Some(i) => encoded_path[..i].to_owned(),
    }
}

fn trim(s: &str) -> &str {
    s.trim_matches(|c: char| matches!(c, '\t' | '\n' | '\x0c' | '\r' | ' '))
}

fn has_control_or_non_ascii(s: &str) -> bool {
    s.chars().any(|c| (c <= '\u{1f}' && c != '\t') || c >= '\u{7f}')
}

/// Parse `Max-Age`.  Non-positive values mean "already expired"; values
/// too large for an `i64` saturate.
fn parse_max_age(s: &str) -> Option<i64> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match s.parse::<i64>() {
        Ok(v) if v <= 0 => Some(EXPIRED),
        Ok(v) => Some(v),
        Err(_) if s.starts_with('-') => Some(EXPIRED),
        Err(_) => Some(i64::MAX),
    }
}

fn parse_domain(s: &str) -> Option<String> {
    if s.ends_with('.') {
        return None;
    }
    host::to_canonical_host(s.strip_prefix('.').unwrap_or(s))
}

// ---------------------------------------------------------------------------
// Expires scanner
// ---------------------------------------------------------------------------

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Parse an `Expires` date the permissive way browsers do: split into
/// tokens of date characters, then pick out the first time, day-of-month,
/// month and year tokens in whatever order they appear.
fn parse_expires(s: &str) -> Option<i64> {
    let mut time: Option<(u32, u32, u32)> = None;
    let mut day: Option<u32> = None;
    let mut month: Option<u32> = None;
    let mut year: Option<i32> = None;

    for token in s.split(|c: char| !is_date_char(c)).filter(|t| !t.is_empty()) {
        if time.is_none() {
            if let Some(t) = match_time(token) {
                time = Some(t);
                continue;
            }
        }
        if day.is_none() {
            if let Some((d, _)) = match_number(token, 1, 2) {
                day = Some(d);
                continue;
            }
        }
        if month.is_none() {
            if let Some(m) = match_month(token) {
                month = Some(m);
                continue;
            }
        }
        if year.is_none() {
            if let Some((y, _)) = match_number(token, 2, 4) {
                year = i32::try_from(y).ok();
                continue;
            }
        }
    }

    let mut year = year?;
    if (70..=99).contains(&year) {
        year += 1900;
    }
    if (0..=69).contains(&year) {
        year += 2000;
    }
    let (hour, minute, second) = time?;
    let day = day?;
    if year < 1601 || !(1..=31).contains(&day) || hour > 23 || minute > 59 || second > 59 {
        return None;
    }
    let date = chrono::NaiveDate::from_ymd_opt(year, month? + 1, day)?;
    let at = date.and_hms_opt(hour, minute, second)?.and_utc().timestamp_millis();
    Some(at.min(MAX_DATE_MILLIS))
}

fn is_date_char(c: char) -> bool {
    (c < ' ' && c != '\t') || c >= '\u{7f}' || c.is_ascii_alphanumeric() || c == ':'
}

/// `\d{min,max}` followed by anything that is not a digit.
fn match_number(token: &str, min: usize, max: usize) -> Option<(u32, &str)> {
    let len = token.bytes().take_while(u8::is_ascii_digit).count();
    if len < min || len > max {
        return None;
    }
    let rest = &token[len..];
    if rest.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((token[..len].parse().ok()?, rest))
}

/// `h:m:s` with one or two digits each, then non-digits.
fn match_time(token: &str) -> Option<(u32, u32, u32)> {
    let (h, rest) = token.split_once(':')?;
    let (m, rest) = rest.split_once(':')?;
    let s_len = rest.bytes().take_while(u8::is_ascii_digit).count();
    let (s, tail) = rest.split_at(s_len);
    let component = |part: &str| -> Option<u32> {
        if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        part.parse().ok()
    };
    if tail.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((component(h)?, component(m)?, component(s)?))
}

fn match_month(token: &str) -> Option<u32> {
    let prefix = token.get(..3)?.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == prefix)
        .and_then(|i| u32::try_from(i).ok())
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds a [`Cookie`] by hand, e.g. for seeding a jar.
#[derive(Clone, Debug, Default)]
pub struct Builder {
    name: Option<String>,
    value: Option<String>,
    expires_at: Option<i64>,
    domain: Option<String>,
    path: Option<String>,
    secure: bool,
    http_only: bool,
    host_only: bool,
    same_site: Option<String>,
}

impl Builder {
    /// Set the name; must be free of surrounding whitespace.
    pub fn name(mut self, name: &str) -> Result<Self> {
        if trim(name) != name || name.is_empty() {
            return Err(Error::malformed("cookie name is not trimmed"));
        }
        self.name = Some(name.to_owned());
        Ok(self)
    }

    /// Set the value; must be free of surrounding whitespace.
    pub fn value(mut self, value: &str) -> Result<Self> {
        if trim(value) != value {
            return Err(Error::malformed("cookie value is not trimmed"));
        }
        self.value = Some(value.to_owned());
        Ok(self)
    }

    /// Make the cookie persistent with an expiry in epoch millis.
    /// Non-positive values mean already expired.
    pub fn expires_at(mut self, millis: i64) -> Self {
        self.expires_at = Some(if millis <= 0 {
            EXPIRED
        } else {
            millis.min(MAX_DATE_MILLIS)
        });
        self
    }

    /// Match `domain` and its subdomains.
    pub fn domain(self, domain: &str) -> Result<Self> {
        self.set_domain(domain, false)
    }

    /// Match exactly `domain`.
    pub fn host_only_domain(self, domain: &str) -> Result<Self> {
        self.set_domain(domain, true)
    }

    fn set_domain(mut self, domain: &str, host_only: bool) -> Result<Self> {
        let canonical = host::to_canonical_host(domain)
            .ok_or_else(|| Error::malformed(format!("unexpected domain: {domain}")))?;
        self.domain = Some(canonical);
        self.host_only = host_only;
        Ok(self)
    }

    /// Set the path; must start with `/`.
    pub fn path(mut self, path: &str) -> Result<Self> {
        if !path.starts_with('/') {
            return Err(Error::malformed("cookie path must start with '/'"));
        }
        self.path = Some(path.to_owned());
        Ok(self)
    }

    /// Only send over HTTPS.
    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// Hide from scripts.
    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    /// Set the `SameSite` attribute.
    pub fn same_site(mut self, same_site: &str) -> Self {
        self.same_site = Some(same_site.to_owned());
        self
    }

    /// Finish the cookie; name, value and domain are required.
    pub fn build(self) -> Result<Cookie> {
        Ok(Cookie {
            name: self.name.ok_or_else(|| Error::builder("cookie name is required"))?,
            value: self.value.ok_or_else(|| Error::builder("cookie value is required"))?,
            expires_at: self.expires_at.unwrap_or(MAX_DATE_MILLIS),
            domain: self.domain.ok_or_else(|| Error::builder("cookie domain is required"))?,
            path: self.path.unwrap_or_else(|| "/".to_owned()),
            secure: self.secure,
            http_only: self.http_only,
            persistent: self.expires_at.is_some(),
            host_only: self.host_only,
            same_site: self.same_site,
        })
    }
}
