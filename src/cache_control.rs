//! `Cache-Control` directives (RFC 7234 §5.2) for requests and responses.

use crate::headers::Headers;
use std::fmt;
use std::time::Duration;

/// Parsed `Cache-Control` directives.
///
/// Durations are whole seconds; `None` means the directive was absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    no_cache: bool,
    no_store: bool,
    max_age_seconds: Option<u32>,
    s_max_age_seconds: Option<u32>,
    is_private: bool,
    is_public: bool,
    must_revalidate: bool,
    max_stale_seconds: Option<u32>,
    min_fresh_seconds: Option<u32>,
    only_if_cached: bool,
    no_transform: bool,
    immutable: bool,
    /// The header text this was parsed from, when it can be reused as is.
    header_value: Option<String>,
}

impl CacheControl {
    /// Require network validation of every response.
    pub fn force_network() -> CacheControl {
        CacheControl::builder().no_cache().build()
    }

    /// Use only the cache, even if stale.  A miss yields a 504.
    pub fn force_cache() -> CacheControl {
        CacheControl::builder()
            .only_if_cached()
            .max_stale(Duration::from_secs(u64::from(u32::MAX)))
            .build()
    }

    /// A fresh [`Builder`].
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Parse every `Cache-Control` and `Pragma` line of `headers`.
    pub fn parse(headers: &Headers) -> CacheControl {
        let mut cc = CacheControl::default();
        let mut can_use_header_value = true;
        let mut header_value: Option<&str> = None;

        for (name, value) in headers.iter() {
            if name.eq_ignore_ascii_case("Cache-Control") {
                if header_value.is_some() {
                    can_use_header_value = false;
                } else {
                    header_value = Some(value);
                }
            } else if name.eq_ignore_ascii_case("Pragma") {
                // Pragma only ever carries no-cache; never echo it back.
                can_use_header_value = false;
            } else {
                continue;
            }
            for (directive, parameter) in Directives::new(value) {
                cc.apply(&directive, parameter.as_deref());
            }
        }

        if can_use_header_value {
            cc.header_value = header_value.map(str::to_owned);
        }
        cc
    }

    fn apply(&mut self, directive: &str, parameter: Option<&str>) {
        let seconds = || parameter.and_then(parse_seconds);
        match directive.to_ascii_lowercase().as_str() {
            "no-cache" => self.no_cache = true,
            "no-store" => self.no_store = true,
            "max-age" => self.max_age_seconds = seconds(),
            "s-maxage" => self.s_max_age_seconds = seconds(),
            "private" => self.is_private = true,
            "public" => self.is_public = true,
            "must-revalidate" => self.must_revalidate = true,
            // A bare max-stale accepts any staleness.
            "max-stale" => self.max_stale_seconds = Some(seconds().unwrap_or(u32::MAX)),
            "min-fresh" => self.min_fresh_seconds = seconds(),
            "only-if-cached" => self.only_if_cached = true,
            "no-transform" => self.no_transform = true,
            "immutable" => self.immutable = true,
            _ => {}
        }
    }

    /// `no-cache`: validate with the origin before using a stored response.
    pub fn no_cache(&self) -> bool {
        self.no_cache
    }

    /// `no-store`: never store the response.
    pub fn no_store(&self) -> bool {
        self.no_store
    }

    /// `max-age` in seconds.
    pub fn max_age_seconds(&self) -> Option<u32> {
        self.max_age_seconds
    }

    /// `s-maxage` in seconds (shared caches only).
    pub fn s_max_age_seconds(&self) -> Option<u32> {
        self.s_max_age_seconds
    }

    /// `private`.
    pub fn is_private(&self) -> bool {
        self.is_private
    }

    /// `public`.
    pub fn is_public(&self) -> bool {
        self.is_public
    }

    /// `must-revalidate`.
    pub fn must_revalidate(&self) -> bool {
        self.must_revalidate
    }

    /// `max-stale` in seconds; `u32::MAX` for a bare `max-stale`.
    pub fn max_stale_seconds(&self) -> Option<u32> {
        self.max_stale_seconds
    }

    /// `min-fresh` in seconds.
    pub fn min_fresh_seconds(&self) -> Option<u32> {
        self.min_fresh_seconds
    }

    /// `only-if-cached`: never use the network.
    pub fn only_if_cached(&self) -> bool {
        self.only_if_cached
    }

    /// `no-transform`.
    pub fn no_transform(&self) -> bool {
        self.no_transform
    }

    /// `immutable`: a fresh response never needs revalidation.
    pub fn immutable(&self) -> bool {
        self.immutable
    }
}

impl fmt::Display for CacheControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(value) = &self.header_value {
            return f.write_str(value);
        }
        let mut parts: Vec<String> = Vec::new();
        if self.no_cache {
            parts.push("no-cache".to_owned());
        }
        if self.no_store {
            parts.push("no-store".to_owned());
        }
        if let Some(s) = self.max_age_seconds {
            parts.push(format!("max-age={s}"));
        }
        if let Some(s) = self.s_max_age_seconds {
            parts.push(format!("s-maxage={s}"));
        }
        if self.is_private {
            parts.push("private".to_owned());
        }
        if self.is_public {
            parts.push("public".to_owned());
        }
        if self.must_revalidate {
            parts.push("must-revalidate".to_owned());
        }
        if let Some(s) = self.max_stale_seconds {
            parts.push(format!("max-stale={s}"));
        }
        if let Some(s) = self.min_fresh_seconds {
            parts.push(format!("min-fresh={s}"));
        }
        if self.only_if_cached {
            parts.push("only-if-cached".to_owned());
        }
        if self.no_transform {
            parts.push("no-transform".to_owned());
        }
        if self.immutable {
            parts.push("immutable".to_owned());
        }
        f.write_str(&parts.join(", "))
    }
}

/// Non-negative integer seconds, saturating at `u32::MAX`.
fn parse_seconds(s: &str) -> Option<u32> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(s.parse::<u64>().map_or(u32::MAX, |v| u32::try_from(v).unwrap_or(u32::MAX)))
}

/// Iterator over `directive[=parameter]` items of one header value.
/// Parameters may be tokens or quoted strings; commas inside quotes do not
/// split.
struct Directives<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Directives<'a> {
    fn new(input: &'a str) -> Self {
        Directives { input, pos: 0 }
    }

    fn skip_until(&mut self, chars: &[u8]) {
        let bytes = self.input.as_bytes();
        while self.pos < bytes.len() && !chars.contains(&bytes[self.pos]) {
            self.pos += 1;
        }
    }

    fn skip_whitespace(&mut self) {
        let bytes = self.input.as_bytes();
        while self.pos < bytes.len() && matches!(bytes[self.pos], b' ' | b'\t') {
            self.pos += 1;
        }
    }
}

impl Iterator for Directives<'_> {
    type Item = (String, Option<String>);

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = self.input.as_bytes();
        loop {
            self.skip_whitespace();
            if self.pos >= bytes.len() {
                return None;
            }
            let start = self.pos;
            self.skip_until(b"=,;");
            let directive = self.input[start..self.pos].trim().to_owned();

            let parameter = if self.pos < bytes.len() && bytes[self.pos] == b'=' {
                self.pos += 1;
                self.skip_whitespace();
                if self.pos < bytes.len() && bytes[self.pos] == b'"' {
                    self.pos += 1;
                    let value_start = self.pos;
                    self.skip_until(b"\"");
                    let value = self.input[value_start..self.pos].to_owned();
                    // Closing quote, then anything up to the separator.
                    self.pos = (self.pos + 1).min(bytes.len());
                    self.skip_until(b",;");
                    Some(value)
                } else {
                    let value_start = self.pos;
                    self.skip_until(b",;");
                    Some(self.input[value_start..self.pos].trim().to_owned())
                }
            } else {
                None
            };
            if self.pos < bytes.len() {
                self.pos += 1;
            }
            if !directive.is_empty() {
                return Some((directive, parameter));
            }
        }
    }
}

/// Builds a request [`CacheControl`].
#[derive(Debug, Clone, Default)]
pub struct Builder {
    cc: CacheControl,
}

impl Builder {
    /// Set `no-cache`.
    pub fn no_cache(mut self) -> Self {
        self.cc.no_cache = true;
        self
    }

    /// Set `no-store`.
    pub fn no_store(mut self) -> Self {
        self.cc.no_store = true;
        self
    }

    /// Set `max-age`, truncated to whole seconds.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.cc.max_age_seconds = Some(clamp_seconds(max_age));
        self
    }

    /// Set `max-stale`, truncated to whole seconds.
    pub fn max_stale(mut self, max_stale: Duration) -> Self {
        self.cc.max_stale_seconds = Some(clamp_seconds(max_stale));
        self
    }

    /// Set `min-fresh`, truncated to whole seconds.
    pub fn min_fresh(mut self, min_fresh: Duration) -> Self {
        self.cc.min_fresh_seconds = Some(clamp_seconds(min_fresh));
        self
    }

    /// Set `only-if-cached`.
    pub fn only_if_cached(mut self) -> Self {
        self.cc.only_if_cached = true;
        self
    }

    /// Set `no-transform`.
    pub fn no_transform(mut self) -> Self {
        self.cc.no_transform = true;
        self
    }

    /// Set `immutable`.
    pub fn immutable(mut self) -> Self {
        self.cc.immutable = true;
        self
    }

    /// Finish.
    pub fn build(self) -> CacheControl {
        self.cc
    }
}

fn clamp_seconds(d: Duration) -> u32 {
    u32::try_from(d.as_secs()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(lines: &[(&str, &str)]) -> CacheControl {
        CacheControl::parse(&Headers::of(lines).unwrap())
    }

    #[test]
    fn parse_directives_table() {
        // (header value, check, desc)
        type Check = fn(&CacheControl) -> bool;
        let cases: &[(&str, Check, &str)] = &[
            ("no-cache", |c| c.no_cache(), "no-cache"),
            ("NO-STORE", |c| c.no_store(), "case-insensitive"),
            ("max-age=60", |c| c.max_age_seconds() == Some(60), "max-age"),
            ("max-age=\"60\"", |c| c.max_age_seconds() == Some(60), "quoted max-age"),
            ("max-age=-1", |c| c.max_age_seconds().is_none(), "negative ignored"),
            ("max-age=99999999999", |c| c.max_age_seconds() == Some(u32::MAX), "saturates"),
            ("s-maxage=5, public", |c| c.s_max_age_seconds() == Some(5) && c.is_public(), "pair"),
            ("private=\"a, b\", must-revalidate", |c| c.is_private() && c.must_revalidate(), "quoted comma"),
            ("max-stale", |c| c.max_stale_seconds() == Some(u32::MAX), "bare max-stale"),
            ("max-stale=30", |c| c.max_stale_seconds() == Some(30), "max-stale value"),
            ("min-fresh=10", |c| c.min_fresh_seconds() == Some(10), "min-fresh"),
            ("only-if-cached;no-transform", |c| c.only_if_cached() && c.no_transform(), "semicolon"),
            ("immutable, x-ext=1", |c| c.immutable(), "extension ignored"),
            ("", |c| *c == CacheControl::default(), "empty"),
        ];
        for &(value, check, desc) in cases {
            let cc = parse(&[("Cache-Control", value)]);
            assert!(check(&cc), "{desc}: {cc:?}");
        }
    }

    #[test]
    fn pragma_and_multiple_lines() {
        let cc = parse(&[("Pragma", "no-cache"), ("Cache-Control", "max-age=1")]);
        assert!(cc.no_cache());
        assert_eq!(cc.max_age_seconds(), Some(1));
        assert_eq!(cc.to_string(), "no-cache, max-age=1");

        let cc = parse(&[("Cache-Control", "max-age=1"), ("Cache-Control", "public")]);
        assert_eq!(cc.to_string(), "max-age=1, public");
    }

    #[test]
    fn display_reuses_single_header_verbatim() {
        let cc = parse(&[("Cache-Control", "public,   max-age=3")]);
        assert_eq!(cc.to_string(), "public,   max-age=3");
    }

    #[test]
    fn builder_and_presets() {
        let cc = CacheControl::builder()
            .no_store()
            .max_age(Duration::from_millis(1500))
            .min_fresh(Duration::from_secs(2))
            .no_transform()
            .immutable()
            .build();
        assert_eq!(cc.to_string(), "no-store, max-age=1, min-fresh=2, no-transform, immutable");

        assert_eq!(CacheControl::force_network().to_string(), "no-cache");
        let force_cache = CacheControl::force_cache();
        assert!(force_cache.only_if_cached());
        assert_eq!(force_cache.max_stale_seconds(), Some(u32::MAX));
    }
}
