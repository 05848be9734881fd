//! HTTP header blocks.
//!
//! [`Headers`] is an immutable, ordered list of name/value pairs stored as
//! a flat `[name0, value0, name1, value1, ...]` vector.  Lookups ignore
//! ASCII case; order and duplicates are preserved exactly as received so
//! that a header block can be replayed byte-for-byte.
//!
//! All mutation goes through [`Builder`].

use crate::Error;
use crate::challenge::{self, Challenge};
use crate::dates;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Header names whose values are never printed by `Debug` or included in
/// validation errors.
const SENSITIVE: &[&str] = &["authorization", "cookie", "proxy-authorization", "set-cookie"];

fn is_sensitive(name: &str) -> bool {
    SENSITIVE.iter().any(|s| s.eq_ignore_ascii_case(name))
}

/// An immutable, ordered block of HTTP headers.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Headers {
    names_and_values: Vec<String>,
}

impl Headers {
    /// An empty header block.
    pub fn new() -> Self {
        Headers::default()
    }

    /// A fresh [`Builder`].
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Build from `(name, value)` pairs, validating each one.
    ///
    /// ```
    /// let h = uno::Headers::of(&[("Accept", "text/html"), ("accept", "*/*")]).unwrap();
    /// assert_eq!(h.get("ACCEPT"), Some("*/*"));
    /// ```
    pub fn of(pairs: &[(&str, &str)]) -> Result<Headers, Error> {
        let mut builder = Builder::default();
        for &(name, value) in pairs {
            builder = builder.add(name, value)?;
        }
        Ok(builder.build())
    }

    /// Build from a map, validating each entry.  Map order is used.
    pub fn from_map<K, V>(map: &BTreeMap<K, V>) -> Result<Headers, Error>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut builder = Builder::default();
        for (name, value) in map {
            builder = builder.add(name.as_ref(), value.as_ref())?;
        }
        Ok(builder.build())
    }

    /// The last value for `name`, ignoring case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// The last value for `name` parsed as an HTTP date.
    pub fn get_date(&self, name: &str) -> Option<DateTime<Utc>> {
        self.get(name).and_then(dates::parse_http_date)
    }

    /// Number of header lines.
    pub fn len(&self) -> usize {
        self.names_and_values.len() / 2
    }

    /// `true` when there are no header lines.
    pub fn is_empty(&self) -> bool {
        self.names_and_values.is_empty()
    }

    /// Name of the line at `index`.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names_and_values.get(index * 2).map(String::as_str)
    }

    /// Value of the line at `index`.
    pub fn value(&self, index: usize) -> Option<&str> {
        self.names_and_values.get(index * 2 + 1).map(String::as_str)
    }

    /// Distinct names, compared ignoring case, in first-seen order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (name, _) in self.iter() {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                names.push(name);
            }
        }
        names
    }

    /// Every value for `name`, ignoring case, in insertion order.
    pub fn values(&self, name: &str) -> Vec<&str> {
        self.iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
            .collect()
    }

    /// Iterate `(name, value)` pairs in order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&str, &str)> + '_ {
        self.names_and_values
            .chunks_exact(2)
            .map(|pair| (pair[0].as_str(), pair[1].as_str()))
    }

    /// Approximate encoded size: every name and value plus two bytes of
    /// separator per string.
    pub fn byte_count(&self) -> usize {
        self.names_and_values.len() * 2
            + self.names_and_values.iter().map(String::len).sum::<usize>()
    }

    /// Lower-cased names mapped to their values in order.
    pub fn to_multimap(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in self.iter() {
            map.entry(name.to_ascii_lowercase())
                .or_default()
                .push(value.to_owned());
        }
        map
    }

    /// A builder seeded with these lines.
    pub fn new_builder(&self) -> Builder {
        Builder {
            names_and_values: self.names_and_values.clone(),
        }
    }

    /// `Content-Length`, or `None` when absent or not a non-negative integer.
    pub fn content_length(&self) -> Option<u64> {
        self.get("Content-Length")?.trim().parse().ok()
    }

    /// Request header names listed by every `Vary` line, lower-cased.
    pub fn vary_fields(&self) -> BTreeSet<String> {
        self.values("Vary")
            .into_iter()
            .flat_map(|v| v.split(','))
            .map(|field| field.trim().to_ascii_lowercase())
            .filter(|field| !field.is_empty())
            .collect()
    }

    /// `true` when a `Vary: *` line makes every request a distinct variant.
    pub fn has_vary_all(&self) -> bool {
        self.vary_fields().contains("*")
    }

    /// The subset of `request_headers` that `response_headers` varies on.
    ///
    /// This is what a cache stores alongside a response to decide later
    /// whether a new request selects the same variant.
    pub fn vary_headers(request_headers: &Headers, response_headers: &Headers) -> Headers {
        let fields = response_headers.vary_fields();
        if fields.is_empty() {
            return Headers::new();
        }
        let mut builder = Builder::default();
        for (name, value) in request_headers.iter() {
            if fields.contains(&name.to_ascii_lowercase()) {
                builder.add_lenient(name, value);
            }
        }
        builder.build()
    }

    /// `true` if `new_request` would select the same variant as the request
    /// whose varying headers were `cached_request`.  A `Vary: *` response
    /// never matches.
    pub fn vary_matches(
        cached_response: &Headers,
        cached_request: &Headers,
        new_request: &Headers,
    ) -> bool {
        let fields = cached_response.vary_fields();
        if fields.contains("*") {
            return false;
        }
        fields
            .iter()
            .all(|field| cached_request.values(field) == new_request.values(field))
    }

    /// Parse every `header_name` line (`WWW-Authenticate` or
    /// `Proxy-Authenticate`) into challenges.  Malformed lines are skipped.
    pub fn parse_challenges(&self, header_name: &str) -> Vec<Challenge> {
        self.values(header_name)
            .into_iter()
            .flat_map(challenge::parse)
            .collect()
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn DoubleEndedIterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            writeln!(f, "{name}: {value}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for (name, value) in self.iter() {
            let value = if is_sensitive(name) { "<redacted>" } else { value };
            list.entry(&format_args!("{name}: {value}"));
        }
        list.finish()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds a [`Headers`] block.
///
/// Validating setters return `Result` so a bad byte fails where it was
/// supplied.  `add_lenient`/`add_line` mirror what a tolerant parser must
/// accept from the network.
#[derive(Clone, Debug, Default)]
pub struct Builder {
    names_and_values: Vec<String>,
}

impl Builder {
    /// Add a raw `name: value` line, validating both halves.
    pub fn add_line(self, line: &str) -> Result<Self, Error> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::malformed(format!("unexpected header: {line}")))?;
        self.add(name.trim(), value)
    }

    /// Add a header line as received from a peer, without validation.
    ///
    /// A line whose colon is not at offset 0 splits there; a leading colon
    /// or no colon at all yields an unnamed value.
    pub fn add_line_lenient(mut self, line: &str) -> Self {
        match line.get(1..).and_then(|rest| rest.find(':')) {
            Some(i) => self.add_lenient(&line[..i + 1], &line[i + 2..]),
            None => match line.strip_prefix(':') {
                Some(value) => self.add_lenient("", value),
                None => self.add_lenient("", line),
            },
        }
        self
    }

    /// Add a header, validating name and value.
    pub fn add(mut self, name: &str, value: &str) -> Result<Self, Error> {
        check_name(name)?;
        check_value(value, name)?;
        self.add_lenient(name, value);
        Ok(self)
    }

    /// Add a header whose value may contain non-ASCII text.
    pub fn add_unsafe_non_ascii(mut self, name: &str, value: &str) -> Result<Self, Error> {
        check_name(name)?;
        self.add_lenient(name, value);
        Ok(self)
    }

    /// Add every line of `headers`.
    pub fn add_all(mut self, headers: &Headers) -> Self {
        for (name, value) in headers.iter() {
            self.add_lenient(name, value);
        }
        self
    }

    /// Add `name` with `instant` formatted as an HTTP date.
    pub fn add_date(self, name: &str, instant: DateTime<Utc>) -> Result<Self, Error> {
        self.add(name, &dates::format_http_date(instant))
    }

    /// Replace every `name` line with one date line.
    pub fn set_date(self, name: &str, instant: DateTime<Utc>) -> Result<Self, Error> {
        self.set(name, &dates::format_http_date(instant))
    }

    /// Replace every `name` line with one line.
    pub fn set(self, name: &str, value: &str) -> Result<Self, Error> {
        check_name(name)?;
        check_value(value, name)?;
        let mut builder = self.remove_all(name);
        builder.add_lenient(name, value);
        Ok(builder)
    }

    /// Remove every line called `name`, ignoring case.
    pub fn remove_all(mut self, name: &str) -> Self {
        self.remove_all_in_place(name);
        self
    }

    /// The last value for `name` so far.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.names_and_values
            .chunks_exact(2)
            .rev()
            .find(|pair| pair[0].eq_ignore_ascii_case(name))
            .map(|pair| pair[1].as_str())
    }

    /// Finish the block.
    pub fn build(self) -> Headers {
        Headers {
            names_and_values: self.names_and_values,
        }
    }

    pub(crate) fn add_lenient(&mut self, name: &str, value: &str) {
        self.names_and_values.push(name.to_owned());
        self.names_and_values.push(value.trim().to_owned());
    }

    pub(crate) fn set_lenient(&mut self, name: &str, value: &str) {
        self.remove_all_in_place(name);
        self.add_lenient(name, value);
    }

    pub(crate) fn remove_all_in_place(&mut self, name: &str) {
        let mut kept = Vec::with_capacity(self.names_and_values.len());
        for pair in self.names_and_values.chunks_exact(2) {
            if !pair[0].eq_ignore_ascii_case(name) {
                kept.extend_from_slice(pair);
            }
        }
        self.names_and_values = kept;
    }
}

fn check_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::malformed("header name is empty"));
    }
    if let Some((i, c)) = name.char_indices().find(|&(_, c)| !('\u{21}'..='\u{7e}').contains(&c)) {
        return Err(Error::malformed(format!(
            "unexpected char {:#04x} at {i} in header name: {name}",
            c as u32
        )));
    }
    Ok(())
}

fn check_value(value: &str, name: &str) -> Result<(), Error> {
    if let Some((i, c)) = value
        .char_indices()
        .find(|&(_, c)| c != '\t' && !('\u{20}'..='\u{7e}').contains(&c))
    {
        let shown = if is_sensitive(name) { "" } else { value };
        return Err(Error::malformed(format!(
            "unexpected char {:#04x} at {i} in {name} value{}{shown}",
            c as u32,
            if shown.is_empty() { "" } else { ": " },
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_is_case_insensitive_and_returns_last() {
        let h = Headers::of(&[("Set-Cookie", "a=1"), ("X-A", "1"), ("set-cookie", "b=2")]).unwrap();
        assert_eq!(h.get("SET-COOKIE"), Some("b=2"));
        assert_eq!(h.values("set-cookie"), ["a=1", "b=2"]);
        assert_eq!(h.get("missing"), None);
        assert_eq!(h.len(), 3);
        assert_eq!(h.name(1), Some("X-A"));
        assert_eq!(h.value(2), Some("b=2"));
        assert_eq!(h.name(3), None);
        assert_eq!(h.names(), ["Set-Cookie", "X-A"]);
    }

    #[test]
    fn values_are_trimmed() {
        let h = Headers::builder().add("A", "  padded \t").unwrap().build();
        assert_eq!(h.get("a"), Some("padded"));
    }

    #[test]
    fn validation_table() {
        // (name, value, ok, desc)
        let cases: &[(&str, &str, bool, &str)] = &[
            ("X-Ok", "value", true, "plain"),
            ("X-Tab", "a\tb", true, "tab allowed in value"),
            ("", "v", false, "empty name"),
            ("X Bad", "v", false, "space in name"),
            ("X:Bad", "v", true, "colon is printable ascii"),
            ("X-Tab\t", "v", false, "tab in name"),
            ("X-Nl", "a\nb", false, "newline in value"),
            ("X-Nul", "a\0b", false, "nul in value"),
            ("X-Uni", "caf\u{e9}", false, "non-ascii value"),
            ("X-\u{e9}", "v", false, "non-ascii name"),
        ];
        for &(name, value, ok, desc) in cases {
            let result = Headers::builder().add(name, value);
            assert_eq!(result.is_ok(), ok, "{desc}");
            if let Err(e) = result {
                assert!(e.is_malformed(), "{desc}");
            }
        }
    }

    #[test]
    fn sensitive_values_stay_out_of_errors_and_debug() {
        let err = Headers::builder().add("Authorization", "secret\n").unwrap_err();
        assert!(!err.to_string().contains("secret"));
        let err = Headers::builder().add("X-Other", "visible\n").unwrap_err();
        assert!(err.to_string().contains("visible"));

        let h = Headers::of(&[("Cookie", "sid=42"), ("Accept", "*/*")]).unwrap();
        let debug = format!("{h:?}");
        assert!(!debug.contains("sid=42"));
        assert!(debug.contains("*/*"));
    }

    #[test]
    fn non_ascii_values_when_explicitly_allowed() {
        let h = Headers::builder()
            .add_unsafe_non_ascii("X-Name", "Jos\u{e9}")
            .unwrap()
            .build();
        assert_eq!(h.get("x-name"), Some("Jos\u{e9}"));
        assert!(Headers::builder().add_unsafe_non_ascii("X Bad", "v").is_err());
    }

    #[test]
    fn lenient_line_table() {
        // (line, name, value, desc)
        let cases: &[(&str, &str, &str, &str)] = &[
            ("Name: value", "Name", "value", "ordinary"),
            ("Name:value", "Name", "value", "no space after colon"),
            (":status: 200", ":status", "200", "pseudo header keeps leading colon"),
            (":value", "", "value", "leading colon only"),
            ("no colon at all", "", "no colon at all", "unnamed value"),
            ("", "", "", "empty line"),
        ];
        for &(line, name, value, desc) in cases {
            let h = Headers::builder().add_line_lenient(line).build();
            assert_eq!(h.name(0), Some(name), "{desc}");
            assert_eq!(h.value(0), Some(value), "{desc}");
        }
    }

    #[test]
    fn strict_line_requires_colon() {
        let h = Headers::builder().add_line("Name : value").unwrap().build();
        assert_eq!(h.get("name"), Some("value"));
        assert!(Headers::builder().add_line("no colon").unwrap_err().is_malformed());
    }

    #[test]
    fn builder_set_and_remove() {
        let h = Headers::of(&[("A", "1"), ("b", "2"), ("a", "3")])
            .unwrap()
            .new_builder()
            .set("A", "4")
            .unwrap()
            .build();
        assert_eq!(h.iter().collect::<Vec<_>>(), [("b", "2"), ("A", "4")]);
        let h = h.new_builder().remove_all("B").build();
        assert_eq!(h.len(), 1);
        assert!(Headers::new().is_empty());
    }

    #[test]
    fn content_length_table() {
        let cases: &[(&[(&str, &str)], Option<u64>)] = &[
            (&[("Content-Length", "42")], Some(42)),
            (&[("content-length", "0")], Some(0)),
            (&[("Content-Length", "-1")], None),
            (&[("Content-Length", "x")], None),
            (&[], None),
        ];
        for &(pairs, expected) in cases {
            assert_eq!(Headers::of(pairs).unwrap().content_length(), expected, "{pairs:?}");
        }
    }

    #[test]
    fn vary_table() {
        let request = Headers::of(&[
            ("Accept-Encoding", "gzip"),
            ("Accept-Language", "fr"),
            ("User-Agent", "uno"),
        ])
        .unwrap();
        // (response vary lines, expected varying request headers, desc)
        let cases: &[(&[(&str, &str)], &[(&str, &str)], &str)] = &[
            (&[], &[], "no vary"),
            (&[("Vary", "accept-encoding")], &[("Accept-Encoding", "gzip")], "single field"),
            (
                &[("Vary", "Accept-Encoding, Accept-Language")],
                &[("Accept-Encoding", "gzip"), ("Accept-Language", "fr")],
                "comma list",
            ),
            (
                &[("Vary", "Accept-Language"), ("Vary", "User-Agent")],
                &[("Accept-Language", "fr"), ("User-Agent", "uno")],
                "repeated lines",
            ),
            (&[("Vary", "X-Missing")], &[], "field absent from request"),
        ];
        for &(vary, expected, desc) in cases {
            let response = Headers::of(vary).unwrap();
            let varying = Headers::vary_headers(&request, &response);
            assert_eq!(varying, Headers::of(expected).unwrap(), "{desc}");
        }
    }

    #[test]
    fn vary_matches_table() {
        let cached_request = Headers::of(&[("Accept-Language", "fr")]).unwrap();
        // (vary, new request, expected, desc)
        let cases: &[(&str, &[(&str, &str)], bool, &str)] = &[
            ("Accept-Language", &[("accept-language", "fr")], true, "same value"),
            ("Accept-Language", &[("Accept-Language", "en")], false, "different value"),
            ("Accept-Language", &[], false, "missing in new request"),
            ("User-Agent", &[], true, "absent in both"),
            ("*", &[("Accept-Language", "fr")], false, "vary star never matches"),
        ];
        for &(vary, new_request, expected, desc) in cases {
            let response = Headers::of(&[("Vary", vary)]).unwrap();
            let new_request = Headers::of(new_request).unwrap();
            assert_eq!(
                Headers::vary_matches(&response, &cached_request, &new_request),
                expected,
                "{desc}"
            );
        }
        assert!(Headers::of(&[("Vary", "a, *")]).unwrap().has_vary_all());
    }

    #[test]
    fn multimap_and_byte_count() {
        let h = Headers::of(&[("A", "1"), ("a", "2"), ("B", "3")]).unwrap();
        let map = h.to_multimap();
        assert_eq!(map["a"], ["1", "2"]);
        assert_eq!(map["b"], ["3"]);
        // 6 strings * 2 + 6 bytes of text
        assert_eq!(h.byte_count(), 18);
        let mut src = BTreeMap::new();
        src.insert("X", "y");
        assert_eq!(Headers::from_map(&src).unwrap().get("x"), Some("y"));
    }

    #[test]
    fn dates_round_trip_through_headers() {
        use chrono::TimeZone;
        let instant = Utc.timestamp_opt(784_111_777, 0).unwrap();
        let h = Headers::builder().add_date("Date", instant).unwrap().build();
        assert_eq!(h.get("Date"), Some("Sun, 06 Nov 1994 08:49:37 GMT"));
        assert_eq!(h.get_date("date"), Some(instant));
        assert_eq!(h.get_date("Expires"), None);
    }

    #[test]
    fn display_writes_lines() {
        let h = Headers::of(&[("A", "1"), ("B", "2")]).unwrap();
        assert_eq!(h.to_string(), "A: 1\nB: 2\n");
    }
}
