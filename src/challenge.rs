//! Authentication challenges (RFC 7235 §2.1).
//!
//! ```text
//! challenge  = auth-scheme [ 1*SP ( token68 / #auth-param ) ]
//! auth-param = token BWS "=" BWS ( token / quoted-string )
//! ```
//!
//! A single `WWW-Authenticate` value may carry several comma-separated
//! challenges; parsing stops at the first syntax error but keeps the
//! challenges read before it.

use std::collections::BTreeMap;

/// One challenge from a `WWW-Authenticate` or `Proxy-Authenticate` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Challenge {
    scheme: String,
    /// Parameter names are lower-cased.  A token68 is stored under `None`.
    auth_params: BTreeMap<Option<String>, String>,
}

impl Challenge {
    /// A challenge with the given scheme and parameters.
    pub fn new(scheme: &str, auth_params: BTreeMap<Option<String>, String>) -> Self {
        Challenge {
            scheme: scheme.to_owned(),
            auth_params: auth_params
                .into_iter()
                .map(|(k, v)| (k.map(|k| k.to_ascii_lowercase()), v))
                .collect(),
        }
    }

    /// A challenge carrying only a `realm`.
    pub fn with_realm(scheme: &str, realm: &str) -> Self {
        let mut params = BTreeMap::new();
        params.insert(Some("realm".to_owned()), realm.to_owned());
        Challenge::new(scheme, params)
    }

    /// The auth scheme, as sent (`Basic`, `Digest`, `Bearer`, ...).
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Every parameter; the token68 form is keyed by `None`.
    pub fn auth_params(&self) -> &BTreeMap<Option<String>, String> {
        &self.auth_params
    }

    /// The `realm` parameter.
    pub fn realm(&self) -> Option<&str> {
        self.param("realm")
    }

    /// The `charset` parameter, defaulting to `ISO-8859-1`.
    pub fn charset(&self) -> &str {
        self.param("charset").unwrap_or("ISO-8859-1")
    }

    /// The token68 payload, if the challenge used that form.
    pub fn token68(&self) -> Option<&str> {
        self.auth_params.get(&None).map(String::as_str)
    }

    fn param(&self, name: &str) -> Option<&str> {
        self.auth_params
            .get(&Some(name.to_owned()))
            .map(String::as_str)
    }
}

/// Parse one header value into its challenges.
pub(crate) fn parse(header: &str) -> Vec<Challenge> {
    let mut out = Vec::new();
    let mut reader = Reader {
        input: header.as_bytes(),
        pos: 0,
    };
    reader.read_challenges(&mut out);
    out
}

struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn read_challenges(&mut self, out: &mut Vec<Challenge>) {
        let mut peek: Option<String> = None;
        loop {
            let scheme = match peek.take() {
                Some(scheme) => scheme,
                None => {
                    self.skip_commas_and_whitespace();
                    match self.read_token() {
                        Some(token) => token,
                        None => return,
                    }
                }
            };

            // A token68, a list of parameters, or nothing.
            let comma_prefixed = self.skip_commas_and_whitespace();
            let Some(token) = self.read_token() else {
                if self.exhausted() {
                    out.push(Challenge::new(&scheme, BTreeMap::new()));
                }
                return;
            };

            let mut eq_count = self.skip_all(b'=');
            let comma_suffixed = self.skip_commas_and_whitespace();

            if !comma_prefixed && (comma_suffixed || self.exhausted()) {
                let mut params = BTreeMap::new();
                params.insert(None, format!("{token}{}", "=".repeat(eq_count)));
                out.push(Challenge::new(&scheme, params));
                continue;
            }

            let mut params: BTreeMap<Option<String>, String> = BTreeMap::new();
            eq_count += self.skip_all(b'=');
            let mut pending = Some(token);
            loop {
                let name = match pending.take() {
                    Some(name) => name,
                    None => {
                        let Some(next) = self.read_token() else {
                            break;
                        };
                        if self.skip_commas_and_whitespace() {
                            // A bare token followed by ',' starts the next challenge.
                            peek = Some(next);
                            break;
                        }
                        eq_count = self.skip_all(b'=');
                        next
                    }
                };
                if eq_count == 0 {
                    // Not a parameter: the scheme of the next challenge.
                    peek = Some(name);
                    break;
                }
                if eq_count > 1 || self.skip_commas_and_whitespace() {
                    return;
                }
                let value = if self.peek_byte() == Some(b'"') {
                    self.read_quoted_string()
                } else {
                    self.read_token()
                };
                let Some(value) = value else {
                    return;
                };
                if params.insert(Some(name.to_ascii_lowercase()), value).is_some() {
                    return;
                }
                if !self.skip_commas_and_whitespace() && !self.exhausted() {
                    return;
                }
            }
            out.push(Challenge::new(&scheme, params));
        }
    }

    fn exhausted(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek_byte(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    /// Skip spaces, tabs and commas; `true` if at least one comma was seen.
    fn skip_commas_and_whitespace(&mut self) -> bool {
        let mut comma = false;
        while let Some(b) = self.peek_byte() {
            match b {
                b',' => comma = true,
                b' ' | b'\t' => {}
                _ => break,
            }
            self.pos += 1;
        }
        comma
    }

    fn skip_all(&mut self, byte: u8) -> usize {
        let start = self.pos;
        while self.peek_byte() == Some(byte) {
            self.pos += 1;
        }
        self.pos - start
    }

    fn read_token(&mut self) -> Option<String> {
        let start = self.pos;
        while let Some(b) = self.peek_byte() {
            if matches!(b, b' ' | b'\t' | b',' | b'=' | b'"') {
                break;
            }
            self.pos += 1;
        }
        (self.pos > start).then(|| String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
    }

    /// Read `"..."`, unescaping `\x` pairs.  `None` if unterminated.
    fn read_quoted_string(&mut self) -> Option<String> {
        if self.peek_byte() != Some(b'"') {
            return None;
        }
        self.pos += 1;
        let mut out = Vec::new();
        loop {
            match self.peek_byte()? {
                b'"' => {
                    self.pos += 1;
                    return Some(String::from_utf8_lossy(&out).into_owned());
                }
                b'\\' => {
                    self.pos += 1;
                    out.push(self.peek_byte()?);
                    self.pos += 1;
                }
                b => {
                    out.push(b);
                    self.pos += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(Option<&str>, &str)]) -> BTreeMap<Option<String>, String> {
        pairs
            .iter()
            .map(|&(k, v)| (k.map(str::to_owned), v.to_owned()))
            .collect()
    }

    #[test]
    fn parse_table() {
        // (header, expected challenges as (scheme, params), desc)
        type Expected = &'static [(&'static str, &'static [(Option<&'static str>, &'static str)])];
        let cases: &[(&str, Expected, &str)] = &[
            ("Basic realm=\"protected\"", &[("Basic", &[(Some("realm"), "protected")])], "basic"),
            ("Basic", &[("Basic", &[])], "scheme only"),
            ("Negotiate abc==", &[("Negotiate", &[(None, "abc==")])], "token68"),
            (
                "Digest realm=\"r\", nonce=\"n\", qop=auth",
                &[("Digest", &[(Some("nonce"), "n"), (Some("qop"), "auth"), (Some("realm"), "r")])],
                "digest params",
            ),
            (
                "Basic realm=\"a\", Bearer realm=\"b\"",
                &[
                    ("Basic", &[(Some("realm"), "a")]),
                    ("Bearer", &[(Some("realm"), "b")]),
                ],
                "two challenges",
            ),
            (
                "Basic, Bearer realm=\"b\"",
                &[("Basic", &[]), ("Bearer", &[(Some("realm"), "b")])],
                "bare scheme then another",
            ),
            (
                "Basic realm=\"a \\\"q\\\" b\"",
                &[("Basic", &[(Some("realm"), "a \"q\" b")])],
                "quoted-string escapes",
            ),
            ("Basic REALM=x", &[("Basic", &[(Some("realm"), "x")])], "param names lower-cased"),
            ("Basic realm=\"unterminated", &[], "unterminated quote"),
            ("Basic realm=a, realm=b", &[], "duplicate param"),
            ("Basic realm==a, x=y", &[], "double equals"),
            (
                "Bearer realm=\"a\" junk",
                &[],
                "missing comma after param",
            ),
            ("", &[], "empty"),
            (" , ,", &[], "only separators"),
        ];
        for &(header, expected, desc) in cases {
            let want: Vec<Challenge> = expected
                .iter()
                .map(|&(scheme, p)| Challenge::new(scheme, params(p)))
                .collect();
            assert_eq!(parse(header), want, "{desc}: {header}");
        }
    }

    #[test]
    fn accessors() {
        let c = Challenge::with_realm("Basic", "r");
        assert_eq!(c.scheme(), "Basic");
        assert_eq!(c.realm(), Some("r"));
        assert_eq!(c.charset(), "ISO-8859-1");
        assert_eq!(c.token68(), None);

        let parsed = parse("Basic realm=\"r\", charset=\"UTF-8\"");
        assert_eq!(parsed[0].charset(), "UTF-8");
        assert_eq!(parse("Negotiate tok")[0].token68(), Some("tok"));
    }
}
