//! Percent-encoding per URL component.
//!
//! Each component of a URL tolerates a different set of literal
//! characters; the `*_ENCODE_SET` constants list the ASCII characters that
//! must be escaped in that component.  Control characters, DEL and (unless
//! allowed) non-ASCII code points are always escaped.

pub(crate) const USERNAME_ENCODE_SET: &str = " \"':;<=>@[]^`{}|/\\?#";
pub(crate) const PASSWORD_ENCODE_SET: &str = " \"':;<=>@[]^`{}|/\\?#";
pub(crate) const PATH_SEGMENT_ENCODE_SET: &str = " \"<>^`{}|/\\?#";
pub(crate) const QUERY_ENCODE_SET: &str = " \"'<>#";
pub(crate) const QUERY_COMPONENT_REENCODE_SET: &str = " \"'<>#&=";
pub(crate) const QUERY_COMPONENT_ENCODE_SET: &str = " !\"#$&'(),/:;<=>?@[]\\^`{|}~";
pub(crate) const FRAGMENT_ENCODE_SET: &str = "";
pub(crate) const PORT_ENCODE_SET: &str = "";

/// Options for [`canonicalize`].
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Canon {
    /// Input may already contain `%XX` escapes that must be kept.
    pub already_encoded: bool,
    /// With `already_encoded`, re-escape a `%` that does not start a
    /// valid escape.
    pub strict: bool,
    /// `+` means space (form and query encoding).
    pub plus_is_space: bool,
    /// Keep non-ASCII code points literally.
    pub unicode_allowed: bool,
}

impl Canon {
    pub(crate) const RAW: Canon = Canon {
        already_encoded: false,
        strict: false,
        plus_is_space: false,
        unicode_allowed: false,
    };

    pub(crate) const ENCODED: Canon = Canon {
        already_encoded: true,
        strict: false,
        plus_is_space: false,
        unicode_allowed: false,
    };

    pub(crate) fn plus_is_space(mut self) -> Canon {
        self.plus_is_space = true;
        self
    }

    pub(crate) fn unicode_allowed(mut self) -> Canon {
        self.unicode_allowed = true;
        self
    }
}

/// Returns `true` if `input[pos..]` starts with a well-formed `%XX` escape.
pub(crate) fn is_percent_encoded(input: &[u8], pos: usize) -> bool {
    pos + 2 < input.len()
        && input.get(pos) == Some(&b'%')
        && input.get(pos + 1).and_then(|&b| hex_nibble(b)).is_some()
        && input.get(pos + 2).and_then(|&b| hex_nibble(b)).is_some()
}

/// Escape every character of `input` that `encode_set` (or the implicit
/// control/non-ASCII rules) forbids in this URL component.
pub(crate) fn canonicalize(input: &str, encode_set: &str, canon: Canon) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    for (i, c) in input.char_indices() {
        if canon.already_encoded && matches!(c, '\t' | '\n' | '\x0c' | '\r') {
            // Drop tab and newline characters, as browsers do.
            continue;
        }
        if c == '+' && canon.plus_is_space {
            out.push_str(if canon.already_encoded { "+" } else { "%2B" });
            continue;
        }
        let cp = c as u32;
        let must_encode = cp < 0x20
            || cp == 0x7f
            || (cp >= 0x80 && !canon.unicode_allowed)
            || (c.is_ascii() && encode_set.contains(c))
            || (c == '%'
                && (!canon.already_encoded || (canon.strict && !is_percent_encoded(bytes, i))));
        if must_encode {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                push_escape(&mut out, b);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn push_escape(out: &mut String, b: u8) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    out.push('%');
    out.push(HEX[(b >> 4) as usize] as char);
    out.push(HEX[(b & 0x0f) as usize] as char);
}

/// Decode `%XX` escapes.  Malformed escapes pass through literally and
/// invalid UTF-8 is replaced with U+FFFD.
pub(crate) fn percent_decode(input: &str, plus_is_space: bool) -> String {
    if !input.contains('%') && !(plus_is_space && input.contains('+')) {
        return input.to_owned();
    }
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match (hex_nibble(bytes[i + 1]), hex_nibble(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' if plus_is_space => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Decode a single ASCII hex digit.
pub(crate) fn hex_nibble(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_table() {
        // (input, set, canon, expected, desc)
        let cases: &[(&str, &str, Canon, &str, &str)] = &[
            ("a b", PATH_SEGMENT_ENCODE_SET, Canon::RAW, "a%20b", "space in path"),
            ("a/b", PATH_SEGMENT_ENCODE_SET, Canon::RAW, "a%2Fb", "slash in segment"),
            ("a%2Fb", PATH_SEGMENT_ENCODE_SET, Canon::ENCODED, "a%2Fb", "existing escape kept"),
            ("100%", PATH_SEGMENT_ENCODE_SET, Canon::RAW, "100%25", "bare percent raw"),
            ("100%", PATH_SEGMENT_ENCODE_SET, Canon::ENCODED, "100%", "bare percent lenient"),
            (
                "100%",
                PATH_SEGMENT_ENCODE_SET,
                Canon { strict: true, ..Canon::ENCODED },
                "100%25",
                "bare percent strict",
            ),
            ("é", PATH_SEGMENT_ENCODE_SET, Canon::RAW, "%C3%A9", "non-ascii escaped"),
            ("é", FRAGMENT_ENCODE_SET, Canon::ENCODED.unicode_allowed(), "é", "fragment unicode"),
            ("a+b", QUERY_COMPONENT_ENCODE_SET, Canon::RAW.plus_is_space(), "a%2Bb", "plus raw"),
            ("a+b", QUERY_ENCODE_SET, Canon::ENCODED.plus_is_space(), "a+b", "plus encoded"),
            ("a\tb\nc", QUERY_ENCODE_SET, Canon::ENCODED, "abc", "tabs and newlines dropped"),
            ("a\tb", QUERY_ENCODE_SET, Canon::RAW, "a%09b", "tab escaped when raw"),
            ("x@y:z", USERNAME_ENCODE_SET, Canon::RAW, "x%40y%3Az", "userinfo delimiters"),
            ("\u{7f}", FRAGMENT_ENCODE_SET, Canon::RAW, "%7F", "DEL escaped"),
        ];
        for &(input, set, canon, expected, desc) in cases {
            assert_eq!(canonicalize(input, set, canon), expected, "{desc}");
        }
    }

    #[test]
    fn percent_decode_table() {
        // (input, plus_is_space, expected, desc)
        let cases: &[(&str, bool, &str, &str)] = &[
            ("a%20b", false, "a b", "simple escape"),
            ("a+b", true, "a b", "plus as space"),
            ("a+b", false, "a+b", "plus literal"),
            ("%zz", false, "%zz", "invalid escape passes through"),
            ("%4", false, "%4", "truncated escape"),
            ("%", false, "%", "lone percent"),
            ("%C3%A9", false, "é", "utf-8 sequence"),
            ("%FF", false, "\u{FFFD}", "invalid utf-8 replaced"),
            ("plain", false, "plain", "fast path"),
        ];
        for &(input, plus, expected, desc) in cases {
            assert_eq!(percent_decode(input, plus), expected, "{desc}");
        }
    }

    #[test]
    fn is_percent_encoded_bounds() {
        assert!(is_percent_encoded(b"%41", 0));
        assert!(!is_percent_encoded(b"%4", 0));
        assert!(!is_percent_encoded(b"%G1", 0));
        assert!(!is_percent_encoded(b"a%41", 0));
        assert!(is_percent_encoded(b"a%41", 1));
    }
}
