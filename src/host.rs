//! Host canonicalization.
//!
//! Hosts are stored in a single canonical textual form: lower-case ASCII
//! domain names (non-ASCII labels converted with punycode), IPv4 literals
//! as written, and IPv6 literals in their shortest RFC 5952 form without
//! brackets.

use std::net::Ipv4Addr;

/// Characters that may never appear in a canonical host.
const FORBIDDEN_HOST_CHARS: &str = " #%/:?@[\\]";

/// Canonicalize an already percent-decoded host.
///
/// Returns `None` for empty hosts, malformed IPv6 literals, IDN failures
/// and hosts containing forbidden ASCII.
pub(crate) fn to_canonical_host(host: &str) -> Option<String> {
    if host.contains(':') {
        let inner = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            Some(inner) => inner,
            None => host,
        };
        let address = decode_ipv6(inner)?;
        // IPv4-mapped addresses collapse to their IPv4 form.
        if address[..10].iter().all(|&b| b == 0) && address[10] == 0xff && address[11] == 0xff {
            return Some(Ipv4Addr::new(address[12], address[13], address[14], address[15]).to_string());
        }
        return Some(inet6_address_to_ascii(&address));
    }

    let ascii = idn_to_ascii(host)?;
    if ascii.is_empty() || contains_invalid_hostname_ascii(&ascii) {
        return None;
    }
    Some(ascii)
}

/// Returns `true` if `host` is an IP literal (IPv4 dotted quad or IPv6).
pub(crate) fn is_ip_literal(host: &str) -> bool {
    host.contains(':') || host.parse::<Ipv4Addr>().is_ok()
}

fn contains_invalid_hostname_ascii(host: &str) -> bool {
    host.chars()
        .any(|c| c <= '\u{1f}' || c >= '\u{7f}' || FORBIDDEN_HOST_CHARS.contains(c))
}

// ---------------------------------------------------------------------------
// IPv6
// ---------------------------------------------------------------------------

/// Decode an IPv6 literal (no brackets) into its 16 bytes.
///
/// Accepts `::` compression anywhere and a trailing embedded IPv4 suffix.
pub(crate) fn decode_ipv6(input: &str) -> Option<[u8; 16]> {
    let bytes = input.as_bytes();
    let limit = bytes.len();
    let mut address = [0u8; 16];
    let mut b = 0usize;
    let mut compress: Option<usize> = None;
    let mut group_offset = 0usize;
    let mut i = 0usize;

    while i < limit {
        if b == address.len() {
            return None; // Too many groups.
        }

        if i + 2 <= limit && &bytes[i..i + 2] == b"::" {
            if compress.is_some() {
                return None; // Multiple "::" delimiters.
            }
            i += 2;
            b += 2;
            compress = Some(b);
            if i == limit {
                break;
            }
        } else if b != 0 {
            match bytes[i] {
                b':' => i += 1,
                b'.' => {
                    // Rewind to the start of the previous group and parse it as IPv4.
                    if !decode_ipv4_suffix(&bytes[group_offset..limit], &mut address, b - 2) {
                        return None;
                    }
                    b += 2;
                    break;
                }
                _ => return None,
            }
        }

        let mut value: u32 = 0;
        group_offset = i;
        while i < limit {
            let Some(digit) = crate::percent::hex_nibble(bytes[i]) else {
                break;
            };
            value = (value << 4) + u32::from(digit);
            i += 1;
        }
        let group_length = i - group_offset;
        if group_length == 0 || group_length > 4 {
            return None;
        }
        if b + 2 > address.len() {
            return None;
        }
        address[b] = (value >> 8) as u8;
        address[b + 1] = value as u8;
        b += 2;
    }

    if b != address.len() {
        let compress = compress?;
        let tail = b - compress;
        let len = address.len();
        address.copy_within(compress..b, len - tail);
        address[compress..len - tail].fill(0);
    }
    Some(address)
}

/// Decode a dotted-quad suffix into `address[offset..offset + 4]`.
fn decode_ipv4_suffix(input: &[u8], address: &mut [u8; 16], offset: usize) -> bool {
    let mut b = offset;
    let mut i = 0usize;
    while i < input.len() {
        if b == address.len() {
            return false;
        }
        if b != offset {
            if input[i] != b'.' {
                return false;
            }
            i += 1;
        }
        let mut value: u32 = 0;
        let group_offset = i;
        while i < input.len() {
            let c = input[i];
            if !c.is_ascii_digit() {
                break;
            }
            if value == 0 && group_offset != i {
                return false; // Leading zero.
            }
            value = value * 10 + u32::from(c - b'0');
            if value > 255 {
                return false;
            }
            i += 1;
        }
        if i == group_offset {
            return false;
        }
        address[b] = value as u8;
        b += 1;
    }
    b == offset + 4
}

/// Format 16 bytes as the shortest canonical IPv6 text.
///
/// The longest run of two or more zero groups (the first one on ties) is
/// compressed to `::`; groups are lower-case hex without leading zeros.
pub(crate) fn inet6_address_to_ascii(address: &[u8; 16]) -> String {
    let mut longest_run_offset: Option<usize> = None;
    let mut longest_run_length = 0usize;
    let mut i = 0usize;
    while i < address.len() {
        let run_offset = i;
        while i < 16 && address[i] == 0 && address[i + 1] == 0 {
            i += 2;
        }
        let run_length = i - run_offset;
        if run_length > longest_run_length && run_length >= 4 {
            longest_run_offset = Some(run_offset);
            longest_run_length = run_length;
        }
        i += 2;
    }

    let mut out = String::with_capacity(39);
    let mut i = 0usize;
    while i < address.len() {
        if Some(i) == longest_run_offset {
            out.push(':');
            i += longest_run_length;
            if i == 16 {
                out.push(':');
            }
        } else {
            if i > 0 {
                out.push(':');
            }
            let group = (u16::from(address[i]) << 8) | u16::from(address[i + 1]);
            out.push_str(&format!("{group:x}"));
            i += 2;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// IDN
// ---------------------------------------------------------------------------

/// Lower-case `host` and punycode every non-ASCII label.
fn idn_to_ascii(host: &str) -> Option<String> {
    let lowered = host.to_lowercase();
    // Ideographic and fullwidth full stops act as label separators.
    let normalized: String = lowered
        .chars()
        .map(|c| match c {
            '\u{3002}' | '\u{ff0e}' | '\u{ff61}' => '.',
            other => other,
        })
        .collect();

    let mut labels = Vec::new();
    for label in normalized.split('.') {
        let ascii = if label.is_ascii() {
            label.to_owned()
        } else {
            format!("xn--{}", punycode_encode(label)?)
        };
        if ascii.len() > 63 {
            return None;
        }
        labels.push(ascii);
    }
    let joined = labels.join(".");
    if joined.len() > 253 {
        return None;
    }
    Some(joined)
}

/// RFC 3492 punycode encoder for a single label.
fn punycode_encode(input: &str) -> Option<String> {
    const BASE: u32 = 36;
    const T_MIN: u32 = 1;
    const T_MAX: u32 = 26;
    const SKEW: u32 = 38;
    const DAMP: u32 = 700;
    const INITIAL_BIAS: u32 = 72;
    const INITIAL_N: u32 = 128;

    fn adapt(mut delta: u32, num_points: u32, first_time: bool) -> u32 {
        delta = if first_time { delta / DAMP } else { delta / 2 };
        delta += delta / num_points;
        let mut k = 0;
        while delta > ((BASE - T_MIN) * T_MAX) / 2 {
            delta /= BASE - T_MIN;
            k += BASE;
        }
        k + (((BASE - T_MIN + 1) * delta) / (delta + SKEW))
    }

    fn digit(d: u32) -> char {
        if d < 26 {
            (b'a' + d as u8) as char
        } else {
            (b'0' + (d - 26) as u8) as char
        }
    }

    let code_points: Vec<u32> = input.chars().map(|c| c as u32).collect();
    let mut output: String = input.chars().filter(char::is_ascii).collect();
    let basic_count = output.len() as u32;
    let mut handled = basic_count;
    if basic_count > 0 {
        output.push('-');
    }

    let mut n = INITIAL_N;
    let mut delta: u32 = 0;
    let mut bias = INITIAL_BIAS;
    let total = code_points.len() as u32;

    while handled < total {
        let m = code_points.iter().copied().filter(|&c| c >= n).min()?;
        delta = delta.checked_add((m - n).checked_mul(handled + 1)?)?;
        n = m;
        for &c in &code_points {
            if c < n {
                delta = delta.checked_add(1)?;
            }
            if c == n {
                let mut q = delta;
                let mut k = BASE;
                loop {
                    let t = if k <= bias {
                        T_MIN
                    } else if k >= bias + T_MAX {
                        T_MAX
                    } else {
                        k - bias
                    };
                    if q < t {
                        break;
                    }
                    output.push(digit(t + (q - t) % (BASE - t)));
                    q = (q - t) / (BASE - t);
                    k += BASE;
                }
                output.push(digit(q));
                bias = adapt(delta, handled + 1, handled == basic_count);
                delta = 0;
                handled += 1;
            }
        }
        delta += 1;
        n += 1;
    }
    Some(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn canonical_host_table() {
        // (input, expected, desc)
        let cases: &[(&str, Option<&str>, &str)] = &[
            ("EXAMPLE.com", Some("example.com"), "lower-cased"),
            ("example.com.", Some("example.com."), "trailing dot kept"),
            ("1.2.3.4", Some("1.2.3.4"), "ipv4 literal"),
            ("[::1]", Some("::1"), "bracketed loopback"),
            ("::1", Some("::1"), "bare loopback"),
            ("[0:0:0:0:0:0:0:1]", Some("::1"), "expanded loopback"),
            ("[2001:DB8::1]", Some("2001:db8::1"), "upper-case hex"),
            ("[2001:db8:0:0:1:0:0:1]", Some("2001:db8::1:0:0:1"), "first longest run wins"),
            ("[2001:db8:0:1:1:1:1:1]", Some("2001:db8:0:1:1:1:1:1"), "single zero group kept"),
            ("[::ffff:1.2.3.4]", Some("1.2.3.4"), "ipv4-mapped collapses"),
            ("[::1.2.3.4]", Some("::102:304"), "embedded ipv4 suffix"),
            ("[1:2:3:4:5:6:7:8:9]", None, "too many groups"),
            ("[1::2::3]", None, "two compressions"),
            ("[12345::]", None, "group too long"),
            ("[1:2:3]", None, "too few groups"),
            ("[::1.2.3.04]", None, "ipv4 leading zero"),
            ("[::1.2.3.256]", None, "ipv4 octet overflow"),
            ("", None, "empty"),
            ("a b", None, "space forbidden"),
            ("a%b", None, "percent forbidden"),
            ("a\u{0}b", None, "control forbidden"),
            ("bücher.example", Some("xn--bcher-kva.example"), "idn label"),
            ("☃.net", Some("xn--n3h.net"), "all non-ascii label"),
            ("例え。テスト", Some("xn--r8jz45g.xn--zckzah"), "ideographic full stop"),
        ];
        for &(input, expected, desc) in cases {
            assert_eq!(to_canonical_host(input).as_deref(), expected, "{desc}: {input:?}");
        }
    }

    #[test]
    fn ipv6_round_trip_matches_std() {
        let inputs = [
            "::",
            "::1",
            "1::",
            "2001:db8::ff00:42:8329",
            "fe80::1:2:3:4",
            "1:0:0:2:0:0:0:3",
            "1:2:3:4:5:6:7:8",
            "ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff",
        ];
        for input in inputs {
            let bytes = decode_ipv6(input).expect(input);
            let expected: Ipv6Addr = input.parse().unwrap();
            assert_eq!(bytes, expected.octets(), "{input}: bytes");
            let canonical = inet6_address_to_ascii(&bytes);
            assert_eq!(decode_ipv6(&canonical), Some(bytes), "{input}: re-decode");
            assert_eq!(canonical, expected.to_string(), "{input}: text");
        }
    }

    #[test]
    fn ip_literal_detection() {
        assert!(is_ip_literal("1.2.3.4"));
        assert!(is_ip_literal("::1"));
        assert!(!is_ip_literal("example.com"));
        assert!(!is_ip_literal("2.3.4"));
    }

    #[test]
    fn punycode_label_table() {
        let cases: &[(&str, &str)] = &[("bücher", "bcher-kva"), ("☃", "n3h"), ("münchen", "mnchen-3ya")];
        for &(input, expected) in cases {
            assert_eq!(punycode_encode(input).as_deref(), Some(expected), "{input}");
        }
    }
}
