//! HTTP-date formatting and parsing (RFC 7231 §7.1.1.1).
//!
//! Formatting always produces the IMF-fixdate form.  Parsing accepts that
//! form plus the obsolete RFC 850 and asctime forms, and falls back to
//! RFC 2822 for servers that send numeric zones.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Latest instant representable in an HTTP date: 9999-12-31T23:59:59.999Z.
pub(crate) const MAX_DATE_MILLIS: i64 = 253_402_300_799_999;

const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Obsolete forms still seen in the wild, tried in order after IMF-fixdate.
const LEGACY_FORMATS: &[&str] = &[
    "%A, %d-%b-%y %H:%M:%S GMT",
    "%a %b %e %H:%M:%S %Y",
    "%a, %d-%b-%Y %H:%M:%S GMT",
    "%a, %d-%b-%y %H:%M:%S GMT",
    "%a, %d %b %y %H:%M:%S GMT",
    "%a %d %b %Y %H:%M:%S GMT",
    "%A %d-%b-%y %H:%M:%S GMT",
];

/// Format `instant` as an IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_http_date(instant: DateTime<Utc>) -> String {
    instant.format(IMF_FIXDATE).to_string()
}

/// Parse an HTTP date. Returns `None` when no known form matches.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    std::iter::once(IMF_FIXDATE)
        .chain(LEGACY_FORMATS.iter().copied())
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
        .or_else(|| {
            DateTime::parse_from_rfc2822(value)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

/// Milliseconds since the epoch for `instant`.
pub(crate) fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

/// The instant at `millis` since the epoch, clamped to the representable
/// range.
pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    let clamped = millis.clamp(0, MAX_DATE_MILLIS);
    Utc.timestamp_millis_opt(clamped)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Current wall-clock time in milliseconds since the epoch.
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
