//! Textual extraction and shifting of OTLP/JSON nanosecond timestamps.
//!
//! Payloads are never parsed as JSON. Only the quoted decimal value that
//! follows one of [`TIMESTAMP_FIELDS`] is touched; every other byte of the
//! payload is carried through unchanged.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::{Captures, Regex};

/// JSON keys whose quoted values are nanoseconds since the Unix epoch.
pub const TIMESTAMP_FIELDS: [&str; 4] = [
    "startTimeUnixNano",
    "endTimeUnixNano",
    "timeUnixNano",
    "observedTimeUnixNano",
];

/// Compiled matcher for the recognised timestamp fields.
#[derive(Debug, Clone)]
pub struct TimestampFields {
    regex: Regex,
}

impl TimestampFields {
    #[must_use]
    pub fn new() -> Self {
        let pattern = format!(r#""({})"(\s*:\s*)"(\d+)""#, TIMESTAMP_FIELDS.join("|"));
        let regex = Regex::new(&pattern).expect("timestamp field pattern is valid");
        Self { regex }
    }

    /// Smallest timestamp embedded in `payload`, if any field matches.
    pub fn min_timestamp(&self, payload: &str) -> Option<u64> {
        self.regex
            .captures_iter(payload)
            .filter_map(|caps| caps[3].parse::<u64>().ok())
            .min()
    }

    /// Shift every recognised timestamp by `offset_ns`.
    ///
    /// Results saturate to the unsigned 64-bit range OTLP uses for these
    /// fields. Values too large to parse are left as they are.
    ///
    /// Successive rewrites compose (`rewrite(rewrite(p, a), b)` equals
    /// `rewrite(p, a + b)`) only while every intermediate value stays inside
    /// that range; a saturated value loses the excess.
    pub fn rewrite<'a>(&self, payload: &'a str, offset_ns: i64) -> Cow<'a, str> {
        if offset_ns == 0 {
            return Cow::Borrowed(payload);
        }
        self.regex.replace_all(payload, |caps: &Captures<'_>| {
            let field = &caps[1];
            let separator = &caps[2];
            match caps[3].parse::<u64>() {
                Ok(value) => {
                    let shifted = shift(value, offset_ns);
                    format!(r#""{field}"{separator}"{shifted}""#)
                }
                Err(_) => caps[0].to_string(),
            }
        })
    }
}

impl Default for TimestampFields {
    fn default() -> Self {
        Self::new()
    }
}

fn shared() -> &'static TimestampFields {
    static FIELDS: OnceLock<TimestampFields> = OnceLock::new();
    FIELDS.get_or_init(TimestampFields::new)
}

/// Smallest recognised timestamp in `payload`.
pub fn min_timestamp(payload: &str) -> Option<u64> {
    shared().min_timestamp(payload)
}

/// Shift every recognised timestamp in `payload` by `offset_ns`.
///
/// See [`TimestampFields::rewrite`] for saturation and composition.
pub fn rewrite(payload: &str, offset_ns: i64) -> Cow<'_, str> {
    shared().rewrite(payload, offset_ns)
}

fn shift(value: u64, offset_ns: i64) -> u64 {
    let shifted = i128::from(value) + i128::from(offset_ns);
    shifted.clamp(0, i128::from(u64::MAX)) as u64
}
