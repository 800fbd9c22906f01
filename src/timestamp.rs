//! Decoding of the vendor's `/Date(<ms>+zzzz)/` markers.
//!
//! The embedded value is *local* wall-clock time in epoch milliseconds; the
//! record's `GMT_To_Local` field (seconds) gives the offset back to UTC.

use chrono::{DateTime, Local, TimeZone, Utc};
use serde_json::Value;

pub const FIELD_MARKER: &str = "DateTime_Mark";
pub const FIELD_OFFSET: &str = "GMT_To_Local";
pub const FIELD_UTC: &str = "DateTime";
pub const FIELD_LOCAL: &str = "DateTime_Local";

const MARKER_PREFIX: &str = "/Date(";
const DISPLAY_FORMAT: &str = "%-m/%-d/%Y, %-I:%M:%S %p";

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTimestamp {
    pub utc_millis: i64,
    pub local_display: String,
}

/// Leading digit run after `/Date(`. Signs and missing digits yield `None`.
pub fn marker_millis(marker: &str) -> Option<i64> {
    let start = marker.find(MARKER_PREFIX)? + MARKER_PREFIX.len();
    let rest = &marker[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// Offset in seconds. Numbers (fractions kept) and integer strings are accepted;
/// anything else, including non-finite values, is zero.
pub fn offset_secs(value: Option<&Value>) -> f64 {
    let secs = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let digits = s.strip_prefix('-').unwrap_or(s);
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                s.parse().ok()
            } else {
                None
            }
        }
        _ => None,
    };
    secs.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// `local - offset` in epoch milliseconds, truncated toward zero. `None` when the
/// result does not fit an `i64`.
fn to_utc_millis(local_millis: i64, offset: f64) -> Option<i64> {
    let utc = (local_millis as f64 - offset * 1000.0).trunc();
    (utc.is_finite() && utc.abs() < i64::MAX as f64).then_some(utc as i64)
}

pub fn format_display<Tz: TimeZone>(utc: &DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    utc.with_timezone(tz).format(DISPLAY_FORMAT).to_string()
}

/// UTC instant plus a display string in the host's local timezone. `None` when the
/// marker does not decode or the offset pushes the instant out of range.
pub fn decode(marker: &str, offset: Option<&Value>) -> Option<DecodedTimestamp> {
    decode_in(marker, offset, &Local)
}

pub fn decode_in<Tz: TimeZone>(
    marker: &str,
    offset: Option<&Value>,
    tz: &Tz,
) -> Option<DecodedTimestamp>
where
    Tz::Offset: std::fmt::Display,
{
    let local_millis = marker_millis(marker)?;
    let utc_millis = to_utc_millis(local_millis, offset_secs(offset))?;
    let utc = DateTime::<Utc>::from_timestamp_millis(utc_millis)?;
    Some(DecodedTimestamp {
        utc_millis,
        local_display: format_display(&utc, tz),
    })
}

/// Replaces the derived fields of one state record. Undecodable markers leave
/// both derived fields absent.
pub fn normalize_record(record: &mut Value) {
    let Some(obj) = record.as_object_mut() else {
        return;
    };
    obj.remove(FIELD_UTC);
    obj.remove(FIELD_LOCAL);

    let decoded = obj
        .get(FIELD_MARKER)
        .and_then(|v| v.as_str())
        .and_then(|marker| decode(marker, obj.get(FIELD_OFFSET)));

    if let Some(ts) = decoded {
        obj.insert(FIELD_UTC.to_string(), Value::from(ts.utc_millis));
        obj.insert(FIELD_LOCAL.to_string(), Value::from(ts.local_display));
    }
}

/// Normalizes every record of a `tStatInfo` list in a vendor payload.
pub fn normalize_payload(payload: &mut Value) {
    if let Some(Value::Array(records)) = payload.get_mut("tStatInfo") {
        records.iter_mut().for_each(normalize_record);
    }
}
