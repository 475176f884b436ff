use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

lazy_static! {
    static ref TRUTHY: Regex = Regex::new(r"(?i)^\s*(true|t|yes|y)\s*$").unwrap();

    static ref SEVERITY_SCALE: HashMap<&'static str, f64> = [
        ("Low", 0.),
        ("Medium", 1.),
        ("High", 2.),
        ("Critical", 3.),
    ].iter().cloned().collect();
}

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse a field as finite f64, None for empty or unparsable input.
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() { return None; }

    match fast_float::parse::<f64, _>(trimmed) {
        Ok(v) if v.is_finite() => Some(v),
        _ => None
    }
}

/// Numeric seconds or a datetime string (as Unix seconds). Unparsable values become NaN.
pub fn parse_timestamp(raw: &str) -> f64 {
    if let Some(ts) = parse_number(raw) {
        return ts;
    }

    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return unix_seconds(&dt.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS.iter() {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return unix_seconds(&Utc.from_utc_datetime(&ndt));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return unix_seconds(&Utc.from_utc_datetime(&ndt));
        }
    }

    f64::NAN
}

fn unix_seconds(dt: &DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + dt.timestamp_subsec_nanos() as f64 * 1e-9
}

/// Numeric labels are truncated (non-zero is positive), otherwise truthy strings are positive.
pub fn parse_label(raw: &str) -> u8 {
    match parse_number(raw) {
        Some(v) => (v.trunc() != 0.) as u8,
        None => TRUTHY.is_match(raw) as u8
    }
}

/// Numeric severities pass through, textual ones use the ordinal scale, anything else is 0.
pub fn parse_severity(raw: &str) -> f64 {
    match parse_number(raw) {
        Some(v) => v,
        None => SEVERITY_SCALE.get(raw.trim()).copied().unwrap_or(0.)
    }
}


#[cfg(test)]
mod tests {
    use crate::ingest::value::{parse_label, parse_number, parse_severity, parse_timestamp};

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 1.5 "), Some(1.5));
        assert_eq!(parse_number("-2e-3"), Some(-0.002));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("inf"), None);
    }

    #[test]
    fn test_parse_timestamp_numeric() {
        assert_eq!(parse_timestamp("12.25"), 12.25);
    }

    #[test]
    fn test_parse_timestamp_datetime() {
        assert_eq!(parse_timestamp("1970-01-01 00:01:00"), 60.);
        assert_eq!(parse_timestamp("1970-01-01T00:00:01.5"), 1.5);
        assert_eq!(parse_timestamp("1970-01-01T00:00:10+00:00"), 10.);
        assert_eq!(parse_timestamp("1970-01-02"), 86400.);
    }

    #[test]
    fn test_parse_timestamp_invalid() {
        assert!(parse_timestamp("yesterday").is_nan());
    }

    #[test]
    fn test_parse_label() {
        assert_eq!(parse_label("1"), 1);
        assert_eq!(parse_label("0"), 0);
        assert_eq!(parse_label("1.0"), 1);
        assert_eq!(parse_label("0.7"), 0);
        assert_eq!(parse_label("True"), 1);
        assert_eq!(parse_label(" yes"), 1);
        assert_eq!(parse_label("y"), 1);
        assert_eq!(parse_label("False"), 0);
        assert_eq!(parse_label("no"), 0);
        assert_eq!(parse_label(""), 0);
    }

    #[test]
    fn test_parse_severity() {
        assert_eq!(parse_severity("Low"), 0.);
        assert_eq!(parse_severity("Medium"), 1.);
        assert_eq!(parse_severity("High"), 2.);
        assert_eq!(parse_severity("Critical"), 3.);
        assert_eq!(parse_severity("2.5"), 2.5);
        assert_eq!(parse_severity("Catastrophic"), 0.);
        assert_eq!(parse_severity(""), 0.);
    }
}
