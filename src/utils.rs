use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use std::path::Path;

pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Current time in the format every table stores timestamps in
pub fn now_rfc3339() -> String {
    format_utc(Utc::now())
}

/// Render a UTC timestamp the way it is stored, e.g. `2025-01-02T10:00:00Z`
pub fn format_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Round a monetary amount to cents
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Parse a client supplied timestamp.
///
/// Accepts RFC 3339 (`2025-01-02T10:00:00Z`, `...+02:00`), naive ISO-8601
/// (`2025-01-02T10:00:00`, `2025-01-02 10:00:00`, optional fraction) and bare
/// dates. Naive values are taken as UTC.
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(12.345678), 12.35);
        assert_eq!(round2(2.0 / 3.0), 0.67);
        assert_eq!(round2(19.999), 20.0);
        assert_eq!(round2(0.0), 0.0);
    }

    #[test]
    fn test_parse_datetime_formats() {
        let expected = "2025-06-01T09:30:00+00:00";
        for input in [
            "2025-06-01T09:30:00Z",
            "2025-06-01T11:30:00+02:00",
            "2025-06-01T09:30:00",
            "2025-06-01 09:30:00",
            "2025-06-01T09:30:00.000",
            "2025-06-01T09:30",
        ] {
            let parsed = parse_datetime(input).unwrap_or_else(|| panic!("failed on {input}"));
            assert_eq!(parsed.to_rfc3339(), expected, "input {input}");
        }
        assert_eq!(
            parse_datetime("2025-06-01").unwrap().to_rfc3339(),
            "2025-06-01T00:00:00+00:00"
        );
    }

    #[test]
    fn test_parse_datetime_rejects_garbage() {
        assert!(parse_datetime("").is_none());
        assert!(parse_datetime("next tuesday").is_none());
        assert!(parse_datetime("2025-13-01").is_none());
    }
}
