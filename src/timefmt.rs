use chrono::{DateTime, Utc};

/// Format a UTC timestamp for terminal output.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Format an optional timestamp, using '-' when missing.
pub fn format_timestamp_opt(ts: Option<DateTime<Utc>>) -> String {
    ts.map(format_timestamp).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(format_timestamp(ts), "2024-03-09 07:05:01 UTC");
        assert_eq!(format_timestamp_opt(Some(ts)), "2024-03-09 07:05:01 UTC");
        assert_eq!(format_timestamp_opt(None), "-");
    }
}
