use chrono::{TimeZone, Utc};

/// Wall clock as epoch milliseconds, the unit every stored timestamp uses.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn format_ms_rfc3339(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        None => ms.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_epoch_millis_as_utc() {
        assert_eq!(format_ms_rfc3339(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_ms_rfc3339(1_700_000_000_000), "2023-11-14T22:13:20Z");
    }
}
