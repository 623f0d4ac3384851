//! Canonical structured field keys and value-format helpers.

use chrono::{DateTime, Utc};

pub const EVENT: &str = "event";
pub const COMPONENT: &str = "component";
pub const REFERENTIAL: &str = "referential";
pub const PARTNER: &str = "partner";
pub const CONNECTOR: &str = "connector";
pub const SUBSCRIPTION_ID: &str = "subscription_id";
pub const STOP_AREA_ID: &str = "stop_area_id";
pub const LINE_ID: &str = "line_id";
pub const REASON: &str = "reason";
pub const ERR: &str = "err";

pub const NONE: &str = "none";

pub fn format_timestamp(timestamp: Option<DateTime<Utc>>) -> String {
    timestamp
        .map(|value| value.to_rfc3339())
        .unwrap_or_else(|| NONE.to_string())
}

pub fn format_count(count: usize) -> String {
    count.to_string()
}

#[cfg(test)]
mod tests {
    use super::{format_timestamp, NONE};
    use chrono::{TimeZone, Utc};

    #[test]
    fn format_timestamp_falls_back_when_absent() {
        assert_eq!(format_timestamp(None), NONE);

        let stamp = Utc.with_ymd_and_hms(2017, 1, 1, 12, 0, 0).unwrap();
        assert!(format_timestamp(Some(stamp)).starts_with("2017-01-01T12:00:00"));
    }
}
