//! Partner settings bag: known keys enumerated centrally, unknown keys
//! preserved for forward compatibility.

use chrono::Duration;
use std::collections::BTreeMap;

pub const REMOTE_URL: &str = "remote_url";
pub const REMOTE_CREDENTIAL: &str = "remote_credential";
pub const LOCAL_CREDENTIAL: &str = "local_credential";
pub const LOCAL_URL: &str = "local_url";
pub const REMOTE_OBJECTID_KIND: &str = "remote_objectid_kind";
pub const COLLECT_PRIORITY: &str = "collect.priority";
pub const COLLECT_INCLUDE_STOP_AREAS: &str = "collect.include_stop_areas";
pub const COLLECT_INCLUDE_LINES: &str = "collect.include_lines";
pub const COLLECT_EXCLUDE_STOP_AREAS: &str = "collect.exclude_stop_areas";
pub const COLLECT_EXCLUDE_LINES: &str = "collect.exclude_lines";
pub const COLLECT_FILTER_GENERAL_MESSAGES: &str = "collect.filter_general_messages";
pub const SUBSCRIPTIONS_MAXIMUM_RESOURCES: &str = "subscriptions.maximum_resources";
pub const BROADCAST_NO_DESTINATIONREF_REWRITING_FROM: &str =
    "broadcast.no_destinationref_rewriting_from";
pub const BROADCAST_ABORT_NOTIFY_ON_MISSING_REFERENCE: &str =
    "broadcast.abort_notify_on_missing_reference";
pub const GENERATOR_PREFIX: &str = "generators.";

pub const KNOWN_SETTINGS: &[&str] = &[
    REMOTE_URL,
    REMOTE_CREDENTIAL,
    LOCAL_CREDENTIAL,
    LOCAL_URL,
    REMOTE_OBJECTID_KIND,
    COLLECT_PRIORITY,
    COLLECT_INCLUDE_STOP_AREAS,
    COLLECT_INCLUDE_LINES,
    COLLECT_EXCLUDE_STOP_AREAS,
    COLLECT_EXCLUDE_LINES,
    COLLECT_FILTER_GENERAL_MESSAGES,
    SUBSCRIPTIONS_MAXIMUM_RESOURCES,
    BROADCAST_NO_DESTINATIONREF_REWRITING_FROM,
    BROADCAST_ABORT_NOTIFY_ON_MISSING_REFERENCE,
];

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str).filter(|value| !value.is_empty())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn bool(&self, key: &str) -> bool {
        matches!(self.get(key), Some("true") | Some("1") | Some("t"))
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|value| value.parse().ok())
    }

    /// Comma-separated list with surrounding whitespace trimmed per item.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn iso_duration(&self, key: &str) -> Option<Duration> {
        self.get(key).and_then(parse_iso8601_duration)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl FromIterator<(String, String)> for Settings {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Parses the `PnDTnHnMnS` subset of ISO-8601 durations used by SIRI
/// subscription options. Fractions are not supported.
pub fn parse_iso8601_duration(value: &str) -> Option<Duration> {
    let rest = value.strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((date, time)) => (date, Some(time)),
        None => (rest, None),
    };

    let mut total = Duration::zero();
    let mut accumulate = |part: &str, units: &[(char, i64)]| -> Option<()> {
        let mut number = String::new();
        for ch in part.chars() {
            if ch.is_ascii_digit() {
                number.push(ch);
                continue;
            }
            let seconds_per_unit = units
                .iter()
                .find(|(unit, _)| *unit == ch)
                .map(|(_, seconds)| *seconds)?;
            let amount: i64 = number.parse().ok()?;
            total = total + Duration::seconds(amount * seconds_per_unit);
            number.clear();
        }
        if number.is_empty() {
            Some(())
        } else {
            None
        }
    };

    accumulate(date_part, &[('D', 86_400)])?;
    if let Some(time_part) = time_part {
        accumulate(time_part, &[('H', 3_600), ('M', 60), ('S', 1)])?;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::{parse_iso8601_duration, Settings};
    use chrono::Duration;

    #[test]
    fn lists_are_split_and_trimmed() {
        let mut settings = Settings::new();
        settings.set("collect.include_lines", "A:1, B:2 ,C:3");

        assert_eq!(
            settings.list("collect.include_lines"),
            vec!["A:1".to_string(), "B:2".to_string(), "C:3".to_string()]
        );
        assert!(settings.list("collect.exclude_lines").is_empty());
    }

    #[test]
    fn iso_durations_cover_the_siri_subset() {
        assert_eq!(parse_iso8601_duration("PT1M"), Some(Duration::minutes(1)));
        assert_eq!(
            parse_iso8601_duration("PT2H30M"),
            Some(Duration::minutes(150))
        );
        assert_eq!(parse_iso8601_duration("P1D"), Some(Duration::days(1)));
        assert_eq!(
            parse_iso8601_duration("P1DT12H"),
            Some(Duration::hours(36))
        );
        assert_eq!(parse_iso8601_duration("PT90S"), Some(Duration::seconds(90)));
        assert_eq!(parse_iso8601_duration("90S"), None);
        assert_eq!(parse_iso8601_duration("PTxS"), None);
    }

    #[test]
    fn empty_values_read_as_unset() {
        let mut settings = Settings::new();
        settings.set("remote_url", "");

        assert_eq!(settings.get("remote_url"), None);
    }
}
