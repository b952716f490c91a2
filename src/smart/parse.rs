//! smartctl output scanners
//!
//! Two independent line-oriented rules, one per invocation mode. Each returns
//! an optional typed value, so a miss in one never affects the other.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::SmartRecord;

/// ATA attribute ID for drive temperature
const TEMPERATURE_ATTRIBUTE_ID: &str = "194";

/// Column index of RAW_VALUE in the `smartctl -A` attribute table
const RAW_VALUE_COLUMN: usize = 9;

static TEMPERATURE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^temperature(_\w+)?$").expect("valid regex"));

static HEALTH_RESULT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"overall-health self-assessment test result:\s*(\w+)").expect("valid regex")
});

/// Extract the drive temperature from `smartctl -A` output.
///
/// The first row with attribute ID 194 and a temperature name wins. A raw
/// value that is not a plain integer yields `None`.
pub fn parse_temperature(attributes: &str) -> Option<i32> {
    let row = attributes.lines().find_map(|line| {
        let columns: Vec<&str> = line.split_whitespace().collect();
        match columns.as_slice() {
            [id, name, ..] if *id == TEMPERATURE_ATTRIBUTE_ID && TEMPERATURE_NAME.is_match(name) => {
                Some(columns)
            }
            _ => None,
        }
    })?;

    row.get(RAW_VALUE_COLUMN)?.parse().ok()
}

/// Extract the self-assessment status token from `smartctl -H` output.
pub fn parse_health(health: &str) -> Option<String> {
    HEALTH_RESULT
        .captures(health)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Combine both scanners into a record. Either output may be absent.
pub fn parse_record(attributes: Option<&str>, health: Option<&str>) -> SmartRecord {
    let mut record = SmartRecord {
        temperature: attributes.and_then(parse_temperature),
        ..SmartRecord::unknown()
    };
    if let Some(token) = health.and_then(parse_health) {
        record = record.with_status(&token);
    }
    record
}
