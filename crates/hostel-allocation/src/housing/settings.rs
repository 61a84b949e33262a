//! Loosely-typed key/value settings and their normalization.
//!
//! Settings are written by an admin screen that has stored dates in several
//! shapes over time: plain ISO strings, JSON-encoded strings, truncated
//! `YYYY-MM-DDTHH:MM` values, and objects wrapping the date. Every reader goes
//! through the functions here so that the shapes are handled in one place.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::eligibility::PriorityOrder;

pub const APPLICATION_START_DATE: &str = "application_start_date";
pub const APPLICATION_DEADLINE: &str = "application_deadline";
pub const REGISTRATION_OPEN: &str = "registration_open";
pub const PAYMENT_START_DATE: &str = "payment_start_date";
pub const PAYMENT_DEADLINE: &str = "payment_deadline";
pub const MAX_ALLOCATIONS_PER_RUN: &str = "max_allocations_per_run";
pub const PRIORITIZE_BY_LEVEL: &str = "prioritize_by_level";
pub const PRIORITIZE_BY_SUBMISSION_DATE: &str = "prioritize_by_submission_date";
pub const PRIORITY_ORDER: &str = "priority_order";

const DEFAULT_MAX_ALLOCATIONS_PER_RUN: usize = 50;

/// A stored date setting that could not be read as an instant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unparsable date setting '{raw}'")]
pub struct DateParseError {
    pub raw: String,
}

/// Read-only view of the settings store taken at the start of an operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    values: BTreeMap<String, Value>,
}

impl SettingsSnapshot {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|value| !value.is_null())
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn date(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get(key).and_then(normalize_date_setting)
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(normalize_flag_setting)
    }

    pub fn count(&self, key: &str) -> Option<usize> {
        match self.get(key)? {
            Value::Number(number) => number.as_u64().map(|n| n as usize),
            Value::String(raw) => unwrap_json_string(raw).trim().parse().ok(),
            _ => None,
        }
    }
}

/// Normalize a stored date value to an instant; invalid values read as absent.
pub fn normalize_date_setting(raw: &Value) -> Option<DateTime<Utc>> {
    match try_normalize_date_setting(raw) {
        Ok(instant) => instant,
        Err(err) => {
            warn!(raw = %err.raw, "ignoring invalid date setting");
            None
        }
    }
}

/// Like [`normalize_date_setting`] but reports values that are present yet unparsable.
pub fn try_normalize_date_setting(raw: &Value) -> Result<Option<DateTime<Utc>>, DateParseError> {
    match raw {
        Value::Null => Ok(None),
        Value::String(text) => parse_date_text(text),
        Value::Object(map) => match map.get("startDate").or_else(|| map.get("deadline")) {
            Some(inner @ Value::String(_)) => try_normalize_date_setting(inner),
            _ => Ok(None),
        },
        other => Err(DateParseError {
            raw: other.to_string(),
        }),
    }
}

fn parse_date_text(text: &str) -> Result<Option<DateTime<Utc>>, DateParseError> {
    let unwrapped = unwrap_json_string(text);
    let trimmed = unwrapped.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let repaired = if is_minute_precision(trimmed) {
        format!("{trimmed}:00Z")
    } else {
        trimmed.to_string()
    };

    if let Ok(instant) = DateTime::parse_from_rfc3339(&repaired) {
        return Ok(Some(instant.with_timezone(&Utc)));
    }

    // Date-only values are midnight UTC.
    if let Ok(date) = NaiveDate::parse_from_str(&repaired, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(Some(midnight.and_utc()));
        }
    }

    Err(DateParseError { raw: repaired })
}

/// Matches `YYYY-MM-DDTHH:MM` exactly.
fn is_minute_precision(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 16
        && bytes.iter().enumerate().all(|(idx, b)| match idx {
            4 | 7 => *b == b'-',
            10 => *b == b'T',
            13 => *b == b':',
            _ => b.is_ascii_digit(),
        })
}

/// Strip one level of JSON string encoding (`"\"2025-...\""` -> `2025-...`).
fn unwrap_json_string(text: &str) -> String {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::String(inner)) => inner,
        _ => text.to_string(),
    }
}

/// Normalize a stored boolean flag (`true`, `"true"`, `"\"true\""`, `{ "enabled": true }`).
pub fn normalize_flag_setting(raw: &Value) -> Option<bool> {
    match raw {
        Value::Null => None,
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => Some(unwrap_json_string(text).trim().eq_ignore_ascii_case("true")),
        Value::Object(map) => Some(matches!(map.get("enabled"), Some(Value::Bool(true)))),
        _ => Some(false),
    }
}

/// Tunables for a single allocation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationSettings {
    pub max_allocations_per_run: usize,
    pub prioritize_by_level: bool,
    pub prioritize_by_submission_date: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_order: Option<PriorityOrder>,
}

impl Default for AllocationSettings {
    fn default() -> Self {
        Self {
            max_allocations_per_run: DEFAULT_MAX_ALLOCATIONS_PER_RUN,
            prioritize_by_level: true,
            prioritize_by_submission_date: true,
            priority_order: None,
        }
    }
}

impl AllocationSettings {
    pub fn from_snapshot(settings: &SettingsSnapshot) -> Self {
        let defaults = Self::default();
        let priority_order = settings
            .get(PRIORITY_ORDER)
            .and_then(|value| match value {
                Value::String(raw) => {
                    serde_json::from_value(Value::String(unwrap_json_string(raw))).ok()
                }
                _ => None,
            });

        Self {
            max_allocations_per_run: settings
                .count(MAX_ALLOCATIONS_PER_RUN)
                .unwrap_or(defaults.max_allocations_per_run),
            prioritize_by_level: settings
                .flag(PRIORITIZE_BY_LEVEL)
                .unwrap_or(defaults.prioritize_by_level),
            prioritize_by_submission_date: settings
                .flag(PRIORITIZE_BY_SUBMISSION_DATE)
                .unwrap_or(defaults.prioritize_by_submission_date),
            priority_order,
        }
    }

    /// Apply per-request overrides on top of the stored settings.
    pub fn merged(mut self, patch: &AllocationSettingsPatch) -> Self {
        if let Some(max) = patch.max_allocations_per_run {
            self.max_allocations_per_run = max;
        }
        if let Some(flag) = patch.prioritize_by_level {
            self.prioritize_by_level = flag;
        }
        if let Some(flag) = patch.prioritize_by_submission_date {
            self.prioritize_by_submission_date = flag;
        }
        if patch.priority_order.is_some() {
            self.priority_order = patch.priority_order;
        }
        self
    }

    /// The single ordering this run uses.
    pub fn resolved_order(&self) -> PriorityOrder {
        self.priority_order.unwrap_or_else(|| {
            PriorityOrder::from_flags(self.prioritize_by_level, self.prioritize_by_submission_date)
        })
    }
}

/// Optional per-request overrides for [`AllocationSettings`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationSettingsPatch {
    #[serde(default)]
    pub max_allocations_per_run: Option<usize>,
    #[serde(default)]
    pub prioritize_by_level: Option<bool>,
    #[serde(default)]
    pub prioritize_by_submission_date: Option<bool>,
    #[serde(default)]
    pub priority_order: Option<PriorityOrder>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn instant(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .expect("valid instant")
    }

    #[test]
    fn minute_precision_values_are_repaired_as_utc() {
        let parsed = normalize_date_setting(&json!("2025-10-12T00:50"));
        assert_eq!(parsed, Some(instant(2025, 10, 12, 0, 50)));
    }

    #[test]
    fn double_encoded_strings_are_unwrapped() {
        let parsed = normalize_date_setting(&json!("\"2025-10-11T22:00:00.000Z\""));
        assert_eq!(parsed, Some(instant(2025, 10, 11, 22, 0)));
    }

    #[test]
    fn whitespace_and_double_encoding_combine() {
        let parsed = normalize_date_setting(&json!("\"  2025-10-12T00:50  \""));
        assert_eq!(parsed, Some(instant(2025, 10, 12, 0, 50)));
    }

    #[test]
    fn offsets_are_converted_to_utc() {
        let parsed = normalize_date_setting(&json!("2025-10-12T01:50:00+01:00"));
        assert_eq!(parsed, Some(instant(2025, 10, 12, 0, 50)));
    }

    #[test]
    fn wrapped_objects_expose_their_date() {
        assert_eq!(
            normalize_date_setting(&json!({ "startDate": "2025-10-12T00:50" })),
            Some(instant(2025, 10, 12, 0, 50))
        );
        assert_eq!(
            normalize_date_setting(&json!({ "deadline": "2025-10-13" })),
            Some(instant(2025, 10, 13, 0, 0))
        );
        assert_eq!(normalize_date_setting(&json!({ "other": 1 })), None);
    }

    #[test]
    fn garbage_reads_as_absent() {
        assert_eq!(normalize_date_setting(&json!("not a date")), None);
        assert_eq!(normalize_date_setting(&json!("2025-10-12T0:50")), None);
        assert_eq!(normalize_date_setting(&json!("")), None);
        assert_eq!(normalize_date_setting(&json!("\"\"")), None);
        assert_eq!(normalize_date_setting(&json!(true)), None);
        assert_eq!(normalize_date_setting(&json!(1_700_000_000)), None);
        assert_eq!(normalize_date_setting(&Value::Null), None);
    }

    #[test]
    fn unparsable_values_surface_a_date_parse_error() {
        let err = try_normalize_date_setting(&json!("soon")).expect_err("rejected");
        assert_eq!(err.raw, "soon");
        assert_eq!(try_normalize_date_setting(&json!("  ")), Ok(None));
    }

    #[test]
    fn flags_accept_every_stored_shape() {
        assert_eq!(normalize_flag_setting(&json!(true)), Some(true));
        assert_eq!(normalize_flag_setting(&json!(false)), Some(false));
        assert_eq!(normalize_flag_setting(&json!("TRUE")), Some(true));
        assert_eq!(normalize_flag_setting(&json!("\"true\"")), Some(true));
        assert_eq!(normalize_flag_setting(&json!("yes")), Some(false));
        assert_eq!(normalize_flag_setting(&json!({ "enabled": true })), Some(true));
        assert_eq!(normalize_flag_setting(&json!({ "enabled": "true" })), Some(false));
        assert_eq!(normalize_flag_setting(&json!(1)), Some(false));
        assert_eq!(normalize_flag_setting(&Value::Null), None);
    }

    #[test]
    fn allocation_settings_read_from_snapshot() {
        let snapshot = SettingsSnapshot::default()
            .with(MAX_ALLOCATIONS_PER_RUN, json!("\"12\""))
            .with(PRIORITIZE_BY_LEVEL, json!("false"))
            .with(PRIORITY_ORDER, json!("submission_only"));

        let settings = AllocationSettings::from_snapshot(&snapshot);
        assert_eq!(settings.max_allocations_per_run, 12);
        assert!(!settings.prioritize_by_level);
        assert!(settings.prioritize_by_submission_date);
        assert_eq!(settings.resolved_order(), PriorityOrder::SubmissionOnly);
    }

    #[test]
    fn defaults_apply_when_snapshot_is_empty() {
        let settings = AllocationSettings::from_snapshot(&SettingsSnapshot::default());
        assert_eq!(settings, AllocationSettings::default());
        assert_eq!(settings.resolved_order(), PriorityOrder::LevelThenSubmission);
    }

    #[test]
    fn request_patch_overrides_stored_values() {
        let patch: AllocationSettingsPatch = serde_json::from_value(json!({
            "maxAllocationsPerRun": 3,
            "prioritizeByLevel": false
        }))
        .expect("patch parses");

        let merged = AllocationSettings::default().merged(&patch);
        assert_eq!(merged.max_allocations_per_run, 3);
        assert_eq!(merged.resolved_order(), PriorityOrder::SubmissionOnly);
    }
}
