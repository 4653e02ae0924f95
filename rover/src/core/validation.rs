//! Invariant checks run before a task record is persisted or accepted from disk.

use chrono::DateTime;
use serde_json::Value;

use crate::core::status::TaskStatus;
use crate::core::task::TaskRecord;

const DATE_FIELDS: [&str; 9] = [
    "createdAt",
    "startedAt",
    "completedAt",
    "failedAt",
    "lastIterationAt",
    "lastStatusCheck",
    "runningAt",
    "errorAt",
    "lastRestartAt",
];

const REQUIRED_STRINGS: [&str; 6] = [
    "uuid",
    "title",
    "description",
    "status",
    "createdAt",
    "version",
];

/// Check a raw stored document:
/// - required fields present and correctly typed
/// - `iterations >= 1`
/// - `status` is one of the canonical statuses
/// - every populated date field parses
pub fn validate_document(doc: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(object) = doc.as_object() else {
        return vec!["record must be a JSON object".to_string()];
    };

    match object.get("id") {
        Some(id) if id.is_u64() => {}
        Some(_) => errors.push("id must be a non-negative integer".to_string()),
        None => errors.push("missing required field 'id'".to_string()),
    }

    for field in REQUIRED_STRINGS {
        match object.get(field) {
            Some(Value::String(_)) => {}
            Some(_) => errors.push(format!("{field} must be a string")),
            None => errors.push(format!("missing required field '{field}'")),
        }
    }

    match object.get("iterations").map(Value::as_u64) {
        Some(Some(n)) if n >= 1 => {}
        Some(Some(n)) => errors.push(format!("iterations must be >= 1 (got {n})")),
        Some(None) => errors.push("iterations must be an integer".to_string()),
        None => errors.push("missing required field 'iterations'".to_string()),
    }

    if let Some(Value::String(status)) = object.get("status")
        && status.parse::<TaskStatus>().is_err()
    {
        errors.push(format!("status '{status}' is not a known status"));
    }

    for field in DATE_FIELDS {
        match object.get(field) {
            None | Some(Value::Null) => {}
            Some(Value::String(raw)) => {
                if let Some(err) = check_date(field, raw) {
                    errors.push(err);
                }
            }
            Some(_) => errors.push(format!("{field} must be a string")),
        }
    }

    errors
}

/// Check a typed record; the type system already covers presence and the status set.
pub fn validate_record(record: &TaskRecord) -> Vec<String> {
    let mut errors = Vec::new();
    if record.iterations < 1 {
        errors.push(format!("iterations must be >= 1 (got {})", record.iterations));
    }
    if record.uuid.trim().is_empty() {
        errors.push("uuid must not be empty".to_string());
    }
    if record.version.trim().is_empty() {
        errors.push("version must not be empty".to_string());
    }

    let dates = [
        ("createdAt", Some(&record.created_at)),
        ("startedAt", record.started_at.as_ref()),
        ("completedAt", record.completed_at.as_ref()),
        ("failedAt", record.failed_at.as_ref()),
        ("lastIterationAt", record.last_iteration_at.as_ref()),
        ("lastStatusCheck", record.last_status_check.as_ref()),
        ("runningAt", record.running_at.as_ref()),
        ("errorAt", record.error_at.as_ref()),
        ("lastRestartAt", record.last_restart_at.as_ref()),
    ];
    for (field, value) in dates {
        if let Some(raw) = value
            && let Some(err) = check_date(field, raw)
        {
            errors.push(err);
        }
    }
    errors
}

fn check_date(field: &str, raw: &str) -> Option<String> {
    if DateTime::parse_from_rfc3339(raw).is_ok() {
        return None;
    }
    Some(format!("{field} '{raw}' is not a valid ISO-8601 timestamp"))
}
