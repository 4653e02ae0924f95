//! Schema classification and forward migration of stored task records.
//!
//! A stored document is either already at [`SCHEMA_VERSION`] (strictly
//! validated) or a legacy document (every field optional). Legacy documents
//! are mapped to the current record with explicit defaults for every field.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::core::status::TaskStatus;
use crate::core::task::{DEFAULT_AGENT, SCHEMA_VERSION, TaskRecord, timestamp};
use crate::core::validation::validate_document;

/// A stored record before any migration has been applied.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredTask {
    Current(TaskRecord),
    Legacy(LegacyTask),
}

/// Why a stored document could not be classified.
#[derive(Debug)]
pub enum DocumentError {
    Invalid(Vec<String>),
    Malformed(serde_json::Error),
}

/// Any record written before the current schema. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LegacyTask {
    pub id: Option<u64>,
    pub uuid: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub created_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub failed_at: Option<String>,
    pub last_iteration_at: Option<String>,
    pub last_status_check: Option<String>,
    pub iterations: Option<u32>,
    pub worktree_path: Option<String>,
    pub branch_name: Option<String>,
    pub agent: Option<String>,
    pub source_branch: Option<String>,
    pub container_id: Option<String>,
    pub execution_status: Option<String>,
    pub running_at: Option<String>,
    pub error_at: Option<String>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub restart_count: Option<u32>,
    pub last_restart_at: Option<String>,
    pub version: Option<String>,
}

/// Classify a parsed document by its `version` field.
pub fn classify(doc: Value) -> Result<StoredTask, DocumentError> {
    let is_current = doc.get("version").and_then(Value::as_str) == Some(SCHEMA_VERSION);
    if is_current {
        let errors = validate_document(&doc);
        if !errors.is_empty() {
            return Err(DocumentError::Invalid(errors));
        }
        let record = serde_json::from_value(doc).map_err(DocumentError::Malformed)?;
        return Ok(StoredTask::Current(record));
    }
    let legacy = serde_json::from_value(doc).map_err(DocumentError::Malformed)?;
    Ok(StoredTask::Legacy(legacy))
}

/// Map a legacy record onto the current schema.
///
/// `id` is the record's directory id and wins over any id stored in the
/// document; `fallback_uuid` is used when the legacy record never had one. Missing timestamps stay
/// empty except `createdAt`, which falls back to `now`.
pub fn migrate(
    legacy: LegacyTask,
    id: u64,
    fallback_uuid: Uuid,
    now: DateTime<Utc>,
) -> TaskRecord {
    TaskRecord {
        id,
        uuid: non_empty(legacy.uuid).unwrap_or_else(|| fallback_uuid.to_string()),
        title: legacy.title.unwrap_or_default(),
        description: legacy.description.unwrap_or_default(),
        status: legacy
            .status
            .as_deref()
            .map_or(TaskStatus::New, TaskStatus::from_legacy),
        created_at: non_empty(legacy.created_at).unwrap_or_else(|| timestamp(now)),
        started_at: non_empty(legacy.started_at),
        completed_at: non_empty(legacy.completed_at),
        failed_at: non_empty(legacy.failed_at),
        last_iteration_at: non_empty(legacy.last_iteration_at),
        last_status_check: non_empty(legacy.last_status_check),
        iterations: legacy.iterations.unwrap_or(1).max(1),
        worktree_path: non_empty(legacy.worktree_path).map(Into::into),
        branch_name: non_empty(legacy.branch_name),
        agent: non_empty(legacy.agent).or_else(|| Some(DEFAULT_AGENT.to_string())),
        source_branch: non_empty(legacy.source_branch),
        container_id: non_empty(legacy.container_id),
        execution_status: non_empty(legacy.execution_status),
        running_at: non_empty(legacy.running_at),
        error_at: non_empty(legacy.error_at),
        exit_code: legacy.exit_code,
        error: non_empty(legacy.error),
        restart_count: legacy.restart_count.unwrap_or(0),
        last_restart_at: non_empty(legacy.last_restart_at),
        version: SCHEMA_VERSION.to_string(),
    }
}

/// Older writers stored missing values as empty strings.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0)
            .single()
            .expect("valid time")
    }

    #[test]
    fn current_documents_classify_without_changes() {
        let doc = json!({
            "id": 3,
            "uuid": "u-3",
            "title": "t",
            "description": "d",
            "status": "COMPLETED",
            "createdAt": "2026-01-01T00:00:00.000Z",
            "iterations": 2,
            "version": SCHEMA_VERSION
        });
        let StoredTask::Current(record) = classify(doc).expect("classify") else {
            panic!("expected current record");
        };
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.iterations, 2);
    }

    #[test]
    fn invalid_current_documents_are_rejected() {
        let doc = json!({
            "id": 3,
            "uuid": "u-3",
            "title": "t",
            "description": "d",
            "status": "COMPLETED",
            "createdAt": "2026-01-01T00:00:00.000Z",
            "iterations": 0,
            "version": SCHEMA_VERSION
        });
        assert!(matches!(classify(doc), Err(DocumentError::Invalid(_))));
    }

    #[test]
    fn legacy_document_missing_fields_gets_defaults() {
        let doc = json!({
            "title": "Old task",
            "status": "in_progress",
            "startedAt": ""
        });
        let StoredTask::Legacy(legacy) = classify(doc).expect("classify") else {
            panic!("expected legacy record");
        };
        assert_eq!(legacy.version, None);

        let record = migrate(legacy, 12, Uuid::nil(), now());
        assert_eq!(record.id, 12);
        assert_eq!(record.uuid, Uuid::nil().to_string());
        assert_eq!(record.title, "Old task");
        assert_eq!(record.description, "");
        assert_eq!(record.status, TaskStatus::InProgress);
        assert_eq!(record.iterations, 1);
        assert_eq!(record.agent.as_deref(), Some("claude"));
        assert_eq!(record.started_at, None);
        assert_eq!(record.created_at, "2026-03-01T09:30:00.000Z");
        assert_eq!(record.version, SCHEMA_VERSION);
    }

    #[test]
    fn legacy_values_are_preserved() {
        let legacy = LegacyTask {
            id: Some(4),
            uuid: Some("keep-me".to_string()),
            status: Some("Failed".to_string()),
            iterations: Some(3),
            error: Some("boom".to_string()),
            worktree_path: Some("/tmp/ws".to_string()),
            version: Some("1.0".to_string()),
            ..LegacyTask::default()
        };
        let record = migrate(legacy, 4, Uuid::nil(), now());
        assert_eq!(record.id, 4);
        assert_eq!(record.uuid, "keep-me");
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.iterations, 3);
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert_eq!(record.worktree_path, Some("/tmp/ws".into()));
    }

    #[test]
    fn directory_id_wins_over_stored_id() {
        let legacy = LegacyTask {
            id: Some(7),
            title: Some("Legacy five".to_string()),
            ..LegacyTask::default()
        };
        assert_eq!(migrate(legacy, 5, Uuid::nil(), now()).id, 5);
    }

    #[test]
    fn zero_iterations_are_raised_to_one() {
        let legacy = LegacyTask {
            iterations: Some(0),
            ..LegacyTask::default()
        };
        assert_eq!(migrate(legacy, 1, Uuid::nil(), now()).iterations, 1);
    }

    #[test]
    fn migrating_twice_is_a_no_op() {
        let legacy = LegacyTask {
            title: Some("t".to_string()),
            ..LegacyTask::default()
        };
        let first = migrate(legacy, 5, Uuid::nil(), now());
        let doc = serde_json::to_value(&first).expect("serialize");
        let StoredTask::Current(second) = classify(doc).expect("classify") else {
            panic!("migrated record should classify as current");
        };
        assert_eq!(second, first);
    }
}
