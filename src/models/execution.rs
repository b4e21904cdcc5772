use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normalized state of a single status condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionState {
    Succeeded,
    Failed,
    Pending,
    Unknown,
}

impl ConditionState {
    /// Map either the nested `status: "True"` vocabulary or the flat
    /// `state: "CONDITION_SUCCEEDED"` vocabulary onto one enum.
    fn parse(raw: &str) -> Self {
        match raw {
            "True" | "CONDITION_SUCCEEDED" => ConditionState::Succeeded,
            "False" | "CONDITION_FAILED" => ConditionState::Failed,
            "CONDITION_PENDING" | "CONDITION_RECONCILING" => ConditionState::Pending,
            _ => ConditionState::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub condition_type: String,
    pub state: ConditionState,
    pub message: Option<String>,
}

/// Terminal result of an execution as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    Succeeded,
    Failed,
}

/// One run instance of a job resource, in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub full_name: String,
    pub short_name: String,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub succeeded_count: u32,
    pub failed_count: u32,
    pub conditions: Vec<Condition>,
    pub log_uri: Option<String>,
}

/// The two response layouts the platform CLI emits for an execution.
enum ExecutionShape<'a> {
    /// `{"metadata": {...}, "status": {...}}`
    Nested {
        metadata: &'a Value,
        status: Option<&'a Value>,
    },
    /// `{"name": "projects/.../executions/x", "startTime": ..., ...}`
    Flat(&'a Value),
}

impl<'a> ExecutionShape<'a> {
    fn detect(value: &'a Value) -> Option<Self> {
        let obj = value.as_object()?;
        if let Some(metadata) = obj.get("metadata").filter(|m| m.is_object()) {
            return Some(ExecutionShape::Nested {
                metadata,
                status: obj.get("status").filter(|s| s.is_object()),
            });
        }
        if obj.contains_key("name") {
            return Some(ExecutionShape::Flat(value));
        }
        None
    }
}

impl Execution {
    /// Parse raw CLI output. Empty or malformed output yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let value: Value = serde_json::from_str(trimmed).ok()?;
        Self::from_json(&value)
    }

    /// Normalize either response shape into an `Execution`.
    ///
    /// Returns `None` when the value has neither shape or carries no name.
    pub fn from_json(value: &Value) -> Option<Self> {
        match ExecutionShape::detect(value)? {
            ExecutionShape::Nested { metadata, status } => {
                let short_name = non_empty(metadata.get("name"))?;
                let full_name = match non_empty(metadata.get("namespace")) {
                    Some(ns) => format!("namespaces/{}/executions/{}", ns, short_name),
                    None => short_name.clone(),
                };
                let empty = Value::Null;
                let status = status.unwrap_or(&empty);
                Some(Self::from_status_fields(full_name, short_name, status, "status"))
            }
            ExecutionShape::Flat(value) => {
                let full_name = non_empty(value.get("name"))?;
                let short_name = full_name
                    .rsplit('/')
                    .next()
                    .unwrap_or(full_name.as_str())
                    .to_string();
                Some(Self::from_status_fields(full_name, short_name, value, "state"))
            }
        }
    }

    fn from_status_fields(
        full_name: String,
        short_name: String,
        fields: &Value,
        state_key: &str,
    ) -> Self {
        let conditions = fields
            .get("conditions")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|c| {
                        Some(Condition {
                            condition_type: c.get("type")?.as_str()?.to_string(),
                            state: c
                                .get(state_key)
                                .and_then(Value::as_str)
                                .map(ConditionState::parse)
                                .unwrap_or(ConditionState::Unknown),
                            message: non_empty(c.get("message")),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            full_name,
            short_name,
            start_time: parse_time(fields.get("startTime")),
            completion_time: parse_time(fields.get("completionTime")),
            succeeded_count: parse_count(fields.get("succeededCount")),
            failed_count: parse_count(fields.get("failedCount")),
            conditions,
            log_uri: non_empty(fields.get("logUri")),
        }
    }

    pub fn completed_condition(&self) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == "Completed")
    }

    /// Terminal outcome, if one has been reported.
    ///
    /// Success is signalled either by a completion time with a positive
    /// success count or by a successful `Completed` condition; either is
    /// sufficient because the two response shapes surface it differently.
    pub fn outcome(&self) -> Option<ExecutionOutcome> {
        let condition = self.completed_condition().map(|c| c.state);

        if (self.completion_time.is_some() && self.succeeded_count > 0)
            || condition == Some(ConditionState::Succeeded)
        {
            return Some(ExecutionOutcome::Succeeded);
        }
        if condition == Some(ConditionState::Failed)
            || (self.completion_time.is_some() && self.succeeded_count == 0)
        {
            return Some(ExecutionOutcome::Failed);
        }
        None
    }

    /// The platform's own message on the `Completed` condition.
    pub fn completion_message(&self) -> Option<&str> {
        self.completed_condition()
            .and_then(|c| c.message.as_deref())
    }

    /// Task duration derived from the execution's own timestamps.
    pub fn task_duration(&self) -> Option<Duration> {
        match (self.start_time, self.completion_time) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_time(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = value?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Counts arrive as numbers or, for 64-bit fields, as strings.
fn parse_count(value: Option<&Value>) -> u32 {
    match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as u32,
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_nested_shape() {
        let value = json!({
            "apiVersion": "run.googleapis.com/v1",
            "kind": "Execution",
            "metadata": {"name": "export-users-x7k2p", "namespace": "123456"},
            "status": {
                "startTime": "2026-03-01T10:00:00.123456Z",
                "completionTime": "2026-03-01T10:02:30Z",
                "succeededCount": 1,
                "conditions": [
                    {"type": "Completed", "status": "True", "message": "Execution completed successfully."},
                    {"type": "Started", "status": "True"}
                ],
                "logUri": "https://console.cloud.google.com/logs/viewer?x=1"
            }
        });
        let exec = Execution::from_json(&value).expect("parse");
        assert_eq!(exec.short_name, "export-users-x7k2p");
        assert_eq!(exec.full_name, "namespaces/123456/executions/export-users-x7k2p");
        assert!(exec.start_time.is_some());
        assert_eq!(exec.succeeded_count, 1);
        assert_eq!(exec.conditions.len(), 2);
        assert_eq!(exec.conditions[0].state, ConditionState::Succeeded);
        assert_eq!(exec.outcome(), Some(ExecutionOutcome::Succeeded));
        assert_eq!(
            exec.completion_message(),
            Some("Execution completed successfully.")
        );
        assert!(exec.log_uri.is_some());
    }

    #[test]
    fn test_parse_flat_shape() {
        let value = json!({
            "name": "projects/acme/locations/us-central1/jobs/export-users/executions/export-users-abc12",
            "startTime": "2026-03-01T10:00:00Z",
            "failedCount": "1",
            "conditions": [
                {"type": "Completed", "state": "CONDITION_FAILED", "message": "Task export-users-abc12-task0 failed with exit code 2"}
            ]
        });
        let exec = Execution::from_json(&value).expect("parse");
        assert_eq!(exec.short_name, "export-users-abc12");
        assert_eq!(exec.failed_count, 1);
        assert!(exec.completion_time.is_none());
        assert_eq!(exec.outcome(), Some(ExecutionOutcome::Failed));
        assert!(exec
            .completion_message()
            .expect("message")
            .contains("exit code 2"));
    }

    #[test]
    fn test_both_shapes_normalize_to_same_state() {
        let nested = json!({
            "metadata": {"name": "e1"},
            "status": {"startTime": "2026-03-01T10:00:00Z"}
        });
        let flat = json!({"name": "e1", "startTime": "2026-03-01T10:00:00Z"});
        assert_eq!(
            Execution::from_json(&nested).expect("nested"),
            Execution::from_json(&flat).expect("flat")
        );
    }

    #[test]
    fn test_empty_and_malformed_yield_none() {
        assert!(Execution::parse("").is_none());
        assert!(Execution::parse("   \n").is_none());
        assert!(Execution::parse("not json").is_none());
        assert!(Execution::parse("[]").is_none());
        assert!(Execution::parse("{}").is_none());
        assert!(Execution::parse(r#"{"metadata": {}}"#).is_none());
    }

    #[test]
    fn test_completion_without_success_is_failure() {
        let exec = Execution::parse(
            r#"{"name": "e1", "startTime": "2026-03-01T10:00:00Z", "completionTime": "2026-03-01T10:01:00Z", "succeededCount": 0}"#,
        )
        .expect("parse");
        assert_eq!(exec.outcome(), Some(ExecutionOutcome::Failed));
    }

    #[test]
    fn test_running_has_no_outcome() {
        let exec = Execution::parse(
            r#"{"metadata": {"name": "e1"}, "status": {"startTime": "2026-03-01T10:00:00Z", "conditions": [{"type": "Completed", "status": "Unknown"}]}}"#,
        )
        .expect("parse");
        assert_eq!(exec.outcome(), None);
    }

    #[test]
    fn test_task_duration() {
        let exec = Execution::parse(
            r#"{"name": "e1", "startTime": "2026-03-01T10:00:00Z", "completionTime": "2026-03-01T10:01:05Z", "succeededCount": 1}"#,
        )
        .expect("parse");
        assert_eq!(exec.task_duration(), Some(Duration::seconds(65)));
    }
}
