//! Task data model.
//!
//! The backend sends loosely-typed `{action_type, action_data}` objects;
//! decoding folds them into a closed set of action variants with a
//! catch-all, so a kind this worker does not know can never crash it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// One unit of work received from the control plane.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Backend-assigned identifier, unique per delivery.
    pub id: String,
    pub action: TaskAction,
    /// Human-readable description, also the shell-command fallback.
    pub description: String,
}

/// Decoded action payload.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskAction {
    /// Run a command line under a shell.
    Shell {
        command: String,
        cwd: Option<String>,
    },
    /// Run a script body via a fresh interpreter, no shell.
    Script {
        script: String,
        cwd: Option<String>,
    },
    /// Anything this worker does not recognize; acknowledged, never executed.
    Other { kind: String },
}

/// Wire shape of a task as the backend sends it.
#[derive(Debug, Default, Deserialize)]
struct RawTask {
    #[serde(default)]
    id: String,
    #[serde(default)]
    action_type: String,
    #[serde(default)]
    action_data: Option<Value>,
    #[serde(default)]
    action_description: String,
}

impl From<RawTask> for Task {
    fn from(raw: RawTask) -> Self {
        let data = raw.action_data.unwrap_or(Value::Null);
        let cwd = data
            .get("cwd")
            .and_then(Value::as_str)
            .map(str::to_string);

        let action = match raw.action_type.as_str() {
            "shell" | "command" | "execute" => TaskAction::Shell {
                command: data
                    .get("command")
                    .and_then(Value::as_str)
                    .unwrap_or(&raw.action_description)
                    .to_string(),
                cwd,
            },
            "python" | "script" => TaskAction::Script {
                script: data
                    .get("script")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                cwd,
            },
            other => TaskAction::Other {
                kind: other.to_string(),
            },
        };

        Self {
            id: raw.id,
            action,
            description: raw.action_description,
        }
    }
}

impl<'de> Deserialize<'de> for Task {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        RawTask::deserialize(deserializer).map(Task::from)
    }
}

/// Terminal status of an executed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Normalized outcome of executing a task. Always produced — execution
/// never silently disappears.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub data: Value,
}

impl TaskResult {
    pub fn completed(data: Value) -> Self {
        Self {
            status: TaskStatus::Completed,
            data,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            data: json!({ "error": error.into() }),
        }
    }

    /// Body posted to the result endpoint.
    pub fn report_body(&self, task_id: &str) -> Value {
        json!({
            "task_id": task_id,
            "result_status": self.status,
            "result_data": self.data,
        })
    }
}

/// One poll cycle's worth of work and chatter.
#[derive(Debug, Default, Deserialize)]
pub struct PollResponse {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub messages: Vec<AgentMessage>,
}

/// Informational message from another agent; surfaced, never acted on.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentMessage {
    #[serde(default)]
    pub from_agent_id: String,
    #[serde(default)]
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: Value) -> Task {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn shell_task_decodes_command_and_cwd() {
        let task = decode(json!({
            "id": "t1",
            "action_type": "shell",
            "action_data": {"command": "ls -la", "cwd": "/srv"},
            "action_description": "List files"
        }));

        assert_eq!(task.id, "t1");
        assert_eq!(
            task.action,
            TaskAction::Shell {
                command: "ls -la".into(),
                cwd: Some("/srv".into())
            }
        );
    }

    #[test]
    fn shell_aliases_map_to_the_same_action() {
        for kind in ["shell", "command", "execute"] {
            let task = decode(json!({
                "id": "t1",
                "action_type": kind,
                "action_data": {"command": "true"},
                "action_description": ""
            }));
            assert!(matches!(task.action, TaskAction::Shell { .. }), "kind {kind}");
        }
    }

    #[test]
    fn shell_command_falls_back_to_description() {
        let task = decode(json!({
            "id": "t2",
            "action_type": "command",
            "action_description": "echo hello"
        }));

        assert_eq!(
            task.action,
            TaskAction::Shell {
                command: "echo hello".into(),
                cwd: None
            }
        );
    }

    #[test]
    fn script_task_decodes_body() {
        let task = decode(json!({
            "id": "t3",
            "action_type": "python",
            "action_data": {"script": "print('hi')"},
            "action_description": "Say hi"
        }));

        assert_eq!(
            task.action,
            TaskAction::Script {
                script: "print('hi')".into(),
                cwd: None
            }
        );
    }

    #[test]
    fn missing_script_decodes_as_empty() {
        let task = decode(json!({
            "id": "t4",
            "action_type": "script",
            "action_description": "broken"
        }));

        assert_eq!(
            task.action,
            TaskAction::Script {
                script: String::new(),
                cwd: None
            }
        );
    }

    #[test]
    fn unknown_kind_decodes_as_other() {
        let task = decode(json!({
            "id": "t5",
            "action_type": "reboot_datacenter",
            "action_description": "Please don't"
        }));

        assert_eq!(
            task.action,
            TaskAction::Other {
                kind: "reboot_datacenter".into()
            }
        );
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(TaskStatus::Completed).unwrap(),
            json!("completed")
        );
        assert_eq!(
            serde_json::to_value(TaskStatus::Failed).unwrap(),
            json!("failed")
        );
    }

    #[test]
    fn report_body_matches_the_backend_contract() {
        let result = TaskResult::completed(json!({"exit_code": 0, "output": "ok"}));
        assert_eq!(
            result.report_body("t9"),
            json!({
                "task_id": "t9",
                "result_status": "completed",
                "result_data": {"exit_code": 0, "output": "ok"}
            })
        );
    }

    #[test]
    fn failed_result_carries_the_error_text() {
        let result = TaskResult::failed("spawn failed");
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.data, json!({"error": "spawn failed"}));
    }

    #[test]
    fn poll_response_defaults_missing_fields() {
        let response: PollResponse = serde_json::from_value(json!({})).unwrap();
        assert!(response.tasks.is_empty());
        assert!(response.messages.is_empty());

        let response: PollResponse = serde_json::from_value(json!({
            "tasks": [{"id": "a", "action_type": "noop", "action_description": "x"}],
            "messages": [{"from_agent_id": "peer", "content": "hello"}]
        }))
        .unwrap();
        assert_eq!(response.tasks.len(), 1);
        assert_eq!(response.messages[0].from_agent_id, "peer");
    }
}
