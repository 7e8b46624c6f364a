//! Task result payload parsing

use serde_json::{Map, Value};

use crate::error::WebhookError;

/// Fields the provider echoes back in task data that are not request
/// parameters
const CONTROL_FIELDS: [&str; 4] = ["tag", "postback_url", "pingback_url", "postback_data"];

/// Placeholder providers substitute with the tag; seen unsubstituted when
/// no tag was sent
const TAG_PLACEHOLDER: &str = "$tag";

/// First task of a result payload
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub id: String,
    /// Path the provider recorded for the task, `/`-joined
    pub path: Option<String>,
    /// Echoed request data
    pub data: Value,
    pub cost: Option<f64>,
}

impl TaskResult {
    /// Tag echoed in the task data, if any
    pub fn tag(&self) -> Option<&str> {
        self.data.get("tag").and_then(Value::as_str)
    }
}

/// Validate a decoded result payload and extract its first task.
///
/// The envelope and the task must both report `success_code`.
pub fn parse_task(body: &[u8], success_code: i64) -> Result<TaskResult, WebhookError> {
    if body.is_empty() {
        return Err(WebhookError::EmptyBody);
    }

    let payload: Value =
        serde_json::from_slice(body).map_err(|e| WebhookError::InvalidJson(e.to_string()))?;
    let Value::Object(envelope) = &payload else {
        return Err(WebhookError::InvalidJson("payload is not an object".to_string()));
    };

    let code = envelope
        .get("status_code")
        .and_then(Value::as_i64)
        .ok_or_else(|| WebhookError::InvalidJson("missing status_code".to_string()))?;
    check_code(code, envelope, success_code)?;

    let Some(Value::Object(task)) = envelope
        .get("tasks")
        .and_then(Value::as_array)
        .and_then(|tasks| tasks.first())
    else {
        return Err(WebhookError::MissingTask);
    };

    let id = task
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or(WebhookError::MissingTaskId)?
        .to_string();

    if let Some(task_code) = task.get("status_code").and_then(Value::as_i64) {
        check_code(task_code, task, success_code)?;
    }

    let path = match task.get("path") {
        Some(Value::Array(segments)) => Some(
            segments
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("/"),
        ),
        Some(Value::String(path)) => Some(path.clone()),
        _ => None,
    }
    .filter(|p| !p.is_empty());

    Ok(TaskResult {
        id,
        path,
        data: task.get("data").cloned().unwrap_or(Value::Object(Map::new())),
        cost: task
            .get("cost")
            .or_else(|| envelope.get("cost"))
            .and_then(Value::as_f64),
    })
}

fn check_code(code: i64, object: &Map<String, Value>, success_code: i64) -> Result<(), WebhookError> {
    if code == success_code {
        return Ok(());
    }
    Err(WebhookError::ProviderFailure {
        code,
        message: object
            .get("status_message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

/// Request parameters recovered from echoed task data
pub fn task_params(data: &Value) -> Value {
    match data {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !CONTROL_FIELDS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        _ => Value::Object(Map::new()),
    }
}

/// First usable tag among `candidates`. Blank values and the unsubstituted
/// placeholder count as absent.
pub fn resolve_tag<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|tag| !tag.is_empty() && *tag != TAG_PLACEHOLDER)
        .map(str::to_string)
}

/// Endpoint from a recorded task path: the version prefix and trailing task
/// id are dropped.
pub fn endpoint_from_path(path: &str, version: &str, task_id: &str) -> Option<String> {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let version = version.trim_matches('/');
    if !version.is_empty() && segments.first() == Some(&version) {
        segments.remove(0);
    }
    if segments.last() == Some(&task_id) {
        segments.pop();
    }

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}
