use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::FieldSchema;

/// Diagnostic key that sentinel records use for the failure headline.
pub const QUESTION_KEY: &str = "question";
/// Diagnostic key that sentinel records use for the failure details.
pub const ANALYSIS_KEY: &str = "analysis";

/// Why an item ended up as a sentinel record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemFailure {
    /// The service answered, but not with a JSON object.
    InvalidJson,
    /// The object parsed but lacked declared fields.
    MissingFields,
    /// The service call itself failed (transport, timeout, HTTP status, quota).
    Service,
    /// The item task died before producing a record.
    Aborted,
}

/// One generated record: declared field name to string value, in schema order.
///
/// Sentinel records additionally carry `question`/`analysis` diagnostics and a
/// [`ItemFailure`] classification. The classification is not part of the
/// serialized record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationResult {
    fields: Map<String, Value>,
    #[serde(skip)]
    failure: Option<ItemFailure>,
}

impl GenerationResult {
    /// Build a record from a parsed object, keeping only declared fields.
    ///
    /// Non-string values are kept as their compact JSON text; absent fields are
    /// backfilled with an empty string.
    pub fn from_object(schema: &FieldSchema, mut object: Map<String, Value>) -> Self {
        let mut fields = Map::with_capacity(schema.len());
        for name in schema.names() {
            let value = match object.remove(name) {
                Some(Value::String(s)) => s,
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            fields.insert(name.to_string(), Value::String(value));
        }
        Self {
            fields,
            failure: None,
        }
    }

    /// Build a placeholder record for a failed item.
    ///
    /// Every declared field is empty, then `question` and `analysis` are set
    /// (overwriting declared fields of the same name).
    pub fn sentinel(
        schema: &FieldSchema,
        index: usize,
        failure: ItemFailure,
        analysis: impl Into<String>,
    ) -> Self {
        let mut fields = Map::with_capacity(schema.len() + 2);
        for name in schema.names() {
            fields.insert(name.to_string(), Value::String(String::new()));
        }
        fields.insert(
            QUESTION_KEY.to_string(),
            Value::String(format!("[generation failed] item {}", index + 1)),
        );
        fields.insert(ANALYSIS_KEY.to_string(), Value::String(analysis.into()));
        Self {
            fields,
            failure: Some(failure),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `Some` when this record is a sentinel.
    pub fn failure(&self) -> Option<ItemFailure> {
        self.failure
    }

    pub fn is_sentinel(&self) -> bool {
        self.failure.is_some()
    }

    /// Whether every declared field is present.
    pub fn covers(&self, schema: &FieldSchema) -> bool {
        schema.names().all(|name| self.fields.contains_key(name))
    }
}

/// Completion progress of a job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    pub percentage: f64,
}

impl Progress {
    /// Progress at `current` of `total`, with `current` capped at `total`.
    pub fn new(current: usize, total: usize) -> Self {
        let current = current.min(total);
        let percentage = if total == 0 {
            0.0
        } else {
            ((current as f64 / total as f64) * 100.0 * 100.0).round() / 100.0
        };
        Self {
            current,
            total,
            percentage,
        }
    }

    pub fn start(total: usize) -> Self {
        Self::new(0, total)
    }

    pub fn is_complete(&self) -> bool {
        self.current == self.total
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Running => next.is_terminal() || next == Self::Running,
            Self::Completed | Self::Error | Self::Cancelled => false,
        }
    }
}

/// Stored status record of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub status: TaskState,
    pub progress: Progress,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub ttl_seconds: u64,
    /// Suggested client poll interval in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_interval: Option<u64>,
}

impl TaskStatus {
    /// A freshly submitted job, already running.
    pub fn running(total: usize, ttl_seconds: u64) -> Self {
        Self {
            status: TaskState::Running,
            progress: Progress::start(total),
            start_time: Utc::now(),
            completion_time: None,
            output_ref: None,
            error_message: None,
            ttl_seconds,
            progress_interval: None,
        }
    }

    pub fn with_progress_interval(mut self, millis: u64) -> Self {
        self.progress_interval = Some(millis);
        self
    }

    /// Terminal success, with progress pinned at `total/total`.
    pub fn completed(mut self, output_ref: impl Into<String>) -> Self {
        self.status = TaskState::Completed;
        self.progress = Progress::new(self.progress.total, self.progress.total);
        self.output_ref = Some(output_ref.into());
        self.completion_time = Some(Utc::now());
        self
    }

    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.status = TaskState::Error;
        self.error_message = Some(message.into());
        self.completion_time = Some(Utc::now());
        self
    }

    pub fn cancelled(mut self) -> Self {
        self.status = TaskState::Cancelled;
        self.completion_time = Some(Utc::now());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
