use serde::{Deserialize, Serialize};

use crate::{
    error::{BatchError, Result},
    schema::{FieldSchema, FieldSpec},
};

/// Default lifetime of a job status record, in seconds.
pub const DEFAULT_TASK_EXPIRE_SECS: u64 = 3600;
/// Shortest accepted status lifetime, in seconds.
pub const MIN_TASK_EXPIRE_SECS: u64 = 600;
/// Longest accepted status lifetime, in seconds.
pub const MAX_TASK_EXPIRE_SECS: u64 = 7200;

/// Largest batch a single request may ask for.
pub const MAX_COUNT: usize = 500;
/// Largest concurrency a single request may ask for.
pub const MAX_CONCURRENT_TASKS: usize = 20;

/// Sampling parameters forwarded verbatim to the generation service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            max_tokens: 1000,
        }
    }
}

impl SamplingParams {
    fn validate(&self) -> Result<()> {
        check_range("temperature", self.temperature, 0.0, 2.0)?;
        check_range("top_p", self.top_p, 0.0, 1.0)?;
        check_range("presence_penalty", self.presence_penalty, -2.0, 2.0)?;
        check_range("frequency_penalty", self.frequency_penalty, -2.0, 2.0)?;
        check_range("max_tokens", self.max_tokens, 100, 4000)?;
        Ok(())
    }
}

/// Immutable, validated request to generate `count` records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RequestPayload", into = "RequestPayload")]
pub struct GenerationRequest {
    count: usize,
    sampling: SamplingParams,
    concurrent_tasks: usize,
    progress_interval: u64,
    task_expire: u64,
    system_prompt: String,
    user_prompt: String,
    field_schema: FieldSchema,
}

impl GenerationRequest {
    /// Start a builder with the mandatory prompts and field list.
    pub fn builder(
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
        fields: Vec<FieldSpec>,
    ) -> GenerationRequestBuilder {
        GenerationRequestBuilder::new(system_prompt, user_prompt, fields)
    }

    /// Parse and validate a JSON payload.
    pub fn from_json(payload: &str) -> Result<Self> {
        let raw: RequestPayload = serde_json::from_str(payload)?;
        Self::try_from(raw)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn sampling(&self) -> &SamplingParams {
        &self.sampling
    }

    pub fn concurrent_tasks(&self) -> usize {
        self.concurrent_tasks
    }

    /// Suggested client poll interval in milliseconds.
    pub fn progress_interval(&self) -> u64 {
        self.progress_interval
    }

    /// Status record lifetime in seconds.
    pub fn task_expire(&self) -> u64 {
        self.task_expire
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn user_prompt(&self) -> &str {
        &self.user_prompt
    }

    pub fn field_schema(&self) -> &FieldSchema {
        &self.field_schema
    }
}

/// Wire shape of a generation request, as submitted by clients.
///
/// Everything except `count`, the prompts and the field list has a default.
/// Converting into a [`GenerationRequest`] runs the full validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPayload {
    pub count: usize,
    #[serde(default = "defaults::temperature")]
    pub temperature: f64,
    #[serde(default = "defaults::top_p")]
    pub top_p: f64,
    #[serde(default)]
    pub presence_penalty: f64,
    #[serde(default)]
    pub frequency_penalty: f64,
    #[serde(default = "defaults::max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "defaults::concurrent_tasks")]
    pub concurrent_tasks: usize,
    #[serde(default = "defaults::progress_interval")]
    pub progress_interval: u64,
    #[serde(default = "defaults::task_expire")]
    pub task_expire: u64,
    pub system_prompt: String,
    pub user_prompt: String,
    #[serde(alias = "field_schema")]
    pub json_fields: Vec<FieldSpec>,
}

mod defaults {
    pub fn temperature() -> f64 {
        0.7
    }
    pub fn top_p() -> f64 {
        0.9
    }
    pub fn max_tokens() -> u32 {
        1000
    }
    pub fn concurrent_tasks() -> usize {
        5
    }
    pub fn progress_interval() -> u64 {
        1000
    }
    pub fn task_expire() -> u64 {
        super::DEFAULT_TASK_EXPIRE_SECS
    }
}

impl TryFrom<RequestPayload> for GenerationRequest {
    type Error = BatchError;

    fn try_from(raw: RequestPayload) -> Result<Self> {
        let sampling = SamplingParams {
            temperature: raw.temperature,
            top_p: raw.top_p,
            presence_penalty: raw.presence_penalty,
            frequency_penalty: raw.frequency_penalty,
            max_tokens: raw.max_tokens,
        };
        sampling.validate()?;

        check_range("count", raw.count, 1, MAX_COUNT)?;
        check_range("concurrent_tasks", raw.concurrent_tasks, 1, MAX_CONCURRENT_TASKS)?;
        check_range("progress_interval", raw.progress_interval, 500, 5000)?;
        check_range(
            "task_expire",
            raw.task_expire,
            MIN_TASK_EXPIRE_SECS,
            MAX_TASK_EXPIRE_SECS,
        )?;

        if raw.system_prompt.trim().is_empty() {
            return Err(BatchError::Validation(
                "system_prompt must not be empty".to_string(),
            ));
        }
        if raw.user_prompt.trim().is_empty() {
            return Err(BatchError::Validation(
                "user_prompt must not be empty".to_string(),
            ));
        }

        Ok(Self {
            count: raw.count,
            sampling,
            concurrent_tasks: raw.concurrent_tasks,
            progress_interval: raw.progress_interval,
            task_expire: raw.task_expire,
            system_prompt: raw.system_prompt,
            user_prompt: raw.user_prompt,
            field_schema: FieldSchema::new(raw.json_fields)?,
        })
    }
}

impl From<GenerationRequest> for RequestPayload {
    fn from(req: GenerationRequest) -> Self {
        Self {
            count: req.count,
            temperature: req.sampling.temperature,
            top_p: req.sampling.top_p,
            presence_penalty: req.sampling.presence_penalty,
            frequency_penalty: req.sampling.frequency_penalty,
            max_tokens: req.sampling.max_tokens,
            concurrent_tasks: req.concurrent_tasks,
            progress_interval: req.progress_interval,
            task_expire: req.task_expire,
            system_prompt: req.system_prompt,
            user_prompt: req.user_prompt,
            json_fields: req.field_schema.into(),
        }
    }
}

/// Fluent builder for [`GenerationRequest`].
pub struct GenerationRequestBuilder {
    raw: RequestPayload,
}

impl GenerationRequestBuilder {
    pub fn new(
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
        fields: Vec<FieldSpec>,
    ) -> Self {
        Self {
            raw: RequestPayload {
                count: 1,
                temperature: defaults::temperature(),
                top_p: defaults::top_p(),
                presence_penalty: 0.0,
                frequency_penalty: 0.0,
                max_tokens: defaults::max_tokens(),
                concurrent_tasks: defaults::concurrent_tasks(),
                progress_interval: defaults::progress_interval(),
                task_expire: defaults::task_expire(),
                system_prompt: system_prompt.into(),
                user_prompt: user_prompt.into(),
                json_fields: fields,
            },
        }
    }

    /// Number of records to generate (1..=500).
    pub fn count(mut self, count: usize) -> Self {
        self.raw.count = count;
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.raw.temperature = temperature;
        self
    }

    pub fn top_p(mut self, top_p: f64) -> Self {
        self.raw.top_p = top_p;
        self
    }

    pub fn presence_penalty(mut self, penalty: f64) -> Self {
        self.raw.presence_penalty = penalty;
        self
    }

    pub fn frequency_penalty(mut self, penalty: f64) -> Self {
        self.raw.frequency_penalty = penalty;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.raw.max_tokens = max_tokens;
        self
    }

    /// Maximum number of in-flight generation calls (1..=20).
    pub fn concurrent_tasks(mut self, concurrent: usize) -> Self {
        self.raw.concurrent_tasks = concurrent;
        self
    }

    pub fn progress_interval(mut self, millis: u64) -> Self {
        self.raw.progress_interval = millis;
        self
    }

    /// Status record lifetime in seconds (600..=7200).
    pub fn task_expire(mut self, secs: u64) -> Self {
        self.raw.task_expire = secs;
        self
    }

    /// Validate and build the request.
    pub fn build(self) -> Result<GenerationRequest> {
        GenerationRequest::try_from(self.raw)
    }
}

fn check_range<T>(name: &str, value: T, min: T, max: T) -> Result<()>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    // NaN fails both comparisons and is rejected here too.
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(BatchError::Validation(format!(
            "{name} must be between {min} and {max}, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new("question", "Question stem"),
            FieldSpec::new("answer", "Correct answer"),
        ]
    }

    #[test]
    fn builder_applies_defaults() {
        let req = GenerationRequest::builder("sys", "user", fields())
            .count(3)
            .build()
            .unwrap();
        assert_eq!(req.count(), 3);
        assert_eq!(req.concurrent_tasks(), 5);
        assert_eq!(req.task_expire(), DEFAULT_TASK_EXPIRE_SECS);
        assert_eq!(req.sampling(), &SamplingParams::default());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let cases = [
            GenerationRequest::builder("s", "u", fields()).count(0).build(),
            GenerationRequest::builder("s", "u", fields()).count(501).build(),
            GenerationRequest::builder("s", "u", fields()).temperature(2.5).build(),
            GenerationRequest::builder("s", "u", fields()).top_p(f64::NAN).build(),
            GenerationRequest::builder("s", "u", fields()).max_tokens(50).build(),
            GenerationRequest::builder("s", "u", fields()).concurrent_tasks(21).build(),
            GenerationRequest::builder("s", "u", fields()).task_expire(599).build(),
            GenerationRequest::builder("s", "u", fields()).progress_interval(100).build(),
        ];
        for case in cases {
            assert!(matches!(case, Err(BatchError::Validation(_))));
        }
    }

    #[test]
    fn rejects_blank_prompts() {
        let err = GenerationRequest::builder("  ", "u", fields()).build().unwrap_err();
        assert!(err.to_string().contains("system_prompt"));
        let err = GenerationRequest::builder("s", "", fields()).build().unwrap_err();
        assert!(err.to_string().contains("user_prompt"));
    }

    #[test]
    fn parses_wire_payload_with_defaults() {
        let payload = r#"{
            "count": 10,
            "temperature": 1.2,
            "system_prompt": "You write exam questions.",
            "user_prompt": "One algebra question.",
            "json_fields": [
                {"name": "question", "description": "Question stem"},
                {"name": "analysis", "description": "Worked solution"}
            ]
        }"#;
        let req = GenerationRequest::from_json(payload).unwrap();
        assert_eq!(req.count(), 10);
        assert_eq!(req.sampling().temperature, 1.2);
        assert_eq!(req.sampling().top_p, 0.9);
        assert_eq!(req.progress_interval(), 1000);
        assert_eq!(req.field_schema().len(), 2);
    }

    #[test]
    fn wire_payload_accepts_field_schema_alias() {
        let payload = r#"{
            "count": 1,
            "system_prompt": "s",
            "user_prompt": "u",
            "field_schema": [{"name": "a", "description": "A"}]
        }"#;
        assert!(GenerationRequest::from_json(payload).is_ok());
    }

    #[test]
    fn wire_payload_rejects_duplicate_fields() {
        let payload = r#"{
            "count": 1,
            "system_prompt": "s",
            "user_prompt": "u",
            "json_fields": [
                {"name": "a", "description": "A"},
                {"name": "a", "description": "again"}
            ]
        }"#;
        assert!(GenerationRequest::from_json(payload).is_err());
    }
}
