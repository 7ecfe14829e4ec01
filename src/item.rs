//! Single-record generation with failure folding.
//!
//! [`ItemGenerator::generate`] always returns a record. Malformed output,
//! missing fields and service errors all become sentinel records carrying the
//! diagnostic text, so one bad item never takes the batch down.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{
    client::{GenerationCall, GenerationClient},
    error::BatchError,
    limiter::ConcurrencyLimiter,
    models::{GenerationResult, ItemFailure},
    request::GenerationRequest,
    schema::FieldSchema,
};

/// Stateless per-item worker shared by every item of one batch.
#[derive(Clone)]
pub struct ItemGenerator {
    client: Arc<dyn GenerationClient>,
    schema: FieldSchema,
    call: Arc<GenerationCall>,
}

impl ItemGenerator {
    /// Prepare the shared call for `request`. The prompt is assembled once.
    pub fn new(client: Arc<dyn GenerationClient>, request: &GenerationRequest) -> Self {
        let schema = request.field_schema().clone();
        let system_prompt = format!(
            "{}\n\n{}",
            format_preamble(&schema),
            request.system_prompt()
        );
        Self {
            client,
            schema,
            call: Arc::new(GenerationCall {
                system_prompt,
                user_prompt: request.user_prompt().to_string(),
                sampling: *request.sampling(),
            }),
        }
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    /// Generate item `index` while holding a permit from `limiter`.
    pub async fn generate(&self, index: usize, limiter: &ConcurrencyLimiter) -> GenerationResult {
        let response = limiter.run(self.client.generate(&self.call)).await;
        match response {
            Ok(raw) => self.interpret(index, &raw),
            Err(err) => {
                warn!(item = index + 1, error = %err, "Generation call failed");
                GenerationResult::sentinel(
                    &self.schema,
                    index,
                    ItemFailure::Service,
                    format!("error: {err}"),
                )
            }
        }
    }

    /// Turn raw service text into a record or a sentinel.
    pub fn interpret(&self, index: usize, raw: &str) -> GenerationResult {
        let content = strip_code_fences(raw);

        let object = match serde_json::from_str::<Value>(content) {
            Ok(Value::Object(object)) => object,
            Ok(_) => {
                debug!(item = index + 1, "Response was JSON but not an object");
                return self.invalid_json(index, "expected a JSON object", content);
            }
            Err(err) => {
                debug!(item = index + 1, error = %err, "Response was not valid JSON");
                return self.invalid_json(index, &err.to_string(), content);
            }
        };

        let missing = self.missing_fields(&object);
        if !missing.is_empty() {
            debug!(item = index + 1, ?missing, "Response lacks declared fields");
            return GenerationResult::sentinel(
                &self.schema,
                index,
                ItemFailure::MissingFields,
                format!(
                    "error: response JSON is missing required fields {}\nraw content: {}",
                    missing.join(", "),
                    BatchError::truncate_for_display(content, 2000)
                ),
            );
        }

        GenerationResult::from_object(&self.schema, object)
    }

    fn missing_fields(&self, object: &Map<String, Value>) -> Vec<String> {
        self.schema
            .names()
            .filter(|name| !object.contains_key(*name))
            .map(str::to_string)
            .collect()
    }

    fn invalid_json(&self, index: usize, reason: &str, content: &str) -> GenerationResult {
        GenerationResult::sentinel(
            &self.schema,
            index,
            ItemFailure::InvalidJson,
            format!(
                "error: response is not valid JSON ({reason})\nraw content: {}",
                BatchError::truncate_for_display(content, 2000)
            ),
        )
    }
}

/// Instruction block requiring a bare JSON object with exactly the schema keys.
pub fn format_preamble(schema: &FieldSchema) -> String {
    let shape = serde_json::to_string_pretty(&schema.example_shape())
        .unwrap_or_else(|_| "{}".to_string());
    format!(
        "Return the result strictly in the following JSON format:\n\
         {shape}\n\n\
         Requirements:\n\
         1. The output must be valid JSON.\n\
         2. It must contain every field above, with exactly these field names.\n\
         3. Do not add any other fields.\n\
         4. Do not include any explanatory text.\n\
         5. Do not wrap the JSON in markdown code fences.\n\
         6. Every field value must be a string, never an object or an array."
    )
}

/// Trim the text and drop a leading and a trailing markdown fence.
///
/// An opening fence loses its language tag line; a fence glued to the JSON
/// on the same line loses only its backticks.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        text = match rest.split_once('\n') {
            Some((tag, body)) if tag.trim().chars().all(|c| c.is_ascii_alphanumeric()) => body,
            _ => rest,
        };
    }
    if text.ends_with("```") {
        text = text.trim_end_matches('`');
    }
    text.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClient;
    use crate::models::{ANALYSIS_KEY, QUESTION_KEY};
    use crate::schema::FieldSpec;

    fn request() -> GenerationRequest {
        GenerationRequest::builder(
            "You write quiz questions.",
            "One geography question.",
            vec![
                FieldSpec::new("stem", "Question stem"),
                FieldSpec::new("answer", "Answer"),
            ],
        )
        .count(2)
        .build()
        .unwrap()
    }

    fn generator_with(
        handler: impl Fn(crate::client::MockRequest) -> crate::Result<String> + Send + Sync + 'static,
    ) -> ItemGenerator {
        ItemGenerator::new(Arc::new(MockClient::new(handler)), &request())
    }

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  {\"a\": 1}  "), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{}\n```\n"), "{}");
        assert_eq!(strip_code_fences("```{}```"), "{}");
    }

    #[test]
    fn strips_fences_glued_to_json() {
        assert_eq!(
            strip_code_fences("```json\n{\n\"a\":\"x\"}```"),
            "{\n\"a\":\"x\"}"
        );
        assert_eq!(
            strip_code_fences("```{\n\"a\":\"x\"\n}\n```"),
            "{\n\"a\":\"x\"\n}"
        );
    }

    #[tokio::test]
    async fn glued_closing_fence_still_parses() {
        let generator = generator_with(|_| {
            Ok("```json\n{\n\"stem\": \"Q\",\n\"answer\": \"A\"}```".to_string())
        });
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let record = generator.generate(0, &limiter).await;
        assert!(!record.is_sentinel());
        assert_eq!(record.get("answer"), Some("A"));
    }

    #[test]
    fn preamble_lists_every_field() {
        let req = request();
        let preamble = format_preamble(req.field_schema());
        assert!(preamble.contains("\"stem\": \"Question stem content\""));
        assert!(preamble.contains("\"answer\""));
        assert!(preamble.contains("markdown"));
    }

    #[tokio::test]
    async fn combines_preamble_with_caller_prompt() {
        let generator = generator_with(|req| {
            assert!(req.system_prompt.starts_with("Return the result strictly"));
            assert!(req.system_prompt.ends_with("\n\nYou write quiz questions."));
            assert_eq!(req.user_prompt, "One geography question.");
            Ok(r#"{"stem": "Capital of Peru?", "answer": "Lima"}"#.to_string())
        });
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let record = generator.generate(0, &limiter).await;
        assert!(!record.is_sentinel());
        assert_eq!(record.get("answer"), Some("Lima"));
    }

    #[tokio::test]
    async fn fenced_response_parses() {
        let generator = generator_with(|_| {
            Ok("```json\n{\"stem\": \"Q\", \"answer\": \"A\"}\n```".to_string())
        });
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let record = generator.generate(0, &limiter).await;
        assert_eq!(record.get("stem"), Some("Q"));
    }

    #[tokio::test]
    async fn invalid_json_becomes_sentinel() {
        let generator = generator_with(|_| Ok("Sure! Here is your question.".to_string()));
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let record = generator.generate(1, &limiter).await;
        assert_eq!(record.failure(), Some(ItemFailure::InvalidJson));
        assert_eq!(record.get("stem"), Some(""));
        assert_eq!(record.get(QUESTION_KEY), Some("[generation failed] item 2"));
        let analysis = record.get(ANALYSIS_KEY).unwrap();
        assert!(analysis.contains("not valid JSON"));
        assert!(analysis.contains("Sure! Here is your question."));
    }

    #[tokio::test]
    async fn json_array_becomes_sentinel() {
        let generator = generator_with(|_| Ok("[1, 2]".to_string()));
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let record = generator.generate(0, &limiter).await;
        assert_eq!(record.failure(), Some(ItemFailure::InvalidJson));
    }

    #[tokio::test]
    async fn missing_fields_are_named() {
        let generator = generator_with(|_| Ok(r#"{"stem": "Q"}"#.to_string()));
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let record = generator.generate(0, &limiter).await;
        assert_eq!(record.failure(), Some(ItemFailure::MissingFields));
        assert!(record.get(ANALYSIS_KEY).unwrap().contains("missing required fields answer"));
        assert!(record.covers(generator.schema()));
    }

    #[tokio::test]
    async fn service_error_becomes_sentinel() {
        let generator = generator_with(|_| Err(BatchError::service(429, "quota exceeded")));
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let record = generator.generate(4, &limiter).await;
        assert_eq!(record.failure(), Some(ItemFailure::Service));
        assert_eq!(record.get(QUESTION_KEY), Some("[generation failed] item 5"));
        assert!(record.get(ANALYSIS_KEY).unwrap().contains("quota exceeded"));
        assert_eq!(limiter.available(), 1);
    }
}
