use thiserror::Error;

/// Detailed error types for batch generation and job bookkeeping.
///
/// Item-level failures never surface here: the item generator folds them into
/// sentinel records. What remains are request validation problems, failures of
/// the collaborators the job driver depends on, and batch-structural faults.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Service returned {status}: {message}")]
    Service { status: u16, message: String },

    #[error("Rate limited by generation service: {message}")]
    RateLimited { message: String },

    #[error("Empty response from generation service")]
    EmptyResponse,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Status store error: {0}")]
    Store(String),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The fan-in collected a different number of records than requested.
    ///
    /// Per-item isolation should make this unreachable; observing it means a
    /// result was lost somewhere between spawn and collection.
    #[error("Generated record count mismatch: expected {expected}, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Batch cancelled after {completed} of {total} items")]
    Cancelled { completed: usize, total: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Mock handler error: {0}")]
    Mock(String),

    #[error("Context error: {0}")]
    Context(String),
}

impl BatchError {
    /// Create a service error from an HTTP status and response body.
    pub fn service(status: u16, body: &str) -> Self {
        let message = Self::extract_service_message(body)
            .unwrap_or_else(|| Self::truncate_for_display(body, 500));
        if status == 429 {
            Self::RateLimited { message }
        } else {
            Self::Service { status, message }
        }
    }

    /// Whether the error was raised by the store layer.
    ///
    /// The job driver treats these as fatal: there is nowhere left to record the outcome.
    pub fn is_store_error(&self) -> bool {
        #[cfg(feature = "redis")]
        {
            if matches!(self, Self::Redis(_)) {
                return true;
            }
        }
        matches!(self, Self::Store(_))
    }

    /// Check if this error is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Pull `error.message` out of an OpenAI-style error body.
    fn extract_service_message(body: &str) -> Option<String> {
        let json = serde_json::from_str::<serde_json::Value>(body).ok()?;
        json.get("error")
            .and_then(|e| e.get("message").or(Some(e)))
            .and_then(|m| m.as_str())
            .map(str::to_string)
    }

    pub(crate) fn truncate_for_display(text: &str, max_len: usize) -> String {
        if text.len() <= max_len {
            return text.to_string();
        }
        let mut cut = max_len;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}... [truncated, {} total chars]", &text[..cut], text.len())
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;

/// Extension trait for adding context to errors.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn with_context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<BatchError>> ResultExt<T> for std::result::Result<T, E> {
    fn with_context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let base_err = e.into();
            BatchError::Context(format!("{}: {}", context.into(), base_err))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_error_extracts_openai_message() {
        let body = r#"{"error": {"message": "model overloaded", "type": "server_error"}}"#;
        let err = BatchError::service(503, body);
        assert!(matches!(
            err,
            BatchError::Service { status: 503, ref message } if message == "model overloaded"
        ));
    }

    #[test]
    fn service_error_maps_429_to_rate_limited() {
        let err = BatchError::service(429, "quota exceeded");
        assert!(matches!(err, BatchError::RateLimited { ref message } if message == "quota exceeded"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "题".repeat(10);
        let out = BatchError::truncate_for_display(&text, 4);
        assert!(out.starts_with('题'));
        assert!(out.contains("truncated"));
    }

    #[test]
    fn with_context_wraps_message() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        let err = res.with_context("writing artifact").unwrap_err();
        assert!(err.to_string().contains("writing artifact"));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn store_errors_are_classified() {
        assert!(BatchError::Store("down".into()).is_store_error());
        assert!(!BatchError::EmptyResponse.is_store_error());
        assert!(BatchError::Cancelled { completed: 1, total: 2 }.is_cancelled());
    }
}
