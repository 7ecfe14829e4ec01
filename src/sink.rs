//! Artifact writers for finished batches.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::{
    error::{Result, ResultExt},
    models::{GenerationResult, ANALYSIS_KEY, QUESTION_KEY},
    schema::FieldSchema,
};

/// Turns a validated record list into a downloadable artifact.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persist `records` for `job_id` and return a reference to the artifact.
    async fn write(
        &self,
        job_id: &str,
        schema: &FieldSchema,
        records: &[GenerationResult],
    ) -> Result<String>;
}

/// Writes `records_{job_id}.json` under an output directory.
///
/// The file is a JSON array with one object per record. Keys are the field
/// descriptions, in schema order, so the file reads like a labelled table.
/// Only declared fields are written unless diagnostics are enabled.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
    include_diagnostics: bool,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            include_diagnostics: false,
        }
    }

    /// Also write sentinel `question`/`analysis` values for undeclared keys.
    pub fn with_diagnostics(mut self, include: bool) -> Self {
        self.include_diagnostics = include;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("records_{job_id}.json"))
    }

    fn row(&self, schema: &FieldSchema, record: &GenerationResult) -> Value {
        let mut row = Map::with_capacity(schema.len() + 2);
        for field in schema.fields() {
            let value = record.get(&field.name).unwrap_or_default();
            row.insert(field.description.clone(), Value::String(value.to_string()));
        }
        if self.include_diagnostics && record.is_sentinel() {
            for key in [QUESTION_KEY, ANALYSIS_KEY] {
                if !schema.contains(key) {
                    if let Some(value) = record.get(key) {
                        row.insert(key.to_string(), Value::String(value.to_string()));
                    }
                }
            }
        }
        Value::Object(row)
    }
}

#[async_trait]
impl ResultSink for JsonFileSink {
    #[instrument(skip_all, fields(job_id = %job_id, records = records.len()))]
    async fn write(
        &self,
        job_id: &str,
        schema: &FieldSchema,
        records: &[GenerationResult],
    ) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(format!("creating output directory {}", self.dir.display()))?;

        let rows: Vec<Value> = records.iter().map(|r| self.row(schema, r)).collect();
        let payload = serde_json::to_vec_pretty(&rows)?;

        let path = self.path_for(job_id);
        tokio::fs::write(&path, payload)
            .await
            .with_context(format!("writing {}", path.display()))?;

        debug!(path = %path.display(), "Artifact written");
        Ok(path.to_string_lossy().into_owned())
    }
}
