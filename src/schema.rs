//! Caller-supplied output field definitions.
//!
//! A [`FieldSchema`] is the ordered list of keys every generated record must
//! carry. It is validated once when constructed, so the rest of the crate can
//! rely on it being non-empty with unique, non-blank names.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BatchError, Result};

/// A single named output field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub description: String,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Ordered, validated list of [`FieldSpec`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FieldSpec>", into = "Vec<FieldSpec>")]
pub struct FieldSchema {
    fields: Vec<FieldSpec>,
}

impl FieldSchema {
    /// Build a schema, rejecting empty lists, blank names and duplicates.
    pub fn new(fields: Vec<FieldSpec>) -> Result<Self> {
        if fields.is_empty() {
            return Err(BatchError::Validation(
                "field schema must declare at least one field".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            if field.name.trim().is_empty() {
                return Err(BatchError::Validation(
                    "field names must not be empty".to_string(),
                ));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(BatchError::Validation(format!(
                    "duplicate field name '{}'",
                    field.name
                )));
            }
        }

        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn description_of(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.description.as_str())
    }

    /// The JSON object shown to the model as the shape to return.
    ///
    /// Each key maps to a placeholder derived from its description, in schema order.
    pub fn example_shape(&self) -> Value {
        let mut shape = Map::with_capacity(self.fields.len());
        for field in &self.fields {
            shape.insert(
                field.name.clone(),
                Value::String(format!("{} content", field.description)),
            );
        }
        Value::Object(shape)
    }
}

impl TryFrom<Vec<FieldSpec>> for FieldSchema {
    type Error = BatchError;

    fn try_from(fields: Vec<FieldSpec>) -> Result<Self> {
        Self::new(fields)
    }
}

impl From<FieldSchema> for Vec<FieldSpec> {
    fn from(schema: FieldSchema) -> Self {
        schema.fields
    }
}
