//! Field schema and dotted-path class resolution

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::class::LabelClass;

/// Resolves a dotted field path to the label class stored there
pub trait ClassResolver: Send + Sync {
    fn resolve(&self, path: &str) -> Option<LabelClass>;
}

/// One field of a dataset schema
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ftype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_doc_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Schema>,
}

/// Nested field schema, keyed by field name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema(pub IndexMap<String, SchemaField>);

impl Schema {
    /// Look up a field by dotted path, descending through `fields`
    pub fn field(&self, path: &str) -> Option<&SchemaField> {
        let mut segments = path.split('.');
        let mut field = self.0.get(segments.next()?)?;
        for segment in segments {
            field = field.fields.as_ref()?.0.get(segment)?;
        }
        Some(field)
    }
}

impl ClassResolver for Schema {
    fn resolve(&self, path: &str) -> Option<LabelClass> {
        self.field(path)?
            .embedded_doc_type
            .as_deref()
            .and_then(LabelClass::from_name)
    }
}

impl ClassResolver for HashMap<String, LabelClass> {
    fn resolve(&self, path: &str) -> Option<LabelClass> {
        self.get(path).copied()
    }
}
