use crate::schema::{CommandPlaceholder, SchemaNode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The only task schema version currently understood by the compiler.
pub const TASK_SCHEMA_VERSION: &str = "1.0";

/// File encodings a parameter or output may be materialized as on the run volume.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, strum::Display, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FileType {
    Txt,
    Json,
    Jsonl,
    Csv,
}

/// A single declared parameter of a task, as written in the raw schema.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ParameterDecl {
    #[serde(default)]
    pub description: String,
    pub schema: serde_json::Value,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default, rename = "is_file")]
    pub is_file: bool,
    #[serde(default, rename = "file_type")]
    pub file_type: Option<FileType>,
}

/// A single declared output of a task, as written in the raw schema.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutputDecl {
    #[serde(default)]
    pub description: String,
    pub schema: serde_json::Value,
    #[serde(default, rename = "is_file")]
    pub is_file: bool,
    #[serde(default, rename = "file_type")]
    pub file_type: Option<FileType>,
}

/// The raw, as-submitted shape of a task schema. This is what arrives over the registry
/// upload path and what `crate::schema::compile` turns into a [`CompiledTask`].
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TaskSchema {
    #[serde(default = "default_version")]
    pub version: String,
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub image: String,
    pub command: String,
    #[serde(default)]
    pub parameters: HashMap<String, ParameterDecl>,
    #[serde(default)]
    pub outputs: HashMap<String, OutputDecl>,
}

fn default_version() -> String {
    TASK_SCHEMA_VERSION.to_string()
}

/// A task schema after compilation: its parameter/output schemas have been parsed into
/// checkable [`SchemaNode`] trees and its command template's placeholders have been resolved
/// to a role. This is what the [`crate::runner::TaskRunner`] actually drives a run from.
#[derive(Debug, Clone)]
pub struct CompiledTask {
    pub id: String,
    pub name: Option<String>,
    pub image: String,
    pub command: String,
    pub parameters: HashMap<String, ParameterDecl>,
    pub outputs: HashMap<String, OutputDecl>,
    pub parameters_schema: HashMap<String, SchemaNode>,
    pub outputs_schema: HashMap<String, SchemaNode>,
    pub command_placeholders: HashMap<String, CommandPlaceholder>,
}

impl CompiledTask {
    /// The name a run should be recorded under: the task's declared name, falling back to its id.
    pub fn run_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}
