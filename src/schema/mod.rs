//! The Schema Compiler: turns a raw, operator-submitted [`crate::models::TaskSchema`] into a
//! [`crate::models::CompiledTask`] the runner can actually drive a container from.
//!
//! Compilation does three things: parses every parameter/output JSON-schema fragment into a
//! [`SchemaNode`], extracts the command template's placeholders and resolves each one to a
//! parameter or output, and rejects a command that references an identifier no parameter or
//! output declares.

mod template;
mod validator;

pub use template::{safe_substitute, RUN_DIR};
pub use validator::{validate_value, ValidationErrorDetail};
pub use validator::{SchemaNode, SchemaNodeError};

use crate::models::{CompiledTask, FileType, TaskSchema};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("unsupported task schema version '{0}', expected '{}'", crate::models::TASK_SCHEMA_VERSION)]
    UnsupportedVersion(String),
    #[error("parameter '{name}' schema is invalid: {source}")]
    InvalidParameterSchema { name: String, source: SchemaNodeError },
    #[error("output '{name}' schema is invalid: {source}")]
    InvalidOutputSchema { name: String, source: SchemaNodeError },
    #[error("command references undeclared identifier(s): {0:?}")]
    InvalidCommand(Vec<String>),
}

/// Which side of a task invocation a command placeholder feeds: an input parameter read
/// before the container starts, or an output collected after it exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderRole {
    Parameter,
    Output,
}

/// A single `$NAME` identifier found in a task's command template, resolved to the
/// parameter or output it refers to.
#[derive(Debug, Clone)]
pub struct CommandPlaceholder {
    pub role: PlaceholderRole,
    pub is_file: bool,
    pub file_type: Option<FileType>,
}

/// Compile a raw schema into a [`CompiledTask`]. See the module docs for what this checks.
pub fn compile_task(schema: TaskSchema) -> Result<CompiledTask, SchemaError> {
    if schema.version != crate::models::TASK_SCHEMA_VERSION {
        return Err(SchemaError::UnsupportedVersion(schema.version));
    }

    let mut parameters_schema = HashMap::with_capacity(schema.parameters.len());
    for (name, decl) in &schema.parameters {
        let node = validator::parse_schema_node(&decl.schema).map_err(|source| {
            SchemaError::InvalidParameterSchema { name: name.clone(), source }
        })?;
        parameters_schema.insert(name.clone(), node);
    }

    let mut outputs_schema = HashMap::with_capacity(schema.outputs.len());
    for (name, decl) in &schema.outputs {
        let node = validator::parse_schema_node(&decl.schema)
            .map_err(|source| SchemaError::InvalidOutputSchema { name: name.clone(), source })?;
        outputs_schema.insert(name.clone(), node);
    }

    let command_placeholders = resolve_placeholders(&schema)?;

    Ok(CompiledTask {
        id: schema.id,
        name: schema.name,
        image: schema.image,
        command: schema.command,
        parameters: schema.parameters,
        outputs: schema.outputs,
        parameters_schema,
        outputs_schema,
        command_placeholders,
    })
}

fn resolve_placeholders(schema: &TaskSchema) -> Result<HashMap<String, CommandPlaceholder>, SchemaError> {
    let referenced: HashSet<String> = template::identifiers(&schema.command).into_iter().collect();

    let mut resolved = HashMap::new();
    let mut invalid = Vec::new();

    for name in &referenced {
        if name == RUN_DIR {
            continue;
        }

        if let Some(decl) = schema.parameters.get(name) {
            resolved.insert(
                name.clone(),
                CommandPlaceholder {
                    role: PlaceholderRole::Parameter,
                    is_file: decl.is_file,
                    file_type: decl.file_type,
                },
            );
        } else if let Some(decl) = schema.outputs.get(name) {
            resolved.insert(
                name.clone(),
                CommandPlaceholder {
                    role: PlaceholderRole::Output,
                    is_file: decl.is_file,
                    file_type: decl.file_type,
                },
            );
        } else {
            invalid.push(name.clone());
        }
    }

    if !invalid.is_empty() {
        invalid.sort();
        return Err(SchemaError::InvalidCommand(invalid));
    }

    Ok(resolved)
}

/// Validate `parameters` (a JSON object keyed by parameter name) against a compiled task's
/// declared parameter schemas. Returns every mismatch found rather than stopping at the first.
pub fn validate_parameters(task: &CompiledTask, parameters: &Value) -> Vec<ValidationErrorDetail> {
    let mut details = Vec::new();

    let Some(obj) = parameters.as_object() else {
        details.push(ValidationErrorDetail {
            loc: vec![],
            msg: "parameters must be a JSON object".to_string(),
            kind: "type_error.dict".to_string(),
        });
        return details;
    };

    for (name, node) in &task.parameters_schema {
        match obj.get(name) {
            Some(value) => validate_value(node, value, &[name.clone()], &mut details),
            None => {
                let has_default = task
                    .parameters
                    .get(name)
                    .map(|decl| decl.default.is_some())
                    .unwrap_or(false);
                if !has_default {
                    details.push(ValidationErrorDetail {
                        loc: vec![name.clone()],
                        msg: "field required".to_string(),
                        kind: "value_error.missing".to_string(),
                    });
                }
            }
        }
    }

    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap as Map;

    fn schema_with_command(command: impl Into<String>) -> TaskSchema {
        let mut parameters = Map::new();
        parameters.insert(
            "target".to_string(),
            crate::models::ParameterDecl {
                description: String::new(),
                schema: json!({"type": "string"}),
                default: None,
                is_file: false,
                file_type: None,
            },
        );
        let mut outputs = Map::new();
        outputs.insert(
            "report".to_string(),
            crate::models::OutputDecl {
                description: String::new(),
                schema: json!({"type": "object"}),
                is_file: true,
                file_type: Some(FileType::Json),
            },
        );

        TaskSchema {
            version: crate::models::TASK_SCHEMA_VERSION.to_string(),
            id: "nmap-scan".to_string(),
            name: None,
            description: None,
            image: "nmap:latest".to_string(),
            command: command.into(),
            parameters,
            outputs,
        }
    }

    #[test]
    fn compiles_a_valid_schema() {
        let schema = schema_with_command("nmap $target -oX $RUN_DIR/$report");
        let compiled = compile_task(schema).expect("should compile");
        assert_eq!(compiled.command_placeholders.len(), 2);
        assert!(matches!(
            compiled.command_placeholders["target"].role,
            PlaceholderRole::Parameter
        ));
        assert!(matches!(
            compiled.command_placeholders["report"].role,
            PlaceholderRole::Output
        ));
    }

    #[test]
    fn rejects_command_referencing_undeclared_identifier() {
        let schema = schema_with_command("nmap $target -oX $RUN_DIR/$missing");
        let err = compile_task(schema).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidCommand(names) if names == vec!["missing".to_string()]));
    }

    #[test]
    fn validate_parameters_reports_missing_required_field() {
        let schema = schema_with_command("nmap $target -oX $RUN_DIR/$report");
        let task = compile_task(schema).unwrap();
        let details = validate_parameters(&task, &json!({}));
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].kind, "value_error.missing");
    }
}
