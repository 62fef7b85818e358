//! `discovery-schema validate`: check a task or workflow schema file (JSON or YAML) without
//! registering it. Exit code 1 on any `ValidateError`, 0 on success.

use crate::models::{TaskSchema, WorkflowSchema};
use crate::schema;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TargetKind {
    Task,
    Workflow,
    Auto,
}

#[derive(thiserror::Error, Debug)]
pub enum ValidateError {
    #[error("could not read '{path}': {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("'{0}' has no recognized extension (.json, .yaml, .yml)")]
    UnknownExtension(PathBuf),

    #[error("could not determine task/workflow kind for '{0}'; pass -t explicitly")]
    AmbiguousKind(PathBuf),

    #[error("'{path}' is not valid JSON/YAML: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("'{0}' failed schema compilation: {1}")]
    Compile(PathBuf, schema::SchemaError),
}

/// Validate every recognized schema file directly under `dir`. Returns every failure found
/// rather than stopping at the first, matching the Schema Compiler's own "report everything"
/// philosophy.
pub fn validate_dir(dir: &Path, kind: TargetKind) -> Vec<ValidateError> {
    let mut errors = Vec::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(source) => {
            errors.push(ValidateError::Read { path: dir.to_path_buf(), source });
            return errors;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if !has_recognized_extension(&path) {
            continue;
        }
        if let Err(e) = validate_file(&path, kind) {
            errors.push(e);
        }
    }

    errors
}

pub fn validate_file(path: &Path, kind: TargetKind) -> Result<(), ValidateError> {
    let kind = match kind {
        TargetKind::Auto => detect_kind(path)?,
        other => other,
    };

    let content = std::fs::read_to_string(path)
        .map_err(|source| ValidateError::Read { path: path.to_path_buf(), source })?;

    match kind {
        TargetKind::Task => {
            let parsed: TaskSchema = parse(path, &content)?;
            schema::compile_task(parsed).map_err(|e| ValidateError::Compile(path.to_path_buf(), e))?;
        }
        TargetKind::Workflow => {
            let _parsed: WorkflowSchema = parse(path, &content)?;
        }
        TargetKind::Auto => unreachable!("resolved above"),
    }

    println!("{} is valid", path.display());
    Ok(())
}

fn parse<T: serde::de::DeserializeOwned>(path: &Path, content: &str) -> Result<T, ValidateError> {
    match extension(path).as_deref() {
        Some("json") => serde_json::from_str(content)
            .map_err(|e| ValidateError::Parse { path: path.to_path_buf(), message: e.to_string() }),
        Some("yaml") | Some("yml") => serde_yaml::from_str(content)
            .map_err(|e| ValidateError::Parse { path: path.to_path_buf(), message: e.to_string() }),
        _ => Err(ValidateError::UnknownExtension(path.to_path_buf())),
    }
}

fn has_recognized_extension(path: &Path) -> bool {
    matches!(extension(path).as_deref(), Some("json") | Some("yaml") | Some("yml"))
}

fn extension(path: &Path) -> Option<String> {
    path.extension().and_then(|e| e.to_str()).map(str::to_lowercase)
}

/// Auto-detect by filename suffix: `<name>.task.<ext>` or `<name>.workflow.<ext>`.
fn detect_kind(path: &Path) -> Result<TargetKind, ValidateError> {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();

    if stem.ends_with(".task") {
        Ok(TargetKind::Task)
    } else if stem.ends_with(".workflow") {
        Ok(TargetKind::Workflow)
    } else {
        Err(ValidateError::AmbiguousKind(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_task_and_workflow_by_suffix() {
        assert_eq!(detect_kind(Path::new("nmap.task.json")).unwrap(), TargetKind::Task);
        assert_eq!(detect_kind(Path::new("recon.workflow.yaml")).unwrap(), TargetKind::Workflow);
    }

    #[test]
    fn ambiguous_filename_is_rejected() {
        assert!(detect_kind(Path::new("nmap.json")).is_err());
    }

    #[test]
    fn validates_a_well_formed_task_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nmap.task.json");
        std::fs::write(
            &path,
            r#"{
                "id": "nmap-scan",
                "image": "nmap:latest",
                "command": "nmap $target -oX $RUN_DIR/$report",
                "parameters": {"target": {"schema": {"type": "string"}}},
                "outputs": {"report": {"schema": {"type": "object"}, "is_file": true, "file_type": "json"}}
            }"#,
        )
        .unwrap();

        validate_file(&path, TargetKind::Auto).unwrap();
    }

    #[test]
    fn rejects_a_task_file_with_an_undeclared_command_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nmap.task.json");
        std::fs::write(
            &path,
            r#"{"id": "nmap-scan", "image": "nmap:latest", "command": "nmap $missing"}"#,
        )
        .unwrap();

        let err = validate_file(&path, TargetKind::Auto).unwrap_err();
        assert!(matches!(err, ValidateError::Compile(_, _)));
    }

    #[test]
    fn validates_a_workflow_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recon.workflow.yaml");
        std::fs::write(&path, "id: recon-flow\ntasks:\n  - nmap-scan\n").unwrap();

        validate_file(&path, TargetKind::Auto).unwrap();
    }
}
