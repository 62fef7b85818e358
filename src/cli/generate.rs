//! `discovery-schema generate`: emit the JSON-schema-of-schemas describing the shape a task or
//! workflow upload must conform to, so operators can validate their own files offline before
//! submitting them.

use anyhow::{Context, Result};
use std::path::Path;

const TASK_SCHEMA_DOCUMENT: &str = r#"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "title": "TaskSchema",
  "type": "object",
  "required": ["id", "image", "command"],
  "properties": {
    "version": { "type": "string", "default": "1.0" },
    "id": { "type": "string", "pattern": "^[a-z0-9-./]+$" },
    "name": { "type": "string" },
    "description": { "type": "string" },
    "image": { "type": "string" },
    "command": { "type": "string" },
    "parameters": {
      "type": "object",
      "additionalProperties": { "$ref": "#/definitions/parameter" }
    },
    "outputs": {
      "type": "object",
      "additionalProperties": { "$ref": "#/definitions/output" }
    }
  },
  "definitions": {
    "parameter": {
      "type": "object",
      "required": ["schema"],
      "properties": {
        "description": { "type": "string" },
        "schema": { "type": "object" },
        "default": {},
        "is_file": { "type": "boolean", "default": false },
        "file_type": { "type": "string", "enum": ["txt", "json", "jsonl", "csv"] }
      }
    },
    "output": {
      "type": "object",
      "required": ["schema"],
      "properties": {
        "description": { "type": "string" },
        "schema": { "type": "object" },
        "is_file": { "type": "boolean", "default": false },
        "file_type": { "type": "string", "enum": ["txt", "json", "jsonl", "csv"] }
      }
    }
  }
}
"#;

const WORKFLOW_SCHEMA_DOCUMENT: &str = r#"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "title": "WorkflowSchema",
  "type": "object",
  "required": ["id"],
  "properties": {
    "id": { "type": "string", "pattern": "^[a-z0-9-./]+$" },
    "name": { "type": "string" },
    "description": { "type": "string" },
    "tasks": { "type": "array", "items": { "type": "string" } }
  }
}
"#;

pub fn generate(output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("could not create output directory '{}'", output_dir.display()))?;

    let task_path = output_dir.join("task.schema.json");
    std::fs::write(&task_path, TASK_SCHEMA_DOCUMENT)
        .with_context(|| format!("could not write '{}'", task_path.display()))?;

    let workflow_path = output_dir.join("workflow.schema.json");
    std::fs::write(&workflow_path, WORKFLOW_SCHEMA_DOCUMENT)
        .with_context(|| format!("could not write '{}'", workflow_path.display()))?;

    println!("wrote {}", task_path.display());
    println!("wrote {}", workflow_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_both_schema_documents() {
        let dir = tempfile::tempdir().unwrap();
        generate(dir.path()).unwrap();

        assert!(dir.path().join("task.schema.json").exists());
        assert!(dir.path().join("workflow.schema.json").exists());

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("task.schema.json")).unwrap()).unwrap();
        assert_eq!(parsed["title"], "TaskSchema");
    }
}
