use serde::{Deserialize, Serialize};

/// A multi-task DAG definition. Workflows are registrable and validatable but never dispatched —
/// orchestrating their constituent tasks is out of scope here — so this is intentionally a much
/// thinner shape than [`crate::models::TaskSchema`]: just enough structure for the registry and
/// the `validate` CLI subcommand to check.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkflowSchema {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Registry ids of the tasks this workflow references, in no particular declared order.
    #[serde(default)]
    pub tasks: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults_for_optional_fields() {
        let workflow: WorkflowSchema = serde_json::from_str(r#"{"id": "recon-flow"}"#).unwrap();
        assert_eq!(workflow.id, "recon-flow");
        assert!(workflow.name.is_none());
        assert!(workflow.tasks.is_empty());
    }
}
