use chrono::{DateTime, Utc};
use lazy_regex::regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryIdError {
    #[error("id '{0}' does not match the required pattern ^[a-z0-9-./]+$")]
    InvalidFormat(String),
}

/// Identifier for a [`RegistryEntry`]. Validated once at construction so that every other
/// component can treat a `RegistryId` as already-correct.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct RegistryId(String);

impl RegistryId {
    pub fn new(id: impl Into<String>) -> Result<Self, RegistryIdError> {
        let id = id.into();
        if regex!(r"^[a-z0-9-./]+$").is_match(&id) {
            Ok(Self(id))
        } else {
            Err(RegistryIdError::InvalidFormat(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RegistryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for RegistryId {
    type Error = RegistryIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RegistryId::new(value)
    }
}

impl From<RegistryId> for String {
    fn from(value: RegistryId) -> Self {
        value.0
    }
}

/// The kind of schema a registry entry holds. Only `Task` has a runtime in this crate;
/// `Workflow` entries can be registered and listed but are never dispatched.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum RegistryKind {
    Task,
    Workflow,
}

/// A row in the schema registry: the operator-submitted schema, stored and served verbatim.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegistryEntry {
    pub id: RegistryId,
    #[serde(rename = "type")]
    pub kind: RegistryKind,
    pub name: Option<String>,
    pub description: Option<String>,
    pub schema: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RegistryEntry {
    pub fn new(id: RegistryId, kind: RegistryKind, schema: serde_json::Value) -> Self {
        let now = super::now();
        let name = schema
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let description = schema
            .get("description")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Self {
            id,
            kind,
            name,
            description,
            schema,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_lowercase_path_like_ids() {
        assert!(RegistryId::new("nmap-scan").is_ok());
        assert!(RegistryId::new("security/nmap-scan.v1").is_ok());
    }

    #[test]
    fn rejects_uppercase_and_spaces() {
        assert!(RegistryId::new("Nmap-Scan").is_err());
        assert!(RegistryId::new("nmap scan").is_err());
    }
}
