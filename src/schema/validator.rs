//! A generic JSON-schema-fragment interpreter: parses each parameter/output schema fragment into
//! a small tagged tree and walks it directly against incoming values.

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum SchemaNodeError {
    #[error("type not specified in schema fragment")]
    MissingType,
    #[error("unsupported schema type '{0}'")]
    UnsupportedType(String),
    #[error("array schema fragment must declare an 'items' schema")]
    MissingItems,
}

/// A parsed JSON-schema fragment, reduced to the handful of shapes this system needs to
/// check parameter/output values against.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    String { enum_values: Option<Vec<String>> },
    Integer,
    Number,
    Boolean,
    Array(Box<SchemaNode>),
    /// `None` means a free-form object (no `properties` declared).
    Object(Option<HashMap<String, SchemaNode>>),
    Null,
}

/// Parse a raw JSON-schema fragment (as found in `parameters[k].schema` / `outputs[k].schema`)
/// into a [`SchemaNode`]. Unknown `type` values fail compilation.
pub fn parse_schema_node(fragment: &Value) -> Result<SchemaNode, SchemaNodeError> {
    let type_name = fragment
        .get("type")
        .and_then(Value::as_str)
        .ok_or(SchemaNodeError::MissingType)?;

    match type_name {
        "string" => {
            let enum_values = fragment.get("enum").and_then(Value::as_array).map(|vs| {
                vs.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            });
            Ok(SchemaNode::String { enum_values })
        }
        "integer" => Ok(SchemaNode::Integer),
        "number" => Ok(SchemaNode::Number),
        "boolean" => Ok(SchemaNode::Boolean),
        "null" => Ok(SchemaNode::Null),
        "array" => {
            let items = fragment.get("items").ok_or(SchemaNodeError::MissingItems)?;
            Ok(SchemaNode::Array(Box::new(parse_schema_node(items)?)))
        }
        "object" => {
            let Some(properties) = fragment.get("properties").and_then(Value::as_object) else {
                return Ok(SchemaNode::Object(None));
            };

            let mut fields = HashMap::with_capacity(properties.len());
            for (key, prop_fragment) in properties {
                fields.insert(key.clone(), parse_schema_node(prop_fragment)?);
            }
            Ok(SchemaNode::Object(Some(fields)))
        }
        other => Err(SchemaNodeError::UnsupportedType(other.to_string())),
    }
}

/// A single validation failure: the path to the offending value, a human-readable message, and
/// a machine-matchable error kind tag.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ValidationErrorDetail {
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Walk `node` against `value`, appending any mismatches found to `details` (qualified by
/// `loc`, the path from the validated root to this value).
pub fn validate_value(node: &SchemaNode, value: &Value, loc: &[String], details: &mut Vec<ValidationErrorDetail>) {
    let mismatch = |kind: &str, msg: String| ValidationErrorDetail {
        loc: loc.to_vec(),
        msg,
        kind: kind.to_string(),
    };

    match node {
        SchemaNode::String { enum_values } => match value.as_str() {
            None => details.push(mismatch("type_error.string", "value is not a valid string".into())),
            Some(s) => {
                if let Some(allowed) = enum_values {
                    if !allowed.iter().any(|a| a == s) {
                        details.push(mismatch(
                            "value_error.enum",
                            format!("value is not a valid enumeration member; permitted: {:?}", allowed),
                        ));
                    }
                }
            }
        },
        SchemaNode::Integer => {
            if !value.is_i64() && !value.is_u64() {
                details.push(mismatch("type_error.integer", "value is not a valid integer".into()));
            }
        }
        SchemaNode::Number => {
            if !value.is_number() {
                details.push(mismatch("type_error.number", "value is not a valid number".into()));
            }
        }
        SchemaNode::Boolean => {
            if !value.is_boolean() {
                details.push(mismatch("type_error.bool", "value is not a valid boolean".into()));
            }
        }
        SchemaNode::Null => {
            if !value.is_null() {
                details.push(mismatch("type_error.none", "value is not null".into()));
            }
        }
        SchemaNode::Array(item_node) => match value.as_array() {
            None => details.push(mismatch("type_error.list", "value is not a valid array".into())),
            Some(items) => {
                for (index, item) in items.iter().enumerate() {
                    let mut item_loc = loc.to_vec();
                    item_loc.push(index.to_string());
                    validate_value(item_node, item, &item_loc, details);
                }
            }
        },
        SchemaNode::Object(fields) => match value.as_object() {
            None => details.push(mismatch("type_error.dict", "value is not a valid object".into())),
            Some(obj) => {
                let Some(fields) = fields else {
                    return;
                };
                for (field_name, field_node) in fields {
                    let mut field_loc = loc.to_vec();
                    field_loc.push(field_name.clone());
                    match obj.get(field_name) {
                        Some(field_value) => validate_value(field_node, field_value, &field_loc, details),
                        None => details.push(ValidationErrorDetail {
                            loc: field_loc,
                            msg: "field required".to_string(),
                            kind: "value_error.missing".to_string(),
                        }),
                    }
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::string("string", SchemaNode::String { enum_values: None })]
    #[case::integer("integer", SchemaNode::Integer)]
    #[case::number("number", SchemaNode::Number)]
    #[case::boolean("boolean", SchemaNode::Boolean)]
    #[case::null("null", SchemaNode::Null)]
    fn parses_every_supported_primitive(#[case] type_name: &str, #[case] expected: SchemaNode) {
        let fragment = json!({ "type": type_name });
        assert_eq!(parse_schema_node(&fragment).unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_type() {
        let fragment = json!({ "type": "date-time" });
        assert_eq!(
            parse_schema_node(&fragment),
            Err(SchemaNodeError::UnsupportedType("date-time".into()))
        );
    }

    #[test]
    fn array_without_items_fails() {
        let fragment = json!({ "type": "array" });
        assert_eq!(parse_schema_node(&fragment), Err(SchemaNodeError::MissingItems));
    }

    #[test]
    fn object_without_properties_is_free_form() {
        let fragment = json!({ "type": "object" });
        let node = parse_schema_node(&fragment).unwrap();
        assert_eq!(node, SchemaNode::Object(None));

        let mut details = Vec::new();
        validate_value(&node, &json!({"anything": "goes"}), &[], &mut details);
        assert!(details.is_empty());
    }

    #[test]
    fn string_enum_rejects_values_outside_the_closed_set() {
        let node = parse_schema_node(&json!({"type": "string", "enum": ["a", "b"]})).unwrap();
        let mut details = Vec::new();
        validate_value(&node, &json!("c"), &["target".into()], &mut details);
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].kind, "value_error.enum");
    }

    #[test]
    fn integer_rejects_strings() {
        let node = SchemaNode::Integer;
        let mut details = Vec::new();
        validate_value(&node, &json!("not-a-number"), &["n".into()], &mut details);
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].kind, "type_error.integer");
    }
}
