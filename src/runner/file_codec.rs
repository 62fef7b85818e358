//! Parameter/output file (de)serialization rules: txt/json/jsonl/csv, using the `csv` crate for
//! row-oriented (de)serialization (see `DESIGN.md`).

use crate::models::FileType;
use serde_json::{Map, Value};

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("value is not serializable as '{file_type}': {reason}")]
    TypeError {
        file_type: FileType,
        reason: String,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Serialize a parameter value to the file content that gets written to the run volume before
/// the container starts.
pub fn serialize_param(value: &Value, file_type: FileType) -> Result<String, CodecError> {
    match file_type {
        FileType::Txt => match value {
            Value::String(s) => Ok(s.clone()),
            Value::Array(items) => {
                let mut lines = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => lines.push(s.clone()),
                        other => {
                            return Err(CodecError::TypeError {
                                file_type,
                                reason: format!("array item {other} is not a string"),
                            })
                        }
                    }
                }
                Ok(lines.join("\n"))
            }
            other => Err(CodecError::TypeError {
                file_type,
                reason: format!("{other} is neither a string nor a list of strings"),
            }),
        },
        FileType::Json => match value {
            Value::Object(_) => Ok(serde_json::to_string(value)?),
            other => Err(CodecError::TypeError {
                file_type,
                reason: format!("{other} is not an object"),
            }),
        },
        FileType::Jsonl => match value {
            Value::Array(items) => {
                let mut lines = Vec::with_capacity(items.len());
                for item in items {
                    if !item.is_object() {
                        return Err(CodecError::TypeError {
                            file_type,
                            reason: format!("array item {item} is not an object"),
                        });
                    }
                    lines.push(serde_json::to_string(item)?);
                }
                Ok(lines.join("\n"))
            }
            other => Err(CodecError::TypeError {
                file_type,
                reason: format!("{other} is not a list of objects"),
            }),
        },
        FileType::Csv => serialize_csv(value, file_type),
    }
}

fn serialize_csv(value: &Value, file_type: FileType) -> Result<String, CodecError> {
    let rows: Vec<&Map<String, Value>> = match value {
        Value::Object(obj) => vec![obj],
        Value::Array(items) => {
            if items.is_empty() {
                // An empty row list writes nothing at all, not even a blank header line.
                return Ok(String::new());
            }

            let mut rows = Vec::with_capacity(items.len());
            for item in items {
                match item.as_object() {
                    Some(obj) => rows.push(obj),
                    None => {
                        return Err(CodecError::TypeError {
                            file_type,
                            reason: format!("array item {item} is not an object"),
                        })
                    }
                }
            }
            rows
        }
        other => {
            return Err(CodecError::TypeError {
                file_type,
                reason: format!("{other} is neither an object nor a list of objects"),
            })
        }
    };

    let header: Vec<String> = rows[0].keys().cloned().collect();

    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(&header)?;

    for row in &rows {
        let record: Vec<String> = header
            .iter()
            .map(|key| match row.get(key) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            })
            .collect();
        writer.write_record(&record)?;
    }

    let bytes = writer.into_inner().map_err(|e| CodecError::TypeError {
        file_type,
        reason: e.to_string(),
    })?;

    Ok(String::from_utf8(bytes).expect("csv writer only emits utf-8 for utf-8 input"))
}

/// Deserialize an output file's content, read back from the run volume after the container
/// exits, into a JSON value.
pub fn deserialize_output(content: &str, file_type: FileType) -> Result<Value, CodecError> {
    match file_type {
        FileType::Txt => Ok(Value::Array(
            content.lines().map(|line| Value::String(line.to_string())).collect(),
        )),
        FileType::Json => Ok(serde_json::from_str(content)?),
        FileType::Jsonl => {
            let mut items = Vec::new();
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                items.push(serde_json::from_str(line)?);
            }
            Ok(Value::Array(items))
        }
        FileType::Csv => {
            if content.trim().is_empty() {
                return Ok(Value::Array(vec![]));
            }

            let mut reader = csv::ReaderBuilder::new().from_reader(content.as_bytes());
            let headers = reader.headers()?.clone();

            let mut rows = Vec::new();
            for record in reader.records() {
                let record = record?;
                let mut row = Map::new();
                for (key, value) in headers.iter().zip(record.iter()) {
                    row.insert(key.to_string(), Value::String(value.to_string()));
                }
                rows.push(Value::Object(row));
            }

            Ok(Value::Array(rows))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn txt_serializes_string_list_as_lines() {
        let out = serialize_param(&json!(["a", "b", "c"]), FileType::Txt).unwrap();
        assert_eq!(out, "a\nb\nc");
    }

    #[test]
    fn txt_rejects_non_string_non_list() {
        let err = serialize_param(&json!(5), FileType::Txt).unwrap_err();
        assert!(matches!(err, CodecError::TypeError { .. }));
    }

    #[test]
    fn json_round_trips_an_object() {
        let value = json!({"hits": 3});
        let serialized = serialize_param(&value, FileType::Json).unwrap();
        let deserialized = deserialize_output(&serialized, FileType::Json).unwrap();
        assert_eq!(deserialized, value);
    }

    #[test]
    fn jsonl_round_trips_a_list_of_objects() {
        let value = json!([{"a": 1}, {"b": 2}]);
        let serialized = serialize_param(&value, FileType::Jsonl).unwrap();
        let deserialized = deserialize_output(&serialized, FileType::Jsonl).unwrap();
        assert_eq!(deserialized, value);
    }

    #[test]
    fn csv_round_trips_uniform_rows_modulo_string_coercion() {
        let value = json!([{"a": "1", "b": "2"}, {"a": "3", "b": "4"}]);
        let serialized = serialize_param(&value, FileType::Csv).unwrap();
        let deserialized = deserialize_output(&serialized, FileType::Csv).unwrap();
        assert_eq!(deserialized, value);
    }

    #[test]
    fn csv_fills_missing_keys_with_empty_string() {
        let value = json!([{"a": "1", "b": "2"}, {"a": "3"}]);
        let serialized = serialize_param(&value, FileType::Csv).unwrap();
        assert!(serialized.contains("3,\n") || serialized.trim_end().ends_with("3,"));
    }

    #[test]
    fn csv_empty_list_writes_nothing() {
        let out = serialize_param(&json!([]), FileType::Csv).unwrap();
        assert_eq!(out, "");
    }
}
