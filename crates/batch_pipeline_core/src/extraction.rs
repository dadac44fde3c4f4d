//! Structured field extraction from free-text model responses.
//!
//! Each field is pulled either with a JSON path (`$.a.b[0]`, `$['key']`,
//! negative indices count from the end) applied to the JSON embedded in the
//! response, or with a regex capture group. Extraction problems are reported
//! per row and never fail a batch.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("Field '{field}': invalid JSON path '{path}': {reason}")]
    InvalidPath {
        field: String,
        path: String,
        reason: String,
    },
    #[error("Field '{field}': invalid regex '{pattern}': {reason}")]
    InvalidRegex {
        field: String,
        pattern: String,
        reason: String,
    },
    #[error("Field '{field}': regex has no capture group {group}")]
    MissingGroup { field: String, group: usize },
    #[error("Duplicate output field '{0}'")]
    DuplicateField(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OutputSchema {
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub source: FieldSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cast: Option<FieldCast>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldSource {
    JsonPath {
        path: String,
    },
    Regex {
        pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldCast {
    String,
    Integer,
    Number,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Key(String),
    Index(i64),
}

#[derive(Debug, Clone)]
enum CompiledSource {
    JsonPath(Vec<PathSegment>),
    Regex { regex: Regex, group: usize },
}

#[derive(Debug, Clone)]
struct CompiledField {
    name: String,
    source: CompiledSource,
    cast: Option<FieldCast>,
    required: bool,
}

#[derive(Debug, Clone)]
pub struct CompiledSchema {
    fields: Vec<CompiledField>,
}

/// Values pulled from one response, in schema order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub values: Vec<(String, Value)>,
    pub errors: Vec<String>,
}

impl OutputSchema {
    pub fn compile(&self) -> Result<CompiledSchema, ExtractionError> {
        let mut fields: Vec<CompiledField> = Vec::with_capacity(self.fields.len());
        for spec in &self.fields {
            if fields.iter().any(|field| field.name == spec.name) {
                return Err(ExtractionError::DuplicateField(spec.name.clone()));
            }
            let source = match &spec.source {
                FieldSource::JsonPath { path } => {
                    CompiledSource::JsonPath(parse_path(path).map_err(|reason| {
                        ExtractionError::InvalidPath {
                            field: spec.name.clone(),
                            path: path.clone(),
                            reason,
                        }
                    })?)
                }
                FieldSource::Regex { pattern, group } => {
                    let regex = Regex::new(pattern).map_err(|error| ExtractionError::InvalidRegex {
                        field: spec.name.clone(),
                        pattern: pattern.clone(),
                        reason: error.to_string(),
                    })?;
                    let group = group.unwrap_or(usize::from(regex.captures_len() > 1));
                    if group >= regex.captures_len() {
                        return Err(ExtractionError::MissingGroup {
                            field: spec.name.clone(),
                            group,
                        });
                    }
                    CompiledSource::Regex { regex, group }
                }
            };
            fields.push(CompiledField {
                name: spec.name.clone(),
                source,
                cast: spec.cast,
                required: spec.required,
            });
        }
        Ok(CompiledSchema { fields })
    }
}

impl CompiledSchema {
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    /// Extracts every field. A missing response yields nulls without errors,
    /// since the record already carries its own failure.
    pub fn extract(&self, response: Option<&str>) -> Extraction {
        let mut extraction = Extraction::default();
        let Some(response) = response else {
            extraction.values = self
                .fields
                .iter()
                .map(|field| (field.name.clone(), Value::Null))
                .collect();
            return extraction;
        };

        let mut embedded_json: Option<Option<Value>> = None;
        for field in &self.fields {
            let found = match &field.source {
                CompiledSource::JsonPath(segments) => embedded_json
                    .get_or_insert_with(|| find_embedded_json(response))
                    .as_ref()
                    .and_then(|json| resolve_path(json, segments))
                    .filter(|value| !value.is_null())
                    .cloned(),
                CompiledSource::Regex { regex, group } => regex
                    .captures(response)
                    .and_then(|captures| captures.get(*group))
                    .map(|matched| Value::String(matched.as_str().to_string())),
            };

            let value = match (found, field.cast) {
                (Some(value), Some(cast)) => match cast_value(&value, cast) {
                    Some(converted) => converted,
                    None => {
                        extraction.errors.push(format!(
                            "field '{}': cannot cast {} to {:?}",
                            field.name,
                            value,
                            cast
                        ));
                        Value::Null
                    }
                },
                (Some(value), None) => value,
                (None, _) => {
                    if field.required {
                        extraction
                            .errors
                            .push(format!("field '{}': not found in response", field.name));
                    }
                    Value::Null
                }
            };
            extraction.values.push((field.name.clone(), value));
        }
        extraction
    }
}

fn parse_path(path: &str) -> Result<Vec<PathSegment>, String> {
    let trimmed = path.trim();
    let mut rest = trimmed.strip_prefix('$').unwrap_or(trimmed);
    let mut segments = Vec::new();
    let mut first = !trimmed.starts_with('$');

    while !rest.is_empty() {
        if let Some(after_dot) = rest.strip_prefix('.') {
            let end = after_dot.find(['.', '[']).unwrap_or(after_dot.len());
            let key = &after_dot[..end];
            if key.is_empty() {
                return Err("empty key after '.'".to_string());
            }
            segments.push(PathSegment::Key(key.to_string()));
            rest = &after_dot[end..];
        } else if let Some(after_bracket) = rest.strip_prefix('[') {
            let close = after_bracket
                .find(']')
                .ok_or_else(|| "unclosed '['".to_string())?;
            let inner = after_bracket[..close].trim();
            let quoted = inner
                .strip_prefix('\'')
                .and_then(|text| text.strip_suffix('\''))
                .or_else(|| inner.strip_prefix('"').and_then(|text| text.strip_suffix('"')));
            match quoted {
                Some(key) => segments.push(PathSegment::Key(key.to_string())),
                None => segments.push(PathSegment::Index(
                    inner
                        .parse()
                        .map_err(|_| format!("'{inner}' is not an index or quoted key"))?,
                )),
            }
            rest = &after_bracket[close + 1..];
        } else if first {
            // Bare `a.b` paths are accepted as `$.a.b`.
            let end = rest.find(['.', '[']).unwrap_or(rest.len());
            segments.push(PathSegment::Key(rest[..end].to_string()));
            rest = &rest[end..];
        } else {
            return Err(format!("unexpected '{rest}'"));
        }
        first = false;
    }
    Ok(segments)
}

fn resolve_path<'a>(root: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |current, segment| match segment {
        PathSegment::Key(key) => current.get(key),
        PathSegment::Index(index) => {
            let items = current.as_array()?;
            let resolved = if *index < 0 {
                items.len().checked_sub(index.unsigned_abs() as usize)?
            } else {
                *index as usize
            };
            items.get(resolved)
        }
    })
}

/// Locates JSON in a model response: the whole text, then the first fenced
/// code block, then the outermost `{...}` or `[...]` span.
pub fn find_embedded_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(fenced) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str(fenced.trim()) {
            return Some(value);
        }
    }

    [('{', '}'), ('[', ']')]
        .iter()
        .filter_map(|(open, close)| {
            let start = trimmed.find(*open)?;
            let end = trimmed.rfind(*close)?;
            (start < end).then(|| (start, &trimmed[start..=end]))
        })
        .min_by_key(|(start, _)| *start)
        .and_then(|(_, span)| serde_json::from_str(span).ok())
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")? + 3;
    let body = &text[start..];
    // Skip an info string such as `json`.
    let body = match body.find('\n') {
        Some(newline) if !body[..newline].contains('{') && !body[..newline].contains('[') => {
            &body[newline + 1..]
        }
        _ => body,
    };
    let end = body.find("```")?;
    Some(&body[..end])
}

fn cast_value(value: &Value, cast: FieldCast) -> Option<Value> {
    match cast {
        FieldCast::String => Some(Value::String(match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })),
        FieldCast::Integer => match value {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(Value::from),
            Value::String(text) => text.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        },
        FieldCast::Number => match value {
            Value::Number(_) => Some(value.clone()),
            Value::String(text) => text
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            _ => None,
        },
        FieldCast::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "y" | "1" => Some(Value::Bool(true)),
                "false" | "no" | "n" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            Value::Number(number) => number.as_i64().map(|n| Value::Bool(n != 0)),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn schema(fields: Value) -> CompiledSchema {
        let schema: OutputSchema =
            serde_json::from_value(json!({ "fields": fields })).expect("schema should parse");
        schema.compile().expect("schema should compile")
    }

    #[test]
    fn extracts_json_path_from_fenced_response() {
        let compiled = schema(json!([
            {"name": "category", "source": {"type": "json_path", "path": "$.category"}},
            {"name": "first_tag", "source": {"type": "json_path", "path": "$.tags[0]"}},
            {"name": "last_tag", "source": {"type": "json_path", "path": "$['tags'][-1]"}}
        ]));

        let response = "Here you go:\n```json\n{\"category\": \"billing\", \"tags\": [\"refund\", \"urgent\"]}\n```";
        let extraction = compiled.extract(Some(response));

        assert_eq!(
            extraction.values,
            vec![
                ("category".to_string(), json!("billing")),
                ("first_tag".to_string(), json!("refund")),
                ("last_tag".to_string(), json!("urgent")),
            ]
        );
        assert!(extraction.errors.is_empty());
    }

    #[test]
    fn finds_json_object_inside_prose() {
        assert_eq!(
            find_embedded_json("The answer is {\"score\": 0.9} as requested."),
            Some(json!({"score": 0.9}))
        );
        assert_eq!(find_embedded_json("no json here"), None);
    }

    #[test]
    fn regex_uses_first_group_and_casts() {
        let compiled = schema(json!([
            {
                "name": "urgency",
                "source": {"type": "regex", "pattern": "Urgency:\\s*(\\d+)"},
                "cast": "integer",
                "required": true
            }
        ]));

        let extraction = compiled.extract(Some("Urgency: 4\nBecause the customer is blocked."));
        assert_eq!(extraction.values, vec![("urgency".to_string(), json!(4))]);
    }

    #[test]
    fn regex_without_groups_takes_whole_match() {
        let compiled = schema(json!([
            {"name": "ticket", "source": {"type": "regex", "pattern": "TCK-\\d+"}}
        ]));

        let extraction = compiled.extract(Some("Refers to TCK-991 and TCK-12"));
        assert_eq!(extraction.values[0].1, json!("TCK-991"));
    }

    #[test]
    fn required_missing_field_is_reported_not_fatal() {
        let compiled = schema(json!([
            {"name": "sentiment", "source": {"type": "json_path", "path": "$.sentiment"}, "required": true},
            {"name": "score", "source": {"type": "json_path", "path": "$.score"}, "cast": "number"}
        ]));

        let extraction = compiled.extract(Some("{\"score\": \"high\"}"));
        assert_eq!(extraction.values[0].1, Value::Null);
        assert_eq!(extraction.values[1].1, Value::Null);
        assert_eq!(extraction.errors.len(), 2);
        assert!(extraction.errors[0].contains("sentiment"));
    }

    #[test]
    fn missing_response_yields_nulls_without_errors() {
        let compiled = schema(json!([
            {"name": "category", "source": {"type": "json_path", "path": "$.category"}, "required": true}
        ]));

        let extraction = compiled.extract(None);
        assert_eq!(extraction.values, vec![("category".to_string(), Value::Null)]);
        assert!(extraction.errors.is_empty());
    }

    #[test]
    fn compile_rejects_bad_regex_and_paths() {
        let bad_regex: OutputSchema = serde_json::from_value(json!({"fields": [
            {"name": "x", "source": {"type": "regex", "pattern": "(unclosed"}}
        ]}))
        .expect("schema should parse");
        assert!(matches!(
            bad_regex.compile(),
            Err(ExtractionError::InvalidRegex { .. })
        ));

        let bad_path: OutputSchema = serde_json::from_value(json!({"fields": [
            {"name": "x", "source": {"type": "json_path", "path": "$.a[oops]"}}
        ]}))
        .expect("schema should parse");
        assert!(matches!(
            bad_path.compile(),
            Err(ExtractionError::InvalidPath { .. })
        ));

        let missing_group: OutputSchema = serde_json::from_value(json!({"fields": [
            {"name": "x", "source": {"type": "regex", "pattern": "(a)", "group": 2}}
        ]}))
        .expect("schema should parse");
        assert!(matches!(
            missing_group.compile(),
            Err(ExtractionError::MissingGroup { .. })
        ));
    }

    #[test]
    fn bare_paths_are_rooted() {
        assert_eq!(
            parse_path("result.items[2]").expect("path should parse"),
            vec![
                PathSegment::Key("result".to_string()),
                PathSegment::Key("items".to_string()),
                PathSegment::Index(2),
            ]
        );
    }
}
