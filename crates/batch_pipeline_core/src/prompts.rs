//! Prompt catalog, template rendering and expansion rules.
//!
//! Templates use `{field}` placeholders filled from a table row, with `{{` and
//! `}}` as literal braces. An expansion rule names an ordered list of
//! templates; a row routed to a rule fans out into one model record per
//! template, identified as `{record_id}::{prompt_id}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::table::Row;

pub const EXPANSION_SEPARATOR: &str = "::";

const BUNDLED_CATALOG: &str = include_str!("../default_prompt_catalog.json");

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromptError {
    #[error("Prompt '{0}' not found in prompt catalog")]
    UnknownPrompt(String),
    #[error("'{0}' is an expansion rule, not a prompt template")]
    RuleIsNotTemplate(String),
    #[error("Template field '{field}' missing from record (available: {available})")]
    MissingField { field: String, available: String },
    #[error("Unterminated '{{' in template at byte {0}")]
    UnterminatedPlaceholder(usize),
    #[error("Single '}}' encountered in template at byte {0}")]
    UnmatchedClosingBrace(usize),
    #[error("Empty placeholder in template at byte {0}")]
    EmptyPlaceholder(usize),
    #[error("Invalid prompt catalog: {0}")]
    InvalidCatalog(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptCatalog {
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
    #[serde(default)]
    pub expansion_rules: BTreeMap<String, Vec<String>>,
}

impl PromptCatalog {
    /// The catalog compiled into the crate.
    pub fn bundled() -> Result<Self, PromptError> {
        Self::from_json(BUNDLED_CATALOG)
    }

    /// Parses a catalog and checks that every template is well formed.
    pub fn from_json(text: &str) -> Result<Self, PromptError> {
        let catalog: Self = serde_json::from_str(text)
            .map_err(|error| PromptError::InvalidCatalog(error.to_string()))?;
        for (prompt_id, template) in &catalog.templates {
            placeholders(template).map_err(|error| {
                PromptError::InvalidCatalog(format!("template '{prompt_id}': {error}"))
            })?;
        }
        Ok(catalog)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.templates.contains_key(id) || self.expansion_rules.contains_key(id)
    }

    pub fn is_expansion_rule(&self, id: &str) -> bool {
        self.expansion_rules.contains_key(id)
    }

    pub fn template(&self, prompt_id: &str) -> Result<&str, PromptError> {
        if let Some(template) = self.templates.get(prompt_id) {
            return Ok(template);
        }
        if self.is_expansion_rule(prompt_id) {
            return Err(PromptError::RuleIsNotTemplate(prompt_id.to_string()));
        }
        Err(PromptError::UnknownPrompt(prompt_id.to_string()))
    }

    pub fn expansion_rule(&self, name: &str) -> Result<&[String], PromptError> {
        self.expansion_rules
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| PromptError::UnknownPrompt(name.to_string()))
    }

    /// Returns every problem with an expansion rule; empty when valid.
    pub fn validate_expansion_rule(&self, name: &str) -> Vec<String> {
        let Some(prompt_ids) = self.expansion_rules.get(name) else {
            return vec![format!("Expansion rule '{name}' not found in prompt catalog")];
        };
        if prompt_ids.is_empty() {
            return vec![format!("Expansion rule '{name}' has no prompts")];
        }

        let mut errors = Vec::new();
        for prompt_id in prompt_ids {
            if prompt_id.contains(EXPANSION_SEPARATOR) {
                errors.push(format!(
                    "Expansion rule '{name}': prompt id '{prompt_id}' must not contain '{EXPANSION_SEPARATOR}'"
                ));
            } else if self.is_expansion_rule(prompt_id) {
                errors.push(format!(
                    "Expansion rule '{name}' references another expansion rule '{prompt_id}'"
                ));
            } else if !self.templates.contains_key(prompt_id) {
                errors.push(format!(
                    "Expansion rule '{name}' references unknown prompt '{prompt_id}'"
                ));
            }
        }
        errors
    }

    pub fn render(&self, prompt_id: &str, row: &Row) -> Result<String, PromptError> {
        render(self.template(prompt_id)?, row)
    }
}

enum Segment<'a> {
    Literal(&'a str),
    Field(&'a str),
}

fn parse_template(template: &str) -> Result<Vec<Segment<'_>>, PromptError> {
    let bytes = template.as_bytes();
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut index = 0;

    while index < bytes.len() {
        match bytes[index] {
            b'{' if bytes.get(index + 1) == Some(&b'{') => {
                segments.push(Segment::Literal(&template[literal_start..=index]));
                index += 2;
                literal_start = index;
            }
            b'{' => {
                segments.push(Segment::Literal(&template[literal_start..index]));
                let close = template[index + 1..]
                    .find('}')
                    .map(|offset| index + 1 + offset)
                    .ok_or(PromptError::UnterminatedPlaceholder(index))?;
                let inner = &template[index + 1..close];
                // Format specs and conversions (`{x:>8}`, `{x!r}`) are ignored.
                let name = inner
                    .split([':', '!'])
                    .next()
                    .unwrap_or_default()
                    .trim();
                if name.is_empty() {
                    return Err(PromptError::EmptyPlaceholder(index));
                }
                segments.push(Segment::Field(name));
                index = close + 1;
                literal_start = index;
            }
            b'}' if bytes.get(index + 1) == Some(&b'}') => {
                segments.push(Segment::Literal(&template[literal_start..=index]));
                index += 2;
                literal_start = index;
            }
            b'}' => return Err(PromptError::UnmatchedClosingBrace(index)),
            _ => index += 1,
        }
    }
    segments.push(Segment::Literal(&template[literal_start..]));
    Ok(segments)
}

/// Lists placeholder names in order of appearance, without duplicates.
pub fn placeholders(template: &str) -> Result<Vec<String>, PromptError> {
    let mut names: Vec<String> = Vec::new();
    for segment in parse_template(template)? {
        if let Segment::Field(name) = segment {
            if !names.iter().any(|existing| existing == name) {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

pub fn render(template: &str, row: &Row) -> Result<String, PromptError> {
    let mut rendered = String::with_capacity(template.len());
    for segment in parse_template(template)? {
        match segment {
            Segment::Literal(text) => rendered.push_str(text),
            Segment::Field(name) => match row.get(name) {
                Some(Value::String(text)) => rendered.push_str(text),
                Some(Value::Null) => rendered.push_str("None"),
                Some(other) => rendered.push_str(&other.to_string()),
                None => {
                    return Err(PromptError::MissingField {
                        field: name.to_string(),
                        available: row.keys().cloned().collect::<Vec<_>>().join(", "),
                    });
                }
            },
        }
    }
    Ok(rendered)
}

pub fn expanded_record_id(record_id: &str, prompt_id: &str) -> String {
    format!("{record_id}{EXPANSION_SEPARATOR}{prompt_id}")
}

/// Splits `record_id::prompt_id` at the last separator.
pub fn split_expanded_record_id(id: &str) -> Option<(&str, &str)> {
    id.rsplit_once(EXPANSION_SEPARATOR)
        .filter(|(record_id, prompt_id)| !record_id.is_empty() && !prompt_id.is_empty())
}
