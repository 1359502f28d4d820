//! Engine adapter abstraction.
//!
//! Defines the [`Engine`] trait every OCR/NER backend implements, so local
//! binaries, local models and cloud APIs can be invoked the same way. An
//! adapter reports failures as typed [`EngineError`]s; it never panics its
//! caller out of a request.

pub mod cloud_vision;
pub mod llm_ner;
pub mod ollama;
pub mod regex_ner;
pub mod tesseract;

use crate::error::EngineError;
use crate::request::PageImage;
use crate::schema::{EntityMap, EngineOutput};

/// Input handed to one adapter call.
#[derive(Debug, Clone, Copy)]
pub enum EngineInput<'a> {
    /// One page plus the request's language hints.
    Page {
        image: &'a PageImage,
        languages: &'a [String],
    },
    /// Full document text (NER).
    Text(&'a str),
}

impl<'a> EngineInput<'a> {
    pub fn page(&self) -> Option<&'a PageImage> {
        match self {
            Self::Page { image, .. } => Some(image),
            Self::Text(_) => None,
        }
    }
}

/// Async trait implemented by each engine backend.
#[async_trait::async_trait]
pub trait Engine: Send + Sync {
    fn name(&self) -> &str;
    async fn extract(&self, input: EngineInput<'_>) -> Result<EngineOutput, EngineError>;
}

/// Entity categories requested from LLM-backed NER engines.
pub const ENTITY_CATEGORIES: &[(&str, &str)] = &[
    ("order_number", "Order reference numbers"),
    ("date", "Any dates or time periods"),
    ("person_name", "Names of people"),
    ("organization", "Company or business names"),
    ("location", "Addresses, cities, countries"),
    ("contact_info", "Phone numbers, emails, websites"),
    ("product", "Product names and descriptions"),
    ("quantity", "Numerical quantities"),
    ("price", "Monetary values and prices"),
];

/// Default prompt for vision models transcribing a page.
pub const DEFAULT_VISION_PROMPT: &str = "Extract all text from this image. \
Preserve the reading order and line breaks. Return only the extracted text.";

/// Build the NER instruction prompt listing the category vocabulary.
pub fn ner_prompt(text: &str) -> String {
    let categories = ENTITY_CATEGORIES
        .iter()
        .map(|(id, desc)| format!("- {}: {}", id, desc))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a Named Entity Recognition expert. Extract all entities from the text below \
and return them as a single flat JSON object.\n\
Use double quotes for all property names and string values. Each key is a category, each \
value is a list of strings. Omit categories with no entities.\n\n\
Categories:\n{}\n\nText: {}\n\nRespond with the JSON object only.",
        categories, text
    )
}

/// Append candidate labels to a vision prompt.
pub fn vision_prompt(base: &str, labels: &[String]) -> String {
    if labels.is_empty() {
        base.to_string()
    } else {
        format!(
            "{}\n\nPay particular attention to these fields: {}.",
            base,
            labels.join(", ")
        )
    }
}

/// Extract a JSON value from an LLM answer, accepting fenced code blocks.
///
/// Any language tag after the opening fence (`json`, `JSON`, `jsonc`) is
/// skipped.
pub fn parse_llm_json(response: &str) -> Result<serde_json::Value, EngineError> {
    let json_str = match response.split_once("```") {
        Some((_, fenced)) => {
            let body = fenced.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
            body.split("```").next().unwrap_or(body).trim()
        }
        None => response.trim(),
    };

    serde_json::from_str(json_str).map_err(|e| {
        EngineError::malformed(format!(
            "Invalid JSON in model response ({}): {}",
            e,
            json_str.chars().take(200).collect::<String>()
        ))
    })
}

/// Convert a model's JSON object into an entity map.
///
/// Strings are kept, scalars are stringified, objects with a `value` field
/// contribute that field, other objects are kept as compact JSON. Empty
/// categories are dropped.
pub fn entities_from_json(value: serde_json::Value) -> Result<EntityMap, EngineError> {
    let obj = match value {
        serde_json::Value::Object(obj) => obj,
        other => {
            return Err(EngineError::malformed(format!(
                "Expected a JSON object of entities, got: {}",
                other
            )))
        }
    };

    let mut entities = EntityMap::new();
    for (category, raw) in obj {
        let mut values = Vec::new();
        match raw {
            serde_json::Value::Array(items) => {
                for item in items {
                    push_entity_value(&mut values, item);
                }
            }
            other => push_entity_value(&mut values, other),
        }
        if !values.is_empty() {
            entities.insert(category, values);
        }
    }
    Ok(entities)
}

fn push_entity_value(values: &mut Vec<String>, item: serde_json::Value) {
    let value = match item {
        serde_json::Value::Null => return,
        serde_json::Value::String(s) => s,
        serde_json::Value::Object(ref obj) => match obj.get("value") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(v) => v.to_string(),
            None => item.to_string(),
        },
        serde_json::Value::Array(items) => {
            for nested in items {
                push_entity_value(values, nested);
            }
            return;
        }
        other => other.to_string(),
    };

    let value = value.trim().to_string();
    if !value.is_empty() && !values.contains(&value) {
        values.push(value);
    }
}

/// Flatten a JSON document into `key: value` lines for text NER.
pub fn flatten_json(value: &serde_json::Value) -> String {
    let mut lines = Vec::new();
    flatten_into(value, "", &mut lines);
    lines.join("\n")
}

fn flatten_into(value: &serde_json::Value, prefix: &str, lines: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(obj) => {
            for (k, v) in obj {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{} {}", prefix, k)
                };
                flatten_into(v, &key, lines);
            }
        }
        serde_json::Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                let key = if prefix.is_empty() {
                    i.to_string()
                } else {
                    format!("{}[{}]", prefix, i)
                };
                flatten_into(v, &key, lines);
            }
        }
        serde_json::Value::String(s) if prefix.is_empty() => lines.push(s.clone()),
        serde_json::Value::String(s) => lines.push(format!("{}: {}", prefix, s)),
        other if prefix.is_empty() => lines.push(other.to_string()),
        other => lines.push(format!("{}: {}", prefix, other)),
    }
}

/// Base64-encode a page for model APIs.
pub fn encode_page(image: &PageImage) -> String {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    BASE64.encode(&image.data)
}
