//! Pattern-based local NER engine.
//!
//! Pure functions over compiled regexes, no I/O. Ships a default pattern set
//! for contact info, dates, order numbers, prices and company names; extra
//! patterns can be loaded from configuration.

use regex::Regex;
use tracing::{debug, warn};

use super::{Engine, EngineInput};
use crate::config::EntityPattern;
use crate::error::EngineError;
use crate::schema::{EngineOutput, EntityMap};

/// Pre-compiled regex patterns ready for matching.
pub struct CompiledPatterns {
    patterns: Vec<CompiledPattern>,
}

struct CompiledPattern {
    category: String,
    regex: Regex,
    normalize: Option<String>,
    deduplicate: bool,
}

impl CompiledPatterns {
    /// Compile entity patterns. Skips invalid regexes with a warning.
    pub fn compile(patterns: &[EntityPattern]) -> Self {
        let mut compiled = Vec::new();
        for p in patterns {
            match Regex::new(&p.pattern) {
                Ok(regex) => {
                    compiled.push(CompiledPattern {
                        category: p.category.clone(),
                        regex,
                        normalize: p.normalize.clone(),
                        deduplicate: p.deduplicate,
                    });
                }
                Err(e) => {
                    warn!(
                        "Skipping invalid entity pattern '{}' ({}): {}",
                        p.id, p.pattern, e
                    );
                }
            }
        }
        debug!("Compiled {} entity patterns", compiled.len());
        Self { patterns: compiled }
    }

    /// Returns true if there are no compiled patterns.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Run all patterns against a text, returning category → matched values.
    pub fn extract(&self, text: &str) -> EntityMap {
        let mut results = EntityMap::new();

        for pattern in &self.patterns {
            let slot = results.entry(pattern.category.clone()).or_default();

            for cap in pattern.regex.captures_iter(text) {
                // Use first capture group if available, otherwise full match
                let raw = cap
                    .get(1)
                    .or_else(|| cap.get(0))
                    .map(|m| m.as_str().trim())
                    .unwrap_or_default();

                if raw.is_empty() {
                    continue;
                }

                let value = normalize_value(raw, pattern.normalize.as_deref());
                if pattern.deduplicate && slot.contains(&value) {
                    continue;
                }
                slot.push(value);
            }
        }

        results.retain(|_, values| !values.is_empty());
        results
    }
}

/// Apply normalization to a matched value.
fn normalize_value(value: &str, normalize: Option<&str>) -> String {
    match normalize {
        Some("uppercase") => value.to_uppercase(),
        Some("lowercase") => value.to_lowercase(),
        Some("strip_punctuation") => value.chars().filter(|c| c.is_alphanumeric()).collect(),
        Some("collapse_whitespace") => value.split_whitespace().collect::<Vec<_>>().join(" "),
        _ => value.to_string(),
    }
}

/// Built-in patterns covering the common invoice/letter vocabulary.
pub fn default_patterns() -> Vec<EntityPattern> {
    let p = |id: &str, category: &str, pattern: &str, normalize: Option<&str>| EntityPattern {
        id: id.to_string(),
        category: category.to_string(),
        pattern: pattern.to_string(),
        normalize: normalize.map(str::to_string),
        deduplicate: true,
    };

    vec![
        p(
            "email",
            "contact_info",
            r"([\w.+-]+@[\w-]+(?:\.[\w-]+)*\.[A-Za-z]{2,})",
            Some("lowercase"),
        ),
        p(
            "phone",
            "contact_info",
            r"(?m)(?:^|[\s:])((?:\+\d{1,3}[ -]?)?(?:\(\d{1,4}\)[ -]?)?\d{3,4}[ -]\d{3,4}(?:[ -]\d{2,4})?)\b",
            Some("collapse_whitespace"),
        ),
        p("url", "contact_info", r"(https?://[^\s<>()]+|www\.[^\s<>()]+)", None),
        p(
            "date_iso",
            "date",
            r"\b(\d{4}-\d{2}-\d{2})\b",
            None,
        ),
        p(
            "date_numeric",
            "date",
            r"\b(\d{1,2}[/.]\d{1,2}[/.]\d{2,4})\b",
            None,
        ),
        p(
            "date_text",
            "date",
            r"(?i)\b(\d{1,2}\s+(?:jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?\s+\d{4})\b",
            Some("collapse_whitespace"),
        ),
        p(
            "order_number",
            "order_number",
            r"(?i)\b(?:order|invoice|inv|po)\s*(?:no\.?|number|#)?\s*[:#]?\s*([A-Z0-9][A-Z0-9-]{3,})\b",
            Some("uppercase"),
        ),
        p(
            "price",
            "price",
            r"((?:[$€£¥]\s?\d[\d,]*(?:\.\d{2})?)|(?:\d[\d,]*(?:\.\d{2})?\s?(?:USD|EUR|GBP|SGD)))",
            Some("collapse_whitespace"),
        ),
        p(
            "organization",
            "organization",
            r"\b((?:[A-Z][\w&.-]*[ \t]+){0,4}(?:Ltd|Limited|LLC|Inc|Incorporated|Corp|Corporation|GmbH|Pte)\b\.?)",
            Some("collapse_whitespace"),
        ),
    ]
}

/// NER engine backed by [`CompiledPatterns`].
pub struct RegexNerEngine {
    patterns: CompiledPatterns,
}

impl RegexNerEngine {
    pub fn new(patterns: &[EntityPattern]) -> Self {
        Self {
            patterns: CompiledPatterns::compile(patterns),
        }
    }
}

impl Default for RegexNerEngine {
    fn default() -> Self {
        Self::new(&default_patterns())
    }
}

#[async_trait::async_trait]
impl Engine for RegexNerEngine {
    fn name(&self) -> &str {
        "regex_ner"
    }

    async fn extract(&self, input: EngineInput<'_>) -> Result<EngineOutput, EngineError> {
        let EngineInput::Text(text) = input else {
            return Err(EngineError::missing_input("regex_ner requires text input"));
        };
        Ok(EngineOutput::Entities(self.patterns.extract(text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled() -> CompiledPatterns {
        CompiledPatterns::compile(&default_patterns())
    }

    #[test]
    fn test_compile_default_patterns() {
        let compiled = compiled();
        assert_eq!(compiled.patterns.len(), default_patterns().len());
    }

    #[test]
    fn test_extract_invoice_entities() {
        let text = "ACME Widgets Pte Ltd\nInvoice No: INV-2024-001\nDate: 2024-03-15\n\
                    Contact: Sales@Acme.example.com or +65 6123 4567\nTotal: $1,299.00";
        let entities = compiled().extract(text);

        assert_eq!(entities["order_number"], vec!["INV-2024-001"]);
        assert_eq!(entities["date"], vec!["2024-03-15"]);
        assert!(entities["contact_info"].contains(&"sales@acme.example.com".to_string()));
        assert!(entities["contact_info"].contains(&"+65 6123 4567".to_string()));
        assert_eq!(entities["price"], vec!["$1,299.00"]);
        assert_eq!(entities["organization"], vec!["ACME Widgets Pte Ltd"]);
    }

    #[test]
    fn test_absent_category_is_not_reported() {
        let entities = compiled().extract("nothing to see here");
        assert!(entities.is_empty());
    }

    #[test]
    fn test_deduplicates_values() {
        let entities = compiled().extract("on 2024-01-02 and again 2024-01-02");
        assert_eq!(entities["date"], vec!["2024-01-02"]);
    }

    #[test]
    fn test_invalid_regex_skipped() {
        let patterns = vec![EntityPattern {
            id: "bad".to_string(),
            category: "bad".to_string(),
            pattern: r"[invalid".to_string(),
            normalize: None,
            deduplicate: true,
        }];
        let compiled = CompiledPatterns::compile(&patterns);
        assert!(compiled.is_empty());
    }

    #[test]
    fn test_normalize_value() {
        assert_eq!(normalize_value("abc", Some("uppercase")), "ABC");
        assert_eq!(normalize_value("12-34", Some("strip_punctuation")), "1234");
        assert_eq!(normalize_value("a  b\nc", Some("collapse_whitespace")), "a b c");
        assert_eq!(normalize_value("hello", None), "hello");
    }

    #[tokio::test]
    async fn test_engine_rejects_page_input() {
        let engine = RegexNerEngine::default();
        let page = crate::request::PageImage::new(0, Vec::new(), "image/png");
        let err = engine
            .extract(EngineInput::Page {
                image: &page,
                languages: &[],
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::EngineErrorKind::MissingInput);
    }
}
