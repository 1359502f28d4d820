//! Normalized result types shared by every engine.
//!
//! Engine-native conventions (confidence scale, bounding-box layout, entity
//! vocabulary) are preserved as produced. Consumers tell engines apart by the
//! engine name that keys every result.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::EngineError;

/// What an engine extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Ocr,
    Ner,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ocr => f.write_str("ocr"),
            Self::Ner => f.write_str("ner"),
        }
    }
}

/// Where an engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locality {
    Local,
    Cloud,
}

/// Bounding box tagged with the convention the engine reported it in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "convention", content = "coords", rename_all = "snake_case")]
pub enum BoundingBox {
    /// Corner pair: x0, y0, x1, y1.
    Corners([f64; 4]),
    /// Left, top, width, height.
    Ltwh([f64; 4]),
    /// Four corner points, clockwise from top-left.
    Quad([[f64; 2]; 4]),
}

/// One recognized region of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSpan {
    pub text: String,
    /// Engine-native scale; `None` when the engine does not score regions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    /// 0-based page the span was recognized on.
    pub page: usize,
}

/// OCR output: full text plus regions in reading order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrOutput {
    pub text: String,
    #[serde(default)]
    pub spans: Vec<TextSpan>,
}

impl OcrOutput {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            spans: Vec::new(),
        }
    }
}

/// Entity category → extracted values, in first-seen order within a category.
pub type EntityMap = BTreeMap<String, Vec<String>>;

/// Append `other` into `into`, skipping values already present for a category.
pub fn merge_entities(into: &mut EntityMap, other: EntityMap) {
    for (category, values) in other {
        let slot = into.entry(category).or_default();
        for value in values {
            if !slot.contains(&value) {
                slot.push(value);
            }
        }
    }
}

/// Successful output of one engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    Text(OcrOutput),
    Entities(EntityMap),
}

/// Outcome of one engine for one input file.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineResult {
    pub engine: String,
    pub kind: EngineKind,
    pub outcome: Result<EngineOutput, EngineError>,
}

impl EngineResult {
    pub fn success(engine: impl Into<String>, kind: EngineKind, output: EngineOutput) -> Self {
        Self {
            engine: engine.into(),
            kind,
            outcome: Ok(output),
        }
    }

    pub fn failure(engine: impl Into<String>, kind: EngineKind, error: EngineError) -> Self {
        Self {
            engine: engine.into(),
            kind,
            outcome: Err(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&EngineError> {
        self.outcome.as_ref().err()
    }

    /// OCR output, if this is a successful OCR result.
    pub fn ocr(&self) -> Option<&OcrOutput> {
        match &self.outcome {
            Ok(EngineOutput::Text(out)) => Some(out),
            _ => None,
        }
    }

    /// Entity map, if this is a successful NER result.
    pub fn entities(&self) -> Option<&EntityMap> {
        match &self.outcome {
            Ok(EngineOutput::Entities(map)) => Some(map),
            _ => None,
        }
    }
}

/// Per-file mapping from engine name to result, in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateResult {
    results: Vec<EngineResult>,
}

impl AggregateResult {
    /// Build from results already in request order. Later duplicates are dropped.
    pub fn from_ordered(results: Vec<EngineResult>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let results = results
            .into_iter()
            .filter(|r| seen.insert(r.engine.clone()))
            .collect();
        Self { results }
    }

    pub fn get(&self, engine: &str) -> Option<&EngineResult> {
        self.results.iter().find(|r| r.engine == engine)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EngineResult> {
        self.results.iter()
    }

    pub fn engine_names(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.engine.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_bbox_keeps_convention_tag() {
        let json = serde_json::to_value(BoundingBox::Ltwh([10.0, 20.0, 30.5, 4.0])).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"convention": "ltwh", "coords": [10.0, 20.0, 30.5, 4.0]})
        );
    }

    #[test]
    fn test_merge_entities_dedups_within_category() {
        let mut into: EntityMap = BTreeMap::new();
        into.insert("date".into(), vec!["2024-01-01".into()]);

        let mut other: EntityMap = BTreeMap::new();
        other.insert("date".into(), vec!["2024-01-01".into(), "2024-02-01".into()]);
        other.insert("person_name".into(), vec!["Ada".into()]);

        merge_entities(&mut into, other);
        assert_eq!(into["date"], vec!["2024-01-01", "2024-02-01"]);
        assert_eq!(into["person_name"], vec!["Ada"]);
    }

    #[test]
    fn test_aggregate_keeps_first_duplicate() {
        let agg = AggregateResult::from_ordered(vec![
            EngineResult::success("a", EngineKind::Ocr, EngineOutput::Text(OcrOutput::text_only("x"))),
            EngineResult::failure("b", EngineKind::Ner, EngineError::timeout("slow")),
            EngineResult::failure("a", EngineKind::Ocr, EngineError::internal("dup")),
        ]);
        assert_eq!(agg.engine_names(), vec!["a", "b"]);
        assert!(agg.get("a").unwrap().is_success());
    }
}
