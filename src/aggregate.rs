//! Result aggregation and serialization.
//!
//! Merges per-page OCR output and turns an [`AggregateResult`] into the JSON
//! document returned by the API and written by the CLI.

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::schema::{AggregateResult, EngineOutput, EngineResult, OcrOutput};

/// Concatenate per-page outputs in page order.
///
/// Texts are joined with `separator`; spans are appended without reordering.
pub fn merge_pages(pages: Vec<OcrOutput>, separator: &str) -> OcrOutput {
    let mut texts = Vec::with_capacity(pages.len());
    let mut spans = Vec::new();
    for page in pages {
        texts.push(page.text);
        spans.extend(page.spans);
    }
    OcrOutput {
        text: texts.join(separator),
        spans,
    }
}

/// Serialize every engine result, keyed by engine name in request order.
pub fn serialize(result: &AggregateResult) -> Value {
    let mut map = Map::new();
    for entry in result.iter() {
        map.insert(entry.engine.clone(), serialize_entry(entry));
    }
    Value::Object(map)
}

fn serialize_entry(entry: &EngineResult) -> Value {
    match &entry.outcome {
        Ok(EngineOutput::Text(out)) => {
            // One entry per span in both lists, so confidence[i] scores boxes[i]
            let confidence: Vec<Option<f64>> = out.spans.iter().map(|s| s.confidence).collect();
            let boxes: Vec<Value> = out
                .spans
                .iter()
                .map(|span| {
                    let mut value = json!({
                        "page": span.page,
                        "text": span.text,
                        "convention": null,
                        "coords": null,
                    });
                    if let (Value::Object(obj), Some(Ok(Value::Object(tagged)))) =
                        (&mut value, span.bbox.as_ref().map(serde_json::to_value))
                    {
                        obj.extend(tagged);
                    }
                    value
                })
                .collect();
            json!({
                "engine": entry.engine,
                "text": out.text,
                "confidence": confidence,
                "boxes": boxes,
            })
        }
        Ok(EngineOutput::Entities(entities)) => json!({
            "engine": entry.engine,
            "entities": entities,
        }),
        Err(err) => json!({
            "engine": entry.engine,
            "error": {
                "kind": err.kind,
                "message": err.message,
            },
        }),
    }
}

/// Write `value` as pretty JSON to `<dir>/<input stem>.json`.
pub fn write_document(dir: &Path, input: &Path, value: &Value) -> Result<PathBuf> {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("document");

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {:?}", dir))?;

    let path = dir.join(format!("{}.json", stem));
    if path.exists() {
        warn!("Overwriting existing result {:?}", path);
    }
    let body = serde_json::to_string_pretty(value).context("Failed to encode result")?;
    std::fs::write(&path, body).with_context(|| format!("Failed to write {:?}", path))?;

    info!("Wrote {:?}", path);
    Ok(path)
}

/// Output directory for `file`, mirroring its location under `input_root`.
///
/// Files outside `input_root` (or a single-file input) land directly in
/// `output_dir`.
pub fn output_dir_for(input_root: &Path, file: &Path, output_dir: &Path) -> PathBuf {
    match file
        .parent()
        .and_then(|parent| parent.strip_prefix(input_root).ok())
    {
        Some(relative) => output_dir.join(relative),
        None => output_dir.to_path_buf(),
    }
}
