//! Runtime configuration.
//!
//! Everything is read from the environment (after `.env` is loaded by the
//! binary) into [`Settings`]. Engines receive already-resolved values through
//! the registry; the pipeline never reads the environment itself.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Resolved settings for the service and every engine adapter.
#[derive(Debug, Clone)]
pub struct Settings {
    pub tesseract_path: PathBuf,
    pub default_languages: Vec<String>,
    pub ollama_base_url: String,
    pub ollama_vision_model: String,
    pub ollama_ner_model: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub openai_ner_model: String,
    pub vision_prompt: Option<String>,
    pub vision_labels: Vec<String>,
    pub entity_patterns_path: Option<PathBuf>,
    pub engine_timeout: Duration,
    pub page_separator: String,
    pub api_host: String,
    pub api_port: u16,
    pub max_upload_bytes: usize,
}

impl Settings {
    /// Load settings from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let engine_timeout_secs: u64 = or("ENGINE_TIMEOUT_SECS", "120")
            .parse()
            .context("ENGINE_TIMEOUT_SECS must be a whole number of seconds")?;
        let api_port: u16 = or("API_PORT", "8000")
            .parse()
            .context("API_PORT must be a valid port")?;
        let max_upload_bytes: usize = or("MAX_UPLOAD_BYTES", "52428800")
            .parse()
            .context("MAX_UPLOAD_BYTES must be a byte count")?;

        Ok(Self {
            tesseract_path: PathBuf::from(or("TESSERACT_PATH", "tesseract")),
            default_languages: split_list(&or("DEFAULT_LANGUAGES", "en")),
            ollama_base_url: or("OLLAMA_BASE_URL", "http://localhost:11434"),
            ollama_vision_model: or("OLLAMA_VISION_MODEL", "llava"),
            ollama_ner_model: or("OLLAMA_NER_MODEL", "llama3.2"),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            openai_model: or("OPENAI_MODEL", "gpt-4o-mini"),
            openai_ner_model: get("OPENAI_NER_MODEL")
                .unwrap_or_else(|| or("OPENAI_MODEL", "gpt-4o-mini")),
            vision_prompt: get("VISION_PROMPT"),
            vision_labels: get("VISION_LABELS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            entity_patterns_path: get("ENTITY_PATTERNS_PATH").map(PathBuf::from),
            engine_timeout: Duration::from_secs(engine_timeout_secs),
            // Read raw: a separator may legitimately be whitespace
            page_separator: lookup("PAGE_SEPARATOR")
                .map(|v| unescape(&v))
                .unwrap_or_else(|| "\n".to_string()),
            api_host: or("API_HOST", "0.0.0.0"),
            api_port,
            max_upload_bytes,
        })
    }
}

/// A regex-based entity pattern for the local pattern NER engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityPattern {
    /// Unique identifier for this pattern (e.g. "email", "invoice_no")
    pub id: String,
    /// Entity category the matches are reported under (e.g. "contact_info")
    pub category: String,
    /// Regex pattern string (should contain a capture group for the value)
    pub pattern: String,
    /// Optional normalization: "uppercase" | "lowercase" | "strip_punctuation" | "collapse_whitespace"
    #[serde(default)]
    pub normalize: Option<String>,
    /// Whether to drop repeated values within a category (default true)
    #[serde(default = "default_true")]
    pub deduplicate: bool,
}

fn default_true() -> bool {
    true
}

/// Load extra entity patterns from a JSON array file.
pub fn load_entity_patterns(path: &Path) -> Result<Vec<EntityPattern>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read entity patterns: {:?}", path))?;
    let patterns: Vec<EntityPattern> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse entity patterns: {:?}", path))?;
    info!("Loaded {} entity patterns from {:?}", patterns.len(), path);
    Ok(patterns)
}

fn split_list(raw: &str) -> Vec<String> {
    crate::request::parse_list(raw)
}

/// Interpret `\n` and `\t` escapes written literally in env files.
fn unescape(raw: &str) -> String {
    raw.replace("\\n", "\n").replace("\\t", "\t")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.tesseract_path, PathBuf::from("tesseract"));
        assert_eq!(s.default_languages, vec!["en"]);
        assert!(s.openai_api_key.is_none());
        assert_eq!(s.engine_timeout, Duration::from_secs(120));
        assert_eq!(s.page_separator, "\n");
        assert_eq!(s.api_port, 8000);
    }

    #[test]
    fn test_overrides() {
        let s = settings(&[
            ("OPENAI_API_KEY", " sk-test "),
            ("OPENAI_MODEL", "gpt-4o"),
            ("DEFAULT_LANGUAGES", "en,de"),
            ("PAGE_SEPARATOR", "\\n\\f\\n"),
            ("VISION_LABELS", "invoice_number, total"),
        ])
        .unwrap();
        assert_eq!(s.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(s.openai_ner_model, "gpt-4o");
        assert_eq!(s.default_languages, vec!["en", "de"]);
        assert_eq!(s.page_separator, "\n\\f\n");
        assert_eq!(s.vision_labels, vec!["invoice_number", "total"]);
    }

    #[test]
    fn test_blank_key_is_absent() {
        let s = settings(&[("OPENAI_API_KEY", "   ")]).unwrap();
        assert!(s.openai_api_key.is_none());
    }

    #[test]
    fn test_bad_timeout_is_error() {
        assert!(settings(&[("ENGINE_TIMEOUT_SECS", "soon")]).is_err());
    }

    #[test]
    fn test_load_entity_patterns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"[{"id": "sku", "category": "product", "pattern": "SKU-(\\d+)"}]"#,
        )
        .unwrap();
        let patterns = load_entity_patterns(file.path()).unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].category, "product");
        assert!(patterns[0].deduplicate);
    }
}
