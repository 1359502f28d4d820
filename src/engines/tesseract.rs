//! Tesseract OCR engine.
//!
//! Runs the `tesseract` binary in TSV mode so word-level confidence and
//! boxes come back alongside the text. Confidence stays on Tesseract's
//! native 0-100 scale and boxes stay in left/top/width/height form.

use std::io::Write;
use std::path::PathBuf;

use tokio::process::Command;
use tracing::debug;

use super::{Engine, EngineInput};
use crate::error::EngineError;
use crate::request::PageImage;
use crate::schema::{BoundingBox, EngineOutput, OcrOutput, TextSpan};

/// ISO 639-1 → Tesseract traineddata names.
const LANGUAGE_CODES: &[(&str, &str)] = &[
    ("en", "eng"),
    ("de", "deu"),
    ("fr", "fra"),
    ("es", "spa"),
    ("it", "ita"),
    ("pt", "por"),
    ("nl", "nld"),
    ("pl", "pol"),
    ("sv", "swe"),
    ("tr", "tur"),
    ("ru", "rus"),
    ("ar", "ara"),
    ("hi", "hin"),
    ("ja", "jpn"),
    ("ko", "kor"),
    ("zh", "chi_sim"),
];

pub struct TesseractEngine {
    binary: PathBuf,
    default_language: String,
}

impl TesseractEngine {
    pub fn new(binary: impl Into<PathBuf>, default_language: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            default_language: default_language.into(),
        }
    }

    async fn run(&self, image: &PageImage, languages: &str) -> Result<String, EngineError> {
        let mut file = tempfile::Builder::new()
            .suffix(extension_for(&image.mime))
            .tempfile()
            .map_err(|e| EngineError::internal(format!("Failed to create temp file: {}", e)))?;
        file.write_all(&image.data)
            .map_err(|e| EngineError::internal(format!("Failed to write temp file: {}", e)))?;

        debug!(
            "Running tesseract on page {} ({} bytes, -l {})",
            image.index,
            image.data.len(),
            languages
        );

        let output = Command::new(&self.binary)
            .arg(file.path())
            .arg("stdout")
            .args(["-l", languages])
            .arg("tsv")
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).to_string())
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if stderr.contains("Failed loading language") {
                    Err(EngineError::unsupported_language(format!(
                        "tesseract has no traineddata for '{}': {}",
                        languages,
                        stderr.trim()
                    )))
                } else {
                    Err(EngineError::processing(format!(
                        "tesseract failed: {}",
                        stderr.trim()
                    )))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(EngineError::unavailable(
                format!("{} not found (install tesseract-ocr)", self.binary.display()),
            )),
            Err(e) => Err(EngineError::internal(format!("Failed to run tesseract: {}", e))),
        }
    }
}

#[async_trait::async_trait]
impl Engine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn extract(&self, input: EngineInput<'_>) -> Result<EngineOutput, EngineError> {
        let EngineInput::Page { image, languages } = input else {
            return Err(EngineError::missing_input("tesseract requires a page image"));
        };

        let langs = tesseract_languages(languages, &self.default_language)?;
        let tsv = self.run(image, &langs).await?;
        Ok(EngineOutput::Text(parse_tsv(&tsv, image.index)?))
    }
}

/// Map language hints to a `+`-joined Tesseract language argument.
pub fn tesseract_languages(hints: &[String], default: &str) -> Result<String, EngineError> {
    if hints.is_empty() {
        return Ok(default.to_string());
    }

    let mut codes: Vec<String> = Vec::new();
    for hint in hints.iter().flat_map(|h| h.split('+')) {
        let hint = hint.trim().to_ascii_lowercase();
        if hint.is_empty() {
            continue;
        }
        let code = match LANGUAGE_CODES.iter().find(|(iso, _)| *iso == hint) {
            Some((_, tess)) => tess.to_string(),
            None if hint.len() >= 3
                && hint.chars().all(|c| c.is_ascii_alphabetic() || c == '_') =>
            {
                hint
            }
            None => {
                return Err(EngineError::unsupported_language(format!(
                    "no Tesseract language for '{}'",
                    hint
                )))
            }
        };
        if !codes.contains(&code) {
            codes.push(code);
        }
    }

    if codes.is_empty() {
        Ok(default.to_string())
    } else {
        Ok(codes.join("+"))
    }
}

/// Parse `tesseract ... tsv` output into text and word spans.
///
/// Words on the same (block, paragraph, line) are joined with spaces and lines
/// with newlines.
pub fn parse_tsv(tsv: &str, page: usize) -> Result<OcrOutput, EngineError> {
    let mut lines = tsv.lines();
    let header = lines
        .next()
        .ok_or_else(|| EngineError::malformed("empty tesseract output"))?;
    if !header.starts_with("level") {
        return Err(EngineError::malformed(format!(
            "unexpected tesseract TSV header: {}",
            header
        )));
    }

    let mut spans = Vec::new();
    let mut text_lines: Vec<String> = Vec::new();
    let mut current_line: Option<(u32, u32, u32)> = None;

    for row in lines {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let word = cols[11].trim();
        if word.is_empty() {
            continue;
        }

        let num = |i: usize| -> Result<f64, EngineError> {
            cols[i].trim().parse::<f64>().map_err(|_| {
                EngineError::malformed(format!("bad numeric column {} in row: {}", i, row))
            })
        };
        let conf = num(10)?;
        let line_key = (num(2)? as u32, num(3)? as u32, num(4)? as u32);

        if current_line == Some(line_key) {
            if let Some(last) = text_lines.last_mut() {
                last.push(' ');
                last.push_str(word);
            }
        } else {
            text_lines.push(word.to_string());
            current_line = Some(line_key);
        }

        spans.push(TextSpan {
            text: word.to_string(),
            confidence: (conf >= 0.0).then_some(conf),
            bbox: Some(BoundingBox::Ltwh([num(6)?, num(7)?, num(8)?, num(9)?])),
            page,
        });
    }

    Ok(OcrOutput {
        text: text_lines.join("\n"),
        spans,
    })
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "image/gif" => ".gif",
        "image/bmp" => ".bmp",
        "image/webp" => ".webp",
        "image/tiff" => ".tiff",
        _ => ".img",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineErrorKind;

    const SAMPLE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t
4\t1\t1\t1\t1\t0\t10\t12\t200\t20\t-1\t
5\t1\t1\t1\t1\t1\t10\t12\t60\t20\t96.234567\tInvoice
5\t1\t1\t1\t1\t2\t75\t12\t40\t20\t91\tNo.
5\t1\t1\t1\t2\t1\t10\t40\t80\t20\t88.5\t12345
5\t1\t1\t1\t2\t2\t95\t40\t5\t20\t-1\t \n";

    #[test]
    fn test_parse_tsv_groups_lines() {
        let out = parse_tsv(SAMPLE_TSV, 2).unwrap();
        assert_eq!(out.text, "Invoice No.\n12345");
        assert_eq!(out.spans.len(), 3);
        assert!(out.spans.iter().all(|s| s.page == 2));
    }

    #[test]
    fn test_parse_tsv_keeps_native_scale() {
        let out = parse_tsv(SAMPLE_TSV, 0).unwrap();
        assert_eq!(out.spans[0].confidence, Some(96.234567));
        assert_eq!(
            out.spans[0].bbox,
            Some(BoundingBox::Ltwh([10.0, 12.0, 60.0, 20.0]))
        );
    }

    #[test]
    fn test_parse_tsv_rejects_garbage() {
        let err = parse_tsv("hello world", 0).unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::MalformedResponse);
    }

    #[test]
    fn test_language_mapping() {
        let hints = vec!["en".to_string(), "de".to_string(), "eng".to_string()];
        assert_eq!(tesseract_languages(&hints, "eng").unwrap(), "eng+deu");
        assert_eq!(tesseract_languages(&[], "eng").unwrap(), "eng");
        assert_eq!(
            tesseract_languages(&["chi_tra+en".to_string()], "eng").unwrap(),
            "chi_tra+eng"
        );
    }

    #[test]
    fn test_unsupported_language() {
        let err = tesseract_languages(&["xx".to_string()], "eng").unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::UnsupportedLanguage);
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let engine = TesseractEngine::new("/nonexistent/tesseract-binary", "eng");
        let page = PageImage::new(0, vec![0u8; 4], "image/png");
        let err = engine
            .extract(EngineInput::Page {
                image: &page,
                languages: &[],
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_text_input_is_rejected() {
        let engine = TesseractEngine::new("tesseract", "eng");
        let err = engine.extract(EngineInput::Text("hi")).await.unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::MissingInput);
    }
}
