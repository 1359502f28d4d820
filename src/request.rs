//! Inputs to the orchestrator.

use crate::schema::EngineKind;

/// One rasterized page, still encoded (PNG, JPEG, ...).
#[derive(Debug, Clone)]
pub struct PageImage {
    pub index: usize,
    pub data: Vec<u8>,
    pub mime: String,
}

impl PageImage {
    pub fn new(index: usize, data: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            index,
            data,
            mime: mime.into(),
        }
    }
}

/// An engine named in a request, optionally pinned to a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedEngine {
    pub name: String,
    /// When set, the registry rejects engines of another declared kind.
    pub step: Option<EngineKind>,
}

impl RequestedEngine {
    pub fn any(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            step: None,
        }
    }

    pub fn ocr(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            step: Some(EngineKind::Ocr),
        }
    }

    pub fn ner(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            step: Some(EngineKind::Ner),
        }
    }
}

/// Everything the orchestrator needs to process one input file.
#[derive(Debug, Clone, Default)]
pub struct ExtractionRequest {
    pub pages: Vec<PageImage>,
    pub languages: Vec<String>,
    pub engines: Vec<RequestedEngine>,
    /// Text fed to NER engines when no OCR engine is requested.
    pub text: Option<String>,
    /// OCR engine whose merged text feeds NER; defaults to the first successful one.
    pub ner_text_source: Option<String>,
}

impl ExtractionRequest {
    pub fn new(pages: Vec<PageImage>) -> Self {
        Self {
            pages,
            ..Default::default()
        }
    }

    /// NER-only request over already-extracted text.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_engine(mut self, engine: RequestedEngine) -> Self {
        self.engines.push(engine);
        self
    }

    pub fn with_engines<I>(mut self, engines: I) -> Self
    where
        I: IntoIterator<Item = RequestedEngine>,
    {
        self.engines.extend(engines);
        self
    }

    pub fn with_ner_text_source(mut self, engine: impl Into<String>) -> Self {
        self.ner_text_source = Some(engine.into());
        self
    }
}

/// Split a comma/space separated list from a form field or flag.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_keeps_engine_order() {
        let req = ExtractionRequest::new(Vec::new())
            .with_languages(["en", "de"])
            .with_engine(RequestedEngine::ocr("tesseract"))
            .with_engines([RequestedEngine::ner("regex_ner")]);
        assert_eq!(req.languages, vec!["en", "de"]);
        assert_eq!(
            req.engines,
            vec![RequestedEngine::ocr("tesseract"), RequestedEngine::ner("regex_ner")]
        );
        assert_eq!(req.engines[1].step, Some(EngineKind::Ner));
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("en, de  fr"), vec!["en", "de", "fr"]);
        assert!(parse_list(" , ").is_empty());
    }
}
