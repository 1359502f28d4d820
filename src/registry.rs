//! Engine registry.
//!
//! Maps stable engine names to descriptors. The registry is built once at
//! startup and then shared read-only behind an `Arc`, so lookups need no
//! locking.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{load_entity_patterns, Settings};
use crate::engines::cloud_vision::CloudVisionEngine;
use crate::engines::llm_ner::LlmNerEngine;
use crate::engines::ollama::{OllamaClient, OllamaNerEngine, OllamaVisionEngine};
use crate::engines::regex_ner::{default_patterns, RegexNerEngine};
use crate::engines::tesseract::TesseractEngine;
use crate::engines::{Engine, DEFAULT_VISION_PROMPT};
use crate::error::{RegistryError, RequestError};
use crate::openai::ChatClient;
use crate::request::RequestedEngine;
use crate::schema::{EngineKind, Locality};

/// What an engine consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// One call per page image.
    Pages,
    /// One call over the full document text.
    Text,
}

type EngineFactory = Arc<dyn Fn() -> Arc<dyn Engine> + Send + Sync>;

/// Registration record for one engine.
#[derive(Clone)]
pub struct EngineDescriptor {
    pub name: String,
    pub kind: EngineKind,
    pub locality: Locality,
    pub input: InputMode,
    factory: EngineFactory,
}

impl EngineDescriptor {
    /// Descriptor around one reentrant adapter reused by every request.
    pub fn shared(
        name: impl Into<String>,
        kind: EngineKind,
        locality: Locality,
        input: InputMode,
        engine: Arc<dyn Engine>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            locality,
            input,
            factory: Arc::new(move || engine.clone()),
        }
    }

    /// Descriptor whose factory builds a fresh adapter on every resolve.
    pub fn per_request<F>(
        name: impl Into<String>,
        kind: EngineKind,
        locality: Locality,
        input: InputMode,
        factory: F,
    ) -> Self
    where
        F: Fn() -> Arc<dyn Engine> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind,
            locality,
            input,
            factory: Arc::new(factory),
        }
    }

    pub fn info(&self) -> EngineInfo {
        EngineInfo {
            name: self.name.clone(),
            kind: self.kind,
            locality: self.locality,
            input: self.input,
        }
    }
}

impl std::fmt::Debug for EngineDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("locality", &self.locality)
            .field("input", &self.input)
            .finish()
    }
}

/// Public listing entry for `/engines` and the `engines` subcommand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineInfo {
    pub name: String,
    pub kind: EngineKind,
    pub locality: Locality,
    pub input: InputMode,
}

/// A requested engine bound to its adapter.
#[derive(Clone)]
pub struct ResolvedEngine {
    pub name: String,
    pub kind: EngineKind,
    pub locality: Locality,
    pub input: InputMode,
    pub engine: Arc<dyn Engine>,
}

/// Catalog of every engine known to this process, in registration order.
#[derive(Default, Debug)]
pub struct EngineRegistry {
    descriptors: Vec<EngineDescriptor>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: EngineDescriptor) -> Result<(), RegistryError> {
        if self.get(&descriptor.name).is_some() {
            return Err(RegistryError::DuplicateEngine(descriptor.name));
        }
        debug!(
            "Registered engine {} ({}, {:?})",
            descriptor.name, descriptor.kind, descriptor.locality
        );
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&EngineDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn list(&self) -> Vec<EngineInfo> {
        self.descriptors.iter().map(EngineDescriptor::info).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Bind requested engines to adapters, in request order.
    ///
    /// Every unknown name is reported in a single error. Duplicates collapse
    /// to their first occurrence.
    pub fn resolve(
        &self,
        requested: &[RequestedEngine],
    ) -> Result<Vec<ResolvedEngine>, RequestError> {
        let mut seen = HashSet::new();
        let mut unknown = Vec::new();
        let mut found = Vec::new();

        for req in requested {
            if !seen.insert(req.name.as_str()) {
                continue;
            }
            match self.get(&req.name) {
                Some(descriptor) => found.push((req, descriptor)),
                None => unknown.push(req.name.clone()),
            }
        }

        if !unknown.is_empty() {
            return Err(RequestError::UnknownEngine { names: unknown });
        }

        for (req, descriptor) in &found {
            if let Some(step) = req.step {
                if step != descriptor.kind {
                    return Err(RequestError::EngineKindMismatch {
                        name: descriptor.name.clone(),
                        declared: descriptor.kind,
                        requested: step,
                    });
                }
            }
        }

        Ok(found
            .into_iter()
            .map(|(_, d)| ResolvedEngine {
                name: d.name.clone(),
                kind: d.kind,
                locality: d.locality,
                input: d.input,
                engine: (d.factory)(),
            })
            .collect())
    }
}

/// Build the production registry from resolved settings.
///
/// Local engines are always registered; an unreachable backend shows up as
/// an `unavailable` failure when used. Cloud engines need an API key.
pub fn build_registry(settings: &Settings, client: reqwest::Client) -> anyhow::Result<EngineRegistry> {
    let mut registry = EngineRegistry::new();
    let prompt = settings
        .vision_prompt
        .as_deref()
        .unwrap_or(DEFAULT_VISION_PROMPT);
    let default_language = crate::engines::tesseract::tesseract_languages(
        &settings.default_languages,
        "eng",
    )
    .unwrap_or_else(|_| "eng".to_string());

    registry.register(EngineDescriptor::shared(
        "tesseract",
        EngineKind::Ocr,
        Locality::Local,
        InputMode::Pages,
        Arc::new(TesseractEngine::new(&settings.tesseract_path, default_language)),
    ))?;

    let ollama = OllamaClient::new(client.clone(), &settings.ollama_base_url);
    registry.register(EngineDescriptor::shared(
        "ollama_vision",
        EngineKind::Ocr,
        Locality::Local,
        InputMode::Pages,
        Arc::new(OllamaVisionEngine::new(
            ollama.clone(),
            &settings.ollama_vision_model,
            prompt,
            &settings.vision_labels,
        )),
    ))?;
    registry.register(EngineDescriptor::shared(
        "ollama_ner",
        EngineKind::Ner,
        Locality::Local,
        InputMode::Text,
        Arc::new(OllamaNerEngine::new(ollama, &settings.ollama_ner_model)),
    ))?;

    let mut patterns = default_patterns();
    if let Some(path) = &settings.entity_patterns_path {
        patterns.extend(load_entity_patterns(path)?);
    }
    registry.register(EngineDescriptor::shared(
        "regex_ner",
        EngineKind::Ner,
        Locality::Local,
        InputMode::Text,
        Arc::new(RegexNerEngine::new(&patterns)),
    ))?;

    if let Some(api_key) = &settings.openai_api_key {
        let chat = ChatClient::new(
            client,
            &settings.openai_base_url,
            api_key,
            &settings.openai_model,
        );
        registry.register(EngineDescriptor::shared(
            "cloud_vision",
            EngineKind::Ocr,
            Locality::Cloud,
            InputMode::Pages,
            Arc::new(CloudVisionEngine::new(
                chat.clone(),
                prompt,
                &settings.vision_labels,
            )),
        ))?;
        registry.register(EngineDescriptor::shared(
            "openai_ner",
            EngineKind::Ner,
            Locality::Cloud,
            InputMode::Text,
            Arc::new(LlmNerEngine::new(
                "openai_ner",
                chat.clone().with_model(&settings.openai_ner_model),
            )),
        ))?;
        registry.register(EngineDescriptor::shared(
            "cloud_vision_ner",
            EngineKind::Ner,
            Locality::Cloud,
            InputMode::Pages,
            Arc::new(LlmNerEngine::new("cloud_vision_ner", chat)),
        ))?;
    } else {
        info!("OPENAI_API_KEY not set, cloud engines disabled");
    }

    info!("Engine registry ready: {:?}", registry.names());
    Ok(registry)
}
