//! Local model engines served by Ollama.
//!
//! `ollama_vision` transcribes a page with a vision model; `ollama_ner`
//! extracts entities from text with a local LLM.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{entities_from_json, encode_page, ner_prompt, parse_llm_json, vision_prompt};
use super::{Engine, EngineInput};
use crate::error::EngineError;
use crate::schema::{EngineOutput, OcrOutput};

/// Minimal client for Ollama's `/api/generate`.
#[derive(Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn generate(
        &self,
        model: &str,
        prompt: String,
        images: Vec<String>,
        json: bool,
    ) -> Result<String, EngineError> {
        let body = GenerateRequest {
            model,
            prompt,
            stream: false,
            images,
            format: json.then_some("json"),
            options: GenerateOptions {
                temperature: 0.3,
                num_predict: 2048,
            },
        };

        debug!("Ollama generate: model={} images={}", model, body.images.len());

        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            let message = format!("Ollama API error ({}): {}", status, text);
            return Err(if status.as_u16() == 404 {
                // Ollama answers 404 when the model is not pulled
                EngineError::unavailable(message)
            } else {
                EngineError::processing(message)
            });
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::malformed(format!("Failed to parse Ollama response: {}", e)))?;
        Ok(parsed.response)
    }
}

/// Page transcription with a local vision model (llava, llama3.2-vision, ...).
pub struct OllamaVisionEngine {
    client: OllamaClient,
    model: String,
    prompt: String,
}

impl OllamaVisionEngine {
    pub fn new(client: OllamaClient, model: impl Into<String>, prompt: &str, labels: &[String]) -> Self {
        Self {
            client,
            model: model.into(),
            prompt: vision_prompt(prompt, labels),
        }
    }
}

#[async_trait::async_trait]
impl Engine for OllamaVisionEngine {
    fn name(&self) -> &str {
        "ollama_vision"
    }

    async fn extract(&self, input: EngineInput<'_>) -> Result<EngineOutput, EngineError> {
        let image = input
            .page()
            .ok_or_else(|| EngineError::missing_input("ollama_vision requires a page image"))?;

        let text = self
            .client
            .generate(&self.model, self.prompt.clone(), vec![encode_page(image)], false)
            .await?;

        info!(
            "ollama_vision: page {} -> {} chars (model={})",
            image.index,
            text.len(),
            self.model
        );
        Ok(EngineOutput::Text(OcrOutput::text_only(text.trim())))
    }
}

/// Entity extraction with a local LLM.
pub struct OllamaNerEngine {
    client: OllamaClient,
    model: String,
}

impl OllamaNerEngine {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait::async_trait]
impl Engine for OllamaNerEngine {
    fn name(&self) -> &str {
        "ollama_ner"
    }

    async fn extract(&self, input: EngineInput<'_>) -> Result<EngineOutput, EngineError> {
        let (prompt, images) = match input {
            EngineInput::Text(text) => (ner_prompt(text), Vec::new()),
            EngineInput::Page { image, .. } => (
                ner_prompt("(see the attached image)"),
                vec![encode_page(image)],
            ),
        };

        let raw = self.client.generate(&self.model, prompt, images, true).await?;
        let entities = entities_from_json(parse_llm_json(&raw)?)?;
        debug!("ollama_ner: {} categories", entities.len());
        Ok(EngineOutput::Entities(entities))
    }
}
