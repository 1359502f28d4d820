//! Cloud vision LLM engine (OpenAI-compatible chat API with image input).

use tracing::info;

use super::{vision_prompt, Engine, EngineInput};
use crate::error::EngineError;
use crate::openai::{ChatClient, Message};
use crate::schema::{EngineOutput, OcrOutput};

pub struct CloudVisionEngine {
    client: ChatClient,
    prompt: String,
}

impl CloudVisionEngine {
    pub fn new(client: ChatClient, prompt: &str, labels: &[String]) -> Self {
        Self {
            client,
            prompt: vision_prompt(prompt, labels),
        }
    }
}

#[async_trait::async_trait]
impl Engine for CloudVisionEngine {
    fn name(&self) -> &str {
        "cloud_vision"
    }

    async fn extract(&self, input: EngineInput<'_>) -> Result<EngineOutput, EngineError> {
        let image = input
            .page()
            .ok_or_else(|| EngineError::missing_input("cloud_vision requires a page image"))?;

        let messages = vec![Message::user_with_image(
            self.prompt.clone(),
            &image.mime,
            &image.data,
        )];
        let text = self.client.chat(messages, None, Some(4096)).await?;

        info!(
            "cloud_vision: page {} -> {} chars (model={})",
            image.index,
            text.len(),
            self.client.model()
        );
        // The model does not score regions, so the span list stays empty.
        Ok(EngineOutput::Text(OcrOutput::text_only(text.trim())))
    }
}
