//! Cloud LLM entity extraction (OpenAI-compatible chat API).
//!
//! The same adapter serves text NER and vision NER: text input is embedded in
//! the prompt, a page input is attached as an image.

use tracing::debug;

use super::{entities_from_json, ner_prompt, parse_llm_json, Engine, EngineInput};
use crate::error::EngineError;
use crate::openai::{ChatClient, Message};
use crate::schema::EngineOutput;

const SYSTEM_PROMPT: &str = "You are a Named Entity Recognition expert. \
You answer with a single JSON object and nothing else.";

pub struct LlmNerEngine {
    name: String,
    client: ChatClient,
}

impl LlmNerEngine {
    pub fn new(name: impl Into<String>, client: ChatClient) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }
}

#[async_trait::async_trait]
impl Engine for LlmNerEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(&self, input: EngineInput<'_>) -> Result<EngineOutput, EngineError> {
        let user = match input {
            EngineInput::Text(text) => Message::user(ner_prompt(text)),
            EngineInput::Page { image, .. } => Message::user_with_image(
                ner_prompt("(see the attached image)"),
                &image.mime,
                &image.data,
            ),
        };

        let raw = self
            .client
            .chat(vec![Message::system(SYSTEM_PROMPT), user], Some(0.3), Some(1000))
            .await?;
        let entities = entities_from_json(parse_llm_json(&raw)?)?;

        debug!(
            "{}: {} categories (model={})",
            self.name,
            entities.len(),
            self.client.model()
        );
        Ok(EngineOutput::Entities(entities))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineErrorKind;
    use crate::request::PageImage;
    use crate::test_support::{completion, StubServer};
    use serde_json::json;

    fn engine(base_url: &str) -> LlmNerEngine {
        let client = ChatClient::new(reqwest::Client::new(), base_url, "k", "gpt-4o-mini");
        LlmNerEngine::new("openai_ner", client)
    }

    fn entities(output: EngineOutput) -> crate::schema::EntityMap {
        match output {
            EngineOutput::Entities(entities) => entities,
            other => panic!("expected entities, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_text_input_with_fenced_answer() {
        let answer = "Here you go:\n```JSON\n{\"person_name\": [\"Jane Doe\"], \"location\": []}\n```";
        let stub = StubServer::start("/chat/completions", 200, completion(json!(answer))).await;

        let output = engine(&stub.base_url)
            .extract(EngineInput::Text("Jane Doe signed the lease."))
            .await
            .unwrap();
        let entities = entities(output);
        assert_eq!(entities["person_name"], vec!["Jane Doe"]);
        assert!(!entities.contains_key("location"));

        let requests = stub.requests();
        let messages = requests[0]["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        let prompt = messages[1]["content"].as_str().unwrap();
        assert!(prompt.contains("Jane Doe signed the lease."));
        assert_eq!(requests[0]["max_tokens"], 1000);
    }

    #[tokio::test]
    async fn test_page_input_attaches_image() {
        let stub = StubServer::start(
            "/chat/completions",
            200,
            completion(json!("{\"date\": [\"2024-03-15\"]}")),
        )
        .await;
        let page = PageImage::new(0, vec![1, 2, 3], "image/jpeg");

        let output = engine(&stub.base_url)
            .extract(EngineInput::Page {
                image: &page,
                languages: &[],
            })
            .await
            .unwrap();
        assert_eq!(entities(output)["date"], vec!["2024-03-15"]);

        let requests = stub.requests();
        let parts = &requests[0]["messages"][1]["content"];
        assert_eq!(parts[0]["type"], "image_url");
        assert_eq!(parts[0]["image_url"]["url"], "data:image/jpeg;base64,AQID");
    }

    #[tokio::test]
    async fn test_non_json_answer_is_malformed() {
        let stub = StubServer::start(
            "/chat/completions",
            200,
            completion(json!("I could not find any entities.")),
        )
        .await;
        let err = engine(&stub.base_url)
            .extract(EngineInput::Text("nothing here"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::MalformedResponse);
    }

    #[tokio::test]
    async fn test_rate_limit_is_unavailable() {
        let stub = StubServer::start("/chat/completions", 429, json!({"error": "slow down"})).await;
        let err = engine(&stub.base_url)
            .extract(EngineInput::Text("Jane Doe"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Unavailable);
    }
}
