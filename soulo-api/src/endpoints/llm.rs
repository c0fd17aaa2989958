//! Language-model endpoints (OpenAI-compatible chat completions and embeddings).

use serde::{Deserialize, Serialize};
use serde_json::json;

use soulo_core::config::LlmConfig;
use soulo_core::error::{SouloError, SouloResult};

use crate::client::ApiClient;

/// One message in a chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessageParam {
    pub role: String,
    pub content: String,
}

impl ChatMessageParam {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self { role: role.to_string(), content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(soulo_core::constants::roles::SYSTEM, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(soulo_core::constants::roles::USER, content)
    }
}

/// Per-call overrides for a completion.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask for a JSON object response.
    pub json_mode: bool,
}

impl CompletionOptions {
    /// Deterministic settings for structured output (SQL, JSON analysis).
    pub fn structured(max_tokens: u32) -> Self {
        Self { temperature: Some(0.0), max_tokens: Some(max_tokens), json_mode: false }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for chat completions and embeddings.
#[derive(Clone)]
pub struct LlmClient {
    api: ApiClient,
    chat_model: String,
    embedding_model: String,
    temperature: f32,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> SouloResult<Self> {
        if config.api_key.is_empty() {
            return Err(SouloError::MissingConfig("llm.api_key (or SOULO_LLM_API_KEY)".into()));
        }
        let api = ApiClient::new("llm", &config.base_url, config.timeout_ms)?.with_bearer(&config.api_key);
        Ok(Self {
            api,
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    /// Build the request body for a completion.
    pub fn completion_body(&self, messages: &[ChatMessageParam], options: &CompletionOptions) -> serde_json::Value {
        let mut body = json!({
            "model": self.chat_model,
            "messages": messages,
            "temperature": options.temperature.unwrap_or(self.temperature),
            "max_tokens": options.max_tokens.unwrap_or(self.max_tokens),
        });
        if options.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }

    /// Run a chat completion and return the first choice's text.
    pub async fn chat_completion(
        &self,
        messages: &[ChatMessageParam],
        options: &CompletionOptions,
    ) -> SouloResult<String> {
        let body = self.completion_body(messages, options);
        let resp: ChatCompletionResponse = self.api.post_extended_json("/chat/completions", &body).await?;
        first_choice_text(resp)
    }

    /// Embed a single text.
    pub async fn create_embedding(&self, text: &str) -> SouloResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(SouloError::InvalidInput("cannot embed empty text".into()));
        }
        let body = json!({ "model": self.embedding_model, "input": text });
        let resp: EmbeddingResponse = self.api.post_json("/embeddings", &body).await?;
        resp.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SouloError::Generation("embedding response contained no vector".into()))
    }
}

fn first_choice_text(resp: ChatCompletionResponse) -> SouloResult<String> {
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SouloError::Generation("completion returned no content".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> LlmClient {
        LlmClient::new(&LlmConfig { api_key: "sk-test".into(), ..Default::default() }).unwrap()
    }

    #[test]
    fn test_requires_api_key() {
        assert!(matches!(
            LlmClient::new(&LlmConfig::default()),
            Err(SouloError::MissingConfig(_))
        ));
    }

    #[test]
    fn test_completion_body() {
        let c = client();
        let body = c.completion_body(
            &[ChatMessageParam::system("be kind"), ChatMessageParam::user("hi")],
            &CompletionOptions { json_mode: true, ..CompletionOptions::structured(200) },
        );
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["max_tokens"], 200);
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["response_format"]["type"], "json_object");

        let plain = c.completion_body(&[], &CompletionOptions::default());
        assert!(plain.get("response_format").is_none());
        assert_eq!(plain["max_tokens"], 1000);
    }

    #[test]
    fn test_first_choice_text() {
        let resp: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "role": "assistant", "content": "  Hello  " } }]
        }))
        .unwrap();
        assert_eq!(first_choice_text(resp).unwrap(), "Hello");

        let empty: ChatCompletionResponse = serde_json::from_value(json!({ "choices": [] })).unwrap();
        assert!(matches!(first_choice_text(empty), Err(SouloError::Generation(_))));
    }

    #[tokio::test]
    async fn test_embed_rejects_empty_text() {
        assert!(matches!(
            client().create_embedding("   ").await,
            Err(SouloError::InvalidInput(_))
        ));
    }
}
