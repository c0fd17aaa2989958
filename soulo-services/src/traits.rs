//! Seams between the services and the vendor APIs.
//!
//! The services depend on these traits rather than on the HTTP clients so
//! that request handlers can be exercised with in-process doubles.

use async_trait::async_trait;

use soulo_api::{
    ChatMessageParam, CompletionOptions, LlmClient, SentimentClient, SentimentScore, SpeechClient,
    TranscriptionResult,
};
use soulo_core::error::{SouloError, SouloResult};

/// Chat completions and embeddings.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessageParam], options: &CompletionOptions) -> SouloResult<String>;

    async fn embed(&self, text: &str) -> SouloResult<Vec<f32>>;
}

/// Speech-to-text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> SouloResult<TranscriptionResult>;
}

/// Document sentiment.
#[async_trait]
pub trait SentimentAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> SouloResult<SentimentScore>;
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn complete(&self, messages: &[ChatMessageParam], options: &CompletionOptions) -> SouloResult<String> {
        self.chat_completion(messages, options).await
    }

    async fn embed(&self, text: &str) -> SouloResult<Vec<f32>> {
        self.create_embedding(text).await
    }
}

#[async_trait]
impl Transcriber for SpeechClient {
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> SouloResult<TranscriptionResult> {
        SpeechClient::transcribe(self, audio, mime_type).await
    }
}

#[async_trait]
impl SentimentAnalyzer for SentimentClient {
    async fn analyze(&self, text: &str) -> SouloResult<SentimentScore> {
        SentimentClient::analyze(self, text).await
    }
}

/// Stand-in used when a vendor key is missing; every call reports which
/// setting to fill in.
pub struct Unconfigured {
    pub setting: &'static str,
}

#[async_trait]
impl LanguageModel for Unconfigured {
    async fn complete(&self, _messages: &[ChatMessageParam], _options: &CompletionOptions) -> SouloResult<String> {
        Err(SouloError::MissingConfig(self.setting.to_string()))
    }

    async fn embed(&self, _text: &str) -> SouloResult<Vec<f32>> {
        Err(SouloError::MissingConfig(self.setting.to_string()))
    }
}

#[async_trait]
impl Transcriber for Unconfigured {
    async fn transcribe(&self, _audio: &[u8], _mime_type: &str) -> SouloResult<TranscriptionResult> {
        Err(SouloError::MissingConfig(self.setting.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_reports_setting() {
        let model = Unconfigured { setting: "llm.api_key" };
        match model.embed("hello").await {
            Err(SouloError::MissingConfig(s)) => assert_eq!(s, "llm.api_key"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
