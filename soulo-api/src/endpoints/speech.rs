//! Speech-to-text endpoint.
//!
//! Audio uploads are multipart and cannot be replayed by the shared retry
//! loop, so transcription runs its own backoff: the delay starts at
//! `base_delay_ms` and doubles on each further attempt.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use soulo_core::config::SpeechConfig;
use soulo_core::constants::MAX_AUDIO_BYTES;
use soulo_core::error::{SouloError, SouloResult};

use crate::client::ApiClient;

/// Text recognised from an audio clip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptionResult {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    /// Clip length in seconds, when the vendor reports it.
    #[serde(default)]
    pub duration: Option<f64>,
}

/// Client for the transcription API.
#[derive(Clone)]
pub struct SpeechClient {
    api: ApiClient,
    model: String,
    max_attempts: u32,
    base_delay: Duration,
}

impl SpeechClient {
    /// `api_key` is passed separately so callers can fall back to the LLM key.
    pub fn new(config: &SpeechConfig, api_key: &str) -> SouloResult<Self> {
        if api_key.is_empty() {
            return Err(SouloError::MissingConfig("speech.api_key (or SOULO_SPEECH_API_KEY)".into()));
        }
        let api = ApiClient::new("speech", &config.base_url, config.timeout_ms)?.with_bearer(api_key);
        Ok(Self {
            api,
            model: config.model.clone(),
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
        })
    }

    /// Delay before retry number `retry` (0-based).
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << retry.min(16))
    }

    /// Transcribe an audio clip.
    pub async fn transcribe(&self, audio: &[u8], mime_type: &str) -> SouloResult<TranscriptionResult> {
        validate_audio(audio)?;
        let file_name = format!("recording.{}", extension_for_mime(mime_type));

        let mut last_error = None;
        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let delay = self.backoff_delay(attempt - 1);
                warn!(
                    "retrying transcription (attempt {}/{}) after {}ms",
                    attempt + 1,
                    self.max_attempts,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            match self.transcribe_once(audio, mime_type, &file_name).await {
                Ok(result) => {
                    info!(
                        chars = result.text.len(),
                        language = result.language.as_deref().unwrap_or("unknown"),
                        "transcription complete"
                    );
                    return Ok(result);
                }
                Err(e) if e.is_transient() => {
                    warn!("transcription attempt {} failed: {e}", attempt + 1);
                    last_error = Some(e);
                }
                Err(e) => return Err(SouloError::Transcription(e.to_string())),
            }
        }

        Err(SouloError::Transcription(format!(
            "gave up after {} attempts: {}",
            self.max_attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn transcribe_once(
        &self,
        audio: &[u8],
        mime_type: &str,
        file_name: &str,
    ) -> SouloResult<TranscriptionResult> {
        let part = Part::bytes(audio.to_vec())
            .file_name(file_name.to_string())
            .mime_str(mime_type)
            .map_err(|e| SouloError::InvalidInput(format!("invalid mime type '{mime_type}': {e}")))?;
        let form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");

        let resp = self.api.post_multipart("/audio/transcriptions", form).await?;
        let mut result: TranscriptionResult = self.api.parse_json(resp).await?;
        result.text = result.text.trim().to_string();
        Ok(result)
    }
}

/// Reject empty and oversized clips before uploading.
pub fn validate_audio(audio: &[u8]) -> SouloResult<()> {
    if audio.is_empty() {
        return Err(SouloError::InvalidInput("audio payload is empty".into()));
    }
    if audio.len() > MAX_AUDIO_BYTES {
        return Err(SouloError::InvalidInput(format!(
            "audio payload is {} bytes, limit is {MAX_AUDIO_BYTES}",
            audio.len()
        )));
    }
    Ok(())
}

/// File extension the vendor uses to sniff the container format.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    let base = mime_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    match base.as_str() {
        "audio/webm" | "video/webm" => "webm",
        "audio/ogg" | "audio/opus" => "ogg",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" | "audio/aac" => "m4a",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/flac" => "flac",
        _ => "webm",
    }
}
