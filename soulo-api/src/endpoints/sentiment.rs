//! Sentiment-analysis endpoint (Google Natural Language style).

use serde::{Deserialize, Serialize};
use serde_json::json;

use soulo_core::config::SentimentConfig;
use soulo_core::error::{SouloError, SouloResult};

use crate::client::ApiClient;

/// Document sentiment: `score` in [-1, 1], `magnitude` >= 0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SentimentScore {
    pub score: f64,
    pub magnitude: f64,
}

impl SentimentScore {
    /// Clamp vendor values into their documented ranges.
    pub fn clamped(score: f64, magnitude: f64) -> Self {
        let score = if score.is_finite() { score.clamp(-1.0, 1.0) } else { 0.0 };
        let magnitude = if magnitude.is_finite() { magnitude.max(0.0) } else { 0.0 };
        Self { score, magnitude }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeSentimentResponse {
    document_sentiment: Option<DocumentSentiment>,
}

#[derive(Debug, Deserialize)]
struct DocumentSentiment {
    #[serde(default)]
    score: f64,
    #[serde(default)]
    magnitude: f64,
}

/// Client for document sentiment analysis.
#[derive(Clone)]
pub struct SentimentClient {
    api: ApiClient,
}

impl SentimentClient {
    pub fn new(config: &SentimentConfig) -> SouloResult<Self> {
        if config.api_key.is_empty() {
            return Err(SouloError::MissingConfig(
                "sentiment.api_key (or SOULO_SENTIMENT_API_KEY)".into(),
            ));
        }
        let api = ApiClient::new("sentiment", &config.base_url, config.timeout_ms)?
            .with_query_param("key", &config.api_key);
        Ok(Self { api })
    }

    /// Analyze the overall sentiment of a text.
    pub async fn analyze(&self, text: &str) -> SouloResult<SentimentScore> {
        if text.trim().is_empty() {
            return Err(SouloError::InvalidInput("cannot analyze empty text".into()));
        }
        let body = json!({
            "document": { "type": "PLAIN_TEXT", "content": text },
            "encodingType": "UTF8",
        });
        let resp: AnalyzeSentimentResponse = self.api.post_json("/documents:analyzeSentiment", &body).await?;
        score_from_response(resp)
    }
}

fn score_from_response(resp: AnalyzeSentimentResponse) -> SouloResult<SentimentScore> {
    resp.document_sentiment
        .map(|d| SentimentScore::clamped(d.score, d.magnitude))
        .ok_or_else(|| SouloError::Api {
            service: "sentiment".into(),
            status: 200,
            message: "response had no documentSentiment".into(),
        })
}
