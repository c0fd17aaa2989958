//! Journal service for creating and indexing entries.
//!
//! A recording goes through transcription, transcript refinement, sentiment
//! analysis, emotion/theme extraction and embedding before it is stored.
//! Transcription and storage are required; every other step degrades
//! gracefully and is reported back as skipped.

use std::collections::BTreeMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use soulo_api::{ChatMessageParam, CompletionOptions, SentimentScore};
use soulo_core::error::{SouloError, SouloResult};
use soulo_models::queries::DateWindow;
use soulo_models::JournalEntry;

use crate::event_bus::{AppEvent, EventBus};
use crate::service::{Service, ServiceState, StateCell};
use crate::store::JournalStore;
use crate::traits::{LanguageModel, SentimentAnalyzer, Transcriber};

/// Themes kept per entry.
pub const MAX_THEMES: usize = 8;

/// Emotions kept per entry.
pub const MAX_EMOTIONS: usize = 6;

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap();
}

const REFINE_PROMPT: &str = "Clean up this voice-journal transcript. Fix punctuation and \
capitalization and remove filler words and false starts. Keep the speaker's wording, meaning \
and language, and do not add anything. Reply with the cleaned text only.";

const EMOTION_PROMPT: &str = "Identify the emotions expressed in this journal entry and its \
main themes. Reply with a JSON object of the form \
{\"emotions\": {\"<emotion>\": <intensity 0 to 1>}, \"themes\": [\"<theme>\"]}. \
Use at most 6 emotions as lowercase single words and at most 8 short lowercase themes.";

/// Emotions and themes extracted from an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmotionAnalysis {
    pub emotions: BTreeMap<String, f64>,
    pub themes: Vec<String>,
}

/// An optional processing step that did not complete.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedStep {
    pub step: String,
    pub error: String,
}

/// A stored entry and the steps that were skipped while creating it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedEntry {
    pub entry: JournalEntry,
    pub skipped_steps: Vec<SkippedStep>,
}

/// Outcome of an embedding backfill.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReindexReport {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
}

/// Service for journal entries.
pub struct JournalService {
    state: StateCell,
    store: Arc<dyn JournalStore>,
    llm: Arc<dyn LanguageModel>,
    transcriber: Arc<dyn Transcriber>,
    sentiment: Option<Arc<dyn SentimentAnalyzer>>,
    event_bus: EventBus,
}

impl JournalService {
    /// Create a new JournalService. Without a sentiment analyzer entries are
    /// stored without a sentiment score.
    pub fn new(
        store: Arc<dyn JournalStore>,
        llm: Arc<dyn LanguageModel>,
        transcriber: Arc<dyn Transcriber>,
        sentiment: Option<Arc<dyn SentimentAnalyzer>>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            state: StateCell::new(),
            store,
            llm,
            transcriber,
            sentiment,
            event_bus,
        }
    }

    /// Turn a voice recording into a stored entry.
    pub async fn process_recording(
        &self,
        audio: &[u8],
        mime_type: &str,
        user_id: &str,
    ) -> SouloResult<ProcessedEntry> {
        let transcription = match self.transcriber.transcribe(audio, mime_type).await {
            Ok(t) => t,
            Err(e) => {
                warn!("transcription failed: {e}");
                self.event_bus.emit(AppEvent::TranscriptionFailed { error: e.to_string() });
                return Err(e);
            }
        };

        let raw = transcription.text.trim().to_string();
        if raw.is_empty() {
            return Err(SouloError::InvalidInput("no speech detected in recording".into()));
        }

        let mut skipped = Vec::new();
        let content = match self.refine_transcript(&raw).await {
            Ok(refined) => refined,
            Err(e) => {
                skip(&mut skipped, "refinement", &e);
                raw.clone()
            }
        };

        let mut entry = JournalEntry::new(user_id, &content);
        entry.transcript = Some(raw);
        entry.duration_secs = transcription.duration;

        self.enrich_and_store(entry, skipped).await
    }

    /// Store a typed entry.
    pub async fn create_text_entry(&self, text: &str, user_id: &str) -> SouloResult<ProcessedEntry> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SouloError::InvalidInput("entry text is empty".into()));
        }
        self.enrich_and_store(JournalEntry::new(user_id, text), Vec::new()).await
    }

    async fn enrich_and_store(
        &self,
        mut entry: JournalEntry,
        mut skipped: Vec<SkippedStep>,
    ) -> SouloResult<ProcessedEntry> {
        let text = entry.text().to_string();

        let (sentiment, emotions, embedding) = tokio::join!(
            self.analyze_sentiment(&text),
            self.analyze_emotions(&text),
            self.llm.embed(&text),
        );

        match sentiment {
            Ok(Some(score)) => {
                entry.sentiment = Some(score.score);
                entry.sentiment_magnitude = Some(score.magnitude);
            }
            Ok(None) => debug!("no sentiment analyzer configured"),
            Err(e) => skip(&mut skipped, "sentiment", &e),
        }
        match emotions {
            Ok(analysis) => {
                entry.emotions = analysis.emotions;
                entry.themes = analysis.themes;
            }
            Err(e) => skip(&mut skipped, "emotions", &e),
        }
        match embedding {
            Ok(vector) => entry.embedding = Some(vector),
            Err(e) => skip(&mut skipped, "embedding", &e),
        }

        let stored = self.store.insert_entry(&entry).await?;
        info!(
            "stored entry {} ({} chars, {} skipped step(s))",
            stored.id,
            stored.content.len(),
            skipped.len()
        );

        self.event_bus.emit(AppEvent::EntryCreated {
            entry_id: stored.id.clone(),
            user_id: stored.user_id.clone(),
            has_embedding: entry.embedding.is_some(),
        });
        for step in &skipped {
            self.event_bus.emit(AppEvent::EntryStepSkipped {
                step: step.step.clone(),
                error: step.error.clone(),
            });
        }

        Ok(ProcessedEntry { entry: stored, skipped_steps: skipped })
    }

    /// Punctuate and de-fill a raw transcript.
    pub async fn refine_transcript(&self, raw: &str) -> SouloResult<String> {
        let messages = [ChatMessageParam::system(REFINE_PROMPT), ChatMessageParam::user(raw)];
        let refined = self
            .llm
            .complete(&messages, &CompletionOptions { temperature: Some(0.2), ..Default::default() })
            .await?;
        if refined.trim().is_empty() {
            return Err(SouloError::Generation("refinement returned no text".into()));
        }
        Ok(refined.trim().to_string())
    }

    async fn analyze_sentiment(&self, text: &str) -> SouloResult<Option<SentimentScore>> {
        match &self.sentiment {
            Some(analyzer) => analyzer.analyze(text).await.map(Some),
            None => Ok(None),
        }
    }

    /// Extract emotions and themes with a JSON completion.
    pub async fn analyze_emotions(&self, text: &str) -> SouloResult<EmotionAnalysis> {
        let messages = [ChatMessageParam::system(EMOTION_PROMPT), ChatMessageParam::user(text)];
        let options = CompletionOptions { json_mode: true, ..CompletionOptions::structured(300) };
        let raw = self.llm.complete(&messages, &options).await?;
        parse_emotion_analysis(&raw)
    }

    /// Embed entries that have no embedding yet, up to `limit` of them.
    pub async fn reindex_missing_embeddings(&self, user_id: &str, limit: usize) -> SouloResult<ReindexReport> {
        let pending = self.store.entries_missing_embeddings(user_id, limit).await?;
        let mut report = ReindexReport { total: pending.len(), ..Default::default() };

        for entry in pending {
            let text = entry.text();
            if text.trim().is_empty() {
                report.failed += 1;
                continue;
            }
            let result = match self.llm.embed(text).await {
                Ok(vector) => self.store.update_embedding(&entry.id, &vector).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(true) => report.processed += 1,
                Ok(false) => {
                    warn!("entry {} vanished during reindex", entry.id);
                    report.failed += 1;
                }
                Err(e) => {
                    warn!("failed to embed entry {}: {e}", entry.id);
                    report.failed += 1;
                }
            }
            self.event_bus.emit(AppEvent::ReindexProgress {
                processed: report.processed,
                failed: report.failed,
                total: report.total,
            });
        }

        info!("reindex complete: {}/{} embedded, {} failed", report.processed, report.total, report.failed);
        Ok(report)
    }

    /// A page of entries, newest first.
    pub async fn list_entries(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
        window: Option<&DateWindow>,
    ) -> SouloResult<Vec<JournalEntry>> {
        self.store.list_entries(user_id, offset, limit, window).await
    }

    /// Keyword search over entry text.
    pub async fn search_entries(&self, user_id: &str, keyword: &str, limit: usize) -> SouloResult<Vec<JournalEntry>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(SouloError::InvalidInput("search keyword is empty".into()));
        }
        self.store.search_entries(user_id, keyword, limit).await
    }

    /// Delete an entry.
    pub async fn delete_entry(&self, entry_id: &str) -> SouloResult<()> {
        if !self.store.delete_entry(entry_id).await? {
            return Err(SouloError::EntryNotFound(entry_id.to_string()));
        }
        Ok(())
    }
}

fn skip(skipped: &mut Vec<SkippedStep>, step: &str, error: &SouloError) {
    warn!("{step} step skipped: {error}");
    skipped.push(SkippedStep {
        step: step.to_string(),
        error: error.to_string(),
    });
}

/// Parse the model's emotion/theme JSON leniently.
///
/// Accepts code-fenced output and surrounding prose, emotions as an object
/// or as a list of `{name, score}` objects, and numeric strings. Scores are
/// clamped to [0, 1]; names are lower-cased.
pub fn parse_emotion_analysis(raw: &str) -> SouloResult<EmotionAnalysis> {
    let text = match CODE_FENCE.captures(raw) {
        Some(caps) => caps[1].to_string(),
        None => raw.to_string(),
    };
    let body = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => return Err(SouloError::Serialization("emotion analysis was not a JSON object".into())),
    };
    let value: serde_json::Value = serde_json::from_str(body)?;

    let mut emotions = BTreeMap::new();
    match value.get("emotions") {
        Some(serde_json::Value::Object(map)) => {
            for (name, score) in map {
                insert_emotion(&mut emotions, name, score);
            }
        }
        Some(serde_json::Value::Array(items)) => {
            for item in items {
                let name = item.get("name").or_else(|| item.get("emotion")).and_then(|v| v.as_str());
                let score = item.get("score").or_else(|| item.get("intensity"));
                if let (Some(name), Some(score)) = (name, score) {
                    insert_emotion(&mut emotions, name, score);
                }
            }
        }
        _ => {}
    }
    if emotions.len() > MAX_EMOTIONS {
        let mut ranked: Vec<(String, f64)> = emotions.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(MAX_EMOTIONS);
        emotions = ranked.into_iter().collect();
    }

    let mut themes: Vec<String> = Vec::new();
    if let Some(list) = value.get("themes").and_then(|v| v.as_array()) {
        for theme in list.iter().filter_map(|t| t.as_str()) {
            let theme = theme.trim().to_lowercase();
            if !theme.is_empty() && !themes.contains(&theme) {
                themes.push(theme);
            }
            if themes.len() == MAX_THEMES {
                break;
            }
        }
    }

    Ok(EmotionAnalysis { emotions, themes })
}

fn insert_emotion(emotions: &mut BTreeMap<String, f64>, name: &str, score: &serde_json::Value) {
    let score = match score {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let name = name.trim().to_lowercase();
    if let Some(score) = score.filter(|s| s.is_finite()) {
        if !name.is_empty() {
            emotions.insert(name, score.clamp(0.0, 1.0));
        }
    }
}

impl Service for JournalService {
    fn name(&self) -> &str { "journal" }
    fn state(&self) -> ServiceState { self.state.get() }
    fn init(&self) -> SouloResult<()> {
        self.state.set(ServiceState::Running);
        info!(
            "journal service initialized ({} store, sentiment {})",
            self.store.name(),
            if self.sentiment.is_some() { "enabled" } else { "disabled" }
        );
        Ok(())
    }
    fn shutdown(&self) -> SouloResult<()> {
        self.state.set(ServiceState::Stopped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_object() {
        let a = parse_emotion_analysis(r#"{"emotions":{"Joy":0.8,"calm":"0.4","fear":1.7},"themes":["Nature"," friends ","nature"]}"#)
            .unwrap();
        assert_eq!(a.emotions.get("joy"), Some(&0.8));
        assert_eq!(a.emotions.get("calm"), Some(&0.4));
        assert_eq!(a.emotions.get("fear"), Some(&1.0));
        assert_eq!(a.themes, vec!["nature".to_string(), "friends".to_string()]);
    }

    #[test]
    fn test_parse_fenced_with_prose() {
        let raw = "Here you go:\n```json\n{\"emotions\": [{\"name\": \"sadness\", \"score\": -0.2}], \"themes\": []}\n```";
        let a = parse_emotion_analysis(raw).unwrap();
        assert_eq!(a.emotions.get("sadness"), Some(&0.0));
        assert!(a.themes.is_empty());
    }

    #[test]
    fn test_parse_limits() {
        let themes: Vec<String> = (0..12).map(|i| format!("t{i}")).collect();
        let emotions: serde_json::Map<String, serde_json::Value> =
            (0..9).map(|i| (format!("e{i}"), serde_json::json!(i as f64 / 10.0))).collect();
        let raw = serde_json::json!({ "emotions": emotions, "themes": themes }).to_string();
        let a = parse_emotion_analysis(&raw).unwrap();
        assert_eq!(a.themes.len(), MAX_THEMES);
        assert_eq!(a.emotions.len(), MAX_EMOTIONS);
        assert!(a.emotions.contains_key("e8"));
        assert!(!a.emotions.contains_key("e0"));
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(parse_emotion_analysis("I think the user is happy").is_err());
        let empty = parse_emotion_analysis("{}").unwrap();
        assert!(empty.emotions.is_empty() && empty.themes.is_empty());
    }
}
