//! Question complexity classifier.
//!
//! Scores a question by keyword and regex signals and maps the score to a
//! tier (`simple`, `moderate`, `complex`). The tier selects similarity
//! threshold, entry count, history depth, time budget and concurrency from
//! [`RetrievalConfig`].

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use soulo_core::config::{RetrievalConfig, TierConfig};

lazy_static! {
    static ref MULTI_PART: Regex = Regex::new(
        r"\b(and also|as well as|additionally|and how|and what|and why|and when|and where|and did|and do|and does|and is|and are|and was|and were)\b"
    ).unwrap();

    static ref COMPARISON: Regex = Regex::new(
        r"\b(compare[ds]?|comparing|comparison|versus|vs|difference|different|differ|trends?|trending|changed?|changes|changing|over time|improve[ds]?|improving|worse|worsen(ed|ing)?|better|more than|less than|progress(ed)?|evolve[ds]?|evolving|patterns?)\b"
    ).unwrap();

    static ref TIME_RANGE: Regex = Regex::new(
        r"\b(today|yesterday|tonight|this (morning|week|month|year)|last (night|week|month|year)|past (week|month|year)|(last|past)\s+(\d+|few|couple of)\s+(days?|weeks?|months?|years?)|recently|lately|since|january|february|march|april|june|july|august|september|october|november|december|(in|during) may|may \d{4}|weekends?)\b"
    ).unwrap();

    static ref AGGREGATION: Regex = Regex::new(
        r"\b(how (many|often|much|frequently)|count|number of|average|mean|total|sum|most (common|frequent|often)|least (common|frequent|often)|frequency|percentage|statistics?|stats)\b"
    ).unwrap();

    static ref CAUSAL: Regex = Regex::new(
        r"\b(why|because|causes?|caused|reasons?|impacts?|impacted|affects?|affected|affecting|effects?|leads? to|led to|triggers?|triggered|resulted? in|due to)\b"
    ).unwrap();

    static ref EMOTION: Regex = Regex::new(
        r"\b(feel|feels|feeling|feelings|felt|mood|moods|emotions?|emotional|happy|happiness|sad|sadness|anxious|anxiety|stress|stressed|stressful|angry|anger|calm|joy|joyful|depressed|depression|lonely|loneliness|grateful|gratitude|excited|excitement|frustrated|frustration|worried|worry|fear|afraid|scared|overwhelmed|peaceful|content)\b"
    ).unwrap();

    static ref SELF_REFLECTION: Regex = Regex::new(
        r"\b(who am i|about myself|my (personality|strengths|weaknesses|values|habits|growth|character)|kind of person|what do i (value|care about|want)|what makes me|insights? about me|reflect|reflection|self)\b"
    ).unwrap();
}

/// Complexity tier of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    /// Tier for a signal score: <= 1 simple, 2..=4 moderate, >= 5 complex.
    pub fn from_score(score: u32) -> Self {
        match score {
            0..=1 => Self::Simple,
            2..=4 => Self::Moderate,
            _ => Self::Complex,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
        }
    }

    /// Tuning for this tier.
    pub fn tier<'a>(&self, config: &'a RetrievalConfig) -> &'a TierConfig {
        match self {
            Self::Simple => &config.simple,
            Self::Moderate => &config.moderate,
            Self::Complex => &config.complex,
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signal that contributed to the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    LongQuestion,
    VeryLongQuestion,
    MultiPart,
    Comparison,
    TimeRange,
    Aggregation,
    Causal,
    Emotion,
    SelfReflection,
}

impl Signal {
    pub fn weight(&self) -> u32 {
        match self {
            Self::LongQuestion => 1,
            Self::VeryLongQuestion => 2,
            Self::MultiPart => 1,
            Self::Comparison => 2,
            Self::TimeRange => 1,
            Self::Aggregation => 2,
            Self::Causal => 2,
            Self::Emotion => 1,
            Self::SelfReflection => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LongQuestion => "long_question",
            Self::VeryLongQuestion => "very_long_question",
            Self::MultiPart => "multi_part",
            Self::Comparison => "comparison",
            Self::TimeRange => "time_range",
            Self::Aggregation => "aggregation",
            Self::Causal => "causal",
            Self::Emotion => "emotion",
            Self::SelfReflection => "self_reflection",
        }
    }
}

/// Result of classifying a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityAnalysis {
    pub complexity: Complexity,
    pub score: u32,
    pub signals: Vec<Signal>,
    pub word_count: usize,
    pub similarity_threshold: f32,
    pub max_entries: usize,
    pub history_messages: usize,
}

impl ComplexityAnalysis {
    pub fn has(&self, signal: Signal) -> bool {
        self.signals.contains(&signal)
    }
}

/// Detect which signals a question carries.
pub fn detect_signals(message: &str) -> (Vec<Signal>, usize) {
    let lower = message.trim().to_lowercase();
    let word_count = lower.split_whitespace().count();
    let mut signals = Vec::new();
    if word_count == 0 {
        return (signals, 0);
    }

    if word_count > 25 {
        signals.push(Signal::VeryLongQuestion);
    } else if word_count > 12 {
        signals.push(Signal::LongQuestion);
    }
    if lower.matches('?').count() > 1 || MULTI_PART.is_match(&lower) {
        signals.push(Signal::MultiPart);
    }

    let checks: [(&Regex, Signal); 6] = [
        (&COMPARISON, Signal::Comparison),
        (&TIME_RANGE, Signal::TimeRange),
        (&AGGREGATION, Signal::Aggregation),
        (&CAUSAL, Signal::Causal),
        (&EMOTION, Signal::Emotion),
        (&SELF_REFLECTION, Signal::SelfReflection),
    ];
    for (re, signal) in checks {
        if re.is_match(&lower) {
            signals.push(signal);
        }
    }

    (signals, word_count)
}

/// Classify a question and attach its tier's tuning.
pub fn classify_complexity(message: &str, config: &RetrievalConfig) -> ComplexityAnalysis {
    let (signals, word_count) = detect_signals(message);
    let score = signals.iter().map(Signal::weight).sum();
    let complexity = Complexity::from_score(score);
    let tier = complexity.tier(config);

    ComplexityAnalysis {
        complexity,
        score,
        signals,
        word_count,
        similarity_threshold: tier.similarity_threshold,
        max_entries: tier.max_entries,
        history_messages: tier.history_messages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(message: &str) -> ComplexityAnalysis {
        classify_complexity(message, &RetrievalConfig::default())
    }

    #[test]
    fn test_empty_message_is_simple() {
        let a = classify("   ");
        assert_eq!(a.complexity, Complexity::Simple);
        assert_eq!(a.score, 0);
        assert!(a.signals.is_empty());
        assert_eq!(a.word_count, 0);
    }

    #[test]
    fn test_simple_question() {
        let a = classify("What did I write about hiking?");
        assert_eq!(a.complexity, Complexity::Simple);
        assert_eq!(a.similarity_threshold, 0.5);
        assert_eq!(a.max_entries, 5);
        assert_eq!(a.history_messages, 4);
    }

    #[test]
    fn test_moderate_question() {
        // aggregation (+2)
        let a = classify("How many times did I go running?");
        assert!(a.has(Signal::Aggregation));
        assert_eq!(a.score, 2);
        assert_eq!(a.complexity, Complexity::Moderate);
        assert_eq!(a.max_entries, 10);
    }

    #[test]
    fn test_complex_question() {
        let a = classify("How has my mood changed over the last 3 months and why do you think work affected it?");
        assert!(a.has(Signal::Comparison));
        assert!(a.has(Signal::TimeRange));
        assert!(a.has(Signal::Causal));
        assert!(a.has(Signal::Emotion));
        assert!(a.has(Signal::LongQuestion));
        assert_eq!(a.complexity, Complexity::Complex);
        assert_eq!(a.similarity_threshold, 0.3);
        assert_eq!(a.history_messages, 10);
    }

    #[test]
    fn test_word_count_thresholds() {
        let thirteen = "one two three four five six seven eight nine ten eleven twelve thirteen";
        assert_eq!(classify(thirteen).signals, vec![Signal::LongQuestion]);
        let long = vec!["word"; 26].join(" ");
        let a = classify(&long);
        assert_eq!(a.signals, vec![Signal::VeryLongQuestion]);
        assert_eq!(a.score, 2);
    }

    #[test]
    fn test_multi_question() {
        let a = classify("Did I sleep well? Did I exercise?");
        assert!(a.has(Signal::MultiPart));
    }

    #[test]
    fn test_score_boundaries() {
        assert_eq!(Complexity::from_score(1), Complexity::Simple);
        assert_eq!(Complexity::from_score(2), Complexity::Moderate);
        assert_eq!(Complexity::from_score(4), Complexity::Moderate);
        assert_eq!(Complexity::from_score(5), Complexity::Complex);
    }

    #[test]
    fn test_modal_may_is_not_a_month() {
        assert!(!classify("May I see my notes").has(Signal::TimeRange));
        assert!(classify("what happened in may").has(Signal::TimeRange));
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(classify("Why was I so stressed?")).unwrap();
        assert_eq!(json["complexity"], "moderate");
        assert_eq!(json["signals"][0], "causal");
        assert!(json.get("similarityThreshold").is_some());
    }
}
