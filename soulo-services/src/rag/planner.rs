//! Query planner.
//!
//! Turns a classified question into a [`QueryPlan`]: which search strategy
//! to run, the date window and emotion filters it implies, how many entries
//! the answer may use and what shape the answer should take.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use soulo_core::config::RetrievalConfig;
use soulo_models::queries::DateWindow;

use super::classifier::{Complexity, ComplexityAnalysis, Signal};

lazy_static! {
    static ref RELATIVE_SPAN: Regex = Regex::new(
        r"\b(?:last|past)\s+(\d+|few|couple of)\s+(day|week|month|year)s?\b"
    ).unwrap();

    static ref NAMED_MONTH: Regex = Regex::new(
        r"\b(january|february|march|april|may|june|july|august|september|october|november|december)(?:\s+(\d{4}))?\b"
    ).unwrap();

    static ref EXHAUSTIVE: Regex = Regex::new(r"\b(all|every|always|ever|whenever|each time)\b").unwrap();

    static ref THEMES: Regex = Regex::new(
        r"\b(work|job|career|boss|colleagues?|family|parents?|mom|dad|siblings?|friends?|friendship|relationships?|partner|girlfriend|boyfriend|wife|husband|dating|health|sleep|sleeping|exercise|workouts?|running|gym|food|eating|diet|money|finances?|school|studies|studying|travel|trips?|vacation|goals?|dreams?|hobby|hobbies|music|reading|books?|nature|hiking|meditation|creativity|therapy|pets?)\b"
    ).unwrap();

    static ref TOPIC: Regex = Regex::new(r"\b(?:about|regarding)\s+([a-z']+)").unwrap();

    static ref NARRATIVE: Regex = Regex::new(
        r"\b(tell me about|describe|summari[sz]e|summary|overview|recap|what happened|walk me through)\b"
    ).unwrap();

    static ref EMOTION_FILTERS: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"\b(happy|happiness|joy|joyful)\b").unwrap(), "joy"),
        (Regex::new(r"\b(sad|sadness|down|depressed|depression)\b").unwrap(), "sadness"),
        (Regex::new(r"\b(anxious|anxiety|worried|worry|nervous)\b").unwrap(), "anxiety"),
        (Regex::new(r"\b(stress|stressed|stressful|overwhelmed)\b").unwrap(), "stress"),
        (Regex::new(r"\b(angry|anger|frustrated|frustration|irritated)\b").unwrap(), "anger"),
        (Regex::new(r"\b(calm|peaceful|relaxed)\b").unwrap(), "calm"),
        (Regex::new(r"\b(grateful|gratitude|thankful)\b").unwrap(), "gratitude"),
        (Regex::new(r"\b(lonely|loneliness|isolated)\b").unwrap(), "loneliness"),
        (Regex::new(r"\b(excited|excitement)\b").unwrap(), "excitement"),
        (Regex::new(r"\b(fear|afraid|scared)\b").unwrap(), "fear"),
    ];
}

/// Words after "about" that do not name a topic.
const NON_TOPICS: &[&str] = &[
    "it", "that", "this", "them", "what", "anything", "something", "my", "the", "a", "today",
    "yesterday", "last", "recently", "lately", "me", "myself",
];

/// How entries are found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    VectorOnly,
    SqlOnly,
    DualParallel,
    DualSequential,
    /// Last-resort route: the most recent entries, unfiltered.
    RecentEntries,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VectorOnly => "vector_only",
            Self::SqlOnly => "sql_only",
            Self::DualParallel => "dual_parallel",
            Self::DualSequential => "dual_sequential",
            Self::RecentEntries => "recent_entries",
        }
    }

    pub fn uses_sql(&self) -> bool {
        matches!(self, Self::SqlOnly | Self::DualParallel | Self::DualSequential)
    }
}

impl std::fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape the answer is expected to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseShape {
    Comparative,
    Quantitative,
    Analytical,
    Narrative,
    Direct,
}

impl ResponseShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Comparative => "comparative",
            Self::Quantitative => "quantitative",
            Self::Analytical => "analytical",
            Self::Narrative => "narrative",
            Self::Direct => "direct",
        }
    }

    /// Instruction appended to the answer prompt.
    pub fn instruction(&self) -> &'static str {
        match self {
            Self::Comparative => {
                "Compare the periods or situations the user asks about. Point out what changed, \
                 what stayed the same, and cite dates."
            }
            Self::Quantitative => {
                "Lead with the numbers. Use the aggregate results when present, state counts \
                 and averages plainly, and say when the data is too thin to be sure."
            }
            Self::Analytical => {
                "Look for causes and patterns across entries. Distinguish what the entries \
                 show from your interpretation, and keep the tone gentle."
            }
            Self::Narrative => {
                "Tell the story of the period in chronological order, drawing on specific \
                 moments from the entries."
            }
            Self::Direct => "Answer directly and briefly, citing the most relevant entries.",
        }
    }
}

/// A resolved date range mentioned in the question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub label: String,
    pub start: DateTime<Utc>,
    /// Exclusive.
    pub end: DateTime<Utc>,
}

impl TimeRange {
    fn new(label: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { label: label.into(), start, end }
    }

    pub fn window(&self) -> DateWindow {
        DateWindow::new(self.start, self.end)
    }
}

/// The plan for answering one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    pub strategy: SearchStrategy,
    pub needs_aggregation: bool,
    pub has_semantic_content: bool,
    pub time_range: Option<TimeRange>,
    pub emotion_filters: Vec<String>,
    pub themes: Vec<String>,
    pub exhaustive: bool,
    pub similarity_threshold: f32,
    pub max_entries: usize,
    pub response_shape: ResponseShape,
}

impl QueryPlan {
    pub fn window(&self) -> Option<DateWindow> {
        self.time_range.as_ref().map(TimeRange::window)
    }
}

/// Build the plan for a classified question.
pub fn plan_query(
    message: &str,
    analysis: &ComplexityAnalysis,
    config: &RetrievalConfig,
    now: DateTime<Utc>,
) -> QueryPlan {
    let lower = message.trim().to_lowercase();

    let time_range = extract_time_range(&lower, now);
    let emotion_filters = extract_emotion_filters(&lower);
    let themes = extract_themes(&lower);
    let has_topic = TOPIC
        .captures_iter(&lower)
        .any(|c| !NON_TOPICS.contains(&&c[1]));
    let has_semantic_content = !emotion_filters.is_empty()
        || !themes.is_empty()
        || has_topic
        || analysis.has(Signal::Emotion)
        || analysis.has(Signal::SelfReflection);
    let needs_aggregation = analysis.has(Signal::Aggregation);

    let strategy = choose_strategy(
        needs_aggregation,
        has_semantic_content,
        time_range.is_some(),
        analysis.complexity,
    );

    let exhaustive = EXHAUSTIVE.is_match(&lower);
    let max_entries = if exhaustive {
        analysis.max_entries.max(config.global_entry_ceiling)
    } else {
        analysis.max_entries
    };

    let response_shape = if analysis.has(Signal::Comparison) {
        ResponseShape::Comparative
    } else if needs_aggregation {
        ResponseShape::Quantitative
    } else if analysis.has(Signal::Causal) || analysis.has(Signal::SelfReflection) {
        ResponseShape::Analytical
    } else if time_range.is_some() || NARRATIVE.is_match(&lower) {
        ResponseShape::Narrative
    } else {
        ResponseShape::Direct
    };

    QueryPlan {
        strategy,
        needs_aggregation,
        has_semantic_content,
        time_range,
        emotion_filters,
        themes,
        exhaustive,
        similarity_threshold: analysis.similarity_threshold,
        max_entries,
        response_shape,
    }
}

/// Strategy selection, in priority order.
pub fn choose_strategy(
    needs_aggregation: bool,
    has_semantic_content: bool,
    has_time_range: bool,
    complexity: Complexity,
) -> SearchStrategy {
    match (needs_aggregation, has_semantic_content) {
        (true, false) => SearchStrategy::SqlOnly,
        (true, true) => SearchStrategy::DualSequential,
        _ if (has_time_range && has_semantic_content) || complexity == Complexity::Complex => {
            SearchStrategy::DualParallel
        }
        _ => SearchStrategy::VectorOnly,
    }
}

/// Canonical emotion names mentioned in the question, sorted.
pub fn extract_emotion_filters(lower: &str) -> Vec<String> {
    let mut found: Vec<String> = EMOTION_FILTERS
        .iter()
        .filter(|(re, _)| re.is_match(lower))
        .map(|(_, name)| name.to_string())
        .collect();
    found.sort();
    found.dedup();
    found
}

fn extract_themes(lower: &str) -> Vec<String> {
    let mut found: Vec<String> = THEMES.find_iter(lower).map(|m| m.as_str().to_string()).collect();
    found.sort();
    found.dedup();
    found
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

fn month_start(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

fn month_index(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "january", "february", "march", "april", "may", "june", "july", "august", "september",
        "october", "november", "december",
    ];
    MONTHS.iter().position(|m| *m == name).map(|i| i as u32 + 1)
}

/// Whole-word match, so "this week" does not fire on "this weekend".
fn has_phrase(lower: &str, phrase: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    lower.match_indices(phrase).any(|(at, _)| {
        let before = lower[..at].chars().next_back();
        let after = lower[at + phrase.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

/// Resolve the first date range mentioned in a lower-cased question.
///
/// Windows are half-open and computed in UTC relative to `now`. Rolling
/// spans ("last 3 weeks", "past month") end at the start of tomorrow;
/// calendar spans ("last week", "this month") follow calendar boundaries
/// with weeks starting on Monday.
pub fn extract_time_range(lower: &str, now: DateTime<Utc>) -> Option<TimeRange> {
    let today = now.date_naive();
    let tomorrow = day_start(today + Duration::days(1));

    if let Some(caps) = RELATIVE_SPAN.captures(lower) {
        let n: u32 = match &caps[1] {
            "few" => 3,
            "couple of" => 2,
            digits => digits.parse().ok()?,
        };
        let n = n.max(1);
        let unit = &caps[2];
        // Spans reaching past chrono's date range resolve to no window.
        let start = match unit {
            "day" => today.checked_sub_signed(Duration::try_days(n as i64 - 1)?)?,
            "week" => today.checked_sub_signed(Duration::try_weeks(n as i64)?)?,
            "month" => today.checked_sub_months(Months::new(n))?,
            _ => today.checked_sub_months(Months::new(n.checked_mul(12)?))?,
        };
        return Some(TimeRange::new(format!("last {n} {unit}s"), day_start(start), tomorrow));
    }

    if has_phrase(lower, "yesterday") || has_phrase(lower, "last night") {
        let y = today - Duration::days(1);
        return Some(TimeRange::new("yesterday", day_start(y), day_start(today)));
    }
    if has_phrase(lower, "today") || has_phrase(lower, "tonight") || has_phrase(lower, "this morning") {
        return Some(TimeRange::new("today", day_start(today), tomorrow));
    }

    let week_start = today - Duration::days(today.weekday().num_days_from_monday() as i64);
    if has_phrase(lower, "this week") {
        return Some(TimeRange::new("this week", day_start(week_start), tomorrow));
    }
    if has_phrase(lower, "last week") {
        let prev = week_start - Duration::weeks(1);
        return Some(TimeRange::new("last week", day_start(prev), day_start(week_start)));
    }
    if has_phrase(lower, "past week") {
        return Some(TimeRange::new("past week", day_start(today - Duration::days(6)), tomorrow));
    }

    let this_month = month_start(today.year(), today.month())?;
    if has_phrase(lower, "this month") {
        return Some(TimeRange::new("this month", day_start(this_month), tomorrow));
    }
    if has_phrase(lower, "last month") {
        let prev = this_month.checked_sub_months(Months::new(1))?;
        return Some(TimeRange::new("last month", day_start(prev), day_start(this_month)));
    }
    if has_phrase(lower, "past month") {
        let start = today.checked_sub_months(Months::new(1))?;
        return Some(TimeRange::new("past month", day_start(start), tomorrow));
    }

    let this_year = NaiveDate::from_ymd_opt(today.year(), 1, 1)?;
    if has_phrase(lower, "this year") {
        return Some(TimeRange::new("this year", day_start(this_year), tomorrow));
    }
    if has_phrase(lower, "last year") {
        let prev = NaiveDate::from_ymd_opt(today.year() - 1, 1, 1)?;
        return Some(TimeRange::new("last year", day_start(prev), day_start(this_year)));
    }
    if has_phrase(lower, "past year") {
        let start = today.checked_sub_months(Months::new(12))?;
        return Some(TimeRange::new("past year", day_start(start), tomorrow));
    }

    if let Some(range) = named_month(lower, today) {
        return Some(range);
    }

    if has_phrase(lower, "recently") || has_phrase(lower, "lately") {
        return Some(TimeRange::new("recently", day_start(today - Duration::days(13)), tomorrow));
    }

    None
}

fn named_month(lower: &str, today: NaiveDate) -> Option<TimeRange> {
    for caps in NAMED_MONTH.captures_iter(lower) {
        let name = caps.get(1)?;
        let explicit_year = caps.get(2).and_then(|y| y.as_str().parse::<i32>().ok());

        // "may" is usually the modal verb
        if name.as_str() == "may" && explicit_year.is_none() {
            let before = lower[..name.start()].trim_end();
            if !(before.ends_with(" in") || before.ends_with("during") || before == "in") {
                continue;
            }
        }

        let month = month_index(name.as_str())?;
        let year = explicit_year.unwrap_or(if month <= today.month() {
            today.year()
        } else {
            today.year() - 1
        });
        let start = month_start(year, month)?;
        let end = start.checked_add_months(Months::new(1))?;
        let label = format!("{} {year}", name.as_str());
        return Some(TimeRange::new(label, day_start(start), day_start(end)));
    }
    None
}
