//! Integration tests for the chat-with-RAG pipeline.
//!
//! Runs the full classify/plan/route/search/generate flow over a seeded
//! local journal with an in-process language model.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveTime, Utc};

use soulo_core::config::RetrievalConfig;
use soulo_core::constants::FALLBACK_RESPONSE;
use soulo_models::queries::DateWindow;
use soulo_services::event_bus::AppEvent;
use soulo_services::rag::planner::SearchStrategy;
use soulo_services::ChatRagRequest;

use common::{FakeModel, RecordingStore, OTHER_USER, USER};

fn request(message: &str) -> ChatRagRequest {
    ChatRagRequest {
        user_id: Some(USER.into()),
        ..ChatRagRequest::new(message)
    }
}

// ---- Routes ----

#[tokio::test]
async fn vector_question_returns_only_matching_entries_of_the_user() {
    let now = Utc::now();
    let (store, _dir) = common::create_test_store();
    common::seed_journal(store.as_ref(), now).await;
    let model = Arc::new(FakeModel::new());
    let (pipeline, _chat, _bus) = common::create_pipeline(store, model.clone(), RetrievalConfig::default());

    let response = pipeline.answer(request("What do I think about hiking?"), now).await.unwrap();

    let diagnostics = response.diagnostics.unwrap();
    assert_eq!(diagnostics.route_used, Some(SearchStrategy::VectorOnly));
    assert_eq!(diagnostics.vector_hits, 2);
    assert_eq!(response.references.len(), 2);
    assert!(response.references.iter().all(|r| r.similarity.unwrap() > 0.9));
    assert!(response.references.iter().all(|r| !r.snippet.contains("someone else")));

    let prompt = &model.last_answer_request()[0].content;
    assert!(prompt.contains("Journal entries (2):"));
    assert!(prompt.contains("ridge trail"));
}

#[tokio::test]
async fn counting_question_uses_generated_sql() {
    let now = Utc::now();
    let (store, _dir) = common::create_test_store();
    common::seed_journal(store.as_ref(), now).await;
    let model = Arc::new(FakeModel::new());
    let (pipeline, _chat, _bus) = common::create_pipeline(store, model.clone(), RetrievalConfig::default());

    let response = pipeline
        .answer(request("How many entries did I write last month?"), now)
        .await
        .unwrap();

    let diagnostics = response.diagnostics.as_ref().unwrap();
    assert_eq!(diagnostics.route_used, Some(SearchStrategy::SqlOnly));
    assert_eq!(diagnostics.aggregate_rows, 1);
    assert!(response.references.is_empty());

    let analysis = response.analysis.as_ref().unwrap();
    assert!(analysis.sql.as_deref().unwrap().ends_with("LIMIT 100"));

    let prompt = &model.last_answer_request()[0].content;
    assert!(prompt.contains("Query results:"));
    assert!(prompt.contains("{\"entries\":6}"));

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["analysis"]["plan"]["strategy"], "sql_only");
    assert_eq!(json["diagnostics"]["routeUsed"], "sql_only");
}

#[tokio::test]
async fn dual_search_merges_sql_entries() {
    let now = Utc::now();
    let (store, _dir) = common::create_test_store();
    common::seed_journal(store.as_ref(), now).await;
    let model = Arc::new(FakeModel::new());
    model.set_sql("SELECT id FROM journal_entries WHERE user_id = :user_id AND content LIKE '%mom%'");
    let (pipeline, _chat, _bus) = common::create_pipeline(store, model, RetrievalConfig::default());

    let response = pipeline
        .answer(request("What did I write about my family last week?"), now)
        .await
        .unwrap();

    let diagnostics = response.diagnostics.unwrap();
    assert_eq!(diagnostics.route_used, Some(SearchStrategy::DualParallel));
    assert_eq!(diagnostics.sql_hits, 1);
    assert_eq!(response.references.len(), 1);
    assert!(response.references[0].snippet.contains("my sister"));
}

#[tokio::test]
async fn sequential_search_narrows_vector_window_to_sql_entries() {
    let now = Utc::now();
    let (local, _dir) = common::create_test_store();
    common::seed_journal(local.as_ref(), now).await;
    let store = Arc::new(RecordingStore::new(local));
    let model = Arc::new(FakeModel::new());
    model.set_sql("SELECT id FROM journal_entries WHERE user_id = :user_id AND content LIKE '%office%'");
    let (pipeline, _chat, _bus) = common::create_pipeline_over(store.clone(), model, RetrievalConfig::default());

    let response = pipeline
        .answer(request("How often did I feel anxious about work?"), now)
        .await
        .unwrap();

    let diagnostics = response.diagnostics.unwrap();
    assert_eq!(diagnostics.route_used, Some(SearchStrategy::DualSequential));
    assert_eq!(diagnostics.sql_hits, 1);

    // The office entry is 40 days old; the vector search covers only that day.
    let day = (now - chrono::Duration::days(40)).date_naive().and_time(NaiveTime::MIN).and_utc();
    let narrowed = DateWindow::new(day, day + chrono::Duration::days(1));
    assert_eq!(store.searched_windows(), vec![Some(narrowed)]);

    // The recent deadline entry also matches "work" but lies outside the window.
    assert_eq!(diagnostics.vector_hits, 1);
    assert_eq!(diagnostics.duplicates_removed, 1);
    assert_eq!(response.references.len(), 1);
    assert!(response.references[0].snippet.contains("felt anxious"));
    assert!(response.references.iter().all(|r| !r.snippet.contains("Deadline")));
}

#[tokio::test]
async fn parallel_search_keeps_sql_entries_when_embeddings_fail() {
    let now = Utc::now();
    let (store, _dir) = common::create_test_store();
    common::seed_journal(store.as_ref(), now).await;
    let model = Arc::new(FakeModel::failing_embeddings());
    model.set_sql("SELECT id FROM journal_entries WHERE user_id = :user_id AND content LIKE '%mom%'");
    let (pipeline, _chat, _bus) = common::create_pipeline(store, model, RetrievalConfig::default());

    let response = pipeline
        .answer(request("What did I write about my family last week?"), now)
        .await
        .unwrap();

    let diagnostics = response.diagnostics.unwrap();
    assert_eq!(diagnostics.route_used, Some(SearchStrategy::DualParallel));
    assert_eq!(diagnostics.routes_attempted, vec![SearchStrategy::DualParallel]);
    assert!(diagnostics.failures.is_empty());
    assert_eq!(diagnostics.vector_hits, 0);
    assert_eq!(diagnostics.sql_hits, 1);
    assert_eq!(response.references.len(), 1);
    assert!(response.references[0].snippet.contains("my sister"));
    assert!(response.references[0].similarity.is_none());
}

#[tokio::test]
async fn rejected_sql_falls_back_to_recent_entries() {
    let now = Utc::now();
    let (store, _dir) = common::create_test_store();
    common::seed_journal(store.as_ref(), now).await;
    let model = Arc::new(FakeModel::new());
    model.set_sql("DELETE FROM journal_entries WHERE user_id = :user_id");
    let (pipeline, _chat, _bus) = common::create_pipeline(store, model, RetrievalConfig::default());

    let response = pipeline
        .answer(request("How many entries did I write last month?"), now)
        .await
        .unwrap();

    let diagnostics = response.diagnostics.unwrap();
    assert_eq!(
        diagnostics.routes_attempted,
        vec![SearchStrategy::SqlOnly, SearchStrategy::VectorOnly, SearchStrategy::RecentEntries]
    );
    assert_eq!(diagnostics.route_used, Some(SearchStrategy::RecentEntries));
    assert!(diagnostics.failures[0].starts_with("sql_only"));
    assert_eq!(diagnostics.failures[1], "vector_only: no results");
    assert_eq!(response.references.len(), 5);
    assert!(response.analysis.unwrap().sql.is_none());
}

#[tokio::test]
async fn embedding_failure_falls_back_to_recent_entries() {
    let now = Utc::now();
    let (store, _dir) = common::create_test_store();
    common::seed_journal(store.as_ref(), now).await;
    let model = Arc::new(FakeModel::failing_embeddings());
    let (pipeline, _chat, _bus) = common::create_pipeline(store, model, RetrievalConfig::default());

    let response = pipeline.answer(request("What do I think about hiking?"), now).await.unwrap();

    let diagnostics = response.diagnostics.unwrap();
    assert_eq!(diagnostics.route_used, Some(SearchStrategy::RecentEntries));
    assert!(diagnostics.failures[0].starts_with("vector_only"));
    assert_eq!(response.references.len(), 5);
    // newest first
    assert!(response.references[0].snippet.contains("ridge trail"));
    assert!(response.references.iter().all(|r| r.similarity.is_none()));
}

#[tokio::test]
async fn slow_route_is_cut_off_by_the_budget() {
    let now = Utc::now();
    let (store, _dir) = common::create_test_store();
    common::seed_journal(store.as_ref(), now).await;
    let model = Arc::new(FakeModel::slow_embeddings(Duration::from_secs(30)));
    let mut config = RetrievalConfig::default();
    for tier in [&mut config.simple, &mut config.moderate, &mut config.complex] {
        tier.budget_ms = 50;
    }
    let (pipeline, _chat, _bus) = common::create_pipeline(store, model, config);

    let started = Instant::now();
    let response = pipeline.answer(request("What do I think about hiking?"), now).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    let diagnostics = response.diagnostics.unwrap();
    assert_eq!(diagnostics.route_used, Some(SearchStrategy::RecentEntries));
    assert!(diagnostics.failures[0].contains("timed out"));
}

#[tokio::test]
async fn empty_journal_still_answers_honestly() {
    let (store, _dir) = common::create_test_store();
    let model = Arc::new(FakeModel::new());
    let (pipeline, _chat, _bus) = common::create_pipeline(store, model.clone(), RetrievalConfig::default());

    let response = pipeline.handle(request("What do I think about hiking?")).await;

    assert!(!response.is_fallback());
    assert!(response.references.is_empty());
    let prompt = &model.last_answer_request()[0].content;
    assert!(prompt.contains("No journal entries matched"));
}

// ---- Threads ----

#[tokio::test]
async fn exchanges_are_recorded_in_threads() {
    let now = Utc::now();
    let (store, _dir) = common::create_test_store();
    common::seed_journal(store.as_ref(), now).await;
    let model = Arc::new(FakeModel::new());
    let (pipeline, chat, _bus) = common::create_pipeline(store, model.clone(), RetrievalConfig::default());

    let first = pipeline
        .handle(ChatRagRequest {
            create_thread: true,
            ..request("How has my sleep been lately?")
        })
        .await;
    let thread_id = first.thread_id.clone().unwrap();

    let thread = chat.get_thread(&thread_id).await.unwrap();
    assert_eq!(thread.title, "How has my sleep been lately?");
    let messages = chat.messages(&thread_id, 10).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "How has my sleep been lately?");
    assert!(messages[1].analysis.is_some());

    let second = pipeline
        .handle(ChatRagRequest {
            thread_id: Some(thread_id.clone()),
            ..request("And what about work?")
        })
        .await;
    assert_eq!(second.thread_id.as_deref(), Some(thread_id.as_str()));
    assert_eq!(chat.messages(&thread_id, 10).await.unwrap().len(), 4);

    let sent = model.last_answer_request();
    assert!(sent.iter().any(|m| m.role == "user" && m.content == "How has my sleep been lately?"));
    assert_eq!(sent.last().unwrap().content, "And what about work?");
}

#[tokio::test]
async fn thread_of_another_user_is_not_found() {
    let (store, _dir) = common::create_test_store();
    let model = Arc::new(FakeModel::new());
    let (pipeline, chat, _bus) = common::create_pipeline(store, model, RetrievalConfig::default());
    let thread = chat.create_thread(USER, Some("Mine")).await.unwrap();

    let response = pipeline
        .handle(ChatRagRequest {
            user_id: Some(OTHER_USER.into()),
            thread_id: Some(thread.id.clone()),
            ..ChatRagRequest::new("What did I write?")
        })
        .await;

    assert!(response.is_fallback());
    assert_eq!(response.error_code.as_deref(), Some("not_found"));
    assert!(chat.messages(&thread.id, 10).await.unwrap().is_empty());
}

// ---- Failures and events ----

#[tokio::test]
async fn generation_failure_returns_fallback_payload() {
    let now = Utc::now();
    let (store, _dir) = common::create_test_store();
    common::seed_journal(store.as_ref(), now).await;
    let model = Arc::new(FakeModel::failing_answers());
    let (pipeline, _chat, bus) = common::create_pipeline(store, model, RetrievalConfig::default());
    let mut rx = bus.subscribe();

    let response = pipeline.handle(request("What do I think about hiking?")).await;

    assert!(response.is_fallback());
    assert_eq!(response.response, FALLBACK_RESPONSE);
    assert_eq!(response.error_code.as_deref(), Some("generation_failed"));
    match rx.recv().await.unwrap() {
        AppEvent::ChatFailed { error_code } => assert_eq!(error_code, "generation_failed"),
        other => panic!("expected ChatFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_message_is_invalid_input() {
    let (store, _dir) = common::create_test_store();
    let model = Arc::new(FakeModel::new());
    let (pipeline, _chat, _bus) = common::create_pipeline(store, model, RetrievalConfig::default());

    let response = pipeline.handle(request("   ")).await;
    assert_eq!(response.error_code.as_deref(), Some("invalid_input"));
}

#[tokio::test]
async fn answered_question_emits_event() {
    let now = Utc::now();
    let (store, _dir) = common::create_test_store();
    common::seed_journal(store.as_ref(), now).await;
    let model = Arc::new(FakeModel::new());
    let (pipeline, _chat, bus) = common::create_pipeline(store, model, RetrievalConfig::default());
    let mut rx = bus.subscribe();

    pipeline.answer(request("What do I think about hiking?"), now).await.unwrap();

    match rx.recv().await.unwrap() {
        AppEvent::ChatAnswered { strategy, route_used, entries, thread_id, .. } => {
            assert_eq!(strategy, "vector_only");
            assert_eq!(route_used.as_deref(), Some("vector_only"));
            assert_eq!(entries, 2);
            assert!(thread_id.is_none());
        }
        other => panic!("expected ChatAnswered, got {other:?}"),
    }
}
