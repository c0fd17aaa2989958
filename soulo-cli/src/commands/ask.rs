//! Ask, classify and plan commands.

use chrono::Utc;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use soulo_core::config::ConfigHandle;
use soulo_core::error::SouloResult;
use soulo_services::rag::pipeline::preview;
use soulo_services::rag::pipeline::QueryPreview;
use soulo_services::{ChatRagRequest, ChatRagResponse};
use crate::OutputFormat;

/// Ask a question through the retrieval pipeline.
pub async fn run(
    config: ConfigHandle,
    question: String,
    thread: Option<String>,
    new_thread: bool,
    user: Option<String>,
    format: OutputFormat,
) -> SouloResult<()> {
    let registry = super::init_registry(&config).await?;
    let user_id = super::resolve_user(&config, user).await;

    let request = ChatRagRequest {
        message: question,
        thread_id: thread,
        user_id: Some(user_id),
        history: None,
        create_thread: new_thread,
    };

    let pb = ProgressBar::new_spinner();
    if format == OutputFormat::Text {
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message("Searching your journal...");
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
    }
    let response = registry.rag.handle(request).await;
    pb.finish_and_clear();

    match format {
        OutputFormat::Json => super::print_json(&response),
        OutputFormat::Text => print_answer(&response),
    }

    registry.shutdown_all()
}

fn print_answer(response: &ChatRagResponse) {
    if let Some(code) = &response.error_code {
        println!(
            "  {} {} ({})\n",
            style("ERROR").red().bold(),
            response.error.as_deref().unwrap_or("request failed"),
            code
        );
    }

    println!("{}\n", response.response);

    if !response.references.is_empty() {
        println!("{}", style("Sources").bold().underlined());
        let mut table = super::new_table();
        table.set_header(vec!["Date", "Relevance", "Excerpt"]);
        for reference in &response.references {
            let relevance = reference
                .similarity
                .map(|s| format!("{:.0}%", s * 100.0))
                .unwrap_or_else(|| "-".to_string());
            table.add_row(vec![
                reference.date.clone(),
                relevance,
                super::truncate(&reference.snippet, 80),
            ]);
        }
        println!("{table}\n");
    }

    if let Some(diag) = &response.diagnostics {
        let route = diag
            .route_used
            .map(|r| r.as_str())
            .unwrap_or("none");
        println!(
            "  {} route {}, {} entries, {}ms",
            style("i").cyan(),
            route,
            response.references.len(),
            diag.elapsed_ms
        );
        for failure in &diag.failures {
            println!("  {} {}", style("WARN").yellow().bold(), failure);
        }
    }
    if let Some(thread_id) = &response.thread_id {
        println!("  {} thread {}", style("i").cyan(), thread_id);
    }
}

/// Show how a question is classified.
pub async fn classify(config: ConfigHandle, question: String, format: OutputFormat) -> SouloResult<()> {
    let retrieval = config.read().await.retrieval.clone();
    let preview = preview(&question, &retrieval, Utc::now());
    let analysis = &preview.complexity;

    match format {
        OutputFormat::Json => super::print_json(analysis),
        OutputFormat::Text => {
            println!("{}", style("Classification").bold().underlined());
            println!("  Complexity: {}", style(analysis.complexity).cyan().bold());
            println!("  Score:      {}", analysis.score);
            println!("  Words:      {}", analysis.word_count);
            let signals = if analysis.signals.is_empty() {
                "(none)".to_string()
            } else {
                analysis
                    .signals
                    .iter()
                    .map(|s| format!("{} (+{})", s.as_str(), s.weight()))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            println!("  Signals:    {signals}");
            println!();
            println!("{}", style("Tier").bold().underlined());
            println!("  Similarity threshold: {:.2}", analysis.similarity_threshold);
            println!("  Max entries:          {}", analysis.max_entries);
            println!("  History messages:     {}", analysis.history_messages);
        }
    }
    Ok(())
}

/// Show the search plan and routing for a question.
pub async fn plan(config: ConfigHandle, question: String, format: OutputFormat) -> SouloResult<()> {
    let retrieval = config.read().await.retrieval.clone();
    let preview = preview(&question, &retrieval, Utc::now());

    match format {
        OutputFormat::Json => super::print_json(&preview),
        OutputFormat::Text => print_plan(&preview),
    }
    Ok(())
}

fn print_plan(preview: &QueryPreview) {
    let plan = &preview.plan;
    let routing = &preview.routing;

    println!("{}", style("Plan").bold().underlined());
    println!(
        "  Complexity:  {} (score {})",
        preview.complexity.complexity, preview.complexity.score
    );
    println!("  Strategy:    {}", style(plan.strategy).cyan().bold());
    println!("  Answer:      {}", plan.response_shape.as_str());
    println!("  Aggregation: {}", yes_no(plan.needs_aggregation));
    println!("  Semantic:    {}", yes_no(plan.has_semantic_content));
    println!("  Exhaustive:  {}", yes_no(plan.exhaustive));
    match &plan.time_range {
        Some(range) => println!(
            "  Time range:  {} ({} to {})",
            range.label,
            range.start.format("%Y-%m-%d"),
            range.end.format("%Y-%m-%d")
        ),
        None => println!("  Time range:  (none)"),
    }
    if !plan.emotion_filters.is_empty() {
        println!("  Emotions:    {}", plan.emotion_filters.join(", "));
    }
    if !plan.themes.is_empty() {
        println!("  Themes:      {}", plan.themes.join(", "));
    }
    println!(
        "  Retrieval:   up to {} entries at similarity >= {:.2}",
        plan.max_entries, plan.similarity_threshold
    );

    println!();
    println!("{}", style("Routing").bold().underlined());
    let chain = routing
        .chain
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" -> ");
    println!("  Chain:       {chain}");
    println!("  Budget:      {}ms", routing.budget_ms);
    println!("  Concurrency: {}", routing.max_concurrency);
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
