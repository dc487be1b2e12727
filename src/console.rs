//! Console front end: reads questions from stdin and prints answers.
//!
//! Runs until the `shutdown` token is cancelled (Ctrl-C) or stdin closes.
//! Lines starting with `/` are commands:
//!
//! - `/status`: adapters and budgets in use
//! - `/clear`: forget the conversation history
//! - `/debug`: toggle intent, entity and stage diagnostics
//! - `/quit`: exit

use std::fmt::Write as _;
use std::io::Write as _;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::model::{GenerationMode, Utterance};
use crate::pipeline::coordinator::{PipelineCoordinator, PipelineResponse, SystemStatus};
use crate::session::Conversation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ask(String),
    Status,
    Clear,
    Debug,
    Quit,
    Unknown(String),
    Empty,
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    match line {
        "/status" => Command::Status,
        "/clear" => Command::Clear,
        "/debug" => Command::Debug,
        "/quit" | "/exit" => Command::Quit,
        other if other.starts_with('/') => Command::Unknown(other.to_string()),
        other => Command::Ask(other.to_string()),
    }
}

/// Answer text followed by its sources, plus diagnostics when `debug` is set.
pub fn render_response(response: &PipelineResponse, debug: bool) -> String {
    let mut out = response.result.text.clone();
    if !response.result.citations.is_empty() {
        let sources: Vec<&str> =
            response.result.citations.iter().map(|c| c.source_id.as_str()).collect();
        let _ = write!(out, "\n\nSources: {}", sources.join(", "));
    }
    if response.result.mode == GenerationMode::Shortened {
        out.push_str("\n(answered from a shortened context)");
    }
    if debug {
        let d = &response.diagnostics;
        let _ = write!(
            out,
            "\n\n[debug] state={} intent={} ({:.2})",
            response.state, response.intent.category, response.intent.confidence
        );
        for e in &response.entities {
            let _ = write!(out, "\n[debug] entity {} \"{}\" ({:.2})", e.canonical_id, e.mention, e.confidence);
        }
        let _ = write!(
            out,
            "\n[debug] queries={} retrieved={} ranked={} in_context={} tokens={} total_ms={}",
            d.queries.len(),
            d.candidates_retrieved,
            d.facts_ranked,
            d.facts_in_context,
            d.context_tokens,
            d.total_ms
        );
        for degradation in response.degradations() {
            let _ = write!(out, "\n[debug] degraded: {degradation}");
        }
    }
    out
}

pub fn render_status(status: &SystemStatus) -> String {
    format!(
        "service: {}\nllm: {} ({})\nembedding: {}\ngraph: {} ({} labels indexed)\ncontext budget: {} tokens\nrequest budget: {} ms",
        status.service_name,
        status.llm_provider,
        status.llm_model,
        status.embedding_provider,
        status.graph_backend,
        status.indexed_labels,
        status.token_budget,
        status.request_budget_ms,
    )
}

/// One question, no history. Used by `--question`.
pub async fn answer_once(coordinator: &PipelineCoordinator, question: &str, debug: bool) -> String {
    let response = coordinator.handle(Utterance::new(question)).await;
    render_response(&response, debug)
}

pub async fn run(coordinator: &PipelineCoordinator, shutdown: CancellationToken) -> Result<(), AppError> {
    info!("console started");
    println!("─────────────────────────────────────────");
    println!(" MAT standards assistant  (Ctrl-C to quit)");
    println!(" /status  /clear  /debug  /quit");
    println!("─────────────────────────────────────────");

    let mut conversation = Conversation::new(coordinator.config().pipeline.history_turns);
    let mut show_debug = false;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let line = tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                println!();
                info!("console shutting down");
                break;
            }

            line = lines.next_line() => line,
        };

        let input = match line {
            Err(e) => {
                warn!("console read error: {e}");
                break;
            }
            Ok(None) => {
                info!("stdin closed");
                break;
            }
            Ok(Some(input)) => input,
        };

        match parse_command(&input) {
            Command::Empty => continue,
            Command::Quit => break,
            Command::Status => println!("{}", render_status(&coordinator.status())),
            Command::Clear => {
                conversation.clear();
                println!("Chat cleared. How can I help you with the MAT standards?");
            }
            Command::Debug => {
                show_debug = !show_debug;
                println!("debug output {}", if show_debug { "on" } else { "off" });
            }
            Command::Unknown(cmd) => println!("unknown command: {cmd}"),
            Command::Ask(question) => {
                debug!(question = %question, "console received line");
                let utterance = Utterance::new(question.clone()).with_history(conversation.snapshot());

                let response = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        info!("console shutting down mid-request");
                        break;
                    }
                    response = coordinator.handle(utterance) => response,
                };

                println!("{}", render_response(&response, show_debug));
                if response.result.mode != GenerationMode::Unavailable {
                    conversation.push_exchange(question, response.result.text.clone());
                }
            }
        }
    }

    Ok(())
}
