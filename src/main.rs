//! mat-rag console entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config (fatal on any invalid value)
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Build adapters and the pipeline
//!   6. Answer `--question` or run `--evaluate` and exit, or run the console
//!      until Ctrl-C / EOF

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use mat_rag::error::AppError;
use mat_rag::pipeline::coordinator::PipelineCoordinator;
use mat_rag::{config, console, eval, logger};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present; the file is optional.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, args.log_level.is_some(), config.log_file.as_deref())?;

    info!(
        service = %config.service_name,
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        llm = %config.llm.provider,
        embedding = %config.embedding.provider,
        graph = %config.graph.backend,
        "config loaded"
    );

    let coordinator = PipelineCoordinator::from_config(Arc::new(config)).await?;

    if args.evaluate {
        let report = eval::run(&coordinator, &eval::default_cases()).await;
        println!("{}", report.render());
        if let Some(path) = args.report_path {
            report.save(&path)?;
            info!(path = %path.display(), "evaluation report saved");
        }
        return Ok(());
    }

    if let Some(question) = args.question {
        println!("{}", console::answer_once(&coordinator, &question, args.debug).await);
        return Ok(());
    }

    // Shared shutdown token: Ctrl-C cancels it, the console watches it.
    let shutdown = CancellationToken::new();
    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received, shutting down");
                token.cancel();
            }
        });
    }

    console::run(&coordinator, shutdown).await?;
    info!("bye");
    Ok(())
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<PathBuf>,
    question: Option<String>,
    debug: bool,
    evaluate: bool,
    report_path: Option<PathBuf>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;
    let mut question = None;
    let mut debug = false;
    let mut evaluate = false;
    let mut report_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: mat-rag [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("  -q, --question <TEXT>      Answer one question and exit");
                println!("  -d, --debug                Show intent, entities and stage diagnostics");
                println!("  -e, --evaluate             Score the built-in question set and exit");
                println!("  -o, --output <PATH>        Save the evaluation report as JSON");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(PathBuf::from(path));
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "-q" | "--question" => {
                if let Some(text) = iter.next() {
                    question = Some(text);
                } else {
                    eprintln!("error: -q/--question requires a text argument");
                    std::process::exit(1);
                }
            }
            "-d" | "--debug" => debug = true,
            "-e" | "--evaluate" => evaluate = true,
            "-o" | "--output" => {
                if let Some(path) = iter.next() {
                    report_path = Some(PathBuf::from(path));
                } else {
                    eprintln!("error: -o/--output requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    //   -v      → warn
    //   -vv     → info
    //   -vvv    → debug  (stage transitions, per-query results)
    //   -vvvv+  → trace  (full request payloads)
    let log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { log_level, config_path, question, debug, evaluate, report_path }
}
