//! Logging initialisation via tracing-subscriber.
//!
//! A plain level such as `debug` applies to this crate only; dependencies
//! (reqwest, hyper) stay at `warn`. `RUST_LOG` directives are taken verbatim.
//! Every pipeline event is emitted inside a [`request_span`], so log lines
//! carry the `request_id` of the utterance they belong to.

use std::path::Path;

use tracing::Span;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use uuid::Uuid;

use crate::error::AppError;

/// Level for everything outside this crate when a plain level is given.
const DEPENDENCY_LEVEL: &str = "warn";

/// Span wrapping one pipeline run.
pub fn request_span(request_id: Uuid) -> Span {
    tracing::info_span!("request", request_id = %request_id)
}

/// Filter directives for a plain `level`: `warn,mat_rag=<level>`.
pub fn directives(level: &str) -> Result<String, AppError> {
    let level = parse_level(level)?;
    let crate_target = env!("CARGO_CRATE_NAME");
    Ok(format!("{DEPENDENCY_LEVEL},{crate_target}={}", level.to_string().to_lowercase()))
}

/// Initialise the global tracing subscriber.
///
/// With `prefer_level` (a CLI `-v` flag was given) `level` wins over
/// `RUST_LOG`; otherwise `RUST_LOG` wins and `level` from config is the
/// fallback. With `log_file` set, output is appended there instead of stderr.
pub fn init(level: &str, prefer_level: bool, log_file: Option<&Path>) -> Result<(), AppError> {
    let from_level = || {
        let d = directives(level)?;
        EnvFilter::try_new(&d).map_err(|e| AppError::Logger(format!("invalid directives '{d}': {e}")))
    };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(env) if !prefer_level => env,
        _ => from_level()?,
    };

    let writer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| AppError::Logger(format!("failed to open log file '{}': {e}", path.display())))?;
            BoxMakeWriter::new(file)
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(log_file.is_none())
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))?;

    Ok(())
}

/// Parse a log level string into a [`LevelFilter`].
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn plain_level_is_scoped_to_this_crate() {
        assert_eq!(directives("debug").unwrap(), "warn,mat_rag=debug");
        assert_eq!(directives("INFO").unwrap(), "warn,mat_rag=info");
    }

    #[test]
    fn invalid_level_errors() {
        assert!(parse_level("verbose").is_err());
        assert!(parse_level("").is_err());
        assert!(directives("INFO_LEVEL").is_err());
    }

    #[test]
    fn events_carry_request_id() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let id = Uuid::now_v7();
        tracing::subscriber::with_default(subscriber, || {
            let span = request_span(id);
            let _guard = span.enter();
            tracing::info!("traversal complete");
        });

        let out = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains(&format!("request_id={id}")), "{out}");
        assert!(out.contains("traversal complete"));
    }

    #[test]
    fn init_info_succeeds_or_already_init() {
        // Another test in this process may have installed the subscriber first.
        match init("info", false, None) {
            Ok(()) => {}
            Err(AppError::Logger(msg)) if msg.contains("set subscriber") => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
