//! Application-wide error types.
//!
//! Only process-level failures live here. Per-request failures are absorbed
//! into [`Degradation`](crate::model::Degradation) records by the pipeline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Unrecoverable extraction or planning error. The only route to
/// [`PipelineState::Failed`](crate::model::PipelineState::Failed).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("planning failed: {0}")]
    Planning(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("missing field".into());
        assert!(e.to_string().contains("config error"));
        assert!(e.to_string().contains("missing field"));
    }

    #[test]
    fn logger_error_display() {
        let e = AppError::Logger("already initialized".into());
        assert!(e.to_string().contains("already initialized"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let e: AppError = io_err.into();
        assert!(e.to_string().contains("io error"));
        let _: &dyn Error = &e;
    }

    #[test]
    fn planning_error_display() {
        let e = PipelineError::Planning("hop limit is zero".into());
        assert_eq!(e.to_string(), "planning failed: hop limit is zero");
    }
}
