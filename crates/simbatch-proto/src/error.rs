//! Error types shared across the engine boundary.

use thiserror::Error;

/// Errors raised by the engine adapter or by an engine run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine does not declare support for a dump directory. Detected at
    /// adapter construction, before any session runs.
    #[error("engine '{engine}' does not accept a dump directory argument")]
    MissingDumpDir { engine: String },

    /// IO failure while the engine streamed output rows.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reported by the engine itself. Propagated unchanged.
    #[error("engine failure: {0}")]
    Engine(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl EngineError {
    /// Wraps an engine-specific failure.
    pub fn engine(err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        EngineError::Engine(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_wraps_message() {
        let err = EngineError::engine("order book exhausted");
        assert!(err.to_string().contains("order book exhausted"));
    }

    #[test]
    fn test_missing_dump_dir_names_engine() {
        let err = EngineError::MissingDumpDir {
            engine: "bse".to_string(),
        };
        assert!(err.to_string().contains("'bse'"));
    }
}
