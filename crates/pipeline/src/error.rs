use thiserror::Error;

/// Error raised by a single stage.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt input: {0}")]
    Corrupt(String),

    #[error("{0}")]
    Other(String),
}

impl StageFailure {
    pub fn other(msg: impl Into<String>) -> Self {
        StageFailure::Other(msg.into())
    }
}

/// The first failure of a pipeline, tagged with the stage that raised it.
///
/// Stage indices: source `0`, transforms `1..=n`, sink `n + 1`.
#[derive(Debug, Error)]
#[error("stage {index} ({name}) failed: {cause}")]
pub struct StageError {
    pub index: usize,
    pub name: String,
    #[source]
    pub cause: StageFailure,
}

/// Terminal error delivered to a pipeline's completion callback.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("pipeline aborted")]
    Aborted,

    #[error("pipeline did not finish")]
    Unfinished,

    #[error("failed to set up stage: {0}")]
    Setup(#[source] StageFailure),
}

impl PipelineError {
    /// Index of the failing stage, if a stage failed.
    pub fn stage_index(&self) -> Option<usize> {
        match self {
            PipelineError::Stage(e) => Some(e.index),
            _ => None,
        }
    }
}
