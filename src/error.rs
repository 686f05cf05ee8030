use thiserror::Error;

#[derive(Debug, Error)]
pub enum MaskError {
    /// Malformed input rejected at construction time
    #[error("validation error: {0}")]
    Validation(String),

    /// Operation not allowed in the current lifecycle state
    #[error("state error: {0}")]
    State(String),

    /// A pipeline stage failed; remaining stages were skipped
    #[error("stage '{name}' (position {index}) failed: {source:#}")]
    Stage {
        name: String,
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("run cancelled before stage '{next_stage}' (position {index})")]
    Cancelled { next_stage: String, index: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MaskError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        MaskError::Validation(msg.into())
    }

    pub(crate) fn state(msg: impl Into<String>) -> Self {
        MaskError::State(msg.into())
    }

    /// Name and position of the failing stage, if this is a stage failure
    pub fn failed_stage(&self) -> Option<(&str, usize)> {
        match self {
            MaskError::Stage { name, index, .. } => Some((name.as_str(), *index)),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MaskError>;
