use thiserror::Error;

/// All errors produced by kws-core.
#[derive(Debug, Error)]
pub enum KwsError {
    #[error("input too short: need at least {needed} samples, got {got}")]
    InputTooShort { needed: usize, got: usize },

    #[error("invalid WAV container: {0}")]
    InvalidContainer(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("keyword label '{label}' not found among model labels {available:?}")]
    UnknownKeywordLabel {
        label: String,
        available: Vec<String>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KwsError {
    /// Whether the failure is confined to a single window and the pipeline
    /// should carry on with the next one.
    pub fn is_per_window(&self) -> bool {
        matches!(self, KwsError::InferenceFailed(_))
    }
}

pub type Result<T> = std::result::Result<T, KwsError>;
