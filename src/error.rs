//! Error types for the dubbing pipeline.

/// Top-level error type for the story-dubbing system.
#[derive(Debug, thiserror::Error)]
pub enum SynthError {
    /// Unrecognized identifier, malformed request, unknown episode or character.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A required path, voice folder, or reference clip does not exist.
    #[error("missing resource: {0}")]
    MissingResource(String),

    /// AssetBundle decoding error (malformed stream or bounds violation).
    /// Fatal for the containing bundle only.
    #[error("bundle codec error: {0}")]
    Codec(String),

    /// Story script parsing error.
    #[error("story error: {0}")]
    Story(String),

    /// Text-to-speech synthesis error (engine unreachable, non-200 reply,
    /// read timeout). Transient; the caller may re-issue the render.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Render cache manifest error.
    #[error("cache error: {0}")]
    Cache(String),

    /// Unexpected failure inside a render job. Marks the job failed.
    #[error("render error: {0}")]
    Render(String),

    /// A render job is already in flight.
    #[error("busy: {0}")]
    Busy(String),

    /// Preparation/training worker error.
    #[error("training error: {0}")]
    Training(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Cooperative cancellation. Never treated as a failure.
    #[error("cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON document error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SynthError>;
