//! Text-to-speech façade.
//!
//! One uniform contract over the external synthesis engines: liveness and
//! readiness probes, voice availability, segment-wise synthesis, and optional
//! fine-tuning for engines that support it.

pub mod sovits;
pub mod text;
pub mod wav;

use async_trait::async_trait;

use crate::error::{Result, SynthError};
use crate::training::{PrepareRequest, ProgressFn};

pub use sovits::SovitsEngine;

/// One synthesis request.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    /// Voice character id (model directory name).
    pub voice_id: String,
    /// Short language code (`ko`, `ja`, ...).
    pub language: String,
    pub speed_factor: f32,
    /// Engine-specific extras, forwarded opaquely.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SynthesisRequest {
    pub fn new(
        text: impl Into<String>,
        voice_id: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            voice_id: voice_id.into(),
            language: language.into(),
            speed_factor: 1.0,
            extra: serde_json::Map::new(),
        }
    }
}

/// A finished synthesis.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    /// Complete WAV payload.
    pub audio: Vec<u8>,
    pub sample_rate: u32,
    pub duration: f64,
    /// Tag of the engine that produced it.
    pub engine: &'static str,
}

/// Uniform synthesis/training contract over the external engines.
#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Engine tag recorded into results and manifests.
    fn engine_name(&self) -> &'static str;

    /// Whether the engine runtime is reachable right now.
    async fn is_available(&self) -> bool;

    /// Start the external runtime if needed and wait (bounded) for liveness.
    async fn ensure_ready(&self) -> Result<bool>;

    /// Synthesize one line. `Ok(None)` means the text has nothing speakable
    /// and the line should be skipped without error.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Option<SynthesisResult>>;

    /// Voice ids with a prepared model.
    async fn available_voices(&self) -> Result<Vec<String>>;

    /// Whether one voice id has a prepared model.
    async fn is_voice_available(&self, voice_id: &str) -> bool;

    /// Fine-tune/prepare a voice. Engines without training support keep the
    /// default. Returns `true` on success.
    async fn train(
        &self,
        _request: &PrepareRequest,
        _progress: Option<ProgressFn>,
    ) -> Result<bool> {
        Err(SynthError::Training(format!(
            "engine {} does not support training",
            self.engine_name()
        )))
    }

    /// Cancel an in-flight training run, if any.
    async fn cancel_training(&self) {}
}
