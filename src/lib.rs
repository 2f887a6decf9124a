//! ArkSynth: story-script voice dubbing pipeline.
//!
//! Turns a mobile game's story assets into fully voiced episode playback:
//! AssetBundle extraction → script parsing → speaker identity resolution →
//! reference selection → voice-clone synthesis → a durable per-episode cache.
//!
//! # Architecture
//!
//! The pipeline is built from independent subsystems wired together by the
//! render orchestrator:
//! - **Bundle codec**: LZ4AK + UnityFS reader yielding voice clips and portraits
//! - **Story**: line-oriented script parser and the game-data episode index
//! - **Voice**: identity resolution, the durable voice map, reference selection
//! - **TTS**: a uniform engine façade over the external synthesis runtime
//! - **Render**: resumable per-episode cache and the episode/group drivers
//!
//! The HTTP boundary, screen-capture/OCR front-end, updater and editor UI are
//! external collaborators; they consume this crate's types and share its GPU
//! lease.

pub mod bundle;
pub mod config;
pub mod error;
pub mod gpu;
pub mod ident;
pub mod loaders;
pub mod render;
pub mod story;
pub mod training;
pub mod tts;
pub mod voice;

pub use config::AppConfig;
pub use error::{Result, SynthError};
pub use gpu::GpuLease;
pub use loaders::SharedLoaders;
pub use render::{RenderCache, RenderJob, RenderOrchestrator, RenderProgress, RenderStatus};
pub use story::{Episode, StoryIndex, StoryParser};
pub use tts::{SovitsEngine, SynthesisRequest, SynthesisResult, TtsEngine};
pub use voice::{IdentityResolver, ReferenceSelector, VoiceMap};
