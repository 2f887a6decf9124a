//! Durable render cache and the render drivers.

pub mod cache;
pub mod orchestrator;
pub mod progress;

pub use cache::{CachedAudio, EpisodeManifest, RenderCache};
pub use orchestrator::{
    simple_hash, DialogueRequest, DialogueSource, RenderJob, RenderOrchestrator, VoiceCasting,
    VoicePreparer,
};
pub use progress::{GroupRenderProgress, RenderProgress, RenderStatus};
