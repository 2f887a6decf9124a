//! Render status and progress types.

use serde::{Deserialize, Serialize};

/// Render state machine: `idle → rendering → (completed | cancelled | failed)`.
/// Terminal states are sticky until the next start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderStatus {
    Idle,
    Rendering,
    Completed,
    Cancelled,
    Failed,
}

impl RenderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Progress of one episode render, recomputed after every line.
#[derive(Debug, Clone, Serialize)]
pub struct RenderProgress {
    pub episode_id: String,
    pub status: RenderStatus,
    pub total: usize,
    pub completed: usize,
    pub current_index: Option<usize>,
    /// Short preview of the line being synthesized.
    pub current_text: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl RenderProgress {
    pub fn idle(episode_id: impl Into<String>) -> Self {
        Self {
            episode_id: episode_id.into(),
            status: RenderStatus::Idle,
            total: 0,
            completed: 0,
            current_index: None,
            current_text: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Completed fraction in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    /// Completed percentage in `[0, 100]`.
    pub fn percent(&self) -> f64 {
        self.fraction() * 100.0
    }
}

/// Progress of a whole-group render.
///
/// An episode that failed mid-way still advances `completed_episodes` once
/// the driver moves past it (its partial manifest stays on disk), keeping the
/// overall fraction monotone; the failure itself is reported on the episode
/// progress stream.
#[derive(Debug, Clone, Serialize)]
pub struct GroupRenderProgress {
    pub group_id: String,
    pub status: RenderStatus,
    pub total_episodes: usize,
    pub completed_episodes: usize,
    pub current_episode_id: Option<String>,
    /// Fraction of the in-flight episode, `[0, 1]`.
    pub current_episode_progress: f64,
    pub error: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl GroupRenderProgress {
    /// Overall fraction: episode-count progress plus the fractional
    /// contribution of the episode in flight.
    pub fn overall(&self) -> f64 {
        if self.total_episodes == 0 {
            return 0.0;
        }
        let base = self.completed_episodes as f64 / self.total_episodes as f64;
        if self.current_episode_id.is_some() {
            base + self.current_episode_progress / self.total_episodes as f64
        } else {
            base
        }
    }
}

/// Current timestamp for progress/manifest fields.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
