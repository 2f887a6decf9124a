//! Single-episode and whole-group render drivers.
//!
//! One episode job (or one group job) runs at a time as a background task,
//! processing dialogues strictly in source order: skip lines already in the
//! manifest, pick the effective voice, synthesize under the GPU lease, commit
//! the clip and its manifest entry, publish progress. Cancellation is
//! cooperative between lines; a cancelled or failed job leaves its partial
//! manifest in place so a later run resumes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::RenderCache;
use super::progress::{now_timestamp, GroupRenderProgress, RenderProgress, RenderStatus};
use crate::error::{Result, SynthError};
use crate::gpu::GpuLease;
use crate::tts::{SynthesisRequest, TtsEngine};
use crate::voice::resolver::{has_voice_folder, IdentityResolver};
use crate::voice::table_map::ScriptIdMap;

/// Display names containing any of these pick the male default pool.
const MALE_KEYWORDS: &[&str] = &["남자", "남성", "소년", "청년", "신사", "아저씨"];

/// Per-episode progress channel capacity.
const PROGRESS_CHANNEL_SIZE: usize = 64;

/// 32-bit accumulator hash (`h ← (h<<5) − h + c`), shared with the shell's
/// speaker-color logic so both sides pick the same pool slot.
pub fn simple_hash(s: &str) -> u32 {
    let mut h: i32 = 0;
    for c in s.chars() {
        h = h.wrapping_shl(5).wrapping_sub(h).wrapping_add(c as i32);
    }
    h.unsigned_abs()
}

/// One line of a render job.
#[derive(Debug, Clone)]
pub struct DialogueRequest {
    pub index: usize,
    /// Sprite/character id from the script, if any.
    pub char_id: Option<String>,
    pub speaker_name: Option<String>,
    pub text: String,
}

/// Voice-assignment inputs shared by episode and group jobs.
#[derive(Debug, Clone, Default)]
pub struct VoiceCasting {
    /// Global default voice for unmapped lines.
    pub default_voice: Option<String>,
    /// Voice for narration and last-resort fallback.
    pub narrator_voice: Option<String>,
    /// Explicit overrides keyed by table id or `name:<speaker>`.
    pub overrides: HashMap<String, String>,
    /// Default pools for names without an explicit mapping.
    pub female_pool: Vec<String>,
    pub male_pool: Vec<String>,
}

impl VoiceCasting {
    /// Gendered default for an unmapped speaker: a keyword match on the
    /// display name picks the male pool, the mapping key hashes to a slot.
    fn gendered_default(&self, speaker_name: Option<&str>, mapping_key: &str) -> Option<String> {
        let checked = speaker_name.unwrap_or(mapping_key);
        let is_male = MALE_KEYWORDS.iter().any(|kw| checked.contains(kw));
        let pool = if is_male && !self.male_pool.is_empty() {
            &self.male_pool
        } else {
            &self.female_pool
        };
        if pool.is_empty() {
            return None;
        }
        Some(pool[simple_hash(mapping_key) as usize % pool.len()].clone())
    }
}

/// One episode render job.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub episode_id: String,
    pub dialogues: Vec<DialogueRequest>,
    /// Short language code passed to the engine.
    pub language: String,
    pub casting: VoiceCasting,
    /// Wipe the episode cache before rendering.
    pub force: bool,
}

/// Brings a voice with raw audio to the ready state through the external
/// preparation worker.
#[async_trait]
pub trait VoicePreparer: Send + Sync {
    async fn prepare(&self, char_id: &str) -> Result<bool>;
}

/// Preparation state per voice id. Attempts are memoized; a failed
/// preparation is not retried within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VoiceState {
    Raw,
    Ready,
    Failed,
}

struct EpisodeHandle {
    episode_id: String,
    progress: Arc<Mutex<RenderProgress>>,
    cancel: CancellationToken,
    done: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

struct GroupHandle {
    progress: Arc<Mutex<GroupRenderProgress>>,
    cancel: CancellationToken,
    done: Arc<AtomicBool>,
    #[allow(dead_code)]
    join: Option<JoinHandle<()>>,
}

/// Callback resolving an episode id to its dialogue list (inverted control so
/// the group driver does not couple to the story index).
pub type DialogueSource = Arc<dyn Fn(&str) -> Result<Vec<DialogueRequest>> + Send + Sync>;

struct Inner {
    cache: RenderCache,
    engine: Arc<dyn TtsEngine>,
    lease: GpuLease,
    resolver: Arc<IdentityResolver>,
    character_table_path: PathBuf,
    /// Extracted raw-audio root, for on-demand preparation.
    voice_root: PathBuf,
    preparer: Option<Arc<dyn VoicePreparer>>,
    script_ids: tokio::sync::OnceCell<Arc<ScriptIdMap>>,
    voice_states: tokio::sync::Mutex<HashMap<String, VoiceState>>,
    episode: Mutex<Option<EpisodeHandle>>,
    group: Mutex<Option<GroupHandle>>,
    progress_tx: broadcast::Sender<RenderProgress>,
    group_progress_tx: broadcast::Sender<GroupRenderProgress>,
}

/// Render driver for single episodes and whole groups.
#[derive(Clone)]
pub struct RenderOrchestrator {
    inner: Arc<Inner>,
}

impl RenderOrchestrator {
    pub fn new(
        cache: RenderCache,
        engine: Arc<dyn TtsEngine>,
        lease: GpuLease,
        resolver: Arc<IdentityResolver>,
        character_table_path: impl Into<PathBuf>,
        voice_root: impl Into<PathBuf>,
    ) -> Self {
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_SIZE);
        let (group_progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_SIZE);
        Self {
            inner: Arc::new(Inner {
                cache,
                engine,
                lease,
                resolver,
                character_table_path: character_table_path.into(),
                voice_root: voice_root.into(),
                preparer: None,
                script_ids: tokio::sync::OnceCell::new(),
                voice_states: tokio::sync::Mutex::new(HashMap::new()),
                episode: Mutex::new(None),
                group: Mutex::new(None),
                progress_tx,
                group_progress_tx,
            }),
        }
    }

    /// Attach the external preparation worker for on-demand voice setup.
    pub fn with_preparer(mut self, preparer: Arc<dyn VoicePreparer>) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("with_preparer must be called before the orchestrator is shared")
            .preparer = Some(preparer);
        self
    }

    /// Subscribe to episode progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<RenderProgress> {
        self.inner.progress_tx.subscribe()
    }

    /// Subscribe to group progress events.
    pub fn subscribe_group(&self) -> broadcast::Receiver<GroupRenderProgress> {
        self.inner.group_progress_tx.subscribe()
    }

    /// Whether an episode job is in flight.
    pub fn is_rendering(&self) -> bool {
        self.inner
            .episode
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.done.load(Ordering::SeqCst))
    }

    /// Whether a group job is in flight.
    pub fn is_group_rendering(&self) -> bool {
        self.inner
            .group
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.done.load(Ordering::SeqCst))
    }

    /// Progress for an episode: the live job when it matches, otherwise a
    /// cache-derived snapshot, `None` for unknown episodes.
    pub fn progress(&self, episode_id: Option<&str>) -> Option<RenderProgress> {
        {
            let guard = self.inner.episode.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(handle) = guard.as_ref() {
                if episode_id.is_none() || episode_id == Some(handle.episode_id.as_str()) {
                    return Some(handle.progress.lock().unwrap_or_else(|e| e.into_inner()).clone());
                }
            }
        }
        let episode_id = episode_id?;
        if !self.inner.cache.has_cache(episode_id) {
            return None;
        }
        let (completed, total) = self.inner.cache.progress(episode_id);
        let mut progress = RenderProgress::idle(episode_id);
        progress.total = total;
        progress.completed = completed;
        progress.status = if completed >= total && total > 0 {
            RenderStatus::Completed
        } else {
            RenderStatus::Idle
        };
        Some(progress)
    }

    /// Group progress of the current (or last) group job.
    pub fn group_progress(&self) -> Option<GroupRenderProgress> {
        self.inner
            .group
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|h| h.progress.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    /// The script-id → table-id map, loaded on the first orchestration call.
    async fn script_ids(&self) -> Result<Arc<ScriptIdMap>> {
        let inner = &self.inner;
        inner
            .script_ids
            .get_or_try_init(|| async {
                ScriptIdMap::load(&inner.character_table_path).map(Arc::new)
            })
            .await
            .cloned()
    }

    /// Start rendering one episode.
    ///
    /// Calling again for the in-flight episode returns the existing progress;
    /// any other episode fails busy. An already complete episode returns a
    /// completed snapshot without starting a job.
    pub async fn start_render(&self, job: RenderJob) -> Result<RenderProgress> {
        let script_ids = self.script_ids().await?;

        let mut guard = self.inner.episode.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = guard.as_ref() {
            if !handle.done.load(Ordering::SeqCst) {
                if handle.episode_id == job.episode_id {
                    return Ok(handle.progress.lock().unwrap_or_else(|e| e.into_inner()).clone());
                }
                return Err(SynthError::Busy(format!(
                    "already rendering {}",
                    handle.episode_id
                )));
            }
        }

        if job.force && self.inner.cache.has_cache(&job.episode_id) {
            info!("wiping cache before forced render: {}", job.episode_id);
            self.inner.cache.delete_episode(&job.episode_id)?;
        }

        if self.inner.cache.is_complete(&job.episode_id) {
            let (completed, total) = self.inner.cache.progress(&job.episode_id);
            let mut progress = RenderProgress::idle(&job.episode_id);
            progress.status = RenderStatus::Completed;
            progress.total = total;
            progress.completed = completed;
            return Ok(progress);
        }

        let progress = Arc::new(Mutex::new(RenderProgress {
            episode_id: job.episode_id.clone(),
            status: RenderStatus::Rendering,
            total: job.dialogues.len(),
            completed: 0,
            current_index: None,
            current_text: None,
            error: None,
            started_at: Some(now_timestamp()),
            finished_at: None,
        }));
        let cancel = CancellationToken::new();
        let done = Arc::new(AtomicBool::new(false));

        let snapshot = progress.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let task_inner = Arc::clone(&self.inner);
        let task_progress = Arc::clone(&progress);
        let task_cancel = cancel.clone();
        let task_done = Arc::clone(&done);
        let join = tokio::spawn(async move {
            run_episode(task_inner, script_ids, job, task_progress, task_cancel).await;
            task_done.store(true, Ordering::SeqCst);
        });

        *guard = Some(EpisodeHandle {
            episode_id: snapshot.episode_id.clone(),
            progress,
            cancel,
            done,
            join: Some(join),
        });
        drop(guard);

        let _ = self.inner.progress_tx.send(snapshot.clone());
        Ok(snapshot)
    }

    /// Request cancellation of the in-flight episode job. With an id, only a
    /// matching job is cancelled.
    pub fn cancel_render(&self, episode_id: Option<&str>) -> bool {
        let guard = self.inner.episode.lock().unwrap_or_else(|e| e.into_inner());
        let Some(handle) = guard.as_ref() else {
            return false;
        };
        if handle.done.load(Ordering::SeqCst) {
            return false;
        }
        if let Some(id) = episode_id {
            if handle.episode_id != id {
                return false;
            }
        }
        info!("cancellation requested: {}", handle.episode_id);
        handle.cancel.cancel();
        true
    }

    fn take_episode_join(&self) -> Option<JoinHandle<()>> {
        self.inner
            .episode
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_mut()
            .and_then(|h| h.join.take())
    }

    /// Wait for the in-flight episode job to finish (used by the group driver
    /// and by tests).
    pub async fn wait_for_render(&self) {
        if let Some(join) = self.take_episode_join() {
            let _ = join.await;
        }
    }

    /// Start rendering every episode of a group sequentially.
    pub async fn start_group_render(
        &self,
        group_id: &str,
        episode_ids: Vec<String>,
        get_dialogues: DialogueSource,
        language: &str,
        casting: VoiceCasting,
        force: bool,
    ) -> Result<GroupRenderProgress> {
        // The map loads here so a broken character table fails the request
        // instead of the background task.
        self.script_ids().await?;

        if self.is_group_rendering() {
            return Err(SynthError::Busy("a group render is in flight".into()));
        }
        if self.is_rendering() {
            return Err(SynthError::Busy("an episode render is in flight".into()));
        }

        let progress = Arc::new(Mutex::new(GroupRenderProgress {
            group_id: group_id.to_owned(),
            status: RenderStatus::Rendering,
            total_episodes: episode_ids.len(),
            completed_episodes: 0,
            current_episode_id: None,
            current_episode_progress: 0.0,
            error: None,
            started_at: Some(now_timestamp()),
            finished_at: None,
        }));
        let cancel = CancellationToken::new();
        let done = Arc::new(AtomicBool::new(false));
        let snapshot = progress.lock().unwrap_or_else(|e| e.into_inner()).clone();

        let driver = self.clone();
        let task_progress = Arc::clone(&progress);
        let task_cancel = cancel.clone();
        let task_done = Arc::clone(&done);
        let language = language.to_owned();
        let join = tokio::spawn(async move {
            driver
                .run_group(episode_ids, get_dialogues, language, casting, force, task_progress, task_cancel)
                .await;
            task_done.store(true, Ordering::SeqCst);
        });

        *self.inner.group.lock().unwrap_or_else(|e| e.into_inner()) = Some(GroupHandle {
            progress,
            cancel,
            done,
            join: Some(join),
        });

        let _ = self.inner.group_progress_tx.send(snapshot.clone());
        Ok(snapshot)
    }

    /// Cancel the group job and whatever episode it is currently driving.
    pub fn cancel_group_render(&self) -> bool {
        let cancelled = {
            let guard = self.inner.group.lock().unwrap_or_else(|e| e.into_inner());
            match guard.as_ref() {
                Some(handle) if !handle.done.load(Ordering::SeqCst) => {
                    handle.cancel.cancel();
                    true
                }
                _ => false,
            }
        };
        if cancelled {
            self.cancel_render(None);
        }
        cancelled
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_group(
        &self,
        episode_ids: Vec<String>,
        get_dialogues: DialogueSource,
        language: String,
        casting: VoiceCasting,
        force: bool,
        progress: Arc<Mutex<GroupRenderProgress>>,
        cancel: CancellationToken,
    ) {
        let publish = |progress: &Arc<Mutex<GroupRenderProgress>>| {
            let snapshot = progress.lock().unwrap_or_else(|e| e.into_inner()).clone();
            let _ = self.inner.group_progress_tx.send(snapshot);
        };

        for episode_id in &episode_ids {
            if cancel.is_cancelled() {
                break;
            }
            {
                let mut p = progress.lock().unwrap_or_else(|e| e.into_inner());
                p.current_episode_id = Some(episode_id.clone());
                p.current_episode_progress = 0.0;
            }
            publish(&progress);

            let dialogues = match get_dialogues(episode_id) {
                Ok(dialogues) => dialogues,
                Err(e) => {
                    warn!("group render failed on {episode_id}: {e}");
                    let mut p = progress.lock().unwrap_or_else(|e| e.into_inner());
                    p.status = RenderStatus::Failed;
                    p.error = Some(e.to_string());
                    p.finished_at = Some(now_timestamp());
                    drop(p);
                    publish(&progress);
                    return;
                }
            };
            if dialogues.is_empty() {
                warn!("no dialogues, skipping {episode_id}");
                progress.lock().unwrap_or_else(|e| e.into_inner()).completed_episodes += 1;
                publish(&progress);
                continue;
            }

            let job = RenderJob {
                episode_id: episode_id.clone(),
                dialogues,
                language: language.clone(),
                casting: casting.clone(),
                force,
            };
            if let Err(e) = self.start_render(job).await {
                warn!("group render failed to start {episode_id}: {e}");
                let mut p = progress.lock().unwrap_or_else(|e| e.into_inner());
                p.status = RenderStatus::Failed;
                p.error = Some(e.to_string());
                p.finished_at = Some(now_timestamp());
                drop(p);
                publish(&progress);
                return;
            }

            // Mirror the episode's fraction into the group progress while it
            // runs.
            while self.is_rendering() {
                if let Some(episode_progress) = self.progress(Some(episode_id)) {
                    let mut p = progress.lock().unwrap_or_else(|e| e.into_inner());
                    p.current_episode_progress = episode_progress.fraction();
                    drop(p);
                    publish(&progress);
                }
                tokio::time::sleep(std::time::Duration::from_millis(150)).await;
            }
            self.wait_for_render().await;

            if cancel.is_cancelled() {
                break;
            }

            // A failed episode keeps its partial manifest and still counts as
            // driven-past, so the overall fraction stays monotone.
            let mut p = progress.lock().unwrap_or_else(|e| e.into_inner());
            p.completed_episodes += 1;
            p.current_episode_progress = 1.0;
            drop(p);
            publish(&progress);
        }

        let mut p = progress.lock().unwrap_or_else(|e| e.into_inner());
        if cancel.is_cancelled() {
            p.status = RenderStatus::Cancelled;
        } else if p.status == RenderStatus::Rendering {
            p.status = RenderStatus::Completed;
            p.current_episode_id = None;
        }
        p.finished_at = Some(now_timestamp());
        let group_id = p.group_id.clone();
        let status = p.status;
        drop(p);
        publish(&progress);
        info!("group render finished: {group_id} ({status:?})");
    }
}

/// Check (and if needed prepare) a voice, memoizing the outcome.
async fn ensure_voice_ready(inner: &Arc<Inner>, voice_id: &str) -> bool {
    {
        let states = inner.voice_states.lock().await;
        match states.get(voice_id) {
            Some(VoiceState::Ready) => return true,
            Some(VoiceState::Failed) => return false,
            _ => {}
        }
    }

    if inner.engine.is_voice_available(voice_id).await {
        inner
            .voice_states
            .lock()
            .await
            .insert(voice_id.to_owned(), VoiceState::Ready);
        return true;
    }

    // Raw extracted audio can be promoted through the preparation worker.
    if has_voice_folder(&inner.voice_root, voice_id) {
        let Some(preparer) = &inner.preparer else {
            inner
                .voice_states
                .lock()
                .await
                .insert(voice_id.to_owned(), VoiceState::Raw);
            return false;
        };
        info!("preparing voice on demand: {voice_id}");
        let prepared = preparer.prepare(voice_id).await.unwrap_or_else(|e| {
            warn!("preparation failed for {voice_id}: {e}");
            false
        });
        let ready = prepared && inner.engine.is_voice_available(voice_id).await;
        inner.voice_states.lock().await.insert(
            voice_id.to_owned(),
            if ready { VoiceState::Ready } else { VoiceState::Failed },
        );
        return ready;
    }

    false
}

async fn run_episode(
    inner: Arc<Inner>,
    script_ids: Arc<ScriptIdMap>,
    job: RenderJob,
    progress: Arc<Mutex<RenderProgress>>,
    cancel: CancellationToken,
) {
    let publish = |progress: &Arc<Mutex<RenderProgress>>| {
        let snapshot = progress.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let _ = inner.progress_tx.send(snapshot);
    };

    match run_episode_inner(&inner, &script_ids, &job, &progress, &cancel, &publish).await {
        Ok(()) => {}
        Err(e) => {
            warn!("render failed ({}): {e}", job.episode_id);
            let mut p = progress.lock().unwrap_or_else(|e| e.into_inner());
            p.status = RenderStatus::Failed;
            p.error = Some(e.to_string());
            p.finished_at = Some(now_timestamp());
        }
    }
    publish(&progress);
}

async fn run_episode_inner(
    inner: &Arc<Inner>,
    script_ids: &ScriptIdMap,
    job: &RenderJob,
    progress: &Arc<Mutex<RenderProgress>>,
    cancel: &CancellationToken,
    publish: &impl Fn(&Arc<Mutex<RenderProgress>>),
) -> Result<()> {
    let cache = &inner.cache;
    let episode_id = &job.episode_id;

    let manifest = match cache.manifest(episode_id) {
        Some(manifest) => manifest,
        None => cache.create_manifest(episode_id, job.dialogues.len(), &job.language)?,
    };
    let rendered = manifest.rendered_indices();
    {
        let mut p = progress.lock().unwrap_or_else(|e| e.into_inner());
        p.completed = rendered.len();
    }

    // First pass: in-episode name inheritance. The first id observed for a
    // display name also covers lines that carry the name alone (the same NPC
    // often appears with and without a sprite in one script).
    let mut name_to_id: HashMap<String, String> = HashMap::new();
    for dialogue in &job.dialogues {
        if let (Some(char_id), Some(name)) = (&dialogue.char_id, &dialogue.speaker_name) {
            if !char_id.is_empty() && !name.is_empty() && !name_to_id.contains_key(name) {
                name_to_id.insert(name.clone(), script_ids.resolve(char_id));
            }
        }
    }
    if !name_to_id.is_empty() {
        debug!("name inheritance map: {name_to_id:?}");
    }

    info!(
        "render start: {episode_id}, {} dialogues, {} cached",
        job.dialogues.len(),
        rendered.len()
    );

    for dialogue in &job.dialogues {
        if cancel.is_cancelled() {
            let mut p = progress.lock().unwrap_or_else(|e| e.into_inner());
            p.status = RenderStatus::Cancelled;
            p.finished_at = Some(now_timestamp());
            info!("render cancelled: {episode_id}");
            return Ok(());
        }

        if rendered.contains(&dialogue.index) {
            continue;
        }

        let speaker_name = dialogue.speaker_name.as_deref().filter(|n| !n.is_empty());
        let resolved_id = dialogue
            .char_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(|id| script_ids.resolve(id));
        let mapping_key = resolved_id
            .clone()
            .or_else(|| speaker_name.map(|n| format!("name:{n}")));

        {
            let mut p = progress.lock().unwrap_or_else(|e| e.into_inner());
            p.current_index = Some(dialogue.index);
            p.current_text = Some(preview(&dialogue.text));
        }
        publish(progress);

        // Effective voice precedence: resolver (aliases, official table,
        // name-keyed map, own model) → explicit override → in-episode name
        // inheritance → gendered default pool → narrator/global default.
        let mut chosen: Option<String> = None;
        if let Some(candidate) = inner
            .resolver
            .resolve_voice_id(speaker_name, resolved_id.as_deref())
        {
            if ensure_voice_ready(inner, &candidate).await {
                debug!("line {}: resolved voice {candidate}", dialogue.index);
                chosen = Some(candidate);
            }
        }
        if chosen.is_none() {
            if let Some(key) = &mapping_key {
                if let Some(mapped) = job.casting.overrides.get(key) {
                    debug!("line {}: override {key} -> {mapped}", dialogue.index);
                    chosen = Some(mapped.clone());
                }
            }
        }
        if chosen.is_none() && resolved_id.is_none() {
            if let Some(name) = speaker_name {
                if let Some(inherited) = name_to_id.get(name) {
                    debug!("line {}: inherited {name} -> {inherited}", dialogue.index);
                    chosen = job
                        .casting
                        .overrides
                        .get(inherited)
                        .cloned()
                        .or_else(|| Some(inherited.clone()));
                }
            }
        }
        if chosen.is_none() {
            if let Some(key) = &mapping_key {
                if let Some(pooled) = job.casting.gendered_default(speaker_name, key) {
                    debug!("line {}: gendered default {pooled}", dialogue.index);
                    chosen = Some(pooled);
                }
            }
        }
        if chosen.is_none() {
            chosen = job
                .casting
                .narrator_voice
                .clone()
                .or_else(|| job.casting.default_voice.clone());
        }

        // Last resort: the chosen candidate may have no ready model. Fall
        // back to the narrator, then the global default, then skip the line.
        let mut voice_id = None;
        if let Some(candidate) = chosen {
            if ensure_voice_ready(inner, &candidate).await {
                voice_id = Some(candidate);
            } else {
                for fallback in [&job.casting.narrator_voice, &job.casting.default_voice] {
                    if let Some(fallback) = fallback {
                        if fallback != &candidate && ensure_voice_ready(inner, fallback).await {
                            debug!("line {}: fallback {candidate} -> {fallback}", dialogue.index);
                            voice_id = Some(fallback.clone());
                            break;
                        }
                    }
                }
            }
        }
        let Some(voice_id) = voice_id else {
            warn!(
                "line {}: no usable voice (speaker {:?}), skipping",
                dialogue.index, speaker_name
            );
            continue;
        };

        let request = SynthesisRequest::new(&dialogue.text, &voice_id, &job.language);

        let result = {
            let _gpu = inner.lease.acquire().await;
            inner.engine.synthesize(&request).await
        };
        match result {
            Ok(Some(synthesized)) => {
                let audio_path = cache.audio_path(episode_id, dialogue.index);
                if let Some(parent) = audio_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&audio_path, &synthesized.audio)?;
                cache.add_entry(
                    episode_id,
                    dialogue.index,
                    resolved_id.as_deref(),
                    &dialogue.text,
                    synthesized.duration,
                    (resolved_id.as_deref() != Some(voice_id.as_str()))
                        .then_some(voice_id.as_str()),
                )?;
                let mut p = progress.lock().unwrap_or_else(|e| e.into_inner());
                p.completed += 1;
                drop(p);
                publish(progress);
            }
            Ok(None) => {
                info!("line {}: nothing speakable, skipped", dialogue.index);
            }
            Err(SynthError::Tts(e)) => {
                // Transient engine failure: record and move to the next line;
                // a later run resumes from the manifest.
                warn!("line {} failed: {e}", dialogue.index);
            }
            Err(e) => return Err(e),
        }
    }

    let mut p = progress.lock().unwrap_or_else(|e| e.into_inner());
    if p.status == RenderStatus::Rendering {
        p.status = RenderStatus::Completed;
        p.current_index = None;
        p.current_text = None;
        p.finished_at = Some(now_timestamp());
        info!("render complete: {episode_id}");
    }
    Ok(())
}

/// Short preview of a line for progress events.
fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(30).collect();
    if text.chars().count() > 30 {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn accumulator_hash_matches_the_shell() {
        // h ← (h<<5) − h + c over "name:모모카", reduced to 32 bits.
        assert_eq!(simple_hash("name:모모카"), 1_887_155_205);
        assert_eq!(simple_hash(""), 0);
    }

    #[test]
    fn gendered_fallback_picks_the_hashed_slot() {
        let casting = VoiceCasting {
            female_pool: vec!["a".into(), "b".into(), "c".into()],
            ..VoiceCasting::default()
        };
        // 1_887_155_205 % 3 == 0 → slot "a".
        assert_eq!(
            casting
                .gendered_default(Some("모모카"), "name:모모카")
                .as_deref(),
            Some("a")
        );
    }

    #[test]
    fn male_keyword_switches_pools() {
        let casting = VoiceCasting {
            female_pool: vec!["f1".into(), "f2".into()],
            male_pool: vec!["m1".into(), "m2".into()],
            ..VoiceCasting::default()
        };
        let key = "name:수상한 남자";
        let picked = casting.gendered_default(Some("수상한 남자"), key).unwrap();
        let expected = ["m1", "m2"][simple_hash(key) as usize % 2];
        assert_eq!(picked, expected);
    }

    #[test]
    fn empty_male_pool_falls_back_to_female() {
        let casting = VoiceCasting {
            female_pool: vec!["f1".into()],
            ..VoiceCasting::default()
        };
        assert_eq!(
            casting.gendered_default(Some("신사"), "name:신사").as_deref(),
            Some("f1")
        );
    }

    #[test]
    fn no_pools_yields_none() {
        let casting = VoiceCasting::default();
        assert!(casting.gendered_default(Some("모모카"), "name:모모카").is_none());
    }

    #[test]
    fn preview_truncates_long_lines() {
        let long: String = "가".repeat(40);
        let p = preview(&long);
        assert_eq!(p.chars().count(), 33);
        assert!(p.ends_with("..."));
        assert_eq!(preview("짧은 대사"), "짧은 대사");
    }
}
