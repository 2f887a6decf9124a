//! GPT-SoVITS engine client.
//!
//! Talks to the external GPT-SoVITS runtime over HTTP: weight loading through
//! the two `set_*_weights` endpoints, synthesis through `/tts` (raw WAV
//! reply), liveness by connecting at all. The runtime can be launched from a
//! local installation and is given a bounded wall-clock budget to come up.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::text;
use super::wav;
use super::{SynthesisRequest, SynthesisResult, TtsEngine};
use crate::config::TtsConfig;
use crate::error::{Result, SynthError};
use crate::training::{PrepareRequest, PreparationWorker, ProgressFn};
use crate::voice::reference::ReferenceSelector;

/// Engine tag used in manifests and results.
pub const ENGINE_NAME: &str = "gpt_sovits";

#[derive(serde::Serialize)]
struct TtsRequestBody<'a> {
    text: &'a str,
    text_lang: &'a str,
    ref_audio_path: String,
    aux_ref_audio_paths: Vec<String>,
    prompt_text: &'a str,
    prompt_lang: &'a str,
    top_k: u32,
    top_p: f32,
    temperature: f32,
    text_split_method: &'a str,
    speed_factor: f32,
}

/// GPT-SoVITS over its HTTP API.
pub struct SovitsEngine {
    config: TtsConfig,
    model_root: PathBuf,
    client: reqwest::Client,
    /// Runtime child process, when this instance launched it.
    runtime: Mutex<Option<tokio::process::Child>>,
    /// Voice whose weights are currently loaded in the runtime.
    loaded_voice: Mutex<Option<String>>,
    /// Preparation worker executable, when installed.
    worker_exe: Option<PathBuf>,
    worker: Mutex<Option<PreparationWorker>>,
}

impl SovitsEngine {
    pub fn new(config: TtsConfig, model_root: impl Into<PathBuf>, worker_exe: Option<PathBuf>) -> Self {
        Self {
            config,
            model_root: model_root.into(),
            client: reqwest::Client::new(),
            runtime: Mutex::new(None),
            loaded_voice: Mutex::new(None),
            worker_exe,
            worker: Mutex::new(None),
        }
    }

    pub fn model_dir(&self, voice_id: &str) -> PathBuf {
        self.model_root.join(voice_id)
    }

    /// GPT-SoVITS v2 expects `all_<lang>` codes.
    fn api_language(language: &str) -> String {
        match language {
            "ko" | "ja" | "zh" | "en" => format!("all_{language}"),
            other => other.to_owned(),
        }
    }

    /// Launch the runtime from a local installation. `Ok(false)` when no
    /// installation is configured.
    async fn start_runtime(&self) -> Result<bool> {
        let Some(engine_path) = &self.config.engine_path else {
            debug!("no local runtime installation configured");
            return Ok(false);
        };
        let Some(python) = &self.config.python_path else {
            warn!("runtime installed at {} but no interpreter configured", engine_path.display());
            return Ok(false);
        };

        let mut script = engine_path.join("api_v2.py");
        if !script.exists() {
            script = engine_path.join("api.py");
        }
        if !script.exists() {
            return Err(SynthError::Tts(format!(
                "no API script under {}",
                engine_path.display()
            )));
        }

        let mut guard = self.runtime.lock().await;
        if let Some(child) = guard.as_mut() {
            if child.try_wait().ok().flatten().is_none() {
                return Ok(true);
            }
        }

        info!("starting synthesis runtime: {}", script.display());
        let child = tokio::process::Command::new(python)
            .arg(&script)
            .arg("-a")
            .arg(&self.config.api_host)
            .arg("-p")
            .arg(self.config.api_port.to_string())
            .current_dir(engine_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SynthError::Tts(format!("failed to launch runtime: {e}")))?;
        *guard = Some(child);
        Ok(true)
    }

    /// Find the fine-tuned weight files in a model directory, if present.
    fn find_weights(model_dir: &Path) -> Option<(PathBuf, PathBuf)> {
        let entries: Vec<PathBuf> = std::fs::read_dir(model_dir)
            .ok()?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        let sovits = entries
            .iter()
            .find(|p| p.extension().is_some_and(|ext| ext == "pth"))?;
        let gpt = entries
            .iter()
            .find(|p| p.extension().is_some_and(|ext| ext == "ckpt"))?;
        Some((sovits.clone(), gpt.clone()))
    }

    /// Load a voice's fine-tuned weights into the runtime. Voices prepared in
    /// reference-only mode have no weight files and keep the base model.
    async fn load_voice(&self, voice_id: &str) -> Result<()> {
        let mut loaded = self.loaded_voice.lock().await;
        if loaded.as_deref() == Some(voice_id) {
            return Ok(());
        }

        let Some((sovits_path, gpt_path)) = Self::find_weights(&self.model_dir(voice_id)) else {
            debug!("{voice_id}: no fine-tuned weights, keeping base model");
            *loaded = None;
            return Ok(());
        };

        for (endpoint, path) in [
            ("set_sovits_weights", &sovits_path),
            ("set_gpt_weights", &gpt_path),
        ] {
            let url = format!("{}/{endpoint}", self.config.api_url());
            let response = self
                .client
                .get(&url)
                .query(&[("weights_path", path.to_string_lossy().as_ref())])
                .timeout(Duration::from_secs(self.config.request_timeout_secs))
                .send()
                .await
                .map_err(|e| SynthError::Tts(format!("{endpoint} failed: {e}")))?;
            if !response.status().is_success() {
                return Err(SynthError::Tts(format!(
                    "{endpoint} returned {}",
                    response.status()
                )));
            }
        }
        info!("loaded weights for {voice_id}");
        *loaded = Some(voice_id.to_owned());
        Ok(())
    }

    async fn synthesize_segment(
        &self,
        segment: &str,
        api_lang: &str,
        primary: &crate::voice::reference::ReferenceClip,
        aux_paths: &[String],
        speed_factor: f32,
    ) -> Result<Vec<u8>> {
        let body = TtsRequestBody {
            text: segment,
            text_lang: api_lang,
            ref_audio_path: primary.audio_path.to_string_lossy().into_owned(),
            aux_ref_audio_paths: aux_paths.to_vec(),
            prompt_text: &primary.text,
            prompt_lang: api_lang,
            top_k: self.config.top_k,
            top_p: self.config.top_p,
            temperature: self.config.temperature,
            // The runtime's own splitter, for intonation inside a segment.
            text_split_method: "cut5",
            speed_factor,
        };

        let response = self
            .client
            .post(format!("{}/tts", self.config.api_url()))
            .json(&body)
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SynthError::Tts(format!(
                        "synthesis timed out after {}s",
                        self.config.request_timeout_secs
                    ))
                } else {
                    SynthError::Tts(format!("synthesis request failed: {e}"))
                }
            })?;
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(SynthError::Tts(format!(
                "synthesis returned {status}: {detail}"
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SynthError::Tts(format!("synthesis read failed: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl TtsEngine for SovitsEngine {
    fn engine_name(&self) -> &'static str {
        ENGINE_NAME
    }

    /// Any HTTP response means the runtime is up; only connection refusal (or
    /// a probe timeout) means it is not.
    async fn is_available(&self) -> bool {
        let url = format!("{}/", self.config.api_url());
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!("runtime probe failed: {e}");
                false
            }
        }
    }

    async fn ensure_ready(&self) -> Result<bool> {
        if self.is_available().await {
            return Ok(true);
        }
        if !self.start_runtime().await? {
            return Ok(false);
        }

        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.ready_timeout_secs);
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if self.is_available().await {
                info!("synthesis runtime ready");
                return Ok(true);
            }
        }
        warn!(
            "runtime not ready within {}s",
            self.config.ready_timeout_secs
        );
        Ok(false)
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Option<SynthesisResult>> {
        let Some(cleaned) = text::preprocess(&request.text) else {
            info!("skipping unspeakable text: {:?}", request.text);
            return Ok(None);
        };
        let normalized = text::normalize_numbers(&cleaned);
        let segments = text::split_for_synthesis(&normalized, self.config.max_segment_length);

        let model_dir = self.model_dir(&request.voice_id);
        if !model_dir.is_dir() {
            return Err(SynthError::MissingResource(format!(
                "no voice model for {}",
                request.voice_id
            )));
        }

        self.load_voice(&request.voice_id).await?;

        // The reference transcript should be about as long as what we
        // actually synthesize: the average segment, not the whole line.
        let avg_segment_len = segments.iter().map(|s| s.chars().count()).sum::<usize>()
            / segments.len().max(1);
        let selector = ReferenceSelector::new(
            &model_dir,
            self.config.min_ref_audio_length,
            self.config.max_ref_audio_length,
        );
        let primary = selector.select_hybrid(avg_segment_len).ok_or_else(|| {
            SynthError::MissingResource(format!("no usable reference clip for {}", request.voice_id))
        })?;
        let aux_paths: Vec<String> = selector
            .all_by_score(Some(primary.audio_path.as_path()))
            .into_iter()
            .map(|clip| clip.audio_path.to_string_lossy().into_owned())
            .collect();

        let api_lang = Self::api_language(&request.language);
        if segments.len() > 1 {
            debug!(
                "split into {} segments (avg {avg_segment_len} chars)",
                segments.len()
            );
        }

        let mut chunks = Vec::with_capacity(segments.len());
        let mut pauses = Vec::new();
        for (i, segment) in segments.iter().enumerate() {
            let chunk = self
                .synthesize_segment(segment, &api_lang, &primary, &aux_paths, request.speed_factor)
                .await?;
            chunks.push(chunk);
            if i + 1 < segments.len() {
                pauses.push(text::pause_after_segment(segment));
            }
        }

        let audio = wav::concatenate_wav(&chunks, &pauses)?;
        let duration = wav::wav_duration(&audio)
            .ok_or_else(|| SynthError::Tts("engine returned an unreadable WAV".into()))?;
        let sample_rate = hound::WavReader::new(std::io::Cursor::new(audio.as_slice()))
            .map_err(|e| SynthError::Tts(format!("engine returned an unreadable WAV: {e}")))?
            .spec()
            .sample_rate;

        Ok(Some(SynthesisResult {
            audio,
            sample_rate,
            duration,
            engine: ENGINE_NAME,
        }))
    }

    async fn available_voices(&self) -> Result<Vec<String>> {
        let mut voices = Vec::new();
        if self.model_root.is_dir() {
            for entry in std::fs::read_dir(&self.model_root)? {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir()
                    && std::fs::read_dir(&path)
                        .map(|mut e| e.next().is_some())
                        .unwrap_or(false)
                {
                    voices.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
        voices.sort();
        Ok(voices)
    }

    async fn is_voice_available(&self, voice_id: &str) -> bool {
        let dir = self.model_dir(voice_id);
        dir.is_dir()
            && std::fs::read_dir(&dir)
                .map(|mut e| e.next().is_some())
                .unwrap_or(false)
    }

    async fn train(&self, request: &PrepareRequest, progress: Option<ProgressFn>) -> Result<bool> {
        let Some(worker_exe) = &self.worker_exe else {
            return Err(SynthError::Training(
                "no preparation worker installed".into(),
            ));
        };
        let worker = PreparationWorker::new(worker_exe);
        {
            let mut guard = self.worker.lock().await;
            *guard = Some(worker.clone());
        }
        worker.run(request, progress).await
    }

    async fn cancel_training(&self) {
        if let Some(worker) = self.worker.lock().await.as_ref() {
            worker.cancel();
        }
    }
}
