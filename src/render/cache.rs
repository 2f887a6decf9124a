//! Durable per-episode render cache.
//!
//! One directory per episode under the cache root, holding numerically
//! indexed clips and a `meta.json` manifest:
//!
//! ```text
//! <root>/<safe_episode_id>/
//!   meta.json
//!   0000.wav
//!   0001.wav
//! ```
//!
//! Manifest invariants, enforced on every write: `rendered_count` equals the
//! entry count, no two entries share an index, and every entry's file exists.
//! The manifest is persisted write-then-rename so an aborted write never
//! leaves a torn document behind.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use super::progress::now_timestamp;
use crate::error::{Result, SynthError};

/// One rendered line in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAudio {
    /// Dialogue index within the episode.
    pub index: usize,
    /// Original speaker id from the script, if any.
    pub char_id: Option<String>,
    pub text: String,
    /// Clip duration in seconds.
    pub duration: f64,
    /// Path relative to the episode directory.
    pub file_path: String,
    pub synthesized_at: String,
    /// Voice actually used, only when it differs from `char_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_char_id: Option<String>,
}

/// Per-episode manifest. Readers tolerate unknown fields from newer writers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeManifest {
    pub episode_id: String,
    pub total_dialogues: usize,
    pub rendered_count: usize,
    pub rendered_at: String,
    pub language: String,
    pub audios: Vec<CachedAudio>,
}

impl EpisodeManifest {
    /// Indices already rendered.
    pub fn rendered_indices(&self) -> BTreeSet<usize> {
        self.audios.iter().map(|a| a.index).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.rendered_count >= self.total_dialogues
    }
}

/// On-disk render cache.
#[derive(Debug, Clone)]
pub struct RenderCache {
    root: PathBuf,
}

impl RenderCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Episode directory; path separators in the id become underscores.
    pub fn episode_dir(&self, episode_id: &str) -> PathBuf {
        let safe: String = episode_id.replace(['/', '\\'], "_");
        self.root.join(safe)
    }

    pub fn manifest_path(&self, episode_id: &str) -> PathBuf {
        self.episode_dir(episode_id).join("meta.json")
    }

    pub fn audio_path(&self, episode_id: &str, index: usize) -> PathBuf {
        self.episode_dir(episode_id).join(format!("{index:04}.wav"))
    }

    pub fn has_cache(&self, episode_id: &str) -> bool {
        self.manifest_path(episode_id).exists()
    }

    /// Load the manifest, `None` when the episode has no cache yet.
    pub fn manifest(&self, episode_id: &str) -> Option<EpisodeManifest> {
        let path = self.manifest_path(episode_id);
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                error!("unreadable manifest for {episode_id}: {e}");
                None
            }
        }
    }

    pub fn is_complete(&self, episode_id: &str) -> bool {
        self.manifest(episode_id).is_some_and(|m| m.is_complete())
    }

    /// `(rendered, total)` for an episode; `(0, 0)` without a cache.
    pub fn progress(&self, episode_id: &str) -> (usize, usize) {
        self.manifest(episode_id)
            .map_or((0, 0), |m| (m.rendered_count, m.total_dialogues))
    }

    /// Create and persist an empty manifest.
    pub fn create_manifest(
        &self,
        episode_id: &str,
        total_dialogues: usize,
        language: &str,
    ) -> Result<EpisodeManifest> {
        let manifest = EpisodeManifest {
            episode_id: episode_id.to_owned(),
            total_dialogues,
            rendered_count: 0,
            rendered_at: now_timestamp(),
            language: language.to_owned(),
            audios: Vec::new(),
        };
        self.save_manifest(&manifest)?;
        Ok(manifest)
    }

    /// Persist a manifest atomically (write to a sibling temp file, rename).
    pub fn save_manifest(&self, manifest: &EpisodeManifest) -> Result<()> {
        let dir = self.episode_dir(&manifest.episode_id);
        std::fs::create_dir_all(&dir)?;
        let path = self.manifest_path(&manifest.episode_id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(manifest)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Record one rendered clip. The audio file must already exist at
    /// [`RenderCache::audio_path`]; an entry with the same index is replaced.
    #[allow(clippy::too_many_arguments)]
    pub fn add_entry(
        &self,
        episode_id: &str,
        index: usize,
        char_id: Option<&str>,
        text: &str,
        duration: f64,
        voice_char_id: Option<&str>,
    ) -> Result<CachedAudio> {
        let mut manifest = self.manifest(episode_id).ok_or_else(|| {
            SynthError::Cache(format!("no manifest for episode {episode_id}"))
        })?;

        let audio_path = self.audio_path(episode_id, index);
        if !audio_path.exists() {
            return Err(SynthError::Cache(format!(
                "clip {index:04} for {episode_id} was not written"
            )));
        }

        let entry = CachedAudio {
            index,
            char_id: char_id.map(str::to_owned),
            text: text.to_owned(),
            duration,
            file_path: format!("{index:04}.wav"),
            synthesized_at: now_timestamp(),
            voice_char_id: voice_char_id.map(str::to_owned),
        };

        manifest.audios.retain(|a| a.index != index);
        manifest.audios.push(entry.clone());
        manifest.audios.sort_by_key(|a| a.index);
        manifest.rendered_count = manifest.audios.len();
        manifest.rendered_at = now_timestamp();
        self.save_manifest(&manifest)?;
        Ok(entry)
    }

    /// Delete one rendered line: the clip file and its manifest entry.
    pub fn delete_line(&self, episode_id: &str, index: usize) -> Result<bool> {
        let Some(mut manifest) = self.manifest(episode_id) else {
            return Ok(false);
        };

        let audio_path = self.audio_path(episode_id, index);
        if audio_path.exists() {
            std::fs::remove_file(&audio_path)?;
        }

        let before = manifest.audios.len();
        manifest.audios.retain(|a| a.index != index);
        if manifest.audios.len() == before {
            return Ok(false);
        }
        manifest.rendered_count = manifest.audios.len();
        manifest.rendered_at = now_timestamp();
        self.save_manifest(&manifest)?;
        info!(
            "deleted clip {episode_id}/{index:04} ({} remain)",
            manifest.rendered_count
        );
        Ok(true)
    }

    /// Delete an episode's whole cache directory.
    pub fn delete_episode(&self, episode_id: &str) -> Result<bool> {
        let dir = self.episode_dir(episode_id);
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir)?;
        info!("deleted render cache for {episode_id}");
        Ok(true)
    }

    /// Episode directories with a fully rendered manifest.
    pub fn list_complete(&self) -> Vec<String> {
        self.list_where(|m| m.is_complete())
    }

    /// Episode directories rendered partway (resumable).
    pub fn list_partial(&self) -> Vec<String> {
        self.list_where(|m| m.rendered_count > 0 && !m.is_complete())
    }

    fn list_where(&self, pred: impl Fn(&EpisodeManifest) -> bool) -> Vec<String> {
        let mut out = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return out;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(manifest) = self.manifest(&name) {
                if pred(&manifest) {
                    out.push(name);
                }
            }
        }
        out.sort();
        out
    }

    /// Total bytes under an episode's cache directory.
    pub fn cache_size(&self, episode_id: &str) -> u64 {
        fn dir_size(dir: &Path) -> u64 {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return 0;
            };
            entries
                .filter_map(|e| e.ok())
                .map(|e| {
                    let path = e.path();
                    if path.is_dir() {
                        dir_size(&path)
                    } else {
                        e.metadata().map(|m| m.len()).unwrap_or(0)
                    }
                })
                .sum()
        }
        dir_size(&self.episode_dir(episode_id))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn cache() -> (tempfile::TempDir, RenderCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = RenderCache::new(dir.path().join("rendered")).unwrap();
        (dir, cache)
    }

    fn write_clip(cache: &RenderCache, episode_id: &str, index: usize) {
        let path = cache.audio_path(episode_id, index);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"RIFFfake").unwrap();
    }

    #[test]
    fn episode_ids_with_separators_are_safe() {
        let (_dir, cache) = cache();
        let dir = cache.episode_dir("obt/main\\level_main_01-01_beg");
        assert!(dir.ends_with("obt_main_level_main_01-01_beg"));
    }

    #[test]
    fn manifest_round_trips() {
        let (_dir, cache) = cache();
        cache.create_manifest("ep", 3, "ko").unwrap();
        write_clip(&cache, "ep", 0);
        cache
            .add_entry("ep", 0, Some("char_002_amiya"), "박사님.", 1.5, None)
            .unwrap();

        let manifest = cache.manifest("ep").unwrap();
        assert_eq!(manifest.rendered_count, 1);
        assert_eq!(manifest.rendered_count, manifest.audios.len());
        assert_eq!(manifest.audios[0].file_path, "0000.wav");
        assert!(cache.audio_path("ep", 0).exists());
    }

    #[test]
    fn rendered_count_always_matches_entries() {
        let (_dir, cache) = cache();
        cache.create_manifest("ep", 5, "ko").unwrap();
        for index in [0usize, 1, 3] {
            write_clip(&cache, "ep", index);
            cache.add_entry("ep", index, None, "text", 1.0, None).unwrap();
        }
        let manifest = cache.manifest("ep").unwrap();
        assert_eq!(manifest.rendered_count, manifest.audios.len());
        assert_eq!(
            manifest.rendered_indices(),
            BTreeSet::from([0usize, 1, 3])
        );
        assert!(!manifest.is_complete());
    }

    #[test]
    fn duplicate_index_replaces_entry() {
        let (_dir, cache) = cache();
        cache.create_manifest("ep", 2, "ko").unwrap();
        write_clip(&cache, "ep", 0);
        cache.add_entry("ep", 0, None, "first", 1.0, None).unwrap();
        cache.add_entry("ep", 0, None, "second", 2.0, None).unwrap();

        let manifest = cache.manifest("ep").unwrap();
        assert_eq!(manifest.rendered_count, 1);
        assert_eq!(manifest.audios[0].text, "second");
    }

    #[test]
    fn entry_requires_the_clip_file() {
        let (_dir, cache) = cache();
        cache.create_manifest("ep", 2, "ko").unwrap();
        let err = cache.add_entry("ep", 1, None, "text", 1.0, None).unwrap_err();
        assert!(matches!(err, SynthError::Cache(_)));
    }

    #[test]
    fn delete_line_removes_file_and_entry() {
        let (_dir, cache) = cache();
        cache.create_manifest("ep", 2, "ko").unwrap();
        write_clip(&cache, "ep", 0);
        cache.add_entry("ep", 0, None, "text", 1.0, None).unwrap();

        assert!(cache.delete_line("ep", 0).unwrap());
        assert!(!cache.audio_path("ep", 0).exists());
        assert_eq!(cache.manifest("ep").unwrap().rendered_count, 0);
        assert!(!cache.delete_line("ep", 0).unwrap());
    }

    #[test]
    fn delete_episode_removes_directory() {
        let (_dir, cache) = cache();
        cache.create_manifest("ep", 1, "ko").unwrap();
        assert!(cache.delete_episode("ep").unwrap());
        assert!(!cache.has_cache("ep"));
        assert!(!cache.delete_episode("ep").unwrap());
    }

    #[test]
    fn listings_split_complete_and_partial() {
        let (_dir, cache) = cache();

        cache.create_manifest("done", 1, "ko").unwrap();
        write_clip(&cache, "done", 0);
        cache.add_entry("done", 0, None, "text", 1.0, None).unwrap();

        cache.create_manifest("half", 2, "ko").unwrap();
        write_clip(&cache, "half", 0);
        cache.add_entry("half", 0, None, "text", 1.0, None).unwrap();

        cache.create_manifest("untouched", 2, "ko").unwrap();

        assert_eq!(cache.list_complete(), ["done"]);
        assert_eq!(cache.list_partial(), ["half"]);
    }

    #[test]
    fn voice_char_id_serialized_only_when_distinct() {
        let (_dir, cache) = cache();
        cache.create_manifest("ep", 2, "ko").unwrap();
        write_clip(&cache, "ep", 0);
        cache
            .add_entry("ep", 0, Some("avg_npc_009"), "text", 1.0, Some("char_340_shwaz"))
            .unwrap();

        let raw = std::fs::read_to_string(cache.manifest_path("ep")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["audios"][0]["voice_char_id"], "char_340_shwaz");

        write_clip(&cache, "ep", 1);
        cache.add_entry("ep", 1, Some("char_002_amiya"), "t", 1.0, None).unwrap();
        let raw = std::fs::read_to_string(cache.manifest_path("ep")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value["audios"][1].get("voice_char_id").is_none());
    }

    #[test]
    fn readers_tolerate_unknown_manifest_fields() {
        let (_dir, cache) = cache();
        cache.create_manifest("ep", 1, "ko").unwrap();
        let path = cache.manifest_path("ep");
        let mut value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        value["future_field"] = serde_json::json!({"nested": true});
        std::fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

        assert!(cache.manifest("ep").is_some());
    }

    #[test]
    fn no_stray_temp_file_after_save() {
        let (_dir, cache) = cache();
        let manifest = cache.create_manifest("ep", 1, "ko").unwrap();
        cache.save_manifest(&manifest).unwrap();
        let entries: Vec<_> = std::fs::read_dir(cache.episode_dir("ep"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, ["meta.json"]);
    }
}
