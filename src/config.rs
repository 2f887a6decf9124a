//! Configuration types for the dubbing pipeline.
//!
//! The application config is a small JSON document persisted by the desktop
//! shell. Unknown keys are round-tripped so that newer shells can add fields
//! without this crate dropping them on save.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SynthError};

/// Where game data updates are pulled from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameDataSource {
    /// Full game-data repository checkout.
    #[default]
    Github,
    /// Per-table downloads from the arkprts mirror.
    Arkprts,
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root of the data directory (game data, extracted assets, models, cache).
    pub data_root: PathBuf,
    /// UI display language (locale code, e.g. `ko_KR`).
    pub display_language: String,
    /// Voice/script language short code (e.g. `ko`, `ja`).
    pub voice_language: String,
    /// Game-data source.
    pub gamedata_source: GameDataSource,
    /// Game-data repository (owner/name) when the source is GitHub.
    pub gamedata_repository: String,
    /// Game-data repository branch.
    pub gamedata_branch: String,
    /// Default TTS engine tag.
    pub default_engine: String,
    /// Per-language nickname substituted for the player name placeholder.
    pub nicknames: std::collections::BTreeMap<String, String>,
    /// GPU compatibility switches for the external runtimes.
    pub gpu: GpuCompatConfig,
    /// Repository checked for application updates (owner/name).
    pub update_repository: String,
    /// TTS engine settings.
    pub tts: TtsConfig,
    /// Keys written by other collaborators; preserved verbatim across saves.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_root = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("arksynth");
        Self {
            data_root,
            display_language: "ko_KR".to_owned(),
            voice_language: "ko".to_owned(),
            gamedata_source: GameDataSource::Github,
            gamedata_repository: "Kengxxiao/ArknightsGameData_YoStar".to_owned(),
            gamedata_branch: "main".to_owned(),
            default_engine: "gpt_sovits".to_owned(),
            nicknames: std::collections::BTreeMap::new(),
            gpu: GpuCompatConfig::default(),
            update_repository: String::new(),
            tts: TtsConfig::default(),
            extra: serde_json::Map::new(),
        }
    }
}

impl AppConfig {
    /// Load the config from a JSON file (or a local TOML override for
    /// development). A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        if path.extension().is_some_and(|ext| ext == "toml") {
            return toml::from_str(&raw).map_err(|e| {
                SynthError::Config(format!("failed to parse {}: {e}", path.display()))
            });
        }
        serde_json::from_str(&raw)
            .map_err(|e| SynthError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Persist the config as pretty-printed JSON, unknown keys included.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Game-data tree for a language locale (`<root>/gamedata/<locale>/gamedata`).
    pub fn gamedata_path(&self) -> PathBuf {
        self.data_root.join("gamedata")
    }

    /// Root of the extracted voice/image assets.
    pub fn extracted_path(&self) -> PathBuf {
        self.data_root.join("extracted")
    }

    /// Per-character model directories (`<root>/models/<engine>/<char_id>`).
    pub fn models_path(&self) -> PathBuf {
        self.data_root.join("models")
    }

    /// Render cache root.
    pub fn render_cache_path(&self) -> PathBuf {
        self.data_root.join("rendered")
    }

    /// Model directory for one character under the default engine.
    pub fn model_dir(&self, char_id: &str) -> PathBuf {
        self.models_path().join(&self.default_engine).join(char_id)
    }

    /// Extracted raw-audio directory for one character.
    pub fn voice_dir(&self, char_id: &str) -> PathBuf {
        self.extracted_path()
            .join(voice_folder_for(&self.voice_language))
            .join(char_id)
    }
}

/// GPU compatibility switches forwarded to the external runtimes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuCompatConfig {
    /// Force half-precision off (older cards mis-render fp16).
    pub disable_fp16: bool,
    /// Run the runtimes on CPU even when CUDA is present.
    pub force_cpu: bool,
    /// Skip the CUDA architecture check on unrecognized cards.
    pub skip_arch_check: bool,
}

/// TTS engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Host of the external synthesis runtime.
    pub api_host: String,
    /// Port of the external synthesis runtime.
    pub api_port: u16,
    /// Installation directory of the external runtime, if installed locally.
    pub engine_path: Option<PathBuf>,
    /// Interpreter used to launch the runtime (discovered by the installer).
    pub python_path: Option<PathBuf>,
    /// Sampling diversity.
    pub top_k: u32,
    /// Nucleus sampling.
    pub top_p: f32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Playback speed factor.
    pub speed_factor: f32,
    /// Minimum valid reference clip duration in seconds.
    pub min_ref_audio_length: f64,
    /// Maximum valid reference clip duration in seconds.
    pub max_ref_audio_length: f64,
    /// Soft segment length limit for text splitting, in characters.
    pub max_segment_length: usize,
    /// Per-segment HTTP read timeout in seconds.
    pub request_timeout_secs: u64,
    /// Wall-clock budget for the runtime readiness probe in seconds.
    pub ready_timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_host: "127.0.0.1".to_owned(),
            api_port: 9880,
            engine_path: None,
            python_path: None,
            top_k: 5,
            top_p: 1.0,
            temperature: 1.0,
            speed_factor: 1.0,
            min_ref_audio_length: 3.0,
            max_ref_audio_length: 10.0,
            max_segment_length: 35,
            request_timeout_secs: 90,
            ready_timeout_secs: 60,
        }
    }
}

impl TtsConfig {
    /// Base URL of the synthesis runtime.
    pub fn api_url(&self) -> String {
        format!("http://{}:{}", self.api_host, self.api_port)
    }
}

/// Supported game-data locales, in scan order.
pub const GAME_LOCALES: &[&str] = &["ko_KR", "en_US", "ja_JP", "zh_CN"];

/// Map a locale to its short voice-language code (`ko_KR` → `ko`).
pub fn short_lang(locale: &str) -> &str {
    match locale {
        "ko_KR" => "ko",
        "en_US" => "en",
        "ja_JP" => "ja",
        "zh_CN" => "zh",
        other => other,
    }
}

/// Extracted-voice folder name for a short language code.
///
/// The game ships Japanese voices in the unsuffixed `voice` folder.
pub fn voice_folder_for(short: &str) -> &'static str {
    match short {
        "ko" => "voice_kr",
        "en" => "voice_en",
        "zh" => "voice_cn",
        _ => "voice",
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = AppConfig::default();
        assert_eq!(config.voice_language, "ko");
        assert_eq!(config.tts.api_port, 9880);
        assert_eq!(config.tts.max_segment_length, 35);
    }

    #[test]
    fn unknown_keys_survive_a_round_trip() {
        let raw = r#"{
            "voice_language": "ja",
            "shell_window_state": {"x": 10, "y": 20}
        }"#;
        let config: AppConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.voice_language, "ja");

        let out = serde_json::to_value(&config).unwrap();
        assert_eq!(out["shell_window_state"]["x"], 10);
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let config = AppConfig::load(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(config.display_language, "ko_KR");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = std::env::temp_dir().join("arksynth-test-config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");

        let mut config = AppConfig::default();
        config.voice_language = "en".to_owned();
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.voice_language, "en");
    }

    #[test]
    fn toml_override_is_accepted() {
        let dir = std::env::temp_dir().join("arksynth-test-config-toml");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.toml");
        std::fs::write(&path, "voice_language = \"ja\"\n\n[tts]\napi_port = 9990\n").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.voice_language, "ja");
        assert_eq!(config.tts.api_port, 9990);
    }

    #[test]
    fn language_code_mapping() {
        assert_eq!(short_lang("ko_KR"), "ko");
        assert_eq!(short_lang("zh_CN"), "zh");
        assert_eq!(voice_folder_for("ja"), "voice");
        assert_eq!(voice_folder_for("ko"), "voice_kr");
    }
}
