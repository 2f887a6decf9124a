//! Character gender extraction from the handbook table.
//!
//! The handbook's basic-info story text carries a `[성별] 여/남` line per
//! character. Genders feed the default-voice pools for speakers without an
//! explicit mapping. Extraction walks the whole table once and caches the
//! result as JSON next to the game data.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

use super::resolver::Gender;
use crate::error::Result;

static GENDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[성별\]\s*(여|남)").unwrap());

#[derive(Deserialize)]
struct HandbookTable {
    #[serde(default, rename = "handbookDict")]
    handbook_dict: HashMap<String, HandbookEntry>,
}

#[derive(Deserialize)]
struct HandbookEntry {
    #[serde(default, rename = "storyTextAudio")]
    story_text_audio: Vec<StoryTextAudio>,
}

#[derive(Deserialize)]
struct StoryTextAudio {
    #[serde(default, rename = "storyTitle")]
    story_title: String,
    #[serde(default)]
    stories: Vec<StoryText>,
}

#[derive(Deserialize)]
struct StoryText {
    #[serde(default, rename = "storyText")]
    story_text: String,
}

/// Gender lookup with a JSON cache file.
pub struct GenderMapper {
    handbook_path: PathBuf,
    cache_path: PathBuf,
}

impl GenderMapper {
    pub fn new(handbook_path: impl Into<PathBuf>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            handbook_path: handbook_path.into(),
            cache_path: cache_path.into(),
        }
    }

    /// Load the gender map, preferring the cache file.
    pub fn load(&self) -> Result<HashMap<String, Gender>> {
        if let Some(cached) = self.load_cache() {
            return Ok(cached);
        }
        let genders = self.extract_from_handbook()?;
        if let Err(e) = self.save_cache(&genders) {
            warn!("failed to save gender cache: {e}");
        }
        Ok(genders)
    }

    /// Recompute from the handbook, refreshing the cache.
    pub fn rebuild(&self) -> Result<HashMap<String, Gender>> {
        let genders = self.extract_from_handbook()?;
        self.save_cache(&genders)?;
        Ok(genders)
    }

    fn extract_from_handbook(&self) -> Result<HashMap<String, Gender>> {
        if !self.handbook_path.exists() {
            return Ok(HashMap::new());
        }
        let raw = std::fs::read_to_string(&self.handbook_path)?;
        let table: HandbookTable = serde_json::from_str(&raw)?;

        let mut genders = HashMap::new();
        for (char_id, entry) in table.handbook_dict {
            let Some(basic) = entry
                .story_text_audio
                .iter()
                .find(|s| s.story_title == "기본정보")
            else {
                continue;
            };
            let Some(text) = basic.stories.first().map(|s| s.story_text.as_str()) else {
                continue;
            };
            if let Some(gender) = extract_gender(text) {
                genders.insert(char_id, gender);
            }
        }
        debug!("extracted genders for {} characters", genders.len());
        Ok(genders)
    }

    fn load_cache(&self) -> Option<HashMap<String, Gender>> {
        let raw = std::fs::read_to_string(&self.cache_path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn save_cache(&self, genders: &HashMap<String, Gender>) -> Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.cache_path, serde_json::to_string_pretty(genders)?)?;
        Ok(())
    }
}

/// Pull the `[성별] 여/남` marker out of a profile text.
fn extract_gender(text: &str) -> Option<Gender> {
    let caps = GENDER_RE.captures(text)?;
    Some(if &caps[1] == "여" {
        Gender::Female
    } else {
        Gender::Male
    })
}
