//! Speaker identity resolution.
//!
//! Maps a speaker display name and/or script character id to the id of a
//! voice-capable character. Resolution order: user aliases, the official
//! character table, `name:`-keyed voice-map entries, and finally the model
//! directory for the id itself.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::voice_map::VoiceMap;
use crate::error::{Result, SynthError};
use crate::ident;

/// Character gender from the handbook table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    Male,
}

/// One official character record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub char_id: String,
    /// Localized display name.
    pub name: String,
    /// Localized alternate (the appellation column).
    pub appellation: Option<String>,
    pub gender: Option<Gender>,
}

#[derive(Debug, Deserialize)]
struct CharacterTableRaw {
    #[serde(default)]
    name: String,
    #[serde(default)]
    appellation: Option<String>,
}

/// Summary of one extracted voice folder.
#[derive(Debug, Clone)]
pub struct VoiceInfo {
    pub char_id: String,
    pub voice_folder: PathBuf,
    pub file_count: usize,
}

/// Speaker identity resolver over the official tables plus user aliases.
pub struct IdentityResolver {
    voice_map: VoiceMap,
    characters: HashMap<String, CharacterRecord>,
    /// Playable display name (and appellation) → canonical id.
    name_to_id: HashMap<String, String>,
    /// Per-character model directories, checked for step 4.
    model_root: PathBuf,
}

impl IdentityResolver {
    /// Build a resolver from the character table, the persisted voice map,
    /// and the model root directory.
    pub fn load(
        character_table_path: &Path,
        voice_map_path: &Path,
        model_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let mut characters = HashMap::new();
        let mut name_to_id = HashMap::new();

        if character_table_path.exists() {
            let raw = std::fs::read_to_string(character_table_path)?;
            let table: HashMap<String, CharacterTableRaw> =
                serde_json::from_str(&raw).map_err(|e| {
                    SynthError::InvalidInput(format!(
                        "bad character table {}: {e}",
                        character_table_path.display()
                    ))
                })?;
            for (char_id, entry) in table {
                // Generic NPC slots are reused across characters and must not
                // feed the automatic name lookup.
                if ident::is_playable(&char_id) && !ident::is_generic_npc(&char_id) {
                    if !entry.name.is_empty() {
                        name_to_id.insert(entry.name.clone(), char_id.clone());
                    }
                    if let Some(appellation) = entry.appellation.as_ref().filter(|a| !a.is_empty())
                    {
                        name_to_id
                            .entry(appellation.clone())
                            .or_insert_with(|| char_id.clone());
                    }
                }
                characters.insert(
                    char_id.clone(),
                    CharacterRecord {
                        char_id,
                        name: entry.name,
                        appellation: entry.appellation,
                        gender: None,
                    },
                );
            }
        }

        let voice_map = VoiceMap::load(voice_map_path)?;
        debug!(
            "identity resolver ready: {} characters, {} aliases",
            characters.len(),
            voice_map.len()
        );
        Ok(Self {
            voice_map,
            characters,
            name_to_id,
            model_root: model_root.into(),
        })
    }

    /// Attach genders from the handbook table to the character records.
    pub fn set_genders(&mut self, genders: &HashMap<String, Gender>) {
        for (char_id, gender) in genders {
            if let Some(record) = self.characters.get_mut(char_id) {
                record.gender = Some(*gender);
            }
        }
    }

    /// Official record for a character id, trying the normalized form too.
    pub fn character(&self, char_id: &str) -> Option<&CharacterRecord> {
        self.characters
            .get(char_id)
            .or_else(|| self.characters.get(&ident::normalize(char_id)))
    }

    /// Resolve a speaker to a voice-capable character id.
    pub fn resolve_voice_id(
        &self,
        speaker_name: Option<&str>,
        char_id: Option<&str>,
    ) -> Option<String> {
        if let Some(name) = speaker_name.filter(|n| !n.is_empty()) {
            // 1. User alias, exact match.
            if let Some(voice_id) = self.voice_map.get(name) {
                debug!("alias mapping: {name} -> {voice_id}");
                return Some(voice_id.to_owned());
            }
            // 2. Official table: canonical name or localized alternate.
            if let Some(id) = self.name_to_id.get(name) {
                debug!("table name match: {name} -> {id}");
                return Some(id.clone());
            }
            // 3. Display-name key in the voice map's flat form.
            if let Some(voice_id) = self.voice_map.get(&format!("name:{name}")) {
                return Some(voice_id.to_owned());
            }
        }

        // 4. The id itself, when a prepared model directory exists for it.
        if let Some(id) = char_id.filter(|id| !id.is_empty()) {
            let normalized = ident::normalize(id);
            if self.has_model_dir(&normalized) {
                return Some(normalized);
            }
        }
        None
    }

    /// Whether a prepared model directory exists for a character.
    pub fn has_model_dir(&self, char_id: &str) -> bool {
        let dir = self.model_root.join(char_id);
        dir.is_dir()
            && std::fs::read_dir(&dir)
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false)
    }

    /// Add a user alias and persist it.
    pub fn add_alias(&mut self, name: &str, voice_id: &str) -> Result<()> {
        self.voice_map.set(name, voice_id)
    }

    /// Remove a user alias and persist. Errors when the alias is unknown.
    pub fn remove_alias(&mut self, name: &str) -> Result<()> {
        if !self.voice_map.remove(name)? {
            return Err(SynthError::InvalidInput(format!("unknown alias {name:?}")));
        }
        Ok(())
    }

    /// Direct access to the persisted voice map.
    pub fn voice_map(&self) -> &VoiceMap {
        &self.voice_map
    }

    pub fn voice_map_mut(&mut self) -> &mut VoiceMap {
        &mut self.voice_map
    }
}

/// Scan an extracted voice tree for per-character clip folders.
pub fn scan_voice_folders(voice_root: &Path) -> Result<HashMap<String, VoiceInfo>> {
    let mut result = HashMap::new();
    if !voice_root.exists() {
        return Ok(result);
    }
    for entry in std::fs::read_dir(voice_root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let char_id = entry.file_name().to_string_lossy().into_owned();
        let file_count = std::fs::read_dir(&path)?
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| matches!(ext, "mp3" | "wav" | "ogg"))
            })
            .count();
        if file_count == 0 {
            continue;
        }
        result.insert(
            char_id.clone(),
            VoiceInfo {
                char_id,
                voice_folder: path,
                file_count,
            },
        );
    }
    Ok(result)
}

/// Whether a character has any extracted raw audio.
pub fn has_voice_folder(voice_root: &Path, char_id: &str) -> bool {
    let dir = voice_root.join(char_id);
    dir.is_dir()
        && std::fs::read_dir(&dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn build_resolver(dir: &Path) -> IdentityResolver {
        let table = serde_json::json!({
            "char_002_amiya": {"name": "아미야", "appellation": "Amiya"},
            "char_102_texas": {"name": "텍사스", "appellation": "Texas"},
            "char_npc_001": {"name": "의문의 인물"},
            "npc_003_kalts": {"name": "켈시"}
        });
        let table_path = dir.join("character_table.json");
        std::fs::write(&table_path, serde_json::to_string(&table).unwrap()).unwrap();

        let aliases_path = dir.join("character_aliases.json");
        std::fs::write(
            &aliases_path,
            r#"{"aliases": {"카지마치 주민": "char_4203_kichi", "name:오니": "char_2014_nian"}}"#,
        )
        .unwrap();

        let model_root = dir.join("models");
        std::fs::create_dir_all(model_root.join("char_102_texas")).unwrap();
        std::fs::write(model_root.join("char_102_texas/ref.wav"), b"x").unwrap();

        IdentityResolver::load(&table_path, &aliases_path, model_root).unwrap()
    }

    #[test]
    fn alias_wins_over_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = build_resolver(dir.path());
        resolver.add_alias("아미야", "char_1001_amiya2").unwrap();
        assert_eq!(
            resolver.resolve_voice_id(Some("아미야"), None).as_deref(),
            Some("char_1001_amiya2")
        );
    }

    #[test]
    fn table_matches_name_and_appellation() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = build_resolver(dir.path());
        assert_eq!(
            resolver.resolve_voice_id(Some("아미야"), None).as_deref(),
            Some("char_002_amiya")
        );
        assert_eq!(
            resolver.resolve_voice_id(Some("Texas"), None).as_deref(),
            Some("char_102_texas")
        );
    }

    #[test]
    fn npc_table_rows_do_not_feed_name_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = build_resolver(dir.path());
        assert!(resolver.resolve_voice_id(Some("의문의 인물"), None).is_none());
        assert!(resolver.resolve_voice_id(Some("켈시"), None).is_none());
    }

    #[test]
    fn name_prefixed_map_entries_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = build_resolver(dir.path());
        assert_eq!(
            resolver.resolve_voice_id(Some("오니"), None).as_deref(),
            Some("char_2014_nian")
        );
    }

    #[test]
    fn falls_back_to_model_dir_for_the_id() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = build_resolver(dir.path());
        assert_eq!(
            resolver
                .resolve_voice_id(None, Some("char_102_texas_1#2"))
                .as_deref(),
            Some("char_102_texas")
        );
        assert!(resolver.resolve_voice_id(None, Some("char_999_none")).is_none());
    }

    #[test]
    fn remove_alias_requires_existing() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = build_resolver(dir.path());
        resolver.add_alias("새 이름", "char_002_amiya").unwrap();
        resolver.remove_alias("새 이름").unwrap();
        assert!(matches!(
            resolver.remove_alias("새 이름"),
            Err(SynthError::InvalidInput(_))
        ));
    }

    #[test]
    fn scans_voice_folders() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("voice_kr");
        std::fs::create_dir_all(root.join("char_002_amiya")).unwrap();
        std::fs::write(root.join("char_002_amiya/CN_001.mp3"), b"x").unwrap();
        std::fs::write(root.join("char_002_amiya/CN_002.wav"), b"x").unwrap();
        std::fs::create_dir_all(root.join("char_003_empty")).unwrap();

        let scanned = scan_voice_folders(&root).unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned["char_002_amiya"].file_count, 2);
        assert!(has_voice_folder(&root, "char_002_amiya"));
        assert!(!has_voice_folder(&root, "char_004_missing"));
    }
}
