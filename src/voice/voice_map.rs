//! Durable speaker → voice mapping document.
//!
//! A single JSON file maps speaker keys (sprite ids, or `name:<display-name>`
//! when no sprite id applies) to voice character ids. Two entry forms coexist
//! for backward compatibility: a flat string, and a detailed object carrying
//! the mapping's source. Metadata keys (`_version`, `_comment`, `_conflicts`)
//! and anything newer shells add are preserved verbatim across writes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;

/// One mapping entry: flat (legacy) or detailed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MappingEntry {
    /// Legacy flat form: the voice character id alone.
    Flat(String),
    /// Detailed form with the mapping's provenance.
    Detailed {
        voice: String,
        #[serde(default)]
        source: String,
    },
}

impl MappingEntry {
    /// The voice character id regardless of form.
    pub fn voice_id(&self) -> &str {
        match self {
            Self::Flat(id) => id,
            Self::Detailed { voice, .. } => voice,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct VoiceMapDoc {
    #[serde(default)]
    aliases: BTreeMap<String, MappingEntry>,
    /// `_version`, `_comment`, `_conflicts`, and future keys.
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

/// The voice map with its backing file.
///
/// Mutations update the in-memory map and persist synchronously. Concurrent
/// writers are serialized by the caller; this type does no locking of its own.
#[derive(Debug, Clone)]
pub struct VoiceMap {
    path: PathBuf,
    doc: VoiceMapDoc,
}

impl VoiceMap {
    /// Load the document, or start empty when the file does not exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            VoiceMapDoc::default()
        };
        debug!("voice map loaded: {} entries", doc.aliases.len());
        Ok(Self { path, doc })
    }

    /// Mapping key for a speaker: the sprite id when present, otherwise
    /// `name:<display-name>`.
    pub fn key_for(char_id: Option<&str>, speaker_name: &str) -> Option<String> {
        match char_id {
            Some(id) if !id.is_empty() => Some(id.to_owned()),
            _ if !speaker_name.is_empty() => Some(format!("name:{speaker_name}")),
            _ => None,
        }
    }

    /// Look up the voice id for an exact key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.doc.aliases.get(key).map(MappingEntry::voice_id)
    }

    /// All entries, for listings.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &MappingEntry)> {
        self.doc.aliases.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.doc.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.aliases.is_empty()
    }

    /// Insert a flat mapping and persist.
    pub fn set(&mut self, key: &str, voice_id: &str) -> Result<()> {
        self.doc
            .aliases
            .insert(key.to_owned(), MappingEntry::Flat(voice_id.to_owned()));
        self.save()
    }

    /// Insert a detailed mapping and persist.
    pub fn set_detailed(&mut self, key: &str, voice_id: &str, source: &str) -> Result<()> {
        self.doc.aliases.insert(
            key.to_owned(),
            MappingEntry::Detailed {
                voice: voice_id.to_owned(),
                source: source.to_owned(),
            },
        );
        self.save()
    }

    /// Remove a mapping and persist. Returns whether the key existed.
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        let existed = self.doc.aliases.remove(key).is_some();
        if existed {
            self.save()?;
        }
        Ok(existed)
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&self.doc)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn seed_file(dir: &Path) -> PathBuf {
        let path = dir.join("character_aliases.json");
        std::fs::write(
            &path,
            r#"{
  "_version": 2,
  "_comment": "hand-checked mappings",
  "aliases": {
    "카지마치 주민": "char_4203_kichi",
    "name:모모카": {"voice": "char_102_texas", "source": "manual"}
  },
  "_conflicts": {"모모카": ["char_102_texas", "char_103_angel"]}
}"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn reads_both_entry_forms() {
        let dir = tempfile::tempdir().unwrap();
        let map = VoiceMap::load(seed_file(dir.path())).unwrap();
        assert_eq!(map.get("카지마치 주민"), Some("char_4203_kichi"));
        assert_eq!(map.get("name:모모카"), Some("char_102_texas"));
        assert_eq!(map.get("없는 키"), None);
    }

    #[test]
    fn add_then_remove_restores_prior_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed_file(dir.path());
        let before: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

        let mut map = VoiceMap::load(&path).unwrap();
        map.set("name:새 화자", "char_002_amiya").unwrap();
        assert!(map.remove("name:새 화자").unwrap());

        let after: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn unknown_keys_survive_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed_file(dir.path());

        let mut map = VoiceMap::load(&path).unwrap();
        map.set("name:바운티 헌터", "char_340_shwaz").unwrap();

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["_version"], 2);
        assert_eq!(saved["_comment"], "hand-checked mappings");
        assert!(saved["_conflicts"]["모모카"].is_array());
        assert_eq!(saved["aliases"]["name:바운티 헌터"], "char_340_shwaz");
    }

    #[test]
    fn key_for_prefers_sprite_ids() {
        assert_eq!(
            VoiceMap::key_for(Some("avg_npc_009"), "바운티 헌터").as_deref(),
            Some("avg_npc_009")
        );
        assert_eq!(
            VoiceMap::key_for(None, "바운티 헌터").as_deref(),
            Some("name:바운티 헌터")
        );
        assert_eq!(VoiceMap::key_for(None, ""), None);
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let map = VoiceMap::load(dir.path().join("absent.json")).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn detailed_entries_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        let mut map = VoiceMap::load(&path).unwrap();
        map.set_detailed("name:오니", "char_2014_nian", "group-stats")
            .unwrap();

        let reloaded = VoiceMap::load(&path).unwrap();
        assert_eq!(reloaded.get("name:오니"), Some("char_2014_nian"));
        let (_, entry) = reloaded.entries().next().unwrap();
        assert_eq!(
            entry,
            &MappingEntry::Detailed {
                voice: "char_2014_nian".into(),
                source: "group-stats".into()
            }
        );
    }
}
