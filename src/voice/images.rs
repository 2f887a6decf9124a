//! Index over the extracted character portraits.
//!
//! Extraction (see [`crate::bundle::image`]) writes portraits into one folder
//! per character under the image root. The index maps those folders back to
//! character ids so the shell can show a portrait next to each speaker.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::ident;

/// Portrait lookup over the extracted image tree.
pub struct CharacterImageIndex {
    /// Folder name (`amiya`, `npc_023`) → sorted portrait files.
    folders: BTreeMap<String, Vec<PathBuf>>,
}

impl CharacterImageIndex {
    /// Scan the extracted image root.
    pub fn scan(image_root: &Path) -> Result<Self> {
        let mut folders = BTreeMap::new();
        if image_root.exists() {
            for entry in std::fs::read_dir(image_root)? {
                let entry = entry?;
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let mut files: Vec<PathBuf> = std::fs::read_dir(&path)?
                    .filter_map(|e| e.ok().map(|e| e.path()))
                    .filter(|p| {
                        p.extension()
                            .and_then(|ext| ext.to_str())
                            .is_some_and(|ext| matches!(ext, "png" | "jpg" | "jpeg" | "webp"))
                    })
                    .collect();
                if files.is_empty() {
                    continue;
                }
                files.sort();
                folders.insert(entry.file_name().to_string_lossy().into_owned(), files);
            }
        }
        Ok(Self { folders })
    }

    /// Folder key for a character id: the name component of a playable id
    /// (`char_002_amiya` → `amiya`), the `npc_<num>` part of a generic NPC.
    fn folder_key(char_id: &str) -> String {
        let normalized = ident::normalize(char_id);
        crate::bundle::image::image_folder_name(&normalized)
    }

    /// The default portrait for a character, if one was extracted.
    pub fn portrait_for(&self, char_id: &str) -> Option<&Path> {
        let key = Self::folder_key(char_id);
        self.folders
            .get(&key)
            .and_then(|files| files.first())
            .map(PathBuf::as_path)
    }

    /// Every portrait of a character.
    pub fn portraits_for(&self, char_id: &str) -> &[PathBuf] {
        let key = Self::folder_key(char_id);
        self.folders.get(&key).map_or(&[], Vec::as_slice)
    }

    /// Characters with at least one portrait.
    pub fn folder_count(&self) -> usize {
        self.folders.len()
    }
}
