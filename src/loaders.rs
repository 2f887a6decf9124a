//! Shared loader handles.
//!
//! The story index, the voice map, and the character image index are
//! expensive to build and shared across the whole process. Instead of
//! process-wide globals, one [`SharedLoaders`] value is constructed at
//! bootstrap and passed by borrow; a generational counter invalidates the
//! lazily built instances after a data refresh.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::config::AppConfig;
use crate::error::Result;
use crate::story::StoryIndex;
use crate::voice::{CharacterImageIndex, VoiceMap};

struct Slot<T> {
    generation: u64,
    value: Arc<T>,
}

struct Cached<T> {
    slot: Mutex<Option<Slot<T>>>,
    generation: AtomicU64,
}

impl<T> Cached<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn get_or_build(&self, build: impl FnOnce() -> Result<T>) -> Result<Arc<T>> {
        let current = self.generation.load(Ordering::SeqCst);
        let mut guard = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = guard.as_ref() {
            if slot.generation == current {
                return Ok(Arc::clone(&slot.value));
            }
        }
        let value = Arc::new(build()?);
        *guard = Some(Slot {
            generation: current,
            value: Arc::clone(&value),
        });
        Ok(value)
    }
}

/// Lazily built, resettable handles for the process-wide loaders.
pub struct SharedLoaders {
    data_root: PathBuf,
    voice_map_path: PathBuf,
    image_root: PathBuf,
    story_index: Cached<StoryIndex>,
    voice_map: Cached<VoiceMap>,
    image_index: Cached<CharacterImageIndex>,
}

impl SharedLoaders {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            data_root: config.gamedata_path(),
            voice_map_path: config.data_root.join("character_aliases.json"),
            image_root: config.extracted_path().join("images/characters"),
            story_index: Cached::new(),
            voice_map: Cached::new(),
            image_index: Cached::new(),
        }
    }

    /// The story index, rebuilt on first access after a reset.
    pub fn story_index(&self) -> Result<Arc<StoryIndex>> {
        let root = self.data_root.clone();
        self.story_index
            .get_or_build(move || Ok(StoryIndex::new(root)))
    }

    /// The persisted voice map.
    pub fn voice_map(&self) -> Result<Arc<VoiceMap>> {
        let path = self.voice_map_path.clone();
        self.voice_map.get_or_build(move || VoiceMap::load(path))
    }

    /// The extracted-portrait index.
    pub fn image_index(&self) -> Result<Arc<CharacterImageIndex>> {
        let root = self.image_root.clone();
        self.image_index
            .get_or_build(move || CharacterImageIndex::scan(&root))
    }

    /// Drop the story index; the next access rebuilds from disk.
    pub fn reset_story_index(&self) {
        debug!("story index reset");
        self.story_index.invalidate();
    }

    /// Drop the voice map; the next access reloads the document.
    pub fn reset_voice_map(&self) {
        debug!("voice map reset");
        self.voice_map.invalidate();
    }

    /// Drop the image index; the next access rescans the tree.
    pub fn reset_image_index(&self) {
        debug!("image index reset");
        self.image_index.invalidate();
    }

    /// Reset everything after a game-data refresh.
    pub fn reset_all(&self) {
        self.reset_story_index();
        self.reset_voice_map();
        self.reset_image_index();
    }
}
