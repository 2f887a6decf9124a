//! Story data model: episodes, dialogues, commands, and story groups.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What kind of line a dialogue entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogueKind {
    /// A spoken line with a speaker.
    Dialogue,
    /// Plain narration. Speaker id and name are always empty.
    Narration,
    /// An on-screen subtitle. Speaker id and name are always empty.
    Subtitle,
}

/// One spoken (or narrated) line of an episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dialogue {
    /// Stable id: `<episode>_<0000>`, dense and monotonic within the episode.
    pub id: String,
    /// Sprite/character id from the script, when one was on stage.
    pub speaker_id: Option<String>,
    /// Display name as written in the script. Empty for narration/subtitles.
    pub speaker_name: String,
    pub text: String,
    /// 1-based line number in the source file.
    pub line_number: usize,
    pub kind: DialogueKind,
}

/// Script command names the parser recognizes. Unrecognized commands are
/// preserved as [`CommandKind::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Header,
    Background,
    Character,
    Dialogue,
    Narration,
    Delay,
    Blocker,
    Image,
    PlayMusic,
    PlaySound,
    StopMusic,
    HideItem,
    ShowItem,
    Decision,
    Predicate,
    Subtitle,
    Unknown,
}

impl CommandKind {
    /// Map a script command name to its kind.
    pub fn from_name(name: &str) -> Self {
        match name {
            "HEADER" => Self::Header,
            "Background" => Self::Background,
            "Character" => Self::Character,
            "name" => Self::Dialogue,
            "Delay" => Self::Delay,
            "Blocker" => Self::Blocker,
            "Image" => Self::Image,
            "PlayMusic" => Self::PlayMusic,
            "PlaySound" => Self::PlaySound,
            "StopMusic" => Self::StopMusic,
            "HideItem" => Self::HideItem,
            "ShowItem" => Self::ShowItem,
            "Decision" => Self::Decision,
            "Predicate" => Self::Predicate,
            "Subtitle" => Self::Subtitle,
            _ => Self::Unknown,
        }
    }
}

/// A raw script command, preserved for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryCommand {
    pub kind: CommandKind,
    /// Parameter values, stored verbatim (quoted or bare).
    pub params: BTreeMap<String, String>,
    /// Trailing text (the HEADER title line) where present.
    pub text: Option<String>,
    pub line_number: usize,
}

/// One parsed story script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    /// File stem, e.g. `level_main_01-07_beg`.
    pub id: String,
    /// Display title from the HEADER command, possibly enriched from metadata.
    pub title: String,
    pub dialogues: Vec<Dialogue>,
    /// Distinct normalized character ids (or bare display names) appearing.
    pub characters: BTreeSet<String>,
    /// The full original command list.
    pub commands: Vec<StoryCommand>,
}

/// Story group category, derived from the review table's `entryType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryCategory {
    Mainline,
    Event,
    Side,
    Mini,
    Other,
}

impl StoryCategory {
    pub const ALL: [Self; 5] = [
        Self::Mainline,
        Self::Event,
        Self::Side,
        Self::Mini,
        Self::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mainline => "mainline",
            Self::Event => "event",
            Self::Side => "side",
            Self::Mini => "mini",
            Self::Other => "other",
        }
    }
}

/// One story group (a mainline chapter, an event, a side story).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryGroup {
    pub id: String,
    pub name: String,
    pub category: StoryCategory,
    pub entry_type: String,
    pub act_type: String,
    pub episode_count: usize,
    /// Numeric chapter for mainline groups, 0 otherwise.
    pub sort_key: u32,
}

/// Per-episode metadata from the review table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeMeta {
    pub story_id: String,
    /// Story code shown in the UI, e.g. `1-7`.
    pub story_code: String,
    pub story_name: String,
    /// Pre/post-operation tag.
    pub avg_tag: String,
    /// Script path relative to the story root.
    pub story_txt: String,
    pub group_id: String,
    pub group_name: String,
    pub story_sort: i64,
}

/// Per-category group/episode counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CategoryStats {
    pub group_count: usize,
    pub episode_count: usize,
}

/// Aggregated speaker statistics across one story group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSpeakerStats {
    pub char_id: String,
    /// Last non-mystery display name the speaker appeared under.
    pub display_name: String,
    pub dialogue_count: usize,
    /// Every distinct name the speaker appeared under, in first-seen order.
    pub names: Vec<String>,
}

/// A display name is a "mystery" placeholder when it is all question marks or
/// ends with one (`???`, `낯선 사람?`).
pub fn is_mystery_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty() && (trimmed.ends_with('?') || trimmed.chars().all(|c| c == '?'))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn command_kind_mapping() {
        assert_eq!(CommandKind::from_name("HEADER"), CommandKind::Header);
        assert_eq!(CommandKind::from_name("PlayMusic"), CommandKind::PlayMusic);
        assert_eq!(CommandKind::from_name("Camera"), CommandKind::Unknown);
    }

    #[test]
    fn mystery_names() {
        assert!(is_mystery_name("???"));
        assert!(is_mystery_name("낯선 사람?"));
        assert!(!is_mystery_name("아미야"));
        assert!(!is_mystery_name(""));
    }
}
