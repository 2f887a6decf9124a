//! Story script parsing and the game-data episode index.

pub mod index;
pub mod model;
pub mod parser;

pub use index::{MainEpisodeEntry, OperationTag, SpeakerTotals, StoryIndex};
pub use model::{
    CategoryStats, CommandKind, Dialogue, DialogueKind, Episode, EpisodeMeta, GroupSpeakerStats,
    StoryCategory, StoryCommand, StoryGroup,
};
pub use parser::{parse_line, LineParse, StoryParser};
