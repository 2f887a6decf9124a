//! Line-oriented story script parser.
//!
//! Script files interleave dialogue lines (`[name="Amiya"] text`), command
//! lines (`[Character(name="char_002_amiya_1")]`) and bare narration text.
//! Each line parses independently into a [`LineParse`]; the parser folds the
//! sequence into an [`Episode`] with densely indexed dialogues.

use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use tracing::warn;

use super::model::{CommandKind, Dialogue, DialogueKind, Episode, StoryCommand};
use crate::error::Result;
use crate::ident;

static DIALOGUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\[name="([^"]*)"\]\s*(.*)$"#).unwrap());
static COMMAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(\w+)(?:\(([^)]*)\))?\]").unwrap());
static PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)=(?:"([^"]*)"|([^,\s)]+))"#).unwrap());

/// Result of parsing one script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineParse {
    /// `[name="<speaker>"] body` — one spoken line.
    Dialogue { speaker_name: String, text: String },
    /// `[Command(k=v,...)]` with optional trailing text.
    Command {
        kind: CommandKind,
        params: BTreeMap<String, String>,
        text: Option<String>,
    },
    /// A bare text line.
    Narration(String),
    /// A bracketed line that matched no recognized shape.
    Invalid(String),
    /// Whitespace only.
    Blank,
}

/// Parse one line of script text.
pub fn parse_line(line: &str) -> LineParse {
    let line = line.trim();
    if line.is_empty() {
        return LineParse::Blank;
    }

    if let Some(caps) = DIALOGUE_RE.captures(line) {
        return LineParse::Dialogue {
            speaker_name: caps[1].to_owned(),
            text: caps[2].trim().to_owned(),
        };
    }

    if !line.starts_with('[') {
        return LineParse::Narration(line.to_owned());
    }

    let Some(caps) = COMMAND_RE.captures(line) else {
        return LineParse::Invalid(format!("unrecognized command line: {line}"));
    };
    let kind = CommandKind::from_name(&caps[1]);
    let params = parse_params(caps.get(2).map_or("", |m| m.as_str()));

    // HEADER carries the episode title after the closing bracket.
    let text = if kind == CommandKind::Header {
        line.find(']')
            .map(|end| line[end + 1..].trim())
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
    } else {
        None
    };

    LineParse::Command { kind, params, text }
}

/// Parse a `k=v, k2="v2"` parameter list. Values are stored verbatim.
fn parse_params(params_str: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for caps in PARAM_RE.captures_iter(params_str) {
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map_or("", |m| m.as_str());
        params.insert(caps[1].to_owned(), value.to_owned());
    }
    params
}

/// Story script parser.
///
/// Tracks the `Character(...)` on-stage list between lines: when a dialogue
/// line carries only a display name, the first on-stage character id is used
/// as a weak speaker hint.
#[derive(Debug, Default)]
pub struct StoryParser {
    current_characters: Vec<String>,
}

impl StoryParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a script file. The episode id is the file stem.
    pub fn parse_file(&mut self, path: &Path) -> Result<Episode> {
        let episode_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("episode")
            .to_owned();
        let content = std::fs::read_to_string(path)?;
        Ok(self.parse_str(&episode_id, &content))
    }

    /// Parse script text into an episode.
    pub fn parse_str(&mut self, episode_id: &str, content: &str) -> Episode {
        let mut episode = Episode {
            id: episode_id.to_owned(),
            title: String::new(),
            dialogues: Vec::new(),
            characters: Default::default(),
            commands: Vec::new(),
        };
        self.current_characters.clear();

        for (idx, raw_line) in content.lines().enumerate() {
            let line_number = idx + 1;
            match parse_line(raw_line) {
                LineParse::Blank => {}
                LineParse::Dialogue { speaker_name, text } => {
                    let speaker_id = self.guess_speaker_id(&speaker_name);
                    if let Some(id) = &speaker_id {
                        episode.characters.insert(ident::normalize(id));
                    } else if !speaker_name.is_empty() {
                        // No sprite on stage; the display name still counts as
                        // a character for the episode roster.
                        episode.characters.insert(speaker_name.clone());
                    }

                    let mut params = BTreeMap::new();
                    params.insert("name".to_owned(), speaker_name.clone());
                    episode.commands.push(StoryCommand {
                        kind: CommandKind::Dialogue,
                        params,
                        text: Some(text.clone()),
                        line_number,
                    });
                    push_dialogue(
                        &mut episode,
                        speaker_id,
                        speaker_name,
                        text,
                        line_number,
                        DialogueKind::Dialogue,
                    );
                }
                LineParse::Narration(text) => {
                    episode.commands.push(StoryCommand {
                        kind: CommandKind::Narration,
                        params: BTreeMap::new(),
                        text: Some(text.clone()),
                        line_number,
                    });
                    push_dialogue(
                        &mut episode,
                        None,
                        String::new(),
                        text,
                        line_number,
                        DialogueKind::Narration,
                    );
                }
                LineParse::Command { kind, params, text } => {
                    if kind == CommandKind::Header {
                        if let Some(title) = &text {
                            episode.title = title.clone();
                        }
                    }
                    if kind == CommandKind::Character {
                        self.update_current_characters(&params);
                    }
                    // On-screen subtitles with text are voiced as their own
                    // speakerless lines.
                    if kind == CommandKind::Subtitle {
                        if let Some(sub_text) = params.get("text").filter(|t| !t.is_empty()) {
                            push_dialogue(
                                &mut episode,
                                None,
                                String::new(),
                                sub_text.clone(),
                                line_number,
                                DialogueKind::Subtitle,
                            );
                        }
                    }
                    episode.commands.push(StoryCommand {
                        kind,
                        params,
                        text,
                        line_number,
                    });
                }
                LineParse::Invalid(reason) => {
                    warn!("{episode_id}:{line_number}: skipping line ({reason})");
                }
            }
        }

        episode
    }

    fn update_current_characters(&mut self, params: &BTreeMap<String, String>) {
        self.current_characters.clear();
        for key in ["name", "name2", "name3"] {
            if let Some(id) = params.get(key).filter(|v| !v.is_empty()) {
                self.current_characters.push(id.clone());
            }
        }
    }

    /// Weak hint: the first on-stage character is assumed to be speaking.
    fn guess_speaker_id(&self, speaker_name: &str) -> Option<String> {
        if speaker_name.is_empty() {
            return None;
        }
        self.current_characters.first().cloned()
    }
}

fn push_dialogue(
    episode: &mut Episode,
    speaker_id: Option<String>,
    speaker_name: String,
    text: String,
    line_number: usize,
    kind: DialogueKind,
) {
    let index = episode.dialogues.len();
    episode.dialogues.push(Dialogue {
        id: format!("{}_{index:04}", episode.id),
        speaker_id,
        speaker_name,
        text,
        line_number,
        kind,
    });
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn parses_header_dialogue_and_narration() {
        let script = concat!(
            "[HEADER(key=\"title_test\", is_skippable=true)] Darkness\n",
            "[Character(name=\"char_002_amiya_1\")]\n",
            "[name=\"Amiya\"] The doctor is here.\n",
            "She paused.\n",
        );
        let episode = StoryParser::new().parse_str("level_main_01-01_beg", script);

        assert_eq!(episode.title, "Darkness");
        assert_eq!(episode.dialogues.len(), 2);

        let first = &episode.dialogues[0];
        assert_eq!(first.speaker_name, "Amiya");
        assert_eq!(first.text, "The doctor is here.");
        assert_eq!(first.kind, DialogueKind::Dialogue);
        assert_eq!(first.speaker_id.as_deref(), Some("char_002_amiya_1"));

        let second = &episode.dialogues[1];
        assert!(second.speaker_id.is_none());
        assert!(second.speaker_name.is_empty());
        assert_eq!(second.text, "She paused.");
        assert_eq!(second.kind, DialogueKind::Narration);
    }

    #[test]
    fn dialogue_ids_are_dense_and_zero_padded() {
        let script = "[name=\"A\"] one\ntwo\n[name=\"A\"] three\n";
        let episode = StoryParser::new().parse_str("ep", script);
        let ids: Vec<&str> = episode.dialogues.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["ep_0000", "ep_0001", "ep_0002"]);
    }

    #[test]
    fn narration_has_empty_speaker() {
        let episode = StoryParser::new().parse_str("ep", "Dust settled over the ruins.\n");
        let d = &episode.dialogues[0];
        assert_eq!(d.kind, DialogueKind::Narration);
        assert!(d.speaker_id.is_none());
        assert!(d.speaker_name.is_empty());
    }

    #[test]
    fn characters_collects_normalized_ids() {
        let script = concat!(
            "[Character(name=\"char_002_amiya_1#6\")]\n",
            "[name=\"Amiya\"] Hello.\n",
            "[Character()]\n",
            "[name=\"Stranger\"] Hm.\n",
        );
        let episode = StoryParser::new().parse_str("ep", script);
        assert!(episode.characters.contains("char_002_amiya"));
        assert!(episode.characters.contains("Stranger"));
    }

    #[test]
    fn malformed_command_is_skipped_not_fatal() {
        let script = "[Broken(((\n[name=\"A\"] still here\n";
        let episode = StoryParser::new().parse_str("ep", script);
        assert_eq!(episode.dialogues.len(), 1);
        assert_eq!(episode.dialogues[0].text, "still here");
    }

    #[test]
    fn params_accept_quoted_and_bare_values() {
        let parse = parse_line("[Delay(time=1.5, fadetime=\"0.5\")]");
        let LineParse::Command { kind, params, .. } = parse else {
            panic!("expected command");
        };
        assert_eq!(kind, CommandKind::Delay);
        assert_eq!(params.get("time").map(String::as_str), Some("1.5"));
        assert_eq!(params.get("fadetime").map(String::as_str), Some("0.5"));
    }

    #[test]
    fn subtitle_with_text_becomes_a_subtitle_line() {
        let script = "[Subtitle(text=\"Three years later\", x=20)]\n";
        let episode = StoryParser::new().parse_str("ep", script);
        assert_eq!(episode.dialogues.len(), 1);
        assert_eq!(episode.dialogues[0].kind, DialogueKind::Subtitle);
        assert_eq!(episode.dialogues[0].text, "Three years later");
        assert!(episode.dialogues[0].speaker_name.is_empty());
    }

    #[test]
    fn scene_directives_are_preserved_not_interpreted() {
        let script = "[PlayMusic(intro=\"$m_bat\", key=\"$m_bat_loop\")]\n[Blocker(a=1)]\n";
        let episode = StoryParser::new().parse_str("ep", script);
        assert!(episode.dialogues.is_empty());
        assert_eq!(episode.commands.len(), 2);
        assert_eq!(episode.commands[0].kind, CommandKind::PlayMusic);
    }

    #[test]
    fn stage_hint_resets_with_character_commands() {
        let script = concat!(
            "[Character(name=\"char_002_amiya_1\", name2=\"char_003_kalts_1\")]\n",
            "[name=\"Amiya\"] First.\n",
            "[Character()]\n",
            "[name=\"Amiya\"] Second.\n",
        );
        let episode = StoryParser::new().parse_str("ep", script);
        assert_eq!(
            episode.dialogues[0].speaker_id.as_deref(),
            Some("char_002_amiya_1")
        );
        assert!(episode.dialogues[1].speaker_id.is_none());
    }
}
