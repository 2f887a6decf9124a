//! Story index over the game-data tree.
//!
//! Scans a language subtree for script files, loads the story review table
//! into per-episode metadata and story groups, and answers the listing and
//! statistics queries the rest of the pipeline needs. Everything is built
//! lazily and memoized per language; a data refresh swaps the whole index via
//! the shared loaders.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};
use tracing::{info, warn};

use super::model::{
    is_mystery_name, CategoryStats, Episode, EpisodeMeta, GroupSpeakerStats, StoryCategory,
    StoryGroup,
};
use super::parser::StoryParser;
use crate::error::{Result, SynthError};

static MAIN_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"level_main_(\d+)-(\d+)(?:_(beg|end))?").unwrap());
static MAIN_GROUP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"main_(\d+)").unwrap());

/// Folders under `story/` that hold descriptions rather than scripts.
const EXCLUDED_STORY_DIRS: &[&str] = &["[uc]"];

#[derive(Debug, Deserialize)]
struct ReviewGroupRaw {
    #[serde(default)]
    name: String,
    #[serde(default, rename = "entryType")]
    entry_type: String,
    #[serde(default, rename = "actType")]
    act_type: String,
    #[serde(default, rename = "infoUnlockDatas")]
    info_unlock_datas: Vec<ReviewEpisodeRaw>,
}

#[derive(Debug, Deserialize)]
struct ReviewEpisodeRaw {
    #[serde(default, rename = "storyId")]
    story_id: String,
    #[serde(default, rename = "storyCode")]
    story_code: Option<String>,
    #[serde(default, rename = "storyName")]
    story_name: String,
    #[serde(default, rename = "avgTag")]
    avg_tag: String,
    #[serde(default, rename = "storyTxt")]
    story_txt: String,
    #[serde(default, rename = "storySort")]
    story_sort: i64,
}

#[derive(Default)]
struct LangCache {
    episode_paths: Option<BTreeMap<String, PathBuf>>,
    metas: Option<HashMap<String, EpisodeMeta>>,
    groups: Option<BTreeMap<String, StoryGroup>>,
    group_episodes: Option<BTreeMap<String, Vec<EpisodeMeta>>>,
    episodes: HashMap<String, Episode>,
    category_stats: Option<BTreeMap<StoryCategory, CategoryStats>>,
}

/// Lazily built index of the game-data tree for all languages.
pub struct StoryIndex {
    data_root: PathBuf,
    caches: Mutex<HashMap<String, LangCache>>,
}

impl StoryIndex {
    /// `data_root` holds one subdirectory per language locale
    /// (`ko_KR/gamedata/{excel,story}`).
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            caches: Mutex::new(HashMap::new()),
        }
    }

    /// Language subtree, checked for existence.
    pub fn lang_path(&self, lang: &str) -> Result<PathBuf> {
        let path = self.data_root.join(lang).join("gamedata");
        if !path.exists() {
            return Err(SynthError::MissingResource(format!(
                "game data for {lang} not found at {}",
                path.display()
            )));
        }
        Ok(path)
    }

    /// Locales that actually exist on disk.
    pub fn available_languages(&self) -> Vec<String> {
        crate::config::GAME_LOCALES
            .iter()
            .filter(|lang| self.data_root.join(lang).join("gamedata").exists())
            .map(|lang| (*lang).to_owned())
            .collect()
    }

    fn with_cache<T>(&self, lang: &str, f: impl FnOnce(&mut LangCache) -> T) -> T {
        let mut caches = self.caches.lock().unwrap_or_else(|e| e.into_inner());
        f(caches.entry(lang.to_owned()).or_default())
    }

    /// Map of episode stem → script file path.
    pub fn episode_paths(&self, lang: &str) -> Result<BTreeMap<String, PathBuf>> {
        if let Some(cached) = self.with_cache(lang, |c| c.episode_paths.clone()) {
            return Ok(cached);
        }

        let story_root = self.lang_path(lang)?.join("story");
        let mut index = BTreeMap::new();
        if story_root.exists() {
            collect_scripts(&story_root, &mut index)?;
        }
        info!("indexed {} episodes for {lang}", index.len());
        self.with_cache(lang, |c| c.episode_paths = Some(index.clone()));
        Ok(index)
    }

    fn load_review_table(&self, lang: &str) -> Result<BTreeMap<String, ReviewGroupRaw>> {
        let path = self.lang_path(lang)?.join("excel/story_review_table.json");
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = std::fs::read_to_string(&path)?;
        serde_json::from_str(&raw)
            .map_err(|e| SynthError::InvalidInput(format!("bad review table {}: {e}", path.display())))
    }

    fn ensure_review_loaded(&self, lang: &str) -> Result<()> {
        if self.with_cache(lang, |c| c.metas.is_some()) {
            return Ok(());
        }

        let table = self.load_review_table(lang)?;
        let mut metas = HashMap::new();
        let mut groups = BTreeMap::new();
        let mut group_episodes: BTreeMap<String, Vec<EpisodeMeta>> = BTreeMap::new();

        for (group_id, group) in &table {
            let category = classify_category(&group.entry_type, group_id);
            groups.insert(
                group_id.clone(),
                StoryGroup {
                    id: group_id.clone(),
                    name: if group.name.is_empty() {
                        group_id.clone()
                    } else {
                        group.name.clone()
                    },
                    category,
                    entry_type: group.entry_type.clone(),
                    act_type: group.act_type.clone(),
                    episode_count: group.info_unlock_datas.len(),
                    sort_key: group_sort_key(group_id, &group.entry_type),
                },
            );

            let mut episodes = Vec::new();
            for info in &group.info_unlock_datas {
                if info.story_txt.is_empty() {
                    continue;
                }
                let stem = Path::new(&info.story_txt)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or(&info.story_txt)
                    .to_owned();
                let meta = EpisodeMeta {
                    story_id: info.story_id.clone(),
                    story_code: info.story_code.clone().unwrap_or_default(),
                    story_name: info.story_name.clone(),
                    avg_tag: info.avg_tag.clone(),
                    story_txt: info.story_txt.clone(),
                    group_id: group_id.clone(),
                    group_name: groups[group_id].name.clone(),
                    story_sort: info.story_sort,
                };
                metas.insert(stem, meta.clone());
                episodes.push(meta);
            }
            episodes.sort_by_key(|e| e.story_sort);
            group_episodes.insert(group_id.clone(), episodes);
        }

        self.with_cache(lang, |c| {
            c.metas = Some(metas);
            c.groups = Some(groups);
            c.group_episodes = Some(group_episodes);
        });
        Ok(())
    }

    /// Metadata for one episode stem, if the review table knows it.
    pub fn episode_meta(&self, episode_id: &str, lang: &str) -> Result<Option<EpisodeMeta>> {
        self.ensure_review_loaded(lang)?;
        Ok(self.with_cache(lang, |c| {
            c.metas.as_ref().and_then(|m| m.get(episode_id).cloned())
        }))
    }

    /// All story groups for a language.
    pub fn story_groups(&self, lang: &str) -> Result<BTreeMap<String, StoryGroup>> {
        self.ensure_review_loaded(lang)?;
        Ok(self.with_cache(lang, |c| c.groups.clone().unwrap_or_default()))
    }

    /// Groups of one category: mainline ordered by chapter, others by name.
    pub fn groups_by_category(&self, category: StoryCategory, lang: &str) -> Result<Vec<StoryGroup>> {
        let mut filtered: Vec<StoryGroup> = self
            .story_groups(lang)?
            .into_values()
            .filter(|g| g.category == category)
            .collect();
        if category == StoryCategory::Mainline {
            filtered.sort_by_key(|g| g.sort_key);
        } else {
            filtered.sort_by(|a, b| a.name.cmp(&b.name));
        }
        Ok(filtered)
    }

    /// Episodes of one group, ordered by the table's `storySort`.
    pub fn episodes_by_group(&self, group_id: &str, lang: &str) -> Result<Vec<EpisodeMeta>> {
        self.ensure_review_loaded(lang)?;
        Ok(self.with_cache(lang, |c| {
            c.group_episodes
                .as_ref()
                .and_then(|m| m.get(group_id).cloned())
                .unwrap_or_default()
        }))
    }

    /// Per-category group/episode counts, memoized per language.
    pub fn category_stats(&self, lang: &str) -> Result<BTreeMap<StoryCategory, CategoryStats>> {
        if let Some(cached) = self.with_cache(lang, |c| c.category_stats.clone()) {
            return Ok(cached);
        }
        let groups = self.story_groups(lang)?;
        let mut stats: BTreeMap<StoryCategory, CategoryStats> = StoryCategory::ALL
            .iter()
            .map(|cat| (*cat, CategoryStats::default()))
            .collect();
        for group in groups.values() {
            let entry = stats.entry(group.category).or_default();
            entry.group_count += 1;
            entry.episode_count += group.episode_count;
        }
        self.with_cache(lang, |c| c.category_stats = Some(stats.clone()));
        Ok(stats)
    }

    /// Load (and cache) one parsed episode, title enriched from metadata.
    pub fn load_episode(&self, episode_id: &str, lang: &str) -> Result<Episode> {
        if let Some(cached) = self.with_cache(lang, |c| c.episodes.get(episode_id).cloned()) {
            return Ok(cached);
        }

        let paths = self.episode_paths(lang)?;
        let path = paths.get(episode_id).ok_or_else(|| {
            SynthError::InvalidInput(format!("unknown episode id {episode_id:?} for {lang}"))
        })?;
        let mut episode = StoryParser::new().parse_file(path)?;

        if let Some(meta) = self.episode_meta(episode_id, lang)? {
            if episode.title.is_empty() {
                episode.title = if meta.story_code.is_empty() {
                    meta.story_name.clone()
                } else {
                    format!("{} {}", meta.story_code, meta.story_name)
                };
            }
        }

        self.with_cache(lang, |c| {
            c.episodes.insert(episode_id.to_owned(), episode.clone());
        });
        Ok(episode)
    }

    /// Mainline episode listing with code/tag/chapter annotations.
    pub fn list_main_episodes(&self, lang: &str) -> Result<Vec<MainEpisodeEntry>> {
        let paths = self.episode_paths(lang)?;
        self.ensure_review_loaded(lang)?;

        let mut entries = Vec::new();
        for (episode_id, path) in &paths {
            if !path.to_string_lossy().contains("main") {
                continue;
            }
            let code = extract_episode_code(episode_id);
            let tag = if episode_id.ends_with("_beg") {
                OperationTag::Before
            } else {
                OperationTag::After
            };
            let meta = self.with_cache(lang, |c| {
                c.metas.as_ref().and_then(|m| m.get(episode_id).cloned())
            });
            let (name, chapter) = match &meta {
                Some(meta) => (meta.story_name.clone(), meta.group_name.clone()),
                None => (String::new(), String::new()),
            };
            entries.push(MainEpisodeEntry {
                id: episode_id.clone(),
                code,
                name,
                tag,
                chapter,
            });
        }
        entries.sort_by_key(|e| main_episode_sort_key(&e.id));
        Ok(entries)
    }

    /// Speaker statistics across every episode of a group.
    ///
    /// An initially anonymous speaker may gain a real name mid-group; the
    /// presented display name is the last non-mystery name, computed as a pure
    /// fold over the ordered dialogue stream.
    pub fn group_speaker_stats(&self, group_id: &str, lang: &str) -> Result<Vec<GroupSpeakerStats>> {
        let episodes = self.episodes_by_group(group_id, lang)?;
        let mut order: Vec<String> = Vec::new();
        let mut stats: HashMap<String, GroupSpeakerStats> = HashMap::new();

        for meta in &episodes {
            let stem = Path::new(&meta.story_txt)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&meta.story_txt)
                .to_owned();
            let episode = match self.load_episode(&stem, lang) {
                Ok(episode) => episode,
                Err(e) => {
                    warn!("skipping {stem} in group stats: {e}");
                    continue;
                }
            };
            for dialogue in &episode.dialogues {
                let Some(speaker_id) = &dialogue.speaker_id else {
                    continue;
                };
                let char_id = crate::ident::normalize(speaker_id);
                let entry = stats.entry(char_id.clone()).or_insert_with(|| {
                    order.push(char_id.clone());
                    GroupSpeakerStats {
                        char_id,
                        display_name: String::new(),
                        dialogue_count: 0,
                        names: Vec::new(),
                    }
                });
                entry.dialogue_count += 1;
                if !dialogue.speaker_name.is_empty() {
                    if !entry.names.contains(&dialogue.speaker_name) {
                        entry.names.push(dialogue.speaker_name.clone());
                    }
                    if !is_mystery_name(&dialogue.speaker_name) {
                        entry.display_name = dialogue.speaker_name.clone();
                    } else if entry.display_name.is_empty() {
                        entry.display_name = dialogue.speaker_name.clone();
                    }
                }
            }
        }

        Ok(order.into_iter().filter_map(|id| stats.remove(&id)).collect())
    }

    /// Fuzzy search for a dialogue inside one episode. Returns
    /// `(dialogue index, similarity)` pairs above the threshold, best first.
    pub fn search_dialogue(
        &self,
        text: &str,
        episode_id: &str,
        lang: &str,
    ) -> Result<Vec<(usize, f64)>> {
        let episode = self.load_episode(episode_id, lang)?;
        let mut results: Vec<(usize, f64)> = episode
            .dialogues
            .iter()
            .enumerate()
            .map(|(i, d)| (i, similarity(text, &d.text)))
            .filter(|(_, score)| *score > 0.3)
            .collect();
        results.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(results)
    }

    /// Dialogue-count statistics per character across the whole story tree,
    /// backed by a versioned cache file under `<data_root>/cache/`.
    pub fn dialogue_stats(&self, lang: &str) -> Result<BTreeMap<String, SpeakerTotals>> {
        let cache_path = self.data_root.join("cache/dialogue_stats.json");
        if let Some(stats) = load_stats_cache(&cache_path) {
            return Ok(stats);
        }
        let stats = self.compute_dialogue_stats(lang)?;
        if let Err(e) = save_stats_cache(&cache_path, &stats) {
            warn!("failed to save dialogue stats cache: {e}");
        }
        Ok(stats)
    }

    /// Recompute the dialogue statistics, refreshing the cache file.
    pub fn rebuild_dialogue_stats(&self, lang: &str) -> Result<BTreeMap<String, SpeakerTotals>> {
        let stats = self.compute_dialogue_stats(lang)?;
        let cache_path = self.data_root.join("cache/dialogue_stats.json");
        save_stats_cache(&cache_path, &stats)?;
        Ok(stats)
    }

    fn compute_dialogue_stats(&self, lang: &str) -> Result<BTreeMap<String, SpeakerTotals>> {
        info!("computing dialogue statistics for {lang}");
        let paths = self.episode_paths(lang)?;
        let mut totals: BTreeMap<String, SpeakerTotals> = BTreeMap::new();
        let mut seen_episodes: HashMap<String, std::collections::HashSet<String>> = HashMap::new();

        for episode_id in paths.keys() {
            let episode = match self.load_episode(episode_id, lang) {
                Ok(episode) => episode,
                Err(e) => {
                    warn!("skipping {episode_id} in dialogue stats: {e}");
                    continue;
                }
            };
            for dialogue in &episode.dialogues {
                let key = dialogue
                    .speaker_id
                    .as_deref()
                    .map(crate::ident::normalize)
                    .unwrap_or_else(|| "narrator".to_owned());
                let entry = totals.entry(key.clone()).or_default();
                entry.dialogue_count += 1;
                if seen_episodes.entry(key).or_default().insert(episode_id.clone()) {
                    entry.episode_count += 1;
                }
            }
        }
        info!("dialogue statistics ready: {} speakers", totals.len());
        Ok(totals)
    }
}

/// Mainline listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct MainEpisodeEntry {
    pub id: String,
    /// `1-7` style story code.
    pub code: String,
    pub name: String,
    pub tag: OperationTag,
    pub chapter: String,
}

/// Whether an episode plays before or after its operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationTag {
    Before,
    After,
}

/// Totals for one speaker across the whole story tree.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SpeakerTotals {
    pub dialogue_count: usize,
    pub episode_count: usize,
}

const STATS_CACHE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StatsCacheFile {
    version: u32,
    stats: BTreeMap<String, SpeakerTotals>,
}

fn load_stats_cache(path: &Path) -> Option<BTreeMap<String, SpeakerTotals>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let file: StatsCacheFile = serde_json::from_str(&raw).ok()?;
    if file.version != STATS_CACHE_VERSION {
        warn!("dialogue stats cache version mismatch, recomputing");
        return None;
    }
    Some(file.stats)
}

fn save_stats_cache(path: &Path, stats: &BTreeMap<String, SpeakerTotals>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = StatsCacheFile {
        version: STATS_CACHE_VERSION,
        stats: stats.clone(),
    };
    std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
    Ok(())
}

fn collect_scripts(dir: &Path, index: &mut BTreeMap<String, PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if path.is_dir() {
            if EXCLUDED_STORY_DIRS.iter().any(|pat| name.contains(pat)) {
                continue;
            }
            collect_scripts(&path, index)?;
        } else if path.extension().is_some_and(|ext| ext == "txt") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                index.insert(stem.to_owned(), path.clone());
            }
        }
    }
    Ok(())
}

/// Classify a group by its `entryType` (and id, for side stories).
fn classify_category(entry_type: &str, group_id: &str) -> StoryCategory {
    if entry_type == "MAINLINE" {
        StoryCategory::Mainline
    } else if entry_type == "MINI_ACTIVITY" {
        StoryCategory::Mini
    } else if group_id.to_ascii_lowercase().contains("side") {
        StoryCategory::Side
    } else if entry_type == "ACTIVITY" {
        StoryCategory::Event
    } else {
        StoryCategory::Other
    }
}

/// Mainline groups sort by the numeric chapter in their id.
fn group_sort_key(group_id: &str, entry_type: &str) -> u32 {
    if entry_type == "MAINLINE" {
        if let Some(caps) = MAIN_GROUP_RE.captures(group_id) {
            return caps[1].parse().unwrap_or(0);
        }
    }
    0
}

/// `level_main_01-07_beg` → `1-7`.
fn extract_episode_code(episode_id: &str) -> String {
    if let Some(caps) = MAIN_CODE_RE.captures(episode_id) {
        let chapter: u32 = caps[1].parse().unwrap_or(0);
        let stage: u32 = caps[2].parse().unwrap_or(0);
        return format!("{chapter}-{stage}");
    }
    episode_id.to_owned()
}

fn main_episode_sort_key(episode_id: &str) -> (u32, u32, u8) {
    if let Some(caps) = MAIN_CODE_RE.captures(episode_id) {
        let chapter: u32 = caps[1].parse().unwrap_or(0);
        let stage: u32 = caps[2].parse().unwrap_or(0);
        let order = match caps.get(3).map(|m| m.as_str()) {
            Some("beg") => 0,
            _ => 1,
        };
        return (chapter, stage, order);
    }
    (999, 999, 0)
}

/// Normalized longest-common-subsequence similarity in `[0, 1]`.
fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in &a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let lcs = prev[b.len()] as f64;
    2.0 * lcs / (a.len() + b.len()) as f64
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn write_tree(root: &Path) {
        let gamedata = root.join("ko_KR/gamedata");
        let story = gamedata.join("story/obt/main");
        std::fs::create_dir_all(&story).unwrap();
        std::fs::create_dir_all(gamedata.join("story/[uc]info")).unwrap();
        std::fs::create_dir_all(gamedata.join("excel")).unwrap();

        std::fs::write(
            story.join("level_main_01-01_beg.txt"),
            "[HEADER(key=\"t\")] Awakening\n[Character(name=\"char_002_amiya_1\")]\n[name=\"아미야\"] 박사님.\n나레이션.\n",
        )
        .unwrap();
        std::fs::write(
            story.join("level_main_01-01_end.txt"),
            "[name=\"???\"] 누구지?\n[Character(name=\"npc_003_kalts_1\")]\n[name=\"켈시\"] 간다.\n",
        )
        .unwrap();
        // Scripts under [uc] folders are descriptions, not episodes.
        std::fs::write(
            gamedata.join("story/[uc]info/level_main_01-01_beg.txt"),
            "description only\n",
        )
        .unwrap();

        let review = serde_json::json!({
            "main_1": {
                "name": "제1장",
                "entryType": "MAINLINE",
                "actType": "MAIN_STORY",
                "infoUnlockDatas": [
                    {"storyId": "main_01-01_beg", "storyCode": "1-1", "storyName": "각성",
                     "avgTag": "작전 전", "storyTxt": "obt/main/level_main_01-01_beg", "storySort": 1},
                    {"storyId": "main_01-01_end", "storyCode": "1-1", "storyName": "각성",
                     "avgTag": "작전 후", "storyTxt": "obt/main/level_main_01-01_end", "storySort": 2}
                ]
            },
            "act13side": {
                "name": "화중인",
                "entryType": "ACTIVITY",
                "actType": "ACTIVITY_STORY",
                "infoUnlockDatas": []
            }
        });
        std::fs::write(
            gamedata.join("excel/story_review_table.json"),
            serde_json::to_string(&review).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn indexes_scripts_and_skips_meta_folders() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let index = StoryIndex::new(dir.path());
        let paths = index.episode_paths("ko_KR").unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.contains_key("level_main_01-01_beg"));
    }

    #[test]
    fn loads_episode_with_metadata_title() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let index = StoryIndex::new(dir.path());
        // This script has its own HEADER title.
        let beg = index.load_episode("level_main_01-01_beg", "ko_KR").unwrap();
        assert_eq!(beg.title, "Awakening");
        // This one gets its title from the review table.
        let end = index.load_episode("level_main_01-01_end", "ko_KR").unwrap();
        assert_eq!(end.title, "1-1 각성");
    }

    #[test]
    fn unknown_episode_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let index = StoryIndex::new(dir.path());
        let err = index.load_episode("level_act99_00", "ko_KR").unwrap_err();
        assert!(matches!(err, SynthError::InvalidInput(_)));
    }

    #[test]
    fn classifies_groups() {
        assert_eq!(classify_category("MAINLINE", "main_1"), StoryCategory::Mainline);
        assert_eq!(classify_category("MINI_ACTIVITY", "act1mini"), StoryCategory::Mini);
        assert_eq!(classify_category("ACTIVITY", "act13side"), StoryCategory::Side);
        assert_eq!(classify_category("ACTIVITY", "act27"), StoryCategory::Event);
        assert_eq!(classify_category("NONE", "whatever"), StoryCategory::Other);
    }

    #[test]
    fn category_stats_count_groups_and_episodes() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let index = StoryIndex::new(dir.path());
        let stats = index.category_stats("ko_KR").unwrap();
        assert_eq!(stats[&StoryCategory::Mainline].group_count, 1);
        assert_eq!(stats[&StoryCategory::Mainline].episode_count, 2);
        assert_eq!(stats[&StoryCategory::Side].group_count, 1);
    }

    #[test]
    fn group_episodes_are_sorted_by_story_sort() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let index = StoryIndex::new(dir.path());
        let episodes = index.episodes_by_group("main_1", "ko_KR").unwrap();
        assert_eq!(episodes.len(), 2);
        assert_eq!(episodes[0].avg_tag, "작전 전");
        assert_eq!(episodes[1].avg_tag, "작전 후");
    }

    #[test]
    fn speaker_stats_use_last_non_mystery_name() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let index = StoryIndex::new(dir.path());
        let stats = index.group_speaker_stats("main_1", "ko_KR").unwrap();

        let kalts = stats
            .iter()
            .find(|s| s.char_id == "npc_003_kalts")
            .expect("kalts stats");
        assert_eq!(kalts.display_name, "켈시");
        assert_eq!(kalts.dialogue_count, 1);

        let amiya = stats
            .iter()
            .find(|s| s.char_id == "char_002_amiya")
            .expect("amiya stats");
        assert_eq!(amiya.display_name, "아미야");
    }

    #[test]
    fn mainline_listing_is_ordered_and_coded() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let index = StoryIndex::new(dir.path());
        let episodes = index.list_main_episodes("ko_KR").unwrap();
        assert_eq!(episodes.len(), 2);
        assert_eq!(episodes[0].code, "1-1");
        assert_eq!(episodes[0].tag, OperationTag::Before);
        assert_eq!(episodes[1].tag, OperationTag::After);
        assert_eq!(episodes[0].chapter, "제1장");
    }

    #[test]
    fn dialogue_stats_cache_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let index = StoryIndex::new(dir.path());
        let stats = index.dialogue_stats("ko_KR").unwrap();
        // The bare narration line plus the speaker with a name but no id.
        assert_eq!(stats["narrator"].dialogue_count, 2);
        assert_eq!(stats["char_002_amiya"].dialogue_count, 1);

        // Second call hits the cache file.
        let cached = index.dialogue_stats("ko_KR").unwrap();
        assert_eq!(cached["narrator"].dialogue_count, 2);
        assert!(dir.path().join("cache/dialogue_stats.json").exists());
    }

    #[test]
    fn search_finds_similar_dialogue() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let index = StoryIndex::new(dir.path());
        let results = index
            .search_dialogue("박사님", "level_main_01-01_beg", "ko_KR")
            .unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].0, 0);
    }

    #[test]
    fn missing_language_is_missing_resource() {
        let dir = tempfile::tempdir().unwrap();
        let index = StoryIndex::new(dir.path());
        let err = index.episode_paths("ja_JP").unwrap_err();
        assert!(matches!(err, SynthError::MissingResource(_)));
    }
}
