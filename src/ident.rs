//! Character identifier normalization.
//!
//! Story scripts and bundle filenames carry character ids in several flavors:
//! sprite references with pose/expression markers (`char_002_amiya_1#6`),
//! renamed sprite prefixes (`avg_4072_ironmn_1#8$1`, `avgnew_112_siege_1#1$1`),
//! generic NPC slots (`avg_npc_012#3`) and named NPCs (`npc_003_kalts`).
//! One normalization is used everywhere so ids from different sources agree.

use regex::Regex;
use std::sync::LazyLock;

/// Prefixes that mark NPC ids. These keep their prefix during normalization.
const NPC_PREFIXES: &[&str] = &["avg_npc_", "bavg_npc_", "npc_"];

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[#$]\d+").unwrap());
static TRAILING_DIGIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_\d$").unwrap());
static TRAILING_EX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_ex$").unwrap());
static GENERIC_NPC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(avg_npc_|bavg_npc_)\d+(_\d+)?$").unwrap());
static NAMED_NPC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^npc_\d+_[a-z]").unwrap());

fn is_npc_id(lower: &str) -> bool {
    NPC_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Normalize a character id.
///
/// NPC ids lose their `#n`/`$n` markers and a trailing single-digit instance
/// number but keep their prefix. All other ids fold `avgnew_`/`avg_` into
/// `char_`, then lose markers, a trailing single-digit instance number, and a
/// trailing `_ex` extension suffix.
///
/// Normalization is idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(char_id: &str) -> String {
    let char_id = char_id.trim();
    if char_id.is_empty() {
        return String::new();
    }

    let lower = char_id.to_ascii_lowercase();

    if is_npc_id(&lower) {
        let stripped = MARKER_RE.replace_all(char_id, "");
        return TRAILING_DIGIT_RE.replace(&stripped, "").into_owned();
    }

    let folded: String = if lower.starts_with("avgnew_") {
        format!("char_{}", &char_id[7..])
    } else if lower.starts_with("avg_") {
        format!("char_{}", &char_id[4..])
    } else {
        char_id.to_owned()
    };

    let stripped = MARKER_RE.replace_all(&folded, "");
    let stripped = TRAILING_DIGIT_RE.replace(&stripped, "");
    TRAILING_EX_RE.replace(&stripped, "").into_owned()
}

/// Generic NPC slots (`avg_npc_012`, `avg_npc_005_1`) are reused across many
/// characters and must be excluded from automatic name-based voice mapping.
pub fn is_generic_npc(char_id: &str) -> bool {
    GENERIC_NPC_RE.is_match(char_id)
}

/// Named NPCs (`npc_003_kalts`) denote one specific character and may carry a
/// voice mapping.
pub fn is_named_npc(char_id: &str) -> bool {
    NAMED_NPC_RE.is_match(char_id)
}

/// Playable characters carry a `char_` prefix without an `_npc_` component.
pub fn is_playable(char_id: &str) -> bool {
    let lower = char_id.to_ascii_lowercase();
    lower.starts_with("char_") && !lower.contains("_npc_")
}
