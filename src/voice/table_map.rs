//! Script-id → table-id resolution.
//!
//! A handful of sprite ids differ from their character-table id in the final
//! morphological suffix (`char_474_gladiia` in scripts vs `char_474_glady` in
//! the table). The map is built from the character table's keys: an id that
//! is not present verbatim resolves through its unique `char_<num>_` prefix.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

use crate::error::{Result, SynthError};
use crate::ident;

/// Resolves normalized script ids to character-table ids.
#[derive(Debug)]
pub struct ScriptIdMap {
    table_ids: HashSet<String>,
    /// `char_<num>_` prefix → table ids sharing it.
    by_prefix: HashMap<String, Vec<String>>,
}

/// The numeric prefix of a playable id, including the trailing underscore.
fn numeric_prefix(char_id: &str) -> Option<String> {
    let rest = char_id.strip_prefix("char_")?;
    let num_end = rest.find('_')?;
    rest[..num_end].parse::<u32>().ok()?;
    Some(format!("char_{}_", &rest[..num_end]))
}

impl ScriptIdMap {
    /// Build the map from a character table file.
    ///
    /// A missing or unreadable table is an invalid-input error: rendering
    /// with an unloaded map silently picks wrong voices downstream.
    pub fn load(character_table_path: &Path) -> Result<Self> {
        if !character_table_path.exists() {
            return Err(SynthError::InvalidInput(format!(
                "character table not found: {}",
                character_table_path.display()
            )));
        }
        let raw = std::fs::read_to_string(character_table_path)?;
        let table: HashMap<String, serde_json::Value> = serde_json::from_str(&raw)
            .map_err(|e| {
                SynthError::InvalidInput(format!(
                    "bad character table {}: {e}",
                    character_table_path.display()
                ))
            })?;
        Ok(Self::from_ids(table.into_keys()))
    }

    /// Build from an id list (tests, or an already-loaded table).
    pub fn from_ids(ids: impl IntoIterator<Item = String>) -> Self {
        let table_ids: HashSet<String> = ids.into_iter().collect();
        let mut by_prefix: HashMap<String, Vec<String>> = HashMap::new();
        for id in &table_ids {
            if let Some(prefix) = numeric_prefix(id) {
                by_prefix.entry(prefix).or_default().push(id.clone());
            }
        }
        debug!("script-id map ready: {} table ids", table_ids.len());
        Self {
            table_ids,
            by_prefix,
        }
    }

    /// Resolve a script id to its table id.
    ///
    /// The id is normalized first; an exact table hit wins, then a unique
    /// numeric-prefix match. Ambiguous or unknown ids pass through unchanged.
    pub fn resolve(&self, script_id: &str) -> String {
        let normalized = ident::normalize(script_id);
        if self.table_ids.contains(&normalized) {
            return normalized;
        }
        if let Some(prefix) = numeric_prefix(&normalized) {
            if let Some(matches) = self.by_prefix.get(&prefix) {
                if let [only] = matches.as_slice() {
                    debug!("table-id resolution: {normalized} -> {only}");
                    return only.clone();
                }
            }
        }
        normalized
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn sample_map() -> ScriptIdMap {
        ScriptIdMap::from_ids(
            [
                "char_474_glady",
                "char_002_amiya",
                "char_1001_amiya2",
                "npc_003_kalts",
            ]
            .map(str::to_owned),
        )
    }

    #[test]
    fn exact_table_ids_pass_through() {
        let map = sample_map();
        assert_eq!(map.resolve("char_002_amiya"), "char_002_amiya");
    }

    #[test]
    fn sprite_suffix_resolves_through_numeric_prefix() {
        let map = sample_map();
        assert_eq!(map.resolve("char_474_gladiia"), "char_474_glady");
        assert_eq!(map.resolve("char_474_gladiia_1#5"), "char_474_glady");
    }

    #[test]
    fn unknown_ids_pass_through_normalized() {
        let map = sample_map();
        assert_eq!(map.resolve("char_999_nobody_1#2"), "char_999_nobody");
        assert_eq!(map.resolve("avg_npc_012#3"), "avg_npc_012");
    }

    #[test]
    fn missing_table_is_invalid_input() {
        let err = ScriptIdMap::load(Path::new("/nonexistent/character_table.json")).unwrap_err();
        assert!(matches!(err, SynthError::InvalidInput(_)));
    }
}
