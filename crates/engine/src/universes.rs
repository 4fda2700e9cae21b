//! Universe id list: a newline-delimited text file, one id per line.

use std::collections::HashSet;
use std::path::Path;

use badgewatch_common::error::AppResult;
use badgewatch_common::types::UniverseId;

/// Parse the id list: lines are trimmed and blank lines skipped. Duplicates
/// are kept; see [`dedupe_lines`] for the offline clean-up.
pub fn parse_universe_ids(content: &str) -> Vec<UniverseId> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read the whole id list before a pass starts.
pub async fn load_universe_ids(path: &Path) -> AppResult<Vec<UniverseId>> {
    let content = tokio::fs::read_to_string(path).await?;
    let ids = parse_universe_ids(&content);
    tracing::info!(path = %path.display(), count = ids.len(), "Loaded universe ids");
    Ok(ids)
}

/// Result of removing duplicate lines from an id list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupeReport {
    pub unique: Vec<String>,
    pub removed: usize,
}

/// Drop repeated lines, keeping the first occurrence of each. Lines are
/// compared after trimming trailing whitespace.
pub fn dedupe_lines(content: &str) -> DedupeReport {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    let mut removed = 0;

    for line in content.lines() {
        let line = line.trim_end();
        if seen.insert(line.to_string()) {
            unique.push(line.to_string());
        } else {
            removed += 1;
        }
    }

    DedupeReport { unique, removed }
}
