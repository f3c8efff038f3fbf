//! Commit records and version queries

use confdb_core::{parse_timestamp, Error, Result, Version, VersionQueryType};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Build the record of a new commit.
///
/// The id is a SHA-256 over the parent id and the commit metadata, so ids
/// chain like the revisions of a version control system.
pub fn new_version(parent: Option<&str>, user: &str, timestamp: i64, comment: &str, files: Vec<String>) -> Version {
    let mut hasher = Sha256::new();
    hasher.update(parent.unwrap_or_default().as_bytes());
    hasher.update([0]);
    hasher.update(user.as_bytes());
    hasher.update([0]);
    hasher.update(timestamp.to_be_bytes());
    hasher.update(comment.as_bytes());
    for file in &files {
        hasher.update([0]);
        hasher.update(file.as_bytes());
    }
    let id: String = hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect();
    Version::new(id, user, timestamp, comment, files)
}

/// Select versions of `history` (oldest first) in the half-open window
/// `(since, until]` for ids and tags, or the closed window `[since, until]`
/// for dates. Empty bounds leave that end open.
pub fn select(
    history: &[Version],
    tags: &BTreeMap<String, String>,
    since: &str,
    until: &str,
    query_type: VersionQueryType,
    relevant: Option<&BTreeSet<String>>,
) -> Result<Vec<Version>> {
    let window: Vec<&Version> = match query_type {
        VersionQueryType::ByDate => {
            let since = parse_timestamp(since)?;
            let until = parse_timestamp(until)?;
            // history order is commit order, not timestamp order
            history
                .iter()
                .filter(|v| {
                    since.map_or(true, |s| v.timestamp() >= s) && until.map_or(true, |u| v.timestamp() <= u)
                })
                .collect()
        }
        VersionQueryType::ById => by_ids(history, since, until)?.iter().collect(),
        VersionQueryType::ByTag => {
            let since = resolve_tag(tags, since)?;
            let until = resolve_tag(tags, until)?;
            by_ids(history, since, until)?.iter().collect()
        }
    };

    Ok(window
        .into_iter()
        .filter(|v| relevant.map_or(true, |units| v.files().iter().any(|f| units.contains(f))))
        .cloned()
        .collect())
}

fn by_ids<'h>(history: &'h [Version], since: &str, until: &str) -> Result<&'h [Version]> {
    let position = |id: &str| {
        history
            .iter()
            .position(|v| v.id() == id)
            .ok_or_else(|| Error::not_found(format!("version '{id}'")))
    };
    let start = if since.is_empty() { 0 } else { position(since)? + 1 };
    let end = if until.is_empty() { history.len() } else { position(until)? + 1 };
    if start >= end {
        return Ok(&[]);
    }
    Ok(&history[start..end])
}

fn resolve_tag<'t>(tags: &'t BTreeMap<String, String>, tag: &'t str) -> Result<&'t str> {
    if tag.is_empty() {
        return Ok(tag);
    }
    tags.get(tag)
        .map(String::as_str)
        .ok_or_else(|| Error::not_found(format!("tag '{tag}'")))
}
