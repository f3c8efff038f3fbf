//! Commit history records

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the `since`/`until` bounds of a version query are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionQueryType {
    /// Timestamps: seconds since epoch or `YYYY-MM-DD[ HH:MM:SS]`
    ByDate,
    /// Version identifiers
    ById,
    /// Tags attached to versions
    ByTag,
}

/// One committed revision of the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    id: String,
    user: String,
    timestamp: i64,
    comment: String,
    files: Vec<String>,
}

impl Version {
    pub fn new(
        id: impl Into<String>,
        user: impl Into<String>,
        timestamp: i64,
        comment: impl Into<String>,
        files: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            user: user.into(),
            timestamp,
            comment: comment.into(),
            files,
        }
    }

    /// Backend-specific immutable revision identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Seconds since epoch
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Storage units touched by the commit
    pub fn files(&self) -> &[String] {
        &self.files
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let when = DateTime::from_timestamp(self.timestamp, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| self.timestamp.to_string());
        write!(
            f,
            "id: {} user: {} date: {} comment: \"{}\" files: [{}]",
            self.id,
            self.user,
            when,
            self.comment,
            self.files.join(", ")
        )
    }
}

/// Parse a date bound of a `ByDate` query; an empty bound is open
pub fn parse_timestamp(text: &str) -> Result<Option<i64>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    if let Ok(seconds) = text.parse::<i64>() {
        return Ok(Some(seconds));
    }
    if let Ok(time) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Ok(Some(time.and_utc().timestamp()));
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(Some(date.and_hms_opt(0, 0, 0).map_or(0, |t| t.and_utc().timestamp())));
    }
    Err(Error::generic(format!(
        "'{text}' is neither seconds since epoch nor a YYYY-MM-DD[ HH:MM:SS] date"
    )))
}
