use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::session::SessionRecord;

/// A session that fell inside the retention window, in the artifact's
/// on-disk shape. `created_at` keeps the CRM's original string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    #[serde(rename = "criado_em")]
    pub created_at: String,
    pub status: Option<String>,
    #[serde(rename = "ultima_mensagem")]
    pub last_message: Option<String>,
    #[serde(rename = "link_chat")]
    pub chat_link: Option<String>,
}

/// Why a session record did not become a lead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    #[error("record has no id")]
    MissingId,

    #[error("record has no createdAt")]
    MissingTimestamp,

    #[error("unparsable createdAt: {0:?}")]
    InvalidTimestamp(String),

    #[error("created before the retention cutoff")]
    BeforeCutoff,
}

/// Offset-bearing layouts tried after RFC 3339: `T` or space separated, with
/// or without a colon in the offset.
const FALLBACK_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
];

/// Parse a CRM creation timestamp. A trailing `Z` is rewritten to `+00:00`;
/// an explicit offset is required.
pub fn parse_created_at(raw: &str) -> Result<DateTime<Utc>, SkipReason> {
    let trimmed = raw.trim();
    let normalized = match trimmed.strip_suffix('Z') {
        Some(rest) => format!("{rest}+00:00"),
        None => trimmed.to_string(),
    };

    DateTime::parse_from_rfc3339(&normalized)
        .ok()
        .or_else(|| {
            FALLBACK_FORMATS
                .iter()
                .find_map(|fmt| DateTime::parse_from_str(&normalized, fmt).ok())
        })
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| SkipReason::InvalidTimestamp(raw.to_string()))
}

impl Lead {
    /// Project a session into a lead if it was created at or after `cutoff`.
    pub fn from_session(record: &SessionRecord, cutoff: DateTime<Utc>) -> Result<Self, SkipReason> {
        let id = record.id().ok_or(SkipReason::MissingId)?;
        let raw = record
            .created_at
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(SkipReason::MissingTimestamp)?;

        if parse_created_at(raw)? < cutoff {
            return Err(SkipReason::BeforeCutoff);
        }

        Ok(Self {
            id: id.to_string(),
            created_at: raw.to_string(),
            status: record.status.clone(),
            last_message: record.last_message_text.clone(),
            chat_link: record.preview_url.clone(),
        })
    }

    pub fn created_at_utc(&self) -> Result<DateTime<Utc>, SkipReason> {
        parse_created_at(&self.created_at)
    }
}
