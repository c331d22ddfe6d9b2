use super::rule::Rule;
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Lifecycle status of an access code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeStatus {
    Active,
    Used,
    Expired,
}

impl CodeStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Used => "used",
            Self::Expired => "expired",
        }
    }
}

impl FromStr for CodeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "used" => Ok(Self::Used),
            "expired" => Ok(Self::Expired),
            other => anyhow::bail!("unknown access code status '{other}'"),
        }
    }
}

/// The short code participants type to reach a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessCode {
    pub code_id: i64,
    pub code: String,
    pub host_id: String,
    pub status: CodeStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AccessCode {
    /// A code admits participants only while active and unexpired.
    #[must_use]
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == CodeStatus::Active && self.expires_at > now
    }

    /// Only the host that created the code may run host operations on its
    /// session.
    ///
    /// # Errors
    ///
    /// [`EngineError::Unauthorized`] when `host_id` is not the owner.
    pub fn authorize(&self, host_id: &str) -> Result<(), EngineError> {
        if self.host_id == host_id.trim() {
            Ok(())
        } else {
            Err(EngineError::Unauthorized {
                host_id: host_id.to_string(),
            })
        }
    }
}

/// Which kind of activity an access code leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Grouping,
    Selection,
}

impl SessionKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Grouping => "grouping",
            Self::Selection => "selection",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, capacity-bounded bin inside a grouping session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub group_id: i64,
    pub session_id: i64,
    pub name: String,
}

/// A grouping session with its rules resolved against its declared fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupingSession {
    pub session_id: i64,
    pub name: String,
    pub code: AccessCode,
    pub max_group_size: usize,
    pub reveal_immediately: bool,
    pub fields: Vec<String>,
    pub rules: Vec<Rule>,
    pub created_at: DateTime<Utc>,
}

impl GroupingSession {
    #[must_use]
    pub fn host_id(&self) -> &str {
        &self.code.host_id
    }
}

/// A selection session with its preferential rules resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionSession {
    pub session_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub code: AccessCode,
    /// What the host calls the member identifier (e.g. "Student ID").
    pub identifier_label: String,
    pub fields: Vec<String>,
    pub rules: Vec<Rule>,
    pub created_at: DateTime<Utc>,
}

impl SelectionSession {
    #[must_use]
    pub fn host_id(&self) -> &str {
        &self.code.host_id
    }
}
