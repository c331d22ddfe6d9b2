//! Fairness rules and their load-time resolution.
//!
//! A stored rule carries a single `field_key` string that means one of two
//! things depending on the session's declared fields:
//! - a declared field name: members sharing a *value* of that field are capped
//! - anything else: the key is a literal attribute value, matched
//!   case-insensitively against every attribute of a member
//!
//! The distinction is made once, when the session is loaded, so the matcher
//! never has to re-derive it per comparison.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// What a rule constrains, resolved against the declared field list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "lowercase")]
pub enum RuleTarget {
    /// Cap members sharing the same value of this declared field.
    Field(String),
    /// Cap members carrying this literal value in any field.
    Value(String),
}

impl RuleTarget {
    /// The raw `field_key` as stored.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Field(key) | Self::Value(key) => key,
        }
    }
}

/// A resolved fairness rule: a target plus the cap that applies to it.
///
/// For grouping sessions `cap` is `max_per_group`; for selection sessions it
/// is `preference_max_selection`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub target: RuleTarget,
    pub cap: usize,
}

impl Rule {
    /// Resolve a stored `field_key` into a field- or value-based rule.
    #[must_use]
    pub fn resolve(field_key: &str, cap: usize, declared_fields: &[String]) -> Self {
        let target = if declared_fields.iter().any(|field| field == field_key) {
            RuleTarget::Field(field_key.to_string())
        } else {
            RuleTarget::Value(field_key.to_string())
        };
        Self { target, cap }
    }
}

/// A rule as a host writes it: `field_key=cap`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub field_key: String,
    pub cap: usize,
}

impl fmt::Display for RuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.field_key, self.cap)
    }
}

impl FromStr for RuleSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let Some((key, cap)) = s.rsplit_once('=') else {
            anyhow::bail!("invalid rule '{s}': expected FIELD_KEY=CAP");
        };
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("invalid rule '{s}': field key is empty");
        }
        let cap = cap
            .trim()
            .parse::<usize>()
            .map_err(|err| anyhow::anyhow!("invalid rule '{s}': cap is not a count ({err})"))?;
        Ok(Self {
            field_key: key.to_string(),
            cap,
        })
    }
}
