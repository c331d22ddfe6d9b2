use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fmt, str::FromStr};

/// Free-form member attributes, ordered by field key.
pub type Attributes = BTreeMap<String, String>;

/// Parse `key=value` pairs into an attribute map.
///
/// Later pairs overwrite earlier ones with the same key.
///
/// # Errors
///
/// Returns an error if a pair has no `=` or an empty key.
pub fn parse_attributes<I, S>(pairs: I) -> anyhow::Result<Attributes>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut attributes = Attributes::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let Some((key, value)) = pair.split_once('=') else {
            anyhow::bail!("invalid attribute '{pair}': expected KEY=VALUE");
        };
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("invalid attribute '{pair}': key is empty");
        }
        attributes.insert(key.to_string(), value.trim().to_string());
    }
    Ok(attributes)
}

/// Trim a member identifier and reject blank ones.
///
/// # Errors
///
/// [`EngineError::InvalidRequest`] when nothing is left after trimming.
pub fn normalize_identifier(raw: &str) -> Result<&str, EngineError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::invalid("member identifier must not be empty"));
    }
    Ok(trimmed)
}

/// A participant placed in a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupMember {
    pub member_id: i64,
    pub member_identifier: String,
    pub group_id: i64,
    pub attributes: Attributes,
    pub joined_at: DateTime<Utc>,
}

/// A participant in a selection session's pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolMember {
    pub member_id: i64,
    pub member_identifier: String,
    pub attributes: Attributes,
    pub selected: bool,
    pub joined_at: DateTime<Utc>,
}

/// How a member came to be selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionType {
    Preferential,
    Random,
}

impl SelectionType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preferential => "preferential",
            Self::Random => "random",
        }
    }
}

impl fmt::Display for SelectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "preferential" => Ok(Self::Preferential),
            "random" => Ok(Self::Random),
            other => anyhow::bail!("unknown selection type '{other}'"),
        }
    }
}

/// One row of the selected-members listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberSelectionDetail {
    pub member_id: i64,
    pub member_identifier: String,
    pub attributes: Attributes,
    pub selection_type: SelectionType,
    pub selected_at: DateTime<Utc>,
}

/// A `{field: value}` pair a host wants selected first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preference {
    pub field: String,
    pub value: String,
}

impl Preference {
    /// Whether a member's attribute for `field` equals `value` exactly.
    #[must_use]
    pub fn matches(&self, attributes: &Attributes) -> bool {
        crate::matcher::field_matches(attributes, &self.field, &self.value)
    }
}

impl FromStr for Preference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let Some((field, value)) = s.split_once('=') else {
            anyhow::bail!("invalid preference '{s}': expected FIELD=VALUE");
        };
        let (field, value) = (field.trim(), value.trim());
        if field.is_empty() || value.is_empty() {
            anyhow::bail!("invalid preference '{s}': field and value must be non-empty");
        }
        Ok(Self {
            field: field.to_string(),
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_attributes_keeps_last_value() {
        let attrs = parse_attributes(["team=x", "gender = female", "team=y"]).expect("valid");
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs["team"], "y");
        assert_eq!(attrs["gender"], "female");
    }

    #[test]
    fn parse_attributes_allows_equals_in_value() {
        let attrs = parse_attributes(["note=a=b"]).expect("valid");
        assert_eq!(attrs["note"], "a=b");
    }

    #[test]
    fn parse_attributes_rejects_missing_separator() {
        assert!(parse_attributes(["team"]).is_err());
        assert!(parse_attributes(["=x"]).is_err());
    }

    #[test]
    fn identifiers_are_trimmed_and_must_be_non_blank() {
        assert_eq!(normalize_identifier("  s-42 ").expect("valid"), "s-42");
        assert!(matches!(
            normalize_identifier("   "),
            Err(EngineError::InvalidRequest(_))
        ));
    }

    #[test]
    fn selection_type_round_trips_through_str() {
        for kind in [SelectionType::Preferential, SelectionType::Random] {
            assert_eq!(kind.as_str().parse::<SelectionType>().expect("parse"), kind);
        }
        assert!("lottery".parse::<SelectionType>().is_err());
    }

    #[test]
    fn preference_matching_is_case_sensitive() {
        let pref: Preference = "gender=female".parse().expect("valid");
        let mut attrs = Attributes::new();
        attrs.insert("gender".into(), "female".into());
        assert!(pref.matches(&attrs));

        attrs.insert("gender".into(), "Female".into());
        assert!(!pref.matches(&attrs));
    }
}
