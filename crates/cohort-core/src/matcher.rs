//! Attribute matching for fairness rules.
//!
//! Pure functions only. A rule is evaluated against a member in two steps:
//! [`TrackedValue::for_member`] works out which `(field, value)` pair the rule
//! tracks for that member (if any), and [`TrackedValue::matches`] then decides
//! whether another member carries the same pair.

use crate::model::{Attributes, Rule, RuleTarget};

/// How two attribute values are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Byte-for-byte equality (field-based rules, preferences).
    Exact,
    /// Unicode case-folded equality (value-based rules).
    CaseInsensitive,
}

impl MatchMode {
    #[must_use]
    pub fn values_equal(self, left: &str, right: &str) -> bool {
        match self {
            Self::Exact => left == right,
            Self::CaseInsensitive => eq_ignore_case(left, right),
        }
    }
}

/// The `(field, value)` pair a rule tracks for one particular member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedValue {
    pub field: String,
    pub value: String,
    pub mode: MatchMode,
}

impl TrackedValue {
    /// Work out what `rule` tracks for a member with `attributes`.
    ///
    /// Returns `None` when the rule has nothing to say about this member: the
    /// field is missing or blank, or no attribute carries the rule's value.
    #[must_use]
    pub fn for_member(rule: &Rule, attributes: &Attributes) -> Option<Self> {
        match &rule.target {
            RuleTarget::Field(field) => {
                let value = attributes.get(field)?;
                if value.trim().is_empty() {
                    return None;
                }
                Some(Self {
                    field: field.clone(),
                    value: value.clone(),
                    mode: MatchMode::Exact,
                })
            }
            RuleTarget::Value(literal) => {
                let field = find_value(attributes, literal)?;
                Some(Self {
                    field: field.to_string(),
                    value: literal.clone(),
                    mode: MatchMode::CaseInsensitive,
                })
            }
        }
    }

    /// Whether another member's attributes carry this same pair.
    #[must_use]
    pub fn matches(&self, attributes: &Attributes) -> bool {
        attributes
            .get(&self.field)
            .is_some_and(|candidate| self.mode.values_equal(candidate, &self.value))
    }
}

/// Field-based match: exact comparison of one field against `target`.
#[must_use]
pub fn field_matches(attributes: &Attributes, field: &str, target: &str) -> bool {
    attributes.get(field).is_some_and(|value| value == target)
}

/// Value-based match: the first field (in key order) whose value equals
/// `literal` ignoring case.
#[must_use]
pub fn find_value<'a>(attributes: &'a Attributes, literal: &str) -> Option<&'a str> {
    if literal.trim().is_empty() {
        return None;
    }
    attributes
        .iter()
        .find(|(_, value)| eq_ignore_case(value, literal))
        .map(|(field, _)| field.as_str())
}

/// Unicode-aware case-insensitive equality without allocating.
#[must_use]
pub fn eq_ignore_case(left: &str, right: &str) -> bool {
    left.chars()
        .flat_map(char::to_lowercase)
        .eq(right.chars().flat_map(char::to_lowercase))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn field_rule(key: &str) -> Rule {
        Rule {
            target: RuleTarget::Field(key.into()),
            cap: 1,
        }
    }

    fn value_rule(literal: &str) -> Rule {
        Rule {
            target: RuleTarget::Value(literal.into()),
            cap: 1,
        }
    }

    #[test]
    fn field_rule_tracks_members_own_value() {
        let member = attrs(&[("team", "x"), ("gender", "female")]);
        let tracked = TrackedValue::for_member(&field_rule("team"), &member).expect("tracked");
        assert_eq!(tracked.field, "team");
        assert_eq!(tracked.value, "x");
        assert_eq!(tracked.mode, MatchMode::Exact);
    }

    #[test]
    fn field_rule_ignores_missing_or_blank_field() {
        assert!(TrackedValue::for_member(&field_rule("team"), &attrs(&[("gender", "f")])).is_none());
        assert!(TrackedValue::for_member(&field_rule("team"), &attrs(&[("team", "  ")])).is_none());
    }

    #[test]
    fn field_rule_matching_is_case_sensitive() {
        let tracked =
            TrackedValue::for_member(&field_rule("team"), &attrs(&[("team", "x")])).expect("tracked");
        assert!(tracked.matches(&attrs(&[("team", "x")])));
        assert!(!tracked.matches(&attrs(&[("team", "X")])));
        assert!(!tracked.matches(&attrs(&[("squad", "x")])));
    }

    #[test]
    fn value_rule_discovers_matching_field() {
        let member = attrs(&[("gender", "Female"), ("major", "physics")]);
        let tracked = TrackedValue::for_member(&value_rule("female"), &member).expect("tracked");
        assert_eq!(tracked.field, "gender");
        assert_eq!(tracked.mode, MatchMode::CaseInsensitive);
    }

    #[test]
    fn value_rule_counts_only_on_discovered_field() {
        let member = attrs(&[("gender", "female")]);
        let tracked = TrackedValue::for_member(&value_rule("female"), &member).expect("tracked");

        assert!(tracked.matches(&attrs(&[("gender", "FEMALE")])));
        // Same literal under a different field is not the same concern.
        assert!(!tracked.matches(&attrs(&[("nickname", "female")])));
    }

    #[test]
    fn value_rule_without_match_tracks_nothing() {
        let member = attrs(&[("gender", "male")]);
        assert!(TrackedValue::for_member(&value_rule("female"), &member).is_none());
    }

    #[test]
    fn find_value_picks_first_field_in_key_order() {
        let member = attrs(&[("zeta", "yes"), ("alpha", "YES")]);
        assert_eq!(find_value(&member, "yes"), Some("alpha"));
        assert_eq!(find_value(&member, ""), None);
    }

    #[test]
    fn eq_ignore_case_handles_unicode() {
        assert!(eq_ignore_case("ÉCOLE", "école"));
        assert!(!eq_ignore_case("abc", "abcd"));
    }

    #[test]
    fn field_matches_is_exact() {
        let member = attrs(&[("gender", "female")]);
        assert!(field_matches(&member, "gender", "female"));
        assert!(!field_matches(&member, "gender", "Female"));
        assert!(!field_matches(&member, "team", "female"));
    }
}
