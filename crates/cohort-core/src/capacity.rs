//! Per-group occupancy and rule accounting.
//!
//! A [`CapacityTracker`] is a read-only view over persisted membership. It
//! answers two questions about a single group: how many members are in it,
//! and how many of them carry a given tracked value.

use crate::error::EngineError;
use crate::matcher::TrackedValue;
use crate::model::{Attributes, Group, Rule};
use crate::resolver::SessionResolver;

/// Why a group cannot take the joining member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Blocker {
    /// The group already holds `max_group_size` members.
    Full { occupants: usize },
    /// Placing the member would push `field=value` above the rule's cap.
    Rule {
        field: String,
        value: String,
        occupants_matching: usize,
        cap: usize,
    },
}

/// Outcome of checking one group for one joining member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assessment {
    Eligible,
    Blocked(Blocker),
}

/// Read-only occupancy view over a resolver.
pub struct CapacityTracker<'a, R: ?Sized> {
    resolver: &'a R,
}

impl<'a, R: SessionResolver + ?Sized> CapacityTracker<'a, R> {
    #[must_use]
    pub const fn new(resolver: &'a R) -> Self {
        Self { resolver }
    }

    /// Current number of members in `group`.
    ///
    /// # Errors
    ///
    /// Returns an internal failure if the store cannot be read.
    pub fn occupant_count(&self, group: &Group) -> Result<usize, EngineError> {
        self.resolver.count_occupants(group.group_id)
    }

    /// Current number of members in `group` carrying `tracked`.
    ///
    /// # Errors
    ///
    /// Returns an internal failure if the store cannot be read.
    pub fn count_matching(
        &self,
        group: &Group,
        tracked: &TrackedValue,
    ) -> Result<usize, EngineError> {
        self.resolver.count_occupants_matching(group.group_id, tracked)
    }

    /// Decide whether `group` can take a member with `attributes`.
    ///
    /// Capacity is checked first; rules are only evaluated for groups with a
    /// free slot. A rule that tracks nothing for this member never blocks.
    ///
    /// # Errors
    ///
    /// Returns an internal failure if the store cannot be read.
    pub fn assess(
        &self,
        group: &Group,
        max_group_size: usize,
        rules: &[Rule],
        attributes: &Attributes,
    ) -> Result<Assessment, EngineError> {
        let occupants = self.occupant_count(group)?;
        if occupants >= max_group_size {
            return Ok(Assessment::Blocked(Blocker::Full { occupants }));
        }

        for rule in rules {
            let Some(tracked) = TrackedValue::for_member(rule, attributes) else {
                continue;
            };
            let occupants_matching = self.count_matching(group, &tracked)?;
            if occupants_matching + 1 > rule.cap {
                return Ok(Assessment::Blocked(Blocker::Rule {
                    field: tracked.field,
                    value: tracked.value,
                    occupants_matching,
                    cap: rule.cap,
                }));
            }
        }

        Ok(Assessment::Eligible)
    }
}
