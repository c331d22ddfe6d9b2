//! Persistence contract the engines run against.
//!
//! Every method is expected to execute inside the caller's transaction: the
//! engines read counts and write the result through the same handle, and the
//! caller commits once. [`crate::db::store::SqliteStore`] is the production
//! implementation.

use crate::error::EngineError;
use crate::matcher::TrackedValue;
use crate::model::{
    Attributes, Group, GroupMember, GroupingSession, MemberSelectionDetail, PoolMember,
    SelectionSession, SelectionType,
};
use chrono::{DateTime, Utc};

/// Read side: sessions, rules, groups, and pools.
pub trait SessionResolver {
    /// Load the grouping session behind `code`.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidOrExpiredCode`] when the code is unknown,
    /// inactive, or expired at `now`; [`EngineError::SessionNotFound`] when the
    /// code belongs to no grouping session.
    fn grouping_session(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<GroupingSession, EngineError>;

    /// Load the selection session behind `code`.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`SessionResolver::grouping_session`].
    fn selection_session(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<SelectionSession, EngineError>;

    /// All groups of a grouping session.
    ///
    /// # Errors
    ///
    /// Returns an internal failure if the store cannot be read.
    fn groups(&self, session_id: i64) -> Result<Vec<Group>, EngineError>;

    /// Number of members currently placed in `group_id`.
    ///
    /// # Errors
    ///
    /// Returns an internal failure if the store cannot be read.
    fn count_occupants(&self, group_id: i64) -> Result<usize, EngineError>;

    /// Attribute maps of everyone currently placed in `group_id`.
    ///
    /// # Errors
    ///
    /// Returns an internal failure if the store cannot be read.
    fn occupant_attributes(&self, group_id: i64) -> Result<Vec<Attributes>, EngineError>;

    /// Number of occupants of `group_id` carrying `tracked`.
    ///
    /// # Errors
    ///
    /// Returns an internal failure if the store cannot be read.
    fn count_occupants_matching(
        &self,
        group_id: i64,
        tracked: &TrackedValue,
    ) -> Result<usize, EngineError> {
        Ok(self
            .occupant_attributes(group_id)?
            .iter()
            .filter(|attributes| tracked.matches(attributes))
            .count())
    }

    /// Members placed in `group_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an internal failure if the store cannot be read.
    fn group_members(&self, group_id: i64) -> Result<Vec<GroupMember>, EngineError>;

    /// Whether `member_identifier` already joined grouping session `session_id`.
    ///
    /// # Errors
    ///
    /// Returns an internal failure if the store cannot be read.
    fn has_group_member(&self, session_id: i64, member_identifier: &str)
    -> Result<bool, EngineError>;

    /// Every member of a selection session's pool, selected or not.
    ///
    /// # Errors
    ///
    /// Returns an internal failure if the store cannot be read.
    fn pool(&self, session_id: i64) -> Result<Vec<PoolMember>, EngineError>;

    /// Members of the pool whose `selected` flag is set.
    ///
    /// # Errors
    ///
    /// Returns an internal failure if the store cannot be read.
    fn selected(&self, session_id: i64) -> Result<Vec<PoolMember>, EngineError> {
        Ok(self
            .pool(session_id)?
            .into_iter()
            .filter(|member| member.selected)
            .collect())
    }

    /// Whether `member_identifier` already joined selection session `session_id`.
    ///
    /// # Errors
    ///
    /// Returns an internal failure if the store cannot be read.
    fn has_pool_member(&self, session_id: i64, member_identifier: &str)
    -> Result<bool, EngineError>;

    /// Selected members joined with their selection log entries.
    ///
    /// # Errors
    ///
    /// Returns an internal failure if the store cannot be read.
    fn selection_details(&self, session_id: i64)
    -> Result<Vec<MemberSelectionDetail>, EngineError>;
}

/// Write side used by the engines after all validation has passed.
pub trait SessionStore: SessionResolver {
    /// Persist a member into `group`, returning the new member id.
    ///
    /// # Errors
    ///
    /// Returns an internal failure if the write fails.
    fn insert_group_member(
        &self,
        group: &Group,
        member_identifier: &str,
        attributes: &Attributes,
        joined_at: DateTime<Utc>,
    ) -> Result<i64, EngineError>;

    /// Persist a member into a selection pool, returning the new member id.
    ///
    /// # Errors
    ///
    /// Returns an internal failure if the write fails.
    fn insert_pool_member(
        &self,
        session_id: i64,
        member_identifier: &str,
        attributes: &Attributes,
        joined_at: DateTime<Utc>,
    ) -> Result<i64, EngineError>;

    /// Write a selection log entry and flip the member's `selected` flag.
    ///
    /// # Errors
    ///
    /// Returns an internal failure if the write fails.
    fn record_selection(
        &self,
        session_id: i64,
        member_id: i64,
        selection_type: SelectionType,
        selected_at: DateTime<Utc>,
    ) -> Result<(), EngineError>;

    /// Reset every `selected` flag and delete every log entry of the session.
    /// Returns how many members were deselected.
    ///
    /// # Errors
    ///
    /// Returns an internal failure if the write fails.
    fn clear_selections(&self, session_id: i64) -> Result<usize, EngineError>;
}
