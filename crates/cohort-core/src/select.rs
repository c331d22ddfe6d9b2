//! Quota-based selection over a session's member pool.
//!
//! A selection run tops the session up to exactly `requested_count` selected
//! members. If the host names a preferred `field=value`, matching members are
//! drawn first, up to the cap of the rule whose key equals the preferred
//! value. The remainder is drawn uniformly from everyone else.
//!
//! The preferential cap is soft: when the non-matching members cannot fill
//! the remainder, matching members top it up and a warning is logged.

use crate::error::EngineError;
use crate::matcher::eq_ignore_case;
use crate::model::{
    Attributes, MemberSelectionDetail, PoolMember, Preference, Rule, SelectionType,
    normalize_identifier,
};
use crate::resolver::{SessionResolver, SessionStore};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// A host's request to select members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRequest {
    /// Total number of members that should be selected after this run.
    pub requested_count: usize,
    #[serde(default)]
    pub preference: Option<Preference>,
}

/// Outcome of a selection run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionResult {
    pub selected_count: usize,
    /// Members newly drawn through the preference.
    pub preferential_count: usize,
    /// Members newly drawn at random plus everyone selected before this run.
    pub random_count: usize,
    /// Every selected member: earlier selections first, then this run's.
    pub member_identifiers: Vec<String>,
}

/// Result of joining a selection pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolJoinOutcome {
    pub session_id: i64,
    pub session_name: String,
    pub member_id: i64,
    pub member_identifier: String,
    pub identifier_label: String,
}

/// Add a member to the pool of the selection session behind `code`.
///
/// # Errors
///
/// Code errors, [`EngineError::InvalidRequest`] for a blank identifier,
/// [`EngineError::AlreadyJoined`] for a repeat identifier, or an internal
/// failure.
pub fn join_pool<S: SessionStore + ?Sized>(
    store: &S,
    code: &str,
    member_identifier: &str,
    attributes: &Attributes,
    now: DateTime<Utc>,
) -> Result<PoolJoinOutcome, EngineError> {
    let member_identifier = normalize_identifier(member_identifier)?;
    let session = store.selection_session(code, now)?;

    if store.has_pool_member(session.session_id, member_identifier)? {
        return Err(EngineError::AlreadyJoined {
            member_identifier: member_identifier.to_string(),
        });
    }

    let member_id = store.insert_pool_member(session.session_id, member_identifier, attributes, now)?;
    info!(
        session_id = session.session_id,
        member = member_identifier,
        "member joined pool"
    );

    Ok(PoolJoinOutcome {
        session_id: session.session_id,
        session_name: session.name,
        member_id,
        member_identifier: member_identifier.to_string(),
        identifier_label: session.identifier_label,
    })
}

/// Select members until exactly `request.requested_count` are selected.
///
/// # Errors
///
/// - code errors when `code` does not lead to an active selection session
/// - [`EngineError::Unauthorized`] when `host_id` does not own it
/// - [`EngineError::InvalidRequest`] for a blank preference
/// - [`EngineError::AlreadyAtOrAboveRequestedCount`] when the current
///   selection already meets `requested_count`, a count of zero included
/// - [`EngineError::InsufficientPool`] when too few unselected members remain
/// - an internal failure if the store cannot be read or written
///
/// No write happens unless the whole run succeeds.
pub fn select_members<S, R>(
    store: &S,
    code: &str,
    host_id: &str,
    request: &SelectionRequest,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<SelectionResult, EngineError>
where
    S: SessionStore + ?Sized,
    R: Rng + ?Sized,
{
    let session = store.selection_session(code, now)?;
    session.code.authorize(host_id)?;

    let requested = request.requested_count;
    if let Some(preference) = &request.preference {
        if preference.field.trim().is_empty() || preference.value.trim().is_empty() {
            return Err(EngineError::invalid(
                "preference field and value must not be empty",
            ));
        }
    }

    let (already, unselected): (Vec<PoolMember>, Vec<PoolMember>) = store
        .pool(session.session_id)?
        .into_iter()
        .partition(|member| member.selected);

    if already.len() >= requested {
        return Err(EngineError::AlreadyAtOrAboveRequestedCount {
            already_selected: already.len(),
            requested,
        });
    }
    let mut remaining = requested - already.len();
    if unselected.len() < remaining {
        return Err(EngineError::InsufficientPool {
            needed: remaining,
            available: unselected.len(),
        });
    }

    let preference = request.preference.as_ref();
    let capping_rule = preference.and_then(|p| rule_for_preference(&session.rules, p));

    let mut preferential: Vec<&PoolMember> = Vec::new();
    let mut cap_reached = false;
    if let Some(preference) = preference {
        let already_matching = already
            .iter()
            .filter(|member| preference.matches(&member.attributes))
            .count();
        let quota = capping_rule
            .map_or(remaining, |rule| rule.cap.min(remaining))
            .saturating_sub(already_matching);

        preferential = unselected
            .iter()
            .filter(|member| preference.matches(&member.attributes))
            .collect();
        preferential.shuffle(rng);
        preferential.truncate(quota);
        remaining -= preferential.len();

        cap_reached =
            capping_rule.is_some_and(|rule| already_matching + preferential.len() >= rule.cap);
        debug!(
            session_id = session.session_id,
            field = %preference.field,
            value = %preference.value,
            already_matching,
            quota,
            drawn = preferential.len(),
            cap_reached,
            "preferential phase"
        );
    }

    let taken: HashSet<i64> = preferential.iter().map(|m| m.member_id).collect();
    let (mut primary, mut reserve): (Vec<&PoolMember>, Vec<&PoolMember>) = unselected
        .iter()
        .filter(|member| !taken.contains(&member.member_id))
        .partition(|member| {
            !(cap_reached && preference.is_some_and(|p| p.matches(&member.attributes)))
        });

    primary.shuffle(rng);
    let mut random: Vec<&PoolMember> = primary.into_iter().take(remaining).collect();
    if random.len() < remaining {
        let shortfall = remaining - random.len();
        reserve.shuffle(rng);
        random.extend(reserve.into_iter().take(shortfall));
        warn!(
            session_id = session.session_id,
            shortfall,
            cap = ?capping_rule.map(|rule| rule.cap),
            "preferential cap exceeded to fill the requested count"
        );
    }

    for member in &preferential {
        store.record_selection(
            session.session_id,
            member.member_id,
            SelectionType::Preferential,
            now,
        )?;
    }
    for member in &random {
        store.record_selection(session.session_id, member.member_id, SelectionType::Random, now)?;
    }

    let member_identifiers: Vec<String> = already
        .iter()
        .chain(preferential.iter().copied())
        .chain(random.iter().copied())
        .map(|member| member.member_identifier.clone())
        .collect();

    let result = SelectionResult {
        selected_count: member_identifiers.len(),
        preferential_count: preferential.len(),
        random_count: random.len() + already.len(),
        member_identifiers,
    };
    info!(
        session_id = session.session_id,
        selected = result.selected_count,
        preferential = result.preferential_count,
        random = result.random_count,
        "selection committed"
    );
    Ok(result)
}

/// Selected members with how and when they were picked.
///
/// # Errors
///
/// Code errors, [`EngineError::Unauthorized`], or an internal failure.
pub fn list_selected<S: SessionResolver + ?Sized>(
    store: &S,
    code: &str,
    host_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<MemberSelectionDetail>, EngineError> {
    let session = store.selection_session(code, now)?;
    session.code.authorize(host_id)?;
    store.selection_details(session.session_id)
}

/// Deselect everyone and drop the selection history. Returns how many
/// members were deselected.
///
/// # Errors
///
/// Code errors, [`EngineError::Unauthorized`], or an internal failure.
pub fn clear_selections<S: SessionStore + ?Sized>(
    store: &S,
    code: &str,
    host_id: &str,
    now: DateTime<Utc>,
) -> Result<usize, EngineError> {
    let session = store.selection_session(code, now)?;
    session.code.authorize(host_id)?;
    let cleared = store.clear_selections(session.session_id)?;
    info!(session_id = session.session_id, cleared, "selections cleared");
    Ok(cleared)
}

/// The first rule whose key names the preferred value.
fn rule_for_preference<'r>(rules: &'r [Rule], preference: &Preference) -> Option<&'r Rule> {
    rules
        .iter()
        .find(|rule| eq_ignore_case(rule.target.key(), &preference.value))
}
