//! Group allocation: place one joining member into an eligible group.
//!
//! The algorithm, per join:
//! 1. validate the code, the identifier, and that the member is new
//! 2. shuffle the session's groups uniformly
//! 3. drop groups that are full
//! 4. drop groups where the member would push a rule-tracked value past its cap
//! 5. pick uniformly among what remains and persist the membership
//!
//! Every read and the final write go through the same [`SessionStore`], which
//! the caller scopes to one immediate transaction.

use crate::capacity::{Assessment, CapacityTracker};
use crate::error::EngineError;
use crate::model::{Attributes, Group, GroupMember, normalize_identifier};
use crate::resolver::{SessionResolver, SessionStore};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, info};

/// What the joining member is told about their placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GroupAssignment {
    /// The session reveals groups immediately.
    Revealed { group_id: i64, group_name: String },
    /// The placement is recorded but only the host can see it for now.
    Hidden,
}

/// Result of a successful grouping join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinOutcome {
    pub session_id: i64,
    pub session_name: String,
    pub member_id: i64,
    pub member_identifier: String,
    pub assignment: GroupAssignment,
}

/// One group and its members, for the host's roster view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRoster {
    pub group: Group,
    pub members: Vec<GroupMember>,
}

/// Every group of a grouping session with its current members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Roster {
    pub session_id: i64,
    pub name: String,
    pub max_group_size: usize,
    pub groups: Vec<GroupRoster>,
}

impl Roster {
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.groups.iter().map(|g| g.members.len()).sum()
    }
}

/// Place `member_identifier` into one eligible group of the session behind
/// `code`.
///
/// # Errors
///
/// - [`EngineError::InvalidOrExpiredCode`] / [`EngineError::SessionNotFound`]
///   when the code does not lead to an active grouping session
/// - [`EngineError::InvalidRequest`] for a blank identifier
/// - [`EngineError::AlreadyJoined`] when the identifier is already placed
/// - [`EngineError::NoEligibleGroup`] when every group is full or blocked by
///   a rule
/// - an internal failure if the store cannot be read or written
pub fn join_group<S, R>(
    store: &S,
    code: &str,
    member_identifier: &str,
    attributes: &Attributes,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<JoinOutcome, EngineError>
where
    S: SessionStore + ?Sized,
    R: Rng + ?Sized,
{
    let member_identifier = normalize_identifier(member_identifier)?;
    let session = store.grouping_session(code, now)?;

    if store.has_group_member(session.session_id, member_identifier)? {
        return Err(EngineError::AlreadyJoined {
            member_identifier: member_identifier.to_string(),
        });
    }

    let mut candidates = store.groups(session.session_id)?;
    candidates.shuffle(rng);

    let tracker = CapacityTracker::new(store);
    let mut eligible = Vec::with_capacity(candidates.len());
    for group in candidates {
        match tracker.assess(&group, session.max_group_size, &session.rules, attributes)? {
            Assessment::Eligible => eligible.push(group),
            Assessment::Blocked(blocker) => {
                debug!(
                    session_id = session.session_id,
                    group = %group.name,
                    ?blocker,
                    "group excluded"
                );
            }
        }
    }

    let Some(group) = eligible.choose(rng) else {
        info!(
            session_id = session.session_id,
            member = member_identifier,
            "no eligible group"
        );
        return Err(EngineError::NoEligibleGroup);
    };

    let member_id = store.insert_group_member(group, member_identifier, attributes, now)?;
    info!(
        session_id = session.session_id,
        member = member_identifier,
        group = %group.name,
        eligible = eligible.len(),
        "member placed"
    );

    let assignment = if session.reveal_immediately {
        GroupAssignment::Revealed {
            group_id: group.group_id,
            group_name: group.name.clone(),
        }
    } else {
        GroupAssignment::Hidden
    };

    Ok(JoinOutcome {
        session_id: session.session_id,
        session_name: session.name,
        member_id,
        member_identifier: member_identifier.to_string(),
        assignment,
    })
}

/// Host view of every group and its members.
///
/// # Errors
///
/// Code errors as for [`join_group`]; [`EngineError::Unauthorized`] when
/// `host_id` does not own the session.
pub fn roster<S: SessionResolver + ?Sized>(
    store: &S,
    code: &str,
    host_id: &str,
    now: DateTime<Utc>,
) -> Result<Roster, EngineError> {
    let session = store.grouping_session(code, now)?;
    session.code.authorize(host_id)?;

    let groups = store
        .groups(session.session_id)?
        .into_iter()
        .map(|group| {
            let members = store.group_members(group.group_id)?;
            Ok(GroupRoster { group, members })
        })
        .collect::<Result<Vec<_>, EngineError>>()?;

    Ok(Roster {
        session_id: session.session_id,
        name: session.name,
        max_group_size: session.max_group_size,
        groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::SqliteStore;
    use crate::db::testing::{FIXTURE_CODE, FIXTURE_HOST, attrs, grouping_fixture};
    use rand::{SeedableRng, rngs::StdRng};
    use std::collections::BTreeMap;

    fn placements(store: &SqliteStore<'_>, groups: &[Group]) -> BTreeMap<String, Vec<String>> {
        groups
            .iter()
            .map(|group| {
                let members = store
                    .group_members(group.group_id)
                    .expect("members")
                    .into_iter()
                    .map(|m| m.member_identifier)
                    .collect();
                (group.name.clone(), members)
            })
            .collect()
    }

    #[test]
    fn team_rule_spreads_teammates_across_groups() {
        for seed in 0..20 {
            let fixture = grouping_fixture(&["A", "B"], 2, &["team"], &[("team", 1)]);
            let store = SqliteStore::new(&fixture.conn);
            let mut rng = StdRng::seed_from_u64(seed);
            let now = Utc::now();

            for (ident, team) in [("m1", "x"), ("m2", "x"), ("m3", "y"), ("m4", "y")] {
                join_group(&store, FIXTURE_CODE, ident, &attrs(&[("team", team)]), now, &mut rng)
                    .expect("every member fits");
            }

            for group in &fixture.groups {
                let members = store.group_members(group.group_id).expect("members");
                assert_eq!(members.len(), 2, "seed {seed}");
                let mut teams: Vec<_> = members.iter().map(|m| m.attributes["team"].clone()).collect();
                teams.sort();
                assert_eq!(teams, ["x", "y"], "seed {seed}");
            }
        }
    }

    #[test]
    fn fifth_member_finds_no_group() {
        let fixture = grouping_fixture(&["A", "B"], 2, &[], &[]);
        let store = SqliteStore::new(&fixture.conn);
        let mut rng = StdRng::seed_from_u64(5);
        let now = Utc::now();

        for ident in ["m1", "m2", "m3", "m4"] {
            join_group(&store, FIXTURE_CODE, ident, &attrs(&[]), now, &mut rng).expect("fits");
        }
        let err = join_group(&store, FIXTURE_CODE, "m5", &attrs(&[]), now, &mut rng)
            .expect_err("all full");
        assert!(matches!(err, EngineError::NoEligibleGroup));
        assert_eq!(
            err.to_string(),
            "all groups are either full or would violate preferential grouping rules"
        );
    }

    #[test]
    fn value_rule_matches_case_insensitively_in_any_field() {
        let fixture = grouping_fixture(&["A"], 5, &["name"], &[("female", 1)]);
        let store = SqliteStore::new(&fixture.conn);
        let mut rng = StdRng::seed_from_u64(9);
        let now = Utc::now();

        join_group(&store, FIXTURE_CODE, "m1", &attrs(&[("gender", "Female")]), now, &mut rng)
            .expect("first female fits");
        let err = join_group(&store, FIXTURE_CODE, "m2", &attrs(&[("gender", "FEMALE")]), now, &mut rng)
            .expect_err("cap of one female per group");
        assert!(matches!(err, EngineError::NoEligibleGroup));

        join_group(&store, FIXTURE_CODE, "m3", &attrs(&[("gender", "male")]), now, &mut rng)
            .expect("rule does not apply");
        join_group(&store, FIXTURE_CODE, "m4", &attrs(&[]), now, &mut rng)
            .expect("member without the value is unaffected");
    }

    #[test]
    fn duplicate_identifier_is_rejected_before_placement() {
        let fixture = grouping_fixture(&["A", "B"], 3, &[], &[]);
        let store = SqliteStore::new(&fixture.conn);
        let mut rng = StdRng::seed_from_u64(1);
        let now = Utc::now();

        join_group(&store, FIXTURE_CODE, "s-1", &attrs(&[]), now, &mut rng).expect("first join");
        let err = join_group(&store, FIXTURE_CODE, "  s-1 ", &attrs(&[]), now, &mut rng)
            .expect_err("duplicate");
        assert!(matches!(err, EngineError::AlreadyJoined { .. }));

        let total: usize = placements(&store, &fixture.groups).values().map(Vec::len).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn blank_identifier_and_bad_code_are_validation_errors() {
        let fixture = grouping_fixture(&["A"], 3, &[], &[]);
        let store = SqliteStore::new(&fixture.conn);
        let mut rng = StdRng::seed_from_u64(1);
        let now = Utc::now();

        assert!(matches!(
            join_group(&store, FIXTURE_CODE, "   ", &attrs(&[]), now, &mut rng),
            Err(EngineError::InvalidRequest(_))
        ));
        assert!(matches!(
            join_group(&store, "nope", "m1", &attrs(&[]), now, &mut rng),
            Err(EngineError::InvalidOrExpiredCode { .. })
        ));
    }

    #[test]
    fn hidden_assignment_when_not_revealed() {
        let fixture = grouping_fixture(&["A"], 3, &[], &[]);
        fixture
            .conn
            .execute("UPDATE grouping_sessions SET reveal_immediately = 0", [])
            .expect("update");
        let store = SqliteStore::new(&fixture.conn);
        let mut rng = StdRng::seed_from_u64(1);

        let outcome = join_group(&store, FIXTURE_CODE, "m1", &attrs(&[]), Utc::now(), &mut rng)
            .expect("join");
        assert_eq!(outcome.assignment, GroupAssignment::Hidden);
    }

    #[test]
    fn revealed_assignment_names_the_group() {
        let fixture = grouping_fixture(&["Only"], 3, &[], &[]);
        let store = SqliteStore::new(&fixture.conn);
        let mut rng = StdRng::seed_from_u64(1);

        let outcome = join_group(&store, FIXTURE_CODE, "m1", &attrs(&[]), Utc::now(), &mut rng)
            .expect("join");
        assert_eq!(outcome.session_name, "Fixture");
        assert_eq!(outcome.member_identifier, "m1");
        assert_eq!(
            outcome.assignment,
            GroupAssignment::Revealed {
                group_id: fixture.groups[0].group_id,
                group_name: "Only".into(),
            }
        );
    }

    #[test]
    fn roster_is_host_only() {
        let fixture = grouping_fixture(&["A", "B"], 2, &[], &[]);
        let store = SqliteStore::new(&fixture.conn);
        let mut rng = StdRng::seed_from_u64(3);
        let now = Utc::now();
        for ident in ["m1", "m2", "m3"] {
            join_group(&store, FIXTURE_CODE, ident, &attrs(&[]), now, &mut rng).expect("join");
        }

        let roster = roster(&store, FIXTURE_CODE, FIXTURE_HOST, now).expect("owner");
        assert_eq!(roster.groups.len(), 2);
        assert_eq!(roster.member_count(), 3);

        assert!(matches!(
            super::roster(&store, FIXTURE_CODE, "intruder", now),
            Err(EngineError::Unauthorized { .. })
        ));
    }
}
