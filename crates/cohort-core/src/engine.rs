//! The engine facade: one owned connection, one transaction per request.
//!
//! Writes run inside `BEGIN IMMEDIATE` so the write lock is held before any
//! occupancy count is read; two concurrent joins can never both observe the
//! same free slot. A request that hits `SQLITE_BUSY` is replayed from the
//! start with exponential backoff, up to `busy_retries` times.

use crate::allocate::{self, JoinOutcome, Roster};
use crate::config::EngineConfig;
use crate::db::{self, store::SqliteStore};
use crate::error::EngineError;
use crate::model::{Attributes, MemberSelectionDetail};
use crate::provision::{
    self, GroupingSessionRequest, ProvisionedSession, ResolvedCode, SelectionSessionRequest,
};
use crate::select::{self, PoolJoinOutcome, SelectionRequest, SelectionResult};
use anyhow::Context;
use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const INITIAL_BACKOFF: Duration = Duration::from_millis(25);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Allocation and selection engine over a SQLite store.
pub struct Engine {
    conn: Connection,
    config: EngineConfig,
}

impl Engine {
    /// Open (or create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path, config: EngineConfig) -> anyhow::Result<Self> {
        let conn = db::open_store(path, config.busy_timeout)?;
        Ok(Self { conn, config })
    }

    /// A private in-memory engine, mostly for tests and dry runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be migrated.
    pub fn open_in_memory(config: EngineConfig) -> anyhow::Result<Self> {
        let conn = db::open_in_memory()?;
        Ok(Self { conn, config })
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    // -----------------------------------------------------------------------
    // Provisioning
    // -----------------------------------------------------------------------

    /// # Errors
    ///
    /// See [`provision::create_grouping_session`].
    pub fn create_grouping_session(
        &self,
        request: &GroupingSessionRequest,
    ) -> Result<ProvisionedSession, EngineError> {
        self.create_grouping_session_with(request, Utc::now(), &mut rand::thread_rng())
    }

    /// # Errors
    ///
    /// See [`provision::create_grouping_session`].
    pub fn create_grouping_session_with<R: Rng + ?Sized>(
        &self,
        request: &GroupingSessionRequest,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<ProvisionedSession, EngineError> {
        self.write("create_grouping_session", |store| {
            provision::create_grouping_session(store, request, &self.config, now, rng)
        })
    }

    /// # Errors
    ///
    /// See [`provision::create_selection_session`].
    pub fn create_selection_session(
        &self,
        request: &SelectionSessionRequest,
    ) -> Result<ProvisionedSession, EngineError> {
        self.create_selection_session_with(request, Utc::now(), &mut rand::thread_rng())
    }

    /// # Errors
    ///
    /// See [`provision::create_selection_session`].
    pub fn create_selection_session_with<R: Rng + ?Sized>(
        &self,
        request: &SelectionSessionRequest,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<ProvisionedSession, EngineError> {
        self.write("create_selection_session", |store| {
            provision::create_selection_session(store, request, &self.config, now, rng)
        })
    }

    /// # Errors
    ///
    /// See [`provision::resolve_code`].
    pub fn resolve_code(&self, code: &str) -> Result<ResolvedCode, EngineError> {
        self.resolve_code_at(code, Utc::now())
    }

    /// # Errors
    ///
    /// See [`provision::resolve_code`].
    pub fn resolve_code_at(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolvedCode, EngineError> {
        self.read("resolve_code", |store| provision::resolve_code(store, code, now))
    }

    /// Mark every access code past its expiry as `expired`.
    ///
    /// # Errors
    ///
    /// Returns an internal failure if the update fails.
    pub fn expire_stale_codes(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        self.write("expire_stale_codes", |store| Ok(store.expire_stale_codes(now)?))
    }

    // -----------------------------------------------------------------------
    // Grouping
    // -----------------------------------------------------------------------

    /// # Errors
    ///
    /// See [`allocate::join_group`].
    pub fn join(
        &self,
        code: &str,
        member_identifier: &str,
        attributes: &Attributes,
    ) -> Result<JoinOutcome, EngineError> {
        self.join_with(
            code,
            member_identifier,
            attributes,
            Utc::now(),
            &mut rand::thread_rng(),
        )
    }

    /// # Errors
    ///
    /// See [`allocate::join_group`].
    pub fn join_with<R: Rng + ?Sized>(
        &self,
        code: &str,
        member_identifier: &str,
        attributes: &Attributes,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<JoinOutcome, EngineError> {
        self.write("join", |store| {
            allocate::join_group(store, code, member_identifier, attributes, now, rng)
        })
    }

    /// # Errors
    ///
    /// See [`allocate::roster`].
    pub fn roster(&self, code: &str, host_id: &str) -> Result<Roster, EngineError> {
        let now = Utc::now();
        self.read("roster", |store| allocate::roster(store, code, host_id, now))
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// # Errors
    ///
    /// See [`select::join_pool`].
    pub fn join_pool(
        &self,
        code: &str,
        member_identifier: &str,
        attributes: &Attributes,
    ) -> Result<PoolJoinOutcome, EngineError> {
        self.join_pool_at(code, member_identifier, attributes, Utc::now())
    }

    /// # Errors
    ///
    /// See [`select::join_pool`].
    pub fn join_pool_at(
        &self,
        code: &str,
        member_identifier: &str,
        attributes: &Attributes,
        now: DateTime<Utc>,
    ) -> Result<PoolJoinOutcome, EngineError> {
        self.write("join_pool", |store| {
            select::join_pool(store, code, member_identifier, attributes, now)
        })
    }

    /// # Errors
    ///
    /// See [`select::select_members`].
    pub fn select(
        &self,
        code: &str,
        host_id: &str,
        request: &SelectionRequest,
    ) -> Result<SelectionResult, EngineError> {
        self.select_with(code, host_id, request, Utc::now(), &mut rand::thread_rng())
    }

    /// # Errors
    ///
    /// See [`select::select_members`].
    pub fn select_with<R: Rng + ?Sized>(
        &self,
        code: &str,
        host_id: &str,
        request: &SelectionRequest,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<SelectionResult, EngineError> {
        self.write("select", |store| {
            select::select_members(store, code, host_id, request, now, rng)
        })
    }

    /// # Errors
    ///
    /// See [`select::list_selected`].
    pub fn list_selected(
        &self,
        code: &str,
        host_id: &str,
    ) -> Result<Vec<MemberSelectionDetail>, EngineError> {
        let now = Utc::now();
        self.read("list_selected", |store| {
            select::list_selected(store, code, host_id, now)
        })
    }

    /// # Errors
    ///
    /// See [`select::clear_selections`].
    pub fn clear_selections(&self, code: &str, host_id: &str) -> Result<usize, EngineError> {
        let now = Utc::now();
        self.write("clear_selections", |store| {
            select::clear_selections(store, code, host_id, now)
        })
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    fn write<T>(
        &self,
        operation: &'static str,
        f: impl FnMut(&SqliteStore<'_>) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        self.with_retry(operation, TransactionBehavior::Immediate, f)
    }

    fn read<T>(
        &self,
        operation: &'static str,
        f: impl FnMut(&SqliteStore<'_>) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        self.with_retry(operation, TransactionBehavior::Deferred, f)
    }

    fn with_retry<T>(
        &self,
        operation: &'static str,
        behavior: TransactionBehavior,
        mut f: impl FnMut(&SqliteStore<'_>) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut attempt = 0;
        let mut delay = INITIAL_BACKOFF;

        loop {
            match self.run_once(behavior, &mut f) {
                Err(err) if err.is_busy() && attempt < self.config.busy_retries => {
                    attempt += 1;
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis(),
                        "store busy, retrying"
                    );
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(MAX_BACKOFF);
                }
                result => return result,
            }
        }
    }

    /// Run `f` in one transaction; commit on success, roll back on any error.
    fn run_once<T>(
        &self,
        behavior: TransactionBehavior,
        f: &mut impl FnMut(&SqliteStore<'_>) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let tx = Transaction::new_unchecked(&self.conn, behavior).context("begin transaction")?;
        let value = f(&SqliteStore::new(&tx))?;
        tx.commit().context("commit transaction")?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Preference, RuleSpec, SessionKind};
    use rand::{SeedableRng, rngs::StdRng};
    use std::collections::BTreeMap;

    fn engine() -> Engine {
        Engine::open_in_memory(EngineConfig::default()).expect("engine")
    }

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn grouping(engine: &Engine, rng: &mut StdRng) -> ProvisionedSession {
        engine
            .create_grouping_session_with(
                &GroupingSessionRequest {
                    host_id: "host".into(),
                    name: "Pairs".into(),
                    group_names: vec!["A".into(), "B".into()],
                    max_group_size: 2,
                    fields: vec!["team".into()],
                    rules: vec![RuleSpec {
                        field_key: "team".into(),
                        cap: 1,
                    }],
                    reveal_immediately: true,
                    expiry_minutes: None,
                },
                Utc::now(),
                rng,
            )
            .expect("create grouping")
    }

    #[test]
    fn grouping_flow_end_to_end() {
        let engine = engine();
        let mut rng = StdRng::seed_from_u64(10);
        let session = grouping(&engine, &mut rng);

        for (ident, team) in [("m1", "x"), ("m2", "x"), ("m3", "y"), ("m4", "y")] {
            engine
                .join_with(
                    &session.code,
                    ident,
                    &attrs(&[("team", team)]),
                    Utc::now(),
                    &mut rng,
                )
                .expect("join");
        }
        assert!(matches!(
            engine.join(&session.code, "m5", &attrs(&[("team", "z")])),
            Err(EngineError::NoEligibleGroup)
        ));

        let roster = engine.roster(&session.code, "host").expect("roster");
        let by_group: BTreeMap<_, _> = roster
            .groups
            .iter()
            .map(|g| (g.group.name.clone(), g.members.len()))
            .collect();
        assert_eq!(by_group["A"], 2);
        assert_eq!(by_group["B"], 2);
    }

    #[test]
    fn failed_join_rolls_back() {
        let engine = engine();
        let mut rng = StdRng::seed_from_u64(1);
        let session = grouping(&engine, &mut rng);

        engine
            .join(&session.code, "m1", &attrs(&[]))
            .expect("first join");
        assert!(engine.join(&session.code, "m1", &attrs(&[])).is_err());

        let members: i64 = engine
            .connection()
            .query_row("SELECT COUNT(*) FROM group_members", [], |row| row.get(0))
            .expect("count");
        assert_eq!(members, 1);
    }

    #[test]
    fn selection_flow_end_to_end() {
        let engine = engine();
        let mut rng = StdRng::seed_from_u64(3);
        let session = engine
            .create_selection_session_with(
                &SelectionSessionRequest {
                    host_id: "host".into(),
                    name: "Raffle".into(),
                    description: None,
                    identifier_label: "Ticket".into(),
                    fields: vec!["gender".into()],
                    rules: vec![RuleSpec {
                        field_key: "female".into(),
                        cap: 3,
                    }],
                    expiry_minutes: None,
                },
                Utc::now(),
                &mut rng,
            )
            .expect("create selection");

        let resolved = engine.resolve_code(&session.code).expect("resolve");
        assert_eq!(resolved.kind, SessionKind::Selection);

        for i in 0..10 {
            let gender = if i < 4 { "female" } else { "male" };
            engine
                .join_pool(&session.code, &format!("s{i}"), &attrs(&[("gender", gender)]))
                .expect("join pool");
        }

        let request = SelectionRequest {
            requested_count: 5,
            preference: Some(Preference {
                field: "gender".into(),
                value: "female".into(),
            }),
        };
        let result = engine
            .select_with(&session.code, "host", &request, Utc::now(), &mut rng)
            .expect("select");
        assert_eq!(
            (result.selected_count, result.preferential_count, result.random_count),
            (5, 3, 2)
        );

        assert_eq!(engine.list_selected(&session.code, "host").expect("list").len(), 5);
        assert_eq!(engine.clear_selections(&session.code, "host").expect("clear"), 5);
        assert!(engine.list_selected(&session.code, "host").expect("list").is_empty());
    }

    #[test]
    fn expired_codes_are_flagged() {
        let engine = engine();
        let mut rng = StdRng::seed_from_u64(2);
        let session = grouping(&engine, &mut rng);

        let later = Utc::now() + chrono::Duration::days(2);
        assert_eq!(engine.expire_stale_codes(later).expect("expire"), 1);
        assert!(matches!(
            engine.resolve_code(&session.code),
            Err(EngineError::InvalidOrExpiredCode { .. })
        ));
    }
}
