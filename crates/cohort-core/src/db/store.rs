//! SQLite-backed session store.
//!
//! [`SqliteStore`] borrows a connection (usually a transaction deref'd to
//! `&Connection`) and implements both [`SessionResolver`] and
//! [`SessionStore`]. It never begins or commits transactions itself; the
//! engine owns transaction scope so a whole join or selection commits once.
//!
//! Attribute maps are persisted as JSON objects in `attributes_json`.

use super::{from_us, to_us};
use crate::error::EngineError;
use crate::model::{
    AccessCode, Attributes, CodeStatus, Group, GroupMember, GroupingSession,
    MemberSelectionDetail, PoolMember, Rule, SelectionSession, SelectionType,
};
use crate::resolver::{SessionResolver, SessionStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params, types::Type};
use std::str::FromStr;

/// Store view over one connection or transaction.
pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    #[must_use]
    pub const fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    #[must_use]
    pub const fn connection(&self) -> &'c Connection {
        self.conn
    }

    // -----------------------------------------------------------------------
    // Access codes
    // -----------------------------------------------------------------------

    /// Look up an access code regardless of status or expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored row is malformed.
    pub fn access_code(&self, code: &str) -> Result<Option<AccessCode>> {
        self.conn
            .query_row(
                "SELECT code_id, code, host_id, status, created_at_us, expires_at_us \
                 FROM access_codes WHERE code = ?1",
                params![code],
                row_to_access_code,
            )
            .optional()
            .with_context(|| format!("look up access code '{code}'"))
    }

    /// Whether `code` is already taken by any access code, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn code_exists(&self, code: &str) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM access_codes WHERE code = ?1)",
                params![code],
                |row| row.get(0),
            )
            .context("check access code uniqueness")
    }

    /// Insert a new active access code.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails (including a duplicate code).
    pub fn insert_access_code(
        &self,
        code: &str,
        host_id: &str,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<AccessCode> {
        self.conn
            .execute(
                "INSERT INTO access_codes (code, host_id, status, created_at_us, expires_at_us) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    code,
                    host_id,
                    CodeStatus::Active.as_str(),
                    to_us(created_at),
                    to_us(expires_at)
                ],
            )
            .with_context(|| format!("insert access code '{code}'"))?;

        Ok(AccessCode {
            code_id: self.conn.last_insert_rowid(),
            code: code.to_string(),
            host_id: host_id.to_string(),
            status: CodeStatus::Active,
            created_at,
            expires_at,
        })
    }

    /// Flip every active code whose expiry has passed to `expired`.
    ///
    /// Returns how many codes changed status.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn expire_stale_codes(&self, now: DateTime<Utc>) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE access_codes SET status = 'expired' \
                 WHERE status = 'active' AND expires_at_us <= ?1",
                params![to_us(now)],
            )
            .context("expire stale access codes")
    }

    fn usable_code(&self, code: &str, now: DateTime<Utc>) -> Result<AccessCode, EngineError> {
        match self.access_code(code)? {
            Some(access) if access.is_usable_at(now) => Ok(access),
            _ => Err(EngineError::InvalidOrExpiredCode {
                code: code.to_string(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Grouping provisioning
    // -----------------------------------------------------------------------

    /// Insert a grouping session row bound to `code_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn insert_grouping_session(
        &self,
        code_id: i64,
        name: &str,
        max_group_size: usize,
        reveal_immediately: bool,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO grouping_sessions \
                 (code_id, name, max_group_size, reveal_immediately, created_at_us) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    code_id,
                    name,
                    to_i64(max_group_size)?,
                    i64::from(reveal_immediately),
                    to_us(created_at)
                ],
            )
            .with_context(|| format!("insert grouping session '{name}'"))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert one named group.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails (including a duplicate name).
    pub fn insert_group(&self, session_id: i64, name: &str) -> Result<Group> {
        self.conn
            .execute(
                "INSERT INTO session_groups (session_id, name) VALUES (?1, ?2)",
                params![session_id, name],
            )
            .with_context(|| format!("insert group '{name}'"))?;
        Ok(Group {
            group_id: self.conn.last_insert_rowid(),
            session_id,
            name: name.to_string(),
        })
    }

    /// Insert declared fields for a grouping session, keeping their order.
    ///
    /// # Errors
    ///
    /// Returns an error if an insert fails.
    pub fn insert_grouping_fields(&self, session_id: i64, fields: &[String]) -> Result<()> {
        insert_fields(self.conn, "grouping_fields", session_id, fields)
    }

    /// Insert one grouping rule (`max_per_group` cap).
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn insert_grouping_rule(&self, session_id: i64, field_key: &str, cap: usize) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO grouping_rules (session_id, field_key, max_per_group) \
                 VALUES (?1, ?2, ?3)",
                params![session_id, field_key, to_i64(cap)?],
            )
            .with_context(|| format!("insert grouping rule '{field_key}'"))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Selection provisioning
    // -----------------------------------------------------------------------

    /// Insert a selection session row bound to `code_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn insert_selection_session(
        &self,
        code_id: i64,
        name: &str,
        description: Option<&str>,
        identifier_label: &str,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO selection_sessions \
                 (code_id, name, description, identifier_label, created_at_us) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    code_id,
                    name,
                    description,
                    identifier_label,
                    to_us(created_at)
                ],
            )
            .with_context(|| format!("insert selection session '{name}'"))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert declared fields for a selection session, keeping their order.
    ///
    /// # Errors
    ///
    /// Returns an error if an insert fails.
    pub fn insert_selection_fields(&self, session_id: i64, fields: &[String]) -> Result<()> {
        insert_fields(self.conn, "selection_fields", session_id, fields)
    }

    /// Insert one selection rule (`preference_max_selection` cap).
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn insert_selection_rule(
        &self,
        session_id: i64,
        field_key: &str,
        cap: usize,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO selection_rules (session_id, field_key, preference_max_selection) \
                 VALUES (?1, ?2, ?3)",
                params![session_id, field_key, to_i64(cap)?],
            )
            .with_context(|| format!("insert selection rule '{field_key}'"))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Shared loaders
    // -----------------------------------------------------------------------

    fn fields(&self, table: &str, session_id: i64) -> Result<Vec<String>> {
        let sql =
            format!("SELECT field_key FROM {table} WHERE session_id = ?1 ORDER BY position");
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("prepare {table} query"))?;
        let rows = stmt
            .query_map(params![session_id], |row| row.get(0))
            .with_context(|| format!("query {table}"))?;
        rows.collect::<rusqlite::Result<Vec<String>>>()
            .with_context(|| format!("read {table}"))
    }

    fn rules(&self, sql: &str, session_id: i64, fields: &[String]) -> Result<Vec<Rule>> {
        let mut stmt = self.conn.prepare(sql).context("prepare rules query")?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                let field_key: String = row.get(0)?;
                let cap = to_usize(1, row.get(1)?)?;
                Ok((field_key, cap))
            })
            .context("query rules")?;

        let mut rules = Vec::new();
        for row in rows {
            let (field_key, cap) = row.context("read rule row")?;
            rules.push(Rule::resolve(&field_key, cap, fields));
        }
        Ok(rules)
    }
}

impl SessionResolver for SqliteStore<'_> {
    fn grouping_session(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<GroupingSession, EngineError> {
        let access = self.usable_code(code, now)?;

        let row = self
            .conn
            .query_row(
                "SELECT session_id, name, max_group_size, reveal_immediately, created_at_us \
                 FROM grouping_sessions WHERE code_id = ?1",
                params![access.code_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        to_usize(2, row.get(2)?)?,
                        row.get::<_, i64>(3)? != 0,
                        from_us(4, row.get(4)?)?,
                    ))
                },
            )
            .optional()
            .context("load grouping session")?;

        let Some((session_id, name, max_group_size, reveal_immediately, created_at)) = row else {
            return Err(EngineError::SessionNotFound {
                code: code.to_string(),
                kind: "grouping",
            });
        };

        let fields = self.fields("grouping_fields", session_id)?;
        let rules = self.rules(
            "SELECT field_key, max_per_group FROM grouping_rules \
             WHERE session_id = ?1 ORDER BY rule_id",
            session_id,
            &fields,
        )?;

        Ok(GroupingSession {
            session_id,
            name,
            code: access,
            max_group_size,
            reveal_immediately,
            fields,
            rules,
            created_at,
        })
    }

    fn selection_session(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<SelectionSession, EngineError> {
        let access = self.usable_code(code, now)?;

        let row = self
            .conn
            .query_row(
                "SELECT session_id, name, description, identifier_label, created_at_us \
                 FROM selection_sessions WHERE code_id = ?1",
                params![access.code_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        from_us(4, row.get(4)?)?,
                    ))
                },
            )
            .optional()
            .context("load selection session")?;

        let Some((session_id, name, description, identifier_label, created_at)) = row else {
            return Err(EngineError::SessionNotFound {
                code: code.to_string(),
                kind: "selection",
            });
        };

        let fields = self.fields("selection_fields", session_id)?;
        let rules = self.rules(
            "SELECT field_key, preference_max_selection FROM selection_rules \
             WHERE session_id = ?1 ORDER BY rule_id",
            session_id,
            &fields,
        )?;

        Ok(SelectionSession {
            session_id,
            name,
            description,
            code: access,
            identifier_label,
            fields,
            rules,
            created_at,
        })
    }

    fn groups(&self, session_id: i64) -> Result<Vec<Group>, EngineError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT group_id, session_id, name FROM session_groups \
                 WHERE session_id = ?1 ORDER BY group_id",
            )
            .context("prepare groups query")?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok(Group {
                    group_id: row.get(0)?,
                    session_id: row.get(1)?,
                    name: row.get(2)?,
                })
            })
            .context("query groups")?;
        let groups = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read groups")?;
        Ok(groups)
    }

    fn count_occupants(&self, group_id: i64) -> Result<usize, EngineError> {
        let count = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM group_members WHERE group_id = ?1",
                params![group_id],
                |row| to_usize(0, row.get(0)?),
            )
            .with_context(|| format!("count occupants of group {group_id}"))?;
        Ok(count)
    }

    fn occupant_attributes(&self, group_id: i64) -> Result<Vec<Attributes>, EngineError> {
        let mut stmt = self
            .conn
            .prepare("SELECT attributes_json FROM group_members WHERE group_id = ?1")
            .context("prepare occupant attributes query")?;
        let rows = stmt
            .query_map(params![group_id], |row| {
                let raw: String = row.get(0)?;
                decode_attributes(0, &raw)
            })
            .context("query occupant attributes")?;
        let attributes = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read occupant attributes")?;
        Ok(attributes)
    }

    fn group_members(&self, group_id: i64) -> Result<Vec<GroupMember>, EngineError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT member_id, member_identifier, group_id, attributes_json, joined_at_us \
                 FROM group_members WHERE group_id = ?1 \
                 ORDER BY joined_at_us, member_id",
            )
            .context("prepare group members query")?;
        let rows = stmt
            .query_map(params![group_id], |row| {
                let raw: String = row.get(3)?;
                Ok(GroupMember {
                    member_id: row.get(0)?,
                    member_identifier: row.get(1)?,
                    group_id: row.get(2)?,
                    attributes: decode_attributes(3, &raw)?,
                    joined_at: from_us(4, row.get(4)?)?,
                })
            })
            .context("query group members")?;
        let members = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read group members")?;
        Ok(members)
    }

    fn has_group_member(
        &self,
        session_id: i64,
        member_identifier: &str,
    ) -> Result<bool, EngineError> {
        let exists = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM group_members \
                 WHERE session_id = ?1 AND member_identifier = ?2)",
                params![session_id, member_identifier],
                |row| row.get(0),
            )
            .context("check group membership")?;
        Ok(exists)
    }

    fn pool(&self, session_id: i64) -> Result<Vec<PoolMember>, EngineError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT member_id, member_identifier, attributes_json, selected, joined_at_us \
                 FROM selection_members WHERE session_id = ?1 ORDER BY member_id",
            )
            .context("prepare pool query")?;
        let rows = stmt
            .query_map(params![session_id], row_to_pool_member)
            .context("query pool")?;
        let pool = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read pool")?;
        Ok(pool)
    }

    fn selected(&self, session_id: i64) -> Result<Vec<PoolMember>, EngineError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT member_id, member_identifier, attributes_json, selected, joined_at_us \
                 FROM selection_members WHERE session_id = ?1 AND selected = 1 \
                 ORDER BY member_id",
            )
            .context("prepare selected query")?;
        let rows = stmt
            .query_map(params![session_id], row_to_pool_member)
            .context("query selected members")?;
        let selected = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read selected members")?;
        Ok(selected)
    }

    fn has_pool_member(
        &self,
        session_id: i64,
        member_identifier: &str,
    ) -> Result<bool, EngineError> {
        let exists = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM selection_members \
                 WHERE session_id = ?1 AND member_identifier = ?2)",
                params![session_id, member_identifier],
                |row| row.get(0),
            )
            .context("check pool membership")?;
        Ok(exists)
    }

    fn selection_details(
        &self,
        session_id: i64,
    ) -> Result<Vec<MemberSelectionDetail>, EngineError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT m.member_id, m.member_identifier, m.attributes_json, \
                        l.selection_type, l.selected_at_us \
                 FROM selection_logs l \
                 JOIN selection_members m ON m.member_id = l.member_id \
                 WHERE l.session_id = ?1 AND m.selected = 1 \
                 ORDER BY l.selected_at_us, l.log_id",
            )
            .context("prepare selection details query")?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                let raw: String = row.get(2)?;
                let kind: String = row.get(3)?;
                Ok(MemberSelectionDetail {
                    member_id: row.get(0)?,
                    member_identifier: row.get(1)?,
                    attributes: decode_attributes(2, &raw)?,
                    selection_type: parse_column(3, &kind)?,
                    selected_at: from_us(4, row.get(4)?)?,
                })
            })
            .context("query selection details")?;
        let details = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read selection details")?;
        Ok(details)
    }
}

impl SessionStore for SqliteStore<'_> {
    fn insert_group_member(
        &self,
        group: &Group,
        member_identifier: &str,
        attributes: &Attributes,
        joined_at: DateTime<Utc>,
    ) -> Result<i64, EngineError> {
        let json = serde_json::to_string(attributes)?;
        let inserted = self.conn.execute(
            "INSERT INTO group_members \
             (session_id, group_id, member_identifier, attributes_json, joined_at_us) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                group.session_id,
                group.group_id,
                member_identifier,
                json,
                to_us(joined_at)
            ],
        );
        map_member_insert(inserted, member_identifier, "insert group member")?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_pool_member(
        &self,
        session_id: i64,
        member_identifier: &str,
        attributes: &Attributes,
        joined_at: DateTime<Utc>,
    ) -> Result<i64, EngineError> {
        let json = serde_json::to_string(attributes)?;
        let inserted = self.conn.execute(
            "INSERT INTO selection_members \
             (session_id, member_identifier, attributes_json, selected, joined_at_us) \
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![session_id, member_identifier, json, to_us(joined_at)],
        );
        map_member_insert(inserted, member_identifier, "insert pool member")?;
        Ok(self.conn.last_insert_rowid())
    }

    fn record_selection(
        &self,
        session_id: i64,
        member_id: i64,
        selection_type: SelectionType,
        selected_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let flipped = self
            .conn
            .execute(
                "UPDATE selection_members SET selected = 1 \
                 WHERE member_id = ?1 AND session_id = ?2 AND selected = 0",
                params![member_id, session_id],
            )
            .context("flag selected member")?;
        if flipped != 1 {
            return Err(EngineError::Internal(anyhow::anyhow!(
                "member {member_id} is not an unselected member of session {session_id}"
            )));
        }

        self.conn
            .execute(
                "INSERT INTO selection_logs (session_id, member_id, selection_type, selected_at_us) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    session_id,
                    member_id,
                    selection_type.as_str(),
                    to_us(selected_at)
                ],
            )
            .context("insert selection log")?;
        Ok(())
    }

    fn clear_selections(&self, session_id: i64) -> Result<usize, EngineError> {
        let cleared = self
            .conn
            .execute(
                "UPDATE selection_members SET selected = 0 \
                 WHERE session_id = ?1 AND selected = 1",
                params![session_id],
            )
            .context("reset selected flags")?;
        self.conn
            .execute(
                "DELETE FROM selection_logs WHERE session_id = ?1",
                params![session_id],
            )
            .context("delete selection logs")?;
        Ok(cleared)
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn insert_fields(conn: &Connection, table: &str, session_id: i64, fields: &[String]) -> Result<()> {
    let sql = format!("INSERT INTO {table} (session_id, field_key, position) VALUES (?1, ?2, ?3)");
    let mut stmt = conn
        .prepare(&sql)
        .with_context(|| format!("prepare {table} insert"))?;
    for (position, field) in fields.iter().enumerate() {
        stmt.execute(params![session_id, field, to_i64(position)?])
            .with_context(|| format!("insert field '{field}' into {table}"))?;
    }
    Ok(())
}

fn row_to_access_code(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccessCode> {
    let status: String = row.get(3)?;
    Ok(AccessCode {
        code_id: row.get(0)?,
        code: row.get(1)?,
        host_id: row.get(2)?,
        status: parse_column(3, &status)?,
        created_at: from_us(4, row.get(4)?)?,
        expires_at: from_us(5, row.get(5)?)?,
    })
}

fn row_to_pool_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<PoolMember> {
    let raw: String = row.get(2)?;
    Ok(PoolMember {
        member_id: row.get(0)?,
        member_identifier: row.get(1)?,
        attributes: decode_attributes(2, &raw)?,
        selected: row.get::<_, i64>(3)? != 0,
        joined_at: from_us(4, row.get(4)?)?,
    })
}

fn decode_attributes(idx: usize, raw: &str) -> rusqlite::Result<Attributes> {
    serde_json::from_str(raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn parse_column<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = anyhow::Error>,
{
    raw.parse()
        .map_err(|err: anyhow::Error| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into()))
}

fn to_usize(idx: usize, value: i64) -> rusqlite::Result<usize> {
    usize::try_from(value).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(err))
    })
}

fn to_i64(value: usize) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("value {value} does not fit in an i64 column"))
}

/// A UNIQUE violation on `(session_id, member_identifier)` is a duplicate
/// join that slipped past the pre-check; everything else is internal.
fn map_member_insert(
    result: rusqlite::Result<usize>,
    member_identifier: &str,
    what: &'static str,
) -> Result<(), EngineError> {
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Err(EngineError::AlreadyJoined {
                member_identifier: member_identifier.to_string(),
            })
        }
        Err(err) => Err(EngineError::Internal(anyhow::Error::new(err).context(what))),
    }
}
