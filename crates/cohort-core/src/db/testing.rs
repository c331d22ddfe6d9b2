//! In-memory fixtures shared by unit tests.

use super::{open_in_memory, store::SqliteStore};
use crate::model::{Attributes, Group, GroupingSession, SelectionSession};
use crate::resolver::SessionResolver;
use chrono::{Duration, Utc};
use rusqlite::Connection;

pub const FIXTURE_CODE: &str = "Fx7Kq2Lm";
pub const FIXTURE_HOST: &str = "host-1";

pub struct GroupingFixture {
    pub conn: Connection,
    pub session: GroupingSession,
    pub groups: Vec<Group>,
}

pub struct SelectionFixture {
    pub conn: Connection,
    pub session: SelectionSession,
}

pub fn attrs(pairs: &[(&str, &str)]) -> Attributes {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn owned(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| (*f).to_string()).collect()
}

/// A fresh store holding one grouping session reachable via [`FIXTURE_CODE`].
pub fn grouping_fixture(
    group_names: &[&str],
    max_group_size: usize,
    fields: &[&str],
    rules: &[(&str, usize)],
) -> GroupingFixture {
    let conn = open_in_memory().expect("open in-memory store");
    let now = Utc::now();
    let (session, groups) = {
        let store = SqliteStore::new(&conn);
        let code = store
            .insert_access_code(FIXTURE_CODE, FIXTURE_HOST, now, now + Duration::days(1))
            .expect("insert code");
        let session_id = store
            .insert_grouping_session(code.code_id, "Fixture", max_group_size, true, now)
            .expect("insert session");
        store
            .insert_grouping_fields(session_id, &owned(fields))
            .expect("insert fields");
        for (field_key, cap) in rules {
            store
                .insert_grouping_rule(session_id, field_key, *cap)
                .expect("insert rule");
        }
        for name in group_names {
            store.insert_group(session_id, name).expect("insert group");
        }

        let session = store
            .grouping_session(FIXTURE_CODE, now)
            .expect("load fixture session");
        let groups = store.groups(session_id).expect("load fixture groups");
        (session, groups)
    };

    GroupingFixture {
        conn,
        session,
        groups,
    }
}

/// A fresh store holding one empty selection pool reachable via
/// [`FIXTURE_CODE`] and owned by [`FIXTURE_HOST`].
pub fn selection_fixture(fields: &[&str], rules: &[(&str, usize)]) -> SelectionFixture {
    let conn = open_in_memory().expect("open in-memory store");
    let now = Utc::now();
    let session = {
        let store = SqliteStore::new(&conn);
        let code = store
            .insert_access_code(FIXTURE_CODE, FIXTURE_HOST, now, now + Duration::days(1))
            .expect("insert code");
        let session_id = store
            .insert_selection_session(code.code_id, "Fixture", None, "Member ID", now)
            .expect("insert session");
        store
            .insert_selection_fields(session_id, &owned(fields))
            .expect("insert fields");
        for (field_key, cap) in rules {
            store
                .insert_selection_rule(session_id, field_key, *cap)
                .expect("insert rule");
        }
        store
            .selection_session(FIXTURE_CODE, now)
            .expect("load fixture session")
    };

    SelectionFixture { conn, session }
}
