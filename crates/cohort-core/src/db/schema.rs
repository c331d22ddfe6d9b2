//! Canonical SQLite schema for cohort.
//!
//! The schema is normalized around access codes:
//! - `access_codes` owns expiry and status; every session references one code
//! - grouping sessions own `session_groups`, `grouping_fields`,
//!   `grouping_rules` and `group_members`
//! - selection sessions own `selection_fields`, `selection_rules`,
//!   `selection_members` and the append-only `selection_logs`
//! - `store_meta` tracks the schema version

/// Migration v1: core tables plus store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS access_codes (
    code_id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE CHECK (length(code) > 0),
    host_id TEXT NOT NULL CHECK (length(trim(host_id)) > 0),
    status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'used', 'expired')),
    created_at_us INTEGER NOT NULL,
    expires_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS grouping_sessions (
    session_id INTEGER PRIMARY KEY AUTOINCREMENT,
    code_id INTEGER NOT NULL UNIQUE REFERENCES access_codes(code_id) ON DELETE CASCADE,
    name TEXT NOT NULL CHECK (length(trim(name)) > 0),
    max_group_size INTEGER NOT NULL CHECK (max_group_size > 0),
    reveal_immediately INTEGER NOT NULL DEFAULT 0 CHECK (reveal_immediately IN (0, 1)),
    created_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS session_groups (
    group_id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES grouping_sessions(session_id) ON DELETE CASCADE,
    name TEXT NOT NULL CHECK (length(trim(name)) > 0),
    UNIQUE (session_id, name)
);

CREATE TABLE IF NOT EXISTS grouping_fields (
    session_id INTEGER NOT NULL REFERENCES grouping_sessions(session_id) ON DELETE CASCADE,
    field_key TEXT NOT NULL CHECK (length(trim(field_key)) > 0),
    position INTEGER NOT NULL,
    PRIMARY KEY (session_id, field_key)
);

CREATE TABLE IF NOT EXISTS grouping_rules (
    rule_id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES grouping_sessions(session_id) ON DELETE CASCADE,
    field_key TEXT NOT NULL CHECK (length(trim(field_key)) > 0),
    max_per_group INTEGER NOT NULL CHECK (max_per_group >= 0)
);

CREATE TABLE IF NOT EXISTS group_members (
    member_id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES grouping_sessions(session_id) ON DELETE CASCADE,
    group_id INTEGER NOT NULL REFERENCES session_groups(group_id) ON DELETE CASCADE,
    member_identifier TEXT NOT NULL CHECK (length(trim(member_identifier)) > 0),
    attributes_json TEXT NOT NULL DEFAULT '{}',
    joined_at_us INTEGER NOT NULL,
    UNIQUE (session_id, member_identifier)
);

CREATE TABLE IF NOT EXISTS selection_sessions (
    session_id INTEGER PRIMARY KEY AUTOINCREMENT,
    code_id INTEGER NOT NULL UNIQUE REFERENCES access_codes(code_id) ON DELETE CASCADE,
    name TEXT NOT NULL CHECK (length(trim(name)) > 0),
    description TEXT,
    identifier_label TEXT NOT NULL,
    created_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS selection_fields (
    session_id INTEGER NOT NULL REFERENCES selection_sessions(session_id) ON DELETE CASCADE,
    field_key TEXT NOT NULL CHECK (length(trim(field_key)) > 0),
    position INTEGER NOT NULL,
    PRIMARY KEY (session_id, field_key)
);

CREATE TABLE IF NOT EXISTS selection_rules (
    rule_id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES selection_sessions(session_id) ON DELETE CASCADE,
    field_key TEXT NOT NULL CHECK (length(trim(field_key)) > 0),
    preference_max_selection INTEGER NOT NULL CHECK (preference_max_selection >= 0)
);

CREATE TABLE IF NOT EXISTS selection_members (
    member_id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES selection_sessions(session_id) ON DELETE CASCADE,
    member_identifier TEXT NOT NULL CHECK (length(trim(member_identifier)) > 0),
    attributes_json TEXT NOT NULL DEFAULT '{}',
    selected INTEGER NOT NULL DEFAULT 0 CHECK (selected IN (0, 1)),
    joined_at_us INTEGER NOT NULL,
    UNIQUE (session_id, member_identifier)
);

CREATE TABLE IF NOT EXISTS selection_logs (
    log_id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES selection_sessions(session_id) ON DELETE CASCADE,
    member_id INTEGER NOT NULL REFERENCES selection_members(member_id) ON DELETE CASCADE,
    selection_type TEXT NOT NULL CHECK (selection_type IN ('preferential', 'random')),
    selected_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    created_at_us INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO store_meta (id, schema_version, created_at_us)
VALUES (1, 1, CAST(strftime('%s', 'now') AS INTEGER) * 1000000);
";

/// Migration v2: read-path indexes for occupancy counts and pool scans.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_session_groups_session
    ON session_groups(session_id);

CREATE INDEX IF NOT EXISTS idx_group_members_group
    ON group_members(group_id, joined_at_us);

CREATE INDEX IF NOT EXISTS idx_grouping_rules_session
    ON grouping_rules(session_id);

CREATE INDEX IF NOT EXISTS idx_selection_rules_session
    ON selection_rules(session_id);

CREATE INDEX IF NOT EXISTS idx_selection_members_session_selected
    ON selection_members(session_id, selected);

CREATE INDEX IF NOT EXISTS idx_selection_logs_session
    ON selection_logs(session_id, selected_at_us);

CREATE INDEX IF NOT EXISTS idx_selection_logs_member
    ON selection_logs(member_id);

UPDATE store_meta
SET schema_version = 2
WHERE id = 1;
";

/// Indexes expected by the join and selection hot paths.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_session_groups_session",
    "idx_group_members_group",
    "idx_grouping_rules_session",
    "idx_selection_rules_session",
    "idx_selection_members_session_selected",
    "idx_selection_logs_session",
    "idx_selection_logs_member",
];
