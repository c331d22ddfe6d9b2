//! Session provisioning and access-code resolution.
//!
//! Hosts create grouping or selection sessions here. Each session gets a
//! fresh access code; every field, rule and group is written in the caller's
//! transaction so a half-built session is never visible.

use crate::code;
use crate::config::EngineConfig;
use crate::db::store::SqliteStore;
use crate::error::EngineError;
use crate::model::{AccessCode, Group, RuleSpec, SessionKind};
use crate::resolver::SessionResolver;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

/// Everything a host supplies to open a grouping session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingSessionRequest {
    pub host_id: String,
    pub name: String,
    pub group_names: Vec<String>,
    pub max_group_size: usize,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
    #[serde(default)]
    pub reveal_immediately: bool,
    /// Minutes until the access code expires; the configured default if unset.
    #[serde(default)]
    pub expiry_minutes: Option<i64>,
}

/// Everything a host supplies to open a selection session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionSessionRequest {
    pub host_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub identifier_label: String,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
    #[serde(default)]
    pub expiry_minutes: Option<i64>,
}

/// A freshly created session and the code participants join with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionedSession {
    pub kind: SessionKind,
    pub session_id: i64,
    pub name: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    /// Empty for selection sessions.
    pub groups: Vec<Group>,
}

/// What an access code leads to, as shown to a participant before joining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedCode {
    pub kind: SessionKind,
    pub session_id: i64,
    pub name: String,
    /// Label for the member identifier; only selection sessions carry one.
    pub identifier_label: Option<String>,
    pub fields: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// Create a grouping session with its groups, fields and rules.
///
/// # Errors
///
/// [`EngineError::InvalidRequest`] when the request is malformed; an internal
/// failure if the store cannot be written.
pub fn create_grouping_session<R: Rng + ?Sized>(
    store: &SqliteStore<'_>,
    request: &GroupingSessionRequest,
    config: &EngineConfig,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<ProvisionedSession, EngineError> {
    let host_id = required("host id", &request.host_id)?;
    let name = required("session name", &request.name)?;
    if request.max_group_size == 0 {
        return Err(EngineError::invalid("max group size must be at least 1"));
    }
    let group_names = distinct("group name", &request.group_names)?;
    if group_names.is_empty() {
        return Err(EngineError::invalid("a grouping session needs at least one group"));
    }
    let fields = distinct("field", &request.fields)?;
    let rules = rule_keys(&request.rules)?;
    let expires_at = expires_at(request.expiry_minutes, config, now)?;

    let access = issue_code(store, host_id, config, now, expires_at, rng)?;
    let session_id = store.insert_grouping_session(
        access.code_id,
        name,
        request.max_group_size,
        request.reveal_immediately,
        now,
    )?;
    store.insert_grouping_fields(session_id, &fields)?;
    for (field_key, cap) in &rules {
        store.insert_grouping_rule(session_id, field_key, *cap)?;
    }
    let groups = group_names
        .iter()
        .map(|group| store.insert_group(session_id, group))
        .collect::<anyhow::Result<Vec<_>>>()?;

    info!(
        session_id,
        code = %access.code,
        groups = groups.len(),
        max_group_size = request.max_group_size,
        rules = rules.len(),
        "grouping session created"
    );

    Ok(ProvisionedSession {
        kind: SessionKind::Grouping,
        session_id,
        name: name.to_string(),
        code: access.code,
        expires_at,
        groups,
    })
}

/// Create a selection session with its fields and preferential rules.
///
/// # Errors
///
/// [`EngineError::InvalidRequest`] when the request is malformed; an internal
/// failure if the store cannot be written.
pub fn create_selection_session<R: Rng + ?Sized>(
    store: &SqliteStore<'_>,
    request: &SelectionSessionRequest,
    config: &EngineConfig,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<ProvisionedSession, EngineError> {
    let host_id = required("host id", &request.host_id)?;
    let name = required("session name", &request.name)?;
    let identifier_label = required("identifier label", &request.identifier_label)?;
    let description = request
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());
    let fields = distinct("field", &request.fields)?;
    let rules = rule_keys(&request.rules)?;
    let expires_at = expires_at(request.expiry_minutes, config, now)?;

    let access = issue_code(store, host_id, config, now, expires_at, rng)?;
    let session_id =
        store.insert_selection_session(access.code_id, name, description, identifier_label, now)?;
    store.insert_selection_fields(session_id, &fields)?;
    for (field_key, cap) in &rules {
        store.insert_selection_rule(session_id, field_key, *cap)?;
    }

    info!(
        session_id,
        code = %access.code,
        rules = rules.len(),
        "selection session created"
    );

    Ok(ProvisionedSession {
        kind: SessionKind::Selection,
        session_id,
        name: name.to_string(),
        code: access.code,
        expires_at,
        groups: Vec::new(),
    })
}

/// Report which kind of session `code` leads to.
///
/// # Errors
///
/// [`EngineError::InvalidOrExpiredCode`] for unknown or expired codes;
/// [`EngineError::SessionNotFound`] when the code has no session attached.
pub fn resolve_code<S: SessionResolver + ?Sized>(
    store: &S,
    code: &str,
    now: DateTime<Utc>,
) -> Result<ResolvedCode, EngineError> {
    match store.grouping_session(code, now) {
        Ok(session) => {
            return Ok(ResolvedCode {
                kind: SessionKind::Grouping,
                session_id: session.session_id,
                name: session.name,
                identifier_label: None,
                fields: session.fields,
                expires_at: session.code.expires_at,
            });
        }
        Err(EngineError::SessionNotFound { .. }) => {}
        Err(err) => return Err(err),
    }

    match store.selection_session(code, now) {
        Ok(session) => Ok(ResolvedCode {
            kind: SessionKind::Selection,
            session_id: session.session_id,
            name: session.name,
            identifier_label: Some(session.identifier_label),
            fields: session.fields,
            expires_at: session.code.expires_at,
        }),
        Err(EngineError::SessionNotFound { code, .. }) => Err(EngineError::SessionNotFound {
            code,
            kind: "grouping or selection",
        }),
        Err(err) => Err(err),
    }
}

fn issue_code<R: Rng + ?Sized>(
    store: &SqliteStore<'_>,
    host_id: &str,
    config: &EngineConfig,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    rng: &mut R,
) -> Result<AccessCode, EngineError> {
    let code = code::generate_unique(rng, config.code_length, |candidate| {
        store.code_exists(candidate)
    })?;
    Ok(store.insert_access_code(&code, host_id, now, expires_at)?)
}

fn required<'a>(what: &str, raw: &'a str) -> Result<&'a str, EngineError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::invalid(format!("{what} must not be empty")));
    }
    Ok(trimmed)
}

fn distinct(what: &str, raw: &[String]) -> Result<Vec<String>, EngineError> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for value in raw {
        let value = required(what, value)?;
        if !seen.insert(value) {
            return Err(EngineError::invalid(format!("duplicate {what} '{value}'")));
        }
        out.push(value.to_string());
    }
    Ok(out)
}

fn rule_keys(rules: &[RuleSpec]) -> Result<Vec<(String, usize)>, EngineError> {
    let mut out = Vec::with_capacity(rules.len());
    for rule in rules {
        out.push((required("rule field key", &rule.field_key)?.to_string(), rule.cap));
    }
    Ok(out)
}

fn expires_at(
    minutes: Option<i64>,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, EngineError> {
    let lifetime = match minutes {
        None => Some(config.default_expiry),
        Some(m) if m > 0 => Duration::try_minutes(m),
        Some(m) => {
            return Err(EngineError::invalid(format!(
                "expiry must be a positive number of minutes, got {m}"
            )));
        }
    };
    lifetime
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(|| EngineError::invalid("expiry is too far in the future"))
}
