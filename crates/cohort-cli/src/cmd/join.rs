//! `cohort join`: enter a session by access code.
//!
//! The code decides the session kind. Grouping sessions place the member
//! into a group right away; selection sessions add them to the pool.

use crate::cmd::CmdContext;
use crate::output::{pretty_kv, render_mode};
use clap::Args;
use cohort_core::model::{SessionKind, parse_attributes};
use cohort_core::{GroupAssignment, JoinOutcome, PoolJoinOutcome};
use serde::Serialize;
use std::io::Write;
use tracing::debug;

#[derive(Args, Debug)]
pub struct JoinArgs {
    /// Access code handed out by the host.
    pub code: String,

    /// Member identifier (student id, email, badge number).
    #[arg(long = "id", value_name = "IDENTIFIER")]
    pub identifier: String,

    /// Attribute as KEY=VALUE (repeatable).
    #[arg(long = "attr", value_name = "KEY=VALUE")]
    pub attributes: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum JoinReport {
    Grouping(JoinOutcome),
    Selection(PoolJoinOutcome),
}

pub fn run_join(args: &JoinArgs, ctx: &CmdContext) -> anyhow::Result<()> {
    let attributes = parse_attributes(&args.attributes)?;
    let engine = ctx.open_engine()?;

    let resolved = engine
        .resolve_code(&args.code)
        .map_err(|e| ctx.engine_failure(e))?;
    debug!(code = %args.code, kind = %resolved.kind, "code resolved");

    let report = match resolved.kind {
        SessionKind::Grouping => engine
            .join(&args.code, &args.identifier, &attributes)
            .map(JoinReport::Grouping),
        SessionKind::Selection => engine
            .join_pool(&args.code, &args.identifier, &attributes)
            .map(JoinReport::Selection),
    }
    .map_err(|e| ctx.engine_failure(e))?;

    render_mode(
        ctx.output,
        &report,
        |r, w| match r {
            JoinReport::Grouping(outcome) => match &outcome.assignment {
                GroupAssignment::Revealed { group_name, .. } => writeln!(w, "{group_name}"),
                GroupAssignment::Hidden => writeln!(w, "joined"),
            },
            JoinReport::Selection(_) => writeln!(w, "joined"),
        },
        |r, w| match r {
            JoinReport::Grouping(outcome) => {
                writeln!(
                    w,
                    "✓ {} joined \"{}\"",
                    outcome.member_identifier, outcome.session_name
                )?;
                match &outcome.assignment {
                    GroupAssignment::Revealed { group_name, .. } => {
                        pretty_kv(w, "Group", group_name)
                    }
                    GroupAssignment::Hidden => {
                        writeln!(w, "  Your group will be announced by the host.")
                    }
                }
            }
            JoinReport::Selection(outcome) => {
                writeln!(w, "✓ Added to the pool of \"{}\"", outcome.session_name)?;
                pretty_kv(w, &outcome.identifier_label, &outcome.member_identifier)
            }
        },
    )
}
