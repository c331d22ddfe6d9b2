//! `cohort group`: create grouping sessions and inspect their rosters.

use crate::cmd::CmdContext;
use crate::output::{pretty_kv, pretty_rule, pretty_section, render_mode};
use clap::{Args, Subcommand};
use cohort_core::GroupingSessionRequest;
use cohort_core::model::RuleSpec;
use std::io::Write;

#[derive(Subcommand, Debug)]
pub enum GroupCommand {
    #[command(
        about = "Create a grouping session",
        after_help = "EXAMPLES:\n    # Two groups of four, at most one member per team in each\n    cohort group create --name \"Lab\" --group A --group B --max-size 4 \\\n        --field team --rule team=1\n\n    # Cap the literal value 'female' at two per group\n    cohort group create --name \"Mixed\" --group A --group B --max-size 6 \\\n        --field gender --rule female=2"
    )]
    Create(GroupCreateArgs),

    #[command(
        about = "Show every group and its members",
        after_help = "EXAMPLES:\n    cohort group roster Fx7Kq2Lm --host host-1"
    )]
    Roster(RosterArgs),
}

#[derive(Args, Debug)]
pub struct GroupCreateArgs {
    /// Session name shown to participants.
    #[arg(long)]
    pub name: String,

    /// Group name (repeat for each group).
    #[arg(long = "group", value_name = "NAME", required = true)]
    pub groups: Vec<String>,

    /// Maximum members per group.
    #[arg(long)]
    pub max_size: usize,

    /// Attribute field participants fill in (repeatable).
    #[arg(long = "field", value_name = "KEY")]
    pub fields: Vec<String>,

    /// Fairness rule as FIELD_KEY=MAX_PER_GROUP (repeatable).
    #[arg(long = "rule", value_name = "FIELD_KEY=CAP")]
    pub rules: Vec<RuleSpec>,

    /// Tell participants their group as soon as they join.
    #[arg(long)]
    pub reveal: bool,

    /// Minutes until the access code expires.
    #[arg(long, value_name = "MINUTES")]
    pub expires_in: Option<i64>,
}

#[derive(Args, Debug)]
pub struct RosterArgs {
    /// Access code of the grouping session.
    pub code: String,
}

pub fn run_group(command: &GroupCommand, ctx: &CmdContext) -> anyhow::Result<()> {
    match command {
        GroupCommand::Create(args) => run_create(args, ctx),
        GroupCommand::Roster(args) => run_roster(args, ctx),
    }
}

fn run_create(args: &GroupCreateArgs, ctx: &CmdContext) -> anyhow::Result<()> {
    let host_id = ctx.require_host()?;
    let engine = ctx.open_engine()?;

    let request = GroupingSessionRequest {
        host_id,
        name: args.name.clone(),
        group_names: args.groups.clone(),
        max_group_size: args.max_size,
        fields: args.fields.clone(),
        rules: args.rules.clone(),
        reveal_immediately: args.reveal,
        expiry_minutes: args.expires_in,
    };
    let session = engine
        .create_grouping_session(&request)
        .map_err(|e| ctx.engine_failure(e))?;

    render_mode(
        ctx.output,
        &session,
        |s, w| writeln!(w, "{}", s.code),
        |s, w| {
            pretty_section(w, &format!("Grouping session \"{}\"", s.name))?;
            pretty_kv(w, "Code", &s.code)?;
            pretty_kv(w, "Expires", s.expires_at.to_rfc3339())?;
            let names: Vec<&str> = s.groups.iter().map(|g| g.name.as_str()).collect();
            pretty_kv(w, "Groups", names.join(", "))
        },
    )
}

fn run_roster(args: &RosterArgs, ctx: &CmdContext) -> anyhow::Result<()> {
    let host_id = ctx.require_host()?;
    let engine = ctx.open_engine()?;
    let roster = engine
        .roster(&args.code, &host_id)
        .map_err(|e| ctx.engine_failure(e))?;

    render_mode(
        ctx.output,
        &roster,
        |r, w| {
            writeln!(w, "GROUP  MEMBER  ATTRIBUTES")?;
            for group in &r.groups {
                for member in &group.members {
                    writeln!(
                        w,
                        "{}  {}  {}",
                        group.group.name,
                        member.member_identifier,
                        format_attributes(&member.attributes)
                    )?;
                }
            }
            Ok(())
        },
        |r, w| {
            pretty_section(
                w,
                &format!("{} ({} members, max {} per group)", r.name, r.member_count(), r.max_group_size),
            )?;
            for group in &r.groups {
                writeln!(w, "{} [{}/{}]", group.group.name, group.members.len(), r.max_group_size)?;
                for member in &group.members {
                    writeln!(
                        w,
                        "  {:<16} {}",
                        member.member_identifier,
                        format_attributes(&member.attributes)
                    )?;
                }
            }
            pretty_rule(w)
        },
    )
}

/// `k=v, k=v` in key order.
pub fn format_attributes(attributes: &cohort_core::model::Attributes) -> String {
    attributes
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}
