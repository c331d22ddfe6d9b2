//! `cohort select`: quota-based selection from a pool of joined members.

use crate::cmd::CmdContext;
use crate::cmd::group::format_attributes;
use crate::output::{Renderable, pretty_kv, pretty_section, render_list, render_mode};
use clap::{Args, Subcommand};
use cohort_core::model::{MemberSelectionDetail, Preference, RuleSpec};
use cohort_core::{SelectionRequest, SelectionSessionRequest};
use serde::Serialize;
use std::io::{self, Write};

#[derive(Subcommand, Debug)]
pub enum SelectCommand {
    #[command(
        about = "Create a selection session",
        after_help = "EXAMPLES:\n    # Pool keyed by student id, at most three preferred 'female' picks\n    cohort select create --name \"Panel\" --label \"Student ID\" \\\n        --field gender --rule female=3"
    )]
    Create(SelectCreateArgs),

    #[command(
        about = "Select members until the requested total is reached",
        after_help = "EXAMPLES:\n    # Five in total, preferring gender=female up to the rule's cap\n    cohort select run Fx7Kq2Lm --count 5 --prefer gender=female"
    )]
    Run(SelectRunArgs),

    #[command(about = "List selected members in selection order")]
    List(CodeArgs),

    #[command(about = "Reset every selection and delete the selection log")]
    Clear(CodeArgs),
}

#[derive(Args, Debug)]
pub struct SelectCreateArgs {
    /// Session name shown to participants.
    #[arg(long)]
    pub name: String,

    /// Free-form description.
    #[arg(long)]
    pub description: Option<String>,

    /// What participants are asked for as their identifier.
    #[arg(long, default_value = "Member ID")]
    pub label: String,

    /// Attribute field participants fill in (repeatable).
    #[arg(long = "field", value_name = "KEY")]
    pub fields: Vec<String>,

    /// Preference cap as FIELD_KEY=MAX_SELECTED (repeatable).
    #[arg(long = "rule", value_name = "FIELD_KEY=CAP")]
    pub rules: Vec<RuleSpec>,

    /// Minutes until the access code expires.
    #[arg(long, value_name = "MINUTES")]
    pub expires_in: Option<i64>,
}

#[derive(Args, Debug)]
pub struct SelectRunArgs {
    /// Access code of the selection session.
    pub code: String,

    /// Total number of members that should be selected afterwards.
    #[arg(long)]
    pub count: usize,

    /// Prefer members whose FIELD equals VALUE.
    #[arg(long, value_name = "FIELD=VALUE")]
    pub prefer: Option<Preference>,
}

#[derive(Args, Debug)]
pub struct CodeArgs {
    /// Access code of the selection session.
    pub code: String,
}

pub fn run_select(command: &SelectCommand, ctx: &CmdContext) -> anyhow::Result<()> {
    match command {
        SelectCommand::Create(args) => run_create(args, ctx),
        SelectCommand::Run(args) => run_run(args, ctx),
        SelectCommand::List(args) => run_list(args, ctx),
        SelectCommand::Clear(args) => run_clear(args, ctx),
    }
}

fn run_create(args: &SelectCreateArgs, ctx: &CmdContext) -> anyhow::Result<()> {
    let host_id = ctx.require_host()?;
    let engine = ctx.open_engine()?;

    let request = SelectionSessionRequest {
        host_id,
        name: args.name.clone(),
        description: args.description.clone(),
        identifier_label: args.label.clone(),
        fields: args.fields.clone(),
        rules: args.rules.clone(),
        expiry_minutes: args.expires_in,
    };
    let session = engine
        .create_selection_session(&request)
        .map_err(|e| ctx.engine_failure(e))?;

    render_mode(
        ctx.output,
        &session,
        |s, w| writeln!(w, "{}", s.code),
        |s, w| {
            pretty_section(w, &format!("Selection session \"{}\"", s.name))?;
            pretty_kv(w, "Code", &s.code)?;
            pretty_kv(w, "Expires", s.expires_at.to_rfc3339())
        },
    )
}

fn run_run(args: &SelectRunArgs, ctx: &CmdContext) -> anyhow::Result<()> {
    let host_id = ctx.require_host()?;
    let engine = ctx.open_engine()?;

    let request = SelectionRequest {
        requested_count: args.count,
        preference: args.prefer.clone(),
    };
    let result = engine
        .select(&args.code, &host_id, &request)
        .map_err(|e| ctx.engine_failure(e))?;

    render_mode(
        ctx.output,
        &result,
        |r, w| {
            writeln!(
                w,
                "selected {} (preferential {}, random {})",
                r.selected_count, r.preferential_count, r.random_count
            )?;
            for ident in &r.member_identifiers {
                writeln!(w, "{ident}")?;
            }
            Ok(())
        },
        |r, w| {
            pretty_section(w, &format!("Selected {} members", r.selected_count))?;
            pretty_kv(w, "Preferential", r.preferential_count.to_string())?;
            pretty_kv(w, "Random", r.random_count.to_string())?;
            writeln!(w)?;
            for (i, ident) in r.member_identifiers.iter().enumerate() {
                writeln!(w, "{:>3}. {ident}", i + 1)?;
            }
            Ok(())
        },
    )
}

/// One row of `cohort select list`.
#[derive(Debug)]
struct SelectedRow<'a>(&'a MemberSelectionDetail);

impl Renderable for SelectedRow<'_> {
    fn render_human(&self, w: &mut dyn Write) -> io::Result<()> {
        let d = self.0;
        writeln!(
            w,
            "{:<16} {:<12} {}  {}",
            d.member_identifier,
            d.selection_type.as_str(),
            d.selected_at.format("%Y-%m-%d %H:%M:%S"),
            format_attributes(&d.attributes)
        )
    }

    fn render_json(&self, w: &mut dyn Write) -> io::Result<()> {
        serde_json::to_writer(&mut *w, self.0)?;
        writeln!(w)
    }

    fn render_table(&self, w: &mut dyn Write) -> io::Result<()> {
        let d = self.0;
        writeln!(
            w,
            "{}  {}  {}",
            d.member_identifier,
            d.selection_type,
            format_attributes(&d.attributes)
        )
    }

    fn table_headers() -> &'static [&'static str] {
        &["MEMBER", "TYPE", "ATTRIBUTES"]
    }
}

fn run_list(args: &CodeArgs, ctx: &CmdContext) -> anyhow::Result<()> {
    let host_id = ctx.require_host()?;
    let engine = ctx.open_engine()?;
    let details = engine
        .list_selected(&args.code, &host_id)
        .map_err(|e| ctx.engine_failure(e))?;

    let rows: Vec<SelectedRow<'_>> = details.iter().map(SelectedRow).collect();
    render_list(&rows, ctx.output)?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct ClearOutput {
    code: String,
    cleared: usize,
}

fn run_clear(args: &CodeArgs, ctx: &CmdContext) -> anyhow::Result<()> {
    let host_id = ctx.require_host()?;
    let engine = ctx.open_engine()?;
    let cleared = engine
        .clear_selections(&args.code, &host_id)
        .map_err(|e| ctx.engine_failure(e))?;

    let report = ClearOutput {
        code: args.code.clone(),
        cleared,
    };
    render_mode(
        ctx.output,
        &report,
        |r, w| writeln!(w, "cleared {}", r.cleared),
        |r, w| writeln!(w, "✓ Cleared {} selections for {}", r.cleared, r.code),
    )
}
