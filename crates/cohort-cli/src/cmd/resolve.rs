use crate::cmd::CmdContext;
use crate::output::{pretty_kv, pretty_section, render_mode};
use clap::Args;
use std::io::Write;

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Access code to look up.
    pub code: String,
}

/// Execute `cohort resolve`: show what a code leads to before joining.
pub fn run_resolve(args: &ResolveArgs, ctx: &CmdContext) -> anyhow::Result<()> {
    let engine = ctx.open_engine()?;
    let resolved = engine
        .resolve_code(&args.code)
        .map_err(|e| ctx.engine_failure(e))?;

    render_mode(
        ctx.output,
        &resolved,
        |r, w| writeln!(w, "{}  {}  {}", r.kind, r.name, r.fields.join(",")),
        |r, w| {
            pretty_section(w, &format!("{} ({} session)", r.name, r.kind))?;
            if let Some(label) = &r.identifier_label {
                pretty_kv(w, "Identifier", label)?;
            }
            if !r.fields.is_empty() {
                pretty_kv(w, "Fields", r.fields.join(", "))?;
            }
            pretty_kv(w, "Expires", r.expires_at.to_rfc3339())
        },
    )
}
