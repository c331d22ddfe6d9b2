use crate::cmd::CmdContext;
use crate::output::render_mode;
use chrono::Utc;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct ExpireOutput {
    expired: usize,
}

/// Execute `cohort expire`: mark every active code past its expiry as expired.
pub fn run_expire(ctx: &CmdContext) -> anyhow::Result<()> {
    let engine = ctx.open_engine()?;
    let expired = engine
        .expire_stale_codes(Utc::now())
        .map_err(|e| ctx.engine_failure(e))?;

    render_mode(
        ctx.output,
        &ExpireOutput { expired },
        |r, w| writeln!(w, "expired {}", r.expired),
        |r, w| writeln!(w, "✓ Expired {} stale access codes", r.expired),
    )
}
