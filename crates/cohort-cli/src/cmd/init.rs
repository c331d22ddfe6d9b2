use crate::cmd::CmdContext;
use crate::output::{pretty_kv, pretty_section, render_mode};
use anyhow::{Context as _, Result};
use clap::Args;
use cohort_core::config::{PROJECT_DIR, load_project_config};
use cohort_core::db::migrations::current_schema_version;
use cohort_core::Engine;
use serde::Serialize;
use std::io::Write;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing `.cohort/config.toml`.
    #[arg(long)]
    pub force: bool,
}

const CONFIG_TOML: &str = "[store]\n\
    # path = \".cohort/cohort.sqlite3\"\n\
    busy_timeout_ms = 5000\n\
    \n\
    [sessions]\n\
    default_expiry_minutes = 1440\n\
    code_length = 8\n\
    busy_retries = 3\n";

const GITIGNORE: &str = "*.sqlite3\n*.sqlite3-wal\n*.sqlite3-shm\n";

#[derive(Debug, Serialize)]
struct InitOutput {
    project_dir: String,
    config: String,
    database: String,
    schema_version: u32,
}

/// Execute `cohort init`. Creates the project skeleton:
///
/// ```text
/// .cohort/
///   config.toml       (default project config template)
///   .gitignore        (database files)
///   cohort.sqlite3    (migrated session store, unless [store].path says otherwise)
/// ```
///
/// # Errors
///
/// Returns an error if the config already exists and `--force` is not set,
/// or if any filesystem or store operation fails.
pub fn run_init(args: &InitArgs, ctx: &CmdContext) -> Result<()> {
    let project_dir = ctx.project_root.join(PROJECT_DIR);
    let config_path = project_dir.join("config.toml");

    if config_path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists. Use `cohort init --force` to reinitialize.",
            config_path.display()
        );
    }

    std::fs::create_dir_all(&project_dir).with_context(|| {
        format!(
            "Failed to create project directory: {}",
            project_dir.display()
        )
    })?;
    std::fs::write(&config_path, CONFIG_TOML)
        .with_context(|| format!("Failed to write config: {}", config_path.display()))?;

    let gitignore_path = project_dir.join(".gitignore");
    std::fs::write(&gitignore_path, GITIGNORE)
        .with_context(|| format!("Failed to write .gitignore: {}", gitignore_path.display()))?;

    let engine_config = load_project_config(&ctx.project_root)?.engine_config()?;
    let db_path = &ctx.config.db_path;
    let engine = Engine::open(db_path, engine_config)?;
    let schema_version =
        current_schema_version(engine.connection()).context("read schema version")?;

    let report = InitOutput {
        project_dir: project_dir.display().to_string(),
        config: config_path.display().to_string(),
        database: db_path.display().to_string(),
        schema_version,
    };

    render_mode(
        ctx.output,
        &report,
        |r, w| writeln!(w, "initialized {} (schema v{})", r.database, r.schema_version),
        |r, w| {
            pretty_section(w, "Initialized cohort project")?;
            pretty_kv(w, "Config", &r.config)?;
            pretty_kv(w, "Database", &r.database)?;
            pretty_kv(w, "Schema", format!("v{}", r.schema_version))?;
            writeln!(w)?;
            writeln!(w, "Next steps:")?;
            writeln!(w, "  export COHORT_HOST=your-id")?;
            writeln!(w, "  cohort group create --name \"Lab teams\" --group A --group B --max-size 4")
        },
    )
}
