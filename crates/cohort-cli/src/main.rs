#![forbid(unsafe_code)]

mod cmd;
mod host;
mod output;

use clap::{Parser, Subcommand};
use cmd::CmdContext;
use output::OutputMode;
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "cohort: fair group allocation and quota selection",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Output format.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Shorthand for `--format json`.
    #[arg(long, global = true, hide = true)]
    json: bool,

    /// Session database path (overrides COHORT_DB and the project config).
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Host identity for session management (overrides COHORT_HOST).
    #[arg(long, global = true)]
    host: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Project",
        about = "Initialize a cohort project",
        long_about = "Create .cohort/ with a config template and a migrated session store.",
        after_help = "EXAMPLES:\n    cohort init\n\n    # Emit machine-readable output\n    cohort init --format json"
    )]
    Init(cmd::init::InitArgs),

    #[command(next_help_heading = "Hosts", about = "Manage grouping sessions")]
    Group {
        #[command(subcommand)]
        command: cmd::group::GroupCommand,
    },

    #[command(next_help_heading = "Hosts", about = "Manage selection sessions")]
    Select {
        #[command(subcommand)]
        command: cmd::select::SelectCommand,
    },

    #[command(
        next_help_heading = "Participants",
        about = "Show what an access code leads to",
        after_help = "EXAMPLES:\n    cohort resolve Fx7Kq2Lm"
    )]
    Resolve(cmd::resolve::ResolveArgs),

    #[command(
        next_help_heading = "Participants",
        about = "Join a session by access code",
        long_about = "Join a grouping session (placed into a group) or a selection session (added to the pool).",
        after_help = "EXAMPLES:\n    cohort join Fx7Kq2Lm --id s-1042 --attr team=red --attr gender=female"
    )]
    Join(cmd::join::JoinArgs),

    #[command(
        next_help_heading = "Project",
        about = "Expire access codes past their expiry time"
    )]
    Expire,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("COHORT_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "cohort=debug,info"
        } else {
            "cohort=info,warn"
        })
    });

    let format = env::var("COHORT_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let project_root = env::current_dir()?;
    let config = cohort_core::config::resolve_config(&project_root, cli.json, cli.db.as_deref())?;
    let output = output::resolve_output_mode(cli.format, cli.json, &config.resolved_output);

    let ctx = CmdContext {
        project_root,
        output,
        host_flag: cli.host.clone(),
        config,
    };

    match &cli.command {
        Commands::Init(args) => cmd::init::run_init(args, &ctx),
        Commands::Group { command } => cmd::group::run_group(command, &ctx),
        Commands::Select { command } => cmd::select::run_select(command, &ctx),
        Commands::Resolve(args) => cmd::resolve::run_resolve(args, &ctx),
        Commands::Join(args) => cmd::join::run_join(args, &ctx),
        Commands::Expire => cmd::expire::run_expire(&ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_parses_after_subcommand() {
        let cli = Cli::parse_from(["cohort", "resolve", "ABCD1234", "--json"]);
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Resolve(_)));
    }

    #[test]
    fn format_flag_parses_before_subcommand() {
        let cli = Cli::parse_from(["cohort", "--format", "text", "expire"]);
        assert_eq!(cli.format, Some(OutputMode::Text));
        assert!(!cli.json);
    }

    #[test]
    fn host_and_db_flags_are_global() {
        let cli = Cli::parse_from([
            "cohort", "group", "roster", "ABCD1234", "--host", "h1", "--db", "x.sqlite3",
        ]);
        assert_eq!(cli.host.as_deref(), Some("h1"));
        assert_eq!(cli.db, Some(PathBuf::from("x.sqlite3")));
    }

    #[test]
    fn group_create_parses_rules() {
        let cli = Cli::parse_from([
            "cohort", "group", "create", "--name", "Lab", "--group", "A", "--group", "B",
            "--max-size", "2", "--field", "team", "--rule", "team=1", "--reveal",
        ]);
        let Commands::Group {
            command: cmd::group::GroupCommand::Create(args),
        } = cli.command
        else {
            panic!("expected group create");
        };
        assert_eq!(args.groups, vec!["A", "B"]);
        assert_eq!(args.rules.len(), 1);
        assert_eq!(args.rules[0].field_key, "team");
        assert_eq!(args.rules[0].cap, 1);
        assert!(args.reveal);
    }

    #[test]
    fn group_create_requires_a_group() {
        let result = Cli::try_parse_from(["cohort", "group", "create", "--name", "x", "--max-size", "2"]);
        assert!(result.is_err());
    }

    #[test]
    fn bad_rule_is_rejected_by_parser() {
        let result = Cli::try_parse_from([
            "cohort", "group", "create", "--name", "x", "--group", "A", "--max-size", "2",
            "--rule", "team",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn select_run_parses_preference() {
        let cli = Cli::parse_from([
            "cohort", "select", "run", "ABCD1234", "--count", "5", "--prefer", "gender=female",
        ]);
        let Commands::Select {
            command: cmd::select::SelectCommand::Run(args),
        } = cli.command
        else {
            panic!("expected select run");
        };
        assert_eq!(args.count, 5);
        let prefer = args.prefer.expect("preference");
        assert_eq!(prefer.field, "gender");
        assert_eq!(prefer.value, "female");
    }

    #[test]
    fn all_subcommands_listed() {
        let subcommands = [
            vec!["cohort", "init"],
            vec!["cohort", "group", "roster", "c"],
            vec!["cohort", "select", "create", "--name", "n"],
            vec!["cohort", "select", "list", "c"],
            vec!["cohort", "select", "clear", "c"],
            vec!["cohort", "resolve", "c"],
            vec!["cohort", "join", "c", "--id", "m1", "--attr", "team=red"],
            vec!["cohort", "expire"],
        ];
        for args in &subcommands {
            let result = Cli::try_parse_from(args.iter());
            assert!(result.is_ok(), "Failed to parse: {args:?}: {:?}", result.err());
        }
    }
}
