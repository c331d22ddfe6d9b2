//! Host identity resolution for CLI commands.
//!
//! The resolution chain: `--host` flag > `COHORT_HOST` env > `host` in the
//! user config. Session creation and every host-only command (roster,
//! selection runs, listing and clearing) require a host identity; joining
//! and resolving a code work without one.

use std::env;

/// Errors from host resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostResolutionError {
    /// Human-readable description.
    pub message: String,
    /// Machine error code.
    pub code: &'static str,
}

impl std::fmt::Display for HostResolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HostResolutionError {}

/// Environment reader trait for dependency injection in tests.
trait EnvReader {
    fn get(&self, key: &str) -> Option<String>;
}

/// Real environment reader.
struct RealEnv;

impl EnvReader for RealEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

fn resolve_host_with(
    cli_flag: Option<&str>,
    configured: Option<&str>,
    env: &dyn EnvReader,
) -> Option<String> {
    if let Some(host) = cli_flag.map(str::trim).filter(|h| !h.is_empty()) {
        return Some(host.to_string());
    }

    if let Some(val) = env.get("COHORT_HOST") {
        return Some(val.trim().to_string());
    }

    configured
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
}

/// Resolve the host identity, returning an error if none is available.
pub fn require_host(
    cli_flag: Option<&str>,
    configured: Option<&str>,
) -> Result<String, HostResolutionError> {
    resolve_host_with(cli_flag, configured, &RealEnv).ok_or_else(|| HostResolutionError {
        message: "Host identity required for this command. \
                  Set --host, COHORT_HOST, or `host` in the user config."
            .to_string(),
        code: "missing_host",
    })
}
