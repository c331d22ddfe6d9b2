pub mod expire;
pub mod group;
pub mod init;
pub mod join;
pub mod resolve;
pub mod select;

use crate::host;
use crate::output::{CliError, OutputMode, render_error};
use cohort_core::config::EffectiveConfig;
use cohort_core::{Engine, EngineError};
use std::path::PathBuf;
use tracing::error;

/// Everything a command handler needs besides its own arguments.
pub struct CmdContext {
    pub project_root: PathBuf,
    pub output: OutputMode,
    pub host_flag: Option<String>,
    pub config: EffectiveConfig,
}

impl CmdContext {
    /// Open the session store named by the effective config.
    pub fn open_engine(&self) -> anyhow::Result<Engine> {
        let engine_config = self.config.project.engine_config()?;
        Engine::open(&self.config.db_path, engine_config)
    }

    /// Resolve the host identity, rendering a structured error when missing.
    pub fn require_host(&self) -> anyhow::Result<String> {
        host::require_host(self.host_flag.as_deref(), self.config.user.host.as_deref()).map_err(
            |e| {
                render_error(
                    self.output,
                    &CliError::with_details(
                        &e.message,
                        "Pass --host or export COHORT_HOST=<your-id>",
                        e.code,
                    ),
                )
                .ok();
                anyhow::anyhow!("{}", e.message)
            },
        )
    }

    /// Render an engine failure and hand it back for `main` to return.
    ///
    /// Internal causes go to the log only; the user sees the generic message.
    pub fn engine_failure(&self, err: EngineError) -> anyhow::Error {
        if let EngineError::Internal(cause) = &err {
            error!(code = %err.code(), "engine failure: {cause:#}");
        }
        render_error(self.output, &CliError::from(&err)).ok();
        anyhow::anyhow!("{err}")
    }
}
