use crate::code::DEFAULT_CODE_LENGTH;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory holding project-local state and config.
pub const PROJECT_DIR: &str = ".cohort";

/// Database file name used when nothing else is configured.
pub const DEFAULT_DB_FILE: &str = "cohort.sqlite3";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database path; relative paths are resolved against the project root.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_expiry_minutes")]
    pub default_expiry_minutes: i64,
    #[serde(default = "default_code_length")]
    pub code_length: usize,
    #[serde(default = "default_busy_retries")]
    pub busy_retries: u32,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            default_expiry_minutes: default_expiry_minutes(),
            code_length: default_code_length(),
            busy_retries: default_busy_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
    /// Host identity used when neither `--host` nor `COHORT_HOST` is set.
    #[serde(default)]
    pub host: Option<String>,
}

/// Runtime knobs the engine needs, already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub busy_timeout: Duration,
    pub busy_retries: u32,
    pub code_length: usize,
    pub default_expiry: chrono::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(default_busy_timeout_ms()),
            busy_retries: default_busy_retries(),
            code_length: default_code_length(),
            default_expiry: chrono::Duration::minutes(default_expiry_minutes()),
        }
    }
}

impl ProjectConfig {
    /// Validate the project settings and turn them into engine knobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the code length is outside `4..=32` or the default
    /// expiry is not positive.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let sessions = &self.sessions;
        if !(4..=32).contains(&sessions.code_length) {
            bail!(
                "sessions.code_length must be between 4 and 32, got {}",
                sessions.code_length
            );
        }
        if sessions.default_expiry_minutes <= 0 {
            bail!(
                "sessions.default_expiry_minutes must be positive, got {}",
                sessions.default_expiry_minutes
            );
        }
        let default_expiry = chrono::Duration::try_minutes(sessions.default_expiry_minutes)
            .with_context(|| {
                format!(
                    "sessions.default_expiry_minutes is too large, got {}",
                    sessions.default_expiry_minutes
                )
            })?;

        Ok(EngineConfig {
            busy_timeout: Duration::from_millis(self.store.busy_timeout_ms),
            busy_retries: sessions.busy_retries,
            code_length: sessions.code_length,
            default_expiry,
        })
    }
}

#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub project: ProjectConfig,
    pub user: UserConfig,
    pub db_path: PathBuf,
    pub resolved_output: String,
}

/// Load `.cohort/config.toml` under `project_root`, or defaults if absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = project_root.join(PROJECT_DIR).join("config.toml");
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Load `<config_dir>/cohort/config.toml`, or defaults if absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("cohort/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Merge project config, user config and environment into one view.
///
/// # Errors
///
/// Returns an error if either config file is unreadable or malformed.
pub fn resolve_config(
    project_root: &Path,
    cli_json: bool,
    cli_db: Option<&Path>,
) -> Result<EffectiveConfig> {
    let project = load_project_config(project_root)?;
    let user = load_user_config()?;

    let env_format = env::var("FORMAT").ok();
    let resolved_output = resolve_output(cli_json, user.output.clone(), env_format);

    let env_db = env::var_os("COHORT_DB").map(PathBuf::from);
    let db_path = resolve_db_path(
        project_root,
        cli_db,
        env_db.as_deref(),
        project.store.path.as_deref(),
    );

    Ok(EffectiveConfig {
        project,
        user,
        db_path,
        resolved_output,
    })
}

/// Database location: `--db` > `COHORT_DB` > `[store].path` > default.
#[must_use]
pub fn resolve_db_path(
    project_root: &Path,
    cli_db: Option<&Path>,
    env_db: Option<&Path>,
    configured: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_db.or(env_db) {
        return path.to_path_buf();
    }
    match configured {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => project_root.join(path),
        None => project_root.join(PROJECT_DIR).join(DEFAULT_DB_FILE),
    }
}

fn resolve_output(cli_json: bool, user_output: Option<String>, env_format: Option<String>) -> String {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "human" => Some("pretty"),
            "text" | "table" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json".to_string();
    }

    if let Some(mode) = env_format.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if let Some(mode) = user_output.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if std::io::stdout().is_terminal() {
        "pretty".to_string()
    } else {
        "text".to_string()
    }
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

const fn default_expiry_minutes() -> i64 {
    1_440
}

const fn default_code_length() -> usize {
    DEFAULT_CODE_LENGTH
}

const fn default_busy_retries() -> u32 {
    3
}
