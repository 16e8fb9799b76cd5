use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::session::SessionSettings;
use crate::store::file::ResetPolicy;
use crate::transport::BridgeConfig;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub workspace: Option<PathBuf>,
    /// Credential areas, one subdirectory per session.
    #[serde(default)]
    pub auth_dir: Option<PathBuf>,
    /// JSONL log of sent messages.
    #[serde(default)]
    pub history_path: Option<PathBuf>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let expanded = expand_env_vars(&contents)?;
        Ok(serde_saphyr::from_str(&expanded)?)
    }

    /// Workspace directory, resolved against the config file.
    pub fn workspace_dir(&self, config_path: &Path) -> PathBuf {
        let workspace = self
            .workspace
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKSPACE));
        resolve_path(config_path, &workspace)
    }

    /// Credential root, resolved against the config file.
    pub fn auth_dir(&self, config_path: &Path) -> PathBuf {
        match &self.auth_dir {
            Some(dir) => resolve_path(config_path, dir),
            None => self.workspace_dir(config_path).join(DEFAULT_AUTH_DIR),
        }
    }

    /// History log path, resolved against the config file.
    pub fn history_path(&self, config_path: &Path) -> PathBuf {
        match &self.history_path {
            Some(path) => resolve_path(config_path, path),
            None => self.workspace_dir(config_path).join(DEFAULT_HISTORY_FILE),
        }
    }

    /// Timing settings for session actors.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            retry_delay: Duration::from_millis(self.reconnect.retry_delay_ms),
            construct_error_delay: Duration::from_millis(self.reconnect.construct_error_delay_ms),
            max_retry_attempts: self.reconnect.max_attempts,
            teardown_grace: Duration::from_millis(self.storage.teardown_grace_ms),
            poll_interval: Duration::from_millis(self.provisioning.poll_interval_ms),
            poll_attempts: self.provisioning.poll_attempts,
        }
    }

    /// Credential reset policy for the file auth store.
    pub fn reset_policy(&self) -> ResetPolicy {
        ResetPolicy {
            retries: self.storage.reset_retries,
            backoff: Duration::from_millis(self.storage.reset_backoff_ms),
            settle: Duration::from_millis(self.storage.settle_delay_ms),
        }
    }

    /// Bridge launch settings. A relative command path resolves against the
    /// config file; a bare command name is looked up on `PATH`.
    pub fn bridge_config(&self, config_path: &Path) -> BridgeConfig {
        let command = Path::new(&self.transport.command);
        let command = if command.components().count() > 1 {
            resolve_path(config_path, command).to_string_lossy().into_owned()
        } else {
            self.transport.command.clone()
        };

        BridgeConfig {
            command,
            args: self.transport.args.clone(),
            env: self.transport.env.clone(),
            init_timeout: Duration::from_secs(self.transport.init_timeout_seconds),
            request_timeout: Duration::from_secs(self.transport.request_timeout_seconds),
            shutdown_grace: Duration::from_millis(self.transport.shutdown_grace_ms),
        }
    }
}

/// Resolve a path relative to the config file directory.
///
/// If the path is absolute, it is returned as-is.
/// If the path is relative, it is joined with the config file's parent directory.
pub fn resolve_path(config_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }

    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    config_dir.join(path)
}

// ============================================================================
// Default Paths
// ============================================================================

/// Default workspace directory (relative to config file).
pub const DEFAULT_WORKSPACE: &str = ".relayd";
/// Default credential directory (relative to workspace).
pub const DEFAULT_AUTH_DIR: &str = "auth";
/// Default history file (relative to workspace).
pub const DEFAULT_HISTORY_FILE: &str = "history.jsonl";
/// Session initialized at startup when none are configured.
pub const DEFAULT_SESSION_ID: &str = "default";

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_construct_error_delay_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_poll_attempts() -> u32 {
    10
}

fn default_reset_retries() -> u32 {
    3
}

fn default_reset_backoff_ms() -> u64 {
    100
}

fn default_teardown_grace_ms() -> u64 {
    3_000
}

fn default_settle_delay_ms() -> u64 {
    2_000
}

fn default_bridge_command() -> String {
    "relayd-bridge".to_string()
}

fn default_init_timeout() -> u64 {
    120
}

fn default_request_timeout() -> u64 {
    30
}

fn default_shutdown_grace_ms() -> u64 {
    500
}

fn default_bootstrap() -> Vec<String> {
    vec![DEFAULT_SESSION_ID.to_string()]
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports the following syntax (shell-compatible):
/// - `${VAR}` - Required variable, errors if not set
/// - `${VAR:-default}` - Optional variable with default value
/// - `${VAR:-}` - Optional variable, empty string if not set
/// - `$$` - Escaped `$` (only needed before `{` to prevent expansion)
///
/// Nested expansion (`${VAR:-${DEFAULT}}`) is not supported.
///
/// ```yaml
/// transport:
///   command: ${RELAYD_BRIDGE:-./bridge/index.js}
///   env:
///     CHROME_PATH: ${CHROME_PATH}
/// ```
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        match chars.peek() {
            Some('$') => {
                chars.next();
                result.push('$');
            }
            Some('{') => {
                chars.next();
                let expanded = parse_var_reference(&mut chars)?;
                result.push_str(&expanded);
            }
            _ => result.push('$'),
        }
    }

    Ok(result)
}

/// Parse a variable reference after seeing `${`. Errors if `}` is missing.
fn parse_var_reference(
    chars: &mut std::iter::Peekable<std::str::Chars>,
) -> Result<String, ConfigError> {
    let mut var_name = String::new();
    let mut default_value: Option<String> = None;
    let mut found_closing_brace = false;

    while let Some(c) = chars.next() {
        if c == '}' {
            found_closing_brace = true;
            break;
        }
        if let Some(default) = default_value.as_mut() {
            default.push(c);
        } else if c == ':' && chars.peek() == Some(&'-') {
            chars.next();
            default_value = Some(String::new());
        } else {
            var_name.push(c);
        }
    }

    if !found_closing_brace {
        return Err(ConfigError::UnclosedVarReference);
    }

    match std::env::var(&var_name) {
        Ok(value) => Ok(value),
        Err(_) => default_value.ok_or(ConfigError::MissingEnvVar(var_name)),
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before retrying after auth failure or disconnection.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Delay before retrying after the transport failed to start.
    #[serde(default = "default_construct_error_delay_ms")]
    pub construct_error_delay_ms: u64,
    /// Give up after this many consecutive retries. Unset retries forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
            construct_error_delay_ms: default_construct_error_delay_ms(),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProvisioningConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            poll_attempts: default_poll_attempts(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_reset_retries")]
    pub reset_retries: u32,
    #[serde(default = "default_reset_backoff_ms")]
    pub reset_backoff_ms: u64,
    /// Pause after a transport is destroyed, before its files are removed.
    #[serde(default = "default_teardown_grace_ms")]
    pub teardown_grace_ms: u64,
    /// Pause after a credential area is recreated.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            reset_retries: default_reset_retries(),
            reset_backoff_ms: default_reset_backoff_ms(),
            teardown_grace_ms: default_teardown_grace_ms(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

/// Subprocess bridge launched once per session.
#[derive(Debug, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_bridge_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_init_timeout")]
    pub init_timeout_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            command: default_bridge_command(),
            args: Vec::new(),
            env: HashMap::new(),
            init_timeout_seconds: default_init_timeout(),
            request_timeout_seconds: default_request_timeout(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionsConfig {
    /// Sessions initialized at startup.
    #[serde(default = "default_bootstrap")]
    pub bootstrap: Vec<String>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            bootstrap: default_bootstrap(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
