use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub workspace: Option<PathBuf>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub listing: ListingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
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
    /// Load configuration from a YAML file.
    ///
    /// A missing file yields the defaults. `${VAR}` references are expanded
    /// before parsing.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path.as_ref()).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        Ok(serde_saphyr::from_str(&expanded)?)
    }
}

/// Resolve `path` against the directory holding the config file.
///
/// Absolute paths are returned unchanged.
pub fn resolve_path(config_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(path)
}

// ============================================================================
// Default Paths
// ============================================================================

/// Default workspace directory (relative to config file).
pub const DEFAULT_WORKSPACE: &str = ".vidgate";
/// Per-session client state (relative to workspace).
pub const DEFAULT_SESSIONS_DIR: &str = "sessions";
/// Upload staging area (relative to workspace).
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";
/// Catalog document (relative to workspace).
pub const DEFAULT_CATALOG_FILE: &str = "catalog.yaml";

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand `${VAR}`, `${VAR:-default}` and `$$` in `input`.
///
/// A `$` not followed by `{` or `$` is kept literally. Nested references are
/// not supported.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];

        if let Some(after) = tail.strip_prefix('$') {
            out.push('$');
            rest = after;
        } else if let Some(reference) = tail.strip_prefix('{') {
            let close = reference
                .find('}')
                .ok_or(ConfigError::UnclosedVarReference)?;
            out.push_str(&lookup_var(&reference[..close])?);
            rest = &reference[close + 1..];
        } else {
            out.push('$');
            rest = tail;
        }
    }

    out.push_str(rest);
    Ok(out)
}

/// Resolve the body of a `${...}` reference.
fn lookup_var(reference: &str) -> Result<String, ConfigError> {
    let (name, default) = match reference.split_once(":-") {
        Some((name, default)) => (name, Some(default)),
        None => (reference, None),
    };

    match (std::env::var(name), default) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) => Ok(default.to_string()),
        (Err(_), None) => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1024
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_retain_events() -> u64 {
    4096
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_chunk_size() -> u64 {
    1024 * 1024
}

fn default_wait_timeout() -> u64 {
    30
}

fn default_max_chunk_bytes() -> usize {
    8 * 1024 * 1024
}

fn default_finalize_timeout() -> u64 {
    600
}

fn default_finalize_attempts() -> u32 {
    3
}

fn default_page_size() -> i32 {
    100
}

fn default_page_timeout() -> u64 {
    20
}

fn default_state_timeout() -> u64 {
    10
}

fn default_probe_command() -> String {
    "ffprobe".to_string()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Applies to non-streaming routes only.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// If set, admin endpoints require this bearer token. Otherwise they only
    /// accept loopback callers.
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            max_connections: default_max_connections(),
            admin_token: None,
        }
    }
}

// ============================================================================
// ClientConfig
// ============================================================================

/// The protocol-client bridge spawned once per session.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Bridge executable. Relative paths resolve against the config file.
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub api_id: i32,
    #[serde(default)]
    pub api_hash: String,
    /// How long one `receive` call blocks before yielding.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            api_id: 0,
            api_hash: String::new(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

// ============================================================================
// SessionsConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionsConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Events kept behind the newest one when no waiter needs older entries.
    #[serde(default = "default_retain_events")]
    pub retain_events: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            path: None,
            retain_events: default_retain_events(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

// ============================================================================
// StreamingConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StreamingConfig {
    /// Bytes served when the range is open-ended or absent.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_seconds: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            wait_timeout_seconds: default_wait_timeout(),
        }
    }
}

// ============================================================================
// UploadConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UploadConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
    #[serde(default = "default_finalize_timeout")]
    pub finalize_timeout_seconds: u64,
    #[serde(default = "default_finalize_attempts")]
    pub finalize_attempts: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_chunk_bytes: default_max_chunk_bytes(),
            finalize_timeout_seconds: default_finalize_timeout(),
            finalize_attempts: default_finalize_attempts(),
        }
    }
}

// ============================================================================
// ListingConfig / AuthConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListingConfig {
    #[serde(default = "default_page_size")]
    pub page_size: i32,
    #[serde(default = "default_page_timeout")]
    pub page_timeout_seconds: u64,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            page_timeout_seconds: default_page_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    /// Bound for `/auth/get_state` without `wait_for`.
    #[serde(default = "default_state_timeout")]
    pub state_timeout_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            state_timeout_seconds: default_state_timeout(),
        }
    }
}

// ============================================================================
// CatalogConfig / ProbeConfig
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_probe_command")]
    pub command: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_probe_command(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
