//! TOML configuration.
//!
//! Every field has a default, so an empty file (or no file) is a valid config.
//! Durations are given in seconds.

use crate::executor::{RunOptions, TimeoutPolicy};
use crate::login::{Credentials, LoginProbe};
use crate::pagination::PaginationHandler;
use crate::session::PollSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "seriallink.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub session: SessionConfig,
    pub pagination: PaginationConfig,
    pub playbook: PlaybookConfig,
    pub login: LoginConfig,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnTimeout {
    #[default]
    Abort,
    Continue,
    Retry,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub prompt_symbol: String,
    pub wait_timeout: f64,
    pub login_wait_timeout: f64,
    pub line_terminator: String,
    pub init_sequence: bool,
    pub initial_read: f64,
    pub on_timeout: OnTimeout,
    pub timeout_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prompt_symbol: ">".to_string(),
            wait_timeout: 30.0,
            login_wait_timeout: 10.0,
            line_terminator: "\n".to_string(),
            init_sequence: true,
            initial_read: 2.0,
            on_timeout: OnTimeout::Abort,
            timeout_retries: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PaginationConfig {
    pub enabled: bool,
    pub response_delay: f64,
    pub custom_patterns: Vec<String>,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            response_delay: 0.1,
            custom_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlaybookConfig {
    /// Relative paths are resolved against the config file's directory.
    pub file: PathBuf,
}

impl Default for PlaybookConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("playbook.txt"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoginConfig {
    pub username: String,
    pub password: String,
    pub username_prompt: String,
    pub password_prompt: String,
    pub probe: bool,
    pub probe_lines: Vec<String>,
    pub probe_settle: f64,
    pub prompt_markers: Vec<String>,
    pub help_keywords: Vec<String>,
    pub login_markers: Vec<String>,
    pub login_wait_keywords: Vec<String>,
}

impl Default for LoginConfig {
    fn default() -> Self {
        let probe = LoginProbe::default();
        let credentials = Credentials::new("", "");
        Self {
            username: String::new(),
            password: String::new(),
            username_prompt: credentials.username_prompt,
            password_prompt: credentials.password_prompt,
            probe: true,
            probe_lines: probe.probe_lines,
            probe_settle: probe.settle.as_secs_f64(),
            prompt_markers: probe.prompt_markers,
            help_keywords: probe.help_keywords,
            login_markers: probe.login_markers,
            login_wait_keywords: probe.login_wait_keywords,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Console program to spawn, e.g. `picocom`.
    pub command: Option<String>,
    pub args: Vec<String>,
}

fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("expected a nonnegative number of seconds, got {value}"),
        });
    }
    Duration::try_from_secs_f64(value).map_err(|err| ConfigError::Invalid {
        field,
        reason: err.to_string(),
    })
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise return the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.run_options().map(|_| ())
    }

    /// The playbook path, resolved against `config_dir` when relative.
    pub fn playbook_path(&self, config_dir: Option<&Path>) -> PathBuf {
        match config_dir {
            Some(dir) if self.playbook.file.is_relative() => dir.join(&self.playbook.file),
            _ => self.playbook.file.clone(),
        }
    }

    /// Credentials, when both a username and a password are configured.
    pub fn credentials(&self) -> Option<Credentials> {
        if self.login.username.is_empty() || self.login.password.is_empty() {
            return None;
        }
        let mut credentials = Credentials::new(&self.login.username, &self.login.password);
        credentials.username_prompt = self.login.username_prompt.clone();
        credentials.password_prompt = self.login.password_prompt.clone();
        Some(credentials)
    }

    pub fn run_options(&self) -> Result<RunOptions, ConfigError> {
        let session = &self.session;
        let wait_timeout = seconds("session.wait_timeout", session.wait_timeout)?;
        if wait_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "session.wait_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }

        let on_timeout = match session.on_timeout {
            OnTimeout::Abort => TimeoutPolicy::Abort,
            OnTimeout::Continue => TimeoutPolicy::Continue,
            OnTimeout::Retry => TimeoutPolicy::Retry(session.timeout_retries),
        };

        let login_probe = if self.login.probe {
            Some(LoginProbe {
                probe_lines: self.login.probe_lines.clone(),
                settle: seconds("login.probe_settle", self.login.probe_settle)?,
                prompt_markers: self.login.prompt_markers.clone(),
                help_keywords: self.login.help_keywords.clone(),
                login_markers: self.login.login_markers.clone(),
                login_wait_keywords: self.login.login_wait_keywords.clone(),
            })
        } else {
            None
        };

        let pagination = PaginationHandler::new()
            .with_enabled(self.pagination.enabled)
            .with_response_delay(seconds(
                "pagination.response_delay",
                self.pagination.response_delay,
            )?)
            .with_custom_patterns(&self.pagination.custom_patterns);

        Ok(RunOptions {
            wait_timeout,
            login_wait_timeout: seconds("session.login_wait_timeout", session.login_wait_timeout)?,
            prompt_symbol: session.prompt_symbol.clone(),
            line_terminator: session.line_terminator.clone(),
            init_sequence: session.init_sequence,
            initial_read: seconds("session.initial_read", session.initial_read)?,
            login_probe,
            pagination,
            poll: PollSettings::default(),
            on_timeout,
        })
    }
}
