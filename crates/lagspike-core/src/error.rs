//! Error types for lagspike-core

use std::fmt::Write;
use thiserror::Error;

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<(String, String)>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a labelled command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push((label.into(), command.into()));
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for (label, command) in &self.commands {
                let _ = writeln!(output, "    - {label}: {command}");
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for lagspike-core
#[derive(Error, Debug)]
pub enum Error {
    /// A detection session is already running in this process
    #[error("Lag spike profiling is already in progress")]
    SessionActive,

    /// The thread introspection backend could not enumerate threads
    #[error("Introspection error: {0}")]
    Introspection(String),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Runtime errors (worker spawn failures and the like)
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// The detector thread panicked
    #[error("Detector panicked: {0}")]
    Panicked(String),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::SessionActive => Some(
                Remediation::new("Wait for the running session to finish, then start a new one.")
                    .alternative("Sessions end on their own once their duration elapses."),
            ),
            Self::Introspection(_) => Some(
                Remediation::new("Check that /proc/self/task is readable by this process.")
                    .command("Inspect threads", "ls /proc/self/task")
                    .alternative("Run with threads.all_threads = false to narrow collection."),
            ),
            Self::Config(err) => Some(err.remediation()),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .alternative("Verify the log file directory exists and is writable."),
            ),
            Self::Json(_) => None,
            Self::Runtime(_) | Self::Panicked(_) => Some(
                Remediation::new("Check the log for the failure cause and start a new session.")
                    .alternative("If the failure persists, report it with the logged cause."),
            ),
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    /// Failed to read config file
    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    /// TOML parse error
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Invalid configuration value
    #[error("Invalid config value: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => {
                Remediation::new(format!("Create the config file at {path} or unset LAGSPIKE_CONFIG."))
                    .command("Write defaults", format!("lagspike config > {path}"))
            }
            Self::ReadFailed(path, _) => {
                Remediation::new(format!("Check permissions on {path}."))
            }
            Self::ParseError(_) => Remediation::new("Fix the TOML syntax error and retry.")
                .command("Show defaults", "lagspike config"),
            Self::ValidationError(_) => {
                Remediation::new("Correct the rejected value; thresholds must be positive.")
            }
        }
    }
}
