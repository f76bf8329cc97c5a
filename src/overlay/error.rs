use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::overlay::types::{Source, SourceType};

/// Failure of a single external tool invocation.
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("{kind} command `{command}` exited with {}{}", exit_label(.exit_code), output_tail(.output))]
    Command {
        kind: SourceType,
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("failed to run {kind} command `{command}`: {message}")]
    Spawn {
        kind: SourceType,
        command: String,
        message: String,
    },

    #[error("{kind} tool is not installed (looked for `{command}`)")]
    Unavailable { kind: SourceType, command: String },

    #[error("filesystem error at {}: {message}", .path.display())]
    Filesystem { path: PathBuf, message: String },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "a signal".to_string(),
    }
}

fn output_tail(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let lines: Vec<&str> = trimmed.lines().collect();
    let start = lines.len().saturating_sub(5);
    format!(":\n    {}", lines[start..].join("\n    "))
}

impl BackendError {
    pub fn filesystem(path: impl Into<PathBuf>, err: impl fmt::Display) -> Self {
        BackendError::Filesystem {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Problems with a hook command template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HookError {
    #[error("hook command is empty")]
    Empty,

    #[error("cannot parse hook command: {0}")]
    Syntax(String),

    #[error("unknown placeholder `{{{0}}}` in hook command (only `{{path}}` is supported)")]
    UnknownToken(String),

    #[error("unterminated placeholder in hook command argument `{0}`")]
    Unterminated(String),
}

/// Why one catalog location contributed nothing.
#[derive(Debug, Clone)]
pub struct LocationFailure {
    pub location: String,
    pub reason: String,
}

impl fmt::Display for LocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.reason)
    }
}

/// One failed attempt while adding an overlay.
#[derive(Debug, Clone)]
pub struct SourceFailure {
    pub source: Source,
    pub error: BackendError,
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.error)
    }
}

/// Errors returned by overlay operations.
#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("no overlay catalog could be loaded:\n  {}", join_lines(.0))]
    CatalogUnavailable(Vec<LocationFailure>),

    #[error("signature verification failed for {location}: {message}")]
    Signature { location: String, message: String },

    #[error("overlay \"{name}\" is missing {}", .missing.join(" and "))]
    IncompleteEntry { name: String, missing: Vec<&'static str> },

    #[error("overlay \"{0}\" does not exist")]
    UnknownOverlay(String),

    #[error("overlay \"{0}\" is already installed")]
    AlreadyInstalled(String),

    #[error("overlay \"{name}\" needs {}, which is not installed", join_types(.kinds))]
    BackendUnavailable { name: String, kinds: Vec<SourceType> },

    #[error("overlay \"{name}\": {error}")]
    BackendCommand { name: String, error: BackendError },

    #[error("adding overlay \"{name}\" failed for every source:\n  {}", join_lines(.failures))]
    AllSourcesFailed {
        name: String,
        failures: Vec<SourceFailure>,
    },

    #[error("working copy of \"{name}\" is missing at {}", .path.display())]
    MissingWorkingCopy { name: String, path: PathBuf },

    #[error("failed to write {}: {message}", .path.display())]
    ConfigWrite { path: PathBuf, message: String },

    #[error("failed to write installed overlay list {}: {message}", .path.display())]
    StoreWrite { path: PathBuf, message: String },

    #[error("priority {0} is out of range (0-100)")]
    InvalidPriority(u16),

    #[error("invalid {key}: {source}")]
    HookTemplate {
        key: String,
        #[source]
        source: HookError,
    },

    #[error("interrupted while processing \"{0}\"")]
    Interrupted(String),

    #[error("configuration error: {0}")]
    Config(String),
}

fn join_lines<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("\n  ")
}

fn join_types(kinds: &[SourceType]) -> String {
    kinds
        .iter()
        .map(|k| k.tag())
        .collect::<Vec<_>>()
        .join(" or ")
}

impl OverlayError {
    pub fn is_interrupt(&self) -> bool {
        matches!(self, OverlayError::Interrupted(_))
    }
}

pub type OverlayResult<T> = Result<T, OverlayError>;
