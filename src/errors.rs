//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every supervision and persistence failure mode.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// The OS refused to start a process.
    Launch(String),
    /// Signal delivery to a supervised process failed.
    Signal(String),
    /// A deadline elapsed before every process finished.
    WaitTimeout(String),
    /// A supervised process terminated with a failure.
    ProcessExit {
        /// Identity of the command whose process failed.
        command_id: String,
        /// Exit status or wait failure reported for the process.
        detail: String,
    },
    /// Requested group or command does not exist.
    NotFound(String),
    /// A live group with the requested name already exists.
    Conflict(String),
    /// Caller supplied an unusable argument.
    InvalidArgument(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::Signal(msg) => write!(f, "signal: {msg}"),
            Self::WaitTimeout(msg) => write!(f, "wait timeout: {msg}"),
            Self::ProcessExit { command_id, detail } => {
                write!(f, "process exit: command {command_id}: {detail}")
            }
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
