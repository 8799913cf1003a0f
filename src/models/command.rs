//! Command definitions and their stable identity.
//!
//! A [`Command`] is the durable half of a supervised process: the argument
//! vector (argument 0 is the program) and the environment assignments.
//! Its identity is either derived from those two lists or supplied by the
//! caller, and it names the capture files and every database row that
//! refers to the command.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{AppError, Result};

/// An immutable command definition with an attached identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Command {
    id: String,
    args: Vec<String>,
    env: Vec<String>,
}

impl Command {
    /// Build a command whose identity is derived from `args` and `env`.
    ///
    /// An empty `env` means the process inherits the supervisor's
    /// environment; otherwise only the listed `KEY=VALUE` pairs are set.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidArgument` if `args` is empty or an `env`
    /// entry is not a `KEY=VALUE` assignment.
    pub fn new(args: Vec<String>, env: Vec<String>) -> Result<Self> {
        ensure_env(&env)?;
        let id = derive_command_id(&args, &env)?;
        Ok(Self { id, args, env })
    }

    /// Build a command with a caller-assigned identity.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidArgument` if `args` is empty, if `id` is
    /// rejected by [`validate_command_id`] (it names files under the root),
    /// or if an `env` entry is not a `KEY=VALUE` assignment.
    pub fn with_id(id: impl Into<String>, args: Vec<String>, env: Vec<String>) -> Result<Self> {
        let id = id.into();
        ensure_args(&args)?;
        ensure_env(&env)?;
        validate_command_id(&id)?;
        Ok(Self { id, args, env })
    }

    /// Convenience constructor for an argument vector with an inherited
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidArgument` if `argv` is empty.
    pub fn from_argv<I, S>(argv: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(argv.into_iter().map(Into::into).collect(), Vec::new())
    }

    /// Stable identity of this command.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Full argument vector, program first.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Environment assignments in `KEY=VALUE` form.
    #[must_use]
    pub fn env(&self) -> &[String] {
        &self.env
    }

    /// Program to execute (argument 0).
    #[must_use]
    pub fn program(&self) -> &str {
        // Constructors reject an empty argument vector.
        self.args.first().map_or("", String::as_str)
    }
}

/// Derive the identity of a command from its arguments and environment.
///
/// Each list is hashed as its length followed by every element as
/// length-prefixed bytes (little-endian `u64`), arguments first. Reordering,
/// splitting or merging elements, or moving one between the lists all
/// change the result.
///
/// # Errors
///
/// Returns `AppError::InvalidArgument` if `args` is empty.
pub fn derive_command_id(args: &[String], env: &[String]) -> Result<String> {
    ensure_args(args)?;
    let mut hasher = Sha256::new();
    for list in [args, env] {
        hasher.update((list.len() as u64).to_le_bytes());
        for item in list {
            hasher.update((item.len() as u64).to_le_bytes());
            hasher.update(item.as_bytes());
        }
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Check that `id` can name capture files directly under the root.
///
/// # Errors
///
/// Returns `AppError::InvalidArgument` for an empty identity, one holding a
/// path separator, or one starting with a dot.
pub fn validate_command_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
        return Err(AppError::InvalidArgument(format!(
            "command id {id:?} is not a valid file name"
        )));
    }
    Ok(())
}

fn ensure_args(args: &[String]) -> Result<()> {
    if args.is_empty() {
        return Err(AppError::InvalidArgument(
            "a command needs at least the program name".into(),
        ));
    }
    Ok(())
}

fn ensure_env(env: &[String]) -> Result<()> {
    match env
        .iter()
        .find(|var| var.split_once('=').is_none_or(|(key, _)| key.is_empty()))
    {
        Some(bad) => Err(AppError::InvalidArgument(format!(
            "environment entry {bad:?} is not a KEY=VALUE assignment"
        ))),
        None => Ok(()),
    }
}
