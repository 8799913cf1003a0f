#![forbid(unsafe_code)]

//! Supervise named groups of child processes whose membership survives a
//! restart of the supervisor.
//!
//! [`Groups`] is the entry point: it owns every live [`supervisor::Group`],
//! records each lifecycle transition in an append-only `SQLite` event log,
//! and captures every process's output under a root directory.

pub mod capture;
pub mod config;
pub mod errors;
pub mod models;
pub mod persistence;
pub mod supervisor;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use supervisor::Groups;
