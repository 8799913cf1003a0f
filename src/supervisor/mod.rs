//! Process supervision: per-group supervisors and the durable registry
//! that owns them.

pub mod group;
pub mod registry;

pub use group::{Group, Outcome, ProcessInfo};
pub use nix::sys::signal::Signal;
pub use registry::Groups;
