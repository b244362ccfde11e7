//! `VolumeEngine` backed by the host `zfs` binary. `system` maps the engine
//! operations onto CLI invocations, `command` spawns and streams the
//! processes, and `parse` covers output parsing and name checks.

mod command;
mod parse;
mod system;

pub use system::{SystemVolumeEngine, DEFAULT_ZFS_PATHS};
