//! Centralized channel naming scheme
//!
//! A channel name `N` maps to a fixed set of OS resources:
//! - segment file `/dev/shm/{N}_sh_mem` (header + payload)
//! - semaphores `/{N}_sh_obj.{mutex,ready,drain,published}` (the header gates)
//! - run flag file `/dev/shm/{N}_run`
//!
//! Names are process-wide singletons: two unrelated channels must not reuse
//! `N`. Having the mapping in one place keeps producers and consumers from
//! disagreeing about paths.

use crate::errors::ChannelError;
use crate::gate::{Gate, GateError};
use nix::errno::Errno;

/// Directory backing the segment and run-flag files.
pub const SHM_DIR: &str = "/dev/shm";

/// Default frame segment size (6MB - enough for 1920x1080 RGB plus header).
pub const DEFAULT_FRAME_SEGMENT_LEN: usize = 6 * 1024 * 1024;

pub fn segment_path(name: &str) -> String {
    format!("{SHM_DIR}/{name}_sh_mem")
}

pub fn run_flag_path(name: &str) -> String {
    format!("{SHM_DIR}/{name}_run")
}

pub fn mutex_gate(name: &str) -> String {
    format!("/{name}_sh_obj.mutex")
}

pub fn ready_gate(name: &str) -> String {
    format!("/{name}_sh_obj.ready")
}

pub fn drain_gate(name: &str) -> String {
    format!("/{name}_sh_obj.drain")
}

pub fn published_gate(name: &str) -> String {
    format!("/{name}_sh_obj.published")
}

/// Reject names that cannot form a valid shm path or semaphore name.
pub fn validate(name: &str) -> Result<(), ChannelError> {
    if name.is_empty()
        || name.len() > 200
        || name.contains('/')
        || name.contains('\0')
        || name.starts_with('.')
    {
        return Err(ChannelError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Remove every OS resource backing channel `name`.
///
/// Segments and semaphores outlive their participants, so an operator-level
/// cleanup step is required between independent runs that reuse a name.
/// Resources that are already gone are not an error.
pub fn unlink_channel(name: &str) -> Result<(), ChannelError> {
    validate(name)?;

    for path in [segment_path(name), run_flag_path(name)] {
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!("Removed {}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ChannelError::Segment(e)),
        }
    }

    for gate in [
        mutex_gate(name),
        ready_gate(name),
        drain_gate(name),
        published_gate(name),
    ] {
        match Gate::unlink(&gate) {
            Ok(()) => tracing::debug!("Unlinked {}", gate),
            Err(GateError::OpFailed(Errno::ENOENT)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
