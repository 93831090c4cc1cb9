use crate::errors::ChannelError;
use crate::names;
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::atomic::{AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped = 0,
    Running = 1,
}

impl RunState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RunState::Stopped),
            1 => Some(RunState::Running),
            _ => None,
        }
    }
}

/// The pipeline-wide run/stop flag, toggled by the supervising process and
/// polled by every worker between rounds.
///
/// One byte of shared memory holding an atomic U8; no round protocol, just
/// Release stores and Acquire loads.
pub struct RunControl {
    _mmap: MmapMut,
    state: &'static AtomicU8,
}

unsafe impl Send for RunControl {}
unsafe impl Sync for RunControl {}

impl RunControl {
    /// Create or open the run flag for pipeline `name`.
    pub fn open(name: &str) -> Result<Self, ChannelError> {
        names::validate(name)?;
        Self::with_path(&names::run_flag_path(name))
    }

    /// Create or open a run flag at an explicit path (useful for tests).
    pub fn with_path(path: &str) -> Result<Self, ChannelError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(path)?;

        if file.metadata()?.len() == 0 {
            file.set_len(1)?;
        }

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        let ptr = mmap.as_mut_ptr() as *const AtomicU8;
        let state = unsafe { &*ptr };

        Ok(Self { _mmap: mmap, state })
    }

    #[inline]
    pub fn get(&self) -> RunState {
        let value = self.state.load(Ordering::Acquire);
        RunState::from_u8(value).unwrap_or(RunState::Stopped)
    }

    #[inline]
    pub fn set(&self, state: RunState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.get() == RunState::Running
    }
}
