use crate::names;
use nix::errno::Errno;
use std::ffi::CString;
use std::os::raw::c_int;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("failed to open gate: {0}")]
    OpenFailed(Errno),
    #[error("gate operation failed: {0}")]
    OpFailed(Errno),
    #[error("invalid gate name")]
    InvalidName,
}

/// A counting permit backed by a named POSIX semaphore.
///
/// Gates admit a bounded number of waiters once: the producer posts a permit
/// per registered consumer, each consumer consumes exactly one. Named
/// semaphores live in their own kernel namespace, so every process that
/// opens the same name shares the same count.
pub struct Gate {
    sem: *mut libc::sem_t,
}

impl Gate {
    /// Open the named gate, creating it with `initial_value` permits if it
    /// does not exist yet. Creation is idempotent: an existing gate keeps
    /// its current count.
    pub fn ensure(name: &str, initial_value: u32) -> Result<Self, GateError> {
        let c_name = CString::new(name).map_err(|_| GateError::InvalidName)?;

        let sem = unsafe { libc::sem_open(c_name.as_ptr(), libc::O_CREAT, 0o644, initial_value) };

        if sem == libc::SEM_FAILED {
            return Err(GateError::OpenFailed(Errno::last()));
        }

        Ok(Self { sem })
    }

    pub fn wait(&self) -> Result<(), GateError> {
        loop {
            let ret = unsafe { libc::sem_wait(self.sem) };
            if ret == 0 {
                return Ok(());
            }
            match Errno::last() {
                Errno::EINTR => continue,
                e => return Err(GateError::OpFailed(e)),
            }
        }
    }

    /// Wait for a permit up to `timeout`. Returns `Ok(false)` on timeout
    /// without consuming anything.
    pub fn timed_wait(&self, timeout: Duration) -> Result<bool, GateError> {
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
            return Err(GateError::OpFailed(Errno::last()));
        }

        let nanos = now.tv_nsec as i64 + timeout.subsec_nanos() as i64;
        let deadline = libc::timespec {
            tv_sec: now.tv_sec
                + timeout.as_secs() as libc::time_t
                + (nanos / 1_000_000_000) as libc::time_t,
            tv_nsec: nanos % 1_000_000_000,
        };

        loop {
            let ret = unsafe { libc::sem_timedwait(self.sem, &deadline) };
            if ret == 0 {
                return Ok(true);
            }
            match Errno::last() {
                Errno::ETIMEDOUT => return Ok(false),
                Errno::EINTR => continue,
                e => return Err(GateError::OpFailed(e)),
            }
        }
    }

    /// Consume a permit only if one is immediately available.
    pub fn try_wait(&self) -> Result<bool, GateError> {
        let ret = unsafe { libc::sem_trywait(self.sem) };
        if ret == 0 {
            return Ok(true);
        }
        match Errno::last() {
            Errno::EAGAIN => Ok(false),
            e => Err(GateError::OpFailed(e)),
        }
    }

    pub fn post(&self) -> Result<(), GateError> {
        let ret = unsafe { libc::sem_post(self.sem) };
        if ret != 0 {
            return Err(GateError::OpFailed(Errno::last()));
        }
        Ok(())
    }

    pub fn value(&self) -> Result<i32, GateError> {
        let mut val: c_int = 0;
        let ret = unsafe { libc::sem_getvalue(self.sem, &mut val) };
        if ret != 0 {
            return Err(GateError::OpFailed(Errno::last()));
        }
        Ok(val)
    }

    pub fn unlink(name: &str) -> Result<(), GateError> {
        let c_name = CString::new(name).map_err(|_| GateError::InvalidName)?;
        let ret = unsafe { libc::sem_unlink(c_name.as_ptr()) };
        if ret != 0 {
            return Err(GateError::OpFailed(Errno::last()));
        }
        Ok(())
    }
}

impl Drop for Gate {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

unsafe impl Send for Gate {}
unsafe impl Sync for Gate {}

/// The four gates of one channel header: the binary `mutex` guarding all
/// header mutation, plus the per-round `ready`, `drain`, and `published`
/// signals.
pub(crate) struct GateSet {
    pub mutex: Gate,
    pub ready: Gate,
    pub drain: Gate,
    pub published: Gate,
}

impl GateSet {
    pub fn ensure(channel: &str) -> Result<Self, GateError> {
        Ok(Self {
            mutex: Gate::ensure(&names::mutex_gate(channel), 1)?,
            ready: Gate::ensure(&names::ready_gate(channel), 0)?,
            drain: Gate::ensure(&names::drain_gate(channel), 0)?,
            published: Gate::ensure(&names::published_gate(channel), 0)?,
        })
    }
}
