use crate::errors::ChannelError;
use crate::header::VALUE_OFFSET;
use crate::round::ReaderCore;
use crate::types::ShmValue;
use std::time::Duration;

/// Consumer endpoint of a value channel.
///
/// Joining registers this process with the channel; the producer cannot
/// complete a round until every registered consumer has read it. Dropping
/// the reader (or calling `leave`) deregisters, upholding the mid-round
/// cleanup contract so the barrier never stalls on a departed consumer.
pub struct ValueReader<T: ShmValue> {
    core: ReaderCore,
    staged: Option<T>,
}

impl<T: ShmValue> ValueReader<T> {
    /// Attach to channel `name` (creating it if this consumer runs first)
    /// and register as a participant.
    pub fn join(name: &str) -> Result<Self, ChannelError> {
        let core = ReaderCore::join(name, VALUE_OFFSET + std::mem::size_of::<T>())?;
        if core.segment.len() < VALUE_OFFSET + std::mem::size_of::<T>() {
            return Err(ChannelError::BadHeader);
        }
        Ok(Self { core, staged: None })
    }

    /// Read this round's value, blocking up to `timeout` per protocol step.
    ///
    /// `Ok(None)` means not ready (gate timeout): no state was corrupted and
    /// the call can be retried indefinitely. A retry after a confirmation
    /// timeout resumes at the confirmation step; it never re-enters the
    /// critical section for the same round.
    pub fn try_read(&mut self, timeout: Duration) -> Result<Option<T>, ChannelError> {
        if !self.core.awaiting_confirmation() {
            let staged = self.core.try_begin(timeout, |segment| {
                let src = segment.payload_ptr(VALUE_OFFSET) as *const T;
                unsafe { std::ptr::read_volatile(src) }
            })?;
            match staged {
                Some(value) => self.staged = Some(value),
                None => return Ok(None),
            }
        }

        if !self.core.try_confirm(timeout)? {
            return Ok(None);
        }

        match self.staged.take() {
            Some(value) => Ok(Some(value)),
            None => Err(ChannelError::ProtocolViolation(
                "confirmed a round with no staged value",
            )),
        }
    }

    /// Deregister from the channel. Equivalent to dropping the reader, but
    /// surfaces cleanup errors.
    pub fn leave(mut self) -> Result<(), ChannelError> {
        self.core.leave()
    }
}
