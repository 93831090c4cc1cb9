use crate::errors::ChannelError;
use crate::gate::Gate;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// SAFETY & MEMORY ORDERING:
///
/// This header defines the shared memory layout at offset 0 of every
/// channel segment. It is only ever accessed through a cast of the mapped
/// base pointer, never constructed by value.
///
/// All round bookkeeping (`participant_count`, `round_arrivals`,
/// `round_expected`, `round_open`, `round_id`) is mutated while holding the
/// channel's mutex gate; the semaphore syscalls provide the cross-process
/// synchronization. The fields are still atomics so that concurrent access
/// from several processes is defined, and loads/stores use Acquire/Release
/// so a reader that observed a gate permit also observes the bookkeeping
/// written before the permit was posted.
///
/// `generation` is bumped (under the mutex) whenever the producer grows the
/// segment; readers compare it against the generation they attached at and
/// refuse to dereference a descriptor through a stale mapping.
///
/// Alignment:
/// The `#[repr(C, align(8))]` keeps the AtomicU64 fields 8-byte aligned,
/// which is required for atomic operations.
#[repr(C, align(8))]
pub struct ChannelHeader {
    /// Identifies an initialized channel header; anything else is garbage.
    pub magic: AtomicU32,
    /// Find-or-construct state word: UNINIT -> INITIALIZING -> READY.
    pub state: AtomicU32,
    /// Consumers currently registered on this channel.
    pub participant_count: AtomicU32,
    /// Consumers that completed the critical section in the current round.
    pub round_arrivals: AtomicU32,
    /// `participant_count` as snapshotted by the producer when the round
    /// opened. Joins during an in-flight round take effect next round.
    pub round_expected: AtomicU32,
    /// Nonzero while a published round has not yet fully drained.
    pub round_open: AtomicU32,
    /// Single-writer token: pid of the attached producer, 0 if none.
    pub producer_pid: AtomicU32,
    _pad: AtomicU32,
    /// Incremented once per publish.
    pub round_id: AtomicU64,
    /// Incremented whenever the segment's capacity changes.
    pub generation: AtomicU64,
    /// Frame payload descriptor; unused by value channels.
    pub frame: FrameDesc,
}

/// Descriptor referencing pixel bytes elsewhere in the segment.
#[repr(C)]
pub struct FrameDesc {
    pub format: AtomicU32,
    pub width: AtomicU32,
    pub height: AtomicU32,
    _reserved: AtomicU32,
    pub byte_offset: AtomicU64,
    pub byte_len: AtomicU64,
    pub frame_number: AtomicU64,
    pub timestamp_ns: AtomicU64,
}

pub(crate) const HEADER_MAGIC: u32 = u32::from_le_bytes(*b"trkC");

pub(crate) const STATE_UNINIT: u32 = 0;
pub(crate) const STATE_INITIALIZING: u32 = 1;
pub(crate) const STATE_READY: u32 = 2;

/// Byte offset of an inline value payload, directly after the header.
pub const VALUE_OFFSET: usize = (std::mem::size_of::<ChannelHeader>() + 7) & !7;

/// Byte offset of frame pixel data. Page aligned so growing the data region
/// never moves it relative to the header.
pub const FRAME_DATA_OFFSET: usize = 4096;

const _: () = assert!(VALUE_OFFSET <= FRAME_DATA_OFFSET);

impl ChannelHeader {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Reset all bookkeeping. Runs exactly once, in the process that wins
    /// the find-or-construct race, before `state` turns READY.
    pub(crate) fn reset(&self) {
        self.participant_count.store(0, Ordering::Release);
        self.round_arrivals.store(0, Ordering::Release);
        self.round_expected.store(0, Ordering::Release);
        self.round_open.store(0, Ordering::Release);
        self.producer_pid.store(0, Ordering::Release);
        self.round_id.store(0, Ordering::Release);
        self.generation.store(0, Ordering::Release);
        self.frame.format.store(0, Ordering::Release);
        self.frame.width.store(0, Ordering::Release);
        self.frame.height.store(0, Ordering::Release);
        self.frame.byte_offset.store(0, Ordering::Release);
        self.frame.byte_len.store(0, Ordering::Release);
        self.frame.frame_number.store(0, Ordering::Release);
        self.frame.timestamp_ns.store(0, Ordering::Release);
        self.magic.store(HEADER_MAGIC, Ordering::Release);
    }

    /// Record one consumer arrival for the open round and, if it was the
    /// last expected arrival, signal the drain gate and reset the count.
    /// Caller must hold the channel mutex.
    pub(crate) fn record_arrival(&self, drain: &Gate) -> Result<(), ChannelError> {
        let expected = self.round_expected.load(Ordering::Acquire);
        let arrivals = self.round_arrivals.load(Ordering::Acquire);

        if arrivals >= expected {
            return Err(ChannelError::ProtocolViolation(
                "round arrivals exceeded expected participants",
            ));
        }

        if arrivals + 1 == expected {
            self.round_arrivals.store(0, Ordering::Release);
            self.round_open.store(0, Ordering::Release);
            drain.post()?;
        } else {
            self.round_arrivals.store(arrivals + 1, Ordering::Release);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_alignment() {
        assert_eq!(
            std::mem::align_of::<ChannelHeader>(),
            8,
            "header must be 8-byte aligned for AtomicU64 fields"
        );
    }

    #[test]
    fn test_value_offset_past_header() {
        assert!(VALUE_OFFSET >= ChannelHeader::SIZE);
        assert_eq!(VALUE_OFFSET % 8, 0);
    }

    #[test]
    fn test_frame_data_offset_page_aligned() {
        assert_eq!(FRAME_DATA_OFFSET % 4096, 0);
        assert!(FRAME_DATA_OFFSET >= ChannelHeader::SIZE);
    }
}
