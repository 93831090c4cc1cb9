use crate::errors::ChannelError;
use crate::header::{
    ChannelHeader, HEADER_MAGIC, STATE_INITIALIZING, STATE_READY, STATE_UNINIT,
};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// How long a late arriver waits for the find-or-construct winner to
/// finish initializing the header before giving up.
const INIT_WAIT: Duration = Duration::from_secs(2);

/// A named block of shared memory holding one channel header plus payload.
///
/// Backed by a file under /dev/shm mapped read-write. Create-or-attach:
/// the first opener creates the file at `min_len`; later openers attach to
/// whatever is there, whatever `min_len` they pass. Only the frame producer
/// ever grows a segment; every
/// other participant must treat its mapping as stale after a growth and
/// re-resolve it (see `remap`), keyed off the header generation counter.
pub struct Segment {
    file: File,
    mmap: MmapMut,
}

impl Segment {
    pub fn open_or_create(path: impl AsRef<Path>, min_len: usize) -> Result<Self, ChannelError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        // Size only a brand-new segment; an established one keeps its size
        // (and its header contents). Growth is reserved for the producer.
        if file.metadata()?.len() == 0 {
            file.set_len(min_len as u64)?;
        }

        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        Ok(Self { file, mmap })
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// The channel header at offset 0.
    ///
    /// The returned reference is tied to the current mapping; it cannot be
    /// held across `grow` or `remap` (the borrow checker enforces this).
    pub fn header(&self) -> &ChannelHeader {
        unsafe { &*(self.mmap.as_ptr() as *const ChannelHeader) }
    }

    pub(crate) fn payload_ptr(&self, offset: usize) -> *const u8 {
        debug_assert!(offset <= self.mmap.len());
        unsafe { self.mmap.as_ptr().add(offset) }
    }

    pub(crate) fn payload_mut_ptr(&mut self, offset: usize) -> *mut u8 {
        debug_assert!(offset <= self.mmap.len());
        unsafe { self.mmap.as_mut_ptr().add(offset) }
    }

    /// Idempotent find-or-construct of the channel header.
    ///
    /// Whichever process reaches a fresh (zero-filled) segment first claims
    /// the INITIALIZING state by compare-exchange, default-initializes the
    /// header in place, and publishes READY. Everyone else observes the same
    /// instance, spinning briefly if they caught the winner mid-flight.
    pub fn ensure_header(&self) -> Result<&ChannelHeader, ChannelError> {
        if self.mmap.len() < ChannelHeader::SIZE {
            return Err(ChannelError::BadHeader);
        }

        let header = self.header();
        match header.state.compare_exchange(
            STATE_UNINIT,
            STATE_INITIALIZING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                header.reset();
                header.state.store(STATE_READY, Ordering::Release);
                tracing::debug!("Constructed channel header");
            }
            Err(STATE_INITIALIZING) => {
                let start = Instant::now();
                while header.state.load(Ordering::Acquire) != STATE_READY {
                    if start.elapsed() > INIT_WAIT {
                        return Err(ChannelError::BadHeader);
                    }
                    std::thread::yield_now();
                }
            }
            Err(STATE_READY) => {}
            Err(_) => return Err(ChannelError::BadHeader),
        }

        if header.magic.load(Ordering::Acquire) != HEADER_MAGIC {
            return Err(ChannelError::BadHeader);
        }

        Ok(header)
    }

    /// Grow the backing file to `new_len` and remap. Producer-only; callers
    /// must bump the header generation under the channel mutex so attached
    /// readers detect the change instead of dereferencing a moved buffer.
    pub fn grow(&mut self, new_len: usize) -> Result<(), ChannelError> {
        if new_len as u64 > self.file.metadata()?.len() {
            self.file.set_len(new_len as u64)?;
        }
        self.remap()
    }

    /// Re-resolve the mapping against the file's current length.
    pub fn remap(&mut self) -> Result<(), ChannelError> {
        self.mmap = unsafe { MmapOptions::new().map_mut(&self.file)? };
        Ok(())
    }
}
