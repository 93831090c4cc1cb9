use crate::errors::ChannelError;
use crate::frame::FrameShape;
use crate::header::FRAME_DATA_OFFSET;
use crate::names;
use crate::round::WriterCore;
use std::sync::atomic::Ordering;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Producer endpoint of a frame channel.
///
/// Beyond the lockstep round protocol this owns capacity negotiation: the
/// writer is the only participant permitted to grow the segment, which it
/// does before the first frame of a new, larger shape. Every capacity growth
/// bumps the header generation so attached readers detect that their
/// zero-copy views are stale and re-attach instead of dereferencing moved
/// memory.
pub struct FrameWriter {
    core: WriterCore,
    frame_count: u64,
}

impl FrameWriter {
    /// Create or attach to channel `name` at the default segment size and
    /// claim its writer token.
    pub fn bind(name: &str) -> Result<Self, ChannelError> {
        Self::bind_with_capacity(name, names::DEFAULT_FRAME_SEGMENT_LEN)
    }

    /// As `bind`, with an explicit initial capacity (useful for tests and
    /// for pipelines that know their resolution up front).
    pub fn bind_with_capacity(name: &str, capacity: usize) -> Result<Self, ChannelError> {
        let core = WriterCore::bind(name, capacity.max(FRAME_DATA_OFFSET))?;
        let frame_count = core
            .segment
            .header()
            .frame
            .frame_number
            .load(Ordering::Acquire);
        Ok(Self { core, frame_count })
    }

    /// Publish one frame. Blocks up to `timeout` for the previous round to
    /// drain; `Ok(false)` means the round is still in flight and nothing was
    /// written.
    ///
    /// `pixels.len()` must equal `shape.byte_len()`.
    pub fn write_frame(
        &mut self,
        shape: FrameShape,
        pixels: &[u8],
        timeout: Duration,
    ) -> Result<bool, ChannelError> {
        if pixels.len() != shape.byte_len() {
            return Err(ChannelError::ShapeMismatch);
        }

        if !self.core.await_drain(timeout)? {
            return Ok(false);
        }

        let timestamp_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let frame_number = self.frame_count + 1;
        let needed = FRAME_DATA_OFFSET + shape.byte_len();

        self.core.publish_round(|segment| {
            if needed > segment.len() {
                // No consumer is in its critical section here (the mutex is
                // held and the previous round has drained), so nobody is
                // reading the bytes this remap may move.
                segment.grow(needed)?;
                let generation = segment.header().generation.fetch_add(1, Ordering::AcqRel) + 1;
                tracing::info!(
                    new_len = segment.len(),
                    generation,
                    "Grew frame segment; readers must re-attach"
                );
            }

            let header = segment.header();
            header.frame.format.store(shape.format as u32, Ordering::Release);
            header.frame.width.store(shape.width, Ordering::Release);
            header.frame.height.store(shape.height, Ordering::Release);
            header
                .frame
                .byte_offset
                .store(FRAME_DATA_OFFSET as u64, Ordering::Release);
            header
                .frame
                .byte_len
                .store(shape.byte_len() as u64, Ordering::Release);
            header.frame.frame_number.store(frame_number, Ordering::Release);
            header.frame.timestamp_ns.store(timestamp_ns, Ordering::Release);

            let dst = segment.payload_mut_ptr(FRAME_DATA_OFFSET);
            unsafe { std::ptr::copy_nonoverlapping(pixels.as_ptr(), dst, pixels.len()) };
            Ok(())
        })?;

        self.frame_count = frame_number;
        Ok(true)
    }

    /// Current capacity-change counter; readers holding an older value must
    /// re-attach before reading.
    pub fn frame_generation(&self) -> u64 {
        self.core.segment.header().generation.load(Ordering::Acquire)
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn participant_count(&self) -> u32 {
        self.core
            .segment
            .header()
            .participant_count
            .load(Ordering::Acquire)
    }
}
