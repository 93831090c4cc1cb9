use crate::errors::ChannelError;
use crate::frame::{FrameFormat, FrameShape, FrameView};
use crate::header::FRAME_DATA_OFFSET;
use crate::names;
use crate::round::ReaderCore;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Frame descriptor captured in the critical section, resolved into a view
/// only after the round is confirmed.
#[derive(Debug, Clone, Copy)]
struct StagedFrame {
    format: u32,
    width: u32,
    height: u32,
    byte_offset: usize,
    byte_len: usize,
    frame_number: u64,
    timestamp_ns: u64,
    /// Generation moved between our pre-check and the critical section; the
    /// round still completes but yields `StaleGeneration` instead of a view.
    stale: bool,
}

/// Consumer endpoint of a frame channel.
///
/// Holds its own mapping of the segment and binds zero-copy views against
/// it once per generation. When the producer grows the segment the
/// generation moves on, `read` fails with `StaleGeneration`, and the caller
/// must `reattach` before reading again - the mapping is re-derived, never
/// trusted across a capacity change.
pub struct FrameReader {
    core: ReaderCore,
    attached_generation: u64,
    staged: Option<StagedFrame>,
}

impl FrameReader {
    /// Attach to channel `name` (creating it at the default capacity if this
    /// consumer runs first) and register as a participant.
    pub fn join(name: &str) -> Result<Self, ChannelError> {
        let core = ReaderCore::join(name, names::DEFAULT_FRAME_SEGMENT_LEN)?;
        let attached_generation = core.segment.header().generation.load(Ordering::Acquire);
        Ok(Self {
            core,
            attached_generation,
            staged: None,
        })
    }

    /// Re-derive the mapping from the segment's current size and adopt the
    /// current generation. Required after any `StaleGeneration` result.
    pub fn reattach(&mut self) -> Result<(), ChannelError> {
        self.core.segment.remap()?;
        self.attached_generation = self.core.segment.header().generation.load(Ordering::Acquire);
        tracing::debug!(
            generation = self.attached_generation,
            "Re-attached to frame segment"
        );
        Ok(())
    }

    /// Generation this reader's views are bound to.
    pub fn attached_generation(&self) -> u64 {
        self.attached_generation
    }

    /// The channel's current capacity-change counter.
    pub fn frame_generation(&self) -> u64 {
        self.core.segment.header().generation.load(Ordering::Acquire)
    }

    /// Read this round's frame as a zero-copy view, blocking up to `timeout`
    /// per protocol step.
    ///
    /// `Ok(None)` means not ready; retry freely. `Err(StaleGeneration)`
    /// means the segment was resized: call `reattach`, then read again (the
    /// round that detected the resize mid-protocol is consumed and its
    /// frame skipped). The view borrows this reader and is valid only until
    /// the next call; use `FrameView::to_owned` to keep the data.
    pub fn read(&mut self, timeout: Duration) -> Result<Option<FrameView<'_>>, ChannelError> {
        if !self.core.awaiting_confirmation() {
            // Refuse to enter a round through a mapping we already know is
            // stale; nothing is consumed, the caller just re-attaches.
            if self.frame_generation() != self.attached_generation {
                return Err(ChannelError::StaleGeneration);
            }

            let attached = self.attached_generation;
            let staged = self.core.try_begin(timeout, |segment| {
                let header = segment.header();
                StagedFrame {
                    format: header.frame.format.load(Ordering::Acquire),
                    width: header.frame.width.load(Ordering::Acquire),
                    height: header.frame.height.load(Ordering::Acquire),
                    byte_offset: header.frame.byte_offset.load(Ordering::Acquire) as usize,
                    byte_len: header.frame.byte_len.load(Ordering::Acquire) as usize,
                    frame_number: header.frame.frame_number.load(Ordering::Acquire),
                    timestamp_ns: header.frame.timestamp_ns.load(Ordering::Acquire),
                    stale: header.generation.load(Ordering::Acquire) != attached,
                }
            })?;
            match staged {
                Some(desc) => self.staged = Some(desc),
                None => return Ok(None),
            }
        }

        if !self.core.try_confirm(timeout)? {
            return Ok(None);
        }

        let staged = self.staged.take().ok_or(ChannelError::ProtocolViolation(
            "confirmed a round with no staged frame",
        ))?;

        if staged.stale {
            return Err(ChannelError::StaleGeneration);
        }

        let format = FrameFormat::from_u32(staged.format).ok_or(
            ChannelError::ProtocolViolation("unknown pixel format in frame descriptor"),
        )?;

        // The descriptor must lie inside our mapping; with a matching
        // generation this always holds, so a miss means corruption.
        let end = staged
            .byte_offset
            .checked_add(staged.byte_len)
            .ok_or(ChannelError::ProtocolViolation(
                "frame descriptor escapes the mapped segment",
            ))?;
        if (staged.byte_len != 0 && staged.byte_offset < FRAME_DATA_OFFSET)
            || end > self.core.segment.len()
        {
            return Err(ChannelError::ProtocolViolation(
                "frame descriptor escapes the mapped segment",
            ));
        }

        let pixels = &self.core.segment.bytes()[staged.byte_offset..end];
        Ok(Some(FrameView {
            shape: FrameShape::new(staged.width, staged.height, format),
            frame_number: staged.frame_number,
            timestamp_ns: staged.timestamp_ns,
            pixels,
        }))
    }

    /// Deregister from the channel, surfacing cleanup errors.
    pub fn leave(mut self) -> Result<(), ChannelError> {
        self.core.leave()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_writer::FrameWriter;
    use crate::names::unlink_channel;
    use std::sync::atomic::AtomicU32;

    fn unique_channel(tag: &str) -> String {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        format!(
            "fr_test_{}_{}_{}",
            tag,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }

    struct Cleanup(String);
    impl Drop for Cleanup {
        fn drop(&mut self) {
            let _ = unlink_channel(&self.0);
        }
    }

    const T100: Duration = Duration::from_millis(100);

    #[test]
    fn test_read_times_out_with_no_producer() {
        let name = unique_channel("silent");
        let _guard = Cleanup(name.clone());

        let mut reader = FrameReader::join(&name).unwrap();
        assert!(reader.read(Duration::from_millis(10)).unwrap().is_none());
    }

    #[test]
    fn test_zero_copy_view_matches_written_pixels() {
        let name = unique_channel("view");
        let _guard = Cleanup(name.clone());

        let mut writer = FrameWriter::bind_with_capacity(&name, 256 * 1024).unwrap();
        let mut reader = FrameReader::join(&name).unwrap();

        let shape = FrameShape::new(64, 32, FrameFormat::Bgr8);
        let pixels: Vec<u8> = (0..shape.byte_len()).map(|i| (i % 251) as u8).collect();
        assert!(writer.write_frame(shape, &pixels, T100).unwrap());

        let view = reader.read(T100).unwrap().expect("frame must be ready");
        assert_eq!(view.shape, shape);
        assert_eq!(view.frame_number, 1);
        assert_eq!(view.pixels, &pixels[..]);
    }

    #[test]
    fn test_stale_generation_requires_reattach() {
        let name = unique_channel("stale");
        let _guard = Cleanup(name.clone());

        let mut writer = FrameWriter::bind_with_capacity(&name, FRAME_DATA_OFFSET).unwrap();
        let mut reader = FrameReader::join(&name).unwrap();
        assert_eq!(reader.attached_generation(), 0);

        // First frame forces the segment to grow past the reader's mapping.
        let shape = FrameShape::new(128, 128, FrameFormat::Rgb8);
        let pixels = vec![9u8; shape.byte_len()];
        assert!(writer.write_frame(shape, &pixels, T100).unwrap());

        match reader.read(T100) {
            Err(ChannelError::StaleGeneration) => {}
            other => panic!("expected StaleGeneration, got {other:?}"),
        }

        reader.reattach().unwrap();
        assert_eq!(reader.attached_generation(), 1);

        let view = reader.read(T100).unwrap().expect("frame must be ready");
        assert_eq!(view.pixels, &pixels[..]);
    }

    #[test]
    fn test_owned_frame_survives_next_round() {
        let name = unique_channel("owned");
        let _guard = Cleanup(name.clone());

        let mut writer = FrameWriter::bind_with_capacity(&name, 256 * 1024).unwrap();
        let mut reader = FrameReader::join(&name).unwrap();

        let shape = FrameShape::new(16, 16, FrameFormat::Gray8);

        let first = vec![1u8; shape.byte_len()];
        assert!(writer.write_frame(shape, &first, T100).unwrap());
        let owned = reader.read(T100).unwrap().unwrap().to_owned();

        let second = vec![2u8; shape.byte_len()];
        assert!(writer.write_frame(shape, &second, T100).unwrap());
        let view = reader.read(T100).unwrap().unwrap();

        assert_eq!(owned.pixels, first, "owned clone must keep round 1 bytes");
        assert_eq!(view.pixels, &second[..]);
    }
}
