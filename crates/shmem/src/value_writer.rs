use crate::errors::ChannelError;
use crate::header::VALUE_OFFSET;
use crate::round::WriterCore;
use crate::types::ShmValue;
use std::marker::PhantomData;
use std::time::Duration;

/// Producer endpoint of a value channel: holds the channel's single-writer
/// token and publishes one `T` per round, copied into the segment under the
/// channel mutex.
///
/// The channel is lockstep, not a queue: `publish` returns `Ok(false)` while
/// any registered consumer from the previous round has not finished reading,
/// and never silently drops an unread value.
pub struct ValueWriter<T: ShmValue> {
    core: WriterCore,
    _payload: PhantomData<T>,
}

impl<T: ShmValue> ValueWriter<T> {
    /// Create or attach to channel `name` and claim its writer token.
    /// Fails with `ProducerAttached` if another live process holds it.
    pub fn bind(name: &str) -> Result<Self, ChannelError> {
        let core = WriterCore::bind(name, VALUE_OFFSET + std::mem::size_of::<T>())?;
        // An established segment too small for T was created for some other
        // payload type; refusing here beats corrupting it.
        if core.segment.len() < VALUE_OFFSET + std::mem::size_of::<T>() {
            return Err(ChannelError::BadHeader);
        }
        Ok(Self {
            core,
            _payload: PhantomData,
        })
    }

    /// Publish one value. Blocks up to `timeout` for the previous round to
    /// drain; `Ok(false)` means the round is still in flight and nothing was
    /// written - retry or skip this cycle.
    pub fn publish(&mut self, value: &T, timeout: Duration) -> Result<bool, ChannelError> {
        if !self.core.await_drain(timeout)? {
            return Ok(false);
        }

        let value = *value;
        self.core.publish_round(|segment| {
            let dst = segment.payload_mut_ptr(VALUE_OFFSET) as *mut T;
            unsafe { std::ptr::write_volatile(dst, value) };
            Ok(())
        })?;

        Ok(true)
    }

    /// Consumers currently registered on the channel.
    pub fn participant_count(&self) -> u32 {
        self.core
            .segment
            .header()
            .participant_count
            .load(std::sync::atomic::Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::unlink_channel;
    use crate::types::Position2D;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unique_channel(tag: &str) -> String {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        format!(
            "vw_test_{}_{}_{}",
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

    #[test]
    fn test_bind_rejects_second_producer() {
        let name = unique_channel("dup");
        let _guard = Cleanup(name.clone());

        let _writer = ValueWriter::<Position2D>::bind(&name).unwrap();
        assert!(matches!(
            ValueWriter::<Position2D>::bind(&name),
            Err(ChannelError::ProducerAttached(_))
        ));
    }

    #[test]
    fn test_publish_without_consumers_completes() {
        let name = unique_channel("solo");
        let _guard = Cleanup(name.clone());

        let mut writer = ValueWriter::<Position2D>::bind(&name).unwrap();
        assert_eq!(writer.participant_count(), 0);

        let p = Position2D::at_pixel(1.0, 2.0);
        for _ in 0..10 {
            assert!(writer.publish(&p, Duration::from_millis(10)).unwrap());
        }
    }

    #[test]
    fn test_bind_rejects_invalid_name() {
        assert!(matches!(
            ValueWriter::<Position2D>::bind("bad/name"),
            Err(ChannelError::InvalidName(_))
        ));
    }
}
