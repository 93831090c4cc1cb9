use shmem::{
    ChannelError, FrameFormat, FrameReader, FrameShape, FrameWriter, unlink_channel,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn unique_channel(tag: &str) -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    format!(
        "frame_it_{}_{}_{}",
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

/// Concurrent producer/consumer over a frame channel: the consumer receives
/// every frame exactly once, in order, with the frame number embedded in the
/// pixel data matching the descriptor.
#[test]
fn test_concurrent_frame_producer_consumer() {
    let name = unique_channel("concurrent");
    let _guard = Cleanup(name.clone());

    const NUM_FRAMES: u64 = 30;
    const SHAPE: FrameShape = FrameShape {
        width: 64,
        height: 48,
        format: FrameFormat::Bgr8,
    };

    let mut writer = FrameWriter::bind_with_capacity(&name, 256 * 1024).unwrap();
    let mut reader = FrameReader::join(&name).unwrap();

    let consumer = thread::spawn(move || {
        let mut seen = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        while seen.len() < NUM_FRAMES as usize {
            assert!(Instant::now() < deadline, "consumer starved: {seen:?}");
            match reader.read(T100) {
                Ok(Some(view)) => {
                    assert_eq!(view.shape, SHAPE);
                    let mut embedded = [0u8; 8];
                    embedded.copy_from_slice(&view.pixels[..8]);
                    assert_eq!(
                        u64::from_le_bytes(embedded),
                        view.frame_number,
                        "pixel payload must match the descriptor's frame number"
                    );
                    seen.push(view.frame_number);
                }
                Ok(None) => {}
                Err(e) => panic!("read failed: {e}"),
            }
        }
        seen
    });

    for frame_number in 1..=NUM_FRAMES {
        let mut pixels = vec![0u8; SHAPE.byte_len()];
        pixels[..8].copy_from_slice(&frame_number.to_le_bytes());

        let deadline = Instant::now() + Duration::from_secs(10);
        while !writer.write_frame(SHAPE, &pixels, T100).unwrap() {
            assert!(Instant::now() < deadline, "publish starved at {frame_number}");
        }
    }

    let seen = consumer.join().expect("consumer thread panicked");
    let expected: Vec<u64> = (1..=NUM_FRAMES).collect();
    assert_eq!(seen, expected);
}

/// Three consumers of the same frame channel each see each frame once per
/// round, and the producer cannot advance until the slowest has read.
#[test]
fn test_three_frame_readers_share_each_round() {
    let name = unique_channel("readers");
    let _guard = Cleanup(name.clone());

    const SHAPE: FrameShape = FrameShape {
        width: 32,
        height: 32,
        format: FrameFormat::Gray8,
    };

    let mut writer = FrameWriter::bind_with_capacity(&name, 64 * 1024).unwrap();
    let mut readers: Vec<_> = (0..3).map(|_| FrameReader::join(&name).unwrap()).collect();

    for round in 1..=10u64 {
        let pixels = vec![(round * 17) as u8; SHAPE.byte_len()];
        assert!(writer.write_frame(SHAPE, &pixels, T100).unwrap());

        // Until the last reader is done, the next round must not open.
        assert!(!writer.write_frame(SHAPE, &pixels, Duration::from_millis(10)).unwrap());

        for reader in readers.iter_mut() {
            let view = reader.read(T100).unwrap().expect("frame must be ready");
            assert_eq!(view.frame_number, round);
            assert_eq!(view.pixels, &pixels[..]);
        }
    }
}

/// After the producer grows capacity for a larger frame shape, a consumer
/// holding the old attachment gets StaleGeneration (never a view into the
/// old mapping), and proceeds normally after re-attaching.
#[test]
fn test_generation_bump_forces_reattach() {
    let name = unique_channel("generation");
    let _guard = Cleanup(name.clone());

    let small = FrameShape::new(16, 16, FrameFormat::Gray8);
    let large = FrameShape::new(512, 512, FrameFormat::Rgb8);

    let mut writer =
        FrameWriter::bind_with_capacity(&name, 4096 + small.byte_len()).unwrap();
    let mut reader = FrameReader::join(&name).unwrap();

    let pixels = vec![3u8; small.byte_len()];
    assert!(writer.write_frame(small, &pixels, T100).unwrap());
    let view = reader.read(T100).unwrap().expect("small frame must arrive");
    assert_eq!(view.shape, small);
    let generation_before = reader.attached_generation();

    let pixels = vec![4u8; large.byte_len()];
    assert!(writer.write_frame(large, &pixels, T100).unwrap());
    assert_eq!(writer.frame_generation(), generation_before + 1);

    match reader.read(T100) {
        Err(ChannelError::StaleGeneration) => {}
        other => panic!("expected StaleGeneration, got {other:?}"),
    }

    reader.reattach().unwrap();
    assert_eq!(reader.attached_generation(), generation_before + 1);

    let view = reader.read(T100).unwrap().expect("large frame must arrive");
    assert_eq!(view.shape, large);
    assert_eq!(view.pixels, &pixels[..]);
}

/// A concurrent consumer that hits a resize mid-stream recovers by
/// re-attaching and misses at most the round that moved the buffer.
#[test]
fn test_consumer_recovers_from_resize_mid_stream() {
    let name = unique_channel("resize");
    let _guard = Cleanup(name.clone());

    let small = FrameShape::new(16, 16, FrameFormat::Gray8);
    let large = FrameShape::new(256, 256, FrameFormat::Rgb8);
    const NUM_FRAMES: u64 = 20;

    let mut writer =
        FrameWriter::bind_with_capacity(&name, 4096 + small.byte_len()).unwrap();
    let mut reader = FrameReader::join(&name).unwrap();

    enum Outcome {
        Frame(u64),
        NotReady,
        Stale,
    }

    let consumer = thread::spawn(move || {
        let mut last_seen = 0u64;
        let mut reattaches = 0u32;
        let deadline = Instant::now() + Duration::from_secs(10);
        while last_seen < NUM_FRAMES {
            assert!(Instant::now() < deadline, "consumer starved at {last_seen}");
            // The view's borrow of the reader must end before reattach.
            let outcome = match reader.read(T100) {
                Ok(Some(view)) => Outcome::Frame(view.frame_number),
                Ok(None) => Outcome::NotReady,
                Err(ChannelError::StaleGeneration) => Outcome::Stale,
                Err(e) => panic!("read failed: {e}"),
            };
            match outcome {
                Outcome::Frame(frame_number) => {
                    assert!(frame_number > last_seen, "no duplicates");
                    last_seen = frame_number;
                }
                Outcome::NotReady => {}
                Outcome::Stale => {
                    reader.reattach().unwrap();
                    reattaches += 1;
                }
            }
        }
        reattaches
    });

    for frame_number in 1..=NUM_FRAMES {
        // Switch to the large shape halfway through, forcing one growth.
        let shape = if frame_number <= NUM_FRAMES / 2 { small } else { large };
        let mut pixels = vec![0u8; shape.byte_len()];
        pixels[..8].copy_from_slice(&frame_number.to_le_bytes());

        let deadline = Instant::now() + Duration::from_secs(10);
        while !writer.write_frame(shape, &pixels, T100).unwrap() {
            assert!(Instant::now() < deadline, "publish starved at {frame_number}");
        }
    }

    let reattaches = consumer.join().expect("consumer thread panicked");
    assert_eq!(reattaches, 1, "exactly one growth happened mid-stream");
}
