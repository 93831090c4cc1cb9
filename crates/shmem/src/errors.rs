use crate::gate::GateError;
use std::io;
use thiserror::Error;

/// Errors surfaced by channel participants.
///
/// Timeouts are not errors: a timed-out wait comes back as `Ok(None)` (reads)
/// or `Ok(false)` (publishes) so callers can skip the cycle and retry.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The shared segment could not be created, mapped, or resized.
    /// Fatal: no participant can proceed without its segment.
    #[error("segment error: {0}")]
    Segment(#[from] io::Error),

    #[error(transparent)]
    Gate(#[from] GateError),

    /// The segment exists but does not hold a channel header (bad magic, or
    /// initialization by the first participant never completed).
    #[error("segment does not contain an initialized channel header")]
    BadHeader,

    /// The backing buffer was resized since this reader attached. The round
    /// is skipped; reattach before reading again.
    #[error("zero-copy attachment is stale; reattach before reading")]
    StaleGeneration,

    /// Another live process already holds the single-writer token.
    #[error("a producer is already attached to channel '{0}'")]
    ProducerAttached(String),

    /// The lockstep invariant is already broken; fatal to this process.
    #[error("lockstep protocol violated: {0}")]
    ProtocolViolation(&'static str),

    /// Pixel data length does not match the declared frame shape.
    #[error("pixel data does not match the declared frame shape")]
    ShapeMismatch,

    #[error("invalid channel name: {0:?}")]
    InvalidName(String),
}
