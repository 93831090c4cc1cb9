pub mod errors;
pub mod frame;
pub mod frame_reader;
pub mod frame_writer;
pub mod gate;
pub mod header;
pub mod names;
pub mod run_control;
pub mod segment;
pub mod types;
pub mod value_reader;
pub mod value_writer;

mod round;

pub use errors::ChannelError;
pub use frame::{FrameFormat, FrameShape, FrameView, OwnedFrame};
pub use frame_reader::FrameReader;
pub use frame_writer::FrameWriter;
pub use names::unlink_channel;
pub use run_control::{RunControl, RunState};
pub use types::{Position2D, ShmValue};
pub use value_reader::ValueReader;
pub use value_writer::ValueWriter;
