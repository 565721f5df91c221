//! Event sequence production from a container's log output.

mod bridge;
mod event;
mod frame;
mod streamer;

pub use event::{Event, EventSink};
pub use streamer::InstanceStreamer;

#[cfg(test)]
pub use frame::parse_line;
