pub mod backend;
pub mod frontend;
pub mod messages;
pub mod sequence;

pub use messages::{ClientCommand, ColumnType, Frame, ServerPacket};
pub use sequence::FrameSequence;

#[cfg(test)]
mod tests;
