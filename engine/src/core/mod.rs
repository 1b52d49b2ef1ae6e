//! Wire format: frame layout, checksum, and obfuscation.

mod checksum;
mod frame;
mod obfuscate;

pub use checksum::Crc32;
pub use frame::{Frame, FrameFlags, FrameKind, ETHER_TYPE, FRAME_HEADER_SIZE, FRAME_TRAILER_SIZE};
pub use obfuscate::xor_transform;
