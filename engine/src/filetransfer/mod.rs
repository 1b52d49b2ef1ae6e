//! File fragmentation and reassembly.

pub mod assembler;
pub mod sender;

pub use assembler::FileAssembler;
pub use sender::{FileAckRegistry, FileSendContext};
