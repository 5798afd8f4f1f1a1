//! Session send pipeline: chunk iteration, the compress/hash worker
//! pool, and the streaming session writer

pub mod pool;
pub mod writer;

pub use pool::{CompressPool, PackedChunk, SendEntry};
pub use writer::{send_volume, SendParams};
