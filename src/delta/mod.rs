//! Delta tracking: the per-volume chunk bitmap and the thin-pool
//! diff translator that feeds it

pub mod map;
pub mod thin;

pub use map::{DeltaMap, MapHandle};
pub use thin::{translate_delta, DeltaStats};
