//! Archive data model
//!
//! Ownership is strictly ArchiveSet → Volume → Session; the session
//! `previous` pointer is a name, never an owning reference.

pub mod ini;
pub mod manifest;
pub mod session;
pub mod set;
pub mod volume;

pub use manifest::{
    load_annotated, merge_newest_wins, AnnotatedEntry, Manifest, ManifestEntry, ZERO_HASH,
};
pub use session::{
    session_name, validate_session_time, Session, SessionFormat, NO_PREVIOUS, SESSION_PREFIX,
};
pub use set::{ArchiveSet, SessionRef};
pub use volume::{Volume, FORMAT_VERSION};
