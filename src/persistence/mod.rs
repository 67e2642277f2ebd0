//! Persistence layer: the historical snapshot store and artifact publishing.
//!
//! [`SnapshotStore`] is the contract the collector appends to and the
//! forecasting engine reads from. [`JsonDirStore`] keeps one JSON file per
//! snapshot on disk; [`MemoryStore`] keeps them in process. Both share the
//! archive-then-alias write discipline of [`ArtifactWriter`].

pub mod artifacts;
pub mod atomic;
pub mod json_dir;
pub mod memory;
pub mod store;

pub use artifacts::{ARCHIVE_STAMP_FORMAT, ArtifactWriter, Published};
pub use json_dir::{JsonDirStore, LATEST_ALIAS, SNAPSHOT_PREFIX};
pub use memory::MemoryStore;
pub use store::SnapshotStore;
