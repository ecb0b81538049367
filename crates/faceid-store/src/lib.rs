//! faceid-store — persistence collaborators: the SQLite snapshot store and
//! the on-disk face-crop store.

pub mod images;
pub mod snapshot;

pub use images::DiskImageStore;
pub use snapshot::SnapshotStore;
