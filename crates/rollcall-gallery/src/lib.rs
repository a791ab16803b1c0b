//! rollcall-gallery — the enrolled-identity store.
//!
//! Exclusive owner of [`rollcall_core::Identity`] records: serialized
//! mutations, snapshot reads, SQLite durability, and a versioned
//! export/import schema pinned to the encoder version.

pub mod store;
pub mod transfer;

pub use store::{Gallery, GalleryError};
pub use transfer::{ExportedIdentity, GalleryExport, EXPORT_SCHEMA_VERSION};
