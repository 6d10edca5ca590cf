//! File metadata and the version-edit records a build publishes.

pub mod edit;
pub mod meta;

pub use edit::VersionEdit;
pub use meta::{
    BoundBuilder, DependenceMap, FileDescriptor, FileMetaData, FileNumberAllocator,
};
