//! Map-table construction and the table reader cache of a log-structured
//! storage engine.
//!
//! A *map table* stores no records of its own: each entry indexes a
//! half-open key range onto the data tables that contribute records
//! inside it. Compactions can then be *virtual*: instead of rewriting
//! overlapping inputs, [`map_builder::MapBuilder`] computes the interval
//! algebra over their key ranges and writes a small map that redirects
//! reads. [`table_cache::TableCache`] turns file numbers into live
//! readers and resolves map links recursively on the read path.

pub mod cache;
pub mod config;
pub mod env;
pub mod error;
pub mod get_context;
pub mod iter;
pub mod iterator_cache;
pub mod key;
pub mod manifest;
pub mod map_builder;
pub mod map_element;
pub mod map_iter;
pub mod partition;
pub mod range;
pub mod stitch;
pub mod table;
pub mod table_cache;

#[cfg(test)]
pub(crate) mod test_util;

pub use config::{ReadOptions, ReadTier, TableCacheConfig};
pub use error::{Error, Result};
pub use key::{InternalKey, InternalKeyComparator, SequenceNumber};
pub use manifest::{DependenceMap, FileDescriptor, FileMetaData, VersionEdit};
pub use map_builder::{CompactionInput, MapBuildResult, MapBuilder};
pub use table_cache::TableCache;
