//! Table abstractions.
//!
//! The cache and the map builder consume tables through the narrow traits
//! here; the on-disk layout is pluggable via [`TableFactory`]. The crate
//! ships one concrete layout, the [`plain`] format, which is enough to
//! run the whole build and read path.

pub mod plain;

use std::sync::Arc;

use crate::config::ReadOptions;
use crate::env::{RandomAccessFile, WritableFile};
use crate::error::{Error, Result};
use crate::get_context::GetContext;
use crate::iter::InternalIterator;

/// What a table stores: key-value records, or map entries indexing other
/// tables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TablePurpose {
    #[default]
    Data,
    Map,
}

impl TablePurpose {
    pub fn as_u8(self) -> u8 {
        match self {
            TablePurpose::Data => 0,
            TablePurpose::Map => 1,
        }
    }

    pub fn from_u8(v: u8) -> Result<TablePurpose> {
        match v {
            0 => Ok(TablePurpose::Data),
            1 => Ok(TablePurpose::Map),
            _ => Err(Error::Corruption(format!("unknown table purpose {v}"))),
        }
    }
}

/// Properties persisted with every table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableProperties {
    pub purpose: TablePurpose,
    /// File numbers this table links to, sorted and unique. Empty for
    /// data tables.
    pub dependence: Vec<u64>,
    /// Maximum link-list length over all entries; an upper bound on the
    /// number of tables a point read through this table may touch.
    pub read_amp: usize,
    /// Seconds since the epoch at creation.
    pub creation_time: u64,
}

/// A live, immutable table. Readers are shared and internally thread-safe.
pub trait TableReader: Send + Sync {
    /// A fresh iterator over the table. The iterator keeps the reader
    /// alive for its own lifetime.
    fn new_iterator(self: Arc<Self>, opts: &ReadOptions) -> Box<dyn InternalIterator>;

    /// Point lookup: scan records from `key` forward, feeding each into
    /// `ctx` until it reports the stream exhausted.
    fn get(&self, opts: &ReadOptions, key: &[u8], ctx: &mut GetContext) -> Result<()>;

    /// Approximate byte offset of `key` within the table's data section.
    fn approximate_offset_of(&self, key: &[u8]) -> u64;

    fn properties(&self) -> &TableProperties;
}

/// Accumulates sorted entries into a new table file.
pub trait TableBuilder {
    /// Appends an entry; keys must arrive in ascending internal-key order.
    fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Writes properties and footer, syncs and flushes the file.
    fn finish(&mut self, props: &TableProperties) -> Result<()>;

    /// Drops the partial output without finalizing.
    fn abandon(&mut self);

    fn num_entries(&self) -> u64;

    /// Bytes written so far; the final file size once finished.
    fn file_size(&self) -> u64;
}

/// Constructs readers and builders for one table layout.
pub trait TableFactory: Send + Sync {
    fn new_reader(
        &self,
        file: Box<dyn RandomAccessFile>,
        file_size: u64,
    ) -> Result<Arc<dyn TableReader>>;

    fn new_builder(
        &self,
        file: Box<dyn WritableFile>,
        purpose: TablePurpose,
        creation_time: u64,
    ) -> Result<Box<dyn TableBuilder>>;
}
