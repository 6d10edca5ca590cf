//! Build-scoped memoization of readers and iterators.
//!
//! A build visits the same link target many times while walking merged
//! ranges; reopening readers per visit would dominate the cost of the
//! build. The cache is single-threaded and owned by exactly one build
//! job; entries live until the build finishes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::iter::InternalIterator;
use crate::manifest::meta::{DependenceMap, FileMetaData};
use crate::table::TableReader;

/// Opens a table: returns its iterator and the backing reader.
pub type CreateIterator<'a> = Box<
    dyn Fn(&FileMetaData, &DependenceMap) -> Result<(Box<dyn InternalIterator>, Arc<dyn TableReader>)>
        + 'a,
>;

pub struct CachedTable {
    iter: Box<dyn InternalIterator>,
    reader: Arc<dyn TableReader>,
    meta: Arc<FileMetaData>,
}

impl std::fmt::Debug for CachedTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedTable")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

impl CachedTable {
    pub fn iter_mut(&mut self) -> &mut dyn InternalIterator {
        self.iter.as_mut()
    }

    pub fn reader(&self) -> &Arc<dyn TableReader> {
        &self.reader
    }

    pub fn meta(&self) -> &Arc<FileMetaData> {
        &self.meta
    }

    /// Simultaneous access to the iterator and its reader.
    pub fn parts(&mut self) -> (&mut dyn InternalIterator, &dyn TableReader) {
        (self.iter.as_mut(), self.reader.as_ref())
    }
}

pub struct IteratorCache<'a> {
    dependence_map: &'a DependenceMap,
    create: CreateIterator<'a>,
    tables: HashMap<u64, CachedTable>,
}

impl<'a> IteratorCache<'a> {
    pub fn new(dependence_map: &'a DependenceMap, create: CreateIterator<'a>) -> Self {
        IteratorCache {
            dependence_map,
            create,
            tables: HashMap::new(),
        }
    }

    /// The memoized table for `meta`, opening it on first use.
    pub fn get(&mut self, meta: &Arc<FileMetaData>) -> Result<&mut CachedTable> {
        let file_number = meta.fd.file_number;
        if !self.tables.contains_key(&file_number) {
            let (iter, reader) = (self.create)(meta, self.dependence_map)?;
            self.tables.insert(
                file_number,
                CachedTable {
                    iter,
                    reader,
                    meta: Arc::clone(meta),
                },
            );
        }
        Ok(self.tables.get_mut(&file_number).unwrap())
    }

    /// Like [`get`](Self::get), resolving the metadata through the
    /// dependence map. A file number nothing knows about is corruption.
    pub fn get_by_number(&mut self, file_number: u64) -> Result<&mut CachedTable> {
        if self.tables.contains_key(&file_number) {
            return Ok(self.tables.get_mut(&file_number).unwrap());
        }
        let meta = self
            .dependence_map
            .get(&file_number)
            .cloned()
            .ok_or_else(|| {
                crate::corruption!("link target {file_number} missing from dependence map")
            })?;
        self.get(&meta)
    }

    /// Metadata for `file_number` from the entries already opened or the
    /// dependence map.
    pub fn file_meta(&self, file_number: u64) -> Option<Arc<FileMetaData>> {
        if let Some(table) = self.tables.get(&file_number) {
            return Some(Arc::clone(&table.meta));
        }
        self.dependence_map.get(&file_number).cloned()
    }
}
