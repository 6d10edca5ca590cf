//! The process-wide cache mapping file numbers to open table readers,
//! plus the map-aware read paths built on top of it.
//!
//! Handles are reference counted: a reader stays alive while any handle,
//! iterator or cache entry still points at it, so eviction never
//! invalidates an in-flight read. Open errors are never cached; a
//! transient failure is retried on the next lookup.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::cache::LruCache;
use crate::config::{ReadOptions, ReadTier, TableCacheConfig};
use crate::env::{table_file_name, Env};
use crate::error::{Error, Result};
use crate::get_context::GetContext;
use crate::iter::InternalIterator;
use crate::key::{extract_footer, InternalKeyComparator};
use crate::manifest::meta::{DependenceMap, FileDescriptor, FileMetaData};
use crate::map_element::MapSstElement;
use crate::map_iter::{MapSstIterator, SubIterFactory};
use crate::table::{TableFactory, TableProperties, TablePurpose, TableReader};

/// Map chains are kept one level deep in practice; the guard only bounds
/// stack use against corrupted self-referential maps.
const MAX_MAP_DEPTH: usize = 16;

/// A counted reference to a cached reader. Dropping the handle releases
/// the reference; the reader itself is freed once the cache entry and
/// every handle are gone.
pub struct CacheHandle {
    reader: Arc<dyn TableReader>,
}

impl std::fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheHandle").finish_non_exhaustive()
    }
}

impl CacheHandle {
    pub fn reader(&self) -> &dyn TableReader {
        self.reader.as_ref()
    }

    pub fn into_reader(self) -> Arc<dyn TableReader> {
        self.reader
    }
}

pub struct TableCache {
    env: Arc<dyn Env>,
    factory: Arc<dyn TableFactory>,
    icmp: InternalKeyComparator,
    paths: Vec<PathBuf>,
    readers: Mutex<LruCache<u64, Arc<dyn TableReader>>>,
    /// Self-handle so read paths can hand out recursive sub-iterator
    /// factories without changing receiver types.
    weak_self: Weak<TableCache>,
}

impl TableCache {
    pub fn new(
        env: Arc<dyn Env>,
        factory: Arc<dyn TableFactory>,
        paths: Vec<PathBuf>,
        config: TableCacheConfig,
    ) -> Arc<TableCache> {
        assert!(!paths.is_empty(), "table cache needs at least one path");
        Arc::new_cyclic(|weak_self| TableCache {
            env,
            factory,
            icmp: InternalKeyComparator,
            paths,
            readers: Mutex::new(LruCache::new(config.capacity)),
            weak_self: weak_self.clone(),
        })
    }

    fn shared(&self) -> Arc<TableCache> {
        self.weak_self.upgrade().expect("table cache still referenced")
    }

    pub fn icmp(&self) -> &InternalKeyComparator {
        &self.icmp
    }

    /// Resolves `fd` to a live reader, opening the file on a miss. A miss
    /// under [`ReadTier::BlockCacheOnly`] returns `Error::Incomplete`
    /// without touching the file system.
    pub fn find(&self, fd: &FileDescriptor, opts: &ReadOptions) -> Result<CacheHandle> {
        if let Some(reader) = self.readers.lock().get(&fd.file_number) {
            return Ok(CacheHandle { reader });
        }
        if opts.read_tier == ReadTier::BlockCacheOnly {
            return Err(Error::Incomplete(format!(
                "table {} not in cache and the read tier forbids I/O",
                fd.file_number
            )));
        }
        // The open happens outside the lock: two racing misses may both
        // open, and the loser's reader drops with its handle.
        let reader = self.open_reader(fd)?;
        let (winner, _loser) = self
            .readers
            .lock()
            .insert_or_get(fd.file_number, reader);
        Ok(CacheHandle { reader: winner })
    }

    fn open_reader(&self, fd: &FileDescriptor) -> Result<Arc<dyn TableReader>> {
        let name = table_file_name(&self.paths, fd.file_number, fd.path_id);
        let file = self.env.new_random_access_file(&name)?;
        self.factory.new_reader(file, fd.file_size)
    }

    /// Removes the entry for `file_number`; outstanding handles keep the
    /// reader alive until they drop.
    pub fn evict(&self, file_number: u64) {
        self.readers.lock().remove(&file_number);
    }

    /// Releases `handle` and removes the entry, so the next lookup
    /// reopens the file.
    pub fn erase(&self, fd: &FileDescriptor, handle: CacheHandle) {
        drop(handle);
        self.evict(fd.file_number);
    }

    /// Properties of the table behind `fd`, resolved through the cache.
    pub fn properties_of(
        &self,
        fd: &FileDescriptor,
        opts: &ReadOptions,
    ) -> Result<TableProperties> {
        let handle = self.find(fd, opts)?;
        Ok(handle.reader().properties().clone())
    }

    /// `(hits, misses)` of the reader cache.
    pub fn stats(&self) -> (u64, u64) {
        self.readers.lock().stats()
    }

    fn resolve_reader(
        &self,
        meta: &FileMetaData,
        opts: &ReadOptions,
    ) -> Result<Arc<dyn TableReader>> {
        match &meta.table_reader {
            Some(reader) => Ok(Arc::clone(reader)),
            None => Ok(self.find(&meta.fd, opts)?.into_reader()),
        }
    }

    /// A [`SubIterFactory`] that recurses through this cache; used by the
    /// stitched iterator and the map expansion wrapper.
    pub fn sub_iter_factory(&self, opts: &ReadOptions) -> Box<dyn SubIterFactory> {
        Box::new(CacheSubIterFactory {
            cache: self.shared(),
            opts: opts.clone(),
        })
    }

    /// An iterator over the table of `meta`. For a map table with a
    /// non-empty dependence map, every entry is expanded on demand into
    /// the records of its link targets; with an empty dependence map the
    /// raw map entries are yielded.
    pub fn new_iterator(
        &self,
        opts: &ReadOptions,
        meta: &FileMetaData,
        dependence_map: &DependenceMap,
    ) -> Result<Box<dyn InternalIterator>> {
        let reader = self.resolve_reader(meta, opts)?;
        let iter = Arc::clone(&reader).new_iterator(opts);
        if meta.prop.purpose == TablePurpose::Map && !dependence_map.is_empty() {
            let factory = self.sub_iter_factory(opts);
            return Ok(Box::new(MapSstIterator::new(
                iter,
                dependence_map.clone(),
                self.icmp,
                factory,
            )));
        }
        Ok(iter)
    }

    /// Point lookup through `meta`. Data tables delegate to the reader;
    /// map tables resolve the covering entries and recurse into their
    /// link targets with the per-element sequence window applied.
    pub fn get(
        &self,
        opts: &ReadOptions,
        meta: &FileMetaData,
        key: &[u8],
        ctx: &mut GetContext,
        dependence_map: &DependenceMap,
    ) -> Result<()> {
        self.get_impl(opts, meta, key, ctx, dependence_map, 0)
    }

    fn get_impl(
        &self,
        opts: &ReadOptions,
        meta: &FileMetaData,
        key: &[u8],
        ctx: &mut GetContext,
        dependence_map: &DependenceMap,
        depth: usize,
    ) -> Result<()> {
        if depth > MAX_MAP_DEPTH {
            return Err(Error::Corruption("map table nesting too deep".into()));
        }
        let reader = match self.resolve_reader(meta, opts) {
            Ok(reader) => reader,
            Err(e) if e.is_incomplete() => {
                // cache-only read could not rule the key out
                ctx.mark_key_may_exist();
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if meta.prop.purpose != TablePurpose::Map {
            return reader.get(opts, key, ctx);
        }
        if dependence_map.is_empty() {
            return Err(Error::Corruption("map table dependence files missing".into()));
        }

        let mut iter = Arc::clone(&reader).new_iterator(opts);
        let mut element = MapSstElement::default();
        iter.seek(key);
        while iter.valid() {
            element.decode(iter.key(), iter.value())?;
            if element.no_smallest {
                return Err(Error::Corruption(
                    "map entry without smallest bound is not supported".into(),
                ));
            }

            // When the query's user key matches the element's smallest
            // bound but sorts above it, shrink the effective search key
            // to the bound so recursion starts inside the window.
            let mut find_k = key.to_vec();
            let c = self.icmp.compare(&element.smallest_key, key);
            if c.is_gt() || (c.is_eq() && !element.include_smallest) {
                if !self.icmp.same_user_key(&element.smallest_key, key) {
                    // the key lies below this element entirely
                    return Ok(());
                }
                debug_assert!(extract_footer(key) > extract_footer(&element.smallest_key));
                find_k.clear();
                find_k.extend_from_slice(&element.smallest_key);
                if !element.include_smallest {
                    let footer = extract_footer(&element.smallest_key);
                    if footer == 0 {
                        // the bound already owns the oldest footer of
                        // this user key; nothing can sort after it
                        return Ok(());
                    }
                    let n = find_k.len();
                    find_k[n - 8..].copy_from_slice(&(footer - 1).to_be_bytes());
                }
            }

            // Cap the sequence window while the element's largest bound
            // shares the query's user key, so recursion cannot surface
            // records that belong to a later element.
            let (is_largest_user_key, largest_footer) = {
                let largest = iter.key();
                (
                    self.icmp.same_user_key(largest, key),
                    extract_footer(largest),
                )
            };
            let floor_backup = ctx.min_sequence_and_type();
            if is_largest_user_key {
                if largest_footer == u64::MAX && !element.include_largest {
                    // the bound owns the largest footer of this user key
                    // and is excluded: the key lies past this element
                    iter.next();
                    continue;
                }
                let floor = largest_footer + !element.include_largest as u64;
                ctx.set_min_sequence_and_type(floor_backup.max(floor));
            }

            for link in &element.links {
                let target = dependence_map.get(&link.file_number).ok_or_else(|| {
                    crate::corruption!(
                        "map entry link {} missing from dependence map",
                        link.file_number
                    )
                })?;
                self.get_impl(opts, target, &find_k, ctx, dependence_map, depth + 1)?;
                if ctx.is_finished() {
                    return Ok(());
                }
            }
            ctx.set_min_sequence_and_type(floor_backup);
            if !is_largest_user_key {
                return Ok(());
            }
            iter.next();
        }
        iter.status()
    }
}

struct CacheSubIterFactory {
    cache: Arc<TableCache>,
    opts: ReadOptions,
}

impl SubIterFactory for CacheSubIterFactory {
    fn create(
        &self,
        meta: &Arc<FileMetaData>,
        dependence_map: &DependenceMap,
    ) -> Result<Box<dyn InternalIterator>> {
        self.cache.new_iterator(&self.opts, meta, dependence_map)
    }
}
