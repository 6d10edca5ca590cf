//! Construction of map tables during virtual compactions.
//!
//! A build loads every input table into sorted interval vectors, merges
//! them pairwise (always the two cheapest neighbours), subtracts any
//! deletion ranges, and merges late-added files. When the survivors are
//! plain file prefaces, or the output would equal the single map input,
//! the build short-circuits; otherwise it writes a fresh map table and
//! returns the version edit publishing it.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ReadOptions;
use crate::env::{table_file_name, Env, IoPriority, SpaceQuota};
use crate::error::{Error, Result};
use crate::iterator_cache::{CreateIterator, IteratorCache};
use crate::key::InternalKeyComparator;
use crate::manifest::edit::VersionEdit;
use crate::manifest::meta::{BoundBuilder, DependenceMap, FileDescriptor, FileMetaData, FileNumberAllocator};
use crate::map_element::{LinkTarget, MapSstElement};
use crate::partition::{partition_ranges, PartitionType};
use crate::range::{is_preface_range, KeyRange, RangeWithDepend};
use crate::table::{TableFactory, TableProperties, TablePurpose};
use crate::table_cache::TableCache;

/// One level's worth of build input. Level-0 files may overlap each
/// other; files of any other level must be key-ordered and disjoint.
pub struct CompactionInput {
    pub level: u32,
    pub files: Vec<Arc<FileMetaData>>,
}

/// Outcome of a build: the edit to publish and, when a table was
/// written, its metadata.
#[derive(Debug)]
pub struct MapBuildResult {
    pub edit: VersionEdit,
    pub file_meta: Option<FileMetaData>,
}

/// Loads each file into `ranges` in order: data files become one
/// inclusive interval, map files contribute their decoded entries as
/// stable intervals. Bounds and creation times accumulate into `bounds`.
fn load_ranges(
    ranges: &mut Vec<RangeWithDepend>,
    bounds: &mut BoundBuilder,
    iterator_cache: &mut IteratorCache,
    files: &[Arc<FileMetaData>],
) -> Result<()> {
    let mut element = MapSstElement::default();
    for f in files {
        if f.prop.purpose == TablePurpose::Map {
            let table = iterator_cache.get(f)?;
            let (iter, _reader) = table.parts();
            iter.status()?;
            iter.seek_to_first();
            while iter.valid() {
                element.decode(iter.key(), iter.value())?;
                ranges.push(RangeWithDepend::from_element(&element));
                iter.next();
            }
            iter.status()?;
        } else {
            let table = iterator_cache.get(f)?;
            table.iter_mut().status()?;
            ranges.push(RangeWithDepend::from_file(f));
        }
        bounds.update(f);
        let creation_time = iterator_cache.get(f)?.reader().properties().creation_time;
        bounds.update_creation_time(creation_time);
    }
    Ok(())
}

/// Prepends `extra`'s links into `links`, keeping one occurrence per file
/// number and preserving each list's relative order.
fn merge_depend(links: &mut Vec<LinkTarget>, extra: &[LinkTarget]) {
    let mut insert_pos = links.len();
    for link in extra.iter().rev() {
        match links[..insert_pos]
            .iter()
            .position(|l| l.file_number == link.file_number)
        {
            Some(existing) => insert_pos = existing,
            None => links.insert(insert_pos, link.clone()),
        }
    }
}

/// Streams the finalized interval vector as persisted map entries.
///
/// Stable intervals are emitted verbatim. Unstable intervals are
/// tightened against their link targets: each link is seeked to the
/// interval's bounds, its byte span recomputed from approximate offsets,
/// and the element marked `no_records` when every link comes up empty.
/// Touching intervals that a transition split at one point are fused
/// back into a single entry.
pub struct MapElementIterator<'a, 'b> {
    ranges: &'a [RangeWithDepend],
    iterator_cache: &'a mut IteratorCache<'b>,
    icmp: InternalKeyComparator,
    where_: usize,
    element: MapSstElement,
    value_buf: Vec<u8>,
    buffer_valid: bool,
    status: Option<Error>,
    dependence: BTreeSet<u64>,
    read_amp: usize,
}

impl<'a, 'b> MapElementIterator<'a, 'b> {
    pub fn new(
        ranges: &'a [RangeWithDepend],
        iterator_cache: &'a mut IteratorCache<'b>,
        icmp: InternalKeyComparator,
    ) -> Self {
        MapElementIterator {
            ranges,
            iterator_cache,
            icmp,
            where_: 0,
            element: MapSstElement::default(),
            value_buf: Vec::new(),
            buffer_valid: false,
            status: None,
            dependence: BTreeSet::new(),
            read_amp: 0,
        }
    }

    pub fn seek_to_first(&mut self) {
        self.where_ = 0;
        self.prepare_next();
    }

    pub fn next(&mut self) {
        self.prepare_next();
    }

    pub fn valid(&self) -> bool {
        self.buffer_valid
    }

    pub fn key(&self) -> &[u8] {
        self.element.key()
    }

    pub fn value(&self) -> &[u8] {
        &self.value_buf
    }

    pub fn status(&self) -> Result<()> {
        match &self.status {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// File numbers referenced by any emitted element.
    pub fn dependence(&self) -> &BTreeSet<u64> {
        &self.dependence
    }

    /// Maximum link-list length seen: the fan-out bound for point reads.
    pub fn read_amp(&self) -> usize {
        self.read_amp
    }

    fn fail(&mut self, e: Error) {
        self.status = Some(e);
        self.buffer_valid = false;
    }

    fn prepare_next(&mut self) {
        if self.where_ >= self.ranges.len() {
            self.buffer_valid = false;
            return;
        }
        let r = &self.ranges[self.where_];
        self.element.smallest_key.clear();
        self.element.smallest_key.extend_from_slice(r.point[0].encoded());
        self.element.largest_key.clear();
        self.element.largest_key.extend_from_slice(r.point[1].encoded());
        self.element.include_smallest = r.include[0];
        self.element.include_largest = r.include[1];
        self.element.no_records = r.no_records;
        self.element.no_smallest = false;
        self.element.links = r.dependence.clone();
        let mut stable = r.stable;
        self.where_ += 1;

        // A transition split at one point leaves a single-point interval
        // and its continuation as two adjacent entries; stitch them back
        // into one element.
        if self.where_ < self.ranges.len()
            && self
                .icmp
                .compare(
                    &self.element.smallest_key,
                    self.ranges[self.where_].point[0].encoded(),
                )
                .is_eq()
        {
            let next = &self.ranges[self.where_];
            self.element.largest_key.clear();
            self.element.largest_key.extend_from_slice(next.point[1].encoded());
            self.element.include_largest = next.include[1];
            merge_depend(&mut self.element.links, &next.dependence);
            stable = false;
            self.where_ += 1;
        }
        if self.where_ < self.ranges.len()
            && self
                .icmp
                .compare(
                    &self.element.largest_key,
                    self.ranges[self.where_].point[1].encoded(),
                )
                .is_eq()
        {
            let next = &self.ranges[self.where_];
            self.element.include_largest = true;
            merge_depend(&mut self.element.links, &next.dependence);
            stable = false;
            self.where_ += 1;
        }

        if stable {
            for link in &self.element.links {
                self.dependence.insert(link.file_number);
            }
        } else {
            self.element.no_records = true;
            for i in 0..self.element.links.len() {
                let file_number = self.element.links[i].file_number;
                self.dependence.insert(file_number);
                let table = match self.iterator_cache.get_by_number(file_number) {
                    Ok(table) => table,
                    Err(e) => return self.fail(e),
                };
                let (iter, reader) = table.parts();
                if let Err(e) = iter.status() {
                    return self.fail(e);
                }
                iter.seek(&self.element.smallest_key);
                if !iter.valid() {
                    if let Err(e) = iter.status() {
                        return self.fail(e);
                    }
                    continue;
                }
                if !self.element.include_smallest
                    && self
                        .icmp
                        .compare(iter.key(), &self.element.smallest_key)
                        .is_eq()
                {
                    iter.next();
                    if !iter.valid() {
                        if let Err(e) = iter.status() {
                            return self.fail(e);
                        }
                        continue;
                    }
                }
                let link_start = iter.key().to_vec();
                iter.seek_for_prev(&self.element.largest_key);
                if !iter.valid() {
                    if let Err(e) = iter.status() {
                        return self.fail(e);
                    }
                    continue;
                }
                if !self.element.include_largest
                    && self
                        .icmp
                        .compare(iter.key(), &self.element.largest_key)
                        .is_eq()
                {
                    iter.prev();
                    if !iter.valid() {
                        if let Err(e) = iter.status() {
                            return self.fail(e);
                        }
                        continue;
                    }
                }
                let link_end = iter.key().to_vec();
                if self.icmp.compare(&link_start, &link_end).is_le() {
                    let start_offset = reader.approximate_offset_of(&link_start);
                    let end_offset = reader.approximate_offset_of(&link_end);
                    self.element.links[i].size = end_offset - start_offset;
                    self.element.no_records = false;
                } else {
                    self.element.links[i].size = 0;
                }
            }
        }
        self.read_amp = self.read_amp.max(self.element.links.len());
        self.element.encode_value(&mut self.value_buf);
        self.buffer_valid = true;
    }
}

/// Orchestrates one map build job.
pub struct MapBuilder {
    job_id: u64,
    env: Arc<dyn Env>,
    factory: Arc<dyn TableFactory>,
    table_cache: Arc<TableCache>,
    icmp: InternalKeyComparator,
    paths: Vec<PathBuf>,
    allocator: Arc<FileNumberAllocator>,
    quota: Option<Arc<SpaceQuota>>,
}

impl MapBuilder {
    pub fn new(
        job_id: u64,
        env: Arc<dyn Env>,
        factory: Arc<dyn TableFactory>,
        table_cache: Arc<TableCache>,
        paths: Vec<PathBuf>,
        allocator: Arc<FileNumberAllocator>,
    ) -> Self {
        MapBuilder {
            job_id,
            env,
            factory,
            table_cache,
            icmp: InternalKeyComparator,
            paths,
            allocator,
            quota: None,
        }
    }

    /// Attach a shared byte budget charged per finished output file.
    pub fn space_quota(mut self, quota: Arc<SpaceQuota>) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Runs the build. On success the returned edit atomically deletes
    /// the inputs and adds the surviving or newly written files; on
    /// error nothing is published and any partial output file is gone.
    pub fn build(
        &self,
        inputs: &[CompactionInput],
        deleted_range: &[KeyRange],
        added_files: &[Arc<FileMetaData>],
        output_level: u32,
        output_path_id: u32,
        dependence_map: &DependenceMap,
    ) -> Result<MapBuildResult> {
        let icmp = self.icmp;
        let opts = ReadOptions::for_compaction();
        let table_cache = &self.table_cache;
        let create: CreateIterator = Box::new(move |meta, _dep| {
            let reader = match &meta.table_reader {
                Some(reader) => Arc::clone(reader),
                None => table_cache.find(&meta.fd, &opts)?.into_reader(),
            };
            let iter = Arc::clone(&reader).new_iterator(&opts);
            Ok((iter, reader))
        });
        let mut iterator_cache = IteratorCache::new(dependence_map, create);

        let mut bounds = BoundBuilder::new(icmp);
        let mut level_ranges: Vec<Vec<RangeWithDepend>> = Vec::new();
        let mut input_range_count = 0usize;

        tracing::info!(
            job_id = self.job_id,
            input_levels = inputs.len(),
            output_level,
            "starting map build"
        );

        for input in inputs {
            if input.files.is_empty() {
                continue;
            }
            if input.level == 0 {
                // level-0 files may overlap each other, so each gets its
                // own vector
                for f in &input.files {
                    let mut ranges = Vec::new();
                    load_ranges(
                        &mut ranges,
                        &mut bounds,
                        &mut iterator_cache,
                        std::slice::from_ref(f),
                    )?;
                    input_range_count += ranges.len();
                    if !ranges.is_empty() {
                        level_ranges.push(ranges);
                    }
                }
            } else {
                let mut ranges = Vec::new();
                load_ranges(&mut ranges, &mut bounds, &mut iterator_cache, &input.files)?;
                input_range_count += ranges.len();
                if !ranges.is_empty() {
                    level_ranges.push(ranges);
                }
            }
        }

        // repeatedly merge the two adjacent vectors with the smallest
        // combined length
        while level_ranges.len() > 1 {
            let mut at = 0;
            let mut min_sum = usize::MAX;
            for i in 0..level_ranges.len() - 1 {
                let sum = level_ranges[i].len() + level_ranges[i + 1].len();
                if sum < min_sum {
                    min_sum = sum;
                    at = i;
                }
            }
            let merged = partition_ranges(
                &level_ranges[at],
                &level_ranges[at + 1],
                &icmp,
                PartitionType::Merge,
            );
            level_ranges[at] = merged;
            level_ranges.remove(at + 1);
            if level_ranges[at].is_empty() {
                level_ranges.remove(at);
            }
        }

        if !level_ranges.is_empty() && !deleted_range.is_empty() {
            let masks: Vec<RangeWithDepend> = deleted_range
                .iter()
                .map(RangeWithDepend::from_key_range)
                .collect();
            let survivor =
                partition_ranges(&level_ranges[0], &masks, &icmp, PartitionType::Delete);
            if survivor.is_empty() {
                level_ranges.clear();
            } else {
                level_ranges[0] = survivor;
            }
        }

        if !added_files.is_empty() {
            let mut ranges = Vec::new();
            load_ranges(&mut ranges, &mut bounds, &mut iterator_cache, added_files)?;
            if level_ranges.is_empty() {
                level_ranges.push(ranges);
            } else {
                level_ranges[0] =
                    partition_ranges(&level_ranges[0], &ranges, &icmp, PartitionType::Merge);
            }
        }

        let mut edit = VersionEdit::new();

        if level_ranges.is_empty() {
            // everything was deleted; drop the inputs
            for input in inputs {
                for f in &input.files {
                    edit.delete_file(input.level, f.fd.file_number);
                }
            }
            return Ok(MapBuildResult {
                edit,
                file_meta: None,
            });
        }

        let ranges = &level_ranges[0];

        // Preface short-circuit: when every surviving interval exactly
        // spans one data file, the build degenerates to moving files.
        // Level-0 outputs must keep per-file sequence separation, so the
        // move is only legal there with a single survivor.
        if output_level != 0 || ranges.len() == 1 {
            let mut sst_live: HashMap<u64, Arc<FileMetaData>> = HashMap::new();
            let mut build_map_sst = false;
            for r in ranges {
                if r.dependence.len() > 1 {
                    build_map_sst = true;
                    break;
                }
                let file_number = r.dependence[0].file_number;
                let Some(f) = iterator_cache.file_meta(file_number) else {
                    return Err(crate::corruption!(
                        "link target {file_number} missing from dependence map"
                    ));
                };
                if !is_preface_range(r, &f, &icmp) {
                    build_map_sst = true;
                    break;
                }
                sst_live.insert(file_number, f);
            }
            if !build_map_sst {
                for input in inputs {
                    for f in &input.files {
                        let file_number = f.fd.file_number;
                        if sst_live.remove(&file_number).is_some() {
                            if output_level != input.level {
                                edit.delete_file(input.level, file_number);
                                edit.add_file(Some(output_level), (**f).clone());
                            }
                        } else {
                            edit.delete_file(input.level, file_number);
                        }
                    }
                }
                // survivors reachable only through map links move to the
                // output level as well
                for (_, f) in sst_live {
                    edit.add_file(Some(output_level), (*f).clone());
                }
                tracing::info!(job_id = self.job_id, "map build satisfied by moving files");
                return Ok(MapBuildResult {
                    edit,
                    file_meta: None,
                });
            }
        }

        // Stability short-circuit: a single map input whose every
        // interval survived untouched would round-trip byte-for-byte.
        if inputs.len() == 1
            && inputs[0].files.len() == 1
            && inputs[0].files[0].prop.purpose == TablePurpose::Map
            && ranges.len() == input_range_count
            && ranges.iter().all(|r| r.stable)
        {
            tracing::info!(
                job_id = self.job_id,
                "map build output equals its input, nothing to write"
            );
            return Ok(MapBuildResult {
                edit: VersionEdit::new(),
                file_meta: None,
            });
        }

        let mut element_iter = MapElementIterator::new(ranges, &mut iterator_cache, icmp);
        let file_meta = self.write_output_file(&bounds, &mut element_iter, output_path_id)?;

        for input in inputs {
            for f in &input.files {
                edit.delete_file(input.level, f.fd.file_number);
            }
        }
        for f in added_files {
            // late-added files stay reachable through the new map only
            edit.add_file(None, (**f).clone());
        }
        edit.add_file(Some(output_level), file_meta.clone());
        Ok(MapBuildResult {
            edit,
            file_meta: Some(file_meta),
        })
    }

    fn write_output_file(
        &self,
        bounds: &BoundBuilder,
        element_iter: &mut MapElementIterator,
        output_path_id: u32,
    ) -> Result<FileMetaData> {
        let file_number = self.allocator.next_file_number();
        let fname = table_file_name(&self.paths, file_number, output_path_id);

        let mut creation_time = bounds.creation_time;
        if creation_time == 0 {
            creation_time = match self.env.current_time() {
                Ok(now) => now,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read the clock for the creation time");
                    0
                }
            };
        }

        let mut file = match self.env.new_writable_file(&fname) {
            Ok(file) => file,
            Err(e) => {
                tracing::error!(
                    job_id = self.job_id,
                    file_number,
                    error = %e,
                    "map table output file creation failed"
                );
                return Err(e);
            }
        };
        file.set_io_priority(IoPriority::Low);

        let mut builder = match self.factory.new_builder(file, TablePurpose::Map, creation_time) {
            Ok(builder) => builder,
            Err(e) => {
                let _ = self.env.delete_file(&fname);
                return Err(e);
            }
        };

        element_iter.seek_to_first();
        while element_iter.valid() {
            if let Err(e) = builder.add(element_iter.key(), element_iter.value()) {
                builder.abandon();
                let _ = self.env.delete_file(&fname);
                return Err(e);
            }
            element_iter.next();
        }
        if let Err(e) = element_iter.status() {
            builder.abandon();
            let _ = self.env.delete_file(&fname);
            tracing::error!(
                job_id = self.job_id,
                file_number,
                error = %e,
                "map element iteration failed, build voided"
            );
            return Err(e);
        }

        let props = TableProperties {
            purpose: TablePurpose::Map,
            dependence: element_iter.dependence().iter().copied().collect(),
            read_amp: element_iter.read_amp(),
            creation_time,
        };
        if let Err(e) = builder.finish(&props) {
            let _ = self.env.delete_file(&fname);
            return Err(e);
        }
        if let Some(quota) = &self.quota {
            if let Err(e) = quota.charge(builder.file_size()) {
                let _ = self.env.delete_file(&fname);
                return Err(e);
            }
        }

        tracing::info!(
            job_id = self.job_id,
            file_number,
            entries = builder.num_entries(),
            bytes = builder.file_size(),
            "generated map table"
        );

        Ok(FileMetaData {
            fd: FileDescriptor {
                file_number,
                path_id: output_path_id,
                file_size: builder.file_size(),
                smallest_seqno: bounds.smallest_seqno,
                largest_seqno: bounds.largest_seqno,
            },
            smallest: bounds.smallest.clone(),
            largest: bounds.largest.clone(),
            prop: props,
            table_reader: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableCacheConfig;
    use crate::env::FsEnv;
    use crate::get_context::GetContext;
    use crate::key::{InternalKey, MAX_SEQUENCE_NUMBER, TYPE_FOR_SEEK};
    use crate::test_util::{arc_meta, element, ikey, write_data_table, write_map_table};

    struct Fixture {
        dir: tempfile::TempDir,
        cache: Arc<TableCache>,
        builder: MapBuilder,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::TempDir::new().unwrap();
        let env: Arc<dyn Env> = Arc::new(FsEnv);
        let factory: Arc<dyn TableFactory> =
            Arc::new(crate::table::plain::PlainTableFactory);
        let paths = vec![dir.path().to_path_buf()];
        let cache = TableCache::new(
            Arc::clone(&env),
            Arc::clone(&factory),
            paths.clone(),
            TableCacheConfig::new(16),
        );
        let builder = MapBuilder::new(
            1,
            env,
            factory,
            Arc::clone(&cache),
            paths,
            Arc::new(FileNumberAllocator::new(100)),
        );
        Fixture { dir, cache, builder }
    }

    fn read_map_elements(fx: &Fixture, meta: &FileMetaData) -> Vec<MapSstElement> {
        let mut iter = fx
            .cache
            .new_iterator(&ReadOptions::default(), meta, &DependenceMap::new())
            .unwrap();
        iter.seek_to_first();
        let mut out = Vec::new();
        while iter.valid() {
            let mut element = MapSstElement::default();
            element.decode(iter.key(), iter.value()).unwrap();
            out.push(element);
            iter.next();
        }
        iter.status().unwrap();
        out
    }

    #[test]
    fn test_preface_passthrough_moves_file() {
        let fx = fixture();
        let f1 = arc_meta(write_data_table(
            fx.dir.path(),
            1,
            &[
                (ikey(b"a", 10, 1), b"va".to_vec()),
                (ikey(b"c", 5, 1), b"vc".to_vec()),
            ],
        ));
        let inputs = vec![CompactionInput {
            level: 1,
            files: vec![Arc::clone(&f1)],
        }];

        let result = fx
            .builder
            .build(&inputs, &[], &[], 2, 0, &DependenceMap::new())
            .unwrap();
        assert!(result.file_meta.is_none());
        assert_eq!(result.edit.deletes(), &[(1, 1)]);
        assert_eq!(result.edit.adds().len(), 1);
        assert_eq!(result.edit.adds()[0].0, Some(2));
        assert_eq!(result.edit.adds()[0].1.fd.file_number, 1);
    }

    #[test]
    fn test_preface_passthrough_same_level_is_noop() {
        let fx = fixture();
        let f1 = arc_meta(write_data_table(
            fx.dir.path(),
            1,
            &[(ikey(b"a", 10, 1), b"va".to_vec())],
        ));
        let inputs = vec![CompactionInput {
            level: 2,
            files: vec![f1],
        }];

        let result = fx
            .builder
            .build(&inputs, &[], &[], 2, 0, &DependenceMap::new())
            .unwrap();
        assert!(result.edit.is_empty());
        assert!(result.file_meta.is_none());
    }

    #[test]
    fn test_two_file_overlap_builds_map() {
        let fx = fixture();
        let f1 = arc_meta(write_data_table(
            fx.dir.path(),
            1,
            &[
                (ikey(b"a", 10, 1), b"va".to_vec()),
                (ikey(b"c", 9, 1), b"vc".to_vec()),
                (ikey(b"m", 5, 1), b"vm".to_vec()),
            ],
        ));
        let f2 = arc_meta(write_data_table(
            fx.dir.path(),
            2,
            &[
                (ikey(b"g", 8, 1), b"vg".to_vec()),
                (ikey(b"s", 4, 1), b"vs".to_vec()),
                (ikey(b"z", 3, 1), b"vz".to_vec()),
            ],
        ));
        let inputs = vec![CompactionInput {
            level: 0,
            files: vec![Arc::clone(&f1), Arc::clone(&f2)],
        }];

        let result = fx
            .builder
            .build(&inputs, &[], &[], 1, 0, &DependenceMap::new())
            .unwrap();
        let map_meta = result.file_meta.expect("a map table is written");
        assert_eq!(map_meta.prop.purpose, TablePurpose::Map);
        assert_eq!(map_meta.prop.dependence, vec![1, 2]);
        assert_eq!(map_meta.prop.read_amp, 2);
        assert_eq!(map_meta.fd.file_number, 100);
        assert_eq!(map_meta.smallest, InternalKey::new(b"a", 10, 1));
        assert_eq!(map_meta.largest, InternalKey::new(b"z", 3, 1));

        assert_eq!(result.edit.deletes(), &[(0, 1), (0, 2)]);
        assert_eq!(result.edit.adds().len(), 1);
        assert_eq!(result.edit.adds()[0].0, Some(1));

        let elements = read_map_elements(&fx, &map_meta);
        assert_eq!(elements.len(), 3);

        assert_eq!(elements[0].smallest_key, ikey(b"a", 10, 1));
        assert_eq!(elements[0].largest_key, ikey(b"g", 8, 1));
        assert_eq!(elements[0].include_smallest, true);
        assert_eq!(elements[0].include_largest, false);
        assert_eq!(elements[0].links.len(), 1);
        assert_eq!(elements[0].links[0].file_number, 1);
        assert!(!elements[0].no_records);

        assert_eq!(elements[1].smallest_key, ikey(b"g", 8, 1));
        assert_eq!(elements[1].largest_key, ikey(b"m", 5, 1));
        assert_eq!(elements[1].include_smallest, true);
        assert_eq!(elements[1].include_largest, true);
        let links: Vec<u64> = elements[1].links.iter().map(|l| l.file_number).collect();
        assert_eq!(links, vec![1, 2]);

        assert_eq!(elements[2].smallest_key, ikey(b"m", 5, 1));
        assert_eq!(elements[2].largest_key, ikey(b"z", 3, 1));
        assert_eq!(elements[2].include_smallest, false);
        assert_eq!(elements[2].include_largest, true);
        assert_eq!(elements[2].links[0].file_number, 2);
        assert!(elements[2].links[0].size > 0);
    }

    #[test]
    fn test_map_reads_match_direct_reads_after_build() {
        let fx = fixture();
        let f1 = arc_meta(write_data_table(
            fx.dir.path(),
            1,
            &[
                (ikey(b"a", 10, 1), b"va".to_vec()),
                (ikey(b"m", 5, 1), b"vm".to_vec()),
            ],
        ));
        let f2 = arc_meta(write_data_table(
            fx.dir.path(),
            2,
            &[
                (ikey(b"g", 8, 1), b"vg".to_vec()),
                (ikey(b"z", 3, 1), b"vz".to_vec()),
            ],
        ));
        let inputs = vec![CompactionInput {
            level: 0,
            files: vec![Arc::clone(&f1), Arc::clone(&f2)],
        }];
        let result = fx
            .builder
            .build(&inputs, &[], &[], 1, 0, &DependenceMap::new())
            .unwrap();
        let map_meta = result.file_meta.unwrap();

        let mut dep = DependenceMap::new();
        dep.insert(1, Arc::clone(&f1));
        dep.insert(2, Arc::clone(&f2));
        let opts = ReadOptions::default();
        for user_key in [&b"a"[..], b"g", b"m", b"z", b"q"] {
            let mut through_map = GetContext::new(user_key, 100);
            fx.cache
                .get(
                    &opts,
                    &map_meta,
                    &through_map.search_key(),
                    &mut through_map,
                    &dep,
                )
                .unwrap();
            let mut direct = GetContext::new(user_key, 100);
            for f in [&f1, &f2] {
                fx.cache
                    .get(&opts, f, &direct.search_key(), &mut direct, &dep)
                    .unwrap();
                if direct.is_finished() {
                    break;
                }
            }
            assert_eq!(direct.state(), through_map.state(), "key {user_key:?}");
            assert_eq!(direct.value(), through_map.value());
        }
    }

    #[test]
    fn test_exact_delete_drops_all_inputs() {
        let fx = fixture();
        let f1 = arc_meta(write_data_table(
            fx.dir.path(),
            1,
            &[
                (ikey(b"a", 9, 1), b"va".to_vec()),
                (ikey(b"z", 1, 1), b"vz".to_vec()),
            ],
        ));
        let map_meta = arc_meta(write_map_table(
            fx.dir.path(),
            2,
            &[element(ikey(b"a", 9, 1), ikey(b"z", 1, 1), true, true, &[1])],
        ));
        let mut dep = DependenceMap::new();
        dep.insert(1, Arc::clone(&f1));

        let inputs = vec![CompactionInput {
            level: 1,
            files: vec![map_meta],
        }];
        let deleted = vec![KeyRange::new(
            ikey(b"a", MAX_SEQUENCE_NUMBER, TYPE_FOR_SEEK),
            ikey(b"z", 0, 0),
            false,
            true,
        )];

        let result = fx.builder.build(&inputs, &deleted, &[], 2, 0, &dep).unwrap();
        assert!(result.file_meta.is_none());
        assert!(result.edit.adds().is_empty());
        assert_eq!(result.edit.deletes(), &[(1, 2)]);
    }

    #[test]
    fn test_interior_delete_splits_and_rewrites() {
        let fx = fixture();
        let f1 = arc_meta(write_data_table(
            fx.dir.path(),
            1,
            &[
                (ikey(b"a", 9, 1), b"va".to_vec()),
                (ikey(b"h", 7, 1), b"vh".to_vec()),
                (ikey(b"z", 1, 1), b"vz".to_vec()),
            ],
        ));
        let map_meta = arc_meta(write_map_table(
            fx.dir.path(),
            2,
            &[element(ikey(b"a", 9, 1), ikey(b"z", 1, 1), true, true, &[1])],
        ));
        let mut dep = DependenceMap::new();
        dep.insert(1, Arc::clone(&f1));

        let inputs = vec![CompactionInput {
            level: 1,
            files: vec![Arc::clone(&map_meta)],
        }];
        let deleted = vec![KeyRange::new(
            ikey(b"g", MAX_SEQUENCE_NUMBER, TYPE_FOR_SEEK),
            ikey(b"m", 0, 0),
            false,
            true,
        )];

        let result = fx.builder.build(&inputs, &deleted, &[], 2, 0, &dep).unwrap();
        let new_map = result.file_meta.expect("survivors are rewritten");
        assert_eq!(result.edit.deletes(), &[(1, 2)]);
        assert_eq!(new_map.prop.dependence, vec![1]);

        let elements = read_map_elements(&fx, &new_map);
        assert_eq!(elements.len(), 2);
        // the masked middle is gone; h fell inside the mask
        assert_eq!(elements[0].smallest_key, ikey(b"a", 9, 1));
        assert_eq!(
            elements[0].largest_key,
            ikey(b"g", MAX_SEQUENCE_NUMBER, TYPE_FOR_SEEK)
        );
        assert!(elements[0].include_largest);
        assert!(!elements[0].no_records);
        assert_eq!(elements[1].smallest_key, ikey(b"m", 0, 0));
        assert!(!elements[1].include_smallest);
        assert_eq!(elements[1].largest_key, ikey(b"z", 1, 1));
    }

    #[test]
    fn test_stability_short_circuit_returns_no_edit() {
        let fx = fixture();
        let _f1 = write_data_table(
            fx.dir.path(),
            1,
            &[
                (ikey(b"a", 9, 1), b"va".to_vec()),
                (ikey(b"m", 5, 1), b"vm".to_vec()),
            ],
        );
        let _f2 = write_data_table(
            fx.dir.path(),
            2,
            &[
                (ikey(b"b", 8, 1), b"vb".to_vec()),
                (ikey(b"n", 4, 1), b"vn".to_vec()),
            ],
        );
        let map_meta = arc_meta(write_map_table(
            fx.dir.path(),
            3,
            &[
                element(ikey(b"a", 9, 1), ikey(b"g", 6, 1), true, false, &[1, 2]),
                element(ikey(b"g", 6, 1), ikey(b"n", 4, 1), true, true, &[1, 2]),
            ],
        ));

        let inputs = vec![CompactionInput {
            level: 2,
            files: vec![map_meta],
        }];
        let result = fx
            .builder
            .build(&inputs, &[], &[], 2, 0, &DependenceMap::new())
            .unwrap();
        assert!(result.edit.is_empty(), "output would equal the input map");
        assert!(result.file_meta.is_none());
    }

    #[test]
    fn test_added_files_join_preface_move() {
        let fx = fixture();
        let f1 = arc_meta(write_data_table(
            fx.dir.path(),
            1,
            &[
                (ikey(b"a", 9, 1), b"va".to_vec()),
                (ikey(b"c", 8, 1), b"vc".to_vec()),
            ],
        ));
        let f2 = arc_meta(write_data_table(
            fx.dir.path(),
            2,
            &[
                (ikey(b"m", 7, 1), b"vm".to_vec()),
                (ikey(b"p", 6, 1), b"vp".to_vec()),
            ],
        ));
        let inputs = vec![CompactionInput {
            level: 1,
            files: vec![Arc::clone(&f1)],
        }];

        let result = fx
            .builder
            .build(
                &inputs,
                &[],
                &[Arc::clone(&f2)],
                2,
                0,
                &DependenceMap::new(),
            )
            .unwrap();
        assert!(result.file_meta.is_none());
        assert_eq!(result.edit.deletes(), &[(1, 1)]);
        let mut added: Vec<(Option<u32>, u64)> = result
            .edit
            .adds()
            .iter()
            .map(|(level, meta)| (*level, meta.fd.file_number))
            .collect();
        added.sort();
        assert_eq!(added, vec![(Some(2), 1), (Some(2), 2)]);
    }

    #[test]
    fn test_missing_link_target_voids_build_and_cleans_up() {
        let fx = fixture();
        let f1 = arc_meta(write_data_table(
            fx.dir.path(),
            1,
            &[
                (ikey(b"a", 9, 1), b"va".to_vec()),
                (ikey(b"z", 1, 1), b"vz".to_vec()),
            ],
        ));
        let map_meta = arc_meta(write_map_table(
            fx.dir.path(),
            2,
            &[element(
                ikey(b"a", 9, 1),
                ikey(b"z", 1, 1),
                true,
                true,
                &[1, 9],
            )],
        ));
        let mut dep = DependenceMap::new();
        dep.insert(1, Arc::clone(&f1));

        let inputs = vec![CompactionInput {
            level: 1,
            files: vec![map_meta],
        }];
        // the split forces re-tightening, which needs the missing file 9
        let deleted = vec![KeyRange::new(
            ikey(b"g", MAX_SEQUENCE_NUMBER, TYPE_FOR_SEEK),
            ikey(b"m", 0, 0),
            false,
            true,
        )];

        let err = fx
            .builder
            .build(&inputs, &deleted, &[], 2, 0, &dep)
            .unwrap_err();
        assert!(err.is_corruption());
        // the allocated output file is removed
        let output = table_file_name(&[fx.dir.path().to_path_buf()], 100, 0);
        assert!(!output.exists());
    }

    #[test]
    fn test_space_quota_voids_build() {
        let fx = fixture();
        let f1 = arc_meta(write_data_table(
            fx.dir.path(),
            1,
            &[
                (ikey(b"a", 10, 1), b"va".to_vec()),
                (ikey(b"m", 5, 1), b"vm".to_vec()),
            ],
        ));
        let f2 = arc_meta(write_data_table(
            fx.dir.path(),
            2,
            &[
                (ikey(b"g", 8, 1), b"vg".to_vec()),
                (ikey(b"z", 3, 1), b"vz".to_vec()),
            ],
        ));
        let builder = MapBuilder::new(
            2,
            Arc::new(FsEnv),
            Arc::new(crate::table::plain::PlainTableFactory),
            Arc::clone(&fx.cache),
            vec![fx.dir.path().to_path_buf()],
            Arc::new(FileNumberAllocator::new(200)),
        )
        .space_quota(Arc::new(SpaceQuota::new(1)));

        let inputs = vec![CompactionInput {
            level: 0,
            files: vec![f1, f2],
        }];
        let err = builder
            .build(&inputs, &[], &[], 1, 0, &DependenceMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::SpaceLimit(_)));
        let output = table_file_name(&[fx.dir.path().to_path_buf()], 200, 0);
        assert!(!output.exists());
    }

    #[test]
    fn test_unstable_ranges_tighten_links_and_mark_empty() {
        let fx = fixture();
        // records only below "g"; the split's upper half is empty
        let f1 = arc_meta(write_data_table(
            fx.dir.path(),
            1,
            &[
                (ikey(b"a", 9, 1), b"va".to_vec()),
                (ikey(b"c", 8, 1), b"vc".to_vec()),
            ],
        ));
        let map_meta = arc_meta(write_map_table(
            fx.dir.path(),
            2,
            &[element(ikey(b"a", 9, 1), ikey(b"z", 1, 1), true, true, &[1])],
        ));
        let mut dep = DependenceMap::new();
        dep.insert(1, Arc::clone(&f1));

        let inputs = vec![CompactionInput {
            level: 1,
            files: vec![map_meta],
        }];
        let deleted = vec![KeyRange::new(
            ikey(b"d", MAX_SEQUENCE_NUMBER, TYPE_FOR_SEEK),
            ikey(b"g", 0, 0),
            false,
            true,
        )];

        let result = fx.builder.build(&inputs, &deleted, &[], 2, 0, &dep).unwrap();
        let elements = read_map_elements(&fx, &result.file_meta.unwrap());
        assert_eq!(elements.len(), 2);
        assert!(!elements[0].no_records, "records exist below the mask");
        assert!(
            elements[1].no_records,
            "no link contributes records above the mask"
        );
        assert_eq!(elements[1].links[0].size, 0);
    }
}
