//! Shared fixtures for unit tests.

use std::sync::Arc;

use crate::env::{table_file_name, Env, FsEnv};
use crate::error::Result;
use crate::iter::InternalIterator;
use crate::key::{InternalKey, InternalKeyComparator};
use crate::manifest::meta::{FileDescriptor, FileMetaData};
use crate::map_element::{LinkTarget, MapSstElement};
use crate::table::plain::PlainTableFactory;
use crate::table::{TableFactory, TableProperties, TablePurpose};

pub(crate) fn ikey(user: &[u8], seq: u64, value_type: u8) -> Vec<u8> {
    InternalKey::new(user, seq, value_type).encoded().to_vec()
}

/// An iterator over an in-memory sorted entry list.
pub(crate) struct VecIter {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
    icmp: InternalKeyComparator,
}

impl VecIter {
    pub(crate) fn new(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        let pos = entries.len();
        VecIter {
            entries,
            pos,
            icmp: InternalKeyComparator,
        }
    }
}

impl InternalIterator for VecIter {
    fn valid(&self) -> bool {
        self.pos < self.entries.len()
    }

    fn seek(&mut self, target: &[u8]) {
        self.pos = self
            .entries
            .partition_point(|(k, _)| self.icmp.compare(k, target).is_lt());
    }

    fn seek_for_prev(&mut self, target: &[u8]) {
        let bound = self
            .entries
            .partition_point(|(k, _)| !self.icmp.compare(k, target).is_gt());
        self.pos = if bound == 0 { self.entries.len() } else { bound - 1 };
    }

    fn seek_to_first(&mut self) {
        self.pos = 0;
    }

    fn seek_to_last(&mut self) {
        let len = self.entries.len();
        self.pos = if len == 0 { 0 } else { len - 1 };
    }

    fn next(&mut self) {
        self.pos += 1;
    }

    fn prev(&mut self) {
        self.pos = match self.pos.checked_sub(1) {
            Some(pos) => pos,
            None => self.entries.len(),
        };
    }

    fn key(&self) -> &[u8] {
        &self.entries[self.pos].0
    }

    fn value(&self) -> &[u8] {
        &self.entries[self.pos].1
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}

/// Writes a plain data table under `dir` and returns its metadata.
pub(crate) fn write_data_table(
    dir: &std::path::Path,
    number: u64,
    entries: &[(Vec<u8>, Vec<u8>)],
) -> FileMetaData {
    let env = FsEnv;
    let path = table_file_name(&[dir.to_path_buf()], number, 0);
    let file = env.new_writable_file(&path).unwrap();
    let mut builder = PlainTableFactory
        .new_builder(file, TablePurpose::Data, 1)
        .unwrap();
    for (k, v) in entries {
        builder.add(k, v).unwrap();
    }
    builder.finish(&TableProperties::default()).unwrap();

    FileMetaData {
        fd: FileDescriptor::new(number, 0, builder.file_size()),
        smallest: InternalKey::decode_from(&entries.first().unwrap().0),
        largest: InternalKey::decode_from(&entries.last().unwrap().0),
        prop: TableProperties::default(),
        table_reader: None,
    }
}

/// Writes a plain map table under `dir` from already-ordered elements.
pub(crate) fn write_map_table(
    dir: &std::path::Path,
    number: u64,
    elements: &[MapSstElement],
) -> FileMetaData {
    let env = FsEnv;
    let path = table_file_name(&[dir.to_path_buf()], number, 0);
    let file = env.new_writable_file(&path).unwrap();
    let mut builder = PlainTableFactory
        .new_builder(file, TablePurpose::Map, 1)
        .unwrap();
    let mut value = Vec::new();
    let mut dependence: Vec<u64> = Vec::new();
    for element in elements {
        element.encode_value(&mut value);
        builder.add(element.key(), &value).unwrap();
        dependence.extend(element.links.iter().map(|l| l.file_number));
    }
    dependence.sort_unstable();
    dependence.dedup();
    let props = TableProperties {
        purpose: TablePurpose::Map,
        dependence,
        read_amp: elements.iter().map(|e| e.links.len()).max().unwrap_or(0),
        creation_time: 1,
    };
    builder.finish(&props).unwrap();

    FileMetaData {
        fd: FileDescriptor::new(number, 0, builder.file_size()),
        smallest: InternalKey::decode_from(&elements.first().unwrap().smallest_key),
        largest: InternalKey::decode_from(&elements.last().unwrap().largest_key),
        prop: props,
        table_reader: None,
    }
}

pub(crate) fn element(
    smallest: Vec<u8>,
    largest: Vec<u8>,
    include_smallest: bool,
    include_largest: bool,
    links: &[u64],
) -> MapSstElement {
    MapSstElement {
        smallest_key: smallest,
        largest_key: largest,
        include_smallest,
        include_largest,
        no_records: false,
        no_smallest: false,
        links: links.iter().map(|&n| LinkTarget::new(n, 0)).collect(),
    }
}

pub(crate) fn arc_meta(meta: FileMetaData) -> Arc<FileMetaData> {
    Arc::new(meta)
}
