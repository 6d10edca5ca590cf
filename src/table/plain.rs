//! A minimal table layout: length-prefixed sorted entries, a properties
//! section, and a fixed footer.
//!
//! ```text
//! +-------------------------------------------+
//! | entry 1: key_len | key | value_len | value|
//! | entry 2: ...                              |
//! +-------------------------------------------+
//! | properties                                |
//! +-------------------------------------------+
//! | props_offset (u64) | entries (u32) | magic|
//! +-------------------------------------------+
//! ```
//!
//! The whole table is decoded into memory at open; map tables are small
//! by construction and the data tables this crate handles directly are
//! test fixtures. Anything larger plugs in its own [`TableFactory`].

use std::cmp::Ordering;
use std::io::{Cursor, Read};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::{TableBuilder, TableFactory, TableProperties, TablePurpose, TableReader};
use crate::config::ReadOptions;
use crate::env::{RandomAccessFile, WritableFile};
use crate::error::{Error, Result};
use crate::get_context::GetContext;
use crate::iter::InternalIterator;
use crate::key::InternalKeyComparator;

const PLAIN_TABLE_MAGIC: u64 = 0x6d61_7073_7374_0001;
const FOOTER_SIZE: u64 = 8 + 4 + 8;

#[derive(Debug)]
struct Entry {
    key: Vec<u8>,
    value: Vec<u8>,
    /// Byte offset of the entry within the data section.
    offset: u64,
}

#[derive(Debug)]
pub struct PlainTableReader {
    icmp: InternalKeyComparator,
    entries: Vec<Entry>,
    data_size: u64,
    props: TableProperties,
}

impl PlainTableReader {
    pub fn open(file: &dyn RandomAccessFile, file_size: u64) -> Result<Self> {
        if file_size < FOOTER_SIZE {
            return Err(Error::Corruption("plain table too short".into()));
        }
        let mut raw = vec![0u8; file_size as usize];
        let read = file.read_at(0, &mut raw)?;
        if read as u64 != file_size {
            return Err(Error::Corruption("plain table truncated".into()));
        }

        let mut footer = Cursor::new(&raw[(file_size - FOOTER_SIZE) as usize..]);
        let props_offset = footer.read_u64::<BigEndian>()?;
        let entry_count = footer.read_u32::<BigEndian>()? as usize;
        let magic = footer.read_u64::<BigEndian>()?;
        if magic != PLAIN_TABLE_MAGIC {
            return Err(Error::Corruption("plain table bad magic".into()));
        }
        if props_offset > file_size - FOOTER_SIZE {
            return Err(Error::Corruption("plain table bad properties offset".into()));
        }

        let props = Self::decode_props(&raw[props_offset as usize..(file_size - FOOTER_SIZE) as usize])?;

        let mut entries = Vec::with_capacity(entry_count);
        let mut cursor = Cursor::new(&raw[..props_offset as usize]);
        for _ in 0..entry_count {
            let offset = cursor.position();
            let key_len = cursor.read_u32::<BigEndian>()? as usize;
            let mut key = vec![0u8; key_len];
            cursor.read_exact(&mut key)?;
            let value_len = cursor.read_u32::<BigEndian>()? as usize;
            let mut value = vec![0u8; value_len];
            cursor.read_exact(&mut value)?;
            entries.push(Entry { key, value, offset });
        }
        if cursor.position() != props_offset {
            return Err(Error::Corruption("plain table trailing entry bytes".into()));
        }

        Ok(PlainTableReader {
            icmp: InternalKeyComparator,
            entries,
            data_size: props_offset,
            props,
        })
    }

    fn decode_props(buf: &[u8]) -> Result<TableProperties> {
        let mut cursor = Cursor::new(buf);
        let purpose = TablePurpose::from_u8(cursor.read_u8()?)?;
        let creation_time = cursor.read_u64::<BigEndian>()?;
        let read_amp = cursor.read_u32::<BigEndian>()? as usize;
        let dep_count = cursor.read_u32::<BigEndian>()? as usize;
        let mut dependence = Vec::with_capacity(dep_count);
        for _ in 0..dep_count {
            dependence.push(cursor.read_u64::<BigEndian>()?);
        }
        Ok(TableProperties {
            purpose,
            dependence,
            read_amp,
            creation_time,
        })
    }

    /// Index of the first entry with key >= `target`.
    fn lower_bound(&self, target: &[u8]) -> usize {
        self.entries
            .partition_point(|e| self.icmp.compare(&e.key, target) == Ordering::Less)
    }

    /// Index of the first entry with key > `target`.
    fn upper_bound(&self, target: &[u8]) -> usize {
        self.entries
            .partition_point(|e| self.icmp.compare(&e.key, target) != Ordering::Greater)
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }
}

impl TableReader for PlainTableReader {
    fn new_iterator(self: Arc<Self>, _opts: &ReadOptions) -> Box<dyn InternalIterator> {
        let len = self.entries.len();
        Box::new(PlainTableIterator {
            table: self,
            pos: len,
        })
    }

    fn get(&self, _opts: &ReadOptions, key: &[u8], ctx: &mut GetContext) -> Result<()> {
        let mut pos = self.lower_bound(key);
        while pos < self.entries.len() {
            let entry = &self.entries[pos];
            if !ctx.save_value(&entry.key, &entry.value)? {
                break;
            }
            pos += 1;
        }
        Ok(())
    }

    fn approximate_offset_of(&self, key: &[u8]) -> u64 {
        let pos = self.lower_bound(key);
        match self.entries.get(pos) {
            Some(entry) => entry.offset,
            None => self.data_size,
        }
    }

    fn properties(&self) -> &TableProperties {
        &self.props
    }
}

struct PlainTableIterator {
    table: Arc<PlainTableReader>,
    /// `entries.len()` marks the invalid position.
    pos: usize,
}

impl InternalIterator for PlainTableIterator {
    fn valid(&self) -> bool {
        self.pos < self.table.entries.len()
    }

    fn seek(&mut self, target: &[u8]) {
        self.pos = self.table.lower_bound(target);
    }

    fn seek_for_prev(&mut self, target: &[u8]) {
        let bound = self.table.upper_bound(target);
        self.pos = if bound == 0 {
            self.table.entries.len()
        } else {
            bound - 1
        };
    }

    fn seek_to_first(&mut self) {
        self.pos = 0;
    }

    fn seek_to_last(&mut self) {
        let len = self.table.entries.len();
        self.pos = if len == 0 { 0 } else { len - 1 };
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.pos += 1;
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        let len = self.table.entries.len();
        self.pos = match self.pos.checked_sub(1) {
            Some(pos) => pos,
            None => len,
        };
    }

    fn key(&self) -> &[u8] {
        &self.table.entries[self.pos].key
    }

    fn value(&self) -> &[u8] {
        &self.table.entries[self.pos].value
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}

pub struct PlainTableBuilder {
    icmp: InternalKeyComparator,
    file: Box<dyn WritableFile>,
    purpose: TablePurpose,
    creation_time: u64,
    offset: u64,
    num_entries: u64,
    last_key: Vec<u8>,
    finished: bool,
}

impl PlainTableBuilder {
    pub fn new(
        file: Box<dyn WritableFile>,
        purpose: TablePurpose,
        creation_time: u64,
    ) -> Self {
        PlainTableBuilder {
            icmp: InternalKeyComparator,
            file,
            purpose,
            creation_time,
            offset: 0,
            num_entries: 0,
            last_key: Vec::new(),
            finished: false,
        }
    }

    fn encode_props(&self, props: &TableProperties) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(props.purpose.as_u8());
        buf.write_u64::<BigEndian>(props.creation_time).unwrap();
        buf.write_u32::<BigEndian>(props.read_amp as u32).unwrap();
        buf.write_u32::<BigEndian>(props.dependence.len() as u32)
            .unwrap();
        for number in &props.dependence {
            buf.write_u64::<BigEndian>(*number).unwrap();
        }
        buf
    }
}

impl TableBuilder for PlainTableBuilder {
    fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if !self.last_key.is_empty() && self.icmp.compare(key, &self.last_key) != Ordering::Greater
        {
            return Err(Error::InvalidArgument(
                "plain table keys must be added in ascending order".into(),
            ));
        }
        let mut buf = Vec::with_capacity(8 + key.len() + value.len());
        buf.write_u32::<BigEndian>(key.len() as u32).unwrap();
        buf.extend_from_slice(key);
        buf.write_u32::<BigEndian>(value.len() as u32).unwrap();
        buf.extend_from_slice(value);
        self.file.append(&buf)?;
        self.offset += buf.len() as u64;
        self.num_entries += 1;
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        Ok(())
    }

    fn finish(&mut self, props: &TableProperties) -> Result<()> {
        debug_assert!(!self.finished);
        let mut props = props.clone();
        if props.creation_time == 0 {
            props.creation_time = self.creation_time;
        }
        props.purpose = self.purpose;

        let props_offset = self.offset;
        let props_buf = self.encode_props(&props);
        self.file.append(&props_buf)?;

        let mut footer = Vec::with_capacity(FOOTER_SIZE as usize);
        footer.write_u64::<BigEndian>(props_offset).unwrap();
        footer.write_u32::<BigEndian>(self.num_entries as u32).unwrap();
        footer.write_u64::<BigEndian>(PLAIN_TABLE_MAGIC).unwrap();
        self.file.append(&footer)?;

        self.offset += props_buf.len() as u64 + FOOTER_SIZE;
        self.file.sync()?;
        self.file.close()?;
        self.finished = true;
        Ok(())
    }

    fn abandon(&mut self) {
        self.finished = true;
    }

    fn num_entries(&self) -> u64 {
        self.num_entries
    }

    fn file_size(&self) -> u64 {
        self.offset
    }
}

/// Factory for the plain layout.
pub struct PlainTableFactory;

impl TableFactory for PlainTableFactory {
    fn new_reader(
        &self,
        file: Box<dyn RandomAccessFile>,
        file_size: u64,
    ) -> Result<Arc<dyn TableReader>> {
        Ok(Arc::new(PlainTableReader::open(file.as_ref(), file_size)?))
    }

    fn new_builder(
        &self,
        file: Box<dyn WritableFile>,
        purpose: TablePurpose,
        creation_time: u64,
    ) -> Result<Box<dyn TableBuilder>> {
        Ok(Box::new(PlainTableBuilder::new(file, purpose, creation_time)))
    }
}
