use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::key::{InternalKey, InternalKeyComparator, SequenceNumber, MAX_SEQUENCE_NUMBER};
use crate::table::{TableProperties, TablePurpose, TableReader};

/// Engine-wide lookup from file number to metadata, used to resolve map
/// link targets.
pub type DependenceMap = HashMap<u64, Arc<FileMetaData>>;

/// Identity of a table file within a storage instance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileDescriptor {
    pub file_number: u64,
    pub path_id: u32,
    pub file_size: u64,
    pub smallest_seqno: SequenceNumber,
    pub largest_seqno: SequenceNumber,
}

impl FileDescriptor {
    pub fn new(file_number: u64, path_id: u32, file_size: u64) -> Self {
        FileDescriptor {
            file_number,
            path_id,
            file_size,
            smallest_seqno: 0,
            largest_seqno: 0,
        }
    }

    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.write_u64::<BigEndian>(self.file_number).unwrap();
        buf.write_u32::<BigEndian>(self.path_id).unwrap();
        buf.write_u64::<BigEndian>(self.file_size).unwrap();
        buf.write_u64::<BigEndian>(self.smallest_seqno).unwrap();
        buf.write_u64::<BigEndian>(self.largest_seqno).unwrap();
    }

    pub(crate) fn decode_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        Ok(FileDescriptor {
            file_number: cursor.read_u64::<BigEndian>()?,
            path_id: cursor.read_u32::<BigEndian>()?,
            file_size: cursor.read_u64::<BigEndian>()?,
            smallest_seqno: cursor.read_u64::<BigEndian>()?,
            largest_seqno: cursor.read_u64::<BigEndian>()?,
        })
    }
}

/// A table file: its descriptor, key bounds and persisted properties.
/// `table_reader` optionally pins a pre-opened reader so lookups can skip
/// the cache.
#[derive(Clone, Default)]
pub struct FileMetaData {
    pub fd: FileDescriptor,
    pub smallest: InternalKey,
    pub largest: InternalKey,
    pub prop: TableProperties,
    pub table_reader: Option<Arc<dyn TableReader>>,
}

impl FileMetaData {
    pub fn file_number(&self) -> u64 {
        self.fd.file_number
    }

    pub fn purpose(&self) -> TablePurpose {
        self.prop.purpose
    }

    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        self.fd.encode_into(buf);

        buf.write_u32::<BigEndian>(self.smallest.encoded().len() as u32)
            .unwrap();
        buf.extend_from_slice(self.smallest.encoded());
        buf.write_u32::<BigEndian>(self.largest.encoded().len() as u32)
            .unwrap();
        buf.extend_from_slice(self.largest.encoded());

        buf.push(self.prop.purpose.as_u8());
        buf.write_u32::<BigEndian>(self.prop.read_amp as u32).unwrap();
        buf.write_u64::<BigEndian>(self.prop.creation_time).unwrap();
        buf.write_u32::<BigEndian>(self.prop.dependence.len() as u32)
            .unwrap();
        for number in &self.prop.dependence {
            buf.write_u64::<BigEndian>(*number).unwrap();
        }
    }

    pub(crate) fn decode_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let fd = FileDescriptor::decode_from(cursor)?;

        let smallest_len = cursor.read_u32::<BigEndian>()? as usize;
        let mut smallest = vec![0u8; smallest_len];
        cursor.read_exact(&mut smallest)?;
        let largest_len = cursor.read_u32::<BigEndian>()? as usize;
        let mut largest = vec![0u8; largest_len];
        cursor.read_exact(&mut largest)?;

        let purpose = TablePurpose::from_u8(cursor.read_u8()?)?;
        let read_amp = cursor.read_u32::<BigEndian>()? as usize;
        let creation_time = cursor.read_u64::<BigEndian>()?;
        let dep_count = cursor.read_u32::<BigEndian>()? as usize;
        let mut dependence = Vec::with_capacity(dep_count);
        for _ in 0..dep_count {
            dependence.push(cursor.read_u64::<BigEndian>()?);
        }

        Ok(FileMetaData {
            fd,
            smallest: InternalKey::decode_from(&smallest),
            largest: InternalKey::decode_from(&largest),
            prop: TableProperties {
                purpose,
                dependence,
                read_amp,
                creation_time,
            },
            table_reader: None,
        })
    }
}

impl fmt::Debug for FileMetaData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileMetaData")
            .field("fd", &self.fd)
            .field("smallest", &self.smallest)
            .field("largest", &self.largest)
            .field("prop", &self.prop)
            .field("table_reader", &self.table_reader.is_some())
            .finish()
    }
}

impl PartialEq for FileMetaData {
    fn eq(&self, other: &Self) -> bool {
        self.fd == other.fd
            && self.smallest == other.smallest
            && self.largest == other.largest
            && self.prop == other.prop
    }
}

/// Accumulates the key and sequence bounds of a set of contributing
/// files, plus the newest creation time seen among their readers.
pub struct BoundBuilder {
    icmp: InternalKeyComparator,
    pub smallest: InternalKey,
    pub largest: InternalKey,
    pub smallest_seqno: SequenceNumber,
    pub largest_seqno: SequenceNumber,
    pub creation_time: u64,
}

impl BoundBuilder {
    pub fn new(icmp: InternalKeyComparator) -> Self {
        BoundBuilder {
            icmp,
            smallest: InternalKey::default(),
            largest: InternalKey::default(),
            smallest_seqno: MAX_SEQUENCE_NUMBER,
            largest_seqno: 0,
            creation_time: 0,
        }
    }

    pub fn update(&mut self, f: &FileMetaData) {
        if self.smallest.is_empty()
            || self
                .icmp
                .compare(f.smallest.encoded(), self.smallest.encoded())
                .is_lt()
        {
            self.smallest = f.smallest.clone();
        }
        if self.largest.is_empty()
            || self
                .icmp
                .compare(f.largest.encoded(), self.largest.encoded())
                .is_gt()
        {
            self.largest = f.largest.clone();
        }
        self.smallest_seqno = self.smallest_seqno.min(f.fd.smallest_seqno);
        self.largest_seqno = self.largest_seqno.max(f.fd.largest_seqno);
    }

    pub fn update_creation_time(&mut self, creation_time: u64) {
        self.creation_time = self.creation_time.max(creation_time);
    }
}

/// Hands out fresh file numbers; shared with the embedding version set.
pub struct FileNumberAllocator {
    next: AtomicU64,
}

impl FileNumberAllocator {
    pub fn new(first: u64) -> Self {
        FileNumberAllocator {
            next: AtomicU64::new(first),
        }
    }

    pub fn next_file_number(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> FileMetaData {
        FileMetaData {
            fd: FileDescriptor {
                file_number: 42,
                path_id: 1,
                file_size: 4096,
                smallest_seqno: 3,
                largest_seqno: 17,
            },
            smallest: InternalKey::new(b"aardvark", 17, 1),
            largest: InternalKey::new(b"zebra", 3, 1),
            prop: TableProperties {
                purpose: TablePurpose::Map,
                dependence: vec![7, 9, 11],
                read_amp: 2,
                creation_time: 1_700_000_000,
            },
            table_reader: None,
        }
    }

    #[test]
    fn test_meta_roundtrip() {
        let original = sample_meta();
        let mut buf = Vec::new();
        original.encode_into(&mut buf);

        let mut cursor = Cursor::new(buf.as_slice());
        let decoded = FileMetaData::decode_from(&mut cursor).expect("decode");
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_bound_builder_spans_inputs() {
        let icmp = InternalKeyComparator;
        let mut bounds = BoundBuilder::new(icmp);

        let mut f1 = sample_meta();
        f1.smallest = InternalKey::new(b"m", 10, 1);
        f1.largest = InternalKey::new(b"q", 5, 1);
        f1.fd.smallest_seqno = 5;
        f1.fd.largest_seqno = 10;

        let mut f2 = sample_meta();
        f2.smallest = InternalKey::new(b"a", 8, 1);
        f2.largest = InternalKey::new(b"z", 2, 1);
        f2.fd.smallest_seqno = 2;
        f2.fd.largest_seqno = 8;

        bounds.update(&f1);
        bounds.update(&f2);
        bounds.update_creation_time(100);
        bounds.update_creation_time(50);

        assert_eq!(bounds.smallest.user_key(), b"a");
        assert_eq!(bounds.largest.user_key(), b"z");
        assert_eq!(bounds.smallest_seqno, 2);
        assert_eq!(bounds.largest_seqno, 10);
        assert_eq!(bounds.creation_time, 100);
    }

    #[test]
    fn test_allocator_is_monotonic() {
        let alloc = FileNumberAllocator::new(10);
        assert_eq!(alloc.next_file_number(), 10);
        assert_eq!(alloc.next_file_number(), 11);
        assert_eq!(alloc.next_file_number(), 12);
    }
}
