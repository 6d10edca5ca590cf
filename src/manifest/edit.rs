use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::meta::FileMetaData;
use crate::error::{Error, Result};

const ADD_FILE: u8 = 0x01;
const DELETE_FILE: u8 = 0x02;

/// Level sentinel for files re-added without a level placement: they stay
/// reachable only through map links.
const DEPENDENCE_LEVEL: u32 = u32::MAX;

/// The atomic set of file additions and deletions a build publishes. The
/// embedding version manager applies the whole edit or none of it.
#[derive(Debug, Default, PartialEq)]
pub struct VersionEdit {
    adds: Vec<(Option<u32>, FileMetaData)>,
    deletes: Vec<(u32, u64)>,
}

impl VersionEdit {
    pub fn new() -> Self {
        VersionEdit::default()
    }

    /// Adds `meta` at `level`; `None` marks a dependence-only file that
    /// no level owns.
    pub fn add_file(&mut self, level: Option<u32>, meta: FileMetaData) {
        self.adds.push((level, meta));
    }

    pub fn delete_file(&mut self, level: u32, file_number: u64) {
        self.deletes.push((level, file_number));
    }

    pub fn adds(&self) -> &[(Option<u32>, FileMetaData)] {
        &self.adds
    }

    pub fn deletes(&self) -> &[(u32, u64)] {
        &self.deletes
    }

    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.deletes.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for (level, meta) in &self.adds {
            buf.write_u8(ADD_FILE).unwrap();
            buf.write_u32::<BigEndian>(level.unwrap_or(DEPENDENCE_LEVEL))
                .unwrap();
            meta.encode_into(&mut buf);
        }
        for (level, file_number) in &self.deletes {
            buf.write_u8(DELETE_FILE).unwrap();
            buf.write_u32::<BigEndian>(*level).unwrap();
            buf.write_u64::<BigEndian>(*file_number).unwrap();
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(buf);
        let mut edit = VersionEdit::new();
        while (cursor.position() as usize) < buf.len() {
            match cursor.read_u8()? {
                ADD_FILE => {
                    let raw_level = cursor.read_u32::<BigEndian>()?;
                    let level = (raw_level != DEPENDENCE_LEVEL).then_some(raw_level);
                    let meta = FileMetaData::decode_from(&mut cursor)?;
                    edit.adds.push((level, meta));
                }
                DELETE_FILE => {
                    let level = cursor.read_u32::<BigEndian>()?;
                    let file_number = cursor.read_u64::<BigEndian>()?;
                    edit.deletes.push((level, file_number));
                }
                tag => {
                    return Err(Error::Corruption(format!("invalid edit record tag {tag}")))
                }
            }
        }
        Ok(edit)
    }
}
