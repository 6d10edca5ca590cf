//! Internal key format.
//!
//! Every key stored in a table is a user key followed by an 8-byte footer
//! packing a 56-bit sequence number and an 8-bit value type:
//!
//! ```text
//! +----------------------+------------------------------+
//! | user key (n bytes)   | (sequence << 8) | type (u64) |
//! +----------------------+------------------------------+
//! ```
//!
//! Internal keys order by user key ascending, then footer *descending*, so
//! for one user key the newest sequence sorts first. The all-ones footer
//! (`MAX_SEQUENCE_NUMBER` with `TYPE_FOR_SEEK`) is the maximum internal key
//! for its user key and doubles as a range sentinel.

use std::cmp::Ordering;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

pub type SequenceNumber = u64;

/// Largest sequence number representable in the 56-bit footer field.
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1 << 56) - 1;

/// Number of footer bytes at the tail of every internal key.
pub const FOOTER_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    Deletion = 0,
    Value = 1,
}

/// Footer type used in search keys. Sorts before every real type at the
/// same sequence (footer order is descending), so a search key with
/// `TYPE_FOR_SEEK` lands on the newest eligible record.
pub const TYPE_FOR_SEEK: u8 = 0xFF;

/// The packed all-ones footer: `pack(MAX_SEQUENCE_NUMBER, TYPE_FOR_SEEK)`.
pub const MAX_FOOTER: u64 = u64::MAX;

impl ValueType {
    pub fn from_u8(v: u8) -> Option<ValueType> {
        match v {
            0 => Some(ValueType::Deletion),
            1 => Some(ValueType::Value),
            _ => None,
        }
    }
}

pub fn pack_sequence_and_type(seq: SequenceNumber, value_type: u8) -> u64 {
    debug_assert!(seq <= MAX_SEQUENCE_NUMBER);
    (seq << 8) | value_type as u64
}

pub fn unpack_sequence_and_type(footer: u64) -> (SequenceNumber, u8) {
    (footer >> 8, footer as u8)
}

/// The packed footer of an encoded internal key.
pub fn extract_footer(ikey: &[u8]) -> u64 {
    debug_assert!(ikey.len() >= FOOTER_LEN);
    BigEndian::read_u64(&ikey[ikey.len() - FOOTER_LEN..])
}

pub fn extract_sequence(ikey: &[u8]) -> SequenceNumber {
    extract_footer(ikey) >> 8
}

pub fn extract_user_key(ikey: &[u8]) -> &[u8] {
    debug_assert!(ikey.len() >= FOOTER_LEN);
    &ikey[..ikey.len() - FOOTER_LEN]
}

/// An owned, encoded internal key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InternalKey(Vec<u8>);

impl InternalKey {
    pub fn new(user_key: &[u8], seq: SequenceNumber, value_type: u8) -> Self {
        let mut buf = Vec::with_capacity(user_key.len() + FOOTER_LEN);
        buf.extend_from_slice(user_key);
        buf.write_u64::<BigEndian>(pack_sequence_and_type(seq, value_type))
            .unwrap();
        InternalKey(buf)
    }

    /// Wraps an already-encoded internal key.
    pub fn decode_from(encoded: &[u8]) -> Self {
        InternalKey(encoded.to_vec())
    }

    pub fn encoded(&self) -> &[u8] {
        &self.0
    }

    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.0)
    }

    pub fn footer(&self) -> u64 {
        extract_footer(&self.0)
    }

    pub fn sequence(&self) -> SequenceNumber {
        extract_sequence(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Orders encoded internal keys: user key ascending, footer descending.
#[derive(Clone, Copy, Debug, Default)]
pub struct InternalKeyComparator;

impl InternalKeyComparator {
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match extract_user_key(a).cmp(extract_user_key(b)) {
            Ordering::Equal => extract_footer(b).cmp(&extract_footer(a)),
            ord => ord,
        }
    }

    pub fn compare_user_key(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    /// True when both encoded keys carry the same user key.
    pub fn same_user_key(&self, a: &[u8], b: &[u8]) -> bool {
        extract_user_key(a) == extract_user_key(b)
    }
}
