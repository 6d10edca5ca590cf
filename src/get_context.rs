//! Point-lookup state threaded through table readers.

use crate::error::{Error, Result};
use crate::key::{
    extract_footer, extract_user_key, pack_sequence_and_type, SequenceNumber, ValueType,
    FOOTER_LEN, TYPE_FOR_SEEK,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GetState {
    NotFound,
    Found,
    Deleted,
}

/// Accumulates the outcome of a point lookup as readers scan records for
/// the query's user key.
///
/// `min_sequence_and_type` is the window floor used by map-aware GET:
/// while resolving one map element, records whose packed footer is below
/// the floor belong to a neighbouring element and must be ignored.
pub struct GetContext {
    user_key: Vec<u8>,
    sequence: SequenceNumber,
    state: GetState,
    value: Vec<u8>,
    min_sequence_and_type: u64,
    key_may_exist: bool,
}

impl GetContext {
    pub fn new(user_key: &[u8], sequence: SequenceNumber) -> Self {
        GetContext {
            user_key: user_key.to_vec(),
            sequence,
            state: GetState::NotFound,
            value: Vec::new(),
            min_sequence_and_type: 0,
            key_may_exist: false,
        }
    }

    /// The encoded internal key to seek with: the query user key at the
    /// read sequence, with the seek type so it sorts before every record
    /// the query may return.
    pub fn search_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.user_key.len() + FOOTER_LEN);
        key.extend_from_slice(&self.user_key);
        key.extend_from_slice(
            &pack_sequence_and_type(self.sequence, TYPE_FOR_SEEK).to_be_bytes(),
        );
        key
    }

    pub fn user_key(&self) -> &[u8] {
        &self.user_key
    }

    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    pub fn state(&self) -> &GetState {
        &self.state
    }

    /// The found value; meaningful only in `GetState::Found`.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// The lookup has produced a definitive answer and no further tables
    /// need to be consulted.
    pub fn is_finished(&self) -> bool {
        self.state != GetState::NotFound
    }

    pub fn min_sequence_and_type(&self) -> u64 {
        self.min_sequence_and_type
    }

    pub fn set_min_sequence_and_type(&mut self, floor: u64) {
        self.min_sequence_and_type = floor;
    }

    /// Set when a cache-only read could not rule the key out.
    pub fn mark_key_may_exist(&mut self) {
        self.key_may_exist = true;
    }

    pub fn key_may_exist(&self) -> bool {
        self.key_may_exist
    }

    /// Offers one record to the lookup. Returns true when the reader
    /// should keep scanning, false once the record stream for this query
    /// is exhausted (answered, out of user key, or below the window
    /// floor).
    pub fn save_value(&mut self, ikey: &[u8], value: &[u8]) -> Result<bool> {
        if ikey.len() < FOOTER_LEN {
            return Err(Error::Corruption("record key shorter than footer".into()));
        }
        if extract_user_key(ikey) != self.user_key.as_slice() {
            return Ok(false);
        }
        let footer = extract_footer(ikey);
        if footer < self.min_sequence_and_type {
            return Ok(false);
        }
        let (seq, value_type) = crate::key::unpack_sequence_and_type(footer);
        if seq > self.sequence {
            // newer than the read snapshot, keep looking
            return Ok(true);
        }
        match ValueType::from_u8(value_type) {
            Some(ValueType::Value) => {
                self.state = GetState::Found;
                self.value = value.to_vec();
                Ok(false)
            }
            Some(ValueType::Deletion) => {
                self.state = GetState::Deleted;
                Ok(false)
            }
            None => Err(Error::Corruption(format!(
                "unknown value type {value_type}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::InternalKey;

    fn ikey(user: &[u8], seq: u64, t: u8) -> Vec<u8> {
        InternalKey::new(user, seq, t).encoded().to_vec()
    }

    #[test]
    fn test_finds_newest_visible_record() {
        let mut ctx = GetContext::new(b"k", 10);
        // record newer than the snapshot is skipped
        assert!(ctx.save_value(&ikey(b"k", 12, 1), b"v12").unwrap());
        assert!(!ctx.save_value(&ikey(b"k", 9, 1), b"v9").unwrap());
        assert_eq!(*ctx.state(), GetState::Found);
        assert_eq!(ctx.value(), b"v9");
        assert!(ctx.is_finished());
    }

    #[test]
    fn test_deletion_terminates() {
        let mut ctx = GetContext::new(b"k", 10);
        assert!(!ctx.save_value(&ikey(b"k", 8, 0), b"").unwrap());
        assert_eq!(*ctx.state(), GetState::Deleted);
        assert!(ctx.is_finished());
    }

    #[test]
    fn test_other_user_key_stops_scan() {
        let mut ctx = GetContext::new(b"k", 10);
        assert!(!ctx.save_value(&ikey(b"l", 8, 1), b"v").unwrap());
        assert_eq!(*ctx.state(), GetState::NotFound);
    }

    #[test]
    fn test_window_floor_excludes_records() {
        let mut ctx = GetContext::new(b"k", 10);
        ctx.set_min_sequence_and_type(crate::key::pack_sequence_and_type(5, 0));
        // sequence 3 is below the floor: out of this element's window
        assert!(!ctx.save_value(&ikey(b"k", 3, 1), b"v3").unwrap());
        assert_eq!(*ctx.state(), GetState::NotFound);
    }

    #[test]
    fn test_unknown_type_is_corruption() {
        let mut ctx = GetContext::new(b"k", 10);
        let err = ctx.save_value(&ikey(b"k", 5, 7), b"v").unwrap_err();
        assert!(err.is_corruption());
    }
}
