//! The interval value manipulated during a map build.

use crate::key::{
    extract_sequence, extract_user_key, InternalKey, InternalKeyComparator, MAX_SEQUENCE_NUMBER,
    TYPE_FOR_SEEK,
};
use crate::manifest::meta::FileMetaData;
use crate::map_element::{LinkTarget, MapSstElement};
use crate::table::TablePurpose;

/// A user-supplied key range, endpoints encoded as internal keys.
#[derive(Clone, Debug)]
pub struct KeyRange {
    pub start: Vec<u8>,
    pub limit: Vec<u8>,
    pub include_start: bool,
    pub include_limit: bool,
}

impl KeyRange {
    pub fn new(start: Vec<u8>, limit: Vec<u8>, include_start: bool, include_limit: bool) -> Self {
        KeyRange {
            start,
            limit,
            include_start,
            include_limit,
        }
    }
}

/// A half-open-aware interval carrying the tables that contribute records
/// inside it.
///
/// `point[0] <= point[1]`; within a vector, intervals are sorted by
/// `point[1]` and pairwise non-overlapping under the inclusive-aware
/// comparison. `stable` marks intervals carried verbatim from an input
/// map table.
#[derive(Clone, Debug, Default)]
pub struct RangeWithDepend {
    pub point: [InternalKey; 2],
    pub include: [bool; 2],
    pub no_records: bool,
    pub stable: bool,
    pub dependence: Vec<LinkTarget>,
}

impl RangeWithDepend {
    /// A data file becomes one inclusive interval spanning its bounds,
    /// linking only itself. A largest bound at the maximum sequence is
    /// renormalized to the all-ones sentinel so it covers the whole user
    /// key.
    pub fn from_file(f: &FileMetaData) -> Self {
        debug_assert_ne!(extract_sequence(f.smallest.encoded()), MAX_SEQUENCE_NUMBER);
        let largest = if extract_sequence(f.largest.encoded()) == MAX_SEQUENCE_NUMBER {
            InternalKey::new(f.largest.user_key(), MAX_SEQUENCE_NUMBER, TYPE_FOR_SEEK)
        } else {
            f.largest.clone()
        };
        RangeWithDepend {
            point: [f.smallest.clone(), largest],
            include: [true, true],
            no_records: false,
            stable: false,
            dependence: vec![LinkTarget::new(f.fd.file_number, 0)],
        }
    }

    /// An interval decoded from an input map entry; carried as stable
    /// until the partitioner splits or merges it.
    pub fn from_element(element: &MapSstElement) -> Self {
        RangeWithDepend {
            point: [
                InternalKey::decode_from(&element.smallest_key),
                InternalKey::decode_from(&element.largest_key),
            ],
            include: [element.include_smallest, element.include_largest],
            no_records: element.no_records,
            stable: true,
            dependence: element.links.clone(),
        }
    }

    /// A deletion range: a pure mask with no links. Endpoints at the
    /// maximum sequence are widened to the sentinel footer so the mask
    /// covers every record of the bounding user keys.
    pub fn from_key_range(range: &KeyRange) -> Self {
        let (start, include_start) = if extract_sequence(&range.start) == MAX_SEQUENCE_NUMBER {
            (
                InternalKey::new(
                    extract_user_key(&range.start),
                    MAX_SEQUENCE_NUMBER,
                    TYPE_FOR_SEEK,
                ),
                false,
            )
        } else {
            (InternalKey::decode_from(&range.start), range.include_start)
        };
        let (limit, include_limit) = if extract_sequence(&range.limit) == MAX_SEQUENCE_NUMBER {
            (
                InternalKey::new(
                    extract_user_key(&range.limit),
                    MAX_SEQUENCE_NUMBER,
                    TYPE_FOR_SEEK,
                ),
                true,
            )
        } else {
            (InternalKey::decode_from(&range.limit), range.include_limit)
        };
        RangeWithDepend {
            point: [start, limit],
            include: [include_start, include_limit],
            no_records: false,
            stable: false,
            dependence: Vec::new(),
        }
    }
}

/// A single-link interval collapsed onto one user key whose upper footer
/// is the maximum-sequence sentinel carries no information and is dropped
/// on emission.
pub fn is_empty_map_element(range: &RangeWithDepend, icmp: &InternalKeyComparator) -> bool {
    if range.dependence.len() != 1 {
        return false;
    }
    if icmp
        .compare_user_key(range.point[0].user_key(), range.point[1].user_key())
        .is_ne()
    {
        return false;
    }
    range.point[1].sequence() == MAX_SEQUENCE_NUMBER
}

/// True when the interval exactly spans a data file's own bounds with the
/// same inclusivity: a map entry for it would add no information.
pub fn is_preface_range(
    range: &RangeWithDepend,
    f: &FileMetaData,
    icmp: &InternalKeyComparator,
) -> bool {
    if f.prop.purpose != TablePurpose::Data
        || !range.include[0]
        || icmp
            .compare(range.point[0].encoded(), f.smallest.encoded())
            .is_ne()
        || icmp
            .compare_user_key(range.point[1].user_key(), f.largest.user_key())
            .is_ne()
    {
        return false;
    }
    if extract_sequence(f.largest.encoded()) == MAX_SEQUENCE_NUMBER {
        range.point[1].sequence() == MAX_SEQUENCE_NUMBER
    } else {
        range.include[1] && range.point[1].footer() == f.largest.footer()
    }
}
