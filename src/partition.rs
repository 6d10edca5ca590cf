//! Interval algebra over sorted, non-overlapping range vectors.
//!
//! `partition_ranges` sweeps the endpoint events of two vectors and emits
//! one combined vector:
//!
//! ```text
//! a: [ -------- )      [ -------- ]
//! b:       ( -------------- ]
//! r: [ -- ]( -- )[ -- )[ -- ]( -- ]
//! ```
//!
//! Under `Merge` the result covers the union, with overlapping stretches
//! carrying both sides' link lists. Under `Delete` the `b` vector is a
//! pure mask subtracted from `a`.

use std::cmp::Ordering;

use crate::key::{InternalKey, InternalKeyComparator};
use crate::range::{is_empty_map_element, RangeWithDepend};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionType {
    Merge,
    Delete,
}

/// Tie-break for endpoint events at the same internal key. `a_bound` /
/// `b_bound` select which endpoint of the range the event is (0 = left,
/// 1 = right); the flags carry its inclusivity. At equal keys an
/// inclusive left bound opens before an exclusive bound of the other
/// side closes, so single-point overlaps surface as explicit one-point
/// intervals.
fn comp_include(c: i32, a_bound: usize, a_inc: bool, b_bound: usize, b_inc: bool) -> i32 {
    if c != 0 {
        return c;
    }
    match (a_bound == 1, a_inc, b_bound == 1, b_inc) {
        // a: [   [   (   )   )   [
        // b: (   )   ]   ]   (   ]
        (false, true, false, false)
        | (false, true, true, false)
        | (false, false, true, true)
        | (true, false, true, true)
        | (true, false, false, false)
        | (false, true, true, true) => -1,
        // a: (   )   ]   ]   (   ]
        // b: [   [   (   )   )   [
        (false, false, false, true)
        | (true, false, false, true)
        | (true, true, false, false)
        | (true, true, true, false)
        | (false, false, true, false)
        | (true, true, false, true) => 1,
        // a: [   ]   (   )
        // b: [   ]   (   )
        _ => 0,
    }
}

/// Identity of the input range that opened the interval being emitted;
/// an interval closed by a different range than opened it is no longer
/// stable.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Source {
    A(usize),
    B(usize),
}

struct Emitter<'a> {
    icmp: &'a InternalKeyComparator,
    output: Vec<RangeWithDepend>,
    opened_by: Option<Source>,
}

impl<'a> Emitter<'a> {
    fn put_left(&mut self, key: &InternalKey, include: bool, source: Option<Source>) {
        debug_assert!(self.output.last().map_or(true, |back| {
            self.icmp
                .compare(back.point[1].encoded(), key.encoded())
                .is_lt()
                || !back.include[1]
                || !include
        }));
        let mut range = RangeWithDepend::default();
        range.point[0] = key.clone();
        range.include[0] = include;
        self.output.push(range);
        self.opened_by = source;
    }

    fn put_right(&mut self, key: &InternalKey, include: bool, source: Option<Source>) {
        let Some(back) = self.output.last_mut() else {
            return;
        };
        if back.dependence.is_empty()
            || (self
                .icmp
                .compare(key.encoded(), back.point[0].encoded())
                .is_eq()
                && (!back.include[0] || !include))
        {
            self.output.pop();
            return;
        }
        back.point[1] = key.clone();
        back.include[1] = include;
        debug_assert!(self
            .icmp
            .compare(back.point[0].encoded(), back.point[1].encoded())
            .is_le());
        if self.opened_by.is_none() || source.is_none() || self.opened_by != source {
            back.stable = false;
        }
        if is_empty_map_element(back, self.icmp) {
            self.output.pop();
        }
    }

    fn put_depend(
        &mut self,
        a: Option<&RangeWithDepend>,
        b: Option<&RangeWithDepend>,
        partition_type: PartitionType,
    ) {
        let back = self.output.last_mut().expect("put_depend without put_left");
        debug_assert!(a.is_some() || b.is_some());
        match partition_type {
            PartitionType::Merge => match (a, b) {
                (Some(a), Some(b)) => {
                    back.stable = false;
                    back.dependence = a.dependence.clone();
                    back.dependence.extend_from_slice(&b.dependence);
                }
                (Some(a), None) => {
                    back.no_records = a.no_records;
                    back.stable = a.stable;
                    back.dependence = a.dependence.clone();
                }
                (None, Some(b)) => {
                    back.no_records = b.no_records;
                    back.stable = b.stable;
                    back.dependence = b.dependence.clone();
                }
                (None, None) => unreachable!(),
            },
            PartitionType::Delete => {
                if let Some(b) = b {
                    // the mask has no links; the interval stays empty and
                    // is dropped when it closes
                    debug_assert!(b.dependence.is_empty());
                } else if let Some(a) = a {
                    back.no_records = a.no_records;
                    back.stable = a.stable;
                    back.dependence = a.dependence.clone();
                }
            }
        }
    }
}

/// Partitions two sorted, pairwise non-overlapping interval vectors.
/// Both inputs must be non-empty; the output is sorted and pairwise
/// non-overlapping under the inclusive-aware comparison. O(|a| + |b|).
pub fn partition_ranges(
    ranges_a: &[RangeWithDepend],
    ranges_b: &[RangeWithDepend],
    icmp: &InternalKeyComparator,
    partition_type: PartitionType,
) -> Vec<RangeWithDepend> {
    debug_assert!(!ranges_a.is_empty() && !ranges_b.is_empty());
    let mut em = Emitter {
        icmp,
        output: Vec::new(),
        opened_by: None,
    };
    let mut ai = 0usize;
    let mut bi = 0usize;
    // 0 while the sweep is outside the side's current range (its next
    // event is a left bound), 1 while inside (next event is the right
    // bound)
    let mut ab = 0usize;
    let mut bb = 0usize;
    loop {
        let c = if ai < ranges_a.len() && bi < ranges_b.len() {
            let ord = match icmp.compare(
                ranges_a[ai].point[ab].encoded(),
                ranges_b[bi].point[bb].encoded(),
            ) {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            };
            comp_include(
                ord,
                ab,
                ranges_a[ai].include[ab],
                bb,
                ranges_b[bi].include[bb],
            )
        } else if ai < ranges_a.len() {
            -1
        } else {
            1
        };
        let ac = (c <= 0) as usize;
        let bc = (c >= 0) as usize;
        match (ab, bb, ac, bc) {
            // outside a, outside b, enter a
            (0, 0, 1, 0) => {
                em.put_left(&ranges_a[ai].point[0], ranges_a[ai].include[0], Some(Source::A(ai)));
                em.put_depend(Some(&ranges_a[ai]), None, partition_type);
            }
            // inside a, outside b, leave a
            (1, 0, 1, 0) => {
                em.put_right(&ranges_a[ai].point[1], ranges_a[ai].include[1], Some(Source::A(ai)));
            }
            // outside a, outside b, enter b
            (0, 0, 0, 1) => {
                em.put_left(&ranges_b[bi].point[0], ranges_b[bi].include[0], Some(Source::B(bi)));
                em.put_depend(None, Some(&ranges_b[bi]), partition_type);
            }
            // outside a, inside b, leave b
            (0, 1, 0, 1) => {
                em.put_right(&ranges_b[bi].point[1], ranges_b[bi].include[1], Some(Source::B(bi)));
            }
            // inside a, outside b, b begins
            (1, 0, 0, 1) => {
                em.put_right(&ranges_b[bi].point[0], !ranges_b[bi].include[0], None);
                em.put_left(&ranges_b[bi].point[0], ranges_b[bi].include[0], Some(Source::B(bi)));
                em.put_depend(Some(&ranges_a[ai]), Some(&ranges_b[bi]), partition_type);
            }
            // inside a, inside b, leave b
            (1, 1, 0, 1) => {
                em.put_right(&ranges_b[bi].point[1], ranges_b[bi].include[1], Some(Source::B(bi)));
                em.put_left(&ranges_b[bi].point[1], !ranges_b[bi].include[1], None);
                em.put_depend(Some(&ranges_a[ai]), None, partition_type);
            }
            // outside a, inside b, a begins
            (0, 1, 1, 0) => {
                em.put_right(&ranges_a[ai].point[0], !ranges_a[ai].include[0], None);
                em.put_left(&ranges_a[ai].point[0], ranges_a[ai].include[0], Some(Source::A(ai)));
                em.put_depend(Some(&ranges_a[ai]), Some(&ranges_b[bi]), partition_type);
            }
            // inside a, inside b, leave a
            (1, 1, 1, 0) => {
                em.put_right(&ranges_a[ai].point[1], ranges_a[ai].include[1], Some(Source::A(ai)));
                em.put_left(&ranges_a[ai].point[1], !ranges_a[ai].include[1], None);
                em.put_depend(None, Some(&ranges_b[bi]), partition_type);
            }
            // both enter at the same point
            (0, 0, 1, 1) => {
                em.put_left(&ranges_a[ai].point[0], ranges_a[ai].include[0], None);
                em.put_depend(Some(&ranges_a[ai]), Some(&ranges_b[bi]), partition_type);
            }
            // both leave at the same point
            (1, 1, 1, 1) => {
                em.put_right(&ranges_a[ai].point[1], ranges_a[ai].include[1], None);
            }
            _ => unreachable!("impossible sweep state"),
        }
        ai += (ab + ac) / 2;
        bi += (bb + bc) / 2;
        ab = (ab + ac) % 2;
        bb = (bb + bc) % 2;
        if ai == ranges_a.len() && bi == ranges_b.len() {
            break;
        }
    }
    em.output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map_element::LinkTarget;
    use itertools::Itertools;

    fn ik(user: &[u8], seq: u64) -> InternalKey {
        InternalKey::new(user, seq, 1)
    }

    fn rng(
        start: InternalKey,
        include_start: bool,
        end: InternalKey,
        include_end: bool,
        links: &[u64],
        stable: bool,
    ) -> RangeWithDepend {
        RangeWithDepend {
            point: [start, end],
            include: [include_start, include_end],
            no_records: false,
            stable,
            dependence: links.iter().map(|&n| LinkTarget::new(n, 0)).collect(),
        }
    }

    fn link_numbers(range: &RangeWithDepend) -> Vec<u64> {
        range.dependence.iter().map(|l| l.file_number).collect()
    }

    fn assert_sorted_non_overlapping(ranges: &[RangeWithDepend]) {
        let icmp = InternalKeyComparator;
        for (prev, next) in ranges.iter().tuple_windows() {
            let c = icmp.compare(prev.point[1].encoded(), next.point[0].encoded());
            assert!(
                c.is_lt() || (c.is_eq() && (!prev.include[1] || !next.include[0])),
                "intervals overlap: {prev:?} / {next:?}"
            );
        }
    }

    #[test]
    fn test_comp_include_truth_table() {
        // at equal keys: inclusive-left opens before the other side's
        // bounds; right-exclusive and left-exclusive defer symmetrically
        // a=[ vs b=( ) ] ; a=( vs b=] ; a=) vs b=] (
        assert_eq!(comp_include(0, 0, true, 0, false), -1);
        assert_eq!(comp_include(0, 0, true, 1, false), -1);
        assert_eq!(comp_include(0, 0, true, 1, true), -1);
        assert_eq!(comp_include(0, 0, false, 1, true), -1);
        assert_eq!(comp_include(0, 1, false, 1, true), -1);
        assert_eq!(comp_include(0, 1, false, 0, false), -1);
        // mirrored cases
        assert_eq!(comp_include(0, 0, false, 0, true), 1);
        assert_eq!(comp_include(0, 1, false, 0, true), 1);
        assert_eq!(comp_include(0, 1, true, 0, false), 1);
        assert_eq!(comp_include(0, 1, true, 1, false), 1);
        assert_eq!(comp_include(0, 0, false, 1, false), 1);
        assert_eq!(comp_include(0, 1, true, 0, true), 1);
        // identical brackets tie
        assert_eq!(comp_include(0, 0, true, 0, true), 0);
        assert_eq!(comp_include(0, 1, true, 1, true), 0);
        assert_eq!(comp_include(0, 0, false, 0, false), 0);
        assert_eq!(comp_include(0, 1, false, 1, false), 0);
        // key order dominates
        assert_eq!(comp_include(-1, 1, true, 0, true), -1);
        assert_eq!(comp_include(1, 0, true, 1, true), 1);
    }

    #[test]
    fn test_merge_two_overlapping_files() {
        let icmp = InternalKeyComparator;
        let a = vec![rng(ik(b"a", 10), true, ik(b"m", 5), true, &[1], false)];
        let b = vec![rng(ik(b"g", 8), true, ik(b"z", 3), true, &[2], false)];

        let out = partition_ranges(&a, &b, &icmp, PartitionType::Merge);
        assert_eq!(out.len(), 3);
        assert_sorted_non_overlapping(&out);

        assert_eq!(out[0].point[0], ik(b"a", 10));
        assert_eq!(out[0].point[1], ik(b"g", 8));
        assert_eq!(out[0].include, [true, false]);
        assert_eq!(link_numbers(&out[0]), vec![1]);

        assert_eq!(out[1].point[0], ik(b"g", 8));
        assert_eq!(out[1].point[1], ik(b"m", 5));
        assert_eq!(out[1].include, [true, true]);
        assert_eq!(link_numbers(&out[1]), vec![1, 2]);
        assert!(!out[1].stable);

        assert_eq!(out[2].point[0], ik(b"m", 5));
        assert_eq!(out[2].point[1], ik(b"z", 3));
        assert_eq!(out[2].include, [false, true]);
        assert_eq!(link_numbers(&out[2]), vec![2]);
    }

    #[test]
    fn test_merge_touching_complementary_bounds_not_fused() {
        let icmp = InternalKeyComparator;
        let a = vec![rng(ik(b"a", 5), true, ik(b"m", 5), true, &[1], false)];
        let b = vec![rng(ik(b"m", 5), false, ik(b"z", 5), true, &[2], false)];

        let out = partition_ranges(&a, &b, &icmp, PartitionType::Merge);
        assert_eq!(out.len(), 2);
        assert_sorted_non_overlapping(&out);

        assert_eq!(out[0].point[1], ik(b"m", 5));
        assert_eq!(out[0].include, [true, true]);
        assert_eq!(link_numbers(&out[0]), vec![1]);

        assert_eq!(out[1].point[0], ik(b"m", 5));
        assert_eq!(out[1].include, [false, true]);
        assert_eq!(link_numbers(&out[1]), vec![2]);
    }

    #[test]
    fn test_merge_disjoint_preserves_stability() {
        let icmp = InternalKeyComparator;
        let a = vec![rng(ik(b"a", 5), true, ik(b"c", 5), true, &[1], true)];
        let b = vec![rng(ik(b"x", 5), true, ik(b"z", 5), true, &[2], false)];

        let out = partition_ranges(&a, &b, &icmp, PartitionType::Merge);
        assert_eq!(out.len(), 2);
        assert!(out[0].stable, "untouched map interval must stay stable");
        assert!(!out[1].stable);
    }

    #[test]
    fn test_delete_exact_range_leaves_nothing() {
        let icmp = InternalKeyComparator;
        let a = vec![rng(ik(b"a", 9), true, ik(b"z", 1), true, &[1], true)];
        let b = vec![rng(ik(b"a", 9), true, ik(b"z", 1), true, &[], false)];

        let out = partition_ranges(&a, &b, &icmp, PartitionType::Delete);
        assert!(out.is_empty());
    }

    #[test]
    fn test_delete_interior_splits_range() {
        let icmp = InternalKeyComparator;
        let a = vec![rng(ik(b"a", 9), true, ik(b"z", 1), true, &[1], true)];
        let b = vec![rng(ik(b"g", 9), true, ik(b"m", 1), true, &[], false)];

        let out = partition_ranges(&a, &b, &icmp, PartitionType::Delete);
        assert_eq!(out.len(), 2);
        assert_sorted_non_overlapping(&out);

        assert_eq!(out[0].point[0], ik(b"a", 9));
        assert_eq!(out[0].point[1], ik(b"g", 9));
        assert_eq!(out[0].include, [true, false]);
        assert_eq!(link_numbers(&out[0]), vec![1]);
        assert!(!out[0].stable, "split intervals lose stability");

        assert_eq!(out[1].point[0], ik(b"m", 1));
        assert_eq!(out[1].point[1], ik(b"z", 1));
        assert_eq!(out[1].include, [false, true]);
        assert_eq!(link_numbers(&out[1]), vec![1]);
    }

    #[test]
    fn test_delete_covering_multiple_ranges() {
        let icmp = InternalKeyComparator;
        let a = vec![
            rng(ik(b"a", 9), true, ik(b"c", 5), true, &[1], true),
            rng(ik(b"e", 9), true, ik(b"g", 5), true, &[2], true),
            rng(ik(b"t", 9), true, ik(b"v", 5), true, &[3], true),
        ];
        let b = vec![rng(ik(b"d", 9), true, ik(b"h", 1), true, &[], false)];

        let out = partition_ranges(&a, &b, &icmp, PartitionType::Delete);
        assert_eq!(out.len(), 2);
        assert_eq!(link_numbers(&out[0]), vec![1]);
        assert_eq!(link_numbers(&out[1]), vec![3]);
        assert!(out[0].stable, "ranges outside the mask stay stable");
        assert!(out[1].stable);
    }

    #[test]
    fn test_merge_multiple_ranges_interleaved() {
        let icmp = InternalKeyComparator;
        let a = vec![
            rng(ik(b"a", 9), true, ik(b"d", 5), true, &[1], false),
            rng(ik(b"p", 9), true, ik(b"s", 5), true, &[2], false),
        ];
        let b = vec![rng(ik(b"b", 9), true, ik(b"q", 5), true, &[3], false)];

        let out = partition_ranges(&a, &b, &icmp, PartitionType::Merge);
        assert_sorted_non_overlapping(&out);
        let all_links: Vec<Vec<u64>> = out.iter().map(link_numbers).collect();
        assert_eq!(
            all_links,
            vec![vec![1], vec![1, 3], vec![3], vec![2, 3], vec![2]]
        );
    }
}
