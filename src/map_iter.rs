//! Expansion of map entries into the records of their link targets.
//!
//! Wraps a raw map-table iterator (the outer level, yielding one entry
//! per key range) so that scans see the records of the linked tables:
//! for each entry the link targets are opened through a
//! [`SubIterFactory`] and concatenated in list order, restricted to the
//! entry's key window with the correct inclusivity.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::iter::InternalIterator;
use crate::key::InternalKeyComparator;
use crate::manifest::meta::{DependenceMap, FileMetaData};
use crate::map_element::MapSstElement;

/// Builds the iterator for one table on demand; the trait seam that lets
/// a parent iterator recurse without owning the table cache's type.
pub trait SubIterFactory: Send {
    fn create(
        &self,
        meta: &Arc<FileMetaData>,
        dependence_map: &DependenceMap,
    ) -> Result<Box<dyn InternalIterator>>;
}

fn above_smallest_bound(
    icmp: &InternalKeyComparator,
    element: &MapSstElement,
    key: &[u8],
) -> bool {
    match icmp.compare(key, &element.smallest_key) {
        Ordering::Greater => true,
        Ordering::Equal => element.include_smallest,
        Ordering::Less => false,
    }
}

fn below_largest_bound(
    icmp: &InternalKeyComparator,
    element: &MapSstElement,
    key: &[u8],
) -> bool {
    match icmp.compare(key, &element.largest_key) {
        Ordering::Less => true,
        Ordering::Equal => element.include_largest,
        Ordering::Greater => false,
    }
}

pub struct MapSstIterator {
    outer: Box<dyn InternalIterator>,
    dependence_map: DependenceMap,
    icmp: InternalKeyComparator,
    factory: Box<dyn SubIterFactory>,
    element: MapSstElement,
    link_idx: usize,
    /// Some only while positioned on an in-window record.
    inner: Option<Box<dyn InternalIterator>>,
    status: Option<Error>,
}

impl MapSstIterator {
    pub fn new(
        outer: Box<dyn InternalIterator>,
        dependence_map: DependenceMap,
        icmp: InternalKeyComparator,
        factory: Box<dyn SubIterFactory>,
    ) -> Self {
        MapSstIterator {
            outer,
            dependence_map,
            icmp,
            factory,
            element: MapSstElement::default(),
            link_idx: 0,
            inner: None,
            status: None,
        }
    }

    /// Decodes the element under the outer iterator. False (with status
    /// set) on corruption.
    fn decode_current(&mut self) -> bool {
        if let Err(e) = self.element.decode(self.outer.key(), self.outer.value()) {
            self.status = Some(e);
            self.inner = None;
            return false;
        }
        if self.element.no_smallest {
            self.status = Some(Error::Corruption(
                "map entry without smallest bound is not supported".into(),
            ));
            self.inner = None;
            return false;
        }
        true
    }

    fn create_link_iter(&mut self, idx: usize) -> Option<Box<dyn InternalIterator>> {
        let file_number = self.element.links[idx].file_number;
        let Some(meta) = self.dependence_map.get(&file_number) else {
            self.status = Some(crate::corruption!(
                "link target {file_number} missing from dependence map"
            ));
            self.inner = None;
            return None;
        };
        match self.factory.create(meta, &self.dependence_map) {
            Ok(iter) => Some(iter),
            Err(e) => {
                self.status = Some(e);
                self.inner = None;
                None
            }
        }
    }

    /// Positions on the first in-window record at or after `target`,
    /// probing links `start_idx..` in list order. True when positioned
    /// or failed; false when this element has nothing left.
    fn position_forward(&mut self, start_idx: usize, target: &[u8]) -> bool {
        for idx in start_idx..self.element.links.len() {
            let Some(mut it) = self.create_link_iter(idx) else {
                return true;
            };
            it.seek(target);
            if it.valid()
                && !self.element.include_smallest
                && self
                    .icmp
                    .compare(it.key(), &self.element.smallest_key)
                    .is_eq()
            {
                it.next();
            }
            if let Err(e) = it.status() {
                self.status = Some(e);
                self.inner = None;
                return true;
            }
            if it.valid() && below_largest_bound(&self.icmp, &self.element, it.key()) {
                self.inner = Some(it);
                self.link_idx = idx;
                return true;
            }
        }
        false
    }

    /// Positions on the last in-window record at or before `target`,
    /// probing links from the end of the list backwards.
    fn position_backward(&mut self, start_idx: usize, target: &[u8]) -> bool {
        let mut idx = start_idx as isize;
        while idx >= 0 {
            let Some(mut it) = self.create_link_iter(idx as usize) else {
                return true;
            };
            it.seek_for_prev(target);
            if it.valid()
                && !self.element.include_largest
                && self
                    .icmp
                    .compare(it.key(), &self.element.largest_key)
                    .is_eq()
            {
                it.prev();
            }
            if let Err(e) = it.status() {
                self.status = Some(e);
                self.inner = None;
                return true;
            }
            if it.valid() && above_smallest_bound(&self.icmp, &self.element, it.key()) {
                self.inner = Some(it);
                self.link_idx = idx as usize;
                return true;
            }
            idx -= 1;
        }
        false
    }

    fn position_backward_from_end(&mut self, target: &[u8]) -> bool {
        if self.element.links.is_empty() {
            return false;
        }
        self.position_backward(self.element.links.len() - 1, target)
    }

    fn check_outer_status(&mut self) {
        if let Err(e) = self.outer.status() {
            self.status = Some(e);
        }
        self.inner = None;
    }

    /// Walks backwards through elements until one yields a record.
    fn prev_element_backward(&mut self) {
        loop {
            self.outer.prev();
            if !self.outer.valid() {
                self.check_outer_status();
                return;
            }
            if !self.decode_current() {
                return;
            }
            let target = self.element.largest_key.clone();
            if self.position_backward_from_end(&target) {
                return;
            }
        }
    }
}

impl InternalIterator for MapSstIterator {
    fn valid(&self) -> bool {
        self.status.is_none() && self.inner.as_ref().map_or(false, |it| it.valid())
    }

    fn seek(&mut self, target: &[u8]) {
        self.inner = None;
        self.outer.seek(target);
        while self.outer.valid() {
            if !self.decode_current() {
                return;
            }
            let clamped = if self
                .icmp
                .compare(target, &self.element.smallest_key)
                .is_gt()
            {
                target.to_vec()
            } else {
                self.element.smallest_key.clone()
            };
            if self.position_forward(0, &clamped) {
                return;
            }
            self.outer.next();
        }
        self.check_outer_status();
    }

    fn seek_for_prev(&mut self, target: &[u8]) {
        self.inner = None;
        self.outer.seek(target);
        if !self.outer.valid() {
            if let Err(e) = self.outer.status() {
                self.status = Some(e);
                return;
            }
            // target is past every element's largest key; the tail of the
            // last element still qualifies
            self.seek_to_last();
            return;
        }
        if !self.decode_current() {
            return;
        }
        let clamped = if self
            .icmp
            .compare(target, &self.element.largest_key)
            .is_lt()
        {
            target.to_vec()
        } else {
            self.element.largest_key.clone()
        };
        if self.position_backward_from_end(&clamped) {
            return;
        }
        self.prev_element_backward();
    }

    fn seek_to_first(&mut self) {
        self.inner = None;
        self.outer.seek_to_first();
        while self.outer.valid() {
            if !self.decode_current() {
                return;
            }
            let target = self.element.smallest_key.clone();
            if self.position_forward(0, &target) {
                return;
            }
            self.outer.next();
        }
        self.check_outer_status();
    }

    fn seek_to_last(&mut self) {
        self.inner = None;
        self.outer.seek_to_last();
        while self.outer.valid() {
            if !self.decode_current() {
                return;
            }
            let target = self.element.largest_key.clone();
            if self.position_backward_from_end(&target) {
                return;
            }
            self.outer.prev();
        }
        self.check_outer_status();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        if let Some(inner) = self.inner.as_mut() {
            inner.next();
            if let Err(e) = inner.status() {
                self.status = Some(e);
                self.inner = None;
                return;
            }
            if inner.valid() && below_largest_bound(&self.icmp, &self.element, inner.key()) {
                return;
            }
        }
        // remaining links of this element, then following elements
        let start_idx = self.link_idx + 1;
        let target = self.element.smallest_key.clone();
        if self.position_forward(start_idx, &target) {
            return;
        }
        self.inner = None;
        loop {
            self.outer.next();
            if !self.outer.valid() {
                self.check_outer_status();
                return;
            }
            if !self.decode_current() {
                return;
            }
            let target = self.element.smallest_key.clone();
            if self.position_forward(0, &target) {
                return;
            }
        }
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if let Some(inner) = self.inner.as_mut() {
            inner.prev();
            if let Err(e) = inner.status() {
                self.status = Some(e);
                self.inner = None;
                return;
            }
            if inner.valid() && above_smallest_bound(&self.icmp, &self.element, inner.key()) {
                return;
            }
        }
        if self.link_idx > 0 {
            let target = self.element.largest_key.clone();
            if self.position_backward(self.link_idx - 1, &target) {
                return;
            }
        }
        self.inner = None;
        self.prev_element_backward();
    }

    fn key(&self) -> &[u8] {
        self.inner.as_ref().expect("valid").key()
    }

    fn value(&self) -> &[u8] {
        self.inner.as_ref().expect("valid").value()
    }

    fn status(&self) -> Result<()> {
        if let Some(e) = &self.status {
            return Err(e.clone());
        }
        self.outer.status()?;
        if let Some(inner) = &self.inner {
            inner.status()?;
        }
        Ok(())
    }
}
