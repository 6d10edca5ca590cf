//! One logical stream of map entries over a key-ordered sequence of
//! tables.
//!
//! Each data file contributes a single synthesized entry covering its own
//! bounds; each map file contributes its entries verbatim through a
//! factory-created iterator. The embedding engine uses this to treat a
//! whole level (or any file run) as one map.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::iter::{empty_iterator, InternalIterator};
use crate::key::InternalKeyComparator;
use crate::manifest::meta::{DependenceMap, FileMetaData};
use crate::map_element::{LinkTarget, MapSstElement};
use crate::map_iter::SubIterFactory;
use crate::table::TablePurpose;

pub struct StitchedTableIterator {
    metas: Vec<Arc<FileMetaData>>,
    icmp: InternalKeyComparator,
    factory: Box<dyn SubIterFactory>,
    empty_dependence: DependenceMap,
    /// `metas.len()` marks the invalid position.
    where_: usize,
    /// Some while positioned inside a map file; None on a data file.
    iter: Option<Box<dyn InternalIterator>>,
    element: MapSstElement,
    key_buf: Vec<u8>,
    value_buf: Vec<u8>,
    status: Option<Error>,
}

impl StitchedTableIterator {
    fn new(
        metas: Vec<Arc<FileMetaData>>,
        icmp: InternalKeyComparator,
        factory: Box<dyn SubIterFactory>,
    ) -> Self {
        debug_assert!(!metas.is_empty());
        let len = metas.len();
        StitchedTableIterator {
            metas,
            icmp,
            factory,
            empty_dependence: DependenceMap::new(),
            where_: len,
            iter: None,
            element: MapSstElement::default(),
            key_buf: Vec::new(),
            value_buf: Vec::new(),
            status: None,
        }
    }

    fn current_is_map(&self) -> bool {
        self.metas[self.where_].prop.purpose == TablePurpose::Map
    }

    /// Opens the map iterator for the current file. On failure the whole
    /// iterator is invalidated with the error sticky in `status`.
    fn init_map_iter(&mut self) -> bool {
        match self
            .factory
            .create(&self.metas[self.where_], &self.empty_dependence)
        {
            Ok(it) => match it.status() {
                Ok(()) => {
                    self.iter = Some(it);
                    true
                }
                Err(e) => {
                    self.status = Some(e);
                    self.iter = None;
                    self.where_ = self.metas.len();
                    false
                }
            },
            Err(e) => {
                self.status = Some(e);
                self.iter = None;
                self.where_ = self.metas.len();
                false
            }
        }
    }

    /// Synthesizes the single entry of a data file: a one-link element
    /// over its inclusive bounds.
    fn update_data_element(&mut self) {
        let f = &self.metas[self.where_];
        self.element.smallest_key = f.smallest.encoded().to_vec();
        self.element.largest_key = f.largest.encoded().to_vec();
        self.element.include_smallest = true;
        self.element.include_largest = true;
        self.element.no_records = false;
        self.element.no_smallest = false;
        self.element.links = vec![LinkTarget::new(f.fd.file_number, f.fd.file_size)];
        self.key_buf.clear();
        self.key_buf.extend_from_slice(self.element.key());
        self.element.encode_value(&mut self.value_buf);
    }

    /// Positions on the last entry of the current file.
    fn position_at_last(&mut self) {
        if self.current_is_map() {
            if self.init_map_iter() {
                self.iter.as_mut().unwrap().seek_to_last();
            }
        } else {
            self.iter = None;
            self.update_data_element();
        }
    }

    fn step_back_to_last(&mut self) {
        self.iter = None;
        if self.where_ == 0 {
            self.where_ = self.metas.len();
            return;
        }
        self.where_ -= 1;
        self.position_at_last();
    }
}

impl InternalIterator for StitchedTableIterator {
    fn valid(&self) -> bool {
        self.where_ < self.metas.len()
            && self.status.is_none()
            && self.iter.as_ref().map_or(true, |it| it.valid())
    }

    fn seek(&mut self, target: &[u8]) {
        self.where_ = self
            .metas
            .partition_point(|f| self.icmp.compare(f.largest.encoded(), target).is_lt());
        if self.where_ == self.metas.len() {
            self.iter = None;
            return;
        }
        if self.current_is_map() {
            if !self.init_map_iter() {
                return;
            }
            self.iter.as_mut().unwrap().seek(target);
            if !self.iter.as_ref().unwrap().valid() {
                self.iter = None;
                self.where_ += 1;
                if self.where_ == self.metas.len() {
                    return;
                }
                if self.current_is_map() {
                    if !self.init_map_iter() {
                        return;
                    }
                    self.iter.as_mut().unwrap().seek_to_first();
                    return;
                }
                self.update_data_element();
            }
            return;
        }
        // a data file's single entry key is its largest bound, which the
        // partition point guarantees is >= target
        self.iter = None;
        self.update_data_element();
    }

    fn seek_for_prev(&mut self, target: &[u8]) {
        let len = self.metas.len();
        let idx = self
            .metas
            .partition_point(|f| self.icmp.compare(f.largest.encoded(), target).is_lt());
        if idx == len {
            // every file ends at or before target
            self.where_ = len - 1;
            self.position_at_last();
            return;
        }
        self.where_ = idx;
        if self.current_is_map() {
            if !self.init_map_iter() {
                return;
            }
            self.iter.as_mut().unwrap().seek_for_prev(target);
            if !self.iter.as_ref().unwrap().valid() {
                self.step_back_to_last();
            }
        } else if self
            .icmp
            .compare(self.metas[idx].largest.encoded(), target)
            .is_gt()
        {
            self.step_back_to_last();
        } else {
            self.iter = None;
            self.update_data_element();
        }
    }

    fn seek_to_first(&mut self) {
        self.where_ = 0;
        if self.current_is_map() {
            if !self.init_map_iter() {
                return;
            }
            self.iter.as_mut().unwrap().seek_to_first();
        } else {
            self.iter = None;
            self.update_data_element();
        }
    }

    fn seek_to_last(&mut self) {
        self.where_ = self.metas.len() - 1;
        self.position_at_last();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        if let Some(it) = self.iter.as_mut() {
            it.next();
            if it.valid() {
                return;
            }
            if let Err(e) = it.status() {
                self.status = Some(e);
                return;
            }
        }
        self.iter = None;
        self.where_ += 1;
        if self.where_ == self.metas.len() {
            return;
        }
        if self.current_is_map() {
            if !self.init_map_iter() {
                return;
            }
            self.iter.as_mut().unwrap().seek_to_first();
        } else {
            self.update_data_element();
        }
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if let Some(it) = self.iter.as_mut() {
            it.prev();
            if it.valid() {
                return;
            }
            if let Err(e) = it.status() {
                self.status = Some(e);
                return;
            }
        }
        self.step_back_to_last();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        match &self.iter {
            Some(it) => it.key(),
            None => &self.key_buf,
        }
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        match &self.iter {
            Some(it) => it.value(),
            None => &self.value_buf,
        }
    }

    fn status(&self) -> Result<()> {
        if let Some(e) = &self.status {
            return Err(e.clone());
        }
        if let Some(it) = &self.iter {
            it.status()?;
        }
        Ok(())
    }
}

/// Stitches `metas` (key-ordered, non-overlapping) into one entry stream.
/// Zero files yield the empty iterator; a single map file delegates to
/// its own iterator directly.
pub fn new_stitched_iterator(
    metas: Vec<Arc<FileMetaData>>,
    icmp: InternalKeyComparator,
    factory: Box<dyn SubIterFactory>,
) -> Result<Box<dyn InternalIterator>> {
    if metas.is_empty() {
        return Ok(empty_iterator());
    }
    if metas.len() == 1 && metas[0].prop.purpose == TablePurpose::Map {
        return factory.create(&metas[0], &DependenceMap::new());
    }
    Ok(Box::new(StitchedTableIterator::new(metas, icmp, factory)))
}
