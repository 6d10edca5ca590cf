//! The iterator interface shared by table readers and every composed
//! iterator in this crate.
//!
//! Iterators are positional: after any seek the iterator is either valid
//! (positioned on an entry) or invalid (exhausted or failed). `key` and
//! `value` may only be called while valid; `status` distinguishes clean
//! exhaustion from an error.

use crate::error::Result;

pub trait InternalIterator: Send {
    /// Positioned on an entry.
    fn valid(&self) -> bool;

    /// Position at the first entry with key >= `target`.
    fn seek(&mut self, target: &[u8]);

    /// Position at the last entry with key <= `target`.
    fn seek_for_prev(&mut self, target: &[u8]);

    fn seek_to_first(&mut self);

    fn seek_to_last(&mut self);

    /// Advance. Requires `valid()`.
    fn next(&mut self);

    /// Step back. Requires `valid()`.
    fn prev(&mut self);

    /// Current entry key. Requires `valid()`.
    fn key(&self) -> &[u8];

    /// Current entry value. Requires `valid()`.
    fn value(&self) -> &[u8];

    /// Ok while no read has failed; the first error is sticky.
    fn status(&self) -> Result<()>;
}

/// An iterator over nothing.
pub struct EmptyIterator;

impl InternalIterator for EmptyIterator {
    fn valid(&self) -> bool {
        false
    }

    fn seek(&mut self, _target: &[u8]) {}

    fn seek_for_prev(&mut self, _target: &[u8]) {}

    fn seek_to_first(&mut self) {}

    fn seek_to_last(&mut self) {}

    fn next(&mut self) {}

    fn prev(&mut self) {}

    fn key(&self) -> &[u8] {
        unreachable!("EmptyIterator is never valid")
    }

    fn value(&self) -> &[u8] {
        unreachable!("EmptyIterator is never valid")
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}

pub fn empty_iterator() -> Box<dyn InternalIterator> {
    Box::new(EmptyIterator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_iterator() {
        let mut iter = empty_iterator();
        iter.seek_to_first();
        assert!(!iter.valid());
        iter.seek(b"anything");
        assert!(!iter.valid());
        assert!(iter.status().is_ok());
    }
}
