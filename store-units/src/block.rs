//! Block layout (spec §3, §4.1, §6).
//!
//! A block packs object bytes forward from offset 0 and a per-object table
//! (keys, then offsets) backward from the tail, with a 3-byte trailer:
//!
//! ```text
//! [0 .. objectsEnd)                 object bytes, head-to-tail
//! [tableStart .. tableStart+8N)     N keys (u64 LE)
//! [tableStart+8N .. tableStart+10N) N offsets (u16 LE)
//! [blockSize-3]                     emptyPageEnd (u8)
//! [blockSize-2 .. blockSize)        numObjects (u16 LE)
//! ```
//!
//! `parse`/`init` are pure and allocation-free: they only compute offsets
//! into the caller-owned byte slice.

use crate::serialize::{read_u16, write_u16};

pub const OVERHEAD_PER_OBJECT: usize = 10;
pub const OVERHEAD_PER_BLOCK: usize = 3;

fn table_start(block_size: usize, num_objects: usize) -> usize {
    block_size - OVERHEAD_PER_BLOCK - num_objects * OVERHEAD_PER_OBJECT
}

/// Read-only view over a parsed block.
#[derive(Clone, Copy)]
pub struct BlockView<'a> {
    data: &'a [u8],
}

impl<'a> BlockView<'a> {
    pub fn parse(data: &'a [u8]) -> BlockView<'a> {
        BlockView { data }
    }

    pub fn block_size(&self) -> usize {
        self.data.len()
    }

    pub fn num_objects(&self) -> u16 {
        read_u16(&self.data[self.data.len() - 2..])
    }

    pub fn empty_page_end(&self) -> u8 {
        self.data[self.data.len() - 3]
    }

    pub fn table_start(&self) -> usize {
        table_start(self.data.len(), self.num_objects() as usize)
    }

    /// First byte of object data; always 0, kept as a method for symmetry
    /// with `table_start` at call sites.
    pub fn block_start(&self) -> usize {
        0
    }

    /// Key of the `i`-th object starting in this block. `i` must be
    /// `< num_objects()`; indexing past it is a programming error.
    pub fn key(&self, i: usize) -> u64 {
        debug_assert!(i < self.num_objects() as usize);
        let base = self.table_start() + i * 8;
        crate::serialize::read_u64(&self.data[base..base + 8])
    }

    /// Start offset, within this block, of the `i`-th object.
    pub fn object_offset(&self, i: usize) -> u16 {
        debug_assert!(i < self.num_objects() as usize);
        let n = self.num_objects() as usize;
        let base = self.table_start() + n * 8 + i * 2;
        read_u16(&self.data[base..base + 2])
    }

    pub fn bytes(&self) -> &[u8] {
        self.data
    }
}

/// Mutable builder for a block: `init` writes the trailer, then the caller
/// fills the object bytes and the table via `set_key`/`set_offset`.
pub struct BlockBuilder<'a> {
    data: &'a mut [u8],
    num_objects: usize,
}

impl<'a> BlockBuilder<'a> {
    pub fn init(data: &'a mut [u8], num_objects: u16, empty_page_end: u8) -> BlockBuilder<'a> {
        let len = data.len();
        data[len - 3] = empty_page_end;
        write_u16(&mut data[len - 2..], num_objects);
        BlockBuilder {
            data,
            num_objects: num_objects as usize,
        }
    }

    fn table_start(&self) -> usize {
        table_start(self.data.len(), self.num_objects)
    }

    pub fn set_key(&mut self, i: usize, key: u64) {
        debug_assert!(i < self.num_objects);
        let base = self.table_start() + i * 8;
        crate::serialize::write_u64(&mut self.data[base..base + 8], key);
    }

    pub fn set_offset(&mut self, i: usize, offset: u16) {
        debug_assert!(i < self.num_objects);
        let n = self.num_objects;
        let base = self.table_start() + n * 8 + i * 2;
        write_u16(&mut self.data[base..base + 2], offset);
    }

    pub fn object_bytes_mut(&mut self) -> &mut [u8] {
        let end = self.table_start();
        &mut self.data[0..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_parse_round_trips_num_objects() {
        let mut buf = [0u8; 64];
        {
            let mut b = BlockBuilder::init(&mut buf, 3, 10);
            b.set_key(0, 1);
            b.set_key(1, 2);
            b.set_key(2, 3);
            b.set_offset(0, 0);
            b.set_offset(1, 5);
            b.set_offset(2, 9);
        }
        let v = BlockView::parse(&buf);
        assert_eq!(v.num_objects(), 3);
        assert_eq!(v.empty_page_end(), 10);
        assert_eq!(v.key(0), 1);
        assert_eq!(v.key(1), 2);
        assert_eq!(v.key(2), 3);
        assert_eq!(v.object_offset(2), 9);
    }

    #[test]
    fn zero_objects_is_a_pure_continuation_block() {
        let mut buf = [0u8; 32];
        BlockBuilder::init(&mut buf, 0, 0);
        let v = BlockView::parse(&buf);
        assert_eq!(v.num_objects(), 0);
        assert_eq!(v.table_start(), buf.len() - OVERHEAD_PER_BLOCK);
    }

    #[test]
    fn objects_and_table_never_overlap() {
        let mut buf = [0u8; 128];
        let mut b = BlockBuilder::init(&mut buf, 5, 40);
        for i in 0..5 {
            b.set_key(i, i as u64);
            b.set_offset(i, (i * 8) as u16);
        }
        let v = BlockView::parse(&buf);
        assert!(v.table_start() >= v.empty_page_end() as usize);
    }
}
