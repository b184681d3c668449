//! Block iterator (spec §4.4): three interchangeable forward scans over a
//! file's blocks. All three expose the same `BlockIterator` trait; which
//! one a caller picks only trades off ordering guarantees against device
//! queue depth.

use crate::error::Result;
use crate::io::IoEngine;
use memmap2::Mmap;
use std::fs::File;

pub trait BlockIterator {
    fn block_number(&self) -> u64;
    fn block_content(&self) -> &[u8];
    /// Advance to the next block. Returns `false` once every block up to
    /// `num_blocks` (exclusive of the trailing terminator) has been
    /// visited.
    fn next(&mut self) -> Result<bool>;
}

/// Sequential-advised mmap over the whole file; `next()` just slides a
/// pointer forward, no I/O engine involved.
pub struct MmapIterator {
    mmap: Mmap,
    block_size: usize,
    num_blocks: u64,
    current: u64,
    started: bool,
}

impl MmapIterator {
    pub fn open(file: &File, block_size: usize, num_blocks: u64) -> Result<MmapIterator> {
        let mmap = unsafe { Mmap::map(file)? };
        mmap.advise(memmap2::Advice::Sequential).ok();
        Ok(MmapIterator {
            mmap,
            block_size,
            num_blocks,
            current: 0,
            started: false,
        })
    }
}

impl BlockIterator for MmapIterator {
    fn block_number(&self) -> u64 {
        self.current
    }

    fn block_content(&self) -> &[u8] {
        let start = self.current as usize * self.block_size;
        &self.mmap[start..start + self.block_size]
    }

    fn next(&mut self) -> Result<bool> {
        if !self.started {
            self.started = true;
            return Ok(self.num_blocks > 0);
        }
        self.current += 1;
        Ok(self.current < self.num_blocks)
    }
}

/// Two `batch`-sized buffers: while the caller consumes one, the other is
/// already being read in from disk. Deterministic block order.
pub struct DoubleBufferIterator<'e, E: IoEngine> {
    engine: &'e mut E,
    block_size: usize,
    num_blocks: u64,
    buffers: [Vec<u8>; 2],
    front: usize,
    current: u64,
    next_prefetch: u64,
}

impl<'e, E: IoEngine> DoubleBufferIterator<'e, E> {
    pub fn open(engine: &'e mut E, block_size: usize, num_blocks: u64) -> Result<Self> {
        let mut it = DoubleBufferIterator {
            engine,
            block_size,
            num_blocks,
            buffers: [vec![0u8; block_size], vec![0u8; block_size]],
            front: 0,
            current: 0,
            next_prefetch: 0,
        };
        if num_blocks > 0 {
            it.prefetch(0, it.front)?;
            it.next_prefetch = 1;
            if num_blocks > 1 {
                it.prefetch(1, 1 - it.front)?;
                it.next_prefetch = 2;
            }
            it.wait_for(0)?;
        }
        Ok(it)
    }

    fn prefetch(&mut self, block: u64, buf_idx: usize) -> Result<()> {
        let offset = block * self.block_size as u64;
        unsafe {
            self.engine
                .enqueue_read(self.buffers[buf_idx].as_mut_ptr(), self.block_size, offset, block + 1)?;
        }
        self.engine.submit()
    }

    fn wait_for(&mut self, block: u64) -> Result<()> {
        let tag = self.engine.await_any()?;
        debug_assert_eq!(tag, block + 1);
        Ok(())
    }
}

impl<'e, E: IoEngine> BlockIterator for DoubleBufferIterator<'e, E> {
    fn block_number(&self) -> u64 {
        self.current
    }

    fn block_content(&self) -> &[u8] {
        &self.buffers[self.front]
    }

    fn next(&mut self) -> Result<bool> {
        self.current += 1;
        if self.current >= self.num_blocks {
            return Ok(false);
        }
        self.front = 1 - self.front;
        if self.next_prefetch < self.num_blocks {
            let back = 1 - self.front;
            self.prefetch(self.next_prefetch, back)?;
            self.next_prefetch += 1;
        }
        self.wait_for(self.current)?;
        Ok(true)
    }
}

/// Keeps a pool of reads in flight and returns whichever completes first.
/// Order is unspecified and not part of the contract (spec §9 Design
/// Notes); ranges are chosen linearly to keep the device queue full.
pub struct UnorderedIterator<'e, E: IoEngine> {
    engine: &'e mut E,
    block_size: usize,
    num_blocks: u64,
    buffers: Vec<Vec<u8>>,
    next_to_issue: u64,
    visited: u64,
    current_slot: usize,
    current_block: u64,
}

impl<'e, E: IoEngine> UnorderedIterator<'e, E> {
    pub fn open(engine: &'e mut E, block_size: usize, num_blocks: u64, depth: usize) -> Result<Self> {
        let depth = depth.max(1);
        let mut it = UnorderedIterator {
            engine,
            block_size,
            num_blocks,
            buffers: (0..depth).map(|_| vec![0u8; block_size]).collect(),
            next_to_issue: 0,
            visited: 0,
            current_slot: 0,
            current_block: 0,
        };
        for slot in 0..depth.min(num_blocks as usize) {
            it.issue(slot)?;
        }
        if num_blocks > 0 {
            let (slot, block) = it.await_one()?;
            it.current_slot = slot;
            it.current_block = block;
        }
        Ok(it)
    }

    fn issue(&mut self, slot: usize) -> Result<()> {
        let block = self.next_to_issue;
        self.next_to_issue += 1;
        let offset = block * self.block_size as u64;
        let tag = slot_tag(slot, block);
        unsafe {
            self.engine
                .enqueue_read(self.buffers[slot].as_mut_ptr(), self.block_size, offset, tag)?;
        }
        self.engine.submit()
    }

    fn await_one(&mut self) -> Result<(usize, u64)> {
        let tag = self.engine.await_any()?;
        Ok((untag_slot(tag), untag_block(tag)))
    }
}

// Pack (slot, block) into one non-zero tag so await_any's single u64 can
// report both which buffer to read and which block landed there.
fn slot_tag(slot: usize, block: u64) -> u64 {
    ((block + 1) << 16) | (slot as u64 & 0xffff)
}
fn untag_slot(tag: u64) -> usize {
    (tag & 0xffff) as usize
}
fn untag_block(tag: u64) -> u64 {
    (tag >> 16) - 1
}

impl<'e, E: IoEngine> BlockIterator for UnorderedIterator<'e, E> {
    fn block_number(&self) -> u64 {
        self.current_block
    }

    fn block_content(&self) -> &[u8] {
        &self.buffers[self.current_slot]
    }

    fn next(&mut self) -> Result<bool> {
        self.visited += 1;
        if self.visited >= self.num_blocks {
            return Ok(false);
        }
        if self.next_to_issue < self.num_blocks {
            self.issue(self.current_slot)?;
        }
        let tag = self.engine.await_any()?;
        self.current_slot = untag_slot(tag);
        self.current_block = untag_block(tag);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SyncIoEngine;
    use std::collections::HashSet;
    use std::fs::OpenOptions;
    use std::io::Write;

    fn file_with_blocks(block_size: usize, num_blocks: u64) -> (tempfile::TempDir, File) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.bin");
        let mut f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .unwrap();
        for b in 0..num_blocks {
            f.write_all(&vec![b as u8; block_size]).unwrap();
        }
        f.flush().unwrap();
        let f = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        (dir, f)
    }

    #[test]
    fn unordered_iterator_reports_the_block_that_actually_landed() {
        let (_dir, file) = file_with_blocks(64, 10);
        let mut engine = SyncIoEngine::new(file, 4);
        let mut it = UnorderedIterator::open(&mut engine, 64, 10, 4).unwrap();

        let mut seen = HashSet::new();
        loop {
            let n = it.block_number();
            assert!(seen.insert(n), "block {} visited twice", n);
            assert_eq!(it.block_content()[0], n as u8, "content/number mismatch for block {}", n);
            if !it.next().unwrap() {
                break;
            }
        }
        assert_eq!(seen.len(), 10);
        assert_eq!(seen, (0..10).collect::<HashSet<_>>());
    }
}
