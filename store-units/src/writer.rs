//! Streaming writer (spec §4.3): packs objects densely into blocks and
//! drives the double-buffered write-out through an [`IoEngine`].
//!
//! Block 0 always starts with a placeholder object of key `0` sized
//! exactly [`METADATA_SIZE`] bytes (the pseudo-object spec §3 describes);
//! `close` rewrites those bytes in place with the final [`StoreMetadata`],
//! without touching the table, since the placeholder and the final record
//! are always the same size.

use crate::block::{BlockBuilder, BlockView, OVERHEAD_PER_OBJECT};
use crate::error::{Error, Result};
use crate::io::IoEngine;
use crate::metadata::{StoreMetadata, StoreType, METADATA_SIZE};

/// Tail-block gap above which `close` prefers a synthetic terminator
/// object over padding, so `emptyPageEnd` (a single byte) never overflows.
const CLOSE_PAD_THRESHOLD: usize = 128;

pub struct StreamingWriter<'e, E: IoEngine> {
    engine: &'e mut E,
    block_size: usize,
    buffers: [Vec<u8>; 2],
    active: usize,
    inflight: Option<(usize, u64)>,
    next_block_index: u64,
    cur_objects: Vec<(u64, u16)>,
    cur_write_pos: usize,
    max_size: u64,
}

impl<'e, E: IoEngine> StreamingWriter<'e, E> {
    pub fn new(engine: &'e mut E, block_size: usize) -> Result<Self> {
        let mut w = StreamingWriter {
            engine,
            block_size,
            buffers: [vec![0u8; block_size], vec![0u8; block_size]],
            active: 0,
            inflight: None,
            next_block_index: 0,
            cur_objects: Vec::new(),
            cur_write_pos: 0,
            max_size: 0,
        };
        // Reserve the metadata placeholder as key-0 pseudo-object at the
        // very start of block 0; `close` overwrites its bytes in place.
        w.cur_objects.push((0, 0));
        w.cur_write_pos = METADATA_SIZE;
        Ok(w)
    }

    fn table_start(&self) -> usize {
        self.block_size - crate::block::OVERHEAD_PER_BLOCK - self.cur_objects.len() * OVERHEAD_PER_OBJECT
    }

    fn remaining_in_block(&self) -> usize {
        self.table_start().saturating_sub(self.cur_write_pos)
    }

    /// Finalize the active buffer's table/trailer, submit it, and await
    /// the previously in-flight buffer before reusing its slot — the
    /// "at most two buffers concurrently" invariant (spec §4.3).
    fn flush_active(&mut self) -> Result<()> {
        let empty_gap = self.table_start() - self.cur_write_pos;
        debug_assert!(empty_gap <= u8::MAX as usize, "emptyPageEnd byte overflow");
        {
            let mut b = BlockBuilder::init(
                &mut self.buffers[self.active],
                self.cur_objects.len() as u16,
                empty_gap as u8,
            );
            for (i, (key, offset)) in self.cur_objects.iter().enumerate() {
                b.set_key(i, *key);
                b.set_offset(i, *offset);
            }
        }

        if let Some((idx, tag)) = self.inflight.take() {
            let completed = self.engine.await_any()?;
            debug_assert_eq!(completed, tag, "buffers must complete in submission order");
            let _ = idx;
        }

        let file_offset = self.next_block_index * self.block_size as u64;
        let tag = self.next_block_index + 1; // tag 0 is reserved for "no completion"
        unsafe {
            self.engine.enqueue_write(
                self.buffers[self.active].as_ptr(),
                self.block_size,
                file_offset,
                tag,
            )?;
        }
        self.engine.submit()?;
        self.inflight = Some((self.active, tag));

        self.next_block_index += 1;
        self.active = 1 - self.active;
        self.cur_objects.clear();
        self.cur_write_pos = 0;
        Ok(())
    }

    /// Append one object. `content` is copied across as many blocks as
    /// needed (spec §4.3).
    pub fn write(&mut self, key: u64, length: u16, mut content: &[u8]) -> Result<()> {
        if key == 0 {
            return Err(Error::BadInput("key 0 is reserved for the metadata marker".into()));
        }
        debug_assert_eq!(content.len(), length as usize);
        self.max_size = self.max_size.max(length as u64);

        if self.remaining_in_block() < OVERHEAD_PER_OBJECT {
            self.flush_active()?;
        }

        self.cur_objects.push((key, self.cur_write_pos as u16));

        while !content.is_empty() {
            let space = self.table_start() - self.cur_write_pos;
            let n = space.min(content.len());
            self.buffers[self.active][self.cur_write_pos..self.cur_write_pos + n]
                .copy_from_slice(&content[..n]);
            self.cur_write_pos += n;
            content = &content[n..];

            if !content.is_empty() {
                // Block is exhausted mid-object: finalize with no new
                // table entry for the continuation and carry on at
                // offset 0 of the next block.
                self.flush_active()?;
            }
        }
        Ok(())
    }

    /// Finalize the active block immediately, regardless of remaining
    /// space, and advance to a fresh one. Used by engines that place
    /// objects into a specific block number by hash (separator, cuckoo)
    /// rather than packing densely in write order — the counterpart to
    /// the automatic mid-object flush `write` performs (spec §4.3's
    /// `writeTable(forceFlush=true)`).
    pub fn force_flush(&mut self) -> Result<()> {
        self.flush_active()
    }

    /// Flush the tail block, append the always-present empty terminator
    /// block, truncate the file and rewrite block 0's metadata record in
    /// place (spec §4.3). If the caller already finalized every block
    /// itself via [`force_flush`](Self::force_flush), there is nothing
    /// left pending and this only writes the terminator and metadata.
    pub fn close(mut self, store_type: StoreType) -> Result<u64> {
        if !self.cur_objects.is_empty() {
            let remaining = self.remaining_in_block();
            if remaining > CLOSE_PAD_THRESHOLD {
                // Close the gap with a synthetic zero-length terminator
                // object (key 0, never a valid user key) instead of
                // letting `emptyPageEnd` overflow its single byte.
                self.cur_objects.push((0, self.cur_write_pos as u16));
            }
            self.flush_active()?;
        }

        // The always-present trailing empty block (spec §3).
        let terminator_offset = self.next_block_index * self.block_size as u64;
        let mut terminator = vec![0u8; self.block_size];
        BlockBuilder::init(&mut terminator, 0, 0);
        let tag = self.next_block_index + 1;
        unsafe {
            self.engine
                .enqueue_write(terminator.as_ptr(), self.block_size, terminator_offset, tag)?;
        }
        self.engine.submit()?;
        if let Some((_, prev_tag)) = self.inflight.take() {
            let completed = self.engine.await_any()?;
            debug_assert_eq!(completed, prev_tag);
        }
        let completed = self.engine.await_any()?;
        debug_assert_eq!(completed, tag);

        let num_blocks = self.next_block_index; // terminator is not counted
        let metadata = StoreMetadata {
            store_type,
            num_blocks,
            max_size: self.max_size,
        };
        let mut record = vec![0u8; METADATA_SIZE];
        metadata.write(&mut record);
        let meta_tag = u64::MAX; // distinct from any block tag, which are all < u64::MAX
        unsafe {
            self.engine.enqueue_write(record.as_ptr(), METADATA_SIZE, 0, meta_tag)?;
        }
        self.engine.submit()?;
        let completed = self.engine.await_any()?;
        debug_assert_eq!(completed, meta_tag);

        Ok(num_blocks)
    }
}

/// Read back a freshly-written block-0 placeholder, used by tests to
/// confirm the reserved metadata slot lines up with [`BlockView`].
#[cfg(test)]
pub(crate) fn block0_metadata_offset(block: &BlockView) -> u16 {
    block.object_offset(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SyncIoEngine;
    use std::fs::OpenOptions;

    fn open_tmp() -> (tempfile::TempDir, std::fs::File) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .unwrap();
        (dir, file)
    }

    #[test]
    fn writes_small_objects_and_closes() {
        let (_dir, file) = open_tmp();
        let mut engine = SyncIoEngine::new(file, 4);
        let mut writer = StreamingWriter::new(&mut engine, 4096).unwrap();
        for k in 1u64..=10 {
            let payload = format!("v{}", k).into_bytes();
            writer.write(k, payload.len() as u16, &payload).unwrap();
        }
        let num_blocks = writer.close(StoreType::PaCHash).unwrap();
        assert!(num_blocks >= 1);
    }

    #[test]
    fn rejects_zero_key() {
        let (_dir, file) = open_tmp();
        let mut engine = SyncIoEngine::new(file, 4);
        let mut writer = StreamingWriter::new(&mut engine, 4096).unwrap();
        assert!(writer.write(0, 1, b"x").is_err());
    }

    #[test]
    fn spans_multiple_blocks_for_large_objects() {
        let (_dir, file) = open_tmp();
        let mut engine = SyncIoEngine::new(file, 4);
        let mut writer = StreamingWriter::new(&mut engine, 256).unwrap();
        let payload = vec![0x42u8; 900];
        writer.write(7, payload.len() as u16, &payload).unwrap();
        let num_blocks = writer.close(StoreType::PaCHash).unwrap();
        assert!(num_blocks >= 4);
    }
}
