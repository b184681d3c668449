//! Cuckoo-hashing engine (C9): two candidate blocks per key, random
//! eviction on collision, always a two-block query.
//!
//! Unlike the separator engine's persisted `separators[]` array, a cuckoo
//! store needs nothing beyond the standard metadata record: a reader
//! always computes the same two candidate blocks a writer would have
//! tried and scans both, so there is no extra per-block state to carry.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use log::debug;
use rand::Rng;
use store_units::hash::chain_block;
use store_units::io::{open_file, IoEngine, OpenFlags, SyncIoEngine, NO_COMPLETION};
use store_units::{
    BlockView, StoreMetadata, StoreType, StreamingWriter, METADATA_SIZE, OVERHEAD_PER_BLOCK,
    OVERHEAD_PER_OBJECT,
};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::handle::{Pending, QueryHandle, QueryStats, ViewStats};

const MAX_DISPLACEMENTS: u32 = 100;

fn block_reserved_bytes(block_index: u64) -> usize {
    if block_index == 0 {
        METADATA_SIZE + OVERHEAD_PER_OBJECT
    } else {
        0
    }
}

fn block_capacity(block_size: usize, block_index: u64) -> usize {
    block_size - OVERHEAD_PER_BLOCK - block_reserved_bytes(block_index)
}

fn block_used_bytes(items: &[(u64, Vec<u8>)]) -> usize {
    items.iter().map(|(_, v)| v.len() + OVERHEAD_PER_OBJECT).sum()
}

fn fits(items: &[(u64, Vec<u8>)], block_size: usize, block_index: u64, extra: usize) -> bool {
    block_used_bytes(items) + extra <= block_capacity(block_size, block_index)
}

fn candidates(key: u64, num_blocks: u64) -> [u64; 2] {
    [
        chain_block(key, 0, num_blocks),
        chain_block(key, 1, num_blocks),
    ]
}

/// Build a cuckoo-hashed file. `load_factor` controls how many blocks are
/// allocated; construction fails with [`Error::ConstructionFailure`] if a
/// key's displacement chain exceeds 100 evictions (spec §4.9, §7).
pub fn write_to_file<P: AsRef<Path>>(
    path: P,
    records: Vec<(u64, Vec<u8>)>,
    load_factor: f64,
    config: StoreConfig,
) -> Result<()> {
    if !(load_factor > 0.0 && load_factor <= 1.0) {
        return Err(Error::Units(store_units::Error::BadInput(format!(
            "load factor {} must be in (0, 1]",
            load_factor
        ))));
    }
    for (k, _) in &records {
        if *k == 0 {
            return Err(Error::Units(store_units::Error::BadInput(
                "key 0 is reserved for the metadata marker".into(),
            )));
        }
    }

    let block_size = config.block_size();
    let total_bytes: usize = records.iter().map(|(_, v)| v.len() + OVERHEAD_PER_OBJECT).sum::<usize>()
        + METADATA_SIZE
        + OVERHEAD_PER_OBJECT
        + OVERHEAD_PER_BLOCK;
    let usable_per_block = ((block_size as f64) * load_factor).max(1.0) as usize;
    let num_blocks = (((total_bytes as f64) / (usable_per_block as f64)).ceil() as u64).max(2);

    let mut blocks: Vec<Vec<(u64, Vec<u8>)>> = (0..num_blocks).map(|_| Vec::new()).collect();
    let mut rng = rand::thread_rng();
    let mut queue: VecDeque<(u64, Vec<u8>, u32)> = records.into_iter().map(|(k, v)| (k, v, 0)).collect();

    while let Some((key, value, displacements)) = queue.pop_front() {
        let [b0, b1] = candidates(key, num_blocks);
        let extra = value.len() + OVERHEAD_PER_OBJECT;

        if fits(&blocks[b0 as usize], block_size, b0, extra) {
            blocks[b0 as usize].push((key, value));
            continue;
        }
        if fits(&blocks[b1 as usize], block_size, b1, extra) {
            blocks[b1 as usize].push((key, value));
            continue;
        }
        if displacements >= MAX_DISPLACEMENTS {
            return Err(Error::ConstructionFailure(format!(
                "key {} exceeded {} cuckoo displacements at load factor {}",
                key, MAX_DISPLACEMENTS, load_factor
            )));
        }

        let target = if rng.gen::<bool>() { b0 } else { b1 };
        loop {
            if fits(&blocks[target as usize], block_size, target, extra) {
                blocks[target as usize].push((key, value));
                break;
            }
            if blocks[target as usize].is_empty() {
                return Err(Error::ConstructionFailure(format!(
                    "value for key {} ({} bytes) cannot fit in an empty block",
                    key, value.len()
                )));
            }
            let idx = rng.gen_range(0, blocks[target as usize].len());
            let evicted = blocks[target as usize].swap_remove(idx);
            queue.push_back((evicted.0, evicted.1, displacements + 1));
        }
    }

    let file = open_file(
        path.as_ref(),
        OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
    )?;
    let mut io = SyncIoEngine::new(file, config.depth());
    let mut writer = StreamingWriter::new(&mut io, block_size)?;
    for block in blocks.iter_mut() {
        block.sort_by_key(|(k, _)| *k);
        for (key, value) in block.iter() {
            writer.write(*key, value.len() as u16, value)?;
        }
        writer.force_flush()?;
    }
    writer.close(StoreType::Cuckoo)?;
    debug!(
        "wrote cuckoo store with {} blocks, load_factor={}",
        num_blocks, load_factor
    );
    Ok(())
}

pub struct CuckooStore {
    path: PathBuf,
    block_size: usize,
    num_blocks: u64,
}

impl CuckooStore {
    pub fn open<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<CuckooStore> {
        let path = path.as_ref().to_path_buf();
        let block_size = config.block_size();
        let file = open_file(&path, OpenFlags::READ)?;
        let mut io = SyncIoEngine::new(file, 1);
        let mut header = vec![0u8; METADATA_SIZE];
        unsafe {
            io.enqueue_read(header.as_mut_ptr(), header.len(), 0, 1)?;
        }
        io.submit()?;
        io.await_any()?;
        let metadata = StoreMetadata::parse(&header)?;
        if metadata.store_type != StoreType::Cuckoo {
            return Err(Error::Units(store_units::Error::FormatError {
                expected_type: StoreType::Cuckoo.to_tag(),
                found_type: metadata.store_type.to_tag(),
            }));
        }
        Ok(CuckooStore {
            path,
            block_size,
            num_blocks: metadata.num_blocks,
        })
    }

    pub fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    pub fn buffer_capacity(&self) -> usize {
        2 * self.block_size
    }

    pub fn view(&self, depth: usize) -> Result<CuckooView> {
        let file = open_file(&self.path, OpenFlags::READ)?;
        let io = SyncIoEngine::new(file, depth);
        Ok(CuckooView {
            io,
            block_size: self.block_size,
            num_blocks: self.num_blocks,
            stats: ViewStats::default(),
        })
    }
}

pub struct CuckooView {
    io: SyncIoEngine,
    block_size: usize,
    num_blocks: u64,
    stats: ViewStats,
}

impl CuckooView {
    pub fn enqueue_query(&mut self, handle: &mut QueryHandle) -> Result<()> {
        if handle.buffer().len() < 2 * self.block_size {
            return Err(Error::UsageError(format!(
                "handle buffer ({} B) smaller than the 2-block cuckoo read ({} B)",
                handle.buffer().len(),
                2 * self.block_size
            )));
        }
        let [b0, b1] = candidates(handle.key(), self.num_blocks);
        let block_size = self.block_size;
        {
            let buf = handle.buffer_mut();
            let (first_half, second_half) = buf.split_at_mut(block_size);
            unsafe {
                self.io
                    .enqueue_read(first_half.as_mut_ptr(), block_size, b0 * block_size as u64, 1)?;
                self.io
                    .enqueue_read(second_half.as_mut_ptr(), block_size, b1 * block_size as u64, 2)?;
            }
        }
        handle.mark_submitted(Pending::Cuckoo {
            blocks: [b0, b1],
            completions_seen: 0,
        });
        Ok(())
    }

    pub fn submit(&mut self) -> Result<()> {
        Ok(self.io.submit()?)
    }

    pub fn await_any(&mut self, handle: &mut QueryHandle) -> Result<()> {
        loop {
            self.io.await_any()?;
            if self.record_completion(handle)? {
                return self.parse_completed(handle);
            }
        }
    }

    /// Non-blocking variant: returns `false` until both candidate blocks
    /// have arrived.
    pub fn peek_any(&mut self, handle: &mut QueryHandle) -> Result<bool> {
        loop {
            let tag = self.io.peek_any()?;
            if tag == NO_COMPLETION {
                return Ok(false);
            }
            if self.record_completion(handle)? {
                self.parse_completed(handle)?;
                return Ok(true);
            }
        }
    }

    /// Cumulative stats across every query this view has completed.
    pub fn stats(&self) -> ViewStats {
        self.stats
    }

    fn record_completion(&self, handle: &mut QueryHandle) -> Result<bool> {
        match &mut handle.pending {
            Some(Pending::Cuckoo { completions_seen, .. }) => {
                *completions_seen += 1;
                Ok(*completions_seen >= 2)
            }
            _ => Err(Error::UsageError("handle not submitted via this view".into())),
        }
    }

    fn parse_completed(&mut self, handle: &mut QueryHandle) -> Result<()> {
        let key = handle.key();
        let block_size = self.block_size;
        let buffer = handle.buffer_mut();

        let mut result = None;
        for half in 0..2 {
            let block = &buffer[half * block_size..(half + 1) * block_size];
            let view = BlockView::parse(block);
            let n = view.num_objects() as usize;
            let mut found = None;
            for i in 0..n {
                if view.key(i) == key {
                    found = Some(i);
                    break;
                }
            }
            if let Some(i) = found {
                let start = view.object_offset(i) as usize;
                let end = if i + 1 < n {
                    view.object_offset(i + 1) as usize
                } else {
                    view.table_start() - view.empty_page_end() as usize
                };
                result = Some((half * block_size + start, (end - start) as u16));
                break;
            }
        }
        let stats = QueryStats {
            blocks_fetched: 2,
            ..QueryStats::default()
        };
        handle.mark_completed(result, stats);
        self.stats.record(stats);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::QueryHandle;

    fn records(n: u64) -> Vec<(u64, Vec<u8>)> {
        (1..=n).map(|k| (k, k.to_le_bytes().to_vec())).collect()
    }

    #[test]
    fn round_trips_and_every_hit_costs_exactly_two_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cuckoo.bin");
        let recs = records(2000);
        let config = StoreConfig::new(4096, 8, false);
        write_to_file(&path, recs.clone(), 0.80, config).unwrap();

        let store = CuckooStore::open(&path, config).unwrap();
        let mut view = store.view(4).unwrap();
        for (key, value) in recs.iter().take(200) {
            let mut handle = QueryHandle::new(store.buffer_capacity());
            handle.set_key(*key).unwrap();
            view.enqueue_query(&mut handle).unwrap();
            view.submit().unwrap();
            view.await_any(&mut handle).unwrap();
            assert_eq!(handle.result(), Some(value.as_slice()));
            assert_eq!(handle.stats().blocks_fetched, 2);
        }
    }

    #[test]
    fn empty_store_is_a_clean_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cuckoo_empty.bin");
        let config = StoreConfig::new(4096, 8, false);
        write_to_file(&path, Vec::new(), 0.80, config).unwrap();

        let store = CuckooStore::open(&path, config).unwrap();
        assert!(store.num_blocks() >= 2);
        let mut view = store.view(4).unwrap();
        let mut handle = QueryHandle::new(store.buffer_capacity());
        handle.set_key(42).unwrap();
        view.enqueue_query(&mut handle).unwrap();
        view.submit().unwrap();
        view.await_any(&mut handle).unwrap();
        assert_eq!(handle.result(), None);
    }

    #[test]
    fn missing_key_is_a_clean_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cuckoo_miss.bin");
        let recs = records(500);
        let config = StoreConfig::new(4096, 8, false);
        write_to_file(&path, recs, 0.80, config).unwrap();

        let store = CuckooStore::open(&path, config).unwrap();
        let mut view = store.view(4).unwrap();
        let mut handle = QueryHandle::new(store.buffer_capacity());
        handle.set_key(999_999_999).unwrap();
        view.enqueue_query(&mut handle).unwrap();
        view.submit().unwrap();
        view.await_any(&mut handle).unwrap();
        assert_eq!(handle.result(), None);
    }
}
