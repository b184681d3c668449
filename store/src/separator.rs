//! Separator-hashing engine (C8): a probe-chain table where each block
//! carries an `s`-bit separator threshold that bounds which keys may
//! still land there.
//!
//! spec.md's on-disk format (§6) has no room for the per-block
//! `separators[]` array the query algorithm needs (the metadata record is
//! a fixed 45 bytes); this implementation appends it as a raw
//! little-endian `u16` per block directly after the trailing terminator
//! block, read back on open. Values stored by this engine must fit
//! entirely within one block — the probe-chain query contract only ever
//! reads a single block, so there is no boundary-spanning reconstruction
//! here the way PaCHash has.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use log::debug;
use store_units::hash::{chain_block, separator_value};
use store_units::io::{open_file, IoEngine, OpenFlags, SyncIoEngine};
use store_units::{
    BlockView, StoreMetadata, StoreType, StreamingWriter, METADATA_SIZE, OVERHEAD_PER_BLOCK,
    OVERHEAD_PER_OBJECT,
};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::handle::{Pending, QueryHandle, QueryStats, ViewStats};

const MAX_PROBES: u32 = 100;

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

/// Build a separator-hashed file. `load_factor` controls how many blocks
/// are allocated for the given records; construction fails with
/// [`Error::ConstructionFailure`] if any key exceeds the 100-probe budget
/// (spec §4.8, §7) — a caller that hits this should retry with a lower
/// `load_factor`.
pub fn write_to_file<P: AsRef<Path>>(
    path: P,
    records: Vec<(u64, Vec<u8>)>,
    s: u8,
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
    let num_blocks = (((total_bytes as f64) / (usable_per_block as f64)).ceil() as u64).max(1);

    let mut blocks: Vec<Vec<(u64, Vec<u8>)>> = (0..num_blocks).map(|_| Vec::new()).collect();
    // Unrestricted: every key is accepted until a block overflows and
    // lowers its own threshold (spec §4.8 Insertion invariant).
    let unrestricted: u16 = if s >= 16 { u16::MAX } else { 1u16 << s };
    let mut separators: Vec<u16> = vec![unrestricted; num_blocks as usize];

    let mut queue: VecDeque<(u64, Vec<u8>, u32)> = records.into_iter().map(|(k, v)| (k, v, 0)).collect();

    while let Some((key, value, mut hf)) = queue.pop_front() {
        loop {
            if hf >= MAX_PROBES {
                return Err(Error::ConstructionFailure(format!(
                    "key {} exceeded {} insertion probes at load factor {}",
                    key, MAX_PROBES, load_factor
                )));
            }
            let b = chain_block(key, hf as u64, num_blocks) as usize;
            let sep = separator_value(key, b as u64, s) as u16;
            if sep < separators[b] {
                blocks[b].push((key, value));
                let capacity = block_capacity(block_size, b as u64);
                if block_used_bytes(&blocks[b]) > capacity {
                    blocks[b].sort_by_key(|(k2, _)| separator_value(*k2, b as u64, s));
                    let mut kept_bytes = 0usize;
                    let mut split_at = blocks[b].len();
                    for (idx, (_, v2)) in blocks[b].iter().enumerate() {
                        let item_bytes = v2.len() + OVERHEAD_PER_OBJECT;
                        if kept_bytes + item_bytes > capacity {
                            split_at = idx;
                            break;
                        }
                        kept_bytes += item_bytes;
                    }
                    let excluded = blocks[b].split_off(split_at);
                    if let Some((first_excluded_key, _)) = excluded.first() {
                        separators[b] = separator_value(*first_excluded_key, b as u64, s) as u16;
                    }
                    for (k2, v2) in excluded {
                        queue.push_back((k2, v2, hf + 1));
                    }
                }
                break;
            }
            hf += 1;
        }
    }

    let file = open_file(
        path.as_ref(),
        OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
    )?;
    let mut io = SyncIoEngine::new(file, config.depth());
    {
        let mut writer = StreamingWriter::new(&mut io, block_size)?;
        for block in blocks.iter_mut() {
            block.sort_by_key(|(k, _)| *k);
            for (key, value) in block.iter() {
                writer.write(*key, value.len() as u16, value)?;
            }
            writer.force_flush()?;
        }
        writer.close(StoreType::Separator(s))?;
    }

    let trailer_offset = (num_blocks + 1) * block_size as u64;
    let mut trailer = vec![0u8; num_blocks as usize * 2];
    for (i, sepv) in separators.iter().enumerate() {
        trailer[i * 2] = (*sepv & 0xff) as u8;
        trailer[i * 2 + 1] = (*sepv >> 8) as u8;
    }
    unsafe {
        io.enqueue_write(trailer.as_ptr(), trailer.len(), trailer_offset, 1)?;
    }
    io.submit()?;
    io.await_any()?;
    debug!(
        "wrote separator store with {} blocks, s={}, load_factor={}",
        num_blocks, s, load_factor
    );
    Ok(())
}

pub struct SeparatorStore {
    path: PathBuf,
    block_size: usize,
    num_blocks: u64,
    s: u8,
    separators: Vec<u16>,
}

impl SeparatorStore {
    pub fn open<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<SeparatorStore> {
        let path = path.as_ref().to_path_buf();
        let block_size = config.block_size();
        let file = open_file(&path, OpenFlags::READ)?;
        let mut io = SyncIoEngine::new(file, 2);

        let mut header = vec![0u8; METADATA_SIZE];
        unsafe {
            io.enqueue_read(header.as_mut_ptr(), header.len(), 0, 1)?;
        }
        io.submit()?;
        io.await_any()?;
        let metadata = StoreMetadata::parse(&header)?;
        let s = match metadata.store_type {
            StoreType::Separator(s) => s,
            other => {
                return Err(Error::Units(store_units::Error::FormatError {
                    expected_type: StoreType::Separator(0).to_tag(),
                    found_type: other.to_tag(),
                }))
            }
        };
        let num_blocks = metadata.num_blocks;

        let trailer_offset = (num_blocks + 1) * block_size as u64;
        let mut trailer = vec![0u8; num_blocks as usize * 2];
        if !trailer.is_empty() {
            unsafe {
                io.enqueue_read(trailer.as_mut_ptr(), trailer.len(), trailer_offset, 2)?;
            }
            io.submit()?;
            io.await_any()?;
        }
        let separators = trailer
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();

        Ok(SeparatorStore {
            path,
            block_size,
            num_blocks,
            s,
            separators,
        })
    }

    pub fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    pub fn view(&self, depth: usize) -> Result<SeparatorView> {
        let file = open_file(&self.path, OpenFlags::READ)?;
        let io = SyncIoEngine::new(file, depth);
        Ok(SeparatorView {
            io,
            block_size: self.block_size,
            num_blocks: self.num_blocks,
            s: self.s,
            separators: self.separators.clone(),
            stats: ViewStats::default(),
        })
    }
}

pub struct SeparatorView {
    io: SyncIoEngine,
    block_size: usize,
    num_blocks: u64,
    s: u8,
    separators: Vec<u16>,
    stats: ViewStats,
}

impl SeparatorView {
    fn locate(&self, key: u64) -> Option<u64> {
        let mut hf = 0u32;
        while hf < MAX_PROBES {
            let b = chain_block(key, hf as u64, self.num_blocks);
            let sep = separator_value(key, b, self.s) as u16;
            if sep < self.separators[b as usize] {
                return Some(b);
            }
            hf += 1;
        }
        None
    }

    pub fn enqueue_query(&mut self, handle: &mut QueryHandle) -> Result<()> {
        let block = self.locate(handle.key());
        match block {
            Some(b) => {
                if handle.buffer().len() < self.block_size {
                    return Err(Error::UsageError(format!(
                        "handle buffer ({} B) smaller than block size ({} B)",
                        handle.buffer().len(),
                        self.block_size
                    )));
                }
                let offset = b * self.block_size as u64;
                unsafe {
                    self.io
                        .enqueue_read(handle.buffer_mut().as_mut_ptr(), self.block_size, offset, 0)?;
                }
                handle.mark_submitted(Pending::Separator { block: b });
            }
            None => {
                // No block ever accepts this key: resolve as an
                // immediate miss without touching the I/O engine.
                handle.mark_submitted(Pending::Separator { block: u64::MAX });
            }
        }
        Ok(())
    }

    pub fn submit(&mut self) -> Result<()> {
        Ok(self.io.submit()?)
    }

    pub fn await_any(&mut self, handle: &mut QueryHandle) -> Result<()> {
        if matches!(handle.pending, Some(Pending::Separator { block }) if block == u64::MAX) {
            let stats = QueryStats::default();
            handle.mark_completed(None, stats);
            self.stats.record(stats);
            return Ok(());
        }
        self.io.await_any()?;
        self.parse_completed(handle)
    }

    /// Non-blocking variant: returns `false` (and leaves `handle`
    /// untouched) if nothing has completed yet.
    pub fn peek_any(&mut self, handle: &mut QueryHandle) -> Result<bool> {
        if matches!(handle.pending, Some(Pending::Separator { block }) if block == u64::MAX) {
            let stats = QueryStats::default();
            handle.mark_completed(None, stats);
            self.stats.record(stats);
            return Ok(true);
        }
        let tag = self.io.peek_any()?;
        if tag == store_units::io::NO_COMPLETION {
            return Ok(false);
        }
        self.parse_completed(handle)?;
        Ok(true)
    }

    /// Cumulative stats across every query this view has completed.
    pub fn stats(&self) -> ViewStats {
        self.stats
    }

    fn parse_completed(&mut self, handle: &mut QueryHandle) -> Result<()> {
        let key = handle.key();
        let block_size = self.block_size;
        let buffer = handle.buffer_mut();
        let view = BlockView::parse(&buffer[..block_size]);
        let n = view.num_objects() as usize;

        let mut result = None;
        for i in 0..n {
            if view.key(i) == key {
                let start = view.object_offset(i) as usize;
                let end = if i + 1 < n {
                    view.object_offset(i + 1) as usize
                } else {
                    view.table_start() - view.empty_page_end() as usize
                };
                result = Some((start, (end - start) as u16));
                break;
            }
        }
        let stats = QueryStats {
            blocks_fetched: 1,
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
    fn round_trips_at_a_conservative_load_factor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("separator.bin");
        let recs = records(500);
        let config = StoreConfig::new(4096, 8, false);
        write_to_file(&path, recs.clone(), 6, 0.80, config).unwrap();

        let store = SeparatorStore::open(&path, config).unwrap();
        let mut view = store.view(4).unwrap();
        for (key, value) in &recs {
            let mut handle = QueryHandle::new(config.block_size());
            handle.set_key(*key).unwrap();
            view.enqueue_query(&mut handle).unwrap();
            view.submit().unwrap();
            view.await_any(&mut handle).unwrap();
            assert_eq!(handle.result(), Some(value.as_slice()));
        }
    }

    #[test]
    fn empty_store_is_a_clean_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("separator_empty.bin");
        let config = StoreConfig::new(4096, 8, false);
        write_to_file(&path, Vec::new(), 6, 0.80, config).unwrap();

        let store = SeparatorStore::open(&path, config).unwrap();
        let mut view = store.view(4).unwrap();
        let mut handle = QueryHandle::new(config.block_size());
        handle.set_key(42).unwrap();
        view.enqueue_query(&mut handle).unwrap();
        view.submit().unwrap();
        view.await_any(&mut handle).unwrap();
        assert_eq!(handle.result(), None);
    }

    #[test]
    fn missing_key_is_a_clean_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("separator_miss.bin");
        let recs = records(100);
        let config = StoreConfig::new(4096, 8, false);
        write_to_file(&path, recs, 6, 0.80, config).unwrap();

        let store = SeparatorStore::open(&path, config).unwrap();
        let mut view = store.view(4).unwrap();
        let mut handle = QueryHandle::new(config.block_size());
        handle.set_key(999_999).unwrap();
        view.enqueue_query(&mut handle).unwrap();
        view.submit().unwrap();
        view.await_any(&mut handle).unwrap();
        assert_eq!(handle.result(), None);
    }

    #[test]
    fn overflow_at_high_load_factor_either_succeeds_or_is_fixed_by_backing_off() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("separator_overflow.bin");
        let recs = records(2000);
        let config = StoreConfig::new(256, 8, false);
        match write_to_file(&path, recs.clone(), 4, 0.98, config) {
            Ok(()) => {}
            Err(Error::ConstructionFailure(_)) => {
                write_to_file(&path, recs, 4, 0.90, config).unwrap();
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
}
