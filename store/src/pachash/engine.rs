//! PaCHash engine (C7): construction and query on top of the shared block
//! container (C1/C3) and the predecessor index (C6).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use store_units::io::{open_file, IoEngine, OpenFlags};
use store_units::{
    hash::key2bin, BlockView, DoubleBufferIterator, BlockIterator, StoreMetadata, StoreType,
    StreamingWriter, METADATA_SIZE,
};
use store_units::io::SyncIoEngine;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::handle::{Pending, QueryHandle, QueryStats, ViewStats};
use crate::pachash::index::{IndexVariant, PaCHashIndex, PaCHashIndexBuilder};

/// Write a sorted-on-open stream of `(key, value)` records as a PaCHash
/// file (spec §4.7 Construction).
pub fn write_to_file<P: AsRef<Path>>(
    path: P,
    mut records: Vec<(u64, Vec<u8>)>,
    config: StoreConfig,
) -> Result<()> {
    records.sort_unstable_by_key(|(k, _)| *k);
    for (k, _) in &records {
        if *k == 0 {
            return Err(Error::Units(store_units::Error::BadInput(
                "key 0 is reserved for the metadata marker".into(),
            )));
        }
    }

    let file = open_file(
        path.as_ref(),
        OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
    )?;
    let mut io = SyncIoEngine::new(file, config.depth());
    let mut writer = StreamingWriter::new(&mut io, config.block_size())?;
    for (key, value) in &records {
        if value.len() > u16::MAX as usize {
            return Err(Error::Units(store_units::Error::BadInput(format!(
                "value for key {} exceeds u16::MAX bytes",
                key
            ))));
        }
        writer.write(*key, value.len() as u16, value)?;
    }
    writer.close(StoreType::PaCHash)?;
    debug!("wrote {} PaCHash records to {:?}", records.len(), path.as_ref());
    Ok(())
}

/// An opened, queryable PaCHash store. The predecessor index is rebuilt
/// from the file on open (it is not persisted) and shared read-only
/// across every [`PaCHashView`].
pub struct PaCHashStore {
    path: PathBuf,
    block_size: usize,
    num_blocks: u64,
    max_size: u64,
    num_bins: u64,
    index: Arc<PaCHashIndex>,
}

impl PaCHashStore {
    pub fn open<P: AsRef<Path>>(path: P, a: u32, config: StoreConfig) -> Result<PaCHashStore> {
        let path = path.as_ref().to_path_buf();
        let metadata = read_metadata(&path)?;
        if metadata.store_type != StoreType::PaCHash {
            return Err(Error::Units(store_units::Error::FormatError {
                expected_type: StoreType::PaCHash.to_tag(),
                found_type: metadata.store_type.to_tag(),
            }));
        }
        let num_blocks = metadata.num_blocks;
        // `a` is not encoded in the on-disk type tag (unlike separator's
        // `s`): it only shapes the in-memory index, which is rebuilt from
        // scratch on every open regardless of which `a` produced the
        // file, so a mismatch only costs query efficiency, not
        // correctness.
        let num_bins = num_blocks * a.max(1) as u64;
        let index = build_index(&path, config.block_size(), num_blocks, num_bins)?;
        Ok(PaCHashStore {
            path,
            block_size: config.block_size(),
            num_blocks,
            max_size: metadata.max_size,
            num_bins,
            index: Arc::new(index),
        })
    }

    pub fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    /// Minimum handle buffer size that can hold any reconstructed object
    /// plus the per-block overhead of the blocks it spans (spec §4.7).
    pub fn buffer_capacity(&self) -> usize {
        4 * (self.max_size as usize + self.block_size - 1)
    }

    pub fn view(&self, depth: usize) -> Result<PaCHashView> {
        let file = open_file(&self.path, OpenFlags::READ)?;
        let io = SyncIoEngine::new(file, depth);
        Ok(PaCHashView {
            io,
            block_size: self.block_size,
            num_bins: self.num_bins,
            index: self.index.clone(),
            stats: ViewStats::default(),
        })
    }
}

fn read_metadata(path: &Path) -> Result<StoreMetadata> {
    let file = open_file(path, OpenFlags::READ)?;
    let mut io = SyncIoEngine::new(file, 1);
    let mut header = vec![0u8; METADATA_SIZE];
    unsafe {
        io.enqueue_read(header.as_mut_ptr(), header.len(), 0, 1)?;
    }
    io.submit()?;
    io.await_any()?;
    Ok(StoreMetadata::parse(&header)?)
}

/// The carry-forward `buildIndex` pass (spec §4.7): re-scans every block
/// and pushes one `firstBinInBlock` entry per block.
fn build_index(path: &Path, block_size: usize, num_blocks: u64, num_bins: u64) -> Result<PaCHashIndex> {
    let mut builder = PaCHashIndexBuilder::new(num_blocks, num_bins, IndexVariant::EliasFano);
    if num_blocks == 0 {
        return Ok(builder.build(IndexVariant::EliasFano));
    }

    let file = open_file(path, OpenFlags::READ)?;
    let mut io = SyncIoEngine::new(file, 4);
    let mut it = DoubleBufferIterator::open(&mut io, block_size, num_blocks)?;

    let mut prev_pushed = 0u64;
    let mut block_idx = 0u64;
    loop {
        let view = BlockView::parse(it.block_content());
        let n = view.num_objects() as usize;

        let pushed = if block_idx == 0 {
            // Skip the metadata pseudo-object (key 0) at table index 0.
            if n > 1 {
                key2bin(view.key(1), num_bins)
            } else {
                0
            }
        } else if n > 0 && view.object_offset(0) == 0 {
            let candidate = key2bin(view.key(0), num_bins);
            if candidate > prev_pushed {
                candidate
            } else {
                prev_pushed
            }
        } else {
            prev_pushed
        };
        builder.push_back(pushed);
        prev_pushed = pushed;

        block_idx += 1;
        if !it.next()? {
            break;
        }
    }
    Ok(builder.build(IndexVariant::EliasFano))
}

/// One thread's submission queue + file descriptor over a [`PaCHashStore`]
/// (spec §4.10).
pub struct PaCHashView {
    io: SyncIoEngine,
    block_size: usize,
    num_bins: u64,
    index: Arc<PaCHashIndex>,
    stats: ViewStats,
}

impl PaCHashView {
    pub fn enqueue_query(&mut self, handle: &mut QueryHandle) -> Result<()> {
        let bin = key2bin(handle.key(), self.num_bins);
        let (start_block, count) = self.index.locate(bin);
        let read_len = count as usize * self.block_size;
        if handle.buffer().len() < read_len {
            return Err(Error::UsageError(format!(
                "handle buffer ({} B) too small for a {}-block read",
                handle.buffer().len(),
                count
            )));
        }
        let offset = start_block * self.block_size as u64;
        unsafe {
            self.io
                .enqueue_read(handle.buffer_mut().as_mut_ptr(), read_len, offset, 0)?;
        }
        handle.mark_submitted(Pending::PaCHash {
            start_block,
            block_count: count,
        });
        Ok(())
    }

    pub fn submit(&mut self) -> Result<()> {
        Ok(self.io.submit()?)
    }

    pub fn await_any(&mut self, handle: &mut QueryHandle) -> Result<()> {
        self.io.await_any()?;
        self.parse_completed(handle)
    }

    /// Non-blocking variant: returns `false` (and leaves `handle`
    /// untouched) if nothing has completed yet.
    pub fn peek_any(&mut self, handle: &mut QueryHandle) -> Result<bool> {
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
        let block_count = match handle.pending {
            Some(Pending::PaCHash { block_count, .. }) => block_count as usize,
            _ => return Err(Error::UsageError("handle not submitted via this view".into())),
        };
        let key = handle.key();
        let block_size = self.block_size;
        let buffer = handle.buffer_mut();

        let stats = QueryStats {
            blocks_fetched: block_count as u32,
            ..QueryStats::default()
        };

        let mut result = None;
        'outer: for j in 0..block_count {
            let block = &buffer[j * block_size..(j + 1) * block_size];
            let view = BlockView::parse(block);
            let n = view.num_objects() as usize;
            if let Some(p) = find_key(&view, n, key) {
                let seg_start = view.object_offset(p) as usize;
                let seg_end = if p + 1 < n {
                    view.object_offset(p + 1) as usize
                } else {
                    view.table_start() - view.empty_page_end() as usize
                };
                let dest_abs = j * block_size + seg_start;
                let mut total_len = seg_end - seg_start;
                let is_last_in_block = p + 1 == n;
                let gap = view.empty_page_end();

                if is_last_in_block && gap == 0 {
                    let mut write_cursor = dest_abs + total_len;
                    let mut cur = j + 1;
                    while cur < block_count {
                        let next_block = &buffer[cur * block_size..(cur + 1) * block_size];
                        let next_view = BlockView::parse(next_block);
                        let next_n = next_view.num_objects() as usize;
                        let seg_len = if next_n == 0 {
                            block_size
                        } else {
                            next_view.object_offset(0) as usize
                        };
                        let src_start = cur * block_size;
                        buffer.copy_within(src_start..src_start + seg_len, write_cursor);
                        write_cursor += seg_len;
                        total_len += seg_len;
                        if next_n > 0 {
                            break;
                        }
                        cur += 1;
                    }
                }

                result = Some((dest_abs, total_len as u16));
                break 'outer;
            }
        }

        handle.mark_completed(result, stats);
        self.stats.record(stats);
        Ok(())
    }
}

fn find_key(view: &BlockView, n: usize, key: u64) -> Option<usize> {
    // PaCHash blocks keep keys strictly increasing (spec §3 invariant).
    let mut lo = 0usize;
    let mut hi = n;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let k = view.key(mid);
        if k == key {
            return Some(mid);
        } else if k < key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::QueryHandle;

    fn sample_records(n: u64) -> Vec<(u64, Vec<u8>)> {
        (1..=n)
            .map(|k| (k, format!("v{}", k).repeat(20).into_bytes()))
            .collect()
    }

    #[test]
    fn round_trips_small_uniform_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pachash.bin");
        let records = sample_records(200);
        let config = StoreConfig::new(4096, 8, false);
        write_to_file(&path, records.clone(), config).unwrap();

        let store = PaCHashStore::open(&path, 8, config).unwrap();
        let mut view = store.view(4).unwrap();
        let cap = store.buffer_capacity();

        for (key, value) in &records {
            let mut handle = QueryHandle::new(cap);
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
        let path = dir.path().join("pachash_empty.bin");
        let config = StoreConfig::new(4096, 8, false);
        write_to_file(&path, Vec::new(), config).unwrap();

        let store = PaCHashStore::open(&path, 8, config).unwrap();
        assert_eq!(store.num_blocks(), 1);
        let mut view = store.view(4).unwrap();
        let mut handle = QueryHandle::new(store.buffer_capacity());
        handle.set_key(42).unwrap();
        view.enqueue_query(&mut handle).unwrap();
        view.submit().unwrap();
        view.await_any(&mut handle).unwrap();
        assert_eq!(handle.result(), None);
    }

    #[test]
    fn missing_key_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pachash.bin");
        let records = sample_records(50);
        let config = StoreConfig::new(4096, 8, false);
        write_to_file(&path, records, config).unwrap();

        let store = PaCHashStore::open(&path, 8, config).unwrap();
        let mut view = store.view(4).unwrap();
        let mut handle = QueryHandle::new(store.buffer_capacity());
        handle.set_key(999_999).unwrap();
        view.enqueue_query(&mut handle).unwrap();
        view.submit().unwrap();
        view.await_any(&mut handle).unwrap();
        assert_eq!(handle.result(), None);
    }

    #[test]
    fn large_objects_span_blocks_and_fetch_several() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pachash_big.bin");
        let records = vec![
            (1u64, vec![0xAAu8; 5000]),
            (2u64, vec![0xBBu8; 12000]),
            (3u64, vec![0xCCu8; 900]),
        ];
        let config = StoreConfig::new(4096, 8, false);
        write_to_file(&path, records.clone(), config).unwrap();

        let store = PaCHashStore::open(&path, 8, config).unwrap();
        let mut view = store.view(4).unwrap();
        let mut handle = QueryHandle::new(store.buffer_capacity());
        handle.set_key(2).unwrap();
        view.enqueue_query(&mut handle).unwrap();
        view.submit().unwrap();
        view.await_any(&mut handle).unwrap();
        assert_eq!(handle.result(), Some(records[1].1.as_slice()));
        assert!(handle.stats().blocks_fetched >= 4);
    }
}
