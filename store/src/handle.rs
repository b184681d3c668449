//! `QueryHandle` (spec §3, §4.10): the single-owner unit of concurrency a
//! view drives through its I/O engine.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Idle,
    Submitted,
    Completed,
}

/// Per-query timing/IO counters, the concrete form of the "per-query
/// timing counters" spec §3 lists on `QueryHandle` (named after the
/// original `QueryTimer` in `original_source/`).
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryStats {
    pub blocks_fetched: u32,
    pub io_wait_nanos: u64,
    pub parse_nanos: u64,
}

/// Per-view accumulation of every completed query's [`QueryStats`] (the
/// original's `ConstructionTimer`/`QueryTimer` counters, spec §3).
#[derive(Debug, Default, Clone, Copy)]
pub struct ViewStats {
    pub queries: u64,
    pub blocks_fetched: u64,
    pub io_wait_nanos: u64,
    pub parse_nanos: u64,
}

impl ViewStats {
    pub fn record(&mut self, q: QueryStats) {
        self.queries += 1;
        self.blocks_fetched += q.blocks_fetched as u64;
        self.io_wait_nanos += q.io_wait_nanos;
        self.parse_nanos += q.parse_nanos;
    }

    /// Mean blocks fetched per query so far; `0.0` before any query
    /// completes.
    pub fn mean_blocks_fetched(&self) -> f64 {
        if self.queries == 0 {
            0.0
        } else {
            self.blocks_fetched as f64 / self.queries as f64
        }
    }
}

/// Engine-specific bookkeeping carried between `enqueue` and `parse`.
/// Which variant is populated depends on which engine owns the view.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Pending {
    PaCHash { start_block: u64, block_count: u32 },
    Separator { block: u64 },
    Cuckoo { blocks: [u64; 2], completions_seen: u8 },
}

pub struct QueryHandle {
    key: u64,
    buffer: Vec<u8>,
    state: HandleState,
    result: Option<(usize, u16)>,
    pub(crate) pending: Option<Pending>,
    stats: QueryStats,
}

impl QueryHandle {
    /// `buffer_capacity` must be large enough for the owning engine's
    /// widest possible read (for PaCHash, `4 * (maxSize + blockSize - 1)`
    /// per spec §4.7; for cuckoo, `2 * blockSize`; for separator,
    /// `blockSize`).
    pub fn new(buffer_capacity: usize) -> QueryHandle {
        QueryHandle {
            key: 0,
            buffer: vec![0u8; buffer_capacity],
            state: HandleState::Idle,
            result: None,
            pending: None,
            stats: QueryStats::default(),
        }
    }

    /// Prepare the handle for a new query. Only legal from `Idle`.
    pub fn set_key(&mut self, key: u64) -> Result<()> {
        if self.state != HandleState::Idle {
            return Err(Error::UsageError(
                "set_key called on a non-idle handle".into(),
            ));
        }
        self.key = key;
        self.result = None;
        self.stats = QueryStats::default();
        Ok(())
    }

    /// Release a `Completed` handle back to `Idle` so it can be reused.
    /// Reading `result()`/`stats()` after this returns stale data.
    pub fn reset(&mut self) -> Result<()> {
        if self.state != HandleState::Completed {
            return Err(Error::UsageError(
                "reset called on a handle that has not completed".into(),
            ));
        }
        self.state = HandleState::Idle;
        self.pending = None;
        Ok(())
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// `Some(bytes)` borrowed from the handle's own buffer when the query
    /// was a hit; `None` for a miss or before completion. Valid only until
    /// the handle's next `set_key`.
    pub fn result(&self) -> Option<&[u8]> {
        let (offset, len) = self.result?;
        Some(&self.buffer[offset..offset + len as usize])
    }

    pub fn stats(&self) -> QueryStats {
        self.stats
    }

    pub(crate) fn mark_submitted(&mut self, pending: Pending) {
        self.pending = Some(pending);
        self.state = HandleState::Submitted;
    }

    pub(crate) fn mark_completed(&mut self, result: Option<(usize, u16)>, stats: QueryStats) {
        self.result = result;
        self.stats = stats;
        self.state = HandleState::Completed;
    }
}
