//! Synchronous per-request backend: `pread`/`pwrite` on a positioned file
//! descriptor. Always available, used by tests and as the portable
//! fallback when `io_uring` is unsupported or disabled.

use super::{IoEngine, NO_COMPLETION};
use crate::error::Result;
use std::collections::VecDeque;
use std::fs::File;
use std::os::unix::fs::FileExt;

enum Queued {
    Read { dst: *mut u8, len: usize, offset: u64 },
    Write { src: *const u8, len: usize, offset: u64 },
}

pub struct SyncIoEngine {
    file: File,
    pending: VecDeque<(u64, Queued)>,
    completed: VecDeque<u64>,
}

// `Queued` holds raw pointers that the caller has promised stay valid
// until the completion is observed (see `IoEngine::enqueue_read`'s safety
// contract); the engine itself never sends across threads.
unsafe impl Send for Queued {}

impl SyncIoEngine {
    pub fn new(file: File, _depth: usize) -> SyncIoEngine {
        SyncIoEngine {
            file,
            pending: VecDeque::new(),
            completed: VecDeque::new(),
        }
    }
}

impl IoEngine for SyncIoEngine {
    unsafe fn enqueue_read(&mut self, dst: *mut u8, len: usize, file_offset: u64, tag: u64) -> Result<()> {
        self.pending.push_back((
            tag,
            Queued::Read {
                dst,
                len,
                offset: file_offset,
            },
        ));
        Ok(())
    }

    unsafe fn enqueue_write(&mut self, src: *const u8, len: usize, file_offset: u64, tag: u64) -> Result<()> {
        self.pending.push_back((
            tag,
            Queued::Write {
                src,
                len,
                offset: file_offset,
            },
        ));
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        // A "synchronous per-request" backend performs the syscall at
        // submission time; await_any/peek_any then just drain the
        // already-completed tags in order.
        while let Some((tag, req)) = self.pending.pop_front() {
            match req {
                Queued::Read { dst, len, offset } => {
                    let buf = unsafe { std::slice::from_raw_parts_mut(dst, len) };
                    self.file.read_exact_at(buf, offset)?;
                }
                Queued::Write { src, len, offset } => {
                    let buf = unsafe { std::slice::from_raw_parts(src, len) };
                    self.file.write_all_at(buf, offset)?;
                }
            }
            self.completed.push_back(tag);
        }
        Ok(())
    }

    fn await_any(&mut self) -> Result<u64> {
        // Everything is already complete by the time submit() returns for
        // this backend; block semantics are trivially satisfied.
        Ok(self.completed.pop_front().unwrap_or(NO_COMPLETION))
    }

    fn peek_any(&mut self) -> Result<u64> {
        Ok(self.completed.pop_front().unwrap_or(NO_COMPLETION))
    }
}
