//! Async block I/O engine (spec §4.2): a small completion-queue interface
//! over an open file, with interchangeable backends (spec §9, "static
//! polymorphism over I/O back-end").

mod sync_backend;
#[cfg(feature = "io_uring")]
mod uring_backend;

pub use sync_backend::SyncIoEngine;
#[cfg(feature = "io_uring")]
pub use uring_backend::UringIoEngine;

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// `tag` is an opaque, caller-chosen identifier for a queued request;
/// `await_any`/`peek_any` return it to identify which request completed.
/// `0` is reserved for "no completion" and must never be used as a tag.
pub const NO_COMPLETION: u64 = 0;

bitflags::bitflags! {
    /// Open flags. `DIRECT` requires `file_offset`, `len` and the buffer
    /// pointer to be block-aligned; misalignment is a fatal `UsageError`
    /// at the call site, not something this trait can check generically.
    pub struct OpenFlags: u32 {
        const READ = 0b0000_0001;
        const WRITE = 0b0000_0010;
        const DIRECT = 0b0000_0100;
        const CREATE = 0b0000_1000;
    }
}

/// The capability set every I/O back-end exposes (spec §4.2). Engines are
/// interchangeable at the `View` level (spec §9); none of the query/writer
/// code above this trait knows which concrete backend it is driving.
pub trait IoEngine {
    /// Queue a read of `len` bytes at `file_offset` into `dst`, tagged
    /// `tag`. `dst` must stay valid and must not be touched by the caller
    /// until the matching completion is observed.
    ///
    /// # Safety
    /// `dst` must point to at least `len` writable bytes that outlive the
    /// in-flight request.
    unsafe fn enqueue_read(&mut self, dst: *mut u8, len: usize, file_offset: u64, tag: u64) -> Result<()>;

    /// Queue a write of `len` bytes from `src` at `file_offset`, tagged
    /// `tag`.
    ///
    /// # Safety
    /// `src` must point to at least `len` readable bytes that outlive the
    /// in-flight request.
    unsafe fn enqueue_write(&mut self, src: *const u8, len: usize, file_offset: u64, tag: u64) -> Result<()>;

    /// Release all queued requests to the kernel. Does not wait for them.
    fn submit(&mut self) -> Result<()>;

    /// Block until at least one queued request completes; return its tag.
    /// Any short read, EIO, or submission error is fatal (spec §4.2, §7).
    fn await_any(&mut self) -> Result<u64>;

    /// Non-blocking variant of `await_any`; returns `NO_COMPLETION` if
    /// nothing is ready yet.
    fn peek_any(&mut self) -> Result<u64>;
}

pub fn open_file<P: AsRef<Path>>(path: P, flags: OpenFlags) -> Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(flags.contains(OpenFlags::READ))
        .write(flags.contains(OpenFlags::WRITE))
        .create(flags.contains(OpenFlags::CREATE));
    if flags.contains(OpenFlags::DIRECT) {
        opts.custom_flags(libc::O_DIRECT);
    }
    opts.open(path).map_err(Error::from)
}
