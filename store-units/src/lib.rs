//! On-disk primitives shared by every flavor of variable-object store:
//! block layout, the async I/O engine abstraction, the streaming writer,
//! the forward block iterators, and the compact sequence types the
//! indexes are built from.

pub mod bitvec;
pub mod block;
pub mod elias_fano;
pub mod error;
pub mod hash;
pub mod io;
pub mod iterator;
pub mod metadata;
pub mod serialize;
pub mod writer;

pub use block::{BlockBuilder, BlockView, OVERHEAD_PER_BLOCK, OVERHEAD_PER_OBJECT};
pub use elias_fano::{EliasFano, EliasFanoBuilder};
pub use error::{Error, Result};
pub use io::{IoEngine, OpenFlags};
pub use iterator::{BlockIterator, DoubleBufferIterator, MmapIterator, UnorderedIterator};
pub use metadata::{StoreMetadata, StoreType, MAGIC, METADATA_SIZE, VERSION};
pub use serialize::Offset;
pub use writer::StreamingWriter;
