//! A read-optimized external-memory key-value store for variable-sized
//! objects, with three interchangeable on-disk engines (PaCHash,
//! separator hashing, cuckoo hashing) sharing one block container and
//! query-handle pipeline.

pub mod config;
pub mod cuckoo;
pub mod error;
pub mod handle;
pub mod merge;
pub mod pachash;
pub mod separator;

pub use config::{EngineParams, StoreConfig};
pub use cuckoo::{CuckooStore, CuckooView};
pub use error::{Error, Result};
pub use handle::{HandleState, QueryHandle, QueryStats, ViewStats};
pub use pachash::{IndexVariant, PaCHashStore, PaCHashView};
pub use separator::{SeparatorStore, SeparatorView};
