pub mod engine;
pub mod index;

pub use engine::{write_to_file, PaCHashStore, PaCHashView};
pub use index::{IndexVariant, PaCHashIndex, PaCHashIndexBuilder};
