//! PaCHash index (C6): the in-memory `firstBinInBlock` predecessor map.
//!
//! All three space/time variants from spec §4.6's table are the same
//! underlying [`store_units::EliasFano`] structure, differing only in how
//! many low bits get carved out of the index's values and how coarsely
//! the high-bit rank/select structure is sampled:
//!
//! - **Elias–Fano**: `low_bits = ceil(log2(a))`, default select sampling.
//! - **Uncompressed bit-vector**: `low_bits = 0` (a plain unary bit-vector
//!   over the whole bin universe), default select sampling.
//! - **Block-compressed bit-vector**: `low_bits = 0`, a coarser select
//!   sample rate, trading select-time constant for sublinear extra space.

use store_units::{EliasFano, EliasFanoBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexVariant {
    EliasFano,
    UncompressedBitVector,
    BlockCompressedBitVector { sample_rate: usize },
}

pub struct PaCHashIndex {
    seq: EliasFano,
}

pub struct PaCHashIndexBuilder {
    inner: EliasFanoBuilder,
}

impl PaCHashIndexBuilder {
    /// `num_bins = num_blocks * a`; `variant` selects the space/time
    /// trade-off (spec §4.6).
    pub fn new(num_blocks: u64, num_bins: u64, variant: IndexVariant) -> PaCHashIndexBuilder {
        let low_bits = match variant {
            IndexVariant::EliasFano => {
                let a = if num_blocks == 0 { 1 } else { (num_bins / num_blocks.max(1)).max(1) };
                ceil_log2_u64(a)
            }
            IndexVariant::UncompressedBitVector | IndexVariant::BlockCompressedBitVector { .. } => 0,
        };
        PaCHashIndexBuilder {
            inner: EliasFanoBuilder::with_low_bits(num_bins.max(1), num_blocks as usize, low_bits),
        }
    }

    pub fn push_back(&mut self, first_bin_in_block: u64) {
        self.inner.push_back(first_bin_in_block);
    }

    pub fn build(self, variant: IndexVariant) -> PaCHashIndex {
        let seq = match variant {
            IndexVariant::BlockCompressedBitVector { sample_rate } => {
                self.inner.build_rank_select_sampled(sample_rate)
            }
            _ => self.inner.build_rank_select(),
        };
        PaCHashIndex { seq }
    }
}

fn ceil_log2_u64(x: u64) -> u32 {
    if x <= 1 {
        0
    } else {
        64 - (x - 1).leading_zeros()
    }
}

impl PaCHashIndex {
    pub fn num_blocks(&self) -> usize {
        self.seq.len()
    }

    /// Returns the inclusive block range `[i, i + count - 1]` that may
    /// contain an object hashing to `bin` (spec §4.6).
    pub fn locate(&self, bin: u64) -> (u64, u32) {
        if self.seq.is_empty() {
            return (0, 0);
        }
        let mut cursor = self.seq.predecessor_position(bin);
        let start = match cursor.position() {
            Some(pos) => {
                if cursor.value() == Some(bin) && pos > 0 {
                    cursor.retreat();
                    cursor.position().unwrap()
                } else {
                    pos
                }
            }
            // `bin` precedes every indexed value: the object, if any,
            // starts no earlier than block 0.
            None => 0,
        };

        let mut idx = start;
        let mut count = 1u32;
        while idx + 1 < self.seq.len() && self.seq.at(idx + 1) <= bin {
            idx += 1;
            count += 1;
        }
        (start as u64, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_index(first_bins: &[u64], num_bins: u64, variant: IndexVariant) -> PaCHashIndex {
        let mut b = PaCHashIndexBuilder::new(first_bins.len() as u64, num_bins, variant);
        for &v in first_bins {
            b.push_back(v);
        }
        b.build(variant)
    }

    #[test]
    fn locate_covers_the_blocks_bin_could_start_in() {
        // blocks 0,1,2,3,4 with first-bins 0,0,5,5,9
        let first_bins = [0u64, 0, 5, 5, 9];
        for variant in [
            IndexVariant::EliasFano,
            IndexVariant::UncompressedBitVector,
            IndexVariant::BlockCompressedBitVector { sample_rate: 4 },
        ] {
            let idx = build_index(&first_bins, 16, variant);
            let (i, count) = idx.locate(0);
            assert_eq!(i, 0);
            assert!(count >= 2, "{:?}: expected both bin-0 blocks covered", variant);

            let (i, _count) = idx.locate(5);
            assert!(i <= 2, "{:?}", variant);

            let (i, _count) = idx.locate(9);
            assert!(i <= 4, "{:?}", variant);
        }
    }

    #[test]
    fn locate_on_empty_index_returns_empty_range() {
        let idx = build_index(&[], 16, IndexVariant::EliasFano);
        assert_eq!(idx.locate(3), (0, 0));
    }
}
