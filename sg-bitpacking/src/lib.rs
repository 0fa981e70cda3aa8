//! Bit-parallel primitives for the 64-row slice DP.
//!
//! One `WordSlice` holds the vertical deltas of 64 consecutive alignment-matrix
//! rows at a single graph character, in the Myers'99 encoding. The merge of two
//! slices (the pointwise minimum of the two implied columns) runs in O(log w)
//! using byte-lane prefix sums.

mod bits;
mod merge;
mod profile;
mod slice;

pub use bits::*;
pub use merge::*;
pub use profile::*;
pub use slice::*;

/// The type used for all bitvectors.
pub type B = u64;

/// The number of rows in one word slice.
pub const W: usize = B::BITS as usize;

/// Prefix-sum differences are calculated in chunks of `CHUNK_BITS` bits.
pub const CHUNK_BITS: usize = 8;

/// Positions of the sign bits of each chunk.
pub const SIGN_MASK: B = 0x8080_8080_8080_8080;

/// Positions of the least significant bits of each chunk.
pub const LSB_MASK: B = 0x0101_0101_0101_0101;

/// Multiplying per-chunk counts by this accumulates them into prefix sums;
/// the constant is 1 at the start of each chunk.
pub const PREFIX_SUM_MULT: B = 0x0101_0101_0101_0101;

pub const ALL_ONES: B = B::MAX;
pub const ALL_ZEROS: B = 0;
