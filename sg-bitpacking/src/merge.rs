//! Pointwise minimum of two word slices covering the same 64 rows.
use crate::{
    byte_prefix_sums, byte_vpvn_sum, chunk_popcounts, WordSlice, ALL_ONES, ALL_ZEROS, B,
    CHUNK_BITS, LSB_MASK, SIGN_MASK, W,
};
use sg_types::Score;

/// For two delta-encoded columns with starting scores `0` and
/// `score_difference`, returns bitmasks of the rows where the left column is
/// strictly smaller and where the right column is strictly smaller.
///
/// O(log w): per-byte signed prefix sums of the delta difference, then one
/// pass over the 8 bit positions inside a byte, testing all 8 byte lanes in
/// parallel.
pub fn difference_masks(
    mut left_vp: B,
    mut left_vn: B,
    mut right_vp: B,
    mut right_vn: B,
    score_difference: Score,
) -> (B, B) {
    assert!(score_difference >= 0);
    // Rows where both slices move the same way cannot change the ordering.
    let vp_common = !(left_vp & right_vp);
    let vn_common = !(left_vn & right_vn);
    left_vp &= vp_common;
    left_vn &= vn_common;
    right_vp &= vp_common;
    right_vn &= vn_common;
    // Left is lower everywhere.
    if score_difference > (right_vn.count_ones() + left_vp.count_ones()) as Score {
        return (ALL_ONES, ALL_ZEROS);
    }
    if score_difference == 128 && right_vn == ALL_ONES && left_vp == ALL_ONES {
        return (ALL_ONES ^ (1 << (W - 1)), ALL_ZEROS);
    } else if score_difference == 0 && right_vn == ALL_ONES && left_vp == ALL_ONES {
        return (ALL_ZEROS, ALL_ONES);
    }
    debug_assert!(score_difference < 128);

    let byte_vpvn_sum_left = byte_vpvn_sum(
        byte_prefix_sums(chunk_popcounts(left_vp), 0),
        byte_prefix_sums(chunk_popcounts(left_vn), 0),
    );
    let byte_vpvn_sum_right = byte_vpvn_sum(
        byte_prefix_sums(chunk_popcounts(right_vp), score_difference as B),
        byte_prefix_sums(chunk_popcounts(right_vn), 0),
    );
    let mut difference = byte_vpvn_sum_left;
    {
        // Split the right-hand sums into nonnegative additions and deductions.
        // The smear mask is 0x7f in chunks holding a negative value, 0
        // elsewhere; sign bits stay clear.
        let smearmask = ((byte_vpvn_sum_right & SIGN_MASK) >> (CHUNK_BITS - 1))
            .wrapping_mul((1 << (CHUNK_BITS - 1)) - 1);
        debug_assert!(smearmask & SIGN_MASK == 0);
        let deductions = !smearmask & byte_vpvn_sum_right & !SIGN_MASK;
        // The negative chunks are in one's complement, so negate and add one.
        let additions = (smearmask & !byte_vpvn_sum_right).wrapping_add(smearmask & LSB_MASK);
        debug_assert!(deductions & SIGN_MASK == 0);
        let mut signs_before = difference & SIGN_MASK;
        // Clear the sign bits so additions do not carry into other chunks.
        difference &= !SIGN_MASK;
        difference = difference.wrapping_add(additions);
        // A set sign bit means the chunk went from <0 to >=0, so flip it.
        difference ^= signs_before;
        signs_before = difference & SIGN_MASK;
        // Set the sign bits so deductions do not borrow from other chunks.
        difference |= SIGN_MASK;
        difference = difference.wrapping_sub(deductions);
        // A cleared sign bit means the chunk went from >=0 to <0.
        signs_before ^= SIGN_MASK & !difference;
        difference &= !SIGN_MASK;
        difference |= signs_before;
    }
    // `difference` now holds the prefix-sum difference (left - right) at the
    // start of each chunk.
    let mut result_left_smaller: B = 0;
    let mut result_right_smaller: B = 0;
    for bit in 0..CHUNK_BITS {
        let mut signs_before = difference & SIGN_MASK;
        difference &= !SIGN_MASK;
        difference = difference.wrapping_add(left_vp & LSB_MASK);
        difference = difference.wrapping_add(right_vn & LSB_MASK);
        difference ^= signs_before;
        signs_before = difference & SIGN_MASK;
        difference |= SIGN_MASK;
        difference = difference.wrapping_sub(left_vn & LSB_MASK);
        difference = difference.wrapping_sub(right_vp & LSB_MASK);
        signs_before ^= SIGN_MASK & !difference;
        difference &= !SIGN_MASK;
        difference |= signs_before;
        left_vn >>= 1;
        left_vp >>= 1;
        right_vn >>= 1;
        right_vp >>= 1;
        // Left < right where the prefix-sum difference went negative.
        let negative = difference & SIGN_MASK;
        result_left_smaller |= negative >> (CHUNK_BITS - 1 - bit);
        // Subtracting one clears the sign bit exactly for the zero chunks.
        let not_equal_to_zero = ((difference | SIGN_MASK).wrapping_sub(LSB_MASK)) & SIGN_MASK;
        result_right_smaller |= (not_equal_to_zero & !negative) >> (CHUNK_BITS - 1 - bit);
    }
    (result_left_smaller, result_right_smaller)
}

/// Row-by-row reference for [`difference_masks`]; used by the debug
/// cross-validation and the tests.
pub fn difference_masks_cell_by_cell(
    mut left_vp: B,
    mut left_vn: B,
    mut right_vp: B,
    mut right_vn: B,
    score_difference: Score,
) -> (B, B) {
    let mut left_score: Score = 0;
    let mut right_score = score_difference;
    let mut left_smaller: B = 0;
    let mut right_smaller: B = 0;
    for i in 0..W {
        left_score += (left_vp & 1) as Score;
        left_score -= (left_vn & 1) as Score;
        right_score += (right_vp & 1) as Score;
        right_score -= (right_vn & 1) as Score;
        left_vp >>= 1;
        left_vn >>= 1;
        right_vp >>= 1;
        right_vn >>= 1;
        if left_score < right_score {
            left_smaller |= 1 << i;
        }
        if right_score < left_score {
            right_smaller |= 1 << i;
        }
    }
    (left_smaller, right_smaller)
}

/// Returns the slice whose value at every row is the smaller of the two
/// inputs' values at that row.
///
/// O(log w). Associative; ties keep the left input's delta pattern, so the
/// result is independent of the order in which in-neighbours are folded.
pub fn merge_slices(mut left: WordSlice, mut right: WordSlice) -> WordSlice {
    if left.score_before_start > right.score_before_start {
        std::mem::swap(&mut left, &mut right);
    }
    debug_assert!(left.vp & left.vn == ALL_ZEROS);
    debug_assert!(right.vp & right.vn == ALL_ZEROS);
    let (left_smaller, right_smaller) = difference_masks(
        left.vp,
        left.vn,
        right.vp,
        right.vn,
        right.score_before_start - left.score_before_start,
    );
    debug_assert_eq!(left_smaller & right_smaller, 0);
    debug_assert_eq!(
        (left_smaller, right_smaller),
        difference_masks_cell_by_cell(
            left.vp,
            left.vn,
            right.vp,
            right.vn,
            right.score_before_start - left.score_before_start
        )
    );
    // Rows taken from the right: where it is smaller, and onward from each
    // transition until the left becomes smaller again.
    let mask = (right_smaller
        | ((left_smaller | right_smaller).wrapping_sub(right_smaller << 1)))
        & !left_smaller;
    // At a transition the winning side enters one lower than the loser's
    // recorded delta; drop the loser's negative step there.
    let left_reduction = left_smaller & (right_smaller << 1);
    let mut right_reduction = right_smaller & (left_smaller << 1);
    if (right_smaller & 1) != 0 && left.score_before_start < right.score_before_start {
        right_reduction |= 1;
    }
    debug_assert_eq!(left_reduction & right.vp, left_reduction);
    debug_assert_eq!(right_reduction & left.vp, right_reduction);
    debug_assert_eq!(left_reduction & left.vn, left_reduction);
    debug_assert_eq!(right_reduction & right.vn, right_reduction);
    left.vn &= !left_reduction;
    right.vn &= !right_reduction;
    let result = WordSlice {
        vp: (left.vp & !mask) | (right.vp & mask),
        vn: (left.vn & !mask) | (right.vn & mask),
        score_end: left.score_end.min(right.score_end),
        score_before_start: left.score_before_start.min(right.score_before_start),
    };
    debug_assert_eq!(result.vp & result.vn, 0);
    debug_assert_eq!(
        result.score_end,
        result.score_before_start + result.vp.count_ones() as Score
            - result.vn.count_ones() as Score
    );
    result
}

/// Row-by-row reference for [`merge_slices`]; the fallback used to
/// cross-validate the bit-parallel path.
pub fn merge_slices_cell_by_cell(left: WordSlice, right: WordSlice) -> WordSlice {
    debug_assert!(left.vp & left.vn == ALL_ZEROS);
    debug_assert!(right.vp & right.vn == ALL_ZEROS);
    let mut merged = WordSlice {
        vp: ALL_ZEROS,
        vn: ALL_ZEROS,
        score_end: 0,
        score_before_start: left.score_before_start.min(right.score_before_start),
    };
    let mut left_score = left.score_before_start;
    let mut right_score = right.score_before_start;
    let mut previous_score = merged.score_before_start;
    for j in 0..W {
        let mask: B = 1 << j;
        if left.vp & mask != 0 {
            left_score += 1;
        } else if left.vn & mask != 0 {
            left_score -= 1;
        }
        if right.vn & mask != 0 {
            right_score -= 1;
        } else if right.vp & mask != 0 {
            right_score += 1;
        }
        let better_score = left_score.min(right_score);
        if better_score == previous_score + 1 {
            merged.vp |= mask;
        } else if better_score == previous_score - 1 {
            merged.vn |= mask;
        }
        debug_assert!(better_score >= previous_score - 1);
        debug_assert!(better_score <= previous_score + 1);
        previous_score = better_score;
    }
    merged.score_end = previous_score;
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};

    fn random_slice(rng: &mut ChaCha8Rng, score_before_start: Score) -> WordSlice {
        let vp: B = rng.gen();
        let vn: B = rng.gen::<B>() & !vp;
        let score_end =
            score_before_start + vp.count_ones() as Score - vn.count_ones() as Score;
        WordSlice::new(vp, vn, score_end, score_before_start)
    }

    #[test]
    fn merge_is_idempotent() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..200 {
            let score_before_start = rng.gen_range(64..512);
            let a = random_slice(&mut rng, score_before_start);
            let merged = merge_slices(a, a);
            assert_eq!(merged, a);
        }
    }

    #[test]
    fn difference_masks_match_cell_by_cell() {
        let mut rng = ChaCha8Rng::seed_from_u64(0xd1ff);
        for _ in 0..2000 {
            let left_vp: B = rng.gen();
            let left_vn: B = rng.gen::<B>() & !left_vp;
            let right_vp: B = rng.gen();
            let right_vn: B = rng.gen::<B>() & !right_vp;
            let delta = rng.gen_range(0..128);
            assert_eq!(
                difference_masks(left_vp, left_vn, right_vp, right_vn, delta),
                difference_masks_cell_by_cell(left_vp, left_vn, right_vp, right_vn, delta),
            );
        }
    }

    #[test]
    fn difference_masks_saturated_cases() {
        assert_eq!(
            difference_masks(ALL_ONES, 0, 0, ALL_ONES, 0),
            difference_masks_cell_by_cell(ALL_ONES, 0, 0, ALL_ONES, 0),
        );
        assert_eq!(
            difference_masks(ALL_ONES, 0, 0, ALL_ONES, 128),
            difference_masks_cell_by_cell(ALL_ONES, 0, 0, ALL_ONES, 128),
        );
        assert_eq!(difference_masks(0, 0, 0, 0, 200), (ALL_ONES, ALL_ZEROS));
    }

    #[test]
    fn merge_matches_cell_by_cell() {
        let mut rng = ChaCha8Rng::seed_from_u64(0x6e36);
        for _ in 0..2000 {
            let base = rng.gen_range(64..512);
            let a = random_slice(&mut rng, base);
            let b_score_before_start = base + rng.gen_range(0..64);
            let b = random_slice(&mut rng, b_score_before_start);
            let fast = merge_slices(a, b);
            let slow = merge_slices_cell_by_cell(a, b);
            assert_eq!(fast, slow);
            // Merging is symmetric in the values it produces.
            assert_eq!(merge_slices(b, a), slow);
        }
    }

    #[test]
    fn merge_picks_the_lower_column() {
        let a = WordSlice::source_from_score(3);
        let b = WordSlice::source_from_score(10);
        let merged = merge_slices(b, a);
        assert_eq!(merged, a);
    }
}
