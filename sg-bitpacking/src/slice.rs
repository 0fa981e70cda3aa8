//! The 64-row DP column fragment and its bit-parallel advance.
use crate::{B, W};
use sg_types::Score;

/// The DP values of 64 consecutive read rows at one graph character.
///
/// Bit `k` of `vp` is set iff the score grows by one from row `k-1` to row `k`
/// (with `score_before_start` the value above the slice); `vn` likewise for a
/// decrease. Invariants: `vp & vn == 0` and
/// `score_end == score_before_start + popcount(vp) - popcount(vn)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WordSlice {
    pub vp: B,
    pub vn: B,
    pub score_end: Score,
    pub score_before_start: Score,
}

impl WordSlice {
    pub fn new(vp: B, vn: B, score_end: Score, score_before_start: Score) -> Self {
        WordSlice { vp, vn, score_end, score_before_start }
    }

    /// A slice with no leftward history, descending from `score` one insertion
    /// per row.
    pub fn source_from_score(score: Score) -> Self {
        WordSlice::new(B::MAX, 0, score + W as Score, score)
    }

    /// A source slice at absolute read row `row`, bounding the DP by the
    /// trivial all-insertions path.
    pub fn source_without_before(row: usize) -> Self {
        WordSlice::new(B::MAX, 0, row as Score + W as Score, row as Score)
    }

    /// The DP value at row `row` of the slice (0-based).
    pub fn score_at(&self, row: usize) -> Score {
        assert!(row < W);
        let mask = if row == W - 1 { B::MAX } else { (1 << (row + 1)) - 1 };
        self.score_before_start + (self.vp & mask).count_ones() as Score
            - (self.vn & mask).count_ones() as Score
    }
}

/// Checks the slice invariants, and its relation to the slice directly above
/// (`up`) when the node was inside the previous band.
#[inline]
pub fn assert_slice_correctness(current: &WordSlice, up: &WordSlice, previous_band: bool) {
    if cfg!(debug_assertions) {
        let wcvp = current.vp.count_ones() as Score;
        let wcvn = current.vn.count_ones() as Score;
        debug_assert_eq!(current.score_end, current.score_before_start + wcvp - wcvn);
        debug_assert!(current.score_before_start >= 0);
        debug_assert!(current.score_end >= 0);
        debug_assert!(current.score_before_start <= current.score_end + W as Score);
        debug_assert!(current.score_end <= current.score_before_start + W as Score);
        debug_assert_eq!(current.vp & current.vn, 0);
        debug_assert!(!previous_band || current.score_before_start <= up.score_end);
    }
}

/// Advances `slice` one graph character to the right.
///
/// `eq` is the equality mask of the new character against the slice's 64 read
/// rows. `previous` is the slice above the *predecessor* cell (the one `slice`
/// came from); `previous_eq` tells whether the new graph character matches the
/// read character directly above the slice. The Myers'99 update, pages 405 and
/// 408, extended with the in-band upper neighbour:
/// <http://www.gersteinlab.org/courses/452/09-spring/pdf/Myers.pdf>
pub fn next_slice(
    mut eq: B,
    mut slice: WordSlice,
    previous_inside_band: bool,
    previous_eq: bool,
    previous: WordSlice,
) -> WordSlice {
    let last_bit: B = 1 << (W - 1);

    let old_value = slice.score_before_start;
    if !previous_inside_band {
        slice.score_before_start += 1;
    } else {
        debug_assert!(slice.score_before_start <= previous.score_end);
        let diagonal = previous.score_end - ((previous.vp & last_bit) != 0) as Score
            + ((previous.vn & last_bit) != 0) as Score
            + !previous_eq as Score;
        slice.score_before_start = (slice.score_before_start + 1).min(diagonal);
    }
    let hin = slice.score_before_start - old_value;

    let xv = eq | slice.vn;
    if hin < 0 {
        eq |= 1;
    }
    let xh = ((eq & slice.vp).wrapping_add(slice.vp) ^ slice.vp) | eq;
    let mut ph = slice.vn | !(xh | slice.vp);
    let mut mh = slice.vp & xh;
    if ph & last_bit != 0 {
        slice.score_end += 1;
    } else if mh & last_bit != 0 {
        slice.score_end -= 1;
    }
    ph <<= 1;
    mh <<= 1;
    if hin < 0 {
        mh |= 1;
    } else if hin > 0 {
        ph |= 1;
    }
    slice.vp = mh | !(xv | ph);
    slice.vn = ph & xv;

    debug_assert_eq!(
        slice.score_end,
        slice.score_before_start + slice.vp.count_ones() as Score
            - slice.vn.count_ones() as Score
    );

    slice
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};

    /// Plain-scores rendition of the same cell update. `pred_scores` are the
    /// predecessor cell's `W + 1` values (index 0 the score above the slice);
    /// `diagonal` is the score two rows above the slice at the predecessor
    /// character, or `None` when the upper neighbour is outside the band.
    fn next_column_cell_by_cell(
        eq: B,
        pred_scores: &[Score],
        diagonal: Option<Score>,
        previous_eq: bool,
    ) -> Vec<Score> {
        let mut out = vec![0; W + 1];
        out[0] = match diagonal {
            Some(d) => (pred_scores[0] + 1).min(d + !previous_eq as Score),
            None => pred_scores[0] + 1,
        };
        for k in 0..W {
            let eq_k = (eq >> k) & 1 != 0;
            let mut best = out[k] + 1;
            best = best.min(pred_scores[k + 1] + 1);
            best = best.min(pred_scores[k] + !eq_k as Score);
            out[k + 1] = best;
        }
        out
    }

    fn random_slice(rng: &mut ChaCha8Rng, score_before_start: Score) -> WordSlice {
        let vp: B = rng.gen();
        let vn: B = rng.gen::<B>() & !vp;
        let score_end =
            score_before_start + vp.count_ones() as Score - vn.count_ones() as Score;
        WordSlice::new(vp, vn, score_end, score_before_start)
    }

    fn scores_of(slice: &WordSlice) -> Vec<Score> {
        let mut out = vec![slice.score_before_start];
        for k in 0..W {
            out.push(slice.score_at(k));
        }
        out
    }

    #[test]
    fn next_slice_matches_cell_by_cell_recurrence() {
        let mut rng = ChaCha8Rng::seed_from_u64(0xb17);
        for _ in 0..500 {
            let base = rng.gen_range(64..256);
            // `up` is the previous 64-row column at the predecessor character;
            // the predecessor cell continues it, so its score before start is
            // exactly `up.score_end`.
            let up = random_slice(&mut rng, base);
            let pred = random_slice(&mut rng, up.score_end);
            let eq: B = rng.gen();
            let previous_eq = rng.gen();
            let got = next_slice(eq, pred, true, previous_eq, up);
            let expected = next_column_cell_by_cell(
                eq,
                &scores_of(&pred),
                Some(up.score_at(W - 2)),
                previous_eq,
            );
            assert_eq!(scores_of(&got), expected);
            assert_eq!(got.vp & got.vn, 0);
        }
    }

    #[test]
    fn next_slice_without_upper_neighbour() {
        let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
        for _ in 0..200 {
            let base = rng.gen_range(64..256);
            let pred = random_slice(&mut rng, base);
            let eq: B = rng.gen();
            let got = next_slice(eq, pred, false, false, WordSlice::default());
            let expected = next_column_cell_by_cell(eq, &scores_of(&pred), None, false);
            assert_eq!(scores_of(&got), expected);
        }
    }

    #[test]
    fn source_slice_descends_by_one_per_row() {
        let s = WordSlice::source_from_score(7);
        assert_eq!(s.score_before_start, 7);
        assert_eq!(s.score_end, 7 + W as Score);
        for k in 0..W {
            assert_eq!(s.score_at(k), 8 + k as Score);
        }
    }
}
