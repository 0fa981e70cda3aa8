//! Two-state HMM over per-column score increments, used to pick the longest
//! run of columns that look like a correct alignment.
//!
//! The probabilities shrink geometrically with every column, so they are kept
//! as exact rationals over big integers and renormalised after each step.
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::One;
use sg_bitpacking::W;
use sg_types::Score;

fn ratio(numer: i64, denom: i64) -> BigRational {
    BigRational::new(BigInt::from(numer), BigInt::from(denom))
}

fn factorial(n: usize) -> BigInt {
    let mut result = BigInt::one();
    for i in 2..=n {
        result *= BigInt::from(i);
    }
    result
}

fn choose(n: usize, k: usize) -> BigInt {
    factorial(n) / factorial(k) / factorial(n - k)
}

fn powr(base: &BigRational, exponent: usize) -> BigRational {
    let mut result = BigRational::one();
    for _ in 0..exponent {
        result *= base;
    }
    result
}

/// Binomial emission probability of `mismatches` errors in one `W`-row column
/// at per-base mismatch rate `p`.
fn emission(p: &BigRational, mismatches: usize) -> BigRational {
    let one = BigRational::one();
    BigRational::from(choose(W, mismatches)) * powr(p, mismatches) * powr(&(one - p), W - mismatches)
}

/// Labels each column of `scores` (per-column running minima, entry 0 the
/// starting zero) as likely-correct or not, by Viterbi over a correct/false
/// two-state chain with binomial emissions.
pub fn estimate_correct_alignment_viterbi(scores: &[Score]) -> Vec<bool> {
    // 15% per-base mismatches for a correct alignment (long-read error rate),
    // 50% for a false one; 1% state crossover; 30/70 prior.
    let correct_mismatch_probability = ratio(15, 100);
    let false_mismatch_probability = ratio(50, 100);
    let false_to_correct = ratio(1, 100);
    let correct_to_false = ratio(1, 100);
    let one = BigRational::one();

    let mut correct_probability = ratio(30, 100);
    let mut false_probability = ratio(70, 100);
    let mut correct_from_correct = Vec::with_capacity(scores.len().saturating_sub(1));
    let mut false_from_correct = Vec::with_capacity(scores.len().saturating_sub(1));
    for i in 1..scores.len() {
        assert!(scores[i] >= scores[i - 1]);
        let score_diff = (scores[i] - scores[i - 1]) as usize;
        debug_assert!(score_diff <= W);
        correct_from_correct.push(
            &correct_probability * (&one - &correct_to_false)
                >= &false_probability * &false_to_correct,
        );
        false_from_correct.push(
            &correct_probability * &correct_to_false
                >= &false_probability * (&one - &false_to_correct),
        );
        let new_correct = (&correct_probability * (&one - &correct_to_false))
            .max(&false_probability * &false_to_correct);
        let new_false = (&correct_probability * &correct_to_false)
            .max(&false_probability * (&one - &false_to_correct));
        correct_probability = new_correct * emission(&correct_mismatch_probability, score_diff);
        false_probability = new_false * emission(&false_mismatch_probability, score_diff);
        let normalizer = &correct_probability + &false_probability;
        correct_probability /= &normalizer;
        false_probability /= &normalizer;
    }
    debug_assert_eq!(correct_from_correct.len(), scores.len() - 1);

    let mut current_correct = correct_probability > false_probability;
    let mut result = vec![false; scores.len() - 1];
    for i in (0..scores.len() - 1).rev() {
        result[i] = current_correct;
        current_correct = if current_correct {
            correct_from_correct[i]
        } else {
            false_from_correct[i]
        };
    }
    result
}

/// The inclusive bounds of the longest run of set entries, or `None` when no
/// entry is set. The first of equally long runs wins.
pub fn largest_contiguous_block(vec: &[bool]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    let mut run_start = 0;
    let mut run_len = 0;
    for (i, &v) in vec.iter().enumerate() {
        if v {
            if run_len == 0 {
                run_start = i;
            }
            run_len += 1;
            if best.map_or(true, |(s, e)| run_len > e - s + 1) {
                best = Some((run_start, run_start + run_len - 1));
            }
        } else {
            run_len = 0;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_scores_label_every_column_correct() {
        // A handful of mismatches per column is well inside the 15% regime.
        let scores: Vec<Score> = vec![0, 2, 4, 5, 8, 10];
        let labels = estimate_correct_alignment_viterbi(&scores);
        assert_eq!(labels, vec![true; 5]);
    }

    #[test]
    fn garbage_scores_label_every_column_false() {
        // ~30 of 64 rows wrong per column looks like the 50% state.
        let scores: Vec<Score> = vec![0, 30, 60, 90, 120];
        let labels = estimate_correct_alignment_viterbi(&scores);
        assert_eq!(labels, vec![false; 4]);
    }

    #[test]
    fn mixed_scores_isolate_the_correct_run() {
        let mut scores: Vec<Score> = vec![0];
        let mut acc = 0;
        // Two garbage columns, four clean ones, two garbage again.
        for delta in [30, 30, 1, 2, 1, 2, 30, 30] {
            acc += delta;
            scores.push(acc);
        }
        let labels = estimate_correct_alignment_viterbi(&scores);
        assert_eq!(
            labels,
            vec![false, false, true, true, true, true, false, false]
        );
        assert_eq!(largest_contiguous_block(&labels), Some((2, 5)));
    }

    #[test]
    fn largest_block_prefers_the_longest_run() {
        let v = [true, false, true, true, true, false, true, true];
        assert_eq!(largest_contiguous_block(&v), Some((2, 4)));
        assert_eq!(largest_contiguous_block(&[true]), Some((0, 0)));
        assert_eq!(largest_contiguous_block(&[false, false]), None);
    }

    #[test]
    fn binomial_helpers() {
        assert_eq!(choose(4, 2), BigInt::from(6));
        assert_eq!(choose(64, 0), BigInt::one());
        assert_eq!(powr(&ratio(1, 2), 3), ratio(1, 8));
    }
}
