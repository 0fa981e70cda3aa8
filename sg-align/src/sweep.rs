//! The left-to-right sweep over 64-row columns.
use crate::band::{band_order, project_forward_and_expand_band};
use crate::calculator::{calculate_node, cut_cycles};
use crate::graph::AlignmentGraph;
use crate::node_slices::NodeSlices;
use sg_bitpacking::{EqProfile, W};
use sg_types::{CharIx, Score};
use std::collections::BTreeSet;

/// Per-column minima of one full sweep. Entry 0 is the starting zero; entry
/// `s` is the minimum score over all banded cells in read rows
/// `[(s-1)*W, s*W)` and the character position achieving it.
#[derive(Debug, Clone, Default)]
pub struct MatrixSlice {
    pub min_score_per_word_slice: Vec<Score>,
    pub min_score_index_per_word_slice: Vec<CharIx>,
    pub cells_processed: usize,
}

impl MatrixSlice {
    pub fn final_min_score(&self) -> Score {
        debug_assert!(!self.min_score_per_word_slice.is_empty());
        debug_assert_eq!(
            self.min_score_per_word_slice.len(),
            self.min_score_index_per_word_slice.len()
        );
        *self.min_score_per_word_slice.last().unwrap()
    }

    pub fn final_min_score_column(&self) -> CharIx {
        *self.min_score_index_per_word_slice.last().unwrap()
    }
}

/// Runs the banded DP over the whole (padded) read and records the per-column
/// minima. `start_band` provides the bands of the leading columns; once
/// exhausted, the band is derived dynamically from the previous column's
/// minimum. Stops early once the running minimum exceeds `max_score`, padding
/// the remaining columns with sentinels.
pub fn column_scores_and_final_position(
    graph: &AlignmentGraph,
    read: &[u8],
    dynamic_width: usize,
    start_band: &[Vec<bool>],
    max_score: Score,
) -> MatrixSlice {
    debug_assert_eq!(read.len() % W, 0);
    let mut result = MatrixSlice {
        min_score_per_word_slice: vec![0],
        min_score_index_per_word_slice: vec![0],
        cells_processed: 0,
    };

    let mut previous_slice = NodeSlices::new();

    let mut previous_minimum_index = CharIx::MAX;
    assert!(!start_band.is_empty());
    assert_eq!(start_band[0].len(), graph.node_count());
    let mut current_band = vec![false; graph.node_count()];
    let mut previous_band = vec![false; graph.node_count()];

    let mut previous_band_order: BTreeSet<_> = BTreeSet::new();
    let mut previous_band_order_out_of_order: BTreeSet<_> = BTreeSet::new();

    let mut j = 0;
    while j < read.len() {
        let mut current_slice = NodeSlices::new();
        let mut current_minimum_score = Score::MAX;
        let mut current_minimum_index = CharIx::MAX;
        let profile = EqProfile::build(&read[j..j + W]);
        let slice_index = j / W;
        let mut order = BTreeSet::new();
        let mut out_of_order = BTreeSet::new();
        if start_band.len() > slice_index {
            if slice_index > 0 {
                previous_band =
                    std::mem::replace(&mut current_band, start_band[slice_index].clone());
            } else {
                current_band = start_band[0].clone();
            }
            (order, out_of_order) = band_order(graph, &current_band);
            if slice_index == 0 {
                previous_band = current_band.clone();
                previous_band_order = order.clone();
                previous_band_order_out_of_order = out_of_order.clone();
                for &node in previous_band_order.iter().chain(&previous_band_order_out_of_order)
                {
                    previous_slice.add_node(node, graph.node_len(node));
                }
            }
        } else {
            // The swapped-in buffer was zeroed at the end of its column.
            std::mem::swap(&mut current_band, &mut previous_band);
            assert_ne!(previous_minimum_index, CharIx::MAX);
            project_forward_and_expand_band(
                graph,
                &mut current_band,
                previous_minimum_index,
                dynamic_width,
                &mut order,
                &mut out_of_order,
            );
        }
        for &i in order.iter().chain(out_of_order.iter()) {
            current_slice.add_node(i, graph.node_len(i));
        }
        assert!(!order.is_empty() || !out_of_order.is_empty());
        cut_cycles(
            graph,
            j,
            read,
            &profile,
            &mut current_slice,
            &previous_slice,
            &current_band,
            &previous_band,
            &out_of_order,
        );
        // In-order nodes first, then the feedback vertices.
        for &i in order.iter().chain(out_of_order.iter()) {
            debug_assert!(current_band[i as usize]);
            let node_calc = calculate_node(
                graph,
                i,
                j,
                read,
                &profile,
                &mut current_slice,
                &previous_slice,
                &current_band,
                &previous_band,
                false,
            );
            debug_assert!(
                node_calc.min_score >= *result.min_score_per_word_slice.last().unwrap()
            );
            if node_calc.min_score < current_minimum_score {
                current_minimum_score = node_calc.min_score;
                current_minimum_index = node_calc.min_score_index;
            }
            if node_calc.min_score <= current_minimum_score
                && node_calc.min_score_index == graph.node_end[i as usize] - 1
                && current_slice.node(i).last().unwrap().vp & (1 << (W - 1)) != 0
            {
                for &neighbor in &graph.out_neighbors[i as usize] {
                    if read[j + W - 1] == graph.char_at(graph.node_start[neighbor as usize]) {
                        debug_assert!(node_calc.min_score > 0);
                        // Routed one row into the neighbour for band centering;
                        // the minimum index stays on this node.
                        current_minimum_score = node_calc.min_score - 1;
                    }
                }
            }
            result.cells_processed += node_calc.cells_processed;
        }
        for &node in previous_band_order.iter().chain(&previous_band_order_out_of_order) {
            debug_assert!(previous_band[node as usize]);
            previous_band[node as usize] = false;
        }
        assert_ne!(current_minimum_index, CharIx::MAX);
        debug_assert!(
            current_minimum_score >= *result.min_score_per_word_slice.last().unwrap()
        );
        previous_slice = current_slice;
        previous_minimum_index = current_minimum_index;
        result.min_score_per_word_slice.push(current_minimum_score);
        result
            .min_score_index_per_word_slice
            .push(current_minimum_index);
        previous_band_order = order;
        previous_band_order_out_of_order = out_of_order;
        if current_minimum_score > max_score {
            let mut i = j + W;
            while i < read.len() {
                result.min_score_per_word_slice.push(read.len() as Score);
                result.min_score_index_per_word_slice.push(0);
                i += W;
            }
            break;
        }
        j += W;
    }
    if cfg!(debug_assertions) {
        for i in 1..result.min_score_per_word_slice.len() {
            debug_assert!(
                result.min_score_per_word_slice[i] >= result.min_score_per_word_slice[i - 1]
            );
        }
    }
    result
}
