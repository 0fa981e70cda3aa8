//! Per-node evaluation of one 64-row column, and the fixed-point evaluation
//! of feedback cuts.
use crate::graph::AlignmentGraph;
use crate::node_slices::NodeSlices;
use crate::prelude::*;
use sg_bitpacking::{
    assert_slice_correctness, merge_slices, next_slice, EqProfile, WordSlice, W,
};
use sg_types::{CharIx, NodeIx, Score};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy)]
pub struct NodeCalculation {
    pub min_score: Score,
    pub min_score_index: CharIx,
    pub cells_processed: usize,
}

/// A node is a source in this column when no in-neighbour is banded.
fn is_source(
    graph: &AlignmentGraph,
    node: NodeIx,
    current_band: &[bool],
    previous_band: &[bool],
) -> bool {
    graph.in_neighbors[node as usize]
        .iter()
        .all(|&nb| !current_band[nb as usize] && !previous_band[nb as usize])
}

/// The first cell of a non-source node: all in-neighbour last cells merged,
/// then advanced one character.
#[allow(clippy::too_many_arguments)]
fn node_start_slice(
    graph: &AlignmentGraph,
    eq: u64,
    node: NodeIx,
    previous_slice: &NodeSlices,
    current_slice: &NodeSlices,
    current_band: &[bool],
    previous_band: &[bool],
    previous_eq: bool,
) -> WordSlice {
    let mut previous: Option<WordSlice> = None;
    let mut previous_up: Option<WordSlice> = None;
    for &neighbor in &graph.in_neighbors[node as usize] {
        let nb = neighbor as usize;
        if previous_band[nb] {
            let up = *previous_slice.node(neighbor).last().unwrap();
            previous_up = Some(match previous_up {
                None => up,
                Some(acc) => merge_slices(acc, up),
            });
        }
        if previous_band[nb] && !current_band[nb] {
            let competitor = WordSlice::source_from_score(
                previous_slice.node(neighbor).last().unwrap().score_end,
            );
            previous = Some(match previous {
                None => competitor,
                Some(acc) => merge_slices(acc, competitor),
            });
        }
        if !current_band[nb] {
            continue;
        }
        let competitor = *current_slice.node(neighbor).last().unwrap();
        previous = Some(match previous {
            None => competitor,
            Some(acc) => merge_slices(acc, competitor),
        });
    }
    let previous = previous.expect("non-source node with no banded in-neighbour");
    assert_slice_correctness(
        &previous,
        previous_up.as_ref().unwrap_or(&WordSlice::default()),
        previous_up.is_some(),
    );
    next_slice(
        eq,
        previous,
        previous_up.is_some(),
        previous_eq,
        previous_up.unwrap_or_default(),
    )
}

/// Computes the word slices of node `i` for the column starting at read row
/// `j`, and the minimum score seen inside the node.
#[allow(clippy::too_many_arguments)]
pub fn calculate_node(
    graph: &AlignmentGraph,
    i: NodeIx,
    j: usize,
    read: &[u8],
    profile: &EqProfile,
    current_slice: &mut NodeSlices,
    previous_slice: &NodeSlices,
    current_band: &[bool],
    previous_band: &[bool],
    force_source: bool,
) -> NodeCalculation {
    let mut result = NodeCalculation {
        min_score: Score::MAX,
        min_score_index: 0,
        cells_processed: 0,
    };
    let node_start = graph.node_start[i as usize];
    let len = graph.node_len(i);
    let prev_in_band = previous_band[i as usize];
    debug_assert_eq!(current_slice.node(i).len(), len);

    let first = if force_source || is_source(graph, i, current_band, previous_band) {
        if prev_in_band {
            WordSlice::source_from_score(previous_slice.node(i)[0].score_end)
        } else {
            WordSlice::source_without_before(j)
        }
    } else {
        let eq = profile.eq(graph.char_at(node_start));
        let previous_eq = j == 0 || graph.char_at(node_start) == read[j - 1];
        let mut s = node_start_slice(
            graph,
            eq,
            i,
            previous_slice,
            current_slice,
            current_band,
            previous_band,
            previous_eq,
        );
        if prev_in_band && s.score_before_start > previous_slice.node(i)[0].score_end {
            s = merge_slices(
                WordSlice::source_from_score(previous_slice.node(i)[0].score_end),
                s,
            );
        }
        if s.score_before_start > j as Score {
            s = merge_slices(WordSlice::source_without_before(j), s);
        }
        s
    };
    if first.score_end < result.min_score {
        result.min_score = first.score_end;
        result.min_score_index = node_start;
    }
    if prev_in_band {
        assert_slice_correctness(&first, &previous_slice.node(i)[0], true);
    } else {
        assert_slice_correctness(&first, &WordSlice::default(), false);
    }

    {
        let slice = current_slice.node_mut(i);
        slice[0] = first;
        for w in 1..len {
            let pos = node_start + w as CharIx;
            let eq = profile.eq(graph.char_at(pos));
            let previous_eq = j == 0 || graph.char_at(pos) == read[j - 1];
            let up = if prev_in_band {
                previous_slice.node(i)[w - 1]
            } else {
                WordSlice::default()
            };
            let mut s = next_slice(eq, slice[w - 1], prev_in_band, previous_eq, up);
            if prev_in_band {
                let old = previous_slice.node(i)[w];
                if s.score_before_start > old.score_end {
                    s = merge_slices(WordSlice::source_from_score(old.score_end), s);
                }
            }
            if s.score_before_start > j as Score {
                s = merge_slices(WordSlice::source_without_before(j), s);
            }
            debug_assert!(
                prev_in_band
                    || s.score_before_start == j as Score
                    || s.score_before_start == slice[w - 1].score_before_start + 1
            );
            if prev_in_band {
                assert_slice_correctness(&s, &previous_slice.node(i)[w], true);
            } else {
                assert_slice_correctness(&s, &WordSlice::default(), false);
            }
            slice[w] = s;
            if s.score_end <= result.min_score {
                result.min_score = s.score_end;
                result.min_score_index = pos;
            }
        }
    }
    result.cells_processed = len * W;
    result
}

fn set_last_to_source(
    previous_slice: &NodeSlices,
    previous_band: &[bool],
    node: NodeIx,
    slice: &mut [WordSlice],
    j: usize,
) {
    *slice.last_mut().unwrap() = if previous_band[node as usize] {
        WordSlice::source_from_score(previous_slice.node(node).last().unwrap().score_end)
    } else {
        WordSlice::source_without_before(j)
    };
}

/// Marks which cut entries can reach the cut root within the current band,
/// and which of those have no banded in-cut predecessor (and must be forced
/// to source slices).
fn cycle_cut_reachability(
    graph: &AlignmentGraph,
    cycle_cut: NodeIx,
    index: usize,
    current_band: &[bool],
    previous_band: &[bool],
    reachable: &mut [bool],
    source: &mut [bool],
) {
    if reachable[index] {
        return;
    }
    reachable[index] = true;
    let cut = &graph.cuts[cycle_cut as usize];
    debug_assert!(current_band[cut.nodes[index] as usize]);
    if cut.previous_cut[index] {
        return;
    }
    source[index] = true;
    for &other in &cut.predecessors[index] {
        debug_assert!(other > index);
        if previous_band[cut.nodes[other] as usize] {
            source[index] = false;
        }
        if current_band[cut.nodes[other] as usize] {
            cycle_cut_reachability(
                graph,
                cycle_cut,
                other,
                current_band,
                previous_band,
                reachable,
                source,
            );
            source[index] = false;
        }
    }
}

/// Establishes fixed-point last cells for all banded feedback vertices before
/// the main sweep of the column.
///
/// Every banded node's last cell is first preset to a source slice so cut
/// evaluation sees previous-column values for anything not yet computed. Cuts
/// within `2 * W` characters of each other can overwrite each other's slices,
/// so each cut's fixed point is stashed in `correct_end_values` and the last
/// cells are re-preset between cuts, then all fixed points reinstalled.
#[allow(clippy::too_many_arguments)]
pub fn cut_cycles(
    graph: &AlignmentGraph,
    j: usize,
    read: &[u8],
    profile: &EqProfile,
    current_slice: &mut NodeSlices,
    previous_slice: &NodeSlices,
    current_band: &[bool],
    previous_band: &[bool],
    band_order_out_of_order: &BTreeSet<NodeIx>,
) {
    if graph.first_in_order == 0 {
        return;
    }
    for (&node, slice) in current_slice.iter_mut() {
        set_last_to_source(previous_slice, previous_band, node, slice, j);
    }
    let mut correct_end_values: HashMap<NodeIx, WordSlice> = HashMap::default();
    for &order in band_order_out_of_order {
        correct_end_values.insert(
            order,
            WordSlice::new(0, 0, Score::MAX, Score::MAX),
        );
    }
    for &i in band_order_out_of_order {
        if i == 0 {
            continue;
        }
        debug_assert!(current_band[i as usize]);
        debug_assert!(i < graph.first_in_order);
        let cut = &graph.cuts[i as usize];
        debug_assert!(!cut.nodes.is_empty());
        debug_assert_eq!(cut.nodes[0], i);
        let mut reachable = vec![false; cut.nodes.len()];
        let mut source = vec![false; cut.nodes.len()];
        cycle_cut_reachability(
            graph,
            i,
            0,
            current_band,
            previous_band,
            &mut reachable,
            &mut source,
        );
        for index in (0..cut.nodes.len()).rev() {
            if !reachable[index] {
                continue;
            }
            let node = cut.nodes[index];
            if cut.previous_cut[index] {
                // A cut not yet computed this column still holds the sentinel;
                // fall back to its previous-column source value.
                let stashed = correct_end_values[&node];
                let slice = current_slice.node_mut(node);
                if stashed.score_before_start == Score::MAX {
                    set_last_to_source(previous_slice, previous_band, node, slice, j);
                } else {
                    *slice.last_mut().unwrap() = stashed;
                }
            } else {
                calculate_node(
                    graph,
                    node,
                    j,
                    read,
                    profile,
                    current_slice,
                    previous_slice,
                    current_band,
                    previous_band,
                    source[index],
                );
            }
        }
        correct_end_values.insert(i, *current_slice.node(i).last().unwrap());
        for index in 1..cut.nodes.len() {
            let node = cut.nodes[index];
            if !current_band[node as usize] {
                continue;
            }
            let slice = current_slice.node_mut(node);
            set_last_to_source(previous_slice, previous_band, node, slice, j);
        }
        *current_slice.node_mut(i).last_mut().unwrap() = correct_end_values[&i];
    }
    for &i in band_order_out_of_order {
        if i == 0 {
            continue;
        }
        debug_assert!(current_band[i as usize]);
        *current_slice.node_mut(i).last_mut().unwrap() = correct_end_values[&i];
    }
}
