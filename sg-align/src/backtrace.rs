//! Breadth-first reconstruction of a minimum-edit path through the implicit
//! edit graph, from a chosen endpoint back to the start of the backtraced
//! rows.
use crate::graph::AlignmentGraph;
use crate::prelude::*;
use crate::viterbi::{estimate_correct_alignment_viterbi, largest_contiguous_block};
use sg_bitpacking::W;
use sg_types::{CharIx, MatrixPos, ReadIx, Score};

/// A visited cell plus the index of the cell it was expanded from.
struct ExpandoCell {
    position: MatrixPos,
    backtrace_index: usize,
}

/// Runs the correctness Viterbi over the per-column minima, picks the largest
/// likely-correct run of columns, and backtraces it. Returns the backtrace
/// distance and the trace in absolute read rows; an all-false segmentation
/// yields an empty trace with the read length as score.
pub fn estimate_correctness_and_backtrace_biggest_part(
    graph: &AlignmentGraph,
    read: &[u8],
    min_score_per_word_slice: &[Score],
    min_score_index_per_word_slice: &[CharIx],
) -> (Score, Vec<MatrixPos>) {
    let correct_parts = estimate_correct_alignment_viterbi(min_score_per_word_slice);
    let Some((start, end)) = largest_contiguous_block(&correct_parts) else {
        return (read.len() as Score, Vec::new());
    };
    assert!(end < min_score_index_per_word_slice.len() - 1);
    assert_eq!(
        min_score_index_per_word_slice.len(),
        min_score_per_word_slice.len()
    );
    let end_position = MatrixPos(
        min_score_index_per_word_slice[end + 1],
        ((end - start + 1) * W) as ReadIx,
    );
    assert!(start * W + (end_position.1 as usize) <= read.len());
    let part = &read[start * W..(end + 1) * W];
    let partials = &min_score_per_word_slice[start..end + 2];
    let (score, mut trace) = backtrace(graph, end_position, part, partials);
    assert!(!trace.is_empty());
    if start > 0 {
        for p in trace.iter_mut() {
            p.1 += (start * W) as ReadIx;
        }
    }
    (score, trace)
}

/// Ordered BFS from `end_position` through diagonal, vertical and horizontal
/// predecessors, pruned per column by the sweep's minima. Cells at the
/// current distance and at distance plus one live in two swapped queues.
/// Diagonal steps are free on a match or a read `N`; insertions and
/// deletions always cost one. The padded tail still rides for free on the
/// wildcard diagonals through the end sentinel's self-loop.
///
/// The returned trace is monotone in the read row; its first entry is the
/// row the backtraced range starts at and consumes no read character.
fn backtrace(
    graph: &AlignmentGraph,
    end_position: MatrixPos,
    read_part: &[u8],
    min_score_per_word_slice: &[Score],
) -> (Score, Vec<MatrixPos>) {
    assert!(min_score_per_word_slice.len() * W > read_part.len());
    let score_at_end = *min_score_per_word_slice.last().unwrap();
    let mut current_distance: Score = 0;
    let mut visited_expandos: Vec<ExpandoCell> = Vec::new();
    let mut current_queue = vec![ExpandoCell {
        position: end_position,
        backtrace_index: 0,
    }];
    let mut plus_one_queue: Vec<ExpandoCell> = Vec::new();
    let mut visited_cells: HashSet<MatrixPos> = HashSet::default();

    loop {
        if current_queue.is_empty() {
            assert!(!plus_one_queue.is_empty());
            std::mem::swap(&mut current_queue, &mut plus_one_queue);
            current_distance += 1;
            debug_assert!(current_distance <= score_at_end);
        }
        let current = current_queue.pop().unwrap();
        let MatrixPos(w, j) = current.position;
        if j == 0 {
            visited_expandos.push(current);
            break;
        }
        let slice_index = ((j - 1) as usize) / W;
        debug_assert!(slice_index < min_score_per_word_slice.len());
        let max_distance_here = score_at_end - min_score_per_word_slice[slice_index];
        if current_distance > max_distance_here {
            continue;
        }
        if !visited_cells.insert(current.position) {
            continue;
        }
        visited_expandos.push(current);
        let node_index = graph.node_of(w);
        let backtrace_index = visited_expandos.len() - 1;
        let read_char = read_part[(j - 1) as usize];
        let diagonal_match = read_char == b'N' || graph.char_at(w) == read_char;
        plus_one_queue.push(ExpandoCell {
            position: MatrixPos(w, j - 1),
            backtrace_index,
        });
        if w == graph.node_start[node_index as usize] {
            for &neighbor in &graph.in_neighbors[node_index as usize] {
                let u = graph.node_end[neighbor as usize] - 1;
                plus_one_queue.push(ExpandoCell {
                    position: MatrixPos(u, j),
                    backtrace_index,
                });
                let cell = ExpandoCell {
                    position: MatrixPos(u, j - 1),
                    backtrace_index,
                };
                if diagonal_match {
                    current_queue.push(cell);
                } else {
                    plus_one_queue.push(cell);
                }
            }
        } else {
            let u = w - 1;
            plus_one_queue.push(ExpandoCell {
                position: MatrixPos(u, j),
                backtrace_index,
            });
            let cell = ExpandoCell {
                position: MatrixPos(u, j - 1),
                backtrace_index,
            };
            if diagonal_match {
                current_queue.push(cell);
            } else {
                plus_one_queue.push(cell);
            }
        }
    }
    log::trace!("backtrace visited {} cells", visited_cells.len());
    debug_assert!(current_distance <= score_at_end);

    // The chain from the first row-zero cell back to the endpoint is already
    // monotone in the read row.
    let mut index = visited_expandos.len() - 1;
    let mut result = Vec::new();
    while index > 0 {
        result.push(visited_expandos[index].position);
        debug_assert!(visited_expandos[index].backtrace_index < index);
        index = visited_expandos[index].backtrace_index;
    }
    result.push(visited_expandos[0].position);
    (current_distance, result)
}
