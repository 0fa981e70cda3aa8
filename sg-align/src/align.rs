//! The alignment driver: full-band and seeded entry points, the split
//! alignment around a seed, and assembly of the output records.
use crate::backtrace::estimate_correctness_and_backtrace_biggest_part;
use crate::band::{extended_node_band, full_band};
use crate::graph::AlignmentGraph;
use crate::sweep::column_scores_and_final_position;
use bio::alphabets::dna;
use itertools::Itertools;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sg_bitpacking::W;
use sg_types::{Alignment, CharIx, Edit, Mapping, MatrixPos, NodeIx, ReadIx, Score};
use std::time::Instant;

/// Fraction of the read length the score may reach before the alignment is
/// abandoned.
pub const MAX_SCORE_FRACTION: f64 = 0.4;

/// Banding knobs of one aligner instance.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignerParams {
    /// Dynamic band radius, in characters.
    pub dynamic_width: usize,
    /// Rows aligned against the full graph before dynamic banding begins;
    /// effectively rounded down to a multiple of 64.
    pub dynamic_row_start: usize,
    /// Seed extension radius, in characters.
    pub start_bandwidth: usize,
}

/// A seed hit: an external node id and the read offset it was found at.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedHit {
    pub node_id: u64,
    pub read_offset: usize,
}

/// The four sweep results of one seed, kept for whichever orientation scored
/// lower.
struct TwoDirectionalSplitAlignment {
    sequence_split_index: usize,
    scores_forward: Vec<Score>,
    scores_backward: Vec<Score>,
    min_indices_forward: Vec<CharIx>,
    min_indices_backward: Vec<CharIx>,
    node_size: usize,
    start_extension_width: usize,
}

impl TwoDirectionalSplitAlignment {
    fn min_score(&self) -> Score {
        self.scores_forward.last().unwrap() + self.scores_backward.last().unwrap()
    }

    /// A loose pruning bound for competing seeds: the achieved score plus an
    /// allowance for the seed node and both extension fringes.
    fn max_score(&self) -> Score {
        self.min_score() + (self.node_size + self.start_extension_width * 2) as Score
    }
}

pub struct GraphAligner<'a> {
    graph: &'a AlignmentGraph,
    params: AlignerParams,
}

fn pad_to_word_size(mut sequence: Vec<u8>) -> Vec<u8> {
    let padding = (W - sequence.len() % W) % W;
    sequence.extend(std::iter::repeat(b'N').take(padding));
    sequence
}

fn max_score_for(len: usize) -> Score {
    (len as f64 * MAX_SCORE_FRACTION) as Score
}

impl<'a> GraphAligner<'a> {
    pub fn new(graph: &'a AlignmentGraph, params: AlignerParams) -> Self {
        assert!(graph.finalized);
        GraphAligner { graph, params }
    }

    /// Aligns `read` starting from a full-graph band.
    pub fn align_one_way(&self, name: &str, read: &[u8]) -> Alignment {
        let time_start = Instant::now();
        let band = full_band(self.graph.node_count(), self.params.dynamic_row_start);
        let (score, trace, cells_processed) = self.get_backtrace(read, &band);
        let elapsed = time_start.elapsed().as_millis() as u64;
        if score == Score::MAX {
            return Alignment::empty(elapsed, cells_processed);
        }
        let mut result = self.trace_to_alignment(name, read, score, &trace, cells_processed);
        result.elapsed_ms = time_start.elapsed().as_millis() as u64;
        result
    }

    /// Aligns `read` by splitting it at the best of the given seed hits and
    /// aligning both halves outward from the seed node.
    pub fn align_one_way_with_seeds(
        &self,
        name: &str,
        read: &[u8],
        seed_hits: &[SeedHit],
    ) -> Alignment {
        let time_start = Instant::now();
        assert!(!seed_hits.is_empty());
        let mut best: Option<(TwoDirectionalSplitAlignment, SeedHit)> = None;
        for (i, &seed) in seed_hits.iter().enumerate() {
            debug!(
                "seed {}/{} {},{}",
                i,
                seed_hits.len(),
                seed.node_id,
                seed.read_offset
            );
            let bound = match &best {
                Some((incumbent, _)) => incumbent.max_score(),
                None => max_score_for(read.len()),
            };
            let result = self.get_split_alignment(read, seed, bound);
            if result.min_score() > max_score_for(read.len()) {
                continue;
            }
            if best
                .as_ref()
                .map_or(true, |(incumbent, _)| result.min_score() < incumbent.min_score())
            {
                best = Some((result, seed));
            }
        }
        let Some((best_alignment, _)) = best else {
            let elapsed = time_start.elapsed().as_millis() as u64;
            return Alignment::empty(elapsed, 0);
        };
        let split = best_alignment.sequence_split_index;
        let ((forward_score, forward_trace), (backward_score, backward_trace)) =
            self.get_piecewise_traces_from_split(&best_alignment, read);

        let forward_result = self.trace_to_alignment(
            name,
            &read[split..],
            forward_score,
            &forward_trace,
            0,
        );
        let backward_result = self.trace_to_alignment(
            name,
            &read[..split],
            backward_score,
            &self.reverse_trace(backward_trace),
            0,
        );
        let elapsed = time_start.elapsed().as_millis() as u64;
        if forward_result.failed && backward_result.failed {
            return Alignment::empty(elapsed, 0);
        }
        let mut result = self.merge_alignments(backward_result, forward_result);
        result.elapsed_ms = time_start.elapsed().as_millis() as u64;
        result
    }

    /// Full sweep plus backtrace; `Score::MAX` marks an abandoned alignment.
    fn get_backtrace(
        &self,
        read: &[u8],
        start_band: &[Vec<bool>],
    ) -> (Score, Vec<MatrixPos>, usize) {
        let sequence = pad_to_word_size(read.to_vec());
        let padding = sequence.len() - read.len();
        let max_score = max_score_for(sequence.len());
        let slice = column_scores_and_final_position(
            self.graph,
            &sequence,
            self.params.dynamic_width,
            start_band,
            max_score,
        );
        debug!("score: {}", slice.final_min_score());
        if slice.final_min_score() > max_score {
            return (Score::MAX, Vec::new(), slice.cells_processed);
        }
        let (backtrace_score, mut trace) = estimate_correctness_and_backtrace_biggest_part(
            self.graph,
            &sequence,
            &slice.min_score_per_word_slice,
            &slice.min_score_index_per_word_slice,
        );
        debug_assert!(backtrace_score <= slice.final_min_score());
        while trace
            .last()
            .is_some_and(|p| p.1 as usize > sequence.len() - padding)
        {
            trace.pop();
        }
        let score = self.trace_cost(&trace, &sequence);
        (score, trace, slice.cells_processed)
    }

    /// Edit cost of a trace: one per insertion, per deletion and per
    /// mismatching diagonal; a read `N` matches any graph character.
    fn trace_cost(&self, trace: &[MatrixPos], sequence: &[u8]) -> Score {
        let mut cost = 0;
        for (&prev, &cur) in trace.iter().tuple_windows() {
            if cur.1 == prev.1 + 1 {
                let read_char = sequence[(cur.1 - 1) as usize];
                if cur.0 == prev.0 {
                    // Insertion.
                    cost += 1;
                } else if read_char != b'N' && self.graph.char_at(cur.0) != read_char {
                    cost += 1;
                }
            } else {
                // Deletion.
                debug_assert_eq!(cur.1, prev.1);
                cost += 1;
            }
        }
        cost
    }

    /// Runs the four sweeps of one seed (both halves against both strands'
    /// start bands) and keeps the better orientation.
    fn get_split_alignment(
        &self,
        read: &[u8],
        seed: SeedHit,
        max_score: Score,
    ) -> TwoDirectionalSplitAlignment {
        assert!(seed.read_offset > 0);
        assert!(seed.read_offset < read.len() - 1);
        let backward_part = pad_to_word_size(dna::revcomp(&read[..seed.read_offset]));
        let forward_part = pad_to_word_size(read[seed.read_offset..].to_vec());
        assert!(backward_part.len() + forward_part.len() <= read.len() + 2 * W);

        let forward_node = self.graph.node_lookup[&(seed.node_id * 2)];
        let backward_node = self.graph.node_lookup[&(seed.node_id * 2 + 1)];
        debug_assert_eq!(
            self.graph.node_len(forward_node),
            self.graph.node_len(backward_node)
        );
        let forward_band =
            extended_node_band(self.graph, forward_node, self.params.start_bandwidth);
        let backward_band =
            extended_node_band(self.graph, backward_node, self.params.start_bandwidth);
        let sweep = |part: &[u8], band: &[Vec<bool>]| {
            column_scores_and_final_position(
                self.graph,
                part,
                self.params.dynamic_width,
                band,
                max_score,
            )
        };
        let forward_slice = sweep(&forward_part, &forward_band);
        let backward_slice = sweep(&backward_part, &backward_band);
        let reverse_forward_slice = sweep(&forward_part, &backward_band);
        let reverse_backward_slice = sweep(&backward_part, &forward_band);
        let first_score = forward_slice.final_min_score() + backward_slice.final_min_score();
        let second_score =
            reverse_forward_slice.final_min_score() + reverse_backward_slice.final_min_score();
        debug!("first direction score: {first_score}");
        debug!("other direction score: {second_score}");
        let (forward, backward) = if first_score < second_score {
            (forward_slice, backward_slice)
        } else {
            (reverse_forward_slice, reverse_backward_slice)
        };
        TwoDirectionalSplitAlignment {
            sequence_split_index: seed.read_offset,
            scores_forward: forward.min_score_per_word_slice,
            scores_backward: backward.min_score_per_word_slice,
            min_indices_forward: forward.min_score_index_per_word_slice,
            min_indices_backward: backward.min_score_index_per_word_slice,
            node_size: self.graph.node_len(forward_node),
            start_extension_width: self.params.start_bandwidth,
        }
    }

    /// Viterbi-segments and backtraces both halves, then peels the padded
    /// tails off the traces.
    #[allow(clippy::type_complexity)]
    fn get_piecewise_traces_from_split(
        &self,
        split: &TwoDirectionalSplitAlignment,
        read: &[u8],
    ) -> ((Score, Vec<MatrixPos>), (Score, Vec<MatrixPos>)) {
        let start_part_size = split.sequence_split_index;
        let end_part_size = read.len() - split.sequence_split_index;
        let start_padding = (W - start_part_size % W) % W;
        let end_padding = (W - end_part_size % W) % W;
        let backtrace_sequence = pad_to_word_size(read[split.sequence_split_index..].to_vec());
        let backward_backtrace_sequence =
            pad_to_word_size(dna::revcomp(&read[..split.sequence_split_index]));

        let (forward_distance, mut forward_trace) = estimate_correctness_and_backtrace_biggest_part(
            self.graph,
            &backtrace_sequence,
            &split.scores_forward,
            &split.min_indices_forward,
        );
        debug!("fw distance: {forward_distance}");
        let (backward_distance, mut backward_trace) =
            estimate_correctness_and_backtrace_biggest_part(
                self.graph,
                &backward_backtrace_sequence,
                &split.scores_backward,
                &split.min_indices_backward,
            );
        debug!("bw distance: {backward_distance}");

        while forward_trace
            .last()
            .is_some_and(|p| p.1 as usize > backtrace_sequence.len() - end_padding)
        {
            forward_trace.pop();
        }
        while backward_trace
            .last()
            .is_some_and(|p| p.1 as usize > backward_backtrace_sequence.len() - start_padding)
        {
            backward_trace.pop();
        }
        let forward_score = self.trace_cost(&forward_trace, &backtrace_sequence);
        let backward_score = self.trace_cost(&backward_trace, &backward_backtrace_sequence);
        ((forward_score, forward_trace), (backward_score, backward_trace))
    }

    /// Re-anchors a backward-half trace in forward coordinates: graph
    /// positions map to their reverse-complement twins and row indices flip.
    fn reverse_trace(&self, mut trace: Vec<MatrixPos>) -> Vec<MatrixPos> {
        if trace.is_empty() {
            return trace;
        }
        trace.reverse();
        let second_max = trace[0].1;
        for p in trace.iter_mut() {
            p.0 = self.graph.reverse_position(p.0);
            debug_assert!(p.1 <= second_max);
            p.1 = second_max - p.1;
        }
        trace
    }

    /// Folds a trace into per-node mappings with one edit each.
    ///
    /// A cell consumes the read character below its row when the row advanced
    /// from the previous cell; same-row cells are deletions. The leading
    /// anchor cell (the trace's first entry consumes nothing) and any leading
    /// dummy-node cells only contribute the starting offset; a trace that
    /// never leaves the dummies, or consumes nothing, fails.
    fn trace_to_alignment(
        &self,
        name: &str,
        sequence: &[u8],
        score: Score,
        trace: &[MatrixPos],
        cells_processed: usize,
    ) -> Alignment {
        let graph = self.graph;
        let failed = |cells| Alignment {
            name: name.into(),
            score,
            failed: true,
            cells_processed: cells,
            elapsed_ms: 0,
            path: Vec::new(),
        };
        // Skip leading dummy-start cells.
        let mut pos = 0;
        while pos < trace.len() && graph.node_of(trace[pos].0) == graph.dummy_start {
            pos += 1;
        }
        // The anchor cell consumes nothing; when it belongs to a different
        // node than the first consuming cell it contributes no mapping either.
        if pos == 0
            && trace.len() > 1
            && graph.node_of(trace[1].0) != graph.node_of(trace[0].0)
        {
            pos = 1;
        }
        if pos == trace.len() || graph.node_of(trace[pos].0) == graph.dummy_end {
            return failed(cells_processed);
        }

        struct NodeRun {
            node: NodeIx,
            first_char: CharIx,
            last_char: CharIx,
            // Consumed read rows, inclusive; None while only deletions seen.
            rows: Option<(ReadIx, ReadIx)>,
        }
        let mut result = Alignment {
            name: name.into(),
            score,
            failed: false,
            cells_processed,
            elapsed_ms: 0,
            path: Vec::new(),
        };
        let first_node = graph.node_of(trace[pos].0);
        let mut run = NodeRun {
            node: first_node,
            first_char: trace[pos].0,
            last_char: trace[pos].0,
            rows: None,
        };
        let offset = trace[pos].0 - graph.node_start[first_node as usize];
        let mut close_run = |result: &mut Alignment, run: &NodeRun| {
            let (to_len, edit_sequence) = match run.rows {
                Some((first, last)) => (
                    last - first + 1,
                    String::from_utf8_lossy(&sequence[first as usize..=last as usize])
                        .into_owned(),
                ),
                None => (0, String::new()),
            };
            let rank = result.path.len() as u32;
            result.path.push(Mapping {
                node_id: graph.ids[run.node as usize],
                is_reverse: graph.reverse[run.node as usize],
                offset: if rank == 0 { offset } else { 0 },
                rank,
                edits: vec![Edit {
                    from_len: run.last_char - run.first_char + 1,
                    to_len,
                    sequence: edit_sequence,
                }],
            });
        };
        for t in pos.max(1)..trace.len() {
            let cur = trace[t];
            let node = graph.node_of(cur.0);
            if node == graph.dummy_end {
                break;
            }
            if node != run.node {
                close_run(&mut result, &run);
                run = NodeRun {
                    node,
                    first_char: cur.0,
                    last_char: cur.0,
                    rows: None,
                };
            } else {
                run.last_char = run.last_char.max(cur.0);
            }
            // Row advanced: this cell consumes the read character below it.
            if cur.1 == trace[t - 1].1 + 1 {
                let consumed = cur.1 - 1;
                run.rows = Some(match run.rows {
                    None => (consumed, consumed),
                    Some((first, _)) => (first, consumed),
                });
            }
        }
        close_run(&mut result, &run);
        if result.path.iter().all(|m| m.edits.iter().all(|e| e.to_len == 0)) {
            return failed(cells_processed);
        }
        result
    }

    /// Concatenates the backward and forward half records, dropping the
    /// duplicated junction mapping when both halves end on the same node.
    fn merge_alignments(&self, first: Alignment, second: Alignment) -> Alignment {
        assert!(!first.failed || !second.failed);
        if first.failed {
            return second;
        }
        if second.failed {
            return first;
        }
        let first_end = first.path.last().unwrap().clone();
        let second_start = &second.path[0];
        let start = if first_end.node_id == second_start.node_id
            && first_end.is_reverse == second_start.is_reverse
        {
            1
        } else {
            let from = self.graph.node_lookup
                [&(first_end.node_id * 2 + first_end.is_reverse as u64)];
            let to = self.graph.node_lookup
                [&(second_start.node_id * 2 + second_start.is_reverse as u64)];
            if !self.graph.out_neighbors[from as usize].contains(&to) {
                warn!(
                    "piecewise alignments can't be merged! first end: {} {} second start: {} {}",
                    first_end.node_id,
                    if first_end.is_reverse { "-" } else { "+" },
                    second_start.node_id,
                    if second_start.is_reverse { "-" } else { "+" },
                );
            }
            0
        };
        let mut result = first;
        result.score += second.score;
        result.cells_processed += second.cells_processed;
        result.elapsed_ms += second.elapsed_ms;
        result.path.extend(second.path.into_iter().skip(start));
        result
    }
}
