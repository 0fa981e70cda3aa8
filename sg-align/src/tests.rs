//! End-to-end scenarios over small graphs.
use crate::band::full_band;
use crate::sweep::column_scores_and_final_position;
use crate::{AlignerParams, AlignmentGraph, GraphAligner, SeedHit};
use bio::alphabets::dna;
use itertools::Itertools;
use rand::Rng;
use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};
use sg_types::Score;

fn params() -> AlignerParams {
    AlignerParams {
        dynamic_width: 64,
        dynamic_row_start: 64,
        start_bandwidth: 100,
    }
}

/// A linear chain of `n` nodes, all carrying `label`.
fn chain_graph(n: u64, label: &[u8]) -> AlignmentGraph {
    let mut g = AlignmentGraph::new();
    for i in 0..n {
        g.add_node(i, label);
    }
    for i in 1..n {
        g.add_edge(i - 1, i);
    }
    g.finalize();
    g
}

#[test]
fn exact_chain_read_scores_zero() {
    let graph = chain_graph(10, b"ACGT");
    let aligner = GraphAligner::new(&graph, params());
    let read = b"ACGT".repeat(10);
    let result = aligner.align_one_way("chain", &read);
    assert!(!result.failed);
    assert_eq!(result.score, 0);
    assert_eq!(result.path.len(), 10);
    for mapping in &result.path {
        assert_eq!(mapping.edits.len(), 1);
        assert_eq!(mapping.edits[0].from_len, 4);
        assert_eq!(mapping.edits[0].to_len, 4);
    }
    // The trace covers every read character exactly once.
    let total: u32 = result
        .path
        .iter()
        .flat_map(|m| &m.edits)
        .map(|e| e.to_len)
        .sum();
    assert_eq!(total as usize, read.len());
    // Consecutive mappings walk the chain.
    for (a, b) in result.path.iter().tuple_windows() {
        assert_eq!(a.is_reverse, b.is_reverse);
        assert_eq!(b.node_id.abs_diff(a.node_id), 1);
    }
}

#[test]
fn single_substitution_scores_one() {
    let graph = chain_graph(10, b"ACGT");
    let aligner = GraphAligner::new(&graph, params());
    let mut read = b"ACGT".repeat(10);
    // Read position 18 carries a G in the chain spelling.
    assert_eq!(read[18], b'G');
    read[18] = b'C';
    let result = aligner.align_one_way("sub", &read);
    assert!(!result.failed);
    assert_eq!(result.score, 1);
    assert_eq!(result.path.len(), 10);
    let total: u32 = result
        .path
        .iter()
        .flat_map(|m| &m.edits)
        .map(|e| e.to_len)
        .sum();
    assert_eq!(total as usize, read.len());
}

#[test]
fn inserted_wildcard_still_costs_one() {
    let graph = chain_graph(10, b"ACGT");
    let aligner = GraphAligner::new(&graph, params());
    // An extra N with no graph counterpart: a wildcard matches anything on
    // the diagonal, but carrying it still takes one insertion.
    let mut read = b"ACGT".repeat(10);
    read.insert(20, b'N');
    let result = aligner.align_one_way("ins", &read);
    assert!(!result.failed);
    assert_eq!(result.score, 1);
    let total: u32 = result
        .path
        .iter()
        .flat_map(|m| &m.edits)
        .map(|e| e.to_len)
        .sum();
    assert_eq!(total as usize, read.len());
}

fn diamond_graph() -> AlignmentGraph {
    let mut g = AlignmentGraph::new();
    g.add_node(0, b"ACGT");
    g.add_node(1, b"AA");
    g.add_node(2, b"GG");
    g.add_node(3, &b"ACGT".repeat(16));
    g.add_edge(0, 1);
    g.add_edge(0, 2);
    g.add_edge(1, 3);
    g.add_edge(2, 3);
    g.finalize();
    g
}

#[test]
fn diamond_read_picks_its_branch() {
    let graph = diamond_graph();
    let aligner = GraphAligner::new(&graph, params());

    let result = aligner.align_one_way("aa", b"AA");
    assert!(!result.failed);
    assert_eq!(result.score, 0);
    assert!(result.path.iter().any(|m| m.node_id == 1));
    assert!(result.path.iter().all(|m| m.node_id != 2));

    let result = aligner.align_one_way("gg", b"GG");
    assert!(!result.failed);
    assert_eq!(result.score, 0);
    assert!(result.path.iter().any(|m| m.node_id == 2));
    assert!(result.path.iter().all(|m| m.node_id != 1));
}

#[test]
fn diamond_mismatching_read_costs_one() {
    let graph = diamond_graph();
    let aligner = GraphAligner::new(&graph, params());
    let result = aligner.align_one_way("ag", b"AG");
    assert!(!result.failed);
    assert_eq!(result.score, 1);
}

#[test]
fn cycle_read_converges_to_zero() {
    let mut g = AlignmentGraph::new();
    g.add_node(0, b"ACGTACGT");
    g.add_node(1, b"TGCATGCA");
    g.add_edge(0, 1);
    g.add_edge(1, 0);
    g.finalize();
    assert!(g.first_in_order > 1);
    let aligner = GraphAligner::new(&g, params());
    let read = b"ACGTACGTTGCATGCA".repeat(5);
    let result = aligner.align_one_way("loops", &read);
    assert!(!result.failed);
    assert_eq!(result.score, 0);
    let total: u32 = result
        .path
        .iter()
        .flat_map(|m| &m.edits)
        .map(|e| e.to_len)
        .sum();
    assert_eq!(total as usize, read.len());
    // The path winds around the cycle, alternating the two nodes.
    assert_eq!(result.path.len(), 10);
    for (a, b) in result.path.iter().tuple_windows() {
        assert_ne!(a.node_id, b.node_id);
    }
}

#[test]
fn seeded_split_alignment_stitches_both_halves() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed5);
    let labels: Vec<Vec<u8>> = (0..100)
        .map(|_| (0..20).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect())
        .collect();
    let mut g = AlignmentGraph::new();
    for (i, label) in labels.iter().enumerate() {
        g.add_node(i as u64, label);
    }
    for i in 1..100 {
        g.add_edge(i - 1, i);
    }
    g.finalize();
    let aligner = GraphAligner::new(&g, params());
    let read: Vec<u8> = labels.concat();
    assert_eq!(read.len(), 2000);
    let seeds = [SeedHit {
        node_id: 50,
        read_offset: 1000,
    }];
    let result = aligner.align_one_way_with_seeds("seeded", &read, &seeds);
    assert!(!result.failed);
    assert!(result.score <= (read.len() as f64 * 0.4) as Score);
    assert!(!result.path.is_empty());
    // No duplicated junction entry, and the path never leaves the chain.
    for (a, b) in result.path.iter().tuple_windows() {
        assert!(
            (a.node_id, a.is_reverse) != (b.node_id, b.is_reverse),
            "duplicated junction node"
        );
        assert_eq!(b.node_id.abs_diff(a.node_id), 1);
    }
}

#[test]
fn unrelated_read_fails_with_sentinel_padding() {
    // The chain spells A/T only; the read C/G only, so nothing ever matches.
    let graph = chain_graph(10, b"ATTA");
    let read = b"CG".repeat(128);
    let padded = read.clone();
    let max_score = (padded.len() as f64 * 0.4) as Score;
    let band = full_band(graph.node_count(), 64);
    let slice = column_scores_and_final_position(&graph, &padded, 64, &band, max_score);
    // Cut off after the second column; the rest are sentinels.
    assert_eq!(
        slice.min_score_per_word_slice,
        vec![0, 64, 128, 256, 256]
    );
    assert_eq!(slice.min_score_index_per_word_slice[3], 0);
    assert_eq!(slice.min_score_index_per_word_slice[4], 0);

    let aligner = GraphAligner::new(&graph, params());
    let result = aligner.align_one_way("garbage", &read);
    assert!(result.failed);
    assert_eq!(result.score, Score::MAX);
    assert!(result.path.is_empty());
}

#[test]
fn reverse_complement_symmetry() {
    let graph = chain_graph(32, b"AACG");
    let aligner = GraphAligner::new(&graph, params());
    let read = b"AACG".repeat(32);
    let forward = aligner.align_one_way("fw", &read);
    let backward = aligner.align_one_way("bw", &dna::revcomp(&read));
    assert!(!forward.failed);
    assert!(!backward.failed);
    assert_eq!(forward.score, 0);
    assert_eq!(forward.score, backward.score);
    assert_eq!(forward.path.len(), backward.path.len());
    // The reverse read walks the same nodes backwards on the other strand.
    for (f, b) in forward
        .path
        .iter()
        .zip(backward.path.iter().rev())
    {
        assert_eq!(f.node_id, b.node_id);
        assert_ne!(f.is_reverse, b.is_reverse);
    }
}

#[test]
fn minima_are_non_decreasing() {
    let graph = chain_graph(10, b"ACGT");
    let read = b"ACGT".repeat(10);
    let mut padded = read.clone();
    padded.extend(std::iter::repeat(b'N').take(24));
    let band = full_band(graph.node_count(), 64);
    let slice = column_scores_and_final_position(&graph, &padded, 64, &band, 1000);
    for (a, b) in slice.min_score_per_word_slice.iter().tuple_windows() {
        assert!(a <= b);
    }
    assert_eq!(slice.min_score_per_word_slice[0], 0);
}
