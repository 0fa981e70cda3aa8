//! Selection of the nodes evaluated per 64-row column.
use crate::graph::AlignmentGraph;
use crate::prelude::*;
use sg_bitpacking::W;
use sg_types::{CharIx, NodeIx};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

/// A queue entry during band expansion: a distance measured at one of the two
/// extremes of a node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct NodePosWithDistance {
    distance: usize,
    node: NodeIx,
    end: bool,
}

/// The full-graph band used for the first `dynamic_row_start / W` columns.
pub fn full_band(node_count: usize, dynamic_row_start: usize) -> Vec<Vec<bool>> {
    vec![vec![true; node_count]; dynamic_row_start / W]
}

/// Splits the banded nodes by evaluation class: in topological order, or in a
/// feedback cut.
pub fn band_order(
    graph: &AlignmentGraph,
    band: &[bool],
) -> (BTreeSet<NodeIx>, BTreeSet<NodeIx>) {
    let mut in_order = BTreeSet::new();
    let mut out_of_order = BTreeSet::new();
    for i in 0..graph.first_in_order {
        if band[i as usize] {
            out_of_order.insert(i);
        }
    }
    for i in graph.first_in_order..band.len() as NodeIx {
        if band[i as usize] {
            in_order.insert(i);
        }
    }
    (in_order, out_of_order)
}

/// Dijkstra outward from `startpositions` through graph edges, bounded by
/// `dynamic_width` characters, marking every reached node in `band` and the
/// order sets.
fn expand_band_from_positions(
    graph: &AlignmentGraph,
    band: &mut [bool],
    startpositions: impl IntoIterator<Item = CharIx>,
    dynamic_width: usize,
    in_order: &mut BTreeSet<NodeIx>,
    out_of_order: &mut BTreeSet<NodeIx>,
) {
    let mut mark = |band: &mut [bool], node: NodeIx| {
        band[node as usize] = true;
        if node < graph.first_in_order {
            out_of_order.insert(node);
        } else {
            in_order.insert(node);
        }
    };
    let mut queue: BinaryHeap<Reverse<NodePosWithDistance>> = BinaryHeap::new();
    for startpos in startpositions {
        let node = graph.node_of(startpos);
        mark(band, node);
        let start = graph.node_start[node as usize];
        let end = graph.node_end[node as usize];
        debug_assert!(start <= startpos && startpos < end);
        queue.push(Reverse(NodePosWithDistance {
            node,
            end: false,
            distance: (startpos - start) as usize,
        }));
        queue.push(Reverse(NodePosWithDistance {
            node,
            end: true,
            distance: (end - startpos - 1) as usize,
        }));
    }
    let mut distance_at_start: HashMap<NodeIx, usize> = HashMap::default();
    let mut distance_at_end: HashMap<NodeIx, usize> = HashMap::default();
    while let Some(Reverse(top)) = queue.pop() {
        if top.distance > dynamic_width {
            continue;
        }
        let seen = if top.end {
            &mut distance_at_end
        } else {
            &mut distance_at_start
        };
        match seen.get(&top.node) {
            Some(&d) if d <= top.distance => continue,
            _ => {
                seen.insert(top.node, top.distance);
            }
        }
        mark(band, top.node);
        let size = graph.node_len(top.node);
        if top.end {
            queue.push(Reverse(NodePosWithDistance {
                node: top.node,
                end: false,
                distance: top.distance + size - 1,
            }));
            for &neighbor in &graph.out_neighbors[top.node as usize] {
                queue.push(Reverse(NodePosWithDistance {
                    node: neighbor,
                    end: false,
                    distance: top.distance + 1,
                }));
            }
        } else {
            queue.push(Reverse(NodePosWithDistance {
                node: top.node,
                end: true,
                distance: top.distance + size - 1,
            }));
            for &neighbor in &graph.in_neighbors[top.node as usize] {
                queue.push(Reverse(NodePosWithDistance {
                    node: neighbor,
                    end: true,
                    distance: top.distance + 1,
                }));
            }
        }
    }
}

/// The dynamic band for the next column: the previous column's minimum
/// position, its forward projection by one slice of rows, and everything
/// within `dynamic_width` characters of those.
pub fn project_forward_and_expand_band(
    graph: &AlignmentGraph,
    band: &mut [bool],
    previous_minimum_index: CharIx,
    dynamic_width: usize,
    in_order: &mut BTreeSet<NodeIx>,
    out_of_order: &mut BTreeSet<NodeIx>,
) {
    assert!((previous_minimum_index as usize) < graph.seq.len());
    let node = graph.node_of(previous_minimum_index);
    let mut positions = BTreeSet::from([previous_minimum_index]);
    positions = graph.project_forward(&positions, W);
    positions.insert(previous_minimum_index);
    band[node as usize] = true;
    if node < graph.first_in_order {
        out_of_order.insert(node);
    } else {
        in_order.insert(node);
    }
    expand_band_from_positions(
        graph,
        band,
        positions,
        dynamic_width,
        in_order,
        out_of_order,
    );
}

/// The seed start band: every node within `start_extension_width` characters
/// of `node_index` along out-edges.
pub fn extended_node_band(
    graph: &AlignmentGraph,
    node_index: NodeIx,
    start_extension_width: usize,
) -> Vec<Vec<bool>> {
    let mut band = vec![false; graph.node_count()];
    let mut visited: HashSet<NodeIx> = HashSet::default();
    let mut queue: BinaryHeap<Reverse<NodePosWithDistance>> = BinaryHeap::new();
    queue.push(Reverse(NodePosWithDistance {
        node: node_index,
        end: true,
        distance: 0,
    }));
    while let Some(Reverse(top)) = queue.pop() {
        if top.distance > start_extension_width {
            continue;
        }
        if !visited.insert(top.node) {
            continue;
        }
        band[top.node as usize] = true;
        let new_distance = top.distance + graph.node_len(top.node);
        for &neighbor in &graph.out_neighbors[top.node as usize] {
            queue.push(Reverse(NodePosWithDistance {
                node: neighbor,
                end: true,
                distance: new_distance,
            }));
        }
    }
    vec![band]
}
