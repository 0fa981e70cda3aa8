//! The finalised sequence graph consumed by the aligner.
//!
//! Every external node id owns two internal nodes, one per strand: the
//! forward node under key `2 * id` and the reverse-complement node under
//! `2 * id + 1`. Edges are mirrored onto the reverse strand. Finalisation
//! reorders the nodes so that feedback vertices (one per cycle, picked
//! greedily per strongly connected component) come first, the rest in
//! topological order, and precomputes for each feedback vertex the local
//! cycle cut the column sweep needs to evaluate cyclic regions.
use crate::prelude::*;
use bio::alphabets::dna;
use sg_types::{CharIx, NodeIx};
use std::collections::BTreeSet;

use sg_bitpacking::W;

/// The precomputed unrolling of the region behind one feedback vertex.
///
/// `nodes[0]` is the feedback vertex itself; deeper entries are copies of
/// the nodes reachable backwards from it, so values can propagate around a
/// cycle several times within one column. `predecessors[k]` indexes the
/// entries for the in-neighbours of `nodes[k]` and only ever points at
/// larger indices, so a reverse sweep over `nodes` evaluates predecessors
/// first. Feedback-vertex copies at the unroll depth cap of `2 * W`
/// characters are `previous_cut`: their value is pinned to the owning cut's
/// fixed point instead of being recomputed.
#[derive(Debug, Clone, Default)]
pub struct CycleCut {
    pub nodes: Vec<NodeIx>,
    pub previous_cut: Vec<bool>,
    pub predecessors: Vec<Vec<usize>>,
}

#[derive(Debug, Default)]
pub struct AlignmentGraph {
    /// Concatenated node labels.
    pub seq: Vec<u8>,
    pub node_start: Vec<CharIx>,
    pub node_end: Vec<CharIx>,
    /// External id of each node.
    pub ids: Vec<u64>,
    pub reverse: Vec<bool>,
    pub in_neighbors: Vec<Vec<NodeIx>>,
    pub out_neighbors: Vec<Vec<NodeIx>>,
    /// Owning node of each character position.
    pub index_to_node: Vec<NodeIx>,
    /// Bigraph key (`2 * id + strand`) to node index.
    pub node_lookup: HashMap<u64, NodeIx>,
    /// The node holding the reverse complement of each node.
    pub reverse_pair: Vec<NodeIx>,
    /// Nodes `[0, first_in_order)` are the dummy start plus the feedback
    /// vertices; nodes from `first_in_order` on are topologically ordered.
    pub first_in_order: NodeIx,
    /// Indexed by node; meaningful for feedback vertices only.
    pub cuts: Vec<CycleCut>,
    pub dummy_start: NodeIx,
    pub dummy_end: NodeIx,
    pub finalized: bool,

    // Pre-finalisation storage.
    build_seqs: Vec<Vec<u8>>,
    build_keys: Vec<u64>,
    build_out: Vec<BTreeSet<usize>>,
    build_in: Vec<BTreeSet<usize>>,
    build_lookup: HashMap<u64, usize>,
}

const DUMMY_ID: u64 = u64::MAX;

impl AlignmentGraph {
    pub fn new() -> Self {
        AlignmentGraph::default()
    }

    /// Adds one external node: a forward-strand node under key `2 * id` and
    /// its reverse complement under `2 * id + 1`.
    pub fn add_node(&mut self, id: u64, sequence: &[u8]) {
        assert!(!self.finalized);
        assert!(!sequence.is_empty());
        assert!(!self.build_lookup.contains_key(&(2 * id)), "duplicate node id {id}");
        for (key, seq) in [
            (2 * id, sequence.to_vec()),
            (2 * id + 1, dna::revcomp(sequence)),
        ] {
            let ix = self.build_seqs.len();
            self.build_seqs.push(seq);
            self.build_keys.push(key);
            self.build_out.push(BTreeSet::new());
            self.build_in.push(BTreeSet::new());
            self.build_lookup.insert(key, ix);
        }
    }

    /// Adds a forward-strand edge `from → to` and its mirror on the reverse
    /// strand.
    pub fn add_edge(&mut self, from: u64, to: u64) {
        assert!(!self.finalized);
        let f = self.build_lookup[&(2 * from)];
        let t = self.build_lookup[&(2 * to)];
        let fr = self.build_lookup[&(2 * from + 1)];
        let tr = self.build_lookup[&(2 * to + 1)];
        self.build_out[f].insert(t);
        self.build_in[t].insert(f);
        self.build_out[tr].insert(fr);
        self.build_in[fr].insert(tr);
    }

    /// Freezes the graph: adds the dummy sentinels, reorders the nodes, and
    /// precomputes the cycle cuts.
    pub fn finalize(&mut self) {
        assert!(!self.finalized);
        let real = self.build_seqs.len();

        // Dummy sentinels, attached to the sources and sinks.
        let dummy_start_old = real;
        let dummy_end_old = real + 1;
        for _ in 0..2 {
            self.build_seqs.push(b"-".to_vec());
            self.build_keys.push(DUMMY_ID);
            self.build_out.push(BTreeSet::new());
            self.build_in.push(BTreeSet::new());
        }
        for i in 0..real {
            if self.build_in[i].is_empty() {
                self.build_out[dummy_start_old].insert(i);
                self.build_in[i].insert(dummy_start_old);
            }
            if self.build_out[i].is_empty() {
                self.build_out[i].insert(dummy_end_old);
                self.build_in[dummy_end_old].insert(i);
            }
        }
        // The end sentinel loops on itself so a read's `N` tail padding can
        // keep matching past the last real node.
        self.build_out[dummy_end_old].insert(dummy_end_old);
        self.build_in[dummy_end_old].insert(dummy_end_old);
        let n = self.build_seqs.len();

        let feedback = self.greedy_feedback_vertices(n);
        let in_feedback: HashSet<usize> = feedback.iter().copied().collect();

        // New order: dummy start, feedback vertices, then a topological order
        // of the remaining nodes.
        let mut order = vec![dummy_start_old];
        order.extend(feedback.iter().copied());
        self.first_in_order = order.len() as NodeIx;
        order.extend(self.topological_order(n, dummy_start_old, &in_feedback));
        assert_eq!(order.len(), n);

        let mut old_to_new = vec![0 as NodeIx; n];
        for (new, &old) in order.iter().enumerate() {
            old_to_new[old] = new as NodeIx;
        }

        self.seq.clear();
        for &old in &order {
            self.node_start.push(self.seq.len() as CharIx);
            self.seq.extend_from_slice(&self.build_seqs[old]);
            self.node_end.push(self.seq.len() as CharIx);
            self.ids.push(if self.build_keys[old] == DUMMY_ID {
                DUMMY_ID
            } else {
                self.build_keys[old] / 2
            });
            self.reverse
                .push(self.build_keys[old] != DUMMY_ID && self.build_keys[old] % 2 == 1);
            let mut outs: Vec<NodeIx> =
                self.build_out[old].iter().map(|&o| old_to_new[o]).collect();
            outs.sort_unstable();
            self.out_neighbors.push(outs);
            let mut ins: Vec<NodeIx> =
                self.build_in[old].iter().map(|&o| old_to_new[o]).collect();
            ins.sort_unstable();
            self.in_neighbors.push(ins);
        }
        for i in 0..n {
            for _ in self.node_start[i]..self.node_end[i] {
                self.index_to_node.push(i as NodeIx);
            }
        }
        self.node_lookup = self
            .build_lookup
            .iter()
            .map(|(&key, &old)| (key, old_to_new[old]))
            .collect();
        self.reverse_pair = (0..n as NodeIx)
            .map(|i| {
                let key = self.build_keys[order[i as usize]];
                if key == DUMMY_ID {
                    i
                } else {
                    self.node_lookup[&(key ^ 1)]
                }
            })
            .collect();
        self.dummy_start = old_to_new[dummy_start_old];
        self.dummy_end = old_to_new[dummy_end_old];
        assert_eq!(self.dummy_start, 0);

        let mut cuts = vec![CycleCut::default(); n];
        for root in 1..self.first_in_order {
            cuts[root as usize] = self.build_cut(root);
        }
        self.cuts = cuts;

        self.build_seqs = Vec::new();
        self.build_keys = Vec::new();
        self.build_out = Vec::new();
        self.build_in = Vec::new();
        self.build_lookup = HashMap::default();
        self.finalized = true;
    }

    pub fn node_count(&self) -> usize {
        self.node_start.len()
    }

    pub fn node_len(&self, i: NodeIx) -> usize {
        (self.node_end[i as usize] - self.node_start[i as usize]) as usize
    }

    pub fn char_at(&self, p: CharIx) -> u8 {
        self.seq[p as usize]
    }

    pub fn node_of(&self, p: CharIx) -> NodeIx {
        self.index_to_node[p as usize]
    }

    /// The character positions reachable by walking exactly `distance`
    /// characters forward from `positions`.
    pub fn project_forward(
        &self,
        positions: &BTreeSet<CharIx>,
        distance: usize,
    ) -> BTreeSet<CharIx> {
        let mut result = BTreeSet::new();
        let mut visited: HashSet<(NodeIx, usize)> = HashSet::default();
        let mut stack: Vec<(CharIx, usize)> =
            positions.iter().map(|&p| (p, distance)).collect();
        while let Some((pos, remaining)) = stack.pop() {
            let node = self.node_of(pos);
            let available = (self.node_end[node as usize] - pos - 1) as usize;
            if remaining <= available {
                result.insert(pos + remaining as CharIx);
                continue;
            }
            let after_node = remaining - available - 1;
            for &nb in &self.out_neighbors[node as usize] {
                if visited.insert((nb, after_node)) {
                    stack.push((self.node_start[nb as usize], after_node));
                }
            }
        }
        result
    }

    /// The reverse-complement twin of a character position.
    pub fn reverse_position(&self, pos: CharIx) -> CharIx {
        let node = self.node_of(pos);
        let partner = self.reverse_pair[node as usize];
        let offset = pos - self.node_start[node as usize];
        let len = self.node_end[node as usize] - self.node_start[node as usize];
        self.node_start[partner as usize] + (len - 1 - offset)
    }

    /// Strongly connected components, Kosaraju over the build adjacency
    /// restricted to `alive`.
    fn restricted_sccs(&self, alive: &[usize]) -> Vec<Vec<usize>> {
        let alive_set: HashSet<usize> = alive.iter().copied().collect();
        let mut finish_order = Vec::with_capacity(alive.len());
        let mut seen: HashSet<usize> = HashSet::default();
        for &start in alive {
            if seen.contains(&start) {
                continue;
            }
            // Iterative DFS recording finish order.
            let mut stack = vec![(start, false)];
            while let Some((v, expanded)) = stack.pop() {
                if expanded {
                    finish_order.push(v);
                    continue;
                }
                if !seen.insert(v) {
                    continue;
                }
                stack.push((v, true));
                for &w in &self.build_out[v] {
                    if alive_set.contains(&w) && !seen.contains(&w) {
                        stack.push((w, false));
                    }
                }
            }
        }
        let mut components = Vec::new();
        let mut assigned: HashSet<usize> = HashSet::default();
        for &start in finish_order.iter().rev() {
            if assigned.contains(&start) {
                continue;
            }
            let mut component = Vec::new();
            let mut stack = vec![start];
            assigned.insert(start);
            while let Some(v) = stack.pop() {
                component.push(v);
                for &w in &self.build_in[v] {
                    if alive_set.contains(&w) && assigned.insert(w) {
                        stack.push(w);
                    }
                }
            }
            components.push(component);
        }
        components
    }

    /// One vertex per remaining cycle, chosen greedily by degree.
    fn greedy_feedback_vertices(&self, n: usize) -> Vec<usize> {
        let mut feedback = Vec::new();
        let all: Vec<usize> = (0..n).collect();
        let mut work: Vec<Vec<usize>> = self
            .restricted_sccs(&all)
            .into_iter()
            .filter(|c| self.has_cycle(c))
            .collect();
        while let Some(component) = work.pop() {
            let &v = component
                .iter()
                .max_by_key(|&&v| self.build_out[v].len() + self.build_in[v].len())
                .unwrap();
            feedback.push(v);
            let rest: Vec<usize> = component.into_iter().filter(|&u| u != v).collect();
            for sub in self.restricted_sccs(&rest) {
                if self.has_cycle(&sub) {
                    work.push(sub);
                }
            }
        }
        feedback.sort_unstable();
        feedback
    }

    fn has_cycle(&self, component: &[usize]) -> bool {
        component.len() > 1
            || (component.len() == 1 && self.build_out[component[0]].contains(&component[0]))
    }

    /// Kahn's algorithm over the nodes outside the feedback set and the dummy
    /// start, ignoring edges from excluded nodes.
    fn topological_order(
        &self,
        n: usize,
        dummy_start_old: usize,
        in_feedback: &HashSet<usize>,
    ) -> Vec<usize> {
        let excluded =
            |v: usize| v == dummy_start_old || in_feedback.contains(&v);
        let mut indegree = vec![0usize; n];
        for v in 0..n {
            if excluded(v) {
                continue;
            }
            indegree[v] = self.build_in[v].iter().filter(|&&u| !excluded(u)).count();
        }
        let mut ready: BTreeSet<usize> =
            (0..n).filter(|&v| !excluded(v) && indegree[v] == 0).collect();
        let mut order = Vec::new();
        while let Some(v) = ready.pop_first() {
            order.push(v);
            for &w in &self.build_out[v] {
                if excluded(w) {
                    continue;
                }
                indegree[w] -= 1;
                if indegree[w] == 0 {
                    ready.insert(w);
                }
            }
        }
        assert_eq!(
            order.len(),
            (0..n).filter(|&v| !excluded(v)).count(),
            "graph not acyclic after feedback vertex removal"
        );
        order
    }

    /// Unrolls the region behind `root` to a depth of `2 * W` characters,
    /// expanding backwards through every in-neighbour so values can propagate
    /// around cycles within one column. At the depth cap, copies of feedback
    /// vertices are pinned (`previous_cut`) to the fixed point of the cut
    /// they belong to; copies of other nodes become plain leaves evaluated as
    /// sources.
    fn build_cut(&self, root: NodeIx) -> CycleCut {
        const MAX_DEPTH: usize = 2 * W;
        // Unique (node, depth) copies; depth is clamped at the cap.
        let mut copies: Vec<(NodeIx, usize, bool)> = vec![(root, 0, false)];
        let mut memo: HashMap<(NodeIx, usize), usize> = HashMap::default();
        memo.insert((root, 0), 0);
        let mut edges: Vec<(usize, usize)> = Vec::new();
        let mut stack = vec![0usize];
        while let Some(e) = stack.pop() {
            let (u, depth, _) = copies[e];
            for &v in &self.in_neighbors[u as usize] {
                if v == self.dummy_start {
                    continue;
                }
                let next_depth = (depth + self.node_len(v)).min(MAX_DEPTH);
                let capped = next_depth >= MAX_DEPTH;
                let pin = capped && v >= 1 && v < self.first_in_order;
                let idx = *memo.entry((v, next_depth)).or_insert_with(|| {
                    copies.push((v, next_depth, pin));
                    if !capped {
                        stack.push(copies.len() - 1);
                    }
                    copies.len() - 1
                });
                edges.push((e, idx));
            }
        }
        // Order the copies by depth so predecessors always have larger
        // indices than the entries they feed.
        let mut by_depth: Vec<usize> = (0..copies.len()).collect();
        by_depth.sort_by_key(|&i| (copies[i].1, copies[i].0));
        let mut tmp_to_final = vec![0usize; copies.len()];
        for (fin, &tmp) in by_depth.iter().enumerate() {
            tmp_to_final[tmp] = fin;
        }
        let mut cut = CycleCut {
            nodes: vec![0; copies.len()],
            previous_cut: vec![false; copies.len()],
            predecessors: vec![Vec::new(); copies.len()],
        };
        for (tmp, &(node, _, pinned)) in copies.iter().enumerate() {
            cut.nodes[tmp_to_final[tmp]] = node;
            cut.previous_cut[tmp_to_final[tmp]] = pinned;
        }
        for (from, to) in edges {
            let (f, t) = (tmp_to_final[from], tmp_to_final[to]);
            debug_assert!(t > f);
            cut.predecessors[f].push(t);
        }
        debug_assert_eq!(cut.nodes[0], root);
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: u64) -> AlignmentGraph {
        let mut g = AlignmentGraph::new();
        for i in 0..n {
            g.add_node(i, b"ACGT");
        }
        for i in 1..n {
            g.add_edge(i - 1, i);
        }
        g.finalize();
        g
    }

    #[test]
    fn chain_is_fully_in_order() {
        let g = chain(10);
        // Both strands plus two dummies.
        assert_eq!(g.node_count(), 22);
        // Only the self-looping end sentinel is out of order.
        assert_eq!(g.first_in_order, 2);
        assert_eq!(g.dummy_start, 0);
        assert_eq!(g.dummy_end, 1);
        // Every in-order node's in-order in-neighbours precede it.
        for i in g.first_in_order..g.node_count() as NodeIx {
            for &nb in &g.in_neighbors[i as usize] {
                assert!(nb < i || nb < g.first_in_order);
            }
        }
    }

    #[test]
    fn reverse_position_roundtrips() {
        let g = chain(3);
        for p in 0..g.seq.len() as CharIx {
            let q = g.reverse_position(p);
            assert_eq!(g.reverse_position(q), p);
            if g.ids[g.node_of(p) as usize] != u64::MAX {
                // A position and its twin carry complementary bases.
                let c = g.char_at(p);
                let d = g.char_at(q);
                assert_eq!(dna::complement(c), d);
            }
        }
    }

    #[test]
    fn cycle_yields_feedback_vertices_and_cuts() {
        let mut g = AlignmentGraph::new();
        g.add_node(0, b"ACGTACGT");
        g.add_node(1, b"TTGGCCAA");
        g.add_edge(0, 1);
        g.add_edge(1, 0);
        g.finalize();
        assert!(g.first_in_order > 1);
        for root in 1..g.first_in_order {
            let cut = &g.cuts[root as usize];
            assert_eq!(cut.nodes[0], root);
            // Deep copies are pinned, and predecessors point forward.
            assert!(cut.previous_cut.iter().any(|&p| p));
            for (k, preds) in cut.predecessors.iter().enumerate() {
                for &p in preds {
                    assert!(p > k);
                }
            }
        }
    }

    #[test]
    fn project_forward_walks_across_edges() {
        let g = chain(3);
        // From the first character of the first forward node, 4 characters
        // ahead lands on the first character of the next node.
        let first = g.node_lookup[&0];
        let start = g.node_start[first as usize];
        let positions = BTreeSet::from([start]);
        let projected = g.project_forward(&positions, 4);
        let second = g.node_lookup[&2];
        assert!(projected.contains(&g.node_start[second as usize]));
    }

    #[test]
    fn dummies_bracket_sources_and_sinks() {
        let g = chain(3);
        let first = g.node_lookup[&0];
        assert!(g.in_neighbors[first as usize].contains(&g.dummy_start));
        let last = g.node_lookup[&4];
        assert!(g.out_neighbors[last as usize].contains(&g.dummy_end));
    }
}
