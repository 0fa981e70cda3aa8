//! Sparse per-column storage of word slices, keyed by node.
use crate::prelude::*;
use sg_bitpacking::WordSlice;
use sg_types::NodeIx;

/// The word slices of every banded node for one 64-row column. The current
/// and previous column's stores are swapped, never copied.
#[derive(Debug, Default)]
pub struct NodeSlices {
    slices: HashMap<NodeIx, Vec<WordSlice>>,
}

impl NodeSlices {
    pub fn new() -> Self {
        NodeSlices::default()
    }

    /// Allocates the slice vector for a node entering the band.
    pub fn add_node(&mut self, node: NodeIx, len: usize) {
        self.slices.insert(node, vec![WordSlice::default(); len]);
    }

    pub fn node(&self, node: NodeIx) -> &Vec<WordSlice> {
        &self.slices[&node]
    }

    pub fn node_mut(&mut self, node: NodeIx) -> &mut Vec<WordSlice> {
        self.slices.get_mut(&node).expect("node not in band")
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&NodeIx, &mut Vec<WordSlice>)> {
        self.slices.iter_mut()
    }
}
