//! Shared types for sequence-to-graph alignment.
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// An edit-distance score. Signed so that score differences are cheap;
/// `Score::MAX` is the failed-alignment sentinel.
pub type Score = i64;

/// A position in the graph's flat character array.
pub type CharIx = u32;

/// An index of a node in the finalised graph.
pub type NodeIx = u32;

/// A row of the alignment matrix, i.e. a position in the read.
/// `read_pos == read.len()` is the row below the last character.
pub type ReadIx = u32;

/// A sequence of bytes over `ACGT` + IUPAC ambiguity codes + `N`.
pub type Seq<'a> = &'a [u8];

/// A cell of the implicit alignment matrix: (graph character, read row).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatrixPos(pub CharIx, pub ReadIx);

impl Display for MatrixPos {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.0, self.1)
    }
}

/// A single edit within a mapping: `from_len` graph characters replaced by
/// the `to_len`-character read substring `sequence`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub from_len: u32,
    pub to_len: u32,
    pub sequence: String,
}

/// The alignment of a contiguous run of read characters to one graph node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    /// External node id, as given to the graph builder.
    pub node_id: u64,
    pub is_reverse: bool,
    /// Offset of the first aligned character within the node.
    pub offset: u32,
    /// Position of this mapping along the path.
    pub rank: u32,
    pub edits: Vec<Edit>,
}

/// The result of aligning one read to the graph.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Alignment {
    pub name: String,
    pub score: Score,
    pub failed: bool,
    pub cells_processed: usize,
    pub elapsed_ms: u64,
    pub path: Vec<Mapping>,
}

impl Alignment {
    /// A failed alignment: max score, empty path.
    pub fn empty(elapsed_ms: u64, cells_processed: usize) -> Self {
        Alignment {
            name: String::new(),
            score: Score::MAX,
            failed: true,
            cells_processed,
            elapsed_ms,
            path: Vec::new(),
        }
    }
}
