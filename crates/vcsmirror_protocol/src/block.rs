//! Metadata blocks.

use crate::record::BlockRecord;
use serde::{Deserialize, Serialize};

/// An ordered batch of remote metadata records.
///
/// Blocks are the unit of pipelining: while one block's data is fetched,
/// decompressed, and written, the next block's metadata is already being
/// requested.
///
/// # Invariants
///
/// - A project marker for a path appears before any file record that
///   references that path, within the session's flattened marker list.
/// - `magic_pos` is monotonically non-decreasing across blocks. It is
///   informational only (progress display).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataBlock {
    /// Index of this block within the session.
    pub index: u64,
    /// Remote-supplied progress counter.
    pub magic_pos: u64,
    /// Whether more blocks follow this one.
    pub has_more: bool,
    /// The records of this block, in delivery order.
    pub records: Vec<BlockRecord>,
}

impl MetadataBlock {
    /// Creates a block.
    pub fn new(index: u64, magic_pos: u64, has_more: bool, records: Vec<BlockRecord>) -> Self {
        Self {
            index,
            magic_pos,
            has_more,
            records,
        }
    }

    /// Returns the number of records in the block.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the block carries no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Validates parent-before-child ordering against the markers already
    /// seen in the session.
    ///
    /// `prior_projects` is the number of project markers flattened from
    /// earlier blocks. Walks the block in order, counting markers as they
    /// appear, and returns the index of the first file record whose
    /// back-reference points past every marker visible at that position.
    /// Returns `None` when the whole block is well-formed.
    ///
    /// A violation is a protocol error: the server emitted a file before
    /// its project, and resolving it would map the file to the wrong
    /// directory.
    pub fn first_invalid_back_ref(&self, prior_projects: usize) -> Option<usize> {
        let mut visible = prior_projects;
        for (i, record) in self.records.iter().enumerate() {
            match record {
                BlockRecord::Project(_) => visible += 1,
                BlockRecord::File(file) => {
                    if file.project_ref >= visible {
                        return Some(i);
                    }
                }
            }
        }
        None
    }
}
