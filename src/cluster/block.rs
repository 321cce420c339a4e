//! Cluster blocks.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use crate::cluster::ClusterState;
use crate::error::BlockedError;
use crate::models::ReplicationRequest;

/// The class of operation a block applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClusterBlockLevel {
    Read,
    Write,
    Metadata,
}

impl ClusterBlockLevel {
    pub const ALL: &'static [ClusterBlockLevel] = &[ClusterBlockLevel::Read, ClusterBlockLevel::Write, ClusterBlockLevel::Metadata];

    /// The wire ID of this level.
    pub fn id(&self) -> u8 {
        match self {
            Self::Read => 0,
            Self::Write => 1,
            Self::Metadata => 2,
        }
    }

    /// Parse a level from its wire ID.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Read),
            1 => Some(Self::Write),
            2 => Some(Self::Metadata),
            _ => None,
        }
    }
}

impl fmt::Display for ClusterBlockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("READ"),
            Self::Write => f.write_str("WRITE"),
            Self::Metadata => f.write_str("METADATA"),
        }
    }
}

/// An administrative restriction on a class of operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterBlock {
    pub id: u32,
    pub description: Cow<'static, str>,
    pub levels: Cow<'static, [ClusterBlockLevel]>,
}

impl ClusterBlock {
    /// Create a new instance.
    pub fn new(id: u32, description: impl Into<Cow<'static, str>>, levels: impl Into<Cow<'static, [ClusterBlockLevel]>>) -> Self {
        Self {
            id,
            description: description.into(),
            levels: levels.into(),
        }
    }

    /// Check if this block applies to the given level.
    pub fn contains(&self, level: ClusterBlockLevel) -> bool {
        self.levels.contains(&level)
    }

    fn to_error(&self, level: ClusterBlockLevel, index: Option<&str>) -> BlockedError {
        BlockedError {
            block_id: self.id,
            description: self.description.to_string(),
            level,
            index: index.map(String::from),
        }
    }
}

/// The cluster has not yet recovered its state.
pub const STATE_NOT_RECOVERED: ClusterBlock = ClusterBlock {
    id: 1,
    description: Cow::Borrowed("state not recovered / initialized"),
    levels: Cow::Borrowed(ClusterBlockLevel::ALL),
};

/// No master node is currently elected.
pub const NO_MASTER: ClusterBlock = ClusterBlock {
    id: 2,
    description: Cow::Borrowed("no master"),
    levels: Cow::Borrowed(&[ClusterBlockLevel::Write, ClusterBlockLevel::Metadata]),
};

/// The index is closed.
pub const INDEX_CLOSED: ClusterBlock = ClusterBlock {
    id: 4,
    description: Cow::Borrowed("index closed"),
    levels: Cow::Borrowed(&[ClusterBlockLevel::Read, ClusterBlockLevel::Write]),
};

/// The index has been made read only.
pub const INDEX_READ_ONLY: ClusterBlock = ClusterBlock {
    id: 5,
    description: Cow::Borrowed("index read-only (api)"),
    levels: Cow::Borrowed(&[ClusterBlockLevel::Write, ClusterBlockLevel::Metadata]),
};

/// The blocks currently in effect, cluster wide and per index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterBlocks {
    global: Vec<ClusterBlock>,
    indices: BTreeMap<String, Vec<ClusterBlock>>,
}

impl ClusterBlocks {
    /// Add a cluster wide block.
    pub fn add_global(&mut self, block: ClusterBlock) {
        if !self.global.iter().any(|existing| existing.id == block.id) {
            self.global.push(block);
        }
    }

    /// Add a block to the given index.
    pub fn add_index(&mut self, index: &str, block: ClusterBlock) {
        let blocks = self.indices.entry(index.to_string()).or_default();
        if !blocks.iter().any(|existing| existing.id == block.id) {
            blocks.push(block);
        }
    }

    /// Remove a cluster wide block by ID.
    pub fn remove_global(&mut self, id: u32) {
        self.global.retain(|block| block.id != id);
    }

    /// Remove a block from the given index by ID.
    pub fn remove_index(&mut self, index: &str, id: u32) {
        if let Some(blocks) = self.indices.get_mut(index) {
            blocks.retain(|block| block.id != id);
            if blocks.is_empty() {
                self.indices.remove(index);
            }
        }
    }

    pub fn global(&self) -> &[ClusterBlock] {
        &self.global
    }

    pub fn index(&self, index: &str) -> &[ClusterBlock] {
        self.indices.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Fail with the first cluster wide block covering the given level.
    pub fn global_blocked_raise(&self, level: ClusterBlockLevel) -> Result<(), BlockedError> {
        match self.global.iter().find(|block| block.contains(level)) {
            Some(block) => Err(block.to_error(level, None)),
            None => Ok(()),
        }
    }

    /// Fail with the first block covering the given level on the given index.
    ///
    /// Cluster wide blocks are checked first, and take precedence over index blocks.
    pub fn index_blocked_raise(&self, level: ClusterBlockLevel, index: &str) -> Result<(), BlockedError> {
        self.global_blocked_raise(level)?;
        match self.index(index).iter().find(|block| block.contains(level)) {
            Some(block) => Err(block.to_error(level, Some(index))),
            None => Ok(()),
        }
    }
}

/// Check if the given request is blocked for writes on the given state.
pub fn check_block(request: &ReplicationRequest, state: &ClusterState) -> Result<(), BlockedError> {
    state.blocks().index_blocked_raise(ClusterBlockLevel::Write, request.index())
}
