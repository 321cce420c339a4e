//! Shard routing.
//!
//! A routing table describes, for every index, which physical copies of each of its shards
//! exist and where they live. The replication protocol never computes routing tables, it only
//! resolves requests against the snapshot it was handed.

use std::collections::BTreeMap;
use std::fmt;

use crate::cluster::{ClusterState, NodeId};
use crate::error::RoutingError;
use crate::models::{ReplicationRequest, ShardOperation};
use crate::utils;

/// The identity of a logical shard within an index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardId {
    /// The name of the index to which the shard belongs.
    pub index: String,
    /// The ordinal of the shard within its index.
    pub id: u32,
}

impl ShardId {
    /// Create a new instance.
    pub fn new(index: impl Into<String>, id: u32) -> Self {
        Self { index: index.into(), id }
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.index, self.id)
    }
}

/// The role of a shard copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShardRole {
    Primary,
    Replica,
}

/// The lifecycle state of a shard copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShardState {
    /// The copy is started and serving operations.
    Active,
    /// The copy is recovering; it receives writes but does not count toward consistency.
    Initializing,
    /// The copy has no node.
    Unassigned,
}

/// One physical copy of a shard.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShardRouting {
    pub shard_id: ShardId,
    /// The node hosting this copy, `None` when unassigned.
    pub node_id: Option<NodeId>,
    pub role: ShardRole,
    pub state: ShardState,
}

impl ShardRouting {
    /// Create a new instance.
    ///
    /// An unassigned copy never carries a node ID.
    pub fn new(shard_id: ShardId, node_id: Option<NodeId>, role: ShardRole, state: ShardState) -> Self {
        let node_id = if state == ShardState::Unassigned { None } else { node_id };
        let state = if node_id.is_none() { ShardState::Unassigned } else { state };
        Self { shard_id, node_id, role, state }
    }

    /// An active primary copy on the given node.
    pub fn primary(shard_id: ShardId, node_id: impl Into<NodeId>) -> Self {
        Self::new(shard_id, Some(node_id.into()), ShardRole::Primary, ShardState::Active)
    }

    /// A replica copy on the given node, in the given state.
    pub fn replica(shard_id: ShardId, node_id: impl Into<NodeId>, state: ShardState) -> Self {
        Self::new(shard_id, Some(node_id.into()), ShardRole::Replica, state)
    }

    /// An unassigned copy with the given role.
    pub fn unassigned(shard_id: ShardId, role: ShardRole) -> Self {
        Self::new(shard_id, None, role, ShardState::Unassigned)
    }

    pub fn is_primary(&self) -> bool {
        self.role == ShardRole::Primary
    }

    /// The copy is started.
    pub fn active(&self) -> bool {
        self.state == ShardState::Active
    }

    /// The copy lives on a node, whether started or still recovering.
    pub fn assigned(&self) -> bool {
        matches!(self.state, ShardState::Active | ShardState::Initializing)
    }

    /// The copy lives on the given node.
    pub fn is_on_node(&self, node_id: &str) -> bool {
        self.node_id.as_deref() == Some(node_id)
    }
}

/// An ordered, restartable sequence of the copies of one shard, primary first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardsIterator {
    shard_id: ShardId,
    shards: Vec<ShardRouting>,
    pos: usize,
}

impl ShardsIterator {
    fn new(shard_id: ShardId, shards: Vec<ShardRouting>) -> Self {
        Self { shard_id, shards, pos: 0 }
    }

    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// The total number of copies, regardless of state.
    pub fn size(&self) -> usize {
        self.shards.len()
    }

    /// The number of active copies.
    pub fn size_active(&self) -> usize {
        self.shards.iter().filter(|shard| shard.active()).count()
    }

    /// The primary copy, if the routing table has one.
    pub fn primary(&self) -> Option<&ShardRouting> {
        self.shards.first().filter(|shard| shard.is_primary())
    }

    /// All non-primary copies in routing order.
    pub fn replicas(&self) -> impl Iterator<Item = &ShardRouting> {
        self.shards.iter().filter(|shard| !shard.is_primary())
    }

    /// Restart iteration from the first copy.
    pub fn reset(&mut self) {
        self.pos = 0;
    }

    /// The number of copies not yet yielded.
    pub fn remaining(&self) -> usize {
        self.shards.len().saturating_sub(self.pos)
    }

    pub fn as_slice(&self) -> &[ShardRouting] {
        &self.shards
    }
}

impl Iterator for ShardsIterator {
    type Item = ShardRouting;

    fn next(&mut self) -> Option<Self::Item> {
        let shard = self.shards.get(self.pos).cloned();
        if shard.is_some() {
            self.pos += 1;
        }
        shard
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}

/// A group of shard iterators, one per shard ID, in shard order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupShardsIterator {
    iterators: Vec<ShardsIterator>,
}

impl GroupShardsIterator {
    pub fn size(&self) -> usize {
        self.iterators.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ShardsIterator> {
        self.iterators.iter()
    }
}

impl IntoIterator for GroupShardsIterator {
    type Item = ShardsIterator;
    type IntoIter = std::vec::IntoIter<ShardsIterator>;

    fn into_iter(self) -> Self::IntoIter {
        self.iterators.into_iter()
    }
}

/// The copies of a single shard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexShardRoutingTable {
    shard_id: ShardId,
    /// Always ordered with the primary first.
    shards: Vec<ShardRouting>,
}

impl IndexShardRoutingTable {
    /// Create a new instance, ordering the primary first.
    ///
    /// Fails if more than one copy claims the primary role, or if a copy belongs to another shard.
    pub fn new(shard_id: ShardId, mut shards: Vec<ShardRouting>) -> Result<Self, RoutingError> {
        if let Some(stray) = shards.iter().find(|shard| shard.shard_id != shard_id) {
            return Err(RoutingError::ShardMismatch {
                expected: shard_id,
                found: stray.shard_id.clone(),
            });
        }
        if shards.iter().filter(|shard| shard.is_primary()).count() > 1 {
            return Err(RoutingError::MultiplePrimaries { shard_id });
        }
        shards.sort_by_key(|shard| !shard.is_primary());
        Ok(Self { shard_id, shards })
    }

    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    pub fn shards(&self) -> &[ShardRouting] {
        &self.shards
    }

    /// A fresh iterator over the copies of this shard.
    pub fn shards_it(&self) -> ShardsIterator {
        ShardsIterator::new(self.shard_id.clone(), self.shards.clone())
    }

    /// Mark the copy on the given node as unassigned, returning `true` if one was found.
    pub(crate) fn fail_copy(&mut self, node_id: &str) -> bool {
        match self.shards.iter_mut().find(|shard| shard.is_on_node(node_id)) {
            Some(shard) => {
                *shard = ShardRouting::unassigned(shard.shard_id.clone(), shard.role);
                true
            }
            None => false,
        }
    }
}

/// The routing table of a single index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexRoutingTable {
    index: String,
    shards: BTreeMap<u32, IndexShardRoutingTable>,
}

impl IndexRoutingTable {
    /// Create a new empty instance.
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            shards: BTreeMap::new(),
        }
    }

    /// Add the routing of a shard, replacing any previous routing of the same shard.
    ///
    /// Fails if the shard belongs to another index.
    pub fn with_shard(mut self, shard: IndexShardRoutingTable) -> Result<Self, RoutingError> {
        if shard.shard_id.index != self.index {
            return Err(RoutingError::ShardMismatch {
                expected: ShardId::new(self.index.as_str(), shard.shard_id.id),
                found: shard.shard_id,
            });
        }
        self.shards.insert(shard.shard_id.id, shard);
        Ok(self)
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn number_of_shards(&self) -> u32 {
        self.shards.len() as u32
    }

    pub fn shard(&self, id: u32) -> Option<&IndexShardRoutingTable> {
        self.shards.get(&id)
    }

    pub fn shards(&self) -> impl Iterator<Item = &IndexShardRoutingTable> {
        self.shards.values()
    }

    /// One iterator per shard of the index.
    pub fn group_shards(&self) -> GroupShardsIterator {
        GroupShardsIterator {
            iterators: self.shards.values().map(IndexShardRoutingTable::shards_it).collect(),
        }
    }
}

/// The routing table of all indices.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoutingTable {
    indices: BTreeMap<String, IndexRoutingTable>,
}

impl RoutingTable {
    /// Add the routing of an index, replacing any previous routing of the same index.
    pub fn with_index(mut self, index: IndexRoutingTable) -> Self {
        self.indices.insert(index.index.clone(), index);
        self
    }

    pub fn index(&self, index: &str) -> Option<&IndexRoutingTable> {
        self.indices.get(index)
    }

    pub fn has_index(&self, index: &str) -> bool {
        self.indices.contains_key(index)
    }

    pub fn indices(&self) -> impl Iterator<Item = &IndexRoutingTable> {
        self.indices.values()
    }

    /// Mark the copy of the given shard on the given node as unassigned.
    pub(crate) fn fail_shard(&mut self, shard_id: &ShardId, node_id: &str) -> bool {
        self.indices
            .get_mut(&shard_id.index)
            .and_then(|index| index.shards.get_mut(&shard_id.id))
            .map(|shard| shard.fail_copy(node_id))
            .unwrap_or(false)
    }
}

/// Resolution of operations to shard groups.
pub struct OperationRouting;

impl OperationRouting {
    /// All shards of the index, for a delete which must be broadcast to every shard.
    pub fn broadcast_delete_shards(state: &ClusterState, index: &str) -> Result<GroupShardsIterator, RoutingError> {
        Ok(Self::index_routing_table(state, index)?.group_shards())
    }

    /// All shards of the index which may receive a document index or create.
    pub fn index_shards(state: &ClusterState, index: &str) -> Result<GroupShardsIterator, RoutingError> {
        Ok(Self::index_routing_table(state, index)?.group_shards())
    }

    /// All shards of the index which may receive a bulk shard request.
    pub fn bulk_shards(state: &ClusterState, index: &str) -> Result<GroupShardsIterator, RoutingError> {
        Ok(Self::index_routing_table(state, index)?.group_shards())
    }

    /// Compute the shard of the index a document belongs to.
    ///
    /// The routing value is used when given, else the document's ID.
    pub fn shard_id(state: &ClusterState, index: &str, id: &str, routing: Option<&str>) -> Result<u32, RoutingError> {
        let table = Self::index_routing_table(state, index)?;
        let number_of_shards = table.number_of_shards();
        if number_of_shards == 0 {
            return Err(RoutingError::ShardNotFound { shard_id: ShardId::new(index, 0) });
        }
        Ok(shard_for_routing(routing.unwrap_or(id), number_of_shards))
    }

    fn index_routing_table<'a>(state: &'a ClusterState, index: &str) -> Result<&'a IndexRoutingTable, RoutingError> {
        state
            .routing_table()
            .index(index)
            .ok_or_else(|| RoutingError::IndexNotFound { index: index.to_string() })
    }
}

/// Map a routing value onto one of `number_of_shards` shards.
pub fn shard_for_routing(routing: &str, number_of_shards: u32) -> u32 {
    let modulo = i64::from(number_of_shards.max(1));
    i64::from(utils::djb_hash(routing)).rem_euclid(modulo) as u32
}

/// Resolve the copies of the shard targeted by the given request.
///
/// The shard group is chosen per operation kind, and then scanned for the request's shard. A
/// missing shard means the caller computed a shard which the current routing table does not
/// know, which is not something waiting will fix.
pub fn shards(state: &ClusterState, request: &ReplicationRequest) -> Result<ShardsIterator, RoutingError> {
    let group = match request.operation() {
        ShardOperation::Delete(_) => OperationRouting::broadcast_delete_shards(state, request.index())?,
        ShardOperation::Index(_) | ShardOperation::Create(_) => OperationRouting::index_shards(state, request.index())?,
        ShardOperation::Bulk(_) => OperationRouting::bulk_shards(state, request.index())?,
    };
    group
        .into_iter()
        .find(|shards| shards.shard_id().id == request.shard_id())
        .ok_or_else(|| RoutingError::ShardNotFound { shard_id: request.shard() })
}
