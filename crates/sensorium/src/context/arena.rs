//! Node storage and reference counting
//!
//! Live nodes are the vertices of a `StableGraph`. An edge `a -> b` means `a`
//! needs `b`, and holds one reference on `b`, so a node stays alive while
//! anything needs it. The graph is kept acyclic.
//!
//! Nothing in here calls into node implementations or raises events. Removal
//! hands the destroyed records back to the caller, which finishes teardown
//! after the arena lock is released.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::ThreadId;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::Direction;

use super::handle::{LockHandle, NodeHandle};
use crate::description::ProductionNodeDescription;
use crate::node::{BoxedNode, NodeSignals};
use crate::status::{Result, Status};

pub(crate) type SharedNode = Arc<Mutex<BoxedNode>>;

/// Change-lock state of one node
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LockState {
    /// `0` when unlocked
    pub lock: u32,
    /// Thread that opened a changes window with the current lock
    pub changes_thread: Option<ThreadId>,
}

impl LockState {
    pub fn is_locked(&self) -> bool {
        self.lock != 0
    }

    pub fn allows_changes(&self, presented: Option<LockHandle>) -> bool {
        if !self.is_locked() {
            return true;
        }
        if presented.map(|l| l.0) == Some(self.lock) {
            return true;
        }
        self.changes_thread == Some(std::thread::current().id())
    }
}

pub(crate) struct NodeRecord {
    pub serial: u64,
    pub description: ProductionNodeDescription,
    pub name: String,
    pub creation_info: String,
    pub created_at: DateTime<Utc>,
    pub ref_count: u32,
    pub lock: LockState,
    pub error: Option<Status>,
    pub is_generator: bool,
    pub node: SharedNode,
    pub signals: Arc<NodeSignals>,
}

impl std::fmt::Debug for NodeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRecord")
            .field("serial", &self.serial)
            .field("name", &self.name)
            .field("ref_count", &self.ref_count)
            .field("error", &self.error)
            .field("is_generator", &self.is_generator)
            .finish_non_exhaustive()
    }
}

pub(crate) struct NodeArena {
    graph: StableGraph<NodeRecord, ()>,
    names: HashMap<String, NodeIndex>,
    /// Names handed to nodes still being instantiated
    reserved: HashSet<String>,
    next_serial: u64,
}

impl NodeArena {
    pub fn new() -> Self {
        Self {
            graph: StableGraph::new(),
            names: HashMap::new(),
            reserved: HashSet::new(),
            next_serial: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn next_serial(&mut self) -> u64 {
        let serial = self.next_serial;
        self.next_serial += 1;
        serial
    }

    fn handle_of(&self, idx: NodeIndex) -> Option<NodeHandle> {
        self.graph.node_weight(idx).map(|r| NodeHandle {
            index: idx.index() as u32,
            serial: r.serial,
        })
    }

    fn resolve(&self, handle: NodeHandle) -> Result<NodeIndex> {
        let idx = NodeIndex::new(handle.index as usize);
        match self.graph.node_weight(idx) {
            Some(record) if record.serial == handle.serial => Ok(idx),
            _ => Err(Status::BadParam),
        }
    }

    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.resolve(handle).is_ok()
    }

    pub fn get(&self, handle: NodeHandle) -> Result<&NodeRecord> {
        let idx = self.resolve(handle)?;
        self.graph.node_weight(idx).ok_or(Status::BadParam)
    }

    pub fn get_mut(&mut self, handle: NodeHandle) -> Result<&mut NodeRecord> {
        let idx = self.resolve(handle)?;
        self.graph.node_weight_mut(idx).ok_or(Status::BadParam)
    }

    pub fn by_name(&self, name: &str) -> Option<NodeHandle> {
        self.names.get(name).and_then(|idx| self.handle_of(*idx))
    }

    /// Whether `name` is taken by a live node or a node being created
    pub fn contains_name(&self, name: &str) -> bool {
        self.names.contains_key(name) || self.reserved.contains(name)
    }

    pub fn reserve_name(&mut self, name: &str) {
        self.reserved.insert(name.to_string());
    }

    pub fn unreserve_name(&mut self, name: &str) {
        self.reserved.remove(name);
    }

    /// Store a new node. The record's name must be free.
    pub fn insert(&mut self, record: NodeRecord) -> NodeHandle {
        let serial = record.serial;
        let name = record.name.clone();
        let idx = self.graph.add_node(record);
        self.reserved.remove(&name);
        self.names.insert(name, idx);
        NodeHandle {
            index: idx.index() as u32,
            serial,
        }
    }

    /// Live nodes in creation order
    pub fn handles(&self) -> Vec<NodeHandle> {
        let mut handles: Vec<_> = self
            .graph
            .node_indices()
            .filter_map(|idx| self.handle_of(idx))
            .collect();
        handles.sort_by_key(|h| h.serial);
        handles
    }

    /// Nodes `handle` needs, in the order they were attached
    pub fn needed_of(&self, handle: NodeHandle) -> Result<Vec<NodeHandle>> {
        let idx = self.resolve(handle)?;
        // neighbors come back newest first
        let mut needed: Vec<_> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .filter_map(|n| self.handle_of(n))
            .collect();
        needed.reverse();
        Ok(needed)
    }

    /// Number of live nodes needing `handle`
    pub fn dependents_count(&self, handle: NodeHandle) -> Result<usize> {
        let idx = self.resolve(handle)?;
        Ok(self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .count())
    }

    pub fn is_needed_by(&self, dependent: NodeHandle, needed: NodeHandle) -> Result<bool> {
        let from = self.resolve(dependent)?;
        let to = self.resolve(needed)?;
        Ok(self.graph.find_edge(from, to).is_some())
    }

    /// Record that `dependent` needs `needed`, taking a reference on it.
    ///
    /// Returns `false` when the edge already existed. Self edges and edges
    /// that would close a cycle are `InvalidOperation`.
    pub fn add_needed(&mut self, dependent: NodeHandle, needed: NodeHandle) -> Result<bool> {
        let from = self.resolve(dependent)?;
        let to = self.resolve(needed)?;
        if from == to {
            return Err(Status::InvalidOperation);
        }
        if self.graph.find_edge(from, to).is_some() {
            return Ok(false);
        }
        if has_path_connecting(&self.graph, to, from, None) {
            return Err(Status::InvalidOperation);
        }

        self.graph.add_edge(from, to, ());
        if let Some(record) = self.graph.node_weight_mut(to) {
            record.ref_count += 1;
        }
        Ok(true)
    }

    /// Drop the edge `dependent -> needed` and the reference it held.
    pub fn remove_needed(
        &mut self,
        dependent: NodeHandle,
        needed: NodeHandle,
    ) -> Result<Vec<(NodeHandle, NodeRecord)>> {
        let from = self.resolve(dependent)?;
        let to = self.resolve(needed)?;
        let edge = self
            .graph
            .find_edge(from, to)
            .ok_or(Status::InvalidOperation)?;
        self.graph.remove_edge(edge);
        self.release_index(to)
    }

    pub fn add_ref(&mut self, handle: NodeHandle) -> Result<u32> {
        let record = self.get_mut(handle)?;
        record.ref_count += 1;
        Ok(record.ref_count)
    }

    /// Drop one reference. Returns every record destroyed as a result,
    /// dependents before the nodes they needed.
    pub fn release(&mut self, handle: NodeHandle) -> Result<Vec<(NodeHandle, NodeRecord)>> {
        let idx = self.resolve(handle)?;
        self.release_index(idx)
    }

    fn release_index(&mut self, idx: NodeIndex) -> Result<Vec<(NodeHandle, NodeRecord)>> {
        let record = self.graph.node_weight_mut(idx).ok_or(Status::BadParam)?;
        record.ref_count = record.ref_count.saturating_sub(1);
        let mut destroyed = Vec::new();
        if record.ref_count == 0 {
            self.destroy(idx, &mut destroyed);
        }
        Ok(destroyed)
    }

    fn destroy(&mut self, idx: NodeIndex, out: &mut Vec<(NodeHandle, NodeRecord)>) {
        let Some(handle) = self.handle_of(idx) else {
            return;
        };
        let mut needed: Vec<_> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        needed.reverse();

        let Some(record) = self.graph.remove_node(idx) else {
            return;
        };
        self.names.remove(&record.name);
        out.push((handle, record));

        for n in needed {
            if let Some(r) = self.graph.node_weight_mut(n) {
                r.ref_count = r.ref_count.saturating_sub(1);
                if r.ref_count == 0 {
                    self.destroy(n, out);
                }
            }
        }
    }

    /// Remove every node regardless of reference counts, nodes nobody needs
    /// first.
    pub fn drain(&mut self) -> Vec<(NodeHandle, NodeRecord)> {
        let order = match toposort(&self.graph, None) {
            Ok(order) => order,
            Err(_) => self.graph.node_indices().collect(),
        };

        let mut out = Vec::with_capacity(order.len());
        for idx in order {
            if let Some(handle) = self.handle_of(idx) {
                if let Some(record) = self.graph.remove_node(idx) {
                    self.names.remove(&record.name);
                    out.push((handle, record));
                }
            }
        }
        out
    }

    /// Live nodes ordered so every node comes after the nodes it needs
    pub fn dependency_order(&self) -> Vec<NodeHandle> {
        let mut order: Vec<_> = match toposort(&self.graph, None) {
            Ok(order) => order.into_iter().filter_map(|i| self.handle_of(i)).collect(),
            Err(_) => self.handles(),
        };
        order.reverse();
        order
    }

    /// Error states of all live nodes in error, in creation order
    pub fn errors(&self) -> Vec<Status> {
        self.handles()
            .into_iter()
            .filter_map(|h| self.get(h).ok().and_then(|r| r.error))
            .collect()
    }
}
