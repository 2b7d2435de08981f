//! Node info trees
//!
//! A [`NodeInfo`] describes a node that could be created, or one that already
//! exists, together with the nodes it needs. Enumeration hands out lists of
//! them; creating a tree from one fills in its reference to the live node.

use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

use crate::context::{NodeHandle, NodeRef};
use crate::description::ProductionNodeDescription;
use crate::status::{Result, Status};

// =============================================================================
// NodeInfo
// =============================================================================

/// A candidate or existing node and its needed-node subtree
///
/// While it tracks a live node the info holds one counted reference to it.
/// Cloning the info takes another reference; dropping it releases its own.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    description: ProductionNodeDescription,
    instance_name: Option<String>,
    creation_info: String,
    needed: NodeInfoList,
    node: Option<NodeRef>,
}

impl NodeInfo {
    /// A candidate adopting `needed` as its subtree
    pub fn new(
        description: ProductionNodeDescription,
        creation_info: impl Into<String>,
        needed: NodeInfoList,
    ) -> Self {
        Self {
            description,
            instance_name: None,
            creation_info: creation_info.into(),
            needed,
            node: None,
        }
    }

    pub(crate) fn existing(
        description: ProductionNodeDescription,
        instance_name: String,
        creation_info: String,
        needed: NodeInfoList,
        node: NodeRef,
    ) -> Self {
        Self {
            description,
            instance_name: Some(instance_name),
            creation_info,
            needed,
            node: Some(node),
        }
    }

    pub fn description(&self) -> &ProductionNodeDescription {
        &self.description
    }

    pub fn instance_name(&self) -> Option<&str> {
        self.instance_name.as_deref()
    }

    /// Name the node this info will create.
    ///
    /// Names are fixed once the node exists: `InvalidOperation` then.
    pub fn set_instance_name(&mut self, name: impl Into<String>) -> Result<()> {
        if self.node.is_some() {
            return Err(Status::InvalidOperation);
        }
        self.instance_name = Some(name.into());
        Ok(())
    }

    pub fn creation_info(&self) -> &str {
        &self.creation_info
    }

    pub fn needed_nodes(&self) -> &NodeInfoList {
        &self.needed
    }

    pub fn needed_nodes_mut(&mut self) -> &mut NodeInfoList {
        &mut self.needed
    }

    /// Whether this info tracks a live node
    pub fn is_existing(&self) -> bool {
        self.node.is_some()
    }

    /// Uncounted handle of the live node, if any
    pub fn handle(&self) -> Option<NodeHandle> {
        self.node.as_ref().map(NodeRef::handle)
    }

    /// A fresh counted reference to the live node, if any
    pub fn get_ref_handle(&self) -> Option<NodeRef> {
        self.node.clone()
    }

    pub(crate) fn node_ref(&self) -> Option<&NodeRef> {
        self.node.as_ref()
    }

    /// Track the node created from this info under `name`.
    pub(crate) fn set_node(&mut self, node: NodeRef, name: String) {
        self.node = Some(node);
        self.instance_name = Some(name);
    }

    /// Indented, multi-line rendering of the whole tree
    pub fn tree_string(&self) -> String {
        let mut out = String::new();
        self.write_tree(&mut out, 0);
        out
    }

    fn write_tree(&self, out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push('\t');
        }
        let _ = write!(out, "{}", self.description);
        if let Some(name) = &self.instance_name {
            let _ = write!(out, "[\"{name}\"]");
        }
        if !self.creation_info.is_empty() {
            let _ = write!(out, "({})", self.creation_info);
        }
        if self.needed.is_empty() {
            out.push('\n');
        } else {
            out.push_str(" ->\n");
            for child in self.needed.iter() {
                child.write_tree(out, depth + 1);
            }
        }
    }

    /// Serializable copy of the tree
    pub fn snapshot(&self) -> NodeInfoSnapshot {
        NodeInfoSnapshot {
            description: self.description.clone(),
            instance_name: self.instance_name.clone(),
            creation_info: self.creation_info.clone(),
            exists: self.is_existing(),
            handle: self.handle(),
            needed: self.needed.iter().map(NodeInfo::snapshot).collect(),
        }
    }

    /// Whether a node named `name` appears anywhere in this tree
    pub fn contains_instance(&self, name: &str) -> bool {
        self.instance_name.as_deref() == Some(name)
            || self.needed.iter().any(|n| n.contains_instance(name))
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tree_string())
    }
}

/// Plain-data form of a [`NodeInfo`] tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfoSnapshot {
    pub description: ProductionNodeDescription,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub creation_info: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<NodeHandle>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub needed: Vec<NodeInfoSnapshot>,
}

// =============================================================================
// NodeInfoList
// =============================================================================

/// Ordered list of node infos
#[derive(Debug, Clone, Default)]
pub struct NodeInfoList {
    items: Vec<NodeInfo>,
}

impl NodeInfoList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, info: NodeInfo) {
        self.items.push(info);
    }

    /// Append a fresh candidate
    pub fn add_node(
        &mut self,
        description: ProductionNodeDescription,
        creation_info: impl Into<String>,
        needed: NodeInfoList,
    ) {
        self.items.push(NodeInfo::new(description, creation_info, needed));
    }

    /// Append a copy of `info` (taking its own reference if it is live)
    pub fn add_node_from_list(&mut self, info: &NodeInfo) {
        self.items.push(info.clone());
    }

    pub fn remove(&mut self, index: usize) -> Option<NodeInfo> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    /// Drop every entry, releasing the references they held.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Move every entry of `other` to the end of this list.
    pub fn append(&mut self, other: &mut NodeInfoList) {
        self.items.append(&mut other.items);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn first(&self) -> Option<&NodeInfo> {
        self.items.first()
    }

    pub fn last(&self) -> Option<&NodeInfo> {
        self.items.last()
    }

    pub fn get(&self, index: usize) -> Option<&NodeInfo> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut NodeInfo> {
        self.items.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NodeInfo> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, NodeInfo> {
        self.items.iter_mut()
    }

    pub fn retain(&mut self, f: impl FnMut(&NodeInfo) -> bool) {
        self.items.retain(f);
    }

    pub fn retain_mut(&mut self, f: impl FnMut(&mut NodeInfo) -> bool) {
        self.items.retain_mut(f);
    }

    pub fn snapshot(&self) -> Vec<NodeInfoSnapshot> {
        self.items.iter().map(NodeInfo::snapshot).collect()
    }
}

impl IntoIterator for NodeInfoList {
    type Item = NodeInfo;
    type IntoIter = std::vec::IntoIter<NodeInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a NodeInfoList {
    type Item = &'a NodeInfo;
    type IntoIter = std::slice::Iter<'a, NodeInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl FromIterator<NodeInfo> for NodeInfoList {
    fn from_iter<T: IntoIterator<Item = NodeInfo>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl Extend<NodeInfo> for NodeInfoList {
    fn extend<T: IntoIterator<Item = NodeInfo>>(&mut self, iter: T) {
        self.items.extend(iter);
    }
}

// =============================================================================
// EnumerationErrors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumerationError {
    pub description: ProductionNodeDescription,
    pub status: Status,
}

/// Candidates that could not be enumerated, in probing order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumerationErrors {
    entries: Vec<EnumerationError>,
}

impl EnumerationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, description: ProductionNodeDescription, status: Status) {
        self.entries.push(EnumerationError {
            description,
            status,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EnumerationError> {
        self.entries.iter()
    }

    pub fn first(&self) -> Option<&EnumerationError> {
        self.entries.first()
    }
}

impl fmt::Display for EnumerationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("One or more of the following nodes could not be enumerated:\n\n")?;
        for entry in &self.entries {
            writeln!(f, "{}: {}", entry.description, entry.status)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a EnumerationErrors {
    type Item = &'a EnumerationError;
    type IntoIter = std::slice::Iter<'a, EnumerationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
