//! The seam between the context and the modules that produce nodes

use std::sync::Arc;

use crate::context::{Context, NodeHandle};
use crate::description::ProductionNodeDescription;
use crate::node::{BoxedNode, NodeSignals};
use crate::node_info::{NodeInfo, NodeInfoList};
use crate::query::NodeQuery;
use crate::status::Result;
use crate::types::NodeType;

/// What a factory gets when asked to build a node
pub struct InstantiateRequest<'a> {
    /// The candidate being created
    pub info: &'a NodeInfo,
    /// Final instance name, generated if the info had none
    pub instance_name: &'a str,
    /// Needed nodes, already live, in the order of the info's needed list
    pub needed: &'a [NodeHandle],
    /// Signals the new node raises
    pub signals: Arc<NodeSignals>,
}

impl InstantiateRequest<'_> {
    pub fn description(&self) -> &ProductionNodeDescription {
        self.info.description()
    }

    pub fn creation_info(&self) -> &str {
        self.info.creation_info()
    }
}

/// Produces nodes of one description
pub trait ProductionNodeFactory: Send + Sync {
    fn description(&self) -> &ProductionNodeDescription;

    fn can_produce(&self, node_type: NodeType) -> bool {
        self.description().node_type == node_type
    }

    /// Candidate trees this factory could build right now.
    ///
    /// A factory whose node needs other nodes enumerates them through `ctx`
    /// and returns one candidate per usable combination. An error is recorded
    /// against this factory and enumeration moves on to the next one.
    fn describe_needs(&self, _ctx: &Context, _query: Option<&NodeQuery>) -> Result<NodeInfoList> {
        let mut list = NodeInfoList::new();
        list.add_node(self.description().clone(), "", NodeInfoList::new());
        Ok(list)
    }

    fn instantiate(&self, request: InstantiateRequest<'_>) -> Result<BoxedNode>;
}

pub type SharedFactory = Arc<dyn ProductionNodeFactory>;
