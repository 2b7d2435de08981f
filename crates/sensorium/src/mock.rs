//! Mock nodes
//!
//! A mock node is not backed by any device. It keeps whatever properties are
//! set on it, which makes it a stand-in for a real node (for instance one
//! seeded from a recording) and a convenient test double.

use std::collections::BTreeMap;

use crate::description::{ProductionNodeDescription, Version};
use crate::factory::{InstantiateRequest, ProductionNodeFactory};
use crate::node::{BoxedNode, ProductionNode, PropertyValue};
use crate::node_info::NodeInfoList;
use crate::query::NodeQuery;
use crate::status::{Result, Status};
use crate::types::NodeType;
use crate::Context;

pub const MOCK_VENDOR: &str = "OpenNI";
pub const MOCK_NAME: &str = "Mock";

/// Description of the mock node for `node_type`
pub fn mock_description(node_type: NodeType) -> ProductionNodeDescription {
    ProductionNodeDescription::new(node_type, MOCK_VENDOR, MOCK_NAME, Version::library())
}

pub fn is_mock_description(description: &ProductionNodeDescription) -> bool {
    description.vendor == MOCK_VENDOR && description.name == MOCK_NAME
}

/// In-memory property bag
///
/// Property and generation changes are announced by the context once the
/// call returns.
#[derive(Debug, Default)]
pub struct MockNode {
    properties: BTreeMap<String, PropertyValue>,
    generating: bool,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&mut self, name: &str, value: PropertyValue) -> Result<()> {
        self.properties.insert(name.to_string(), value);
        Ok(())
    }
}

impl ProductionNode for MockNode {
    fn set_int_property(&mut self, name: &str, value: u64) -> Result<()> {
        self.set(name, PropertyValue::Int(value))
    }

    fn get_int_property(&self, name: &str) -> Result<u64> {
        match self.properties.get(name) {
            Some(PropertyValue::Int(v)) => Ok(*v),
            _ => Err(Status::NoMatch),
        }
    }

    fn set_real_property(&mut self, name: &str, value: f64) -> Result<()> {
        self.set(name, PropertyValue::Real(value))
    }

    fn get_real_property(&self, name: &str) -> Result<f64> {
        match self.properties.get(name) {
            Some(PropertyValue::Real(v)) => Ok(*v),
            _ => Err(Status::NoMatch),
        }
    }

    fn set_string_property(&mut self, name: &str, value: &str) -> Result<()> {
        self.set(name, PropertyValue::String(value.to_string()))
    }

    fn get_string_property(&self, name: &str) -> Result<String> {
        match self.properties.get(name) {
            Some(PropertyValue::String(v)) => Ok(v.clone()),
            _ => Err(Status::NoMatch),
        }
    }

    fn set_general_property(&mut self, name: &str, value: &[u8]) -> Result<()> {
        self.set(name, PropertyValue::General(value.to_vec()))
    }

    fn get_general_property(&self, name: &str) -> Result<Vec<u8>> {
        match self.properties.get(name) {
            Some(PropertyValue::General(v)) => Ok(v.clone()),
            _ => Err(Status::NoMatch),
        }
    }

    fn properties(&self) -> Vec<(String, PropertyValue)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn start_generating(&mut self) -> Result<()> {
        self.generating = true;
        Ok(())
    }

    fn stop_generating(&mut self) {
        self.generating = false;
    }

    fn is_generating(&self) -> bool {
        self.generating
    }
}

/// Factory behind `create_mock_node`. Never offers enumeration candidates.
pub struct MockNodeFactory {
    description: ProductionNodeDescription,
}

impl MockNodeFactory {
    pub fn new(node_type: NodeType) -> Self {
        Self {
            description: mock_description(node_type),
        }
    }
}

impl ProductionNodeFactory for MockNodeFactory {
    fn description(&self) -> &ProductionNodeDescription {
        &self.description
    }

    fn describe_needs(&self, _ctx: &Context, _query: Option<&NodeQuery>) -> Result<NodeInfoList> {
        Ok(NodeInfoList::new())
    }

    fn instantiate(&self, _request: InstantiateRequest<'_>) -> Result<BoxedNode> {
        Ok(Box::new(MockNode::new()))
    }
}
