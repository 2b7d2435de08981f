//! Node implementations
//!
//! A module supplies the behaviour of its nodes by implementing
//! [`ProductionNode`]. The context owns the boxed implementation and is the
//! only caller; applications reach a node through its handle.
//!
//! Every method has a default so that a node only implements what its type
//! and capabilities call for. Property accessors default to `NotImplemented`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capability::MapOutputMode;
use crate::event::Event;
use crate::status::{Result, Status};

// =============================================================================
// Properties
// =============================================================================

/// Value of a named node property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Int(u64),
    Real(f64),
    String(String),
    General(Vec<u8>),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Real(v) => write!(f, "{v}"),
            PropertyValue::String(v) => write!(f, "\"{v}\""),
            PropertyValue::General(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

// =============================================================================
// Signals
// =============================================================================

/// Per-node notifications
///
/// Handed to the node when it is instantiated. The node raises error and
/// data changes; the context raises the property, generation and lock
/// changes it applied itself. Applications subscribe to all of them.
#[derive(Debug, Default)]
pub struct NodeSignals {
    /// New error state, `None` once the node has recovered
    pub error_state_changed: Event<Option<Status>>,
    pub generation_running_changed: Event<bool>,
    pub new_data_available: Event<()>,
    /// Name of the capability or property that changed
    pub property_changed: Event<String>,
    /// Whether the node is now locked for changes
    pub lock_changed: Event<bool>,
}

impl NodeSignals {
    pub fn new() -> Self {
        Self::default()
    }
}

// =============================================================================
// Node trait
// =============================================================================

/// Behaviour of a live node
///
/// The context holds the node's lock for the duration of every call. A node
/// must not raise its [`NodeSignals`] from inside these methods; property
/// and generation changes made through the context are announced by the
/// context after the call returns. Error and data changes come from the
/// node's own threads.
pub trait ProductionNode: Send {
    fn is_capability_supported(&self, _capability: &str) -> bool {
        false
    }

    fn set_int_property(&mut self, _name: &str, _value: u64) -> Result<()> {
        Err(Status::NotImplemented)
    }

    fn get_int_property(&self, _name: &str) -> Result<u64> {
        Err(Status::NotImplemented)
    }

    fn set_real_property(&mut self, _name: &str, _value: f64) -> Result<()> {
        Err(Status::NotImplemented)
    }

    fn get_real_property(&self, _name: &str) -> Result<f64> {
        Err(Status::NotImplemented)
    }

    fn set_string_property(&mut self, _name: &str, _value: &str) -> Result<()> {
        Err(Status::NotImplemented)
    }

    fn get_string_property(&self, _name: &str) -> Result<String> {
        Err(Status::NotImplemented)
    }

    fn set_general_property(&mut self, _name: &str, _value: &[u8]) -> Result<()> {
        Err(Status::NotImplemented)
    }

    fn get_general_property(&self, _name: &str) -> Result<Vec<u8>> {
        Err(Status::NotImplemented)
    }

    /// Every property this node can report, used to seed mock copies.
    fn properties(&self) -> Vec<(String, PropertyValue)> {
        Vec::new()
    }

    fn start_generating(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop_generating(&mut self) {}

    fn is_generating(&self) -> bool {
        false
    }

    fn is_new_data_available(&self) -> bool {
        false
    }

    /// Make the most recent data current.
    fn update_data(&mut self) -> Result<()> {
        Ok(())
    }

    /// Only called when the node reports the `Mirror` capability.
    fn set_mirror(&mut self, _mirror: bool) -> Result<()> {
        Err(Status::NotImplemented)
    }

    fn is_mirrored(&self) -> bool {
        false
    }

    fn supported_map_output_modes(&self) -> Vec<MapOutputMode> {
        Vec::new()
    }

    fn supported_user_positions(&self) -> u32 {
        0
    }

    /// Told about lock transitions when the node is `LockAware`.
    fn set_lock_state(&mut self, _locked: bool) -> Result<()> {
        Ok(())
    }

    /// Current internal error, `None` when healthy
    fn error_state(&self) -> Option<Status> {
        None
    }

    /// Called once, right before the node is dropped.
    fn shutdown(&mut self) {}
}

pub type BoxedNode = Box<dyn ProductionNode>;

/// Copy a property into a node through the matching setter.
pub fn apply_property(node: &mut dyn ProductionNode, name: &str, value: &PropertyValue) -> Result<()> {
    match value {
        PropertyValue::Int(v) => node.set_int_property(name, *v),
        PropertyValue::Real(v) => node.set_real_property(name, *v),
        PropertyValue::String(v) => node.set_string_property(name, v),
        PropertyValue::General(v) => node.set_general_property(name, v),
    }
}
