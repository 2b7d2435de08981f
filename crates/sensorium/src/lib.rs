//! Sensorium: production node registry
//!
//! Sensor pipelines are graphs of production nodes (devices, depth and image
//! generators, user trackers, recorders...). Modules describe what they can
//! produce through factories; a [`Context`] enumerates the candidate trees,
//! creates them with their needed nodes, keeps every node alive exactly as
//! long as something references it, and multicasts lifecycle events.
//!
//! - **Enumeration**: `enumerate_production_trees` lists live nodes and
//!   factory candidates, filtered by a [`NodeQuery`]
//! - **Creation**: `create_production_tree` brings a tree up depth first and
//!   rolls back on failure
//! - **Lifetime**: [`NodeRef`] is a counted reference; needed nodes are held
//!   by their dependents and cascade on release
//! - **Events**: [`Event`] dispatchers tolerate handlers that register or
//!   unregister while being raised

pub mod capability;
pub mod context;
pub mod description;
pub mod event;
pub mod factory;
pub mod mock;
pub mod node;
pub mod node_info;
pub mod query;
pub mod status;
pub mod types;

pub use capability::{MapOutputMode, MapOutputModeQuery};
pub use context::{Context, LockHandle, NodeHandle, NodeRef, WaitPolicy, WeakContext};
pub use description::{ProductionNodeDescription, Version};
pub use event::{CallbackHandle, Event, StatusEvent};
pub use factory::{InstantiateRequest, ProductionNodeFactory, SharedFactory};
pub use mock::{MockNode, MockNodeFactory};
pub use node::{BoxedNode, NodeSignals, ProductionNode, PropertyValue};
pub use node_info::{EnumerationError, EnumerationErrors, NodeInfo, NodeInfoList, NodeInfoSnapshot};
pub use query::NodeQuery;
pub use status::{status_code, Result, Status, StatusGroup};
pub use types::{NodeType, TypeHierarchy};
