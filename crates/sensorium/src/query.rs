//! Node queries
//!
//! A query is a conjunction of optional predicates. Description predicates
//! (vendor, name, version bounds, needed instances, creation info) are checked
//! against the info alone. Instance predicates (capabilities, map output
//! modes, user positions) need a live node: a candidate that does not exist
//! yet is created for the check and destroyed again afterwards.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capability::MapOutputModeQuery;
use crate::context::{Context, NodeHandle};
use crate::description::Version;
use crate::node_info::{NodeInfo, NodeInfoList};
use crate::status::{Result, Status};

/// Filter over node infos
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeQuery {
    vendor: Option<String>,
    name: Option<String>,
    min_version: Option<Version>,
    max_version: Option<Version>,
    capabilities: Vec<String>,
    map_output_modes: Vec<MapOutputModeQuery>,
    min_user_positions: u32,
    existing_only: bool,
    non_existing_only: bool,
    needed_nodes: Vec<String>,
    creation_info: Option<String>,
}

impl NodeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_vendor(&mut self, vendor: impl Into<String>) -> &mut Self {
        self.vendor = Some(vendor.into());
        self
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Inclusive lower bound
    pub fn set_min_version(&mut self, version: Version) -> &mut Self {
        self.min_version = Some(version);
        self
    }

    /// Inclusive upper bound
    pub fn set_max_version(&mut self, version: Version) -> &mut Self {
        self.max_version = Some(version);
        self
    }

    /// Require a capability. Every added capability must be supported.
    pub fn add_supported_capability(&mut self, capability: impl Into<String>) -> &mut Self {
        let capability = capability.into();
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    /// Accept nodes supporting this mode. A node must support at least one of
    /// the added modes.
    pub fn add_supported_map_output_mode(&mut self, mode: impl Into<MapOutputModeQuery>) -> &mut Self {
        self.map_output_modes.push(mode.into());
        self
    }

    pub fn set_supported_min_user_positions(&mut self, count: u32) -> &mut Self {
        self.min_user_positions = count;
        self
    }

    /// Only match nodes that already exist. Conflicts with
    /// `set_non_existing_node_only(true)`.
    pub fn set_existing_node_only(&mut self, existing_only: bool) -> Result<&mut Self> {
        if existing_only && self.non_existing_only {
            return Err(Status::InvalidOperation);
        }
        self.existing_only = existing_only;
        Ok(self)
    }

    /// Only match candidates that do not exist yet
    pub fn set_non_existing_node_only(&mut self, non_existing_only: bool) -> Result<&mut Self> {
        if non_existing_only && self.existing_only {
            return Err(Status::InvalidOperation);
        }
        self.non_existing_only = non_existing_only;
        Ok(self)
    }

    /// Require a node with this instance name somewhere in the candidate's tree
    pub fn add_needed_node(&mut self, instance_name: impl Into<String>) -> &mut Self {
        self.needed_nodes.push(instance_name.into());
        self
    }

    pub fn set_creation_info(&mut self, creation_info: impl Into<String>) -> &mut Self {
        self.creation_info = Some(creation_info.into());
        self
    }

    pub fn vendor(&self) -> Option<&str> {
        self.vendor.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn is_existing_only(&self) -> bool {
        self.existing_only
    }

    pub fn is_non_existing_only(&self) -> bool {
        self.non_existing_only
    }

    /// Whether any predicate needs a live node to be checked
    pub fn needs_instance(&self) -> bool {
        !self.capabilities.is_empty()
            || !self.map_output_modes.is_empty()
            || self.min_user_positions > 0
    }

    /// Check the predicates that only look at the info itself.
    pub fn matches_info(&self, info: &NodeInfo) -> bool {
        let description = info.description();

        if let Some(vendor) = &self.vendor {
            if *vendor != description.vendor {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if *name != description.name {
                return false;
            }
        }
        if let Some(min) = self.min_version {
            if description.version < min {
                return false;
            }
        }
        if let Some(max) = self.max_version {
            if description.version > max {
                return false;
            }
        }
        if !self.needed_nodes.iter().all(|n| info.contains_instance(n)) {
            return false;
        }
        if let Some(creation_info) = &self.creation_info {
            if creation_info != info.creation_info() {
                return false;
            }
        }
        true
    }

    /// Whether `info` satisfies every predicate.
    ///
    /// May create (and then destroy) the candidate's node tree; a candidate
    /// that cannot be created does not match. The error is returned alongside
    /// so enumeration can report it.
    pub(crate) fn evaluate(&self, ctx: &Context, info: &NodeInfo) -> (bool, Option<Status>) {
        if self.existing_only && !info.is_existing() {
            return (false, None);
        }
        if self.non_existing_only && info.is_existing() {
            return (false, None);
        }
        if !self.matches_info(info) {
            return (false, None);
        }
        if !self.needs_instance() {
            return (true, None);
        }

        if info.is_existing() {
            return (info.handle().is_some_and(|h| self.matches_instance(ctx, h)), None);
        }

        // probe on a copy so the caller's info stays a plain candidate
        debug!("Creating {} for querying", info.description());
        let mut probe = info.clone();
        match ctx.create_production_tree(&mut probe) {
            Ok(node) => {
                let matched = self.matches_instance(ctx, node.handle());
                (matched, None)
            }
            Err(status) => {
                debug!("Probe of {} failed: {}", info.description(), status);
                (false, Some(status))
            }
        }
    }

    fn matches_instance(&self, ctx: &Context, handle: NodeHandle) -> bool {
        for capability in &self.capabilities {
            if !ctx.is_capability_supported(handle, capability).unwrap_or(false) {
                return false;
            }
        }

        if !self.map_output_modes.is_empty() {
            let modes = ctx.supported_map_output_modes(handle).unwrap_or_default();
            let any = self
                .map_output_modes
                .iter()
                .any(|q| modes.iter().any(|m| q.matches(m)));
            if !any {
                return false;
            }
        }

        if self.min_user_positions > 0 {
            let positions = ctx.supported_user_positions(handle).unwrap_or(0);
            if positions < self.min_user_positions {
                return false;
            }
        }
        true
    }

    /// Remove every info from `list` that does not match.
    pub fn filter_list(&self, ctx: &Context, list: &mut NodeInfoList) {
        list.retain(|info| self.evaluate(ctx, info).0);
    }
}
