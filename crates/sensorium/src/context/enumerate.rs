//! Factories, enumeration and tree creation

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::arena::{LockState, NodeRecord};
use super::{Context, NodeHandle, NodeRef};
use crate::capability;
use crate::description::ProductionNodeDescription;
use crate::factory::{InstantiateRequest, SharedFactory};
use crate::mock::{is_mock_description, mock_description, MockNodeFactory};
use crate::node::{apply_property, NodeSignals};
use crate::node_info::{EnumerationErrors, NodeInfo, NodeInfoList};
use crate::query::NodeQuery;
use crate::status::{Result, Status};
use crate::types::NodeType;

/// Nodes brought up for one info tree, mirroring its shape
struct BuiltTree {
    node: NodeRef,
    /// Instance name, for nodes this call created
    created: Option<String>,
    needed: Vec<BuiltTree>,
}

impl BuiltTree {
    /// Hand the new references over to the infos they were built from.
    fn attach(self, info: &mut NodeInfo) {
        if let Some(name) = self.created {
            info.set_node(self.node, name);
        }
        for (child, child_info) in self.needed.into_iter().zip(info.needed_nodes_mut().iter_mut()) {
            child.attach(child_info);
        }
    }
}

impl Context {
    // =========================================================================
    // Factories
    // =========================================================================

    /// Install a factory. Factories are probed in registration order.
    ///
    /// Returns `false` when configuration disables the factory's module.
    /// Registering a second factory with the same description is
    /// `InvalidOperation`.
    pub fn register_factory(&self, factory: SharedFactory) -> Result<bool> {
        self.ensure_running()?;
        let description = factory.description().clone();
        if self
            .inner
            .modules
            .is_disabled(&description.vendor, &description.name)
        {
            debug!(module = %description.module_key(), "Module disabled by configuration");
            return Ok(false);
        }

        let mut factories = self.inner.factories.write();
        if factories.iter().any(|f| *f.description() == description) {
            return Err(Status::InvalidOperation);
        }
        debug!(%description, "Factory registered");
        factories.push(factory);
        Ok(true)
    }

    pub fn unregister_factory(&self, description: &ProductionNodeDescription) -> Result<()> {
        let mut factories = self.inner.factories.write();
        let pos = factories
            .iter()
            .position(|f| f.description() == description)
            .ok_or(Status::NoMatch)?;
        factories.remove(pos);
        Ok(())
    }

    pub fn factory_descriptions(&self) -> Vec<ProductionNodeDescription> {
        self.inner
            .factories
            .read()
            .iter()
            .map(|f| f.description().clone())
            .collect()
    }

    fn find_factory(&self, description: &ProductionNodeDescription) -> Result<SharedFactory> {
        if let Some(factory) = self
            .inner
            .factories
            .read()
            .iter()
            .find(|f| f.description() == description)
        {
            return Ok(Arc::clone(factory));
        }
        if is_mock_description(description) {
            return Ok(Arc::new(MockNodeFactory::new(description.node_type)));
        }
        Err(Status::NodeNotLoaded)
    }

    // =========================================================================
    // Enumeration
    // =========================================================================

    /// Every tree that could provide `node_type`.
    ///
    /// Live nodes of the type come first, then each factory's candidates in
    /// registration order. `query`, if given, filters the top-level entries,
    /// each factory's right after it enumerates. Candidates that fail along
    /// the way are appended to `errors` in the order they were tried; an
    /// empty result is `NoNodePresent`.
    pub fn enumerate_production_trees(
        &self,
        node_type: NodeType,
        query: Option<&NodeQuery>,
        errors: Option<&mut EnumerationErrors>,
    ) -> Result<NodeInfoList> {
        self.ensure_running()?;
        let mut scratch = EnumerationErrors::new();
        let errors = errors.unwrap_or(&mut scratch);

        let mut list = self.enumerate_existing_nodes_by_type(node_type);
        self.filter_by_query(query, &mut list, errors);

        let factories: Vec<SharedFactory> = self
            .inner
            .factories
            .read()
            .iter()
            .filter(|f| f.can_produce(node_type))
            .cloned()
            .collect();

        for factory in factories {
            match factory.describe_needs(self, query) {
                Ok(mut candidates) => {
                    debug!(
                        description = %factory.description(),
                        candidates = candidates.len(),
                        "Factory enumerated"
                    );
                    self.filter_by_query(query, &mut candidates, errors);
                    list.append(&mut candidates);
                }
                Err(status) => {
                    warn!(description = %factory.description(), %status, "Factory failed to enumerate");
                    errors.add(factory.description().clone(), status);
                }
            }
        }

        if list.is_empty() {
            debug!(%node_type, "No node present");
            return Err(Status::NoNodePresent);
        }
        Ok(list)
    }

    /// Keep the entries of `list` that satisfy `query`. Entries that could
    /// not be checked are dropped and their failure recorded.
    fn filter_by_query(
        &self,
        query: Option<&NodeQuery>,
        list: &mut NodeInfoList,
        errors: &mut EnumerationErrors,
    ) {
        let Some(query) = query else {
            return;
        };
        list.retain(|info| {
            let (matched, failure) = query.evaluate(self, info);
            if let Some(status) = failure {
                errors.add(info.description().clone(), status);
            }
            matched
        });
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Bring up the node described by `info` and everything it needs.
    ///
    /// An info that already tracks a live node just yields a new reference.
    /// Otherwise needed nodes are created (or reused) first, depth first, and
    /// the node itself last. On failure everything created by this call is
    /// released again. On success `info` and its subtree track the new nodes.
    pub fn create_production_tree(&self, info: &mut NodeInfo) -> Result<NodeRef> {
        self.ensure_running()?;
        let tree = self.build_tree(info)?;
        let node = tree.node.clone();
        tree.attach(info);
        Ok(node)
    }

    fn build_tree(&self, info: &NodeInfo) -> Result<BuiltTree> {
        if let Some(existing) = info.node_ref() {
            return Ok(BuiltTree {
                node: self.counted(existing.handle())?,
                created: None,
                needed: Vec::new(),
            });
        }

        let mut needed = Vec::with_capacity(info.needed_nodes().len());
        for child in info.needed_nodes() {
            needed.push(self.build_tree(child)?);
        }
        let needed_handles: Vec<NodeHandle> = needed.iter().map(|t| t.node.handle()).collect();

        let (node, name) = self.instantiate(info, &needed_handles)?;
        Ok(BuiltTree {
            node,
            created: Some(name),
            needed,
        })
    }

    /// Create one node whose needed nodes are already live.
    fn instantiate(&self, info: &NodeInfo, needed: &[NodeHandle]) -> Result<(NodeRef, String)> {
        let description = info.description().clone();
        let factory = self.find_factory(&description)?;

        let name = self.reserve_name(info.instance_name(), description.node_type)?;
        let signals = Arc::new(NodeSignals::new());
        let built = factory.instantiate(InstantiateRequest {
            info,
            instance_name: &name,
            needed,
            signals: Arc::clone(&signals),
        });
        let mut node = match built {
            Ok(node) => node,
            Err(status) => {
                self.inner.nodes.lock().unreserve_name(&name);
                warn!(%description, %status, "Failed to instantiate node");
                return Err(status);
            }
        };

        let global_mirror = *self.inner.global_mirror.lock();
        if let Some(mirror) = global_mirror {
            if node.is_capability_supported(capability::MIRROR) {
                if let Err(status) = node.set_mirror(mirror) {
                    node.shutdown();
                    self.inner.nodes.lock().unreserve_name(&name);
                    warn!(%description, %status, "Failed to apply global mirror");
                    return Err(status);
                }
            }
        }

        let error = node.error_state();
        let is_generator = self.inner.types.read().is_generator(description.node_type);

        let handle = {
            let mut arena = self.inner.nodes.lock();
            let record = NodeRecord {
                serial: arena.next_serial(),
                description: description.clone(),
                name: name.clone(),
                creation_info: info.creation_info().to_string(),
                created_at: Utc::now(),
                ref_count: 1,
                lock: LockState::default(),
                error,
                is_generator,
                node: Arc::new(Mutex::new(node)),
                signals: Arc::clone(&signals),
            };
            let handle = arena.insert(record);
            for n in needed {
                if let Err(status) = arena.add_needed(handle, *n) {
                    warn!(%handle, needed = %n, %status, "Failed to record needed node");
                }
            }
            handle
        };
        let node_ref = NodeRef::from_raw(self.weak_inner(), handle);

        self.subscribe_to_signals(handle, &signals);
        info!(context = %self.inner.id, node = %name, %handle, %description, "Node created");

        if error.is_some() {
            self.inner.refresh_global_error();
        }
        if let Err(status) = self.inner.events.node_created.raise(&handle) {
            warn!(node = %name, %status, "Node creation handler failed");
        }
        Ok((node_ref, name))
    }

    /// Pick the instance name for a new node and hold it until insertion.
    fn reserve_name(&self, requested: Option<&str>, node_type: NodeType) -> Result<String> {
        let type_name = self
            .type_name(node_type)
            .unwrap_or_else(|| node_type.to_string());
        let mut arena = self.inner.nodes.lock();

        if let Some(name) = requested {
            if arena.contains_name(name) {
                return Err(Status::InvalidOperation);
            }
            arena.reserve_name(name);
            return Ok(name.to_string());
        }

        let mut n = self.inner.config.auto_name_start;
        loop {
            let candidate = format!("{type_name}{n}");
            if !arena.contains_name(&candidate) {
                arena.reserve_name(&candidate);
                return Ok(candidate);
            }
            n = n.checked_add(1).ok_or(Status::InvalidOperation)?;
        }
    }

    /// Enumerate `node_type` and create the first tree found.
    pub fn create_any_production_tree(
        &self,
        node_type: NodeType,
        query: Option<&NodeQuery>,
        errors: Option<&mut EnumerationErrors>,
    ) -> Result<NodeRef> {
        let mut list = self.enumerate_production_trees(node_type, query, errors)?;
        let mut first = list.remove(0).ok_or(Status::NoNodePresent)?;
        // drop the other candidates before creating anything
        drop(list);
        self.create_production_tree(&mut first)
    }

    // =========================================================================
    // Mock nodes
    // =========================================================================

    /// A mock node of `node_type`, named `name` or auto-named.
    pub fn create_mock_node(&self, node_type: NodeType, name: Option<&str>) -> Result<NodeRef> {
        let mut info = NodeInfo::new(mock_description(node_type), "", NodeInfoList::new());
        if let Some(name) = name {
            info.set_instance_name(name)?;
        }
        self.create_production_tree(&mut info)
    }

    /// A mock copy of `original`: same type and properties, named `name` or
    /// `<original>_Mock`.
    pub fn create_mock_node_based_on(
        &self,
        original: NodeHandle,
        name: Option<&str>,
    ) -> Result<NodeRef> {
        let (node_type, original_name, original_node) = {
            let arena = self.inner.nodes.lock();
            let record = arena.get(original)?;
            (
                record.description.node_type,
                record.name.clone(),
                Arc::clone(&record.node),
            )
        };
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("{original_name}_{}", crate::mock::MOCK_NAME));

        let mock = self.create_mock_node(node_type, Some(&name))?;
        let properties = original_node.lock().properties();
        let mock_node = self.shared_node(mock.handle())?;
        {
            let mut target = mock_node.lock();
            for (prop, value) in &properties {
                apply_property(target.as_mut(), prop, value)?;
            }
        }
        debug!(original = %original_name, mock = %name, properties = properties.len(), "Mock node seeded");
        Ok(mock)
    }
}
