//! The node registry
//!
//! A [`Context`] owns every live node, the installed factories and the type
//! hierarchy. It is cheap to clone; clones share state, and the last clone to
//! go away shuts the context down.
//!
//! Locking:
//! - one arena mutex guards node records, reference counts and the needed
//!   graph
//! - each node implementation sits behind its own mutex
//! - node implementations are never called, and events never raised, while
//!   the arena mutex is held
//! - node signals are raised only after the node's own mutex is released
//! - `global_error` is taken before the arena mutex, never after

mod arena;
mod enumerate;
mod global;
mod handle;
mod node_ops;

pub use global::WaitPolicy;
pub use handle::{LockHandle, NodeHandle, NodeRef};

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, RwLock};
use sensoconf::{ContextConfig, ModulesConfig, SensoConfig};
use tracing::{info, trace};
use uuid::Uuid;

use arena::{NodeArena, NodeRecord, SharedNode};

use crate::description::ProductionNodeDescription;
use crate::event::{CallbackHandle, Event, StatusEvent};
use crate::factory::SharedFactory;
use crate::node::NodeSignals;
use crate::node_info::{NodeInfo, NodeInfoList};
use crate::status::{Result, Status};
use crate::types::{NodeType, TypeHierarchy};

/// Context-wide notifications
#[derive(Debug, Default)]
struct ContextEvents {
    node_created: StatusEvent<NodeHandle>,
    node_destroyed: Event<String>,
    global_error_changed: Event<Option<Status>>,
    shutdown: Event<()>,
}

pub(crate) struct ContextInner {
    id: Uuid,
    config: ContextConfig,
    modules: ModulesConfig,
    nodes: Mutex<NodeArena>,
    factories: RwLock<Vec<SharedFactory>>,
    types: RwLock<TypeHierarchy>,
    next_lock: AtomicU32,
    global_mirror: Mutex<Option<bool>>,
    global_error: Mutex<Option<Status>>,
    /// Bumped whenever any node reports new data
    data_seq: Mutex<u64>,
    data_cond: Condvar,
    shut_down: AtomicBool,
    events: ContextEvents,
}

impl ContextInner {
    /// Finish tearing down records removed from the arena, in order.
    fn finish_destroy(&self, destroyed: Vec<(NodeHandle, NodeRecord)>) {
        if destroyed.is_empty() {
            return;
        }

        let mut had_error = false;
        for (handle, record) in destroyed {
            record.node.lock().shutdown();
            info!(context = %self.id, node = %record.name, %handle, "Node destroyed");
            had_error |= record.error.is_some();
            self.events.node_destroyed.raise(&record.name);
        }

        if had_error {
            self.refresh_global_error();
        }
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained = self.nodes.lock().drain();
        info!(context = %self.id, nodes = drained.len(), "Shutting down context");
        self.finish_destroy(drained);
        self.events.shutdown.raise(&());
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Shared handle to a node registry
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

/// Non-owning reference to a context
#[derive(Clone)]
pub struct WeakContext {
    inner: Weak<ContextInner>,
}

impl WeakContext {
    pub fn upgrade(&self) -> Option<Context> {
        self.inner.upgrade().map(Context::from_inner)
    }
}

impl std::fmt::Debug for WeakContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakContext").finish_non_exhaustive()
    }
}

impl Context {
    /// A context with default configuration
    pub fn new() -> Self {
        Self::with_config(&SensoConfig::default())
    }

    pub fn with_config(config: &SensoConfig) -> Self {
        let inner = ContextInner {
            id: Uuid::new_v4(),
            config: config.context.clone(),
            modules: config.modules.clone(),
            nodes: Mutex::new(NodeArena::new()),
            factories: RwLock::new(Vec::new()),
            types: RwLock::new(TypeHierarchy::new()),
            next_lock: AtomicU32::new(1),
            global_mirror: Mutex::new(config.context.global_mirror),
            global_error: Mutex::new(None),
            data_seq: Mutex::new(0),
            data_cond: Condvar::new(),
            shut_down: AtomicBool::new(false),
            events: ContextEvents::default(),
        };
        info!(context = %inner.id, "Context initialized");
        Self {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    pub fn downgrade(&self) -> WeakContext {
        WeakContext {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn weak_inner(&self) -> Weak<ContextInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            Err(Status::NotInit)
        } else {
            Ok(())
        }
    }

    /// Destroy every node now, nodes nobody needs first, then raise the
    /// shutdown event. Later calls do nothing.
    pub fn force_shutdown(&self) {
        self.inner.shutdown();
    }

    // =========================================================================
    // Types
    // =========================================================================

    pub fn register_node_type(&self, name: &str, base: NodeType) -> Result<NodeType> {
        self.inner.types.write().register_type(name, base)
    }

    pub fn type_by_name(&self, name: &str) -> Option<NodeType> {
        self.inner.types.read().type_by_name(name)
    }

    pub fn type_name(&self, node_type: NodeType) -> Option<String> {
        self.inner.types.read().type_name(node_type).map(str::to_string)
    }

    pub fn is_type_derived_from(&self, node_type: NodeType, base: NodeType) -> Result<bool> {
        self.inner.types.read().is_derived_from(node_type, base)
    }

    // =========================================================================
    // Reference counting
    // =========================================================================

    /// Take one more reference on a node.
    pub fn add_ref(&self, node: NodeHandle) -> Result<()> {
        let count = self.inner.nodes.lock().add_ref(node)?;
        trace!(%node, count, "AddRef");
        Ok(())
    }

    /// Drop one reference. The last one destroys the node, then any needed
    /// node nothing else holds, in that order.
    pub fn release(&self, node: NodeHandle) -> Result<()> {
        let destroyed = self.inner.nodes.lock().release(node)?;
        trace!(%node, destroyed = destroyed.len(), "Release");
        self.inner.finish_destroy(destroyed);
        Ok(())
    }

    /// Current reference count, including references held by dependents
    pub fn ref_count(&self, node: NodeHandle) -> Result<u32> {
        Ok(self.inner.nodes.lock().get(node)?.ref_count)
    }

    /// Adopt a raw reference, e.g. one taken with [`Context::add_ref`].
    pub fn adopt(&self, node: NodeHandle) -> Result<NodeRef> {
        if !self.inner.nodes.lock().contains(node) {
            return Err(Status::BadParam);
        }
        Ok(NodeRef::from_raw(self.weak_inner(), node))
    }

    fn counted(&self, node: NodeHandle) -> Result<NodeRef> {
        self.add_ref(node)?;
        Ok(NodeRef::from_raw(self.weak_inner(), node))
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn node_count(&self) -> usize {
        self.inner.nodes.lock().len()
    }

    pub fn node_name(&self, node: NodeHandle) -> Result<String> {
        Ok(self.inner.nodes.lock().get(node)?.name.clone())
    }

    pub fn node_description(&self, node: NodeHandle) -> Result<ProductionNodeDescription> {
        Ok(self.inner.nodes.lock().get(node)?.description.clone())
    }

    pub fn node_created_at(&self, node: NodeHandle) -> Result<DateTime<Utc>> {
        Ok(self.inner.nodes.lock().get(node)?.created_at)
    }

    pub fn node_signals(&self, node: NodeHandle) -> Result<Arc<NodeSignals>> {
        Ok(Arc::clone(&self.inner.nodes.lock().get(node)?.signals))
    }

    /// Nodes `node` needs, in the order they were attached
    pub fn needed_nodes(&self, node: NodeHandle) -> Result<Vec<NodeHandle>> {
        self.inner.nodes.lock().needed_of(node)
    }

    pub(crate) fn shared_node(&self, node: NodeHandle) -> Result<SharedNode> {
        Ok(Arc::clone(&self.inner.nodes.lock().get(node)?.node))
    }

    /// Implementation and signals of a live node, for calls whose outcome is
    /// announced once the node lock is released
    fn node_parts(&self, node: NodeHandle) -> Result<(SharedNode, Arc<NodeSignals>)> {
        let arena = self.inner.nodes.lock();
        let record = arena.get(node)?;
        Ok((Arc::clone(&record.node), Arc::clone(&record.signals)))
    }

    /// Info tree for a live node. Every node in the tree is referenced on
    /// behalf of the returned info.
    pub fn node_info(&self, node: NodeHandle) -> Result<NodeInfo> {
        let tree = {
            let mut arena = self.inner.nodes.lock();
            ExistingTree::collect(&mut arena, node)
        };
        Ok(tree.ok_or(Status::BadParam)?.into_info(&self.weak_inner()))
    }

    fn existing_infos(&self, filter: impl Fn(&NodeRecord) -> bool) -> NodeInfoList {
        let trees: Vec<ExistingTree> = {
            let mut arena = self.inner.nodes.lock();
            let handles: Vec<_> = arena
                .handles()
                .into_iter()
                .filter(|h| arena.get(*h).map(|r| filter(r)).unwrap_or(false))
                .collect();
            handles
                .into_iter()
                .filter_map(|h| ExistingTree::collect(&mut arena, h))
                .collect()
        };
        let weak = self.weak_inner();
        trees.into_iter().map(|t| t.into_info(&weak)).collect()
    }

    /// Every live node, in creation order
    pub fn enumerate_existing_nodes(&self) -> NodeInfoList {
        self.existing_infos(|_| true)
    }

    /// Live nodes of exactly `node_type`
    pub fn enumerate_existing_nodes_by_type(&self, node_type: NodeType) -> NodeInfoList {
        self.existing_infos(|r| r.description.node_type == node_type)
    }

    /// First live node of `node_type`; `NoMatch` if there is none.
    pub fn find_existing_ref_node_by_type(&self, node_type: NodeType) -> Result<NodeRef> {
        let found = {
            let arena = self.inner.nodes.lock();
            arena.handles().into_iter().find(|h| {
                arena
                    .get(*h)
                    .map(|r| r.description.node_type == node_type)
                    .unwrap_or(false)
            })
        };
        self.counted(found.ok_or(Status::NoMatch)?)
    }

    /// Live node named `name`; `BadNodeName` if there is none.
    pub fn get_ref_node_handle_by_name(&self, name: &str) -> Result<NodeRef> {
        let found = self.inner.nodes.lock().by_name(name);
        self.counted(found.ok_or(Status::BadNodeName)?)
    }

    // =========================================================================
    // Context events
    // =========================================================================

    /// The handler receives an uncounted handle; take a reference to keep it.
    pub fn register_to_node_creation<F>(&self, handler: F) -> CallbackHandle
    where
        F: Fn(&NodeHandle) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.events.node_created.register(handler)
    }

    pub fn unregister_from_node_creation(&self, callback: CallbackHandle) -> Result<()> {
        self.inner.events.node_created.unregister(callback)
    }

    /// The handler receives the destroyed node's instance name.
    pub fn register_to_node_destruction<F>(&self, handler: F) -> CallbackHandle
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.inner.events.node_destroyed.register(handler)
    }

    pub fn unregister_from_node_destruction(&self, callback: CallbackHandle) -> Result<()> {
        self.inner.events.node_destroyed.unregister(callback)
    }

    pub fn register_to_global_error_state_change<F>(&self, handler: F) -> CallbackHandle
    where
        F: Fn(&Option<Status>) + Send + Sync + 'static,
    {
        self.inner.events.global_error_changed.register(handler)
    }

    pub fn unregister_from_global_error_state_change(&self, callback: CallbackHandle) -> Result<()> {
        self.inner.events.global_error_changed.unregister(callback)
    }

    pub fn register_to_shutdown<F>(&self, handler: F) -> CallbackHandle
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.inner.events.shutdown.register(handler)
    }

    pub fn unregister_from_shutdown(&self, callback: CallbackHandle) -> Result<()> {
        self.inner.events.shutdown.unregister(callback)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("nodes", &self.node_count())
            .finish()
    }
}

/// Live subtree captured under the arena lock, one reference per node
struct ExistingTree {
    handle: NodeHandle,
    description: ProductionNodeDescription,
    name: String,
    creation_info: String,
    needed: Vec<ExistingTree>,
}

impl ExistingTree {
    /// `None` if `handle` is not live.
    fn collect(arena: &mut NodeArena, handle: NodeHandle) -> Option<Self> {
        let record = arena.get(handle).ok()?;
        let description = record.description.clone();
        let name = record.name.clone();
        let creation_info = record.creation_info.clone();
        arena.add_ref(handle).ok()?;

        let needed = arena
            .needed_of(handle)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|n| ExistingTree::collect(arena, n))
            .collect();
        Some(Self {
            handle,
            description,
            name,
            creation_info,
            needed,
        })
    }

    fn into_info(self, ctx: &Weak<ContextInner>) -> NodeInfo {
        let needed = self.needed.into_iter().map(|t| t.into_info(ctx)).collect();
        NodeInfo::existing(
            self.description,
            self.name,
            self.creation_info,
            needed,
            NodeRef::from_raw(ctx.clone(), self.handle),
        )
    }
}
