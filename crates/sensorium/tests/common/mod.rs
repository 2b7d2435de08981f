//! Scripted factories and nodes shared by the integration tests
//!
//! A `ScriptedFactory` produces `ScriptedNode`s whose capabilities, modes and
//! failures are set up front. Everything the nodes observe is recorded in a
//! `Probe` so tests can assert on it after the fact.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sensorium::{
    BoxedNode, Context, InstantiateRequest, MapOutputMode, NodeInfoList, NodeQuery, NodeSignals,
    NodeType, ProductionNode, ProductionNodeDescription, ProductionNodeFactory, Result, Status,
    Version,
};

// =============================================================================
// Observation
// =============================================================================

/// Live state of one scripted node, reachable from the test
pub struct NodeState {
    pub name: String,
    pub signals: Arc<NodeSignals>,
    pub new_data: AtomicBool,
    pub updates: AtomicUsize,
    pub generating: AtomicBool,
    pub mirrored: AtomicBool,
    pub error: Mutex<Option<Status>>,
}

impl NodeState {
    /// Pretend a frame arrived.
    pub fn push_data(&self) {
        self.new_data.store(true, Ordering::SeqCst);
        self.signals.new_data_available.raise(&());
    }

    pub fn set_error(&self, error: Option<Status>) {
        *self.error.lock() = error;
        self.signals.error_state_changed.raise(&error);
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

/// What the nodes of one factory have been through
#[derive(Default)]
pub struct Probe {
    pub instantiated: AtomicUsize,
    pub nodes: Mutex<Vec<Arc<NodeState>>>,
    pub shut_down: Mutex<Vec<String>>,
    pub started: Mutex<Vec<String>>,
    pub lock_states: Mutex<Vec<bool>>,
}

impl Probe {
    pub fn node(&self, name: &str) -> Arc<NodeState> {
        self.nodes
            .lock()
            .iter()
            .rev()
            .find(|n| n.name == name)
            .cloned()
            .unwrap_or_else(|| panic!("no scripted node named {name}"))
    }

    pub fn instantiated(&self) -> usize {
        self.instantiated.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Node
// =============================================================================

#[derive(Clone, Default)]
pub struct NodeTraits {
    pub capabilities: Vec<&'static str>,
    pub modes: Vec<MapOutputMode>,
    pub user_positions: u32,
    pub refuse_lock: bool,
    /// Accepts being locked but not being unlocked
    pub refuse_unlock: bool,
}

pub struct ScriptedNode {
    traits: NodeTraits,
    state: Arc<NodeState>,
    probe: Arc<Probe>,
    ints: BTreeMap<String, u64>,
}

impl ProductionNode for ScriptedNode {
    fn is_capability_supported(&self, capability: &str) -> bool {
        self.traits.capabilities.contains(&capability)
    }

    fn set_int_property(&mut self, name: &str, value: u64) -> Result<()> {
        self.ints.insert(name.to_string(), value);
        Ok(())
    }

    fn get_int_property(&self, name: &str) -> Result<u64> {
        self.ints.get(name).copied().ok_or(Status::NoMatch)
    }

    fn start_generating(&mut self) -> Result<()> {
        self.state.generating.store(true, Ordering::SeqCst);
        self.probe.started.lock().push(self.state.name.clone());
        Ok(())
    }

    fn stop_generating(&mut self) {
        self.state.generating.store(false, Ordering::SeqCst);
    }

    fn is_generating(&self) -> bool {
        self.state.generating.load(Ordering::SeqCst)
    }

    fn is_new_data_available(&self) -> bool {
        self.state.new_data.load(Ordering::SeqCst)
    }

    fn update_data(&mut self) -> Result<()> {
        self.state.new_data.store(false, Ordering::SeqCst);
        self.state.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_mirror(&mut self, mirror: bool) -> Result<()> {
        self.state.mirrored.store(mirror, Ordering::SeqCst);
        Ok(())
    }

    fn is_mirrored(&self) -> bool {
        self.state.mirrored.load(Ordering::SeqCst)
    }

    fn supported_map_output_modes(&self) -> Vec<MapOutputMode> {
        self.traits.modes.clone()
    }

    fn supported_user_positions(&self) -> u32 {
        self.traits.user_positions
    }

    fn set_lock_state(&mut self, locked: bool) -> Result<()> {
        if self.traits.refuse_lock || (!locked && self.traits.refuse_unlock) {
            return Err(Status::InvalidOperation);
        }
        self.probe.lock_states.lock().push(locked);
        Ok(())
    }

    fn error_state(&self) -> Option<Status> {
        *self.state.error.lock()
    }

    fn shutdown(&mut self) {
        self.probe.shut_down.lock().push(self.state.name.clone());
    }
}

// =============================================================================
// Factory
// =============================================================================

pub struct ScriptedFactory {
    description: ProductionNodeDescription,
    needs: Vec<NodeType>,
    traits: NodeTraits,
    candidates: usize,
    enumerate_error: Option<Status>,
    instantiate_error: Mutex<Option<Status>>,
    pub probe: Arc<Probe>,
}

impl ScriptedFactory {
    pub fn new(node_type: NodeType, vendor: &str, name: &str) -> Self {
        Self {
            description: ProductionNodeDescription::new(
                node_type,
                vendor,
                name,
                Version::new(1, 0, 0, 0),
            ),
            needs: Vec::new(),
            traits: NodeTraits::default(),
            candidates: 1,
            enumerate_error: None,
            instantiate_error: Mutex::new(None),
            probe: Arc::new(Probe::default()),
        }
    }

    pub fn version(mut self, version: Version) -> Self {
        self.description.version = version;
        self
    }

    /// Each candidate needs a node of `node_type`.
    pub fn needs(mut self, node_type: NodeType) -> Self {
        self.needs.push(node_type);
        self
    }

    pub fn capability(mut self, capability: &'static str) -> Self {
        self.traits.capabilities.push(capability);
        self
    }

    pub fn mode(mut self, mode: MapOutputMode) -> Self {
        self.traits.modes.push(mode);
        self
    }

    pub fn user_positions(mut self, count: u32) -> Self {
        self.traits.user_positions = count;
        self
    }

    pub fn refuse_lock(mut self) -> Self {
        self.traits.refuse_lock = true;
        self
    }

    pub fn refuse_unlock(mut self) -> Self {
        self.traits.refuse_unlock = true;
        self
    }

    /// Offer `count` candidates, told apart by creation info.
    pub fn candidates(mut self, count: usize) -> Self {
        self.candidates = count;
        self
    }

    pub fn fail_enumeration(mut self, status: Status) -> Self {
        self.enumerate_error = Some(status);
        self
    }

    pub fn set_instantiate_error(&self, status: Option<Status>) {
        *self.instantiate_error.lock() = status;
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl ProductionNodeFactory for ScriptedFactory {
    fn description(&self) -> &ProductionNodeDescription {
        &self.description
    }

    /// One candidate per option of the first needed type; other needed
    /// types use their first option.
    fn describe_needs(&self, ctx: &Context, _query: Option<&NodeQuery>) -> Result<NodeInfoList> {
        if let Some(status) = self.enumerate_error {
            return Err(status);
        }

        let mut list = NodeInfoList::new();
        let Some((first, rest)) = self.needs.split_first() else {
            for i in 0..self.candidates {
                let creation_info = if self.candidates > 1 {
                    format!("candidate{i}")
                } else {
                    String::new()
                };
                list.add_node(self.description.clone(), &creation_info, NodeInfoList::new());
            }
            return Ok(list);
        };

        let mut fixed = NodeInfoList::new();
        for node_type in rest {
            let options = ctx.enumerate_production_trees(*node_type, None, None)?;
            if let Some(info) = options.first() {
                fixed.add(info.clone());
            }
        }

        for option in ctx.enumerate_production_trees(*first, None, None)?.iter() {
            let mut needed = NodeInfoList::new();
            needed.add(option.clone());
            for info in fixed.iter() {
                needed.add(info.clone());
            }
            list.add_node(self.description.clone(), "", needed);
        }
        Ok(list)
    }

    fn instantiate(&self, request: InstantiateRequest<'_>) -> Result<BoxedNode> {
        if let Some(status) = *self.instantiate_error.lock() {
            return Err(status);
        }
        self.probe.instantiated.fetch_add(1, Ordering::SeqCst);

        let state = Arc::new(NodeState {
            name: request.instance_name.to_string(),
            signals: Arc::clone(&request.signals),
            new_data: AtomicBool::new(false),
            updates: AtomicUsize::new(0),
            generating: AtomicBool::new(false),
            mirrored: AtomicBool::new(false),
            error: Mutex::new(None),
        });
        self.probe.nodes.lock().push(Arc::clone(&state));

        Ok(Box::new(ScriptedNode {
            traits: self.traits.clone(),
            state,
            probe: Arc::clone(&self.probe),
            ints: BTreeMap::new(),
        }))
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Collects the names passed to the node destruction event.
pub fn record_destructions(ctx: &Context) -> Arc<Mutex<Vec<String>>> {
    let destroyed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&destroyed);
    ctx.register_to_node_destruction(move |name: &String| sink.lock().push(name.clone()));
    destroyed
}
