//! Context-wide state: global mirror, aggregate error, generation and the
//! wait-and-update family

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::arena::SharedNode;
use super::{Context, ContextInner, NodeHandle};
use crate::capability;
use crate::node::NodeSignals;
use crate::status::{Result, Status};

/// Which generators must report new data before a wait returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Every generator
    All,
    /// This particular node
    One(NodeHandle),
    /// Any node at all
    Any,
    /// Don't wait
    None,
}

impl ContextInner {
    /// Recompute the aggregate error and raise `global_error_changed` if it
    /// moved.
    ///
    /// Lock order is `global_error` then `nodes`, so concurrent refreshes
    /// store the aggregate in the order they read the nodes.
    pub(super) fn refresh_global_error(&self) {
        let aggregate = {
            let mut current = self.global_error.lock();
            let errors = self.nodes.lock().errors();
            let aggregate = match errors.as_slice() {
                [] => None,
                [single] => Some(*single),
                _ => Some(Status::MultipleNodesError),
            };
            if *current == aggregate {
                return;
            }
            *current = aggregate;
            aggregate
        };

        match aggregate {
            Some(status) => info!(context = %self.id, %status, "Global error state changed"),
            None => info!(context = %self.id, "Global error state cleared"),
        }
        self.events.global_error_changed.raise(&aggregate);
    }

    fn on_node_error_state(&self, node: NodeHandle, error: Option<Status>) {
        let changed = match self.nodes.lock().get_mut(node) {
            Ok(record) if record.error != error => {
                record.error = error;
                true
            }
            _ => false,
        };
        if changed {
            debug!(%node, ?error, "Node error state changed");
            self.refresh_global_error();
        }
    }

    fn notify_new_data(&self) {
        let mut seq = self.data_seq.lock();
        *seq = seq.wrapping_add(1);
        self.data_cond.notify_all();
    }
}

impl Context {
    /// Route a new node's signals into the context.
    pub(super) fn subscribe_to_signals(&self, node: NodeHandle, signals: &NodeSignals) {
        let weak: Weak<ContextInner> = self.weak_inner();
        signals.error_state_changed.register(move |error: &Option<Status>| {
            if let Some(inner) = weak.upgrade() {
                inner.on_node_error_state(node, *error);
            }
        });

        let weak: Weak<ContextInner> = self.weak_inner();
        signals.new_data_available.register(move |_: &()| {
            if let Some(inner) = weak.upgrade() {
                inner.notify_new_data();
            }
        });
    }

    // =========================================================================
    // Global mirror
    // =========================================================================

    /// Mirror every node that supports it, now and when created later.
    ///
    /// A mirror-capable node locked for changes fails the call with
    /// `NodeIsLocked` before anything is touched. Otherwise the call stops at
    /// the first node that refuses. The setting only sticks for future nodes
    /// once every live node has accepted it.
    pub fn set_global_mirror(&self, mirror: bool) -> Result<()> {
        self.ensure_running()?;

        let mut targets = Vec::new();
        for (handle, shared, _) in self.live_nodes(|_| true) {
            let supported = shared.lock().is_capability_supported(capability::MIRROR);
            if supported {
                self.check_changes_allowed(handle, None)?;
                targets.push((handle, shared));
            }
        }

        for (handle, shared) in targets {
            let applied = shared.lock().set_mirror(mirror);
            if let Err(status) = applied {
                warn!(%handle, %status, "Failed to apply global mirror");
                return Err(status);
            }
        }

        *self.inner.global_mirror.lock() = Some(mirror);
        debug!(mirror, "Global mirror set");
        Ok(())
    }

    /// `None` until a global mirror has been set or configured
    pub fn global_mirror(&self) -> Option<bool> {
        *self.inner.global_mirror.lock()
    }

    // =========================================================================
    // Global error
    // =========================================================================

    /// `Ok` when no node is in error, the node's own error when exactly one
    /// is, `MultipleNodesError` otherwise.
    pub fn global_error_state(&self) -> Result<()> {
        match *self.inner.global_error.lock() {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    pub fn node_error_state(&self, node: NodeHandle) -> Result<Option<Status>> {
        Ok(self.inner.nodes.lock().get(node)?.error)
    }

    // =========================================================================
    // Generation
    // =========================================================================

    /// Live nodes passing `filter`, needed nodes before their dependents
    fn live_nodes(&self, filter: impl Fn(bool) -> bool) -> Vec<LiveNode> {
        let arena = self.inner.nodes.lock();
        arena
            .dependency_order()
            .into_iter()
            .filter_map(|h| {
                let record = arena.get(h).ok()?;
                filter(record.is_generator)
                    .then(|| (h, Arc::clone(&record.node), Arc::clone(&record.signals)))
            })
            .collect()
    }

    fn generators(&self) -> Vec<LiveNode> {
        self.live_nodes(|is_generator| is_generator)
    }

    /// Start every generator that isn't running, after the nodes it needs.
    pub fn start_generating_all(&self) -> Result<()> {
        self.ensure_running()?;
        for (handle, shared, signals) in self.generators() {
            if start(&shared)? {
                debug!(%handle, "Generation started");
                signals.generation_running_changed.raise(&true);
            }
        }
        Ok(())
    }

    pub fn stop_generating_all(&self) -> Result<()> {
        self.ensure_running()?;
        for (handle, shared, signals) in self.generators() {
            if stop(&shared) {
                debug!(%handle, "Generation stopped");
                signals.generation_running_changed.raise(&false);
            }
        }
        Ok(())
    }

    pub fn start_generating(&self, node: NodeHandle) -> Result<()> {
        let (shared, signals) = self.generator(node)?;
        if start(&shared)? {
            signals.generation_running_changed.raise(&true);
        }
        Ok(())
    }

    pub fn stop_generating(&self, node: NodeHandle) -> Result<()> {
        let (shared, signals) = self.generator(node)?;
        if stop(&shared) {
            signals.generation_running_changed.raise(&false);
        }
        Ok(())
    }

    pub fn is_generating(&self, node: NodeHandle) -> Result<bool> {
        let (shared, _) = self.generator(node)?;
        let generating = shared.lock().is_generating();
        Ok(generating)
    }

    /// `BadType` for nodes that don't generate data
    fn generator(&self, node: NodeHandle) -> Result<(SharedNode, Arc<NodeSignals>)> {
        let arena = self.inner.nodes.lock();
        let record = arena.get(node)?;
        if !record.is_generator {
            return Err(Status::BadType);
        }
        Ok((Arc::clone(&record.node), Arc::clone(&record.signals)))
    }

    // =========================================================================
    // Wait and update
    // =========================================================================

    fn default_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.config.wait_timeout_ms)
    }

    /// Wait until every generator has new data, then update all of them.
    pub fn wait_and_update_all(&self) -> Result<()> {
        self.wait_and_update_all_timeout(self.default_wait_timeout())
    }

    pub fn wait_and_update_all_timeout(&self, timeout: Duration) -> Result<()> {
        self.wait_and_update(WaitPolicy::All, timeout)
    }

    /// Wait until `node` has new data, then update all generators.
    pub fn wait_one_update_all(&self, node: NodeHandle) -> Result<()> {
        self.wait_one_update_all_timeout(node, self.default_wait_timeout())
    }

    pub fn wait_one_update_all_timeout(&self, node: NodeHandle, timeout: Duration) -> Result<()> {
        self.wait_and_update(WaitPolicy::One(node), timeout)
    }

    /// Wait until any node has new data, then update all generators.
    pub fn wait_any_update_all(&self) -> Result<()> {
        self.wait_any_update_all_timeout(self.default_wait_timeout())
    }

    pub fn wait_any_update_all_timeout(&self, timeout: Duration) -> Result<()> {
        self.wait_and_update(WaitPolicy::Any, timeout)
    }

    /// Update all generators without waiting.
    pub fn wait_none_update_all(&self) -> Result<()> {
        self.wait_and_update(WaitPolicy::None, Duration::ZERO)
    }

    /// Wait for `node` then update only it and the nodes it needs.
    pub fn wait_and_update_data(&self, node: NodeHandle) -> Result<()> {
        self.wait_and_update_data_timeout(node, self.default_wait_timeout())
    }

    pub fn wait_and_update_data_timeout(&self, node: NodeHandle, timeout: Duration) -> Result<()> {
        self.ensure_running()?;
        self.wait_for(WaitPolicy::One(node), timeout)?;

        let subtree = {
            let arena = self.inner.nodes.lock();
            let mut nodes = Vec::new();
            collect_subtree(&arena, node, &mut nodes);
            nodes
        };
        for (_, shared) in subtree {
            shared.lock().update_data()?;
        }
        Ok(())
    }

    /// Block per `policy` (up to `timeout`), then update every generator.
    /// On timeout nothing is updated and the result is `WaitDataTimeout`.
    pub fn wait_and_update(&self, policy: WaitPolicy, timeout: Duration) -> Result<()> {
        self.ensure_running()?;
        self.wait_for(policy, timeout)?;
        self.update_all()
    }

    /// Bring every generator's newest data current, needed nodes first.
    pub fn update_all(&self) -> Result<()> {
        for (_, shared, _) in self.generators() {
            shared.lock().update_data()?;
        }
        Ok(())
    }

    fn wait_for(&self, policy: WaitPolicy, timeout: Duration) -> Result<()> {
        if policy == WaitPolicy::None {
            return Ok(());
        }
        let deadline = Instant::now().checked_add(timeout);

        loop {
            let seen = *self.inner.data_seq.lock();
            if self.wait_satisfied(policy)? {
                return Ok(());
            }

            let mut seq = self.inner.data_seq.lock();
            if *seq != seen {
                continue;
            }
            match deadline {
                Some(deadline) => {
                    let result = self.inner.data_cond.wait_until(&mut seq, deadline);
                    if result.timed_out() && *seq == seen {
                        debug!(?policy, ?timeout, "Timed out waiting for new data");
                        return Err(Status::WaitDataTimeout);
                    }
                }
                None => self.inner.data_cond.wait(&mut seq),
            }
        }
    }

    fn wait_satisfied(&self, policy: WaitPolicy) -> Result<bool> {
        let has_new_data = |shared: &SharedNode| shared.lock().is_new_data_available();
        match policy {
            WaitPolicy::None => Ok(true),
            WaitPolicy::All => Ok(self.generators().iter().all(|(_, n, _)| has_new_data(n))),
            WaitPolicy::Any => Ok(self
                .live_nodes(|_| true)
                .iter()
                .any(|(_, n, _)| has_new_data(n))),
            WaitPolicy::One(node) => {
                let shared = self.shared_node(node)?;
                Ok(has_new_data(&shared))
            }
        }
    }
}

/// Handle, implementation and signals of a live node
type LiveNode = (NodeHandle, SharedNode, Arc<NodeSignals>);

/// Start `node` unless it is running. `true` if it was started.
fn start(node: &SharedNode) -> Result<bool> {
    let mut target = node.lock();
    if target.is_generating() {
        return Ok(false);
    }
    target.start_generating()?;
    Ok(true)
}

/// Stop `node` if it is running. `true` if it was stopped.
fn stop(node: &SharedNode) -> bool {
    let mut target = node.lock();
    if !target.is_generating() {
        return false;
    }
    target.stop_generating();
    true
}

/// `node` and everything it needs, needed nodes first, each once
fn collect_subtree(
    arena: &super::arena::NodeArena,
    node: NodeHandle,
    out: &mut Vec<(NodeHandle, SharedNode)>,
) {
    if out.iter().any(|(h, _)| *h == node) {
        return;
    }
    for needed in arena.needed_of(node).unwrap_or_default() {
        collect_subtree(arena, needed, out);
    }
    if let Ok(record) = arena.get(node) {
        out.push((node, Arc::clone(&record.node)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeType;

    #[test]
    fn test_global_error_starts_ok() {
        let ctx = Context::new();
        assert_eq!(ctx.global_error_state(), Ok(()));
    }

    #[test]
    fn test_global_mirror_unset_by_default() {
        let ctx = Context::new();
        assert_eq!(ctx.global_mirror(), None);
        ctx.set_global_mirror(true).unwrap();
        assert_eq!(ctx.global_mirror(), Some(true));
    }

    #[test]
    fn test_wait_none_with_no_nodes() {
        let ctx = Context::new();
        assert!(ctx.wait_none_update_all().is_ok());
        assert!(ctx.wait_and_update_all_timeout(Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn test_wait_any_times_out_without_data() {
        let ctx = Context::new();
        let _depth = ctx.create_mock_node(NodeType::DEPTH, None).unwrap();
        assert_eq!(
            ctx.wait_any_update_all_timeout(Duration::from_millis(20)),
            Err(Status::WaitDataTimeout)
        );
    }

    #[test]
    fn test_wait_one_stale_handle() {
        let ctx = Context::new();
        let depth = ctx.create_mock_node(NodeType::DEPTH, None).unwrap();
        let handle = depth.handle();
        drop(depth);
        assert_eq!(
            ctx.wait_one_update_all_timeout(handle, Duration::from_millis(5)),
            Err(Status::BadParam)
        );
    }

    #[test]
    fn test_generation_requires_generator() {
        let ctx = Context::new();
        let device = ctx.create_mock_node(NodeType::DEVICE, None).unwrap();
        assert_eq!(ctx.start_generating(device.handle()), Err(Status::BadType));

        let depth = ctx.create_mock_node(NodeType::DEPTH, None).unwrap();
        ctx.start_generating_all().unwrap();
        assert_eq!(ctx.is_generating(depth.handle()), Ok(true));
        ctx.stop_generating_all().unwrap();
        assert_eq!(ctx.is_generating(depth.handle()), Ok(false));
    }
}
