//! Per-node operations: properties, capabilities, change locks, needed nodes

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, warn};

use super::arena::LockState;
use super::{Context, LockHandle, NodeHandle};
use crate::capability::{self, MapOutputMode};
use crate::node::{apply_property, PropertyValue};
use crate::status::{Result, Status};
use crate::types::NodeType;

impl Context {
    // =========================================================================
    // Capabilities
    // =========================================================================

    pub fn is_capability_supported(&self, node: NodeHandle, capability: &str) -> Result<bool> {
        let shared = self.shared_node(node)?;
        let supported = shared.lock().is_capability_supported(capability);
        Ok(supported)
    }

    pub fn supported_map_output_modes(&self, node: NodeHandle) -> Result<Vec<MapOutputMode>> {
        let shared = self.shared_node(node)?;
        let modes = shared.lock().supported_map_output_modes();
        Ok(modes)
    }

    pub fn supported_user_positions(&self, node: NodeHandle) -> Result<u32> {
        let shared = self.shared_node(node)?;
        let count = shared.lock().supported_user_positions();
        Ok(count)
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Fail with `NodeIsLocked` unless `presented` (or the calling thread)
    /// may change `node`.
    pub(super) fn check_changes_allowed(&self, node: NodeHandle, presented: Option<LockHandle>) -> Result<()> {
        let arena = self.inner.nodes.lock();
        if arena.get(node)?.lock.allows_changes(presented) {
            Ok(())
        } else {
            Err(Status::NodeIsLocked)
        }
    }

    /// Set a property, presenting `lock` if the caller holds one.
    pub fn set_property(
        &self,
        node: NodeHandle,
        name: &str,
        value: &PropertyValue,
        lock: Option<LockHandle>,
    ) -> Result<()> {
        self.check_changes_allowed(node, lock)?;
        let (shared, signals) = self.node_parts(node)?;
        {
            let mut target = shared.lock();
            apply_property(target.as_mut(), name, value)?;
        }
        signals.property_changed.raise(&name.to_string());
        Ok(())
    }

    pub fn set_int_property(&self, node: NodeHandle, name: &str, value: u64) -> Result<()> {
        self.set_property(node, name, &PropertyValue::Int(value), None)
    }

    pub fn get_int_property(&self, node: NodeHandle, name: &str) -> Result<u64> {
        let shared = self.shared_node(node)?;
        let value = shared.lock().get_int_property(name);
        value
    }

    pub fn set_real_property(&self, node: NodeHandle, name: &str, value: f64) -> Result<()> {
        self.set_property(node, name, &PropertyValue::Real(value), None)
    }

    pub fn get_real_property(&self, node: NodeHandle, name: &str) -> Result<f64> {
        let shared = self.shared_node(node)?;
        let value = shared.lock().get_real_property(name);
        value
    }

    pub fn set_string_property(&self, node: NodeHandle, name: &str, value: &str) -> Result<()> {
        self.set_property(node, name, &PropertyValue::String(value.to_string()), None)
    }

    pub fn get_string_property(&self, node: NodeHandle, name: &str) -> Result<String> {
        let shared = self.shared_node(node)?;
        let value = shared.lock().get_string_property(name);
        value
    }

    pub fn set_general_property(&self, node: NodeHandle, name: &str, value: &[u8]) -> Result<()> {
        self.set_property(node, name, &PropertyValue::General(value.to_vec()), None)
    }

    pub fn get_general_property(&self, node: NodeHandle, name: &str) -> Result<Vec<u8>> {
        let shared = self.shared_node(node)?;
        let value = shared.lock().get_general_property(name);
        value
    }

    // =========================================================================
    // Mirror
    // =========================================================================

    /// Mirror a generator. Nodes without the `Mirror` capability, and nodes
    /// that are not generators, are `InvalidOperation`.
    pub fn set_mirror(&self, node: NodeHandle, mirror: bool) -> Result<()> {
        self.set_mirror_with_lock(node, mirror, None)
    }

    pub fn set_mirror_with_lock(
        &self,
        node: NodeHandle,
        mirror: bool,
        lock: Option<LockHandle>,
    ) -> Result<()> {
        let is_generator = self.inner.nodes.lock().get(node)?.is_generator;
        if !is_generator {
            return Err(Status::InvalidOperation);
        }
        self.check_changes_allowed(node, lock)?;

        let shared = self.shared_node(node)?;
        let mut target = shared.lock();
        if !target.is_capability_supported(capability::MIRROR) {
            return Err(Status::InvalidOperation);
        }
        target.set_mirror(mirror)
    }

    pub fn is_mirrored(&self, node: NodeHandle) -> Result<bool> {
        let shared = self.shared_node(node)?;
        let mirrored = shared.lock().is_mirrored();
        Ok(mirrored)
    }

    // =========================================================================
    // Change locks
    // =========================================================================

    /// Lock `node` against changes from anyone not presenting the returned
    /// lock. A node that is already locked is `NodeIsLocked`.
    pub fn lock_for_changes(&self, node: NodeHandle) -> Result<LockHandle> {
        let (lock, shared, signals) = {
            let mut arena = self.inner.nodes.lock();
            let record = arena.get_mut(node)?;
            if record.lock.is_locked() {
                return Err(Status::NodeIsLocked);
            }
            let lock = self.inner.next_lock.fetch_add(1, Ordering::SeqCst);
            record.lock = LockState {
                lock,
                changes_thread: None,
            };
            (lock, Arc::clone(&record.node), Arc::clone(&record.signals))
        };

        let notified = {
            let mut target = shared.lock();
            if target.is_capability_supported(capability::LOCK_AWARE) {
                target.set_lock_state(true)
            } else {
                Ok(())
            }
        };
        if let Err(status) = notified {
            if let Ok(record) = self.inner.nodes.lock().get_mut(node) {
                record.lock = LockState::default();
            }
            return Err(status);
        }

        debug!(%node, lock, "Node locked for changes");
        signals.lock_changed.raise(&true);
        Ok(LockHandle(lock))
    }

    /// Release a change lock. Presenting any other lock is `BadParam`. A
    /// `LockAware` node that refuses stays locked and its error is returned.
    pub fn unlock_for_changes(&self, node: NodeHandle, lock: LockHandle) -> Result<()> {
        let (previous, shared, signals) = {
            let mut arena = self.inner.nodes.lock();
            let record = arena.get_mut(node)?;
            if !record.lock.is_locked() || record.lock.lock != lock.0 {
                return Err(Status::BadParam);
            }
            let previous = std::mem::take(&mut record.lock);
            (previous, Arc::clone(&record.node), Arc::clone(&record.signals))
        };

        let notified = {
            let mut target = shared.lock();
            if target.is_capability_supported(capability::LOCK_AWARE) {
                target.set_lock_state(false)
            } else {
                Ok(())
            }
        };
        if let Err(status) = notified {
            // the node stays locked; only restore a lock nobody replaced
            if let Ok(record) = self.inner.nodes.lock().get_mut(node) {
                if !record.lock.is_locked() {
                    record.lock = previous;
                }
            }
            warn!(%node, lock = lock.0, %status, "Node refused to unlock");
            return Err(status);
        }

        debug!(%node, lock = lock.0, "Node unlocked");
        signals.lock_changed.raise(&false);
        Ok(())
    }

    /// Let the calling thread change `node` without presenting `lock` until
    /// [`Context::locked_node_end_changes`].
    pub fn locked_node_start_changes(&self, node: NodeHandle, lock: LockHandle) -> Result<()> {
        if lock == LockHandle::NONE {
            return Err(Status::InvalidOperation);
        }
        let mut arena = self.inner.nodes.lock();
        let record = arena.get_mut(node)?;
        if record.lock.lock != lock.0 {
            return Err(Status::NodeIsLocked);
        }
        record.lock.changes_thread = Some(std::thread::current().id());
        Ok(())
    }

    pub fn locked_node_end_changes(&self, node: NodeHandle, lock: LockHandle) -> Result<()> {
        let mut arena = self.inner.nodes.lock();
        let record = arena.get_mut(node)?;
        if !record.lock.is_locked() || record.lock.lock != lock.0 {
            return Err(Status::BadParam);
        }
        record.lock.changes_thread = None;
        Ok(())
    }

    pub fn is_locked_for_changes(&self, node: NodeHandle) -> Result<bool> {
        Ok(self.inner.nodes.lock().get(node)?.lock.is_locked())
    }

    // =========================================================================
    // Needed nodes
    // =========================================================================

    /// Make `node` depend on `needed`, which then stays alive at least as long
    /// as `node` does. Self dependencies and cycles are `InvalidOperation`.
    pub fn add_needed_node(&self, node: NodeHandle, needed: NodeHandle) -> Result<()> {
        let added = self.inner.nodes.lock().add_needed(node, needed)?;
        if added {
            debug!(%node, %needed, "Needed node added");
        }
        Ok(())
    }

    /// Undo [`Context::add_needed_node`]. `needed` is destroyed if nothing
    /// else holds it.
    pub fn remove_needed_node(&self, node: NodeHandle, needed: NodeHandle) -> Result<()> {
        let destroyed = self.inner.nodes.lock().remove_needed(node, needed)?;
        debug!(%node, %needed, destroyed = destroyed.len(), "Needed node removed");
        self.inner.finish_destroy(destroyed);
        Ok(())
    }

    /// Whether `node` currently needs `needed`
    pub fn is_needed_node(&self, node: NodeHandle, needed: NodeHandle) -> Result<bool> {
        self.inner.nodes.lock().is_needed_by(node, needed)
    }

    /// How many live nodes need `node`
    pub fn dependents_count(&self, node: NodeHandle) -> Result<usize> {
        self.inner.nodes.lock().dependents_count(node)
    }

    /// Whether `node` is of `node_type` or a type derived from it
    pub fn is_node_of_type(&self, node: NodeHandle, node_type: NodeType) -> Result<bool> {
        let actual = self.inner.nodes.lock().get(node)?.description.node_type;
        self.is_type_derived_from(actual, node_type)
    }
}
