//! Node handles
//!
//! [`NodeHandle`] is a plain index + serial pair and does not keep anything
//! alive. [`NodeRef`] is a handle that owns one counted reference and gives it
//! back when dropped.

use std::fmt;
use std::sync::Weak;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{Context, ContextInner};

/// Handle of a live node
///
/// Handles are not counted. Once the node is destroyed every operation on the
/// handle fails with `BadParam`, even if its slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeHandle {
    pub(crate) index: u32,
    pub(crate) serial: u64,
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.serial)
    }
}

/// Token returned by `lock_for_changes`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockHandle(pub(crate) u32);

impl LockHandle {
    /// The value no lock ever has
    pub const NONE: LockHandle = LockHandle(0);

    pub fn id(&self) -> u32 {
        self.0
    }
}

/// A counted reference to a node
///
/// Cloning takes another reference, dropping releases one. A reference does
/// not keep its context alive; once the context is gone dropping is a no-op.
pub struct NodeRef {
    ctx: Weak<ContextInner>,
    handle: NodeHandle,
}

impl NodeRef {
    /// Wrap a reference the caller already owns.
    pub(crate) fn from_raw(ctx: Weak<ContextInner>, handle: NodeHandle) -> Self {
        Self { ctx, handle }
    }

    /// A reference that owns nothing
    fn detached(handle: NodeHandle) -> Self {
        Self {
            ctx: Weak::new(),
            handle,
        }
    }

    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    /// Give up RAII ownership. The reference stays counted and must be
    /// released with [`Context::release`].
    pub fn into_raw(mut self) -> NodeHandle {
        // an empty Weak never upgrades, so Drop releases nothing
        self.ctx = Weak::new();
        self.handle
    }

    /// The owning context, if it is still alive
    pub fn context(&self) -> Option<Context> {
        self.ctx.upgrade().map(Context::from_inner)
    }
}

/// A clone that could not take its reference (the node or its context is
/// gone) is detached: it has no context and gives nothing back when dropped.
impl Clone for NodeRef {
    fn clone(&self) -> Self {
        let Some(ctx) = self.context() else {
            return Self::detached(self.handle);
        };
        if let Err(status) = ctx.add_ref(self.handle) {
            warn!(handle = %self.handle, %status, "Failed to add node reference");
            return Self::detached(self.handle);
        }
        Self {
            ctx: self.ctx.clone(),
            handle: self.handle,
        }
    }
}

impl Drop for NodeRef {
    fn drop(&mut self) {
        if let Some(ctx) = self.context() {
            if let Err(status) = ctx.release(self.handle) {
                warn!(handle = %self.handle, %status, "Failed to release node reference");
            }
        }
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle && Weak::ptr_eq(&self.ctx, &other.ctx)
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeRef").field(&self.handle).finish()
    }
}
