//! Multicast events with deferred registration
//!
//! An event keeps three ordered lists: the active handlers, handlers added
//! since the last dispatch boundary, and handlers removed since then. Register
//! and unregister only touch the pending lists, so both are safe to call from
//! inside a handler while the event is being raised. Pending changes are
//! applied when a raise starts and again when it finishes.
//!
//! Consequences for callers:
//! - a handler registered during a raise is first called on the next raise
//! - a handler unregistered during a raise finishes its current call (and, if
//!   it had not been reached yet, is still called once in that raise) but is
//!   never called again
//!
//! Arguments are passed by reference as a single value; use a tuple for
//! events carrying more than one argument.
//!
//! A raise holds the event's dispatch lock for its whole duration. The lock is
//! reentrant, so a handler may raise the same event again on its own thread.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};

use crate::status::{Result, Status};

static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one registration. Ids are never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallbackHandle(u64);

impl CallbackHandle {
    fn next() -> Self {
        Self(NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

struct Entry<H: ?Sized> {
    handle: CallbackHandle,
    handler: Arc<H>,
}

impl<H: ?Sized> Clone for Entry<H> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle,
            handler: Arc::clone(&self.handler),
        }
    }
}

struct Lists<H: ?Sized> {
    active: Vec<Entry<H>>,
    to_add: Vec<Entry<H>>,
    to_remove: Vec<CallbackHandle>,
}

impl<H: ?Sized> Lists<H> {
    fn new() -> Self {
        Self {
            active: Vec::new(),
            to_add: Vec::new(),
            to_remove: Vec::new(),
        }
    }

    fn apply_pending(&mut self) {
        self.active.append(&mut self.to_add);
        if !self.to_remove.is_empty() {
            let removed = std::mem::take(&mut self.to_remove);
            self.active.retain(|e| !removed.contains(&e.handle));
        }
    }
}

impl<H: ?Sized> Clone for Lists<H> {
    fn clone(&self) -> Self {
        Self {
            active: self.active.clone(),
            to_add: self.to_add.clone(),
            to_remove: self.to_remove.clone(),
        }
    }
}

/// Shared machinery behind [`Event`] and [`StatusEvent`]
struct Dispatcher<H: ?Sized> {
    raising: ReentrantMutex<()>,
    lists: Mutex<Lists<H>>,
}

impl<H: ?Sized> Dispatcher<H> {
    fn new() -> Self {
        Self {
            raising: ReentrantMutex::new(()),
            lists: Mutex::new(Lists::new()),
        }
    }

    fn register(&self, handler: Arc<H>) -> CallbackHandle {
        let handle = CallbackHandle::next();
        self.lists.lock().to_add.push(Entry { handle, handler });
        handle
    }

    fn unregister(&self, handle: CallbackHandle) -> Result<()> {
        let mut lists = self.lists.lock();

        // never observed by a raise: just forget it
        if let Some(pos) = lists.to_add.iter().position(|e| e.handle == handle) {
            lists.to_add.remove(pos);
            return Ok(());
        }

        if lists.to_remove.contains(&handle) {
            return Ok(());
        }

        if lists.active.iter().any(|e| e.handle == handle) {
            lists.to_remove.push(handle);
            Ok(())
        } else {
            Err(Status::BadParam)
        }
    }

    /// Apply pending changes and take the list a raise will walk.
    fn begin_raise(&self) -> Vec<Arc<H>> {
        let mut lists = self.lists.lock();
        lists.apply_pending();
        lists.active.iter().map(|e| Arc::clone(&e.handler)).collect()
    }

    fn apply_pending(&self) {
        self.lists.lock().apply_pending();
    }

    fn clear(&self) {
        let _raising = self.raising.lock();
        let mut lists = self.lists.lock();
        lists.apply_pending();
        lists.active.clear();
    }

    fn len(&self) -> usize {
        let lists = self.lists.lock();
        lists.active.len() + lists.to_add.len() - lists.to_remove.len().min(lists.active.len())
    }

    fn snapshot(&self) -> Lists<H> {
        self.lists.lock().clone()
    }

    fn copy_from(&self, source: &Dispatcher<H>) {
        if std::ptr::eq(self, source) {
            return;
        }
        // source first, then destination
        let source_lists = source.lists.lock();
        let mut lists = self.lists.lock();
        *lists = source_lists.clone();
    }
}

type Handler<A> = dyn Fn(&A) + Send + Sync;
type StatusHandler<A> = dyn Fn(&A) -> Result<()> + Send + Sync;

/// Event whose handlers return nothing. Every handler is always called.
pub struct Event<A> {
    dispatcher: Dispatcher<Handler<A>>,
}

impl<A> Event<A> {
    pub fn new() -> Self {
        Self {
            dispatcher: Dispatcher::new(),
        }
    }

    /// Add a handler. It takes part from the next raise on.
    pub fn register<F>(&self, handler: F) -> CallbackHandle
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        self.dispatcher.register(Arc::new(handler))
    }

    /// Remove a handler. Fails with `BadParam` if the handle is unknown here.
    pub fn unregister(&self, handle: CallbackHandle) -> Result<()> {
        self.dispatcher.unregister(handle)
    }

    /// Call every registered handler with `args`.
    pub fn raise(&self, args: &A) {
        let _raising = self.dispatcher.raising.lock();
        for handler in self.dispatcher.begin_raise() {
            handler(args);
        }
        self.dispatcher.apply_pending();
    }

    /// Apply pending changes, then drop every handler.
    pub fn clear(&self) {
        self.dispatcher.clear();
    }

    /// Number of handlers that will take part in the next raise
    pub fn len(&self) -> usize {
        self.dispatcher.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace this event's handlers with a copy of `source`'s.
    pub fn copy_from(&self, source: &Event<A>) {
        self.dispatcher.copy_from(&source.dispatcher);
    }
}

impl<A> Default for Event<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for Event<A> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Dispatcher {
                raising: ReentrantMutex::new(()),
                lists: Mutex::new(self.dispatcher.snapshot()),
            },
        }
    }
}

impl<A> fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").field("handlers", &self.len()).finish()
    }
}

/// Event whose handlers report a status. A raise stops at the first failure.
pub struct StatusEvent<A> {
    dispatcher: Dispatcher<StatusHandler<A>>,
}

impl<A> StatusEvent<A> {
    pub fn new() -> Self {
        Self {
            dispatcher: Dispatcher::new(),
        }
    }

    pub fn register<F>(&self, handler: F) -> CallbackHandle
    where
        F: Fn(&A) -> Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.register(Arc::new(handler))
    }

    pub fn unregister(&self, handle: CallbackHandle) -> Result<()> {
        self.dispatcher.unregister(handle)
    }

    /// Call handlers in registration order until one fails.
    ///
    /// The first failing status is returned; handlers after it are skipped
    /// for this raise.
    pub fn raise(&self, args: &A) -> Result<()> {
        let _raising = self.dispatcher.raising.lock();
        for handler in self.dispatcher.begin_raise() {
            if let Err(status) = handler(args) {
                self.dispatcher.apply_pending();
                return Err(status);
            }
        }
        self.dispatcher.apply_pending();
        Ok(())
    }

    pub fn clear(&self) {
        self.dispatcher.clear();
    }

    pub fn len(&self) -> usize {
        self.dispatcher.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn copy_from(&self, source: &StatusEvent<A>) {
        self.dispatcher.copy_from(&source.dispatcher);
    }
}

impl<A> Default for StatusEvent<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for StatusEvent<A> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Dispatcher {
                raising: ReentrantMutex::new(()),
                lists: Mutex::new(self.dispatcher.snapshot()),
            },
        }
    }
}

impl<A> fmt::Debug for StatusEvent<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusEvent")
            .field("handlers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn test_raise_calls_in_registration_order() {
        let event: Event<u32> = Event::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            event.register(move |v: &u32| seen.lock().unwrap().push(format!("{tag}{v}")));
        }

        event.raise(&7);
        assert_eq!(*seen.lock().unwrap(), vec!["a7", "b7", "c7"]);
    }

    #[test]
    fn test_unregister_before_first_raise() {
        let event: Event<()> = Event::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let handle = event.register(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        event.unregister(handle).unwrap();
        event.raise(&());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(event.is_empty());
    }

    #[test]
    fn test_unregister_unknown_handle_is_bad_param() {
        let event: Event<()> = Event::new();
        let other: Event<()> = Event::new();
        let handle = other.register(|_| {});
        assert_eq!(event.unregister(handle), Err(Status::BadParam));
    }

    #[test]
    fn test_unregister_twice_between_raises() {
        let event: Event<()> = Event::new();
        let handle = event.register(|_| {});
        event.raise(&());
        assert!(event.unregister(handle).is_ok());
        assert!(event.unregister(handle).is_ok());
        event.raise(&());
        assert_eq!(event.unregister(handle), Err(Status::BadParam));
    }

    #[test]
    fn test_register_during_raise_deferred_to_next_raise() {
        let event: Arc<Event<()>> = Arc::new(Event::new());
        let late_calls = Arc::new(AtomicUsize::new(0));
        let registered = Arc::new(AtomicUsize::new(0));

        {
            let weak = Arc::downgrade(&event);
            let late_calls = Arc::clone(&late_calls);
            let registered = Arc::clone(&registered);
            event.register(move |_| {
                if registered.fetch_add(1, Ordering::SeqCst) == 0 {
                    if let Some(event) = weak.upgrade() {
                        let late_calls = Arc::clone(&late_calls);
                        event.register(move |_| {
                            late_calls.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                }
            });
        }

        event.raise(&());
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);

        event.raise(&());
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister_self_during_raise() {
        let event: Arc<Event<()>> = Arc::new(Event::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let own_handle: Arc<StdMutex<Option<CallbackHandle>>> = Arc::new(StdMutex::new(None));

        let handle = {
            let weak = Arc::downgrade(&event);
            let calls = Arc::clone(&calls);
            let own_handle = Arc::clone(&own_handle);
            event.register(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                let handle = own_handle.lock().unwrap().take();
                if let (Some(event), Some(handle)) = (weak.upgrade(), handle) {
                    event.unregister(handle).unwrap();
                }
            })
        };
        *own_handle.lock().unwrap() = Some(handle);

        event.raise(&());
        event.raise(&());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(event.is_empty());
    }

    #[test]
    fn test_nested_raise_on_same_thread() {
        let event: Arc<Event<u32>> = Arc::new(Event::new());
        let total = Arc::new(AtomicUsize::new(0));
        {
            let weak = Arc::downgrade(&event);
            let total = Arc::clone(&total);
            event.register(move |depth: &u32| {
                total.fetch_add(1, Ordering::SeqCst);
                if *depth == 0 {
                    if let Some(event) = weak.upgrade() {
                        event.raise(&1);
                    }
                }
            });
        }

        event.raise(&0);
        assert_eq!(total.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_status_event_stops_at_first_failure() {
        let event: StatusEvent<()> = StatusEvent::new();
        let reached = Arc::new(AtomicUsize::new(0));

        let r = Arc::clone(&reached);
        event.register(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        event.register(|_| Err(Status::DeviceNotConnected));
        let r = Arc::clone(&reached);
        event.register(move |_| {
            r.fetch_add(100, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(event.raise(&()), Err(Status::DeviceNotConnected));
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_status_event_applies_pending_after_failure() {
        let event: Arc<StatusEvent<()>> = Arc::new(StatusEvent::new());
        let late = Arc::new(AtomicUsize::new(0));
        {
            let weak = Arc::downgrade(&event);
            let late = Arc::clone(&late);
            let once = Arc::new(AtomicUsize::new(0));
            event.register(move |_| {
                if once.fetch_add(1, Ordering::SeqCst) == 0 {
                    if let Some(event) = weak.upgrade() {
                        let late = Arc::clone(&late);
                        event.register(move |_| {
                            late.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        });
                    }
                    return Err(Status::Error);
                }
                Ok(())
            });
        }

        assert_eq!(event.raise(&()), Err(Status::Error));
        assert_eq!(event.len(), 2);
        assert!(event.raise(&()).is_ok());
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_drops_active_and_pending() {
        let event: Event<()> = Event::new();
        event.register(|_| {});
        event.raise(&());
        event.register(|_| {});
        assert_eq!(event.len(), 2);

        event.clear();
        assert!(event.is_empty());
    }

    #[test]
    fn test_clone_and_copy_from_share_handles() {
        let source: Event<()> = Event::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let handle = source.register(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let copy = source.clone();
        copy.raise(&());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        copy.unregister(handle).unwrap();
        copy.raise(&());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let target: Event<()> = Event::new();
        target.register(|_| {});
        target.copy_from(&source);
        assert_eq!(target.len(), 1);
        target.copy_from(&target);
        assert_eq!(target.len(), 1);
    }

    #[test]
    fn test_concurrent_register_and_raise() {
        let event: Arc<Event<()>> = Arc::new(Event::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let event = Arc::clone(&event);
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let c = Arc::clone(&calls);
                        let h = event.register(move |_| {
                            c.fetch_add(1, Ordering::SeqCst);
                        });
                        event.raise(&());
                        event.unregister(h).unwrap();
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }
        event.raise(&());
        assert!(event.is_empty());
        assert!(calls.load(Ordering::SeqCst) >= 200);
    }
}
