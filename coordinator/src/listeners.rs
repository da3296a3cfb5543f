//! Copy-on-write listener registry.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Handle returned on registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Immutable view of the registered listeners at one point in time.
pub type ListenerSnapshot<L> = Arc<Vec<(ListenerId, Arc<L>)>>;

/// Registry where every add/remove publishes a fresh snapshot.
///
/// A fan-out works on the snapshot it took when it started, so concurrent
/// registration changes never add or drop listeners mid-delivery. The write
/// lock is only held while swapping the snapshot pointer.
pub struct Listeners<L: ?Sized> {
    next_id: AtomicU64,
    current: RwLock<ListenerSnapshot<L>>,
}

impl<L: ?Sized> Listeners<L> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            current: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Register a listener.
    pub fn add(&self, listener: Arc<L>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut current = self.current.write();
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push((id, listener));
        *current = Arc::new(next);
        id
    }

    /// Unregister a listener. Returns false if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut current = self.current.write();
        if !current.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next: Vec<_> = current
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        *current = Arc::new(next);
        true
    }

    /// Take the current snapshot.
    pub fn snapshot(&self) -> ListenerSnapshot<L> {
        self.current.read().clone()
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<L: ?Sized> Default for Listeners<L> {
    fn default() -> Self {
        Self::new()
    }
}
