//! Cancellation scopes.
//!
//! # Design
//! Scopes form a tree whose records live in one arena per engine instance.
//! A record holds a parent link, the ids of its children and the shared
//! signal that waiters park on. The engine owns the root; every call gets
//! one child.
//!
//! - `cancel` removes the node and its whole subtree from the arena under a
//!   single lock, then marks every removed signal cancelled and wakes its
//!   waiters. Descendants are therefore cancelled before `cancel` returns.
//! - `finish` removes a node that completed normally. Its own signal stays
//!   uncancelled; any children it still had are cancelled.
//! - A child created under a scope that has already terminated starts out
//!   cancelled.
//!
//! Both operations are idempotent.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

/// Arena key of a scope record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ScopeId(u64);

struct Signal {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Signal {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct Record {
    parent: Option<ScopeId>,
    children: Vec<ScopeId>,
    signal: Arc<Signal>,
}

#[derive(Default)]
struct Arena {
    records: HashMap<ScopeId, Record>,
}

impl Arena {
    /// Remove one record and unlink it from its parent.
    fn detach(&mut self, id: ScopeId) -> Option<Record> {
        let record = self.records.remove(&id)?;
        if let Some(parent) = record.parent.and_then(|p| self.records.get_mut(&p)) {
            parent.children.retain(|child| *child != id);
        }
        Some(record)
    }

    /// Remove `id` and all of its descendants, returning their signals.
    fn remove_subtree(&mut self, id: ScopeId) -> Vec<Arc<Signal>> {
        let mut signals = Vec::new();
        let Some(record) = self.detach(id) else {
            return signals;
        };
        signals.push(record.signal);
        let mut pending = record.children;
        while let Some(next) = pending.pop() {
            if let Some(record) = self.records.remove(&next) {
                pending.extend(record.children);
                signals.push(record.signal);
            }
        }
        signals
    }
}

struct Tree {
    arena: Mutex<Arena>,
    next_id: AtomicU64,
}

impl Tree {
    fn allocate(&self) -> ScopeId {
        ScopeId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// A node in a cancellation tree. Cloning yields another handle to the same
/// node.
#[derive(Clone)]
pub struct Scope {
    id: ScopeId,
    signal: Arc<Signal>,
    tree: Arc<Tree>,
}

impl Scope {
    /// Create the root of a new tree.
    pub fn root() -> Scope {
        let tree = Arc::new(Tree {
            arena: Mutex::new(Arena::default()),
            next_id: AtomicU64::new(0),
        });
        let id = tree.allocate();
        let signal = Arc::new(Signal::new());
        tree.arena.lock().records.insert(
            id,
            Record {
                parent: None,
                children: Vec::new(),
                signal: Arc::clone(&signal),
            },
        );
        Scope { id, signal, tree }
    }

    /// Create a child of this scope.
    pub fn child(&self) -> Scope {
        let id = self.tree.allocate();
        let signal = Arc::new(Signal::new());
        {
            let mut arena = self.tree.arena.lock();
            match arena.records.get_mut(&self.id) {
                Some(parent) => {
                    parent.children.push(id);
                    arena.records.insert(
                        id,
                        Record {
                            parent: Some(self.id),
                            children: Vec::new(),
                            signal: Arc::clone(&signal),
                        },
                    );
                }
                None => signal.cancel(),
            }
        }
        Scope {
            id,
            signal,
            tree: Arc::clone(&self.tree),
        }
    }

    /// Cancel this scope and every scope below it.
    pub fn cancel(&self) {
        let signals = self.tree.arena.lock().remove_subtree(self.id);
        if !signals.is_empty() {
            trace!("cancelling scope {:?} and {} descendants", self.id, signals.len() - 1);
        }
        for signal in signals {
            signal.cancel();
        }
    }

    /// Mark this scope as completed normally and release its record.
    pub fn finish(&self) {
        let signals = {
            let mut arena = self.tree.arena.lock();
            let Some(record) = arena.detach(self.id) else {
                return;
            };
            let mut signals = Vec::new();
            for child in record.children {
                signals.extend(arena.remove_subtree(child));
            }
            signals
        };
        for signal in signals {
            signal.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// True while the scope has neither been cancelled nor finished.
    pub fn is_live(&self) -> bool {
        self.tree.arena.lock().records.contains_key(&self.id)
    }

    /// Number of live direct children.
    pub fn live_children(&self) -> usize {
        self.tree
            .arena
            .lock()
            .records
            .get(&self.id)
            .map_or(0, |record| record.children.len())
    }

    /// Wait until this scope is cancelled.
    pub async fn cancelled(&self) {
        // Registered before the check so a concurrent cancel cannot slip between.
        let notified = self.signal.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Owned version of [`Scope::cancelled`] for storing in a struct.
    pub fn cancelled_owned(self) -> impl Future<Output = ()> + Send + 'static {
        async move { self.cancelled().await }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id.0)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
