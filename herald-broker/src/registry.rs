//! Subscriber Registry
//!
//! Maps subscription ids to `(handler, optional action filter)` pairs.
//! Entries are immutable once inserted: narrowing a filter swaps in a new
//! entry, so a [`Snapshot`] taken by a dispatch pass never changes under it.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::subscriber::{Subscriber, SubscriberError};
use herald_protocol::Message;

/// Opaque handle returned by `subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Create a SubscriptionId from a raw value (mainly for testing)
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Subscription({})", self.0)
    }
}

/// A registered handler and its action filter
pub struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn Subscriber>,
    /// `None` or empty means every action
    actions: Option<Vec<String>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn actions(&self) -> Option<&[String]> {
        self.actions.as_deref()
    }

    /// Whether this subscription wants messages tagged with `action`
    pub fn matches(&self, action: &str) -> bool {
        match &self.actions {
            None => true,
            Some(actions) => actions.is_empty() || actions.iter().any(|a| a == action),
        }
    }

    pub fn deliver(&self, message: &Message) -> Result<(), SubscriberError> {
        self.handler.deliver(message)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("actions", &self.actions)
            .finish()
    }
}

/// Point-in-time copy of the registry, in insertion order
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: Vec<Arc<Subscription>>,
}

impl Snapshot {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Subscription>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<SubscriptionId> {
        self.entries.iter().map(|s| s.id).collect()
    }
}

struct Inner {
    /// Ids only grow between resets, and resets happen only when this is
    /// empty, so key order is insertion order.
    entries: BTreeMap<SubscriptionId, Arc<Subscription>>,
    next_id: u64,
}

impl Inner {
    fn remove(&mut self, id: SubscriptionId) -> bool {
        if self.entries.remove(&id).is_none() {
            return false;
        }
        if self.entries.is_empty() {
            self.next_id = 1;
        }
        true
    }
}

/// Registry of live subscriptions
///
/// Thread-safe for concurrent access from every connection task and the
/// dispatcher.
pub struct SubscriberRegistry {
    inner: RwLock<Inner>,
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Register a handler, optionally restricted to `actions`.
    ///
    /// Duplicate action names are collapsed; an empty list is the same as no
    /// filter.
    pub fn subscribe(
        &self,
        handler: Arc<dyn Subscriber>,
        actions: Option<Vec<String>>,
    ) -> SubscriptionId {
        self.subscribe_with(|_| handler, actions)
    }

    /// Like [`subscribe`](Self::subscribe), for handlers that need to know
    /// their own id. `make` runs under the registry's write lock and must
    /// not touch the registry.
    pub fn subscribe_with<F>(&self, make: F, actions: Option<Vec<String>>) -> SubscriptionId
    where
        F: FnOnce(SubscriptionId) -> Arc<dyn Subscriber>,
    {
        let actions = actions.map(dedup).filter(|a| !a.is_empty());

        let mut inner = self.inner.write();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        let handler = make(id);

        debug!(%id, ?actions, "Subscribed");
        inner.entries.insert(
            id,
            Arc::new(Subscription {
                id,
                handler,
                actions,
            }),
        );
        id
    }

    /// Remove a subscription, or narrow its filter.
    ///
    /// With `actions`, only those names are dropped from the filter. A
    /// subscription without a filter is left as is; one whose filter runs
    /// out is removed. Returns `false` only if `id` is not live.
    pub fn unsubscribe(&self, id: SubscriptionId, actions: Option<&[&str]>) -> bool {
        let mut inner = self.inner.write();

        let Some(current) = inner.entries.get(&id).cloned() else {
            return false;
        };

        let Some(actions) = actions else {
            debug!(%id, "Unsubscribed");
            return inner.remove(id);
        };

        let Some(filter) = current.actions.as_ref() else {
            return true;
        };

        let narrowed: Vec<String> = filter
            .iter()
            .filter(|a| !actions.contains(&a.as_str()))
            .cloned()
            .collect();

        if narrowed.is_empty() {
            debug!(%id, "Filter emptied, unsubscribed");
            return inner.remove(id);
        }

        if narrowed.len() != filter.len() {
            debug!(%id, actions = ?narrowed, "Subscription narrowed");
            inner.entries.insert(
                id,
                Arc::new(Subscription {
                    id,
                    handler: Arc::clone(&current.handler),
                    actions: Some(narrowed),
                }),
            );
        }
        true
    }

    /// Copy of every live subscription, taken under one read lock
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read();
        Snapshot {
            entries: inner.entries.values().cloned().collect(),
        }
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.inner.read().entries.contains_key(&id)
    }

    /// Current filter of a subscription; `Some(None)` means unfiltered
    pub fn actions(&self, id: SubscriptionId) -> Option<Option<Vec<String>>> {
        self.inner
            .read()
            .entries
            .get(&id)
            .map(|s| s.actions.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}

fn dedup(actions: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(actions.len());
    for action in actions {
        if !out.contains(&action) {
            out.push(action);
        }
    }
    out
}
