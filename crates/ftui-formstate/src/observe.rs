#![forbid(unsafe_code)]

//! Subscriber storage and deferred notification.
//!
//! Tree mutations never call user code while a node is borrowed. Instead,
//! each mutation collects the nodes it touched into a [`Notifier`]
//! (deduplicated, in first-touch order) and flushes it once all state is
//! final. A snapshot is taken per node at flush time, then delivered to that
//! node's subscribers in subscription order.
//!
//! # Invariants
//!
//! - A callback unsubscribed earlier in the same flush is not invoked.
//! - A callback never runs inside itself: if it re-enters the tree and
//!   triggers a notification for the node it is subscribed to, the nested
//!   delivery to that callback is skipped with a warning.
//!
//! # Failure Modes
//!
//! - Dropping a [`Subscription`] unsubscribes. Holding it in `_` drops it
//!   immediately; bind it to a named variable.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::node::{NodeRef, WeakNodeRef};
use crate::state::Snapshot;

/// Subscriber identifier, unique per node.
pub type SubId = u64;

pub(crate) type Callback = Rc<RefCell<dyn FnMut(&Snapshot)>>;

#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: SubId,
    entries: Vec<(SubId, Callback)>,
}

impl Subscribers {
    pub(crate) fn add(&mut self, callback: Callback) -> SubId {
        self.next_id += 1;
        let id = self.next_id;
        self.entries.push((id, callback));
        id
    }

    pub(crate) fn remove(&mut self, id: SubId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(sub, _)| *sub != id);
        self.entries.len() != before
    }

    pub(crate) fn contains(&self, id: SubId) -> bool {
        self.entries.iter().any(|(sub, _)| *sub == id)
    }

    pub(crate) fn entries(&self) -> Vec<(SubId, Callback)> {
        self.entries.clone()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Keeps a subscriber registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the callback"]
pub struct Subscription {
    node: WeakNodeRef,
    id: SubId,
    live: Cell<bool>,
}

impl Subscription {
    pub(crate) fn new(node: WeakNodeRef, id: SubId) -> Self {
        Self {
            node,
            id,
            live: Cell::new(true),
        }
    }

    #[must_use]
    pub fn id(&self) -> SubId {
        self.id
    }

    /// Whether the callback is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.live.get() && self.node.strong_count() > 0
    }

    /// Remove the callback. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if !self.live.replace(false) {
            return;
        }
        if let Some(node) = self.node.upgrade() {
            node.borrow_mut().subscribers.remove(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("live", &self.live.get())
            .finish()
    }
}

/// Nodes awaiting notification for the mutation in progress.
pub(crate) struct Notifier {
    queue: Vec<NodeRef>,
    seen: HashSet<*const RefCell<crate::node::NodeCell>>,
    silent: bool,
}

impl Notifier {
    pub(crate) fn new(silent: bool) -> Self {
        Self {
            queue: Vec::new(),
            seen: HashSet::new(),
            silent,
        }
    }

    /// Queue `node`. Never borrows it, so callers may hold borrows.
    pub(crate) fn push(&mut self, node: &NodeRef) {
        if self.silent {
            return;
        }
        if self.seen.insert(Rc::as_ptr(node)) {
            self.queue.push(node.clone());
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn flush(self) {
        for node in self.queue {
            let (snapshot, entries) = {
                let cell = node.borrow();
                if cell.subscribers.is_empty() {
                    continue;
                }
                (cell.snapshot(), cell.subscribers.entries())
            };
            for (id, callback) in entries {
                if !node.borrow().subscribers.contains(id) {
                    continue;
                }
                match callback.try_borrow_mut() {
                    Ok(mut callback) => (&mut *callback)(&snapshot),
                    Err(_) => tracing::warn!(
                        path = %snapshot.path,
                        subscriber = id,
                        "subscriber re-entered its own notification; nested delivery skipped"
                    ),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeKind};
    use crate::state::Patch;
    use serde_json::json;

    #[test]
    fn subscribers_receive_snapshots_in_order() {
        let node = Node::new(NodeKind::Field, json!(""));
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = {
            let log = log.clone();
            node.subscribe(move |s| log.borrow_mut().push(("a", s.value.clone())))
        };
        let b = {
            let log = log.clone();
            node.subscribe(move |s| log.borrow_mut().push(("b", s.value.clone())))
        };
        node.change(json!("x"));
        assert_eq!(
            *log.borrow(),
            vec![("a", json!("x")), ("b", json!("x"))]
        );
        drop((a, b));
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let node = Node::new(NodeKind::Field, json!(0));
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let sub = node.subscribe(move |_| counter.set(counter.get() + 1));
        node.touch();
        sub.unsubscribe();
        sub.unsubscribe();
        node.touch();
        assert_eq!(hits.get(), 1);
        assert!(!sub.is_active());
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let node = Node::new(NodeKind::Field, json!(0));
        let hits = Rc::new(Cell::new(0));
        {
            let counter = hits.clone();
            let _sub = node.subscribe(move |_| counter.set(counter.get() + 1));
            node.touch();
        }
        node.touch();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn silent_notifier_queues_nothing() {
        let node = Node::new(NodeKind::Field, json!(0));
        let mut notifier = Notifier::new(true);
        notifier.push(&node.cell);
        assert_eq!(notifier.len(), 0);
    }

    #[test]
    fn notifier_dedupes_nodes() {
        let node = Node::new(NodeKind::Field, json!(0));
        let mut notifier = Notifier::new(false);
        notifier.push(&node.cell);
        notifier.push(&node.cell);
        assert_eq!(notifier.len(), 1);
    }

    #[test]
    fn reentrant_subscriber_does_not_recurse() {
        let node = Node::new(NodeKind::Field, json!(0));
        let hits = Rc::new(Cell::new(0));
        let handle = node.clone();
        let counter = hits.clone();
        let _sub = node.subscribe(move |s| {
            counter.set(counter.get() + 1);
            if s.touches < 3 {
                handle.touch();
            }
        });
        node.touch();
        assert_eq!(hits.get(), 1);
        assert_eq!(node.state().touches, 2);
    }

    #[test]
    fn subscriber_may_unsubscribe_a_later_one() {
        let node = Node::new(NodeKind::Field, json!(0));
        let later: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let slot = later.clone();
        let _first = node.subscribe(move |_| {
            if let Some(sub) = slot.borrow().as_ref() {
                sub.unsubscribe();
            }
        });
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        *later.borrow_mut() = Some(node.subscribe(move |_| counter.set(counter.get() + 1)));
        node.patch(Patch::touch(), Default::default());
        assert_eq!(hits.get(), 0);
    }
}
