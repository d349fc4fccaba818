#![forbid(unsafe_code)]

//! Node cells, the public [`Node`] handle, and the propagation engine.
//!
//! Every node lives in an `Rc<RefCell<NodeCell>>`. A container owns its
//! children through an ordered registry keyed by the last route segment; the
//! `parent` edge is a [`Weak`] reference, so dropping the root releases the
//! whole tree. The root is found by walking parents.
//!
//! All mutations funnel through [`apply_patch`], which:
//!
//! 1. merges the patch into the target's own state,
//! 2. pushes `value`/`init` assignments down into a container's children,
//! 3. moves the active-field marker on visit / touch,
//! 4. walks to the root, recomposing each ancestor's `value` and `init` at the
//!    child's key, applying counter tallies and recomputing `any_touched` /
//!    `any_visited`.
//!
//! Notifications are queued on a [`Notifier`] and delivered only after the
//! mutation completes, so subscribers always observe a consistent tree.
//!
//! # Invariants
//!
//! - A container's `value` and `init` equal the composition of its children's
//!   `value` / `init` at their keys, on top of whatever unregistered data the
//!   container holds.
//! - `names` of every attached node equal its parent's `names` plus its key.
//! - At most one field per tree is the target of `active`, and every node on
//!   the path from it to the root points at it.
//!
//! # Failure Modes
//!
//! - A detached node (no parent) still updates its own state; propagation
//!   simply stops at it.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{FormConfig, NodeConfig};
use crate::error::{FormError, FormResult};
use crate::observe::{Notifier, Subscribers, Subscription};
use crate::path::{self, Key, PathLike, Route};
use crate::state::{NodeState, Patch, PatchOptions, Snapshot, Tally};
use crate::validation::{Deferred, ValidationLedger, ValidationToken};

pub(crate) type NodeRef = Rc<RefCell<NodeCell>>;
pub(crate) type WeakNodeRef = Weak<RefCell<NodeCell>>;

/// Process-unique node identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Leaf holding one value.
    Field,
    /// Container keyed by member name.
    FieldSet,
    /// Container keyed by array index.
    FieldArray,
    /// Tree root; keyed by member name like a field set.
    Form,
}

impl NodeKind {
    #[must_use]
    pub fn is_container(self) -> bool {
        !matches!(self, Self::Field)
    }

    /// Whether a child can be registered under this kind with `key`.
    #[must_use]
    pub fn accepts(self, key: &Key) -> bool {
        match self {
            Self::Field => false,
            Self::FieldSet | Self::Form => !key.is_index(),
            Self::FieldArray => key.is_index(),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Field => "field",
            Self::FieldSet => "field set",
            Self::FieldArray => "field array",
            Self::Form => "form",
        })
    }
}

/// State shared by every node of one tree.
#[derive(Debug)]
pub(crate) struct Tree {
    pub(crate) config: FormConfig,
    pub(crate) ledger: RefCell<ValidationLedger>,
}

impl Tree {
    pub(crate) fn new(config: FormConfig) -> Rc<Self> {
        let ledger = ValidationLedger::new(config.trace_capacity);
        Rc::new(Self {
            config,
            ledger: RefCell::new(ledger),
        })
    }
}

/// An async validation parked on a node.
#[derive(Debug, Clone)]
pub(crate) struct InFlight {
    pub(crate) token: ValidationToken,
    pub(crate) deferred: Deferred,
}

pub(crate) struct NodeCell {
    pub(crate) id: NodeId,
    pub(crate) kind: NodeKind,
    pub(crate) names: Route,
    pub(crate) parent: Option<WeakNodeRef>,
    pub(crate) tree: Rc<Tree>,
    pub(crate) state: NodeState,
    pub(crate) config: NodeConfig,
    pub(crate) children: IndexMap<Key, NodeRef>,
    pub(crate) initialized: bool,
    /// Registered after the parent was initialized; removed by `reset`.
    pub(crate) dynamic: bool,
    pub(crate) pending: Option<InFlight>,
    pub(crate) subscribers: Subscribers,
}

impl NodeCell {
    pub(crate) fn new(
        kind: NodeKind,
        names: Route,
        init: Value,
        config: NodeConfig,
        tree: Rc<Tree>,
    ) -> Self {
        Self {
            id: NodeId::next(),
            kind,
            names,
            parent: None,
            tree,
            state: NodeState::new(init),
            config,
            children: IndexMap::new(),
            initialized: false,
            dynamic: false,
            pending: None,
            subscribers: Subscribers::default(),
        }
    }

    pub(crate) fn parent(&self) -> Option<NodeRef> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        let s = &self.state;
        let is_pristine = s.value == s.init;
        Snapshot {
            id: self.id,
            kind: self.kind,
            path: self.names.clone(),
            value: s.value.clone(),
            init: s.init.clone(),
            error: s.error.clone(),
            notice: s.notice.clone(),
            touches: s.touches,
            visits: s.visits,
            active: s.active,
            any_touched: s.any_touched,
            any_visited: s.any_visited,
            is_touched: s.touches > 0,
            is_visited: s.visits > 0,
            is_active: s.active.is_some(),
            is_focused: s.active == Some(self.id),
            is_pristine,
            is_dirty: !is_pristine,
            is_valid: s.error.is_none(),
            is_invalid: s.error.is_some(),
            is_validated: s.validated,
            is_validating: self
                .pending
                .as_ref()
                .is_some_and(|p| p.deferred.is_pending()),
            is_initialized: self.initialized,
        }
    }

    /// Recompute `any_touched` / `any_visited` from the children.
    pub(crate) fn refresh_aggregates(&mut self) {
        let (mut touched, mut visited) = (false, false);
        for child in self.children.values() {
            let child = child.borrow();
            touched |= child.state.touches > 0 || child.state.any_touched;
            visited |= child.state.visits > 0 || child.state.any_visited;
        }
        self.state.any_touched = touched;
        self.state.any_visited = visited;
    }

    /// Write every child's `value` / `init` back into this node's own.
    pub(crate) fn recompose(&mut self, value: bool, init: bool) {
        let Self {
            children, state, ..
        } = self;
        for (key, child) in children.iter() {
            let child = child.borrow();
            if value {
                path::set_in_place(
                    &mut state.value,
                    std::slice::from_ref(key),
                    child.state.value.clone(),
                );
            }
            if init {
                path::set_in_place(
                    &mut state.init,
                    std::slice::from_ref(key),
                    child.state.init.clone(),
                );
            }
        }
    }
}

/// What an upward walk carries from a child to its ancestors.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Upward {
    pub(crate) value: bool,
    pub(crate) init: bool,
    pub(crate) touches: Option<Tally>,
    pub(crate) visits: Option<Tally>,
}

impl Upward {
    pub(crate) fn structure() -> Self {
        Self {
            value: true,
            init: true,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Tree walking
// ---------------------------------------------------------------------------

pub(crate) fn parent_of(node: &NodeRef) -> Option<NodeRef> {
    node.borrow().parent()
}

pub(crate) fn root_of(node: &NodeRef) -> NodeRef {
    let mut current = node.clone();
    while let Some(parent) = parent_of(&current) {
        current = parent;
    }
    current
}

pub(crate) fn children_of(node: &NodeRef) -> Vec<(Key, NodeRef)> {
    node.borrow()
        .children
        .iter()
        .map(|(key, child)| (key.clone(), child.clone()))
        .collect()
}

pub(crate) fn descend(node: &NodeRef, route: &[Key]) -> Option<NodeRef> {
    let mut current = node.clone();
    for key in route {
        let next = current.borrow().children.get(key).cloned()?;
        current = next;
    }
    Some(current)
}

/// `node` and all descendants, parents before children, registry order.
pub(crate) fn preorder(node: &NodeRef) -> Vec<NodeRef> {
    let mut out = Vec::new();
    let mut stack = vec![node.clone()];
    while let Some(current) = stack.pop() {
        stack.extend(current.borrow().children.values().rev().cloned());
        out.push(current);
    }
    out
}

/// Whether `candidate` is `node` or one of its ancestors.
fn is_self_or_ancestor(candidate: &NodeRef, node: &NodeRef) -> bool {
    let mut current = Some(node.clone());
    while let Some(n) = current {
        if Rc::ptr_eq(&n, candidate) {
            return true;
        }
        current = parent_of(&n);
    }
    false
}

// ---------------------------------------------------------------------------
// Propagation engine
// ---------------------------------------------------------------------------

pub(crate) fn apply_patch(
    target: &NodeRef,
    patch: Patch,
    options: PatchOptions,
    out: &mut Notifier,
) {
    let Patch {
        value,
        init,
        error,
        notice,
        touches,
        visits,
    } = patch;
    let delta = Upward {
        value: value.is_some(),
        init: init.is_some(),
        touches,
        visits,
    };

    let container = {
        let mut cell = target.borrow_mut();
        if cell.tree.config.enable_logging {
            tracing::trace!(path = %cell.names, ?delta, has_error = ?error.as_ref().map(Option::is_some), "patch");
        }
        if let Some(value) = value {
            cell.state.value = value;
        }
        if let Some(init) = init {
            cell.state.init = init;
        }
        if let Some(error) = error {
            cell.state.error = error;
            cell.state.validated = true;
        }
        if let Some(notice) = notice {
            cell.state.notice = notice;
        }
        if let Some(tally) = touches {
            cell.state.touches = tally.apply(cell.state.touches);
        }
        if let Some(tally) = visits {
            cell.state.visits = tally.apply(cell.state.visits);
        }
        cell.kind.is_container()
    };
    out.push(target);

    if container && (delta.value || delta.init) {
        push_down(target, delta.value, delta.init, out);
    }
    if visits.is_some() && options.activate {
        activate(target, out);
    }
    if touches.is_some() {
        blur(target, out);
    }
    propagate_up(target, delta, out);
}

/// Assign each child the sub-value at its key, then recompose.
pub(crate) fn push_down(node: &NodeRef, value: bool, init: bool, out: &mut Notifier) {
    let (children, node_value, node_init) = {
        let cell = node.borrow();
        (
            children_of(node),
            value.then(|| cell.state.value.clone()),
            init.then(|| cell.state.init.clone()),
        )
    };
    for (key, child) in &children {
        let at = std::slice::from_ref(key);
        let container = {
            let mut cell = child.borrow_mut();
            if let Some(v) = &node_value {
                cell.state.value = path::get_or(v, at, Value::Null);
            }
            if let Some(i) = &node_init {
                cell.state.init = path::get_or(i, at, Value::Null);
            }
            cell.kind.is_container()
        };
        out.push(child);
        if container {
            push_down(child, value, init, out);
        }
    }
    node.borrow_mut().recompose(value, init);
}

/// Walk from `from` to the root, folding `delta` into every ancestor.
pub(crate) fn propagate_up(from: &NodeRef, delta: Upward, out: &mut Notifier) {
    let mut current = from.clone();
    loop {
        let (parent, key, value, init) = {
            let cell = current.borrow();
            let (Some(parent), Some(key)) = (cell.parent(), cell.names.last().cloned()) else {
                return;
            };
            (
                parent,
                key,
                delta.value.then(|| cell.state.value.clone()),
                delta.init.then(|| cell.state.init.clone()),
            )
        };
        {
            let mut cell = parent.borrow_mut();
            let at = std::slice::from_ref(&key);
            if let Some(value) = value {
                path::set_in_place(&mut cell.state.value, at, value);
            }
            if let Some(init) = init {
                path::set_in_place(&mut cell.state.init, at, init);
            }
            if let Some(tally) = delta.touches {
                cell.state.touches = tally.apply(cell.state.touches);
            }
            if let Some(tally) = delta.visits {
                cell.state.visits = tally.apply(cell.state.visits);
            }
            cell.refresh_aggregates();
        }
        out.push(&parent);
        current = parent;
    }
}

/// Make `target` the single active field of its tree.
fn activate(target: &NodeRef, out: &mut Notifier) {
    let id = target.borrow().id;
    let root = root_of(target);
    let previous = root.borrow().state.active;
    if let Some(previous) = previous
        && previous != id
    {
        clear_active_from(&root, previous, out);
    }
    let mut current = Some(target.clone());
    while let Some(node) = current {
        node.borrow_mut().state.active = Some(id);
        out.push(&node);
        current = parent_of(&node);
    }
}

/// Clear the tree's active field, whichever field it is.
fn blur(target: &NodeRef, out: &mut Notifier) {
    let root = root_of(target);
    let previous = root.borrow().state.active;
    if let Some(previous) = previous {
        clear_active_from(&root, previous, out);
    }
}

/// Follow the `active == id` chain down from `from`, clearing it.
pub(crate) fn clear_active_from(from: &NodeRef, id: NodeId, out: &mut Notifier) {
    let mut current = from.clone();
    loop {
        let next = {
            let mut cell = current.borrow_mut();
            if cell.state.active != Some(id) {
                return;
            }
            cell.state.active = None;
            cell.children
                .values()
                .find(|child| child.borrow().state.active == Some(id))
                .cloned()
        };
        out.push(&current);
        match next {
            Some(next) => current = next,
            None => return,
        }
    }
}

/// Clear `active == id` on `from` and every ancestor.
pub(crate) fn clear_active_upward(from: &NodeRef, id: NodeId, out: &mut Notifier) {
    let mut current = Some(from.clone());
    while let Some(node) = current {
        let cleared = {
            let mut cell = node.borrow_mut();
            let hit = cell.state.active == Some(id);
            if hit {
                cell.state.active = None;
            }
            hit
        };
        if cleared {
            out.push(&node);
        }
        current = parent_of(&node);
    }
}

// ---------------------------------------------------------------------------
// Registry mutation
// ---------------------------------------------------------------------------

/// Insert `child` under `parent` at `key` and rewrite the subtree's names.
pub(crate) fn attach_child(parent: &NodeRef, key: Key, child: &NodeRef, out: &mut Notifier) {
    let (names, tree, dynamic, is_array) = {
        let p = parent.borrow();
        (
            p.names.child(key.clone()),
            p.tree.clone(),
            p.initialized,
            p.kind == NodeKind::FieldArray,
        )
    };
    {
        let mut c = child.borrow_mut();
        c.parent = Some(Rc::downgrade(parent));
        c.dynamic = dynamic;
    }
    rebase_subtree(child, &names, &tree, out);
    {
        let mut p = parent.borrow_mut();
        p.children.insert(key, child.clone());
        if is_array {
            p.children.sort_keys();
        }
    }
    propagate_up(child, Upward::structure(), out);
}

/// Give `node` the absolute route `names` and move its subtree onto `tree`.
fn rebase_subtree(node: &NodeRef, names: &Route, tree: &Rc<Tree>, out: &mut Notifier) {
    let children = {
        let mut cell = node.borrow_mut();
        cell.names = names.clone();
        cell.tree = tree.clone();
        children_of_cell(&cell)
    };
    out.push(node);
    for (key, child) in children {
        rebase_subtree(&child, &names.child(key), tree, out);
    }
}

fn children_of_cell(cell: &NodeCell) -> Vec<(Key, NodeRef)> {
    cell.children
        .iter()
        .map(|(key, child)| (key.clone(), child.clone()))
        .collect()
}

/// Remove the child at `key`, dropping its contribution from `parent`.
/// Returns false when nothing is registered there.
pub(crate) fn detach_child(parent: &NodeRef, key: &Key, out: &mut Notifier) -> bool {
    let (child, is_array) = {
        let mut p = parent.borrow_mut();
        let Some(child) = p.children.shift_remove(key) else {
            return false;
        };
        let at = std::slice::from_ref(key);
        path::unset_in_place(&mut p.state.value, at);
        path::unset_in_place(&mut p.state.init, at);
        (child, p.kind == NodeKind::FieldArray)
    };
    if is_array && let Key::Index(removed) = key {
        let removed = *removed;
        rekey_children(
            parent,
            |i| if i > removed { i - 1 } else { i },
            out,
        );
    }

    let (removed_active, path) = {
        let c = child.borrow();
        (c.state.active, c.names.clone())
    };
    release_subtree(&child);
    if let Some(active) = removed_active {
        clear_active_upward(parent, active, out);
    }
    parent.borrow_mut().refresh_aggregates();
    out.push(parent);
    out.push(&child);
    tracing::debug!(path = %path, "unregistered node");
    propagate_up(parent, Upward::structure(), out);
    true
}

/// Cut `node` and all its descendants loose from their parents.
fn release_subtree(node: &NodeRef) {
    let children = {
        let mut cell = node.borrow_mut();
        cell.parent = None;
        std::mem::take(&mut cell.children)
    };
    for child in children.into_values() {
        release_subtree(&child);
    }
}

/// Re-key index children of an array through `remap`, rewriting routes.
pub(crate) fn rekey_children(parent: &NodeRef, remap: impl Fn(usize) -> usize, out: &mut Notifier) {
    let (names, tree, entries) = {
        let mut p = parent.borrow_mut();
        (
            p.names.clone(),
            p.tree.clone(),
            std::mem::take(&mut p.children),
        )
    };
    let mut rebuilt = IndexMap::with_capacity(entries.len());
    for (key, child) in entries {
        let key = match key {
            Key::Index(i) => {
                let j = remap(i);
                if j != i {
                    rebase_subtree(&child, &names.child(j), &tree, out);
                }
                Key::Index(j)
            }
            other => other,
        };
        rebuilt.insert(key, child);
    }
    rebuilt.sort_keys();
    parent.borrow_mut().children = rebuilt;
}

// ---------------------------------------------------------------------------
// Node handle
// ---------------------------------------------------------------------------

/// Shared handle to one node of a form tree.
///
/// Clones refer to the same node; equality is identity.
#[derive(Clone)]
pub struct Node {
    pub(crate) cell: NodeRef,
}

impl Node {
    /// A detached node with default tree settings.
    #[must_use]
    pub fn new(kind: NodeKind, init: Value) -> Self {
        Self::with_config(kind, init, NodeConfig::default())
    }

    /// A detached node with behaviour hooks.
    #[must_use]
    pub fn with_config(kind: NodeKind, init: Value, config: NodeConfig) -> Self {
        Self::create(
            kind,
            Route::root(),
            init,
            config,
            Tree::new(FormConfig::default()),
        )
    }

    pub(crate) fn create(
        kind: NodeKind,
        names: Route,
        init: Value,
        config: NodeConfig,
        tree: Rc<Tree>,
    ) -> Self {
        let cell = NodeCell::new(kind, names, init, config, tree);
        Self {
            cell: Rc::new(RefCell::new(cell)),
        }
    }

    pub(crate) fn from_ref(cell: NodeRef) -> Self {
        Self { cell }
    }

    #[must_use]
    pub fn id(&self) -> NodeId {
        self.cell.borrow().id
    }

    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.cell.borrow().kind
    }

    /// Absolute route from the tree root.
    #[must_use]
    pub fn names(&self) -> Route {
        self.cell.borrow().names.clone()
    }

    /// [`Self::names`] rendered as `a.b[0]`.
    #[must_use]
    pub fn path(&self) -> String {
        self.cell.borrow().names.to_string()
    }

    /// Key under which the parent registers this node.
    #[must_use]
    pub fn key(&self) -> Option<Key> {
        self.cell.borrow().names.last().cloned()
    }

    #[must_use]
    pub fn parent(&self) -> Option<Node> {
        parent_of(&self.cell).map(Self::from_ref)
    }

    /// The topmost reachable ancestor (the form, when attached).
    #[must_use]
    pub fn root(&self) -> Node {
        Self::from_ref(root_of(&self.cell))
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        parent_of(&self.cell).is_some()
    }

    /// Registered children in traversal order.
    #[must_use]
    pub fn children(&self) -> Vec<(Key, Node)> {
        children_of(&self.cell)
            .into_iter()
            .map(|(key, child)| (key, Self::from_ref(child)))
            .collect()
    }

    #[must_use]
    pub fn child(&self, key: &Key) -> Option<Node> {
        self.cell.borrow().children.get(key).cloned().map(Self::from_ref)
    }

    /// The registered descendant at `path`, or `None` when any segment is
    /// unregistered or the path is malformed.
    #[must_use]
    pub fn find(&self, path: impl PathLike) -> Option<Node> {
        let route = path.to_route().ok()?;
        descend(&self.cell, &route).map(Self::from_ref)
    }

    /// Like [`Self::find`], but reports why the lookup failed.
    pub fn get(&self, path: impl PathLike) -> FormResult<Node> {
        let route = path.to_route()?;
        descend(&self.cell, &route)
            .map(Self::from_ref)
            .ok_or_else(|| FormError::UnknownNode {
                path: self.names().join(&route),
            })
    }

    /// Whether the container has been initialized (see
    /// [`Self::mark_initialized`]).
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.cell.borrow().initialized
    }

    /// Whether this node was registered after its container was initialized.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.cell.borrow().dynamic
    }

    /// Snapshot of the current state. Never a live view.
    #[must_use]
    pub fn state(&self) -> Snapshot {
        self.cell.borrow().snapshot()
    }

    #[must_use]
    pub fn value(&self) -> Value {
        self.cell.borrow().state.value.clone()
    }

    #[must_use]
    pub fn init(&self) -> Value {
        self.cell.borrow().state.init.clone()
    }

    /// Replace this node's behaviour hooks.
    pub fn configure(&self, config: NodeConfig) {
        self.cell.borrow_mut().config = config;
    }

    /// Settings shared by this node's tree.
    #[must_use]
    pub fn form_config(&self) -> FormConfig {
        self.cell.borrow().tree.config.clone()
    }

    /// Call `callback` with a fresh snapshot after every change to this node.
    pub fn subscribe(&self, callback: impl FnMut(&Snapshot) + 'static) -> Subscription {
        let callback: crate::observe::Callback = Rc::new(RefCell::new(callback));
        let id = self.cell.borrow_mut().subscribers.add(callback);
        Subscription::new(Rc::downgrade(&self.cell), id)
    }

    /// Merge `patch` into this node and propagate it through the tree.
    pub fn patch(&self, patch: Patch, options: PatchOptions) {
        let mut out = Notifier::new(options.silent);
        apply_patch(&self.cell, patch, options, &mut out);
        out.flush();
    }

    /// Route `patch` to the registered descendant at `path`.
    pub fn patch_at(
        &self,
        path: impl PathLike,
        patch: Patch,
        options: PatchOptions,
    ) -> FormResult<()> {
        self.get(path)?.patch(patch, options);
        Ok(())
    }

    /// Notify this node's subscribers and then every descendant's, depth-first.
    pub fn broadcast(&self) {
        let mut out = Notifier::new(false);
        for node in preorder(&self.cell) {
            out.push(&node);
        }
        out.flush();
    }

    /// Attach a detached `node` at `route` (relative to this node).
    ///
    /// Re-attaching the node already registered there is a no-op.
    pub fn register_node(&self, route: impl Into<Route>, node: &Node) -> FormResult<()> {
        let route = route.into();
        let Some((key, parent_route)) = route.split_last() else {
            return Err(FormError::EmptyRoute);
        };
        let parent = container_at(&self.cell, parent_route)?;
        check_segment(&parent, key)?;

        if let Some(existing) = parent.borrow().children.get(key) {
            return if Rc::ptr_eq(existing, &node.cell) {
                Ok(())
            } else {
                Err(FormError::Occupied {
                    path: self.names().join(&route),
                })
            };
        }
        if node.is_attached() {
            return Err(FormError::AlreadyAttached { path: node.names() });
        }
        if is_self_or_ancestor(&node.cell, &parent) {
            return Err(FormError::Cycle { path: node.names() });
        }

        let mut out = Notifier::new(false);
        let stale_active = node.cell.borrow().state.active;
        if let Some(active) = stale_active {
            clear_active_from(&node.cell, active, &mut out);
        }
        attach_child(&parent, key.clone(), &node.cell, &mut out);
        tracing::debug!(path = %node.path(), kind = %node.kind(), "attached node");
        out.flush();
        Ok(())
    }

    /// Remove the node at `path` and its subtree. Returns whether anything
    /// was registered there; unregistering an absent node is not an error.
    pub fn unregister_at(&self, path: impl PathLike) -> FormResult<bool> {
        let route = path.to_route()?;
        let Some((key, parent_route)) = route.split_last() else {
            return Ok(false);
        };
        let Some(parent) = descend(&self.cell, parent_route) else {
            return Ok(false);
        };
        let mut out = Notifier::new(false);
        let removed = detach_child(&parent, key, &mut out);
        out.flush();
        Ok(removed)
    }

    /// Remove this node (and its subtree) from its parent. Returns false if
    /// it was already detached.
    pub fn unregister(&self) -> bool {
        let Some(parent) = parent_of(&self.cell) else {
            return false;
        };
        let key = parent
            .borrow()
            .children
            .iter()
            .find(|(_, child)| Rc::ptr_eq(child, &self.cell))
            .map(|(key, _)| key.clone());
        let Some(key) = key else {
            return false;
        };
        let mut out = Notifier::new(false);
        let removed = detach_child(&parent, &key, &mut out);
        out.flush();
        removed
    }
}

/// Resolve `route` from `from` to a registered container.
pub(crate) fn container_at(from: &NodeRef, route: &[Key]) -> FormResult<NodeRef> {
    let mut current = from.clone();
    for (depth, key) in route.iter().enumerate() {
        let next = {
            let cell = current.borrow();
            if !cell.kind.is_container() {
                return Err(FormError::NotAContainer {
                    path: cell.names.clone(),
                    kind: cell.kind,
                });
            }
            cell.children.get(key).cloned()
        };
        current = next.ok_or_else(|| FormError::MissingAncestor {
            path: from.borrow().names.join(&route[..=depth]),
        })?;
    }
    let cell = current.borrow();
    if !cell.kind.is_container() {
        return Err(FormError::NotAContainer {
            path: cell.names.clone(),
            kind: cell.kind,
        });
    }
    drop(cell);
    Ok(current)
}

pub(crate) fn check_segment(container: &NodeRef, key: &Key) -> FormResult<()> {
    let cell = container.borrow();
    if let Some(index) = key.as_index().filter(|index| *index > path::MAX_INDEX) {
        return Err(FormError::IndexTooLarge {
            path: cell.names.clone(),
            index,
        });
    }
    if cell.kind.accepts(key) {
        Ok(())
    } else {
        Err(FormError::SegmentMismatch {
            path: cell.names.clone(),
            container: cell.kind,
            key: key.clone(),
        })
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

impl Eq for Node {}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.try_borrow() {
            Ok(cell) => f
                .debug_struct("Node")
                .field("id", &cell.id)
                .field("kind", &cell.kind)
                .field("path", &cell.names.to_string())
                .finish(),
            Err(_) => f.write_str("Node { <borrowed> }"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fieldset::Registration;
    use serde_json::json;

    fn form_like(init: Value) -> Node {
        Node::new(NodeKind::Form, init)
    }

    // -- identity --

    #[test]
    fn ids_are_unique_and_equality_is_identity() {
        let a = Node::new(NodeKind::Field, json!(1));
        let b = Node::new(NodeKind::Field, json!(1));
        assert_ne!(a.id(), b.id());
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn kind_accepts_matching_segments() {
        assert!(NodeKind::FieldSet.accepts(&Key::from("a")));
        assert!(!NodeKind::FieldSet.accepts(&Key::Index(0)));
        assert!(NodeKind::FieldArray.accepts(&Key::Index(0)));
        assert!(!NodeKind::FieldArray.accepts(&Key::from("a")));
        assert!(!NodeKind::Field.accepts(&Key::from("a")));
    }

    // -- propagation --

    #[test]
    fn child_value_change_recomposes_every_ancestor() {
        let root = form_like(json!({"a": {"b": 1}}));
        let set = root.register(Registration::field_set("a")).unwrap();
        let leaf = set.register(Registration::field("b")).unwrap();
        leaf.change(json!(2));
        assert_eq!(set.value(), json!({"b": 2}));
        assert_eq!(root.value(), json!({"a": {"b": 2}}));
        assert_eq!(root.init(), json!({"a": {"b": 1}}));
        assert!(root.state().is_dirty);
    }

    #[test]
    fn container_assignment_pushes_down() {
        let root = form_like(json!({"a": {"b": 1, "c": 2}}));
        let set = root.register(Registration::field_set("a")).unwrap();
        let b = set.register(Registration::field("b")).unwrap();
        let c = set.register(Registration::field("c")).unwrap();
        set.change(json!({"b": 10}));
        assert_eq!(b.value(), json!(10));
        assert_eq!(c.value(), Value::Null);
        assert_eq!(root.value(), json!({"a": {"b": 10, "c": null}}));
    }

    #[test]
    fn counters_accumulate_along_the_path() {
        let root = form_like(json!({}));
        let set = root.register(Registration::field_set("a")).unwrap();
        let leaf = set.register(Registration::field("b")).unwrap();
        leaf.patch(Patch::touch(), PatchOptions::default());
        leaf.patch(Patch::touch(), PatchOptions::default());
        assert_eq!(leaf.state().touches, 2);
        assert_eq!(set.state().touches, 2);
        assert_eq!(root.state().touches, 2);
        assert!(root.state().any_touched);
    }

    #[test]
    fn visit_without_activate_only_marks_visited() {
        let root = form_like(json!({}));
        let leaf = root.register(Registration::field("a")).unwrap();
        leaf.patch(Patch::visit(), PatchOptions::default());
        assert!(root.state().any_visited);
        assert!(!root.state().is_active);
    }

    #[test]
    fn activation_moves_between_branches() {
        let root = form_like(json!({}));
        let left = root.register(Registration::field_set("l")).unwrap();
        let a = left.register(Registration::field("a")).unwrap();
        let b = root.register(Registration::field("b")).unwrap();

        a.patch(Patch::visit(), PatchOptions::activating());
        assert_eq!(root.state().active, Some(a.id()));
        assert!(left.state().is_active);
        assert!(a.state().is_focused);

        b.patch(Patch::visit(), PatchOptions::activating());
        assert_eq!(root.state().active, Some(b.id()));
        assert!(!left.state().is_active);
        assert!(!a.state().is_active);
    }

    #[test]
    fn touching_any_field_clears_the_active_field() {
        let root = form_like(json!({}));
        let a = root.register(Registration::field("a")).unwrap();
        let b = root.register(Registration::field("b")).unwrap();
        a.patch(Patch::visit(), PatchOptions::activating());
        b.patch(Patch::touch(), PatchOptions::default());
        assert_eq!(root.state().active, None);
        assert!(!a.state().is_active);

        a.patch(Patch::visit(), PatchOptions::activating());
        a.patch(Patch::untouch(), PatchOptions::default());
        assert_eq!(root.state().active, None);
        assert!(!a.state().is_focused);
    }

    #[test]
    fn silent_patch_skips_subscribers() {
        let root = form_like(json!({}));
        let hits = Rc::new(std::cell::Cell::new(0));
        let counter = hits.clone();
        let _sub = root.subscribe(move |_| counter.set(counter.get() + 1));
        root.patch(Patch::touch(), PatchOptions::silent());
        assert_eq!(hits.get(), 0);
        assert_eq!(root.state().touches, 1);
    }

    #[test]
    fn ancestors_notified_after_target() {
        let root = form_like(json!({}));
        let leaf = root.register(Registration::field("a")).unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        let _s1 = {
            let log = log.clone();
            root.subscribe(move |_| log.borrow_mut().push("root"))
        };
        let _s2 = {
            let log = log.clone();
            leaf.subscribe(move |_| log.borrow_mut().push("leaf"))
        };
        leaf.change(json!("x"));
        assert_eq!(*log.borrow(), vec!["leaf", "root"]);
    }

    #[test]
    fn broadcast_is_parent_first_depth_first() {
        let root = form_like(json!({}));
        let set = root.register(Registration::field_set("s")).unwrap();
        let inner = set.register(Registration::field("x")).unwrap();
        let sibling = root.register(Registration::field("y")).unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        let subs: Vec<_> = [&root, &set, &inner, &sibling]
            .into_iter()
            .map(|node| {
                let log = log.clone();
                let path = node.path();
                node.subscribe(move |_| log.borrow_mut().push(path.clone()))
            })
            .collect();
        root.broadcast();
        assert_eq!(*log.borrow(), vec!["", "s", "s.x", "y"]);
        drop(subs);
    }

    // -- lookup --

    #[test]
    fn find_returns_none_for_unregistered_or_too_long_paths() {
        let root = form_like(json!({}));
        root.register(Registration::field("a")).unwrap();
        assert!(root.find("a").is_some());
        assert!(root.find("a.b").is_none());
        assert!(root.find("zzz").is_none());
        assert!(root.find("a..").is_none());
        assert!(matches!(root.get("q"), Err(FormError::UnknownNode { .. })));
    }

    #[test]
    fn patch_at_routes_to_descendant() {
        let root = form_like(json!({}));
        let set = root.register(Registration::field_set("s")).unwrap();
        let leaf = set.register(Registration::field("x")).unwrap();
        root.patch_at("s.x", Patch::new().with_value(json!(5)), PatchOptions::default())
            .unwrap();
        assert_eq!(leaf.value(), json!(5));
        assert_eq!(root.value(), json!({"s": {"x": 5}}));
    }

    // -- attach / detach --

    #[test]
    fn register_node_attaches_detached_subtree() {
        let root = form_like(json!({}));
        let set = Node::new(NodeKind::FieldSet, json!({}));
        let leaf = set.register(Registration::field("bar").with_init(json!("baz"))).unwrap();
        root.register_node("foo", &set).unwrap();
        assert_eq!(leaf.path(), "foo.bar");
        assert_eq!(root.value(), json!({"foo": {"bar": "baz"}}));
        assert!(root.register_node("foo", &set).is_ok());
        let other = Node::new(NodeKind::Field, json!(1));
        assert!(matches!(
            root.register_node("foo", &other),
            Err(FormError::Occupied { .. })
        ));
    }

    #[test]
    fn register_node_rejects_cycles_and_attached_nodes() {
        let root = form_like(json!({}));
        let set = root.register(Registration::field_set("s")).unwrap();
        let other = form_like(json!({}));
        assert!(matches!(
            other.register_node("x", &set),
            Err(FormError::AlreadyAttached { .. })
        ));
        let lone = Node::new(NodeKind::FieldSet, json!({}));
        let inner = lone.register(Registration::field_set("in")).unwrap();
        assert!(matches!(
            inner.register_node("loop", &lone),
            Err(FormError::Cycle { .. })
        ));
    }

    #[test]
    fn unregister_clears_active_inside_removed_subtree() {
        let root = form_like(json!({}));
        let set = root.register(Registration::field_set("s")).unwrap();
        let leaf = set.register(Registration::field("x")).unwrap();
        leaf.visit();
        assert!(root.state().is_active);
        assert!(set.unregister());
        assert!(!root.state().is_active);
        assert!(!set.unregister());
    }

    #[test]
    fn detached_node_keeps_local_state() {
        let leaf = Node::new(NodeKind::Field, json!(""));
        leaf.change(json!("x"));
        leaf.touch();
        assert_eq!(leaf.value(), json!("x"));
        assert!(leaf.state().is_touched);
        assert!(leaf.parent().is_none());
        assert_eq!(leaf.root(), leaf);
    }
}
