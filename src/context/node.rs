//! Context tree nodes and cancellation propagation.
//!
//! Ownership runs upward: a node holds its parent strongly and its children
//! weakly. Each cancelable node guards its cause and child list with its own
//! lock, and never holds that lock while touching another node.

use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use super::timer::DeadlineTimer;
use super::value::{ContextValue, DynKey};
use super::Context;
use crate::channel::Channel;
use crate::error::Error;
use crate::tracing_compat::{debug, trace};

/// Mutable part of a cancelable node.
#[derive(Debug, Default)]
pub(crate) struct CancelInner {
    /// Set exactly once.
    pub(crate) cause: Option<Error>,
    pub(crate) children: Vec<Weak<Node>>,
}

/// State of a Cancel or Timer node.
#[derive(Debug)]
pub(crate) struct CancelState {
    /// Present only on Timer nodes.
    pub(crate) deadline: Option<Instant>,
    /// Closed on cancellation; never carries a value.
    pub(crate) done: Channel<bool>,
    pub(crate) inner: Mutex<CancelInner>,
    pub(crate) timer: Mutex<Option<DeadlineTimer>>,
}

impl CancelState {
    pub(crate) fn new(deadline: Option<Instant>) -> Self {
        Self {
            deadline,
            done: Channel::new(0),
            inner: Mutex::new(CancelInner::default()),
            timer: Mutex::new(None),
        }
    }
}

#[derive(Debug)]
pub(crate) enum NodeKind {
    Background,
    Todo,
    Cancel(CancelState),
    Value {
        key: Box<dyn DynKey>,
        value: ContextValue,
    },
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) parent: Option<Context>,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub(crate) fn cancel_state(&self) -> Option<&CancelState> {
        match &self.kind {
            NodeKind::Cancel(state) => Some(state),
            _ => None,
        }
    }
}

/// Walks up from `ctx` (inclusive) to the first node that can be canceled.
pub(crate) fn nearest_cancelable(ctx: &Context) -> Option<&Arc<Node>> {
    let mut current = Some(ctx);
    while let Some(ctx) = current {
        if ctx.inner.cancel_state().is_some() {
            return Some(&ctx.inner);
        }
        current = ctx.inner.parent.as_ref();
    }
    None
}

/// Attaches `child` below the nearest cancelable ancestor of `parent`.
///
/// If that ancestor is already canceled, `child` is canceled right away with
/// the same cause.
pub(crate) fn attach(parent: &Context, child: &Arc<Node>) {
    let Some(ancestor) = nearest_cancelable(parent) else {
        return;
    };
    let Some(state) = ancestor.cancel_state() else {
        return;
    };
    let mut inner = state.inner.lock();
    if let Some(cause) = inner.cause.clone() {
        drop(inner);
        trace!("parent already canceled, canceling new child");
        cancel(child, cause);
        return;
    }
    inner.children.retain(|weak| weak.strong_count() > 0);
    inner.children.push(Arc::downgrade(child));
}

/// Cancels `node` and its live descendants with `cause`.
///
/// Walks the subtree with an explicit worklist so chain depth is bounded
/// only by memory. Returns false if the node was already canceled or is not
/// cancelable.
pub(crate) fn cancel(node: &Arc<Node>, cause: Error) -> bool {
    let Some(mut pending) = cancel_one(node, &cause) else {
        return false;
    };
    let mut canceled = 1_usize;
    while let Some(child) = pending.pop() {
        let Some(child) = child.upgrade() else {
            continue;
        };
        if let Some(grandchildren) = cancel_one(&child, &cause) {
            canceled += 1;
            pending.extend(grandchildren);
        }
    }
    debug!(cause = %cause, canceled, "context canceled");
    true
}

/// Marks one node canceled and hands back its children. `None` if it was
/// already canceled or cannot be.
fn cancel_one(node: &Arc<Node>, cause: &Error) -> Option<Vec<Weak<Node>>> {
    let state = node.cancel_state()?;
    let children = {
        let mut inner = state.inner.lock();
        if inner.cause.is_some() {
            return None;
        }
        inner.cause = Some(cause.clone());
        std::mem::take(&mut inner.children)
    };
    state.done.close();
    let timer = state.timer.lock().take();
    drop(timer);
    Some(children)
}

impl Drop for Node {
    fn drop(&mut self) {
        // Unlink uniquely owned ancestors one at a time instead of letting
        // each parent drop inside its child's drop.
        let mut next = self.parent.take();
        while let Some(ctx) = next {
            next = match Arc::try_unwrap(ctx.inner) {
                Ok(mut parent) => parent.parent.take(),
                Err(_) => None,
            };
        }
    }
}
