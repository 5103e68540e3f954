//! Cancellation, deadlines, and request-scoped values.
//!
//! A [`Context`] is a node in a tree rooted at [`background()`] (or
//! [`todo()`]). Canceling a node cancels its whole subtree; value lookups
//! walk toward the root. Cancellation is cooperative: a canceled context does
//! not interrupt anything by itself. Code that should stop early polls
//! [`Context::err`] or selects on [`Context::done`].
//!
//! # Node kinds
//!
//! | Kind | Cancelable | Deadline | Value |
//! |------|------------|----------|-------|
//! | Background / TODO | never | none | none |
//! | Cancel | yes | inherited | inherited |
//! | Timer | yes, also at its deadline | own | inherited |
//! | Value | inherited | inherited | own pair, else inherited |
//!
//! # Example
//!
//! ```
//! use cspsync::context;
//! use std::time::Duration;
//!
//! let root = context::background();
//! let (ctx, cancel) = context::with_timeout(&root, Duration::from_secs(30)).unwrap();
//! let (child, _child_cancel) = context::with_cancel(&ctx).unwrap();
//!
//! assert!(child.err().is_ok());
//! cancel.cancel();
//! assert_eq!(child.err().unwrap_err().to_string(), "context canceled");
//! assert!(root.err().is_ok());
//! ```

mod node;
mod timer;
mod util;
mod value;

pub use util::{sleep_with_context, wait_for_context, will_be_canceled_soon};
pub use value::{ContextKey, ContextValue};

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use self::node::{CancelState, Node, NodeKind};
use self::timer::DeadlineTimer;
use self::value::key_matches;
use crate::channel::Channel;
use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::trace;

/// Which variant a context node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// The root returned by [`background()`].
    Background,
    /// The placeholder root returned by [`todo()`].
    Todo,
    /// Created by [`with_cancel`].
    Cancel,
    /// Created by [`with_deadline`] or [`with_timeout`].
    Timer,
    /// Created by [`with_value`] or [`with_typed_value`].
    Value,
}

/// A handle to one node of the context tree.
///
/// Cheap to clone; clones refer to the same node.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Node>,
}

/// Cancels the context it was returned with.
///
/// Safe to call any number of times from any thread; only the first call has
/// an effect. Also stops the deadline timer of a timer context.
#[derive(Clone)]
pub struct CancelFn {
    node: Arc<Node>,
}

impl CancelFn {
    /// Cancels the context with "context canceled".
    pub fn cancel(&self) {
        node::cancel(&self.node, Error::cancelled());
    }
}

impl fmt::Debug for CancelFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelFn")
            .field("canceled", &self.node.cancel_state().is_some_and(is_done))
            .finish()
    }
}

fn is_done(state: &CancelState) -> bool {
    state.inner.lock().cause.is_some()
}

/// A channel that is never closed, for contexts without a cancelable
/// ancestor. Each call gets its own, so closing one affects no other caller.
fn never_done() -> Channel<bool> {
    Channel::new(0)
}

fn root(kind: NodeKind) -> Context {
    Context {
        inner: Arc::new(Node { parent: None, kind }),
    }
}

/// Returns the process-wide root context. It is never canceled and carries
/// no deadline and no values.
#[must_use]
pub fn background() -> Context {
    static BACKGROUND: OnceLock<Context> = OnceLock::new();
    BACKGROUND.get_or_init(|| root(NodeKind::Background)).clone()
}

/// Returns the placeholder root for code that has not been given a context
/// yet. Behaves exactly like [`background()`].
#[must_use]
pub fn todo() -> Context {
    static TODO: OnceLock<Context> = OnceLock::new();
    TODO.get_or_init(|| root(NodeKind::Todo)).clone()
}

fn require_parent<'p>(parent: impl Into<Option<&'p Context>>) -> Result<&'p Context> {
    parent.into().ok_or_else(Error::nil_parent)
}

fn new_cancel_node(parent: &Context, deadline: Option<Instant>) -> Arc<Node> {
    let node = Arc::new(Node {
        parent: Some(parent.clone()),
        kind: NodeKind::Cancel(CancelState::new(deadline)),
    });
    node::attach(parent, &node);
    node
}

/// Derives a cancelable child of `parent`.
///
/// # Errors
///
/// Returns `NilParent` if `parent` is `None`.
pub fn with_cancel<'p>(parent: impl Into<Option<&'p Context>>) -> Result<(Context, CancelFn)> {
    let parent = require_parent(parent)?;
    let node = new_cancel_node(parent, None);
    trace!(parent = ?parent.kind(), "created cancel context");
    Ok((
        Context {
            inner: Arc::clone(&node),
        },
        CancelFn { node },
    ))
}

/// Derives a child of `parent` that is canceled with "context deadline
/// exceeded" once `deadline` passes.
///
/// If `parent` already expires no later than `deadline`, the child is a
/// plain cancel context: the parent's expiry reaches it anyway. A deadline
/// in the past yields a child that is already canceled.
///
/// # Errors
///
/// Returns `NilParent` if `parent` is `None`, or `Internal` if no timer
/// thread could be started.
pub fn with_deadline<'p>(
    parent: impl Into<Option<&'p Context>>,
    deadline: Instant,
) -> Result<(Context, CancelFn)> {
    let parent = require_parent(parent)?;
    if let Ok(current) = parent.deadline() {
        if current <= deadline {
            return with_cancel(parent);
        }
    }

    let node = new_cancel_node(parent, Some(deadline));
    if let Some(state) = node.cancel_state() {
        if Instant::now() >= deadline {
            node::cancel(&node, Error::deadline_exceeded());
        } else if !is_done(state) {
            let timer = DeadlineTimer::start(Arc::downgrade(&node), deadline)?;
            *state.timer.lock() = Some(timer);
            // A cancel racing the start saw an empty slot; stop the timer here.
            if is_done(state) {
                let timer = state.timer.lock().take();
                drop(timer);
            }
        }
    }
    trace!(parent = ?parent.kind(), "created timer context");
    Ok((
        Context {
            inner: Arc::clone(&node),
        },
        CancelFn { node },
    ))
}

/// Derives a child of `parent` that is canceled after `timeout` elapses.
///
/// # Errors
///
/// Same as [`with_deadline`].
pub fn with_timeout<'p>(
    parent: impl Into<Option<&'p Context>>,
    timeout: Duration,
) -> Result<(Context, CancelFn)> {
    let parent = require_parent(parent)?;
    match Instant::now().checked_add(timeout) {
        Some(deadline) => with_deadline(parent, deadline),
        // Unrepresentable instant: the deadline can never be reached.
        None => with_cancel(parent),
    }
}

/// Derives a child of `parent` carrying `key` → `value`.
///
/// # Errors
///
/// Returns `NilParent` if `parent` is `None`.
pub fn with_value<'p, K, V>(
    parent: impl Into<Option<&'p Context>>,
    key: K,
    value: V,
) -> Result<Context>
where
    K: PartialEq + Any + Send + Sync + fmt::Debug,
    V: Any + Send + Sync,
{
    let parent = require_parent(parent)?;
    Ok(Context {
        inner: Arc::new(Node {
            parent: Some(parent.clone()),
            kind: NodeKind::Value {
                key: Box::new(key),
                value: ContextValue::new(value),
            },
        }),
    })
}

/// Derives a child of `parent` carrying a value under a typed key.
///
/// # Errors
///
/// Returns `NilParent` if `parent` is `None`.
pub fn with_typed_value<'p, V>(
    parent: impl Into<Option<&'p Context>>,
    key: &ContextKey<V>,
    value: V,
) -> Result<Context>
where
    V: Any + Send + Sync,
{
    with_value(parent, *key, value)
}

impl Context {
    /// Returns the variant of this node.
    #[must_use]
    pub fn kind(&self) -> ContextKind {
        match &self.inner.kind {
            NodeKind::Background => ContextKind::Background,
            NodeKind::Todo => ContextKind::Todo,
            NodeKind::Cancel(state) if state.deadline.is_some() => ContextKind::Timer,
            NodeKind::Cancel(_) => ContextKind::Cancel,
            NodeKind::Value { .. } => ContextKind::Value,
        }
    }

    /// Returns the instant at which this context is canceled automatically.
    ///
    /// # Errors
    ///
    /// Returns `NoDeadline` if neither this node nor an ancestor has one.
    pub fn deadline(&self) -> Result<Instant> {
        let mut current = Some(self);
        while let Some(ctx) = current {
            if let Some(deadline) = ctx.inner.cancel_state().and_then(|s| s.deadline) {
                return Ok(deadline);
            }
            current = ctx.inner.parent.as_ref();
        }
        Err(Error::new(ErrorKind::NoDeadline))
    }

    /// Returns a channel that is closed when this context is canceled.
    ///
    /// The channel never carries a value; receiving from it blocks until
    /// cancellation and then returns `None`. For contexts that can never be
    /// canceled it is never closed.
    #[must_use]
    pub fn done(&self) -> Channel<bool> {
        node::nearest_cancelable(self)
            .and_then(|node| node.cancel_state())
            .map_or_else(never_done, |state| state.done.clone())
    }

    /// Returns `Ok(())` while active, and the cancellation cause afterwards.
    ///
    /// # Errors
    ///
    /// `Cancelled` ("context canceled") or `DeadlineExceeded` ("context
    /// deadline exceeded"); the same error on every call.
    pub fn err(&self) -> Result<()> {
        let Some(state) = node::nearest_cancelable(self).and_then(|n| n.cancel_state()) else {
            return Ok(());
        };
        let cause = state.inner.lock().cause.clone();
        cause.map_or(Ok(()), Err)
    }

    /// Returns true once this context has been canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.err().is_err()
    }

    /// Looks up the value stored under `key` in this context or its
    /// ancestors. The nearest match wins.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if no node carries a key of the same type that
    /// compares equal.
    pub fn value<K>(&self, key: &K) -> Result<ContextValue>
    where
        K: PartialEq + Any,
    {
        let mut current = Some(self);
        while let Some(ctx) = current {
            if let NodeKind::Value { key: stored, value } = &ctx.inner.kind {
                if key_matches(&**stored, key) {
                    return Ok(value.clone());
                }
            }
            current = ctx.inner.parent.as_ref();
        }
        Err(Error::new(ErrorKind::KeyNotFound))
    }

    /// Typed lookup through a [`ContextKey`].
    #[must_use]
    pub fn get<V>(&self, key: &ContextKey<V>) -> Option<Arc<V>>
    where
        V: Any + Send + Sync,
    {
        self.value(key).ok()?.downcast_arc::<V>()
    }

    /// Returns the parent context, if this is not a root.
    #[must_use]
    pub fn parent(&self) -> Option<&Context> {
        self.inner.parent.as_ref()
    }
}

impl Context {
    fn fmt_node(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.kind {
            NodeKind::Background => f.write_str("context.Background"),
            NodeKind::Todo => f.write_str("context.TODO"),
            NodeKind::Cancel(state) => match state.deadline {
                Some(deadline) => write!(
                    f,
                    "WithDeadline({:?} remaining)",
                    deadline.saturating_duration_since(Instant::now())
                ),
                None => f.write_str("WithCancel"),
            },
            NodeKind::Value { key, .. } => write!(f, "WithValue({key:?})"),
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut path = Vec::new();
        let mut current = Some(self);
        while let Some(ctx) = current {
            path.push(ctx);
            current = ctx.inner.parent.as_ref();
        }
        for (depth, ctx) in path.iter().rev().enumerate() {
            if depth > 0 {
                f.write_str(".")?;
            }
            ctx.fmt_node(f)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("kind", &self.kind())
            .field("canceled", &self.is_canceled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::select::{recv_case, select};
    use crate::test_utils::{spawn_named, wait_until};

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn background_is_inert_singleton() {
        init_test("background_is_inert_singleton");
        let bg = background();
        assert!(Arc::ptr_eq(&bg.inner, &background().inner));
        assert!(bg.err().is_ok());
        assert_eq!(
            bg.deadline().expect_err("no deadline").kind(),
            ErrorKind::NoDeadline
        );
        assert_eq!(
            bg.value(&"k").expect_err("no value").to_string(),
            "key not found"
        );
        assert_eq!(
            bg.done().recv_timeout(Duration::from_millis(5)),
            Err(crate::channel::RecvTimeoutError::Timeout)
        );
        assert_eq!(todo().kind(), ContextKind::Todo);
        assert_eq!(bg.to_string(), "context.Background");
        crate::test_complete!("background_is_inert_singleton");
    }

    #[test]
    fn nil_parent_is_rejected() {
        init_test("nil_parent_is_rejected");
        let err = with_cancel(None).expect_err("nil parent");
        assert_eq!(err.to_string(), "parent context is nil");
        assert_eq!(
            with_timeout(None, Duration::from_secs(1))
                .expect_err("nil parent")
                .kind(),
            ErrorKind::NilParent
        );
        assert_eq!(
            with_deadline(None, Instant::now())
                .expect_err("nil parent")
                .kind(),
            ErrorKind::NilParent
        );
        assert_eq!(
            with_value(None, "k", "v").expect_err("nil parent").kind(),
            ErrorKind::NilParent
        );
        crate::test_complete!("nil_parent_is_rejected");
    }

    #[test]
    fn cancel_propagates_down_not_up() {
        init_test("cancel_propagates_down_not_up");
        let (parent, parent_cancel) = with_cancel(&background()).expect("parent");
        let (child, child_cancel) = with_cancel(&parent).expect("child");
        let (grandchild, _g) = with_cancel(&child).expect("grandchild");
        let (sibling, _s) = with_cancel(&parent).expect("sibling");

        crate::test_section!("child cancel stays local");
        child_cancel.cancel();
        assert!(child.is_canceled());
        assert!(grandchild.is_canceled());
        assert!(!parent.is_canceled());
        assert!(!sibling.is_canceled());

        crate::test_section!("parent cancel reaches remaining subtree");
        parent_cancel.cancel();
        assert!(sibling.is_canceled());
        let err = sibling.err().expect_err("canceled");
        crate::assert_with_log!(
            err.to_string() == "context canceled",
            "cause",
            "context canceled",
            err
        );
        crate::test_complete!("cancel_propagates_down_not_up");
    }

    #[test]
    fn cancel_is_idempotent_and_closes_done() {
        init_test("cancel_is_idempotent_and_closes_done");
        let (ctx, cancel) = with_cancel(&background()).expect("ctx");
        let done = ctx.done();
        assert!(!done.is_closed());
        cancel.cancel();
        cancel.cancel();
        assert!(done.is_closed());
        assert_eq!(done.recv(), None);
        assert!(ctx.err().expect_err("canceled").is_cancelled());
        crate::test_complete!("cancel_is_idempotent_and_closes_done");
    }

    #[test]
    fn child_of_canceled_parent_starts_canceled() {
        init_test("child_of_canceled_parent_starts_canceled");
        let (parent, cancel) = with_cancel(&background()).expect("parent");
        cancel.cancel();
        let (child, _c) = with_cancel(&parent).expect("child");
        assert!(child.is_canceled());
        assert!(child.done().is_closed());
        crate::test_complete!("child_of_canceled_parent_starts_canceled");
    }

    #[test]
    fn timeout_reports_deadline_exceeded() {
        init_test("timeout_reports_deadline_exceeded");
        let (ctx, _cancel) = with_timeout(&background(), Duration::from_millis(100)).expect("ctx");
        assert_eq!(ctx.kind(), ContextKind::Timer);
        assert!(ctx.err().is_ok());
        assert!(ctx.deadline().is_ok());

        assert_eq!(ctx.done().recv(), None);
        let err = ctx.err().expect_err("expired");
        crate::assert_with_log!(
            err.to_string() == "context deadline exceeded",
            "deadline cause",
            "context deadline exceeded",
            err
        );
        crate::test_complete!("timeout_reports_deadline_exceeded");
    }

    #[test]
    fn explicit_cancel_beats_timer() {
        init_test("explicit_cancel_beats_timer");
        let (ctx, cancel) = with_timeout(&background(), Duration::from_secs(60)).expect("ctx");
        cancel.cancel();
        assert!(ctx.err().expect_err("canceled").is_cancelled());
        let state = ctx.inner.cancel_state().expect("timer node");
        assert!(state.timer.lock().is_none());
        crate::test_complete!("explicit_cancel_beats_timer");
    }

    #[test]
    fn past_deadline_is_canceled_immediately() {
        init_test("past_deadline_is_canceled_immediately");
        let (ctx, _cancel) = with_deadline(&background(), Instant::now()).expect("ctx");
        assert!(ctx.err().expect_err("expired").is_deadline_exceeded());
        let state = ctx.inner.cancel_state().expect("timer node");
        assert!(state.timer.lock().is_none());
        crate::test_complete!("past_deadline_is_canceled_immediately");
    }

    #[test]
    fn later_deadline_is_clamped_to_parent() {
        init_test("later_deadline_is_clamped_to_parent");
        let (parent, _p) = with_timeout(&background(), Duration::from_secs(10)).expect("parent");
        let parent_deadline = parent.deadline().expect("deadline");
        let (child, _c) = with_timeout(&parent, Duration::from_secs(60)).expect("child");
        assert_eq!(child.kind(), ContextKind::Cancel);
        assert_eq!(child.deadline().expect("inherited"), parent_deadline);

        let (tighter, _t) = with_timeout(&parent, Duration::from_secs(1)).expect("tighter");
        assert_eq!(tighter.kind(), ContextKind::Timer);
        assert!(tighter.deadline().expect("own") < parent_deadline);
        crate::test_complete!("later_deadline_is_clamped_to_parent");
    }

    #[test]
    fn parent_expiry_reaches_children() {
        init_test("parent_expiry_reaches_children");
        let (parent, _p) = with_timeout(&background(), Duration::from_millis(30)).expect("parent");
        let (child, _c) = with_cancel(&parent).expect("child");
        assert_eq!(child.done().recv(), None);
        assert!(child.err().expect_err("expired").is_deadline_exceeded());
        crate::test_complete!("parent_expiry_reaches_children");
    }

    #[test]
    fn values_resolve_toward_root() {
        init_test("values_resolve_toward_root");
        let root = background();
        let a = with_value(&root, "k", "v").expect("a");
        let b = with_value(&a, "k2", "v2").expect("b");

        let v = b.value(&"k").expect("k");
        assert_eq!(v.downcast_ref::<&str>(), Some(&"v"));
        let v2 = b.value(&"k2").expect("k2");
        assert_eq!(v2.downcast_ref::<&str>(), Some(&"v2"));

        assert!(root.value(&"k").is_err());
        assert!(root.value(&"k2").is_err());
        assert!(a.value(&"k2").is_err());

        crate::test_section!("exact type required");
        assert!(b.value(&String::from("k")).is_err());
        crate::test_complete!("values_resolve_toward_root");
    }

    #[test]
    fn nearest_value_shadows() {
        init_test("nearest_value_shadows");
        let outer = with_value(&background(), 1_u8, "outer").expect("outer");
        let inner = with_value(&outer, 1_u8, "inner").expect("inner");
        assert_eq!(
            inner.value(&1_u8).expect("found").downcast_ref::<&str>(),
            Some(&"inner")
        );
        crate::test_complete!("nearest_value_shadows");
    }

    #[test]
    fn value_nodes_pass_cancellation_through() {
        init_test("value_nodes_pass_cancellation_through");
        let (ctx, cancel) = with_cancel(&background()).expect("ctx");
        let valued = with_value(&ctx, "user", 7_u32).expect("value");
        let (below, _b) = with_cancel(&valued).expect("below");
        assert_eq!(valued.kind(), ContextKind::Value);

        cancel.cancel();
        assert!(valued.is_canceled());
        assert!(valued.done().is_closed());
        assert!(below.is_canceled());
        crate::test_complete!("value_nodes_pass_cancellation_through");
    }

    #[test]
    fn typed_keys_return_typed_values() {
        init_test("typed_keys_return_typed_values");
        let user: ContextKey<String> = ContextKey::new("user");
        let ctx = with_typed_value(&background(), &user, "ada".to_string()).expect("ctx");
        assert_eq!(ctx.get(&user).as_deref().map(String::as_str), Some("ada"));
        crate::test_complete!("typed_keys_return_typed_values");
    }

    #[test]
    fn select_on_done_and_data() {
        init_test("select_on_done_and_data");
        let (ctx, cancel) = with_cancel(&background()).expect("ctx");
        let data: Channel<u32> = Channel::new(0);

        let canceler = spawn_named("canceler", move || {
            std::thread::sleep(Duration::from_millis(20));
            cancel.cancel();
        });
        let out = select(vec![
            recv_case(&data, |_| "data"),
            recv_case(&ctx.done(), |_| "done"),
        ]);
        canceler.join().expect("canceler panicked");
        assert_eq!(out, "done");
        crate::test_complete!("select_on_done_and_data");
    }

    #[test]
    fn cancel_from_many_threads() {
        init_test("cancel_from_many_threads");
        let (ctx, cancel) = with_cancel(&background()).expect("ctx");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cancel = cancel.clone();
                spawn_named("canceler", move || cancel.cancel())
            })
            .collect();
        for h in handles {
            h.join().expect("canceler panicked");
        }
        assert!(ctx.is_canceled());
        crate::test_complete!("cancel_from_many_threads");
    }

    #[test]
    fn dropping_timer_context_joins_thread() {
        init_test("dropping_timer_context_joins_thread");
        let (ctx, cancel) = with_timeout(&background(), Duration::from_secs(60)).expect("ctx");
        let weak = Arc::downgrade(&ctx.inner);
        drop(ctx);
        drop(cancel);
        assert!(wait_until(Duration::from_secs(1), || weak.upgrade().is_none()));
        crate::test_complete!("dropping_timer_context_joins_thread");
    }

    #[test]
    fn display_shows_path() {
        init_test("display_shows_path");
        let (ctx, _c) = with_cancel(&background()).expect("ctx");
        let valued = with_value(&ctx, "k", 1).expect("value");
        assert_eq!(
            valued.to_string(),
            "context.Background.WithCancel.WithValue(\"k\")"
        );
        crate::test_complete!("display_shows_path");
    }

    #[test]
    fn deep_chains_cancel_and_drop_iteratively() {
        init_test("deep_chains_cancel_and_drop_iteratively");
        const DEPTH: usize = 100_000;
        // Default 2 MiB thread stack: recursion per level would overflow it.
        let worker = spawn_named("deep-chain", || {
            let (root, cancel) = with_cancel(&background()).expect("root");
            let mut leaf = root;
            for _ in 0..DEPTH {
                leaf = with_cancel(&leaf).expect("child").0;
            }
            cancel.cancel();
            let leaf_canceled = leaf.is_canceled();
            drop(leaf);

            let mut uncanceled = background();
            for _ in 0..DEPTH {
                uncanceled = with_cancel(&uncanceled).expect("child").0;
            }
            let rendered = uncanceled.to_string();
            drop(uncanceled);
            (leaf_canceled, rendered.matches("WithCancel").count())
        });
        let (leaf_canceled, rendered_levels) = worker.join().expect("deep chain thread panicked");
        assert!(leaf_canceled);
        assert_eq!(rendered_levels, DEPTH);
        crate::test_complete!("deep_chains_cancel_and_drop_iteratively");
    }

    #[test]
    fn background_done_channels_are_independent() {
        init_test("background_done_channels_are_independent");
        let tampered = background().done();
        tampered.close();
        let valued = with_value(&background(), "k", 1_u8).expect("value");
        assert!(!background().done().is_closed());
        assert!(!valued.done().is_closed());
        assert!(background().err().is_ok());
        crate::test_complete!("background_done_channels_are_independent");
    }
}
