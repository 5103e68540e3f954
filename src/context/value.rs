//! Request-scoped keys and values.
//!
//! Any `'static` type that is `PartialEq + Send + Sync + Debug` can be a key.
//! A lookup matches a stored key only if it has exactly the same type and
//! compares equal: `"id"` (a `&str`) and `String::from("id")` are different
//! keys.
//!
//! [`ContextKey`] is a typed token for the common case: each call to
//! [`ContextKey::new`] yields a key distinct from every other, and the value
//! type travels with the key so lookups need no downcast.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);

/// A type-erased key stored in a value node.
pub(crate) trait DynKey: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync + fmt::Debug> DynKey for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Returns true if `stored` has the type `K` and equals `key`.
pub(crate) fn key_matches<K>(stored: &dyn DynKey, key: &K) -> bool
where
    K: PartialEq + 'static,
{
    stored
        .as_any()
        .downcast_ref::<K>()
        .is_some_and(|stored| stored == key)
}

/// A value carried by a context.
#[derive(Clone)]
pub struct ContextValue(Arc<dyn Any + Send + Sync>);

impl ContextValue {
    pub(crate) fn new<V: Any + Send + Sync>(value: V) -> Self {
        Self(Arc::new(value))
    }

    /// Borrows the value as `T`, if that is its type.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Returns a shared handle to the value as `T`, if that is its type.
    #[must_use]
    pub fn downcast_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).downcast::<T>().ok()
    }

    /// Returns true if the value has type `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextValue").finish_non_exhaustive()
    }
}

/// A unique, typed context key.
///
/// ```
/// use cspsync::context::{self, ContextKey};
///
/// let request_id: ContextKey<u64> = ContextKey::new("request_id");
/// let ctx = context::with_typed_value(&context::background(), &request_id, 7).unwrap();
/// assert_eq!(ctx.get(&request_id).as_deref(), Some(&7));
///
/// // A second key with the same name is a different key.
/// let other: ContextKey<u64> = ContextKey::new("request_id");
/// assert!(ctx.get(&other).is_none());
/// ```
pub struct ContextKey<V> {
    id: u64,
    name: &'static str,
    _value: PhantomData<fn() -> V>,
}

impl<V> ContextKey<V> {
    /// Creates a key distinct from every other key.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            id: NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed),
            name,
            _value: PhantomData,
        }
    }

    /// The name given at construction, for diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<V> Clone for ContextKey<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for ContextKey<V> {}

impl<V> PartialEq for ContextKey<V> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<V> Eq for ContextKey<V> {}

impl<V> fmt::Debug for ContextKey<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextKey({}#{})", self.name, self.id)
    }
}
