//! Memoization Module
//!
//! Wraps an operation so its results are cached under keys derived from its
//! arguments.
//!
//! The default key is `prefix + name + ":" + Debug(args)`. Two argument
//! values with identical `Debug` output share a key, even if they differ in
//! type or in fields their `Debug` hides. Supply `with_key_fn` when that
//! matters.
//!
//! Invalidation removes every key under `prefix + name + ":"`. An operation
//! whose name extends another's with a colon (`report` and `report:daily`)
//! shares that namespace, so invalidating the shorter one also drops the
//! longer one's results. Give such operations distinct prefixes.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::cache::{Cache, CacheExt};
use crate::error::Result;

/// Default key derivation: the `Debug` rendering of the arguments.
pub fn debug_repr<A: Debug + ?Sized>(args: &A) -> String {
    format!("{args:?}")
}

// == Memoized ==
/// An operation paired with the cache and key function that memoize it.
///
/// `A` is the argument type, usually a tuple or a small struct.
pub struct Memoized<A: ?Sized, F, K = fn(&A) -> String> {
    cache: Arc<dyn Cache>,
    name: String,
    key_prefix: String,
    ttl: Option<Duration>,
    key_fn: K,
    op: F,
    _args: PhantomData<fn(&A)>,
}

impl<A: Debug + ?Sized, F> Memoized<A, F> {
    /// Memoizes `op` in `cache` under the operation name `name`.
    pub fn new<T, E>(cache: Arc<dyn Cache>, name: impl Into<String>, op: F) -> Self
    where
        F: Fn(&A) -> std::result::Result<T, E>,
    {
        Self {
            cache,
            name: name.into(),
            key_prefix: String::new(),
            ttl: None,
            key_fn: debug_repr::<A>,
            op,
            _args: PhantomData,
        }
    }
}

impl<A: ?Sized, F, K> Memoized<A, F, K>
where
    K: Fn(&A) -> String,
{
    /// Sets the TTL for stored results; None uses the cache default.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Prepends `prefix` to every key.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Replaces the argument part of the key with `key_fn(args)`.
    pub fn with_key_fn<K2>(self, key_fn: K2) -> Memoized<A, F, K2>
    where
        K2: Fn(&A) -> String,
    {
        Memoized {
            cache: self.cache,
            name: self.name,
            key_prefix: self.key_prefix,
            ttl: self.ttl,
            key_fn,
            op: self.op,
            _args: PhantomData,
        }
    }

    /// Common prefix of every key this wrapper writes.
    fn namespace(&self) -> String {
        format!("{}{}:", self.key_prefix, self.name)
    }

    /// Cache key used for `args`.
    pub fn key_for(&self, args: &A) -> String {
        format!("{}{}", self.namespace(), (self.key_fn)(args))
    }

    // == Call ==
    /// Returns the memoized result for `args`, running the operation on a miss.
    ///
    /// Errors from the operation are returned and not cached.
    pub fn call<T, E>(&self, args: &A) -> std::result::Result<T, E>
    where
        F: Fn(&A) -> std::result::Result<T, E>,
        T: Serialize + DeserializeOwned,
    {
        let key = self.key_for(args);
        self.cache.get_or_set(&key, || (self.op)(args), self.ttl)
    }

    /// Drops the memoized result for `args`.
    pub fn forget(&self, args: &A) -> Result<bool> {
        self.cache.delete(&self.key_for(args))
    }

    /// Drops every memoized result of this operation.
    ///
    /// Also drops results of operations named `name:...` under the same
    /// prefix, since their keys share this namespace.
    pub fn invalidate(&self) -> Result<usize> {
        self.cache.invalidate_prefix(&self.namespace())
    }
}

impl<A: ?Sized, F, K> Debug for Memoized<A, F, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoized")
            .field("name", &self.name)
            .field("key_prefix", &self.key_prefix)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use std::fmt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn memory() -> Arc<dyn Cache> {
        Arc::new(MemoryCache::new(None))
    }

    #[test]
    fn test_same_args_computed_once() {
        let calls = AtomicUsize::new(0);
        let total = Memoized::new(memory(), "order_total", |(order, qty): &(u32, u32)| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(order * qty)
        });

        assert_eq!(total.call(&(3, 4)), Ok(12));
        assert_eq!(total.call(&(3, 4)), Ok(12));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(total.call(&(5, 4)), Ok(20));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_key_layout() {
        let lookup = Memoized::new(memory(), "customer", |id: &u32| Ok::<_, String>(*id)).with_key_prefix("db:");

        assert_eq!(lookup.key_for(&7), "db:customer:7");
    }

    #[test]
    fn test_identical_debug_output_collides() {
        assert_eq!(debug_repr(&1u8), debug_repr(&1i64));

        // Debug hides the second field, so these two arguments share a key
        struct Masked(u32, u32);
        impl fmt::Debug for Masked {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "Masked({})", self.0)
            }
        }

        let calls = AtomicUsize::new(0);
        let sum = Memoized::new(memory(), "sum", |m: &Masked| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(m.0 + m.1)
        });

        assert_eq!(sum.call(&Masked(1, 2)), Ok(3));
        assert_eq!(sum.call(&Masked(1, 5)), Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_custom_key_fn_separates_args() {
        struct Masked(u32, u32);
        impl fmt::Debug for Masked {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "Masked({})", self.0)
            }
        }

        let sum = Memoized::new(memory(), "sum", |m: &Masked| Ok::<_, String>(m.0 + m.1))
            .with_key_fn(|m: &Masked| format!("{}-{}", m.0, m.1));

        assert_eq!(sum.call(&Masked(1, 2)), Ok(3));
        assert_eq!(sum.call(&Masked(1, 5)), Ok(6));
    }

    #[test]
    fn test_errors_not_memoized() {
        let calls = AtomicUsize::new(0);
        let flaky = Memoized::new(memory(), "flaky", |_: &()| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err("connection reset".to_string())
            } else {
                Ok(n)
            }
        });

        assert!(flaky.call(&()).is_err());
        assert_eq!(flaky.call(&()), Ok(1));
        assert_eq!(flaky.call(&()), Ok(1));
    }

    #[test]
    fn test_invalidate_covers_colon_extended_names() {
        let cache = memory();
        let report = Memoized::new(Arc::clone(&cache), "report", |n: &u32| Ok::<_, String>(*n));
        let daily = Memoized::new(Arc::clone(&cache), "report:daily", |n: &u32| Ok::<_, String>(*n));
        let daily_apart =
            Memoized::new(Arc::clone(&cache), "report:daily", |n: &u32| Ok::<_, String>(*n)).with_key_prefix("daily/");

        report.call(&1).unwrap();
        daily.call(&2).unwrap();
        daily_apart.call(&3).unwrap();

        assert_eq!(report.invalidate().unwrap(), 2);
        assert!(cache.get(&daily.key_for(&2)).is_none());
        assert!(cache.get(&daily_apart.key_for(&3)).is_some());
    }

    #[test]
    fn test_forget_and_invalidate() {
        let cache = memory();
        cache.set("unrelated", serde_json::json!(0), None).unwrap();

        let calls = AtomicUsize::new(0);
        let square = Memoized::new(Arc::clone(&cache), "square", |n: &u64| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(n * n)
        });

        square.call(&2).unwrap();
        square.call(&3).unwrap();
        assert!(square.forget(&2).unwrap());
        square.call(&2).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        assert_eq!(square.invalidate().unwrap(), 2);
        assert!(cache.get("unrelated").is_some());
    }
}
