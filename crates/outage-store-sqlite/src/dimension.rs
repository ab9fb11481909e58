//! [`DimensionCache`]: memoised get-or-create for dimension surrogate ids.
//!
//! Hits are served from an in-process map. A miss takes a per-key async gate
//! and re-checks the map before touching the database, so concurrent first
//! sightings of one natural key collapse into a single round trip while
//! lookups of different keys proceed independently.

use std::{
  collections::HashMap,
  fmt::Debug,
  future::Future,
  hash::Hash,
  sync::{Arc, Mutex, PoisonError, RwLock},
};

pub struct DimensionCache<K> {
  name:  &'static str,
  ids:   RwLock<HashMap<K, i64>>,
  gates: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K> DimensionCache<K>
where
  K: Eq + Hash + Clone + Debug,
{
  /// `name` only appears in logs.
  pub fn new(name: &'static str) -> Self {
    Self {
      name,
      ids: RwLock::new(HashMap::new()),
      gates: Mutex::new(HashMap::new()),
    }
  }

  pub fn get(&self, key: &K) -> Option<i64> {
    self
      .ids
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(key)
      .copied()
  }

  pub fn len(&self) -> usize {
    self.ids.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  /// Return the cached id for `key`, or run `create` to obtain it.
  ///
  /// `create` runs at most once per key at a time; if it fails nothing is
  /// cached and the next caller tries again.
  pub async fn get_or_create<F, Fut, E>(&self, key: K, create: F) -> Result<i64, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<i64, E>>,
  {
    if let Some(id) = self.get(&key) {
      return Ok(id);
    }

    let gate = self.gate(&key);
    let _held = gate.lock().await;

    if let Some(id) = self.get(&key) {
      return Ok(id);
    }

    let id = create().await?;
    tracing::debug!(dimension = self.name, ?key, id, "dimension cached");
    self
      .ids
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(key, id);
    Ok(id)
  }

  fn gate(&self, key: &K) -> Arc<tokio::sync::Mutex<()>> {
    self
      .gates
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .entry(key.clone())
      .or_default()
      .clone()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;

  #[tokio::test]
  async fn hit_skips_create() {
    let cache = DimensionCache::new("test");
    let calls = &AtomicUsize::new(0);

    for _ in 0..3 {
      let id = cache
        .get_or_create("a".to_owned(), move || async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok::<_, ()>(7)
        })
        .await
        .unwrap();
      assert_eq!(id, 7);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn failure_is_not_cached() {
    let cache: DimensionCache<String> = DimensionCache::new("test");

    let err = cache
      .get_or_create("a".to_owned(), || async { Err::<i64, _>("boom") })
      .await;
    assert_eq!(err, Err("boom"));
    assert!(cache.is_empty());

    let id = cache
      .get_or_create("a".to_owned(), || async { Ok::<_, &str>(3) })
      .await;
    assert_eq!(id, Ok(3));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_misses_create_once() {
    let cache = Arc::new(DimensionCache::new("test"));
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..16)
      .map(|_| {
        let cache = cache.clone();
        let calls = calls.clone();
        tokio::spawn(async move {
          cache
            .get_or_create(("R".to_owned(), "C".to_owned()), || async move {
              calls.fetch_add(1, Ordering::SeqCst);
              tokio::task::yield_now().await;
              Ok::<_, ()>(42)
            })
            .await
        })
      })
      .collect();

    for task in tasks {
      assert_eq!(task.await.unwrap(), Ok(42));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.len(), 1);
  }
}
