//! Cache activity counters.

/// Snapshot of cache activity.
///
/// Counters are updated with relaxed atomics on the hot paths, so a snapshot
/// taken under load is approximate but internally consistent enough for
/// diagnosing reuse and leak patterns.
///
/// # Example
///
/// ```
/// use loader_cache::{Cache, CloseError, LoadedUnit, ResourceKey};
///
/// struct Unit;
/// impl LoadedUnit for Unit {
/// 	fn close(&self) -> Result<(), CloseError> {
/// 		Ok(())
/// 	}
/// }
///
/// let cache = Cache::new();
/// let key = ResourceKey::new(["a.so"]);
/// let first = cache.acquire(key.clone(), |_| Unit).unwrap();
/// let second = cache.acquire(key, |_| Unit).unwrap();
///
/// let metrics = cache.metrics();
/// assert_eq!(metrics.builds, 1);
/// assert_eq!(metrics.hits, 1);
/// assert_eq!(metrics.reuse_rate(), 0.5);
/// # drop(first);
/// # drop(second);
/// # cache.shutdown();
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub struct CacheMetrics {
	/// Acquires satisfied by an already-built unit.
	pub hits: u64,
	/// Acquires that ran a builder.
	pub builds: u64,
	/// Zero-count transitions handed to the finalizer.
	pub reclamations_queued: u64,
	/// Units actually closed, by the finalizer or the shutdown drain.
	pub reclaimed: u64,
	/// `close` calls that reported an error (logged, never propagated).
	pub close_failures: u64,
	/// Entries currently in the live index.
	pub live: usize,
	/// Entries whose count reached zero but which are not yet closed.
	pub pending: usize,
}

impl CacheMetrics {
	/// Fraction of acquires served without running a builder.
	///
	/// Returns 0.0 if there have been no acquires.
	pub fn reuse_rate(&self) -> f64 {
		let total = self.hits + self.builds;
		if total == 0 {
			0.0
		} else {
			self.hits as f64 / total as f64
		}
	}
}
