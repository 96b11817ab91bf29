use crate::key::ResourceKey;
use crate::store::{Cache, ReclaimObserver};
use crate::unit::LoadedUnit;

/// Builder for configuring a [`Cache`].
///
/// # Example
///
/// ```
/// use loader_cache::{Cache, CacheBuilder, CloseError, LoadedUnit, ResourceKey};
///
/// struct Unit;
/// impl LoadedUnit for Unit {
/// 	fn close(&self) -> Result<(), CloseError> {
/// 		Ok(())
/// 	}
/// }
///
/// let cache: Cache<Unit> = CacheBuilder::new()
/// 	.thread_name("plugin-isolate-finalizer")
/// 	.on_reclaim(|key| eprintln!("reclaiming {key}"))
/// 	.build();
/// # cache.shutdown();
/// ```
pub struct CacheBuilder {
	pub(crate) thread_name: String,
	pub(crate) observer: Option<ReclaimObserver>,
}

impl CacheBuilder {
	/// Create a builder with default settings.
	pub fn new() -> Self {
		Self {
			thread_name: "loader-cache-finalizer".to_string(),
			observer: None,
		}
	}

	/// Name for the finalizer thread (visible in thread dumps).
	///
	/// Default: `loader-cache-finalizer`.
	pub fn thread_name(mut self, name: impl Into<String>) -> Self {
		self.thread_name = name.into();
		self
	}

	/// Observe each reclamation with the key being reclaimed.
	///
	/// The observer runs on the reclaiming thread just before the unit is
	/// closed: usually the finalizer, or the caller of `shutdown` during
	/// the final drain. It must not panic and should return quickly.
	pub fn on_reclaim<F>(mut self, observer: F) -> Self
	where
		F: Fn(&ResourceKey) + Send + Sync + 'static,
	{
		self.observer = Some(Box::new(observer));
		self
	}

	/// Build the cache and start its finalizer thread.
	pub fn build<U: LoadedUnit>(self) -> Cache<U> {
		Cache::with_config(self)
	}
}

impl Default for CacheBuilder {
	fn default() -> Self {
		Self::new()
	}
}
