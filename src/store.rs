use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use hashbrown::HashMap;
use hashbrown::hash_map::Entry as MapEntry;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use crate::builder::CacheBuilder;
use crate::entry::{Entry, Reclamation};
use crate::error::CacheError;
use crate::handle::Handle;
use crate::key::ResourceKey;
use crate::metrics::CacheMetrics;
use crate::queue::ReclaimQueue;
use crate::unit::LoadedUnit;
use crate::worker;

/// Observer invoked with the key each time a unit is reclaimed.
pub type ReclaimObserver = Box<dyn Fn(&ResourceKey) + Send + Sync>;

/// Map state guarded by the store's read-write lock.
///
/// Both indexes are mutated only under the write lock. Lookups and count
/// increments need only the read lock: an entry cannot leave the live index
/// while any reader holds it, because the zero-count transition takes the
/// write lock.
pub(crate) struct State<U> {
	/// Key -> entry for every unit that can still be handed out.
	live: HashMap<ResourceKey, Arc<Entry<U>>>,
	/// Entry id -> pending cleanup for units whose count reached zero.
	pending: HashMap<u64, Reclamation<U>>,
	closed: bool,
}

/// Everything shared between the public cache, its handles, and the
/// finalizer thread.
pub(crate) struct Shared<U> {
	pub(crate) state: RwLock<State<U>>,
	pub(crate) queue: ReclaimQueue,
	observer: Option<ReclaimObserver>,
	next_id: AtomicU64,
	hits: AtomicU64,
	builds: AtomicU64,
	queued_total: AtomicU64,
	reclaimed: AtomicU64,
	close_failures: AtomicU64,
}

impl<U: LoadedUnit> Shared<U> {
	/// Take a pending record out of the index; whoever succeeds owns the
	/// close. Called by the finalizer for each queued id.
	pub(crate) fn take_pending(&self, id: u64) -> Option<Reclamation<U>> {
		self.state.write().pending.remove(&id)
	}

	/// Close one unit and report it: the single funnel for every
	/// reclamation path (finalizer, shutdown drain, post-shutdown release).
	///
	/// Runs without any lock held. A failed close is a logged leak, not a
	/// retained entry: the unit's identity is already gone from the cache.
	pub(crate) fn reclaim(&self, key: &ResourceKey, unit: &U) {
		debug!(key = %key, "reclaiming loaded unit");
		if let Some(observer) = &self.observer {
			observer(key);
		}
		if let Err(cause) = unit.close() {
			self.close_failures.fetch_add(1, Ordering::Relaxed);
			error!(key = %key, %cause, "failed to close loaded unit");
		}
		self.reclaimed.fetch_add(1, Ordering::Relaxed);
	}

	/// Give one reference back; the zero-count transition moves the entry
	/// from the live index to the pending index and wakes the finalizer.
	pub(crate) fn release_entry(&self, entry: &Arc<Entry<U>>) {
		let prev = entry.refs.fetch_sub(1, Ordering::AcqRel);
		debug_assert!(prev > 0, "loaded unit reference count underflow");
		if prev != 1 {
			return;
		}

		let mut state = self.state.write();
		if state.closed {
			drop(state);
			// The shutdown drain consumed every cell it saw; a unit still
			// published here was built after the drain walked past the
			// reservation, so this releaser closes it.
			if let Some(unit) = entry.cell.lock().take() {
				self.reclaim(&entry.key, &unit);
			}
			return;
		}
		if entry.refs.load(Ordering::Acquire) != 0 {
			// Re-acquired between the decrement and the write lock; the
			// entry stays live.
			return;
		}
		if entry.queued.swap(true, Ordering::AcqRel) {
			// A racing releaser already queued this entry.
			return;
		}

		state.live.remove(&entry.key);
		let Some(unit) = entry.unit() else {
			// The builder never published; the reservation just goes away.
			return;
		};
		state.pending.insert(
			entry.id,
			Reclamation {
				key: entry.key.clone(),
				unit,
			},
		);
		drop(state);

		self.queued_total.fetch_add(1, Ordering::Relaxed);
		self.queue.push(entry.id);
	}
}

/// Rolls a slot reservation back if the builder unwinds, so the key stays
/// usable for later acquires.
struct Rollback<'a, U: LoadedUnit> {
	shared: &'a Shared<U>,
	entry: &'a Arc<Entry<U>>,
	armed: bool,
}

impl<U: LoadedUnit> Drop for Rollback<'_, U> {
	fn drop(&mut self) {
		if self.armed {
			self.shared.release_entry(self.entry);
		}
	}
}

/// Concurrent, keyed cache of loaded units with deferred reclamation.
///
/// The cache is the single source of truth mapping [`ResourceKey`]s to
/// loaded units. It guarantees at-most-one concurrent construction per key
/// and hands units whose reference count reached zero to a dedicated
/// finalizer thread for closing.
///
/// Share the cache across threads via `Arc<Cache<U>>`. Dropping the cache
/// shuts it down; see [`Cache::shutdown`].
///
/// # Locking discipline
///
/// Lookups and count increments take the read lock, so concurrent acquirers
/// of cached keys never contend. Slot reservation, the zero-count
/// transition, and removal take the write lock. Neither the expensive
/// builder nor a unit's `close` ever runs under the map lock.
pub struct Cache<U: LoadedUnit> {
	shared: Arc<Shared<U>>,
	worker: Mutex<Option<JoinHandle<()>>>,
	/// Serializes shutdown; a late caller blocks until the first finishes.
	gate: Mutex<()>,
}

impl<U: LoadedUnit> Cache<U> {
	/// Create a cache with default configuration and start its finalizer.
	pub fn new() -> Self {
		CacheBuilder::new().build()
	}

	/// Start configuring a cache.
	pub fn builder() -> CacheBuilder {
		CacheBuilder::new()
	}

	pub(crate) fn with_config(config: CacheBuilder) -> Self {
		let shared = Arc::new(Shared {
			state: RwLock::new(State {
				live: HashMap::new(),
				pending: HashMap::new(),
				closed: false,
			}),
			queue: ReclaimQueue::new(),
			observer: config.observer,
			next_id: AtomicU64::new(0),
			hits: AtomicU64::new(0),
			builds: AtomicU64::new(0),
			queued_total: AtomicU64::new(0),
			reclaimed: AtomicU64::new(0),
			close_failures: AtomicU64::new(0),
		});
		let worker = worker::spawn(Arc::clone(&shared), config.thread_name);
		Self {
			shared,
			worker: Mutex::new(Some(worker)),
			gate: Mutex::new(()),
		}
	}

	/// Look the key up, building and caching the unit on a miss.
	///
	/// On a hit the existing unit is shared and `build` is never invoked.
	/// On a miss the slot is reserved first, then `build` runs while holding
	/// only that entry's publication cell: concurrent acquirers of the same
	/// key block until publication and share the result, while acquirers of
	/// other keys proceed in parallel.
	///
	/// The returned [`Handle`] keeps the unit referenced until it is
	/// released or dropped.
	///
	/// # Errors
	///
	/// [`CacheError::InvalidKey`] if `key` has no identity, and
	/// [`CacheError::Closed`] after [`Cache::shutdown`].
	pub fn acquire<F>(&self, key: ResourceKey, build: F) -> Result<Handle<U>, CacheError>
	where
		F: FnOnce(&ResourceKey) -> U,
	{
		if !key.has_identity() {
			return Err(CacheError::InvalidKey);
		}

		let entry = match self.lookup(&key)? {
			Some(entry) => entry,
			None => self.reserve(key)?,
		};

		// Declared ahead of the cell guard so a panicking builder releases
		// the cell before the rollback takes the map lock.
		let mut rollback = Rollback {
			shared: &self.shared,
			entry: &entry,
			armed: true,
		};
		let mut cell = entry.cell.lock();
		let unit = match &*cell {
			Some(unit) => {
				self.shared.hits.fetch_add(1, Ordering::Relaxed);
				Arc::clone(unit)
			}
			None => {
				let unit = Arc::new(build(&entry.key));
				*cell = Some(Arc::clone(&unit));
				self.shared.builds.fetch_add(1, Ordering::Relaxed);
				unit
			}
		};
		drop(cell);
		rollback.armed = false;
		drop(rollback);

		Ok(Handle::new(Arc::clone(&self.shared), entry, unit))
	}

	/// Hit path: find a live entry and take a reference under the read lock.
	fn lookup(&self, key: &ResourceKey) -> Result<Option<Arc<Entry<U>>>, CacheError> {
		let state = self.shared.state.read();
		if state.closed {
			return Err(CacheError::Closed);
		}
		Ok(state.live.get(key).map(|entry| {
			entry.refs.fetch_add(1, Ordering::AcqRel);
			Arc::clone(entry)
		}))
	}

	/// Miss path: reserve the slot, double-checking under the write lock.
	fn reserve(&self, key: ResourceKey) -> Result<Arc<Entry<U>>, CacheError> {
		let mut state = self.shared.state.write();
		if state.closed {
			return Err(CacheError::Closed);
		}
		let entry = match state.live.entry(key) {
			MapEntry::Occupied(occupied) => {
				// Lost the race to another reserver; share its slot.
				let entry = occupied.get();
				entry.refs.fetch_add(1, Ordering::AcqRel);
				Arc::clone(entry)
			}
			MapEntry::Vacant(vacant) => {
				let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
				let entry = Arc::new(Entry::new(vacant.key().clone(), id));
				vacant.insert(Arc::clone(&entry));
				entry
			}
		};
		Ok(entry)
	}

	/// Stop accepting work and synchronously release every remaining unit.
	///
	/// Live entries are drained as well as pending ones: after `shutdown`
	/// returns, every unit the cache ever handed out has been closed and
	/// both indexes are empty. Outstanding handles keep their (now closed)
	/// unit alive memory-wise; releasing them afterwards is harmless.
	///
	/// A second call blocks until the first completes, then returns without
	/// doing further work. Subsequent [`Cache::acquire`] calls fail with
	/// [`CacheError::Closed`].
	pub fn shutdown(&self) {
		let _gate = self.gate.lock();

		let (live, pending) = {
			let mut state = self.shared.state.write();
			if state.closed {
				// An earlier call already drained everything.
				return;
			}
			state.closed = true;
			(mem::take(&mut state.live), mem::take(&mut state.pending))
		};

		self.shared.queue.stop();

		// Close everything outside the lock. Taking the cell waits for an
		// in-flight builder on that entry to publish, and marks the unit
		// consumed so a straggling release does not close it again.
		for (_key, entry) in live {
			if let Some(unit) = entry.cell.lock().take() {
				self.shared.reclaim(&entry.key, &unit);
			}
		}
		for (_id, reclamation) in pending {
			self.shared.reclaim(&reclamation.key, &reclamation.unit);
		}

		// The finalizer may have taken a record out of the pending index
		// just before the drain; joining makes sure its close finished too.
		if let Some(worker) = self.worker.lock().take() {
			let _ = worker.join();
		}
		debug!("cache shutdown complete");
	}

	/// Whether [`Cache::shutdown`] has been called.
	pub fn is_closed(&self) -> bool {
		self.shared.state.read().closed
	}

	/// Number of live entries.
	pub fn len(&self) -> usize {
		self.shared.state.read().live.len()
	}

	/// Whether the live index is empty.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Number of entries awaiting reclamation.
	pub fn pending_len(&self) -> usize {
		self.shared.state.read().pending.len()
	}

	/// Whether a live entry exists for the key.
	pub fn contains(&self, key: &ResourceKey) -> bool {
		self.shared.state.read().live.contains_key(key)
	}

	/// Snapshot of cache activity.
	pub fn metrics(&self) -> CacheMetrics {
		let state = self.shared.state.read();
		CacheMetrics {
			hits: self.shared.hits.load(Ordering::Relaxed),
			builds: self.shared.builds.load(Ordering::Relaxed),
			reclamations_queued: self.shared.queued_total.load(Ordering::Relaxed),
			reclaimed: self.shared.reclaimed.load(Ordering::Relaxed),
			close_failures: self.shared.close_failures.load(Ordering::Relaxed),
			live: state.live.len(),
			pending: state.pending.len(),
		}
	}
}

impl<U: LoadedUnit> Default for Cache<U> {
	fn default() -> Self {
		Self::new()
	}
}

impl<U: LoadedUnit> Drop for Cache<U> {
	fn drop(&mut self) {
		self.shutdown();
	}
}
