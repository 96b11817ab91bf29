use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize};

use parking_lot::Mutex;

use crate::key::ResourceKey;

/// Cache record binding a key to its loaded unit and the bookkeeping needed
/// for reclamation.
///
/// The unit itself lives in the publication cell. The slot is reserved in
/// the live index before construction runs, and competing acquirers for the
/// same key serialize on the cell mutex while the builder fills it; acquirers
/// for other keys never touch it.
pub(crate) struct Entry<U> {
	pub(crate) key: ResourceKey,
	/// Distinguishes generations of the same key in the pending index.
	pub(crate) id: u64,
	/// Outstanding handles. Starts at 1 for the reserving caller.
	pub(crate) refs: AtomicUsize,
	/// Set once the zero-count transition has queued a reclamation; keeps
	/// the transition idempotent when two releasers race through zero.
	pub(crate) queued: AtomicBool,
	/// Publication cell; `None` until the builder has run.
	pub(crate) cell: Mutex<Option<Arc<U>>>,
}

impl<U> Entry<U> {
	pub(crate) fn new(key: ResourceKey, id: u64) -> Self {
		Self {
			key,
			id,
			refs: AtomicUsize::new(1),
			queued: AtomicBool::new(false),
			cell: Mutex::new(None),
		}
	}

	/// The published unit, if the builder has run.
	pub(crate) fn unit(&self) -> Option<Arc<U>> {
		self.cell.lock().clone()
	}
}

/// Pending-cleanup token for an entry whose count reached zero.
///
/// Consumed exactly once: by the finalizer or by the shutdown drain,
/// whichever takes the record out of the pending index first.
pub(crate) struct Reclamation<U> {
	pub(crate) key: ResourceKey,
	pub(crate) unit: Arc<U>,
}
