use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::entry::Entry;
use crate::error::CacheError;
use crate::key::ResourceKey;
use crate::store::Shared;
use crate::unit::LoadedUnit;

/// Caller-held token granting access to a loaded unit while keeping it
/// referenced.
///
/// Each handle contributes one reference to its entry's count, so the unit
/// cannot be reclaimed while the handle is out. Give the reference back with
/// [`Handle::release`]; dropping an unreleased handle releases it as well.
/// Once the last handle for a key is gone, the unit is queued for the
/// finalizer.
///
/// A handle must not be used after it has been explicitly released;
/// [`Handle::unit`] and `Deref` panic on a released handle rather than hand
/// out a unit that may already be closing.
pub struct Handle<U: LoadedUnit> {
	shared: Arc<Shared<U>>,
	entry: Arc<Entry<U>>,
	unit: Arc<U>,
	released: bool,
}

impl<U: LoadedUnit> Handle<U> {
	pub(crate) fn new(shared: Arc<Shared<U>>, entry: Arc<Entry<U>>, unit: Arc<U>) -> Self {
		Self {
			shared,
			entry,
			unit,
			released: false,
		}
	}

	/// The unit this handle refers to.
	pub fn unit(&self) -> &U {
		assert!(!self.released, "handle used after release");
		&self.unit
	}

	/// The key the unit was cached under.
	pub fn key(&self) -> &ResourceKey {
		&self.entry.key
	}

	/// Give the reference back. When this was the last outstanding handle,
	/// the entry is queued for reclamation.
	///
	/// # Errors
	///
	/// [`CacheError::DoubleRelease`] if the handle was already released; the
	/// count is left untouched in that case.
	pub fn release(&mut self) -> Result<(), CacheError> {
		if self.released {
			return Err(CacheError::DoubleRelease);
		}
		self.released = true;
		self.shared.release_entry(&self.entry);
		Ok(())
	}
}

impl<U: LoadedUnit> Deref for Handle<U> {
	type Target = U;

	fn deref(&self) -> &U {
		self.unit()
	}
}

impl<U: LoadedUnit> Drop for Handle<U> {
	fn drop(&mut self) {
		if !self.released {
			self.released = true;
			self.shared.release_entry(&self.entry);
		}
	}
}

impl<U: LoadedUnit> fmt::Debug for Handle<U> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Handle")
			.field("key", &self.entry.key)
			.field("released", &self.released)
			.finish_non_exhaustive()
	}
}
