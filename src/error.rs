use thiserror::Error;

/// Cache protocol errors.
///
/// Every variant indicates misuse by the caller and is surfaced
/// synchronously on the misusing call. Failures during asynchronous resource
/// release are a different animal: they are contained in the reclaimer and
/// reported through logging (see [`crate::LoadedUnit::close`]), because the
/// caller that triggered the reclamation is long gone.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
	/// The key names no libraries and no parent context, so it identifies
	/// nothing that could be cached.
	#[error("resource key carries no identity (empty library set, no parent)")]
	InvalidKey,

	/// A handle was explicitly released twice. The first release already
	/// gave the reference back; honoring a second would corrupt the count.
	#[error("handle released more than once")]
	DoubleRelease,

	/// The cache was shut down; no further units can be acquired.
	#[error("cache is closed")]
	Closed,
}
