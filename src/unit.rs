/// Error raised by [`LoadedUnit::close`].
///
/// Close failures are reported through logging by whichever reclamation path
/// runs them; by the time a unit is closed the caller that released it has
/// moved on, so there is nobody left to propagate the error to.
pub type CloseError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An expensive resource held by the cache.
///
/// A loaded unit owns native resources (typically open handles on the
/// libraries it was loaded from) and is opaque to the cache beyond this
/// `close` contract.
///
/// # Contract
///
/// `close` releases all native resources. It must tolerate being invoked on
/// an already-closed unit without returning an error: the cache closes each
/// unit at most once, but implementations commonly share underlying handles
/// with teardown code of their own, so redundant closes must be safe.
pub trait LoadedUnit: Send + Sync + 'static {
	fn close(&self) -> Result<(), CloseError>;
}
