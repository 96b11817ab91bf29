use std::sync::Arc;
use std::thread::{Builder as ThreadBuilder, JoinHandle};

use tracing::debug;

use crate::queue::Take;
use crate::store::Shared;
use crate::unit::LoadedUnit;

/// Start the finalizer: the sole consumer of the reclamation queue and,
/// outside the shutdown drain, the only code that closes a unit.
pub(crate) fn spawn<U: LoadedUnit>(shared: Arc<Shared<U>>, name: String) -> JoinHandle<()> {
	ThreadBuilder::new()
		.name(name)
		.spawn(move || run(shared))
		.expect("failed to spawn finalizer thread")
}

/// One item per iteration until cancelled; there is no pause state.
fn run<U: LoadedUnit>(shared: Arc<Shared<U>>) {
	debug!("finalizer started");
	loop {
		match shared.queue.take() {
			Take::Item(id) => {
				// Whoever removes the pending record owns the close; the
				// shutdown drain may have beaten us to this one.
				if let Some(reclamation) = shared.take_pending(id) {
					shared.reclaim(&reclamation.key, &reclamation.unit);
				}
			}
			Take::Cancelled => {
				debug!("finalizer stopping");
				break;
			}
		}
	}
}
