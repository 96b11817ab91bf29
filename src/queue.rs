use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender, unbounded};

/// Messages handed from releasing threads to the finalizer.
enum ReclaimMsg {
	/// Id of an entry whose pending record should be processed.
	Reclaim(u64),
	/// Wake-up carrying no work; lets `stop` interrupt a blocked take.
	Wake,
}

/// Outcome of a blocking [`ReclaimQueue::take`].
pub(crate) enum Take {
	Item(u64),
	/// The queue was stopped. Reported ahead of any still-queued items;
	/// whatever remains in the pending index belongs to the shutdown drain.
	Cancelled,
}

/// Hand-off of zero-count events from arbitrary releasing threads to the
/// single finalizer thread.
pub(crate) struct ReclaimQueue {
	tx: Sender<ReclaimMsg>,
	rx: Receiver<ReclaimMsg>,
	stopped: AtomicBool,
}

impl ReclaimQueue {
	pub(crate) fn new() -> Self {
		let (tx, rx) = unbounded();
		Self {
			tx,
			rx,
			stopped: AtomicBool::new(false),
		}
	}

	/// Non-blocking; callable from any releasing thread.
	pub(crate) fn push(&self, id: u64) {
		// A send failure means the receiver half is gone, which only
		// happens once the finalizer has exited; the shutdown drain owns
		// everything still pending at that point.
		let _ = self.tx.send(ReclaimMsg::Reclaim(id));
	}

	/// Block until an item arrives or the queue is stopped.
	///
	/// Only ever called by the finalizer thread.
	pub(crate) fn take(&self) -> Take {
		loop {
			if self.stopped.load(Ordering::Acquire) {
				return Take::Cancelled;
			}
			match self.rx.recv() {
				Ok(ReclaimMsg::Reclaim(id)) => {
					if self.stopped.load(Ordering::Acquire) {
						return Take::Cancelled;
					}
					return Take::Item(id);
				}
				Ok(ReclaimMsg::Wake) => continue,
				Err(_) => return Take::Cancelled,
			}
		}
	}

	/// Signal cancellation and wake a blocked taker.
	pub(crate) fn stop(&self) {
		self.stopped.store(true, Ordering::Release);
		let _ = self.tx.send(ReclaimMsg::Wake);
	}
}
