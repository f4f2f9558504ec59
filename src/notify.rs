//! Hand-off queue between eviction and the eviction listener.
//!
//! Evictions happen while the eviction lock is held, but user callbacks must
//! never run there: a listener that calls back into the cache would otherwise
//! deadlock on the lock. Victims are pushed onto a lock-free queue instead and
//! delivered by whichever thread released the lock, after releasing it.
//!
//! Every queued entry is popped, and therefore delivered, exactly once. Only
//! one thread delivers at a time, so the listener sees entries in the order
//! they were queued. A thread that finds delivery already in progress leaves
//! its entries to the active deliverer, which re-checks the queue after it
//! steps down.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::CacheError;
use crate::traits::EvictionListener;

pub(crate) struct NotificationRelay<K, V> {
	pending: SegQueue<(K, Arc<V>)>,
	listener: Option<Arc<dyn EvictionListener<K, V>>>,
	/// Held by the thread currently invoking the listener.
	delivering: Mutex<()>,
	failures: AtomicU64,
}

impl<K, V> NotificationRelay<K, V>
where
	K: 'static,
	V: 'static,
{
	pub fn new(listener: Option<Arc<dyn EvictionListener<K, V>>>) -> Self {
		Self {
			pending: SegQueue::new(),
			listener,
			delivering: Mutex::new(()),
			failures: AtomicU64::new(0),
		}
	}

	/// Whether evictions need to be queued at all.
	#[inline]
	pub fn is_enabled(&self) -> bool {
		self.listener.is_some()
	}

	/// Queues an evicted entry. A no-op without a listener.
	#[inline]
	pub fn enqueue(&self, key: K, value: Arc<V>) {
		if self.is_enabled() {
			self.pending.push((key, value));
		}
	}

	pub fn is_empty(&self) -> bool {
		self.pending.is_empty()
	}

	/// Number of listener invocations that panicked.
	pub fn failures(&self) -> u64 {
		self.failures.load(Ordering::Relaxed)
	}

	/// Delivers every queued entry. Must not be called with the eviction lock held.
	///
	/// Returns the number of entries this call delivered, including failed
	/// deliveries. Returns 0 without waiting if another thread is delivering,
	/// including when a listener re-enters the cache on the delivering thread.
	pub fn deliver(&self) -> usize {
		let Some(listener) = self.listener.as_ref() else {
			return 0;
		};

		let mut delivered = 0;
		loop {
			let Some(turn) = self.delivering.try_lock() else {
				return delivered;
			};
			while let Some((key, value)) = self.pending.pop() {
				delivered += 1;
				if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener.on_eviction(key, value))) {
					self.failures.fetch_add(1, Ordering::Relaxed);
					let error = CacheError::ListenerPanicked {
						message: panic_message(payload.as_ref()),
					};
					warn!(%error, "eviction notification dropped");
				}
			}
			drop(turn);
			// Entries queued by a thread that saw us delivering.
			if self.pending.is_empty() {
				return delivered;
			}
		}
	}
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(message) = payload.downcast_ref::<&str>() {
		(*message).to_string()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"non-string panic payload".to_string()
	}
}
