//! Striped, bounded event buffers.
//!
//! Every cache operation that affects recency or weight records an [`Event`]
//! into one of a fixed number of buffers instead of mutating the eviction
//! deque directly. A thread always appends to the same buffer (chosen from a
//! per-thread stripe id), so the events of one thread stay in FIFO order
//! relative to each other. Nothing orders events across buffers.
//!
//! Appends are lock-free pushes into a `crossbeam_queue::ArrayQueue`. A full
//! buffer hands the event back to the caller, which decides whether to drop
//! it (reads) or to drain and retry (writes).
//!
//! Each buffer carries a drain status:
//!
//! ```text
//!   IDLE ──append──▶ REQUIRED ──claimed by drain──▶ PROCESSING
//!    ▲                  ▲                                │
//!    │                  └──── events left after replay ──┤
//!    └──────────────────── buffer empty after replay ────┘
//! ```
//!
//! Appends only ever perform the `IDLE -> REQUIRED` transition; an append that
//! lands while the buffer is `PROCESSING` leaves the status alone and is
//! picked up by the post-replay check.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crossbeam_queue::ArrayQueue;

use crate::node::Node;

/// Pending events each buffer can hold before appends are refused.
pub(crate) const BUFFER_CAPACITY: usize = 128;

/// Upper bound on the number of buffers.
pub(crate) const MAXIMUM_BUFFERS: usize = 64;

/// A recency or write notification awaiting replay into the eviction deque.
pub(crate) enum Event<K, V> {
	/// The node was read.
	Read(Arc<Node<K, V>>),
	/// The node was inserted into the store.
	Add(Arc<Node<K, V>>),
	/// The node's value was replaced.
	Update(Arc<Node<K, V>>),
	/// The node was removed from the store and retired.
	Remove(Arc<Node<K, V>>),
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DrainStatus {
	Idle = 0,
	Required = 1,
	Processing = 2,
}

impl DrainStatus {
	fn from_u8(raw: u8) -> Self {
		match raw {
			0 => DrainStatus::Idle,
			1 => DrainStatus::Required,
			_ => DrainStatus::Processing,
		}
	}
}

struct Buffer<K, V> {
	queue: ArrayQueue<Event<K, V>>,
	status: AtomicU8,
}

impl<K, V> Buffer<K, V> {
	fn new(capacity: usize) -> Self {
		Self {
			queue: ArrayQueue::new(capacity),
			status: AtomicU8::new(DrainStatus::Idle as u8),
		}
	}

	fn status(&self) -> DrainStatus {
		DrainStatus::from_u8(self.status.load(Ordering::SeqCst))
	}

	fn set_status(&self, status: DrainStatus) {
		self.status.store(status as u8, Ordering::SeqCst);
	}

	fn transition(&self, from: DrainStatus, to: DrainStatus) -> bool {
		self.status
			.compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
			.is_ok()
	}

	/// Marks an idle buffer as needing a drain.
	fn schedule(&self) {
		if self.status() == DrainStatus::Idle {
			self.transition(DrainStatus::Idle, DrainStatus::Required);
		}
	}

	/// Replays up to the events visible at claim time. Returns how many ran.
	fn drain(&self, apply: &mut impl FnMut(Event<K, V>)) -> usize {
		self.set_status(DrainStatus::Processing);

		let snapshot = self.queue.len();
		let mut replayed = 0;
		while replayed < snapshot {
			let Some(event) = self.queue.pop() else {
				break;
			};
			apply(event);
			replayed += 1;
		}

		if self.queue.is_empty() {
			self.set_status(DrainStatus::Idle);
			// An append may have observed PROCESSING and skipped scheduling.
			if !self.queue.is_empty() {
				self.schedule();
			}
		} else {
			self.set_status(DrainStatus::Required);
		}
		replayed
	}
}

pub(crate) struct Buffers<K, V> {
	buffers: Box<[Buffer<K, V>]>,
}

impl<K, V> Buffers<K, V> {
	/// Creates `count` buffers (rounded up to a power of two, clamped to
	/// `[1, MAXIMUM_BUFFERS]`) of `capacity` events each.
	pub fn new(count: usize, capacity: usize) -> Self {
		let count = count.clamp(1, MAXIMUM_BUFFERS).next_power_of_two();
		let buffers = (0..count).map(|_| Buffer::new(capacity)).collect();
		Self {
			buffers,
		}
	}

	pub fn len(&self) -> usize {
		self.buffers.len()
	}

	/// The buffer the calling thread appends to.
	#[inline]
	pub fn stripe(&self) -> usize {
		thread_stripe() & (self.buffers.len() - 1)
	}

	/// Appends `event` to buffer `stripe`.
	///
	/// A full buffer hands the event back untouched.
	#[inline]
	pub fn record(&self, stripe: usize, event: Event<K, V>) -> Result<(), Event<K, V>> {
		let buffer = &self.buffers[stripe];
		buffer.queue.push(event)?;
		buffer.schedule();
		Ok(())
	}

	/// Replays every buffer that is not idle. Must run under the eviction lock.
	///
	/// Only events present when a buffer is claimed are replayed; later ones
	/// wait for the next drain. Returns the number of events replayed.
	pub fn drain(&self, mut apply: impl FnMut(Event<K, V>)) -> usize {
		let mut replayed = 0;
		for buffer in self.buffers.iter() {
			if buffer.status() != DrainStatus::Idle {
				replayed += buffer.drain(&mut apply);
			}
		}
		replayed
	}

	/// Whether any buffer is waiting to be drained.
	pub fn is_drain_required(&self) -> bool {
		self.buffers.iter().any(|b| b.status() != DrainStatus::Idle)
	}

	/// Number of events not yet replayed.
	pub fn pending(&self) -> usize {
		self.buffers.iter().map(|b| b.queue.len()).sum()
	}

	pub(crate) fn statuses(&self) -> impl Iterator<Item = DrainStatus> + '_ {
		self.buffers.iter().map(|b| b.status())
	}
}

static NEXT_STRIPE: AtomicUsize = AtomicUsize::new(0);

thread_local! {
	static STRIPE: usize = NEXT_STRIPE.fetch_add(1, Ordering::Relaxed);
}

fn thread_stripe() -> usize {
	STRIPE.with(|stripe| *stripe)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::node::WeightedValue;

	fn node(key: u64) -> Arc<Node<u64, u64>> {
		Arc::new(Node::new(key, Arc::new(WeightedValue::new(key, 1))))
	}

	fn key_of(event: &Event<u64, u64>) -> u64 {
		match event {
			Event::Read(n) | Event::Add(n) | Event::Update(n) | Event::Remove(n) => n.key,
		}
	}

	#[test]
	fn test_buffer_count_is_power_of_two() {
		assert_eq!(Buffers::<u64, u64>::new(3, 8).len(), 4);
		assert_eq!(Buffers::<u64, u64>::new(0, 8).len(), 1);
		assert_eq!(Buffers::<u64, u64>::new(1000, 8).len(), MAXIMUM_BUFFERS);
	}

	#[test]
	fn test_stripe_is_stable_per_thread() {
		let buffers = Buffers::<u64, u64>::new(16, 8);
		let stripe = buffers.stripe();
		for _ in 0..10 {
			assert_eq!(buffers.stripe(), stripe);
		}
		assert!(stripe < buffers.len());
	}

	#[test]
	fn test_record_schedules_drain() {
		let buffers = Buffers::new(2, 8);
		assert!(!buffers.is_drain_required());

		buffers.record(1, Event::Add(node(1))).ok().expect("buffer has room");
		assert!(buffers.is_drain_required());
		assert_eq!(buffers.statuses().collect::<Vec<_>>(), vec![DrainStatus::Idle, DrainStatus::Required]);
		assert_eq!(buffers.pending(), 1);
	}

	#[test]
	fn test_drain_replays_fifo_and_goes_idle() {
		let buffers = Buffers::new(1, 8);
		for key in 0..5 {
			buffers.record(0, Event::Read(node(key))).ok().expect("buffer has room");
		}

		let mut seen = Vec::new();
		let replayed = buffers.drain(|event| seen.push(key_of(&event)));

		assert_eq!(replayed, 5);
		assert_eq!(seen, vec![0, 1, 2, 3, 4]);
		assert!(!buffers.is_drain_required());
		assert_eq!(buffers.pending(), 0);
	}

	#[test]
	fn test_full_buffer_returns_event() {
		let buffers = Buffers::new(1, 2);
		buffers.record(0, Event::Add(node(1))).ok().expect("buffer has room");
		buffers.record(0, Event::Add(node(2))).ok().expect("buffer has room");

		let rejected = buffers.record(0, Event::Add(node(3))).err().expect("buffer is full");
		assert_eq!(key_of(&rejected), 3);
		assert!(matches!(rejected, Event::Add(_)));
	}

	#[test]
	fn test_events_appended_during_replay_stay_pending() {
		let buffers = Buffers::new(1, 8);
		buffers.record(0, Event::Add(node(1))).ok().expect("buffer has room");

		let mut seen = Vec::new();
		let replayed = buffers.drain(|event| {
			seen.push(key_of(&event));
			if seen.len() == 1 {
				buffers.record(0, Event::Update(node(2))).ok().expect("buffer has room");
			}
		});

		assert_eq!(replayed, 1);
		assert_eq!(seen, vec![1]);
		assert_eq!(buffers.pending(), 1);
		assert!(buffers.is_drain_required());

		buffers.drain(|event| seen.push(key_of(&event)));
		assert_eq!(seen, vec![1, 2]);
		assert!(!buffers.is_drain_required());
	}
}
