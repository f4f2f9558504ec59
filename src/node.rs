//! The unit shared between the entry store and the eviction deque.
//!
//! A [`Node`] is created when a key is first inserted and lives until it is
//! retired by an explicit removal or by eviction. Its value is held in an
//! [`ArcSwapOption`]: a present value means the node is alive, and retirement
//! swaps the value out for `None` exactly once. Every writer that changes the
//! value does so with a compare-and-swap against the value it observed, so a
//! write can never resurrect a retired node.
//!
//! The node also carries the index of its slot in the eviction deque. That
//! field is only read or written while the eviction lock is held.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arc_swap::ArcSwapOption;

/// Slot index meaning "not linked into the eviction deque".
pub(crate) const UNLINKED: usize = usize::MAX;

/// An immutable `(value, weight)` pair.
///
/// Replacing a node's value replaces the whole pair, so the weight always
/// belongs to the value it was computed from.
#[derive(Debug)]
pub(crate) struct WeightedValue<V> {
	pub value: Arc<V>,
	pub weight: u32,
}

impl<V> WeightedValue<V> {
	pub fn new(value: V, weight: u32) -> Self {
		Self {
			value: Arc::new(value),
			weight,
		}
	}
}

pub(crate) struct Node<K, V> {
	pub key: K,
	value: ArcSwapOption<WeightedValue<V>>,
	/// Index into the eviction deque's arena. Guarded by the eviction lock.
	slot: AtomicUsize,
}

impl<K, V> Node<K, V> {
	pub fn new(key: K, value: Arc<WeightedValue<V>>) -> Self {
		Self {
			key,
			value: ArcSwapOption::new(Some(value)),
			slot: AtomicUsize::new(UNLINKED),
		}
	}

	/// Current weighted value, or `None` once retired.
	#[inline]
	pub fn weighted_value(&self) -> Option<Arc<WeightedValue<V>>> {
		self.value.load_full()
	}

	/// Current value, or `None` once retired.
	#[inline]
	pub fn value(&self) -> Option<Arc<V>> {
		(*self.value.load()).as_ref().map(|wv| wv.value.clone())
	}

	/// Current weight, or `None` once retired.
	#[inline]
	pub fn weight(&self) -> Option<u32> {
		(*self.value.load()).as_ref().map(|wv| wv.weight)
	}

	#[inline]
	pub fn is_retired(&self) -> bool {
		self.value.load().is_none()
	}

	/// Replaces the value of a live node, returning the previous pair.
	///
	/// Returns `None` without changing anything if the node is retired.
	pub fn replace(&self, new: &Arc<WeightedValue<V>>) -> Option<Arc<WeightedValue<V>>> {
		self.replace_when(new, |_| true).ok()
	}

	/// Replaces the value of a live node if `predicate` accepts the current one.
	///
	/// On success returns the previous pair. On failure returns whether the node
	/// was alive (`Err(true)`: predicate rejected) or retired (`Err(false)`).
	pub fn replace_when(
		&self,
		new: &Arc<WeightedValue<V>>,
		predicate: impl Fn(&V) -> bool,
	) -> Result<Arc<WeightedValue<V>>, bool> {
		loop {
			let current = self.value.load_full();
			let Some(ref observed) = current else {
				return Err(false);
			};
			if !predicate(&observed.value) {
				return Err(true);
			}
			let previous = self.value.compare_and_swap(&current, Some(new.clone()));
			if same(&*previous, &current) {
				return Ok(observed.clone());
			}
		}
	}

	/// Retires the node, returning its final value.
	///
	/// Only the first caller observes `Some`; every later call returns `None`.
	pub fn retire(&self) -> Option<Arc<WeightedValue<V>>> {
		self.retire_when(|_| true).ok()
	}

	/// Retires the node if `predicate` accepts its current value.
	///
	/// Returns the final value on success, `Err(true)` if the predicate rejected
	/// the live value and `Err(false)` if the node was already retired.
	pub fn retire_when(&self, predicate: impl Fn(&V) -> bool) -> Result<Arc<WeightedValue<V>>, bool> {
		loop {
			let current = self.value.load_full();
			let Some(ref observed) = current else {
				return Err(false);
			};
			if !predicate(&observed.value) {
				return Err(true);
			}
			let previous = self.value.compare_and_swap(&current, None::<Arc<WeightedValue<V>>>);
			if same(&*previous, &current) {
				return Ok(observed.clone());
			}
		}
	}

	#[inline]
	pub(crate) fn slot(&self) -> usize {
		self.slot.load(Ordering::Relaxed)
	}

	#[inline]
	pub(crate) fn set_slot(&self, slot: usize) {
		self.slot.store(slot, Ordering::Relaxed);
	}

	#[inline]
	pub(crate) fn is_linked(&self) -> bool {
		self.slot() != UNLINKED
	}
}

impl<K: fmt::Debug, V> fmt::Debug for Node<K, V> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Node")
			.field("key", &self.key)
			.field("weight", &self.weight())
			.field("slot", &self.slot())
			.finish()
	}
}

fn same<T>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
	match (a, b) {
		(Some(a), Some(b)) => Arc::ptr_eq(a, b),
		(None, None) => true,
		_ => false,
	}
}
