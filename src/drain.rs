//! Replay of buffered events and capacity-driven eviction.
//!
//! [`EvictionPolicy`] is the state guarded by the cache's eviction lock: the
//! eviction deque plus the replay rules. Nothing in here blocks or allocates
//! per event beyond the deque's arena, so the time the lock is held is bounded
//! by the number of events visible when the drain started.
//!
//! Replay rules, applied per event in buffer order:
//!
//! | Event  | Effect                                                              |
//! |--------|---------------------------------------------------------------------|
//! | READ   | linked and alive: move to the MRU end; otherwise ignored            |
//! | ADD    | alive and unlinked: link at the MRU end with the node's current weight |
//! | UPDATE | linked: re-read the node's weight into its link; optionally move to MRU |
//! | REMOVE | linked: unlink and release its weight                               |
//!
//! Events from different buffers can arrive in any order relative to each
//! other (a REMOVE before its ADD, an UPDATE before its ADD), so no rule trusts
//! a weight carried by the event. Links always take the weight from the node's
//! value at replay time, which keeps every link equal to the weight of its
//! node's current value once all pending events have been replayed.

use std::hash::Hash;

use crate::buffer::{Buffers, Event};
use crate::deque::EvictionDeque;
use crate::notify::NotificationRelay;
use crate::shard::EntryStore;

pub(crate) struct EvictionPolicy<K, V> {
	pub(crate) deque: EvictionDeque<K, V>,
	touch_on_update: bool,
}

/// What a single drain did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DrainOutcome {
	pub replayed: usize,
	pub evicted: usize,
}

impl<K, V> EvictionPolicy<K, V>
where
	K: Hash + Eq + Clone + 'static,
	V: 'static,
{
	pub fn new(initial_capacity: usize, touch_on_update: bool) -> Self {
		Self {
			deque: EvictionDeque::with_capacity(initial_capacity),
			touch_on_update,
		}
	}

	#[inline]
	pub fn weighted_size(&self) -> u64 {
		self.deque.weighted_size()
	}

	/// One full drain: replays every non-idle buffer, then evicts down to
	/// `capacity`.
	pub fn run(
		&mut self,
		buffers: &Buffers<K, V>,
		capacity: u64,
		store: &EntryStore<K, V>,
		relay: &NotificationRelay<K, V>,
	) -> DrainOutcome {
		let replayed = buffers.drain(|event| self.apply(event));
		let evicted = self.evict(capacity, store, relay);
		DrainOutcome {
			replayed,
			evicted,
		}
	}

	/// Applies one buffered event to the deque.
	pub fn apply(&mut self, event: Event<K, V>) {
		match event {
			Event::Read(node) => {
				if node.is_linked() && !node.is_retired() {
					self.deque.move_to_back(node.slot());
				}
			}
			Event::Add(node) => {
				if !node.is_linked()
					&& let Some(weight) = node.weight()
				{
					self.deque.push_back(node, weight);
				}
			}
			Event::Update(node) => {
				if node.is_linked()
					&& let Some(weight) = node.weight()
				{
					let slot = node.slot();
					self.deque.set_weight(slot, weight);
					if self.touch_on_update {
						self.deque.move_to_back(slot);
					}
				}
			}
			Event::Remove(node) => {
				if node.is_linked() {
					self.deque.unlink(node.slot());
				}
			}
		}
	}

	/// Evicts from the LRU end until the weighted size fits `capacity`.
	///
	/// Each victim is retired, removed from `store` if it is still the mapped
	/// node for its key, and queued on `relay`. A head that was already retired
	/// by an explicit removal is unlinked without a notification.
	pub fn evict(&mut self, capacity: u64, store: &EntryStore<K, V>, relay: &NotificationRelay<K, V>) -> usize {
		let mut evicted = 0;
		while self.deque.weighted_size() > capacity {
			let Some(head) = self.deque.head() else {
				break;
			};
			let Some((node, _)) = self.deque.unlink(head) else {
				break;
			};
			if let Some(last) = node.retire() {
				store.remove_if_match(&node.key, &node);
				relay.enqueue(node.key.clone(), last.value.clone());
				evicted += 1;
			}
		}
		evicted
	}

	/// Unlinks and retires every linked node, removing each from `store`.
	///
	/// Returns the number of nodes retired.
	pub fn clear(&mut self, store: &EntryStore<K, V>) -> usize {
		let mut retired = 0;
		for node in self.deque.drain() {
			if node.retire().is_some() {
				store.remove_if_match(&node.key, &node);
				retired += 1;
			}
		}
		retired
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use parking_lot::Mutex;

	use super::*;
	use crate::node::{Node, WeightedValue};

	type TestNode = Arc<Node<u64, String>>;

	struct Fixture {
		policy: EvictionPolicy<u64, String>,
		store: EntryStore<u64, String>,
		relay: NotificationRelay<u64, String>,
		evicted: Arc<Mutex<Vec<u64>>>,
	}

	impl Fixture {
		fn new(touch_on_update: bool) -> Self {
			let evicted = Arc::new(Mutex::new(Vec::new()));
			let sink = evicted.clone();
			let listener = move |key: u64, _value: Arc<String>| sink.lock().push(key);
			Self {
				policy: EvictionPolicy::new(16, touch_on_update),
				store: EntryStore::new(4, 16),
				relay: NotificationRelay::new(Some(Arc::new(listener))),
				evicted,
			}
		}

		fn insert(&mut self, key: u64, weight: u32) -> TestNode {
			let node = Arc::new(Node::new(key, Arc::new(WeightedValue::new(format!("v{key}"), weight))));
			self.store.insert_if_absent(key, node.clone());
			self.policy.apply(Event::Add(node.clone()));
			node
		}

		fn order(&self) -> Vec<u64> {
			self.policy.deque.iter().map(|(node, _)| node.key).collect()
		}

		fn evict(&mut self, capacity: u64) -> Vec<u64> {
			self.policy.evict(capacity, &self.store, &self.relay);
			self.relay.deliver();
			std::mem::take(&mut *self.evicted.lock())
		}
	}

	#[test]
	fn test_read_moves_to_mru() {
		let mut f = Fixture::new(true);
		let a = f.insert(1, 1);
		f.insert(2, 1);
		f.insert(3, 1);

		f.policy.apply(Event::Read(a));
		assert_eq!(f.order(), vec![2, 3, 1]);
	}

	#[test]
	fn test_read_of_retired_node_is_ignored() {
		let mut f = Fixture::new(true);
		let a = f.insert(1, 1);
		f.insert(2, 1);

		a.retire();
		f.policy.apply(Event::Read(a));
		assert_eq!(f.order(), vec![1, 2]);
	}

	#[test]
	fn test_remove_before_add_leaves_node_unlinked() {
		let mut f = Fixture::new(true);
		let node = Arc::new(Node::new(9, Arc::new(WeightedValue::new("v9".to_string(), 4))));

		node.retire();
		f.policy.apply(Event::Remove(node.clone()));
		f.policy.apply(Event::Add(node.clone()));

		assert!(!node.is_linked());
		assert_eq!(f.policy.weighted_size(), 0);
		f.policy.deque.validate().expect("valid deque");
	}

	#[test]
	fn test_update_reconciles_weight() {
		let mut f = Fixture::new(false);
		let a = f.insert(1, 2);
		f.insert(2, 2);

		a.replace(&Arc::new(WeightedValue::new("bigger".to_string(), 7)));
		f.policy.apply(Event::Update(a.clone()));

		assert_eq!(f.policy.weighted_size(), 9);
		// Without touch-on-update the order is unchanged.
		assert_eq!(f.order(), vec![1, 2]);

		// A stale duplicate update does not double count.
		f.policy.apply(Event::Update(a));
		assert_eq!(f.policy.weighted_size(), 9);
	}

	#[test]
	fn test_update_touches_when_enabled() {
		let mut f = Fixture::new(true);
		let a = f.insert(1, 1);
		f.insert(2, 1);

		a.replace(&Arc::new(WeightedValue::new("again".to_string(), 1)));
		f.policy.apply(Event::Update(a));
		assert_eq!(f.order(), vec![2, 1]);
	}

	#[test]
	fn test_update_before_add_is_picked_up_by_add() {
		let mut f = Fixture::new(true);
		let node = Arc::new(Node::new(5, Arc::new(WeightedValue::new("v5".to_string(), 1))));
		f.store.insert_if_absent(5, node.clone());

		node.replace(&Arc::new(WeightedValue::new("v5'".to_string(), 6)));
		f.policy.apply(Event::Update(node.clone()));
		f.policy.apply(Event::Add(node));

		assert_eq!(f.policy.weighted_size(), 6);
	}

	#[test]
	fn test_evicts_lru_first() {
		let mut f = Fixture::new(true);
		for key in 1..=4 {
			f.insert(key, 1);
		}

		assert_eq!(f.evict(2), vec![1, 2]);
		assert_eq!(f.order(), vec![3, 4]);
		assert!(f.store.get(&1).is_none());
		assert!(f.store.get(&3).is_some());
		assert_eq!(f.policy.weighted_size(), 2);
	}

	#[test]
	fn test_weighted_eviction() {
		let mut f = Fixture::new(true);
		f.insert(1, 3);
		f.insert(2, 3);

		assert_eq!(f.evict(5), vec![1]);
		assert_eq!(f.order(), vec![2]);
		assert_eq!(f.policy.weighted_size(), 3);
	}

	#[test]
	fn test_retired_head_is_not_notified() {
		let mut f = Fixture::new(true);
		let a = f.insert(1, 1);
		f.insert(2, 1);
		f.insert(3, 1);

		// Explicitly removed, REMOVE still buffered.
		f.store.remove(&1);
		a.retire();

		assert_eq!(f.evict(1), vec![2]);
		assert_eq!(f.order(), vec![3]);
	}

	#[test]
	fn test_eviction_skips_replaced_mapping() {
		let mut f = Fixture::new(true);
		let a = f.insert(1, 1);
		f.insert(2, 1);

		let fresh = Arc::new(Node::new(1, Arc::new(WeightedValue::new("fresh".to_string(), 1))));
		assert!(f.store.replace_if_match(&1, &a, fresh.clone()));

		f.evict(1);
		let resident = f.store.get(&1).expect("fresh node stays mapped");
		assert!(Arc::ptr_eq(&resident, &fresh));
	}

	#[test]
	fn test_run_replays_then_evicts() {
		let mut f = Fixture::new(true);
		let buffers = Buffers::new(2, 8);
		let nodes: Vec<TestNode> = (1..=3)
			.map(|key| Arc::new(Node::new(key, Arc::new(WeightedValue::new(format!("v{key}"), 1)))))
			.collect();
		for (i, node) in nodes.iter().enumerate() {
			f.store.insert_if_absent(node.key, node.clone());
			buffers.record(i % 2, Event::Add(node.clone())).ok().expect("buffer has room");
		}

		let outcome = f.policy.run(&buffers, 2, &f.store, &f.relay);
		assert_eq!(
			outcome,
			DrainOutcome {
				replayed: 3,
				evicted: 1
			}
		);
		assert_eq!(f.policy.weighted_size(), 2);
		assert_eq!(f.store.len(), 2);
		assert!(!buffers.is_drain_required());
	}

	#[test]
	fn test_clear_retires_everything() {
		let mut f = Fixture::new(true);
		let nodes: Vec<_> = (1..=3).map(|key| f.insert(key, 2)).collect();

		assert_eq!(f.policy.clear(&f.store), 3);
		assert!(nodes.iter().all(|n| n.is_retired() && !n.is_linked()));
		assert_eq!(f.store.len(), 0);
		assert_eq!(f.policy.weighted_size(), 0);
	}
}
