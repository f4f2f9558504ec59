//! Arena-backed eviction deque.
//!
//! Orders every linked node from least- to most-recently used. Links live in a
//! slot arena and refer to each other by index; slot 0 is a sentinel that
//! closes the list into a ring, so the head is `sentinel.next` and the tail is
//! `sentinel.prev`, and linking or unlinking never special-cases the ends.
//!
//! ```text
//!        ┌──────────────────────────────────────────────┐
//!        ▼                                              │
//!   [0: sentinel] ◄──► [3: A] ◄──► [1: B] ◄──► [2: C] ◄─┘
//!                      LRU (head)              MRU (tail)
//! ```
//!
//! A node records its own slot index so a replayed event can find its link in
//! O(1). The deque is the only writer of that index and of every link field,
//! and it is only reachable through the eviction lock. Freed slots are reused
//! immediately: buffered events reference nodes, not slots, and a node's slot
//! index is reset when it is unlinked.
//!
//! The deque also owns the weighted-size total. Each link remembers the weight
//! it contributed, so unlinking subtracts exactly what linking added even if
//! the node's value has been replaced since.

use std::sync::Arc;

use crate::error::CacheError;
use crate::node::{Node, UNLINKED};

const SENTINEL: usize = 0;

struct Link<K, V> {
	node: Option<Arc<Node<K, V>>>,
	/// Weight this link contributes to `weighted_size`.
	weight: u32,
	prev: usize,
	next: usize,
}

impl<K, V> Link<K, V> {
	fn sentinel() -> Self {
		Self {
			node: None,
			weight: 0,
			prev: SENTINEL,
			next: SENTINEL,
		}
	}
}

pub(crate) struct EvictionDeque<K, V> {
	links: Vec<Link<K, V>>,
	free: Vec<usize>,
	len: usize,
	weighted_size: u64,
}

impl<K, V> EvictionDeque<K, V> {
	pub fn with_capacity(capacity: usize) -> Self {
		let mut links = Vec::with_capacity(capacity + 1);
		links.push(Link::sentinel());
		Self {
			links,
			free: Vec::new(),
			len: 0,
			weighted_size: 0,
		}
	}

	#[inline]
	pub fn len(&self) -> usize {
		self.len
	}

	#[inline]
	pub fn weighted_size(&self) -> u64 {
		self.weighted_size
	}

	/// Slot of the least-recently-used node.
	#[inline]
	pub fn head(&self) -> Option<usize> {
		let head = self.links[SENTINEL].next;
		(head != SENTINEL).then_some(head)
	}

	/// Links `node` at the most-recently-used end.
	pub fn push_back(&mut self, node: Arc<Node<K, V>>, weight: u32) -> usize {
		let link = Link {
			node: None,
			weight,
			prev: SENTINEL,
			next: SENTINEL,
		};
		let slot = match self.free.pop() {
			Some(slot) => {
				self.links[slot] = link;
				slot
			}
			None => {
				self.links.push(link);
				self.links.len() - 1
			}
		};

		node.set_slot(slot);
		self.links[slot].node = Some(node);
		self.attach_back(slot);
		self.len += 1;
		self.weighted_size += u64::from(weight);
		slot
	}

	/// Unlinks the node in `slot`, returning it with the weight it contributed.
	pub fn unlink(&mut self, slot: usize) -> Option<(Arc<Node<K, V>>, u32)> {
		debug_assert_ne!(slot, SENTINEL, "the sentinel is never unlinked");
		let node = self.links.get_mut(slot)?.node.take()?;
		self.detach(slot);

		let weight = std::mem::take(&mut self.links[slot].weight);
		self.free.push(slot);
		self.len -= 1;
		self.weighted_size -= u64::from(weight);
		node.set_slot(UNLINKED);
		Some((node, weight))
	}

	/// Moves the node in `slot` to the most-recently-used end.
	pub fn move_to_back(&mut self, slot: usize) {
		if self.links[SENTINEL].prev == slot {
			return;
		}
		self.detach(slot);
		self.attach_back(slot);
	}

	/// Changes the weight `slot` contributes, keeping the total in step.
	pub fn set_weight(&mut self, slot: usize, weight: u32) {
		let link = &mut self.links[slot];
		self.weighted_size = self.weighted_size - u64::from(link.weight) + u64::from(weight);
		link.weight = weight;
	}

	/// Unlinks every node, least-recently-used first.
	pub fn drain(&mut self) -> Vec<Arc<Node<K, V>>> {
		let mut nodes = Vec::with_capacity(self.len);
		while let Some(head) = self.head() {
			if let Some((node, _)) = self.unlink(head) {
				nodes.push(node);
			}
		}
		nodes
	}

	/// Linked nodes with their weights, least-recently-used first.
	pub fn iter(&self) -> impl Iterator<Item = (&Arc<Node<K, V>>, u32)> + '_ {
		let mut cursor = self.links[SENTINEL].next;
		std::iter::from_fn(move || {
			if cursor == SENTINEL {
				return None;
			}
			let link = &self.links[cursor];
			cursor = link.next;
			link.node.as_ref().map(|node| (node, link.weight))
		})
	}

	/// Checks the ring structure, the per-node slot indices and the weight total.
	pub fn validate(&self) -> Result<(), CacheError> {
		let sentinel = &self.links[SENTINEL];
		if self.links[sentinel.prev].next != SENTINEL || self.links[sentinel.next].prev != SENTINEL {
			return Err(CacheError::invariant("sentinel link corruption"));
		}

		let mut seen = vec![false; self.links.len()];
		let mut count = 0usize;
		let mut weight = 0u64;
		let mut cursor = sentinel.next;
		while cursor != SENTINEL {
			if seen[cursor] {
				return Err(CacheError::invariant(format!("loop detected at slot {cursor}")));
			}
			seen[cursor] = true;

			let link = &self.links[cursor];
			let Some(node) = link.node.as_ref() else {
				return Err(CacheError::invariant(format!("empty slot {cursor} is linked")));
			};
			if link.prev == cursor || link.next == cursor {
				return Err(CacheError::invariant(format!("slot {cursor} is its own neighbor")));
			}
			if self.links[link.prev].next != cursor || self.links[link.next].prev != cursor {
				return Err(CacheError::invariant(format!("link corruption at slot {cursor}")));
			}
			if node.slot() != cursor {
				return Err(CacheError::invariant(format!(
					"node in slot {cursor} records slot {}",
					node.slot()
				)));
			}

			count += 1;
			weight += u64::from(link.weight);
			cursor = link.next;
		}

		if count != self.len {
			return Err(CacheError::invariant(format!("deque length {} != linked count {count}", self.len)));
		}
		if weight != self.weighted_size {
			return Err(CacheError::invariant(format!(
				"weighted size {} != sum of link weights {weight}",
				self.weighted_size
			)));
		}
		Ok(())
	}

	fn detach(&mut self, slot: usize) {
		let (prev, next) = {
			let link = &self.links[slot];
			(link.prev, link.next)
		};
		self.links[prev].next = next;
		self.links[next].prev = prev;
	}

	fn attach_back(&mut self, slot: usize) {
		let tail = self.links[SENTINEL].prev;
		self.links[slot].prev = tail;
		self.links[slot].next = SENTINEL;
		self.links[tail].next = slot;
		self.links[SENTINEL].prev = slot;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::node::WeightedValue;

	fn node(key: u64, weight: u32) -> Arc<Node<u64, u64>> {
		Arc::new(Node::new(key, Arc::new(WeightedValue::new(key, weight))))
	}

	fn keys(deque: &EvictionDeque<u64, u64>) -> Vec<u64> {
		deque.iter().map(|(node, _)| node.key).collect()
	}

	#[test]
	fn test_push_back_orders_lru_to_mru() {
		let mut deque = EvictionDeque::with_capacity(4);
		for key in 1..=3 {
			deque.push_back(node(key, 1), 1);
		}

		assert_eq!(keys(&deque), vec![1, 2, 3]);
		assert_eq!(deque.len(), 3);
		assert_eq!(deque.weighted_size(), 3);
		deque.validate().expect("valid deque");
	}

	#[test]
	fn test_move_to_back() {
		let mut deque = EvictionDeque::with_capacity(4);
		let first = node(1, 1);
		deque.push_back(first.clone(), 1);
		deque.push_back(node(2, 1), 1);
		deque.push_back(node(3, 1), 1);

		deque.move_to_back(first.slot());
		assert_eq!(keys(&deque), vec![2, 3, 1]);

		// Already at the tail
		deque.move_to_back(first.slot());
		assert_eq!(keys(&deque), vec![2, 3, 1]);
		deque.validate().expect("valid deque");
	}

	#[test]
	fn test_unlink_resets_slot_and_weight() {
		let mut deque = EvictionDeque::with_capacity(4);
		let middle = node(2, 5);
		deque.push_back(node(1, 3), 3);
		deque.push_back(middle.clone(), 5);
		deque.push_back(node(3, 7), 7);

		let (unlinked, weight) = deque.unlink(middle.slot()).expect("linked");
		assert_eq!(unlinked.key, 2);
		assert_eq!(weight, 5);
		assert!(!middle.is_linked());
		assert_eq!(keys(&deque), vec![1, 3]);
		assert_eq!(deque.weighted_size(), 10);
		deque.validate().expect("valid deque");
	}

	#[test]
	fn test_freed_slots_are_reused() {
		let mut deque = EvictionDeque::with_capacity(2);
		let first = node(1, 1);
		let slot = deque.push_back(first.clone(), 1);
		deque.unlink(slot);

		let second = node(2, 1);
		assert_eq!(deque.push_back(second.clone(), 1), slot);
		assert_eq!(second.slot(), slot);
		assert!(!first.is_linked());
		deque.validate().expect("valid deque");
	}

	#[test]
	fn test_set_weight_adjusts_total() {
		let mut deque = EvictionDeque::with_capacity(2);
		let slot = deque.push_back(node(1, 2), 2);
		deque.push_back(node(2, 2), 2);

		deque.set_weight(slot, 10);
		assert_eq!(deque.weighted_size(), 12);
		deque.set_weight(slot, 0);
		assert_eq!(deque.weighted_size(), 2);
		deque.validate().expect("valid deque");
	}

	#[test]
	fn test_drain_empties_in_lru_order() {
		let mut deque = EvictionDeque::with_capacity(4);
		for key in 1..=4 {
			deque.push_back(node(key, 2), 2);
		}

		let drained: Vec<u64> = deque.drain().iter().map(|n| n.key).collect();
		assert_eq!(drained, vec![1, 2, 3, 4]);
		assert_eq!(deque.len(), 0);
		assert_eq!(deque.head(), None);
		assert_eq!(deque.weighted_size(), 0);
		deque.validate().expect("valid deque");
	}

	#[test]
	fn test_validate_detects_corruption() {
		let mut deque = EvictionDeque::with_capacity(4);
		let a = deque.push_back(node(1, 1), 1);
		deque.push_back(node(2, 1), 1);

		deque.links[a].next = a;
		assert!(deque.validate().is_err());
	}
}
