//! Sharded key-to-node map backing the cache.
//!
//! The store is partitioned into a power-of-two number of shards, each a
//! `hashbrown` map behind its own `RwLock`. A key is routed to its shard by
//! masking the low bits of its hash. Every operation touches exactly one shard
//! and holds its lock only for the duration of the map call, so the store can
//! be mutated without the eviction lock.
//!
//! The conditional operations compare nodes by identity (`Arc::ptr_eq`), never
//! by value: a node that has been replaced under the same key is a different
//! node, and an operation holding the stale reference must not disturb the new
//! one.

use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::RandomState;
use hashbrown::HashMap;
use hashbrown::hash_map::Entry;
use parking_lot::RwLock;

use crate::node::Node;

type NodeRef<K, V> = Arc<Node<K, V>>;

/// A single partition of the store. Not thread-safe on its own.
struct Shard<K, V> {
	entries: HashMap<K, NodeRef<K, V>, RandomState>,
}

impl<K: Hash + Eq, V> Shard<K, V> {
	fn with_capacity(capacity: usize, hasher: RandomState) -> Self {
		Self {
			entries: HashMap::with_capacity_and_hasher(capacity, hasher),
		}
	}
}

pub(crate) struct EntryStore<K, V> {
	shards: Box<[RwLock<Shard<K, V>>]>,
	/// Routes keys to shards. Independent of the per-shard hashers.
	router: RandomState,
	/// Total entry count across shards
	len: AtomicUsize,
}

impl<K, V> EntryStore<K, V>
where
	K: Hash + Eq + Clone,
{
	/// Creates a store with `shard_count` shards (rounded up to a power of two,
	/// at least 4), pre-sized for `initial_capacity` entries in total.
	pub fn new(shard_count: usize, initial_capacity: usize) -> Self {
		let shard_count = shard_count.next_power_of_two().max(4);
		let per_shard = initial_capacity.div_ceil(shard_count);
		let shards = (0..shard_count)
			.map(|_| RwLock::new(Shard::with_capacity(per_shard, RandomState::new())))
			.collect();

		Self {
			shards,
			router: RandomState::new(),
			len: AtomicUsize::new(0),
		}
	}

	pub fn get(&self, key: &K) -> Option<NodeRef<K, V>> {
		self.shard(key).read().entries.get(key).cloned()
	}

	/// Inserts `node` unless the key is already mapped.
	///
	/// Returns the resident node when the insert did not happen.
	pub fn insert_if_absent(&self, key: K, node: NodeRef<K, V>) -> Option<NodeRef<K, V>> {
		let mut shard = self.shard(&key).write();
		match shard.entries.entry(key) {
			Entry::Occupied(occupied) => Some(occupied.get().clone()),
			Entry::Vacant(vacant) => {
				vacant.insert(node);
				self.len.fetch_add(1, Ordering::Relaxed);
				None
			}
		}
	}

	/// Removes whatever node the key maps to.
	pub fn remove(&self, key: &K) -> Option<NodeRef<K, V>> {
		let removed = self.shard(key).write().entries.remove(key);
		if removed.is_some() {
			self.len.fetch_sub(1, Ordering::Relaxed);
		}
		removed
	}

	/// Removes the mapping only if the key still maps to `expected`.
	pub fn remove_if_match(&self, key: &K, expected: &NodeRef<K, V>) -> bool {
		let mut shard = self.shard(key).write();
		let matches = shard.entries.get(key).is_some_and(|current| Arc::ptr_eq(current, expected));
		if matches {
			shard.entries.remove(key);
			self.len.fetch_sub(1, Ordering::Relaxed);
		}
		matches
	}

	/// Replaces the mapping with `new` only if the key still maps to `expected`.
	pub fn replace_if_match(&self, key: &K, expected: &NodeRef<K, V>, new: NodeRef<K, V>) -> bool {
		let mut shard = self.shard(key).write();
		match shard.entries.get_mut(key) {
			Some(current) if Arc::ptr_eq(current, expected) => {
				*current = new;
				true
			}
			_ => false,
		}
	}

	pub fn len(&self) -> usize {
		self.len.load(Ordering::Relaxed)
	}

	/// Snapshot of every mapped node. Weakly consistent under concurrent writes.
	pub fn nodes(&self) -> Vec<NodeRef<K, V>> {
		let mut nodes = Vec::with_capacity(self.len());
		for shard in self.shards.iter() {
			nodes.extend(shard.read().entries.values().cloned());
		}
		nodes
	}

	fn shard(&self, key: &K) -> &RwLock<Shard<K, V>> {
		let index = (self.router.hash_one(key) as usize) & (self.shards.len() - 1);
		&self.shards[index]
	}
}
