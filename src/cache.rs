use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::buffer::{BUFFER_CAPACITY, Buffers, DrainStatus, Event};
use crate::builder::CacheBuilder;
use crate::drain::EvictionPolicy;
use crate::error::CacheError;
use crate::metrics::{CacheMetrics, Counters};
use crate::node::{Node, WeightedValue};
use crate::notify::NotificationRelay;
use crate::shard::EntryStore;
use crate::traits::{EvictionListener, Weigher};

/// Attempts at the eviction lock before a writer with a full buffer blocks.
const FORCED_DRAIN_SPINS: usize = 64;

/// Thread-safe, weight-bounded cache with least-recently-used eviction.
///
/// The cache can be shared across threads via `Arc<Cache>`. All methods are
/// synchronous and never hold a lock across a call into user code, so they are
/// safe to call from async contexts. Values are returned as `Arc<V>` and can be
/// held across `.await` points.
///
/// # Amortized Eviction
///
/// Lookups and writes do not maintain the recency order themselves. Each one
/// records an event into a striped buffer and returns:
///
/// - **Reads** append a READ event and never touch the eviction lock. When
///   their buffer is full the event is dropped, which only makes the recency
///   order slightly less precise.
/// - **Writes** update the entry store first, then append an ADD, UPDATE or
///   REMOVE event and try the eviction lock. Write events are never dropped: a
///   writer that finds its buffer full drains it before retrying.
///
/// Whichever writer wins the lock replays all buffered events into the
/// eviction deque, evicts from its least-recently-used end until the weighted
/// size fits the capacity, releases the lock and only then notifies the
/// eviction listener. Writers that lose the race simply return.
///
/// Because of this, [`weighted_size`](Cache::weighted_size) and the recency
/// order lag behind in-flight operations. They are exact once
/// [`clean_up`](Cache::clean_up) has run with no concurrent activity.
///
/// # Example
///
/// ```
/// use linked_lru::Cache;
///
/// let cache = Cache::new(2).expect("valid capacity");
/// cache.put("a", 1);
/// cache.put("b", 2);
/// cache.get(&"a");
/// cache.put("c", 3);
/// cache.clean_up();
///
/// // "b" was the least recently used entry.
/// assert!(cache.contains_key(&"a"));
/// assert!(!cache.contains_key(&"b"));
/// assert_eq!(cache.weighted_size(), 2);
/// ```
pub struct Cache<K, V> {
	/// Key to node mapping
	store: EntryStore<K, V>,
	/// Pending recency and write events
	buffers: Buffers<K, V>,
	/// The eviction lock and the state it guards
	gate: Mutex<EvictionPolicy<K, V>>,
	/// Weighted size as of the last drain
	weighted_size: AtomicU64,
	/// Maximum weighted size
	capacity: AtomicU64,
	relay: NotificationRelay<K, V>,
	weigher: Box<dyn Weigher<V>>,
	counters: Counters,
}

impl<K, V> Cache<K, V>
where
	K: Hash + Eq + Clone + Send + Sync + 'static,
	V: Send + Sync + 'static,
{
	/// Create a cache holding at most `capacity` entries, each weighing one unit.
	///
	/// Use [`CacheBuilder`] to configure a weigher, a listener or the
	/// concurrency level.
	pub fn new(capacity: u64) -> Result<Self, CacheError> {
		CacheBuilder::new(capacity).build()
	}

	/// Create a builder for a cache of the given maximum weighted capacity.
	pub fn builder(capacity: u64) -> CacheBuilder<K, V> {
		CacheBuilder::new(capacity)
	}

	pub(crate) fn from_parts(
		capacity: u64,
		initial_capacity: usize,
		concurrency_level: usize,
		weigher: Box<dyn Weigher<V>>,
		listener: Option<Arc<dyn EvictionListener<K, V>>>,
		touch_on_update: bool,
	) -> Self {
		let buffers = Buffers::new(concurrency_level, BUFFER_CAPACITY);
		let store = EntryStore::new(buffers.len() * 4, initial_capacity);
		Self {
			store,
			buffers,
			gate: Mutex::new(EvictionPolicy::new(initial_capacity, touch_on_update)),
			weighted_size: AtomicU64::new(0),
			capacity: AtomicU64::new(capacity),
			relay: NotificationRelay::new(listener),
			weigher,
			counters: Counters::default(),
		}
	}

	/// Retrieve a value, marking it as recently used.
	///
	/// # Runtime Complexity
	///
	/// O(1). Never blocks on the eviction lock.
	pub fn get(&self, key: &K) -> Option<Arc<V>> {
		let Some((node, value)) = self.lookup(key) else {
			Counters::bump(&self.counters.misses);
			return None;
		};
		Counters::bump(&self.counters.hits);
		self.record_read(node);
		Some(value)
	}

	/// Retrieve a cloned value, marking it as recently used.
	pub fn get_clone(&self, key: &K) -> Option<V>
	where
		V: Clone,
	{
		self.get(key).map(|value| (*value).clone())
	}

	/// Retrieve a value without affecting its recency or the hit counters.
	pub fn get_quietly(&self, key: &K) -> Option<Arc<V>> {
		self.lookup(key).map(|(_, value)| value)
	}

	/// Check whether a live entry exists, without affecting its recency.
	pub fn contains_key(&self, key: &K) -> bool {
		self.lookup(key).is_some()
	}

	/// Insert or replace a value.
	///
	/// Returns the previous value if the key was present.
	pub fn put(&self, key: K, value: V) -> Option<Arc<V>> {
		let fresh = self.weighted(value);
		loop {
			if let Some(resident) = self.store.get(&key) {
				if let Some(previous) = resident.replace(&fresh) {
					Counters::bump(&self.counters.updates);
					self.record_write(Event::Update(resident));
					return Some(previous.value.clone());
				}
				if self.supersede(&key, &resident, &fresh) {
					return None;
				}
				continue;
			}
			if self.insert(&key, &fresh) {
				return None;
			}
		}
	}

	/// Insert a value only if the key has no live entry.
	///
	/// Returns the resident value, marking it as recently used, if there was
	/// one. Returns `None` if `value` was inserted.
	pub fn put_if_absent(&self, key: K, value: V) -> Option<Arc<V>> {
		let fresh = self.weighted(value);
		loop {
			if let Some(resident) = self.store.get(&key) {
				if let Some(current) = resident.value() {
					self.record_read(resident);
					return Some(current);
				}
				if self.supersede(&key, &resident, &fresh) {
					return None;
				}
				continue;
			}
			if self.insert(&key, &fresh) {
				return None;
			}
		}
	}

	/// Remove an entry, returning its value if it was present.
	///
	/// Explicit removals are not reported to the eviction listener.
	pub fn remove(&self, key: &K) -> Option<Arc<V>> {
		let node = self.store.remove(key)?;
		let last = node.retire()?;
		Counters::bump(&self.counters.removals);
		self.record_write(Event::Remove(node));
		Some(last.value.clone())
	}

	/// Remove an entry only if its current value equals `expected`.
	pub fn remove_if(&self, key: &K, expected: &V) -> bool
	where
		V: PartialEq,
	{
		let Some(node) = self.store.get(key) else {
			return false;
		};
		if node.retire_when(|current| current == expected).is_err() {
			return false;
		}
		self.store.remove_if_match(key, &node);
		Counters::bump(&self.counters.removals);
		self.record_write(Event::Remove(node));
		true
	}

	/// Replace the value of a live entry. Does nothing if the key is absent.
	///
	/// Returns the previous value on success.
	pub fn replace(&self, key: K, value: V) -> Option<Arc<V>> {
		let node = self.store.get(&key)?;
		let previous = node.replace(&self.weighted(value))?;
		Counters::bump(&self.counters.updates);
		self.record_write(Event::Update(node));
		Some(previous.value.clone())
	}

	/// Replace the value of a live entry only if it currently equals `expected`.
	pub fn replace_if(&self, key: &K, expected: &V, value: V) -> bool
	where
		V: PartialEq,
	{
		let Some(node) = self.store.get(key) else {
			return false;
		};
		if node.replace_when(&self.weighted(value), |current| current == expected).is_err() {
			return false;
		}
		Counters::bump(&self.counters.updates);
		self.record_write(Event::Update(node));
		true
	}

	/// Number of entries in the store, including ones whose removal is in flight.
	pub fn len(&self) -> usize {
		self.store.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Total weight of resident entries as of the last drain.
	pub fn weighted_size(&self) -> u64 {
		self.weighted_size.load(Ordering::Acquire)
	}

	/// Maximum weighted size.
	pub fn capacity(&self) -> u64 {
		self.capacity.load(Ordering::Acquire)
	}

	/// Change the maximum weighted size, evicting immediately if the cache is
	/// now over it.
	///
	/// Blocks on the eviction lock. Returns [`CacheError::InvalidCapacity`] for 0.
	pub fn set_capacity(&self, capacity: u64) -> Result<(), CacheError> {
		if capacity == 0 {
			return Err(CacheError::InvalidCapacity);
		}
		let policy = self.gate.lock();
		let previous = self.capacity.swap(capacity, Ordering::AcqRel);
		debug!(previous, capacity, "cache capacity changed");
		self.drain(policy);
		Ok(())
	}

	/// Remove every entry without notifying the eviction listener.
	///
	/// Blocks on the eviction lock. Entries written concurrently may survive.
	pub fn clear(&self) {
		let mut policy = self.gate.lock();
		self.buffers.drain(|event| policy.apply(event));
		let mut cleared = policy.clear(&self.store);
		// Nodes whose ADD is still being recorded by another thread.
		for node in self.store.nodes() {
			if node.retire().is_some() {
				cleared += 1;
			}
			self.store.remove_if_match(&node.key, &node);
		}
		self.weighted_size.store(policy.weighted_size(), Ordering::Release);
		drop(policy);

		debug!(cleared, "cache cleared");
		self.relay.deliver();
	}

	/// Run a full drain now, blocking on the eviction lock if needed.
	///
	/// Once this returns with no concurrent activity, every buffered event has
	/// been replayed, the weighted size is within capacity and every eviction
	/// notification has been delivered.
	pub fn clean_up(&self) {
		let policy = self.gate.lock();
		self.drain(policy);
	}

	/// Get current cache metrics.
	pub fn metrics(&self) -> CacheMetrics {
		CacheMetrics {
			listener_failures: self.relay.failures(),
			weighted_size: self.weighted_size(),
			capacity: self.capacity(),
			entry_count: self.len(),
			..self.counters.snapshot()
		}
	}

	/// Validate the cache's internal consistency.
	///
	/// Meaningful only at rest: after [`clean_up`](Cache::clean_up) with no
	/// concurrent operations. Checks that the eviction lock is free, every
	/// buffer is empty and idle, no notification is pending, the deque is well
	/// formed and matches the entry store one-to-one, every linked weight equals
	/// the weigher's result for the node's value, and the weighted size is within
	/// capacity.
	pub fn check_invariants(&self) -> Result<(), CacheError> {
		let Some(policy) = self.gate.try_lock() else {
			return Err(CacheError::invariant("eviction lock is held"));
		};

		let pending = self.buffers.pending();
		if pending != 0 {
			return Err(CacheError::invariant(format!("{pending} buffered events were not replayed")));
		}
		if let Some(status) = self.buffers.statuses().find(|status| *status != DrainStatus::Idle) {
			return Err(CacheError::invariant(format!("buffer left in {status:?}")));
		}
		if !self.relay.is_empty() {
			return Err(CacheError::invariant("eviction notifications are pending"));
		}

		policy.deque.validate()?;
		if policy.deque.len() != self.store.len() {
			return Err(CacheError::invariant(format!(
				"deque holds {} nodes but the store maps {}",
				policy.deque.len(),
				self.store.len()
			)));
		}

		for (node, weight) in policy.deque.iter() {
			let Some(current) = node.weighted_value() else {
				return Err(CacheError::invariant(format!("retired node linked at slot {}", node.slot())));
			};
			if current.weight != weight || self.weigher.weigh(&current.value) != weight {
				return Err(CacheError::invariant(format!(
					"slot {} links weight {weight} for a value of weight {}",
					node.slot(),
					current.weight
				)));
			}
			match self.store.get(&node.key) {
				Some(mapped) if Arc::ptr_eq(&mapped, node) => {}
				_ => {
					return Err(CacheError::invariant(format!("node at slot {} is not mapped", node.slot())));
				}
			}
		}

		let weighted_size = self.weighted_size();
		if weighted_size != policy.weighted_size() {
			return Err(CacheError::invariant(format!(
				"published weighted size {weighted_size} != deque weighted size {}",
				policy.weighted_size()
			)));
		}
		let capacity = self.capacity();
		if weighted_size > capacity {
			return Err(CacheError::invariant(format!("weighted size {weighted_size} exceeds capacity {capacity}")));
		}
		Ok(())
	}

	fn weighted(&self, value: V) -> Arc<WeightedValue<V>> {
		let weight = self.weigher.weigh(&value);
		Arc::new(WeightedValue::new(value, weight))
	}

	/// The live node and value for `key`.
	fn lookup(&self, key: &K) -> Option<(Arc<Node<K, V>>, Arc<V>)> {
		let node = self.store.get(key)?;
		let value = node.value()?;
		Some((node, value))
	}

	/// Inserts a new node for an unmapped key. False if the key was mapped first.
	fn insert(&self, key: &K, fresh: &Arc<WeightedValue<V>>) -> bool {
		let node = Arc::new(Node::new(key.clone(), fresh.clone()));
		if self.store.insert_if_absent(key.clone(), node.clone()).is_some() {
			return false;
		}
		Counters::bump(&self.counters.inserts);
		self.record_write(Event::Add(node));
		true
	}

	/// Swaps a retired node that is still mapped for a new one.
	///
	/// Whoever retired it removes the mapping eventually; writers do it for
	/// them rather than wait.
	fn supersede(&self, key: &K, retired: &Arc<Node<K, V>>, fresh: &Arc<WeightedValue<V>>) -> bool {
		let node = Arc::new(Node::new(key.clone(), fresh.clone()));
		if !self.store.replace_if_match(key, retired, node.clone()) {
			return false;
		}
		Counters::bump(&self.counters.inserts);
		self.record_write(Event::Add(node));
		true
	}

	fn record_read(&self, node: Arc<Node<K, V>>) {
		let stripe = self.buffers.stripe();
		if self.buffers.record(stripe, Event::Read(node)).is_err() {
			Counters::bump(&self.counters.dropped_reads);
			trace!(stripe, "read buffer full, recency event dropped");
		}
	}

	/// Records a write event, draining first if its buffer is full, then makes
	/// an opportunistic drain attempt.
	fn record_write(&self, event: Event<K, V>) {
		let stripe = self.buffers.stripe();
		let mut event = event;
		while let Err(rejected) = self.buffers.record(stripe, event) {
			event = rejected;
			self.force_drain();
		}
		if self.buffers.is_drain_required()
			&& let Some(policy) = self.gate.try_lock()
		{
			self.drain(policy);
		}
	}

	/// Drains on behalf of a writer whose buffer is full. Spins on the lock for
	/// a bounded number of attempts, then waits for the current drain to finish.
	fn force_drain(&self) {
		for _ in 0..FORCED_DRAIN_SPINS {
			if let Some(policy) = self.gate.try_lock() {
				self.drain(policy);
				return;
			}
			std::hint::spin_loop();
		}
		let policy = self.gate.lock();
		self.drain(policy);
	}

	/// Runs a drain under `policy`, releases the lock, then delivers
	/// notifications.
	fn drain(&self, mut policy: MutexGuard<'_, EvictionPolicy<K, V>>) {
		let capacity = self.capacity();
		let outcome = policy.run(&self.buffers, capacity, &self.store, &self.relay);
		let weighted_size = policy.weighted_size();
		self.weighted_size.store(weighted_size, Ordering::Release);
		drop(policy);

		if outcome.replayed > 0 || outcome.evicted > 0 {
			trace!(
				replayed = outcome.replayed,
				evicted = outcome.evicted,
				weighted_size,
				capacity,
				"drained event buffers"
			);
			Counters::bump(&self.counters.drains);
			Counters::add(&self.counters.evictions, outcome.evicted as u64);
		}

		self.relay.deliver();
	}
}

impl<K, V> fmt::Debug for Cache<K, V>
where
	K: Hash + Eq + Clone,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Cache")
			.field("len", &self.store.len())
			.field("weighted_size", &self.weighted_size.load(Ordering::Relaxed))
			.field("capacity", &self.capacity.load(Ordering::Relaxed))
			.field("buffers", &self.buffers.len())
			.finish()
	}
}
