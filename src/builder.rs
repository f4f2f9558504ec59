use std::hash::Hash;
use std::sync::Arc;

use tracing::debug;

use crate::buffer::MAXIMUM_BUFFERS;
use crate::cache::Cache;
use crate::error::CacheError;
use crate::traits::{EvictionListener, UnitWeigher, Weigher};

const DEFAULT_INITIAL_CAPACITY: usize = 16;
const DEFAULT_CONCURRENCY_LEVEL: usize = 16;

/// Builder for configuring a Cache.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use linked_lru::CacheBuilder;
///
/// let cache = CacheBuilder::<u64, String>::new(64 * 1024)
/// 	.initial_capacity(1024)
/// 	.concurrency_level(8)
/// 	.weigher(|value: &String| value.len() as u32)
/// 	.listener(|key: u64, value: Arc<String>| println!("evicted {key} ({} bytes)", value.len()))
/// 	.build()
/// 	.expect("valid configuration");
///
/// cache.put(1, "hello".to_string());
/// ```
pub struct CacheBuilder<K, V> {
	capacity: u64,
	initial_capacity: usize,
	concurrency_level: usize,
	weigher: Box<dyn Weigher<V>>,
	listener: Option<Arc<dyn EvictionListener<K, V>>>,
	touch_on_update: bool,
}

impl<K, V> CacheBuilder<K, V>
where
	K: Hash + Eq + Clone + Send + Sync + 'static,
	V: Send + Sync + 'static,
{
	/// Create a new builder with the given maximum weighted capacity.
	pub fn new(capacity: u64) -> Self {
		Self {
			capacity,
			initial_capacity: DEFAULT_INITIAL_CAPACITY,
			concurrency_level: DEFAULT_CONCURRENCY_LEVEL,
			weigher: Box::new(UnitWeigher),
			listener: None,
			touch_on_update: true,
		}
	}

	/// Set the maximum weighted capacity. Must be greater than zero.
	pub fn maximum_weighted_capacity(mut self, capacity: u64) -> Self {
		self.capacity = capacity;
		self
	}

	/// Size the entry store for this many entries up front.
	///
	/// Default: 16
	pub fn initial_capacity(mut self, capacity: usize) -> Self {
		self.initial_capacity = capacity;
		self
	}

	/// Set the expected number of concurrently writing threads.
	///
	/// Determines the number of event buffers, rounded up to a power of 2 and
	/// capped at 64. The entry store gets four shards per buffer.
	///
	/// Default: 16
	pub fn concurrency_level(mut self, level: usize) -> Self {
		self.concurrency_level = level;
		self
	}

	/// Set the function that computes each value's weight.
	///
	/// Default: every value weighs 1
	pub fn weigher(mut self, weigher: impl Weigher<V>) -> Self {
		self.weigher = Box::new(weigher);
		self
	}

	/// Register a listener for entries evicted to stay within capacity.
	pub fn listener(mut self, listener: impl EvictionListener<K, V>) -> Self {
		self.listener = Some(Arc::new(listener));
		self
	}

	/// Whether replacing a value also marks the entry as recently used.
	///
	/// Default: true
	pub fn touch_on_update(mut self, touch: bool) -> Self {
		self.touch_on_update = touch;
		self
	}

	/// Build the cache with the configured settings.
	pub fn build(self) -> Result<Cache<K, V>, CacheError> {
		if self.capacity == 0 {
			return Err(CacheError::InvalidCapacity);
		}
		let concurrency_level = self.concurrency_level.clamp(1, MAXIMUM_BUFFERS).next_power_of_two();

		debug!(
			capacity = self.capacity,
			initial_capacity = self.initial_capacity,
			concurrency_level,
			listener = self.listener.is_some(),
			touch_on_update = self.touch_on_update,
			"building cache"
		);
		Ok(Cache::from_parts(
			self.capacity,
			self.initial_capacity,
			concurrency_level,
			self.weigher,
			self.listener,
			self.touch_on_update,
		))
	}
}
