use std::sync::Arc;

/// Computes the weight a value contributes toward the cache's capacity.
///
/// Weights are unsigned, so a negative weight cannot be expressed. A weight of
/// zero is legal and means the entry consumes no capacity. Implementations must
/// be pure: the same value must always produce the same weight, since the
/// cache re-reads weights when reconciling its accounting.
///
/// Closures of the form `Fn(&V) -> u32` implement this trait directly.
///
/// # Example
///
/// ```
/// use linked_lru::CacheBuilder;
///
/// // Bound the cache by total payload length instead of entry count.
/// let cache = CacheBuilder::<u64, Vec<u8>>::new(1024)
/// 	.weigher(|value: &Vec<u8>| value.len() as u32)
/// 	.build()
/// 	.expect("valid configuration");
///
/// cache.put(1, vec![0u8; 100]);
/// assert_eq!(cache.weighted_size(), 100);
/// ```
pub trait Weigher<V>: Send + Sync + 'static {
	/// Returns the weight of `value`.
	fn weigh(&self, value: &V) -> u32;
}

/// Every value weighs exactly one unit, so capacity is an entry count.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitWeigher;

impl<V> Weigher<V> for UnitWeigher {
	#[inline]
	fn weigh(&self, _value: &V) -> u32 {
		1
	}
}

impl<V, F> Weigher<V> for F
where
	F: Fn(&V) -> u32 + Send + Sync + 'static,
{
	#[inline]
	fn weigh(&self, value: &V) -> u32 {
		self(value)
	}
}

/// Receives entries evicted because the cache exceeded its capacity.
///
/// Notifications are delivered after the eviction lock has been released, so a
/// listener may safely call back into the cache. A panicking listener is
/// isolated: the panic is logged and delivery continues with the next entry.
///
/// Explicit removals (`remove`, `remove_if`, `clear`) are not reported.
pub trait EvictionListener<K, V>: Send + Sync + 'static {
	/// Called once for every evicted entry, in the order the entries left the
	/// eviction deque.
	fn on_eviction(&self, key: K, value: Arc<V>);
}

impl<K, V, F> EvictionListener<K, V> for F
where
	F: Fn(K, Arc<V>) + Send + Sync + 'static,
{
	#[inline]
	fn on_eviction(&self, key: K, value: Arc<V>) {
		self(key, value)
	}
}
