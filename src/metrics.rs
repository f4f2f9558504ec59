//! Cache performance metrics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time counters for a cache.
///
/// Counters are updated with relaxed atomics, so a snapshot taken while other
/// threads are operating is approximate.
///
/// # Example
///
/// ```
/// use linked_lru::CacheBuilder;
///
/// let cache = CacheBuilder::<u64, u64>::new(100).build().expect("valid configuration");
/// cache.put(1, 10);
/// cache.get(&1);
/// cache.get(&2);
///
/// let metrics = cache.metrics();
/// assert_eq!(metrics.hits, 1);
/// assert_eq!(metrics.misses, 1);
/// assert_eq!(metrics.hit_rate(), 0.5);
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheMetrics {
	/// Lookups that found a live entry.
	pub hits: u64,
	/// Lookups that found nothing.
	pub misses: u64,
	/// New keys written.
	pub inserts: u64,
	/// Values replaced under an existing key.
	pub updates: u64,
	/// Entries removed by an explicit removal.
	pub removals: u64,
	/// Entries evicted to restore the capacity bound.
	pub evictions: u64,
	/// Recency events discarded because their buffer was full.
	pub dropped_reads: u64,
	/// Drains that replayed or evicted at least one entry.
	pub drains: u64,
	/// Eviction listener invocations that panicked.
	pub listener_failures: u64,
	/// Weighted size at the last drain.
	pub weighted_size: u64,
	/// Maximum weighted capacity.
	pub capacity: u64,
	/// Resident entries.
	pub entry_count: usize,
}

impl CacheMetrics {
	/// Ratio of hits to lookups, or 0.0 before the first lookup.
	pub fn hit_rate(&self) -> f64 {
		let total = self.total_accesses();
		if total == 0 {
			0.0
		} else {
			self.hits as f64 / total as f64
		}
	}

	/// Fraction of the weighted capacity in use.
	pub fn utilization(&self) -> f64 {
		if self.capacity == 0 {
			0.0
		} else {
			self.weighted_size as f64 / self.capacity as f64
		}
	}

	pub fn total_accesses(&self) -> u64 {
		self.hits + self.misses
	}

	pub fn total_writes(&self) -> u64 {
		self.inserts + self.updates
	}
}

/// Live counters owned by the cache.
#[derive(Debug, Default)]
pub(crate) struct Counters {
	pub hits: AtomicU64,
	pub misses: AtomicU64,
	pub inserts: AtomicU64,
	pub updates: AtomicU64,
	pub removals: AtomicU64,
	pub evictions: AtomicU64,
	pub dropped_reads: AtomicU64,
	pub drains: AtomicU64,
}

impl Counters {
	#[inline]
	pub fn bump(counter: &AtomicU64) {
		counter.fetch_add(1, Ordering::Relaxed);
	}

	#[inline]
	pub fn add(counter: &AtomicU64, n: u64) {
		counter.fetch_add(n, Ordering::Relaxed);
	}

	/// Snapshot of the counters. Size fields are filled in by the caller.
	pub fn snapshot(&self) -> CacheMetrics {
		CacheMetrics {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			inserts: self.inserts.load(Ordering::Relaxed),
			updates: self.updates.load(Ordering::Relaxed),
			removals: self.removals.load(Ordering::Relaxed),
			evictions: self.evictions.load(Ordering::Relaxed),
			dropped_reads: self.dropped_reads.load(Ordering::Relaxed),
			drains: self.drains.load(Ordering::Relaxed),
			..CacheMetrics::default()
		}
	}
}
