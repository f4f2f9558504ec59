//! # Linked LRU
//!
//! A concurrent, in-memory cache with:
//! - **Weighted capacity** (a pluggable weigher decides what an entry costs)
//! - **Least-recently-used eviction** over a single recency-ordered deque
//! - **Amortized locking**: reads never take the eviction lock and writes only
//!   try it, with recency and write events replayed in batches
//! - **Eviction notifications** delivered outside of every internal lock
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use linked_lru::CacheBuilder;
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct UserProfile {
//! 	name: String,
//! 	email: String,
//! }
//!
//! // Bound the cache by approximate payload size.
//! let cache = CacheBuilder::<u64, UserProfile>::new(1024 * 1024)
//! 	.weigher(|profile: &UserProfile| (profile.name.len() + profile.email.len()) as u32)
//! 	.listener(|id: u64, _profile: Arc<UserProfile>| println!("evicted user {id}"))
//! 	.build()
//! 	.expect("valid configuration");
//!
//! cache.put(
//! 	1,
//! 	UserProfile {
//! 		name: "Alice".to_string(),
//! 		email: "alice@example.com".to_string(),
//! 	},
//! );
//!
//! // Values come back as `Arc` for cheap sharing.
//! if let Some(profile) = cache.get(&1) {
//! 	println!("User: {}", profile.name);
//! }
//! ```
//!
//! ## Consistency
//!
//! Lookups and writes are linearizable with respect to the key-value mapping.
//! The recency order and [`Cache::weighted_size`] are maintained lazily: they
//! reflect every operation once a drain has replayed its event, which happens
//! on most writes and unconditionally in [`Cache::clean_up`]. Under heavy read
//! load some recency events are dropped, so eviction order is approximately
//! LRU while the capacity bound is exact at rest.
//!
//! ## Async Usage
//!
//! The cache never holds a lock when it returns, so it is safe to use from
//! async tasks. Returned `Arc<V>` values may be held across await points:
//!
//! ```rust,ignore
//! async fn render(cache: Arc<Cache<u64, Page>>, id: u64) {
//! 	if let Some(page) = cache.get(&id) {
//! 		send_to_client(&page).await;
//! 	}
//! }
//! ```
//!
//! ## Thread Safety
//!
//! The cache is `Send + Sync` and can be shared across threads via `Arc`:
//!
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//!
//! use linked_lru::Cache;
//!
//! let cache = Arc::new(Cache::<u64, u64>::new(1024).expect("valid capacity"));
//!
//! let handles: Vec<_> = (0..4)
//! 	.map(|i| {
//! 		let cache = cache.clone();
//! 		thread::spawn(move || {
//! 			cache.put(i, i * 10);
//! 		})
//! 	})
//! 	.collect();
//!
//! for handle in handles {
//! 	handle.join().unwrap();
//! }
//! assert_eq!(cache.len(), 4);
//! ```

mod buffer;
mod builder;
mod cache;
mod deque;
mod drain;
mod error;
mod metrics;
mod node;
mod notify;
mod shard;
mod traits;

pub use builder::CacheBuilder;
pub use cache::Cache;
pub use error::CacheError;
pub use metrics::CacheMetrics;
pub use traits::{EvictionListener, UnitWeigher, Weigher};
