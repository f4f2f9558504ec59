//! Error types for the cache.

use thiserror::Error;

/// Errors surfaced by cache construction, reconfiguration and validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
	/// The maximum weighted capacity must be at least 1.
	#[error("maximum weighted capacity must be greater than zero")]
	InvalidCapacity,

	/// An eviction listener panicked while handling a notification.
	///
	/// This is reported through `tracing` and never returned to the caller whose
	/// operation triggered the eviction.
	#[error("eviction listener panicked: {message}")]
	ListenerPanicked {
		/// The panic payload, if it was a string.
		message: String,
	},

	/// An internal invariant did not hold when the cache was validated.
	#[error("invariant violated: {0}")]
	Invariant(String),
}

impl CacheError {
	pub(crate) fn invariant(msg: impl Into<String>) -> Self {
		Self::Invariant(msg.into())
	}
}
