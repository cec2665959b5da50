// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Last known lease-holder per range.
//!
//! Purely a routing hint: a stale entry costs one extra replica hop, never
//! correctness.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use rangedb_core::descriptor::{RangeId, ReplicaDescriptor};
use tracing::trace;

pub struct LeaseHolderCache {
	entries: Mutex<LruCache<RangeId, ReplicaDescriptor>>,
}

impl LeaseHolderCache {
	pub fn new(capacity: usize) -> Self {
		let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
		LeaseHolderCache {
			entries: Mutex::new(LruCache::new(capacity)),
		}
	}

	pub fn lookup(&self, range_id: RangeId) -> Option<ReplicaDescriptor> {
		self.entries.lock().get(&range_id).copied()
	}

	pub fn update(&self, range_id: RangeId, replica: ReplicaDescriptor) {
		trace!(%range_id, %replica, "updating lease holder hint");
		self.entries.lock().put(range_id, replica);
	}

	pub fn invalidate(&self, range_id: RangeId) {
		self.entries.lock().pop(&range_id);
	}
}

#[cfg(test)]
mod tests {
	use rangedb_core::descriptor::{NodeId, ReplicaId, StoreId};

	use super::*;

	fn replica(n: u64) -> ReplicaDescriptor {
		ReplicaDescriptor {
			node_id: NodeId(n),
			store_id: StoreId(n),
			replica_id: ReplicaId(n),
		}
	}

	#[test]
	fn test_update_and_lookup() {
		let cache = LeaseHolderCache::new(4);
		assert_eq!(cache.lookup(RangeId(1)), None);
		cache.update(RangeId(1), replica(2));
		assert_eq!(cache.lookup(RangeId(1)), Some(replica(2)));
		cache.update(RangeId(1), replica(3));
		assert_eq!(cache.lookup(RangeId(1)), Some(replica(3)));
	}

	#[test]
	fn test_invalidate() {
		let cache = LeaseHolderCache::new(4);
		cache.update(RangeId(1), replica(2));
		cache.invalidate(RangeId(1));
		assert_eq!(cache.lookup(RangeId(1)), None);
	}

	#[test]
	fn test_lru_discipline() {
		let cache = LeaseHolderCache::new(2);
		cache.update(RangeId(1), replica(1));
		cache.update(RangeId(2), replica(2));
		// Touch r1 so r2 becomes the eviction candidate.
		cache.lookup(RangeId(1));
		cache.update(RangeId(3), replica(3));
		assert_eq!(cache.lookup(RangeId(1)), Some(replica(1)));
		assert_eq!(cache.lookup(RangeId(2)), None);
		assert_eq!(cache.lookup(RangeId(3)), Some(replica(3)));
	}
}
