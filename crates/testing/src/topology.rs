// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Programmable cluster topology serving descriptor lookups.

use std::{
	collections::BTreeMap,
	sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use rangedb_core::{
	Error, Key, KeySpan, Result,
	descriptor::{NodeDescriptor, RangeDescriptor, RangeId, ReplicaDescriptor, ReplicaId, StoreId},
	key::user_key,
};
use rangedb_router::cache::{RangeDescriptorDB, RangeLookupResult};

/// A replica on node `n`, store `n`, with replica id `n`.
pub fn replica(n: u64) -> ReplicaDescriptor {
	ReplicaDescriptor {
		node_id: n.into(),
		store_id: StoreId(n),
		replica_id: ReplicaId(n),
	}
}

pub fn node(n: u64) -> NodeDescriptor {
	NodeDescriptor::new(n, format!("node-{n}:26257"))
}

pub fn range_desc(range_id: u64, start: &str, end: &str, replicas: &[u64]) -> RangeDescriptor {
	RangeDescriptor::new(range_id, KeySpan::new(start, end), replicas.iter().map(|n| replica(*n)).collect())
}

/// The authoritative range topology of a mock cluster. Implements
/// [`RangeDescriptorDB`] so tests can plug it straight into the descriptor
/// cache, bypassing the meta-batch wire path.
#[derive(Default)]
pub struct MockRangeDb {
	ranges: Mutex<BTreeMap<Key, RangeDescriptor>>,
	lookups: AtomicU64,
}

impl MockRangeDb {
	pub fn new() -> Self {
		MockRangeDb::default()
	}

	/// Replaces the whole topology.
	pub fn set_ranges(&self, descs: Vec<RangeDescriptor>) {
		let mut ranges = self.ranges.lock();
		ranges.clear();
		for desc in descs {
			ranges.insert(desc.span.end.clone(), desc);
		}
	}

	pub fn insert_range(&self, desc: RangeDescriptor) {
		self.ranges.lock().insert(desc.span.end.clone(), desc);
	}

	pub fn range_by_id(&self, range_id: RangeId) -> Option<RangeDescriptor> {
		self.ranges.lock().values().find(|d| d.range_id == range_id).cloned()
	}

	/// The range owning `key`: containing it, or under `inverted`
	/// addressing, ending at or beyond it.
	pub fn range_for_key(&self, key: &Key, inverted: bool) -> Option<RangeDescriptor> {
		let ranges = self.ranges.lock();
		ranges.values()
			.find(|d| {
				if inverted {
					d.contains_key_inverted(key)
				} else {
					d.contains_key(key)
				}
			})
			.cloned()
	}

	pub fn lookup_count(&self) -> u64 {
		self.lookups.load(Ordering::SeqCst)
	}

	/// Resolves `key` against the topology: the owning range plus up to
	/// `max_ranges - 1` prefetched neighbors in the direction of travel.
	pub fn lookup_sync(&self, key: &Key, max_ranges: usize, reverse: bool) -> RangeLookupResult {
		let ranges = self.ranges.lock();
		if reverse {
			let mut preceding: Vec<RangeDescriptor> = ranges
				.values()
				.filter(|d| d.contains_key_inverted(key) || d.span.end < *key)
				.cloned()
				.collect();
			preceding.reverse();
			let mut iter = preceding.into_iter();
			let Some(owner) = iter.next() else {
				return RangeLookupResult::default();
			};
			RangeLookupResult {
				ranges: vec![owner],
				prefetched: iter.take(max_ranges.saturating_sub(1)).collect(),
			}
		} else {
			let mut iter =
				ranges.values().filter(|d| d.contains_key(key) || d.span.start > *key).cloned();
			let Some(owner) = iter.next() else {
				return RangeLookupResult::default();
			};
			RangeLookupResult {
				ranges: vec![owner],
				prefetched: iter.take(max_ranges.saturating_sub(1)).collect(),
			}
		}
	}
}

#[async_trait]
impl RangeDescriptorDB for MockRangeDb {
	async fn first_range(&self) -> Result<RangeDescriptor> {
		self.ranges.lock().values().next().cloned().ok_or(Error::FirstRangeUnavailable)
	}

	async fn range_lookup(&self, meta_key: &Key, max_ranges: usize, reverse: bool) -> Result<RangeLookupResult> {
		self.lookups.fetch_add(1, Ordering::SeqCst);
		Ok(self.lookup_sync(&user_key(meta_key), max_ranges, reverse))
	}
}
