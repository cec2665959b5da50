// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Cache of range descriptors keyed by span end key.
//!
//! The cache answers "which range owns this key" without a meta-index round
//! trip. Entries carry a generation; an [`EvictionToken`] invalidates exactly
//! the descriptor it was issued for, so a racing re-insert of fresher state is
//! never clobbered by a late eviction. Lookups for the same key coalesce into
//! one backing lookup; the first range is answered from gossip, never from the
//! backing store.

use std::{
	collections::{BTreeMap, HashMap},
	ops::Bound,
	sync::Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use rangedb_core::{
	Error, Key, Result,
	descriptor::RangeDescriptor,
	key::{is_meta_key, range_meta_key},
};
use tokio::sync::watch;
use tracing::{instrument, trace, warn};

/// One page of a meta-index scan: the matching descriptors plus any extra
/// descriptors the scan read ahead.
#[derive(Clone, Debug, Default)]
pub struct RangeLookupResult {
	pub ranges: Vec<RangeDescriptor>,
	pub prefetched: Vec<RangeDescriptor>,
}

/// Backing store for descriptor lookups. Reads of the meta index are
/// inconsistent: stale descriptors are expected and corrected by eviction.
#[async_trait]
pub trait RangeDescriptorDB: Send + Sync {
	/// The descriptor of the first range.
	async fn first_range(&self) -> Result<RangeDescriptor>;

	/// Scans the meta index from `meta_key` for up to `max_ranges`
	/// descriptors, in reverse when addressing a reverse scan.
	async fn range_lookup(&self, meta_key: &Key, max_ranges: usize, reverse: bool) -> Result<RangeLookupResult>;
}

struct CacheEntry {
	desc: Arc<RangeDescriptor>,
	generation: u64,
	last_used: u64,
}

type LookupOutcome = std::result::Result<(), Error>;

#[derive(Default)]
struct CacheState {
	/// Entries keyed by descriptor span end; spans are disjoint.
	by_end: BTreeMap<Key, CacheEntry>,
	/// One inflight backing lookup per meta key; followers watch for the
	/// leader's outcome.
	inflight: HashMap<Key, watch::Receiver<Option<LookupOutcome>>>,
	next_generation: u64,
	use_counter: u64,
}

struct CacheInner {
	db: Arc<dyn RangeDescriptorDB>,
	capacity: usize,
	max_lookup_ranges: usize,
	state: Mutex<CacheState>,
}

/// Shared handle to the descriptor cache. Cheap to clone.
#[derive(Clone)]
pub struct RangeDescriptorCache {
	inner: Arc<CacheInner>,
}

/// Invalidates exactly the descriptor instance a lookup returned.
///
/// A token holds the (end key, generation) slot of its descriptor; eviction
/// succeeds only while the cached entry still carries that generation.
#[derive(Clone)]
pub struct EvictionToken {
	inner: Arc<CacheInner>,
	desc: Arc<RangeDescriptor>,
	slot: Option<(Key, u64)>,
}

impl EvictionToken {
	pub fn descriptor(&self) -> &Arc<RangeDescriptor> {
		&self.desc
	}

	/// Removes the referenced descriptor from the cache if still present.
	pub fn evict(&self) {
		let mut state = self.inner.state.lock();
		self.evict_locked(&mut state);
	}

	/// Atomically removes the referenced descriptor and inserts each
	/// replacement.
	pub fn evict_and_replace(&self, replacements: Vec<RangeDescriptor>) {
		let mut state = self.inner.state.lock();
		self.evict_locked(&mut state);
		for desc in replacements {
			trace!(desc = %desc, "inserting replacement descriptor");
			self.inner.insert_locked(&mut state, desc);
		}
	}

	fn evict_locked(&self, state: &mut CacheState) {
		let Some((end, generation)) = &self.slot else {
			return;
		};
		if let Some(entry) = state.by_end.get(end) {
			if entry.generation == *generation {
				trace!(desc = %self.desc, "evicting range descriptor");
				state.by_end.remove(end);
			}
		}
	}
}

impl RangeDescriptorCache {
	pub fn new(db: Arc<dyn RangeDescriptorDB>, capacity: usize, max_lookup_ranges: usize) -> Self {
		RangeDescriptorCache {
			inner: Arc::new(CacheInner {
				db,
				capacity: capacity.max(1),
				max_lookup_ranges: max_lookup_ranges.max(1),
				state: Mutex::new(CacheState::default()),
			}),
		}
	}

	/// Resolves the descriptor owning `key`: the range containing `key`,
	/// or with `reverse`, the range whose span ends at `key`.
	///
	/// `prev` is the token of a descriptor the caller just evicted; a
	/// cache hit equal to it is treated as a miss so a retry loop never
	/// reuses the descriptor that just failed.
	#[instrument(name = "cache::range::lookup", level = "trace", skip(self, prev))]
	pub async fn lookup(
		&self,
		key: &Key,
		prev: Option<&EvictionToken>,
		reverse: bool,
	) -> Result<(Arc<RangeDescriptor>, EvictionToken)> {
		// The first range owns the meta index; its descriptor comes
		// straight from gossip and is never cached here.
		if is_meta_key(key) || key.is_min() {
			let desc = Arc::new(self.inner.db.first_range().await?);
			let token = EvictionToken {
				inner: Arc::clone(&self.inner),
				desc: Arc::clone(&desc),
				slot: None,
			};
			return Ok((desc, token));
		}

		let meta_key = range_meta_key(key);
		loop {
			enum Role {
				Leader(watch::Sender<Option<LookupOutcome>>),
				Follower(watch::Receiver<Option<LookupOutcome>>),
			}

			// The cache check and the single-flight decision share one
			// lock acquisition, so a finished leader cannot slip between
			// a miss and a redundant second backing lookup.
			let role = {
				let mut state = self.inner.state.lock();
				if let Some((desc, token)) = self.cached_locked(&mut state, key, reverse) {
					let just_evicted =
						prev.is_some_and(|p| p.descriptor().same_span(&desc));
					if !just_evicted {
						return Ok((desc, token));
					}
				}
				match state.inflight.get(&meta_key) {
					Some(rx) => Role::Follower(rx.clone()),
					None => {
						let (tx, rx) = watch::channel(None);
						state.inflight.insert(meta_key.clone(), rx);
						Role::Leader(tx)
					}
				}
			};

			match role {
				Role::Follower(mut rx) => {
					loop {
						if rx.borrow().is_some() {
							break;
						}
						if rx.changed().await.is_err() {
							break;
						}
					}
					let outcome = rx.borrow().clone();
					if let Some(Err(err)) = outcome {
						return Err(err);
					}
					// The leader populated the cache (or its
					// channel died); re-check from the top.
				}
				Role::Leader(tx) => {
					let result = self
						.inner
						.db
						.range_lookup(&meta_key, self.inner.max_lookup_ranges, reverse)
						.await;

					let outcome = match &result {
						Ok(_) => Ok(()),
						Err(err) => Err(err.clone()),
					};
					{
						let mut state = self.inner.state.lock();
						state.inflight.remove(&meta_key);
						if let Ok(lookup) = &result {
							let descs = lookup
								.ranges
								.iter()
								.chain(lookup.prefetched.iter())
								.take(self.inner.max_lookup_ranges);
							for desc in descs {
								self.inner.insert_locked(&mut state, desc.clone());
							}
						}
					}
					let _ = tx.send(Some(outcome));
					result?;

					// A descriptor freshly read from the meta
					// index is authoritative, even when it
					// equals the one just evicted.
					match self.cached(key, reverse) {
						Some(hit) => return Ok(hit),
						None => {
							warn!(%key, "range lookup returned no descriptor for key");
							return Err(Error::Internal(format!(
								"no range descriptor found for key {key}"
							)));
						}
					}
				}
			}
		}
	}

	/// Inserts `desc`, displacing any cached descriptor whose span
	/// overlaps it.
	pub fn insert(&self, desc: RangeDescriptor) {
		let mut state = self.inner.state.lock();
		self.inner.insert_locked(&mut state, desc);
	}

	/// Removes the cached descriptor containing `key`, if any. Wired to
	/// the gossip first-range callback with `Key::MIN`.
	pub fn evict_containing(&self, key: &Key) {
		let mut state = self.inner.state.lock();
		let end = state
			.by_end
			.range::<Key, _>((Bound::Excluded(key.clone()), Bound::Unbounded))
			.next()
			.map(|(end, _)| end.clone());
		if let Some(end) = end {
			if let Some(entry) = state.by_end.get(&end) {
				if entry.desc.contains_key(key) {
					state.by_end.remove(&end);
				}
			}
		}
	}

	pub fn len(&self) -> usize {
		self.inner.state.lock().by_end.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn cached(&self, key: &Key, reverse: bool) -> Option<(Arc<RangeDescriptor>, EvictionToken)> {
		let mut state = self.inner.state.lock();
		self.cached_locked(&mut state, key, reverse)
	}

	fn cached_locked(
		&self,
		state: &mut CacheState,
		key: &Key,
		reverse: bool,
	) -> Option<(Arc<RangeDescriptor>, EvictionToken)> {
		state.use_counter += 1;
		let stamp = state.use_counter;

		let bound = if reverse {
			Bound::Included(key.clone())
		} else {
			Bound::Excluded(key.clone())
		};
		let end = state.by_end.range::<Key, _>((bound, Bound::Unbounded)).next().map(|(end, _)| end.clone())?;
		let entry = state.by_end.get_mut(&end)?;

		let contains = if reverse {
			entry.desc.contains_key_inverted(key)
		} else {
			entry.desc.contains_key(key)
		};
		if !contains {
			return None;
		}
		entry.last_used = stamp;
		Some((
			Arc::clone(&entry.desc),
			EvictionToken {
				inner: Arc::clone(&self.inner),
				desc: Arc::clone(&entry.desc),
				slot: Some((end, entry.generation)),
			},
		))
	}
}

impl CacheInner {
	fn insert_locked(&self, state: &mut CacheState, desc: RangeDescriptor) {
		// Displace every entry overlapping the new span; stale pre-split
		// or pre-merge descriptors must not shadow it.
		let mut displaced = Vec::new();
		for (end, entry) in state.by_end.range::<Key, _>((Bound::Excluded(desc.span.start.clone()), Bound::Unbounded))
		{
			if entry.desc.span.start >= desc.span.end {
				break;
			}
			displaced.push(end.clone());
		}
		for end in displaced {
			state.by_end.remove(&end);
		}

		state.next_generation += 1;
		state.use_counter += 1;
		state.by_end.insert(
			desc.span.end.clone(),
			CacheEntry {
				desc: Arc::new(desc),
				generation: state.next_generation,
				last_used: state.use_counter,
			},
		);

		while state.by_end.len() > self.capacity {
			let coldest = state
				.by_end
				.iter()
				.min_by_key(|(_, entry)| entry.last_used)
				.map(|(end, _)| end.clone());
			match coldest {
				Some(end) => {
					state.by_end.remove(&end);
				}
				None => break,
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use rangedb_core::{
		KeySpan,
		descriptor::{NodeId, RangeId, ReplicaDescriptor, ReplicaId, StoreId},
		key::user_key,
	};

	use super::*;

	fn desc(range_id: u64, start: &str, end: &str) -> RangeDescriptor {
		RangeDescriptor::new(
			range_id,
			KeySpan::new(start, end),
			vec![ReplicaDescriptor {
				node_id: NodeId(1),
				store_id: StoreId(1),
				replica_id: ReplicaId(1),
			}],
		)
	}

	/// Serves descriptors from a fixed topology and counts lookups.
	struct FixedDb {
		first: RangeDescriptor,
		ranges: Vec<RangeDescriptor>,
		lookups: AtomicUsize,
	}

	impl FixedDb {
		fn new(first: RangeDescriptor, ranges: Vec<RangeDescriptor>) -> Arc<Self> {
			Arc::new(FixedDb {
				first,
				ranges,
				lookups: AtomicUsize::new(0),
			})
		}
	}

	#[async_trait]
	impl RangeDescriptorDB for FixedDb {
		async fn first_range(&self) -> Result<RangeDescriptor> {
			Ok(self.first.clone())
		}

		async fn range_lookup(
			&self,
			meta_key: &Key,
			max_ranges: usize,
			reverse: bool,
		) -> Result<RangeLookupResult> {
			self.lookups.fetch_add(1, Ordering::SeqCst);
			let key = user_key(meta_key);
			let owner = self.ranges.iter().position(|d| {
				if reverse {
					d.contains_key_inverted(&key)
				} else {
					d.contains_key(&key)
				}
			});
			let Some(idx) = owner else {
				return Ok(RangeLookupResult::default());
			};
			let prefetched = if reverse {
				self.ranges[..idx].iter().rev().take(max_ranges - 1).cloned().collect()
			} else {
				self.ranges[idx + 1..].iter().take(max_ranges - 1).cloned().collect()
			};
			Ok(RangeLookupResult {
				ranges: vec![self.ranges[idx].clone()],
				prefetched,
			})
		}
	}

	fn cache_over(ranges: Vec<RangeDescriptor>) -> (RangeDescriptorCache, Arc<FixedDb>) {
		let db = FixedDb::new(desc(1, "", "c"), ranges);
		let cache = RangeDescriptorCache::new(db.clone(), 1 << 10, 8);
		(cache, db)
	}

	#[tokio::test]
	async fn test_miss_then_hit() {
		let (cache, db) = cache_over(vec![desc(2, "c", "m"), desc(3, "m", "z")]);

		let (d, _) = cache.lookup(&Key::from("d"), None, false).await.unwrap();
		assert_eq!(d.range_id, RangeId(2));
		assert_eq!(db.lookups.load(Ordering::SeqCst), 1);

		// Second lookup is served from the cache.
		let (d, _) = cache.lookup(&Key::from("e"), None, false).await.unwrap();
		assert_eq!(d.range_id, RangeId(2));
		assert_eq!(db.lookups.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_prefetch_populates_later_ranges() {
		let (cache, db) = cache_over(vec![desc(2, "c", "m"), desc(3, "m", "z")]);

		cache.lookup(&Key::from("d"), None, false).await.unwrap();
		// r3 arrived as prefetch; no second backing lookup.
		let (d, _) = cache.lookup(&Key::from("q"), None, false).await.unwrap();
		assert_eq!(d.range_id, RangeId(3));
		assert_eq!(db.lookups.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_reverse_lookup_addresses_span_end() {
		let (cache, _) = cache_over(vec![desc(2, "c", "m"), desc(3, "m", "z")]);

		// Under reverse addressing "m" belongs to the range ending at "m".
		let (d, _) = cache.lookup(&Key::from("m"), None, true).await.unwrap();
		assert_eq!(d.range_id, RangeId(2));
	}

	#[tokio::test]
	async fn test_evict_removes_exact_descriptor() {
		let (cache, db) = cache_over(vec![desc(2, "c", "m"), desc(3, "m", "z")]);

		let (d1, token) = cache.lookup(&Key::from("d"), None, false).await.unwrap();
		token.evict();
		// The next lookup must not return the evicted instance without a
		// backing fetch.
		let before = db.lookups.load(Ordering::SeqCst);
		let (d2, _) = cache.lookup(&Key::from("d"), Some(&token), false).await.unwrap();
		assert_eq!(d1.span, d2.span);
		assert_eq!(db.lookups.load(Ordering::SeqCst), before + 1);
	}

	#[tokio::test]
	async fn test_stale_token_eviction_is_a_noop() {
		let (cache, _) = cache_over(vec![desc(2, "c", "m"), desc(3, "m", "z")]);

		let (_, token) = cache.lookup(&Key::from("d"), None, false).await.unwrap();
		// Newer state replaces the entry; the old token's generation no
		// longer matches.
		cache.insert(desc(7, "c", "m"));
		let len_before = cache.len();
		token.evict();
		assert_eq!(cache.len(), len_before);
	}

	#[tokio::test]
	async fn test_evict_and_replace_routes_to_replacement() {
		let (cache, _) = cache_over(vec![desc(2, "c", "z")]);

		let (_, token) = cache.lookup(&Key::from("p"), None, false).await.unwrap();
		// A split happened: [c,z) became [c,m) and [m,z).
		token.evict_and_replace(vec![desc(8, "c", "m"), desc(9, "m", "z")]);

		let (d, _) = cache.lookup(&Key::from("p"), None, false).await.unwrap();
		assert_eq!(d.range_id, RangeId(9));
	}

	#[tokio::test]
	async fn test_insert_displaces_overlapping_entries() {
		let (cache, _) = cache_over(vec![]);
		cache.insert(desc(2, "c", "m"));
		cache.insert(desc(3, "m", "z"));
		// A merge produced one range covering both spans.
		cache.insert(desc(4, "c", "z"));
		assert_eq!(cache.len(), 1);
	}

	#[tokio::test]
	async fn test_first_range_served_from_gossip_not_cached() {
		let (cache, db) = cache_over(vec![]);
		let (d, _) = cache.lookup(&Key::MIN, None, false).await.unwrap();
		assert_eq!(d.range_id, RangeId(1));
		assert_eq!(db.lookups.load(Ordering::SeqCst), 0);
		assert!(cache.is_empty());
	}

	#[tokio::test]
	async fn test_concurrent_lookups_coalesce() {
		struct SlowDb {
			inner: Arc<FixedDb>,
			gate: tokio::sync::Semaphore,
		}

		#[async_trait]
		impl RangeDescriptorDB for SlowDb {
			async fn first_range(&self) -> Result<RangeDescriptor> {
				self.inner.first_range().await
			}

			async fn range_lookup(
				&self,
				meta_key: &Key,
				max_ranges: usize,
				reverse: bool,
			) -> Result<RangeLookupResult> {
				let _permit = self.gate.acquire().await.map_err(|_| Error::NodeUnavailable)?;
				tokio::time::sleep(std::time::Duration::from_millis(10)).await;
				self.inner.range_lookup(meta_key, max_ranges, reverse).await
			}
		}

		let fixed = FixedDb::new(desc(1, "", "c"), vec![desc(2, "c", "z")]);
		let db = Arc::new(SlowDb {
			inner: fixed.clone(),
			gate: tokio::sync::Semaphore::new(16),
		});
		let cache = RangeDescriptorCache::new(db, 1 << 10, 8);

		let mut handles = Vec::new();
		for _ in 0..8 {
			let cache = cache.clone();
			handles.push(tokio::spawn(async move {
				cache.lookup(&Key::from("p"), None, false).await.map(|(d, _)| d.range_id)
			}));
		}
		for handle in handles {
			assert_eq!(handle.await.unwrap().unwrap(), RangeId(2));
		}
		// All eight lookups shared one backing fetch.
		assert_eq!(fixed.lookups.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_capacity_evicts_least_recently_used() {
		let db = FixedDb::new(desc(1, "", "c"), vec![]);
		let cache = RangeDescriptorCache::new(db, 2, 8);
		cache.insert(desc(2, "c", "f"));
		cache.insert(desc(3, "f", "j"));
		// Touch r2 so r3 is the coldest entry.
		cache.lookup(&Key::from("d"), None, false).await.unwrap();
		cache.insert(desc(4, "j", "p"));
		assert_eq!(cache.len(), 2);
		let (d, _) = cache.lookup(&Key::from("d"), None, false).await.unwrap();
		assert_eq!(d.range_id, RangeId(2));
	}
}
