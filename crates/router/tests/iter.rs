// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Walking ranges over a span with the iterator, against a programmable
//! topology.

use std::sync::Arc;

use rangedb_core::{Key, KeySpan, descriptor::RangeId};
use rangedb_router::{
	RangeIterator, ScanDirection,
	cache::{RangeDescriptorCache, RangeDescriptorDB},
};
use rangedb_testing::{MockRangeDb, range_desc};

fn cache_over(db: Arc<MockRangeDb>) -> RangeDescriptorCache {
	RangeDescriptorCache::new(db as Arc<dyn RangeDescriptorDB>, 1 << 10, 8)
}

fn three_range_db() -> Arc<MockRangeDb> {
	let db = Arc::new(MockRangeDb::new());
	db.set_ranges(vec![
		range_desc(1, "a", "g", &[1]),
		range_desc(2, "g", "p", &[1]),
		range_desc(3, "p", "z", &[1]),
	]);
	db
}

#[tokio::test]
async fn test_ascending_walk() {
	let cache = cache_over(three_range_db());
	let span = KeySpan::new("c", "q");
	let mut iter = RangeIterator::new(cache, ScanDirection::Ascending);

	iter.seek(&Key::from("c")).await;
	assert!(iter.valid());
	assert_eq!(iter.desc().unwrap().range_id, RangeId(1));
	assert!(iter.need_another(&span));

	iter.next().await;
	assert_eq!(iter.desc().unwrap().range_id, RangeId(2));
	assert!(iter.need_another(&span));

	iter.next().await;
	assert_eq!(iter.desc().unwrap().range_id, RangeId(3));
	assert!(!iter.need_another(&span));
}

#[tokio::test]
async fn test_descending_walk() {
	let cache = cache_over(three_range_db());
	let span = KeySpan::new("c", "q");
	let mut iter = RangeIterator::new(cache, ScanDirection::Descending);

	iter.seek(&Key::from("q")).await;
	assert!(iter.valid());
	assert_eq!(iter.desc().unwrap().range_id, RangeId(3));
	assert!(iter.need_another(&span));

	iter.next().await;
	assert_eq!(iter.desc().unwrap().range_id, RangeId(2));
	assert!(iter.need_another(&span));

	iter.next().await;
	assert_eq!(iter.desc().unwrap().range_id, RangeId(1));
	assert!(!iter.need_another(&span));
}

#[tokio::test]
async fn test_span_within_one_range_needs_no_other() {
	let cache = cache_over(three_range_db());
	let mut iter = RangeIterator::new(cache, ScanDirection::Ascending);
	iter.seek(&Key::from("h")).await;
	assert!(iter.valid());
	assert!(!iter.need_another(&KeySpan::new("h", "o")));
}

#[tokio::test]
async fn test_seek_failure_is_sticky_until_reseek() {
	let db = Arc::new(MockRangeDb::new());
	// Topology with a hole: nothing owns keys past "g".
	db.set_ranges(vec![range_desc(1, "a", "g", &[1])]);
	let cache = cache_over(db.clone());
	let mut iter = RangeIterator::new(cache, ScanDirection::Ascending);

	iter.seek(&Key::from("x")).await;
	assert!(!iter.valid());
	assert!(iter.error().is_some());

	// A later seek to a covered key recovers.
	iter.seek(&Key::from("b")).await;
	assert!(iter.valid());
	assert_eq!(iter.desc().unwrap().range_id, RangeId(1));
	assert!(iter.error().is_none());
}

#[tokio::test]
async fn test_token_descriptor_matches_position() {
	let cache = cache_over(three_range_db());
	let mut iter = RangeIterator::new(cache, ScanDirection::Ascending);
	iter.seek(&Key::from("h")).await;
	let token = iter.token().unwrap();
	assert_eq!(token.descriptor().range_id, RangeId(2));
}
