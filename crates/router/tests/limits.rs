// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Key-limited batches: budget threading across ranges, resume spans and the
//! mixtures a global limit forbids.

use rangedb_core::{
	Error, Key,
	batch::{BatchRequest, PutRequest, Request, RequestHeader, Response, ReverseScanRequest, ScanRequest},
};
use rangedb_testing::{MockCluster, range_desc, seed_rows};

fn scan(start: &str, end: &str) -> Request {
	Request::Scan(ScanRequest {
		header: RequestHeader::spanning(start, end),
	})
}

fn reverse_scan(start: &str, end: &str) -> Request {
	Request::ReverseScan(ReverseScanRequest {
		header: RequestHeader::spanning(start, end),
	})
}

fn limited_batch(requests: Vec<Request>, max_keys: u64) -> BatchRequest {
	let mut ba = BatchRequest::new();
	for req in requests {
		ba.add(req);
	}
	ba.header.max_span_request_keys = max_keys;
	ba
}

fn scan_response(resp: &Response) -> &rangedb_core::batch::ScanResponse {
	match resp {
		Response::Scan(scan) => scan,
		other => panic!("expected a Scan response, got {}", other.name()),
	}
}

fn two_range_cluster() -> MockCluster {
	let cluster = MockCluster::new();
	cluster.set_ranges(vec![range_desc(1, "a", "m", &[1]), range_desc(2, "m", "z", &[2])]);
	// Three keys in r1, four in r2.
	seed_rows(&cluster.store, &[
		("b", "1"),
		("c", "2"),
		("d", "3"),
		("m", "4"),
		("n", "5"),
		("o", "6"),
		("p", "7"),
	]);
	cluster
}

#[tokio::test]
async fn test_cross_range_scan_with_limit_and_resume() {
	let cluster = two_range_cluster();
	let sender = cluster.sender();

	let reply = sender.send(limited_batch(vec![scan("a", "z")], 5)).await.unwrap();
	let scan_reply = scan_response(&reply.responses[0]);

	// Exactly five keys across both ranges.
	let keys: Vec<Key> = scan_reply.rows.iter().map(|kv| kv.key.clone()).collect();
	assert_eq!(keys, vec![Key::from("b"), Key::from("c"), Key::from("d"), Key::from("m"), Key::from("n")]);
	assert_eq!(scan_reply.header.num_keys, 5);

	// The resume span starts at the first unreturned key and runs to the
	// original end.
	let resume = scan_reply.header.resume_span.clone().unwrap();
	assert_eq!(resume.start, Key::from("o"));
	assert_eq!(resume.end, Key::from("z"));

	// Re-issuing the resume span returns the remaining two keys.
	let reply = sender.send(limited_batch(vec![scan("o", "z")], 0)).await.unwrap();
	let keys: Vec<Key> = scan_response(&reply.responses[0]).rows.iter().map(|kv| kv.key.clone()).collect();
	assert_eq!(keys, vec![Key::from("o"), Key::from("p")]);
}

#[tokio::test]
async fn test_limit_exhausted_in_first_range_skips_the_rest() {
	let cluster = two_range_cluster();
	let sender = cluster.sender();

	let reply = sender.send(limited_batch(vec![scan("a", "z")], 2)).await.unwrap();
	let scan_reply = scan_response(&reply.responses[0]);
	assert_eq!(scan_reply.header.num_keys, 2);
	let resume = scan_reply.header.resume_span.clone().unwrap();
	// The server stopped inside r1; everything from there on is
	// unprocessed, including all of r2.
	assert_eq!(resume.start, Key::from("d"));
	assert_eq!(resume.end, Key::from("z"));
	// r2 was never contacted.
	assert_eq!(cluster.factory.sent_count(), 1);
}

#[tokio::test]
async fn test_limit_sum_never_exceeds_budget() {
	let cluster = two_range_cluster();
	let sender = cluster.sender();

	for budget in 1..=7u64 {
		let reply = sender.send(limited_batch(vec![scan("a", "z")], budget)).await.unwrap();
		let total: u64 = reply.responses.iter().filter_map(|r| r.header()).map(|h| h.num_keys).sum();
		assert!(total <= budget, "budget {budget} produced {total} keys");
	}
}

#[tokio::test]
async fn test_skipped_request_gets_full_resume_span() {
	let cluster = two_range_cluster();
	let sender = cluster.sender();

	// The first scan eats the whole budget in r1, so the second scan,
	// which only touches r2, is never dispatched.
	let reply = sender.send(limited_batch(vec![scan("a", "m"), scan("n", "z")], 3)).await.unwrap();

	let first = scan_response(&reply.responses[0]);
	assert_eq!(first.header.num_keys, 3);

	let second = scan_response(&reply.responses[1]);
	assert_eq!(second.header.num_keys, 0);
	assert!(second.rows.is_empty());
	// The untouched request resumes over its entire original span.
	assert_eq!(second.header.resume_span.clone().unwrap(), rangedb_core::KeySpan::new("n", "z"));
}

#[tokio::test]
async fn test_reverse_scan_with_limit() {
	let cluster = two_range_cluster();
	let sender = cluster.sender();

	let reply = sender.send(limited_batch(vec![reverse_scan("a", "z")], 5)).await.unwrap();
	let scan_reply = match &reply.responses[0] {
		Response::ReverseScan(scan) => scan,
		other => panic!("expected a ReverseScan response, got {}", other.name()),
	};

	let keys: Vec<Key> = scan_reply.rows.iter().map(|kv| kv.key.clone()).collect();
	assert_eq!(keys, vec![Key::from("p"), Key::from("o"), Key::from("n"), Key::from("m"), Key::from("d")]);
	// The unprocessed remainder is the low end of the span, ending just
	// past the first unreturned key.
	let resume = scan_reply.header.resume_span.clone().unwrap();
	assert_eq!(resume.start, Key::from("a"));
	assert_eq!(resume.end, Key::from("c").next());
}

#[tokio::test]
async fn test_no_async_dispatch_under_a_key_limit() {
	let cluster = two_range_cluster();
	let sender = cluster.sender();

	sender.send(limited_batch(vec![scan("a", "z")], 100)).await.unwrap();
	assert_eq!(sender.metrics().async_sends.load(std::sync::atomic::Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_mixed_directions_under_limit_are_rejected() {
	let cluster = two_range_cluster();
	let sender = cluster.sender();

	let err = sender
		.send(limited_batch(vec![scan("a", "m"), reverse_scan("m", "z")], 5))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::IllegalMixture(_)));
}

#[tokio::test]
async fn test_point_write_under_limit_is_rejected() {
	let cluster = two_range_cluster();
	let sender = cluster.sender();

	let put = Request::Put(PutRequest {
		header: RequestHeader::point("b"),
		value: b"v".to_vec(),
	});
	let err = sender.send(limited_batch(vec![put], 5)).await.unwrap_err();
	assert!(matches!(err, Error::IllegalMixture(_)));
}
