// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Clipping a batch to the span one range owns.

use rangedb_core::{KeySpan, batch::BatchRequest, batch::Request};

/// Restricts `batch` to the requests touching `span`.
///
/// Range requests are clipped to their intersection with `span`; requests
/// falling entirely outside are dropped, as are requests that address no
/// keys at all (the combiner answers those trivially without a range round
/// trip). The returned positions map each kept request back to its index in
/// `batch`, so the sub-response can be placed into the caller's response
/// vector.
pub fn truncate(batch: &BatchRequest, span: &KeySpan) -> (Vec<Request>, Vec<usize>) {
	let mut requests = Vec::new();
	let mut positions = Vec::new();

	for (idx, req) in batch.requests.iter().enumerate() {
		let Some(req_span) = req.span() else {
			continue;
		};
		if req.is_range() {
			let Some(clipped) = req_span.intersect(span) else {
				continue;
			};
			let mut kept = req.clone();
			if let Some(header) = kept.header_mut() {
				header.span = clipped;
			}
			requests.push(kept);
			positions.push(idx);
		} else if span.contains(&req_span.start) {
			requests.push(req.clone());
			positions.push(idx);
		}
	}

	(requests, positions)
}

#[cfg(test)]
mod tests {
	use rangedb_core::batch::{GetRequest, PutRequest, RequestHeader, ScanRequest};

	use super::*;

	fn batch(requests: Vec<Request>) -> BatchRequest {
		BatchRequest {
			requests,
			..Default::default()
		}
	}

	fn get(key: &str) -> Request {
		Request::Get(GetRequest {
			header: RequestHeader::point(key),
		})
	}

	fn put(key: &str) -> Request {
		Request::Put(PutRequest {
			header: RequestHeader::point(key),
			value: b"v".to_vec(),
		})
	}

	fn scan(start: &str, end: &str) -> Request {
		Request::Scan(ScanRequest {
			header: RequestHeader::spanning(start, end),
		})
	}

	#[test]
	fn test_point_requests_kept_or_dropped_whole() {
		let ba = batch(vec![get("b"), put("p"), get("x")]);
		let (reqs, positions) = truncate(&ba, &KeySpan::new("a", "m"));
		assert_eq!(reqs.len(), 2);
		assert_eq!(positions, vec![0, 1]);
	}

	#[test]
	fn test_range_request_clipped_to_intersection() {
		let ba = batch(vec![scan("a", "z")]);
		let (reqs, positions) = truncate(&ba, &KeySpan::new("m", "q"));
		assert_eq!(positions, vec![0]);
		assert_eq!(reqs[0].span().unwrap(), &KeySpan::new("m", "q"));
	}

	#[test]
	fn test_disjoint_range_request_dropped() {
		let ba = batch(vec![scan("a", "c"), scan("m", "z")]);
		let (reqs, positions) = truncate(&ba, &KeySpan::new("d", "f"));
		assert!(reqs.is_empty());
		assert!(positions.is_empty());
	}

	#[test]
	fn test_requests_without_a_span_are_left_to_the_combiner() {
		let ba = batch(vec![get("b"), Request::Noop, get("c")]);
		let (reqs, positions) = truncate(&ba, &KeySpan::new("a", "m"));
		assert_eq!(reqs.len(), 2);
		// The Noop holds no keys; its slot is filled during
		// recombination, not by any range.
		assert_eq!(positions, vec![0, 2]);
	}

	#[test]
	fn test_positions_index_the_original_batch() {
		let ba = batch(vec![get("x"), scan("a", "z"), put("c")]);
		let (reqs, positions) = truncate(&ba, &KeySpan::new("a", "m"));
		assert_eq!(positions, vec![1, 2]);
		assert_eq!(reqs[0].span().unwrap(), &KeySpan::new("a", "m"));
	}

	#[test]
	fn test_truncation_does_not_mutate_the_caller() {
		let ba = batch(vec![scan("a", "z")]);
		let _ = truncate(&ba, &KeySpan::new("m", "q"));
		assert_eq!(ba.requests[0].span().unwrap(), &KeySpan::new("a", "z"));
	}
}
