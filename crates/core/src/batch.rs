// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Logical batches of key-value operations and their responses.
//!
//! A batch is the unit the router works on: a header plus a flat list of
//! requests addressed by key or key span. Responses stay positionally aligned
//! with the requests that produced them; entries skipped because of a key
//! limit are filled with empty sentinels carrying a resume span.

use serde::{Deserialize, Serialize};

use crate::{
	descriptor::{NodeId, RangeDescriptor, RangeId},
	hlc::Timestamp,
	key::{Key, KeySpan},
	txn::Transaction,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum ReadConsistency {
	#[default]
	Consistent,
	/// May return stale data; used for meta-index lookups.
	Inconsistent,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct KeyValue {
	pub key: Key,
	pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RequestHeader {
	pub span: KeySpan,
}

impl RequestHeader {
	pub fn point(key: impl Into<Key>) -> Self {
		RequestHeader {
			span: KeySpan::point(key),
		}
	}

	pub fn spanning(start: impl Into<Key>, end: impl Into<Key>) -> Self {
		RequestHeader {
			span: KeySpan::new(start, end),
		}
	}
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct GetRequest {
	pub header: RequestHeader,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PutRequest {
	pub header: RequestHeader,
	pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ConditionalPutRequest {
	pub header: RequestHeader,
	pub value: Vec<u8>,
	/// The value the key must currently have; `None` demands absence.
	pub expected: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct IncrementRequest {
	pub header: RequestHeader,
	pub increment: i64,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct DeleteRequest {
	pub header: RequestHeader,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct DeleteRangeRequest {
	pub header: RequestHeader,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ScanRequest {
	pub header: RequestHeader,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ReverseScanRequest {
	pub header: RequestHeader,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct BeginTransactionRequest {
	pub header: RequestHeader,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct EndTransactionRequest {
	pub header: RequestHeader,
	pub commit: bool,
}

/// Inconsistent scan of the meta index. Never appears in user batches; the
/// router issues it internally to resolve descriptors.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RangeLookupRequest {
	pub header: RequestHeader,
	pub max_ranges: usize,
	pub reverse: bool,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Request {
	Get(GetRequest),
	Put(PutRequest),
	ConditionalPut(ConditionalPutRequest),
	Increment(IncrementRequest),
	Delete(DeleteRequest),
	DeleteRange(DeleteRangeRequest),
	Scan(ScanRequest),
	ReverseScan(ReverseScanRequest),
	BeginTransaction(BeginTransactionRequest),
	EndTransaction(EndTransactionRequest),
	RangeLookup(RangeLookupRequest),
	Noop,
}

impl Request {
	pub fn header(&self) -> Option<&RequestHeader> {
		match self {
			Request::Get(r) => Some(&r.header),
			Request::Put(r) => Some(&r.header),
			Request::ConditionalPut(r) => Some(&r.header),
			Request::Increment(r) => Some(&r.header),
			Request::Delete(r) => Some(&r.header),
			Request::DeleteRange(r) => Some(&r.header),
			Request::Scan(r) => Some(&r.header),
			Request::ReverseScan(r) => Some(&r.header),
			Request::BeginTransaction(r) => Some(&r.header),
			Request::EndTransaction(r) => Some(&r.header),
			Request::RangeLookup(r) => Some(&r.header),
			Request::Noop => None,
		}
	}

	pub fn header_mut(&mut self) -> Option<&mut RequestHeader> {
		match self {
			Request::Get(r) => Some(&mut r.header),
			Request::Put(r) => Some(&mut r.header),
			Request::ConditionalPut(r) => Some(&mut r.header),
			Request::Increment(r) => Some(&mut r.header),
			Request::Delete(r) => Some(&mut r.header),
			Request::DeleteRange(r) => Some(&mut r.header),
			Request::Scan(r) => Some(&mut r.header),
			Request::ReverseScan(r) => Some(&mut r.header),
			Request::BeginTransaction(r) => Some(&mut r.header),
			Request::EndTransaction(r) => Some(&mut r.header),
			Request::RangeLookup(r) => Some(&mut r.header),
			Request::Noop => None,
		}
	}

	pub fn span(&self) -> Option<&KeySpan> {
		self.header().map(|h| &h.span)
	}

	/// Whether the request addresses a span of keys rather than a point.
	pub fn is_range(&self) -> bool {
		matches!(
			self,
			Request::Scan(_) | Request::ReverseScan(_) | Request::DeleteRange(_) | Request::RangeLookup(_)
		)
	}

	pub fn is_reverse(&self) -> bool {
		matches!(self, Request::ReverseScan(_))
	}

	pub fn is_read_only(&self) -> bool {
		matches!(
			self,
			Request::Get(_) | Request::Scan(_)
				| Request::ReverseScan(_)
				| Request::RangeLookup(_)
				| Request::Noop
		)
	}

	pub fn is_write(&self) -> bool {
		!self.is_read_only()
	}

	/// Whether the request participates in transactions. Meta lookups and
	/// padding do not.
	pub fn is_transactional(&self) -> bool {
		!matches!(self, Request::RangeLookup(_) | Request::Noop)
	}

	pub fn end_txn_commit(&self) -> Option<bool> {
		match self {
			Request::EndTransaction(r) => Some(r.commit),
			_ => None,
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			Request::Get(_) => "Get",
			Request::Put(_) => "Put",
			Request::ConditionalPut(_) => "ConditionalPut",
			Request::Increment(_) => "Increment",
			Request::Delete(_) => "Delete",
			Request::DeleteRange(_) => "DeleteRange",
			Request::Scan(_) => "Scan",
			Request::ReverseScan(_) => "ReverseScan",
			Request::BeginTransaction(_) => "BeginTransaction",
			Request::EndTransaction(_) => "EndTransaction",
			Request::RangeLookup(_) => "RangeLookup",
			Request::Noop => "Noop",
		}
	}
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct ResponseHeader {
	/// Number of keys this response touched; counted against
	/// `max_span_request_keys`.
	pub num_keys: u64,
	/// The unprocessed suffix of the request's span, present when the
	/// request was cut short by a key limit.
	pub resume_span: Option<KeySpan>,
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct GetResponse {
	pub header: ResponseHeader,
	pub value: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct PutResponse {
	pub header: ResponseHeader,
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct ConditionalPutResponse {
	pub header: ResponseHeader,
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct IncrementResponse {
	pub header: ResponseHeader,
	pub new_value: i64,
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct DeleteResponse {
	pub header: ResponseHeader,
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct DeleteRangeResponse {
	pub header: ResponseHeader,
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct ScanResponse {
	pub header: ResponseHeader,
	pub rows: Vec<KeyValue>,
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct ReverseScanResponse {
	pub header: ResponseHeader,
	pub rows: Vec<KeyValue>,
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct BeginTransactionResponse {
	pub header: ResponseHeader,
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct EndTransactionResponse {
	pub header: ResponseHeader,
	pub committed: bool,
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct RangeLookupResponse {
	pub header: ResponseHeader,
	pub ranges: Vec<RangeDescriptor>,
	pub prefetched: Vec<RangeDescriptor>,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Response {
	Get(GetResponse),
	Put(PutResponse),
	ConditionalPut(ConditionalPutResponse),
	Increment(IncrementResponse),
	Delete(DeleteResponse),
	DeleteRange(DeleteRangeResponse),
	Scan(ScanResponse),
	ReverseScan(ReverseScanResponse),
	BeginTransaction(BeginTransactionResponse),
	EndTransaction(EndTransactionResponse),
	RangeLookup(RangeLookupResponse),
	Noop,
}

impl Response {
	pub fn header(&self) -> Option<&ResponseHeader> {
		match self {
			Response::Get(r) => Some(&r.header),
			Response::Put(r) => Some(&r.header),
			Response::ConditionalPut(r) => Some(&r.header),
			Response::Increment(r) => Some(&r.header),
			Response::Delete(r) => Some(&r.header),
			Response::DeleteRange(r) => Some(&r.header),
			Response::Scan(r) => Some(&r.header),
			Response::ReverseScan(r) => Some(&r.header),
			Response::BeginTransaction(r) => Some(&r.header),
			Response::EndTransaction(r) => Some(&r.header),
			Response::RangeLookup(r) => Some(&r.header),
			Response::Noop => None,
		}
	}

	pub fn header_mut(&mut self) -> Option<&mut ResponseHeader> {
		match self {
			Response::Get(r) => Some(&mut r.header),
			Response::Put(r) => Some(&mut r.header),
			Response::ConditionalPut(r) => Some(&mut r.header),
			Response::Increment(r) => Some(&mut r.header),
			Response::Delete(r) => Some(&mut r.header),
			Response::DeleteRange(r) => Some(&mut r.header),
			Response::Scan(r) => Some(&mut r.header),
			Response::ReverseScan(r) => Some(&mut r.header),
			Response::BeginTransaction(r) => Some(&mut r.header),
			Response::EndTransaction(r) => Some(&mut r.header),
			Response::RangeLookup(r) => Some(&mut r.header),
			Response::Noop => None,
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			Response::Get(_) => "Get",
			Response::Put(_) => "Put",
			Response::ConditionalPut(_) => "ConditionalPut",
			Response::Increment(_) => "Increment",
			Response::Delete(_) => "Delete",
			Response::DeleteRange(_) => "DeleteRange",
			Response::Scan(_) => "Scan",
			Response::ReverseScan(_) => "ReverseScan",
			Response::BeginTransaction(_) => "BeginTransaction",
			Response::EndTransaction(_) => "EndTransaction",
			Response::RangeLookup(_) => "RangeLookup",
			Response::Noop => "Noop",
		}
	}

	/// Folds a later partial response for the same request into `self`.
	///
	/// A range request split across ranges produces one partial response
	/// per range, delivered in range order; rows append, key counts add,
	/// and the later resume span wins.
	pub fn combine(&mut self, other: Response) -> crate::Result<()> {
		use crate::error::Error;

		match (self, other) {
			(Response::Scan(a), Response::Scan(b)) => {
				a.rows.extend(b.rows);
				a.header.num_keys += b.header.num_keys;
				a.header.resume_span = b.header.resume_span;
			}
			(Response::ReverseScan(a), Response::ReverseScan(b)) => {
				a.rows.extend(b.rows);
				a.header.num_keys += b.header.num_keys;
				a.header.resume_span = b.header.resume_span;
			}
			(Response::DeleteRange(a), Response::DeleteRange(b)) => {
				a.header.num_keys += b.header.num_keys;
				a.header.resume_span = b.header.resume_span;
			}
			(Response::RangeLookup(a), Response::RangeLookup(b)) => {
				a.ranges.extend(b.ranges);
				a.prefetched.extend(b.prefetched);
				a.header.num_keys += b.header.num_keys;
			}
			(Response::Noop, Response::Noop) => {}
			(a, b) => {
				return Err(Error::Internal(format!("cannot combine {} with {}", a.name(), b.name())));
			}
		}
		Ok(())
	}

	/// The trivial response for `req`, used to fill slots the router
	/// skipped because a key limit was exhausted.
	pub fn empty_for(req: &Request) -> Response {
		match req {
			Request::Get(_) => Response::Get(GetResponse::default()),
			Request::Put(_) => Response::Put(PutResponse::default()),
			Request::ConditionalPut(_) => Response::ConditionalPut(ConditionalPutResponse::default()),
			Request::Increment(_) => Response::Increment(IncrementResponse::default()),
			Request::Delete(_) => Response::Delete(DeleteResponse::default()),
			Request::DeleteRange(_) => Response::DeleteRange(DeleteRangeResponse::default()),
			Request::Scan(_) => Response::Scan(ScanResponse::default()),
			Request::ReverseScan(_) => Response::ReverseScan(ReverseScanResponse::default()),
			Request::BeginTransaction(_) => {
				Response::BeginTransaction(BeginTransactionResponse::default())
			}
			Request::EndTransaction(_) => Response::EndTransaction(EndTransactionResponse::default()),
			Request::RangeLookup(_) => Response::RangeLookup(RangeLookupResponse::default()),
			Request::Noop => Response::Noop,
		}
	}
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct BatchHeader {
	pub txn: Option<Transaction>,
	pub read_consistency: ReadConsistency,
	pub timestamp: Timestamp,
	/// The range a sub-batch is addressed to; zero until the replica
	/// sender stamps it.
	pub range_id: RangeId,
	/// The node the batch entered the cluster through.
	pub gateway_node_id: Option<NodeId>,
	/// Upper bound on keys touched by range operations across the whole
	/// batch; 0 means unlimited.
	pub max_span_request_keys: u64,
	/// Bumped once per range-addressed send so server-side duplicate
	/// detection can tell fresh address attempts from replica retries.
	pub sequence: u64,
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct BatchRequest {
	pub header: BatchHeader,
	pub requests: Vec<Request>,
}

impl BatchRequest {
	pub fn new() -> Self {
		BatchRequest::default()
	}

	pub fn add(&mut self, req: Request) {
		self.requests.push(req);
	}

	pub fn is_empty(&self) -> bool {
		self.requests.is_empty()
	}

	pub fn len(&self) -> usize {
		self.requests.len()
	}

	pub fn is_reverse(&self) -> bool {
		self.requests.iter().any(|r| r.is_reverse())
	}

	pub fn has_forward_range(&self) -> bool {
		self.requests.iter().any(|r| r.is_range() && !r.is_reverse())
	}

	pub fn is_read_only(&self) -> bool {
		self.requests.iter().all(|r| r.is_read_only())
	}

	/// Whether the batch could be (part of) a transaction: it mutates
	/// state, so spanning ranges without a transaction record would lose
	/// atomicity.
	pub fn is_possible_transaction(&self) -> bool {
		self.requests.iter().any(|r| r.is_write() && r.is_transactional())
	}

	pub fn contains_end_txn(&self) -> bool {
		self.requests.iter().any(|r| matches!(r, Request::EndTransaction(_)))
	}

	pub fn ends_in_end_txn(&self) -> bool {
		matches!(self.requests.last(), Some(Request::EndTransaction(_)))
	}

	pub fn contains_commit(&self) -> bool {
		self.requests.iter().any(|r| r.end_txn_commit() == Some(true))
	}

	/// The bounding span of every addressed key in the batch.
	pub fn key_span(&self) -> Option<KeySpan> {
		let mut bound: Option<KeySpan> = None;
		for req in &self.requests {
			let Some(span) = req.span() else {
				continue;
			};
			match &mut bound {
				Some(b) => b.union_with(span),
				None => bound = Some(span.clone()),
			}
		}
		bound
	}

	/// Splits the request list into parts that may be routed together.
	///
	/// With `isolate_end_txn`, every EndTransaction becomes a singleton
	/// part, leaving the remainder free to fan out across ranges while the
	/// commit runs on its own.
	pub fn split(&self, isolate_end_txn: bool) -> Vec<Vec<Request>> {
		if !isolate_end_txn {
			return vec![self.requests.clone()];
		}
		let mut parts = Vec::new();
		let mut current = Vec::new();
		for req in &self.requests {
			if matches!(req, Request::EndTransaction(_)) {
				if !current.is_empty() {
					parts.push(std::mem::take(&mut current));
				}
				parts.push(vec![req.clone()]);
			} else {
				current.push(req.clone());
			}
		}
		if !current.is_empty() {
			parts.push(current);
		}
		parts
	}

	/// Compact description for log lines, e.g. `1 Get, 1 Scan`.
	pub fn summary(&self) -> String {
		if self.requests.is_empty() {
			return "empty batch".to_string();
		}
		let mut counts: Vec<(&'static str, usize)> = Vec::new();
		for req in &self.requests {
			match counts.iter_mut().find(|(name, _)| *name == req.name()) {
				Some((_, n)) => *n += 1,
				None => counts.push((req.name(), 1)),
			}
		}
		counts.iter().map(|(name, n)| format!("{n} {name}")).collect::<Vec<_>>().join(", ")
	}
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct BatchResponseHeader {
	/// Updated transaction state from the replica, if any.
	pub txn: Option<Transaction>,
	/// The replica's clock reading, fed into the local clock on receipt.
	pub now: Timestamp,
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct BatchResponse {
	pub header: BatchResponseHeader,
	pub responses: Vec<Response>,
}

impl BatchResponse {
	pub fn count_keys(&self) -> u64 {
		self.responses.iter().filter_map(|r| r.header()).map(|h| h.num_keys).sum()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn scan(start: &str, end: &str) -> Request {
		Request::Scan(ScanRequest {
			header: RequestHeader::spanning(start, end),
		})
	}

	fn put(key: &str) -> Request {
		Request::Put(PutRequest {
			header: RequestHeader::point(key),
			value: b"v".to_vec(),
		})
	}

	fn end_txn(commit: bool) -> Request {
		Request::EndTransaction(EndTransactionRequest {
			header: RequestHeader::point("txn-record"),
			commit,
		})
	}

	#[test]
	fn test_key_span_bounds_all_requests() {
		let mut ba = BatchRequest::new();
		ba.add(put("m"));
		ba.add(scan("a", "c"));
		ba.add(put("z"));
		let span = ba.key_span().unwrap();
		assert_eq!(span.start, Key::from("a"));
		assert_eq!(span.end, Key::from("z").next());
	}

	#[test]
	fn test_split_isolates_end_txn() {
		let mut ba = BatchRequest::new();
		ba.add(put("a"));
		ba.add(put("b"));
		ba.add(end_txn(true));

		let parts = ba.split(false);
		assert_eq!(parts.len(), 1);

		let parts = ba.split(true);
		assert_eq!(parts.len(), 2);
		assert_eq!(parts[0].len(), 2);
		assert_eq!(parts[1].len(), 1);
		assert!(matches!(parts[1][0], Request::EndTransaction(_)));
	}

	#[test]
	fn test_split_without_end_txn_is_single_part() {
		let mut ba = BatchRequest::new();
		ba.add(put("a"));
		let parts = ba.split(true);
		assert_eq!(parts.len(), 1);
	}

	#[test]
	fn test_contains_commit() {
		let mut ba = BatchRequest::new();
		ba.add(put("a"));
		ba.add(end_txn(false));
		assert!(!ba.contains_commit());

		let mut ba = BatchRequest::new();
		ba.add(end_txn(true));
		assert!(ba.contains_commit());
	}

	#[test]
	fn test_empty_response_matches_request_type() {
		let resp = Response::empty_for(&scan("a", "z"));
		assert!(matches!(resp, Response::Scan(_)));
		assert_eq!(resp.header().unwrap().num_keys, 0);
	}

	#[test]
	fn test_count_keys() {
		let mut br = BatchResponse::default();
		br.responses.push(Response::Scan(ScanResponse {
			header: ResponseHeader {
				num_keys: 3,
				resume_span: None,
			},
			rows: Vec::new(),
		}));
		br.responses.push(Response::Noop);
		br.responses.push(Response::Scan(ScanResponse {
			header: ResponseHeader {
				num_keys: 2,
				resume_span: None,
			},
			rows: Vec::new(),
		}));
		assert_eq!(br.count_keys(), 5);
	}

	#[test]
	fn test_summary() {
		let mut ba = BatchRequest::new();
		ba.add(put("a"));
		ba.add(put("b"));
		ba.add(scan("a", "z"));
		assert_eq!(ba.summary(), "2 Put, 1 Scan");
	}
}
