// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! A single-process mock cluster: topology, data, leases and replicas wired
//! together behind the router's collaborator seams.

use std::{
	collections::HashMap,
	sync::{
		Arc,
		atomic::{AtomicI64, Ordering},
	},
	time::Duration,
};

use parking_lot::Mutex;
use rangedb_core::{
	Error, Key, Result,
	batch::{
		BatchRequest, BatchResponse, BatchResponseHeader, BeginTransactionResponse, ConditionalPutResponse,
		DeleteRangeResponse, DeleteResponse, EndTransactionResponse, GetResponse, IncrementResponse, KeyValue,
		PutResponse, RangeLookupResponse, ReadConsistency, Request, Response, ResponseHeader, ReverseScanResponse,
		ScanResponse,
	},
	descriptor::{RangeDescriptor, RangeId, ReplicaDescriptor, StoreId},
	hlc::{Clock, Timestamp},
	key::user_key,
	retry::RetryOptions,
	stopper::Stopper,
};
use rangedb_router::{DistSender, DistSenderConfig, Gossip};

use crate::{
	gossip::MockGossip,
	store::FakeStore,
	topology::{MockRangeDb, node},
	transport::{Handler, MockTransportFactory},
};

/// Which store holds each range's lease. Absent entries mean any replica
/// serves.
pub type LeaseTable = Mutex<HashMap<RangeId, StoreId>>;

pub struct MockCluster {
	pub clock: Arc<Clock>,
	pub gossip: Arc<MockGossip>,
	pub db: Arc<MockRangeDb>,
	pub store: Arc<FakeStore>,
	pub factory: MockTransportFactory,
	pub stopper: Arc<Stopper>,
	pub leases: Arc<LeaseTable>,
}

impl Default for MockCluster {
	fn default() -> Self {
		Self::new()
	}
}

impl MockCluster {
	pub fn new() -> Self {
		let gossip = Arc::new(MockGossip::new());
		let db = Arc::new(MockRangeDb::new());
		let store = Arc::new(FakeStore::new());
		let leases = Arc::new(LeaseTable::default());
		let factory =
			MockTransportFactory::new(range_server(Arc::clone(&db), Arc::clone(&store), Arc::clone(&leases)));

		MockCluster {
			clock: Arc::new(Clock::system()),
			gossip,
			db,
			store,
			factory,
			stopper: Arc::new(Stopper::new()),
			leases,
		}
	}

	/// Installs the topology and publishes the first range through gossip.
	pub fn set_ranges(&self, descs: Vec<RangeDescriptor>) {
		self.db.set_ranges(descs.clone());
		if let Some(first) = descs.iter().min_by_key(|d| d.span.start.clone()) {
			self.gossip.set_first_range(first.clone());
		}
		for desc in &descs {
			for replica in &desc.replicas {
				self.gossip.add_node(node(replica.node_id.0));
			}
		}
	}

	pub fn set_lease(&self, range_id: impl Into<RangeId>, store_id: u64) {
		self.leases.lock().insert(range_id.into(), StoreId(store_id));
	}

	/// A backoff envelope tight enough for tests.
	pub fn fast_retry_options() -> RetryOptions {
		RetryOptions {
			init_backoff: Duration::from_millis(1),
			max_backoff: Duration::from_millis(20),
			multiplier: 2.0,
			max_retries: 0,
			closer: None,
		}
	}

	pub fn config(&self) -> DistSenderConfig {
		DistSenderConfig {
			rpc_retry_options: Self::fast_retry_options(),
			range_descriptor_db: Some(Arc::clone(&self.db) as _),
			..Default::default()
		}
	}

	pub fn sender(&self) -> DistSender {
		self.sender_with(self.config())
	}

	pub fn sender_with(&self, config: DistSenderConfig) -> DistSender {
		DistSender::new(
			config,
			Arc::clone(&self.clock),
			Arc::clone(&self.gossip) as Arc<dyn Gossip>,
			Arc::new(self.factory.clone()),
			Arc::clone(&self.stopper),
		)
	}
}

/// The standard replica behavior: serve the batch against the shared store,
/// honoring topology, leases, addressing and key limits, the way a real range
/// replica would.
pub fn range_server(db: Arc<MockRangeDb>, store: Arc<FakeStore>, leases: Arc<LeaseTable>) -> Handler {
	let server_clock = AtomicI64::new(1);
	Arc::new(move |replica, batch| {
		let now = Timestamp::new(server_clock.fetch_add(1, Ordering::SeqCst), 0);
		serve(&db, &store, &leases, replica, batch, now)
	})
}

fn serve(
	db: &MockRangeDb,
	store: &FakeStore,
	leases: &LeaseTable,
	replica: &ReplicaDescriptor,
	batch: &BatchRequest,
	now: Timestamp,
) -> Result<BatchResponse> {
	let range_id = batch.header.range_id;
	let Some(desc) = db.range_by_id(range_id) else {
		return Err(Error::RangeNotFound(range_id));
	};
	if desc.replica_on_store(replica.store_id).is_none() {
		return Err(Error::RangeNotFound(range_id));
	}

	let any_replica_serves = batch.is_read_only() && batch.header.read_consistency == ReadConsistency::Inconsistent;
	if !any_replica_serves {
		if let Some(lease_store) = leases.lock().get(&range_id).copied() {
			if lease_store != replica.store_id {
				return Err(Error::NotLeaseHolder {
					replica: *replica,
					range_id,
					lease_holder: desc.replica_on_store(lease_store).copied(),
				});
			}
		}
	}

	// Every addressed key must fall in this range's span; a miss means the
	// client routed on a stale descriptor.
	for req in &batch.requests {
		if matches!(req, Request::RangeLookup(_) | Request::Noop) {
			continue;
		}
		let Some(span) = req.span() else {
			continue;
		};
		if !desc.span.contains_span(span) {
			let leading = if batch.is_reverse() {
				db.range_for_key(&span.end, true)
			} else {
				db.range_for_key(&span.start, false)
			};
			return Err(Error::RangeKeyMismatch {
				span: span.clone(),
				mismatched: Box::new(desc.clone()),
				suggested: leading.map(Box::new),
			});
		}
	}

	let mut remaining = batch.header.max_span_request_keys;
	let limited = remaining > 0;
	let mut responses = Vec::with_capacity(batch.requests.len());

	for req in &batch.requests {
		let resp = match req {
			Request::Get(get) => Response::Get(GetResponse {
				header: ResponseHeader::default(),
				value: store.get(&get.header.span.start),
			}),
			Request::Put(put) => {
				store.put(put.header.span.start.clone(), put.value.clone());
				Response::Put(PutResponse::default())
			}
			Request::ConditionalPut(cput) => {
				let current = store.get(&cput.header.span.start);
				if current != cput.expected {
					return Err(Error::Internal(format!(
						"unexpected value for {}",
						cput.header.span.start
					)));
				}
				store.put(cput.header.span.start.clone(), cput.value.clone());
				Response::ConditionalPut(ConditionalPutResponse::default())
			}
			Request::Increment(inc) => {
				let key = &inc.header.span.start;
				let current = store
					.get(key)
					.and_then(|v| v.try_into().ok())
					.map(i64::from_le_bytes)
					.unwrap_or(0);
				let new_value = current + inc.increment;
				store.put(key.clone(), new_value.to_le_bytes().to_vec());
				Response::Increment(IncrementResponse {
					header: ResponseHeader::default(),
					new_value,
				})
			}
			Request::Delete(del) => {
				store.delete(&del.header.span.start);
				Response::Delete(DeleteResponse::default())
			}
			Request::DeleteRange(delrange) => {
				let deleted = store.delete_range(&delrange.header.span);
				Response::DeleteRange(DeleteRangeResponse {
					header: ResponseHeader {
						num_keys: deleted,
						resume_span: None,
					},
				})
			}
			Request::Scan(scan) => {
				let page = store.scan(&scan.header.span, if limited { remaining } else { 0 });
				let num_keys = page.rows.len() as u64;
				if limited {
					remaining -= num_keys;
				}
				Response::Scan(ScanResponse {
					header: ResponseHeader {
						num_keys,
						resume_span: page.resume_span,
					},
					rows: page.rows,
				})
			}
			Request::ReverseScan(scan) => {
				let page = store.reverse_scan(&scan.header.span, if limited { remaining } else { 0 });
				let num_keys = page.rows.len() as u64;
				if limited {
					remaining -= num_keys;
				}
				Response::ReverseScan(ReverseScanResponse {
					header: ResponseHeader {
						num_keys,
						resume_span: page.resume_span,
					},
					rows: page.rows,
				})
			}
			Request::BeginTransaction(_) => Response::BeginTransaction(BeginTransactionResponse::default()),
			Request::EndTransaction(end) => Response::EndTransaction(EndTransactionResponse {
				header: ResponseHeader::default(),
				committed: end.commit,
			}),
			Request::RangeLookup(lookup) => {
				let key = if lookup.reverse {
					// The addressed meta key is the span end minus the
					// successor byte.
					let mut bytes = lookup.header.span.end.0.clone();
					bytes.pop();
					user_key(&Key(bytes))
				} else {
					user_key(&lookup.header.span.start)
				};
				let result = db.lookup_sync(&key, lookup.max_ranges, lookup.reverse);
				Response::RangeLookup(RangeLookupResponse {
					header: ResponseHeader {
						num_keys: result.ranges.len() as u64,
						resume_span: None,
					},
					ranges: result.ranges,
					prefetched: result.prefetched,
				})
			}
			Request::Noop => Response::Noop,
		};
		responses.push(resp);
	}

	let mut txn = batch.header.txn.clone();
	if let Some(txn) = &mut txn {
		if batch.requests.iter().any(|r| r.is_write()) {
			txn.writing = true;
		}
	}
	Ok(BatchResponse {
		header: BatchResponseHeader {
			txn,
			now,
		},
		responses,
	})
}

/// Convenience for seeding the store with `key -> value` pairs.
pub fn seed_rows(store: &FakeStore, rows: &[(&str, &str)]) {
	for (key, value) in rows {
		store.put(*key, value.as_bytes().to_vec());
	}
}

/// Extracts the scanned rows of a response, whichever direction produced it.
pub fn scanned_rows(resp: &Response) -> Vec<KeyValue> {
	match resp {
		Response::Scan(scan) => scan.rows.clone(),
		Response::ReverseScan(scan) => scan.rows.clone(),
		other => panic!("expected a scan response, got {}", other.name()),
	}
}
