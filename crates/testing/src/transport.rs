// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Scriptable transport recording every RPC it fires.

use std::{
	collections::VecDeque,
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
	time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use rangedb_core::{
	Error, Result,
	batch::{BatchRequest, BatchResponse},
	descriptor::{RangeId, ReplicaDescriptor, ReplicaId, StoreId},
};
use rangedb_router::{
	replica::ReplicaSet,
	transport::{RpcReply, SendOptions, Transport, TransportFactory},
};

/// The behavior of every replica in the mock cluster: maps a contacted
/// replica and the sub-batch it received to a reply.
pub type Handler = Arc<dyn Fn(&ReplicaDescriptor, &BatchRequest) -> Result<BatchResponse> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct SendRecord {
	pub replica: ReplicaDescriptor,
	pub range_id: RangeId,
	pub summary: String,
}

#[derive(Default)]
struct FactoryState {
	handler: Mutex<Option<Handler>>,
	delay: Mutex<Option<Duration>>,
	sent: Mutex<Vec<SendRecord>>,
	created: AtomicU64,
	closed: AtomicU64,
}

/// Creates [`MockTransport`]s and records everything they do.
#[derive(Clone, Default)]
pub struct MockTransportFactory {
	state: Arc<FactoryState>,
}

impl MockTransportFactory {
	pub fn new(handler: Handler) -> Self {
		let factory = MockTransportFactory::default();
		factory.set_handler(handler);
		factory
	}

	/// Replaces the replica behavior mid-test.
	pub fn set_handler(&self, handler: Handler) {
		*self.state.handler.lock() = Some(handler);
	}

	/// Delays every RPC, for exercising the slow-request path.
	pub fn set_delay(&self, delay: Duration) {
		*self.state.delay.lock() = Some(delay);
	}

	pub fn sent(&self) -> Vec<SendRecord> {
		self.state.sent.lock().clone()
	}

	pub fn sent_replicas(&self) -> Vec<ReplicaDescriptor> {
		self.state.sent.lock().iter().map(|r| r.replica).collect()
	}

	pub fn sent_count(&self) -> usize {
		self.state.sent.lock().len()
	}

	pub fn created_count(&self) -> u64 {
		self.state.created.load(Ordering::SeqCst)
	}

	pub fn closed_count(&self) -> u64 {
		self.state.closed.load(Ordering::SeqCst)
	}
}

impl TransportFactory for MockTransportFactory {
	fn create(&self, _opts: SendOptions, replicas: ReplicaSet, batch: BatchRequest) -> Result<Box<dyn Transport>> {
		self.state.created.fetch_add(1, Ordering::SeqCst);
		Ok(Box::new(MockTransport {
			state: Arc::clone(&self.state),
			queue: replicas.replicas().copied().collect(),
			batch,
			closed: false,
		}))
	}
}

pub struct MockTransport {
	state: Arc<FactoryState>,
	queue: VecDeque<ReplicaDescriptor>,
	batch: BatchRequest,
	closed: bool,
}

#[async_trait]
impl Transport for MockTransport {
	fn is_exhausted(&self) -> bool {
		self.queue.is_empty()
	}

	fn next_replica(&self) -> Option<ReplicaDescriptor> {
		self.queue.front().copied()
	}

	async fn send_next(&mut self) -> RpcReply {
		let Some(replica) = self.queue.pop_front() else {
			return RpcReply {
				replica: ReplicaDescriptor {
					node_id: 0.into(),
					store_id: StoreId(0),
					replica_id: ReplicaId(0),
				},
				reply: Err(Error::Internal("send_next on exhausted transport".to_string())),
			};
		};
		self.state.sent.lock().push(SendRecord {
			replica,
			range_id: self.batch.header.range_id,
			summary: self.batch.summary(),
		});

		let delay = *self.state.delay.lock();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		} else {
			tokio::task::yield_now().await;
		}

		let handler = self.state.handler.lock().clone();
		let reply = match handler {
			Some(handler) => handler(&replica, &self.batch),
			None => Err(Error::Internal("mock transport has no handler".to_string())),
		};
		RpcReply {
			replica,
			reply,
		}
	}

	fn move_to_front(&mut self, replica: &ReplicaDescriptor) -> bool {
		match self.queue.iter().position(|r| r.store_id == replica.store_id) {
			Some(idx) => {
				if let Some(found) = self.queue.remove(idx) {
					self.queue.push_front(found);
				}
				true
			}
			None => false,
		}
	}

	fn close(&mut self) {
		if !self.closed {
			self.closed = true;
			self.state.closed.fetch_add(1, Ordering::SeqCst);
		}
	}
}
