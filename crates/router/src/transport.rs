// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! The RPC transport seam.
//!
//! A transport is constructed per range-addressed send from the candidate
//! replica set and the sub-batch, fires one RPC at a time, and is closed on
//! every exit path regardless of how far it got. The replica sender drives it
//! from a single task, so implementations need no internal synchronization.

use std::time::Duration;

use async_trait::async_trait;
use rangedb_core::{
	Result,
	batch::{BatchRequest, BatchResponse},
	descriptor::ReplicaDescriptor,
	hlc::Timestamp,
};

use crate::replica::ReplicaSet;

/// Per-send transport options.
#[derive(Clone, Debug, Default)]
pub struct SendOptions {
	pub timestamp: Timestamp,
	/// Overall deadline for the send, when the caller has one.
	pub timeout: Option<Duration>,
}

/// The outcome of one RPC attempt.
#[derive(Debug)]
pub struct RpcReply {
	pub replica: ReplicaDescriptor,
	/// The application response, or a transport/application error.
	/// Transport-level failures are [`rangedb_core::Error::Rpc`].
	pub reply: Result<BatchResponse>,
}

#[async_trait]
pub trait Transport: Send {
	/// Whether every candidate has been tried.
	fn is_exhausted(&self) -> bool;

	/// The replica the next `send_next` will contact.
	fn next_replica(&self) -> Option<ReplicaDescriptor>;

	/// Fires one RPC at the replica at the front of the queue and resolves
	/// with its outcome.
	async fn send_next(&mut self) -> RpcReply;

	/// Moves `replica` to the front of the not-yet-tried queue. Returns
	/// false when the replica is not in the set or was already tried.
	fn move_to_front(&mut self, replica: &ReplicaDescriptor) -> bool;

	/// Releases transport resources. Idempotent; must be safe under
	/// arbitrary partial progress.
	fn close(&mut self) {}
}

/// Constructs a transport per range-addressed send.
pub trait TransportFactory: Send + Sync {
	fn create(&self, opts: SendOptions, replicas: ReplicaSet, batch: BatchRequest) -> Result<Box<dyn Transport>>;
}
