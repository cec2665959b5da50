// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Router counters. Export wiring is out of scope; the counters are plain
//! atomics so tests and operators can observe routing behavior.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DistSenderMetrics {
	/// Batches accepted by `send`.
	pub batches: AtomicU64,
	/// Range-addressed sub-batches dispatched.
	pub partial_batches: AtomicU64,
	/// Sub-batches dispatched on a spawned task.
	pub async_sends: AtomicU64,
	/// Async dispatches that fell back to sync for lack of a permit.
	pub async_throttled: AtomicU64,
	/// RPCs handed to a transport.
	pub rpc_sent: AtomicU64,
	/// RPCs whose target replica lives on the local node.
	pub local_rpc_sent: AtomicU64,
	/// Replica-local failures that advanced to the next replica.
	pub next_replica_errors: AtomicU64,
	pub not_leaseholder_errors: AtomicU64,
	/// Requests currently outstanding past the slow-request threshold.
	pub slow_requests: AtomicI64,
}

impl DistSenderMetrics {
	pub fn inc(counter: &AtomicU64) {
		counter.fetch_add(1, Ordering::Relaxed);
	}

	pub fn get(counter: &AtomicU64) -> u64 {
		counter.load(Ordering::Relaxed)
	}

	pub fn slow_requests(&self) -> i64 {
		self.slow_requests.load(Ordering::Relaxed)
	}
}
