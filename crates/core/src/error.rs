// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Error kinds the routing tier distinguishes.
//!
//! Only errors that can be localized to one replica or to a stale descriptor
//! are swallowed and retried; everything else surfaces to the caller
//! unchanged. The enum is `Clone` so coalesced descriptor lookups can fan a
//! single failure out to every waiter.

use thiserror::Error;

use crate::{
	descriptor::{RangeDescriptor, RangeId, ReplicaDescriptor, StoreId},
	key::KeySpan,
};

#[derive(Clone, PartialEq, Debug, Error)]
pub enum Error {
	/// Gossip has not yet received the first-range descriptor.
	#[error("first range descriptor is not available in gossip")]
	FirstRangeUnavailable,

	#[error("empty batch")]
	EmptyBatch,

	/// A combination of requests that cannot be routed together, e.g.
	/// mixing forward and reverse scans under a key limit.
	#[error("illegal batch: {0}")]
	IllegalMixture(String),

	/// A batch that might be a transaction spans multiple ranges without a
	/// transaction record or inconsistent read consistency.
	#[error("multi-range batch requires a transaction")]
	RequiresTransaction,

	/// Internal sentinel: the batch ends in an EndTransaction but spans
	/// multiple ranges, so it cannot commit in one phase. The splitter
	/// re-splits with the EndTransaction isolated; callers never see this.
	#[error("cannot send 1PC transaction to multiple ranges")]
	No1PCTransaction,

	/// Every replica of a range failed.
	#[error("failed to send to all replicas: {message}")]
	SendError {
		message: String,
	},

	#[error("r{0} was not found")]
	RangeNotFound(RangeId),

	/// The contacted range does not own the addressed keys; the cached
	/// descriptor is stale, most likely due to a split.
	#[error("key range {span} outside of bounds of range {mismatched}")]
	RangeKeyMismatch {
		span: KeySpan,
		mismatched: Box<RangeDescriptor>,
		/// The descriptor the server believes owns the keys, when known.
		suggested: Option<Box<RangeDescriptor>>,
	},

	/// The contacted replica does not hold the lease.
	#[error("replica {replica} of r{range_id} does not hold the lease")]
	NotLeaseHolder {
		replica: ReplicaDescriptor,
		range_id: RangeId,
		/// The lease holder known to the contacted replica, when known.
		lease_holder: Option<ReplicaDescriptor>,
	},

	#[error("store s{0} was not found")]
	StoreNotFound(StoreId),

	#[error("node unavailable; try another peer")]
	NodeUnavailable,

	/// The outcome of a commit could not be determined: a transport-level
	/// failure happened after the commit may have been applied.
	#[error("result is ambiguous: {0}")]
	AmbiguousResult(String),

	/// A transport-level failure; no application response was received.
	/// `fail_fast` marks errors raised before the request could have
	/// reached the server (e.g. connection refused).
	#[error("rpc failed: {message}")]
	Rpc {
		message: String,
		fail_fast: bool,
	},

	#[error("internal error: {0}")]
	Internal(String),
}

impl Error {
	/// Whether the error is local to one replica, so the next replica of
	/// the same range should be tried.
	pub fn is_replica_local(&self) -> bool {
		matches!(self, Error::StoreNotFound(_) | Error::NodeUnavailable)
	}

	/// Whether the error means the descriptor used for routing was stale
	/// and must be evicted before retrying.
	pub fn evicts_descriptor(&self) -> bool {
		matches!(
			self,
			Error::SendError {
				..
			} | Error::RangeNotFound(_)
				| Error::RangeKeyMismatch {
					..
				}
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_classification() {
		assert!(Error::NodeUnavailable.is_replica_local());
		assert!(Error::StoreNotFound(StoreId(3)).is_replica_local());
		assert!(!Error::RangeNotFound(RangeId(1)).is_replica_local());

		assert!(Error::RangeNotFound(RangeId(1)).evicts_descriptor());
		assert!(Error::SendError {
			message: "boom".into()
		}
		.evicts_descriptor());
		assert!(!Error::FirstRangeUnavailable.evicts_descriptor());
	}
}
