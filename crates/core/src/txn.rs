// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Client-side transaction record.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{descriptor::NodeId, hlc::Timestamp};

/// The transaction record threaded through a batch.
///
/// The router mutates only its own clone of the record within one send;
/// every async handoff receives a further deep copy so sibling sub-batches
/// cannot observe each other's mutations.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Transaction {
	pub id: Uuid,
	pub name: String,
	/// Set once the transaction has written an intent.
	pub writing: bool,
	/// The timestamp the transaction started at. Never changes.
	pub orig_timestamp: Timestamp,
	/// The provisional commit timestamp. May be pushed forward.
	pub timestamp: Timestamp,
	/// The timestamp observed when the transaction first visited each
	/// node, used to bound uncertainty restarts. First observation per
	/// node wins; later observations are ignored.
	pub observed_timestamps: HashMap<NodeId, Timestamp>,
}

impl Transaction {
	pub fn new(name: impl Into<String>, now: Timestamp) -> Self {
		Transaction {
			id: Uuid::new_v4(),
			name: name.into(),
			writing: false,
			orig_timestamp: now,
			timestamp: now,
			observed_timestamps: HashMap::new(),
		}
	}

	/// Records the timestamp observed from `node` on the transaction's
	/// first visit; later observations are ignored.
	pub fn observe_timestamp(&mut self, node: NodeId, ts: Timestamp) {
		self.observed_timestamps.entry(node).or_insert(ts);
	}

	pub fn observed_timestamp(&self, node: NodeId) -> Option<Timestamp> {
		self.observed_timestamps.get(&node).copied()
	}

	/// Folds the state returned by a replica into this record.
	pub fn update(&mut self, other: &Transaction) {
		if other.id != self.id {
			return;
		}
		self.writing |= other.writing;
		if other.timestamp > self.timestamp {
			self.timestamp = other.timestamp;
		}
		for (node, ts) in &other.observed_timestamps {
			self.observe_timestamp(*node, *ts);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_first_observed_timestamp_wins() {
		let mut txn = Transaction::new("test", Timestamp::new(100, 0));
		txn.observe_timestamp(NodeId(1), Timestamp::new(50, 0));
		txn.observe_timestamp(NodeId(1), Timestamp::new(40, 0));
		txn.observe_timestamp(NodeId(1), Timestamp::new(60, 0));
		assert_eq!(txn.observed_timestamp(NodeId(1)), Some(Timestamp::new(50, 0)));
	}

	#[test]
	fn test_update_merges_replica_state() {
		let mut txn = Transaction::new("test", Timestamp::new(100, 0));
		let mut reply = txn.clone();
		reply.writing = true;
		reply.timestamp = Timestamp::new(150, 2);
		reply.observe_timestamp(NodeId(3), Timestamp::new(120, 0));

		txn.update(&reply);
		assert!(txn.writing);
		assert_eq!(txn.timestamp, Timestamp::new(150, 2));
		assert_eq!(txn.orig_timestamp, Timestamp::new(100, 0));
		assert_eq!(txn.observed_timestamp(NodeId(3)), Some(Timestamp::new(120, 0)));
	}

	#[test]
	fn test_update_ignores_foreign_transaction() {
		let mut txn = Transaction::new("test", Timestamp::new(100, 0));
		let mut other = Transaction::new("other", Timestamp::new(999, 0));
		other.writing = true;
		txn.update(&other);
		assert!(!txn.writing);
	}
}
