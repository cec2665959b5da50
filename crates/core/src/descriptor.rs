// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Range, replica and node descriptors.
//!
//! Descriptors are immutable snapshots of cluster topology. A
//! [`RangeDescriptor`] names a contiguous replicated key interval and the
//! replicas of its consensus group; compare by span to decide whether two
//! snapshots describe the same interval.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::key::{Key, KeySpan};

macro_rules! id_type {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(
			Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize,
		)]
		pub struct $name(pub u64);

		impl Display for $name {
			fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
				Display::fmt(&self.0, f)
			}
		}

		impl From<u64> for $name {
			fn from(value: u64) -> Self {
				$name(value)
			}
		}
	};
}

id_type!(
	/// Identifies a node in the cluster.
	NodeId
);
id_type!(
	/// Identifies a store on a node.
	StoreId
);
id_type!(
	/// Identifies one member of a range's consensus group.
	ReplicaId
);
id_type!(
	/// Identifies a range.
	RangeId
);

/// One member of a range's consensus group, residing on a store on a node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct ReplicaDescriptor {
	pub node_id: NodeId,
	pub store_id: StoreId,
	pub replica_id: ReplicaId,
}

impl Display for ReplicaDescriptor {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "(n{},s{}):{}", self.node_id, self.store_id, self.replica_id)
	}
}

/// A node as advertised through gossip. `attrs` encode locality, most
/// significant first (e.g. `["us-east", "rack-12", "ssd"]`).
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct NodeDescriptor {
	pub node_id: NodeId,
	pub address: String,
	pub attrs: Vec<String>,
}

impl NodeDescriptor {
	pub fn new(node_id: impl Into<NodeId>, address: impl Into<String>) -> Self {
		NodeDescriptor {
			node_id: node_id.into(),
			address: address.into(),
			attrs: Vec::new(),
		}
	}

	pub fn with_attrs(mut self, attrs: &[&str]) -> Self {
		self.attrs = attrs.iter().map(|s| s.to_string()).collect();
		self
	}
}

/// An immutable snapshot of a range's identity, span and replicas.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RangeDescriptor {
	pub range_id: RangeId,
	pub span: KeySpan,
	pub replicas: Vec<ReplicaDescriptor>,
}

impl RangeDescriptor {
	pub fn new(range_id: impl Into<RangeId>, span: KeySpan, replicas: Vec<ReplicaDescriptor>) -> Self {
		RangeDescriptor {
			range_id: range_id.into(),
			span,
			replicas,
		}
	}

	/// Whether this range owns `key` under forward addressing.
	pub fn contains_key(&self, key: &Key) -> bool {
		self.span.contains(key)
	}

	/// Whether this range owns `key` under inverted (reverse-scan)
	/// addressing: the end key of a span belongs to the range it
	/// terminates.
	pub fn contains_key_inverted(&self, key: &Key) -> bool {
		*key > self.span.start && *key <= self.span.end
	}

	pub fn replica_on_store(&self, store_id: StoreId) -> Option<&ReplicaDescriptor> {
		self.replicas.iter().find(|r| r.store_id == store_id)
	}

	/// Two descriptors describe the same range state iff their spans are
	/// equal.
	pub fn same_span(&self, other: &RangeDescriptor) -> bool {
		self.span == other.span
	}
}

impl Display for RangeDescriptor {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "r{}:{}", self.range_id, self.span)
	}
}
