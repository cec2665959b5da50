// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! The slice of gossip the router consumes.

use rangedb_core::{
	Result,
	descriptor::{NodeDescriptor, NodeId, RangeDescriptor},
};

pub type FirstRangeCallback = Box<dyn Fn(&RangeDescriptor) + Send + Sync>;

/// Cluster state the router reads from gossip. Gossip propagation itself is
/// an external concern; the router only consumes the last known values.
pub trait Gossip: Send + Sync {
	/// The descriptor of the first range, which owns the meta index.
	///
	/// Fails with [`rangedb_core::Error::FirstRangeUnavailable`] until the
	/// first-range descriptor has been received.
	fn first_range(&self) -> Result<RangeDescriptor>;

	/// The node this process gossips as, once known.
	fn local_node_id(&self) -> Option<NodeId>;

	fn node_descriptor(&self, node_id: NodeId) -> Option<NodeDescriptor>;

	/// Invokes `callback` every time the first-range descriptor changes.
	fn register_first_range_callback(&self, callback: FirstRangeCallback);
}
