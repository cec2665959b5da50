// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Settable gossip state.

use parking_lot::Mutex;
use rangedb_core::{
	Error, Result,
	descriptor::{NodeDescriptor, NodeId, RangeDescriptor},
};
use rangedb_router::gossip::{FirstRangeCallback, Gossip};
use std::collections::HashMap;

#[derive(Default)]
struct GossipState {
	first_range: Option<RangeDescriptor>,
	nodes: HashMap<NodeId, NodeDescriptor>,
	local_node: Option<NodeId>,
	callbacks: Vec<FirstRangeCallback>,
}

#[derive(Default)]
pub struct MockGossip {
	state: Mutex<GossipState>,
}

impl MockGossip {
	pub fn new() -> Self {
		MockGossip::default()
	}

	/// Publishes a new first-range descriptor and fires the registered
	/// callbacks, like a gossip update would.
	pub fn set_first_range(&self, desc: RangeDescriptor) {
		let mut state = self.state.lock();
		state.first_range = Some(desc.clone());
		for callback in &state.callbacks {
			callback(&desc);
		}
	}

	pub fn add_node(&self, desc: NodeDescriptor) {
		self.state.lock().nodes.insert(desc.node_id, desc);
	}

	pub fn set_local_node(&self, node_id: NodeId) {
		self.state.lock().local_node = Some(node_id);
	}
}

impl Gossip for MockGossip {
	fn first_range(&self) -> Result<RangeDescriptor> {
		self.state.lock().first_range.clone().ok_or(Error::FirstRangeUnavailable)
	}

	fn local_node_id(&self) -> Option<NodeId> {
		self.state.lock().local_node
	}

	fn node_descriptor(&self, node_id: NodeId) -> Option<NodeDescriptor> {
		self.state.lock().nodes.get(&node_id).cloned()
	}

	fn register_first_range_callback(&self, callback: FirstRangeCallback) {
		self.state.lock().callbacks.push(callback);
	}
}
