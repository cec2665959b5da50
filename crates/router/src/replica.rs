// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Ordered replica candidate sets.
//!
//! The order of a [`ReplicaSet`] encodes preference: the transport contacts
//! candidates front to back.

use rangedb_core::descriptor::{NodeDescriptor, RangeDescriptor, ReplicaDescriptor, StoreId};

use crate::gossip::Gossip;

#[derive(Clone, Debug)]
pub struct ReplicaInfo {
	pub replica: ReplicaDescriptor,
	pub node: NodeDescriptor,
}

/// An ordered set of candidate replicas for one range, best candidate first.
#[derive(Clone, Debug, Default)]
pub struct ReplicaSet(Vec<ReplicaInfo>);

impl ReplicaSet {
	/// Builds the candidate set for `desc`, resolving node descriptors
	/// through gossip. Replicas on nodes gossip does not know yet are
	/// left out; they cannot be dialed.
	pub fn from_descriptor(gossip: &dyn Gossip, desc: &RangeDescriptor) -> Self {
		let mut infos = Vec::with_capacity(desc.replicas.len());
		for replica in &desc.replicas {
			if let Some(node) = gossip.node_descriptor(replica.node_id) {
				infos.push(ReplicaInfo {
					replica: *replica,
					node,
				});
			}
		}
		ReplicaSet(infos)
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn iter(&self) -> impl Iterator<Item = &ReplicaInfo> {
		self.0.iter()
	}

	pub fn replicas(&self) -> impl Iterator<Item = &ReplicaDescriptor> {
		self.0.iter().map(|i| &i.replica)
	}

	pub fn find_store(&self, store_id: StoreId) -> Option<usize> {
		self.0.iter().position(|i| i.replica.store_id == store_id)
	}

	pub fn move_to_front(&mut self, index: usize) {
		if index < self.0.len() {
			let info = self.0.remove(index);
			self.0.insert(0, info);
		}
	}

	/// Stable-sorts the set so that replicas sharing the longest locality
	/// prefix with `local` come first. Replicas on the local node itself
	/// beat everything.
	pub fn optimize_order(&mut self, local: Option<&NodeDescriptor>) {
		let Some(local) = local else {
			return;
		};
		self.0.sort_by_key(|info| {
			if info.node.node_id == local.node_id {
				return std::cmp::Reverse(usize::MAX);
			}
			std::cmp::Reverse(common_attr_prefix(&local.attrs, &info.node.attrs))
		});
	}
}

fn common_attr_prefix(a: &[String], b: &[String]) -> usize {
	a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
	use rangedb_core::descriptor::{NodeId, ReplicaId};

	use super::*;

	fn info(node_id: u64, attrs: &[&str]) -> ReplicaInfo {
		ReplicaInfo {
			replica: ReplicaDescriptor {
				node_id: NodeId(node_id),
				store_id: StoreId(node_id),
				replica_id: ReplicaId(node_id),
			},
			node: NodeDescriptor::new(node_id, format!("node-{node_id}:26257")).with_attrs(attrs),
		}
	}

	#[test]
	fn test_optimize_order_prefers_locality() {
		let mut set = ReplicaSet(vec![
			info(1, &["eu-west", "rack-1"]),
			info(2, &["us-east", "rack-9"]),
			info(3, &["us-east", "rack-3", "ssd"]),
		]);
		let local = NodeDescriptor::new(99, "local:26257").with_attrs(&["us-east", "rack-3"]);
		set.optimize_order(Some(&local));

		let order: Vec<u64> = set.replicas().map(|r| r.node_id.0).collect();
		assert_eq!(order, vec![3, 2, 1]);
	}

	#[test]
	fn test_optimize_order_is_stable_without_locality() {
		let mut set = ReplicaSet(vec![info(1, &[]), info(2, &[]), info(3, &[])]);
		let local = NodeDescriptor::new(99, "local:26257");
		set.optimize_order(Some(&local));
		let order: Vec<u64> = set.replicas().map(|r| r.node_id.0).collect();
		assert_eq!(order, vec![1, 2, 3]);
	}

	#[test]
	fn test_local_node_beats_attribute_matches() {
		let mut set = ReplicaSet(vec![info(1, &["us-east"]), info(2, &["us-east"])]);
		let local = NodeDescriptor::new(2, "local:26257").with_attrs(&["us-east"]);
		set.optimize_order(Some(&local));
		assert_eq!(set.replicas().next().unwrap().node_id, NodeId(2));
	}

	#[test]
	fn test_move_to_front() {
		let mut set = ReplicaSet(vec![info(1, &[]), info(2, &[]), info(3, &[])]);
		let idx = set.find_store(StoreId(3)).unwrap();
		set.move_to_front(idx);
		let order: Vec<u64> = set.replicas().map(|r| r.node_id.0).collect();
		assert_eq!(order, vec![3, 1, 2]);
	}
}
