// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! The distributed request router.
//!
//! [`DistSender`] receives logical batches addressed by keys or key spans,
//! resolves which ranges own them, splits the batch along range boundaries,
//! picks a replica per range, drives the transport and recombines the partial
//! responses into one logical response positionally aligned with the input.

mod meta;
mod partial;
mod replicas;
mod send;

use std::{sync::Arc, time::Duration};

use once_cell::sync::OnceCell;
use rangedb_core::{
	Key, Result,
	batch::BatchResponse,
	descriptor::NodeDescriptor,
	hlc::Clock,
	retry::RetryOptions,
	stopper::Stopper,
};
use tokio::sync::{Semaphore, oneshot};

use crate::{
	cache::{LeaseHolderCache, RangeDescriptorCache, RangeDescriptorDB},
	gossip::Gossip,
	metrics::DistSenderMetrics,
	sender::meta::MetaDb,
	transport::TransportFactory,
};

pub struct DistSenderConfig {
	/// Bound on cached range descriptors.
	pub range_descriptor_cache_size: usize,
	/// Bound on cached lease-holder hints.
	pub lease_holder_cache_size: usize,
	/// Descriptors fetched (and prefetched) per meta-index lookup.
	pub range_lookup_max_ranges: usize,
	/// Permits for parallel sub-batch dispatch, process-wide.
	pub sender_concurrency: usize,
	pub rpc_retry_options: RetryOptions,
	/// Outstanding RPCs past this age count into the slow-request gauge.
	pub slow_request_threshold: Duration,
	/// Overrides the node descriptor normally learned from gossip.
	pub node_descriptor: Option<NodeDescriptor>,
	/// Overrides the meta-index lookup path; for testing.
	pub range_descriptor_db: Option<Arc<dyn RangeDescriptorDB>>,
}

impl Default for DistSenderConfig {
	fn default() -> Self {
		DistSenderConfig {
			range_descriptor_cache_size: 1 << 20,
			lease_holder_cache_size: 1 << 20,
			range_lookup_max_ranges: 8,
			sender_concurrency: 500,
			rpc_retry_options: RetryOptions::default(),
			slow_request_threshold: Duration::from_secs(60),
			node_descriptor: None,
			range_descriptor_db: None,
		}
	}
}

pub(crate) struct Inner {
	pub(crate) clock: Arc<Clock>,
	pub(crate) gossip: Arc<dyn Gossip>,
	pub(crate) transport: Arc<dyn TransportFactory>,
	pub(crate) stopper: Arc<Stopper>,
	pub(crate) range_cache: RangeDescriptorCache,
	pub(crate) leaseholders: LeaseHolderCache,
	pub(crate) retry_options: RetryOptions,
	pub(crate) slow_request_threshold: Duration,
	pub(crate) async_sem: Arc<Semaphore>,
	pub(crate) node_desc: OnceCell<NodeDescriptor>,
	pub(crate) metrics: DistSenderMetrics,
}

/// Shared handle to the router. Cheap to clone.
#[derive(Clone)]
pub struct DistSender {
	pub(crate) inner: Arc<Inner>,
}

impl DistSender {
	pub fn new(
		config: DistSenderConfig,
		clock: Arc<Clock>,
		gossip: Arc<dyn Gossip>,
		transport: Arc<dyn TransportFactory>,
		stopper: Arc<Stopper>,
	) -> Self {
		let retry_options = config.rpc_retry_options.clone().with_closer(stopper.should_quiesce());
		let node_desc = match config.node_descriptor {
			Some(desc) => OnceCell::with_value(desc),
			None => OnceCell::new(),
		};

		let inner = Arc::new_cyclic(|weak| {
			let db = config.range_descriptor_db.clone().unwrap_or_else(|| {
				Arc::new(MetaDb::new(weak.clone())) as Arc<dyn RangeDescriptorDB>
			});
			Inner {
				clock,
				gossip: Arc::clone(&gossip),
				transport,
				stopper,
				range_cache: RangeDescriptorCache::new(
					db,
					config.range_descriptor_cache_size,
					config.range_lookup_max_ranges,
				),
				leaseholders: LeaseHolderCache::new(config.lease_holder_cache_size),
				retry_options,
				slow_request_threshold: config.slow_request_threshold,
				async_sem: Arc::new(Semaphore::new(config.sender_concurrency)),
				node_desc,
				metrics: DistSenderMetrics::default(),
			}
		});

		// The first range is resolved through gossip; when it moves, the
		// cached descriptor covering the minimum key is out of date.
		let cache = inner.range_cache.clone();
		gossip.register_first_range_callback(Box::new(move |_| cache.evict_containing(&Key::MIN)));

		DistSender {
			inner,
		}
	}

	pub fn metrics(&self) -> &DistSenderMetrics {
		&self.inner.metrics
	}

	pub fn range_cache(&self) -> &RangeDescriptorCache {
		&self.inner.range_cache
	}

	pub fn lease_holder_cache(&self) -> &LeaseHolderCache {
		&self.inner.leaseholders
	}

	/// The local node descriptor: the configured override, else learned
	/// opportunistically from gossip once available.
	pub(crate) fn node_descriptor(&self) -> Option<NodeDescriptor> {
		if let Some(desc) = self.inner.node_desc.get() {
			return Some(desc.clone());
		}
		let node_id = self.inner.gossip.local_node_id()?;
		let desc = self.inner.gossip.node_descriptor(node_id)?;
		let _ = self.inner.node_desc.set(desc.clone());
		Some(desc)
	}

	pub(crate) fn retry_options(&self) -> RetryOptions {
		self.inner.retry_options.clone()
	}
}

/// One range's share of a batch: the reply for the truncated sub-batch plus
/// the positions its responses occupy in the caller's batch.
pub(crate) struct PartialResult {
	pub(crate) positions: Vec<usize>,
	pub(crate) reply: Result<BatchResponse>,
}

/// A dispatched sub-batch awaiting recombination, in dispatch order.
pub(crate) enum PendingPartial {
	Ready(PartialResult),
	Channel(oneshot::Receiver<PartialResult>),
}
