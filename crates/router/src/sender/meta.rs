// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! The router as its own descriptor backing store.
//!
//! The descriptor cache needs meta-index lookups; meta-index lookups need the
//! router. The cycle is broken through the [`RangeDescriptorDB`] trait: the
//! cache holds the capability, the router provides it, and the lookup batch
//! goes straight to the replicas of the first range without re-entering the
//! splitter.

use std::sync::Weak;

use async_trait::async_trait;
use rangedb_core::{
	Error, Key, KeySpan, Result,
	batch::{BatchRequest, RangeLookupRequest, ReadConsistency, Request, RequestHeader, Response},
	descriptor::RangeDescriptor,
	key::{META_PREFIX, range_meta_key},
};

use crate::{
	cache::{RangeDescriptorDB, RangeLookupResult},
	sender::{DistSender, Inner},
};

pub(crate) struct MetaDb {
	sender: Weak<Inner>,
}

impl MetaDb {
	pub(crate) fn new(sender: Weak<Inner>) -> Self {
		MetaDb {
			sender,
		}
	}

	fn sender(&self) -> Result<DistSender> {
		match self.sender.upgrade() {
			Some(inner) => Ok(DistSender {
				inner,
			}),
			None => Err(Error::NodeUnavailable),
		}
	}
}

#[async_trait]
impl RangeDescriptorDB for MetaDb {
	async fn first_range(&self) -> Result<RangeDescriptor> {
		self.sender()?.inner.gossip.first_range()
	}

	async fn range_lookup(&self, meta_key: &Key, max_ranges: usize, reverse: bool) -> Result<RangeLookupResult> {
		let sender = self.sender()?;
		// The meta index is owned by the first range.
		let first = sender.inner.gossip.first_range()?;

		// A range's meta record sits at the meta key of its span end, so a
		// forward lookup scans strictly past `meta_key` and a reverse
		// lookup scans backward through it.
		let span = if reverse {
			KeySpan {
				start: Key::new(META_PREFIX),
				end: meta_key.next(),
			}
		} else {
			KeySpan {
				start: meta_key.clone(),
				end: range_meta_key(&Key::max()),
			}
		};

		let mut batch = BatchRequest::new();
		batch.header.read_consistency = ReadConsistency::Inconsistent;
		batch.header.timestamp = sender.inner.clock.now();
		batch.header.gateway_node_id = sender.inner.gossip.local_node_id();
		batch.add(Request::RangeLookup(RangeLookupRequest {
			header: RequestHeader {
				span,
			},
			max_ranges,
			reverse,
		}));

		let reply = sender.send_to_replicas(&batch, &first).await?;
		match reply.responses.into_iter().next() {
			Some(Response::RangeLookup(lookup)) => Ok(RangeLookupResult {
				ranges: lookup.ranges,
				prefetched: lookup.prefetched,
			}),
			other => Err(Error::Internal(format!(
				"meta lookup produced {:?} instead of a RangeLookup response",
				other.map(|r| r.name())
			))),
		}
	}
}
