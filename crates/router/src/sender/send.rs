// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Batch verification, legal splitting and the per-range routing loop.

use futures_util::{FutureExt, future::BoxFuture};
use rangedb_core::{
	Error, Key, KeySpan, Result,
	batch::{BatchRequest, BatchResponse, BatchResponseHeader, ReadConsistency, Request, Response},
	descriptor::RangeDescriptor,
};
use tokio::sync::oneshot;
use tracing::{debug, instrument, trace};

use crate::{
	cache::EvictionToken,
	iter::{RangeIterator, ScanDirection},
	metrics::DistSenderMetrics,
	sender::{DistSender, PartialResult, PendingPartial},
};

impl DistSender {
	/// Routes `batch` across the ranges owning its keys and returns the
	/// combined response, positionally aligned with `batch.requests`.
	#[instrument(name = "sender::send", level = "debug", skip_all, fields(batch = %batch.summary()))]
	pub async fn send(&self, mut batch: BatchRequest) -> Result<BatchResponse> {
		DistSenderMetrics::inc(&self.inner.metrics.batches);
		self.verify_and_normalize(&mut batch)?;

		let mut isolate_end_txn = false;
		'resplit: loop {
			let parts = batch.split(isolate_end_txn);
			let part_count = parts.len();
			let mut slots: Vec<Option<Response>> = Vec::new();
			slots.resize_with(batch.requests.len(), || None);
			let mut last_header = BatchResponseHeader::default();
			let mut offset = 0usize;

			for (part_idx, part) in parts.into_iter().enumerate() {
				let part_len = part.len();
				let part_has_end_txn =
					part.iter().any(|r| matches!(r, Request::EndTransaction(_)));
				let mut part_batch = BatchRequest {
					header: batch.header.clone(),
					requests: part,
				};

				let Some(span) = part_batch.key_span() else {
					for (i, req) in part_batch.requests.iter().enumerate() {
						slots[offset + i] = Some(Response::empty_for(req));
					}
					offset += part_len;
					continue;
				};

				match self.divide_and_send(&mut part_batch, span).await {
					Ok(reply) => {
						// Thread the replica's transaction state into the
						// next part.
						if let (Some(txn), Some(batch_txn)) =
							(&reply.header.txn, &mut batch.header.txn)
						{
							batch_txn.update(txn);
						}
						batch.header.sequence = part_batch.header.sequence;
						if reply.responses.len() != part_len {
							return Err(Error::Internal(format!(
								"partial response has {} entries for {} requests",
								reply.responses.len(),
								part_len
							)));
						}
						for (i, resp) in reply.responses.into_iter().enumerate() {
							slots[offset + i] = Some(resp);
						}
						last_header = reply.header;
					}
					Err(Error::No1PCTransaction)
						if !isolate_end_txn
							&& part_idx == part_count - 1 && part_has_end_txn =>
					{
						debug!("batch spans ranges with trailing EndTransaction; re-splitting");
						isolate_end_txn = true;
						continue 'resplit;
					}
					Err(err) => return Err(err),
				}
				offset += part_len;
			}

			let mut responses = Vec::with_capacity(slots.len());
			for (i, slot) in slots.into_iter().enumerate() {
				match slot {
					Some(resp) => responses.push(resp),
					None => {
						return Err(Error::Internal(format!(
							"no response assembled for request {i}"
						)));
					}
				}
			}
			if let Some(txn) = &batch.header.txn {
				match &mut last_header.txn {
					Some(reply_txn) => reply_txn.update(txn),
					None => last_header.txn = Some(txn.clone()),
				}
			}
			return Ok(BatchResponse {
				header: last_header,
				responses,
			});
		}
	}

	fn verify_and_normalize(&self, batch: &mut BatchRequest) -> Result<()> {
		if batch.is_empty() {
			return Err(Error::EmptyBatch);
		}
		if batch.header.gateway_node_id.is_none() {
			batch.header.gateway_node_id = self.inner.gossip.local_node_id();
		}
		if batch.header.read_consistency == ReadConsistency::Inconsistent
			&& batch.header.timestamp.is_zero()
		{
			batch.header.timestamp = self.inner.clock.now();
		}
		let gateway = batch.header.gateway_node_id;
		if let Some(txn) = &mut batch.header.txn {
			if txn.observed_timestamps.is_empty() {
				if let Some(node) = self.inner.gossip.local_node_id().or(gateway) {
					txn.observe_timestamp(node, txn.orig_timestamp);
				}
			}
		}

		if batch.header.max_span_request_keys > 0 {
			if batch.has_forward_range() && batch.is_reverse() {
				return Err(Error::IllegalMixture(
					"cannot mix forward and reverse scans under a key limit".to_string(),
				));
			}
			for req in &batch.requests {
				match req {
					Request::Scan(_)
					| Request::ReverseScan(_)
					| Request::DeleteRange(_)
					| Request::EndTransaction(_)
					| Request::Noop => {}
					other => {
						return Err(Error::IllegalMixture(format!(
							"batch with a key limit contains a {} request",
							other.name()
						)));
					}
				}
			}
		}
		Ok(())
	}

	/// Iterates the ranges covering `span` in the batch's direction,
	/// sending one truncated sub-batch per range, in parallel where legal.
	pub(crate) fn divide_and_send<'a>(
		&'a self,
		batch: &'a mut BatchRequest,
		span: KeySpan,
	) -> BoxFuture<'a, Result<BatchResponse>> {
		async move {
			let direction = if batch.is_reverse() {
				ScanDirection::Descending
			} else {
				ScanDirection::Ascending
			};
			let mut iter = RangeIterator::new(self.inner.range_cache.clone(), direction);
			let mut seek_key = match direction {
				ScanDirection::Ascending => span.start.clone(),
				ScanDirection::Descending => span.end.clone(),
			};
			let mut remaining = span.clone();
			let mut pending: Vec<PendingPartial> = Vec::new();
			let mut could_skip = false;
			let mut stopped_at: Option<Key> = None;
			let mut first_range = true;

			loop {
				iter.seek(&seek_key).await;
				if !iter.valid() {
					let err = iter.take_error();
					if pending.is_empty() {
						return Err(err);
					}
					pending.push(PendingPartial::Ready(PartialResult {
						positions: Vec::new(),
						reply: Err(err),
					}));
					break;
				}
				let (desc, token) = match (iter.desc(), iter.token()) {
					(Some(desc), Some(token)) => (desc.clone(), token.clone()),
					_ => {
						return Err(Error::Internal(
							"valid range iterator without a descriptor".to_string(),
						));
					}
				};

				if first_range {
					first_range = false;
					if iter.need_another(&remaining) {
						// A batch that could be a transaction may only span
						// ranges with a transaction record or inconsistent
						// reads.
						let consistent =
							batch.header.read_consistency == ReadConsistency::Consistent;
						if batch.header.txn.is_none()
							&& batch.is_possible_transaction() && consistent
						{
							return Err(Error::RequiresTransaction);
						}
						if batch.ends_in_end_txn() {
							return Err(Error::No1PCTransaction);
						}
					}
				}

				// One sequence number per addressed range, not per RPC
				// attempt.
				batch.header.sequence += 1;

				let covers = match direction {
					ScanDirection::Ascending => desc.span.end >= remaining.end,
					ScanDirection::Descending => desc.span.start <= remaining.start,
				};
				// The next span is derived from the current descriptor's
				// own boundary. A stale next descriptor after a merge could
				// otherwise rewind into this range and scan keys twice.
				let next_span = match direction {
					ScanDirection::Ascending => KeySpan {
						start: desc.span.end.clone(),
						end: remaining.end.clone(),
					},
					ScanDirection::Descending => KeySpan {
						start: remaining.start.clone(),
						end: desc.span.start.clone(),
					},
				};
				let last = covers || next_span.is_empty();
				let limited = batch.header.max_span_request_keys > 0;

				let async_eligible = !limited && !last;
				let dispatched_async = async_eligible
					&& self.send_partial_batch_async(batch, &remaining, &desc, &token, &mut pending);

				if !dispatched_async {
					let result =
						self.send_partial_batch(batch, &remaining, desc.clone(), token).await;
					let failed = result.reply.is_err();
					if let Ok(reply) = &result.reply {
						if let (Some(txn), Some(batch_txn)) =
							(&reply.header.txn, &mut batch.header.txn)
						{
							batch_txn.update(txn);
						}
						if limited {
							let taken = reply.count_keys();
							let budget = batch.header.max_span_request_keys;
							batch.header.max_span_request_keys =
								budget.saturating_sub(taken);
							if batch.header.max_span_request_keys == 0 {
								// Requests past this range are skipped;
								// their resume spans are filled in below.
								could_skip = true;
								stopped_at = Some(match direction {
									ScanDirection::Ascending => {
										desc.span.end.clone()
									}
									ScanDirection::Descending => {
										desc.span.start.clone()
									}
								});
								pending.push(PendingPartial::Ready(result));
								break;
							}
						}
					}
					pending.push(PendingPartial::Ready(result));
					if failed {
						break;
					}
				}

				if last {
					break;
				}
				remaining = next_span;
				seek_key = match direction {
					ScanDirection::Ascending => desc.span.end.clone(),
					ScanDirection::Descending => desc.span.start.clone(),
				};
			}

			self.combine_partials(batch, pending, could_skip, stopped_at, direction).await
		}
		.boxed()
	}

	/// Dispatches one range's sub-batch on a spawned task when a permit is
	/// available. The batch is snapshotted before handoff so concurrent
	/// siblings cannot observe each other's transaction mutations.
	fn send_partial_batch_async(
		&self,
		batch: &BatchRequest,
		span: &KeySpan,
		desc: &std::sync::Arc<RangeDescriptor>,
		token: &EvictionToken,
		pending: &mut Vec<PendingPartial>,
	) -> bool {
		debug_assert_eq!(batch.header.max_span_request_keys, 0, "async dispatch under a key limit");

		let (tx, rx) = oneshot::channel();
		let sender = self.clone();
		let snapshot = batch.clone();
		let span = span.clone();
		let desc = std::sync::Arc::clone(desc);
		let token = token.clone();

		let spawned = self.inner.stopper.run_limited_async(&self.inner.async_sem, async move {
			let result = sender.send_partial_batch(&snapshot, &span, desc, token).await;
			let _ = tx.send(result);
		});
		if spawned {
			DistSenderMetrics::inc(&self.inner.metrics.async_sends);
			pending.push(PendingPartial::Channel(rx));
		} else {
			trace!("no permit for parallel sub-batch; sending synchronously");
			DistSenderMetrics::inc(&self.inner.metrics.async_throttled);
		}
		spawned
	}

	/// Drains dispatched sub-batches in dispatch order, which equals range
	/// order along the span, and assembles the positional response vector.
	/// The first error wins; later results are still consumed.
	async fn combine_partials(
		&self,
		batch: &BatchRequest,
		pending: Vec<PendingPartial>,
		could_skip: bool,
		stopped_at: Option<Key>,
		direction: ScanDirection,
	) -> Result<BatchResponse> {
		let mut first_err: Option<Error> = None;
		let mut header = BatchResponseHeader::default();
		let mut slots: Vec<Option<Response>> = Vec::new();
		slots.resize_with(batch.requests.len(), || None);

		for entry in pending {
			let result = match entry {
				PendingPartial::Ready(result) => result,
				PendingPartial::Channel(rx) => rx.await.unwrap_or_else(|_| PartialResult {
					positions: Vec::new(),
					reply: Err(Error::Internal(
						"async sub-batch dropped its response channel".to_string(),
					)),
				}),
			};
			match result.reply {
				Ok(reply) => {
					if first_err.is_some() {
						continue;
					}
					if reply.responses.len() != result.positions.len() {
						first_err = Some(Error::Internal(format!(
							"sub-batch returned {} responses for {} positions",
							reply.responses.len(),
							result.positions.len()
						)));
						continue;
					}
					header = reply.header;
					for (resp, pos) in
						reply.responses.into_iter().zip(result.positions)
					{
						match &mut slots[pos] {
							None => slots[pos] = Some(resp),
							Some(existing) => {
								if let Err(err) = existing.combine(resp) {
									first_err = Some(err);
									break;
								}
							}
						}
					}
				}
				Err(err) => {
					if first_err.is_none() {
						first_err = Some(err);
					}
				}
			}
		}

		if let Some(err) = first_err {
			return Err(err);
		}

		if could_skip {
			if let Some(stopped_at) = stopped_at {
				fill_skipped_responses(batch, &mut slots, &stopped_at, direction);
			}
		}

		let mut responses = Vec::with_capacity(slots.len());
		for (i, slot) in slots.into_iter().enumerate() {
			match slot {
				Some(resp) => responses.push(resp),
				None => {
					let req = &batch.requests[i];
					// Requests addressing no keys are dropped by
					// truncation and never reach a range; they are
					// answered trivially here.
					if req.span().is_none() {
						responses.push(Response::empty_for(req));
						continue;
					}
					return Err(Error::Internal(format!(
						"no response assembled for request {i} ({})",
						req.name()
					)));
				}
			}
		}
		Ok(BatchResponse {
			header,
			responses,
		})
	}
}

/// Fills the slots of requests that were never dispatched because the key
/// limit ran out, and extends resume spans to cover the unprocessed remainder
/// of every request, respecting direction.
fn fill_skipped_responses(
	batch: &BatchRequest,
	slots: &mut [Option<Response>],
	stopped_at: &Key,
	direction: ScanDirection,
) {
	for (i, req) in batch.requests.iter().enumerate() {
		let Some(req_span) = req.span() else {
			if slots[i].is_none() {
				slots[i] = Some(Response::Noop);
			}
			continue;
		};
		let remainder = match direction {
			ScanDirection::Ascending => KeySpan {
				start: req_span.start.clone().max(stopped_at.clone()),
				end: req_span.end.clone(),
			},
			ScanDirection::Descending => KeySpan {
				start: req_span.start.clone(),
				end: req_span.end.clone().min(stopped_at.clone()),
			},
		};
		let resume = (!remainder.is_empty()).then_some(remainder);

		match &mut slots[i] {
			None => {
				let mut resp = Response::empty_for(req);
				if let Some(hdr) = resp.header_mut() {
					hdr.resume_span = resume;
				}
				slots[i] = Some(resp);
			}
			Some(resp) => {
				let Some(resume) = resume else {
					continue;
				};
				if let Some(hdr) = resp.header_mut() {
					match &mut hdr.resume_span {
						Some(existing) => existing.union_with(&resume),
						None => hdr.resume_span = Some(resume),
					}
				}
			}
		}
	}
}
