// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Sending one range's share of a batch, with retry on addressing failures.

use std::sync::Arc;

use rangedb_core::{
	Error, KeySpan,
	batch::{BatchRequest, BatchResponse},
	descriptor::RangeDescriptor,
	retry::Retry,
};
use tracing::{debug, instrument, trace, warn};

use crate::{
	cache::EvictionToken,
	metrics::DistSenderMetrics,
	sender::{DistSender, PartialResult},
	truncate::truncate,
};

/// Consecutive retries allowed to come back with an identical descriptor
/// before the loop gives up. Guards against busy-looping on a meta index that
/// keeps serving the same dead range.
const MAX_SAME_DESCRIPTOR_RETRIES: usize = 8;

impl DistSender {
	/// Truncates `batch` to the intersection of `span` and the range owned
	/// by `desc`, then sends it, retrying through descriptor eviction and
	/// re-lookup until the range is reached, the routing state is found
	/// stale (recursing into the router), or shutdown.
	///
	/// The returned positions index into `batch`; the reply's responses
	/// align with them.
	#[instrument(name = "sender::partial", level = "trace", skip_all, fields(range = %desc))]
	pub(crate) async fn send_partial_batch(
		&self,
		batch: &BatchRequest,
		span: &KeySpan,
		desc: Arc<RangeDescriptor>,
		token: EvictionToken,
	) -> PartialResult {
		DistSenderMetrics::inc(&self.inner.metrics.partial_batches);

		let reverse = batch.is_reverse();
		let Some(intersection) = span.intersect(&desc.span) else {
			return PartialResult {
				positions: Vec::new(),
				reply: Err(Error::Internal(format!("span {span} does not meet {desc}"))),
			};
		};
		let (requests, positions) = truncate(batch, &intersection);
		if requests.is_empty() {
			return PartialResult {
				positions,
				reply: Ok(BatchResponse::default()),
			};
		}
		let mut sub_batch = BatchRequest {
			header: batch.header.clone(),
			requests,
		};

		let mut holder = Some((desc, token));
		let mut prev_token: Option<EvictionToken> = None;
		let mut same_descriptor_retries = 0usize;
		let mut last_send_err: Option<Error> = None;

		let mut retry = Retry::start(self.retry_options());
		while retry.next().await {
			if holder.is_none() {
				// The descriptor was evicted on the previous pass;
				// resolve the range again from the leading edge of the
				// span in the direction of travel.
				let seek = if reverse {
					intersection.end.clone()
				} else {
					intersection.start.clone()
				};
				match self.inner.range_cache.lookup(&seek, prev_token.as_ref(), reverse).await {
					Ok((desc, token)) => {
						if prev_token
							.as_ref()
							.is_some_and(|p| p.descriptor().same_span(&desc))
						{
							same_descriptor_retries += 1;
							if same_descriptor_retries >= MAX_SAME_DESCRIPTOR_RETRIES {
								warn!(
									range = %desc,
									"descriptor unchanged after repeated evictions; giving up"
								);
								break;
							}
						} else {
							same_descriptor_retries = 0;
						}
						holder = Some((desc, token));
					}
					Err(err) if matches!(
						err,
						Error::SendError { .. } | Error::RangeNotFound(_) | Error::Rpc { .. }
					) =>
					{
						debug!(%err, "transient failure resolving range; backing off");
						continue;
					}
					Err(err) => {
						return PartialResult {
							positions,
							reply: Err(err),
						};
					}
				}
			}
			let Some((desc, token)) = holder.clone() else {
				continue;
			};

			match self.send_to_replicas(&sub_batch, &desc).await {
				Ok(reply) => {
					return PartialResult {
						positions,
						reply: Ok(reply),
					};
				}
				Err(err @ (Error::SendError { .. } | Error::RangeNotFound(_))) => {
					// Every replica failed: the descriptor may list dead
					// replicas. Evict it and resolve the range afresh.
					debug!(%err, range = %desc, "all replicas failed; evicting descriptor");
					token.evict();
					last_send_err = Some(err);
					prev_token = Some(token);
					holder = None;
				}
				Err(Error::RangeKeyMismatch {
					ref mismatched,
					ref suggested,
					..
				}) => {
					// The range no longer owns the addressed keys, most
					// likely because it split. Replace the stale state and
					// let the router re-divide the truncated batch.
					let mut replacements = Vec::new();
					if !mismatched.same_span(&desc) {
						replacements.push((**mismatched).clone());
					}
					if let Some(suggested) = suggested {
						let fronts = if reverse {
							suggested.contains_key_inverted(&intersection.end)
						} else {
							suggested.contains_key(&intersection.start)
						};
						if !suggested.same_span(&desc) && fronts {
							replacements.push((**suggested).clone());
						}
					}
					trace!(range = %desc, replacements = replacements.len(), "stale descriptor");
					token.evict_and_replace(replacements);

					let reply =
						self.divide_and_send(&mut sub_batch, intersection.clone()).await;
					return PartialResult {
						positions,
						reply,
					};
				}
				Err(err) => {
					// Replica-level and addressing errors were handled
					// below this layer; anything else belongs to the
					// caller.
					return PartialResult {
						positions,
						reply: Err(err),
					};
				}
			}
		}

		let reply = if retry.closed() {
			debug!("shutdown during partial-batch retry loop");
			Err(Error::NodeUnavailable)
		} else {
			Err(last_send_err.unwrap_or_else(|| Error::SendError {
				message: "partial batch retry budget exhausted".to_string(),
			}))
		};
		PartialResult {
			positions,
			reply,
		}
	}
}
