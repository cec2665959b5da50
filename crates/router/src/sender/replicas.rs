// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Trying the replicas of one range in preference order.

use std::{
	cell::Cell,
	ops::{Deref, DerefMut},
	sync::atomic::Ordering,
};

use rangedb_core::{
	Error, Result,
	batch::{BatchRequest, BatchResponse, ReadConsistency},
	descriptor::RangeDescriptor,
};
use tracing::{debug, instrument, warn};

use crate::{
	metrics::DistSenderMetrics,
	replica::ReplicaSet,
	sender::DistSender,
	transport::{SendOptions, Transport},
};

/// Closes the transport on every exit path, however far it got.
struct TransportGuard {
	transport: Box<dyn Transport>,
}

impl Deref for TransportGuard {
	type Target = Box<dyn Transport>;

	fn deref(&self) -> &Self::Target {
		&self.transport
	}
}

impl DerefMut for TransportGuard {
	fn deref_mut(&mut self) -> &mut Self::Target {
		&mut self.transport
	}
}

impl Drop for TransportGuard {
	fn drop(&mut self) {
		self.transport.close();
	}
}

/// Pairs the slow-request gauge increment with a decrement on the same exit
/// path.
struct SlowGuard<'a> {
	metrics: &'a DistSenderMetrics,
	armed: Cell<bool>,
}

impl<'a> SlowGuard<'a> {
	fn new(metrics: &'a DistSenderMetrics) -> Self {
		SlowGuard {
			metrics,
			armed: Cell::new(false),
		}
	}

	fn armed(&self) -> bool {
		self.armed.get()
	}

	fn arm(&self) {
		if !self.armed.replace(true) {
			self.metrics.slow_requests.fetch_add(1, Ordering::Relaxed);
		}
	}
}

impl Drop for SlowGuard<'_> {
	fn drop(&mut self) {
		if self.armed.get() {
			self.metrics.slow_requests.fetch_sub(1, Ordering::Relaxed);
		}
	}
}

impl DistSender {
	/// Sends `batch` to the replicas of `desc` in preference order until
	/// one produces a usable reply.
	///
	/// Replica-local failures advance to the next candidate; lease-holder
	/// redirects re-order the queue; everything else propagates. When a
	/// committing batch hit a transport failure that may have reached the
	/// server, the result is reported ambiguous rather than retried into a
	/// double-apply or misreported as failed.
	#[instrument(name = "sender::replicas", level = "trace", skip_all, fields(range = %desc))]
	pub(crate) async fn send_to_replicas(
		&self,
		batch: &BatchRequest,
		desc: &RangeDescriptor,
	) -> Result<BatchResponse> {
		let mut replicas = ReplicaSet::from_descriptor(self.inner.gossip.as_ref(), desc);
		if replicas.is_empty() {
			return Err(Error::SendError {
				message: format!("no replicas of {desc} are resolvable through gossip"),
			});
		}

		let local = self.node_descriptor();
		replicas.optimize_order(local.as_ref());

		// The lease-holder hint jumps the queue except for reads any
		// replica may serve.
		let any_replica_serves =
			batch.is_read_only() && batch.header.read_consistency == ReadConsistency::Inconsistent;
		if !any_replica_serves {
			if let Some(hint) = self.inner.leaseholders.lookup(desc.range_id) {
				if let Some(idx) = replicas.find_store(hint.store_id) {
					replicas.move_to_front(idx);
				}
			}
		}

		let have_commit = batch.contains_commit();
		let replica_count = replicas.len();
		let opts = SendOptions {
			timestamp: self.inner.clock.now(),
			timeout: None,
		};
		let mut addressed = batch.clone();
		addressed.header.range_id = desc.range_id;
		let mut transport = TransportGuard {
			transport: self.inner.transport.create(opts, replicas, addressed)?,
		};

		let mut ambiguous: Option<String> = None;
		let mut informative: Option<Error> = None;
		let slow = SlowGuard::new(&self.inner.metrics);
		let slow_timer = tokio::time::sleep(self.inner.slow_request_threshold);
		tokio::pin!(slow_timer);

		while !transport.is_exhausted() {
			DistSenderMetrics::inc(&self.inner.metrics.rpc_sent);
			if let (Some(local), Some(target)) = (&local, transport.next_replica()) {
				if local.node_id == target.node_id {
					DistSenderMetrics::inc(&self.inner.metrics.local_rpc_sent);
				}
			}

			let attempt = {
				let mut fut = transport.send_next();
				loop {
					tokio::select! {
						reply = &mut fut => break reply,
						_ = &mut slow_timer, if !slow.armed() => {
							slow.arm();
							warn!(batch = %batch.summary(), range = %desc, "request is slow");
						}
					}
				}
			};

			match attempt.reply {
				Ok(reply) => {
					// The replica's clock reading feeds the local clock
					// before the response escapes.
					self.inner.clock.update(reply.header.now);
					return Ok(reply);
				}
				Err(Error::Rpc {
					message,
					fail_fast,
				}) => {
					if have_commit && !fail_fast {
						// The commit may have applied before the
						// connection died.
						ambiguous = Some(message.clone());
					}
					DistSenderMetrics::inc(&self.inner.metrics.next_replica_errors);
					debug!(replica = %attempt.replica, %message, "transport error; next replica");
				}
				Err(err) if err.is_replica_local() => {
					DistSenderMetrics::inc(&self.inner.metrics.next_replica_errors);
					debug!(replica = %attempt.replica, %err, "replica unavailable; next replica");
					if !matches!(informative, Some(Error::NotLeaseHolder { .. })) {
						informative = Some(err);
					}
				}
				Err(Error::NotLeaseHolder {
					replica,
					range_id,
					lease_holder,
				}) => {
					DistSenderMetrics::inc(&self.inner.metrics.not_leaseholder_errors);
					match lease_holder {
						Some(hint) => {
							self.inner.leaseholders.update(range_id, hint);
							if transport.move_to_front(&hint) {
								DistSenderMetrics::inc(
									&self.inner.metrics.next_replica_errors,
								);
								debug!(replica = %replica, %hint, "redirected to lease holder");
								informative = Some(Error::NotLeaseHolder {
									replica,
									range_id,
									lease_holder: Some(hint),
								});
							} else {
								// The lease holder is outside our replica
								// set: the descriptor is stale. Surface it
								// as an addressing error so the layer above
								// evicts and re-resolves.
								let err = Error::RangeNotFound(range_id);
								return match ambiguous {
									Some(message) => {
										Err(Error::AmbiguousResult(message))
									}
									None => Err(err),
								};
							}
						}
						None => {
							self.inner.leaseholders.invalidate(range_id);
							DistSenderMetrics::inc(&self.inner.metrics.next_replica_errors);
							informative = Some(Error::NotLeaseHolder {
								replica,
								range_id,
								lease_holder: None,
							});
						}
					}
				}
				Err(err) => {
					// An application error belongs to the caller, unless
					// an earlier transport failure made a commit outcome
					// unknowable.
					return match ambiguous {
						Some(message) => Err(Error::AmbiguousResult(message)),
						None => Err(err),
					};
				}
			}
		}

		if let Some(message) = ambiguous {
			return Err(Error::AmbiguousResult(message));
		}
		let detail = match informative {
			Some(err) => err.to_string(),
			None => "no replica returned a response".to_string(),
		};
		Err(Error::SendError {
			message: format!("sending to all {replica_count} replicas failed; last error: {detail}"),
		})
	}
}
