// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Shutdown coordination and bounded async task dispatch.

use std::{future::Future, sync::Arc};

use tokio::sync::{Semaphore, watch};

/// Coordinates graceful shutdown and limits the number of concurrently
/// spawned router tasks.
///
/// Retry loops hold a [`watch::Receiver`] closer derived from the stopper;
/// once `stop` is called they exit promptly instead of backing off.
pub struct Stopper {
	quiesce_tx: watch::Sender<bool>,
	// Kept so the channel stays open while no task is watching.
	quiesce_rx: watch::Receiver<bool>,
}

impl Default for Stopper {
	fn default() -> Self {
		Self::new()
	}
}

impl Stopper {
	pub fn new() -> Self {
		let (quiesce_tx, quiesce_rx) = watch::channel(false);
		Stopper {
			quiesce_tx,
			quiesce_rx,
		}
	}

	/// A receiver that flips to true when shutdown begins.
	pub fn should_quiesce(&self) -> watch::Receiver<bool> {
		self.quiesce_rx.clone()
	}

	pub fn is_quiescing(&self) -> bool {
		*self.quiesce_rx.borrow()
	}

	pub fn stop(&self) {
		let _ = self.quiesce_tx.send(true);
	}

	/// Spawns `fut` iff a permit is immediately available from `sem` and
	/// shutdown has not begun. Returns false without blocking otherwise;
	/// the caller is expected to fall back to running the work inline.
	pub fn run_limited_async<F>(&self, sem: &Arc<Semaphore>, fut: F) -> bool
	where
		F: Future<Output = ()> + Send + 'static,
	{
		if self.is_quiescing() {
			return false;
		}
		let Ok(permit) = Arc::clone(sem).try_acquire_owned() else {
			return false;
		};
		tokio::spawn(async move {
			let _permit = permit;
			fut.await;
		});
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_run_limited_async_respects_capacity() {
		let stopper = Stopper::new();
		let sem = Arc::new(Semaphore::new(1));
		let (tx, rx) = tokio::sync::oneshot::channel::<()>();

		// First task holds the only permit until released.
		assert!(stopper.run_limited_async(&sem, async move {
			let _ = rx.await;
		}));
		// No permit left: callers must fall back to sync.
		assert!(!stopper.run_limited_async(&sem, async {}));

		tx.send(()).unwrap();
	}

	#[tokio::test]
	async fn test_no_spawn_after_stop() {
		let stopper = Stopper::new();
		let sem = Arc::new(Semaphore::new(8));
		stopper.stop();
		assert!(stopper.is_quiescing());
		assert!(!stopper.run_limited_async(&sem, async {}));
	}

	#[tokio::test]
	async fn test_quiesce_receiver_observes_stop() {
		let stopper = Stopper::new();
		let mut rx = stopper.should_quiesce();
		assert!(!*rx.borrow());
		stopper.stop();
		rx.changed().await.unwrap();
		assert!(*rx.borrow());
	}
}
