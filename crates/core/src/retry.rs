// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Jittered exponential backoff for retry loops.

use std::time::Duration;

use rand::RngExt;
use tokio::sync::watch;

/// Backoff envelope for a retry loop.
#[derive(Clone, Debug)]
pub struct RetryOptions {
	pub init_backoff: Duration,
	pub max_backoff: Duration,
	pub multiplier: f64,
	/// Maximum number of retries after the first attempt; 0 means
	/// unbounded.
	pub max_retries: usize,
	/// When the closer observes shutdown, `next` returns false instead of
	/// backing off.
	pub closer: Option<watch::Receiver<bool>>,
}

impl Default for RetryOptions {
	fn default() -> Self {
		RetryOptions {
			init_backoff: Duration::from_millis(50),
			max_backoff: Duration::from_secs(5),
			multiplier: 2.0,
			max_retries: 0,
			closer: None,
		}
	}
}

impl RetryOptions {
	pub fn with_closer(mut self, closer: watch::Receiver<bool>) -> Self {
		self.closer = Some(closer);
		self
	}
}

/// Retry loop driver.
///
/// ```ignore
/// let mut retry = Retry::start(opts);
/// while retry.next().await {
/// 	// attempt
/// }
/// ```
///
/// The first call to `next` returns immediately; every subsequent call sleeps
/// the jittered backoff for the attempt or returns false when the attempt
/// budget is exhausted or the closer fired.
pub struct Retry {
	opts: RetryOptions,
	attempt: usize,
}

impl Retry {
	pub fn start(opts: RetryOptions) -> Self {
		Retry {
			opts,
			attempt: 0,
		}
	}

	pub fn current_attempt(&self) -> usize {
		self.attempt
	}

	pub fn reset(&mut self) {
		self.attempt = 0;
	}

	/// Whether the loop stopped because shutdown was observed.
	pub fn closed(&self) -> bool {
		self.opts.closer.as_ref().is_some_and(|c| *c.borrow())
	}

	pub async fn next(&mut self) -> bool {
		if self.closed() {
			return false;
		}
		if self.attempt == 0 {
			self.attempt = 1;
			return true;
		}
		if self.opts.max_retries > 0 && self.attempt > self.opts.max_retries {
			return false;
		}

		let backoff = self.backoff_for(self.attempt);
		self.attempt += 1;

		match &mut self.opts.closer {
			Some(closer) => {
				tokio::select! {
					_ = tokio::time::sleep(backoff) => true,
					_ = closer.changed() => !*closer.borrow(),
				}
			}
			None => {
				tokio::time::sleep(backoff).await;
				true
			}
		}
	}

	fn backoff_for(&self, attempt: usize) -> Duration {
		let exp = (attempt - 1).min(62) as i32;
		let raw = self.opts.init_backoff.as_secs_f64() * self.opts.multiplier.powi(exp);
		let capped = raw.min(self.opts.max_backoff.as_secs_f64());
		let jittered = capped * rand::rng().random_range(0.5..1.5);
		Duration::from_secs_f64(jittered.min(self.opts.max_backoff.as_secs_f64()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn fast_opts() -> RetryOptions {
		RetryOptions {
			init_backoff: Duration::from_millis(1),
			max_backoff: Duration::from_millis(4),
			multiplier: 2.0,
			max_retries: 0,
			closer: None,
		}
	}

	#[tokio::test]
	async fn test_first_attempt_is_immediate() {
		let mut retry = Retry::start(fast_opts());
		let start = std::time::Instant::now();
		assert!(retry.next().await);
		assert!(start.elapsed() < Duration::from_millis(50));
	}

	#[tokio::test]
	async fn test_max_retries_bounds_attempts() {
		let mut opts = fast_opts();
		opts.max_retries = 2;
		let mut retry = Retry::start(opts);
		let mut attempts = 0;
		while retry.next().await {
			attempts += 1;
		}
		// One initial attempt plus two retries.
		assert_eq!(attempts, 3);
	}

	#[tokio::test]
	async fn test_closer_stops_the_loop() {
		let (tx, rx) = watch::channel(false);
		let mut opts = fast_opts();
		opts.init_backoff = Duration::from_secs(60);
		opts.closer = Some(rx);

		let mut retry = Retry::start(opts);
		assert!(retry.next().await);

		tx.send(true).unwrap();
		// The pending backoff is interrupted rather than slept out.
		let start = std::time::Instant::now();
		assert!(!retry.next().await);
		assert!(start.elapsed() < Duration::from_secs(1));
		assert!(retry.closed());
	}

	#[tokio::test]
	async fn test_backoff_is_capped() {
		let retry = Retry::start(fast_opts());
		for attempt in 1..20 {
			assert!(retry.backoff_for(attempt) <= Duration::from_millis(4));
		}
	}
}
