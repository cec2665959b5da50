// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Hybrid-logical clock.
//!
//! Timestamps combine a physical wall-clock component with a logical counter
//! that breaks ties within one wall tick. Observing a remote timestamp ratchets
//! the local clock forward so causally related events never appear reordered.

use std::{
	fmt::{self, Display, Formatter},
	time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize)]
pub struct Timestamp {
	/// Nanoseconds since the unix epoch.
	pub wall: i64,
	pub logical: u32,
}

impl Timestamp {
	pub const ZERO: Timestamp = Timestamp {
		wall: 0,
		logical: 0,
	};

	pub fn new(wall: i64, logical: u32) -> Self {
		Timestamp {
			wall,
			logical,
		}
	}

	pub fn is_zero(&self) -> bool {
		self.wall == 0 && self.logical == 0
	}
}

impl Display for Timestamp {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{:09},{}", self.wall / 1_000_000_000, self.wall % 1_000_000_000, self.logical)
	}
}

/// Physical time source. Swappable so tests can drive the clock manually.
pub trait WallClock: Send + Sync {
	fn now_nanos(&self) -> i64;
}

/// The system wall clock.
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
	fn now_nanos(&self) -> i64 {
		SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as i64).unwrap_or(0)
	}
}

/// A hybrid-logical clock.
///
/// `now` never returns the same timestamp twice and never goes backwards,
/// even when the physical clock does. `update` folds in a timestamp observed
/// from a remote node.
pub struct Clock {
	wall: Box<dyn WallClock>,
	state: Mutex<Timestamp>,
}

impl Clock {
	pub fn system() -> Self {
		Self::new(Box::new(SystemWallClock))
	}

	pub fn new(wall: Box<dyn WallClock>) -> Self {
		Clock {
			wall,
			state: Mutex::new(Timestamp::ZERO),
		}
	}

	pub fn now(&self) -> Timestamp {
		let physical = self.wall.now_nanos();
		let mut state = self.state.lock();
		if physical > state.wall {
			*state = Timestamp::new(physical, 0);
		} else {
			state.logical += 1;
		}
		*state
	}

	/// Ratchets the clock forward to at least `observed`.
	pub fn update(&self, observed: Timestamp) {
		if observed.is_zero() {
			return;
		}
		let mut state = self.state.lock();
		if observed > *state {
			*state = observed;
		}
	}
}
