// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Cursor over the ranges covering a key span.

use std::sync::Arc;

use rangedb_core::{Error, Key, KeySpan, descriptor::RangeDescriptor};

use crate::cache::{EvictionToken, RangeDescriptorCache};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ScanDirection {
	Ascending,
	Descending,
}

/// Walks the sequence of ranges covering a span, forward or backward.
///
/// Each `seek` resolves one descriptor through the cache; a failed seek
/// leaves the iterator invalid with the error held until the next seek.
pub struct RangeIterator {
	cache: RangeDescriptorCache,
	direction: ScanDirection,
	desc: Option<Arc<RangeDescriptor>>,
	token: Option<EvictionToken>,
	err: Option<Error>,
}

impl RangeIterator {
	pub fn new(cache: RangeDescriptorCache, direction: ScanDirection) -> Self {
		RangeIterator {
			cache,
			direction,
			desc: None,
			token: None,
			err: None,
		}
	}

	pub fn direction(&self) -> ScanDirection {
		self.direction
	}

	pub fn valid(&self) -> bool {
		self.err.is_none() && self.desc.is_some()
	}

	pub fn desc(&self) -> Option<&Arc<RangeDescriptor>> {
		self.desc.as_ref()
	}

	pub fn token(&self) -> Option<&EvictionToken> {
		self.token.as_ref()
	}

	pub fn error(&self) -> Option<&Error> {
		self.err.as_ref()
	}

	/// Consumes the sticky error, for propagation after `valid` turned
	/// false.
	pub fn take_error(&mut self) -> Error {
		self.err.take().unwrap_or_else(|| Error::Internal("range iterator is not positioned".to_string()))
	}

	/// Whether the current descriptor falls short of covering `span` in
	/// the direction of travel.
	pub fn need_another(&self, span: &KeySpan) -> bool {
		match (&self.desc, self.direction) {
			(Some(desc), ScanDirection::Ascending) => desc.span.end < span.end,
			(Some(desc), ScanDirection::Descending) => desc.span.start > span.start,
			(None, _) => false,
		}
	}

	/// Positions the iterator at the range owning `key`: the range
	/// containing it when ascending, the range whose span ends at it when
	/// descending.
	pub async fn seek(&mut self, key: &Key) {
		self.err = None;
		self.desc = None;
		self.token = None;

		let reverse = self.direction == ScanDirection::Descending;
		match self.cache.lookup(key, None, reverse).await {
			Ok((desc, token)) => {
				self.desc = Some(desc);
				self.token = Some(token);
			}
			Err(err) => {
				self.err = Some(err);
			}
		}
	}

	/// Advances past the current descriptor in the direction of travel.
	pub async fn next(&mut self) {
		let Some(desc) = &self.desc else {
			self.err = Some(Error::Internal("next on unpositioned range iterator".to_string()));
			return;
		};
		let key = match self.direction {
			ScanDirection::Ascending => desc.span.end.clone(),
			ScanDirection::Descending => desc.span.start.clone(),
		};
		self.seek(&key).await;
	}
}
