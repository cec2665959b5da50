// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! In-memory key-value data backing the mock replicas.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use rangedb_core::{Key, KeySpan, batch::KeyValue};

#[derive(Default)]
pub struct FakeStore {
	data: Mutex<BTreeMap<Key, Vec<u8>>>,
}

/// One page of a scan: the rows, and where to resume when the limit cut the
/// scan short of `span`.
pub struct ScanPage {
	pub rows: Vec<KeyValue>,
	pub resume_span: Option<KeySpan>,
}

impl FakeStore {
	pub fn new() -> Self {
		FakeStore::default()
	}

	pub fn put(&self, key: impl Into<Key>, value: impl Into<Vec<u8>>) {
		self.data.lock().insert(key.into(), value.into());
	}

	pub fn get(&self, key: &Key) -> Option<Vec<u8>> {
		self.data.lock().get(key).cloned()
	}

	pub fn delete(&self, key: &Key) -> bool {
		self.data.lock().remove(key).is_some()
	}

	pub fn delete_range(&self, span: &KeySpan) -> u64 {
		let mut data = self.data.lock();
		let doomed: Vec<Key> =
			data.range(span.start.clone()..span.end.clone()).map(|(k, _)| k.clone()).collect();
		let count = doomed.len() as u64;
		for key in doomed {
			data.remove(&key);
		}
		count
	}

	/// Scans `span` ascending, stopping after `limit` rows (0 = unlimited).
	pub fn scan(&self, span: &KeySpan, limit: u64) -> ScanPage {
		let data = self.data.lock();
		let mut rows = Vec::new();
		let mut resume_span = None;
		for (key, value) in data.range(span.start.clone()..span.end.clone()) {
			if limit > 0 && rows.len() as u64 == limit {
				resume_span = Some(KeySpan {
					start: key.clone(),
					end: span.end.clone(),
				});
				break;
			}
			rows.push(KeyValue {
				key: key.clone(),
				value: value.clone(),
			});
		}
		ScanPage {
			rows,
			resume_span,
		}
	}

	/// Scans `span` descending, stopping after `limit` rows (0 = unlimited).
	pub fn reverse_scan(&self, span: &KeySpan, limit: u64) -> ScanPage {
		let data = self.data.lock();
		let mut rows = Vec::new();
		let mut resume_span = None;
		for (key, value) in data.range(span.start.clone()..span.end.clone()).rev() {
			if limit > 0 && rows.len() as u64 == limit {
				resume_span = Some(KeySpan {
					start: span.start.clone(),
					end: key.next(),
				});
				break;
			}
			rows.push(KeyValue {
				key: key.clone(),
				value: value.clone(),
			});
		}
		ScanPage {
			rows,
			resume_span,
		}
	}
}
