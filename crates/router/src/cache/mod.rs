// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Routing caches: range descriptors and lease-holder hints.

pub mod leaseholder;
pub mod range;

pub use leaseholder::LeaseHolderCache;
pub use range::{EvictionToken, RangeDescriptorCache, RangeDescriptorDB, RangeLookupResult};
