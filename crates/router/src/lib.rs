// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Distributed request routing for RangeDB.
//!
//! The routing tier resolves keys to ranges through a coherent descriptor
//! cache, splits batches along range boundaries, picks replicas by locality
//! and lease-holder hints, and recombines partial responses while retrying
//! around stale metadata and replica failures.

pub use cache::{EvictionToken, LeaseHolderCache, RangeDescriptorCache, RangeDescriptorDB, RangeLookupResult};
pub use gossip::{FirstRangeCallback, Gossip};
pub use iter::{RangeIterator, ScanDirection};
pub use metrics::DistSenderMetrics;
pub use replica::{ReplicaInfo, ReplicaSet};
pub use sender::{DistSender, DistSenderConfig};
pub use transport::{RpcReply, SendOptions, Transport, TransportFactory};

pub mod cache;
pub mod gossip;
pub mod iter;
pub mod metrics;
pub mod replica;
pub mod sender;
pub mod transport;
pub mod truncate;

pub type Result<T> = std::result::Result<T, rangedb_core::Error>;
