// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! In-memory collaborators for exercising the RangeDB router without a
//! cluster: programmable topology, scripted transports, settable gossip and a
//! fake store, plus a [`MockCluster`] wiring them together.

pub use cluster::{MockCluster, range_server, scanned_rows, seed_rows};
pub use gossip::MockGossip;
pub use store::{FakeStore, ScanPage};
pub use topology::{MockRangeDb, node, range_desc, replica};
pub use transport::{Handler, MockTransport, MockTransportFactory, SendRecord};

pub mod cluster;
pub mod gossip;
pub mod store;
pub mod topology;
pub mod transport;
