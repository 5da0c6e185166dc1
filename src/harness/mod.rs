//! Kerberized HDFS Cluster Harness
//!
//! Drives a three-container topology (KDC, kerberized HDFS, database node)
//! through scenarios that exercise Kerberos-authenticated reads and writes:
//! - Lifecycle management with pause/unpause fault injection
//! - An oracle client that reads and writes HDFS directly
//! - A query facade that preserves raw engine diagnostics
//! - Ticket expiry on an injectable clock
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Harness Flow                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  1. Load ClusterConfig (YAML + KDFS_* overrides)                │
//! │  2. Boot KDC → HDFS (bootstrap) → node, wait for the node       │
//! │  3. For each scenario:                                          │
//! │     SETUP → ACT → VERIFY → [FAULT_INJECT → REVERIFY] → TEARDOWN │
//! │  4. Shut the cluster down exactly once                          │
//! │  5. Generate report                                             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! # Run every scenario on the in-process topology
//! kdfs-test run
//!
//! # Run one scenario against Docker containers
//! kdfs-test run --backend docker --scenario prohibited
//!
//! # Print the default configuration
//! kdfs-test config > cluster.yaml
//! ```

pub mod assertions;
pub mod cli;
pub mod clock;
pub mod cluster;
pub mod config;
#[cfg(feature = "test-support")]
pub mod docker;
pub mod engine;
pub mod error;
pub mod hdfs;
pub mod report;
pub mod scenario;
pub mod sim;
pub mod suite;
pub mod uri;

// Re-export main types for convenience
pub use assertions::{AssertionResult, ErrorExpectation};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use cluster::{with_cluster, ClusterBackend, ClusterHandle, ContainerState};
pub use config::{BackendKind, ClusterConfig};
pub use engine::{QueryEngine, QueryNode};
pub use error::{EngineErrorKind, ErrorKind, HarnessError, HarnessResult};
pub use hdfs::{DataEndpoint, HdfsOracle};
pub use report::{OutputFormat, ScenarioReport, SuiteReport};
pub use scenario::{FaultInjection, Phase, Scenario, ScenarioContext};
pub use sim::SimulatedCluster;
pub use uri::StorageUri;
