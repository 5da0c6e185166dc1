//! # kerberized-hdfs-harness
//!
//! Test harness for a database node that stores tables on a Kerberos-secured
//! HDFS service. See [`harness`] for the lifecycle manager, oracle client,
//! query facade, and the scenario suite.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kerberized_hdfs_harness::harness::{
//!     suite, with_cluster, ClusterConfig, ScenarioContext, SimulatedCluster,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClusterConfig::default();
//!     let backend = Arc::new(SimulatedCluster::new(&config));
//!     let ctx = ScenarioContext::from_config(&config);
//!
//!     let report = with_cluster(backend, &config, |cluster| async move {
//!         suite::run_suite(&cluster, &ctx, &[]).await
//!     })
//!     .await?;
//!     assert!(report.all_passed());
//!     Ok(())
//! }
//! ```

pub mod harness;
