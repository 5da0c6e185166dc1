//! Shared helpers for integration tests

#![allow(dead_code)]

use kerberized_hdfs_harness::harness::cluster::ClusterHandle;
use kerberized_hdfs_harness::harness::config::ClusterConfig;
use kerberized_hdfs_harness::harness::sim::SimulatedCluster;
use std::sync::Arc;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Start a simulated cluster, keeping a typed handle on the backend
pub async fn start_sim(config: &ClusterConfig) -> (Arc<SimulatedCluster>, ClusterHandle) {
    init_logging();
    let sim = Arc::new(SimulatedCluster::new(config));
    let cluster = ClusterHandle::start(sim.clone(), config)
        .await
        .expect("simulated cluster should start");
    (sim, cluster)
}

pub const TABLE_FUNCTION_COLUMNS: &str = "id UInt32, name String, weight Float64";
