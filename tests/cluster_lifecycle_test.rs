//! Cluster lifecycle tests
//!
//! Covers startup ordering and failure cleanup, exactly-once teardown,
//! scoped acquisition, and pause/unpause on the simulated topology.

mod common;

use common::{init_logging, start_sim};
use futures::FutureExt;
use kerberized_hdfs_harness::harness::cluster::{with_cluster, ClusterHandle, ClusterState, ContainerState};
use kerberized_hdfs_harness::harness::config::ClusterConfig;
use kerberized_hdfs_harness::harness::error::{ErrorKind, HarnessError};
use kerberized_hdfs_harness::harness::sim::{SimulatedCluster, StartupFault};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

const KDC: &str = "hdfskerberos";
const HDFS: &str = "kerberizedhdfs1";
const NODE: &str = "node1";

#[tokio::test]
async fn test_startup_failure_stops_started_containers() {
    init_logging();
    let config = ClusterConfig::default();
    let sim = Arc::new(SimulatedCluster::new(&config).with_startup_fault(HDFS, StartupFault::Fail));

    let err = ClusterHandle::start(sim.clone(), &config)
        .await
        .err()
        .expect("startup should fail");
    match err {
        HarnessError::SetupFailure { ref container, .. } => assert_eq!(container, HDFS),
        other => panic!("expected SetupFailure, got {:?}", other),
    }

    assert_eq!(sim.stop_calls(KDC), 1);
    assert_eq!(sim.stop_calls(HDFS), 0);
    assert_eq!(sim.stop_calls(NODE), 0);
    assert!(!sim.kdc().is_reachable());
}

#[tokio::test]
async fn test_startup_timeout_names_the_hanging_container() {
    init_logging();
    let mut config = ClusterConfig::default();
    config.startup_timeout_secs = 1;
    let sim = Arc::new(SimulatedCluster::new(&config).with_startup_fault(NODE, StartupFault::Hang));

    let err = ClusterHandle::start(sim.clone(), &config)
        .await
        .err()
        .expect("startup should time out");
    assert_eq!(err.kind(), ErrorKind::SetupFailure);
    assert!(err.to_string().contains(NODE), "{}", err);
    assert!(err.to_string().contains("not healthy within 1s"), "{}", err);

    assert_eq!(sim.stop_calls(KDC), 1);
    assert_eq!(sim.stop_calls(HDFS), 1);
    assert_eq!(sim.stop_calls(NODE), 0);
}

#[tokio::test]
async fn test_invalid_config_rejected_before_boot() {
    init_logging();
    let mut config = ClusterConfig::default();
    config.expiry_wait_secs = config.ticket_lifetime_secs;
    let sim = Arc::new(SimulatedCluster::new(&config));

    let err = ClusterHandle::start(sim.clone(), &config)
        .await
        .err()
        .expect("validation should fail");
    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!(sim.stop_calls(KDC), 0);
}

#[tokio::test]
async fn test_shutdown_runs_exactly_once() {
    let config = ClusterConfig::default();
    let (sim, cluster) = start_sim(&config).await;
    assert_eq!(cluster.state(), ClusterState::Running);

    cluster.shutdown().await.unwrap();
    cluster.shutdown().await.unwrap();

    assert_eq!(cluster.state(), ClusterState::Stopped);
    for name in [KDC, HDFS, NODE] {
        assert_eq!(sim.stop_calls(name), 1, "{}", name);
        assert_eq!(cluster.container_state(name).unwrap(), ContainerState::Stopped);
    }
}

#[tokio::test]
async fn test_shutdown_resumes_paused_containers_first() {
    let config = ClusterConfig::default();
    let (sim, cluster) = start_sim(&config).await;

    cluster.pause_container(HDFS).await.unwrap();
    assert!(!sim.namenode().is_reachable());
    cluster.shutdown().await.unwrap();

    assert_eq!(sim.stop_calls(HDFS), 1);
    assert_eq!(cluster.container_state(HDFS).unwrap(), ContainerState::Stopped);
}

#[tokio::test]
async fn test_pause_and_unpause_are_idempotent() {
    let config = ClusterConfig::default();
    let (_sim, cluster) = start_sim(&config).await;

    let kdc = cluster.container(KDC).unwrap();
    kdc.pause().await.unwrap();
    kdc.pause().await.unwrap();
    assert_eq!(kdc.state().unwrap(), ContainerState::Paused);

    kdc.unpause().await.unwrap();
    kdc.unpause().await.unwrap();
    assert_eq!(kdc.state().unwrap(), ContainerState::Running);

    cluster.unpause_container(NODE).await.unwrap();
    assert_eq!(cluster.container_state(NODE).unwrap(), ContainerState::Running);

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_container_names() {
    let config = ClusterConfig::default();
    let (_sim, cluster) = start_sim(&config).await;

    for err in [
        cluster.pause_container("zookeeper").await.unwrap_err(),
        cluster.unpause_container("zookeeper").await.unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::UnknownContainer);
    }
    assert!(cluster.container("zookeeper").is_err());

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_container_control_after_shutdown_fails() {
    let config = ClusterConfig::default();
    let (_sim, cluster) = start_sim(&config).await;
    cluster.shutdown().await.unwrap();

    let err = cluster.pause_container(KDC).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[tokio::test]
async fn test_paused_node_query_times_out() {
    let mut config = ClusterConfig::default();
    config.query_timeout_ms = 200;
    let (_sim, cluster) = start_sim(&config).await;

    cluster.pause_container(NODE).await.unwrap();
    let err = cluster
        .node()
        .query("SELECT * FROM missing_table")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    cluster.unpause_container(NODE).await.unwrap();
    let err = cluster
        .node()
        .query("SELECT * FROM missing_table")
        .await
        .unwrap_err();
    assert!(err.detail().contains("doesn't exist"), "{}", err.detail());

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_with_cluster_tears_down_on_error() {
    init_logging();
    let config = ClusterConfig::default();
    let sim = Arc::new(SimulatedCluster::new(&config));

    let result: Result<(), HarnessError> = with_cluster(sim.clone(), &config, |cluster| async move {
        cluster.node().query("SELECT * FROM nowhere").await?;
        Ok(())
    })
    .await;

    assert!(result.is_err());
    for name in [KDC, HDFS, NODE] {
        assert_eq!(sim.stop_calls(name), 1, "{}", name);
    }
}

#[tokio::test]
async fn test_with_cluster_tears_down_on_panic() {
    init_logging();
    let config = ClusterConfig::default();
    let sim = Arc::new(SimulatedCluster::new(&config));

    let outcome = AssertUnwindSafe(with_cluster(sim.clone(), &config, |_cluster| async move {
        if true {
            panic!("scenario blew up");
        }
        Ok(())
    }))
    .catch_unwind()
    .await;

    assert!(outcome.is_err());
    for name in [KDC, HDFS, NODE] {
        assert_eq!(sim.stop_calls(name), 1, "{}", name);
    }
}
