//! Scenario suite tests on the simulated topology
//!
//! Every scenario runs against in-process KDC, namenode, and database
//! components driven by a manual clock, so ticket expiry is instant.

mod common;

use common::{start_sim, TABLE_FUNCTION_COLUMNS};
use kerberized_hdfs_harness::harness::cluster::ContainerState;
use kerberized_hdfs_harness::harness::config::ClusterConfig;
use kerberized_hdfs_harness::harness::error::{EngineErrorKind, ErrorKind, HarnessError};
use kerberized_hdfs_harness::harness::report::write_report;
use kerberized_hdfs_harness::harness::scenario::{
    FaultInjection, Phase, Scenario, ScenarioContext,
};
use kerberized_hdfs_harness::harness::suite::{run_scenario, run_suite, SCENARIOS};
use kerberized_hdfs_harness::harness::OutputFormat;
use std::time::Duration;

#[tokio::test]
async fn test_full_suite_passes() {
    let config = ClusterConfig::default();
    let (_sim, cluster) = start_sim(&config).await;
    let ctx = ScenarioContext::from_config(&config);

    let report = run_suite(&cluster, &ctx, &[]).await.unwrap();
    cluster.shutdown().await.unwrap();

    if !report.all_passed() {
        let mut out = Vec::new();
        write_report(&report, OutputFormat::Text, &mut out).unwrap();
        panic!("suite failed:\n{}", String::from_utf8_lossy(&out));
    }
    assert_eq!(report.summary.total, SCENARIOS.len());
    assert_eq!(report.backend, "sim");
    assert!(report.scenario("prohibited").is_some_and(|s| s.passed));
    assert!(report.scenario("not_a_scenario").is_none());
    assert!(report.summary.total_assertions >= SCENARIOS.len());
}

#[tokio::test]
async fn test_read_write_storage_exact_payload() {
    let config = ClusterConfig::default();
    let (_sim, cluster) = start_sim(&config).await;
    let ctx = ScenarioContext::from_config(&config);

    let report = run_scenario("read_write_storage", &cluster, &ctx)
        .await
        .unwrap();
    assert!(report.passed, "{:?}", report.error);

    let stored = cluster.oracle().read_data("/simple_storage1").await.unwrap();
    assert_eq!(stored, "1\tMark\t72.53\n");
    let selected = cluster
        .node()
        .query("SELECT * FROM SimpleHDFSStorage2")
        .await
        .unwrap();
    assert_eq!(selected, stored);

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_expired_ticket_is_renewed_lazily() {
    let config = ClusterConfig::default();
    let (sim, cluster) = start_sim(&config).await;
    let ctx = ScenarioContext::from_config(&config);
    assert_eq!(sim.engine().relogin_count(), 0);

    let report = run_scenario("write_storage_expired", &cluster, &ctx)
        .await
        .unwrap();
    assert!(report.passed, "{:?}", report.error);
    assert_eq!(sim.engine().relogin_count(), 1);

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_denied_write_leaves_nothing_behind() {
    let config = ClusterConfig::default();
    let (sim, cluster) = start_sim(&config).await;
    let ctx = ScenarioContext::from_config(&config);

    let report = run_scenario("prohibited", &cluster, &ctx).await.unwrap();
    assert!(report.passed, "{:?}", report.error);
    assert!(!sim.namenode().exists("/storage_user_two_prohibited"));

    // The raw diagnostic names the principal, the access, and the path.
    let err = cluster
        .node()
        .query("INSERT INTO HDFSStorTwoProhibited VALUES (2, 'Again', 1.0)")
        .await
        .unwrap_err();
    assert_eq!(
        err.kind(),
        ErrorKind::Engine(EngineErrorKind::PermissionDenied)
    );
    let detail = err.detail();
    assert!(detail.contains("user=specuser"), "{}", detail);
    assert!(detail.contains("access=WRITE"), "{}", detail);
    assert!(detail.contains("/storage_user_two_prohibited"), "{}", detail);

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_two_principals_are_isolated() {
    let config = ClusterConfig::default();
    let (sim, cluster) = start_sim(&config).await;
    let ctx = ScenarioContext::from_config(&config);

    let report = run_scenario("two_users", &cluster, &ctx).await.unwrap();
    assert!(report.passed, "{:?}", report.error);

    let principals = sim.engine().cached_principals();
    assert!(principals.contains(&"root@TEST.HARNESS.LOCAL".to_string()));
    assert!(principals.contains(&"specuser@TEST.HARNESS.LOCAL".to_string()));

    let one = cluster.oracle().read_data("/storage_user_one").await.unwrap();
    let two = cluster
        .oracle()
        .read_data("/user/specuser/storage_user_two")
        .await
        .unwrap();
    assert_eq!(one, "1\tIlyaReal\t86\n");
    assert_eq!(two, "1\tIlyaIdeal\t74\n");

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_per_user_cache_path_is_a_configuration_conflict() {
    let config = ClusterConfig::default();
    let (_sim, cluster) = start_sim(&config).await;
    let ctx = ScenarioContext::from_config(&config);

    let report = run_scenario("cache_path", &cluster, &ctx).await.unwrap();
    assert!(report.passed, "{:?}", report.error);
    assert!(!cluster
        .oracle()
        .exists("/storage_dedicated_cache_path")
        .await
        .unwrap());

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_kdc_outage_phase_trail() {
    let config = ClusterConfig::default();
    let (_sim, cluster) = start_sim(&config).await;
    let ctx = ScenarioContext::from_config(&config);

    let report = run_scenario("read_table_not_expired", &cluster, &ctx)
        .await
        .unwrap();
    assert!(report.passed, "{:?}", report.error);
    assert_eq!(
        report.phases(),
        vec![
            Phase::Setup,
            Phase::Act,
            Phase::Verify,
            Phase::FaultInject,
            Phase::Reverify,
            Phase::FaultInject,
            Phase::Reverify,
        ]
    );
    assert_eq!(
        cluster.container_state("hdfskerberos").unwrap(),
        ContainerState::Running
    );

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_valid_ticket_survives_kdc_pause() {
    let config = ClusterConfig::default();
    let (_sim, cluster) = start_sim(&config).await;
    let data = "7\tCached\t1.25\n";
    cluster
        .oracle()
        .write_data("/cached_ticket", data)
        .await
        .unwrap();

    cluster.pause_container("hdfskerberos").await.unwrap();
    let selected = cluster
        .node()
        .query(&format!(
            "SELECT * FROM hdfs('{}', 'TSV', '{}')",
            config.hdfs_uri("/cached_ticket"),
            TABLE_FUNCTION_COLUMNS
        ))
        .await
        .unwrap();
    assert_eq!(selected, data);

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_teardown_resumes_paused_containers() {
    let config = ClusterConfig::default();
    let (_sim, cluster) = start_sim(&config).await;
    let ctx = ScenarioContext::from_config(&config);

    let mut scenario = Scenario::new("leaves_kdc_paused", &cluster, &ctx);
    scenario.enter(Phase::Setup).unwrap();
    scenario.enter(Phase::FaultInject).unwrap();
    scenario
        .inject(FaultInjection::PauseContainer("hdfskerberos".to_string()))
        .await
        .unwrap();
    assert_eq!(
        cluster.container_state("hdfskerberos").unwrap(),
        ContainerState::Paused
    );

    scenario.teardown().await;
    let report = scenario.finish(Ok(()));
    assert_eq!(
        cluster.container_state("hdfskerberos").unwrap(),
        ContainerState::Running
    );
    assert_eq!(report.phases().last(), Some(&Phase::Teardown));

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sleep_fault_advances_cluster_clock() {
    let config = ClusterConfig::default();
    let (_sim, cluster) = start_sim(&config).await;
    let ctx = ScenarioContext::from_config(&config);
    let before = cluster.clock().now();

    let mut scenario = Scenario::new("sleeps", &cluster, &ctx);
    scenario.enter(Phase::Setup).unwrap();
    scenario.enter(Phase::FaultInject).unwrap();
    scenario
        .inject(FaultInjection::Sleep(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(cluster.clock().now() - before, Duration::from_secs(5));

    scenario.teardown().await;
    let report = scenario.finish(Ok(()));
    assert!(report.steps.iter().any(|s| s.action == "fault: sleep 5s"));

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_out_of_order_phases_are_rejected() {
    let config = ClusterConfig::default();
    let (_sim, cluster) = start_sim(&config).await;
    let ctx = ScenarioContext::from_config(&config);

    let mut scenario = Scenario::new("out_of_order", &cluster, &ctx);
    let err = scenario.query("SELECT * FROM anything").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    assert!(matches!(
        scenario.enter(Phase::Verify).unwrap_err(),
        HarnessError::ConfigError { .. }
    ));
    scenario.enter(Phase::Setup).unwrap();
    scenario.enter(Phase::Act).unwrap();
    assert!(scenario.enter(Phase::Reverify).is_err());
    assert!(scenario
        .inject(FaultInjection::ExpireCredentials)
        .await
        .is_err());

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_scenario_is_rejected() {
    let config = ClusterConfig::default();
    let (_sim, cluster) = start_sim(&config).await;
    let ctx = ScenarioContext::from_config(&config);

    let err = run_suite(&cluster, &ctx, &["missing".to_string()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    cluster.shutdown().await.unwrap();
}
