//! CLI helpers for the kdfs-test binary
//!
//! Resolves configuration, picks a backend, and runs the suite inside a
//! scoped cluster so teardown happens on every exit path.

use super::cluster::{with_cluster, ClusterBackend};
use super::config::{BackendKind, ClusterConfig};
use super::error::{HarnessError, HarnessResult};
use super::report::{OutputFormat, SuiteReport};
use super::scenario::ScenarioContext;
use super::sim::SimulatedCluster;
use super::suite::run_suite;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a suite run
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Cluster configuration file; defaults apply when absent
    pub config_file: Option<PathBuf>,

    /// Overrides the backend from file and environment
    pub backend: Option<BackendKind>,

    /// Scenario names or 1-based positions; empty runs everything
    pub scenarios: Vec<String>,

    pub output_format: OutputFormat,

    /// Overrides `expiry_wait_secs`
    pub expiry_wait_secs: Option<u64>,
}

impl RunConfig {
    /// Resolve the cluster configuration: file, then environment, then flags
    pub fn cluster_config(&self) -> HarnessResult<ClusterConfig> {
        let base = match self.config_file {
            Some(ref path) => ClusterConfig::from_file(path)?,
            None => ClusterConfig::default(),
        };
        let mut config = base.apply_env()?;
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(secs) = self.expiry_wait_secs {
            config.expiry_wait_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Build the backend selected by `config.backend`
pub fn backend_for(config: &ClusterConfig) -> HarnessResult<Arc<dyn ClusterBackend>> {
    match config.backend {
        BackendKind::Sim => Ok(Arc::new(SimulatedCluster::new(config))),
        #[cfg(feature = "test-support")]
        BackendKind::Docker => Ok(Arc::new(super::docker::DockerCluster::new(config))),
        #[cfg(not(feature = "test-support"))]
        BackendKind::Docker => Err(HarnessError::config(
            "the docker backend requires the `test-support` feature",
        )),
    }
}

/// Run the selected scenarios and return the report
pub async fn run(run_config: &RunConfig) -> HarnessResult<SuiteReport> {
    let config = run_config.cluster_config()?;
    let backend = backend_for(&config)?;
    let ctx = ScenarioContext::from_config(&config);
    let selection = run_config.scenarios.clone();

    log::info!(
        "Running {} scenario(s) on the {} backend (expiry wait {:?})",
        if selection.is_empty() {
            "all".to_string()
        } else {
            selection.len().to_string()
        },
        config.backend.name(),
        Duration::from_secs(config.expiry_wait_secs)
    );

    with_cluster(backend, &config, |cluster| async move {
        run_suite(&cluster, &ctx, &selection).await
    })
    .await
    .inspect_err(|e| {
        if let HarnessError::SetupFailure { .. } = e {
            log::error!("Cluster setup failed: {}", e);
        }
    })
}
