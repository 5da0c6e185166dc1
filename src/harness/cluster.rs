//! Cluster lifecycle management
//!
//! Boots the topology in dependency order (KDC, then HDFS, then the
//! database node), exposes per-container pause/unpause, and tears
//! everything down exactly once.
//!
//! ```rust,ignore
//! let backend = Arc::new(SimulatedCluster::new(&config));
//! with_cluster(backend, &config, |cluster| async move {
//!     cluster.node().query("select 1").await?;
//!     Ok(())
//! })
//! .await?;
//! ```

use super::clock::SharedClock;
use super::config::ClusterConfig;
use super::engine::{QueryEngine, QueryNode};
use super::error::{HarnessError, HarnessResult};
use super::hdfs::{DataEndpoint, HdfsOracle};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Role a container plays in the topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerRole {
    Kdc,
    Hdfs,
    Node,
}

impl ContainerRole {
    /// Dependency order
    pub const BOOT_ORDER: [ContainerRole; 3] =
        [ContainerRole::Kdc, ContainerRole::Hdfs, ContainerRole::Node];

    pub fn container_name(self, config: &ClusterConfig) -> &str {
        match self {
            ContainerRole::Kdc => &config.kdc.name,
            ContainerRole::Hdfs => &config.hdfs.container.name,
            ContainerRole::Node => &config.node.container.name,
        }
    }
}

/// Container control surface implemented by each topology
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Boot one container and return once it is healthy, including any
    /// bootstrap it needs (principal registration, directory layout).
    async fn start_container(&self, role: ContainerRole, config: &ClusterConfig)
        -> HarnessResult<()>;

    async fn pause_container(&self, name: &str) -> HarnessResult<()>;

    async fn unpause_container(&self, name: &str) -> HarnessResult<()>;

    async fn stop_container(&self, name: &str) -> HarnessResult<()>;

    /// Statement transport to the database node; valid after the node started
    fn query_engine(&self) -> HarnessResult<Arc<dyn QueryEngine>>;

    /// Oracle access to HDFS; valid after HDFS started
    fn data_endpoint(&self) -> HarnessResult<Arc<dyn DataEndpoint>>;

    /// Clock that governs credential lifetimes in this topology
    fn clock(&self) -> SharedClock;
}

/// Lifecycle state of a [`ClusterHandle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    Stopped,
    Starting,
    Running,
    ShuttingDown,
}

/// State of one container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Paused,
    Stopped,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Running => f.write_str("running"),
            ContainerState::Paused => f.write_str("paused"),
            ContainerState::Stopped => f.write_str("stopped"),
        }
    }
}

struct Inner {
    state: ClusterState,
    containers: HashMap<String, ContainerState>,
}

/// Running multi-container topology
pub struct ClusterHandle {
    run_id: String,
    config: ClusterConfig,
    backend: Arc<dyn ClusterBackend>,
    node: QueryNode,
    oracle: HdfsOracle,
    inner: Mutex<Inner>,
}

impl ClusterHandle {
    /// Boot every container and wait for the database node.
    ///
    /// On failure, containers that did start are stopped before the
    /// [`HarnessError::SetupFailure`] is returned.
    pub async fn start(
        backend: Arc<dyn ClusterBackend>,
        config: &ClusterConfig,
    ) -> HarnessResult<Self> {
        config.validate()?;
        let run_id = generate_run_id();
        let timeout = config.startup_timeout();

        log::info!(
            "Starting {} cluster (run_id: {}, timeout: {:?})",
            backend.name(),
            run_id,
            timeout
        );

        let mut started: Vec<String> = Vec::new();
        for role in ContainerRole::BOOT_ORDER {
            let name = role.container_name(config).to_string();
            log::info!("Starting container '{}' ({:?})", name, role);

            let outcome = tokio::time::timeout(timeout, backend.start_container(role, config)).await;
            let failure = match outcome {
                Ok(Ok(())) => {
                    started.push(name);
                    continue;
                }
                Ok(Err(e)) => as_setup_failure(&name, e),
                Err(_) => HarnessError::SetupFailure {
                    message: format!("not healthy within {}s", timeout.as_secs()),
                    container: name.clone(),
                    source: None,
                },
            };

            log::error!("{}", failure);
            stop_all(backend.as_ref(), &started).await;
            return Err(failure);
        }

        let node_name = config.node.container.name.clone();
        let wired = match (backend.query_engine(), backend.data_endpoint()) {
            (Ok(engine), Ok(endpoint)) => Ok((engine, endpoint)),
            (Err(e), _) | (_, Err(e)) => Err(as_setup_failure(&node_name, e)),
        };
        let (engine, endpoint) = match wired {
            Ok(pair) => pair,
            Err(e) => {
                stop_all(backend.as_ref(), &started).await;
                return Err(e);
            }
        };

        let node = QueryNode::new(&node_name, engine, config.query_timeout());
        if let Err(e) = wait_for_node(&node, timeout).await {
            stop_all(backend.as_ref(), &started).await;
            return Err(e);
        }

        let containers = started
            .into_iter()
            .map(|name| (name, ContainerState::Running))
            .collect();

        log::info!("Cluster started (run_id: {})", run_id);
        Ok(Self {
            run_id,
            config: config.clone(),
            backend,
            node,
            oracle: HdfsOracle::new(endpoint),
            inner: Mutex::new(Inner {
                state: ClusterState::Running,
                containers,
            }),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Facade to the database node
    pub fn node(&self) -> &QueryNode {
        &self.node
    }

    /// Out-of-band HDFS access
    pub fn oracle(&self) -> &HdfsOracle {
        &self.oracle
    }

    pub fn clock(&self) -> SharedClock {
        self.backend.clock()
    }

    pub fn state(&self) -> ClusterState {
        self.lock().state
    }

    pub fn container_state(&self, name: &str) -> HarnessResult<ContainerState> {
        self.lock()
            .containers
            .get(name)
            .copied()
            .ok_or_else(|| HarnessError::UnknownContainer {
                name: name.to_string(),
            })
    }

    /// Name-addressed view of one container
    pub fn container(&self, name: &str) -> HarnessResult<ContainerRef<'_>> {
        self.container_state(name)?;
        Ok(ContainerRef {
            cluster: self,
            name: name.to_string(),
        })
    }

    /// Freeze a container without losing its state
    pub async fn pause_container(&self, name: &str) -> HarnessResult<()> {
        match self.running_container_state(name)? {
            ContainerState::Paused => {
                log::debug!("Container '{}' already paused", name);
                return Ok(());
            }
            ContainerState::Stopped => {
                return Err(HarnessError::config(format!(
                    "Cannot pause stopped container '{}'",
                    name
                )))
            }
            ContainerState::Running => {}
        }

        log::info!("Pausing container '{}'", name);
        self.backend.pause_container(name).await?;
        self.set_container_state(name, ContainerState::Paused);
        Ok(())
    }

    /// Resume a paused container; a running container is left alone
    pub async fn unpause_container(&self, name: &str) -> HarnessResult<()> {
        match self.running_container_state(name)? {
            ContainerState::Running => {
                log::debug!("Container '{}' already running", name);
                return Ok(());
            }
            ContainerState::Stopped => {
                return Err(HarnessError::config(format!(
                    "Cannot unpause stopped container '{}'",
                    name
                )))
            }
            ContainerState::Paused => {}
        }

        log::info!("Unpausing container '{}'", name);
        self.backend.unpause_container(name).await?;
        self.set_container_state(name, ContainerState::Running);
        Ok(())
    }

    /// Tear down every container.
    ///
    /// Runs once; later calls are logged no-ops. Individual stop failures are
    /// logged and do not prevent the remaining containers from stopping.
    pub async fn shutdown(&self) -> HarnessResult<()> {
        let containers = {
            let mut inner = self.lock();
            if inner.state != ClusterState::Running {
                log::warn!(
                    "shutdown() called on cluster in state {:?} (run_id: {})",
                    inner.state,
                    self.run_id
                );
                return Ok(());
            }
            inner.state = ClusterState::ShuttingDown;
            inner.containers.clone()
        };

        log::info!("Shutting down cluster (run_id: {})", self.run_id);

        for role in ContainerRole::BOOT_ORDER.iter().rev() {
            let name = role.container_name(&self.config);
            if containers.get(name) == Some(&ContainerState::Paused) {
                if let Err(e) = self.backend.unpause_container(name).await {
                    log::warn!("Failed to unpause '{}' before stop: {}", name, e);
                }
            }
            if let Err(e) = self.backend.stop_container(name).await {
                log::warn!("Failed to stop container '{}': {}", name, e);
            }
            self.set_container_state(name, ContainerState::Stopped);
        }

        self.lock().state = ClusterState::Stopped;
        log::info!("Cluster stopped (run_id: {})", self.run_id);
        Ok(())
    }

    fn running_container_state(&self, name: &str) -> HarnessResult<ContainerState> {
        let state = self.state();
        if state != ClusterState::Running {
            return Err(HarnessError::config(format!(
                "Cluster is {:?}, container control requires Running",
                state
            )));
        }
        self.container_state(name)
    }

    fn set_container_state(&self, name: &str, state: ContainerState) {
        if let Some(entry) = self.lock().containers.get_mut(name) {
            *entry = state;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ClusterHandle {
    fn drop(&mut self) {
        if self.state() == ClusterState::Running {
            log::warn!(
                "ClusterHandle {} dropped while running. Call shutdown() for clean teardown.",
                self.run_id
            );
        }
    }
}

/// Container within a running cluster
pub struct ContainerRef<'a> {
    cluster: &'a ClusterHandle,
    name: String,
}

impl ContainerRef<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> HarnessResult<ContainerState> {
        self.cluster.container_state(&self.name)
    }

    pub async fn pause(&self) -> HarnessResult<()> {
        self.cluster.pause_container(&self.name).await
    }

    pub async fn unpause(&self) -> HarnessResult<()> {
        self.cluster.unpause_container(&self.name).await
    }
}

/// Start a cluster, hand it to `f`, and shut it down afterwards.
///
/// Teardown runs whether `f` succeeds, fails, or panics; a panic is resumed
/// once the containers are gone.
pub async fn with_cluster<F, Fut, T>(
    backend: Arc<dyn ClusterBackend>,
    config: &ClusterConfig,
    f: F,
) -> HarnessResult<T>
where
    F: FnOnce(Arc<ClusterHandle>) -> Fut,
    Fut: Future<Output = HarnessResult<T>>,
{
    let cluster = Arc::new(ClusterHandle::start(backend, config).await?);

    let outcome = AssertUnwindSafe(f(Arc::clone(&cluster)))
        .catch_unwind()
        .await;

    if let Err(e) = cluster.shutdown().await {
        log::warn!("Cluster shutdown reported an error: {}", e);
    }

    match outcome {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

async fn wait_for_node(node: &QueryNode, timeout: Duration) -> HarnessResult<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut delay = Duration::from_millis(100);

    loop {
        // A node that accepts the connection but never answers must not
        // outlast the startup deadline
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let ready = tokio::time::timeout(remaining, node.ping())
            .await
            .unwrap_or(false);
        if ready {
            log::info!("Node '{}' accepts connections", node.name());
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(HarnessError::SetupFailure {
                message: format!(
                    "not accepting connections within {}s",
                    timeout.as_secs()
                ),
                container: node.name().to_string(),
                source: None,
            });
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(Duration::from_secs(2));
    }
}

async fn stop_all(backend: &dyn ClusterBackend, started: &[String]) {
    for name in started.iter().rev() {
        if let Err(e) = backend.stop_container(name).await {
            log::warn!("Failed to stop container '{}' during cleanup: {}", name, e);
        }
    }
}

fn as_setup_failure(container: &str, err: HarnessError) -> HarnessError {
    match err {
        HarnessError::SetupFailure { .. } => err,
        other => HarnessError::SetupFailure {
            message: "failed to start".to_string(),
            container: container.to_string(),
            source: Some(other.to_string()),
        },
    }
}

/// Short identifier for one cluster run
fn generate_run_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);

    format!("{:x}", timestamp % 0xFFFFFF)
}
