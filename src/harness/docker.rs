//! Docker topology via testcontainers
//!
//! Starts the KDC, the kerberized HDFS service, and the database node as
//! containers on a private network so the node can reach HDFS by container
//! name. Only compiled with the `test-support` feature.
//!
//! The KDC registers every configured principal on startup and exports
//! keytabs into a host staging directory that is bind-mounted into all three
//! containers. The node also gets its `<hdfs>` credential sections rendered
//! from `engine_hdfs` as a configuration file.
//!
//! The oracle client runs `hdfs dfs` inside the HDFS container, so it never
//! goes through the database node.

use super::clock::{SharedClock, SystemClock};
use super::cluster::{ClusterBackend, ContainerRole};
use super::config::{ClusterConfig, ContainerSpec};
use super::engine::{HttpQueryEngine, QueryEngine};
use super::error::{HarnessError, HarnessResult};
use super::hdfs::DataEndpoint;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use testcontainers::core::{ExecCommand, IntoContainerPort, Mount, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

type Container = Arc<ContainerAsync<GenericImage>>;

/// Host path → container path
type BindMount = (String, String);

/// Cluster backed by real containers
pub struct DockerCluster {
    network: String,
    /// Host directory holding keytabs and rendered node configuration
    staging: PathBuf,
    names: HashMap<String, ContainerRole>,
    containers: Mutex<HashMap<String, Container>>,
    engine: Mutex<Option<Arc<HttpQueryEngine>>>,
    oracle_kinit: Option<String>,
    clock: SharedClock,
}

impl DockerCluster {
    pub fn new(config: &ClusterConfig) -> Self {
        let names = ContainerRole::BOOT_ORDER
            .iter()
            .map(|role| (role.container_name(config).to_string(), *role))
            .collect();

        let network = format!("kdfs-{}", chrono::Utc::now().timestamp_millis());
        Self {
            staging: std::env::temp_dir().join(&network),
            network,
            names,
            containers: Mutex::new(HashMap::new()),
            engine: Mutex::new(None),
            oracle_kinit: config.hdfs.oracle_kinit.clone(),
            clock: Arc::new(SystemClock::new()),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn staging_dir(&self) -> &std::path::Path {
        &self.staging
    }

    fn keytab_mount(&self, config: &ClusterConfig) -> BindMount {
        (
            self.staging.join("keytab").display().to_string(),
            config.keytab_dir.clone(),
        )
    }

    /// Create the keytab directory and render the node's credential sections
    fn stage(&self, config: &ClusterConfig) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(self.staging.join("keytab"))?;
        let node_config = self.staging.join("kerberized_hdfs.xml");
        std::fs::write(&node_config, config.engine_hdfs.to_xml())?;
        Ok(node_config)
    }

    async fn connect_node(
        &self,
        container: &ContainerAsync<GenericImage>,
        config: &ClusterConfig,
    ) -> HarnessResult<()> {
        let name = &config.node.container.name;
        let host = container
            .get_host()
            .await
            .map_err(|e| HarnessError::setup(name, e.to_string()))?;
        let mapped = container
            .get_host_port_ipv4(config.node.http_port.tcp())
            .await
            .map_err(|e| HarnessError::setup(name, e.to_string()))?;
        let engine = HttpQueryEngine::new(&host.to_string(), mapped)?;
        log::info!("Node '{}' HTTP interface at {}", name, engine.base_url());
        *self.engine.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(engine));
        Ok(())
    }

    fn track(&self, name: &str, container: Container) {
        self.containers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), container);
    }

    fn container(&self, name: &str) -> HarnessResult<Container> {
        if !self.names.contains_key(name) {
            return Err(HarnessError::UnknownContainer {
                name: name.to_string(),
            });
        }
        self.containers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| HarnessError::config(format!("container '{}' is not running", name)))
    }

    async fn launch(
        &self,
        spec: &ContainerSpec,
        exposed_port: Option<u16>,
        extra_mounts: &[BindMount],
        timeout: std::time::Duration,
    ) -> HarnessResult<Container> {
        let mut image = GenericImage::new(spec.image.as_str(), spec.tag.as_str());
        if let Some(ref message) = spec.ready_message {
            image = image.with_wait_for(WaitFor::message_on_stdout(message.as_str()));
        }
        if let Some(port) = exposed_port {
            image = image.with_exposed_port(port.tcp());
        }

        let mut request = image
            .with_network(self.network.as_str())
            .with_container_name(spec.name.as_str())
            .with_startup_timeout(timeout);
        for (key, value) in &spec.env {
            request = request.with_env_var(key.as_str(), value.as_str());
        }
        for mount in &spec.mounts {
            request = request.with_mount(Mount::bind_mount(
                mount.host.as_str(),
                mount.container.as_str(),
            ));
        }
        for (host, target) in extra_mounts {
            request = request.with_mount(Mount::bind_mount(host.as_str(), target.as_str()));
        }

        log::info!(
            "Starting {}:{} as '{}' on network {}",
            spec.image,
            spec.tag,
            spec.name,
            self.network
        );
        let container = request.start().await.map_err(|e| HarnessError::SetupFailure {
            message: "container failed to start".to_string(),
            container: spec.name.clone(),
            source: Some(e.to_string()),
        })?;
        Ok(Arc::new(container))
    }
}

#[async_trait]
impl ClusterBackend for DockerCluster {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn start_container(
        &self,
        role: ContainerRole,
        config: &ClusterConfig,
    ) -> HarnessResult<()> {
        let timeout = config.startup_timeout();
        let name = role.container_name(config);
        let keytabs = self.keytab_mount(config);

        let (container, bootstrap) = match role {
            ContainerRole::Kdc => {
                self.stage(config).map_err(|e| {
                    HarnessError::setup(
                        name,
                        format!("cannot stage {}: {}", self.staging.display(), e),
                    )
                })?;
                let container = self
                    .launch(&config.kdc, None, &[keytabs], timeout)
                    .await?;
                (container, config.kdc_bootstrap_commands())
            }
            ContainerRole::Hdfs => {
                let container = self
                    .launch(&config.hdfs.container, None, &[keytabs], timeout)
                    .await?;
                (container, config.hdfs.bootstrap_commands.clone())
            }
            ContainerRole::Node => {
                let port = config.node.http_port;
                let node_config = (
                    self.staging.join("kerberized_hdfs.xml").display().to_string(),
                    config.node.hdfs_config_path.clone(),
                );
                let container = self
                    .launch(&config.node.container, Some(port), &[keytabs, node_config], timeout)
                    .await?;
                (container, Vec::new())
            }
        };
        self.track(name, Arc::clone(&container));

        // A container that fails here is not running as far as the cluster
        // handle is concerned, so it is removed before returning.
        let ready = async {
            run_bootstrap(&container, name, &bootstrap).await?;
            if role == ContainerRole::Node {
                self.connect_node(&container, config).await?;
            }
            Ok::<(), HarnessError>(())
        }
        .await;
        if let Err(e) = ready {
            drop(container);
            if let Err(stop_err) = self.stop_container(name).await {
                log::warn!("Failed to discard '{}': {}", name, stop_err);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn pause_container(&self, name: &str) -> HarnessResult<()> {
        let container = self.container(name)?;
        container.pause().await.map_err(|e| HarnessError::IoError {
            message: format!("pause failed: {}", e),
            path: name.to_string(),
        })
    }

    async fn unpause_container(&self, name: &str) -> HarnessResult<()> {
        let container = self.container(name)?;
        container.unpause().await.map_err(|e| HarnessError::IoError {
            message: format!("unpause failed: {}", e),
            path: name.to_string(),
        })
    }

    async fn stop_container(&self, name: &str) -> HarnessResult<()> {
        if !self.names.contains_key(name) {
            return Err(HarnessError::UnknownContainer {
                name: name.to_string(),
            });
        }
        let container = self
            .containers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
        let Some(container) = container else {
            return Ok(());
        };

        log::info!("Stopping container '{}'...", name);
        if let Err(e) = container.stop().await {
            log::warn!("Failed to stop container '{}': {}", name, e);
        }
        // The oracle may still hold a reference; the last drop removes it then.
        if let Ok(container) = Arc::try_unwrap(container) {
            if let Err(e) = container.rm().await {
                log::warn!("Failed to remove container '{}': {}", name, e);
            }
        }
        match self.names.get(name) {
            Some(ContainerRole::Node) => {
                *self.engine.lock().unwrap_or_else(|e| e.into_inner()) = None;
            }
            Some(ContainerRole::Kdc) => {
                if let Err(e) = std::fs::remove_dir_all(&self.staging) {
                    log::warn!("Failed to remove {}: {}", self.staging.display(), e);
                }
            }
            _ => {}
        }
        log::info!("Container '{}' stopped and removed", name);
        Ok(())
    }

    fn query_engine(&self) -> HarnessResult<Arc<dyn QueryEngine>> {
        self.engine
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .map(|engine| engine as Arc<dyn QueryEngine>)
            .ok_or_else(|| HarnessError::config("database node is not running"))
    }

    fn data_endpoint(&self) -> HarnessResult<Arc<dyn DataEndpoint>> {
        let hdfs = self
            .names
            .iter()
            .find(|(_, role)| **role == ContainerRole::Hdfs)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| HarnessError::config("no HDFS container configured"))?;
        let container = self.container(&hdfs)?;
        Ok(Arc::new(ExecHdfsClient {
            container,
            kinit: self.oracle_kinit.clone(),
        }))
    }

    fn clock(&self) -> SharedClock {
        Arc::clone(&self.clock)
    }
}

/// Oracle client that shells into the HDFS container
pub struct ExecHdfsClient {
    container: Container,
    kinit: Option<String>,
}

impl ExecHdfsClient {
    fn script(&self, command: &str) -> String {
        match self.kinit {
            Some(ref kinit) => format!("{} && {}", kinit, command),
            None => command.to_string(),
        }
    }
}

#[async_trait]
impl DataEndpoint for ExecHdfsClient {
    async fn write_data(&self, path: &str, data: &[u8]) -> HarnessResult<()> {
        let text = std::str::from_utf8(data).map_err(|e| HarnessError::IoError {
            message: format!("payload is not valid UTF-8: {}", e),
            path: path.to_string(),
        })?;
        let command = format!(
            "printf '%s' {} | hdfs dfs -put -f - {}",
            shell_quote(text),
            shell_quote(path)
        );
        let output = run_shell(&self.container, &self.script(&command)).await?;
        if output.code != 0 {
            return Err(HarnessError::IoError {
                message: output.stderr,
                path: path.to_string(),
            });
        }
        Ok(())
    }

    async fn read_data(&self, path: &str) -> HarnessResult<Vec<u8>> {
        let command = format!("hdfs dfs -cat {}", shell_quote(path));
        let output = run_shell(&self.container, &self.script(&command)).await?;
        if output.code == 0 {
            return Ok(output.stdout);
        }
        if output.stderr.contains("No such file or directory") {
            Err(HarnessError::NotFound {
                path: path.to_string(),
            })
        } else {
            Err(HarnessError::IoError {
                message: output.stderr,
                path: path.to_string(),
            })
        }
    }
}

async fn run_bootstrap(
    container: &ContainerAsync<GenericImage>,
    name: &str,
    commands: &[String],
) -> HarnessResult<()> {
    for command in commands {
        log::debug!("{} bootstrap: {}", name, command);
        let output = run_shell(container, command)
            .await
            .map_err(|e| HarnessError::setup(name, e.to_string()))?;
        if output.code != 0 {
            return Err(HarnessError::SetupFailure {
                message: format!("bootstrap command failed: {}", command),
                container: name.to_string(),
                source: Some(output.stderr),
            });
        }
    }
    Ok(())
}

struct ShellOutput {
    code: i64,
    stdout: Vec<u8>,
    stderr: String,
}

async fn run_shell(container: &ContainerAsync<GenericImage>, script: &str) -> HarnessResult<ShellOutput> {
    let exec_err = |e: testcontainers::TestcontainersError| HarnessError::IoError {
        message: format!("exec failed: {}", e),
        path: script.to_string(),
    };

    let mut result = container
        .exec(ExecCommand::new(["sh", "-c", script]))
        .await
        .map_err(exec_err)?;
    let stdout = result.stdout_to_vec().await.map_err(exec_err)?;
    let stderr = result.stderr_to_vec().await.map_err(exec_err)?;
    let code = result.exit_code().await.map_err(exec_err)?.unwrap_or(-1);

    Ok(ShellOutput {
        code,
        stdout,
        stderr: String::from_utf8_lossy(&stderr).trim_end().to_string(),
    })
}

/// Single-quote `value` for `sh -c`
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/simple_storage1"), "'/simple_storage1'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("1\tMark\n"), "'1\tMark\n'");
    }

    #[test]
    fn test_unknown_container() {
        let cluster = DockerCluster::new(&ClusterConfig::default());
        assert!(matches!(
            cluster.container("zookeeper").unwrap_err(),
            HarnessError::UnknownContainer { .. }
        ));
        assert!(cluster.network().starts_with("kdfs-"));
    }

    #[test]
    fn test_staging_holds_keytabs_and_node_config() {
        let config = ClusterConfig::default();
        let cluster = DockerCluster::new(&config);
        assert!(cluster.staging_dir().ends_with(cluster.network()));

        let (host, target) = cluster.keytab_mount(&config);
        assert!(host.ends_with("keytab"));
        assert_eq!(target, "/tmp/keytab");

        let node_config = cluster.stage(&config).unwrap();
        let xml = std::fs::read_to_string(&node_config).unwrap();
        assert_eq!(xml, config.engine_hdfs.to_xml());
        assert!(cluster.staging_dir().join("keytab").is_dir());
        std::fs::remove_dir_all(cluster.staging_dir()).unwrap();
    }
}
