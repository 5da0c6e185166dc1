//! In-process topology
//!
//! Stands in for the KDC, HDFS, and database containers so the scenario
//! suite runs deterministically: credential lifetimes follow an injected
//! clock, and pausing a "container" flips the component offline while
//! keeping its state.

pub mod engine;
pub mod kdc;
pub mod namenode;

use crate::harness::clock::{ManualClock, SharedClock};
use crate::harness::cluster::{ClusterBackend, ContainerRole};
use crate::harness::config::ClusterConfig;
use crate::harness::engine::QueryEngine;
use crate::harness::error::{HarnessError, HarnessResult};
use crate::harness::hdfs::DataEndpoint;
use async_trait::async_trait;
use engine::SimulatedEngine;
use kdc::SimulatedKdc;
use namenode::SimulatedNameNode;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Injected failure for a container's boot step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupFault {
    /// Boot step reports an error
    Fail,
    /// Boot step never completes
    Hang,
}

/// Oracle access that bypasses the database node
pub struct SimulatedOracle {
    namenode: Arc<SimulatedNameNode>,
    user: String,
}

#[async_trait]
impl DataEndpoint for SimulatedOracle {
    async fn write_data(&self, path: &str, data: &[u8]) -> HarnessResult<()> {
        self.namenode
            .create_as(&self.user, path, data)
            .map_err(|message| HarnessError::IoError {
                message,
                path: path.to_string(),
            })
    }

    async fn read_data(&self, path: &str) -> HarnessResult<Vec<u8>> {
        self.namenode.read_as(&self.user, path).map_err(|message| {
            if message.starts_with("File does not exist") {
                HarnessError::NotFound {
                    path: path.to_string(),
                }
            } else {
                HarnessError::IoError {
                    message,
                    path: path.to_string(),
                }
            }
        })
    }
}

pub struct SimulatedCluster {
    clock: SharedClock,
    names: HashMap<String, ContainerRole>,
    kdc: Arc<SimulatedKdc>,
    namenode: Arc<SimulatedNameNode>,
    engine: Arc<SimulatedEngine>,
    oracle: Arc<SimulatedOracle>,
    started: Mutex<HashSet<ContainerRole>>,
    faults: Mutex<HashMap<String, StartupFault>>,
    stop_calls: Mutex<HashMap<String, usize>>,
    hdfs_booted: AtomicBool,
}

impl SimulatedCluster {
    /// Topology driven by a fresh [`ManualClock`]
    pub fn new(config: &ClusterConfig) -> Self {
        Self::with_clock(config, Arc::new(ManualClock::new()))
    }

    pub fn with_clock(config: &ClusterConfig, clock: SharedClock) -> Self {
        let kdc = Arc::new(SimulatedKdc::new(
            &config.realm,
            config.ticket_lifetime(),
            Arc::clone(&clock),
        ));
        let namenode = Arc::new(SimulatedNameNode::new(
            &format!("{}:{}", config.hdfs.container.name, config.hdfs.port),
            Arc::clone(&kdc),
        ));
        let engine = Arc::new(SimulatedEngine::new(
            config,
            Arc::clone(&kdc),
            Arc::clone(&namenode),
            Arc::clone(&clock),
        ));
        let oracle = Arc::new(SimulatedOracle {
            namenode: Arc::clone(&namenode),
            user: config.hdfs.oracle_user.clone(),
        });

        let names = ContainerRole::BOOT_ORDER
            .iter()
            .map(|role| (role.container_name(config).to_string(), *role))
            .collect();

        Self {
            clock,
            names,
            kdc,
            namenode,
            engine,
            oracle,
            started: Mutex::new(HashSet::new()),
            faults: Mutex::new(HashMap::new()),
            stop_calls: Mutex::new(HashMap::new()),
            hdfs_booted: AtomicBool::new(false),
        }
    }

    /// Make the boot step of `container` fail or hang
    pub fn with_startup_fault(self, container: &str, fault: StartupFault) -> Self {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(container.to_string(), fault);
        self
    }

    pub fn engine(&self) -> &Arc<SimulatedEngine> {
        &self.engine
    }

    pub fn kdc(&self) -> &Arc<SimulatedKdc> {
        &self.kdc
    }

    pub fn namenode(&self) -> &Arc<SimulatedNameNode> {
        &self.namenode
    }

    /// How many times `stop_container` ran for `container`
    pub fn stop_calls(&self, container: &str) -> usize {
        self.stop_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(container)
            .copied()
            .unwrap_or(0)
    }

    fn role(&self, name: &str) -> HarnessResult<ContainerRole> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| HarnessError::UnknownContainer {
                name: name.to_string(),
            })
    }

    fn is_started(&self, role: ContainerRole) -> bool {
        self.started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&role)
    }

    fn set_paused(&self, role: ContainerRole, paused: bool) {
        match role {
            ContainerRole::Kdc => self.kdc.set_paused(paused),
            ContainerRole::Hdfs => self.namenode.set_paused(paused),
            ContainerRole::Node => self.engine.set_paused(paused),
        }
    }
}

#[async_trait]
impl ClusterBackend for SimulatedCluster {
    fn name(&self) -> &'static str {
        "sim"
    }

    async fn start_container(
        &self,
        role: ContainerRole,
        config: &ClusterConfig,
    ) -> HarnessResult<()> {
        let name = role.container_name(config);
        let fault = self
            .faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .copied();
        match fault {
            Some(StartupFault::Fail) => {
                return Err(HarnessError::setup(name, "container exited during startup"))
            }
            Some(StartupFault::Hang) => {
                futures::future::pending::<()>().await;
            }
            None => {}
        }

        match role {
            ContainerRole::Kdc => self.kdc.start(&config.principals),
            ContainerRole::Hdfs => {
                if !self.is_started(ContainerRole::Kdc) {
                    return Err(HarnessError::setup(name, "KDC is not running"));
                }
                self.namenode.start(&config.hdfs.directories);
                self.hdfs_booted.store(true, Ordering::SeqCst);
            }
            ContainerRole::Node => {
                if !self.hdfs_booted.load(Ordering::SeqCst) {
                    return Err(HarnessError::setup(name, "HDFS bootstrap has not completed"));
                }
                self.engine
                    .start()
                    .map_err(|message| HarnessError::setup(name, message))?;
            }
        }

        self.started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(role);
        log::debug!("Simulated container '{}' is up", name);
        Ok(())
    }

    async fn pause_container(&self, name: &str) -> HarnessResult<()> {
        let role = self.role(name)?;
        self.set_paused(role, true);
        Ok(())
    }

    async fn unpause_container(&self, name: &str) -> HarnessResult<()> {
        let role = self.role(name)?;
        self.set_paused(role, false);
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> HarnessResult<()> {
        let role = self.role(name)?;
        *self
            .stop_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.to_string())
            .or_insert(0) += 1;

        match role {
            ContainerRole::Kdc => self.kdc.stop(),
            ContainerRole::Hdfs => {
                self.namenode.stop();
                self.hdfs_booted.store(false, Ordering::SeqCst);
            }
            ContainerRole::Node => self.engine.stop(),
        }
        self.started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&role);
        Ok(())
    }

    fn query_engine(&self) -> HarnessResult<Arc<dyn QueryEngine>> {
        if !self.is_started(ContainerRole::Node) {
            return Err(HarnessError::config("database node is not running"));
        }
        Ok(Arc::clone(&self.engine) as Arc<dyn QueryEngine>)
    }

    fn data_endpoint(&self) -> HarnessResult<Arc<dyn DataEndpoint>> {
        if !self.is_started(ContainerRole::Hdfs) {
            return Err(HarnessError::config("HDFS is not running"));
        }
        Ok(Arc::clone(&self.oracle) as Arc<dyn DataEndpoint>)
    }

    fn clock(&self) -> SharedClock {
        Arc::clone(&self.clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hdfs_requires_kdc() {
        let config = ClusterConfig::default();
        let cluster = SimulatedCluster::new(&config);
        let err = cluster
            .start_container(ContainerRole::Hdfs, &config)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("KDC is not running"));
    }

    #[tokio::test]
    async fn test_oracle_not_found_and_io_errors() {
        let config = ClusterConfig::default();
        let cluster = SimulatedCluster::new(&config);
        for role in ContainerRole::BOOT_ORDER {
            cluster.start_container(role, &config).await.unwrap();
        }
        let oracle = cluster.data_endpoint().unwrap();
        assert!(matches!(
            oracle.read_data("/absent").await.unwrap_err(),
            HarnessError::NotFound { .. }
        ));

        cluster.pause_container("kerberizedhdfs1").await.unwrap();
        assert!(matches!(
            oracle.write_data("/x", b"x").await.unwrap_err(),
            HarnessError::IoError { .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_container() {
        let config = ClusterConfig::default();
        let cluster = SimulatedCluster::new(&config);
        assert!(matches!(
            cluster.pause_container("zookeeper").await.unwrap_err(),
            HarnessError::UnknownContainer { .. }
        ));
    }
}
