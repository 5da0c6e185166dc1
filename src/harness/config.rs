//! Cluster configuration
//!
//! Loaded from YAML, with a small set of environment overrides:
//! - `KDFS_BACKEND` (`sim` or `docker`)
//! - `KDFS_EXPIRY_WAIT_SECS`
//! - `KDFS_TICKET_LIFETIME_SECS`

use super::error::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;

/// Which topology implementation runs the scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process simulation with a manual clock
    #[default]
    Sim,
    /// Real containers via testcontainers
    Docker,
}

impl BackendKind {
    pub fn parse(value: &str) -> HarnessResult<Self> {
        match value.trim().to_lowercase().as_str() {
            "sim" | "simulated" => Ok(BackendKind::Sim),
            "docker" | "testcontainers" => Ok(BackendKind::Docker),
            other => Err(HarnessError::config(format!(
                "Unknown backend '{}', expected 'sim' or 'docker'",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Sim => "sim",
            BackendKind::Docker => "docker",
        }
    }
}

/// Bind mount for a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    pub host: String,
    pub container: String,
}

/// One container of the topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Name inside the cluster network; also the pause/unpause key
    pub name: String,
    pub image: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    /// Startup is complete once this line appears on stdout
    #[serde(default)]
    pub ready_message: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
}

fn default_tag() -> String {
    "latest".to_string()
}

/// Directory created during HDFS bootstrap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySpec {
    pub path: String,
    pub owner: String,
    #[serde(default = "default_group")]
    pub group: String,
    /// POSIX permission bits, e.g. `0o755`
    pub mode: u16,
}

fn default_group() -> String {
    "supergroup".to_string()
}

/// HDFS service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HdfsSpec {
    pub container: ContainerSpec,
    #[serde(default = "default_hdfs_port")]
    pub port: u16,
    /// User the oracle client acts as
    #[serde(default = "default_oracle_user")]
    pub oracle_user: String,
    /// Run before each oracle command on the Docker backend
    #[serde(default)]
    pub oracle_kinit: Option<String>,
    /// Shell commands run inside the container after it reports ready
    #[serde(default)]
    pub bootstrap_commands: Vec<String>,
    #[serde(default)]
    pub directories: Vec<DirectorySpec>,
}

fn default_hdfs_port() -> u16 {
    9000
}

fn default_oracle_user() -> String {
    "root".to_string()
}

/// Database node settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub container: ContainerSpec,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Where the rendered `<hdfs>` sections land inside the node container
    #[serde(default = "default_node_hdfs_config")]
    pub hdfs_config_path: String,
}

fn default_http_port() -> u16 {
    8123
}

fn default_node_hdfs_config() -> String {
    "/etc/clickhouse-server/config.d/kerberized_hdfs.xml".to_string()
}

/// Credential sections of the engine's HDFS configuration
///
/// Keys are written with underscores (`hadoop_kerberos_principal`) and
/// read back with dots (`hadoop.kerberos.principal`), matching how the
/// engine maps its XML sections onto libhdfs options. `per_user` sections
/// apply when a URI carries `user@` in its authority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineHdfsConfig {
    #[serde(default)]
    pub global: BTreeMap<String, String>,
    #[serde(default)]
    pub per_user: BTreeMap<String, BTreeMap<String, String>>,
}

/// Option that may only appear in the global section
pub const TICKET_CACHE_PATH_KEY: &str = "hadoop.security.kerberos.ticket.cache.path";

/// Option naming the principal a section authenticates as
pub const PRINCIPAL_KEY: &str = "hadoop.kerberos.principal";

/// Option naming the keytab a section authenticates with
pub const KEYTAB_KEY: &str = "hadoop.kerberos.keytab";

/// Normalized key/value options
pub type HdfsSection = BTreeMap<String, String>;

impl EngineHdfsConfig {
    pub fn normalize_key(key: &str) -> String {
        key.replace('_', ".")
    }

    fn normalized(section: &BTreeMap<String, String>) -> HdfsSection {
        section
            .iter()
            .map(|(k, v)| (Self::normalize_key(k), v.clone()))
            .collect()
    }

    pub fn global_section(&self) -> HdfsSection {
        Self::normalized(&self.global)
    }

    pub fn user_section(&self, user: &str) -> Option<HdfsSection> {
        self.per_user.get(user).map(Self::normalized)
    }

    /// Options in effect for `user`: global, then the user's section on top.
    ///
    /// A user section may not set the ticket cache path; the cache is shared
    /// by every identity the engine logs in as.
    pub fn effective_for(&self, user: Option<&str>) -> HarnessResult<HdfsSection> {
        let mut effective = self.global_section();
        if let Some(user) = user {
            if let Some(section) = self.user_section(user) {
                if section.contains_key(TICKET_CACHE_PATH_KEY) {
                    return Err(HarnessError::config(format!(
                        "{} cannot be set per user",
                        TICKET_CACHE_PATH_KEY
                    )));
                }
                effective.extend(section);
            }
        }
        Ok(effective)
    }

    /// Every principal the engine authenticates as, global first
    pub fn principals(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        std::iter::once(self.global_section())
            .chain(self.per_user.values().map(Self::normalized))
            .filter_map(|section| section.get(PRINCIPAL_KEY).cloned())
            .filter(|principal| seen.insert(principal.clone()))
            .collect()
    }

    /// Render the sections as an engine configuration file.
    ///
    /// The global section becomes `<hdfs>`, each user section `<hdfs_USER>`.
    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<clickhouse>\n");
        push_xml_section(&mut xml, "hdfs", &self.global);
        for (user, section) in &self.per_user {
            push_xml_section(&mut xml, &format!("hdfs_{}", user), section);
        }
        xml.push_str("</clickhouse>\n");
        xml
    }
}

fn push_xml_section(xml: &mut String, tag: &str, section: &BTreeMap<String, String>) {
    xml.push_str(&format!("    <{}>\n", tag));
    for (key, value) in section {
        xml.push_str(&format!("        <{0}>{1}</{0}>\n", key, xml_escape(value)));
    }
    xml.push_str(&format!("    </{}>\n", tag));
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Full cluster configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub backend: BackendKind,
    pub realm: String,
    pub kdc: ContainerSpec,
    pub hdfs: HdfsSpec,
    pub node: NodeSpec,
    /// Principals registered at the KDC, without the realm
    #[serde(default)]
    pub principals: Vec<String>,
    /// Directory inside every container where the KDC exports keytabs
    #[serde(default = "default_keytab_dir")]
    pub keytab_dir: String,
    #[serde(default)]
    pub engine_hdfs: EngineHdfsConfig,
    #[serde(default = "default_ticket_lifetime")]
    pub ticket_lifetime_secs: u64,
    /// How long fault injection waits for tickets to expire
    #[serde(default = "default_expiry_wait")]
    pub expiry_wait_secs: u64,
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,
}

fn default_keytab_dir() -> String {
    "/tmp/keytab".to_string()
}

fn default_ticket_lifetime() -> u64 {
    15
}

fn default_expiry_wait() -> u64 {
    45
}

fn default_startup_timeout() -> u64 {
    180
}

fn default_query_timeout() -> u64 {
    30000
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let realm = "TEST.HARNESS.LOCAL".to_string();

        let mut global = BTreeMap::new();
        global.insert(
            "hadoop_security_authentication".to_string(),
            "kerberos".to_string(),
        );
        global.insert(
            "hadoop_kerberos_keytab".to_string(),
            "/tmp/keytab/node.keytab".to_string(),
        );
        global.insert(
            "hadoop_kerberos_principal".to_string(),
            format!("root@{}", realm),
        );
        global.insert(
            "hadoop_kerberos_kinit_command".to_string(),
            "kinit".to_string(),
        );

        let mut per_user = BTreeMap::new();
        per_user.insert(
            "suser".to_string(),
            BTreeMap::from([(
                "hadoop_kerberos_principal".to_string(),
                format!("specuser@{}", realm),
            )]),
        );
        per_user.insert(
            "dedicatedcachepath".to_string(),
            BTreeMap::from([(
                "hadoop_security_kerberos_ticket_cache_path".to_string(),
                "/tmp/kerb_cache".to_string(),
            )]),
        );

        Self {
            backend: BackendKind::Sim,
            kdc: ContainerSpec {
                name: "hdfskerberos".to_string(),
                image: "kerberos-kdc".to_string(),
                tag: default_tag(),
                ready_message: Some("krb5kdc: starting".to_string()),
                env: BTreeMap::from([("KRB_REALM".to_string(), realm.clone())]),
                mounts: Vec::new(),
            },
            hdfs: HdfsSpec {
                container: ContainerSpec {
                    name: "kerberizedhdfs1".to_string(),
                    image: "kerberized-hadoop".to_string(),
                    tag: default_tag(),
                    ready_message: Some("NameNode RPC up".to_string()),
                    env: BTreeMap::from([("KERBEROS_REALM".to_string(), realm.clone())]),
                    mounts: Vec::new(),
                },
                port: default_hdfs_port(),
                oracle_user: default_oracle_user(),
                oracle_kinit: Some(format!("kinit -kt /tmp/keytab/root.keytab root@{}", realm)),
                bootstrap_commands: vec![
                    "kinit -kt /tmp/keytab/hdfs.keytab hdfs/kerberizedhdfs1".to_string(),
                    "hdfs dfs -mkdir -p /user/specuser".to_string(),
                    "hdfs dfs -chown specuser /user/specuser".to_string(),
                ],
                directories: vec![
                    DirectorySpec {
                        path: "/".to_string(),
                        owner: "root".to_string(),
                        group: default_group(),
                        mode: 0o755,
                    },
                    DirectorySpec {
                        path: "/user".to_string(),
                        owner: "root".to_string(),
                        group: default_group(),
                        mode: 0o755,
                    },
                    DirectorySpec {
                        path: "/user/specuser".to_string(),
                        owner: "specuser".to_string(),
                        group: default_group(),
                        mode: 0o755,
                    },
                ],
            },
            node: NodeSpec {
                container: ContainerSpec {
                    name: "node1".to_string(),
                    image: "clickhouse/clickhouse-server".to_string(),
                    tag: default_tag(),
                    ready_message: None,
                    env: BTreeMap::new(),
                    mounts: Vec::new(),
                },
                http_port: default_http_port(),
                hdfs_config_path: default_node_hdfs_config(),
            },
            principals: vec![
                "root".to_string(),
                "specuser".to_string(),
                "hdfs/kerberizedhdfs1".to_string(),
            ],
            keytab_dir: default_keytab_dir(),
            engine_hdfs: EngineHdfsConfig { global, per_user },
            realm,
            ticket_lifetime_secs: default_ticket_lifetime(),
            expiry_wait_secs: default_expiry_wait(),
            startup_timeout_secs: default_startup_timeout(),
            query_timeout_ms: default_query_timeout(),
        }
    }
}

impl ClusterConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| HarnessError::IoError {
            message: e.to_string(),
            path: path.display().to_string(),
        })?;
        Self::from_yaml(&content).map_err(|e| match e {
            HarnessError::ConfigError { message } => HarnessError::config(format!(
                "{}: {}",
                path.display(),
                message
            )),
            other => other,
        })
    }

    pub fn from_yaml(content: &str) -> HarnessResult<Self> {
        let config: ClusterConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> HarnessResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Apply `KDFS_*` environment overrides
    pub fn apply_env(mut self) -> HarnessResult<Self> {
        if let Ok(backend) = std::env::var("KDFS_BACKEND") {
            self.backend = BackendKind::parse(&backend)?;
        }
        if let Ok(secs) = std::env::var("KDFS_EXPIRY_WAIT_SECS") {
            self.expiry_wait_secs = parse_secs("KDFS_EXPIRY_WAIT_SECS", &secs)?;
        }
        if let Ok(secs) = std::env::var("KDFS_TICKET_LIFETIME_SECS") {
            self.ticket_lifetime_secs = parse_secs("KDFS_TICKET_LIFETIME_SECS", &secs)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.expiry_wait_secs <= self.ticket_lifetime_secs {
            return Err(HarnessError::config(format!(
                "expiry_wait_secs ({}) must exceed ticket_lifetime_secs ({})",
                self.expiry_wait_secs, self.ticket_lifetime_secs
            )));
        }

        let mut names = HashSet::new();
        for name in self.container_names() {
            if !names.insert(name) {
                return Err(HarnessError::config(format!(
                    "Duplicate container name '{}'",
                    name
                )));
            }
        }

        let global = self.engine_hdfs.global_section();
        if let (Some(principal), false) = (global.get(PRINCIPAL_KEY), self.principals.is_empty()) {
            let short = short_name(principal);
            if !self.principals.iter().any(|p| short_name(p) == short) {
                return Err(HarnessError::config(format!(
                    "Engine principal '{}' is not registered at the KDC",
                    principal
                )));
            }
        }
        Ok(())
    }

    /// Container names in boot order
    pub fn container_names(&self) -> [&str; 3] {
        [
            self.kdc.name.as_str(),
            self.hdfs.container.name.as_str(),
            self.node.container.name.as_str(),
        ]
    }

    pub fn ticket_lifetime(&self) -> Duration {
        Duration::from_secs(self.ticket_lifetime_secs)
    }

    pub fn expiry_wait(&self) -> Duration {
        Duration::from_secs(self.expiry_wait_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// `user` → `user@REALM`; principals that already name a realm are kept
    pub fn qualify(&self, principal: &str) -> String {
        if principal.contains('@') {
            principal.to_string()
        } else {
            format!("{}@{}", principal, self.realm)
        }
    }

    /// Keytab exported for `principal`, named after its short name
    pub fn keytab_path(&self, principal: &str) -> String {
        format!("{}/{}.keytab", self.keytab_dir, short_name(principal))
    }

    /// Commands run in the KDC container to register every principal.
    ///
    /// Each principal gets its own keytab, and the engine's principals are
    /// also exported into the keytab its global section names.
    pub fn kdc_bootstrap_commands(&self) -> Vec<String> {
        let mut commands = Vec::new();
        for principal in &self.principals {
            let principal = self.qualify(principal);
            commands.push(format!("kadmin.local -q \"addprinc -randkey {}\"", principal));
            commands.push(format!(
                "kadmin.local -q \"ktadd -norandkey -k {} {}\"",
                self.keytab_path(&principal),
                principal
            ));
        }
        if let Some(keytab) = self.engine_hdfs.global_section().get(KEYTAB_KEY) {
            for principal in self.engine_hdfs.principals() {
                commands.push(format!(
                    "kadmin.local -q \"ktadd -norandkey -k {} {}\"",
                    keytab,
                    self.qualify(&principal)
                ));
            }
        }
        commands.push(format!("chmod 644 {}/*.keytab", self.keytab_dir));
        commands
    }

    /// Base URI of the HDFS service as seen from the database node
    pub fn hdfs_uri(&self, path: &str) -> String {
        format!("hdfs://{}:{}{}", self.hdfs.container.name, self.hdfs.port, path)
    }

    /// Same as [`hdfs_uri`](Self::hdfs_uri) with a `user@` authority
    pub fn hdfs_uri_as(&self, user: &str, path: &str) -> String {
        format!(
            "hdfs://{}@{}:{}{}",
            user, self.hdfs.container.name, self.hdfs.port, path
        )
    }
}

fn parse_secs(var: &str, value: &str) -> HarnessResult<u64> {
    value.trim().parse::<u64>().map_err(|_| {
        HarnessError::config(format!("{} must be a number of seconds, got '{}'", var, value))
    })
}

/// `user/instance@REALM` → `user`
pub fn short_name(principal: &str) -> &str {
    let without_realm = principal.split('@').next().unwrap_or(principal);
    without_realm.split('/').next().unwrap_or(without_realm)
}
