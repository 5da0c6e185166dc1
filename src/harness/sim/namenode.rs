//! Simulated HDFS namenode
//!
//! Owner/group/mode permission checks in the HDFS style, authenticated by
//! Kerberos tickets. Only what the scenarios touch: create, read, mkdir.

use super::kdc::{SimulatedKdc, Ticket};
use crate::harness::config::{short_name, DirectorySpec};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const FILE_MODE: u16 = 0o644;
const DIR_MODE: u16 = 0o755;
const SUPERGROUP: &str = "supergroup";

/// Requested access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    fn bit(self) -> u16 {
        match self {
            Access::Read => 0o4,
            Access::Write => 0o2,
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => f.write_str("READ"),
            Access::Write => f.write_str("WRITE"),
        }
    }
}

#[derive(Debug, Clone)]
enum Content {
    Directory,
    File(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Inode {
    owner: String,
    group: String,
    mode: u16,
    content: Content,
}

impl Inode {
    fn permission_string(&self) -> String {
        let kind = match self.content {
            Content::Directory => 'd',
            Content::File(_) => '-',
        };
        let mut out = String::with_capacity(10);
        out.push(kind);
        for shift in [6u16, 3, 0] {
            let bits = (self.mode >> shift) & 0o7;
            out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        out
    }
}

pub struct SimulatedNameNode {
    address: String,
    superuser: String,
    kdc: Arc<SimulatedKdc>,
    inodes: Mutex<BTreeMap<String, Inode>>,
    running: AtomicBool,
    paused: AtomicBool,
}

impl SimulatedNameNode {
    pub fn new(address: &str, kdc: Arc<SimulatedKdc>) -> Self {
        Self {
            address: address.to_string(),
            superuser: "hdfs".to_string(),
            kdc,
            inodes: Mutex::new(BTreeMap::new()),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    /// Lay out the initial directory tree and start serving
    pub fn start(&self, directories: &[DirectorySpec]) {
        let mut inodes = self.lock();
        inodes.entry("/".to_string()).or_insert_with(|| Inode {
            owner: self.superuser.clone(),
            group: SUPERGROUP.to_string(),
            mode: DIR_MODE,
            content: Content::Directory,
        });
        for dir in directories {
            inodes.insert(
                normalize(&dir.path),
                Inode {
                    owner: dir.owner.clone(),
                    group: dir.group.clone(),
                    mode: dir.mode,
                    content: Content::Directory,
                },
            );
        }
        drop(inodes);
        self.running.store(true, Ordering::SeqCst);
        log::debug!("Namenode {} started", self.address);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.paused.load(Ordering::SeqCst)
    }

    /// Create or overwrite `path` as the ticket's principal
    pub fn create(&self, ticket: &Ticket, path: &str, data: &[u8]) -> Result<(), String> {
        let user = self.authenticate(ticket)?;
        self.create_as(&user, path, data)
    }

    /// Read `path` as the ticket's principal
    pub fn read(&self, ticket: &Ticket, path: &str) -> Result<Vec<u8>, String> {
        let user = self.authenticate(ticket)?;
        self.read_as(&user, path)
    }

    /// Create or overwrite without Kerberos; used by the oracle
    pub fn create_as(&self, user: &str, path: &str, data: &[u8]) -> Result<(), String> {
        self.ensure_reachable()?;
        let path = normalize(path);
        let mut inodes = self.lock();

        match inodes.get(&path) {
            Some(Inode {
                content: Content::Directory,
                ..
            }) => return Err(format!("{} is a directory", path)),
            Some(existing) => self.check(user, &path, existing, Access::Write)?,
            None => {
                let (ancestor_path, ancestor) = nearest_ancestor(&inodes, &path)
                    .ok_or_else(|| format!("File does not exist: {}", path))?;
                if !matches!(ancestor.content, Content::Directory) {
                    return Err(format!("Parent path is not a directory: {}", ancestor_path));
                }
                self.check(user, &ancestor_path, ancestor, Access::Write)?;
            }
        }

        for parent in missing_parents(&inodes, &path) {
            inodes.insert(
                parent,
                Inode {
                    owner: user.to_string(),
                    group: SUPERGROUP.to_string(),
                    mode: DIR_MODE,
                    content: Content::Directory,
                },
            );
        }

        let (owner, group, mode) = match inodes.get(&path) {
            Some(existing) => (existing.owner.clone(), existing.group.clone(), existing.mode),
            None => (user.to_string(), SUPERGROUP.to_string(), FILE_MODE),
        };
        inodes.insert(
            path,
            Inode {
                owner,
                group,
                mode,
                content: Content::File(data.to_vec()),
            },
        );
        Ok(())
    }

    /// Read without Kerberos; used by the oracle
    pub fn read_as(&self, user: &str, path: &str) -> Result<Vec<u8>, String> {
        self.ensure_reachable()?;
        let path = normalize(path);
        let inodes = self.lock();
        let inode = inodes
            .get(&path)
            .ok_or_else(|| format!("File does not exist: {}", path))?;
        self.check(user, &path, inode, Access::Read)?;
        match &inode.content {
            Content::File(data) => Ok(data.clone()),
            Content::Directory => Err(format!("{} is a directory", path)),
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.lock().contains_key(&normalize(path))
    }

    fn authenticate(&self, ticket: &Ticket) -> Result<String, String> {
        self.ensure_reachable()?;
        self.kdc.verify(ticket)?;
        Ok(short_name(&ticket.principal).to_string())
    }

    fn ensure_reachable(&self) -> Result<(), String> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(format!(
                "Call to {} failed on connection exception: Connection refused",
                self.address
            ))
        }
    }

    fn check(&self, user: &str, path: &str, inode: &Inode, access: Access) -> Result<(), String> {
        if user == self.superuser {
            return Ok(());
        }
        let bits = if inode.owner == user {
            (inode.mode >> 6) & 0o7
        } else {
            inode.mode & 0o7
        };
        if bits & access.bit() != 0 {
            Ok(())
        } else {
            Err(format!(
                "Permission denied: user={}, access={}, inode=\"{}\":{}:{}:{}",
                user,
                access,
                path,
                inode.owner,
                inode.group,
                inode.permission_string()
            ))
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Inode>> {
        self.inodes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn parent_of(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(pos) => Some(path[..pos].to_string()),
        None => None,
    }
}

fn nearest_ancestor<'a>(
    inodes: &'a BTreeMap<String, Inode>,
    path: &str,
) -> Option<(String, &'a Inode)> {
    let mut current = parent_of(path);
    while let Some(candidate) = current {
        if let Some(inode) = inodes.get(&candidate) {
            return Some((candidate, inode));
        }
        current = parent_of(&candidate);
    }
    None
}

fn missing_parents(inodes: &BTreeMap<String, Inode>, path: &str) -> Vec<String> {
    let mut missing = Vec::new();
    let mut current = parent_of(path);
    while let Some(candidate) = current {
        if inodes.contains_key(&candidate) {
            break;
        }
        current = parent_of(&candidate);
        missing.push(candidate);
    }
    missing.reverse();
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::clock::ManualClock;
    use crate::harness::config::ClusterConfig;
    use std::time::Duration;

    fn setup() -> (ManualClock, Arc<SimulatedKdc>, SimulatedNameNode) {
        let clock = ManualClock::new();
        let kdc = Arc::new(SimulatedKdc::new(
            "TEST.REALM",
            Duration::from_secs(15),
            Arc::new(clock.clone()),
        ));
        kdc.start(&["root".to_string(), "specuser".to_string()]);
        let namenode = SimulatedNameNode::new("kerberizedhdfs1:9000", Arc::clone(&kdc));
        namenode.start(&ClusterConfig::default().hdfs.directories);
        (clock, kdc, namenode)
    }

    #[test]
    fn test_owner_can_write_root() {
        let (_, kdc, namenode) = setup();
        let ticket = kdc.kinit("root").unwrap();
        namenode.create(&ticket, "/simple_storage1", b"1\tMark\t72.53\n").unwrap();
        assert_eq!(
            namenode.read(&ticket, "/simple_storage1").unwrap(),
            b"1\tMark\t72.53\n"
        );
    }

    #[test]
    fn test_other_user_denied_write_on_root() {
        let (_, kdc, namenode) = setup();
        let ticket = kdc.kinit("specuser").unwrap();
        let err = namenode
            .create(&ticket, "/storage_user_two_prohibited", b"x")
            .unwrap_err();
        assert_eq!(
            err,
            "Permission denied: user=specuser, access=WRITE, inode=\"/\":root:supergroup:drwxr-xr-x"
        );
        assert!(!namenode.exists("/storage_user_two_prohibited"));
    }

    #[test]
    fn test_home_directory_write_and_cross_read() {
        let (_, kdc, namenode) = setup();
        let spec = kdc.kinit("specuser").unwrap();
        let root = kdc.kinit("root").unwrap();
        namenode
            .create(&spec, "/user/specuser/storage_user_two", b"1\tIlyaIdeal\t74\n")
            .unwrap();
        assert_eq!(
            namenode.read(&root, "/user/specuser/storage_user_two").unwrap(),
            b"1\tIlyaIdeal\t74\n"
        );
        let err = namenode
            .create(&root, "/user/specuser/storage_user_two", b"overwrite")
            .unwrap_err();
        assert!(err.contains("user=root, access=WRITE"));
    }

    #[test]
    fn test_expired_ticket_rejected() {
        let (clock, kdc, namenode) = setup();
        let ticket = kdc.kinit("root").unwrap();
        clock.advance(Duration::from_secs(45));
        let err = namenode.create(&ticket, "/late", b"x").unwrap_err();
        assert!(err.contains("GSS initiate failed"));
    }

    #[test]
    fn test_missing_parents_created_for_writer() {
        let (_, kdc, namenode) = setup();
        let ticket = kdc.kinit("specuser").unwrap();
        namenode
            .create(&ticket, "/user/specuser/a/b/c", b"deep")
            .unwrap();
        assert!(namenode.exists("/user/specuser/a"));
        assert!(namenode.exists("/user/specuser/a/b"));
    }

    #[test]
    fn test_read_missing_file() {
        let (_, kdc, namenode) = setup();
        let ticket = kdc.kinit("root").unwrap();
        let err = namenode.read(&ticket, "/nope").unwrap_err();
        assert_eq!(err, "File does not exist: /nope");
    }

    #[test]
    fn test_paused_namenode_refuses_connections() {
        let (_, _, namenode) = setup();
        namenode.set_paused(true);
        let err = namenode.read_as("root", "/").unwrap_err();
        assert!(err.contains("Connection refused"));
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(normalize("x/"), "/x");
        assert_eq!(parent_of("/a/b"), Some("/a".to_string()));
        assert_eq!(parent_of("/a"), Some("/".to_string()));
        assert_eq!(parent_of("/"), None);
    }
}
