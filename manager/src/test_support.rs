//! In-memory collaborators for unit tests.

use crate::config::ManagerConfig;
use crate::context::FleetContext;
use crate::dispatch::CommandTransport;
use crate::error::{FleetError, Result};
use crate::identity::{IdentityLookup, OfflineLookup};
use crate::instance::Instance;
use crate::launcher::{LaunchSpec, Launcher};
use crate::model::{CreateRequest, OpEntry, WhitelistEntry};
use crate::properties::{Properties, PROPERTIES_FILE};
use crate::releases::JarCache;
use crate::snapshot::SnapshotBackend;
use crate::storage::{Store, OPS_FILE, WHITELIST_FILE};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::watch;

/// Pretend game servers: "launching" marks the control port up, commands
/// are answered the way a real server would and edit its role lists.
#[derive(Default)]
pub struct FakeWorld {
    state: Mutex<WorldState>,
}

#[derive(Default)]
struct WorldState {
    up: HashMap<u16, PathBuf>,
    sent: Vec<String>,
    launches: usize,
    ignore_stop: bool,
}

impl FakeWorld {
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn launches(&self) -> usize {
        self.state.lock().unwrap().launches
    }

    pub fn ignore_stop(&self, ignore: bool) {
        self.state.lock().unwrap().ignore_stop = ignore;
    }
}

fn read_properties(dir: &Path) -> Result<Properties> {
    let text = std::fs::read_to_string(dir.join(PROPERTIES_FILE))?;
    Ok(Properties::parse(&text))
}

fn append_json<T>(path: &Path, entry: T)
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    let mut entries: Vec<T> = std::fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default();
    entries.push(entry);
    std::fs::write(path, serde_json::to_string_pretty(&entries).unwrap()).unwrap();
}

#[async_trait]
impl CommandTransport for FakeWorld {
    async fn send(&self, endpoint: SocketAddr, secret: &str, command: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let dir = match state.up.get(&endpoint.port()) {
            Some(dir) => dir.clone(),
            None => return Err(FleetError::Transport("connection refused".to_string())),
        };
        let props = read_properties(&dir)?;
        if props.rcon_password() != secret {
            return Err(FleetError::Transport("authentication rejected".to_string()));
        }
        state.sent.push(command.to_string());

        let reply = if command == "stop" {
            if !state.ignore_stop {
                state.up.remove(&endpoint.port());
            }
            "Stopping the server".to_string()
        } else if command == "list" {
            "There are 1 of a max of 20 players online: alice".to_string()
        } else if command == "whitelist list" {
            let entries: Vec<WhitelistEntry> = std::fs::read_to_string(dir.join(WHITELIST_FILE))
                .ok()
                .and_then(|text| serde_json::from_str(&text).ok())
                .unwrap_or_default();
            let names: Vec<String> = entries.into_iter().map(|entry| entry.name).collect();
            format!(
                "There are {} whitelisted players: {}",
                names.len(),
                names.join(", ")
            )
        } else if let Some(name) = command.strip_prefix("whitelist add ") {
            append_json(
                &dir.join(WHITELIST_FILE),
                WhitelistEntry {
                    uuid: OfflineLookup::id_for(name),
                    name: name.to_string(),
                },
            );
            format!("Added {} to the whitelist", name)
        } else if let Some(name) = command.strip_prefix("op ") {
            append_json(
                &dir.join(OPS_FILE),
                OpEntry {
                    uuid: OfflineLookup::id_for(name),
                    name: name.to_string(),
                    level: OpEntry::MAX_LEVEL,
                    bypasses_player_limit: false,
                },
            );
            format!("Made {} a server operator", name)
        } else {
            String::new()
        };
        Ok(reply)
    }

    async fn probe(&self, endpoint: SocketAddr) -> bool {
        self.state.lock().unwrap().up.contains_key(&endpoint.port())
    }
}

impl Launcher for FakeWorld {
    fn launch(&self, spec: &LaunchSpec) -> Result<()> {
        let props = read_properties(&spec.cwd)?;
        let port = props
            .rcon_port()
            .ok_or_else(|| FleetError::Validation("no rcon port".to_string()))?;

        let mut state = self.state.lock().unwrap();
        state.up.insert(port, spec.cwd.clone());
        state.launches += 1;
        Ok(())
    }
}

/// Remembers commit messages instead of running a VCS.
#[derive(Default)]
pub struct RecordingSnapshots {
    initialized: Mutex<Vec<PathBuf>>,
    messages: Mutex<Vec<String>>,
}

impl RecordingSnapshots {
    pub fn initialized(&self) -> Vec<PathBuf> {
        self.initialized.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl SnapshotBackend for RecordingSnapshots {
    async fn initialize(&self, dir: &Path) -> Result<()> {
        self.initialized.lock().unwrap().push(dir.to_path_buf());
        Ok(())
    }

    async fn commit(&self, _dir: &Path, message: &str) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// Offline lookups that can be told to fail.
#[derive(Default)]
pub struct SwitchableLookup {
    fail: AtomicBool,
}

#[async_trait]
impl IdentityLookup for SwitchableLookup {
    async fn lookup(&self, name: &str) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(FleetError::Identity(format!("lookup of {} failed", name)));
        }
        OfflineLookup.lookup(name).await
    }
}

pub const CACHED_JARS: [(&str, &str); 5] = [
    ("vanilla", "1.20.1"),
    ("vanilla", "1.20.4"),
    ("vanilla", "1.16.5"),
    ("paper", "1.20.1"),
    ("spigot", "1.20.1"),
];

pub struct Harness {
    _tmp: TempDir,
    ctx: Arc<FleetContext>,
    pub world: Arc<FakeWorld>,
    pub snapshots: Arc<RecordingSnapshots>,
    identities: Arc<SwitchableLookup>,
    shutdown: watch::Sender<bool>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut ManagerConfig)) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = ManagerConfig::new(tmp.path().join("storage"));
        config.stop_timeout = std::time::Duration::from_secs(10);
        adjust(&mut config);

        let store = Store::new(config.storage_dir());
        std::fs::create_dir_all(store.servers_dir()).unwrap();
        for (flavor, release) in CACHED_JARS {
            let dir = store.jars_dir().join(flavor);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(format!("{}.jar", release)), b"PK").unwrap();
        }

        let world = Arc::new(FakeWorld::default());
        let snapshots = Arc::new(RecordingSnapshots::default());
        let identities = Arc::new(SwitchableLookup::default());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let ctx = Arc::new(FleetContext {
            releases: Arc::new(JarCache::new(store.jars_dir())),
            transport: world.clone(),
            launcher: world.clone(),
            snapshots: snapshots.clone(),
            identities: identities.clone(),
            store,
            config,
            shutdown: shutdown_rx,
        });

        Self {
            _tmp: tmp,
            ctx,
            world,
            snapshots,
            identities,
            shutdown,
        }
    }

    pub fn ctx(&self) -> Arc<FleetContext> {
        Arc::clone(&self.ctx)
    }

    pub fn store(&self) -> &Store {
        &self.ctx.store
    }

    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn identities_fail(&self) {
        self.identities.fail.store(true, Ordering::SeqCst);
    }

    /// A stopped vanilla 1.20.1 instance owned by alice.
    pub async fn instance(&self, id: &str, port: u16) -> Instance {
        let request = CreateRequest::new("Survival", "vanilla", "1.20.1");
        Instance::create(self.ctx(), id, "alice", &request, port)
            .await
            .unwrap()
    }
}
