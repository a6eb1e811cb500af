//! Shared collaborators handed to every instance.

use crate::config::ManagerConfig;
use crate::dispatch::{CommandTransport, RconTransport};
use crate::error::Result;
use crate::identity::{IdentityLookup, MojangLookup, MOJANG_PROFILE_API};
use crate::launcher::{Launcher, ProcessLauncher};
use crate::releases::{JarCache, ReleaseProvider};
use crate::snapshot::{GitBackend, SnapshotBackend};
use crate::storage::Store;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

pub struct FleetContext {
    pub config: ManagerConfig,
    pub store: Store,
    pub transport: Arc<dyn CommandTransport>,
    pub snapshots: Arc<dyn SnapshotBackend>,
    pub releases: Arc<dyn ReleaseProvider>,
    pub identities: Arc<dyn IdentityLookup>,
    pub launcher: Arc<dyn Launcher>,
    /// Flips to `true` when the manager is shutting down
    pub shutdown: watch::Receiver<bool>,
}

impl FleetContext {
    /// Production wiring: RCON, git, the local jar cache, the public profile
    /// API and real processes.
    pub fn new(config: ManagerConfig, shutdown: watch::Receiver<bool>) -> Result<Self> {
        let store = Store::new(config.storage_dir());
        let identities = MojangLookup::new(MOJANG_PROFILE_API, config.command_timeout)?;

        Ok(Self {
            transport: Arc::new(RconTransport::new(
                config.command_timeout,
                config.probe_timeout,
            )),
            snapshots: Arc::new(GitBackend::default()),
            releases: Arc::new(JarCache::new(store.jars_dir())),
            identities: Arc::new(identities),
            launcher: Arc::new(ProcessLauncher),
            store,
            config,
            shutdown,
        })
    }

    pub fn with_transport(mut self, transport: Arc<dyn CommandTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotBackend>) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn with_releases(mut self, releases: Arc<dyn ReleaseProvider>) -> Self {
        self.releases = releases;
        self
    }

    pub fn with_identities(mut self, identities: Arc<dyn IdentityLookup>) -> Self {
        self.identities = identities;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl fmt::Debug for FleetContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FleetContext")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
