//! In-memory index of every instance on disk
//!
//! The registry owns the id to [`Instance`] map and is the only way to reach
//! it. Readers get clones; writers either swap in a freshly scanned map
//! ([`Registry::reload`]) or insert and remove single entries.
//!
//! Every change to the map (reload, insert, remove) and every port decision
//! runs under one writer lock, so a reload can never swap out an instance
//! that was registered while the directory scan was in flight.
//!
//! It also hands out game ports and per-instance locks:
//! - a port is reserved the moment it is allocated and stays reserved until
//!   the [`PortReservation`] is dropped, so concurrent creates never collide
//! - [`Registry::lock`] serialises destructive operations on one instance;
//!   the lock table is independent of the map and survives reloads

use crate::context::FleetContext;
use crate::error::{FleetError, Result};
use crate::instance::{Instance, InstanceView};
use log::{info, warn};
use shared::{control_port, DEFAULT_BASE_PORT};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, OwnedMutexGuard, RwLock};

/// Outcome of a directory scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub loaded: Vec<String>,
    pub skipped: Vec<String>,
}

/// A game port held for an instance that is still being created
///
/// Released on drop.
#[derive(Debug)]
pub struct PortReservation {
    port: u16,
    reserved: Arc<Mutex<BTreeSet<u16>>>,
}

impl PortReservation {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        locked(&self.reserved).remove(&self.port);
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Registry {
    ctx: Arc<FleetContext>,
    instances: RwLock<HashMap<String, Instance>>,
    reserved: Arc<Mutex<BTreeSet<u16>>>,
    /// Held by anything that changes the map or decides on a port
    writer: AsyncMutex<()>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Registry {
    pub fn new(ctx: Arc<FleetContext>) -> Self {
        Self {
            ctx,
            instances: RwLock::new(HashMap::new()),
            reserved: Arc::new(Mutex::new(BTreeSet::new())),
            writer: AsyncMutex::new(()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<FleetContext> {
        &self.ctx
    }

    /// Rescans `servers/` and replaces the map
    ///
    /// Readers keep seeing the old map until the swap; writers wait for the
    /// whole scan. Directories that fail to load are logged and left out.
    pub async fn reload(&self) -> Result<ReloadReport> {
        let writer = self.writer.lock().await;
        self.reload_locked(&writer).await
    }

    async fn reload_locked(&self, _writer: &AsyncMutexGuard<'_, ()>) -> Result<ReloadReport> {
        let mut fresh = HashMap::new();
        let mut report = ReloadReport::default();

        for id in self.ctx.store.list_instance_ids().await? {
            match Instance::load(Arc::clone(&self.ctx), &id).await {
                Ok(instance) => {
                    fresh.insert(id.clone(), instance);
                    report.loaded.push(id);
                }
                Err(e) => {
                    warn!("Skipping instance {}: {}", id, e);
                    report.skipped.push(id);
                }
            }
        }

        *self.instances.write().await = fresh;
        info!(
            "Registry loaded {} instances, skipped {}",
            report.loaded.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Looks up a live instance. Deleted ones count as missing.
    pub async fn get(&self, id: &str) -> Result<Instance> {
        self.instances
            .read()
            .await
            .get(id)
            .filter(|instance| !instance.is_deleted())
            .cloned()
            .ok_or_else(|| FleetError::NotFound(id.to_string()))
    }

    pub async fn insert(&self, instance: Instance) {
        let _writer = self.writer.lock().await;
        self.instances
            .write()
            .await
            .insert(instance.id().to_string(), instance);
    }

    pub async fn remove(&self, id: &str) -> Option<Instance> {
        let _writer = self.writer.lock().await;
        self.instances.write().await.remove(id)
    }

    /// Every live instance, sorted by id.
    pub async fn all(&self) -> Vec<Instance> {
        let mut all: Vec<Instance> = self
            .instances
            .read()
            .await
            .values()
            .filter(|instance| !instance.is_deleted())
            .cloned()
            .collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    /// Next free game port above everything known or reserved
    ///
    /// The rescan and the choice happen under the writer lock. An instance
    /// created meanwhile is either still reserved or already in the map.
    pub async fn allocate_port(&self) -> Result<PortReservation> {
        let writer = self.writer.lock().await;
        self.reload_locked(&writer).await?;

        let known = self.used_ports().await;
        let mut reserved = locked(&self.reserved);
        let highest = known
            .iter()
            .chain(reserved.iter())
            .copied()
            .chain(std::iter::once(DEFAULT_BASE_PORT))
            .max()
            .unwrap_or(DEFAULT_BASE_PORT);
        let port = highest
            .checked_add(1)
            .ok_or_else(|| FleetError::Conflict("no game ports left".to_string()))?;

        reserved.insert(port);
        info!("Allocated port {}", port);
        Ok(PortReservation {
            port,
            reserved: Arc::clone(&self.reserved),
        })
    }

    /// Holds a caller-chosen port
    ///
    /// Fails with `Conflict` if a registered instance or another reservation
    /// already uses the port or its control port.
    pub async fn reserve_port(&self, port: u16) -> Result<PortReservation> {
        if port == 0 {
            return Err(FleetError::Validation("no port was allocated".to_string()));
        }
        let wanted_control = control_port(port).ok_or_else(|| {
            FleetError::Validation(format!("port {} leaves no room for a control port", port))
        })?;

        let _writer = self.writer.lock().await;
        let known = self.used_ports().await;
        let mut reserved = locked(&self.reserved);

        let clashes = |taken: u16| {
            taken == port || taken == wanted_control || control_port(taken) == Some(port)
        };
        if known.iter().chain(reserved.iter()).copied().any(clashes) {
            return Err(FleetError::Conflict(format!("port {} is already in use", port)));
        }

        reserved.insert(port);
        Ok(PortReservation {
            port,
            reserved: Arc::clone(&self.reserved),
        })
    }

    /// Game and control ports of every registered instance, deleted or not.
    async fn used_ports(&self) -> BTreeSet<u16> {
        let instances = self.instances.read().await;
        let mut ports = BTreeSet::new();
        for instance in instances.values() {
            ports.extend(instance.port());
            ports.extend(instance.control_port());
        }
        ports
    }

    /// Whether any registered instance already uses `port` as game port.
    pub async fn port_in_use(&self, port: u16) -> bool {
        self.instances
            .read()
            .await
            .values()
            .any(|instance| instance.port() == Some(port))
    }

    /// Exclusive access to one instance for destructive operations.
    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = locked(&self.locks);
            Arc::clone(locks.entry(id.to_string()).or_default())
        };
        mutex.lock_owned().await
    }

    /// Releases `guard` and forgets the lock for `id` unless someone else
    /// holds or waits for it.
    pub fn unlock(&self, id: &str, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut locks = locked(&self.locks);
        if let Some(mutex) = locks.get(id) {
            if Arc::strong_count(mutex) == 1 {
                locks.remove(id);
            }
        }
    }

    /// Number of ids with a lock in the table.
    pub fn tracked_locks(&self) -> usize {
        locked(&self.locks).len()
    }

    /// Instances `identity` owns, ops, or is whitelisted on.
    pub async fn view_for(&self, identity: &str) -> Vec<InstanceView> {
        let mut views = Vec::new();
        for instance in self.all().await {
            if instance.visible_to(identity).await {
                views.push(instance.view(identity).await);
            }
        }
        views
    }
}
