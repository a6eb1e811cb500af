//! Named operations on behalf of a caller
//!
//! [`Fleet`] is the surface an outer layer (a web API, the CLI) talks to.
//! Every operation takes the caller's verified identity and an instance id,
//! resolves the caller's role afresh, and refuses with `Permission` when
//! the role lacks the action. Actions that need a live server are refused
//! with `Conflict` while the instance is stopped, before anything is sent.

use crate::context::FleetContext;
use crate::error::{FleetError, Result};
use crate::instance::{Instance, InstanceView};
use crate::model::CreateRequest;
use crate::permissions::Action;
use crate::registry::{PortReservation, Registry, ReloadReport};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use uuid::Uuid;

pub const DEFAULT_BACKUP_MESSAGE: &str = "manual backup";

pub struct Fleet {
    ctx: Arc<FleetContext>,
    registry: Registry,
}

impl Fleet {
    pub fn new(ctx: Arc<FleetContext>) -> Self {
        let registry = Registry::new(Arc::clone(&ctx));
        Self { ctx, registry }
    }

    /// Prepares storage and loads every instance found in it.
    pub async fn open(&self) -> Result<ReloadReport> {
        self.ctx.store.prepare().await?;
        self.registry.reload().await
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Creates an instance owned by `caller` on the next free port.
    pub async fn create(&self, caller: &str, request: &CreateRequest) -> Result<Instance> {
        let reservation = self.registry.allocate_port().await?;
        self.create_reserved(caller, request, reservation).await
    }

    /// Creates an instance on a caller-chosen port.
    pub async fn create_on_port(
        &self,
        caller: &str,
        request: &CreateRequest,
        port: u16,
    ) -> Result<Instance> {
        let reservation = self.registry.reserve_port(port).await?;
        self.create_reserved(caller, request, reservation).await
    }

    async fn create_reserved(
        &self,
        caller: &str,
        request: &CreateRequest,
        reservation: PortReservation,
    ) -> Result<Instance> {
        let port = reservation.port();
        if self.registry.port_in_use(port).await {
            return Err(FleetError::Conflict(format!("port {} is already in use", port)));
        }

        let id = Uuid::new_v4().to_string();
        let guard = self.registry.lock(&id).await;

        let result = Instance::create(Arc::clone(&self.ctx), &id, caller, request, port).await;
        match &result {
            Ok(instance) => self.registry.insert(instance.clone()).await,
            Err(e) => {
                error!("Creating instance {} for {} failed: {}", id, caller, e);
                let dir = self.ctx.store.instance_dir(&id);
                if fs::try_exists(&dir).await.unwrap_or(false) {
                    if let Err(purge) = self.ctx.store.purge(&id).await {
                        warn!("Could not purge partial instance {}: {}", id, purge);
                    }
                }
            }
        }

        self.registry.unlock(&id, guard);
        // the reservation is released only once the instance is registered
        drop(reservation);
        result
    }

    /// Loads the instance and checks `caller` may perform `action` on it.
    async fn authorize(&self, caller: &str, id: &str, action: Action) -> Result<Instance> {
        let instance = self.registry.get(id).await?;

        let role = instance.role(caller).await;
        if !role.allows(action) {
            debug!("{} ({}) refused {} on {}", caller, role, action, id);
            return Err(FleetError::Permission(format!(
                "{} may not {} on {}",
                role, action, id
            )));
        }
        if action.requires_running() && !instance.is_running().await {
            return Err(FleetError::Conflict(format!("instance {} is not running", id)));
        }
        Ok(instance)
    }

    pub async fn start(&self, caller: &str, id: &str) -> Result<()> {
        let _guard = self.registry.lock(id).await;
        let instance = self.authorize(caller, id, Action::Start).await?;
        instance.start().await
    }

    pub async fn stop(&self, caller: &str, id: &str, delay: Duration) -> Result<()> {
        let _guard = self.registry.lock(id).await;
        let instance = self.authorize(caller, id, Action::Stop).await?;
        instance.stop(delay).await
    }

    pub async fn delete(&self, caller: &str, id: &str) -> Result<()> {
        let guard = self.registry.lock(id).await;
        let mut instance = self.authorize(caller, id, Action::Delete).await?;
        instance.delete(caller).await?;
        self.registry.remove(id).await;
        self.registry.unlock(id, guard);
        Ok(())
    }

    pub async fn regen(&self, caller: &str, id: &str) -> Result<()> {
        let _guard = self.registry.lock(id).await;
        let instance = self.authorize(caller, id, Action::Regenerate).await?;
        instance.regen(caller, &self.registry).await
    }

    pub async fn upgrade(&self, caller: &str, id: &str) -> Result<()> {
        let _guard = self.registry.lock(id).await;
        // replacing the server jar is gated like regenerating the world
        let mut instance = self.authorize(caller, id, Action::Regenerate).await?;
        let result = instance.upgrade(caller).await;
        // the record may have moved on even if a later step failed
        match Instance::load(Arc::clone(&self.ctx), id).await {
            Ok(fresh) => self.registry.insert(fresh).await,
            Err(e) => warn!("Could not refresh instance {}: {}", id, e),
        }
        result
    }

    pub async fn add_op(&self, caller: &str, id: &str, player: &str) -> Result<()> {
        let _guard = self.registry.lock(id).await;
        let instance = self.authorize(caller, id, Action::AddOp).await?;
        instance.add_op(caller, player).await
    }

    pub async fn add_to_whitelist(&self, caller: &str, id: &str, player: &str) -> Result<()> {
        let _guard = self.registry.lock(id).await;
        let instance = self.authorize(caller, id, Action::AddWhitelist).await?;
        instance.add_to_whitelist(caller, player).await
    }

    pub async fn backup(&self, caller: &str, id: &str, message: Option<&str>) -> Result<()> {
        let _guard = self.registry.lock(id).await;
        let instance = self.authorize(caller, id, Action::Backup).await?;
        let message = message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_BACKUP_MESSAGE);
        instance.backup(message).await
    }

    pub async fn day(&self, caller: &str, id: &str) -> Result<()> {
        self.authorize(caller, id, Action::SetDay).await?.day().await
    }

    pub async fn weather_clear(&self, caller: &str, id: &str) -> Result<()> {
        self.authorize(caller, id, Action::ClearWeather)
            .await?
            .weather_clear()
            .await
    }

    pub async fn save(&self, caller: &str, id: &str) -> Result<()> {
        self.authorize(caller, id, Action::Save).await?.save().await
    }

    pub async fn view_for(&self, caller: &str) -> Vec<InstanceView> {
        self.registry.view_for(caller).await
    }

    /// Starts every instance flagged for autostart that is not already up.
    /// Failures are logged and do not stop the others.
    pub async fn autostart(&self) -> usize {
        let mut started = 0;
        for instance in self.registry.all().await {
            if self.ctx.is_shutting_down() {
                break;
            }
            if !instance.record().autostart {
                continue;
            }
            let _guard = self.registry.lock(instance.id()).await;
            if instance.is_running().await {
                continue;
            }
            match instance.start().await {
                Ok(()) => started += 1,
                Err(e) => error!("Autostart of {} failed: {}", instance.id(), e),
            }
        }
        info!("Autostarted {} instances", started);
        started
    }

    /// Asks every running instance to flush its world to disk.
    pub async fn save_running(&self) -> usize {
        let mut saved = 0;
        for instance in self.registry.all().await {
            if !instance.is_running().await {
                continue;
            }
            match instance.save().await {
                Ok(()) => saved += 1,
                Err(e) => warn!("Save of {} failed: {}", instance.id(), e),
            }
        }
        saved
    }
}
