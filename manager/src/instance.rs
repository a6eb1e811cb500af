//! A single managed game server
//!
//! An [`Instance`] couples the persisted record and properties of one server
//! directory with the collaborators needed to act on it. Running state is
//! never stored: every question about it goes through the liveness probe,
//! so a server that died out of band is noticed on the next call.
//!
//! Multi-step operations stop at the first failing step. Nothing is rolled
//! back; the snapshot history is the recovery path.

use crate::context::FleetContext;
use crate::error::{FleetError, Result};
use crate::launcher::LaunchSpec;
use crate::model::{CreateRequest, Flavor, InstanceRecord, OpEntry, WhitelistEntry};
use crate::permissions::{self, Permissions, Role};
use crate::properties::Properties;
use crate::registry::Registry;
use crate::storage::WORLD_PATHS;
use log::{debug, info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

/// Length of the generated control-endpoint secret
pub const SECRET_LEN: usize = 20;

/// Gap between liveness probes while waiting for a stop
pub const STOP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What a caller sees of an instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceView {
    pub uuid: String,
    pub name: String,
    pub owner: String,
    pub flavor: Flavor,
    pub release: String,
    pub address: String,
    pub port: Option<u16>,
    pub autostart: bool,
    pub running: bool,
    pub game_mode: String,
    pub hardcore: bool,
    pub motd: String,
    pub pvp: bool,
    pub seed: String,
    pub world_type: String,
    pub whitelist_enabled: bool,
    /// As reported by the running server; empty while stopped
    pub whitelist: Vec<String>,
    pub players: Vec<String>,
    pub ops: Vec<String>,
    pub permissions: Permissions,
}

#[derive(Clone)]
pub struct Instance {
    record: InstanceRecord,
    props: Properties,
    dir: PathBuf,
    ctx: Arc<FleetContext>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("uuid", &self.record.uuid)
            .field("name", &self.record.name)
            .field("dir", &self.dir)
            .finish()
    }
}

impl Instance {
    /// Reads an existing instance from its directory.
    pub async fn load(ctx: Arc<FleetContext>, id: &str) -> Result<Self> {
        let record = ctx.store.read_record(id).await?;
        if record.uuid != id {
            return Err(FleetError::Validation(format!(
                "record in {} claims id {}",
                id, record.uuid
            )));
        }
        let dir = ctx.store.instance_dir(id);
        let props = Properties::load(&dir).await?;

        Ok(Self {
            record,
            props,
            dir,
            ctx,
        })
    }

    /// Builds a brand new instance directory under `id`
    ///
    /// Everything that can be checked up front is checked before the
    /// directory exists. Once it does, a failure leaves a partial directory
    /// behind and the caller is expected to purge it.
    pub async fn create(
        ctx: Arc<FleetContext>,
        id: &str,
        owner: &str,
        request: &CreateRequest,
        port: u16,
    ) -> Result<Self> {
        let flavor: Flavor = request.flavor.parse()?;
        if port == 0 {
            return Err(FleetError::Validation("no port was allocated".to_string()));
        }
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(FleetError::Validation("owner is empty".to_string()));
        }
        let release = request.release.trim();
        if release.is_empty() {
            return Err(FleetError::Validation("release is empty".to_string()));
        }
        request.validate_overrides()?;

        let mut props = Properties::default_template();
        props.apply_request(request);
        props.set_port(port)?;
        props.enable_rcon(&generate_secret());

        let artifact = ctx.releases.ensure(flavor, release).await?;

        let dir = ctx.store.create_instance_dir(id).await?;
        props.save(&dir).await?;
        ctx.store.accept_eula(id).await?;
        ctx.store.deploy_artifact(&artifact, id, release).await?;

        let name = request.name.trim();
        let record = InstanceRecord {
            uuid: id.to_string(),
            name: if name.is_empty() { id.to_string() } else { name.to_string() },
            owner: owner.to_string(),
            flavor,
            release: release.to_string(),
            autostart: request.autostart,
            deleted: false,
            min_mem: String::new(),
            max_mem: String::new(),
        };
        ctx.store.write_record(&record).await?;

        let instance = Self {
            record,
            props,
            dir,
            ctx,
        };

        let owner_id = instance.ctx.identities.lookup(owner).await?;
        instance.add_op_offline(owner, &owner_id, true).await?;
        if instance.whitelist_enabled() {
            instance.add_whitelist_offline(owner, &owner_id, true).await?;
        }

        instance.ctx.snapshots.initialize(&instance.dir).await?;
        instance
            .audit(owner, "create", &format!("created server {}", id))
            .await;
        info!(
            "Created instance {} ({}) for {} on port {}",
            instance.record.name, id, owner, port
        );

        if request.start_now {
            instance.start().await?;
        }
        Ok(instance)
    }

    pub fn id(&self) -> &str {
        &self.record.uuid
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn owner(&self) -> &str {
        &self.record.owner
    }

    pub fn record(&self) -> &InstanceRecord {
        &self.record
    }

    pub fn properties(&self) -> &Properties {
        &self.props
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn port(&self) -> Option<u16> {
        self.props.server_port()
    }

    pub fn control_port(&self) -> Option<u16> {
        self.props.rcon_port()
    }

    pub fn is_deleted(&self) -> bool {
        self.record.deleted
    }

    pub fn whitelist_enabled(&self) -> bool {
        self.props.whitelist_enabled()
    }

    fn endpoint(&self) -> Result<SocketAddr> {
        self.control_port()
            .map(|port| SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
            .ok_or_else(|| {
                FleetError::Transport(format!("instance {} has no control port", self.id()))
            })
    }

    /// Probes the control endpoint.
    pub async fn is_running(&self) -> bool {
        match self.endpoint() {
            Ok(endpoint) => self.ctx.transport.probe(endpoint).await,
            Err(_) => false,
        }
    }

    async fn dispatch(&self, command: &str) -> Result<String> {
        let endpoint = self.endpoint()?;
        debug!("{} <- {}", self.id(), command);
        self.ctx
            .transport
            .send(endpoint, self.props.rcon_password(), command)
            .await
    }

    async fn audit(&self, who: &str, what: &str, detail: &str) {
        if let Err(e) = self.ctx.store.audit(who, what, detail).await {
            warn!("Could not write audit entry for {}: {}", self.id(), e);
        }
    }

    pub async fn start(&self) -> Result<()> {
        if self.is_running().await {
            return Err(FleetError::Conflict(format!(
                "instance {} is already running",
                self.id()
            )));
        }

        let spec = LaunchSpec::for_instance(&self.record, &self.dir, &self.ctx.config);
        self.ctx.launcher.launch(&spec)?;
        info!("Started instance {} ({})", self.name(), self.id());
        Ok(())
    }

    /// Warns players, waits `delay`, then stops the server and waits for the
    /// probe to go quiet
    ///
    /// Returns at once if the instance is not running. The wait is bounded by
    /// the configured stop timeout and ends early on manager shutdown.
    pub async fn stop(&self, delay: Duration) -> Result<()> {
        if !self.is_running().await {
            debug!("Instance {} already stopped", self.id());
            return Ok(());
        }

        self.dispatch(&format!(
            "say Server shutting down in {} seconds",
            delay.as_secs()
        ))
        .await?;

        let mut shutdown = self.ctx.shutdown.clone();
        tokio::select! {
            _ = sleep(delay) => {}
            _ = cancelled(&mut shutdown) => return Err(FleetError::Cancelled),
        }

        self.dispatch("stop").await?;

        let limit = self.ctx.config.stop_timeout;
        let deadline = Instant::now() + limit;
        while self.is_running().await {
            if Instant::now() >= deadline {
                return Err(FleetError::Timeout(limit));
            }
            tokio::select! {
                _ = sleep(STOP_POLL_INTERVAL) => {}
                _ = cancelled(&mut shutdown) => return Err(FleetError::Cancelled),
            }
        }

        info!("Stopped instance {} ({})", self.name(), self.id());
        Ok(())
    }

    /// Stops the instance, marks it deleted and removes its directory.
    pub async fn delete(&mut self, caller: &str) -> Result<()> {
        self.ctx.store.contained_dir(self.id()).await?;
        self.stop(Duration::ZERO).await?;

        self.record.deleted = true;
        self.record.autostart = false;
        self.ctx.store.write_record(&self.record).await?;
        self.ctx.snapshots.commit(&self.dir, "deleted").await?;
        self.ctx.store.purge(self.id()).await?;

        self.audit(caller, "delete", &format!("deleted server {}", self.id()))
            .await;
        info!("Deleted instance {} ({})", self.name(), self.id());
        Ok(())
    }

    /// Throws away the world and the snapshot history, keeping configuration
    /// and role lists.
    pub async fn regen(&self, caller: &str, registry: &Registry) -> Result<()> {
        let was_running = self.is_running().await;
        if was_running {
            self.stop(Duration::ZERO).await?;
        }

        for path in WORLD_PATHS {
            self.ctx.store.erase(self.id(), path).await?;
        }
        self.ctx.snapshots.initialize(&self.dir).await?;
        self.audit(caller, "regen", &format!("regenerated world of {}", self.id()))
            .await;

        registry.reload().await?;

        if was_running {
            self.start().await?;
        }
        info!("Regenerated instance {} ({})", self.name(), self.id());
        Ok(())
    }

    /// Moves the instance to the newest release of its flavor.
    pub async fn upgrade(&mut self, caller: &str) -> Result<()> {
        let was_running = self.is_running().await;
        if was_running {
            self.stop(Duration::ZERO).await?;
        }

        self.backup("pre upgrade").await?;

        let latest = self.ctx.releases.latest(self.record.flavor).await?;
        info!(
            "Upgrading instance {} from {} to {}",
            self.id(),
            self.record.release,
            latest
        );
        self.record.release = latest;
        self.ctx.store.write_record(&self.record).await?;

        let artifact = self
            .ctx
            .releases
            .ensure(self.record.flavor, &self.record.release)
            .await?;
        self.ctx
            .store
            .deploy_artifact(&artifact, self.id(), &self.record.release)
            .await?;

        self.backup("post upgrade").await?;
        self.audit(
            caller,
            "upgrade",
            &format!("upgraded {} to {}", self.id(), self.record.release),
        )
        .await;

        if was_running {
            self.start().await?;
        }
        Ok(())
    }

    pub async fn day(&self) -> Result<()> {
        self.dispatch("time set day").await.map(drop)
    }

    pub async fn weather_clear(&self) -> Result<()> {
        self.dispatch("weather clear").await.map(drop)
    }

    pub async fn save(&self) -> Result<()> {
        self.dispatch("save-all").await.map(drop)
    }

    pub async fn backup(&self, message: &str) -> Result<()> {
        self.ctx.snapshots.commit(&self.dir, message).await
    }

    /// Grants op through the running server, bracketed by snapshots
    ///
    /// Whether the player is also whitelisted follows the configured policy.
    pub async fn add_op(&self, caller: &str, name: &str) -> Result<()> {
        let name = checked_player(name)?;

        self.backup(&format!("before op {}", name)).await?;
        self.dispatch(&format!("op {}", name)).await?;
        self.audit(caller, "op:add", &format!("opped {} on {}", name, self.id()))
            .await;

        if self
            .ctx
            .config
            .op_whitelist_policy
            .applies(self.whitelist_enabled())
        {
            self.dispatch(&format!("whitelist add {}", name)).await?;
            self.audit(
                caller,
                "whitelist:add",
                &format!("whitelisted {} on {}", name, self.id()),
            )
            .await;
        }

        self.backup(&format!("after op {}", name)).await
    }

    /// Whitelists through the running server. Does nothing when the
    /// instance does not enforce a whitelist.
    pub async fn add_to_whitelist(&self, caller: &str, name: &str) -> Result<()> {
        if !self.whitelist_enabled() {
            return Ok(());
        }
        let name = checked_player(name)?;

        self.backup(&format!("before whitelist {}", name)).await?;
        self.dispatch(&format!("whitelist add {}", name)).await?;
        self.audit(
            caller,
            "whitelist:add",
            &format!("whitelisted {} on {}", name, self.id()),
        )
        .await;
        self.backup(&format!("after whitelist {}", name)).await
    }

    /// Appends to `ops.json` directly; only valid while the server is down.
    /// With `force`, an unreadable ops file counts as empty.
    pub async fn add_op_offline(&self, name: &str, uuid: &str, force: bool) -> Result<()> {
        let name = checked_player(name)?;
        let mut ops = match self.ctx.store.read_ops(self.id()).await {
            Ok(ops) => ops,
            Err(e) if force => {
                warn!("Ignoring unreadable ops list of {}: {}", self.id(), e);
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        ops.push(OpEntry {
            uuid: uuid.to_string(),
            name: name.to_string(),
            level: OpEntry::MAX_LEVEL,
            bypasses_player_limit: true,
        });
        self.ctx.store.write_ops(self.id(), &ops).await?;
        self.audit(
            self.owner(),
            "op:add",
            &format!("opped {} on {}", name, self.id()),
        )
        .await;
        Ok(())
    }

    pub async fn add_whitelist_offline(&self, name: &str, uuid: &str, force: bool) -> Result<()> {
        let name = checked_player(name)?;
        let mut entries = match self.ctx.store.read_whitelist(self.id()).await {
            Ok(entries) => entries,
            Err(e) if force => {
                warn!("Ignoring unreadable whitelist of {}: {}", self.id(), e);
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        entries.push(WhitelistEntry {
            uuid: uuid.to_string(),
            name: name.to_string(),
        });
        self.ctx.store.write_whitelist(self.id(), &entries).await?;
        self.audit(
            self.owner(),
            "whitelist:add",
            &format!("whitelisted {} on {}", name, self.id()),
        )
        .await;
        Ok(())
    }

    /// Ops as listed on disk; unreadable lists read as empty.
    pub async fn ops(&self) -> Vec<OpEntry> {
        self.ctx.store.read_ops(self.id()).await.unwrap_or_else(|e| {
            warn!("Could not read ops of {}: {}", self.id(), e);
            Vec::new()
        })
    }

    pub async fn whitelist(&self) -> Vec<WhitelistEntry> {
        self.ctx.store.read_whitelist(self.id()).await.unwrap_or_else(|e| {
            warn!("Could not read whitelist of {}: {}", self.id(), e);
            Vec::new()
        })
    }

    pub async fn is_op(&self, player: &str) -> bool {
        self.ops().await.iter().any(|op| op.name == player)
    }

    pub async fn is_whitelisted(&self, player: &str) -> bool {
        self.whitelist()
            .await
            .iter()
            .any(|entry| entry.name == player)
    }

    /// Resolved fresh on every call since ops change underneath us.
    pub async fn role(&self, identity: &str) -> Role {
        permissions::resolve(identity, self.owner(), &self.ops().await)
    }

    /// Whether `identity` should see this instance at all.
    pub async fn visible_to(&self, identity: &str) -> bool {
        self.owner() == identity
            || self.is_op(identity).await
            || (self.whitelist_enabled() && self.is_whitelisted(identity).await)
    }

    /// Players currently online, empty when the server does not answer.
    pub async fn players(&self) -> Vec<String> {
        match self.dispatch("list").await {
            Ok(reply) => parse_names(&reply),
            Err(e) => {
                debug!("No player list from {}: {}", self.id(), e);
                Vec::new()
            }
        }
    }

    /// Whitelist as the running server reports it.
    pub async fn whitelist_listing(&self) -> Result<Vec<String>> {
        Ok(parse_names(&self.dispatch("whitelist list").await?))
    }

    pub async fn view(&self, identity: &str) -> InstanceView {
        let running = self.is_running().await;
        let (players, whitelist) = if running {
            let whitelist = self.whitelist_listing().await.unwrap_or_else(|e| {
                debug!("No whitelist listing from {}: {}", self.id(), e);
                Vec::new()
            });
            (self.players().await, whitelist)
        } else {
            (Vec::new(), Vec::new())
        };
        let port = self.port();
        let props = &self.props;

        InstanceView {
            uuid: self.record.uuid.clone(),
            name: self.record.name.clone(),
            owner: self.record.owner.clone(),
            flavor: self.record.flavor,
            release: self.record.release.clone(),
            address: match port {
                Some(port) => format!("{}:{}", self.ctx.config.hostname, port),
                None => self.ctx.config.hostname.clone(),
            },
            port,
            autostart: self.record.autostart,
            running,
            game_mode: props.get("gamemode").to_string(),
            hardcore: props.get("hardcore") == "true",
            motd: props.get("motd").to_string(),
            pvp: props.get("pvp") == "true",
            seed: props.get("level-seed").to_string(),
            world_type: props.get("level-type").to_string(),
            whitelist_enabled: self.whitelist_enabled(),
            whitelist,
            players,
            ops: self.ops().await.into_iter().map(|op| op.name).collect(),
            permissions: Permissions::for_role(self.role(identity).await),
        }
    }
}

fn checked_player(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(FleetError::Validation("player name is empty".to_string()));
    }
    if name.contains(char::is_whitespace) {
        return Err(FleetError::Validation(format!(
            "'{}' is not a valid player name",
            name
        )));
    }
    Ok(name)
}

fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect()
}

/// Names after the first `:` of a `list` style reply, comma separated.
pub fn parse_names(reply: &str) -> Vec<String> {
    match reply.split_once(':') {
        Some((_, names)) => names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    }
}

/// Resolves once shutdown has been signalled. Pends forever if the sender
/// is gone without signalling.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
