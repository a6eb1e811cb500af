//! On-disk layout of the fleet
//!
//! Everything the manager persists lives under one storage root:
//! - `jars/<flavor>/<release>.jar` is the shared release cache
//! - `servers/<uuid>/` holds one instance: its record, properties, role
//!   lists, EULA, deployed jar and snapshot history
//! - `audit.log` collects one line per privileged change
//!
//! The store only knows paths and file formats. Deciding *when* to touch a
//! file belongs to [`crate::instance`].

use crate::error::{FleetError, Result};
use crate::model::{InstanceRecord, OpEntry, WhitelistEntry};
use chrono::Local;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

pub const RECORD_FILE: &str = "managed.json";
pub const OPS_FILE: &str = "ops.json";
pub const WHITELIST_FILE: &str = "whitelist.json";
pub const EULA_FILE: &str = "eula.txt";
pub const AUDIT_FILE: &str = "audit.log";

/// Paths erased when an instance's world is regenerated.
pub const WORLD_PATHS: [&str; 5] = ["logs", "world", "world_nether", "world_the_end", ".git"];

/// Handle on the storage root
///
/// Cheap to clone; holds nothing but the root path.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the root and its `jars/` and `servers/` subdirectories
    ///
    /// Safe to call on every boot; existing directories are left alone.
    pub async fn prepare(&self) -> Result<()> {
        fs::create_dir_all(self.jars_dir()).await?;
        fs::create_dir_all(self.servers_dir()).await?;
        info!("Storage prepared at {}", self.root.display());
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn jars_dir(&self) -> PathBuf {
        self.root.join("jars")
    }

    pub fn servers_dir(&self) -> PathBuf {
        self.root.join("servers")
    }

    pub fn instance_dir(&self, id: &str) -> PathBuf {
        self.servers_dir().join(id)
    }

    /// Directory names found under `servers/`
    ///
    /// Plain files are ignored. Order is sorted so reloads are stable.
    pub async fn list_instance_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(self.servers_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => ids.push(name),
                Err(name) => warn!("Ignoring non UTF-8 instance directory {:?}", name),
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Creates the directory for a new instance
    ///
    /// Fails with `Conflict` if something already sits at that path; ids are
    /// never reused.
    pub async fn create_instance_dir(&self, id: &str) -> Result<PathBuf> {
        check_id(id)?;
        let dir = self.instance_dir(id);
        fs::create_dir_all(self.servers_dir()).await?;
        match fs::create_dir(&dir).await {
            Ok(()) => Ok(dir),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(FleetError::Conflict(
                format!("instance directory {} already exists", id),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read_record(&self, id: &str) -> Result<InstanceRecord> {
        read_json(&self.instance_dir(id).join(RECORD_FILE)).await
    }

    pub async fn write_record(&self, record: &InstanceRecord) -> Result<()> {
        write_json(&self.instance_dir(&record.uuid).join(RECORD_FILE), record).await
    }

    /// Ops list of an instance; a missing file reads as empty.
    pub async fn read_ops(&self, id: &str) -> Result<Vec<OpEntry>> {
        read_json_list(&self.instance_dir(id).join(OPS_FILE)).await
    }

    pub async fn write_ops(&self, id: &str, ops: &[OpEntry]) -> Result<()> {
        write_json(&self.instance_dir(id).join(OPS_FILE), ops).await
    }

    /// Whitelist of an instance; a missing file reads as empty.
    pub async fn read_whitelist(&self, id: &str) -> Result<Vec<WhitelistEntry>> {
        read_json_list(&self.instance_dir(id).join(WHITELIST_FILE)).await
    }

    pub async fn write_whitelist(&self, id: &str, entries: &[WhitelistEntry]) -> Result<()> {
        write_json(&self.instance_dir(id).join(WHITELIST_FILE), entries).await
    }

    /// Writes `name` inside the instance directory, replacing any old content.
    pub async fn write_file(&self, id: &str, name: &str, contents: &[u8]) -> Result<()> {
        fs::write(self.instance_dir(id).join(name), contents).await?;
        Ok(())
    }

    /// Removes a file or directory tree inside an instance
    ///
    /// Missing paths count as already erased.
    pub async fn erase(&self, id: &str, sub: &str) -> Result<()> {
        let path = self.instance_dir(id).join(sub);
        let result = match fs::symlink_metadata(&path).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path).await,
            Ok(_) => fs::remove_file(&path).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                debug!("Erased {} from instance {}", sub, id);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn accept_eula(&self, id: &str) -> Result<()> {
        self.write_file(id, EULA_FILE, b"eula=true\n").await
    }

    /// Copies a cached release artifact into the instance as `<release>.jar`.
    pub async fn deploy_artifact(&self, artifact: &Path, id: &str, release: &str) -> Result<PathBuf> {
        let target = self.instance_dir(id).join(format!("{}.jar", release));
        fs::copy(artifact, &target).await?;
        debug!("Deployed {} into instance {}", artifact.display(), id);
        Ok(target)
    }

    /// Removes an instance directory tree
    ///
    /// Refuses unless the directory resolves to a path strictly inside
    /// `servers/`.
    pub async fn purge(&self, id: &str) -> Result<()> {
        let dir = self.contained_dir(id).await?;
        fs::remove_dir_all(&dir).await?;
        info!("Purged instance directory {}", id);
        Ok(())
    }

    /// Canonical path of an existing instance directory, checked to sit
    /// strictly inside `servers/`.
    pub async fn contained_dir(&self, id: &str) -> Result<PathBuf> {
        check_id(id)?;
        let servers = fs::canonicalize(self.servers_dir()).await?;
        let dir = fs::canonicalize(self.instance_dir(id)).await?;

        if dir == servers || !dir.starts_with(&servers) {
            return Err(FleetError::Validation(format!(
                "instance {} resolves outside the server storage",
                id
            )));
        }
        Ok(dir)
    }

    /// Appends `<timestamp> <what> [<who>] <detail>` to `audit.log`.
    pub async fn audit(&self, who: &str, what: &str, detail: &str) -> Result<()> {
        let line = format!(
            "{} {} [{}] {}\n",
            Local::now().format("%Y/%m/%d %H:%M:%S"),
            what,
            who,
            detail
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(AUDIT_FILE))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// An id must be a single plain path component.
fn check_id(id: &str) -> Result<()> {
    let mut components = Path::new(id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(FleetError::Validation(format!(
            "'{}' is not a valid instance id",
            id
        ))),
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&text)?)
}

async fn read_json_list<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    match fs::read_to_string(path).await {
        Ok(text) if text.trim().is_empty() => Ok(Vec::new()),
        Ok(text) => Ok(serde_json::from_str(&text)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).await?;
    Ok(())
}
