//! Release artifacts per flavor.

use crate::error::{FleetError, Result};
use crate::model::Flavor;
use async_trait::async_trait;
use log::debug;
use std::cmp::Ordering;
use std::path::PathBuf;
use tokio::fs;

#[async_trait]
pub trait ReleaseProvider: Send + Sync {
    /// Makes sure the artifact for `version` is available and returns its path.
    async fn ensure(&self, flavor: Flavor, version: &str) -> Result<PathBuf>;

    /// Newest release known for `flavor`.
    async fn latest(&self, flavor: Flavor) -> Result<String>;
}

/// Serves releases from `jars/<flavor>/<release>.jar`
///
/// The cache is filled out of band; this provider never downloads.
#[derive(Debug, Clone)]
pub struct JarCache {
    jars_dir: PathBuf,
}

impl JarCache {
    pub fn new(jars_dir: impl Into<PathBuf>) -> Self {
        Self {
            jars_dir: jars_dir.into(),
        }
    }

    pub fn artifact_path(&self, flavor: Flavor, version: &str) -> PathBuf {
        self.jars_dir
            .join(flavor.as_str())
            .join(format!("{}.jar", version))
    }

    /// Versions cached for `flavor`, unsorted.
    pub async fn cached(&self, flavor: Flavor) -> Result<Vec<String>> {
        let dir = self.jars_dir.join(flavor.as_str());
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(version) = name.to_str().and_then(|n| n.strip_suffix(".jar")) {
                versions.push(version.to_string());
            }
        }
        Ok(versions)
    }
}

#[async_trait]
impl ReleaseProvider for JarCache {
    async fn ensure(&self, flavor: Flavor, version: &str) -> Result<PathBuf> {
        let version = version.trim();
        if version.is_empty() || version.contains(&['/', '\\'][..]) || version.starts_with('.') {
            return Err(FleetError::Validation(format!(
                "'{}' is not a valid release",
                version
            )));
        }

        let path = self.artifact_path(flavor, version);
        if fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
            debug!("Release {} {} found at {}", flavor, version, path.display());
            Ok(path)
        } else {
            Err(FleetError::Release(format!(
                "{} {} is not in the jar cache",
                flavor, version
            )))
        }
    }

    async fn latest(&self, flavor: Flavor) -> Result<String> {
        self.cached(flavor)
            .await?
            .into_iter()
            .max_by(|a, b| compare_versions(a, b))
            .ok_or_else(|| FleetError::Release(format!("no {} releases cached", flavor)))
    }
}

/// Orders dotted versions numerically, so `1.20.1` sorts after `1.9.4`.
/// Non-numeric parts compare as text.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}
