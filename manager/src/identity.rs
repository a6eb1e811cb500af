//! Player name to account id resolution.

use crate::error::{FleetError, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

pub const MOJANG_PROFILE_API: &str = "https://api.mojang.com/users/profiles/minecraft";

#[async_trait]
pub trait IdentityLookup: Send + Sync {
    /// Hyphenated account uuid for a player name.
    async fn lookup(&self, name: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct Profile {
    id: String,
}

/// Resolves names against the public profile API.
#[derive(Debug, Clone)]
pub struct MojangLookup {
    base: String,
    client: Client,
}

impl MojangLookup {
    pub fn new(base: impl Into<String>, limit: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(limit)
            .build()
            .map_err(|e| FleetError::Identity(e.to_string()))?;
        Ok(Self {
            base: base.into(),
            client,
        })
    }
}

#[async_trait]
impl IdentityLookup for MojangLookup {
    async fn lookup(&self, name: &str) -> Result<String> {
        let url = format!("{}/{}", self.base.trim_end_matches('/'), name.trim());
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FleetError::Identity(e.to_string()))?;

        match resp.status() {
            StatusCode::OK => {}
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => {
                return Err(FleetError::Identity(format!("no account named {}", name)))
            }
            status => {
                return Err(FleetError::Identity(format!(
                    "profile lookup for {} returned {}",
                    name, status
                )))
            }
        }

        let profile: Profile = resp
            .json()
            .await
            .map_err(|e| FleetError::Identity(e.to_string()))?;
        let id = parse_profile_id(&profile.id)?;
        debug!("Resolved {} to {}", name, id);
        Ok(id)
    }
}

/// The API returns ids without hyphens.
fn parse_profile_id(raw: &str) -> Result<String> {
    Uuid::parse_str(raw)
        .map(|id| id.hyphenated().to_string())
        .map_err(|e| FleetError::Identity(format!("bad profile id '{}': {}", raw, e)))
}

/// Deterministic ids for hosts without internet access.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineLookup;

impl OfflineLookup {
    pub fn id_for(name: &str) -> String {
        let seed = format!("OfflinePlayer:{}", name.trim());
        Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes())
            .hyphenated()
            .to_string()
    }
}

#[async_trait]
impl IdentityLookup for OfflineLookup {
    async fn lookup(&self, name: &str) -> Result<String> {
        if name.trim().is_empty() {
            return Err(FleetError::Validation("player name is empty".to_string()));
        }
        Ok(Self::id_for(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_profile_id_adds_hyphens() {
        let id = parse_profile_id("069a79f444e94726a5befca90e38aaf5").unwrap();
        assert_eq!(id, "069a79f4-44e9-4726-a5be-fca90e38aaf5");
        assert!(parse_profile_id("nope").is_err());
    }

    #[tokio::test]
    async fn test_offline_lookup_is_stable() {
        let a = OfflineLookup.lookup("alice").await.unwrap();
        let b = OfflineLookup.lookup(" alice ").await.unwrap();
        let c = OfflineLookup.lookup("bob").await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 36);
        assert!(OfflineLookup.lookup("  ").await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_api_is_identity_error() {
        let lookup = MojangLookup::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        assert!(matches!(
            lookup.lookup("alice").await,
            Err(FleetError::Identity(_))
        ));
    }
}
