//! Persisted records of a managed instance.

use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Server software variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    Vanilla,
    Spigot,
    Paper,
}

impl Flavor {
    pub const ALL: [Flavor; 3] = [Flavor::Vanilla, Flavor::Spigot, Flavor::Paper];

    pub fn as_str(self) -> &'static str {
        match self {
            Flavor::Vanilla => "vanilla",
            Flavor::Spigot => "spigot",
            Flavor::Paper => "paper",
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flavor {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Flavor::ALL
            .into_iter()
            .find(|flavor| flavor.as_str() == wanted)
            .ok_or_else(|| FleetError::Validation(format!("unknown flavor '{}'", s.trim())))
    }
}

/// Contents of `managed.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub uuid: String,
    pub name: String,
    pub owner: String,
    pub flavor: Flavor,
    pub release: String,
    #[serde(default)]
    pub autostart: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, rename = "minmem")]
    pub min_mem: String,
    #[serde(default, rename = "maxmem")]
    pub max_mem: String,
}

/// One entry of `ops.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpEntry {
    pub uuid: String,
    pub name: String,
    pub level: u8,
    #[serde(rename = "bypassesPlayerLimit")]
    pub bypasses_player_limit: bool,
}

impl OpEntry {
    /// Level granted to owners and ops added by the manager.
    pub const MAX_LEVEL: u8 = 4;
}

/// One entry of `whitelist.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub uuid: String,
    pub name: String,
}

/// Keys the manager owns; overrides may not touch them.
pub const PROTECTED_KEYS: [&str; 5] = [
    "server-port",
    "query.port",
    "rcon.port",
    "rcon.password",
    "enable-rcon",
];

/// Parameters for creating a new instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub name: String,
    pub flavor: String,
    pub release: String,
    pub game_mode: String,
    pub motd: String,
    pub world_type: String,
    pub seed: String,
    pub whitelist: bool,
    pub hardcore: bool,
    pub pvp: bool,
    pub autostart: bool,
    pub start_now: bool,
    /// Extra `server.properties` keys applied after the template.
    pub overrides: BTreeMap<String, String>,
}

impl CreateRequest {
    pub fn new(name: &str, flavor: &str, release: &str) -> Self {
        Self {
            name: name.to_string(),
            flavor: flavor.to_string(),
            release: release.to_string(),
            ..Self::default()
        }
    }

    /// Rejects override keys the manager controls or that would corrupt the
    /// properties file.
    pub fn validate_overrides(&self) -> Result<()> {
        for (key, value) in &self.overrides {
            let key = key.trim();
            if key.is_empty() || key.starts_with('#') || key.contains(&['=', '\n', '\r'][..]) {
                return Err(FleetError::Validation(format!(
                    "invalid property key '{}'",
                    key
                )));
            }
            if PROTECTED_KEYS.contains(&key) {
                return Err(FleetError::Validation(format!(
                    "property '{}' is managed automatically",
                    key
                )));
            }
            if value.contains(&['\n', '\r'][..]) {
                return Err(FleetError::Validation(format!(
                    "value for '{}' spans multiple lines",
                    key
                )));
            }
        }
        Ok(())
    }
}

impl Default for CreateRequest {
    fn default() -> Self {
        Self {
            name: String::new(),
            flavor: Flavor::Vanilla.to_string(),
            release: String::new(),
            game_mode: "survival".to_string(),
            motd: "A Minecraft Server".to_string(),
            world_type: "default".to_string(),
            seed: String::new(),
            whitelist: false,
            hardcore: false,
            pvp: true,
            autostart: false,
            start_now: false,
            overrides: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flavor_parsing() {
        assert_eq!("vanilla".parse::<Flavor>().unwrap(), Flavor::Vanilla);
        assert_eq!(" Paper ".parse::<Flavor>().unwrap(), Flavor::Paper);
        assert!(matches!(
            "forge".parse::<Flavor>(),
            Err(FleetError::Validation(_))
        ));
    }

    #[test]
    fn test_record_json_field_names() {
        let record = InstanceRecord {
            uuid: "abc".to_string(),
            name: "Survival".to_string(),
            owner: "alice".to_string(),
            flavor: Flavor::Spigot,
            release: "1.20.1".to_string(),
            autostart: true,
            deleted: false,
            min_mem: String::new(),
            max_mem: "4G".to_string(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["flavor"], "spigot");
        assert_eq!(json["maxmem"], "4G");
        assert_eq!(json["autostart"], true);

        let back: InstanceRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_record_defaults_for_missing_fields() {
        let json = r#"{"uuid":"u","name":"n","owner":"o","flavor":"vanilla","release":"1.19"}"#;
        let record: InstanceRecord = serde_json::from_str(json).unwrap();
        assert!(!record.deleted);
        assert!(!record.autostart);
        assert!(record.max_mem.is_empty());
    }

    #[test]
    fn test_op_entry_uses_game_field_names() {
        let op = OpEntry {
            uuid: "u".to_string(),
            name: "bob".to_string(),
            level: OpEntry::MAX_LEVEL,
            bypasses_player_limit: true,
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"bypassesPlayerLimit\":true"));
    }

    #[test]
    fn test_overrides_validation() {
        let mut request = CreateRequest::new("n", "vanilla", "1.20.1");
        request
            .overrides
            .insert("difficulty".to_string(), "hard".to_string());
        assert!(request.validate_overrides().is_ok());

        request
            .overrides
            .insert("rcon.port".to_string(), "1".to_string());
        assert!(matches!(
            request.validate_overrides(),
            Err(FleetError::Validation(_))
        ));

        let mut request = CreateRequest::new("n", "vanilla", "1.20.1");
        request
            .overrides
            .insert("motd".to_string(), "two\nlines".to_string());
        assert!(request.validate_overrides().is_err());
    }
}
