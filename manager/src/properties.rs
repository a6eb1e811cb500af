//! Codec for an instance's `server.properties` file.
//!
//! The file is a flat list of `key=value` lines. Reading is forgiving:
//! comments, blank lines and anything too short to hold a pair are skipped,
//! lines without `=` are logged and dropped. Writing is deterministic: keys
//! come out sorted, one per line.

use crate::error::{FleetError, Result};
use crate::model::CreateRequest;
use log::warn;
use shared::control_port;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

pub const PROPERTIES_FILE: &str = "server.properties";

/// Template every new instance starts from.
pub const DEFAULT_PROPERTIES: &str = "
allow-flight=false
allow-nether=true
broadcast-console-to-ops=true
broadcast-rcon-to-ops=true
difficulty=easy
enable-command-block=false
enable-jmx-monitoring=false
enable-query=false
enable-rcon=false
enable-status=true
enforce-whitelist=false
entity-broadcast-range-percentage=100
force-gamemode=false
function-permission-level=2
gamemode=survival
generate-structures=true
generator-settings=
hardcore=false
level-name=world
level-seed=
level-type=default
max-build-height=256
max-players=20
max-tick-time=60000
max-world-size=29999984
motd=A Minecraft Server
network-compression-threshold=256
online-mode=true
op-permission-level=4
player-idle-timeout=0
prevent-proxy-connections=false
pvp=true
query.port=25565
rate-limit=0
rcon.password=
rcon.port=25575
resource-pack=
resource-pack-sha1=
server-ip=
server-port=25565
snooper-enabled=true
spawn-animals=true
spawn-monsters=true
spawn-npcs=true
spawn-protection=16
sync-chunk-writes=true
use-native-transport=true
view-distance=10
white-list=false
";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    pub fn parse(text: &str) -> Self {
        let mut values = BTreeMap::new();

        for line in text.lines() {
            if line.starts_with('#') || line.len() < 3 {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => {
                    values.insert(key.to_string(), value.to_string());
                }
                None => warn!("Skipping unparsable properties line '{}'", line),
            }
        }

        Self { values }
    }

    pub fn default_template() -> Self {
        Self::parse(DEFAULT_PROPERTIES)
    }

    pub async fn load(dir: &Path) -> Result<Self> {
        let text = fs::read_to_string(dir.join(PROPERTIES_FILE)).await?;
        Ok(Self::parse(&text))
    }

    pub async fn save(&self, dir: &Path) -> Result<()> {
        fs::write(dir.join(PROPERTIES_FILE), self.serialize()).await?;
        Ok(())
    }

    pub fn serialize(&self) -> String {
        self.values
            .iter()
            .map(|(key, value)| format!("{}={}\n", key, value))
            .collect()
    }

    /// Value for `key`, or the empty string when it is absent.
    pub fn get(&self, key: &str) -> &str {
        self.values.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sets the game, query and control ports from a single game port.
    pub fn set_port(&mut self, port: u16) -> Result<()> {
        let rcon = control_port(port).ok_or_else(|| {
            FleetError::Validation(format!("port {} leaves no room for a control port", port))
        })?;

        self.set("server-port", port.to_string());
        self.set("query.port", port.to_string());
        self.set("rcon.port", rcon.to_string());
        Ok(())
    }

    pub fn server_port(&self) -> Option<u16> {
        self.get("server-port").parse().ok()
    }

    pub fn rcon_port(&self) -> Option<u16> {
        self.get("rcon.port").parse().ok()
    }

    pub fn rcon_password(&self) -> &str {
        self.get("rcon.password")
    }

    /// Turns on the control endpoint with the given shared secret.
    pub fn enable_rcon(&mut self, secret: &str) {
        self.set("enable-rcon", "true");
        self.set("rcon.password", secret);
    }

    pub fn whitelist_enabled(&self) -> bool {
        self.get("white-list") == "true"
    }

    pub fn enable_whitelist(&mut self) {
        self.set("white-list", "true");
        self.set("enforce-whitelist", "true");
    }

    /// Maps the gameplay options of a create request onto properties.
    pub fn apply_request(&mut self, request: &CreateRequest) {
        self.set("gamemode", request.game_mode.trim());
        self.set("motd", request.motd.trim());
        self.set("level-type", request.world_type.trim());

        if !request.seed.trim().is_empty() {
            self.set("level-seed", request.seed.trim());
        }
        if request.whitelist {
            self.enable_whitelist();
        }
        if request.hardcore {
            self.set("hardcore", "true");
        }
        if !request.pvp {
            self.set("pvp", "false");
        }

        for (key, value) in &request.overrides {
            self.set(key.trim(), value.as_str());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_and_short_lines() {
        let props = Properties::parse(
            "#Minecraft server properties\n\
             #Mon Jan 01 00:00:00 UTC 2024\n\
             \n\
             a\n\
             motd=Hello=World\n\
             not-a-pair\n\
             pvp=false\n",
        );

        assert_eq!(props.len(), 2);
        assert_eq!(props.get("motd"), "Hello=World");
        assert_eq!(props.get("pvp"), "false");
        assert_eq!(props.get("not-a-pair"), "");
    }

    #[test]
    fn test_serialize_sorted() {
        let mut props = Properties::default();
        props.set("white-list", "false");
        props.set("allow-nether", "true");
        props.set("motd", "hi");

        assert_eq!(
            props.serialize(),
            "allow-nether=true\nmotd=hi\nwhite-list=false\n"
        );
    }

    #[test]
    fn test_default_template_contents() {
        let props = Properties::default_template();
        assert_eq!(props.server_port(), Some(25565));
        assert_eq!(props.get("level-seed"), "");
        assert!(!props.whitelist_enabled());
        assert_eq!(props.get("enable-rcon"), "false");
    }

    #[test]
    fn test_set_port_derives_related_keys() {
        let mut props = Properties::default_template();
        props.set_port(25570).unwrap();

        assert_eq!(props.get("server-port"), "25570");
        assert_eq!(props.get("query.port"), "25570");
        assert_eq!(props.get("rcon.port"), "15570");
        assert_eq!(props.rcon_port(), Some(15570));
    }

    #[test]
    fn test_set_port_rejects_low_ports() {
        let mut props = Properties::default_template();
        assert!(matches!(
            props.set_port(8080),
            Err(FleetError::Validation(_))
        ));
        assert_eq!(props.server_port(), Some(25565));
    }

    #[test]
    fn test_apply_request() {
        let mut request = CreateRequest::new("n", "vanilla", "1.20.1");
        request.whitelist = true;
        request.pvp = false;
        request.seed = " 12345 ".to_string();
        request.game_mode = "creative".to_string();
        request
            .overrides
            .insert("difficulty".to_string(), "hard".to_string());

        let mut props = Properties::default_template();
        props.apply_request(&request);

        assert!(props.whitelist_enabled());
        assert_eq!(props.get("enforce-whitelist"), "true");
        assert_eq!(props.get("pvp"), "false");
        assert_eq!(props.get("hardcore"), "false");
        assert_eq!(props.get("level-seed"), "12345");
        assert_eq!(props.get("gamemode"), "creative");
        assert_eq!(props.get("difficulty"), "hard");
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut props = Properties::default_template();
        props.set_port(30001).unwrap();
        props.enable_rcon("s3cret");
        props.save(dir.path()).await.unwrap();

        let loaded = Properties::load(dir.path()).await.unwrap();
        assert_eq!(loaded, props);
        assert_eq!(loaded.rcon_password(), "s3cret");

        let text = std::fs::read_to_string(dir.path().join(PROPERTIES_FILE)).unwrap();
        assert!(text.contains("server-port=30001\n"));
        assert!(text.contains("rcon.port=20001\n"));
    }
}
