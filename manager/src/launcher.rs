//! Spawning the game server process.

use crate::config::ManagerConfig;
use crate::error::{FleetError, Result};
use crate::model::InstanceRecord;
use log::{info, warn};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Garbage collector tuning passed to every instance.
pub const G1_FLAGS: [&str; 20] = [
    "-XX:+UseG1GC",
    "-XX:+ParallelRefProcEnabled",
    "-XX:MaxGCPauseMillis=200",
    "-XX:+UnlockExperimentalVMOptions",
    "-XX:+DisableExplicitGC",
    "-XX:+AlwaysPreTouch",
    "-XX:G1NewSizePercent=30",
    "-XX:G1MaxNewSizePercent=40",
    "-XX:G1HeapRegionSize=8M",
    "-XX:G1ReservePercent=20",
    "-XX:G1HeapWastePercent=5",
    "-XX:G1MixedGCCountTarget=4",
    "-XX:InitiatingHeapOccupancyPercent=15",
    "-XX:G1MixedGCLiveThresholdPercent=90",
    "-XX:G1RSetUpdatingPauseTimePercent=5",
    "-XX:SurvivorRatio=32",
    "-XX:+PerfDisableSharedMem",
    "-XX:MaxTenuringThreshold=1",
    "-Dusing.aikars.flags=https://mcflags.emc.gs",
    "-Daikars.new.flags=true",
];

/// Everything needed to exec one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl LaunchSpec {
    pub fn for_instance(record: &InstanceRecord, dir: &Path, config: &ManagerConfig) -> Self {
        let max_mem = if record.max_mem.is_empty() {
            config.default_max_mem.clone()
        } else {
            record.max_mem.clone()
        };
        let min_mem = if record.min_mem.is_empty() {
            max_mem.clone()
        } else {
            record.min_mem.clone()
        };

        // 1.16 and older run on the legacy runtime
        let program = if record.release.contains("1.16") {
            config.java_legacy.clone()
        } else {
            config.java.clone()
        };

        let mut args = vec![format!("-Xms{}", min_mem), format!("-Xmx{}", max_mem)];
        args.extend(G1_FLAGS.iter().map(|flag| flag.to_string()));
        args.push("-jar".to_string());
        args.push(format!("{}.jar", record.release));
        args.push("--nogui".to_string());

        Self {
            program,
            args,
            cwd: dir.to_path_buf(),
        }
    }
}

pub trait Launcher: Send + Sync {
    /// Starts the process and returns as soon as it is spawned.
    fn launch(&self, spec: &LaunchSpec) -> Result<()>;
}

/// Spawns instances as detached OS processes in their own process group.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<()> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => FleetError::ToolUnavailable(spec.program.clone()),
            _ => FleetError::Io(e),
        })?;

        let pid = child.id();
        info!("Launched {} (pid {:?}) in {}", spec.program, pid, spec.cwd.display());

        // Reap the child so it does not linger as a zombie
        let cwd = spec.cwd.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => info!("Instance in {} exited with {}", cwd.display(), status),
                Err(e) => warn!("Lost track of instance in {}: {}", cwd.display(), e),
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Flavor;

    fn record(release: &str) -> InstanceRecord {
        InstanceRecord {
            uuid: "u".to_string(),
            name: "n".to_string(),
            owner: "alice".to_string(),
            flavor: Flavor::Paper,
            release: release.to_string(),
            autostart: false,
            deleted: false,
            min_mem: String::new(),
            max_mem: String::new(),
        }
    }

    #[test]
    fn test_default_memory_and_layout() {
        let config = ManagerConfig::new("/srv");
        let spec = LaunchSpec::for_instance(&record("1.20.1"), Path::new("/srv/servers/u"), &config);

        assert_eq!(spec.program, "java");
        assert_eq!(spec.args[0], "-Xms6G");
        assert_eq!(spec.args[1], "-Xmx6G");
        assert_eq!(spec.cwd, Path::new("/srv/servers/u"));

        let tail: Vec<_> = spec.args.iter().rev().take(3).map(String::as_str).collect();
        assert_eq!(tail, vec!["--nogui", "1.20.1.jar", "-jar"]);
        assert_eq!(spec.args.len(), 2 + G1_FLAGS.len() + 3);
    }

    #[test]
    fn test_explicit_memory_bounds() {
        let config = ManagerConfig::new("/srv");
        let mut rec = record("1.19.4");
        rec.min_mem = "2G".to_string();
        rec.max_mem = "4G".to_string();

        let spec = LaunchSpec::for_instance(&rec, Path::new("/x"), &config);
        assert_eq!(spec.args[0], "-Xms2G");
        assert_eq!(spec.args[1], "-Xmx4G");

        rec.min_mem.clear();
        let spec = LaunchSpec::for_instance(&rec, Path::new("/x"), &config);
        assert_eq!(spec.args[0], "-Xms4G");
    }

    #[test]
    fn test_legacy_runtime_for_old_releases() {
        let config = ManagerConfig::new("/srv");
        let spec = LaunchSpec::for_instance(&record("1.16.5"), Path::new("/x"), &config);
        assert_eq!(spec.program, "java8");
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let spec = LaunchSpec {
            program: "no-such-java-runtime-here".to_string(),
            args: vec![],
            cwd: dir.path().to_path_buf(),
        };

        assert!(matches!(
            ProcessLauncher.launch(&spec),
            Err(FleetError::ToolUnavailable(_))
        ));
    }
}
