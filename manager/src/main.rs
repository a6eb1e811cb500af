use clap::{Parser, Subcommand};
use log::{error, info};
use manager::config::{ManagerConfig, OpWhitelistPolicy};
use manager::context::FleetContext;
use manager::error::{ErrorKind, FleetError};
use manager::fleet::Fleet;
use manager::identity::OfflineLookup;
use manager::model::CreateRequest;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Storage root holding jars/, servers/ and audit.log
    #[clap(short, long, env = "MCM_STORAGE", default_value = "./storage")]
    storage_dir: PathBuf,
    /// Host name shown in instance addresses
    #[clap(long, env = "MCM_HOSTNAME", default_value = "localhost")]
    hostname: String,
    /// Java command for current releases
    #[clap(long, env = "MCM_JAVA", default_value = "java")]
    java: String,
    /// Java command for 1.16 releases
    #[clap(long, env = "MCM_JAVA_LEGACY", default_value = "java8")]
    java_legacy: String,
    /// Heap ceiling for instances that do not set one
    #[clap(long, env = "MCM_MAX_MEM", default_value = "6G")]
    max_mem: String,
    /// Liveness probe timeout in milliseconds
    #[clap(long, env = "MCM_PROBE_TIMEOUT_MS", default_value = "500")]
    probe_timeout_ms: u64,
    /// Control command timeout in milliseconds
    #[clap(long, env = "MCM_COMMAND_TIMEOUT_MS", default_value = "5000")]
    command_timeout_ms: u64,
    /// Seconds to wait for an instance to go down after `stop`
    #[clap(long, env = "MCM_STOP_TIMEOUT", default_value = "120")]
    stop_timeout: u64,
    /// Whether granting op also whitelists the player
    #[clap(long, env = "MCM_OP_WHITELIST", value_enum, default_value = "when-enabled")]
    op_whitelist: OpWhitelistPolicy,
    /// Derive player ids locally instead of asking the profile API
    #[clap(long, env = "MCM_OFFLINE")]
    offline: bool,
    /// Identity to act as
    #[clap(long = "as", global = true, env = "MCM_CALLER", default_value = "")]
    caller: String,
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Autostart instances and wait for Ctrl+C (default)
    Serve,
    /// Create a new instance owned by the caller
    Create {
        name: String,
        flavor: String,
        release: String,
        /// Game port; the next free one when omitted
        #[clap(long)]
        port: Option<u16>,
        #[clap(long)]
        whitelist: bool,
        #[clap(long)]
        autostart: bool,
        /// Start right after creation
        #[clap(long)]
        start: bool,
        /// Extra server.properties entries as key=value
        #[clap(long = "set", value_parser = parse_override)]
        overrides: Vec<(String, String)>,
    },
    /// Print the instances visible to the caller as JSON
    List,
    Start { id: String },
    Stop {
        id: String,
        /// Seconds of warning before stopping
        #[clap(long, default_value = "0")]
        delay: u64,
    },
    Delete { id: String },
    Regen { id: String },
    Upgrade { id: String },
    Op { id: String, player: String },
    Whitelist { id: String, player: String },
    Day { id: String },
    Weather { id: String },
    Save { id: String },
    Backup { id: String, message: Option<String> },
}

fn parse_override(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

impl Args {
    fn config(&self) -> ManagerConfig {
        let mut config = ManagerConfig::new(self.storage_dir.clone());
        config.hostname = self.hostname.clone();
        config.java = self.java.clone();
        config.java_legacy = self.java_legacy.clone();
        config.default_max_mem = self.max_mem.clone();
        config.probe_timeout = Duration::from_millis(self.probe_timeout_ms);
        config.command_timeout = Duration::from_millis(self.command_timeout_ms);
        config.stop_timeout = Duration::from_secs(self.stop_timeout);
        config.op_whitelist_policy = self.op_whitelist;
        config
    }
}

/// Process exit status for a failed command, one per error category
fn exit_status(err: &FleetError) -> u8 {
    match err.kind() {
        ErrorKind::Internal => 1,
        ErrorKind::Validation => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Permission => 4,
        ErrorKind::Conflict => 5,
        ErrorKind::Unavailable => 6,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // details go to the log only; stderr gets the sanitized message
            error!("{}", e);
            eprintln!("{}", e.public_message());
            ExitCode::from(exit_status(&e))
        }
    }
}

async fn run(args: Args) -> manager::error::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut ctx = FleetContext::new(args.config(), shutdown_rx)?;
    if args.offline {
        ctx = ctx.with_identities(Arc::new(OfflineLookup));
    }
    let fleet = Fleet::new(Arc::new(ctx));

    let report = fleet.open().await?;
    if !report.skipped.is_empty() {
        error!("Could not load instances: {}", report.skipped.join(", "));
    }

    let caller = args.caller.trim();
    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            fleet.autostart().await;
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl+C, saving running instances...");
            shutdown_tx.send_replace(true);
            let saved = fleet.save_running().await;
            info!("Saved {} instances, shutting down", saved);
            Ok(())
        }
        Command::Create {
            name,
            flavor,
            release,
            port,
            whitelist,
            autostart,
            start,
            overrides,
        } => {
            let mut request = CreateRequest::new(&name, &flavor, &release);
            request.whitelist = whitelist;
            request.autostart = autostart;
            request.start_now = start;
            request.overrides = overrides.into_iter().collect();

            let created = match port {
                Some(port) => fleet.create_on_port(caller, &request, port).await,
                None => fleet.create(caller, &request).await,
            };
            created.map(|instance| println!("{}", instance.id()))
        }
        Command::List => {
            let views = fleet.view_for(caller).await;
            println!("{}", serde_json::to_string_pretty(&views)?);
            Ok(())
        }
        Command::Start { id } => fleet.start(caller, &id).await,
        Command::Stop { id, delay } => fleet.stop(caller, &id, Duration::from_secs(delay)).await,
        Command::Delete { id } => fleet.delete(caller, &id).await,
        Command::Regen { id } => fleet.regen(caller, &id).await,
        Command::Upgrade { id } => fleet.upgrade(caller, &id).await,
        Command::Op { id, player } => fleet.add_op(caller, &id, &player).await,
        Command::Whitelist { id, player } => fleet.add_to_whitelist(caller, &id, &player).await,
        Command::Day { id } => fleet.day(caller, &id).await,
        Command::Weather { id } => fleet.weather_clear(caller, &id).await,
        Command::Save { id } => fleet.save(caller, &id).await,
        Command::Backup { id, message } => fleet.backup(caller, &id, message.as_deref()).await,
    }
}
