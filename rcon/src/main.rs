use clap::Parser;
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Send one console command to a running instance", long_about = None)]
struct Args {
    /// Host the instance's control endpoint listens on
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Control port (game port minus 10000)
    #[arg(short, long, env = "MCRCON_PORT", default_value = "15565")]
    port: u16,

    /// Shared secret from the instance's rcon.password
    #[arg(short = 'P', long, env = "MCRCON_PASS")]
    password: String,

    /// Give up after this many milliseconds
    #[arg(short, long, default_value = "5000")]
    timeout_ms: u64,

    /// Command to run, e.g. `whitelist list`
    #[arg(required = true, trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let addr = tokio::net::lookup_host((args.host.as_str(), args.port))
        .await?
        .next()
        .ok_or("could not resolve control endpoint host")?;
    let command = args.command.join(" ");

    info!("Sending '{}' to {}", command, addr);
    let reply = rcon::send(
        addr,
        &args.password,
        &command,
        Duration::from_millis(args.timeout_ms),
    )
    .await?;

    println!("{}", reply);
    Ok(())
}
