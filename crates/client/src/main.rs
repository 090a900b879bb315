mod config;
mod driver;
mod stats;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;

use flotilla::{
    Credentials, HttpAuthClient, ReconnectSupervisor, SessionBootstrap, SessionConfig,
};

use config::DriverConfig;
use driver::HeadlessDriver;

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "Headless flotilla client that steers one dummy")]
struct Args {
    #[arg(long, default_value = "localhost")]
    host: String,

    #[arg(long, default_value_t = 8080, help = "Port of the HTTP auth proxy")]
    http_port: u16,

    #[arg(long, default_value_t = 8082)]
    ws_port: u16,

    #[arg(short, long)]
    username: String,

    #[arg(short, long)]
    password: String,

    #[arg(short, long, default_value = "main")]
    lobby: String,

    #[arg(long)]
    lobby_password: Option<String>,

    #[arg(long, help = "Join an existing lobby instead of creating it")]
    join: bool,

    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    #[arg(long, default_value = "dummy")]
    dummy: String,

    #[arg(long, default_value_t = 5, help = "Seconds between reconnect attempts")]
    reconnect_delay: u64,

    #[arg(long, help = "Stop after this many seconds")]
    duration: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let session_config = SessionConfig {
        host: args.host.clone(),
        http_port: args.http_port,
        ws_port: args.ws_port,
        reconnect_delay: Duration::from_secs(args.reconnect_delay),
        ..SessionConfig::default()
    };

    let mut credentials = Credentials::new(&args.username, &args.password, &args.lobby)
        .with_lobby_password(args.lobby_password.as_deref());
    if args.join {
        credentials = credentials.joining();
    }

    let auth = HttpAuthClient::new(&args.host, args.http_port).context("building auth client")?;
    let bootstrap = SessionBootstrap::new(auth, session_config, credentials);
    log::info!(
        "Connecting to {}:{} as {} in lobby {}",
        args.host,
        args.ws_port,
        args.username,
        args.lobby
    );
    let supervisor =
        ReconnectSupervisor::spawn(bootstrap).context("starting reconnect supervisor")?;

    let driver_config = DriverConfig {
        fps: args.fps,
        dummy_id: args.dummy,
        ..DriverConfig::default()
    };
    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("registering ctrl+c handler")?;
    }

    let mut driver = HeadlessDriver::new(supervisor, driver_config);
    driver.run(&running, deadline);

    let supervisor = driver.link();
    let stats = supervisor.stats();
    log::info!(
        "{} connect attempts, {} sessions established",
        stats.connect_attempts,
        stats.sessions_established
    );
    supervisor.stop();

    Ok(())
}
