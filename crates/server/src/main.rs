mod auth;
mod config;
mod events;
mod server;
mod world;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use auth::{AuthProxy, AuthStore};
use config::ServerConfig;
use events::ServerEvent;
use server::GameServer;

#[derive(Parser)]
#[command(name = "flotilla-server")]
#[command(about = "Auth proxy and dummy-world game server for flotilla clients")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(long, default_value_t = 8080, help = "Port of the HTTP auth proxy")]
    http_port: u16,

    #[arg(long, default_value_t = 8082, help = "Port of the /msgpack websocket endpoint")]
    ws_port: u16,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(long, default_value_t = 20.0, help = "Snapshot rate before a client sets its own")]
    default_fps: f64,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    #[arg(long, help = "Stop after this many seconds")]
    duration: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ServerConfig {
        bind: args.bind,
        http_port: args.http_port,
        ws_port: args.ws_port,
        tick_rate: args.tick_rate,
        default_fps: args.default_fps,
        max_clients: args.max_clients,
    };

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("registering ctrl+c handler")?;
    }
    let store = Arc::new(AuthStore::new());

    let proxy = AuthProxy::bind(&config.http_addr(), Arc::clone(&store))
        .with_context(|| format!("binding auth proxy on {}", config.http_addr()))?;
    log::info!("Auth proxy listening on {}", proxy.local_addr()?);
    let proxy_shutdown = proxy.shutdown_handle();
    let proxy_thread = thread::Builder::new()
        .name("auth-proxy".to_string())
        .spawn(move || proxy.run())?;

    let server = GameServer::new(config.clone(), store, Arc::clone(&running))
        .with_context(|| format!("binding game server on {}", config.ws_addr()))?;
    log::info!("Game server listening on {}{}", server.local_addr()?, flotilla::DEFAULT_PATH);
    let simulation = server.spawn_simulation()?;

    let deadline = args.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut last_report = Instant::now();

    while running.load(Ordering::SeqCst) {
        server.poll_accept();
        for event in server.drain_events() {
            log_event(&event);
        }

        if last_report.elapsed() >= Duration::from_secs(10) {
            last_report = Instant::now();
            let stats = server.stats();
            log::info!(
                "tick {} | {} clients | {} dummies | {} snapshots sent",
                stats.tick,
                stats.clients,
                stats.dummies,
                stats.snapshots_sent
            );
            for client in server.client_infos() {
                log::debug!("  client {} ({}) at {:.1} fps", client.client_id, client.user, client.fps);
            }
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            running.store(false, Ordering::SeqCst);
        }
        thread::sleep(Duration::from_millis(5));
    }

    log::info!("Server shutting down");
    server.shutdown_connections();
    for event in server.drain_events() {
        log_event(&event);
    }
    if simulation.join().is_err() {
        log::error!("Simulation thread panicked");
    }
    proxy_shutdown.shutdown();
    match proxy_thread.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("Auth proxy failed: {}", e),
        Err(_) => log::error!("Auth proxy thread panicked"),
    }

    Ok(())
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::ClientConnected {
            client_id,
            user,
            addr,
        } => {
            log::info!("Client {} ({}) connected from {}", client_id, user, addr);
        }
        ServerEvent::ClientDisconnected {
            client_id,
            user,
            reason,
        } => {
            log::info!("Client {} ({}) {}", client_id, user, reason.as_str());
        }
        ServerEvent::ConnectionDenied { addr, reason } => {
            log::warn!("Connection denied to {}: {}", addr, reason);
        }
        ServerEvent::RequestRejected { user, message } => {
            log::warn!("Request from {} rejected: {}", user, message);
        }
        ServerEvent::Error { message } => {
            log::error!("{}", message);
        }
    }
}
