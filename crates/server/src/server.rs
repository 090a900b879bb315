use std::collections::HashMap;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use flotilla::net::{frame, handshake};
use flotilla::{
    ClientMessage, DEFAULT_PATH, Frame, FrameReader, GuardedQueue, Incoming, Opcode,
    ServerMessage,
};

use crate::auth::AuthStore;
use crate::config::{ServerConfig, frame_interval};
use crate::events::{DisconnectReason, ServerEvent};
use crate::world::{Applied, World};

const CLIENT_READ_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_INTERVAL: Duration = Duration::from_millis(50);

struct ClientHandle {
    user: String,
    writer: Arc<Mutex<TcpStream>>,
    interval: Duration,
    last_push: Instant,
}

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub client_id: u32,
    pub user: String,
    pub fps: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ServerStats {
    pub clients: usize,
    pub dummies: usize,
    pub tick: u64,
    pub snapshots_sent: u64,
}

/// State shared by the accept loop, the simulation thread and the
/// per-connection readers.
struct Shared {
    config: ServerConfig,
    auth: Arc<AuthStore>,
    world: Mutex<World>,
    clients: Mutex<HashMap<u32, ClientHandle>>,
    events: GuardedQueue<ServerEvent>,
    running: Arc<AtomicBool>,
    next_client_id: AtomicU32,
    snapshots_sent: AtomicU64,
}

pub struct GameServer {
    listener: TcpListener,
    shared: Arc<Shared>,
}

impl GameServer {
    pub fn new(
        config: ServerConfig,
        auth: Arc<AuthStore>,
        running: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(config.ws_addr())?;
        listener.set_nonblocking(true)?;

        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                config,
                auth,
                world: Mutex::new(World::new()),
                clients: Mutex::new(HashMap::new()),
                events: GuardedQueue::new(),
                running,
                next_client_id: AtomicU32::new(1),
                snapshots_sent: AtomicU64::new(0),
            }),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shared.running)
    }

    pub fn drain_events(&self) -> Vec<ServerEvent> {
        self.shared.events.drain()
    }

    pub fn stats(&self) -> ServerStats {
        let world = self.shared.world.lock();
        ServerStats {
            clients: self.shared.clients.lock().len(),
            dummies: world.dummy_count(),
            tick: world.tick(),
            snapshots_sent: self.shared.snapshots_sent.load(Ordering::Relaxed),
        }
    }

    pub fn client_infos(&self) -> Vec<ClientInfo> {
        let mut infos: Vec<ClientInfo> = self
            .shared
            .clients
            .lock()
            .iter()
            .map(|(id, c)| ClientInfo {
                client_id: *id,
                user: c.user.clone(),
                fps: 1.0 / c.interval.as_secs_f64(),
            })
            .collect();
        infos.sort_by_key(|c| c.client_id);
        infos
    }

    pub fn spawn_simulation(&self) -> io::Result<thread::JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name("simulation".to_string())
            .spawn(move || run_simulation(&shared))
    }

    /// Accepts every pending upgrade. Returns how many were accepted.
    pub fn poll_accept(&self) -> usize {
        let mut accepted = 0;
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    accepted += 1;
                    let shared = Arc::clone(&self.shared);
                    let spawned = thread::Builder::new()
                        .name(format!("ws-client-{}", addr))
                        .spawn(move || serve_client(&shared, stream, addr));
                    if let Err(e) = spawned {
                        self.shared.events.push(ServerEvent::Error {
                            message: format!("could not spawn client thread: {}", e),
                        });
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return accepted,
                Err(e) => {
                    self.shared.events.push(ServerEvent::Error {
                        message: format!("accept failed: {}", e),
                    });
                    return accepted;
                }
            }
        }
    }

    pub fn shutdown_connections(&self) {
        let mut clients = self.shared.clients.lock();
        for (client_id, client) in clients.drain() {
            let mut writer = client.writer.lock();
            let close = frame::encode(&frame::CLOSE_NORMAL.to_be_bytes(), Opcode::Close, false);
            let _ = writer.write_all(&close);
            let _ = writer.shutdown(Shutdown::Both);
            self.shared.events.push(ServerEvent::ClientDisconnected {
                client_id,
                user: client.user,
                reason: DisconnectReason::Shutdown,
            });
        }
    }
}

fn run_simulation(shared: &Shared) {
    let tick_duration = shared.config.tick_duration();
    let dt = tick_duration.as_secs_f64();
    let mut next_tick = Instant::now() + tick_duration;

    while shared.running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now < next_tick {
            thread::sleep(next_tick - now);
            continue;
        }
        next_tick += tick_duration;

        let objects = {
            let mut world = shared.world.lock();
            world.step(dt);
            world.snapshot()
        };
        broadcast_snapshots(shared, objects);
    }
    log::debug!("Simulation stopped");
}

fn broadcast_snapshots(shared: &Shared, objects: flotilla::GameObjects) {
    let now = Instant::now();
    let mut due = Vec::new();
    {
        let mut clients = shared.clients.lock();
        for client in clients.values_mut() {
            if now.duration_since(client.last_push) >= client.interval {
                client.last_push = now;
                due.push((client.user.clone(), Arc::clone(&client.writer)));
            }
        }
    }

    for (user, writer) in due {
        let mut message = ServerMessage::new(user.clone(), objects.clone());
        message.request_info.calculation_unit.sent_time = unix_seconds();
        let bytes = match message.to_msgpack() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("Could not encode snapshot for {}: {}", user, e);
                continue;
            }
        };
        let encoded = frame::encode(&bytes, Opcode::Binary, false);
        let mut writer = writer.lock();
        match writer.write_all(&encoded) {
            Ok(()) => {
                shared.snapshots_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                log::debug!("Snapshot to {} failed: {}", user, e);
                let _ = writer.shutdown(Shutdown::Both);
            }
        }
    }
}

fn serve_client(shared: &Shared, mut stream: TcpStream, addr: SocketAddr) {
    let Some((user, reader)) = upgrade(shared, &mut stream, addr) else {
        return;
    };
    let writer = match stream.try_clone() {
        Ok(writer) => Arc::new(Mutex::new(writer)),
        Err(e) => {
            log::warn!("Could not clone stream for {}: {}", addr, e);
            return;
        }
    };

    let client_id = shared.next_client_id.fetch_add(1, Ordering::SeqCst);
    shared.clients.lock().insert(
        client_id,
        ClientHandle {
            user: user.clone(),
            writer: Arc::clone(&writer),
            interval: frame_interval(shared.config.default_fps).unwrap_or(DEFAULT_INTERVAL),
            last_push: Instant::now(),
        },
    );
    shared.events.push(ServerEvent::ClientConnected {
        client_id,
        user: user.clone(),
        addr,
    });

    let reason = read_requests(shared, client_id, &user, reader, &writer);

    if shared.clients.lock().remove(&client_id).is_some() {
        shared.events.push(ServerEvent::ClientDisconnected {
            client_id,
            user,
            reason,
        });
    }
    let _ = writer.lock().shutdown(Shutdown::Both);
}

fn upgrade(
    shared: &Shared,
    stream: &mut TcpStream,
    addr: SocketAddr,
) -> Option<(String, FrameReader<TcpStream>)> {
    let setup = stream
        .set_nonblocking(false)
        .and_then(|_| stream.set_nodelay(true))
        .and_then(|_| stream.set_read_timeout(Some(Duration::from_secs(5))));
    if let Err(e) = setup {
        log::warn!("Socket setup for {} failed: {}", addr, e);
        return None;
    }

    let info = match handshake::read_upgrade_request(stream) {
        Ok(info) => info,
        Err(e) => {
            deny(shared, stream, addr, 400, &e.to_string());
            return None;
        }
    };
    if info.path != DEFAULT_PATH {
        deny(shared, stream, addr, 404, "unknown path");
        return None;
    }
    let Some(user) = info.bearer_token().and_then(|t| shared.auth.user_for_token(t)) else {
        deny(shared, stream, addr, 401, "missing or unknown bearer token");
        return None;
    };

    if shared.clients.lock().len() >= shared.config.max_clients {
        deny(shared, stream, addr, 503, "server full");
        return None;
    }

    if let Err(e) = handshake::respond_switching(stream, &info) {
        log::warn!("Upgrade response to {} failed: {}", addr, e);
        return None;
    }
    let reader = stream
        .set_read_timeout(Some(CLIENT_READ_TIMEOUT))
        .and_then(|_| stream.try_clone());
    match reader {
        Ok(reader) => Some((user, FrameReader::new(reader))),
        Err(e) => {
            log::warn!("Could not prepare reader for {}: {}", addr, e);
            None
        }
    }
}

fn deny(shared: &Shared, stream: &mut TcpStream, addr: SocketAddr, status: u16, reason: &str) {
    let phrase = match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        _ => "Service Unavailable",
    };
    let _ = handshake::respond_error(stream, status, phrase);
    shared.events.push(ServerEvent::ConnectionDenied {
        addr,
        reason: reason.to_string(),
    });
}

fn read_requests(
    shared: &Shared,
    client_id: u32,
    user: &str,
    mut reader: FrameReader<TcpStream>,
    writer: &Mutex<TcpStream>,
) -> DisconnectReason {
    while shared.running.load(Ordering::SeqCst) {
        let event = reader.next_event(|reply| send_control(writer, &reply));
        match event {
            Ok(Incoming::Message { payload, .. }) => handle_message(shared, client_id, user, &payload),
            Ok(Incoming::Idle) => {}
            Ok(Incoming::Close(_)) => return DisconnectReason::Graceful,
            Err(e) => {
                log::debug!("Connection of {} ended: {}", user, e);
                return DisconnectReason::Dropped;
            }
        }
    }
    DisconnectReason::Shutdown
}

fn send_control(writer: &Mutex<TcpStream>, frame: &Frame) {
    match frame.to_bytes(false) {
        Ok(bytes) => {
            let _ = writer.lock().write_all(&bytes);
        }
        Err(e) => log::warn!("Refusing to send control frame: {}", e),
    }
}

fn handle_message(shared: &Shared, client_id: u32, user: &str, payload: &[u8]) {
    let message = match ClientMessage::from_msgpack(payload) {
        Ok(message) => message,
        Err(e) => {
            shared.events.push(ServerEvent::RequestRejected {
                user: user.to_string(),
                message: format!("undecodable message: {}", e),
            });
            return;
        }
    };
    log::trace!("{} -> {}", user, message.request_data.name());

    let applied = shared.world.lock().apply(user, &message.request_data);
    match applied {
        Ok(Applied::SetFps(fps)) => {
            if let Some(interval) = frame_interval(fps) {
                if let Some(client) = shared.clients.lock().get_mut(&client_id) {
                    client.interval = interval;
                }
                log::info!("{} wants {} snapshots per second", user, fps);
            }
        }
        Ok(Applied::Nothing) => {}
        Err(e) => shared.events.push(ServerEvent::RequestRejected {
            user: user.to_string(),
            message: e.to_string(),
        }),
    }
}

fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
