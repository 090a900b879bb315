use std::io::{self, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::config::{InboundMode, PipelineConfig};
use super::frame::{self, CLOSE_NORMAL, Frame, FrameReader, Incoming, Opcode};
use super::handshake::{HandshakeError, UpgradeRequest};
use super::stats::{NetworkStats, StatsCounters};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::sync::{GuardedQueue, WaitSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Handshaking,
    Connected,
    Closing,
}

enum Outbound {
    Message(ClientMessage),
    Control(Frame),
}

struct Shared {
    config: PipelineConfig,
    state: Mutex<ConnectionState>,
    state_changed: Condvar,
    running: AtomicBool,
    outbound: GuardedQueue<Outbound>,
    raw_inbound: GuardedQueue<Vec<u8>>,
    latest: Mutex<Option<ServerMessage>>,
    inbound: GuardedQueue<ServerMessage>,
    signal: WaitSignal,
    stats: StatsCounters,
    live_workers: AtomicUsize,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
        self.state_changed.notify_all();
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        self.state_changed.notify_all();
        true
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// One connected WebSocket session and its three worker threads.
pub struct DuplexPipeline {
    shared: Arc<Shared>,
    socket: TcpStream,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DuplexPipeline {
    pub fn connect(
        host: &str,
        port: u16,
        bearer_token: Option<&str>,
        config: PipelineConfig,
    ) -> Result<Self, HandshakeError> {
        let addr = format!("{}:{}", host, port);
        log::info!("Connecting to ws://{}{}", addr, config.path);

        let mut stream = connect_tcp(&addr, config.connect_timeout)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(config.read_timeout))?;
        stream.set_write_timeout(Some(config.write_timeout))?;

        UpgradeRequest::new(host, port, &config.path)
            .bearer_token(bearer_token)
            .verify_accept(config.verify_accept)
            .perform(&mut stream)
            .inspect_err(|e| log::warn!("Handshake with {} failed: {}", addr, e))?;

        Ok(Self::start(stream, config)?)
    }

    fn start(stream: TcpStream, config: PipelineConfig) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(ConnectionState::Connected),
            state_changed: Condvar::new(),
            running: AtomicBool::new(true),
            outbound: GuardedQueue::new(),
            raw_inbound: GuardedQueue::new(),
            latest: Mutex::new(None),
            inbound: GuardedQueue::new(),
            signal: WaitSignal::new(),
            stats: StatsCounters::default(),
            live_workers: AtomicUsize::new(0),
        });
        // Armed before any download can call proceed().
        shared.signal.stall();

        let pipeline = Self {
            shared: Arc::clone(&shared),
            socket: stream.try_clone()?,
            workers: Mutex::new(Vec::with_capacity(3)),
        };

        let reader = stream.try_clone()?;
        let spawned = [
            spawn_worker("ws-download", &shared, move |s| download_loop(s, reader)),
            spawn_worker("ws-decode", &shared, decode_loop),
            spawn_worker("ws-upload", &shared, move |s| upload_loop(s, stream)),
        ];

        for handle in spawned {
            match handle {
                Ok(handle) => pipeline.workers.lock().push(handle),
                Err(e) => {
                    pipeline.exit();
                    return Err(e);
                }
            }
        }

        Ok(pipeline)
    }

    pub fn send(&self, message: ClientMessage) {
        self.shared.outbound.push(Outbound::Message(message));
    }

    /// Returns the newest snapshot (latest mode, not cleared by reading) or
    /// the oldest undelivered message (queue mode).
    pub fn receive(&self) -> Option<ServerMessage> {
        match self.shared.config.inbound_mode {
            InboundMode::Latest => self.shared.latest.lock().clone(),
            InboundMode::Queue => self.shared.inbound.try_pop(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn stats(&self) -> NetworkStats {
        self.shared.stats.snapshot()
    }

    pub fn live_workers(&self) -> usize {
        self.shared.live_workers.load(Ordering::SeqCst)
    }

    pub fn wait_for_disconnect(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while *state != ConnectionState::Disconnected {
            if self
                .shared
                .state_changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return *state == ConnectionState::Disconnected;
            }
        }
        true
    }

    /// Stops all loops and joins them. Safe to call more than once.
    pub fn exit(&self) {
        let was_running = self.shared.running.load(Ordering::SeqCst);
        if was_running
            && self
                .shared
                .transition(ConnectionState::Connected, ConnectionState::Closing)
        {
            self.shared
                .outbound
                .push(Outbound::Control(Frame::close(Some(CLOSE_NORMAL))));
        }
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.signal.exit();

        let mut workers = std::mem::take(&mut *self.workers.lock());
        // The upload thread goes first so a queued close frame gets out.
        if let Some(upload) = workers.pop() {
            join_worker(upload);
        }
        let _ = self.socket.shutdown(Shutdown::Both);
        for handle in workers {
            join_worker(handle);
        }

        self.shared.set_state(ConnectionState::Disconnected);
        if was_running {
            log::debug!("Pipeline stopped");
        }
    }
}

impl Drop for DuplexPipeline {
    fn drop(&mut self) {
        self.exit();
    }
}

fn connect_tcp(addr: &str, timeout: Duration) -> Result<TcpStream, HandshakeError> {
    let refused = |source: io::Error| HandshakeError::ConnectRefused {
        addr: addr.to_string(),
        source,
    };

    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "address did not resolve");
    for candidate in addr.to_socket_addrs().map_err(refused)? {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = e,
        }
    }
    Err(refused(last_err))
}

struct LiveWorker(Arc<Shared>);

impl Drop for LiveWorker {
    fn drop(&mut self) {
        self.0.live_workers.fetch_sub(1, Ordering::SeqCst);
    }
}

fn spawn_worker<F>(name: &str, shared: &Arc<Shared>, body: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce(Arc<Shared>) + Send + 'static,
{
    shared.live_workers.fetch_add(1, Ordering::SeqCst);
    let guard = LiveWorker(Arc::clone(shared));
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let shared = Arc::clone(&guard.0);
            body(shared);
            drop(guard);
        })
}

fn join_worker(handle: JoinHandle<()>) {
    let name = handle.thread().name().unwrap_or("worker").to_string();
    if handle.join().is_err() {
        log::error!("{} thread panicked", name);
    }
}

fn download_loop(shared: Arc<Shared>, stream: TcpStream) {
    log::debug!("Download loop started");
    let mut reader = FrameReader::new(stream).with_max_payload_size(shared.config.max_payload_size);

    while shared.is_running() {
        let event = reader.next_event(|reply| shared.outbound.push(Outbound::Control(reply)));
        match event {
            Ok(Incoming::Message { payload, is_binary }) => {
                shared.stats.record_received(payload.len());
                if !is_binary {
                    log::trace!("Text frame of {} bytes", payload.len());
                }
                match shared.config.inbound_mode {
                    InboundMode::Latest => shared.raw_inbound.replace_all(payload),
                    InboundMode::Queue => shared.raw_inbound.push(payload),
                }
                shared.signal.proceed(false);
            }
            Ok(Incoming::Idle) => {}
            Ok(Incoming::Close(code)) => {
                log::info!("Server closed the connection (code {:?})", code);
                // The echo may already be out and the state Disconnected.
                shared.transition(ConnectionState::Connected, ConnectionState::Closing);
                break;
            }
            Err(e) => {
                if shared.is_running() {
                    log::warn!("Download loop terminated: {}", e);
                }
                shared.set_state(ConnectionState::Disconnected);
                break;
            }
        }
    }
    log::debug!("Download loop stopped");
}

fn decode_loop(shared: Arc<Shared>) {
    log::debug!("Decode loop started");
    loop {
        shared.signal.wait();
        if !shared.signal.is_running() {
            break;
        }
        shared.signal.stall();

        while let Some(raw) = shared.raw_inbound.try_pop() {
            match ServerMessage::from_msgpack(&raw) {
                Ok(message) => {
                    shared.stats.record_decoded();
                    match shared.config.inbound_mode {
                        InboundMode::Latest => *shared.latest.lock() = Some(message),
                        InboundMode::Queue => shared.inbound.push(message),
                    }
                }
                Err(e) => {
                    shared.stats.record_dropped();
                    log::warn!("Dropping malformed server message ({} bytes): {}", raw.len(), e);
                }
            }
        }
    }
    log::debug!("Decode loop stopped");
}

fn upload_loop(shared: Arc<Shared>, mut stream: TcpStream) {
    log::debug!("Upload loop started");
    while shared.is_running() {
        let result = match shared.outbound.pop_wait(shared.config.upload_poll) {
            Some(Outbound::Message(mut message)) => {
                message.stamp_sent_time();
                match message.to_msgpack() {
                    Ok(bytes) => write_frame(&shared, &mut stream, &bytes, Opcode::Binary),
                    Err(e) => {
                        shared.stats.record_dropped();
                        log::warn!("Dropping unencodable {}: {}", message.request_data.name(), e);
                        continue;
                    }
                }
            }
            Some(Outbound::Control(frame)) => {
                let closing = frame.opcode == Opcode::Close;
                if frame.opcode == Opcode::Pong {
                    shared.stats.record_pong();
                }
                let written = write_frame(&shared, &mut stream, &frame.payload, frame.opcode);
                if closing {
                    if let Err(e) = written {
                        log::debug!("Close frame not delivered: {}", e);
                    }
                    shared.set_state(ConnectionState::Disconnected);
                    log::debug!("Upload loop stopped");
                    return;
                }
                written
            }
            None if shared.config.ping_when_idle && shared.is_running() => {
                shared.stats.record_ping();
                write_frame(&shared, &mut stream, &[], Opcode::Ping)
            }
            None => Ok(()),
        };

        if let Err(e) = result {
            if shared.is_running() {
                log::warn!("Upload loop terminated: {}", e);
            }
            shared.set_state(ConnectionState::Disconnected);
            log::debug!("Upload loop stopped");
            return;
        }
    }

    // exit() may have queued its close right before clearing the flag.
    while let Some(item) = shared.outbound.try_pop() {
        if let Outbound::Control(frame) = item {
            if frame.opcode == Opcode::Close {
                if let Err(e) = write_frame(&shared, &mut stream, &frame.payload, frame.opcode) {
                    log::debug!("Close frame not delivered: {}", e);
                }
                break;
            }
        }
    }
    log::debug!("Upload loop stopped");
}

fn write_frame(
    shared: &Shared,
    stream: &mut TcpStream,
    payload: &[u8],
    opcode: Opcode,
) -> io::Result<()> {
    let bytes = frame::encode(payload, opcode, true);
    stream.write_all(&bytes)?;
    shared.stats.record_sent(bytes.len());
    Ok(())
}
