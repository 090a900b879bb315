use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use super::bootstrap::{Session, SessionBootstrap};
use crate::lobby::AuthService;
use crate::net::{ConnectionState, NetworkStats};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::sync::{GuardedQueue, WaitSignal};

const DISCONNECT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    pub connect_attempts: u64,
    pub sessions_established: u64,
}

struct Inner {
    stop: WaitSignal,
    current: Mutex<Option<Arc<Session>>>,
    connecting: AtomicBool,
    backlog: GuardedQueue<ClientMessage>,
    max_backlog: usize,
    reconnect_delay: Duration,
    connect_attempts: AtomicU64,
    sessions_established: AtomicU64,
}

impl Inner {
    fn stopped(&self) -> bool {
        !self.stop.is_running()
    }
}

/// Keeps one session alive: reconnects after `reconnect_delay` whenever the
/// current pipeline dies, until [`stop`](Self::stop) is called.
pub struct ReconnectSupervisor {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectSupervisor {
    pub fn spawn<A>(bootstrap: SessionBootstrap<A>) -> io::Result<Self>
    where
        A: AuthService + 'static,
    {
        let config = bootstrap.config();
        let inner = Arc::new(Inner {
            stop: WaitSignal::new(),
            current: Mutex::new(None),
            connecting: AtomicBool::new(false),
            backlog: GuardedQueue::new(),
            max_backlog: config.max_backlog,
            reconnect_delay: config.reconnect_delay,
            connect_attempts: AtomicU64::new(0),
            sessions_established: AtomicU64::new(0),
        });
        // Held for the supervisor's lifetime so backoff waits block until stop().
        inner.stop.stall();

        let worker = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("ws-supervisor".to_string())
            .spawn(move || supervise(worker, bootstrap))?;

        Ok(Self {
            inner,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Sends on the live session or parks the message for the next one.
    pub fn send(&self, message: ClientMessage) {
        let current = self.inner.current.lock();
        match current.as_ref() {
            Some(session) if session.state() == ConnectionState::Connected => {
                session.send(message);
            }
            _ => {
                if let Err(dropped) = self.inner.backlog.try_push(message, self.inner.max_backlog) {
                    log::warn!(
                        "Backlog full ({}), discarding {}",
                        self.inner.max_backlog,
                        dropped.request_data.name()
                    );
                }
            }
        }
    }

    pub fn receive(&self) -> Option<ServerMessage> {
        self.inner.current.lock().as_ref()?.receive()
    }

    /// `Handshaking` while a bootstrap is in flight.
    pub fn state(&self) -> ConnectionState {
        let current = self.inner.current.lock();
        match current.as_ref() {
            Some(session) => session.state(),
            None if self.inner.connecting.load(Ordering::SeqCst) => ConnectionState::Handshaking,
            None => ConnectionState::Disconnected,
        }
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.inner.current.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn stats(&self) -> SupervisorStats {
        SupervisorStats {
            connect_attempts: self.inner.connect_attempts.load(Ordering::Relaxed),
            sessions_established: self.inner.sessions_established.load(Ordering::Relaxed),
        }
    }

    /// Counters of the live session, if any.
    pub fn session_stats(&self) -> Option<NetworkStats> {
        self.inner.current.lock().as_ref().map(|s| s.stats())
    }

    pub fn backlog_len(&self) -> usize {
        self.inner.backlog.len()
    }

    /// Ends the current session and the reconnect loop, then joins it.
    pub fn stop(&self) {
        self.inner.stop.exit();
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.join().is_err() {
            log::error!("Supervisor thread panicked");
        }
    }
}

impl Drop for ReconnectSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn supervise<A: AuthService>(inner: Arc<Inner>, bootstrap: SessionBootstrap<A>) {
    while !inner.stopped() {
        let attempt = inner.connect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        log::info!("Connect attempt {}", attempt);

        inner.connecting.store(true, Ordering::SeqCst);
        match bootstrap.connect() {
            Ok(session) => {
                inner.sessions_established.fetch_add(1, Ordering::Relaxed);
                let session = Arc::new(session);
                {
                    let mut current = inner.current.lock();
                    for message in inner.backlog.drain() {
                        session.send(message);
                    }
                    *current = Some(Arc::clone(&session));
                    inner.connecting.store(false, Ordering::SeqCst);
                }

                while !inner.stopped() && !session.pipeline().wait_for_disconnect(DISCONNECT_POLL) {}

                inner.current.lock().take();
                session.exit();
                log::info!("Session ended");
            }
            Err(e) => {
                inner.connecting.store(false, Ordering::SeqCst);
                log::warn!("Connect attempt {} failed: {}", attempt, e);
            }
        }

        if inner.stopped() {
            break;
        }
        log::info!("Reconnecting in {:?}", inner.reconnect_delay);
        inner.stop.wait_timeout(inner.reconnect_delay);
    }
    log::debug!("Supervisor stopped");
}
