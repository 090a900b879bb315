use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use flotilla::{ClientMessage, Coordinate, ReconnectSupervisor, ServerMessage};

use crate::config::DriverConfig;
use crate::stats::SnapshotStats;

/// What the driver needs from the connection.
pub trait Link {
    fn send(&self, message: ClientMessage);
    fn receive(&self) -> Option<ServerMessage>;
    fn is_connected(&self) -> bool;
    fn sessions_established(&self) -> u64;
}

impl Link for ReconnectSupervisor {
    fn send(&self, message: ClientMessage) {
        ReconnectSupervisor::send(self, message);
    }

    fn receive(&self) -> Option<ServerMessage> {
        ReconnectSupervisor::receive(self)
    }

    fn is_connected(&self) -> bool {
        ReconnectSupervisor::is_connected(self)
    }

    fn sessions_established(&self) -> u64 {
        self.stats().sessions_established
    }
}

pub fn velocity_for_heading(heading: f64, speed: f64) -> Coordinate {
    let (sin, cos) = heading.sin_cos();
    Coordinate::new(cos * speed, sin * speed, 0.0)
}

/// Headless game loop: announces its frame rate and dummy on every new
/// session, steers the dummy in a slow circle and tracks the snapshots.
pub struct HeadlessDriver<L> {
    link: L,
    config: DriverConfig,
    stats: SnapshotStats,
    seen_sessions: u64,
    heading: f64,
    last_steer: Option<Instant>,
    last_snapshot_time: f64,
    last_report: Instant,
}

impl<L: Link> HeadlessDriver<L> {
    pub fn new(link: L, config: DriverConfig) -> Self {
        Self {
            link,
            config,
            stats: SnapshotStats::new(),
            seen_sessions: 0,
            heading: 0.0,
            last_steer: None,
            last_snapshot_time: 0.0,
            last_report: Instant::now(),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }

    pub fn run(&mut self, running: &AtomicBool, deadline: Option<Instant>) {
        let frame_time = self.config.frame_time();
        while running.load(Ordering::SeqCst) {
            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                break;
            }
            self.step(now);
            thread::sleep(frame_time);
        }
        log::info!("Driver stopped after {} snapshots", self.stats.total());
    }

    /// One frame of the loop.
    pub fn step(&mut self, now: Instant) {
        if self.link.is_connected() {
            let sessions = self.link.sessions_established();
            if sessions != self.seen_sessions {
                self.seen_sessions = sessions;
                self.announce();
            }

            let steer_due = self
                .last_steer
                .is_none_or(|t| now.duration_since(t) >= self.config.steer_interval);
            if steer_due {
                self.last_steer = Some(now);
                self.steer();
            }
        }

        if let Some(snapshot) = self.link.receive() {
            self.observe(&snapshot, now);
        }

        if now.duration_since(self.last_report) >= self.config.report_interval {
            self.last_report = now;
            self.report();
        }
    }

    fn announce(&mut self) {
        log::info!(
            "Session {} up, requesting {} fps and dummy {}",
            self.seen_sessions,
            self.config.fps,
            self.config.dummy_id
        );
        self.link.send(ClientMessage::set_client_fps(self.config.fps));
        self.link
            .send(ClientMessage::spawn_dummy(self.config.dummy_id.as_str()));
    }

    fn steer(&mut self) {
        self.heading = (self.heading + self.config.turn_rate) % std::f64::consts::TAU;
        let velocity = velocity_for_heading(self.heading, self.config.speed);
        self.link.send(ClientMessage::dummy_set_velocity(
            self.config.dummy_id.as_str(),
            velocity,
        ));
    }

    fn observe(&mut self, snapshot: &ServerMessage, now: Instant) {
        let sent_time = snapshot.request_info.calculation_unit.sent_time;
        // Latest-value reads repeat until the server pushes something newer.
        if sent_time == self.last_snapshot_time {
            return;
        }
        self.last_snapshot_time = sent_time;

        let latency = (sent_time > 0.0).then(|| unix_seconds() - sent_time);
        self.stats.record_snapshot(now, latency);

        if let Some(dummy) = snapshot.dummies().get(&self.config.dummy_id) {
            log::trace!(
                "{} at ({:.2}, {:.2}, {:.2})",
                dummy.id,
                dummy.position.x,
                dummy.position.y,
                dummy.position.z
            );
        }
    }

    fn report(&self) {
        let latency = self
            .stats
            .mean_latency_ms()
            .map(|ms| format!("{:.1} ms", ms))
            .unwrap_or_else(|| "n/a".to_string());
        log::info!(
            "{} | {:.1} snapshots/s | latency {} | {} total",
            if self.link.is_connected() { "connected" } else { "disconnected" },
            self.stats.rate(),
            latency,
            self.stats.total()
        );
    }
}

fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
