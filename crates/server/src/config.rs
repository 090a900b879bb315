use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub http_port: u16,
    pub ws_port: u16,
    pub tick_rate: u32,
    /// Snapshot rate for users that never sent `SetClientFPS`.
    pub default_fps: f64,
    pub max_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: String::from("0.0.0.0"),
            http_port: 8080,
            ws_port: 8082,
            tick_rate: 60,
            default_fps: 20.0,
            max_clients: 32,
        }
    }
}

impl ServerConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.bind, self.http_port)
    }

    pub fn ws_addr(&self) -> String {
        format!("{}:{}", self.bind, self.ws_port)
    }
}

/// Seconds between two snapshots for a requested rate; `None` for rates
/// that cannot be honored.
pub fn frame_interval(fps: f64) -> Option<Duration> {
    if fps.is_finite() && fps > 0.0 {
        Some(Duration::from_secs_f64(1.0 / fps))
    } else {
        None
    }
}
