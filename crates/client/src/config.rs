use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Rate requested from the server and used for the local loop.
    pub fps: f64,
    pub dummy_id: String,
    /// Speed of the dummy in units per second.
    pub speed: f64,
    /// Heading change per steer, in radians.
    pub turn_rate: f64,
    pub steer_interval: Duration,
    pub report_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            fps: 30.0,
            dummy_id: String::from("dummy"),
            speed: 2.0,
            turn_rate: 0.25,
            steer_interval: Duration::from_millis(500),
            report_interval: Duration::from_secs(5),
        }
    }
}

impl DriverConfig {
    pub fn frame_time(&self) -> Duration {
        if self.fps.is_finite() && self.fps > 0.0 {
            Duration::from_secs_f64(1.0 / self.fps)
        } else {
            Duration::from_millis(33)
        }
    }
}
