use std::time::Duration;

use super::frame::DEFAULT_MAX_PAYLOAD;

pub const DEFAULT_PATH: &str = "/msgpack";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InboundMode {
    /// Keep only the newest snapshot; `receive()` keeps returning it.
    #[default]
    Latest,
    /// Keep every message; `receive()` pops the oldest.
    Queue,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub path: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub upload_poll: Duration,
    pub ping_when_idle: bool,
    pub inbound_mode: InboundMode,
    pub verify_accept: bool,
    pub max_payload_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_PATH.to_string(),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            upload_poll: Duration::from_secs(1),
            ping_when_idle: true,
            inbound_mode: InboundMode::Latest,
            verify_accept: true,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
