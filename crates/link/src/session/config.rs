use std::time::Duration;

use crate::net::PipelineConfig;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub http_port: u16,
    pub ws_port: u16,
    pub reconnect_delay: Duration,
    /// Messages kept for the next session while disconnected.
    pub max_backlog: usize,
    pub pipeline: PipelineConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            http_port: 8080,
            ws_port: 8082,
            reconnect_delay: Duration::from_secs(5),
            max_backlog: 256,
            pipeline: PipelineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub lobby_name: String,
    pub lobby_password: Option<String>,
    /// Create the lobby (`POST`) instead of joining it (`PUT`).
    pub create_lobby: bool,
}

impl Credentials {
    pub fn new(username: &str, password: &str, lobby_name: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            lobby_name: lobby_name.to_string(),
            lobby_password: None,
            create_lobby: true,
        }
    }

    pub fn with_lobby_password(mut self, password: Option<&str>) -> Self {
        self.lobby_password = password.map(str::to_string);
        self
    }

    pub fn joining(mut self) -> Self {
        self.create_lobby = false;
        self
    }
}
