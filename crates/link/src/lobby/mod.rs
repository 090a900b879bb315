//! Authentication and lobby access in front of the game socket.

mod http;

use serde::{Deserialize, Serialize};

pub use http::{HttpAuthClient, bearer_token};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{endpoint} answered {status}")]
    Status { endpoint: &'static str, status: u16 },
    #[error("authenticate succeeded without a bearer token")]
    MissingToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LobbyStatus {
    #[default]
    Unconnected,
    NotFound,
    Refused,
    Connected,
}

impl LobbyStatus {
    /// Maps the auth proxy's answer to `POST`/`PUT /lobbys`.
    pub fn from_http(status: u16, create: bool) -> Self {
        match status {
            200 | 409 => LobbyStatus::Connected,
            400 if !create => LobbyStatus::NotFound,
            _ => LobbyStatus::Refused,
        }
    }

    pub fn is_connected(self) -> bool {
        self == LobbyStatus::Connected
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyRequest {
    pub lobby_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lobby_password: Option<String>,
}

/// The HTTP side of a session: user creation, token issue, lobby access.
pub trait AuthService: Send + Sync {
    fn create_user(&self, username: &str, password: &str) -> Result<(), AuthError>;

    /// Returns the bearer token without its `Bearer ` prefix.
    fn authenticate(&self, username: &str, password: &str) -> Result<String, AuthError>;

    fn open_lobby(
        &self,
        name: &str,
        password: Option<&str>,
        token: &str,
        create: bool,
    ) -> Result<LobbyStatus, AuthError>;
}
