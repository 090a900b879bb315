use parking_lot::Mutex;

use super::config::{Credentials, SessionConfig};
use crate::lobby::{AuthError, AuthService, LobbyStatus};
use crate::net::{ConnectionState, DuplexPipeline, HandshakeError, NetworkStats};
use crate::protocol::{ClientMessage, ServerMessage};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("lobby {lobby:?} not available ({status:?})")]
    LobbyRefused { lobby: String, status: LobbyStatus },
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}

/// A connected pipeline plus what the bootstrap learned getting there.
pub struct Session {
    pipeline: DuplexPipeline,
    username: String,
    lobby_status: LobbyStatus,
}

impl Session {
    /// Queues `message`, tagging it with the session's user if it has none.
    pub fn send(&self, mut message: ClientMessage) {
        if message.username.is_none() {
            message.username = Some(self.username.clone());
        }
        self.pipeline.send(message);
    }

    pub fn receive(&self) -> Option<ServerMessage> {
        self.pipeline.receive()
    }

    pub fn state(&self) -> ConnectionState {
        self.pipeline.state()
    }

    pub fn stats(&self) -> NetworkStats {
        self.pipeline.stats()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn lobby_status(&self) -> LobbyStatus {
        self.lobby_status
    }

    pub fn pipeline(&self) -> &DuplexPipeline {
        &self.pipeline
    }

    pub fn exit(&self) {
        self.pipeline.exit();
    }
}

/// Runs the HTTP steps and the socket upgrade for one session.
pub struct SessionBootstrap<A> {
    auth: A,
    config: SessionConfig,
    credentials: Credentials,
    lobby_status: Mutex<LobbyStatus>,
}

impl<A: AuthService> SessionBootstrap<A> {
    pub fn new(auth: A, config: SessionConfig, credentials: Credentials) -> Self {
        Self {
            auth,
            config,
            credentials,
            lobby_status: Mutex::new(LobbyStatus::Unconnected),
        }
    }

    pub fn auth(&self) -> &A {
        &self.auth
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Status recorded by the most recent lobby request.
    pub fn lobby_status(&self) -> LobbyStatus {
        *self.lobby_status.lock()
    }

    pub fn connect(&self) -> Result<Session, SessionError> {
        let creds = &self.credentials;

        if let Err(e) = self.auth.create_user(&creds.username, &creds.password) {
            log::warn!("Could not create user {}: {}", creds.username, e);
        }

        let token = self
            .auth
            .authenticate(&creds.username, &creds.password)
            .inspect_err(|e| log::error!("Authentication as {} failed: {}", creds.username, e))?;

        let status = self.auth.open_lobby(
            &creds.lobby_name,
            creds.lobby_password.as_deref(),
            &token,
            creds.create_lobby,
        )?;
        *self.lobby_status.lock() = status;
        if !status.is_connected() {
            log::warn!("Lobby {} answered {:?}", creds.lobby_name, status);
            return Err(SessionError::LobbyRefused {
                lobby: creds.lobby_name.clone(),
                status,
            });
        }
        log::info!("Joined lobby {} as {}", creds.lobby_name, creds.username);

        let pipeline = DuplexPipeline::connect(
            &self.config.host,
            self.config.ws_port,
            Some(&token),
            self.config.pipeline.clone(),
        )?;
        log::info!(
            "Session established on {}:{}",
            self.config.host,
            self.config.ws_port
        );

        Ok(Session {
            pipeline,
            username: creds.username.clone(),
            lobby_status: status,
        })
    }
}
