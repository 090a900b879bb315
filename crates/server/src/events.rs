use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected {
        client_id: u32,
        user: String,
        addr: SocketAddr,
    },
    ClientDisconnected {
        client_id: u32,
        user: String,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    RequestRejected {
        user: String,
        message: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy)]
pub enum DisconnectReason {
    Graceful,
    Dropped,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Dropped => "dropped",
            DisconnectReason::Shutdown => "closed by server",
        }
    }
}
