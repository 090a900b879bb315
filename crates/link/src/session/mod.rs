mod bootstrap;
mod config;
mod reconnect;

pub use bootstrap::{Session, SessionBootstrap, SessionError};
pub use config::{Credentials, SessionConfig};
pub use reconnect::{ReconnectSupervisor, SupervisorStats};
