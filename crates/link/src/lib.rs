pub mod lobby;
pub mod net;
pub mod protocol;
pub mod session;
pub mod sync;

pub use lobby::{
    AuthError, AuthService, HttpAuthClient, LobbyRequest, LobbyStatus, UserRequest, bearer_token,
};
pub use net::{
    ConnectionState, DEFAULT_PATH, DuplexPipeline, Frame, FrameError, FrameReader,
    HandshakeError, InboundMode, Incoming, NetworkStats, Opcode, PipelineConfig, UpgradeInfo,
    UpgradeRequest,
};
pub use protocol::{
    ClientMessage, ClientRequest, CodecError, Coordinate, DummyObject, GameObjects, ObjectData,
    RequestInfo, ServerMessage, StageInfo,
};
pub use session::{
    Credentials, ReconnectSupervisor, Session, SessionBootstrap, SessionConfig, SessionError,
    SupervisorStats,
};
pub use sync::{GuardedQueue, WaitSignal};
