mod config;
pub mod frame;
pub mod handshake;
mod pipeline;
mod stats;

pub use config::{DEFAULT_PATH, InboundMode, PipelineConfig};
pub use frame::{Frame, FrameError, FrameReader, Incoming, Opcode};
pub use handshake::{HandshakeError, UpgradeInfo, UpgradeRequest};
pub use pipeline::{ConnectionState, DuplexPipeline};
pub use stats::NetworkStats;
