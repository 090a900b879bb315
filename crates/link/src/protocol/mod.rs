mod codec;
mod messages;

pub use codec::{CodecError, decode, encode};
pub use messages::{
    ClientMessage, ClientRequest, Coordinate, DummyObject, GameObjects, ObjectData, RequestInfo,
    ServerMessage, StageInfo,
};
