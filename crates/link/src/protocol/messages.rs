use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::codec::{self, CodecError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coordinate {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Timestamp left by one hop of the request path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageInfo {
    pub sent_time: f64,
}

/// Timing envelope carried by every message; unused stages stay at 0.0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestInfo {
    pub client: StageInfo,
    pub authproxy: StageInfo,
    pub request_sync: StageInfo,
    pub calculation_unit: StageInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientRequest {
    #[serde(rename = "SetClientFPS")]
    SetClientFps(f64),
    SpawnDummy(String),
    DummySetVelocity { id: String, position: Coordinate },
    Connect(String),
}

impl ClientRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ClientRequest::SetClientFps(_) => "SetClientFPS",
            ClientRequest::SpawnDummy(_) => "SpawnDummy",
            ClientRequest::DummySetVelocity { .. } => "DummySetVelocity",
            ClientRequest::Connect(_) => "Connect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(default)]
    pub request_info: RequestInfo,
    pub request_data: ClientRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl ClientMessage {
    pub fn new(request_data: ClientRequest) -> Self {
        Self {
            request_info: RequestInfo::default(),
            request_data,
            username: None,
        }
    }

    pub fn set_client_fps(fps: f64) -> Self {
        Self::new(ClientRequest::SetClientFps(fps))
    }

    pub fn spawn_dummy(id: impl Into<String>) -> Self {
        Self::new(ClientRequest::SpawnDummy(id.into()))
    }

    pub fn dummy_set_velocity(id: impl Into<String>, position: Coordinate) -> Self {
        Self::new(ClientRequest::DummySetVelocity {
            id: id.into(),
            position,
        })
    }

    pub fn connect(id: impl Into<String>) -> Self {
        Self::new(ClientRequest::Connect(id.into()))
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Fills in the client send time unless the caller already set one.
    pub fn stamp_sent_time(&mut self) {
        if self.request_info.client.sent_time == 0.0 {
            self.request_info.client.sent_time = unix_seconds();
        }
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CodecError> {
        codec::decode(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DummyObject {
    pub id: String,
    pub position: Coordinate,
    pub velocity: Coordinate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameObjects {
    #[serde(default)]
    pub dummies: HashMap<String, DummyObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectData {
    pub target_user_id: String,
    #[serde(default)]
    pub game_objects: GameObjects,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(default)]
    pub request_info: RequestInfo,
    pub request_data: ObjectData,
}

impl ServerMessage {
    pub fn new(target_user_id: impl Into<String>, game_objects: GameObjects) -> Self {
        Self {
            request_info: RequestInfo::default(),
            request_data: ObjectData {
                target_user_id: target_user_id.into(),
                game_objects,
            },
        }
    }

    pub fn dummies(&self) -> &HashMap<String, DummyObject> {
        &self.request_data.game_objects.dummies
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CodecError> {
        codec::decode(bytes)
    }
}

fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
