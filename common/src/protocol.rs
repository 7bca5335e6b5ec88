//! Protocol definition for the clip socket.
//!
use serde::{Deserialize, Serialize};

use crate::decision::DecisionResult;

/// Definition of protocol messages.
#[derive(Debug, Deserialize, Serialize)]
pub enum ProtoMsg {
    /// Opens a clip session under the given name.
    ConnectReq(String),
    FrameMsg(FrameMsg),
    /// No more frames follow for this session.
    EndOfStream,
    /// Sent by the server once the engine has decided.
    Decision(DecisionResult),
}

/// Frame message carrying one JPEG-encoded frame.
#[derive(Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FrameMsg {
    pub id: String,
    pub data: Vec<u8>,
}

impl FrameMsg {
    pub fn new(id: String, data: Vec<u8>) -> Self {
        Self { id, data }
    }
}

impl ProtoMsg {
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Box<bincode::ErrorKind>> {
        bincode::deserialize(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, Box<bincode::ErrorKind>> {
        bincode::serialize(self)
    }
}
