// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::ResultExt;
use tracing::debug;

use crate::error::{EncodeSnafu, PeerError};

/// ICE candidate in the browser's `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate:         String,
    #[serde(default)]
    pub sdp_mid:           Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index:  Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Messages exchanged over the signaling channel, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalMessage {
    Ready,
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Ice {
        candidate: IceCandidate,
    },
    /// Abandon the peer channel and use the relay.
    #[serde(rename = "fallback_http")]
    Fallback {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// The receiver has the whole file.
    #[serde(rename = "p2p_done")]
    Done,
    /// Reported by the signaling server, e.g. `room_taken`.
    Error {
        #[serde(default)]
        message: String,
    },
}

impl SignalMessage {
    pub fn encode(&self) -> Result<String, PeerError> {
        serde_json::to_string(self).context(EncodeSnafu {
            what: "signal message",
        })
    }

    /// `None` for messages this client does not understand.
    #[must_use]
    pub fn decode(text: &str) -> Option<Self> {
        serde_json::from_str(text)
            .inspect_err(|e| debug!(error = %e, "ignoring unknown signal message"))
            .ok()
    }

    /// Accepts a message object or a JSON string holding one.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::String(text) => Self::decode(&text),
            other => serde_json::from_value(other)
                .inspect_err(|e| debug!(error = %e, "ignoring unknown signal message"))
                .ok(),
        }
    }

    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Ice { .. } => "ice",
            Self::Fallback { .. } => "fallback_http",
            Self::Done => "p2p_done",
            Self::Error { .. } => "error",
        }
    }
}
