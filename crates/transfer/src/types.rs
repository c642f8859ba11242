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

use bytes::Bytes;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use strum_macros::EnumString;

use crate::progress::Progress;

/// Short identifier binding a sender and a receiver to one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub struct AccessCode(String);

impl From<String> for AccessCode {
    fn from(code: String) -> Self { Self(code) }
}

impl From<&str> for AccessCode {
    fn from(code: &str) -> Self { Self(code.to_string()) }
}

impl AccessCode {
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

/// Identifies one receiving client to the relay. The relay serves blocks of
/// a transfer to the first receiver id that asks for them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub struct ReceiverId(String);

impl From<String> for ReceiverId {
    fn from(rid: String) -> Self { Self(rid) }
}

impl From<&str> for ReceiverId {
    fn from(rid: &str) -> Self { Self(rid.to_string()) }
}

impl ReceiverId {
    #[must_use]
    pub fn generate() -> Self { Self(uuid::Uuid::new_v4().simple().to_string()) }

    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    #[must_use]
    pub const fn peer(self) -> Self {
        match self {
            Self::Sender => Self::Receiver,
            Self::Receiver => Self::Sender,
        }
    }
}

/// Which transport is (or was last) carrying the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TransferPath {
    Peer,
    Http,
}

/// Why the direct peer channel was abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum FallbackReason {
    /// The data channel did not open within the signaling timeout.
    #[display("timeout")]
    Timeout,
    #[display("signaling_closed")]
    SignalingClosed,
    #[display("connection_failed")]
    ConnectionFailed,
    #[display("channel_closed")]
    ChannelClosed,
    #[display("channel_error: {_0}")]
    ChannelError(String),
    /// The other side asked to fall back.
    #[display("remote: {_0}")]
    Remote(String),
    /// The signaling server reported an error such as `room_taken`.
    #[display("server: {_0}")]
    Server(String),
    /// All bytes were sent but the receiver never confirmed them.
    #[display("no_confirmation")]
    NoConfirmation,
    /// The received stream failed validation.
    #[display("integrity")]
    Integrity,
    /// The session hit an error that is not one of the triggers above.
    #[display("error: {_0}")]
    Error(String),
}

impl FallbackReason {
    /// Whether this side detected the trigger and should tell the peer.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        !matches!(
            self,
            Self::SignalingClosed | Self::Remote(_) | Self::Server(_)
        )
    }
}

/// Terminal status of a transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum TransferStatus {
    #[display("running")]
    Running,
    #[display("success")]
    Success,
    #[display("fallback({_0})")]
    Fallback(FallbackReason),
    #[display("error({_0})")]
    Error(String),
}

/// State of the transfer currently owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct TransferSession {
    pub path:     TransferPath,
    pub progress: Progress,
    pub status:   TransferStatus,
}

impl TransferSession {
    #[must_use]
    pub const fn new(path: TransferPath, progress: Progress) -> Self {
        Self {
            path,
            progress,
            status: TransferStatus::Running,
        }
    }
}

/// A file held in memory, ready to be sent.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub name: String,
    pub data: Bytes,
}

impl OutgoingFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    #[must_use]
    pub fn size(&self) -> u64 { self.data.len() as u64 }
}

/// A fully reassembled file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub name: String,
    pub data: Bytes,
}

/// Summary handed back once a transfer finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub path:      TransferPath,
    pub bytes:     u64,
    /// Set when the peer path was attempted and abandoned.
    pub fallback:  Option<FallbackReason>,
    /// Sending: the receiver confirmed it consumed the data. Receiving: the
    /// completion notice reached the relay.
    pub confirmed: bool,
}
