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

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use strum_macros::Display;

use super::{event::EventSink, signal::IceCandidate};
use crate::error::PeerError;

/// STUN/TURN server offered by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls:       Vec<String>,
    pub username:   Option<String>,
    pub credential: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Text(String),
    Binary(Bytes),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LinkState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Native connection callbacks, as queued events.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    LocalCandidate(IceCandidate),
    StateChanged(LinkState),
    ChannelOpen,
    ChannelMessage(ChannelMessage),
    ChannelClosed,
    ChannelError(String),
}

/// One direct connection with a single data channel.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Create the data channel and a local offer; returns the offer SDP.
    async fn create_offer(&self) -> Result<String, PeerError>;

    /// Apply a remote offer and return the local answer SDP.
    async fn accept_offer(&self, sdp: String) -> Result<String, PeerError>;

    async fn accept_answer(&self, sdp: String) -> Result<(), PeerError>;

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    async fn send_text(&self, text: String) -> Result<(), PeerError>;

    async fn send_binary(&self, data: Bytes) -> Result<(), PeerError>;

    /// Bytes queued on the channel but not yet sent.
    async fn buffered_amount(&self) -> usize;

    /// Resolve once the buffered amount is at or below `low_water`.
    async fn wait_buffered_low(&self, low_water: usize) -> Result<(), PeerError>;

    /// Release the channel and the connection. Idempotent.
    async fn close(&self);
}

#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    /// Open a connection whose callbacks are pushed into `events`.
    async fn open(&self, ice: &[IceServer], events: EventSink) -> Result<Arc<dyn PeerLink>, PeerError>;
}
