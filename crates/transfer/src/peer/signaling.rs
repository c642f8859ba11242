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

use async_trait::async_trait;

use super::{event::EventSink, signal::SignalMessage};
use crate::{
    error::PeerError,
    types::{AccessCode, ReceiverId, Role},
};

/// Which signaling room to join, and as whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalRoute {
    pub code: AccessCode,
    pub role: Role,
    /// Required by the server for receivers.
    pub rid:  Option<ReceiverId>,
}

impl SignalRoute {
    #[must_use]
    pub const fn sender(code: AccessCode) -> Self {
        Self {
            code,
            role: Role::Sender,
            rid: None,
        }
    }

    #[must_use]
    pub const fn receiver(code: AccessCode, rid: ReceiverId) -> Self {
        Self {
            code,
            role: Role::Receiver,
            rid: Some(rid),
        }
    }
}

/// Outbound half of an open signaling channel.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn send(&self, message: &SignalMessage) -> Result<(), PeerError>;

    /// Stop delivering and release the transport. Idempotent.
    async fn close(&self);
}

/// Opens signaling channels. Inbound messages go to `events`; when the
/// transport ends, [`super::SessionEvent::SignalClosed`] is pushed.
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn connect(&self, route: &SignalRoute, events: EventSink) -> Result<Box<dyn SignalSink>, PeerError>;
}
