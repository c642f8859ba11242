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

//! Direct peer channel: signaling, the native link and the session state
//! machine tying them together.

mod event;
mod link;
mod relay;
mod rtc;
mod session;
mod signal;
mod signaling;
mod stream;
#[cfg(test)]
pub(crate) mod testing;
mod ws;

pub use event::{EventSink, SessionEvent};
pub use link::{ChannelMessage, IceServer, LinkEvent, LinkState, PeerLink, PeerLinkFactory};
pub use relay::RelaySignaling;
pub use rtc::RtcLinkFactory;
pub use session::{PeerSession, SessionOutcome, SessionState};
pub use signal::{IceCandidate, SignalMessage};
pub use signaling::{SignalRoute, SignalSink, SignalingConnector};
pub use stream::{IncomingFile, StreamFrame, send_file};
pub use ws::WsSignaling;
