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

use tokio::sync::mpsc;

use super::{link::LinkEvent, signal::SignalMessage};

/// Everything a session reacts to, funnelled into one queue.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Signal(SignalMessage),
    /// The signaling transport is gone.
    SignalClosed,
    Link(LinkEvent),
}

/// Producer side of a session's event queue, handed to transports and
/// native callbacks.
pub type EventSink = mpsc::UnboundedSender<SessionEvent>;
