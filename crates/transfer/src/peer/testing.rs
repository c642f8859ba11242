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

//! In-memory signaling and links for session tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use super::{
    event::{EventSink, SessionEvent},
    link::{ChannelMessage, IceServer, LinkEvent, PeerLink, PeerLinkFactory},
    signal::{IceCandidate, SignalMessage},
    signaling::{SignalRoute, SignalSink, SignalingConnector},
};
use crate::{error::PeerError, types::Role};

#[derive(Default)]
struct Room {
    members:      HashMap<Role, EventSink>,
    log:          Vec<(Role, SignalMessage)>,
    injected:     HashMap<Role, Vec<SessionEvent>>,
    dropped:      Vec<&'static str>,
    closed_sinks: usize,
}

/// Forwards every message to the other role, like the relay's room.
#[derive(Clone, Default)]
pub struct MemoryHub {
    room: Arc<Mutex<Room>>,
}

impl MemoryHub {
    fn room(&self) -> MutexGuard<'_, Room> { self.room.lock().unwrap() }

    /// Queue `message` for `role`, delivered as soon as it connects.
    pub fn inject_after_connect(&self, role: Role, message: SignalMessage) {
        self.room()
            .injected
            .entry(role)
            .or_default()
            .push(SessionEvent::Signal(message));
    }

    /// Report the signaling transport of `role` as lost, now if it is
    /// connected, otherwise as soon as it connects.
    pub fn hang_up(&self, role: Role) {
        let mut room = self.room();
        match room.members.get(&role) {
            Some(events) => {
                let _ = events.send(SessionEvent::SignalClosed);
            }
            None => room.injected.entry(role).or_default().push(SessionEvent::SignalClosed),
        }
    }

    /// Record but never deliver messages of this kind.
    pub fn drop_kind(&self, kind: &'static str) { self.room().dropped.push(kind); }

    pub fn kinds(&self) -> Vec<&'static str> { self.room().log.iter().map(|(_, m)| m.kind()).collect() }

    pub fn sent_by(&self, role: Role) -> Vec<SignalMessage> {
        self.room()
            .log
            .iter()
            .filter(|(from, _)| *from == role)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn closed_sinks(&self) -> usize { self.room().closed_sinks }
}

#[async_trait]
impl SignalingConnector for MemoryHub {
    async fn connect(&self, route: &SignalRoute, events: EventSink) -> Result<Box<dyn SignalSink>, PeerError> {
        let mut room = self.room();
        for event in room.injected.remove(&route.role).unwrap_or_default() {
            let _ = events.send(event);
        }
        room.members.insert(route.role, events);
        Ok(Box::new(MemorySink {
            hub:  self.clone(),
            role: route.role,
        }))
    }
}

struct MemorySink {
    hub:  MemoryHub,
    role: Role,
}

#[async_trait]
impl SignalSink for MemorySink {
    async fn send(&self, message: &SignalMessage) -> Result<(), PeerError> {
        let mut room = self.hub.room();
        room.log.push((self.role, message.clone()));
        if !room.dropped.contains(&message.kind()) {
            if let Some(peer) = room.members.get(&self.role.peer()) {
                let _ = peer.send(SessionEvent::Signal(message.clone()));
            }
        }
        Ok(())
    }

    async fn close(&self) {
        let mut room = self.hub.room();
        if room.members.remove(&self.role).is_some() {
            room.closed_sinks += 1;
        }
    }
}

#[derive(Default)]
struct Wire {
    sides:    [Option<EventSink>; 2],
    injected: [Vec<LinkEvent>; 2],
    calls:    [Vec<&'static str>; 2],
    closed:   [bool; 2],
    waits:    [usize; 2],
    buffered: [usize; 2],
    slices:   [usize; 2],
}

/// Two ends of a lossless link. The channel opens once the offerer
/// applies the answer.
#[derive(Clone)]
pub struct MemoryLinks {
    side:    usize,
    wire:    Arc<Mutex<Wire>>,
    drained: Arc<Notify>,
}

impl MemoryLinks {
    pub fn pair() -> (Self, Self) {
        let wire = Arc::new(Mutex::new(Wire::default()));
        let drained = Arc::new(Notify::new());
        (
            Self {
                side:    0,
                wire:    Arc::clone(&wire),
                drained: Arc::clone(&drained),
            },
            Self {
                side: 1,
                wire,
                drained,
            },
        )
    }

    fn wire(&self) -> MutexGuard<'_, Wire> { self.wire.lock().unwrap() }

    /// Events pushed to this side right after it is opened.
    pub fn inject_after_open(&self, events: Vec<LinkEvent>) { self.wire().injected[self.side] = events; }

    /// Negotiation calls and `close`, in order.
    pub fn calls(&self) -> Vec<&'static str> { self.wire().calls[self.side].clone() }

    pub fn closed(&self) -> bool { self.wire().closed[self.side] }

    pub fn buffered_waits(&self) -> usize { self.wire().waits[self.side] }

    /// Binary slices sent from this side.
    pub fn slices_sent(&self) -> usize { self.wire().slices[self.side] }

    /// Report `amount` bytes as buffered until [`Self::drain`] is called.
    pub fn hold(&self, amount: usize) { self.wire().buffered[self.side] = amount; }

    pub fn drain(&self) {
        self.wire().buffered[self.side] = 0;
        self.drained.notify_waiters();
    }

    /// Push `event` to this side's session.
    pub fn emit(&self, event: LinkEvent) { self.deliver(self.side, event); }

    fn record(&self, call: &'static str) { self.wire().calls[self.side].push(call); }

    fn deliver(&self, side: usize, event: LinkEvent) {
        if let Some(events) = &self.wire().sides[side] {
            let _ = events.send(SessionEvent::Link(event));
        }
    }
}

#[async_trait]
impl PeerLinkFactory for MemoryLinks {
    async fn open(&self, _ice: &[IceServer], events: EventSink) -> Result<Arc<dyn PeerLink>, PeerError> {
        let mut wire = self.wire();
        for event in std::mem::take(&mut wire.injected[self.side]) {
            let _ = events.send(SessionEvent::Link(event));
        }
        wire.sides[self.side] = Some(events);
        drop(wire);
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl PeerLink for MemoryLinks {
    async fn create_offer(&self) -> Result<String, PeerError> {
        self.record("create_offer");
        Ok("offer:memory".to_string())
    }

    async fn accept_offer(&self, _sdp: String) -> Result<String, PeerError> {
        self.record("accept_offer");
        Ok("answer:memory".to_string())
    }

    async fn accept_answer(&self, _sdp: String) -> Result<(), PeerError> {
        self.record("accept_answer");
        self.deliver(0, LinkEvent::ChannelOpen);
        self.deliver(1, LinkEvent::ChannelOpen);
        Ok(())
    }

    async fn add_candidate(&self, _candidate: IceCandidate) -> Result<(), PeerError> {
        self.record("add_candidate");
        Ok(())
    }

    async fn send_text(&self, text: String) -> Result<(), PeerError> {
        self.deliver(1 - self.side, LinkEvent::ChannelMessage(ChannelMessage::Text(text)));
        Ok(())
    }

    async fn send_binary(&self, data: Bytes) -> Result<(), PeerError> {
        self.wire().slices[self.side] += 1;
        self.deliver(1 - self.side, LinkEvent::ChannelMessage(ChannelMessage::Binary(data)));
        Ok(())
    }

    async fn buffered_amount(&self) -> usize { self.wire().buffered[self.side] }

    async fn wait_buffered_low(&self, low_water: usize) -> Result<(), PeerError> {
        self.wire().waits[self.side] += 1;
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            let buffered = self.wire().buffered[self.side];
            if buffered <= low_water {
                return Ok(());
            }
            drained.await;
        }
    }

    async fn close(&self) {
        let already = std::mem::replace(&mut self.wire().closed[self.side], true);
        if already {
            return;
        }
        self.record("close");
        self.deliver(1 - self.side, LinkEvent::ChannelClosed);
        self.wire().sides[self.side] = None;
    }
}
