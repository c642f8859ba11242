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

//! Direct-channel session: `idle -> signaling -> connecting -> streaming ->
//! {done | falling_back}`.
//!
//! Signaling messages and native link callbacks are merged into a single
//! event queue and consumed by one loop, so the session state is only ever
//! touched from the task driving it.

use std::sync::Arc;

use bon::Builder;
use strum_macros::Display;
use tokio::{
    sync::mpsc,
    time::{Instant, timeout_at},
};
use tracing::{debug, info, warn};

use super::{
    event::SessionEvent,
    link::{IceServer, LinkEvent, LinkState, PeerLink, PeerLinkFactory},
    signal::{IceCandidate, SignalMessage},
    signaling::{SignalRoute, SignalSink, SignalingConnector},
    stream::{IncomingFile, send_file},
};
use crate::{
    config::PeerConfig,
    error::PeerError,
    progress::Progress,
    types::{FallbackReason, OutgoingFile, ReceivedFile, Role},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Idle,
    Signaling,
    Connecting,
    Streaming,
    Done,
    FallingBack,
}

/// Result of a session that ran to a controlled end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome<T> {
    Success(T),
    Fallback(FallbackReason),
}

/// How an event was consumed by the handling shared by every phase.
enum Absorbed {
    Handled,
    Fallback(FallbackReason),
    Pending(SessionEvent),
}

/// One attempt at a direct transfer. Consumed by [`PeerSession::send`] or
/// [`PeerSession::receive`].
#[derive(Builder)]
pub struct PeerSession {
    route:     SignalRoute,
    ice:       Vec<IceServer>,
    #[builder(default)]
    config:    PeerConfig,
    signaling: Arc<dyn SignalingConnector>,
    links:     Arc<dyn PeerLinkFactory>,
    #[builder(default)]
    progress:  Progress,
}

impl PeerSession {
    /// Stream `file` to the receiver. Success requires the receiver's
    /// `p2p_done`.
    pub async fn send(self, file: &OutgoingFile) -> Result<SessionOutcome<()>, PeerError> {
        let mut machine = self.start().await?;
        let result = machine.run_sender(file).await;
        machine.shutdown(&result).await;
        result
    }

    /// Receive one file from the sender.
    pub async fn receive(self) -> Result<SessionOutcome<ReceivedFile>, PeerError> {
        let mut machine = self.start().await?;
        let result = machine.run_receiver().await;
        machine.shutdown(&result).await;
        result
    }

    async fn start(self) -> Result<Machine, PeerError> {
        let (events_tx, events) = mpsc::unbounded_channel();
        let signal = self.signaling.connect(&self.route, events_tx.clone()).await?;
        let link = match self.links.open(&self.ice, events_tx).await {
            Ok(link) => link,
            Err(e) => {
                signal.close().await;
                return Err(e);
            }
        };

        let mut machine = Machine {
            role: self.route.role,
            state: SessionState::Idle,
            config: self.config,
            progress: self.progress,
            link,
            signal,
            events,
            remote_described: false,
            pending_candidates: Vec::new(),
            negotiated: false,
        };
        machine.transition(SessionState::Signaling);
        if let Err(e) = machine.signal.send(&SignalMessage::Ready).await {
            machine.release().await;
            return Err(e);
        }
        Ok(machine)
    }
}

struct Machine {
    role:               Role,
    state:              SessionState,
    config:             PeerConfig,
    progress:           Progress,
    link:               Arc<dyn PeerLink>,
    signal:             Box<dyn SignalSink>,
    events:             mpsc::UnboundedReceiver<SessionEvent>,
    /// Remote candidates can only be applied after the remote description.
    remote_described:   bool,
    pending_candidates: Vec<IceCandidate>,
    /// Offer sent (sender) or offer answered (receiver).
    negotiated:         bool,
}

impl Machine {
    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            info!(role = %self.role, from = %self.state, to = %next, "peer session state");
            self.state = next;
        }
    }

    /// Every producer gone means the signaling transport is gone too.
    async fn next_event(&mut self) -> SessionEvent {
        self.events.recv().await.unwrap_or(SessionEvent::SignalClosed)
    }

    async fn send_signal(&self, message: &SignalMessage) -> Result<(), FallbackReason> {
        self.signal.send(message).await.map_err(|e| {
            warn!(role = %self.role, kind = message.kind(), error = %e, "signal not delivered");
            FallbackReason::SignalingClosed
        })
    }

    async fn apply_candidate(&self, candidate: IceCandidate) {
        if let Err(e) = self.link.add_candidate(candidate).await {
            warn!(role = %self.role, error = %e, "remote candidate rejected");
        }
    }

    async fn remote_description_set(&mut self) {
        self.remote_described = true;
        for candidate in std::mem::take(&mut self.pending_candidates) {
            self.apply_candidate(candidate).await;
        }
    }

    /// Handling common to both roles and all phases.
    async fn absorb(&mut self, event: SessionEvent) -> Absorbed {
        match event {
            SessionEvent::Link(LinkEvent::LocalCandidate(candidate)) => {
                match self.send_signal(&SignalMessage::Ice { candidate }).await {
                    Ok(()) => Absorbed::Handled,
                    Err(reason) => Absorbed::Fallback(reason),
                }
            }
            SessionEvent::Signal(SignalMessage::Ice { candidate }) => {
                if self.remote_described {
                    self.apply_candidate(candidate).await;
                } else {
                    self.pending_candidates.push(candidate);
                }
                Absorbed::Handled
            }
            SessionEvent::Signal(SignalMessage::Fallback { reason }) => Absorbed::Fallback(FallbackReason::Remote(
                reason.unwrap_or_else(|| "unspecified".to_string()),
            )),
            SessionEvent::Signal(SignalMessage::Error { message }) => {
                Absorbed::Fallback(FallbackReason::Server(message))
            }
            SessionEvent::SignalClosed => Absorbed::Fallback(FallbackReason::SignalingClosed),
            SessionEvent::Link(LinkEvent::StateChanged(LinkState::Failed)) => {
                Absorbed::Fallback(FallbackReason::ConnectionFailed)
            }
            SessionEvent::Link(LinkEvent::StateChanged(state)) => {
                debug!(role = %self.role, %state, "link state");
                Absorbed::Handled
            }
            SessionEvent::Link(LinkEvent::ChannelError(message)) => {
                Absorbed::Fallback(FallbackReason::ChannelError(message))
            }
            other => Absorbed::Pending(other),
        }
    }

    /// Next event, or `None` once `deadline` passed.
    async fn next_event_before(&mut self, deadline: Instant) -> Option<SessionEvent> {
        timeout_at(deadline, self.next_event()).await.ok()
    }

    async fn run_sender(&mut self, file: &OutgoingFile) -> Result<SessionOutcome<()>, PeerError> {
        let deadline = Instant::now() + self.config.signaling_timeout;
        loop {
            let Some(event) = self.next_event_before(deadline).await else {
                return Ok(SessionOutcome::Fallback(FallbackReason::Timeout));
            };
            match self.absorb(event).await {
                Absorbed::Handled => {}
                Absorbed::Fallback(reason) => return Ok(SessionOutcome::Fallback(reason)),
                Absorbed::Pending(SessionEvent::Signal(SignalMessage::Ready)) if !self.negotiated => {
                    let sdp = self.link.create_offer().await?;
                    self.negotiated = true;
                    if let Err(reason) = self.send_signal(&SignalMessage::Offer { sdp }).await {
                        return Ok(SessionOutcome::Fallback(reason));
                    }
                    self.transition(SessionState::Connecting);
                }
                Absorbed::Pending(SessionEvent::Signal(SignalMessage::Answer { sdp })) if self.negotiated => {
                    self.link.accept_answer(sdp).await?;
                    self.remote_description_set().await;
                }
                Absorbed::Pending(SessionEvent::Link(LinkEvent::ChannelOpen)) => break,
                Absorbed::Pending(SessionEvent::Link(LinkEvent::ChannelClosed)) => {
                    return Ok(SessionOutcome::Fallback(FallbackReason::ChannelClosed));
                }
                Absorbed::Pending(other) => debug!(role = %self.role, ?other, "ignored while negotiating"),
            }
        }

        self.transition(SessionState::Streaming);
        let link = Arc::clone(&self.link);
        let progress = self.progress.clone();
        let (chunk_size, low_water) = (self.config.chunk_size, self.config.low_water_mark);
        let streaming = send_file(link.as_ref(), file, chunk_size, low_water, &progress);
        tokio::pin!(streaming);

        let mut confirmed = false;
        loop {
            tokio::select! {
                sent = &mut streaming => {
                    if let Err(e) = sent {
                        warn!(error = %e, "streaming failed");
                        return Ok(SessionOutcome::Fallback(FallbackReason::ChannelError(e.to_string())));
                    }
                    break;
                }
                event = self.next_event() => match self.absorb(event).await {
                    Absorbed::Handled => {}
                    Absorbed::Fallback(reason) => return Ok(SessionOutcome::Fallback(reason)),
                    Absorbed::Pending(SessionEvent::Signal(SignalMessage::Done)) => confirmed = true,
                    Absorbed::Pending(SessionEvent::Link(LinkEvent::ChannelClosed)) => {
                        return Ok(SessionOutcome::Fallback(FallbackReason::ChannelClosed));
                    }
                    Absorbed::Pending(other) => debug!(?other, "ignored while streaming"),
                },
            }
        }
        info!(name = %file.name, bytes = file.size(), "all slices queued, awaiting confirmation");

        // The receiver tears the link down right after confirming, so link
        // events no longer count as failures here.
        let deadline = Instant::now() + self.config.done_timeout;
        while !confirmed {
            let Some(event) = self.next_event_before(deadline).await else {
                return Ok(SessionOutcome::Fallback(FallbackReason::NoConfirmation));
            };
            match event {
                SessionEvent::Signal(SignalMessage::Done) => confirmed = true,
                SessionEvent::Link(
                    LinkEvent::ChannelClosed | LinkEvent::ChannelError(_) | LinkEvent::StateChanged(_),
                ) => debug!("link event after last slice ignored"),
                other => {
                    if let Absorbed::Fallback(reason) = self.absorb(other).await {
                        return Ok(SessionOutcome::Fallback(reason));
                    }
                }
            }
        }
        Ok(SessionOutcome::Success(()))
    }

    async fn run_receiver(&mut self) -> Result<SessionOutcome<ReceivedFile>, PeerError> {
        let deadline = Instant::now() + self.config.signaling_timeout;
        let mut incoming = IncomingFile::default();
        loop {
            let event = if self.state == SessionState::Streaming {
                self.next_event().await
            } else {
                let Some(event) = self.next_event_before(deadline).await else {
                    return Ok(SessionOutcome::Fallback(FallbackReason::Timeout));
                };
                event
            };

            match self.absorb(event).await {
                Absorbed::Handled => {}
                Absorbed::Fallback(reason) => return Ok(SessionOutcome::Fallback(reason)),
                // The sender may have joined after our own ready went out.
                Absorbed::Pending(SessionEvent::Signal(SignalMessage::Ready)) if !self.negotiated => {
                    if let Err(reason) = self.send_signal(&SignalMessage::Ready).await {
                        return Ok(SessionOutcome::Fallback(reason));
                    }
                }
                Absorbed::Pending(SessionEvent::Signal(SignalMessage::Offer { sdp })) if !self.negotiated => {
                    let answer = self.link.accept_offer(sdp).await?;
                    self.negotiated = true;
                    self.remote_description_set().await;
                    if let Err(reason) = self.send_signal(&SignalMessage::Answer { sdp: answer }).await {
                        return Ok(SessionOutcome::Fallback(reason));
                    }
                    self.transition(SessionState::Connecting);
                }
                Absorbed::Pending(SessionEvent::Link(LinkEvent::ChannelOpen)) => {
                    self.transition(SessionState::Streaming);
                }
                Absorbed::Pending(SessionEvent::Link(LinkEvent::ChannelMessage(message))) => {
                    self.transition(SessionState::Streaming);
                    match incoming.accept(message, &self.progress) {
                        Ok(None) => {}
                        Ok(Some(file)) => {
                            info!(name = %file.name, bytes = file.data.len(), "file received over peer channel");
                            if self.send_signal(&SignalMessage::Done).await.is_err() {
                                warn!("sender was not told about completion");
                            }
                            return Ok(SessionOutcome::Success(file));
                        }
                        Err(e) => {
                            warn!(error = %e, received = incoming.received(), "peer stream rejected");
                            return Ok(SessionOutcome::Fallback(FallbackReason::Integrity));
                        }
                    }
                }
                Absorbed::Pending(SessionEvent::Link(LinkEvent::ChannelClosed)) => {
                    return Ok(SessionOutcome::Fallback(FallbackReason::ChannelClosed));
                }
                Absorbed::Pending(other) => debug!(role = %self.role, ?other, "ignored"),
            }
        }
    }

    /// Tell the peer about a fallback this side detected, then release
    /// everything.
    async fn shutdown<T>(&mut self, result: &Result<SessionOutcome<T>, PeerError>) {
        let notice = match result {
            Ok(SessionOutcome::Success(_)) => None,
            Ok(SessionOutcome::Fallback(reason)) => reason.is_local().then(|| reason.to_string()),
            Err(e) => Some(FallbackReason::Error(e.to_string()).to_string()),
        };
        match result {
            Ok(SessionOutcome::Success(_)) => self.transition(SessionState::Done),
            _ => self.transition(SessionState::FallingBack),
        }
        if let Some(reason) = notice {
            let message = SignalMessage::Fallback { reason: Some(reason) };
            if let Err(e) = self.signal.send(&message).await {
                debug!(error = %e, "fallback notice not delivered");
            }
        }
        self.release().await;
    }

    async fn release(&self) {
        self.link.close().await;
        self.signal.close().await;
    }
}
