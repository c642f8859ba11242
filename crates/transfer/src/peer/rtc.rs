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

//! [`PeerLink`] backed by webrtc-rs.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use snafu::{OptionExt, ResultExt};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, warn};
use webrtc::{
    api::{APIBuilder, interceptor_registry::register_default_interceptors, media_engine::MediaEngine},
    data_channel::{RTCDataChannel, data_channel_message::DataChannelMessage, data_channel_state::RTCDataChannelState},
    ice_transport::{ice_candidate::{RTCIceCandidate, RTCIceCandidateInit}, ice_server::RTCIceServer},
    interceptor::registry::Registry,
    peer_connection::{
        RTCPeerConnection, configuration::RTCConfiguration,
        peer_connection_state::RTCPeerConnectionState, sdp::session_description::RTCSessionDescription,
    },
};

use super::{
    event::{EventSink, SessionEvent},
    link::{ChannelMessage, IceServer, LinkEvent, LinkState, PeerLink, PeerLinkFactory},
    signal::IceCandidate,
};
use crate::error::{ChannelSnafu, PeerError, RtcSnafu};

const CHANNEL_LABEL: &str = "file";

/// Largest message handed to the SCTP stack at once.
const MAX_FRAME: usize = 64 * 1024;

/// The low-threshold callback fires on crossings only; waiters re-check the
/// buffered amount at this pace as well.
const LOW_WATER_RECHECK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default)]
pub struct RtcLinkFactory;

#[async_trait]
impl PeerLinkFactory for RtcLinkFactory {
    async fn open(&self, ice: &[IceServer], events: EventSink) -> Result<Arc<dyn PeerLink>, PeerError> {
        let mut media = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut media).context(RtcSnafu {
            step: "register interceptors",
        })?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice.iter().map(rtc_ice_server).collect(),
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await.context(RtcSnafu {
            step: "create peer connection",
        })?);

        let link = RtcLink {
            pc,
            channel: Arc::new(RwLock::new(None)),
            low: Arc::new(Notify::new()),
            events,
        };
        link.bind_connection();
        Ok(Arc::new(link))
    }
}

fn rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

const fn link_state(state: RTCPeerConnectionState) -> LinkState {
    match state {
        RTCPeerConnectionState::Connected => LinkState::Connected,
        RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
        RTCPeerConnectionState::Failed => LinkState::Failed,
        RTCPeerConnectionState::Closed => LinkState::Closed,
        _ => LinkState::Connecting,
    }
}

fn push(events: &EventSink, event: LinkEvent) {
    if events.send(SessionEvent::Link(event)).is_err() {
        debug!("session gone, dropping link event");
    }
}

struct RtcLink {
    pc:      Arc<RTCPeerConnection>,
    channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,
    low:     Arc<Notify>,
    events:  EventSink,
}

impl RtcLink {
    fn bind_connection(&self) {
        let events = self.events.clone();
        self.pc.on_peer_connection_state_change(Box::new(move |state| {
            let events = events.clone();
            Box::pin(async move {
                debug!(%state, "peer connection state");
                push(&events, LinkEvent::StateChanged(link_state(state)));
            })
        }));

        let events = self.events.clone();
        self.pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => push(
                        &events,
                        LinkEvent::LocalCandidate(IceCandidate {
                            candidate:         init.candidate,
                            sdp_mid:           init.sdp_mid,
                            sdp_m_line_index:  init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }),
                    ),
                    Err(e) => warn!(error = %e, "cannot serialize local candidate"),
                }
            })
        }));

        // Receiving side: the channel is created by the remote offerer.
        let events = self.events.clone();
        let slot = Arc::clone(&self.channel);
        let low = Arc::clone(&self.low);
        self.pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let events = events.clone();
            let slot = Arc::clone(&slot);
            let low = Arc::clone(&low);
            Box::pin(async move {
                debug!(label = dc.label(), "remote data channel announced");
                bind_channel(&dc, &events, &low).await;
                *slot.write().await = Some(dc);
            })
        }));
    }

    async fn channel(&self) -> Result<Arc<RTCDataChannel>, PeerError> {
        self.channel.read().await.clone().context(ChannelSnafu {
            message: "is not open",
        })
    }
}

/// Route the channel's callbacks into the session queue.
async fn bind_channel(dc: &Arc<RTCDataChannel>, events: &EventSink, low: &Arc<Notify>) {
    let tx = events.clone();
    dc.on_open(Box::new(move || {
        Box::pin(async move { push(&tx, LinkEvent::ChannelOpen) })
    }));

    let tx = events.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = tx.clone();
        Box::pin(async move {
            let message = if msg.is_string {
                ChannelMessage::Text(String::from_utf8_lossy(&msg.data).into_owned())
            } else {
                ChannelMessage::Binary(msg.data)
            };
            push(&tx, LinkEvent::ChannelMessage(message));
        })
    }));

    let tx = events.clone();
    dc.on_close(Box::new(move || {
        let tx = tx.clone();
        Box::pin(async move { push(&tx, LinkEvent::ChannelClosed) })
    }));

    let tx = events.clone();
    dc.on_error(Box::new(move |e| {
        let tx = tx.clone();
        Box::pin(async move { push(&tx, LinkEvent::ChannelError(e.to_string())) })
    }));

    let low = Arc::clone(low);
    dc.on_buffered_amount_low(Box::new(move || {
        let low = Arc::clone(&low);
        Box::pin(async move { low.notify_waiters() })
    }))
    .await;

    // The open callback is not replayed for a channel that is already open.
    if dc.ready_state() == RTCDataChannelState::Open {
        push(events, LinkEvent::ChannelOpen);
    }
}

#[async_trait]
impl PeerLink for RtcLink {
    async fn create_offer(&self) -> Result<String, PeerError> {
        let dc = self
            .pc
            .create_data_channel(CHANNEL_LABEL, None)
            .await
            .context(RtcSnafu {
                step: "create data channel",
            })?;
        bind_channel(&dc, &self.events, &self.low).await;
        *self.channel.write().await = Some(dc);

        let offer = self.pc.create_offer(None).await.context(RtcSnafu { step: "create offer" })?;
        let sdp = offer.sdp.clone();
        self.pc
            .set_local_description(offer)
            .await
            .context(RtcSnafu { step: "set local offer" })?;
        Ok(sdp)
    }

    async fn accept_offer(&self, sdp: String) -> Result<String, PeerError> {
        let offer = RTCSessionDescription::offer(sdp).context(RtcSnafu { step: "parse offer" })?;
        self.pc
            .set_remote_description(offer)
            .await
            .context(RtcSnafu { step: "set remote offer" })?;
        let answer = self.pc.create_answer(None).await.context(RtcSnafu { step: "create answer" })?;
        let sdp = answer.sdp.clone();
        self.pc
            .set_local_description(answer)
            .await
            .context(RtcSnafu { step: "set local answer" })?;
        Ok(sdp)
    }

    async fn accept_answer(&self, sdp: String) -> Result<(), PeerError> {
        let answer = RTCSessionDescription::answer(sdp).context(RtcSnafu { step: "parse answer" })?;
        self.pc
            .set_remote_description(answer)
            .await
            .context(RtcSnafu { step: "set remote answer" })
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        let init = RTCIceCandidateInit {
            candidate:         candidate.candidate,
            sdp_mid:           candidate.sdp_mid,
            sdp_mline_index:   candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .context(RtcSnafu { step: "add candidate" })
    }

    async fn send_text(&self, text: String) -> Result<(), PeerError> {
        let dc = self.channel().await?;
        dc.send_text(text).await.context(RtcSnafu { step: "send text" })?;
        Ok(())
    }

    async fn send_binary(&self, data: Bytes) -> Result<(), PeerError> {
        let dc = self.channel().await?;
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + MAX_FRAME).min(data.len());
            dc.send(&data.slice(offset..end))
                .await
                .context(RtcSnafu { step: "send binary" })?;
            offset = end;
        }
        Ok(())
    }

    async fn buffered_amount(&self) -> usize {
        match self.channel.read().await.as_ref() {
            Some(dc) => dc.buffered_amount().await,
            None => 0,
        }
    }

    async fn wait_buffered_low(&self, low_water: usize) -> Result<(), PeerError> {
        let dc = self.channel().await?;
        dc.set_buffered_amount_low_threshold(low_water).await;
        loop {
            let notified = self.low.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if dc.buffered_amount().await <= low_water {
                return Ok(());
            }
            let _ = tokio::time::timeout(LOW_WATER_RECHECK, notified).await;
        }
    }

    async fn close(&self) {
        if let Some(dc) = self.channel.write().await.take() {
            if let Err(e) = dc.close().await {
                debug!(error = %e, "data channel close failed");
            }
        }
        if let Err(e) = self.pc.close().await {
            debug!(error = %e, "peer connection close failed");
        }
    }
}
