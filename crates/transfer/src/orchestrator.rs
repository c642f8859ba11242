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

//! Transport policy: the direct channel first, the relay when it falls
//! through.

use std::sync::Arc;

use fileflow_error::ClassifiedError;
use tracing::{error, info, warn};

use crate::{
    api::ApiClient,
    config::{SignalingKind, TransferConfig},
    error::{PeerError, TransferError},
    http_transport::ChunkTransport,
    peer::{
        IceServer, PeerLinkFactory, PeerSession, RelaySignaling, RtcLinkFactory, SessionOutcome,
        SignalRoute, SignalingConnector, WsSignaling,
    },
    progress::Progress,
    status::StatusPoller,
    types::{
        AccessCode, FallbackReason, OutgoingFile, ReceivedFile, ReceiverId, TransferPath,
        TransferReport, TransferSession, TransferStatus,
    },
};

/// Owns the transfer currently in flight and decides which transport
/// carries it.
pub struct TransferOrchestrator {
    config:    TransferConfig,
    api:       ApiClient,
    transport: ChunkTransport,
    status:    StatusPoller,
    signaling: Arc<dyn SignalingConnector>,
    links:     Arc<dyn PeerLinkFactory>,
    progress:  Progress,
    session:   Option<TransferSession>,
}

impl TransferOrchestrator {
    pub fn new(config: TransferConfig) -> Result<Self, TransferError> {
        let api = ApiClient::new(&config)?;
        let signaling: Arc<dyn SignalingConnector> = match config.signaling {
            SignalingKind::WebSocket => Arc::new(WsSignaling::new(api.clone())),
            SignalingKind::Relay => Arc::new(RelaySignaling::new(
                api.clone(),
                config.peer.relay_poll_interval,
            )),
        };
        Ok(Self {
            transport: ChunkTransport::new(api.clone(), config.http.clone()),
            status: StatusPoller::new(api.clone(), config.status.clone()),
            signaling,
            links: Arc::new(RtcLinkFactory),
            progress: Progress::default(),
            session: None,
            api,
            config,
        })
    }

    /// Replace the signaling transport picked from the configuration.
    #[must_use]
    pub fn with_signaling(mut self, signaling: Arc<dyn SignalingConnector>) -> Self {
        self.signaling = signaling;
        self
    }

    /// Replace the native link factory.
    #[must_use]
    pub fn with_links(mut self, links: Arc<dyn PeerLinkFactory>) -> Self {
        self.links = links;
        self
    }

    #[must_use]
    pub const fn api(&self) -> &ApiClient { &self.api }

    /// Progress of the current transfer; shared, so a clone taken before a
    /// transfer starts keeps following it.
    #[must_use]
    pub fn progress(&self) -> Progress { self.progress.clone() }

    #[must_use]
    pub const fn session(&self) -> Option<&TransferSession> { self.session.as_ref() }

    /// Send `file` under `code`.
    pub async fn send(
        &mut self,
        code: &AccessCode,
        file: &OutgoingFile,
    ) -> Result<TransferReport, TransferError> {
        self.progress.reset();
        self.progress.set_total(file.size());

        let mut fallback = None;
        if let Some(ice) = self.peer_servers().await {
            self.begin(TransferPath::Peer);
            let outcome = self
                .peer_session(SignalRoute::sender(code.clone()), ice)
                .send(file)
                .await;
            match self.settle_peer(outcome) {
                Ok(()) => {
                    return Ok(TransferReport {
                        path:      TransferPath::Peer,
                        bytes:     file.size(),
                        fallback:  None,
                        confirmed: true,
                    });
                }
                Err(reason) => fallback = Some(reason),
            }
        }

        self.begin(TransferPath::Http);
        if let Err(e) = self.upload_through_relay(code, file).await {
            self.fail(&e);
            return Err(e);
        }
        let confirmed = self.status.poll_completion(code).await;
        self.finish(TransferStatus::Success);
        Ok(TransferReport {
            path: TransferPath::Http,
            bytes: file.size(),
            fallback,
            confirmed,
        })
    }

    /// Receive the file published under `code`, identifying as `rid`.
    pub async fn receive(
        &mut self,
        code: &AccessCode,
        rid: &ReceiverId,
    ) -> Result<(ReceivedFile, TransferReport), TransferError> {
        self.progress.reset();
        self.progress.set_total(0);

        let mut fallback = None;
        if let Some(ice) = self.peer_servers().await {
            self.begin(TransferPath::Peer);
            let outcome = self
                .peer_session(SignalRoute::receiver(code.clone(), rid.clone()), ice)
                .receive()
                .await;
            match self.settle_peer(outcome) {
                Ok(file) => return Ok(self.delivered(code, file, TransferPath::Peer, None).await),
                Err(reason) => fallback = Some(reason),
            }
        }

        self.begin(TransferPath::Http);
        let file = match self.transport.download(code, rid, &self.progress).await {
            Ok(file) => file,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };
        self.finish(TransferStatus::Success);
        Ok(self.delivered(code, file, TransferPath::Http, fallback).await)
    }

    async fn peer_servers(&self) -> Option<Vec<IceServer>> {
        if !self.config.peer_enabled {
            info!("peer path disabled, using the relay");
            return None;
        }
        let servers = self.api.peer_config().await;
        if servers.is_none() {
            info!("no peer configuration, using the relay");
        }
        servers
    }

    fn peer_session(&self, route: SignalRoute, ice: Vec<IceServer>) -> PeerSession {
        PeerSession::builder()
            .route(route)
            .ice(ice)
            .config(self.config.peer.clone())
            .signaling(Arc::clone(&self.signaling))
            .links(Arc::clone(&self.links))
            .progress(self.progress.clone())
            .build()
    }

    /// Record how the peer attempt ended. Anything but success becomes a
    /// fallback reason and clears the progress made so far.
    fn settle_peer<T>(
        &mut self,
        outcome: Result<SessionOutcome<T>, PeerError>,
    ) -> Result<T, FallbackReason> {
        let reason = match outcome {
            Ok(SessionOutcome::Success(value)) => {
                self.finish(TransferStatus::Success);
                return Ok(value);
            }
            Ok(SessionOutcome::Fallback(reason)) => reason,
            Err(e) => {
                warn!(class = %e.class(), error = %e, "peer session failed");
                FallbackReason::Error(e.to_string())
            }
        };
        warn!(%reason, "falling back to the relay");
        self.finish(TransferStatus::Fallback(reason.clone()));
        self.progress.reset();
        Err(reason)
    }

    async fn upload_through_relay(
        &self,
        code: &AccessCode,
        file: &OutgoingFile,
    ) -> Result<(), TransferError> {
        self.status.wait_for_receiver(code).await?;
        self.transport.upload(code, file, &self.progress).await
    }

    async fn delivered(
        &self,
        code: &AccessCode,
        file: ReceivedFile,
        path: TransferPath,
        fallback: Option<FallbackReason>,
    ) -> (ReceivedFile, TransferReport) {
        let confirmed = self.api.mark_done(code).await;
        let report = TransferReport {
            path,
            bytes: file.data.len() as u64,
            fallback,
            confirmed,
        };
        (file, report)
    }

    fn begin(&mut self, path: TransferPath) {
        info!(%path, "transfer started");
        self.session = Some(TransferSession::new(path, self.progress.clone()));
    }

    fn finish(&mut self, status: TransferStatus) {
        if let Some(session) = &mut self.session {
            info!(path = %session.path, %status, "transfer settled");
            session.status = status;
        }
    }

    fn fail(&mut self, e: &TransferError) {
        error!(class = %e.class(), error = %e, "transfer failed");
        self.finish(TransferStatus::Error(e.output_msg()));
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        Json, Router,
        routing::{get, put},
    };
    use axum_test::TestServer;
    use serde_json::json;

    use super::*;
    use crate::peer::testing::{MemoryHub, MemoryLinks};

    fn relay() -> TestServer {
        let api = Router::new()
            .route(
                "/webrtc-config",
                get(|| async { Json(json!({"iceServers": [{"urls": "stun:stun.example.org:3478"}]})) }),
            )
            .route("/{id}/done", put(|| async { Json(json!({"code": 200})) }));
        TestServer::builder()
            .http_transport()
            .try_build(Router::new().nest("/api/fileflow", api))
            .expect("failed to create test server")
    }

    fn orchestrator(server: &TestServer, hub: &MemoryHub, links: MemoryLinks) -> TransferOrchestrator {
        let url = server.server_address().expect("server should have HTTP address");
        let config = TransferConfig::builder()
            .server(url.as_str().trim_end_matches('/'))
            .build();
        TransferOrchestrator::new(config)
            .unwrap()
            .with_signaling(Arc::new(hub.clone()))
            .with_links(Arc::new(links))
    }

    #[tokio::test]
    async fn peer_transfer_skips_the_relay() {
        let server = relay();
        let hub = MemoryHub::default();
        let (sender_links, receiver_links) = MemoryLinks::pair();
        let mut sender = orchestrator(&server, &hub, sender_links);
        let mut receiver = orchestrator(&server, &hub, receiver_links);
        let code = AccessCode::from("P2P001");
        let file = OutgoingFile::new("photo.jpg", vec![9u8; 600 * 1024]);

        let receiver_id = ReceiverId::from("rid-1");
        let (sent, received) = tokio::join!(
            sender.send(&code, &file),
            receiver.receive(&code, &receiver_id),
        );

        let sent = sent.unwrap();
        assert_eq!(sent.path, TransferPath::Peer);
        assert!(sent.confirmed);
        assert_eq!(sent.fallback, None);

        let (received, report) = received.unwrap();
        assert_eq!(received.name, "photo.jpg");
        assert_eq!(received.data, file.data);
        assert!(report.confirmed);
        assert_eq!(receiver.progress().percent(), 100);
        assert_eq!(
            receiver.session().map(|s| s.status.clone()),
            Some(TransferStatus::Success)
        );
    }

    #[tokio::test]
    async fn disabled_peer_path_never_touches_signaling() {
        let server = relay();
        let hub = MemoryHub::default();
        let (links, _) = MemoryLinks::pair();
        let config = TransferConfig::builder()
            .server(server.server_address().unwrap().as_str().trim_end_matches('/'))
            .peer_enabled(false)
            .build();
        let orchestrator = TransferOrchestrator::new(config)
            .unwrap()
            .with_signaling(Arc::new(hub.clone()))
            .with_links(Arc::new(links));

        assert!(orchestrator.peer_servers().await.is_none());
        assert!(hub.kinds().is_empty());
    }
}
