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

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use common::{FakeRelay, fast_config};
use fileflow_transfer::{
    AccessCode, FallbackReason, OutgoingFile, ReceiverId, SignalingKind, TransferOrchestrator,
    TransferPath, TransferStatus,
    error::PeerError,
    peer::{EventSink, IceCandidate, IceServer, PeerLink, PeerLinkFactory},
};
use serde_json::json;

fn pattern(len: usize) -> Vec<u8> { (0..len).map(|i| (i % 241) as u8).collect() }

/// A link that never gets anywhere; the remote side is expected to stay
/// silent.
struct IdleLinks;

#[async_trait]
impl PeerLinkFactory for IdleLinks {
    async fn open(&self, _ice: &[IceServer], _events: EventSink) -> Result<Arc<dyn PeerLink>, PeerError> {
        Ok(Arc::new(Self))
    }
}

#[async_trait]
impl PeerLink for IdleLinks {
    async fn create_offer(&self) -> Result<String, PeerError> { Ok("offer".into()) }

    async fn accept_offer(&self, _sdp: String) -> Result<String, PeerError> { Ok("answer".into()) }

    async fn accept_answer(&self, _sdp: String) -> Result<(), PeerError> { Ok(()) }

    async fn add_candidate(&self, _candidate: IceCandidate) -> Result<(), PeerError> { Ok(()) }

    async fn send_text(&self, _text: String) -> Result<(), PeerError> { Ok(()) }

    async fn send_binary(&self, _data: Bytes) -> Result<(), PeerError> { Ok(()) }

    async fn buffered_amount(&self) -> usize { 0 }

    async fn wait_buffered_low(&self, _low_water: usize) -> Result<(), PeerError> { Ok(()) }

    async fn close(&self) {}
}

#[tokio::test]
async fn relay_round_trip_without_peer_assist() {
    let relay = FakeRelay::default();
    let server = relay.serve();
    let mut sender = TransferOrchestrator::new(fast_config(&server)).unwrap();
    let mut receiver = TransferOrchestrator::new(fast_config(&server)).unwrap();
    let code = AccessCode::from("ABC123");
    let file = OutgoingFile::new("archive.tar", pattern(2 * 1024 * 1024 + 4096));

    let receiver_id = ReceiverId::from("rid-http");
    let (sent, received) = tokio::join!(
        sender.send(&code, &file),
        receiver.receive(&code, &receiver_id),
    );

    let sent = sent.unwrap();
    assert_eq!(sent.path, TransferPath::Http);
    assert_eq!(sent.fallback, None);
    assert_eq!(sent.bytes, file.size());

    let (received, report) = received.unwrap();
    assert_eq!(received.name, "archive.tar");
    assert_eq!(received.data, file.data);
    assert_eq!(report.path, TransferPath::Http);
    assert!(report.confirmed);
    assert!(relay.state().done);
    assert_eq!(sender.progress().percent(), 100);
    assert_eq!(receiver.progress().percent(), 100);
}

#[tokio::test]
async fn silent_signaling_times_out_into_the_relay() {
    let relay = FakeRelay::default();
    relay.state().ice = Some(json!({"data": {"iceServers": [{"urls": ["stun:stun.example.org:3478"]}]}}));
    let server = relay.serve();

    let mut config = fast_config(&server);
    config.peer_enabled = true;
    config.signaling = SignalingKind::Relay;
    let mut sender = TransferOrchestrator::new(config)
        .unwrap()
        .with_links(Arc::new(IdleLinks));
    let mut receiver = TransferOrchestrator::new(fast_config(&server)).unwrap();
    let code = AccessCode::from("ABC123");
    let file = OutgoingFile::new("notes.md", pattern(70_000));

    let receiver_id = ReceiverId::from("rid-late");
    let (sent, received) = tokio::join!(
        sender.send(&code, &file),
        receiver.receive(&code, &receiver_id),
    );

    let sent = sent.unwrap();
    assert_eq!(sent.path, TransferPath::Http);
    assert_eq!(sent.fallback, Some(FallbackReason::Timeout));
    assert_eq!(received.unwrap().0.data, file.data);

    let session = sender.session().unwrap();
    assert_eq!(session.path, TransferPath::Http);
    assert_eq!(session.status, TransferStatus::Success);

    let kinds: Vec<String> = relay
        .state()
        .signals
        .iter()
        .filter(|(role, _)| role == "sender")
        .filter_map(|(_, message)| message["type"].as_str().map(str::to_string))
        .collect();
    assert_eq!(kinds, ["ready", "fallback_http"]);
}

#[tokio::test]
async fn absent_receiver_is_a_terminal_error() {
    let relay = FakeRelay::default();
    let server = relay.serve();
    let mut config = fast_config(&server);
    config.status.receiver_wait_polls = 3;
    let mut sender = TransferOrchestrator::new(config).unwrap();

    let err = sender
        .send(&AccessCode::from("ABC123"), &OutgoingFile::new("a.bin", vec![1u8; 16]))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("did not join"), "{err}");
    assert!(matches!(
        sender.session().map(|s| &s.status),
        Some(TransferStatus::Error(_))
    ));
    assert!(relay.state().upload_hits.is_empty());
}
