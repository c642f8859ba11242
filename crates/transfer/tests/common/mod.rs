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

//! In-process stand-in for the relay's `/api/fileflow` surface.

#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use axum_test::TestServer;
use fileflow_transfer::{HttpTransferConfig, PeerConfig, RetryPolicy, StatusConfig, TransferConfig};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Default)]
pub struct Relay {
    pub name:         Option<String>,
    pub total:        u64,
    pub blocks:       BTreeMap<u64, Bytes>,
    pub receiver:     Option<String>,
    pub done:         bool,
    /// Upload requests seen per chunk start.
    pub upload_hits:  HashMap<u64, usize>,
    /// Chunk starts whose first upload answers 503.
    pub flaky_starts: HashSet<u64>,
    /// Window starts served with an unparsable `Content-Range`.
    pub broken_ranges: HashSet<u64>,
    /// Window requests seen per start.
    pub file_hits:    HashMap<u64, usize>,
    pub ice:          Option<Value>,
    pub signals:      Vec<(String, Value)>,
}

#[derive(Clone, Default)]
pub struct FakeRelay {
    state: Arc<Mutex<Relay>>,
}

impl FakeRelay {
    pub fn state(&self) -> MutexGuard<'_, Relay> { self.state.lock().unwrap() }

    /// Pre-load a stored file as if a sender had uploaded it in `window`
    /// sized blocks.
    pub fn preload(&self, name: &str, data: &[u8], window: usize) {
        let mut relay = self.state();
        relay.name = Some(name.to_string());
        relay.total = data.len() as u64;
        for (i, block) in data.chunks(window).enumerate() {
            relay
                .blocks
                .insert((i * window) as u64, Bytes::copy_from_slice(block));
        }
    }

    pub fn serve(&self) -> TestServer {
        fileflow_common_telemetry::init_default_ut_logging();
        let api = Router::new()
            .route("/id", get(issue_code))
            .route("/webrtc-config", get(peer_config))
            .route("/p2p-config", get(peer_config))
            .route("/{id}/status", get(status))
            .route("/{id}/upload", post(upload))
            .route("/{id}/file", get(file))
            .route("/{id}/done", put(done))
            .route("/{id}/signal", post(post_signal).get(poll_signals));
        let app = Router::new()
            .nest("/api/fileflow", api)
            .with_state(self.clone());

        TestServer::builder()
            .http_transport()
            .try_build(app)
            .expect("failed to create test server")
    }
}

pub fn server_url(server: &TestServer) -> String {
    server
        .server_address()
        .expect("server should have HTTP address")
        .to_string()
        .trim_end_matches('/')
        .to_string()
}

/// Short intervals and quick retries so scenarios finish in well under a
/// second of wall time.
pub fn fast_config(server: &TestServer) -> TransferConfig {
    let quick = |attempts| {
        RetryPolicy::builder()
            .max_attempts(attempts)
            .base_delay(Duration::from_millis(10))
            .max_delay(Duration::from_millis(40))
            .jitter(Duration::from_millis(5))
            .timeout(Duration::from_secs(5))
            .build()
    };
    TransferConfig::builder()
        .server(server_url(server))
        .peer_enabled(false)
        .http(HttpTransferConfig {
            round_interval: Duration::from_millis(20),
            chunk_retry: quick(4),
            ..HttpTransferConfig::default()
        })
        .peer(PeerConfig {
            signaling_timeout: Duration::from_millis(300),
            relay_poll_interval: Duration::from_millis(20),
            ..PeerConfig::default()
        })
        .status(StatusConfig {
            receiver_wait_interval: Duration::from_millis(20),
            done_interval: Duration::from_millis(20),
            ..StatusConfig::default()
        })
        .control_retry(quick(3))
        .status_retry(quick(2))
        .build()
}

async fn issue_code() -> Json<Value> { Json(json!({"code": 200, "success": true, "data": {"id": "ABC123"}})) }

async fn peer_config(State(relay): State<FakeRelay>) -> Response {
    match relay.state().ice.clone() {
        Some(ice) => Json(ice).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn status(State(relay): State<FakeRelay>) -> Json<Value> {
    let relay = relay.state();
    Json(json!({
        "success": true,
        "data": {
            "is_using": relay.receiver.is_some(),
            "done": relay.done,
            "file_name": relay.name,
            "file_size": relay.total,
        }
    }))
}

#[derive(Deserialize)]
struct UploadInfo {
    filename: String,
    start:    u64,
    end:      u64,
    total:    u64,
}

async fn upload(State(relay): State<FakeRelay>, mut multipart: Multipart) -> Response {
    let mut info = None;
    let mut data = None;
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "info" => info = Some(serde_json::from_str::<UploadInfo>(&field.text().await.unwrap()).unwrap()),
            "file" => data = Some(field.bytes().await.unwrap()),
            _ => {}
        }
    }
    let (Some(info), Some(data)) = (info, data) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"code": 400, "message": "missing part"}))).into_response();
    };

    let mut relay = relay.state();
    let hits = relay.upload_hits.entry(info.start).or_default();
    *hits += 1;
    if *hits == 1 && relay.flaky_starts.contains(&info.start) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"code": 503, "message": "busy"})),
        )
            .into_response();
    }
    assert_eq!(data.len() as u64, info.end - info.start + 1, "slice does not match info");
    relay.name = Some(info.filename);
    relay.total = info.total;
    relay.blocks.insert(info.start, data);
    Json(json!({"code": 200})).into_response()
}

#[derive(Deserialize)]
struct FileQuery {
    rid:   String,
    start: u64,
}

async fn file(State(relay): State<FakeRelay>, Query(query): Query<FileQuery>) -> Response {
    let mut relay = relay.state();
    if query.start == 0 && relay.receiver.is_none() {
        relay.receiver = Some(query.rid.clone());
    }
    *relay.file_hits.entry(query.start).or_default() += 1;
    let Some(block) = relay.blocks.get(&query.start).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let end = query.start + block.len() as u64 - 1;
    let range = if relay.broken_ranges.contains(&query.start) {
        "bytes ?-?/?".to_string()
    } else {
        format!("bytes {}-{end}/{}", query.start, relay.total)
    };
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_RANGE, HeaderValue::from_str(&range).unwrap());
    if let Some(name) = &relay.name {
        headers.insert("content-name", HeaderValue::from_str(name).unwrap());
    }
    (StatusCode::PARTIAL_CONTENT, headers, block).into_response()
}

async fn done(State(relay): State<FakeRelay>, Path(_id): Path<String>) -> Json<Value> {
    relay.state().done = true;
    Json(json!({"code": 200, "success": true}))
}

#[derive(Deserialize)]
struct SignalPost {
    role:    String,
    message: Value,
}

async fn post_signal(State(relay): State<FakeRelay>, Json(body): Json<SignalPost>) -> Json<Value> {
    relay.state().signals.push((body.role, body.message));
    Json(json!({"success": true}))
}

#[derive(Deserialize)]
struct SignalQuery {
    role:  String,
    since: usize,
}

/// Messages posted by the other role, numbered from 1.
async fn poll_signals(State(relay): State<FakeRelay>, Query(query): Query<SignalQuery>) -> Json<Value> {
    let relay = relay.state();
    let messages: Vec<Value> = relay
        .signals
        .iter()
        .enumerate()
        .skip(query.since)
        .filter(|(_, (role, _))| *role != query.role)
        .map(|(_, (_, message))| message.clone())
        .collect();
    Json(json!({
        "success": true,
        "data": {"latest": relay.signals.len(), "messages": messages}
    }))
}
