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

use std::time::Duration;

use bon::Builder;
use smart_default::SmartDefault;
use strum_macros::{Display, EnumString};

use crate::retry::RetryPolicy;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;

/// Chunked upload/download through the relay.
#[derive(Debug, Clone, SmartDefault)]
pub struct HttpTransferConfig {
    /// Bytes per chunk; the relay refuses blocks above 1 MiB (default: 1 MiB)
    #[default(MIB)]
    pub chunk_size:          u64,
    /// Chunks in flight at once (default: 4)
    #[default = 4]
    pub concurrency:         usize,
    /// Consecutive rounds without any finished chunk before giving up
    /// (default: 5)
    #[default = 5]
    pub max_stalled_rounds:  usize,
    /// Pause between rounds (default: 1s)
    #[default(Duration::from_secs(1))]
    pub round_interval:      Duration,
    /// Attempts to fetch the first window before the sender has uploaded it
    /// (default: 300)
    #[default = 300]
    pub first_window_polls:  usize,
    #[default(RetryPolicy::chunk())]
    pub chunk_retry:         RetryPolicy,
}

/// Direct peer channel.
#[derive(Debug, Clone, SmartDefault)]
pub struct PeerConfig {
    /// Bytes per streamed slice (default: 256 KiB)
    #[default(256 * 1024)]
    pub chunk_size:          usize,
    /// Buffered bytes at or below which the sender enqueues the next slice
    /// (default: 4 MiB)
    #[default(4 * 1024 * 1024)]
    pub low_water_mark:      usize,
    /// Time allowed for the data channel to open (default: 15s)
    #[default(Duration::from_secs(15))]
    pub signaling_timeout:   Duration,
    /// Time the sender waits for the receiver's confirmation after the last
    /// slice (default: 30s)
    #[default(Duration::from_secs(30))]
    pub done_timeout:        Duration,
    /// Poll interval of the relay signaling variant (default: 1s)
    #[default(Duration::from_secs(1))]
    pub relay_poll_interval: Duration,
}

/// Status polling around the HTTP path.
#[derive(Debug, Clone, SmartDefault)]
pub struct StatusConfig {
    /// Polls for the receiver to join before uploading (default: 300)
    #[default = 300]
    pub receiver_wait_polls:    usize,
    #[default(Duration::from_secs(1))]
    pub receiver_wait_interval: Duration,
    /// Polls for the receiver's completion notice (default: 20)
    #[default = 20]
    pub done_polls:             usize,
    #[default(Duration::from_secs(1))]
    pub done_interval:          Duration,
}

/// Transport used to exchange signaling messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SignalingKind {
    /// `{api}/{id}/ws`
    #[default]
    WebSocket,
    /// `POST` / `GET {api}/{id}/signal`
    Relay,
}

/// Configuration of a transfer client.
#[derive(Debug, Clone, SmartDefault, Builder)]
pub struct TransferConfig {
    /// Server origin, e.g. `http://127.0.0.1:8080`
    #[default = "http://127.0.0.1:8080"]
    #[builder(into, default = "http://127.0.0.1:8080".to_string())]
    pub server:         String,

    /// Try the direct peer channel before the relay (default: true)
    #[default = true]
    #[builder(default = true)]
    pub peer_enabled:   bool,

    #[builder(default)]
    pub signaling:      SignalingKind,

    #[builder(default)]
    pub http:           HttpTransferConfig,

    #[builder(default)]
    pub peer:           PeerConfig,

    #[builder(default)]
    pub status:         StatusConfig,

    /// Access codes, done notices, peer configuration and signaling relay
    #[default(RetryPolicy::control())]
    #[builder(default = RetryPolicy::control())]
    pub control_retry:  RetryPolicy,

    #[default(RetryPolicy::status())]
    #[builder(default = RetryPolicy::status())]
    pub status_retry:   RetryPolicy,
}

impl TransferConfig {
    /// Base URL of the fileflow API.
    #[must_use]
    pub fn api_base(&self) -> String {
        format!("{}/api/fileflow", self.server.trim_end_matches('/'))
    }
}
