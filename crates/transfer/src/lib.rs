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

//! File transfer between two clients that share an access code.
//!
//! A transfer first tries a direct peer channel ([`peer::PeerSession`]) and
//! falls back to the relay's chunked, resumable HTTP path
//! ([`ChunkTransport`]) when that channel cannot be established or breaks.
//! [`TransferOrchestrator`] applies that policy and reports progress.
//!
//! ```rust,no_run
//! use fileflow_transfer::{AccessCode, OutgoingFile, TransferConfig, TransferOrchestrator};
//!
//! # async fn demo() -> Result<(), fileflow_transfer::error::TransferError> {
//! let config = TransferConfig::builder().server("http://127.0.0.1:8080").build();
//! let mut orchestrator = TransferOrchestrator::new(config)?;
//! let file = OutgoingFile::new("notes.txt", b"hello".to_vec());
//! let report = orchestrator.send(&AccessCode::from("A1B2C3"), &file).await?;
//! println!("sent {} bytes over {}", report.bytes, report.path);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod chunk;
pub mod config;
pub mod error;
mod http_transport;
mod orchestrator;
pub mod peer;
mod progress;
mod reassembler;
mod request;
pub mod retry;
mod status;
mod types;

pub use api::ApiClient;
pub use config::{HttpTransferConfig, PeerConfig, SignalingKind, StatusConfig, TransferConfig};
pub use http_transport::ChunkTransport;
pub use orchestrator::TransferOrchestrator;
pub use progress::{Progress, ProgressSnapshot};
pub use reassembler::Reassembler;
pub use request::{Fetched, ResilientRequest};
pub use retry::RetryPolicy;
pub use status::StatusPoller;
pub use types::{
    AccessCode, FallbackReason, OutgoingFile, ReceivedFile, ReceiverId, Role, TransferPath,
    TransferReport, TransferSession, TransferStatus,
};
