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

//! Typed client for the relay's `/api/fileflow` surface.

use bytes::Bytes;
use reqwest::{
    Client,
    multipart::{Form, Part},
};
use serde::Deserialize;
use serde_json::{Value, json};
use snafu::{OptionExt, ResultExt, ensure};
use tracing::{debug, warn};

use crate::{
    chunk::{ChunkDescriptor, ContentRange, parse_content_range},
    config::TransferConfig,
    error::{
        AccessCodeSnafu, ClientBuildSnafu, MalformedSnafu, RequestError, TransferError,
    },
    peer::IceServer,
    request::ResilientRequest,
    retry::RetryPolicy,
    types::{AccessCode, ReceiverId, Role},
};

const CONTENT_NAME: &str = "content-name";

/// `{code, success, message?, data?}` wrapper used by the JSON endpoints.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    data:    Option<T>,
}

#[derive(Debug, Deserialize)]
struct IssuedCode {
    id: String,
}

/// Relay-side view of a transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StatusInfo {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    /// A receiver has registered for the code.
    #[serde(default)]
    pub is_using:  bool,
    /// The receiver reported it consumed the file.
    #[serde(default)]
    pub done:      bool,
}

/// One downloaded window.
#[derive(Debug, Clone)]
pub struct Window {
    pub name:  String,
    pub range: ContentRange,
    pub bytes: Bytes,
}

/// Messages stored by the relay signaling endpoint since a cursor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignalBatch {
    #[serde(default)]
    pub latest:   u64,
    #[serde(default)]
    pub messages: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    client:  Client,
    base:    String,
    control: RetryPolicy,
    status:  RetryPolicy,
    chunk:   RetryPolicy,
}

impl ApiClient {
    pub fn new(config: &TransferConfig) -> Result<Self, TransferError> {
        let client = Client::builder()
            .user_agent(concat!("fileflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .context(ClientBuildSnafu)?;
        Ok(Self {
            client,
            base: config.api_base(),
            control: config.control_retry,
            status: config.status_retry,
            chunk: config.http.chunk_retry,
        })
    }

    #[must_use]
    pub fn base(&self) -> &str { &self.base }

    /// WebSocket signaling endpoint of a transfer.
    #[must_use]
    pub fn ws_url(&self, code: &AccessCode) -> String {
        let base = self.base.strip_prefix("http").map_or_else(
            || self.base.clone(),
            |rest| format!("ws{rest}"),
        );
        format!("{base}/{code}/ws")
    }

    /// Ask the relay for a fresh access code.
    pub async fn request_access_code(
        &self,
        file_name: &str,
        file_size: u64,
    ) -> Result<AccessCode, TransferError> {
        let url = format!("{}/id", self.base);
        let size = file_size.to_string();
        let envelope: Option<Envelope<IssuedCode>> = ResilientRequest::new(&self.control, "access code")
            .json(|| {
                self.client
                    .get(&url)
                    .query(&[("file_name", file_name), ("file_size", size.as_str())])
            })
            .await?;

        let envelope = envelope.context(AccessCodeSnafu {
            message: "reply is not JSON",
        })?;
        let message = envelope.message.unwrap_or_default();
        let issued = envelope.data.context(AccessCodeSnafu { message })?;
        Ok(AccessCode::from(issued.id))
    }

    /// `None` when the relay does not know the code or the reply is not
    /// understood.
    pub async fn status(&self, code: &AccessCode) -> Result<Option<StatusInfo>, RequestError> {
        let url = format!("{}/{code}/status", self.base);
        let label = format!("status {code}");
        let envelope: Option<Envelope<StatusInfo>> = ResilientRequest::new(&self.status, &label)
            .json(|| self.client.get(&url))
            .await?;
        Ok(envelope.filter(|e| e.success).and_then(|e| e.data))
    }

    /// Tell the relay the receiver consumed the file. Failures are logged and
    /// swallowed; the return value only says whether the notice landed.
    pub async fn mark_done(&self, code: &AccessCode) -> bool {
        let url = format!("{}/{code}/done", self.base);
        let label = format!("done {code}");
        let result = ResilientRequest::new(&self.control, &label)
            .fetch(|| self.client.put(&url).json(&json!({})))
            .await;
        match result {
            Ok(_) => {
                debug!(%code, "completion reported");
                true
            }
            Err(e) => {
                warn!(%code, error = %e, "failed to report completion");
                false
            }
        }
    }

    /// Upload one chunk as `info` + `file` multipart parts.
    pub async fn upload_chunk(
        &self,
        code: &AccessCode,
        file_name: &str,
        chunk: &ChunkDescriptor,
        data: Bytes,
    ) -> Result<(), RequestError> {
        let url = format!("{}/{code}/upload", self.base);
        let label = format!("upload {code}@{}", chunk.start);
        let info = json!({
            "filename": file_name,
            "start": chunk.start,
            "end": chunk.end,
            "total": chunk.total,
        })
        .to_string();

        ResilientRequest::new(&self.chunk, &label)
            .transfer(|| {
                let file = Part::stream_with_length(data.clone(), data.len() as u64)
                    .file_name(file_name.to_string());
                let form = Form::new().text("info", info.clone()).part("file", file);
                self.client.post(&url).multipart(form)
            })
            .await
    }

    /// Fetch the window stored at `start`. The relay hands each window to a
    /// single receiver id and forgets it afterwards.
    pub async fn download_window(
        &self,
        code: &AccessCode,
        rid: &ReceiverId,
        start: u64,
    ) -> Result<Window, RequestError> {
        let url = format!("{}/{code}/file", self.base);
        let label = format!("download {code}@{start}");
        let start_param = start.to_string();
        let fetched = ResilientRequest::new(&self.chunk, &label)
            .fetch(|| {
                self.client
                    .get(&url)
                    .query(&[("rid", rid.as_str()), ("start", start_param.as_str())])
            })
            .await?;

        let range = fetched
            .headers
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_content_range)
            .context(MalformedSnafu {
                label:  &label,
                reason: "missing or malformed Content-Range",
            })?;
        ensure!(
            fetched.body.len() as u64 == range.size(),
            MalformedSnafu {
                label:  &label,
                reason: format!(
                    "body has {} bytes, Content-Range announces {}",
                    fetched.body.len(),
                    range.size()
                ),
            }
        );
        let name = fetched
            .headers
            .get(CONTENT_NAME)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| code.to_string());

        Ok(Window {
            name,
            range,
            bytes: fetched.body,
        })
    }

    /// ICE servers offered by the relay, or `None` when peer assist is not
    /// configured. Lookup failures also disable the peer path.
    pub async fn peer_config(&self) -> Option<Vec<IceServer>> {
        for endpoint in ["webrtc-config", "p2p-config"] {
            let url = format!("{}/{endpoint}", self.base);
            let reply: Result<Option<Value>, _> = ResilientRequest::new(&self.control, endpoint)
                .json(|| self.client.get(&url))
                .await;
            match reply {
                Ok(Some(value)) => {
                    let servers = parse_ice_servers(&value);
                    if !servers.is_empty() {
                        return Some(servers);
                    }
                    debug!(endpoint, "no ICE servers configured");
                }
                Ok(None) => debug!(endpoint, "peer configuration is not JSON"),
                Err(e) => debug!(endpoint, error = %e, "peer configuration unavailable"),
            }
        }
        None
    }

    /// Store a message for the other role on the relay signaling endpoint.
    pub async fn post_signal(
        &self,
        code: &AccessCode,
        role: Role,
        message: &Value,
    ) -> Result<(), RequestError> {
        let url = format!("{}/{code}/signal", self.base);
        let label = format!("signal {code}");
        let body = json!({ "role": role, "message": message });
        ResilientRequest::new(&self.control, &label)
            .fetch(|| self.client.post(&url).json(&body))
            .await
            .map(|_| ())
    }

    /// Messages addressed to `role` after cursor `since`.
    pub async fn poll_signals(
        &self,
        code: &AccessCode,
        role: Role,
        since: u64,
    ) -> Result<Option<SignalBatch>, RequestError> {
        let url = format!("{}/{code}/signal", self.base);
        let label = format!("signal poll {code}");
        let role = role.to_string();
        let since = since.to_string();
        let envelope: Option<Envelope<SignalBatch>> = ResilientRequest::new(&self.control, &label)
            .json(|| {
                self.client
                    .get(&url)
                    .query(&[("role", role.as_str()), ("since", since.as_str())])
            })
            .await?;
        Ok(envelope.filter(|e| e.success).and_then(|e| e.data))
    }
}

/// Accepts `{iceServers: [...]}` or `{data: {iceServers: [...]}}`; `urls`
/// may be a string or an array.
fn parse_ice_servers(value: &Value) -> Vec<IceServer> {
    let list = value
        .get("iceServers")
        .or_else(|| value.get("data").and_then(|data| data.get("iceServers")));
    list.and_then(Value::as_array)
        .map(|servers| servers.iter().filter_map(parse_ice_server).collect())
        .unwrap_or_default()
}

fn parse_ice_server(value: &Value) -> Option<IceServer> {
    let urls: Vec<String> = match value.get("urls")? {
        Value::String(url) => vec![url.clone()],
        Value::Array(urls) => urls
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => return None,
    };
    if urls.is_empty() {
        return None;
    }
    let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
    Some(IceServer {
        urls,
        username: text("username"),
        credential: text("credential"),
    })
}
