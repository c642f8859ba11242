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

use async_trait::async_trait;
use snafu::ResultExt;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::{
    event::{EventSink, SessionEvent},
    signal::SignalMessage,
    signaling::{SignalRoute, SignalSink, SignalingConnector},
};
use crate::{
    api::ApiClient,
    error::{EncodeSnafu, PeerError, SignalingSnafu},
    types::{AccessCode, Role},
};

/// Signaling through `POST`/`GET {api}/{id}/signal`, polled.
#[derive(Debug, Clone)]
pub struct RelaySignaling {
    api:           ApiClient,
    poll_interval: Duration,
}

impl RelaySignaling {
    #[must_use]
    pub const fn new(api: ApiClient, poll_interval: Duration) -> Self { Self { api, poll_interval } }
}

#[async_trait]
impl SignalingConnector for RelaySignaling {
    async fn connect(&self, route: &SignalRoute, events: EventSink) -> Result<Box<dyn SignalSink>, PeerError> {
        let api = self.api.clone();
        let code = route.code.clone();
        let role = route.role;
        let interval = self.poll_interval;

        let poller = tokio::spawn(async move {
            let mut since = 0;
            loop {
                match api.poll_signals(&code, role, since).await {
                    Ok(Some(batch)) => {
                        since = since.max(batch.latest);
                        for message in batch.messages.into_iter().filter_map(SignalMessage::from_value) {
                            if events.send(SessionEvent::Signal(message)).is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => debug!(%code, "no signal batch"),
                    Err(e) => {
                        warn!(%code, error = %e, "signal polling failed, closing channel");
                        let _ = events.send(SessionEvent::SignalClosed);
                        return;
                    }
                }
                tokio::time::sleep(interval).await;
            }
        });

        Ok(Box::new(RelaySink {
            api: self.api.clone(),
            code: route.code.clone(),
            role,
            poller: poller.abort_handle(),
        }))
    }
}

struct RelaySink {
    api:    ApiClient,
    code:   AccessCode,
    role:   Role,
    poller: AbortHandle,
}

#[async_trait]
impl SignalSink for RelaySink {
    async fn send(&self, message: &SignalMessage) -> Result<(), PeerError> {
        let value = serde_json::to_value(message).context(EncodeSnafu {
            what: "signal message",
        })?;
        self.api
            .post_signal(&self.code, self.role, &value)
            .await
            .map_err(|e| SignalingSnafu { message: e.to_string() }.build())
    }

    async fn close(&self) { self.poller.abort(); }
}
