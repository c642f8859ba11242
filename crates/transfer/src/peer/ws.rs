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

use std::fmt::Write as _;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::AbortHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info};

use super::{
    event::{EventSink, SessionEvent},
    signal::SignalMessage,
    signaling::{SignalRoute, SignalSink, SignalingConnector},
};
use crate::{
    api::ApiClient,
    error::{PeerError, SignalingSnafu},
};

/// Signaling over the relay's WebSocket room `{api}/{id}/ws?role=&rid=`.
#[derive(Debug, Clone)]
pub struct WsSignaling {
    api: ApiClient,
}

impl WsSignaling {
    #[must_use]
    pub const fn new(api: ApiClient) -> Self { Self { api } }

    fn url(&self, route: &SignalRoute) -> String {
        let mut url = format!("{}?role={}", self.api.ws_url(&route.code), route.role);
        if let Some(rid) = &route.rid {
            let _ = write!(url, "&rid={rid}");
        }
        url
    }
}

#[async_trait]
impl SignalingConnector for WsSignaling {
    async fn connect(&self, route: &SignalRoute, events: EventSink) -> Result<Box<dyn SignalSink>, PeerError> {
        let url = self.url(route);
        let (stream, _) = connect_async(url.as_str()).await.map_err(|e| {
            SignalingSnafu {
                message: format!("cannot connect to {url}: {e}"),
            }
            .build()
        })?;
        info!(code = %route.code, role = %route.role, "signaling connected");

        let (mut write, mut read) = stream.split();
        let (outbound, mut queue) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = write.send(message).await {
                    debug!(error = %e, "signaling write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let Some(message) = SignalMessage::decode(&text) else {
                            continue;
                        };
                        if events.send(SessionEvent::Signal(message)).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "signaling closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "signaling read failed");
                        break;
                    }
                }
            }
            let _ = events.send(SessionEvent::SignalClosed);
        });

        Ok(Box::new(WsSink {
            outbound,
            reader: reader.abort_handle(),
        }))
    }
}

struct WsSink {
    outbound: mpsc::UnboundedSender<Message>,
    reader:   AbortHandle,
}

#[async_trait]
impl SignalSink for WsSink {
    async fn send(&self, message: &SignalMessage) -> Result<(), PeerError> {
        let text = message.encode()?;
        self.outbound.send(Message::Text(text)).map_err(|_| {
            SignalingSnafu {
                message: "socket is closed",
            }
            .build()
        })
    }

    async fn close(&self) {
        self.reader.abort();
        let _ = self.outbound.send(Message::Close(None));
    }
}
