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

use std::future::Future;

use backon::Retryable;
use bytes::Bytes;
use reqwest::{RequestBuilder, Response, header::HeaderMap};
use serde::{Deserialize, de::DeserializeOwned};
use snafu::{ResultExt, ensure};
use tracing::{debug, warn};

use crate::{
    error::{
        MalformedSnafu, NetworkSnafu, RejectedSnafu, RequestError, StatusSnafu, TimeoutSnafu,
    },
    retry::RetryPolicy,
};

/// Application-level reply carried in upload response bodies.
#[derive(Debug, Deserialize)]
struct Reply {
    code:    i64,
    #[serde(default)]
    message: Option<String>,
}

/// Successful response with its body already read.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub status:  u16,
    pub headers: HeaderMap,
    pub body:    Bytes,
}

/// One logical network call: every attempt gets the policy's deadline, and
/// failures the policy accepts are retried after its backoff delay.
#[derive(Debug, Clone, Copy)]
pub struct ResilientRequest<'a> {
    policy: &'a RetryPolicy,
    label:  &'a str,
}

impl<'a> ResilientRequest<'a> {
    #[must_use]
    pub const fn new(policy: &'a RetryPolicy, label: &'a str) -> Self { Self { policy, label } }

    /// Run `attempt` until it succeeds, fails fatally, or attempts run out.
    /// The error of the last attempt is returned.
    pub async fn run<T, F, Fut>(&self, mut attempt: F) -> Result<T, RequestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let policy = self.policy;
        let label = self.label;
        let deadline = policy.timeout;
        let mut retries = 0u32;

        let guarded = || {
            let fut = attempt();
            async move {
                tokio::time::timeout(deadline, fut).await.map_err(|_| {
                    TimeoutSnafu {
                        label,
                        timeout: deadline,
                    }
                    .build()
                })?
            }
        };

        guarded
            .retry(*policy)
            .when(|e| policy.should_retry(e))
            .notify(|e, delay| {
                retries += 1;
                warn!(
                    label,
                    retry = retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "request failed, retrying"
                );
            })
            .await
    }

    /// Send the request, require a 2xx status and read the whole body.
    pub async fn fetch<B>(&self, build: B) -> Result<Fetched, RequestError>
    where
        B: Fn() -> RequestBuilder,
    {
        let label = self.label;
        self.run(|| {
            let request = build();
            async move {
                let response = send(request, label).await?;
                let status = response.status();
                ensure!(
                    status.is_success(),
                    StatusSnafu {
                        label,
                        status: status.as_u16(),
                    }
                );
                let headers = response.headers().clone();
                let body = response.bytes().await.context(NetworkSnafu { label })?;
                Ok(Fetched {
                    status: status.as_u16(),
                    headers,
                    body,
                })
            }
        })
        .await
    }

    /// Like [`Self::fetch`], decoding the body as JSON. A body that does not
    /// decode counts as "no data" rather than an error.
    pub async fn json<T, B>(&self, build: B) -> Result<Option<T>, RequestError>
    where
        T: DeserializeOwned,
        B: Fn() -> RequestBuilder,
    {
        let fetched = self.fetch(build).await?;
        match serde_json::from_slice(&fetched.body) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                debug!(label = self.label, error = %e, "undecodable body treated as no data");
                Ok(None)
            }
        }
    }

    /// Transfer variant: the body must carry `code == 200`. A different code
    /// is retried only when the HTTP status is itself retryable.
    pub async fn transfer<B>(&self, build: B) -> Result<(), RequestError>
    where
        B: Fn() -> RequestBuilder,
    {
        let label = self.label;
        self.run(|| {
            let request = build();
            async move {
                let response = send(request, label).await?;
                let status = response.status().as_u16();
                let body = response.bytes().await.context(NetworkSnafu { label })?;
                match serde_json::from_slice::<Reply>(&body) {
                    Ok(reply) if reply.code == 200 => Ok(()),
                    Ok(reply) => RejectedSnafu {
                        label,
                        code: reply.code,
                        status,
                        message: reply.message.unwrap_or_default(),
                    }
                    .fail(),
                    Err(_) if !(200..300).contains(&status) => StatusSnafu { label, status }.fail(),
                    Err(e) => MalformedSnafu {
                        label,
                        reason: format!("reply is not JSON: {e}"),
                    }
                    .fail(),
                }
            }
        })
        .await
    }
}

async fn send(request: RequestBuilder, label: &str) -> Result<Response, RequestError> {
    request.send().await.context(NetworkSnafu { label })
}
