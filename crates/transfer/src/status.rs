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

use tracing::{debug, info};

use crate::{
    api::{ApiClient, StatusInfo},
    config::StatusConfig,
    error::{ReceiverAbsentSnafu, TransferError},
    types::AccessCode,
};

/// Bounded polling of `GET /{id}/status`.
#[derive(Debug, Clone)]
pub struct StatusPoller {
    api:    ApiClient,
    config: StatusConfig,
}

impl StatusPoller {
    #[must_use]
    pub const fn new(api: ApiClient, config: StatusConfig) -> Self { Self { api, config } }

    /// Wait until a receiver registered for `code`. The relay refuses
    /// uploads before that.
    pub async fn wait_for_receiver(&self, code: &AccessCode) -> Result<(), TransferError> {
        let found = self
            .poll_until(
                code,
                self.config.receiver_wait_polls,
                self.config.receiver_wait_interval,
                |info| info.is_using,
            )
            .await;
        if found {
            info!(%code, "receiver joined");
            return Ok(());
        }
        let waited = self.config.receiver_wait_interval * u32::try_from(self.config.receiver_wait_polls).unwrap_or(u32::MAX);
        ReceiverAbsentSnafu {
            code:        code.to_string(),
            waited_secs: waited.as_secs(),
        }
        .fail()
    }

    /// Whether the receiver reported completion within the poll budget.
    /// Informational only.
    pub async fn poll_completion(&self, code: &AccessCode) -> bool {
        let done = self
            .poll_until(
                code,
                self.config.done_polls,
                self.config.done_interval,
                |info| info.done,
            )
            .await;
        if done {
            info!(%code, "receiver confirmed completion");
        } else {
            debug!(%code, "receiver did not confirm completion");
        }
        done
    }

    async fn poll_until(
        &self,
        code: &AccessCode,
        polls: usize,
        interval: Duration,
        ready: impl Fn(&StatusInfo) -> bool,
    ) -> bool {
        for poll in 1..=polls {
            match self.api.status(code).await {
                Ok(Some(info)) if ready(&info) => return true,
                Ok(_) => debug!(%code, poll, "status not ready"),
                Err(e) => debug!(%code, poll, error = %e, "status poll failed"),
            }
            if poll < polls {
                tokio::time::sleep(interval).await;
            }
        }
        false
    }
}
