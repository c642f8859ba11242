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

//! Chunked transfer through the relay.
//!
//! Chunks that still fail after their own retries are scheduled again in a
//! later round. The relay keeps only a bounded number of blocks, so uploads
//! of large files are expected to need several rounds while the receiver
//! drains the cache.

use std::future::Future;

use fileflow_common_scheduler::{BoundedScheduler, CallbackError};
use fileflow_error::ClassifiedError;
use snafu::{ResultExt, ensure};
use tracing::{debug, info, warn};

use crate::{
    api::{ApiClient, Window},
    chunk::{ChunkDescriptor, partition},
    config::HttpTransferConfig,
    error::{
        EmptyFileSnafu, SizeMismatchSnafu, StalledSnafu, TransferError, UnexpectedWindowSnafu,
    },
    progress::Progress,
    reassembler::Reassembler,
    types::{AccessCode, OutgoingFile, ReceivedFile, ReceiverId},
};

#[derive(Debug, Clone)]
pub struct ChunkTransport {
    api:    ApiClient,
    config: HttpTransferConfig,
}

impl ChunkTransport {
    #[must_use]
    pub const fn new(api: ApiClient, config: HttpTransferConfig) -> Self { Self { api, config } }

    /// Upload every chunk of `file`; `progress` advances as chunks land.
    pub async fn upload(
        &self,
        code: &AccessCode,
        file: &OutgoingFile,
        progress: &Progress,
    ) -> Result<(), TransferError> {
        ensure!(!file.data.is_empty(), EmptyFileSnafu { name: &file.name });

        let chunks = partition(file.size(), self.config.chunk_size);
        info!(%code, name = %file.name, size = file.size(), chunks = chunks.len(), "uploading through relay");
        progress.set_total(file.size());

        self.drive_rounds(
            "upload",
            chunks,
            |chunk| {
                let data = file.data.slice(chunk.as_range());
                async move {
                    self.api
                        .upload_chunk(code, &file.name, &chunk, data)
                        .await
                        .map_err(TransferError::from)
                }
            },
            |chunk, _| {
                progress.advance(chunk.size());
                Ok(())
            },
        )
        .await
    }

    /// Download all windows of the transfer and join them.
    pub async fn download(
        &self,
        code: &AccessCode,
        rid: &ReceiverId,
        progress: &Progress,
    ) -> Result<ReceivedFile, TransferError> {
        let first = self.first_window(code, rid).await?;
        ensure!(
            first.range.start == 0,
            UnexpectedWindowSnafu {
                start:  first.range.start,
                reason: "first window must start at offset 0",
            }
        );

        let total = first.range.total;
        let window_size = first.range.size();
        info!(%code, name = %first.name, total, "downloading through relay");
        progress.set_total(total);
        progress.advance(window_size);

        let mut assembler = Reassembler::new(first.name, total);
        assembler.insert(0, first.bytes);

        let rest: Vec<ChunkDescriptor> = partition(total, window_size).into_iter().skip(1).collect();
        self.drive_rounds(
            "download",
            rest,
            |chunk| async move {
                let window = self.api.download_window(code, rid, chunk.start).await?;
                check_window(&chunk, &window)?;
                Ok(window)
            },
            |chunk, window| {
                progress.advance(window.range.size());
                assembler.insert(chunk.start, window.bytes.clone());
                Ok(())
            },
        )
        .await?;

        ensure!(
            assembler.received() == total,
            SizeMismatchSnafu {
                name:     assembler.name(),
                expected: total,
                received: assembler.received(),
            }
        );
        let name = assembler.name().to_string();
        let data = assembler.finalize()?;
        Ok(ReceivedFile { name, data })
    }

    /// The relay answers 404 until the sender stored the first block, so the
    /// first window is polled.
    async fn first_window(&self, code: &AccessCode, rid: &ReceiverId) -> Result<Window, TransferError> {
        let mut polls = 0;
        loop {
            polls += 1;
            match self.api.download_window(code, rid, 0).await {
                Ok(window) => return Ok(window),
                Err(e)
                    if polls < self.config.first_window_polls
                        && (e.status() == Some(404) || e.is_retryable()) =>
                {
                    debug!(%code, polls, error = %e, "first window not available yet");
                    tokio::time::sleep(self.config.round_interval).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Run `unit` over `pending` in rounds until every chunk succeeded or
    /// `max_stalled_rounds` consecutive rounds finished nothing. A failure
    /// another round cannot change ends the run at once.
    async fn drive_rounds<T, U, Fut, S>(
        &self,
        stage: &'static str,
        mut pending: Vec<ChunkDescriptor>,
        unit: U,
        mut on_success: S,
    ) -> Result<(), TransferError>
    where
        U: Fn(ChunkDescriptor) -> Fut,
        Fut: Future<Output = Result<T, TransferError>>,
        S: FnMut(&ChunkDescriptor, &T) -> Result<(), CallbackError>,
    {
        let scheduler = BoundedScheduler::new(self.config.concurrency);
        let mut round = 0usize;
        let mut stalled = 0;

        while !pending.is_empty() {
            round += 1;
            let mut outcome = scheduler
                .run(pending.iter().map(|chunk| unit(*chunk)), |idx, result| match result {
                    Ok(value) => on_success(&pending[idx], value),
                    Err(e) => {
                        debug!(stage, start = pending[idx].start, error = %e, "chunk failed");
                        Ok(())
                    }
                })
                .await;

            if let Some(idx) = outcome
                .results
                .iter()
                .position(|result| result.as_ref().is_err_and(TransferError::ends_rounds))
            {
                if let Err(e) = outcome.results.swap_remove(idx) {
                    warn!(stage, round, start = pending[idx].start, error = %e, "chunk cannot be recovered");
                    return Err(e);
                }
            }

            let failed: Vec<ChunkDescriptor> = outcome.failed_indices().map(|idx| pending[idx]).collect();
            let last = outcome
                .results
                .iter()
                .rev()
                .find_map(|result| result.as_ref().err())
                .map(ToString::to_string)
                .unwrap_or_default();
            let completed = outcome.completed;
            let Err(source) = outcome.into_result() else {
                debug!(stage, round, "all chunks settled");
                return Ok(());
            };

            stalled = if completed == 0 { stalled + 1 } else { 0 };
            if stalled >= self.config.max_stalled_rounds {
                return Err(source).context(StalledSnafu {
                    stage,
                    rounds: round,
                    last,
                });
            }

            warn!(stage, round, completed, failed = failed.len(), last = %last, "chunks left for the next round");
            tokio::time::sleep(self.config.round_interval).await;
            pending = failed;
        }
        Ok(())
    }
}

/// A window must cover exactly the requested chunk of the same file.
fn check_window(chunk: &ChunkDescriptor, window: &Window) -> Result<(), TransferError> {
    ensure!(
        window.range.start == chunk.start,
        UnexpectedWindowSnafu {
            start:  window.range.start,
            reason: format!("requested offset {}", chunk.start),
        }
    );
    ensure!(
        window.range.end == chunk.end,
        UnexpectedWindowSnafu {
            start:  window.range.start,
            reason: format!("ends at {}, expected {}", window.range.end, chunk.end),
        }
    );
    ensure!(
        window.range.total == chunk.total,
        UnexpectedWindowSnafu {
            start:  window.range.start,
            reason: format!("total {} differs from {}", window.range.total, chunk.total),
        }
    );
    Ok(())
}
