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

//! File framing on the data channel: a `meta` text frame, binary slices,
//! then an `end` text frame.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};
use tracing::{debug, trace};

use super::link::{ChannelMessage, PeerLink};
use crate::{
    error::{EncodeSnafu, MissingMetaSnafu, PeerError, ReassemblySnafu, SizeMismatchSnafu},
    progress::Progress,
    reassembler::Reassembler,
    types::{OutgoingFile, ReceivedFile},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Meta {
        name:       String,
        size:       u64,
        #[serde(rename = "chunkSize")]
        chunk_size: usize,
    },
    End,
}

impl StreamFrame {
    fn encode(&self) -> Result<String, PeerError> {
        serde_json::to_string(self).context(EncodeSnafu {
            what: "stream frame",
        })
    }
}

/// Push `file` through `link`, waiting for the buffered amount to fall to
/// `low_water` before every slice.
pub async fn send_file(
    link: &dyn PeerLink,
    file: &OutgoingFile,
    chunk_size: usize,
    low_water: usize,
    progress: &Progress,
) -> Result<(), PeerError> {
    let chunk_size = chunk_size.max(1);
    let meta = StreamFrame::Meta {
        name: file.name.clone(),
        size: file.size(),
        chunk_size,
    };
    link.send_text(meta.encode()?).await?;

    let len = file.data.len();
    let mut offset = 0;
    while offset < len {
        let end = (offset + chunk_size).min(len);
        link.wait_buffered_low(low_water).await?;
        link.send_binary(file.data.slice(offset..end)).await?;
        progress.advance((end - offset) as u64);
        trace!(offset, end, "slice queued");
        offset = end;
    }

    link.send_text(StreamFrame::End.encode()?).await
}

/// Receiver-side accumulator of one streamed file.
#[derive(Debug, Default)]
pub struct IncomingFile {
    meta:     Option<(String, u64)>,
    slices:   Vec<(u64, Bytes)>,
    received: u64,
}

impl IncomingFile {
    #[must_use]
    pub const fn received(&self) -> u64 { self.received }

    /// Feed one channel message. Returns the file once the `end` frame
    /// arrived or the declared size is reached.
    pub fn accept(
        &mut self,
        message: ChannelMessage,
        progress: &Progress,
    ) -> Result<Option<ReceivedFile>, PeerError> {
        match message {
            ChannelMessage::Binary(bytes) => {
                let len = bytes.len() as u64;
                self.slices.push((self.received, bytes));
                self.received += len;
                progress.advance(len);
            }
            ChannelMessage::Text(text) => match serde_json::from_str::<StreamFrame>(&text) {
                Ok(StreamFrame::Meta { name, size, .. }) => {
                    debug!(%name, size, "stream metadata received");
                    progress.set_total(size);
                    self.meta = Some((name, size));
                }
                Ok(StreamFrame::End) => return self.finish().map(Some),
                Err(e) => {
                    debug!(error = %e, "ignoring unknown text frame");
                    return Ok(None);
                }
            },
        }

        match &self.meta {
            Some((_, size)) if self.received >= *size => self.finish().map(Some),
            _ => Ok(None),
        }
    }

    /// Check metadata and size, then join the slices.
    fn finish(&mut self) -> Result<ReceivedFile, PeerError> {
        let (name, size) = self.meta.take().context(MissingMetaSnafu)?;
        if self.received != size {
            return SizeMismatchSnafu {
                name:     &name,
                expected: size,
                received: self.received,
            }
            .fail()
            .context(ReassemblySnafu);
        }

        let mut assembler = Reassembler::new(name.clone(), size);
        for (start, bytes) in self.slices.drain(..) {
            assembler.insert(start, bytes);
        }
        let data = assembler.finalize().context(ReassemblySnafu)?;
        Ok(ReceivedFile { name, data })
    }
}
