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

use std::sync::Arc;

use tokio::sync::watch;

/// Bytes moved so far out of the expected total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub bytes: u64,
    pub total: u64,
}

impl ProgressSnapshot {
    /// Integer percentage, rounded half up. An empty transfer counts as done.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let bytes = u128::from(self.bytes.min(self.total));
        let total = u128::from(self.total);
        ((bytes * 100 + total / 2) / total) as u8
    }
}

/// Shared byte-progress counter of one transfer.
///
/// Every update is a single synchronous modification, so a read-modify-write
/// never spans an `.await`. Observers follow changes through
/// [`Progress::subscribe`].
#[derive(Debug, Clone)]
pub struct Progress {
    tx: Arc<watch::Sender<ProgressSnapshot>>,
}

impl Default for Progress {
    fn default() -> Self { Self::new(0) }
}

impl Progress {
    #[must_use]
    pub fn new(total: u64) -> Self {
        let (tx, _) = watch::channel(ProgressSnapshot { bytes: 0, total });
        Self { tx: Arc::new(tx) }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> { self.tx.subscribe() }

    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot { *self.tx.borrow() }

    #[must_use]
    pub fn percent(&self) -> u8 { self.snapshot().percent() }

    pub fn set_total(&self, total: u64) { self.tx.send_modify(|s| s.total = total); }

    pub fn advance(&self, bytes: u64) {
        self.tx
            .send_modify(|s| s.bytes = s.bytes.saturating_add(bytes));
    }

    /// Zero the byte counter, keeping the total.
    pub fn reset(&self) { self.tx.send_modify(|s| s.bytes = 0); }
}
