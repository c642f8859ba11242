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

use std::{
    future::Future,
    sync::atomic::{AtomicUsize, Ordering},
};

use futures::{StreamExt, stream::FuturesUnordered};
use tracing::{debug, warn};

use crate::error::{CallbackError, SchedulerError, UnitsFailedSnafu};

/// Settled-unit counters, updated as each unit reaches a terminal state.
#[derive(Debug, Default)]
struct Tally {
    completed: AtomicUsize,
    failed:    AtomicUsize,
}

impl Tally {
    fn record(&self, ok: bool) {
        let counter = if ok { &self.completed } else { &self.failed };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn completed(&self) -> usize { self.completed.load(Ordering::Relaxed) }

    fn failed(&self) -> usize { self.failed.load(Ordering::Relaxed) }
}

/// Aggregate over every unit of one [`BoundedScheduler::run`] call.
///
/// `results` is indexed by submission position, not by completion order.
#[derive(Debug)]
pub struct ScheduleOutcome<T, E> {
    pub total:     usize,
    pub completed: usize,
    pub failed:    usize,
    pub results:   Vec<Result<T, E>>,
}

impl<T, E> ScheduleOutcome<T, E> {
    #[must_use]
    pub const fn is_success(&self) -> bool { self.failed == 0 }

    /// Submission positions of the units that failed, ascending.
    pub fn failed_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(idx, result)| result.is_err().then_some(idx))
    }

    /// Collapse into the unit values, or a single aggregate error counting
    /// the failures.
    pub fn into_result(self) -> Result<Vec<T>, SchedulerError> {
        snafu::ensure!(
            self.failed == 0,
            UnitsFailedSnafu {
                failed: self.failed,
                total:  self.total,
            }
        );
        Ok(self.results.into_iter().filter_map(Result::ok).collect())
    }
}

/// Runs units with a fixed concurrency ceiling on the calling task.
#[derive(Debug, Clone, Copy)]
pub struct BoundedScheduler {
    limit: usize,
}

impl BoundedScheduler {
    /// A limit of zero is treated as one.
    #[must_use]
    pub fn new(limit: usize) -> Self { Self { limit: limit.max(1) } }

    #[must_use]
    pub const fn limit(&self) -> usize { self.limit }

    pub async fn run_all<I, F, T, E>(&self, units: I) -> ScheduleOutcome<T, E>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, E>>,
    {
        self.run(units, |_, _| Ok(())).await
    }

    /// Drive every unit to completion with at most `limit` in flight.
    ///
    /// `on_settled` is called once per unit, failed ones included, right
    /// after it settles. An error returned by the callback is logged and
    /// otherwise ignored.
    pub async fn run<I, F, T, E, C>(&self, units: I, mut on_settled: C) -> ScheduleOutcome<T, E>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, E>>,
        C: FnMut(usize, &Result<T, E>) -> Result<(), CallbackError>,
    {
        let units: Vec<F> = units.into_iter().collect();
        let total = units.len();
        let tally = Tally::default();
        let mut slots: Vec<Option<Result<T, E>>> = std::iter::repeat_with(|| None)
            .take(total)
            .collect();

        let mut pending = units.into_iter().enumerate();
        let mut in_flight = FuturesUnordered::new();
        for (idx, unit) in pending.by_ref().take(self.limit) {
            in_flight.push(tagged(idx, unit));
        }

        while let Some((idx, result)) = in_flight.next().await {
            tally.record(result.is_ok());
            if let Err(e) = on_settled(idx, &result) {
                warn!(unit = idx, error = %e, "settle callback failed");
            }
            slots[idx] = Some(result);

            if let Some((next_idx, unit)) = pending.next() {
                in_flight.push(tagged(next_idx, unit));
            }
        }

        let completed = tally.completed();
        let failed = tally.failed();
        debug!(total, completed, failed, limit = self.limit, "schedule settled");

        ScheduleOutcome {
            total,
            completed,
            failed,
            results: slots.into_iter().flatten().collect(),
        }
    }
}

async fn tagged<F, T, E>(idx: usize, unit: F) -> (usize, Result<T, E>)
where
    F: Future<Output = Result<T, E>>,
{
    (idx, unit.await)
}
