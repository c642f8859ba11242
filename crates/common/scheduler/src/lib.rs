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

//! Bounded scheduling of independent asynchronous units.
//!
//! [`BoundedScheduler`] keeps at most `limit` units in flight and starts the
//! next pending unit as soon as one settles. A failing unit never cancels its
//! siblings: every unit runs to completion and the [`ScheduleOutcome`]
//! reports the aggregate afterwards.
//!
//! ```rust,no_run
//! use fileflow_common_scheduler::BoundedScheduler;
//!
//! # async fn demo() {
//! let units = (0..8u64).map(|i| async move { Ok::<_, std::io::Error>(i * 2) });
//! let outcome = BoundedScheduler::new(4).run_all(units).await;
//! assert_eq!(outcome.completed, 8);
//! let doubled = outcome.into_result().unwrap();
//! # }
//! ```

mod error;
mod scheduler;

pub use error::{CallbackError, SchedulerError};
pub use scheduler::{BoundedScheduler, ScheduleOutcome};
