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

use fileflow_error::{ClassifiedError, ErrorClass};
use snafu::Snafu;

/// Error returned by a settle callback. Logged, never propagated.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SchedulerError {
    #[snafu(display("{failed} of {total} units failed"))]
    UnitsFailed { failed: usize, total: usize },
}

impl ClassifiedError for SchedulerError {
    fn class(&self) -> ErrorClass { ErrorClass::Aggregate }
}
