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

use std::{path::PathBuf, time::Duration};

use fileflow_common_scheduler::SchedulerError;
use fileflow_error::{ClassifiedError, ErrorClass};
use snafu::Snafu;

use crate::retry::is_retryable_status;

/// Failure of one logical network call, after retries.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RequestError {
    #[snafu(display("{label} timed out after {}ms", timeout.as_millis()))]
    Timeout { label: String, timeout: Duration },

    #[snafu(display("{label} failed: {source}"))]
    Network {
        label:  String,
        source: reqwest::Error,
    },

    #[snafu(display("{label} returned HTTP {status}"))]
    Status { label: String, status: u16 },

    #[snafu(display("{label} rejected with code {code} (HTTP {status}): {message}"))]
    Rejected {
        label:   String,
        code:    i64,
        status:  u16,
        message: String,
    },

    #[snafu(display("{label} response is malformed: {reason}"))]
    Malformed { label: String, reason: String },
}

impl RequestError {
    /// HTTP status carried by the error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } | Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl ClassifiedError for RequestError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout { .. } => ErrorClass::TransientNetwork,
            Self::Network { source, .. } => {
                if source.is_builder() {
                    ErrorClass::Local
                } else if source.is_decode() {
                    ErrorClass::Protocol
                } else {
                    ErrorClass::TransientNetwork
                }
            }
            // A rejected body code follows the HTTP status it came with.
            Self::Status { status, .. } | Self::Rejected { status, .. } => {
                if is_retryable_status(*status) {
                    ErrorClass::TransientNetwork
                } else {
                    ErrorClass::Protocol
                }
            }
            Self::Malformed { .. } => ErrorClass::Protocol,
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransferError {
    #[snafu(display("{source}"))]
    Request { source: RequestError },

    #[snafu(display("failed to build HTTP client: {source}"))]
    ClientBuild { source: reqwest::Error },

    #[snafu(display("{stage} stalled after {rounds} rounds ({source}), last failure: {last}"))]
    Stalled {
        stage:  &'static str,
        rounds: usize,
        last:   String,
        source: SchedulerError,
    },

    #[snafu(display(
        "transfer of {name} is incomplete: expected data at offset {expected}, found {found}"
    ))]
    Incomplete {
        name:     String,
        expected: u64,
        found:    u64,
    },

    #[snafu(display("transfer of {name} overflows: data reaches {end}, declared size is {total}"))]
    Overflow { name: String, end: u64, total: u64 },

    #[snafu(display("transfer of {name} received {received} bytes, declared size is {expected}"))]
    SizeMismatch {
        name:     String,
        expected: u64,
        received: u64,
    },

    #[snafu(display("window at {start} does not match the transfer: {reason}"))]
    UnexpectedWindow { start: u64, reason: String },

    #[snafu(display("{name} is empty, the relay cannot store zero-byte files"))]
    EmptyFile { name: String },

    #[snafu(display("receiver did not join {code} within {waited_secs}s"))]
    ReceiverAbsent { code: String, waited_secs: u64 },

    #[snafu(display("server refused to issue an access code: {message}"))]
    AccessCode { message: String },

    #[snafu(display("failed to read {}: {source}", path.display()))]
    ReadFile {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to write {}: {source}", path.display()))]
    WriteFile {
        path:   PathBuf,
        source: std::io::Error,
    },
}

impl ClassifiedError for TransferError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Request { source } => source.class(),
            Self::Stalled { .. } => ErrorClass::Aggregate,
            Self::Incomplete { .. } | Self::Overflow { .. } | Self::SizeMismatch { .. } => {
                ErrorClass::Integrity
            }
            Self::UnexpectedWindow { .. } | Self::ReceiverAbsent { .. } | Self::AccessCode { .. } => {
                ErrorClass::Protocol
            }
            Self::ClientBuild { .. }
            | Self::EmptyFile { .. }
            | Self::ReadFile { .. }
            | Self::WriteFile { .. } => ErrorClass::Local,
        }
    }
}

impl TransferError {
    /// Whether scheduling the chunk again cannot help: the relay answered
    /// with data that does not fit the transfer. A bare HTTP status stays
    /// recoverable, the relay answers 404 or 400 while its block cache
    /// catches up.
    #[must_use]
    pub fn ends_rounds(&self) -> bool {
        match self {
            Self::Request { source } => source.status().is_none() && source.class() == ErrorClass::Protocol,
            other => matches!(other.class(), ErrorClass::Protocol | ErrorClass::Integrity),
        }
    }
}

impl From<RequestError> for TransferError {
    fn from(source: RequestError) -> Self { Self::Request { source } }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PeerError {
    #[snafu(display("signaling unavailable: {message}"))]
    Signaling { message: String },

    #[snafu(display("webrtc {step} failed: {source}"))]
    Rtc {
        step:   &'static str,
        source: webrtc::Error,
    },

    #[snafu(display("data channel {message}"))]
    Channel { message: String },

    #[snafu(display("failed to encode {what}: {source}"))]
    Encode {
        what:   &'static str,
        source: serde_json::Error,
    },

    #[snafu(display("stream ended before file metadata arrived"))]
    MissingMeta,

    #[snafu(display("received stream is corrupt: {source}"))]
    Reassembly { source: TransferError },
}

impl ClassifiedError for PeerError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Signaling { .. } | Self::Rtc { .. } | Self::Channel { .. } => {
                ErrorClass::PeerTransport
            }
            Self::Encode { .. } => ErrorClass::Local,
            Self::MissingMeta => ErrorClass::Protocol,
            Self::Reassembly { source } => source.class(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16) -> RequestError {
        RequestError::Status {
            label: "status".to_string(),
            status,
        }
    }

    #[test]
    fn status_classification() {
        for code in [408, 425, 429, 500, 503, 599] {
            assert!(status(code).is_retryable(), "{code} should be retried");
        }
        for code in [400, 401, 403, 404] {
            assert!(!status(code).is_retryable(), "{code} should not be retried");
            assert_eq!(status(code).class(), ErrorClass::Protocol);
        }
    }

    #[test]
    fn rejected_body_code_follows_http_status() {
        let rejected = |status| RequestError::Rejected {
            label: "upload".to_string(),
            code: 400,
            status,
            message: "too many blocks".to_string(),
        };
        assert!(rejected(503).is_retryable());
        assert!(!rejected(200).is_retryable());
    }

    #[test]
    fn integrity_errors_are_fatal() {
        let err = TransferError::Incomplete {
            name:     "report.pdf".to_string(),
            expected: 1024,
            found:    2048,
        };
        assert_eq!(err.class(), ErrorClass::Integrity);
        assert!(err.to_string().contains("report.pdf"));
        assert!(
            err.output_msg()
                .starts_with("received data is incomplete: transfer of report.pdf")
        );
    }

    #[test]
    fn only_unfit_answers_end_resume_rounds() {
        let malformed = TransferError::from(RequestError::Malformed {
            label:  "download".to_string(),
            reason: "missing or malformed Content-Range".to_string(),
        });
        let window = TransferError::UnexpectedWindow {
            start:  1000,
            reason: "requested offset 2000".to_string(),
        };
        assert!(malformed.ends_rounds());
        assert!(window.ends_rounds());

        for code in [400, 404, 503] {
            assert!(!TransferError::from(status(code)).ends_rounds(), "{code} may clear up");
        }
        let timeout = TransferError::from(RequestError::Timeout {
            label:   "download".to_string(),
            timeout: Duration::from_secs(1),
        });
        assert!(!timeout.ends_rounds());
    }
}
