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

//! Failure taxonomy shared by the fileflow crates.
//!
//! Low-level components report typed errors; each of them maps onto one
//! [`ErrorClass`]. The retry layer only looks at [`ErrorClass::is_retryable`],
//! and the orchestrator uses the class to decide whether another transport
//! can recover the transfer and to build the reason shown to the user.

use std::error::Error as StdError;

use serde::Serialize;
use strum::EnumProperty;

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    strum_macros::Display,
    strum_macros::EnumProperty,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorClass {
    /// Timeouts, connection resets, 5xx/408/425/429.
    #[strum(props(retryable = "true", summary = "network temporarily unavailable"))]
    TransientNetwork,
    /// Malformed headers, missing metadata, application failure codes and
    /// non-retryable HTTP statuses.
    #[strum(props(retryable = "false", summary = "unexpected response from server"))]
    Protocol,
    /// Byte-range gaps or overlaps, size mismatches.
    #[strum(props(retryable = "false", summary = "received data is incomplete"))]
    Integrity,
    /// ICE, connection, data channel or signaling failures.
    #[strum(props(retryable = "false", summary = "direct connection failed"))]
    PeerTransport,
    /// Several units of one schedule failed.
    #[strum(props(retryable = "false", summary = "some chunks failed to transfer"))]
    Aggregate,
    /// Local file system or configuration problems.
    #[strum(props(retryable = "false", summary = "local failure"))]
    Local,
}

impl ErrorClass {
    #[must_use]
    pub fn is_retryable(self) -> bool {
        self.get_str("retryable")
            .and_then(|value| value.parse::<bool>().ok())
            .unwrap_or(false)
    }

    #[must_use]
    pub fn summary(self) -> &'static str { self.get_str("summary").unwrap_or("unknown failure") }
}

/// An error that knows which [`ErrorClass`] it belongs to.
pub trait ClassifiedError: StdError {
    fn class(&self) -> ErrorClass;

    fn is_retryable(&self) -> bool { self.class().is_retryable() }

    /// Human readable reason: the class summary followed by the innermost
    /// cause of the source chain, unless the message already ends with it.
    fn output_msg(&self) -> String
    where
        Self: Sized,
    {
        let summary = self.class().summary();
        let message = self.to_string();
        match self.root_cause().map(ToString::to_string) {
            Some(root) if !message.ends_with(&root) => format!("{summary}: {message}: {root}"),
            _ => format!("{summary}: {message}"),
        }
    }

    fn root_cause(&self) -> Option<&(dyn StdError + 'static)>
    where
        Self: Sized,
    {
        let mut source = self.source()?;
        while let Some(next) = source.source() {
            source = next;
        }
        Some(source)
    }
}

#[cfg(test)]
mod tests {
    use std::{fmt, str::FromStr};

    use super::*;

    #[derive(Debug)]
    struct Leaf;

    impl fmt::Display for Leaf {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("connection reset") }
    }

    impl StdError for Leaf {}

    #[derive(Debug)]
    struct Wrapper(Leaf);

    impl fmt::Display for Wrapper {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("chunk 3 failed") }
    }

    impl StdError for Wrapper {
        fn source(&self) -> Option<&(dyn StdError + 'static)> { Some(&self.0) }
    }

    impl ClassifiedError for Wrapper {
        fn class(&self) -> ErrorClass { ErrorClass::TransientNetwork }
    }

    #[test]
    fn only_transient_network_is_retryable() {
        assert!(ErrorClass::TransientNetwork.is_retryable());
        for class in [
            ErrorClass::Protocol,
            ErrorClass::Integrity,
            ErrorClass::PeerTransport,
            ErrorClass::Aggregate,
            ErrorClass::Local,
        ] {
            assert!(!class.is_retryable(), "{class} must not be retried");
        }
    }

    #[test]
    fn class_names_are_snake_case() {
        assert_eq!(ErrorClass::PeerTransport.to_string(), "peer_transport");
        assert_eq!(
            ErrorClass::from_str("transient_network").unwrap(),
            ErrorClass::TransientNetwork
        );
    }

    #[test]
    fn output_msg_includes_root_cause() {
        let err = Wrapper(Leaf);
        assert_eq!(
            err.output_msg(),
            "network temporarily unavailable: chunk 3 failed: connection reset"
        );
        assert!(err.is_retryable());
    }

    #[derive(Debug)]
    struct Inline(Leaf);

    impl fmt::Display for Inline {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "upload failed: {}", self.0) }
    }

    impl StdError for Inline {
        fn source(&self) -> Option<&(dyn StdError + 'static)> { Some(&self.0) }
    }

    impl ClassifiedError for Inline {
        fn class(&self) -> ErrorClass { ErrorClass::TransientNetwork }
    }

    #[test]
    fn output_msg_does_not_repeat_an_inline_cause() {
        assert_eq!(
            Inline(Leaf).output_msg(),
            "network temporarily unavailable: upload failed: connection reset"
        );
    }
}
