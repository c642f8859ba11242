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

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use snafu::ensure;

use crate::error::{IncompleteSnafu, OverflowSnafu, TransferError};

/// Collects byte ranges that may arrive in any order and joins them once
/// the transfer is over.
///
/// Ranges are keyed by their start offset; contiguity is only checked in
/// [`Reassembler::finalize`].
#[derive(Debug)]
pub struct Reassembler {
    name:     String,
    total:    u64,
    ranges:   BTreeMap<u64, Bytes>,
    received: u64,
}

impl Reassembler {
    pub fn new(name: impl Into<String>, total: u64) -> Self {
        Self {
            name: name.into(),
            total,
            ranges: BTreeMap::new(),
            received: 0,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    #[must_use]
    pub const fn total(&self) -> u64 { self.total }

    #[must_use]
    pub const fn received(&self) -> u64 { self.received }

    #[must_use]
    pub const fn is_complete(&self) -> bool { self.received >= self.total }

    /// Store a range. A second range with the same start replaces the first.
    pub fn insert(&mut self, start: u64, bytes: Bytes) {
        let len = bytes.len() as u64;
        if let Some(previous) = self.ranges.insert(start, bytes) {
            self.received -= previous.len() as u64;
        }
        self.received += len;
    }

    /// Verify the ranges tile `[0, n)` and copy them into one buffer of the
    /// declared size.
    pub fn finalize(self) -> Result<Bytes, TransferError> {
        let capacity = usize::try_from(self.total).unwrap_or(usize::MAX);
        let mut buffer = BytesMut::with_capacity(capacity);
        let mut expected = 0u64;
        for (start, bytes) in self.ranges {
            ensure!(
                start == expected,
                IncompleteSnafu {
                    name: &self.name,
                    expected,
                    found: start,
                }
            );
            expected += bytes.len() as u64;
            ensure!(
                expected <= self.total,
                OverflowSnafu {
                    name:  &self.name,
                    end:   expected,
                    total: self.total,
                }
            );
            buffer.extend_from_slice(&bytes);
        }
        buffer.resize(capacity, 0);
        Ok(buffer.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(len: usize, byte: u8) -> Bytes { Bytes::from(vec![byte; len]) }

    #[test]
    fn out_of_order_ranges_are_joined_in_offset_order() {
        let mut asm = Reassembler::new("photo.jpg", 3584);
        asm.insert(2048, filled(512, 3));
        asm.insert(0, filled(1024, 1));
        asm.insert(1024, filled(1024, 2));
        assert_eq!(asm.received(), 2560);

        let out = asm.finalize().unwrap();
        assert_eq!(out.len(), 3584);
        assert!(out[..1024].iter().all(|&b| b == 1));
        assert!(out[1024..2048].iter().all(|&b| b == 2));
        assert!(out[2048..2560].iter().all(|&b| b == 3));
        assert!(out[2560..].iter().all(|&b| b == 0));
    }

    #[test]
    fn gap_is_an_incomplete_transfer() {
        let mut asm = Reassembler::new("photo.jpg", 3584);
        asm.insert(0, filled(1024, 1));
        asm.insert(2048, filled(512, 3));

        let err = asm.finalize().unwrap_err();
        assert!(matches!(
            err,
            TransferError::Incomplete {
                expected: 1024,
                found: 2048,
                ..
            }
        ));
        assert!(err.to_string().contains("photo.jpg"));
    }

    #[test]
    fn overlap_is_an_incomplete_transfer() {
        let mut asm = Reassembler::new("a.bin", 2048);
        asm.insert(0, filled(1024, 1));
        asm.insert(512, filled(1024, 2));
        assert!(matches!(
            asm.finalize(),
            Err(TransferError::Incomplete {
                expected: 1024,
                found: 512,
                ..
            })
        ));
    }

    #[test]
    fn data_past_declared_size_is_rejected() {
        let mut asm = Reassembler::new("a.bin", 1000);
        asm.insert(0, filled(1024, 1));
        assert!(matches!(
            asm.finalize(),
            Err(TransferError::Overflow { end: 1024, total: 1000, .. })
        ));
    }

    #[test]
    fn duplicate_start_replaces_previous_range() {
        let mut asm = Reassembler::new("a.bin", 4);
        asm.insert(0, filled(2, 9));
        asm.insert(0, filled(4, 7));
        assert!(asm.is_complete());
        assert_eq!(asm.finalize().unwrap(), filled(4, 7));
    }

    #[test]
    fn empty_file() {
        let asm = Reassembler::new("empty.txt", 0);
        assert!(asm.is_complete());
        assert!(asm.finalize().unwrap().is_empty());
    }
}
