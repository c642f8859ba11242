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

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static CONTENT_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"bytes\s+(\d+)-(\d+)\/(\d+)").expect("content-range pattern is valid")
});

/// One contiguous byte range of a transfer, `end` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub start: u64,
    pub end:   u64,
    pub total: u64,
    pub index: usize,
}

impl ChunkDescriptor {
    #[must_use]
    pub const fn size(&self) -> u64 { self.end - self.start + 1 }

    /// Byte range of this chunk inside an in-memory copy of the file.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn as_range(&self) -> std::ops::Range<usize> {
        self.start as usize..(self.end + 1) as usize
    }
}

/// Split `[0, total)` into consecutive chunks of `chunk_size` bytes; the
/// last one may be shorter. Empty input gives no chunks.
#[must_use]
pub fn partition(total: u64, chunk_size: u64) -> Vec<ChunkDescriptor> {
    let chunk_size = chunk_size.max(1);
    (0..total.div_ceil(chunk_size))
        .zip(0usize..)
        .map(|(n, index)| {
            let start = n * chunk_size;
            ChunkDescriptor {
                start,
                end: (start + chunk_size).min(total) - 1,
                total,
                index,
            }
        })
        .collect()
}

/// Parsed `Content-Range: bytes start-end/total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end:   u64,
    pub total: u64,
}

impl ContentRange {
    #[must_use]
    pub const fn size(&self) -> u64 { self.end - self.start + 1 }
}

/// Returns `None` unless the header matches and `start <= end < total`.
#[must_use]
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let caps = CONTENT_RANGE.captures(value)?;
    let number = |i: usize| caps.get(i)?.as_str().parse::<u64>().ok();
    let range = ContentRange {
        start: number(1)?,
        end:   number(2)?,
        total: number(3)?,
    };
    (range.start <= range.end && range.end < range.total).then_some(range)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_tiles(total: u64, chunk_size: u64) {
        let chunks = partition(total, chunk_size);
        let mut expected = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.start, expected, "gap or overlap at chunk {i}");
            assert!(chunk.start <= chunk.end && chunk.end < total);
            assert!(chunk.size() <= chunk_size);
            assert_eq!(chunk.total, total);
            expected = chunk.end + 1;
        }
        assert_eq!(expected, total, "chunks of {chunk_size} must cover {total}");
    }

    #[test]
    fn partition_tiles_without_gaps() {
        for total in [1, 2, 7, 1023, 1024, 1025, 3 * 1024 * 1024, 3 * 1024 * 1024 + 17] {
            for chunk_size in [1, 3, 512, 1024, 1024 * 1024] {
                assert_tiles(total, chunk_size);
            }
        }
    }

    #[test]
    fn partition_counts() {
        assert!(partition(0, 1024).is_empty());
        assert_eq!(partition(3 * 1024 * 1024, 1024 * 1024).len(), 3);
        let last = *partition(2500, 1024).last().unwrap();
        assert_eq!((last.start, last.end, last.size()), (2048, 2499, 452));
    }

    #[test]
    fn content_range_is_parsed() {
        assert_eq!(
            parse_content_range("bytes 0-1048575/3145728"),
            Some(ContentRange {
                start: 0,
                end:   1_048_575,
                total: 3_145_728,
            })
        );
        assert_eq!(
            parse_content_range("bytes   10-19/20").map(|r| r.size()),
            Some(10)
        );
    }

    #[test]
    fn malformed_content_range_is_rejected() {
        for value in [
            "",
            "bytes",
            "bytes 0-10",
            "bytes=0-10/20",
            "bytes */20",
            "bytes 10-5/20",
            "bytes 0-20/20",
            "items 0-1/2",
        ] {
            assert_eq!(parse_content_range(value), None, "{value:?}");
        }
    }
}
