// Copyright 2025 Fernando Borretti
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::BTreeMap;

use crate::package::PackageError;
use crate::package::proto::Message;

/// Where a media file lives inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSlot {
    /// Numeric entry name inside the zip ("0", "1", ...).
    pub archive_name: String,
    /// Uncompressed size, when the index records it.
    pub size: Option<u64>,
}

/// Maps original media filenames to archive entries. Decoding the index never
/// touches the file bytes themselves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaIndex {
    entries: BTreeMap<String, MediaSlot>,
}

impl MediaIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Legacy index: a JSON object like `{"0": "cat.jpg", "1": "meow.mp3"}`.
    pub fn from_json(bytes: &[u8]) -> Result<Self, PackageError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::empty());
        }
        let raw: BTreeMap<String, String> = serde_json::from_slice(bytes)
            .map_err(|e| PackageError::CorruptArchive(format!("media index: {e}")))?;
        let entries = raw
            .into_iter()
            .map(|(archive_name, name)| {
                (
                    name,
                    MediaSlot {
                        archive_name,
                        size: None,
                    },
                )
            })
            .collect();
        Ok(Self { entries })
    }

    /// Newer index: `MediaEntries { repeated MediaEntry entries = 1; }` with
    /// `MediaEntry { name = 1; size = 2; sha1 = 3; legacy_zip_filename = 255 }`.
    /// Expects already-decompressed bytes.
    pub fn from_protobuf(bytes: &[u8]) -> Result<Self, PackageError> {
        let corrupt = |e: crate::package::proto::ProtoError| {
            PackageError::CorruptArchive(format!("media index: {e}"))
        };
        let list = Message::parse(bytes).map_err(corrupt)?;
        let mut entries = BTreeMap::new();
        for (position, raw) in list.repeated_bytes(1).into_iter().enumerate() {
            let entry = Message::parse(raw).map_err(corrupt)?;
            let Some(name) = entry.string(1).map_err(corrupt)? else {
                continue;
            };
            let archive_name = entry
                .uint(255)
                .map(|n| n.to_string())
                .unwrap_or_else(|| position.to_string());
            entries.insert(
                name,
                MediaSlot {
                    archive_name,
                    size: entry.uint(2),
                },
            );
        }
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&MediaSlot> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
