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

use std::fmt::Display;
use std::fmt::Formatter;

use serde::Serialize;

use crate::package::PackageError;
use crate::package::proto::Message;

/// Name of the optional entry describing the package version.
pub const META_ENTRY: &str = "meta";

/// Name of the media index entry.
pub const MEDIA_ENTRY: &str = "media";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FormatVariant {
    /// `collection.anki2`, schema 11, JSON models.
    Legacy1,
    /// `collection.anki21`, schema 11 with newer scheduler data.
    Legacy2,
    /// `collection.anki21b`, zstd-compressed, schema 18 tables.
    Latest,
}

impl FormatVariant {
    /// Probe order: newest first, since newer exporters also ship a stub
    /// `collection.anki2` telling old clients to upgrade.
    pub const PROBE_ORDER: [FormatVariant; 3] = [
        FormatVariant::Latest,
        FormatVariant::Legacy2,
        FormatVariant::Legacy1,
    ];

    pub fn database_name(self) -> &'static str {
        match self {
            FormatVariant::Legacy1 => "collection.anki2",
            FormatVariant::Legacy2 => "collection.anki21",
            FormatVariant::Latest => "collection.anki21b",
        }
    }

    pub fn media_encoding(self) -> MediaEncoding {
        match self {
            FormatVariant::Legacy1 | FormatVariant::Legacy2 => MediaEncoding::Json,
            FormatVariant::Latest => MediaEncoding::Protobuf,
        }
    }

    /// Whether the database and media blobs are zstd-compressed.
    pub fn is_compressed(self) -> bool {
        matches!(self, FormatVariant::Latest)
    }

    fn from_meta_version(version: u64) -> Option<Self> {
        match version {
            1 => Some(FormatVariant::Legacy1),
            2 => Some(FormatVariant::Legacy2),
            3 => Some(FormatVariant::Latest),
            _ => None,
        }
    }
}

impl Display for FormatVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.database_name())
    }
}

/// How the media index is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MediaEncoding {
    /// JSON object mapping archive names ("0", "1", ...) to filenames.
    Json,
    /// zstd-compressed protobuf list; an entry's position is its archive name.
    Protobuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageMetadata {
    pub variant: FormatVariant,
    pub database_name: &'static str,
    pub supported: bool,
    pub media_encoding: MediaEncoding,
}

impl PackageMetadata {
    fn for_variant(variant: FormatVariant) -> Self {
        Self {
            variant,
            database_name: variant.database_name(),
            supported: true,
            media_encoding: variant.media_encoding(),
        }
    }
}

/// Decide which variant a package is.
///
/// `meta` is the contents of the `meta` entry, if the archive has one, and
/// `has_entry` tells whether the archive contains a given file.
pub fn detect(
    meta: Option<&[u8]>,
    has_entry: impl Fn(&str) -> bool,
) -> Result<PackageMetadata, PackageError> {
    if let Some(meta) = meta {
        let msg = Message::parse(meta)
            .map_err(|e| PackageError::UnsupportedFormat(format!("meta entry: {e}")))?;
        let version = msg.uint(1).unwrap_or(0);
        let variant = FormatVariant::from_meta_version(version).ok_or_else(|| {
            PackageError::UnsupportedFormat(format!("unknown package version {version}"))
        })?;
        if !has_entry(variant.database_name()) {
            return Err(PackageError::MissingDatabase);
        }
        return Ok(PackageMetadata::for_variant(variant));
    }
    FormatVariant::PROBE_ORDER
        .into_iter()
        .find(|variant| has_entry(variant.database_name()))
        .map(PackageMetadata::for_variant)
        .ok_or(PackageError::MissingDatabase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::proto::MessageWriter;

    #[test]
    fn test_probes_newest_first() -> Result<(), PackageError> {
        let names = ["collection.anki2", "collection.anki21b", "media"];
        let meta = detect(None, |n| names.contains(&n))?;
        assert_eq!(meta.variant, FormatVariant::Latest);
        assert_eq!(meta.media_encoding, MediaEncoding::Protobuf);
        Ok(())
    }

    #[test]
    fn test_legacy_only() -> Result<(), PackageError> {
        let names = ["collection.anki2", "media", "0"];
        let meta = detect(None, |n| names.contains(&n))?;
        assert_eq!(meta.variant, FormatVariant::Legacy1);
        assert_eq!(meta.database_name, "collection.anki2");
        assert!(meta.supported);
        Ok(())
    }

    #[test]
    fn test_meta_entry_wins() -> Result<(), PackageError> {
        let names = ["collection.anki21", "collection.anki21b"];
        let meta_bytes = MessageWriter::new().uint(1, 2).finish();
        let meta = detect(Some(&meta_bytes), |n| names.contains(&n))?;
        assert_eq!(meta.variant, FormatVariant::Legacy2);
        Ok(())
    }

    #[test]
    fn test_unknown_meta_version() {
        let meta_bytes = MessageWriter::new().uint(1, 9).finish();
        let result = detect(Some(&meta_bytes), |_| true);
        assert!(matches!(result, Err(PackageError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_missing_database() {
        let result = detect(None, |n| n == "media");
        assert_eq!(result, Err(PackageError::MissingDatabase));
        let meta_bytes = MessageWriter::new().uint(1, 3).finish();
        let result = detect(Some(&meta_bytes), |n| n == "collection.anki2");
        assert_eq!(result, Err(PackageError::MissingDatabase));
    }
}
