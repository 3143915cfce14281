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

//! Package parsing: variant detection, the media index, and normalization of
//! every schema variant into one in-memory shape.
//!
//! Everything version-specific stays behind [`Package::from_bytes`]; the rest
//! of the pipeline only sees [`Model`], [`Deck`], [`Note`] and [`CardRow`].

pub mod latest;
pub mod legacy;
pub mod media_index;
pub mod meta;
pub mod proto;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;
use std::io::Cursor;
use std::io::Read;
use std::path::Path;

use zip::ZipArchive;
use zip::result::ZipError;

use crate::db::Database;
use crate::db::DbError;
use crate::error::Fallible;
use crate::package::media_index::MediaIndex;
use crate::package::meta::MEDIA_ENTRY;
use crate::package::meta::META_ENTRY;
use crate::package::meta::MediaEncoding;
use crate::package::meta::PackageMetadata;
use crate::types::model::CardRow;
use crate::types::model::Deck;
use crate::types::model::DeckId;
use crate::types::model::Model;
use crate::types::model::ModelId;
use crate::types::model::Note;
use crate::types::model::NoteId;
use crate::types::timestamp::Timestamp;

/// Fatal parse-stage failures. Any of these aborts the whole import.
#[derive(Debug, Clone, PartialEq)]
pub enum PackageError {
    /// The file is not a readable zip archive, or an entry cannot be read.
    CorruptArchive(String),
    /// No collection database under any known name.
    MissingDatabase,
    /// The database or its metadata matches no known schema variant.
    UnsupportedFormat(String),
}

impl Display for PackageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageError::CorruptArchive(reason) => write!(f, "corrupt archive: {reason}"),
            PackageError::MissingDatabase => {
                write!(f, "package does not contain a collection database")
            }
            PackageError::UnsupportedFormat(reason) => write!(f, "unsupported format: {reason}"),
        }
    }
}

impl Error for PackageError {}

impl From<DbError> for PackageError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::UnsupportedFormat { reason } => PackageError::UnsupportedFormat(reason),
        }
    }
}

/// Lazy access to media bytes by original filename.
pub trait MediaSource {
    /// Returns `None` when the package has no file with that name.
    fn fetch(&self, name: &str) -> Fallible<Option<Vec<u8>>>;

    fn contains(&self, name: &str) -> bool;
}

/// A parsed package. Built once per import session.
pub struct Package {
    metadata: PackageMetadata,
    models: Vec<Model>,
    decks: Vec<Deck>,
    notes: Vec<Note>,
    cards: Vec<CardRow>,
    /// Deck of each note's lowest-ordinal card.
    note_decks: BTreeMap<NoteId, (u32, DeckId)>,
    media: MediaIndex,
    /// Media is read on demand while the rest of the package is borrowed.
    archive: RefCell<ZipArchive<Cursor<Vec<u8>>>>,
}

impl Package {
    pub fn open(path: &Path) -> Result<Self, PackageError> {
        let bytes = std::fs::read(path).map_err(|e| {
            PackageError::CorruptArchive(format!("cannot read '{}': {e}", path.display()))
        })?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, PackageError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| PackageError::CorruptArchive(e.to_string()))?;
        let names: HashSet<String> = archive.file_names().map(str::to_string).collect();

        let meta_bytes = match names.contains(META_ENTRY) {
            true => read_entry(&mut archive, META_ENTRY)?,
            false => None,
        };
        let metadata = meta::detect(meta_bytes.as_deref(), |name| names.contains(name))?;
        log::debug!("Detected package variant {}", metadata.variant);

        let raw = read_entry(&mut archive, metadata.database_name)?
            .ok_or(PackageError::MissingDatabase)?;
        let db_bytes = match metadata.variant.is_compressed() {
            true => decompress(&raw, metadata.database_name)?,
            false => raw,
        };
        let db = Database::open(&db_bytes)?;
        let (models, decks) = if latest::has_table_schema(&db)? {
            (latest::read_models(&db)?, latest::read_decks(&db)?)
        } else {
            legacy::read_models_and_decks(&db)?
        };
        let notes = read_notes(&db)?;
        let cards = read_cards(&db)?;
        db.close()?;

        let media = match read_entry(&mut archive, MEDIA_ENTRY)? {
            None => MediaIndex::empty(),
            Some(bytes) => match metadata.media_encoding {
                MediaEncoding::Json => MediaIndex::from_json(&bytes)?,
                MediaEncoding::Protobuf => {
                    MediaIndex::from_protobuf(&decompress(&bytes, MEDIA_ENTRY)?)?
                }
            },
        };

        let mut note_decks: BTreeMap<NoteId, (u32, DeckId)> = BTreeMap::new();
        for card in &cards {
            let entry = note_decks
                .entry(card.note_id)
                .or_insert((card.ordinal, card.deck_id));
            if card.ordinal < entry.0 {
                *entry = (card.ordinal, card.deck_id);
            }
        }

        log::info!(
            "Parsed {} package: {} note types, {} decks, {} notes, {} cards, {} media files",
            metadata.variant,
            models.len(),
            decks.len(),
            notes.len(),
            cards.len(),
            media.len()
        );
        Ok(Self {
            metadata,
            models,
            decks,
            notes,
            cards,
            note_decks,
            media,
            archive: RefCell::new(archive),
        })
    }

    pub fn metadata(&self) -> &PackageMetadata {
        &self.metadata
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn model(&self, id: ModelId) -> Option<&Model> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn decks(&self) -> &[Deck] {
        &self.decks
    }

    pub fn deck(&self, id: DeckId) -> Option<&Deck> {
        self.decks.iter().find(|d| d.id == id)
    }

    /// The deck holding the note's first card, if the note has cards and the
    /// deck exists.
    pub fn deck_for_note(&self, note_id: NoteId) -> Option<&Deck> {
        let (_, deck_id) = self.note_decks.get(&note_id)?;
        self.deck(*deck_id)
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn cards(&self) -> &[CardRow] {
        &self.cards
    }

    pub fn media_index(&self) -> &MediaIndex {
        &self.media
    }
}

impl MediaSource for Package {
    fn fetch(&self, name: &str) -> Fallible<Option<Vec<u8>>> {
        let Some(slot) = self.media.get(name) else {
            return Ok(None);
        };
        let entry = read_entry(&mut self.archive.borrow_mut(), &slot.archive_name)?;
        let Some(bytes) = entry else {
            return Ok(None);
        };
        if self.metadata.variant.is_compressed() {
            Ok(Some(decompress(&bytes, name)?))
        } else {
            Ok(Some(bytes))
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.media.contains(name)
    }
}

fn read_entry(
    archive: &mut ZipArchive<Cursor<Vec<u8>>>,
    name: &str,
) -> Result<Option<Vec<u8>>, PackageError> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(PackageError::CorruptArchive(format!("{name}: {e}"))),
    };
    let mut bytes = Vec::with_capacity(size_hint(file.size()));
    file.read_to_end(&mut bytes)
        .map_err(|e| PackageError::CorruptArchive(format!("{name}: {e}")))?;
    Ok(Some(bytes))
}

/// Entries declare their uncompressed size in the archive header, which a
/// crafted package can set to anything. Only trust it up to a point.
const MAX_SIZE_HINT: u64 = 64 * 1024 * 1024;

fn size_hint(declared: u64) -> usize {
    usize::try_from(declared.min(MAX_SIZE_HINT)).unwrap_or(0)
}

fn decompress(bytes: &[u8], name: &str) -> Result<Vec<u8>, PackageError> {
    zstd::decode_all(bytes)
        .map_err(|e| PackageError::CorruptArchive(format!("{name}: cannot decompress: {e}")))
}

fn read_notes(db: &Database) -> Result<Vec<Note>, PackageError> {
    db.query("SELECT id, guid, mid, mod, tags, flds FROM notes ORDER BY id")?
        .into_iter()
        .map(|row| {
            Ok(Note {
                id: row.int(0)?,
                guid: row.text(1)?,
                model_id: row.int(2)?,
                modified: Timestamp::from_epoch_secs(row.int(3)?),
                tags: row.text(4)?,
                fields: row.text(5)?,
            })
        })
        .collect()
}

fn read_cards(db: &Database) -> Result<Vec<CardRow>, PackageError> {
    db.query("SELECT id, nid, did, ord FROM cards ORDER BY id")?
        .into_iter()
        .map(|row| {
            Ok(CardRow {
                id: row.int(0)?,
                note_id: row.int(1)?,
                deck_id: row.int(2)?,
                ordinal: u32::try_from(row.int(3)?).map_err(|_| {
                    PackageError::UnsupportedFormat("negative card ordinal".to_string())
                })?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::FixtureModel;
    use crate::fixtures::FixtureNote;
    use crate::fixtures::PackageBuilder;
    use crate::package::meta::FormatVariant;
    use crate::types::model::ModelKind;

    fn sample(variant: FormatVariant) -> PackageBuilder {
        PackageBuilder::new(variant)
            .deck(1, "Default", "")
            .deck(20, "Geo::Capitals", "Capital cities")
            .model(FixtureModel::basic(100))
            .model(FixtureModel::cloze(200))
            .note(FixtureNote::new(1, 100, &["France", "Paris"]).deck(20).tags("geo"))
            .note(FixtureNote::new(2, 100, &["Spain", "<b>Madrid</b>"]).deck(20))
            .note(FixtureNote::new(3, 200, &["{{c1::Rome}} is in {{c2::Italy}}", ""]).cards(2))
            .media("cat.jpg", b"meow")
    }

    fn check_counts(variant: FormatVariant) -> Fallible<()> {
        let package = Package::from_bytes(sample(variant).build()?)?;
        assert_eq!(package.metadata().variant, variant);
        assert_eq!(package.notes().len(), 3);
        assert_eq!(package.cards().len(), 4);
        assert_eq!(package.models().len(), 2);
        assert_eq!(package.decks().len(), 2);
        assert_eq!(package.media_index().len(), 1);
        Ok(())
    }

    #[test]
    fn test_counts_legacy1() -> Fallible<()> {
        check_counts(FormatVariant::Legacy1)
    }

    #[test]
    fn test_counts_legacy2() -> Fallible<()> {
        check_counts(FormatVariant::Legacy2)
    }

    #[test]
    fn test_counts_latest() -> Fallible<()> {
        check_counts(FormatVariant::Latest)
    }

    #[test]
    fn test_variants_normalize_identically() -> Fallible<()> {
        let legacy = Package::from_bytes(sample(FormatVariant::Legacy1).build()?)?;
        let latest = Package::from_bytes(sample(FormatVariant::Latest).build()?)?;
        assert_eq!(legacy.models(), latest.models());
        assert_eq!(legacy.decks(), latest.decks());
        assert_eq!(legacy.notes(), latest.notes());
        assert_eq!(legacy.cards(), latest.cards());
        Ok(())
    }

    #[test]
    fn test_models_and_notes() -> Fallible<()> {
        let package = Package::from_bytes(sample(FormatVariant::Latest).build()?)?;
        let cloze = package.model(200).unwrap();
        assert_eq!(cloze.kind, ModelKind::Cloze);
        assert_eq!(cloze.field_names().collect::<Vec<_>>(), vec!["Text", "Extra"]);
        let note = &package.notes()[1];
        assert_eq!(note.field_values(), vec!["Spain", "<b>Madrid</b>"]);
        assert_eq!(package.deck_for_note(1).map(|d| d.name.as_str()), Some("Geo::Capitals"));
        assert_eq!(package.deck_for_note(3).map(|d| d.name.as_str()), Some("Default"));
        assert_eq!(package.deck(20).unwrap().description, "Capital cities");
        Ok(())
    }

    #[test]
    fn test_fetch_media() -> Fallible<()> {
        for variant in FormatVariant::PROBE_ORDER {
            let package = Package::from_bytes(sample(variant).build()?)?;
            assert!(package.contains("cat.jpg"));
            assert_eq!(package.fetch("cat.jpg")?, Some(b"meow".to_vec()));
            assert_eq!(package.fetch("dog.jpg")?, None);
        }
        Ok(())
    }

    #[test]
    fn test_declared_size_is_only_a_hint() {
        assert_eq!(size_hint(0), 0);
        assert_eq!(size_hint(4096), 4096);
        assert_eq!(size_hint(u64::MAX), MAX_SIZE_HINT as usize);
    }

    #[test]
    fn test_corrupt_archive() {
        let result = Package::from_bytes(b"PK\x03\x04 garbage".to_vec());
        assert!(matches!(result, Err(PackageError::CorruptArchive(_))));
    }

    #[test]
    fn test_missing_database() -> Fallible<()> {
        let bytes = PackageBuilder::new(FormatVariant::Legacy1)
            .without_database()
            .build()?;
        let result = Package::from_bytes(bytes);
        assert_eq!(result.err(), Some(PackageError::MissingDatabase));
        Ok(())
    }

    #[test]
    fn test_unsupported_database() -> Fallible<()> {
        let bytes = PackageBuilder::new(FormatVariant::Legacy1)
            .raw_database(b"this is not a database".to_vec())
            .build()?;
        let result = Package::from_bytes(bytes);
        assert!(matches!(result, Err(PackageError::UnsupportedFormat(_))));
        Ok(())
    }
}
