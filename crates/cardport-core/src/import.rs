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


//! The import pipeline: parse a package, resolve field sides, convert every
//! field, store referenced media, build cards and hand them to the deck
//! store.

use std::collections::HashMap;
use std::fmt::Display;
use std::fmt::Formatter;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;

use crate::builder::BuildResult;
use crate::builder::CardBuilder;
use crate::builder::DeckError;
use crate::builder::DeckRecord;
use crate::builder::DeckStore;
use crate::builder::reconcile_fields;
use crate::builder::resolve_deck;
use crate::convert::ConversionConfig;
use crate::convert::convert;
use crate::media::processor::MediaError;
use crate::media::processor::MediaProcessor;
use crate::media::store::MediaStore;
use crate::package::Package;
use crate::package::meta::FormatVariant;
use crate::sides::SideCache;
use crate::types::card::CardId;
use crate::types::model::Note;
use crate::types::model::NoteId;

/// Name of the deck notes land in when the package does not place them.
pub const DEFAULT_DECK: &str = "Default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub package_path: PathBuf,
    pub conversion: ConversionConfig,
    /// Leave notes whose card is already stored untouched. Card ids are
    /// global to the store, so a card stored in any deck counts, including
    /// when `deck_name` points the import somewhere new.
    pub skip_existing: bool,
    pub create_if_missing: bool,
    /// Import every note into this deck instead of the package's decks.
    pub deck_name: Option<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            package_path: PathBuf::new(),
            conversion: ConversionConfig::default(),
            skip_existing: false,
            create_if_missing: true,
            deck_name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportStage {
    Parse,
    ResolveSides,
    Convert,
    Media,
    Build,
    Store,
    Finish,
}

impl Display for ImportStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ImportStage::Parse => "parse",
            ImportStage::ResolveSides => "resolve-sides",
            ImportStage::Convert => "convert",
            ImportStage::Media => "media",
            ImportStage::Build => "build",
            ImportStage::Store => "store",
            ImportStage::Finish => "finish",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub stage: ImportStage,
    /// 0 to 100.
    pub percent: u8,
    pub current: Option<String>,
}

/// Receives progress updates.
pub trait ProgressSink {
    fn report(&mut self, progress: &Progress);
}

impl<F: FnMut(&Progress)> ProgressSink for F {
    fn report(&mut self, progress: &Progress) {
        self(progress)
    }
}

/// Discards progress updates.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _progress: &Progress) {}
}

/// A flag shared between the importer and whoever may cancel it. Checked
/// between notes.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A failure that stopped one note, or the whole import when it happened
/// while parsing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportError {
    pub stage: ImportStage,
    pub note_id: Option<NoteId>,
    pub message: String,
}

impl Display for ImportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.note_id {
            Some(id) => write!(f, "[{}] note {id}: {}", self.stage, self.message),
            None => write!(f, "[{}] {}", self.stage, self.message),
        }
    }
}

impl std::error::Error for ImportError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ImportCounts {
    pub total: usize,
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
    pub media_files: usize,
    pub media_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportResult {
    /// Nothing fatal happened, the run was not cancelled and no note failed.
    pub success: bool,
    /// The first deck cards were imported into.
    pub deck: Option<DeckRecord>,
    /// Every deck cards were imported into, in first-use order.
    pub decks: Vec<DeckRecord>,
    pub variant: Option<FormatVariant>,
    pub counts: ImportCounts,
    pub errors: Vec<ImportError>,
    pub media_errors: Vec<MediaError>,
    pub warnings: Vec<String>,
    pub duration: Duration,
    pub cancelled: bool,
}

impl ImportResult {
    fn fatal(error: ImportError, duration: Duration) -> Self {
        Self {
            success: false,
            deck: None,
            decks: Vec::new(),
            variant: None,
            counts: ImportCounts::default(),
            errors: vec![error],
            media_errors: Vec::new(),
            warnings: Vec::new(),
            duration,
            cancelled: false,
        }
    }
}

enum NoteOutcome {
    Imported,
    Skipped,
}

/// Runs imports against a deck store and a media store.
pub struct Importer<'a> {
    deck_store: &'a mut dyn DeckStore,
    media_store: &'a mut dyn MediaStore,
    progress: Box<dyn ProgressSink + 'a>,
    cancellation: Cancellation,
}

impl<'a> Importer<'a> {
    pub fn new(deck_store: &'a mut dyn DeckStore, media_store: &'a mut dyn MediaStore) -> Self {
        Self {
            deck_store,
            media_store,
            progress: Box::new(NoProgress),
            cancellation: Cancellation::new(),
        }
    }

    pub fn with_progress(mut self, sink: impl ProgressSink + 'a) -> Self {
        self.progress = Box::new(sink);
        self
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Import the package at `config.package_path`.
    pub fn run(&mut self, config: &ImportConfig) -> ImportResult {
        let started = Instant::now();
        let path = config.package_path.display().to_string();
        self.progress.report(&Progress {
            stage: ImportStage::Parse,
            percent: 0,
            current: Some(path.clone()),
        });
        let package = match Package::open(&config.package_path) {
            Ok(package) => package,
            Err(e) => {
                log::error!("Failed to parse {path}: {e}");
                let error = ImportError {
                    stage: ImportStage::Parse,
                    note_id: None,
                    message: e.to_string(),
                };
                return ImportResult::fatal(error, started.elapsed());
            }
        };
        self.import_package(&package, config, started)
    }

    /// Import an already parsed package.
    pub fn import_package(
        &mut self,
        package: &Package,
        config: &ImportConfig,
        started: Instant,
    ) -> ImportResult {
        let variant = package.metadata().variant;
        log::info!(
            "Importing {} notes from a {variant:?} package.",
            package.notes().len()
        );
        let mut session = Session {
            package,
            config,
            deck_store: &mut *self.deck_store,
            processor: MediaProcessor::new(&mut *self.media_store),
            sides: SideCache::new(),
            decks: HashMap::new(),
            used_decks: Vec::new(),
            warnings: Vec::new(),
            media_errors: Vec::new(),
        };

        self.progress.report(&Progress {
            stage: ImportStage::ResolveSides,
            percent: 5,
            current: None,
        });
        for model in package.models() {
            let low = session.sides.get_or_resolve(model).low_confidence();
            if !low.is_empty() {
                let warning = format!(
                    "model '{}': no template shows {}; placing on the back",
                    model.name,
                    low.join(", ")
                );
                log::warn!("{warning}");
                session.warnings.push(warning);
            }
        }

        let mut counts = ImportCounts {
            total: package.notes().len(),
            ..ImportCounts::default()
        };
        let mut errors = Vec::new();
        let mut cancelled = false;
        for (idx, note) in package.notes().iter().enumerate() {
            if self.cancellation.is_cancelled() {
                log::warn!("Import cancelled after {idx} notes.");
                cancelled = true;
                break;
            }
            let current = format!("note {}", note.id);
            let percent = note_percent(idx, counts.total);
            let progress = &mut *self.progress;
            let mut report = |stage: ImportStage| {
                progress.report(&Progress {
                    stage,
                    percent,
                    current: Some(current.clone()),
                })
            };
            match session.import_note(note, &mut report) {
                Ok(NoteOutcome::Imported) => counts.imported += 1,
                Ok(NoteOutcome::Skipped) => counts.skipped += 1,
                Err(e) => {
                    log::warn!("{e}");
                    counts.failed += 1;
                    errors.push(e);
                }
            }
            self.progress.report(&Progress {
                stage: ImportStage::Store,
                percent: note_percent(idx + 1, counts.total),
                current: Some(current),
            });
        }

        self.progress.report(&Progress {
            stage: ImportStage::Finish,
            percent: 95,
            current: None,
        });
        if let Err(e) = session.processor.save() {
            errors.push(ImportError {
                stage: ImportStage::Finish,
                note_id: None,
                message: format!("cannot save media manifest: {}", e.message()),
            });
        }
        counts.media_files = session.processor.files_written();
        counts.media_bytes = session.processor.bytes_written();
        self.progress.report(&Progress {
            stage: ImportStage::Finish,
            percent: 100,
            current: None,
        });

        let success = !cancelled && errors.is_empty();
        log::info!(
            "Imported {} of {} notes ({} skipped, {} failed, {} media files).",
            counts.imported,
            counts.total,
            counts.skipped,
            counts.failed,
            counts.media_files
        );
        ImportResult {
            success,
            deck: session.used_decks.first().cloned(),
            decks: session.used_decks,
            variant: Some(variant),
            counts,
            errors,
            media_errors: session.media_errors,
            warnings: session.warnings,
            duration: started.elapsed(),
            cancelled,
        }
    }
}

/// Progress through the note loop, mapped onto 10..=90.
fn note_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 90;
    }
    (10 + done * 80 / total).min(90) as u8
}

/// State of one import run.
struct Session<'p, 's> {
    package: &'p Package,
    config: &'p ImportConfig,
    deck_store: &'s mut dyn DeckStore,
    processor: MediaProcessor<'s>,
    sides: SideCache,
    /// Resolved decks by name.
    decks: HashMap<String, DeckRecord>,
    used_decks: Vec<DeckRecord>,
    warnings: Vec<String>,
    media_errors: Vec<MediaError>,
}

impl<'p, 's> Session<'p, 's> {
    /// Import one note, reporting each stage it completes.
    fn import_note(
        &mut self,
        note: &Note,
        report: &mut dyn FnMut(ImportStage),
    ) -> Result<NoteOutcome, ImportError> {
        let package = self.package;
        let card_id = CardId::for_note(note.id);
        let error = |stage: ImportStage, message: String| ImportError {
            stage,
            note_id: Some(note.id),
            message,
        };
        let model = package.model(note.model_id).ok_or_else(|| {
            error(
                ImportStage::Build,
                format!("note uses unknown model {}", note.model_id),
            )
        })?;
        let deck = self
            .deck_for(note)
            .map_err(|e| error(ImportStage::Build, e.to_string()))?;
        if self.config.skip_existing {
            let exists = self
                .deck_store
                .contains_card(card_id)
                .map_err(|e| error(ImportStage::Store, e.to_string()))?;
            if exists {
                log::debug!("Skipping note {}: card already stored.", note.id);
                return Ok(NoteOutcome::Skipped);
            }
        }

        let (values, mismatch) = reconcile_fields(note, model);
        if let Some(warning) = mismatch {
            self.warnings.push(warning);
        }
        let mut converted = Vec::with_capacity(values.len());
        for (def, value) in model.fields.iter().zip(values) {
            let result = convert(value, &self.config.conversion);
            for warning in &result.warnings {
                self.warnings
                    .push(format!("note {} field '{}': {warning}", note.id, def.name));
            }
            converted.push(result);
        }
        report(ImportStage::Convert);

        let mut contents = Vec::with_capacity(converted.len());
        for result in converted {
            let media = self
                .processor
                .process(package, &deck.name, card_id, &result.media);
            self.media_errors.extend(media.errors);
            contents.push(result.resolve_media(&media.paths));
        }
        report(ImportStage::Media);

        let sides = self.sides.get_or_resolve(model);
        let BuildResult {
            card,
            warnings,
            success,
        } = CardBuilder::new(model, sides).build(note, contents, &deck);
        let card = match card {
            Some(card) if success => card,
            _ => return Err(error(ImportStage::Build, warnings.join("; "))),
        };
        self.warnings.extend(warnings);
        report(ImportStage::Build);
        self.deck_store
            .insert_card(&card)
            .map_err(|e| error(ImportStage::Store, e.to_string()))?;
        if !self.used_decks.iter().any(|d| d.id == deck.id) {
            self.used_decks.push(deck);
        }
        Ok(NoteOutcome::Imported)
    }

    /// The target deck of a note: the configured override, else the deck
    /// the package puts it in.
    fn deck_for(&mut self, note: &Note) -> Result<DeckRecord, DeckError> {
        let package = self.package;
        let source = package.deck_for_note(note.id);
        let name = match (&self.config.deck_name, source) {
            (Some(name), _) => name.clone(),
            (None, Some(deck)) => deck.name.clone(),
            (None, None) => DEFAULT_DECK.to_string(),
        };
        if let Some(deck) = self.decks.get(&name) {
            return Ok(deck.clone());
        }
        let description = match (&self.config.deck_name, source) {
            (None, Some(deck)) => deck.description.as_str(),
            _ => "",
        };
        let deck = resolve_deck(
            &mut *self.deck_store,
            &name,
            description,
            self.config.create_if_missing,
        )?;
        self.decks.insert(name, deck.clone());
        Ok(deck)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MemoryDeckStore;
    use crate::error::Fallible;
    use crate::fixtures::FixtureModel;
    use crate::fixtures::FixtureNote;
    use crate::fixtures::PackageBuilder;
    use crate::media::manifest::MediaManifest;
    use crate::media::store::MemoryMediaStore;
    use crate::types::card::CardKind;

    fn run(
        builder: &PackageBuilder,
        config: &ImportConfig,
        decks: &mut MemoryDeckStore,
        media: &mut MemoryMediaStore,
    ) -> Fallible<ImportResult> {
        let package = Package::from_bytes(builder.build()?)?;
        let mut importer = Importer::new(decks, media);
        Ok(importer.import_package(&package, config, Instant::now()))
    }

    fn geo(variant: FormatVariant) -> PackageBuilder {
        PackageBuilder::new(variant)
            .deck(1, "Default", "")
            .deck(20, "Geo", "Geography")
            .model(FixtureModel::basic(100))
    }

    #[test]
    fn test_imports_cards() -> Fallible<()> {
        let builder = geo(FormatVariant::Legacy2)
            .note(FixtureNote::new(1, 100, &["France", "<b>Paris</b>"]).deck(20).tags("capitals"))
            .note(FixtureNote::new(2, 100, &["Spain", "Madrid"]).deck(20));
        let mut decks = MemoryDeckStore::new();
        let mut media = MemoryMediaStore::new();
        let result = run(&builder, &ImportConfig::default(), &mut decks, &mut media)?;
        assert!(result.success);
        assert_eq!(result.variant, Some(FormatVariant::Legacy2));
        assert_eq!(result.counts.total, 2);
        assert_eq!(result.counts.imported, 2);
        assert_eq!(result.deck.map(|d| d.name), Some("Geo".to_string()));
        let card = decks.card(CardId::for_note(1)).unwrap();
        assert_eq!(card.front, "France");
        assert_eq!(card.back, "**Paris**");
        assert_eq!(card.tags, vec!["capitals"]);
        assert_eq!(decks.decks()[0].description, "Geography");
        Ok(())
    }

    #[test]
    fn test_one_missing_asset_out_of_ten() -> Fallible<()> {
        let mut builder = geo(FormatVariant::Legacy2);
        for i in 1..=10 {
            let back = format!("<img src=\"img{i}.png\">");
            builder = builder.note(FixtureNote::new(i, 100, &["Q", back.as_str()]).deck(20));
            if i != 7 {
                builder = builder.media(&format!("img{i}.png"), format!("png {i}").as_bytes());
            }
        }
        let mut decks = MemoryDeckStore::new();
        let mut media = MemoryMediaStore::new();
        let result = run(&builder, &ImportConfig::default(), &mut decks, &mut media)?;
        assert_eq!(result.counts.imported, 10);
        assert_eq!(result.counts.failed, 0);
        assert_eq!(result.media_errors.len(), 1);
        assert_eq!(result.media_errors[0].file_name, "img7.png");
        assert_eq!(result.media_errors[0].card_id, Some(CardId::for_note(7)));
        assert_eq!(result.counts.media_files, 9);
        let card = decks.card(CardId::for_note(7)).unwrap();
        assert_eq!(card.back, "![](img7.png)");
        let card = decks.card(CardId::for_note(3)).unwrap();
        assert_eq!(card.back, "![](geo/img3.png)");
        Ok(())
    }

    #[test]
    fn test_identical_media_is_stored_once() -> Fallible<()> {
        let builder = geo(FormatVariant::Latest)
            .note(FixtureNote::new(1, 100, &["A", "<img src=\"a.png\">"]).deck(20))
            .note(FixtureNote::new(2, 100, &["B", "<img src=\"b.png\">"]).deck(20))
            .media("a.png", b"same bytes")
            .media("b.png", b"same bytes");
        let mut decks = MemoryDeckStore::new();
        let mut media = MemoryMediaStore::new();
        let result = run(&builder, &ImportConfig::default(), &mut decks, &mut media)?;
        assert_eq!(result.counts.imported, 2);
        assert_eq!(result.counts.media_files, 1);
        assert_eq!(result.counts.media_bytes, 10);
        let manifest = MediaManifest::load(&media, "geo")?;
        assert_eq!(manifest.len(), 1);
        let entry = manifest.entries().next().unwrap();
        assert_eq!(entry.cards, vec![CardId::for_note(1), CardId::for_note(2)]);
        assert_eq!(entry.path, "geo/a.png");
        let b = decks.card(CardId::for_note(2)).unwrap();
        assert_eq!(b.back, "![](geo/a.png)");
        Ok(())
    }

    #[test]
    fn test_reimport_with_skip_existing() -> Fallible<()> {
        let builder = geo(FormatVariant::Legacy1)
            .note(FixtureNote::new(1, 100, &["A", "<img src=\"a.png\">"]).deck(20))
            .note(FixtureNote::new(2, 100, &["B", "[sound:b.mp3]"]).deck(20))
            .media("a.png", b"png")
            .media("b.mp3", b"mp3");
        let config = ImportConfig {
            skip_existing: true,
            ..ImportConfig::default()
        };
        let mut decks = MemoryDeckStore::new();
        let mut media = MemoryMediaStore::new();
        let first = run(&builder, &config, &mut decks, &mut media)?;
        assert_eq!(first.counts.imported, 2);
        let files = media.len();
        let entries = MediaManifest::load(&media, "geo")?.len();

        let second = run(&builder, &config, &mut decks, &mut media)?;
        assert!(second.success);
        assert_eq!(second.counts.skipped, 2);
        assert_eq!(second.counts.imported, 0);
        assert_eq!(second.counts.media_files, 0);
        assert_eq!(media.len(), files);
        assert_eq!(MediaManifest::load(&media, "geo")?.len(), entries);
        Ok(())
    }

    #[test]
    fn test_skip_existing_spans_decks() -> Fallible<()> {
        let builder = geo(FormatVariant::Latest)
            .note(FixtureNote::new(1, 100, &["A", "B"]).deck(20))
            .note(FixtureNote::new(2, 100, &["C", "D"]).deck(20));
        let mut decks = MemoryDeckStore::new();
        let mut media = MemoryMediaStore::new();
        run(&builder, &ImportConfig::default(), &mut decks, &mut media)?;
        let config = ImportConfig {
            skip_existing: true,
            deck_name: Some("Elsewhere".to_string()),
            ..ImportConfig::default()
        };
        let second = run(&builder, &config, &mut decks, &mut media)?;
        assert!(second.success);
        assert_eq!(second.counts.skipped, 2);
        assert_eq!(second.counts.imported, 0);
        assert_eq!(decks.cards().count(), 2);
        Ok(())
    }

    #[test]
    fn test_reimport_without_skip_fails_duplicates() -> Fallible<()> {
        let builder = geo(FormatVariant::Legacy2).note(FixtureNote::new(1, 100, &["A", "B"]).deck(20));
        let mut decks = MemoryDeckStore::new();
        let mut media = MemoryMediaStore::new();
        run(&builder, &ImportConfig::default(), &mut decks, &mut media)?;
        let second = run(&builder, &ImportConfig::default(), &mut decks, &mut media)?;
        assert!(!second.success);
        assert_eq!(second.counts.failed, 1);
        assert_eq!(second.errors[0].stage, ImportStage::Store);
        assert_eq!(second.errors[0].note_id, Some(1));
        Ok(())
    }

    #[test]
    fn test_missing_deck_fails_notes() -> Fallible<()> {
        let builder = geo(FormatVariant::Legacy2)
            .note(FixtureNote::new(1, 100, &["A", "B"]).deck(20))
            .note(FixtureNote::new(2, 100, &["C", "D"]).deck(20));
        let config = ImportConfig {
            create_if_missing: false,
            ..ImportConfig::default()
        };
        let mut decks = MemoryDeckStore::new();
        let mut media = MemoryMediaStore::new();
        let result = run(&builder, &config, &mut decks, &mut media)?;
        assert!(!result.success);
        assert_eq!(result.counts.failed, 2);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors.iter().all(|e| e.stage == ImportStage::Build));
        assert!(decks.decks().is_empty());
        Ok(())
    }

    #[test]
    fn test_deck_override() -> Fallible<()> {
        let builder = geo(FormatVariant::Legacy2)
            .note(FixtureNote::new(1, 100, &["A", "B"]).deck(20))
            .note(FixtureNote::new(2, 100, &["C", "D"]));
        let config = ImportConfig {
            deck_name: Some("Imported".to_string()),
            ..ImportConfig::default()
        };
        let mut decks = MemoryDeckStore::new();
        let mut media = MemoryMediaStore::new();
        let result = run(&builder, &config, &mut decks, &mut media)?;
        assert_eq!(result.decks.len(), 1);
        assert_eq!(decks.decks().len(), 1);
        assert!(decks.cards().all(|c| c.deck_name == "Imported"));
        Ok(())
    }

    #[test]
    fn test_field_count_mismatch_is_a_warning() -> Fallible<()> {
        let builder = geo(FormatVariant::Legacy2).note(FixtureNote::new(1, 100, &["Only front"]).deck(20));
        let mut decks = MemoryDeckStore::new();
        let mut media = MemoryMediaStore::new();
        let result = run(&builder, &ImportConfig::default(), &mut decks, &mut media)?;
        assert_eq!(result.counts.imported, 1);
        assert!(result.warnings.iter().any(|w| w.contains("1 field values")));
        Ok(())
    }

    #[test]
    fn test_cloze_notes() -> Fallible<()> {
        let builder = geo(FormatVariant::Latest)
            .model(FixtureModel::cloze(200))
            .note(FixtureNote::new(1, 200, &["{{c1::Rome}} is in {{c2::Italy}}", ""]).cards(2));
        let mut decks = MemoryDeckStore::new();
        let mut media = MemoryMediaStore::new();
        let result = run(&builder, &ImportConfig::default(), &mut decks, &mut media)?;
        assert_eq!(result.counts.imported, 1);
        let card = decks.card(CardId::for_note(1)).unwrap();
        assert_eq!(card.kind, CardKind::Cloze);
        assert_eq!(card.deck_name, "Default");
        assert!(card.front.contains("{{c1::Rome}}"));
        Ok(())
    }

    #[test]
    fn test_cancelled_before_start() -> Fallible<()> {
        let builder = geo(FormatVariant::Legacy2).note(FixtureNote::new(1, 100, &["A", "B"]).deck(20));
        let package = Package::from_bytes(builder.build()?)?;
        let mut decks = MemoryDeckStore::new();
        let mut media = MemoryMediaStore::new();
        let cancellation = Cancellation::new();
        cancellation.cancel();
        let mut importer = Importer::new(&mut decks, &mut media).with_cancellation(cancellation);
        let result = importer.import_package(&package, &ImportConfig::default(), Instant::now());
        assert!(result.cancelled);
        assert!(!result.success);
        assert_eq!(result.counts.imported, 0);
        Ok(())
    }

    #[test]
    fn test_progress_is_reported() -> Fallible<()> {
        let builder = geo(FormatVariant::Legacy2)
            .note(FixtureNote::new(1, 100, &["A", "B"]).deck(20))
            .note(FixtureNote::new(2, 100, &["C", "D"]).deck(20));
        let package = Package::from_bytes(builder.build()?)?;
        let mut decks = MemoryDeckStore::new();
        let mut media = MemoryMediaStore::new();
        let mut seen: Vec<(ImportStage, u8)> = Vec::new();
        {
            let mut importer = Importer::new(&mut decks, &mut media)
                .with_progress(|p: &Progress| seen.push((p.stage, p.percent)));
            importer.import_package(&package, &ImportConfig::default(), Instant::now());
        }
        assert_eq!(
            seen,
            vec![
                (ImportStage::ResolveSides, 5),
                (ImportStage::Convert, 10),
                (ImportStage::Media, 10),
                (ImportStage::Build, 10),
                (ImportStage::Store, 50),
                (ImportStage::Convert, 50),
                (ImportStage::Media, 50),
                (ImportStage::Build, 50),
                (ImportStage::Store, 90),
                (ImportStage::Finish, 95),
                (ImportStage::Finish, 100),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_unreadable_package_is_fatal() -> Fallible<()> {
        let dir = crate::helper::create_tmp_directory()?;
        let path = dir.join("broken.apkg");
        std::fs::write(&path, b"not a zip")?;
        let config = ImportConfig {
            package_path: path,
            ..ImportConfig::default()
        };
        let mut decks = MemoryDeckStore::new();
        let mut media = MemoryMediaStore::new();
        let result = Importer::new(&mut decks, &mut media).run(&config);
        assert!(!result.success);
        assert_eq!(result.counts, ImportCounts::default());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].stage, ImportStage::Parse);
        assert_eq!(result.variant, None);
        Ok(())
    }

    #[test]
    fn test_note_percent() {
        assert_eq!(note_percent(0, 0), 90);
        assert_eq!(note_percent(1, 2), 50);
        assert_eq!(note_percent(2, 2), 90);
    }
}
