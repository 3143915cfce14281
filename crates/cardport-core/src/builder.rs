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
use std::fmt::Display;
use std::fmt::Formatter;

use serde::Serialize;

use crate::sides::FieldSideMap;
use crate::types::card::Card;
use crate::types::card::CardField;
use crate::types::card::CardId;
use crate::types::card::CardKind;
use crate::types::model::DeckId;
use crate::types::model::Model;
use crate::types::model::ModelKind;
use crate::types::model::Note;

/// A deck as the target store knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeckRecord {
    pub id: DeckId,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The card is already stored.
    DuplicateCard(CardId),
    /// The deck a card points at does not exist.
    UnknownDeck(DeckId),
    /// The backing storage failed.
    Backend(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DuplicateCard(id) => write!(f, "card {id} already exists"),
            StoreError::UnknownDeck(id) => write!(f, "deck {id} does not exist"),
            StoreError::Backend(msg) => write!(f, "deck store error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Where built cards are persisted.
pub trait DeckStore {
    fn find_deck_by_id(&self, id: DeckId) -> Result<Option<DeckRecord>, StoreError>;

    fn find_deck_by_name(&self, name: &str) -> Result<Option<DeckRecord>, StoreError>;

    fn create_deck(&mut self, name: &str, description: &str) -> Result<DeckRecord, StoreError>;

    fn contains_card(&self, id: CardId) -> Result<bool, StoreError>;

    fn insert_card(&mut self, card: &Card) -> Result<(), StoreError>;
}

/// A deck store that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryDeckStore {
    decks: Vec<DeckRecord>,
    cards: BTreeMap<CardId, Card>,
}

impl MemoryDeckStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decks(&self) -> &[DeckRecord] {
        &self.decks
    }

    pub fn cards(&self) -> impl Iterator<Item = &Card> {
        self.cards.values()
    }

    pub fn card(&self, id: CardId) -> Option<&Card> {
        self.cards.get(&id)
    }
}

impl DeckStore for MemoryDeckStore {
    fn find_deck_by_id(&self, id: DeckId) -> Result<Option<DeckRecord>, StoreError> {
        Ok(self.decks.iter().find(|d| d.id == id).cloned())
    }

    fn find_deck_by_name(&self, name: &str) -> Result<Option<DeckRecord>, StoreError> {
        Ok(self.decks.iter().find(|d| d.name == name).cloned())
    }

    fn create_deck(&mut self, name: &str, description: &str) -> Result<DeckRecord, StoreError> {
        let id = self.decks.iter().map(|d| d.id).max().unwrap_or(0) + 1;
        let deck = DeckRecord {
            id,
            name: name.to_string(),
            description: description.to_string(),
        };
        self.decks.push(deck.clone());
        Ok(deck)
    }

    fn contains_card(&self, id: CardId) -> Result<bool, StoreError> {
        Ok(self.cards.contains_key(&id))
    }

    fn insert_card(&mut self, card: &Card) -> Result<(), StoreError> {
        if self.cards.contains_key(&card.id) {
            return Err(StoreError::DuplicateCard(card.id));
        }
        if !self.decks.iter().any(|d| d.id == card.deck_id) {
            return Err(StoreError::UnknownDeck(card.deck_id));
        }
        self.cards.insert(card.id, card.clone());
        Ok(())
    }
}

/// Why a target deck could not be resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum DeckError {
    /// The deck does not exist and creating it is not allowed.
    Missing(String),
    Store(StoreError),
}

impl Display for DeckError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DeckError::Missing(name) => {
                write!(f, "deck '{name}' does not exist and creating decks is disabled")
            }
            DeckError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DeckError {}

impl From<StoreError> for DeckError {
    fn from(value: StoreError) -> Self {
        DeckError::Store(value)
    }
}

/// Find the deck called `name`, creating it if allowed.
pub fn resolve_deck(
    store: &mut dyn DeckStore,
    name: &str,
    description: &str,
    create_if_missing: bool,
) -> Result<DeckRecord, DeckError> {
    if let Some(deck) = store.find_deck_by_name(name)? {
        return Ok(deck);
    }
    if !create_if_missing {
        return Err(DeckError::Missing(name.to_string()));
    }
    let deck = store.create_deck(name, description)?;
    log::info!("Created deck '{}' ({}).", deck.name, deck.id);
    Ok(deck)
}

/// Make a note's values line up with its model's fields: extra values are
/// dropped and missing ones are empty. Returns a warning when they differ.
pub fn reconcile_fields<'a>(note: &'a Note, model: &Model) -> (Vec<&'a str>, Option<String>) {
    let mut values = note.field_values();
    let expected = model.fields.len();
    let found = values.len();
    if found == expected {
        return (values, None);
    }
    values.resize(expected, "");
    let warning = format!(
        "note {} has {found} field values but model '{}' defines {expected} fields",
        note.id, model.name
    );
    (values, Some(warning))
}

/// Outcome of building one note.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildResult {
    pub card: Option<Card>,
    pub warnings: Vec<String>,
    pub success: bool,
}

/// Assembles cards from converted note content.
pub struct CardBuilder<'a> {
    model: &'a Model,
    sides: &'a FieldSideMap,
}

impl<'a> CardBuilder<'a> {
    pub fn new(model: &'a Model, sides: &'a FieldSideMap) -> Self {
        Self { model, sides }
    }

    /// Build the card of `note`. `contents` holds the converted value of each
    /// model field, in field order.
    pub fn build(&self, note: &Note, contents: Vec<String>, deck: &DeckRecord) -> BuildResult {
        let mut warnings = Vec::new();
        if contents.len() != self.model.fields.len() {
            warnings.push(format!(
                "note {} has {} converted fields, expected {}",
                note.id,
                contents.len(),
                self.model.fields.len()
            ));
        }
        let fields: Vec<CardField> = self
            .model
            .fields
            .iter()
            .zip(contents.into_iter().chain(std::iter::repeat(String::new())))
            .map(|(def, content)| {
                let placement = self.sides.placement(&def.name);
                CardField {
                    name: def.name.clone(),
                    side: placement.side,
                    confidence: placement.confidence,
                    content,
                }
            })
            .collect();
        let join = |on_side: fn(&CardField) -> bool| {
            fields
                .iter()
                .filter(|f| on_side(f) && !f.content.trim().is_empty())
                .map(|f| f.content.trim())
                .collect::<Vec<_>>()
                .join("\n\n")
        };
        let front = join(|f| f.side.on_front());
        let back = join(|f| f.side.on_back());
        if front.is_empty() && back.is_empty() {
            warnings.push(format!("note {} has no content", note.id));
            return BuildResult {
                card: None,
                warnings,
                success: false,
            };
        }
        if front.is_empty() {
            warnings.push(format!("note {} has an empty front", note.id));
        }
        let kind = match self.model.kind {
            ModelKind::Standard => CardKind::Basic,
            ModelKind::Cloze => CardKind::Cloze,
        };
        let card = Card {
            id: CardId::for_note(note.id),
            note_id: note.id,
            deck_id: deck.id,
            deck_name: deck.name.clone(),
            model_name: self.model.name.clone(),
            kind,
            front,
            back,
            fields,
            tags: note.tag_list(),
            modified: note.modified,
        };
        BuildResult {
            card: Some(card),
            warnings,
            success: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Fallible;
    use crate::sides::resolve_sides;
    use crate::types::model::FieldDef;
    use crate::types::model::Template;
    use crate::types::side::Side;

    fn model(kind: ModelKind, fields: &[&str], front: &str, back: &str) -> Model {
        Model {
            id: 1,
            name: "Test".to_string(),
            kind,
            fields: fields
                .iter()
                .enumerate()
                .map(|(i, name)| FieldDef::new(*name, i as u32))
                .collect(),
            templates: vec![Template {
                name: "Card 1".to_string(),
                ordinal: 0,
                front: front.to_string(),
                back: back.to_string(),
            }],
            css: String::new(),
        }
    }

    fn note(fields: &str) -> Note {
        Note {
            id: 42,
            guid: "abc".to_string(),
            model_id: 1,
            fields: fields.to_string(),
            tags: " geo capitals ".to_string(),
            modified: None,
        }
    }

    fn deck() -> DeckRecord {
        DeckRecord {
            id: 1,
            name: "Geography".to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn test_front_and_back() {
        let m = model(
            ModelKind::Standard,
            &["Question", "Answer"],
            "{{Question}}",
            "{{Question}}<hr>{{Answer}}",
        );
        let sides = resolve_sides(&m);
        let builder = CardBuilder::new(&m, &sides);
        let result = builder.build(
            &note(""),
            vec!["Capital of France?".to_string(), "Paris".to_string()],
            &deck(),
        );
        assert!(result.success);
        let card = result.card.unwrap();
        assert_eq!(card.id, CardId::for_note(42));
        assert_eq!(card.kind, CardKind::Basic);
        assert_eq!(card.front, "Capital of France?");
        assert_eq!(card.back, "Capital of France?\n\nParis");
        assert_eq!(card.fields[0].side, Side::Both);
        assert_eq!(card.fields[1].side, Side::Back);
        assert_eq!(card.tags, vec!["geo", "capitals"]);
        assert_eq!(card.deck_name, "Geography");
    }

    #[test]
    fn test_empty_fields_are_skipped() {
        let m = model(
            ModelKind::Standard,
            &["Front", "Hint", "Back"],
            "{{Front}}{{Hint}}",
            "{{Back}}",
        );
        let sides = resolve_sides(&m);
        let result = CardBuilder::new(&m, &sides).build(
            &note(""),
            vec!["Q".to_string(), "  ".to_string(), "A".to_string()],
            &deck(),
        );
        let card = result.card.unwrap();
        assert_eq!(card.front, "Q");
        assert_eq!(card.back, "A");
    }

    #[test]
    fn test_cloze_kind() {
        let m = model(ModelKind::Cloze, &["Text"], "{{cloze:Text}}", "{{cloze:Text}}");
        let sides = resolve_sides(&m);
        let result =
            CardBuilder::new(&m, &sides).build(&note(""), vec!["{{c1::Paris}}".to_string()], &deck());
        assert_eq!(result.card.map(|c| c.kind), Some(CardKind::Cloze));
    }

    #[test]
    fn test_no_content_fails() {
        let m = model(ModelKind::Standard, &["Front", "Back"], "{{Front}}", "{{Back}}");
        let sides = resolve_sides(&m);
        let result =
            CardBuilder::new(&m, &sides).build(&note(""), vec![String::new(), String::new()], &deck());
        assert!(!result.success);
        assert!(result.card.is_none());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_reconcile_pads_and_truncates() {
        let m = model(ModelKind::Standard, &["Front", "Back"], "{{Front}}", "{{Back}}");
        let n = note("only front");
        let (values, warning) = reconcile_fields(&n, &m);
        assert_eq!(values, vec!["only front", ""]);
        assert!(warning.is_some());

        let n = note("a\x1fb\x1fc");
        let (values, warning) = reconcile_fields(&n, &m);
        assert_eq!(values, vec!["a", "b"]);
        assert!(warning.is_some());

        let n = note("a\x1fb");
        let (values, warning) = reconcile_fields(&n, &m);
        assert_eq!(values, vec!["a", "b"]);
        assert!(warning.is_none());
    }

    #[test]
    fn test_resolve_deck() -> Fallible<()> {
        let mut store = MemoryDeckStore::new();
        assert_eq!(
            resolve_deck(&mut store, "Spanish", "", false),
            Err(DeckError::Missing("Spanish".to_string()))
        );
        let created = resolve_deck(&mut store, "Spanish", "verbs", true)?;
        let found = resolve_deck(&mut store, "Spanish", "", false)?;
        assert_eq!(created, found);
        assert_eq!(store.decks().len(), 1);
        assert_eq!(store.find_deck_by_id(created.id), Ok(Some(created)));
        Ok(())
    }

    #[test]
    fn test_memory_store_rejects_duplicates() -> Fallible<()> {
        let m = model(ModelKind::Standard, &["Front", "Back"], "{{Front}}", "{{Back}}");
        let sides = resolve_sides(&m);
        let mut store = MemoryDeckStore::new();
        let deck = store.create_deck("Geography", "")?;
        let card = CardBuilder::new(&m, &sides)
            .build(&note(""), vec!["Q".to_string(), "A".to_string()], &deck)
            .card
            .unwrap();
        assert_eq!(store.insert_card(&card), Ok(()));
        assert_eq!(store.contains_card(card.id), Ok(true));
        assert_eq!(
            store.insert_card(&card),
            Err(StoreError::DuplicateCard(card.id))
        );
        Ok(())
    }
}
