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

//! The unified, version-agnostic shape every package variant is normalized
//! into.

use serde::Serialize;

use crate::types::timestamp::Timestamp;

/// Separator between field values in a note's `flds` column.
pub const FIELD_SEPARATOR: char = '\x1f';

pub type ModelId = i64;
pub type DeckId = i64;
pub type NoteId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Standard,
    Cloze,
}

/// A note type: a field schema plus card templates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Model {
    pub id: ModelId,
    pub name: String,
    pub kind: ModelKind,
    /// Sorted by ordinal.
    pub fields: Vec<FieldDef>,
    /// Sorted by ordinal.
    pub templates: Vec<Template>,
    pub css: String,
}

impl Model {
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDef {
    pub name: String,
    pub ordinal: u32,
    pub sticky: bool,
    pub rtl: bool,
    pub font: Option<String>,
    pub font_size: Option<u32>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ordinal: u32) -> Self {
        Self {
            name: name.into(),
            ordinal,
            sticky: false,
            rtl: false,
            font: None,
            font_size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Template {
    pub name: String,
    pub ordinal: u32,
    /// Question-side markup.
    pub front: String,
    /// Answer-side markup.
    pub back: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Deck {
    pub id: DeckId,
    /// Full hierarchical name, components joined by `::`.
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub id: NoteId,
    pub guid: String,
    pub model_id: ModelId,
    /// Raw field values joined by [`FIELD_SEPARATOR`].
    pub fields: String,
    pub tags: String,
    pub modified: Option<Timestamp>,
}

impl Note {
    pub fn field_values(&self) -> Vec<&str> {
        self.fields.split(FIELD_SEPARATOR).collect()
    }

    pub fn tag_list(&self) -> Vec<String> {
        self.tags.split_whitespace().map(str::to_string).collect()
    }
}

/// A row of the `cards` table. Only what the importer needs to count cards
/// and locate the deck a note lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardRow {
    pub id: i64,
    pub note_id: NoteId,
    pub deck_id: DeckId,
    pub ordinal: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_values() {
        let note = Note {
            id: 1,
            guid: "abc".to_string(),
            model_id: 2,
            fields: "front\x1fback\x1f".to_string(),
            tags: " geo  capitals ".to_string(),
            modified: None,
        };
        assert_eq!(note.field_values(), vec!["front", "back", ""]);
        assert_eq!(note.tag_list(), vec!["geo", "capitals"]);
    }
}
