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

use serde::Deserialize;
use serde::Serialize;

use crate::types::model::DeckId;
use crate::types::model::NoteId;
use crate::types::side::Confidence;
use crate::types::side::Side;
use crate::types::timestamp::Timestamp;

/// Identifier of an imported card. One card is produced per note, so the
/// note id doubles as the card id and reimports map onto the same card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(i64);

impl CardId {
    pub fn for_note(note_id: NoteId) -> Self {
        Self(note_id)
    }

    pub fn into_inner(self) -> i64 {
        self.0
    }
}

impl Display for CardId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardKind {
    Basic,
    Cloze,
}

/// A field after conversion, tagged with where it is shown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardField {
    pub name: String,
    pub side: Side,
    pub confidence: Confidence,
    /// Converted Markdown with media paths substituted.
    pub content: String,
}

/// The final record handed to the deck store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Card {
    pub id: CardId,
    pub note_id: NoteId,
    pub deck_id: DeckId,
    pub deck_name: String,
    pub model_name: String,
    pub kind: CardKind,
    pub front: String,
    pub back: String,
    pub fields: Vec<CardField>,
    pub tags: Vec<String>,
    pub modified: Option<Timestamp>,
}
