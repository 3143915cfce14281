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


use std::path::Path;

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

use cardport_core::builder::DeckRecord;
use cardport_core::builder::DeckStore;
use cardport_core::builder::StoreError;
use cardport_core::error::Fallible;
use cardport_core::types::card::Card;
use cardport_core::types::card::CardId;
use cardport_core::types::card::CardKind;
use cardport_core::types::model::DeckId;

const SCHEMA: &str = "
    create table if not exists decks (
        id integer primary key autoincrement,
        name text not null unique,
        description text not null
    );
    create table if not exists cards (
        id integer primary key,
        note_id integer not null,
        deck_id integer not null references decks (id),
        model_name text not null,
        kind text not null,
        front text not null,
        back text not null,
        tags text not null,
        modified integer
    );";

/// A card as it is read back for export.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCard {
    pub kind: CardKind,
    pub front: String,
    pub back: String,
}

/// Decks and cards persisted in a SQLite database.
pub struct SqliteDeckStore {
    conn: Connection,
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl SqliteDeckStore {
    pub fn open(path: &Path) -> Fallible<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn in_memory() -> Fallible<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn decks(&self) -> Fallible<Vec<DeckRecord>> {
        let mut stmt = self
            .conn
            .prepare("select id, name, description from decks order by name")?;
        let rows = stmt.query_map([], |row| {
            Ok(DeckRecord {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
            })
        })?;
        let mut decks = Vec::new();
        for deck in rows {
            decks.push(deck?);
        }
        Ok(decks)
    }

    pub fn cards_in_deck(&self, deck_id: DeckId) -> Fallible<Vec<StoredCard>> {
        let mut stmt = self
            .conn
            .prepare("select kind, front, back from cards where deck_id = ? order by id")?;
        let rows = stmt.query_map([deck_id], |row| {
            let kind: String = row.get(0)?;
            Ok(StoredCard {
                kind: if kind == "cloze" {
                    CardKind::Cloze
                } else {
                    CardKind::Basic
                },
                front: row.get(1)?,
                back: row.get(2)?,
            })
        })?;
        let mut cards = Vec::new();
        for card in rows {
            cards.push(card?);
        }
        Ok(cards)
    }
}

impl DeckStore for SqliteDeckStore {
    fn find_deck_by_id(&self, id: DeckId) -> Result<Option<DeckRecord>, StoreError> {
        self.conn
            .query_row(
                "select id, name, description from decks where id = ?",
                [id],
                |row| {
                    Ok(DeckRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(backend)
    }

    fn find_deck_by_name(&self, name: &str) -> Result<Option<DeckRecord>, StoreError> {
        self.conn
            .query_row(
                "select id, name, description from decks where name = ?",
                [name],
                |row| {
                    Ok(DeckRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(backend)
    }

    fn create_deck(&mut self, name: &str, description: &str) -> Result<DeckRecord, StoreError> {
        self.conn
            .execute(
                "insert into decks (name, description) values (?, ?)",
                params![name, description],
            )
            .map_err(backend)?;
        Ok(DeckRecord {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            description: description.to_string(),
        })
    }

    fn contains_card(&self, id: CardId) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row("select id from cards where id = ?", [id.into_inner()], |row| {
                row.get(0)
            })
            .optional()
            .map_err(backend)?;
        Ok(found.is_some())
    }

    fn insert_card(&mut self, card: &Card) -> Result<(), StoreError> {
        if self.contains_card(card.id)? {
            return Err(StoreError::DuplicateCard(card.id));
        }
        if self.find_deck_by_id(card.deck_id)?.is_none() {
            return Err(StoreError::UnknownDeck(card.deck_id));
        }
        let kind = match card.kind {
            CardKind::Basic => "basic",
            CardKind::Cloze => "cloze",
        };
        self.conn
            .execute(
                "insert into cards (id, note_id, deck_id, model_name, kind, front, back, tags, modified)
                 values (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    card.id.into_inner(),
                    card.note_id,
                    card.deck_id,
                    card.model_name,
                    kind,
                    card.front,
                    card.back,
                    card.tags.join(" "),
                    card.modified.map(|t| t.epoch_secs()),
                ],
            )
            .map_err(backend)?;
        Ok(())
    }
}
