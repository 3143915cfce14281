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

//! Builds real package archives for tests: a SQLite collection in the
//! requested schema, a media index and the media blobs, zipped together.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::io::Write;

use rusqlite::Connection;
use rusqlite::params;
use serde_json::Value;
use serde_json::json;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::Fallible;
use crate::package::MediaSource;
use crate::package::meta::FormatVariant;
use crate::package::meta::MEDIA_ENTRY;
use crate::package::meta::META_ENTRY;
use crate::package::proto::MessageWriter;
use crate::types::model::DeckId;
use crate::types::model::FIELD_SEPARATOR;
use crate::types::model::ModelId;
use crate::types::model::ModelKind;
use crate::types::model::NoteId;

const MODIFIED: i64 = 1_700_000_000;

const LEGACY_SCHEMA: &str = "
    CREATE TABLE col (
        id integer primary key, crt integer not null, mod integer not null,
        scm integer not null, ver integer not null, conf text not null,
        models text not null, decks text not null, dconf text not null,
        tags text not null
    );";

const LATEST_SCHEMA: &str = "
    CREATE TABLE col (id integer primary key, crt integer not null, mod integer not null,
        scm integer not null, ver integer not null);
    CREATE TABLE notetypes (id integer primary key, name text not null,
        mtime_secs integer not null, usn integer not null, config blob not null);
    CREATE TABLE fields (ntid integer not null, ord integer not null, name text not null,
        config blob not null, primary key (ntid, ord));
    CREATE TABLE templates (ntid integer not null, ord integer not null, name text not null,
        mtime_secs integer not null, usn integer not null, config blob not null,
        primary key (ntid, ord));
    CREATE TABLE decks (id integer primary key, name text not null, mtime_secs integer not null,
        usn integer not null, common blob not null, kind blob not null);";

const SHARED_SCHEMA: &str = "
    CREATE TABLE notes (
        id integer primary key, guid text not null, mid integer not null,
        mod integer not null, usn integer not null, tags text not null,
        flds text not null, sfld text not null, csum integer not null,
        flags integer not null, data text not null
    );
    CREATE TABLE cards (
        id integer primary key, nid integer not null, did integer not null,
        ord integer not null, mod integer not null, usn integer not null,
        type integer not null, queue integer not null, due integer not null,
        ivl integer not null, factor integer not null, reps integer not null,
        lapses integer not null, left integer not null, odue integer not null,
        odid integer not null, flags integer not null, data text not null
    );";

#[derive(Debug, Clone)]
pub struct FixtureModel {
    pub id: ModelId,
    pub name: String,
    pub kind: ModelKind,
    pub fields: Vec<String>,
    /// (front, back) markup per template.
    pub templates: Vec<(String, String)>,
}

impl FixtureModel {
    pub fn new(
        id: ModelId,
        name: &str,
        kind: ModelKind,
        fields: &[&str],
        templates: &[(&str, &str)],
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            kind,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            templates: templates
                .iter()
                .map(|(front, back)| (front.to_string(), back.to_string()))
                .collect(),
        }
    }

    pub fn basic(id: ModelId) -> Self {
        Self::new(
            id,
            "Basic",
            ModelKind::Standard,
            &["Front", "Back"],
            &[("{{Front}}", "{{FrontSide}}<hr id=answer>{{Back}}")],
        )
    }

    pub fn cloze(id: ModelId) -> Self {
        Self::new(
            id,
            "Cloze",
            ModelKind::Cloze,
            &["Text", "Extra"],
            &[("{{cloze:Text}}", "{{cloze:Text}}<br>{{Extra}}")],
        )
    }
}

#[derive(Debug, Clone)]
pub struct FixtureNote {
    pub id: NoteId,
    pub model_id: ModelId,
    pub fields: Vec<String>,
    pub tags: String,
    pub deck_id: DeckId,
    pub cards: u32,
}

impl FixtureNote {
    pub fn new(id: NoteId, model_id: ModelId, fields: &[&str]) -> Self {
        Self {
            id,
            model_id,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            tags: String::new(),
            deck_id: 1,
            cards: 1,
        }
    }

    pub fn deck(mut self, deck_id: DeckId) -> Self {
        self.deck_id = deck_id;
        self
    }

    pub fn tags(mut self, tags: &str) -> Self {
        self.tags = tags.to_string();
        self
    }

    /// Number of card rows generated for the note.
    pub fn cards(mut self, cards: u32) -> Self {
        self.cards = cards;
        self
    }
}

enum DatabaseSource {
    Generated,
    Raw(Vec<u8>),
    Omitted,
}

pub struct PackageBuilder {
    variant: FormatVariant,
    decks: Vec<(DeckId, String, String)>,
    models: Vec<FixtureModel>,
    notes: Vec<FixtureNote>,
    media: Vec<(String, Vec<u8>)>,
    database: DatabaseSource,
}

impl PackageBuilder {
    pub fn new(variant: FormatVariant) -> Self {
        Self {
            variant,
            decks: Vec::new(),
            models: Vec::new(),
            notes: Vec::new(),
            media: Vec::new(),
            database: DatabaseSource::Generated,
        }
    }

    pub fn deck(mut self, id: DeckId, name: &str, description: &str) -> Self {
        self.decks
            .push((id, name.to_string(), description.to_string()));
        self
    }

    pub fn model(mut self, model: FixtureModel) -> Self {
        self.models.push(model);
        self
    }

    pub fn note(mut self, note: FixtureNote) -> Self {
        self.notes.push(note);
        self
    }

    pub fn media(mut self, name: &str, bytes: &[u8]) -> Self {
        self.media.push((name.to_string(), bytes.to_vec()));
        self
    }

    /// Store these bytes as the collection database instead of a generated
    /// one.
    pub fn raw_database(mut self, bytes: Vec<u8>) -> Self {
        self.database = DatabaseSource::Raw(bytes);
        self
    }

    pub fn without_database(mut self) -> Self {
        self.database = DatabaseSource::Omitted;
        self
    }

    /// Zip everything into the bytes of a package file.
    pub fn build(&self) -> Fallible<Vec<u8>> {
        let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
        let compressed = self.variant.is_compressed();

        let database = match &self.database {
            DatabaseSource::Generated => Some(self.build_database()?),
            DatabaseSource::Raw(bytes) => Some(bytes.clone()),
            DatabaseSource::Omitted => None,
        };
        if let Some(database) = database {
            let database = match compressed {
                true => zstd::encode_all(&database[..], 0)?,
                false => database,
            };
            entries.push((self.variant.database_name().to_string(), database));
        }

        if compressed {
            // Newer exporters ship an upgrade stub for old clients next to
            // the real collection.
            let stub = PackageBuilder::new(FormatVariant::Legacy1).build_database()?;
            entries.push((FormatVariant::Legacy1.database_name().to_string(), stub));
            entries.push((
                META_ENTRY.to_string(),
                MessageWriter::new().uint(1, 3).finish(),
            ));
        }

        entries.push((MEDIA_ENTRY.to_string(), self.build_media_index()?));
        for (idx, (_, bytes)) in self.media.iter().enumerate() {
            let bytes = match compressed {
                true => zstd::encode_all(&bytes[..], 0)?,
                false => bytes.clone(),
            };
            entries.push((idx.to_string(), bytes));
        }

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, bytes) in entries {
            zip.start_file(name, options)?;
            zip.write_all(&bytes)?;
        }
        Ok(zip.finish()?.into_inner())
    }

    fn build_media_index(&self) -> Fallible<Vec<u8>> {
        if self.variant.is_compressed() {
            let mut list = MessageWriter::new();
            for (name, bytes) in &self.media {
                let entry = MessageWriter::new()
                    .string(1, name)
                    .uint(2, bytes.len() as u64)
                    .finish();
                list = list.bytes(1, &entry);
            }
            Ok(zstd::encode_all(&list.finish()[..], 0)?)
        } else {
            let index: BTreeMap<String, &str> = self
                .media
                .iter()
                .enumerate()
                .map(|(idx, (name, _))| (idx.to_string(), name.as_str()))
                .collect();
            Ok(serde_json::to_vec(&index)?)
        }
    }

    fn build_database(&self) -> Fallible<Vec<u8>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("collection.db");
        let conn = Connection::open(&path)?;
        conn.execute_batch(SHARED_SCHEMA)?;
        match self.variant {
            FormatVariant::Legacy1 | FormatVariant::Legacy2 => self.write_legacy(&conn)?,
            FormatVariant::Latest => self.write_latest(&conn)?,
        }
        self.write_notes(&conn)?;
        conn.close().map_err(|(_, e)| e)?;
        Ok(std::fs::read(&path)?)
    }

    fn write_legacy(&self, conn: &Connection) -> Fallible<()> {
        conn.execute_batch(LEGACY_SCHEMA)?;
        let models: BTreeMap<String, Value> = self
            .models
            .iter()
            .map(|m| {
                let fields: Vec<Value> = m
                    .fields
                    .iter()
                    .enumerate()
                    .map(|(ord, name)| {
                        json!({"name": name, "ord": ord, "sticky": false, "rtl": false,
                               "font": "Arial", "size": 20, "media": []})
                    })
                    .collect();
                let templates: Vec<Value> = m
                    .templates
                    .iter()
                    .enumerate()
                    .map(|(ord, (front, back))| {
                        json!({"name": format!("Card {}", ord + 1), "ord": ord,
                               "qfmt": front, "afmt": back, "did": null})
                    })
                    .collect();
                let kind = match m.kind {
                    ModelKind::Standard => 0,
                    ModelKind::Cloze => 1,
                };
                let model = json!({"id": m.id, "name": m.name, "type": kind, "flds": fields,
                                   "tmpls": templates, "css": ".card {}", "sortf": 0});
                (m.id.to_string(), model)
            })
            .collect();
        let decks: BTreeMap<String, Value> = self
            .decks
            .iter()
            .map(|(id, name, desc)| {
                (
                    id.to_string(),
                    json!({"id": id, "name": name, "desc": desc, "dyn": 0}),
                )
            })
            .collect();
        conn.execute(
            "INSERT INTO col VALUES (1, ?1, ?1, ?1, 11, '{}', ?2, ?3, '{}', '{}')",
            params![
                MODIFIED,
                serde_json::to_string(&models)?,
                serde_json::to_string(&decks)?
            ],
        )?;
        Ok(())
    }

    fn write_latest(&self, conn: &Connection) -> Fallible<()> {
        conn.execute_batch(LATEST_SCHEMA)?;
        conn.execute(
            "INSERT INTO col VALUES (1, ?1, ?1, ?1, 18)",
            params![MODIFIED],
        )?;
        for m in &self.models {
            let kind = match m.kind {
                ModelKind::Standard => 0,
                ModelKind::Cloze => 1,
            };
            let config = MessageWriter::new()
                .uint(1, kind)
                .string(3, ".card {}")
                .finish();
            conn.execute(
                "INSERT INTO notetypes VALUES (?1, ?2, ?3, 0, ?4)",
                params![m.id, m.name, MODIFIED, config],
            )?;
            for (ord, name) in m.fields.iter().enumerate() {
                let config = MessageWriter::new()
                    .string(3, "Arial")
                    .uint(4, 20)
                    .finish();
                conn.execute(
                    "INSERT INTO fields VALUES (?1, ?2, ?3, ?4)",
                    params![m.id, ord as i64, name, config],
                )?;
            }
            for (ord, (front, back)) in m.templates.iter().enumerate() {
                let config = MessageWriter::new()
                    .string(1, front)
                    .string(2, back)
                    .finish();
                conn.execute(
                    "INSERT INTO templates VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                    params![
                        m.id,
                        ord as i64,
                        format!("Card {}", ord + 1),
                        MODIFIED,
                        config
                    ],
                )?;
            }
        }
        for (id, name, desc) in &self.decks {
            let normal = MessageWriter::new().string(4, desc).finish();
            let kind = MessageWriter::new().bytes(1, &normal).finish();
            conn.execute(
                "INSERT INTO decks VALUES (?1, ?2, ?3, 0, ?4, ?5)",
                params![
                    id,
                    name.replace("::", "\x1f"),
                    MODIFIED,
                    Vec::<u8>::new(),
                    kind
                ],
            )?;
        }
        Ok(())
    }

    fn write_notes(&self, conn: &Connection) -> Fallible<()> {
        let mut card_id: i64 = 1_000;
        for note in &self.notes {
            let flds = note.fields.join(&FIELD_SEPARATOR.to_string());
            let sfld = note.fields.first().cloned().unwrap_or_default();
            conn.execute(
                "INSERT INTO notes VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7, 0, 0, '')",
                params![
                    note.id,
                    format!("guid{}", note.id),
                    note.model_id,
                    MODIFIED,
                    note.tags,
                    flds,
                    sfld
                ],
            )?;
            for ord in 0..note.cards {
                card_id += 1;
                conn.execute(
                    "INSERT INTO cards VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, '')",
                    params![card_id, note.id, note.deck_id, ord, MODIFIED],
                )?;
            }
        }
        Ok(())
    }
}

/// Media bytes served from memory, for exercising the media stage without an
/// archive.
#[derive(Debug, Default)]
pub struct MemoryMediaSource {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, bytes: &[u8]) -> Self {
        self.files.insert(name.to_string(), bytes.to_vec());
        self
    }
}

impl MediaSource for MemoryMediaSource {
    fn fetch(&self, name: &str) -> Fallible<Option<Vec<u8>>> {
        Ok(self.files.get(name).cloned())
    }

    fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }
}
