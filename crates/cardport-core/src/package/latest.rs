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

//! Newer schemas keep note types, fields, templates and decks in dedicated
//! tables, with per-row settings encoded as protobuf blobs.

use std::collections::BTreeMap;

use crate::db::Database;
use crate::package::PackageError;
use crate::package::proto::Message;
use crate::package::proto::ProtoError;
use crate::types::model::Deck;
use crate::types::model::FieldDef;
use crate::types::model::Model;
use crate::types::model::ModelId;
use crate::types::model::ModelKind;
use crate::types::model::Template;

/// Deck names store hierarchy levels separated by this byte.
const DECK_LEVEL_SEPARATOR: char = '\x1f';

// Notetype.Config
const NOTETYPE_KIND: u32 = 1;
const NOTETYPE_CSS: u32 = 3;
// Notetype.Field.Config
const FIELD_STICKY: u32 = 1;
const FIELD_RTL: u32 = 2;
const FIELD_FONT_NAME: u32 = 3;
const FIELD_FONT_SIZE: u32 = 4;
// Notetype.Template.Config
const TEMPLATE_QUESTION: u32 = 1;
const TEMPLATE_ANSWER: u32 = 2;
// Deck.kind: oneof { Normal normal = 1; Filtered filtered = 2; }
const DECK_KIND_NORMAL: u32 = 1;
const DECK_NORMAL_DESCRIPTION: u32 = 4;

fn proto_err(table: &str) -> impl Fn(ProtoError) -> PackageError + '_ {
    move |e| PackageError::UnsupportedFormat(format!("{table}: {e}"))
}

fn u32_column(value: i64, what: &str) -> Result<u32, PackageError> {
    u32::try_from(value)
        .map_err(|_| PackageError::UnsupportedFormat(format!("{what} out of range: {value}")))
}

/// Whether the database uses the table-based schema.
pub fn has_table_schema(db: &Database) -> Result<bool, PackageError> {
    Ok(db.has_table("notetypes")? && db.has_table("fields")? && db.has_table("templates")?)
}

pub fn read_models(db: &Database) -> Result<Vec<Model>, PackageError> {
    let mut fields: BTreeMap<ModelId, Vec<FieldDef>> = BTreeMap::new();
    for row in db.query("SELECT ntid, ord, name, config FROM fields ORDER BY ntid, ord")? {
        let config = row.blob(3)?;
        let config = Message::parse(&config).map_err(proto_err("fields"))?;
        let field = FieldDef {
            name: row.text(2)?,
            ordinal: u32_column(row.int(1)?, "field ordinal")?,
            sticky: config.bool(FIELD_STICKY),
            rtl: config.bool(FIELD_RTL),
            font: config
                .string(FIELD_FONT_NAME)
                .map_err(proto_err("fields"))?
                .filter(|s| !s.is_empty()),
            font_size: config
                .uint(FIELD_FONT_SIZE)
                .map(|s| s as u32)
                .filter(|s| *s > 0),
        };
        fields.entry(row.int(0)?).or_default().push(field);
    }

    let mut templates: BTreeMap<ModelId, Vec<Template>> = BTreeMap::new();
    for row in db.query("SELECT ntid, ord, name, config FROM templates ORDER BY ntid, ord")? {
        let config = row.blob(3)?;
        let config = Message::parse(&config).map_err(proto_err("templates"))?;
        let template = Template {
            name: row.text(2)?,
            ordinal: u32_column(row.int(1)?, "template ordinal")?,
            front: config
                .string(TEMPLATE_QUESTION)
                .map_err(proto_err("templates"))?
                .unwrap_or_default(),
            back: config
                .string(TEMPLATE_ANSWER)
                .map_err(proto_err("templates"))?
                .unwrap_or_default(),
        };
        templates.entry(row.int(0)?).or_default().push(template);
    }

    let mut models = Vec::new();
    for row in db.query("SELECT id, name, config FROM notetypes ORDER BY id")? {
        let id = row.int(0)?;
        let config = row.blob(2)?;
        let config = Message::parse(&config).map_err(proto_err("notetypes"))?;
        let kind = match config.uint(NOTETYPE_KIND) {
            Some(1) => ModelKind::Cloze,
            _ => ModelKind::Standard,
        };
        models.push(Model {
            id,
            name: row.text(1)?,
            kind,
            fields: fields.remove(&id).unwrap_or_default(),
            templates: templates.remove(&id).unwrap_or_default(),
            css: config
                .string(NOTETYPE_CSS)
                .map_err(proto_err("notetypes"))?
                .unwrap_or_default(),
        });
    }
    Ok(models)
}

pub fn read_decks(db: &Database) -> Result<Vec<Deck>, PackageError> {
    let mut decks = Vec::new();
    for row in db.query("SELECT id, name, kind FROM decks ORDER BY id")? {
        let kind = row.blob(2)?;
        let kind = Message::parse(&kind).map_err(proto_err("decks"))?;
        let description = match kind.bytes(DECK_KIND_NORMAL) {
            Some(normal) => Message::parse(normal)
                .and_then(|normal| normal.string(DECK_NORMAL_DESCRIPTION))
                .map_err(proto_err("decks"))?
                .unwrap_or_default(),
            None => String::new(),
        };
        decks.push(Deck {
            id: row.int(0)?,
            name: row
                .text(1)?
                .split(DECK_LEVEL_SEPARATOR)
                .collect::<Vec<_>>()
                .join("::"),
            description,
        });
    }
    Ok(decks)
}
