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

//! Older schemas store every note type and deck as one JSON blob each in the
//! single row of the `col` table.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::db::Database;
use crate::package::PackageError;
use crate::types::model::Deck;
use crate::types::model::FieldDef;
use crate::types::model::Model;
use crate::types::model::ModelKind;
use crate::types::model::Template;

#[derive(Debug, Deserialize)]
struct LegacyModel {
    name: String,
    #[serde(rename = "type", default)]
    kind: i64,
    #[serde(default)]
    flds: Vec<LegacyField>,
    #[serde(default)]
    tmpls: Vec<LegacyTemplate>,
    #[serde(default)]
    css: String,
}

#[derive(Debug, Deserialize)]
struct LegacyField {
    name: String,
    ord: u32,
    #[serde(default)]
    sticky: bool,
    #[serde(default)]
    rtl: bool,
    font: Option<String>,
    size: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct LegacyTemplate {
    name: String,
    ord: u32,
    #[serde(default)]
    qfmt: String,
    #[serde(default)]
    afmt: String,
}

#[derive(Debug, Deserialize)]
struct LegacyDeck {
    name: String,
    #[serde(default)]
    desc: String,
}

fn parse_id(key: &str) -> Result<i64, PackageError> {
    key.parse()
        .map_err(|_| PackageError::UnsupportedFormat(format!("invalid object id '{key}'")))
}

fn parse_models(json: &str) -> Result<Vec<Model>, PackageError> {
    let raw: BTreeMap<String, LegacyModel> = serde_json::from_str(json)
        .map_err(|e| PackageError::UnsupportedFormat(format!("note types: {e}")))?;
    let mut models = Vec::with_capacity(raw.len());
    for (key, model) in raw {
        let mut fields: Vec<FieldDef> = model
            .flds
            .into_iter()
            .map(|f| FieldDef {
                name: f.name,
                ordinal: f.ord,
                sticky: f.sticky,
                rtl: f.rtl,
                font: f.font.filter(|s| !s.is_empty()),
                font_size: f.size.map(|s| s as u32),
            })
            .collect();
        fields.sort_by_key(|f| f.ordinal);
        let mut templates: Vec<Template> = model
            .tmpls
            .into_iter()
            .map(|t| Template {
                name: t.name,
                ordinal: t.ord,
                front: t.qfmt,
                back: t.afmt,
            })
            .collect();
        templates.sort_by_key(|t| t.ordinal);
        models.push(Model {
            id: parse_id(&key)?,
            name: model.name,
            kind: if model.kind == 1 {
                ModelKind::Cloze
            } else {
                ModelKind::Standard
            },
            fields,
            templates,
            css: model.css,
        });
    }
    models.sort_by_key(|m| m.id);
    Ok(models)
}

fn parse_decks(json: &str) -> Result<Vec<Deck>, PackageError> {
    let raw: BTreeMap<String, LegacyDeck> = serde_json::from_str(json)
        .map_err(|e| PackageError::UnsupportedFormat(format!("decks: {e}")))?;
    let mut decks = raw
        .into_iter()
        .map(|(key, deck)| {
            Ok(Deck {
                id: parse_id(&key)?,
                name: deck.name,
                description: deck.desc,
            })
        })
        .collect::<Result<Vec<_>, PackageError>>()?;
    decks.sort_by_key(|d| d.id);
    Ok(decks)
}

/// Read note types and decks from the `col` row.
pub fn read_models_and_decks(db: &Database) -> Result<(Vec<Model>, Vec<Deck>), PackageError> {
    let rows = db.query("SELECT models, decks FROM col LIMIT 1")?;
    let row = rows
        .first()
        .ok_or_else(|| PackageError::UnsupportedFormat("empty col table".to_string()))?;
    let models = parse_models(&row.text(0)?)?;
    let decks = parse_decks(&row.text(1)?)?;
    Ok((models, decks))
}
