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
use std::path::Path;

use cardport_core::error::Fallible;
use cardport_core::package::Package;
use cardport_core::sides::resolve_sides;
use cardport_core::types::model::ModelKind;

pub fn inspect_package(path: &Path) -> Fallible<()> {
    let package = Package::open(path)?;
    print!("{}", describe(&package));
    Ok(())
}

fn describe(package: &Package) -> String {
    let metadata = package.metadata();
    let mut out = format!(
        "Format: {:?} ({})\nNotes: {}\nCards: {}\nMedia files: {}\n",
        metadata.variant,
        metadata.database_name,
        package.notes().len(),
        package.cards().len(),
        package.media_index().len()
    );

    let mut notes_per_deck: BTreeMap<&str, usize> = BTreeMap::new();
    for note in package.notes() {
        if let Some(deck) = package.deck_for_note(note.id) {
            *notes_per_deck.entry(deck.name.as_str()).or_default() += 1;
        }
    }
    out.push_str("\nDecks:\n");
    for deck in package.decks() {
        let notes = notes_per_deck.get(deck.name.as_str()).copied().unwrap_or(0);
        out.push_str(&format!("  {} ({notes} notes)\n", deck.name));
    }

    out.push_str("\nModels:\n");
    for model in package.models() {
        let kind = match model.kind {
            ModelKind::Standard => "standard",
            ModelKind::Cloze => "cloze",
        };
        out.push_str(&format!(
            "  {} ({kind}, {} templates)\n",
            model.name,
            model.templates.len()
        ));
        let sides = resolve_sides(model);
        for field in &model.fields {
            let placement = sides.placement(&field.name);
            out.push_str(&format!(
                "    {}: {} ({})\n",
                field.name, placement.side, placement.confidence
            ));
        }
    }
    out
}
