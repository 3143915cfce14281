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


//! Writes each stored deck as a Markdown deck file: TOML frontmatter naming
//! the deck, then one `Q:`/`A:` or `C:` block per card.

use std::fs::create_dir_all;
use std::fs::write;
use std::path::Path;
use std::path::PathBuf;

use serde::Serialize;

use cardport_core::builder::DeckRecord;
use cardport_core::error::ErrorReport;
use cardport_core::error::Fallible;
use cardport_core::media::processor::deck_slug;
use cardport_core::types::card::CardKind;

use crate::store::SqliteDeckStore;
use crate::store::StoredCard;

#[derive(Serialize)]
struct DeckMetadata<'a> {
    name: &'a str,
}

/// Write one `<deck-slug>.md` per deck into `output`. Returns the paths
/// written.
pub fn export_decks(store: &SqliteDeckStore, output: &Path) -> Fallible<Vec<PathBuf>> {
    create_dir_all(output)?;
    let mut written = Vec::new();
    for deck in store.decks()? {
        let cards = store.cards_in_deck(deck.id)?;
        if cards.is_empty() {
            continue;
        }
        let path = output.join(format!("{}.md", deck_slug(&deck.name)));
        write(&path, render_deck(&deck, &cards)?)?;
        log::info!("Wrote {} cards to {}.", cards.len(), path.display());
        written.push(path);
    }
    Ok(written)
}

fn render_deck(deck: &DeckRecord, cards: &[StoredCard]) -> Fallible<String> {
    let header = toml::to_string(&DeckMetadata { name: &deck.name })
        .map_err(|e| ErrorReport::new(format!("Failed to write deck metadata: {e}")))?;
    let mut out = format!("---\n{header}---\n");
    for card in cards {
        out.push('\n');
        match card.kind {
            CardKind::Basic => {
                out.push_str(&format!("Q: {}\n", escape(&card.front)));
                out.push_str(&format!("A: {}\n", escape(&card.back)));
            }
            CardKind::Cloze => {
                out.push_str(&format!("C: {}\n", escape(&cloze_text(card))));
            }
        }
    }
    Ok(out)
}

/// A cloze card's full text: the back repeats the front plus any extra.
fn cloze_text(card: &StoredCard) -> String {
    if card.back.is_empty() || card.back == card.front {
        card.front.clone()
    } else if card.back.starts_with(&card.front) {
        card.back.clone()
    } else {
        format!("{}\n\n{}", card.front, card.back)
    }
}

/// Keep content lines from being read as card markers.
fn escape(content: &str) -> String {
    content
        .lines()
        .map(|line| {
            if line.trim() == "---" {
                "***".to_string()
            } else if ["Q:", "A:", "C:"].iter().any(|m| line.starts_with(m)) {
                format!("\\{line}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
