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

//! Infers which face of a card each field belongs on by scanning the model's
//! templates for placeholders.

use std::collections::BTreeMap;
use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::model::Model;
use crate::types::model::ModelId;
use crate::types::side::Confidence;
use crate::types::side::FieldPlacement;
use crate::types::side::Side;

/// `{{...}}` and `{{{...}}}` placeholders.
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\{?([^{}]+?)\}?\}\}").expect("placeholder pattern to compile")
});

/// Tokens the renderer fills in itself. They shadow note fields.
const SPECIAL_TOKENS: [&str; 7] = [
    "FrontSide",
    "Tags",
    "Deck",
    "Subdeck",
    "Type",
    "Card",
    "CardFlag",
];

/// How a placeholder mentions a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mention {
    /// Rendered directly, possibly through filters.
    Direct,
    /// Opens a conditional section (`{{#F}}` or `{{^F}}`).
    Conditional,
}

/// Extract field mentions from one piece of template markup.
fn mentions(markup: &str) -> Vec<(&str, Mention)> {
    let mut out = Vec::new();
    for caps in PLACEHOLDER.captures_iter(markup) {
        let Some(inner) = caps.get(1) else {
            continue;
        };
        let inner = inner.as_str().trim();
        let (name, mention) = if let Some(rest) = inner.strip_prefix(['#', '^']) {
            (rest.trim(), Mention::Conditional)
        } else if inner.starts_with(['/', '!']) {
            continue;
        } else {
            // Filters come first: `{{cloze:Text}}`, `{{tts en_US:Field}}`.
            let name = inner.rsplit(':').next().unwrap_or(inner);
            (name.trim(), Mention::Direct)
        };
        if name.is_empty() || SPECIAL_TOKENS.contains(&name) {
            continue;
        }
        out.push((name, mention));
    }
    out
}

#[derive(Debug, Default, Clone, Copy)]
struct Seen {
    direct_front: bool,
    direct_back: bool,
    cond_front: bool,
    cond_back: bool,
}

impl Seen {
    fn placement(self) -> FieldPlacement {
        let front = self.direct_front || self.cond_front;
        let back = self.direct_back || self.cond_back;
        let side = match (front, back) {
            (true, true) => Side::Both,
            (true, false) => Side::Front,
            _ => Side::Back,
        };
        let confidence = if self.direct_front || self.direct_back {
            Confidence::High
        } else if front || back {
            Confidence::Medium
        } else {
            Confidence::Low
        };
        FieldPlacement { side, confidence }
    }
}

/// Side placement of every field of one model.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSideMap {
    pub model_id: ModelId,
    placements: BTreeMap<String, FieldPlacement>,
}

impl FieldSideMap {
    /// Placement of a field. Names the model does not define fall back to
    /// the back with low confidence.
    pub fn placement(&self, field: &str) -> FieldPlacement {
        self.placements
            .get(field)
            .copied()
            .unwrap_or(FieldPlacement {
                side: Side::Back,
                confidence: Confidence::Low,
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldPlacement)> {
        self.placements.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Fields no template mentions.
    pub fn low_confidence(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, p)| p.confidence == Confidence::Low)
            .map(|(name, _)| name)
            .collect()
    }
}

/// Resolve the side of every field of a model.
pub fn resolve_sides(model: &Model) -> FieldSideMap {
    let mut seen: BTreeMap<&str, Seen> = model
        .field_names()
        .map(|name| (name, Seen::default()))
        .collect();
    for template in &model.templates {
        for (name, mention) in mentions(&template.front) {
            if let Some(s) = seen.get_mut(name) {
                match mention {
                    Mention::Direct => s.direct_front = true,
                    Mention::Conditional => s.cond_front = true,
                }
            }
        }
        for (name, mention) in mentions(&template.back) {
            if let Some(s) = seen.get_mut(name) {
                match mention {
                    Mention::Direct => s.direct_back = true,
                    Mention::Conditional => s.cond_back = true,
                }
            }
        }
    }
    let placements = seen
        .into_iter()
        .map(|(name, s)| (name.to_string(), s.placement()))
        .collect();
    let map = FieldSideMap {
        model_id: model.id,
        placements,
    };
    log::debug!(
        "Resolved sides for model '{}': {}",
        model.name,
        map.iter()
            .map(|(name, p)| format!("{name}={}/{}", p.side, p.confidence))
            .collect::<Vec<_>>()
            .join(", ")
    );
    map
}

/// Side maps keyed by model id, computed once per model.
#[derive(Debug, Default)]
pub struct SideCache {
    maps: HashMap<ModelId, FieldSideMap>,
}

impl SideCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_resolve(&mut self, model: &Model) -> &FieldSideMap {
        self.maps
            .entry(model.id)
            .or_insert_with(|| resolve_sides(model))
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::model::FieldDef;
    use crate::types::model::ModelKind;
    use crate::types::model::Template;

    fn model(fields: &[&str], templates: &[(&str, &str)]) -> Model {
        Model {
            id: 7,
            name: "Test".to_string(),
            kind: ModelKind::Standard,
            fields: fields
                .iter()
                .enumerate()
                .map(|(i, n)| FieldDef::new(*n, i as u32))
                .collect(),
            templates: templates
                .iter()
                .enumerate()
                .map(|(i, (front, back))| Template {
                    name: format!("Card {}", i + 1),
                    ordinal: i as u32,
                    front: front.to_string(),
                    back: back.to_string(),
                })
                .collect(),
            css: String::new(),
        }
    }

    fn placement(side: Side, confidence: Confidence) -> FieldPlacement {
        FieldPlacement { side, confidence }
    }

    #[test]
    fn test_question_both_answer_back() {
        let m = model(
            &["Question", "Answer"],
            &[("{{Question}}", "{{Question}}<hr>{{Answer}}")],
        );
        let map = resolve_sides(&m);
        assert_eq!(
            map.placement("Question"),
            placement(Side::Both, Confidence::High)
        );
        assert_eq!(
            map.placement("Answer"),
            placement(Side::Back, Confidence::High)
        );
    }

    #[test]
    fn test_front_side_is_not_a_field() {
        let m = model(
            &["Front", "Back"],
            &[("{{Front}}", "{{FrontSide}}<hr id=answer>{{Back}}")],
        );
        let map = resolve_sides(&m);
        assert_eq!(map.placement("Front").side, Side::Front);
        assert_eq!(map.placement("Back").side, Side::Back);
    }

    #[test]
    fn test_filters_and_triple_braces() {
        let m = model(
            &["Text", "Extra", "Audio", "Typed"],
            &[(
                "{{cloze:Text}} {{tts en_US:Audio}} {{type:Typed}}",
                "{{cloze:Text}}<br>{{{Extra}}}",
            )],
        );
        let map = resolve_sides(&m);
        assert_eq!(map.placement("Text").side, Side::Both);
        assert_eq!(map.placement("Audio").side, Side::Front);
        assert_eq!(map.placement("Typed").side, Side::Front);
        assert_eq!(
            map.placement("Extra"),
            placement(Side::Back, Confidence::High)
        );
    }

    #[test]
    fn test_conditional_only_is_medium() {
        let m = model(
            &["Front", "Hint"],
            &[("{{Front}}{{#Hint}}(has hint){{/Hint}}", "{{FrontSide}}")],
        );
        let map = resolve_sides(&m);
        assert_eq!(
            map.placement("Hint"),
            placement(Side::Front, Confidence::Medium)
        );
    }

    #[test]
    fn test_conditional_and_direct_faces_combine() {
        let m = model(
            &["Front", "Hint"],
            &[("{{Front}}{{#Hint}}[hint]{{/Hint}}", "{{Hint}}")],
        );
        let map = resolve_sides(&m);
        assert_eq!(
            map.placement("Hint"),
            placement(Side::Both, Confidence::High)
        );
    }

    #[test]
    fn test_inverted_section_counts_as_a_mention() {
        let m = model(
            &["Front", "Note"],
            &[("{{Front}}", "{{^Note}}-{{/Note}}")],
        );
        let map = resolve_sides(&m);
        assert_eq!(
            map.placement("Note"),
            placement(Side::Back, Confidence::Medium)
        );
    }

    #[test]
    fn test_faces_differ_across_templates() {
        let m = model(
            &["Word", "Meaning"],
            &[("{{Word}}", "{{Meaning}}"), ("{{Meaning}}", "{{Word}}")],
        );
        let map = resolve_sides(&m);
        assert_eq!(map.placement("Word").side, Side::Both);
        assert_eq!(map.placement("Meaning").side, Side::Both);
    }

    #[test]
    fn test_unreferenced_field_is_low_confidence_back() {
        let m = model(&["Front", "Back", "Source"], &[("{{Front}}", "{{Back}}")]);
        let map = resolve_sides(&m);
        assert_eq!(
            map.placement("Source"),
            placement(Side::Back, Confidence::Low)
        );
        assert_eq!(map.low_confidence(), vec!["Source"]);
    }

    #[test]
    fn test_cache_resolves_once_per_model() {
        let m = model(&["Front"], &[("{{Front}}", "")]);
        let mut cache = SideCache::new();
        assert!(cache.is_empty());
        let first = cache.get_or_resolve(&m).clone();
        let second = cache.get_or_resolve(&m).clone();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }
}
