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
use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

use crate::convert::media::MediaKind;
use crate::error::Fallible;
use crate::error::fail;
use crate::media::store::MediaStore;
use crate::types::card::CardId;
use crate::types::content_hash::ContentHash;

const MANIFEST_VERSION: u32 = 1;

/// One stored media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub hash: ContentHash,
    /// The name the first importer saw for these bytes.
    pub original_name: String,
    /// Store-relative path the bytes were written to.
    pub path: String,
    pub kind: MediaKind,
    pub size: u64,
    /// Cards that reference this file, in first-use order.
    pub cards: Vec<CardId>,
}

#[derive(Serialize, Deserialize)]
struct ManifestFile {
    version: u32,
    entries: Vec<ManifestEntry>,
}

/// Record of every media file stored for a deck, keyed by content hash.
///
/// Entries are never removed or repointed: once a hash has a path, every
/// later import reuses it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaManifest {
    entries: BTreeMap<ContentHash, ManifestEntry>,
    paths: HashMap<String, ContentHash>,
}

impl MediaManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Where the manifest of a deck lives in the media store.
    pub fn location(deck_slug: &str) -> String {
        format!("{deck_slug}/manifest.json")
    }

    /// Load the deck's manifest, or start an empty one.
    pub fn load(store: &dyn MediaStore, deck_slug: &str) -> Fallible<Self> {
        let location = Self::location(deck_slug);
        let Some(bytes) = store.read(&location)? else {
            return Ok(Self::new());
        };
        let file: ManifestFile = serde_json::from_slice(&bytes)?;
        if file.version != MANIFEST_VERSION {
            return fail(format!(
                "unsupported manifest version {} in {location}",
                file.version
            ));
        }
        let mut manifest = Self::new();
        for entry in file.entries {
            manifest.insert(entry)?;
        }
        log::debug!("Loaded {} manifest entries from {location}.", manifest.len());
        Ok(manifest)
    }

    pub fn save(&self, store: &mut dyn MediaStore, deck_slug: &str) -> Fallible<()> {
        let file = ManifestFile {
            version: MANIFEST_VERSION,
            entries: self.entries.values().cloned().collect(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        store.write(&Self::location(deck_slug), &json)
    }

    pub fn get(&self, hash: &ContentHash) -> Option<&ManifestEntry> {
        self.entries.get(hash)
    }

    /// The hash stored at `path`, if any.
    pub fn path_owner(&self, path: &str) -> Option<ContentHash> {
        self.paths.get(path).copied()
    }

    /// Add a new entry. Fails if the hash or the path is already recorded.
    pub fn insert(&mut self, entry: ManifestEntry) -> Fallible<()> {
        if self.entries.contains_key(&entry.hash) {
            return fail(format!("manifest already has an entry for {}", entry.hash));
        }
        if let Some(owner) = self.paths.get(&entry.path) {
            return fail(format!(
                "manifest path '{}' already belongs to {owner}",
                entry.path
            ));
        }
        self.paths.insert(entry.path.clone(), entry.hash);
        self.entries.insert(entry.hash, entry);
        Ok(())
    }

    /// Record that `card` uses the file. Returns the stored path.
    pub fn add_usage(&mut self, hash: &ContentHash, card: CardId) -> Option<&str> {
        let entry = self.entries.get_mut(hash)?;
        if !entry.cards.contains(&card) {
            entry.cards.push(card);
        }
        Some(entry.path.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::store::MemoryMediaStore;

    fn entry(bytes: &[u8], name: &str, path: &str) -> ManifestEntry {
        ManifestEntry {
            hash: ContentHash::hash_bytes(bytes),
            original_name: name.to_string(),
            path: path.to_string(),
            kind: MediaKind::Image,
            size: bytes.len() as u64,
            cards: vec![],
        }
    }

    #[test]
    fn test_insert_and_usage() -> Fallible<()> {
        let mut manifest = MediaManifest::new();
        let e = entry(b"cat", "cat.jpg", "deck/cat.jpg");
        let hash = e.hash;
        manifest.insert(e)?;
        assert_eq!(manifest.path_owner("deck/cat.jpg"), Some(hash));
        let card = CardId::for_note(7);
        assert_eq!(manifest.add_usage(&hash, card), Some("deck/cat.jpg"));
        manifest.add_usage(&hash, card);
        assert_eq!(manifest.get(&hash).map(|e| e.cards.clone()), Some(vec![card]));
        Ok(())
    }

    #[test]
    fn test_insert_is_append_only() -> Fallible<()> {
        let mut manifest = MediaManifest::new();
        manifest.insert(entry(b"cat", "cat.jpg", "deck/cat.jpg"))?;
        assert!(manifest.insert(entry(b"cat", "kitty.jpg", "deck/kitty.jpg")).is_err());
        assert!(manifest.insert(entry(b"dog", "cat.jpg", "deck/cat.jpg")).is_err());
        assert_eq!(manifest.len(), 1);
        Ok(())
    }

    #[test]
    fn test_usage_of_unknown_hash() {
        let mut manifest = MediaManifest::new();
        let hash = ContentHash::hash_bytes(b"nothing");
        assert_eq!(manifest.add_usage(&hash, CardId::for_note(1)), None);
    }

    #[test]
    fn test_save_and_load() -> Fallible<()> {
        let mut store = MemoryMediaStore::new();
        assert!(MediaManifest::load(&store, "deck")?.is_empty());
        let mut manifest = MediaManifest::new();
        let e = entry(b"cat", "cat.jpg", "deck/cat.jpg");
        let hash = e.hash;
        manifest.insert(e)?;
        manifest.add_usage(&hash, CardId::for_note(1));
        manifest.save(&mut store, "deck")?;
        assert!(store.exists("deck/manifest.json"));
        let loaded = MediaManifest::load(&store, "deck")?;
        assert_eq!(loaded, manifest);
        Ok(())
    }

    #[test]
    fn test_unknown_version() -> Fallible<()> {
        let mut store = MemoryMediaStore::new();
        store.write("deck/manifest.json", br#"{"version": 9, "entries": []}"#)?;
        assert!(MediaManifest::load(&store, "deck").is_err());
        Ok(())
    }
}
