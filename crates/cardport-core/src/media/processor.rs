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
use std::fmt::Display;
use std::fmt::Formatter;

use serde::Serialize;

use crate::convert::media::MediaReference;
use crate::error::Fallible;
use crate::media::manifest::ManifestEntry;
use crate::media::manifest::MediaManifest;
use crate::media::resolve::ResolveError;
use crate::media::resolve::resolve_name;
use crate::media::store::MediaStore;
use crate::package::MediaSource;
use crate::types::card::CardId;
use crate::types::content_hash::BlobDigest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The reference is left unresolved; the card is still imported.
    Warning,
    Error,
}

/// A media file that could not be stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaError {
    pub file_name: String,
    pub card_id: Option<CardId>,
    pub message: String,
    pub severity: Severity,
}

impl Display for MediaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.card_id {
            Some(card) => write!(f, "{} (card {card}): {}", self.file_name, self.message),
            None => write!(f, "{}: {}", self.file_name, self.message),
        }
    }
}

impl std::error::Error for MediaError {}

/// Result of storing the media of one card.
#[derive(Debug, Default)]
pub struct ProcessedMedia {
    /// Reference id to store path, for every reference that resolved.
    pub paths: BTreeMap<usize, String>,
    pub errors: Vec<MediaError>,
}

/// Copies referenced media out of a package into a store, once per distinct
/// content.
pub struct MediaProcessor<'s> {
    store: &'s mut dyn MediaStore,
    /// Manifests by deck slug, loaded on first use.
    manifests: BTreeMap<String, MediaManifest>,
    files_written: usize,
    bytes_written: u64,
}

impl<'s> MediaProcessor<'s> {
    pub fn new(store: &'s mut dyn MediaStore) -> Self {
        Self {
            store,
            manifests: BTreeMap::new(),
            files_written: 0,
            bytes_written: 0,
        }
    }

    /// Store every reference of `card` under the deck's directory.
    pub fn process(
        &mut self,
        source: &dyn MediaSource,
        deck_name: &str,
        card: CardId,
        references: &[MediaReference],
    ) -> ProcessedMedia {
        let mut out = ProcessedMedia::default();
        if references.is_empty() {
            return out;
        }
        let slug = deck_slug(deck_name);
        if !self.manifests.contains_key(&slug) {
            match MediaManifest::load(&*self.store, &slug) {
                Ok(manifest) => {
                    self.manifests.insert(slug.clone(), manifest);
                }
                Err(e) => {
                    for reference in references {
                        out.errors.push(MediaError {
                            file_name: reference.source.clone(),
                            card_id: Some(card),
                            message: format!("cannot load media manifest: {}", e.message()),
                            severity: Severity::Error,
                        });
                    }
                    return out;
                }
            }
        }
        for reference in references {
            match self.store_reference(source, &slug, card, reference) {
                Ok(Some(path)) => {
                    out.paths.insert(reference.id, path);
                }
                Ok(None) => {}
                Err(error) => {
                    log::warn!("{error}");
                    out.errors.push(error);
                }
            }
        }
        out
    }

    fn store_reference(
        &mut self,
        source: &dyn MediaSource,
        slug: &str,
        card: CardId,
        reference: &MediaReference,
    ) -> Result<Option<String>, MediaError> {
        let written_name = reference.source.as_str();
        let error = |message: String, severity: Severity| MediaError {
            file_name: written_name.to_string(),
            card_id: Some(card),
            message,
            severity,
        };
        let name = match resolve_name(source, written_name) {
            Ok(name) => name,
            Err(ResolveError::Empty) | Err(ResolveError::ExternalUrl) => return Ok(None),
            Err(e @ ResolveError::NotFound) => {
                return Err(error(e.to_string(), Severity::Warning));
            }
        };
        let bytes = match source.fetch(&name) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                return Err(error(ResolveError::NotFound.to_string(), Severity::Warning));
            }
            Err(e) => return Err(error(e.message().to_string(), Severity::Error)),
        };
        let digest = BlobDigest::of(&bytes);
        let Some(manifest) = self.manifests.get_mut(slug) else {
            return Err(error("media manifest is not loaded".to_string(), Severity::Error));
        };
        if let Some(path) = manifest.add_usage(&digest.hash, card) {
            log::debug!("Reusing {path} for {name} ({}).", digest.hash.short());
            return Ok(Some(path.to_string()));
        }
        let path = free_path(&*self.store, manifest, slug, &sanitize_file_name(&name));
        self.store
            .write(&path, &bytes)
            .map_err(|e| error(e.message().to_string(), Severity::Error))?;
        let entry = ManifestEntry {
            hash: digest.hash,
            original_name: name.clone(),
            path: path.clone(),
            kind: reference.kind,
            size: digest.size,
            cards: vec![card],
        };
        manifest
            .insert(entry)
            .map_err(|e| error(e.message().to_string(), Severity::Error))?;
        self.files_written += 1;
        self.bytes_written += digest.size;
        log::debug!("Stored {name} as {path}.");
        Ok(Some(path))
    }

    /// The manifest of a deck, if media has been processed for it.
    pub fn manifest(&self, deck_name: &str) -> Option<&MediaManifest> {
        self.manifests.get(&deck_slug(deck_name))
    }

    /// Files written by this processor.
    pub fn files_written(&self) -> usize {
        self.files_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Persist every manifest that was loaded.
    pub fn save(&mut self) -> Fallible<()> {
        for (slug, manifest) in &self.manifests {
            manifest.save(&mut *self.store, slug)?;
        }
        Ok(())
    }
}

/// The first path under the deck directory that neither the manifest nor the
/// store has claimed: `name.ext`, then `name-1.ext`, `name-2.ext` and so on.
fn free_path(
    store: &dyn MediaStore,
    manifest: &MediaManifest,
    slug: &str,
    file_name: &str,
) -> String {
    let manifest_location = MediaManifest::location(slug);
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file_name, None),
    };
    let mut n = 0usize;
    loop {
        let candidate = match (n, ext) {
            (0, _) => format!("{slug}/{file_name}"),
            (n, Some(ext)) => format!("{slug}/{stem}-{n}.{ext}"),
            (n, None) => format!("{slug}/{stem}-{n}"),
        };
        let taken = candidate == manifest_location
            || manifest.path_owner(&candidate).is_some()
            || store.exists(&candidate);
        if !taken {
            return candidate;
        }
        n += 1;
    }
}

/// Directory name for a deck: lowercase alphanumerics separated by `-`.
pub fn deck_slug(deck_name: &str) -> String {
    let mut slug = String::with_capacity(deck_name.len());
    for c in deck_name.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "default".to_string()
    } else {
        slug
    }
}

/// Reduce a package filename to a safe single path component.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            c if c.is_alphanumeric() => c,
            '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "media".to_string()
    } else {
        cleaned.to_string()
    }
}
