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
use std::fs::create_dir_all;
use std::path::Component;
use std::path::PathBuf;

use crate::error::Fallible;
use crate::error::fail;

/// Where imported media files land. Paths are relative to the store root and
/// always use `/` as the separator.
pub trait MediaStore {
    fn write(&mut self, path: &str, bytes: &[u8]) -> Fallible<()>;

    fn exists(&self, path: &str) -> bool;

    /// Read a file back, or `None` if it is not there.
    fn read(&self, path: &str) -> Fallible<Option<Vec<u8>>>;
}

/// Errors that can occur when validating a store path.
#[derive(Debug, PartialEq)]
pub enum StorePathError {
    /// Path is the empty string.
    Empty,
    /// Path is absolute.
    Absolute,
    /// Path contains parent (`..`) components.
    ParentComponent,
    /// Path points to a symbolic link.
    SymbolicLink,
}

impl std::fmt::Display for StorePathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            StorePathError::Empty => "path is the empty string.",
            StorePathError::Absolute => "absolute paths are not allowed in the media store.",
            StorePathError::ParentComponent => "path has a parent component.",
            StorePathError::SymbolicLink => "path points to a symbolic link.",
        };
        write!(f, "{msg}")
    }
}

/// A media store rooted at a directory on disk.
///
/// Paths come from archive entries, so they are untrusted: anything that
/// could escape the root is rejected before touching the filesystem.
pub struct FsMediaStore {
    /// Absolute path to the store root directory.
    root: PathBuf,
}

impl FsMediaStore {
    pub fn new(root: PathBuf) -> Fallible<Self> {
        create_dir_all(&root)?;
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    /// Map a store path onto the filesystem.
    pub fn validate(&self, path: &str) -> Result<PathBuf, StorePathError> {
        if path.trim().is_empty() {
            return Err(StorePathError::Empty);
        }
        let rel = PathBuf::from(path);
        if rel.components().any(|c| c == Component::ParentDir) {
            return Err(StorePathError::ParentComponent);
        }
        if rel.is_absolute() || rel.has_root() {
            return Err(StorePathError::Absolute);
        }
        let full = self.root.join(rel);
        if full.is_symlink() {
            return Err(StorePathError::SymbolicLink);
        }
        Ok(full)
    }

    fn resolve(&self, path: &str) -> Fallible<PathBuf> {
        match self.validate(path) {
            Ok(full) => Ok(full),
            Err(e) => fail(format!("invalid media store path '{path}': {e}")),
        }
    }
}

impl MediaStore for FsMediaStore {
    fn write(&mut self, path: &str, bytes: &[u8]) -> Fallible<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            create_dir_all(parent)?;
        }
        std::fs::write(&full, bytes)?;
        log::debug!("Wrote {} bytes to {}.", bytes.len(), full.display());
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.validate(path).map(|full| full.is_file()).unwrap_or(false)
    }

    fn read(&self, path: &str) -> Fallible<Option<Vec<u8>>> {
        let full = self.resolve(path)?;
        if !full.is_file() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(full)?))
    }
}

/// Keeps files in memory.
#[derive(Debug, Default)]
pub struct MemoryMediaStore {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl MediaStore for MemoryMediaStore {
    fn write(&mut self, path: &str, bytes: &[u8]) -> Fallible<()> {
        self.files.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    fn read(&self, path: &str) -> Fallible<Option<Vec<u8>>> {
        Ok(self.files.get(path).cloned())
    }
}
