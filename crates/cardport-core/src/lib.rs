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


//! cardport-core: importing Anki packages.
//!
//! - Reading `.apkg`/`.colpkg` archives of every schema version
//! - Working out which card face each field belongs on
//! - Converting field HTML to Markdown
//! - Storing referenced media once per distinct content

pub mod builder;
pub mod convert;
pub mod db;
pub mod error;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
#[cfg(test)]
mod helper;
pub mod import;
pub mod media;
pub mod package;
pub mod sides;
pub mod types;

// Re-exports for convenience
pub use builder::{DeckRecord, DeckStore, MemoryDeckStore, StoreError};
pub use convert::{ConversionConfig, ConversionResult, convert};
pub use error::{ErrorReport, Fallible, fail};
pub use import::{Cancellation, ImportConfig, ImportResult, Importer, Progress, ProgressSink};
pub use media::processor::MediaError;
pub use media::store::{FsMediaStore, MediaStore, MemoryMediaStore};
pub use package::{MediaSource, Package, PackageError};
pub use sides::{FieldSideMap, SideCache, resolve_sides};
pub use types::card::{Card, CardId, CardKind};
pub use types::timestamp::Timestamp;
