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


use std::fs::read_to_string;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Deserializer;
use serde::de::Error as _;

use cardport_core::convert::ConversionConfig;
use cardport_core::convert::cloze::ClozeMarkerFormat;
use cardport_core::error::ErrorReport;
use cardport_core::error::Fallible;
use cardport_core::import::ImportConfig;

pub const DEFAULT_OUTPUT: &str = "cardport-out";

/// Settings read from a TOML file. Command-line flags take precedence.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub output: Option<PathBuf>,
    pub deck: Option<String>,
    pub skip_existing: bool,
    pub create_if_missing: Option<bool>,
    /// Keys given in `[conversion]` override the deck file defaults one by
    /// one, including inside nested tables.
    #[serde(deserialize_with = "conversion_over_deck_format")]
    pub conversion: ConversionConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output: None,
            deck: None,
            skip_existing: false,
            create_if_missing: None,
            conversion: deck_file_conversion(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Fallible<Self> {
        let text = read_to_string(path)?;
        Self::parse(&text).map_err(|e| {
            ErrorReport::new(format!("Failed to parse {}: {}", path.display(), e.message()))
        })
    }

    pub fn parse(text: &str) -> Fallible<Self> {
        toml::from_str(text).map_err(|e| ErrorReport::new(e.to_string()))
    }

    pub fn output(&self, flag: Option<&Path>) -> PathBuf {
        flag.map(Path::to_path_buf)
            .or_else(|| self.output.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT))
    }

    /// The import configuration for one package.
    pub fn import_config(
        &self,
        package_path: &Path,
        deck: Option<&str>,
        skip_existing: bool,
        no_create: bool,
    ) -> ImportConfig {
        ImportConfig {
            package_path: package_path.to_path_buf(),
            conversion: self.conversion.clone(),
            skip_existing: skip_existing || self.skip_existing,
            create_if_missing: !no_create && self.create_if_missing.unwrap_or(true),
            deck_name: deck.map(str::to_string).or_else(|| self.deck.clone()),
        }
    }
}

/// Conversion settings matching the deck file format: cloze deletions are
/// written as `[text]`.
pub fn deck_file_conversion() -> ConversionConfig {
    ConversionConfig {
        cloze: ClozeMarkerFormat {
            marker: "[{text}]".to_string(),
            hinted_marker: "[{text}]".to_string(),
        },
        ..ConversionConfig::default()
    }
}

fn conversion_over_deck_format<'de, D>(deserializer: D) -> Result<ConversionConfig, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = toml::Table::deserialize(deserializer)?;
    let mut base = match toml::Value::try_from(deck_file_conversion()).map_err(D::Error::custom)? {
        toml::Value::Table(table) => table,
        _ => return Err(D::Error::custom("conversion settings are not a table")),
    };
    merge_tables(&mut base, overrides);
    toml::Value::Table(base)
        .try_into()
        .map_err(D::Error::custom)
}

fn merge_tables(base: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match value {
            toml::Value::Table(nested) if base.get(&key).is_some_and(toml::Value::is_table) => {
                if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                    merge_tables(existing, nested);
                }
            }
            value => {
                base.insert(key, value);
            }
        }
    }
}
