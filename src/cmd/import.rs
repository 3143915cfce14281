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


use std::fs::create_dir_all;
use std::path::Path;
use std::path::PathBuf;

use walkdir::WalkDir;

use cardport_core::error::ErrorReport;
use cardport_core::error::Fallible;
use cardport_core::error::fail;
use cardport_core::import::ImportResult;
use cardport_core::import::Importer;
use cardport_core::import::Progress;
use cardport_core::media::store::FsMediaStore;

use crate::config::Settings;
use crate::export::export_decks;
use crate::store::SqliteDeckStore;

/// Name of the deck database inside the output directory.
pub const DATABASE_FILE: &str = "cardport.db";

const PACKAGE_EXTENSIONS: [&str; 2] = ["apkg", "colpkg"];

/// How many warnings to print per package.
const WARNING_LIMIT: usize = 10;

pub struct ImportOptions {
    pub path: PathBuf,
    pub output: Option<PathBuf>,
    pub deck: Option<String>,
    pub config: Option<PathBuf>,
    pub skip_existing: bool,
    pub no_create: bool,
}

pub fn import_packages(options: &ImportOptions) -> Fallible<()> {
    let settings = match &options.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let output = settings.output(options.output.as_deref());
    let packages = find_packages(&options.path)?;
    if packages.is_empty() {
        return fail(format!(
            "No .apkg or .colpkg files found in {}",
            options.path.display()
        ));
    }
    create_dir_all(&output)?;
    let mut decks = SqliteDeckStore::open(&output.join(DATABASE_FILE))?;
    let mut media = FsMediaStore::new(output.clone())?;

    let mut failures = 0;
    for package in &packages {
        let config = settings.import_config(
            package,
            options.deck.as_deref(),
            options.skip_existing,
            options.no_create,
        );
        let result = Importer::new(&mut decks, &mut media)
            .with_progress(log_progress)
            .run(&config);
        print!("{}", summary(package, &result));
        if !result.success {
            failures += 1;
        }
    }

    let written = export_decks(&decks, &output)?;
    println!("Wrote {} deck files to {}.", written.len(), output.display());
    if failures > 0 {
        return fail(format!(
            "{failures} of {} packages did not import cleanly",
            packages.len()
        ));
    }
    Ok(())
}

fn log_progress(progress: &Progress) {
    match &progress.current {
        Some(item) => log::debug!("[{}] {}% {item}", progress.stage, progress.percent),
        None => log::debug!("[{}] {}%", progress.stage, progress.percent),
    }
}

/// The package at `path`, or every package file under it.
fn find_packages(path: &Path) -> Fallible<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut packages = Vec::new();
    for entry in WalkDir::new(path) {
        let entry =
            entry.map_err(|e| ErrorReport::new(format!("Failed to walk directory: {e}")))?;
        let path = entry.path();
        let is_package = path.extension().and_then(|ext| ext.to_str()).is_some_and(|ext| {
            PACKAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        });
        if path.is_file() && is_package {
            packages.push(path.to_path_buf());
        }
    }
    // Sorted so repeated runs import in the same order.
    packages.sort();
    Ok(packages)
}

fn summary(package: &Path, result: &ImportResult) -> String {
    let counts = &result.counts;
    let mut out = format!(
        "{}: imported {} of {} notes ({} skipped, {} failed), {} media files ({} bytes) in {:.2}s",
        package.display(),
        counts.imported,
        counts.total,
        counts.skipped,
        counts.failed,
        counts.media_files,
        counts.media_bytes,
        result.duration.as_secs_f64()
    );
    if result.cancelled {
        out.push_str(", cancelled");
    }
    out.push('\n');
    for error in &result.errors {
        out.push_str(&format!("  error: {error}\n"));
    }
    for error in &result.media_errors {
        out.push_str(&format!("  media: {error}\n"));
    }
    for warning in result.warnings.iter().take(WARNING_LIMIT) {
        out.push_str(&format!("  warning: {warning}\n"));
    }
    if result.warnings.len() > WARNING_LIMIT {
        out.push_str(&format!(
            "  ... and {} more warnings\n",
            result.warnings.len() - WARNING_LIMIT
        ));
    }
    out
}
