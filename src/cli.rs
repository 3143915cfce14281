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


use std::path::PathBuf;

use clap::Parser;
use env_logger::Env;

use crate::cmd::import::ImportOptions;
use crate::cmd::import::import_packages;
use crate::cmd::inspect::inspect_package;
use cardport_core::error::Fallible;

#[derive(Parser)]
#[command(version, about, long_about = None)]
enum Command {
    /// Import Anki packages into Markdown decks.
    Import {
        /// Path to an .apkg/.colpkg file, or a directory to search for them.
        path: PathBuf,
        /// Directory for the deck database, deck files and media. By default, `cardport-out`.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Import every note into this deck instead of the package's decks.
        #[arg(long)]
        deck: Option<String>,
        /// Path to a TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Leave notes that were imported before untouched.
        #[arg(long)]
        skip_existing: bool,
        /// Fail notes whose deck does not exist instead of creating it.
        #[arg(long)]
        no_create: bool,
        /// Log debugging output.
        #[arg(long, short)]
        verbose: bool,
    },
    /// Print what a package contains and where each field would be shown.
    Inspect {
        /// Path to the package file.
        path: PathBuf,
        /// Log debugging output.
        #[arg(long, short)]
        verbose: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(default))
        .format_timestamp(None)
        .try_init();
}

pub fn entrypoint() -> Fallible<()> {
    let cli: Command = Command::parse();
    match cli {
        Command::Import {
            path,
            output,
            deck,
            config,
            skip_existing,
            no_create,
            verbose,
        } => {
            init_logging(verbose);
            let options = ImportOptions {
                path,
                output,
                deck,
                config,
                skip_existing,
                no_create,
            };
            import_packages(&options)
        }
        Command::Inspect { path, verbose } => {
            init_logging(verbose);
            inspect_package(&path)
        }
    }
}
