// Copyright 2024 Kevin Ludwig
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

//! Command-line image formatter for the PlayStation 2 memory card filesystem.

use std::fs::OpenOptions;
use std::process::ExitCode;

use clap::Parser;
use vmc_ds::Storage;
use vmc_ds_std::FileStorage;
use vmc_fs_vmc::{card_flags, format_empty_image, DEFAULT_SUPERBLOCK};

/// Formats a new PlayStation 2 memory card image.
#[derive(Parser)]
#[command(name = "vmc-mkfs", version, about)]
struct Args {
    /// Path of the image file to create (overwritten if it already exists).
    #[arg(short, long)]
    output: String,

    /// Card capacity in megabytes. Only the original 8 MiB geometry is supported.
    #[arg(short, long, default_value_t = 8)]
    size: u32,

    /// Format the image with a 16-byte-per-page ECC spare area.
    #[arg(short, long)]
    ecc: bool,

    /// Increase log verbosity; repeat for more detail.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    if args.size != 8 {
        log::error!("unsupported card size {} MiB; only 8 MiB is supported", args.size);
        return ExitCode::FAILURE;
    }

    let mut superblock = DEFAULT_SUPERBLOCK;
    if args.ecc {
        superblock.card_flags |= card_flags::USE_ECC;
    }

    let len = superblock.clusters_per_card.get() as u64 * superblock.cluster_physical_size() as u64;

    let file = match OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&args.output) {
        Ok(file) => file,
        Err(err) => {
            log::error!("failed to create {}: {err}", args.output);
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = file.set_len(len) {
        log::error!("failed to size {}: {err}", args.output);
        return ExitCode::FAILURE;
    }

    let mut storage = match FileStorage::open(file) {
        Ok(storage) => storage,
        Err(err) => {
            log::error!("failed to open {}: {err}", args.output);
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = format_empty_image(&superblock, &mut storage) {
        log::error!("failed to format {}: {err}", args.output);
        return ExitCode::FAILURE;
    }

    log::info!("formatted {} ({len} bytes, ecc={})", args.output, superblock.uses_ecc());
    ExitCode::SUCCESS
}
