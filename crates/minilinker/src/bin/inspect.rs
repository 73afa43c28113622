//! CLI inspector for ELF64 shared objects.
//!
//! `info` parses an object and prints its header, program headers, and
//! sections without touching the address space; `load` drives the full
//! open/lookup/close cycle through the loader.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use minilinker::{DynamicLinker, ElfImage, RTLD_NOW};

/// Inspection tooling for the minilinker loader.
#[derive(Debug, Parser)]
#[command(name = "minilinker-inspect")]
#[command(about = "Inspect and load ELF64 shared objects")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse an object and print its structure. Pure parse; nothing is
    /// mapped beyond a read-only file view.
    Info {
        /// Path to the ELF object.
        path: PathBuf,
        /// Emit the summary as JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Load an object, optionally resolve symbols, then close it.
    /// Constructors and destructors of the object run.
    Load {
        /// Path to the ELF object.
        path: PathBuf,
        /// Symbols to resolve after loading.
        #[arg(long = "symbol")]
        symbols: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Info { path, json } => {
            let image = match ElfImage::open(&path) {
                Ok(image) => image,
                Err(err) => {
                    eprintln!("{}: {err}", path.display());
                    return ExitCode::FAILURE;
                }
            };
            let summary = image.summary();
            if json {
                match serde_json::to_string_pretty(&summary) {
                    Ok(rendered) => println!("{rendered}"),
                    Err(err) => {
                        eprintln!("serialize: {err}");
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                print!("{summary}");
            }
            ExitCode::SUCCESS
        }
        Command::Load { path, symbols } => {
            let mut linker = DynamicLinker::new();
            let Some(handle) = linker.open(&path, RTLD_NOW) else {
                let err = linker.last_error().unwrap_or_else(|| "unknown error".into());
                eprintln!("{}: {err}", path.display());
                return ExitCode::FAILURE;
            };

            let so = linker
                .images()
                .find(|so| so.handle() == handle.raw())
                .expect("freshly opened image is resident");
            println!(
                "loaded {} at base {:#x} (bias {:#x}, {:#x} bytes)",
                so.name(),
                so.base(),
                so.load_bias(),
                so.size()
            );

            let mut missing = 0;
            for name in &symbols {
                match linker.lookup(handle, name) {
                    Some(addr) => println!("  {name} = {addr:#x}"),
                    None => {
                        let err = linker.last_error().unwrap_or_default();
                        println!("  {name}: {err}");
                        missing += 1;
                    }
                }
            }

            linker.close(handle);
            if missing == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
