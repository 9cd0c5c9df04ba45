//! Prints the comparison form of an HTML document, for checking why two captures differ.

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

/// Prints the normalized text used for change detection.
#[derive(Parser, Debug)]
#[command(name = "normalize_dump", version)]
struct Args {
    /// HTML file to normalize; stdin when omitted or `-`
    input: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let bytes = match args.input.as_deref() {
        Some(path) if path.as_os_str() != "-" => {
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?
        }
        _ => {
            let mut buf = Vec::new();
            io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
    };
    println!("{}", sitesnap::normalize(&String::from_utf8_lossy(&bytes)));
    Ok(())
}
