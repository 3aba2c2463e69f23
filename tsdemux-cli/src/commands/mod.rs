//! Subcommand implementations

pub mod extract;
pub mod inspect;
pub mod scan;

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, Read};

/// Read the whole input; `-` means stdin
pub(crate) fn read_input(input: &str) -> Result<Vec<u8>> {
    if input == "-" {
        let mut buf = Vec::new();
        io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read stdin")?;
        Ok(buf)
    } else {
        std::fs::read(input).with_context(|| format!("Failed to read input file: {}", input))
    }
}

/// Open the input for streaming; `-` means stdin
pub(crate) fn open_input(input: &str) -> Result<Box<dyn Read>> {
    if input == "-" {
        Ok(Box::new(io::stdin().lock()))
    } else {
        let file =
            File::open(input).with_context(|| format!("Failed to open input file: {}", input))?;
        Ok(Box::new(io::BufReader::new(file)))
    }
}
