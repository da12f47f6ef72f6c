//! Configuration module.
//!
//! Defines the command-line interface of the `hsaco` dump tool using `clap`.

use clap::Parser;
use std::path::PathBuf;

/// Prints the contents of an AMD HSA code object.
///
/// Without a selector, every part of the object is printed.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Code object file
    pub input: PathBuf,

    /// Print the notes
    #[arg(long)]
    pub notes: bool,

    /// Print the segments
    #[arg(long)]
    pub segments: bool,

    /// Print the sections and their relocations
    #[arg(long)]
    pub sections: bool,

    /// Print all kernels and variables
    #[arg(long)]
    pub symbols: bool,

    /// Print the attributes of one symbol, e.g. `kernel` or `module::kernel`
    #[arg(long, value_name = "QUALIFIED_NAME")]
    pub symbol: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", help = "Set the logging level")]
    pub log_level: String,
}

impl Config {
    /// Whether no selector was given.
    pub fn print_all(&self) -> bool {
        !(self.notes || self.segments || self.sections || self.symbols || self.symbol.is_some())
    }
}
