//! Entry point for the hsaco dump tool.
//!
//! 1. Parse command-line arguments using `clap`.
//! 2. Install the `tracing` subscriber at the requested level.
//! 3. Load and validate the code object.
//! 4. Print the selected parts.
//!
//! Error handling is done via `anyhow`.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use hsaco::code::HexDump;
use hsaco::config::Config;
use hsaco::CodeObject;

fn main() -> Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let code = CodeObject::load_file(&config.input)
        .with_context(|| format!("failed to load {}", config.input.display()))?;
    for msg in code.diagnostics() {
        tracing::warn!("{}: {msg}", config.input.display());
    }

    let mut out = String::new();
    if config.print_all() {
        code.print(&mut out, &HexDump)?;
    } else {
        if config.notes {
            code.print_notes(&mut out)?;
        }
        if config.segments {
            code.print_segments(&mut out)?;
        }
        if config.sections {
            code.print_sections(&mut out)?;
        }
        if config.symbols {
            code.print_symbols(&mut out, &HexDump)?;
        }
        if let Some(name) = &config.symbol {
            let symbol = code
                .symbol_by_qualified_name(name)
                .map_err(|e| anyhow!("{name}: {e}"))?;
            code.print_symbol(&mut out, symbol, &HexDump)?;
        }
    }
    print!("{out}");
    Ok(())
}
