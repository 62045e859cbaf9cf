//! nhook CLI - トレーサのライブラリ機能を使った検査コマンド
//!
//! トレース自体は対象プロセス内のフックから行います。
//! このバイナリはメモリマップ・シンボル・メモリ内容をオフラインで調べるためのものです。

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nhook_core::render_hexdump;
use nhook_elf::{ModuleImage, ModuleSymbolResolver};
use nhook_target::{
    is_printable_text, search_bytes, Architecture, MapIndex, Memory, MemoryProbe, NativeArch,
    Pattern,
};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// nhook - function-level execution tracer toolkit
#[derive(Parser)]
#[command(name = "nhook")]
#[command(version = "0.1.0")]
#[command(about = "Inspect process maps, ELF symbols and memory for function tracing", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: InspectCommand,
}

#[derive(Subcommand)]
enum InspectCommand {
    /// List the mapped regions of a process
    Maps {
        /// Process ID (defaults to this process)
        #[arg(short, long)]
        pid: Option<i32>,
    },

    /// Show path, base and size of a mapped module
    Module {
        /// Library name or part of its path (e.g. libc.so)
        soname: String,

        #[arg(short, long)]
        pid: Option<i32>,
    },

    /// Resolve an address to module[offset]
    Locate {
        /// Address (hex, with or without 0x)
        #[arg(value_parser = parse_address)]
        address: u64,

        #[arg(short, long)]
        pid: Option<i32>,
    },

    /// Resolve a symbol to its runtime address in a process
    Resolve {
        /// Path to the module on disk
        #[arg(short, long)]
        module: PathBuf,

        /// Symbol name (substring match, first hit wins)
        #[arg(short, long)]
        symbol: String,

        #[arg(short, long)]
        pid: Option<i32>,
    },

    /// List symbols of an ELF file matching a pattern
    Symbols {
        file: PathBuf,

        /// Substring to match (empty lists every symbol)
        #[arg(default_value = "")]
        pattern: String,

        /// Maximum number of symbols to print
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Search a file for a hex pattern with ?? wildcards
    Search {
        file: PathBuf,

        /// Pattern such as "f4 4f ?? a9"
        pattern: String,
    },

    /// Hexdump part of a file
    Hexdump {
        file: PathBuf,

        #[arg(short, long, default_value = "0", value_parser = parse_address)]
        offset: u64,

        #[arg(short, long, default_value_t = 256)]
        len: usize,
    },

    /// Show memory of a process as a string or a hexdump
    Peek {
        #[arg(value_parser = parse_address)]
        address: u64,

        #[arg(short, long)]
        pid: Option<i32>,

        #[arg(short, long, default_value_t = 32)]
        len: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        InspectCommand::Maps { pid } => handle_maps(pid),
        InspectCommand::Module { soname, pid } => handle_module(&soname, pid),
        InspectCommand::Locate { address, pid } => handle_locate(address, pid),
        InspectCommand::Resolve {
            module,
            symbol,
            pid,
        } => handle_resolve(&module, &symbol, pid),
        InspectCommand::Symbols {
            file,
            pattern,
            limit,
        } => handle_symbols(&file, &pattern, limit),
        InspectCommand::Search { file, pattern } => handle_search(&file, &pattern),
        InspectCommand::Hexdump { file, offset, len } => handle_hexdump(&file, offset, len),
        InspectCommand::Peek { address, pid, len } => handle_peek(address, pid, len),
    }
}

/// ログ出力を初期化する（RUST_LOG があればそちらを優先）
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// アドレスをパースする（0x付き、または16進のみ）
fn parse_address(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim();
    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u64::from_str_radix(hex, 16).map_err(|e| format!("invalid address '{}': {}", s, e))
}

fn load_maps(pid: Option<i32>) -> Result<MapIndex> {
    match pid {
        Some(pid) => MapIndex::load_pid(pid),
        None => MapIndex::load(),
    }
}

fn handle_maps(pid: Option<i32>) -> Result<()> {
    let maps = load_maps(pid)?;
    debug!("Host architecture: {}", NativeArch::NAME);
    for range in maps.ranges() {
        println!(
            "{:012x}-{:012x} {:>10x} {}",
            range.start,
            range.end,
            range.size(),
            if range.path.is_empty() { &range.name } else { &range.path }
        );
    }
    println!("{} ranges", maps.ranges().len());
    Ok(())
}

fn handle_module(soname: &str, pid: Option<i32>) -> Result<()> {
    let maps = load_maps(pid)?;
    let (Some(path), Some((base, size))) = (maps.find_path(soname), maps.module_info(soname)) else {
        anyhow::bail!("No mapping matches '{}'", soname);
    };
    println!("{}", path);
    println!("  base: 0x{:x}", base);
    println!("  size: 0x{:x}", size);
    Ok(())
}

fn handle_locate(address: u64, pid: Option<i32>) -> Result<()> {
    let mut maps = load_maps(pid)?;
    let location = maps.resolve(address);
    if location.is_empty() {
        println!("0x{:x}: not in any mapped module", address);
    } else {
        println!("0x{:x}: {}", address, location);
    }
    Ok(())
}

fn handle_resolve(module: &Path, symbol: &str, pid: Option<i32>) -> Result<()> {
    let maps = load_maps(pid)?;
    let resolver = ModuleSymbolResolver::new(&maps);

    match resolver.find_address(module, symbol) {
        Some(address) => {
            println!("{} @ 0x{:x}", symbol, address);
            Ok(())
        }
        None => anyhow::bail!(
            "Symbol '{}' not found in {} (or the module is not mapped)",
            symbol,
            module.display()
        ),
    }
}

fn handle_symbols(file: &Path, pattern: &str, limit: usize) -> Result<()> {
    let image = ModuleImage::load(file)?;
    let symbols = image.find_symbols(pattern)?;

    if symbols.is_empty() {
        println!("No symbols matching '{}'", pattern);
        return Ok(());
    }

    println!("Symbols matching '{}' ({} found):", pattern, symbols.len());
    for (i, sym) in symbols.iter().take(limit).enumerate() {
        let kind = if sym.is_function { "func" } else { "data" };
        println!(
            "  {}. {} @ 0x{:x} (size: {}, {}, {:?})",
            i + 1,
            sym.display_name(),
            sym.address,
            sym.size,
            kind,
            sym.table
        );
    }
    if symbols.len() > limit {
        println!("  ... and {} more", symbols.len() - limit);
    }
    Ok(())
}

fn handle_search(file: &Path, pattern: &str) -> Result<()> {
    let data = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let pattern: Pattern = pattern.parse()?;
    debug!("Searching {} bytes for a {}-byte pattern", data.len(), pattern.len());

    let mut offset = 0;
    let mut found = 0;
    while offset < data.len() {
        let Some(pos) = search_bytes(&data[offset..], &pattern) else {
            break;
        };
        println!("match at offset 0x{:x}", offset + pos);
        found += 1;
        offset += pos + 1;
    }

    if found == 0 {
        println!("No match");
    }
    Ok(())
}

fn handle_hexdump(file: &Path, offset: u64, len: usize) -> Result<()> {
    let data = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let start = usize::try_from(offset)?.min(data.len());
    let end = start.saturating_add(len).min(data.len());

    let mut out = String::new();
    render_hexdump(&mut out, &data[start..end], start as u64);
    print!("{}", out);
    Ok(())
}

fn handle_peek(address: u64, pid: Option<i32>, len: usize) -> Result<()> {
    let memory = match pid {
        Some(pid) => Memory::open(pid)?,
        None => Memory::current()?,
    };
    debug!("Reading 0x{:x} of pid {}", address, memory.pid());

    if !memory.is_valid_address(address) {
        anyhow::bail!("0x{:x} is not mapped", address);
    }

    let text = memory.read_until_nul(address, len.max(1));
    if is_printable_text(&text) {
        println!("Strings :{}", String::from_utf8_lossy(&text[..text.len() - 1]));
        return Ok(());
    }

    let data = MemoryProbe::read(&memory, address, len)?;
    let mut out = String::new();
    render_hexdump(&mut out, &data, address);
    print!("{}", out);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x7f001000"), Ok(0x7f00_1000));
        assert_eq!(parse_address("7f001000"), Ok(0x7f00_1000));
        assert_eq!(parse_address(" 0X10 "), Ok(0x10));
        assert!(parse_address("0xzz").is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["nhook", "-v", "locate", "0x1000", "--pid", "42"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            InspectCommand::Locate {
                address: 0x1000,
                pid: Some(42)
            }
        ));

        let cli = Cli::try_parse_from(["nhook", "hexdump", "lib.so", "--offset", "0x40"]).unwrap();
        assert!(matches!(
            cli.command,
            InspectCommand::Hexdump {
                offset: 0x40,
                len: 256,
                ..
            }
        ));
    }
}
