use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

use symbolicator::{map, SymbolData};

#[derive(Parser)]
#[command(name = "symbolicator")]
#[command(about = "Builds and queries the symbol tables used by the exofork monitor")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a symbol table from a text symbol map
    Generate {
        /// Symbol map: `address function-start function file:line` per line
        #[arg(short, long)]
        input: PathBuf,

        /// Output symbol table file
        #[arg(short, long)]
        output: PathBuf,

        /// Keep mangled Rust function names as written
        #[arg(long)]
        no_demangle: bool,
    },
    /// Look up addresses in a symbol table
    Lookup {
        /// Symbol table file
        #[arg(short, long)]
        symtab: PathBuf,

        /// Addresses to look up, in hexadecimal (e.g. 0x800124)
        #[arg(required = true)]
        addresses: Vec<String>,
    },
}

fn demangle(name: &str) -> Option<String> {
    rustc_demangle::try_demangle(name)
        .ok()
        .map(|demangled| format!("{:#}", demangled))
}

fn generate(
    input: PathBuf,
    output: PathBuf,
    no_demangle: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = fs::read_to_string(&input)?;
    let data = if no_demangle {
        map::build_from_map(&text, |_| None)
    } else {
        map::build_from_map(&text, demangle)
    }
    .map_err(|(line, err)| format!("{}:{}: {}", input.display(), line, err))?;

    fs::write(&output, data.as_bytes())?;
    Ok(())
}

fn lookup(symtab_path: PathBuf, addresses: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let data = SymbolData::new(&fs::read(&symtab_path)?);
    let symtab = data
        .table()
        .map_err(|e| format!("Failed to load symbol table: {}", e))?;

    for text in addresses {
        let digits = text.strip_prefix("0x").unwrap_or(&text);
        let address = u64::from_str_radix(digits, 16)?;

        match symtab.lookup(address) {
            Some(info) => println!(
                "{:08x}: {}:{}: {}+{}",
                address,
                info.source_file,
                info.line,
                info.function_name,
                address - info.function_address
            ),
            None => println!("{:08x}: <not found>", address),
        }
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Command::Generate {
            input,
            output,
            no_demangle,
        } => generate(input, output, no_demangle),
        Command::Lookup { symtab, addresses } => lookup(symtab, addresses),
    }
}
