//! Text symbol maps.
//!
//! A symbol map lists one line-table row per line:
//!
//! ```text
//! # address  function-start  function  file:line
//! 00800020   00800000        umain     user/forktree.rs:12
//! ```
//!
//! Addresses are hexadecimal with an optional `0x` prefix. Blank lines and lines starting
//! with `#` are ignored.

use alloc::string::String;
use core::fmt;

use crate::{SymbolData, SymbolTableBuilder};

/// One row of a symbol map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapLine<'a> {
    pub address: u64,
    pub function_address: u64,
    pub function: &'a str,
    pub source_file: &'a str,
    pub line: u32,
}

/// Why a symbol map row was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// The row does not have exactly four fields.
    FieldCount,
    /// An address field is not hexadecimal.
    Address,
    /// The location is not `file:line`.
    Location,
    /// The function starts after the address it is supposed to contain.
    FunctionAfterAddress,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldCount => f.write_str("expected 4 fields"),
            Self::Address => f.write_str("bad hexadecimal address"),
            Self::Location => f.write_str("expected file:line"),
            Self::FunctionAfterAddress => f.write_str("function starts after the address"),
        }
    }
}

fn parse_hex(text: &str) -> Result<u64, MapError> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u64::from_str_radix(digits, 16).map_err(|_| MapError::Address)
}

/// Parses one row. Returns `Ok(None)` for blank and comment lines.
pub fn parse_line(text: &str) -> Result<Option<MapLine<'_>>, MapError> {
    let text = text.trim();
    if text.is_empty() || text.starts_with('#') {
        return Ok(None);
    }

    let mut fields = text.split_whitespace();
    let (Some(address), Some(start), Some(function), Some(location), None) = (
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
    ) else {
        return Err(MapError::FieldCount);
    };

    let address = parse_hex(address)?;
    let function_address = parse_hex(start)?;
    if function_address > address {
        return Err(MapError::FunctionAfterAddress);
    }

    let (source_file, line) = location.rsplit_once(':').ok_or(MapError::Location)?;
    let line = line.parse().map_err(|_| MapError::Location)?;
    if source_file.is_empty() {
        return Err(MapError::Location);
    }

    Ok(Some(MapLine {
        address,
        function_address,
        function,
        source_file,
        line,
    }))
}

/// Builds a symbol table from a whole map. Errors carry the 1-based line number.
///
/// `rename` may replace a function name, for example with its demangled form; `None`
/// keeps the name as written.
pub fn build_from_map<F>(text: &str, rename: F) -> Result<SymbolData, (usize, MapError)>
where
    F: Fn(&str) -> Option<String>,
{
    let mut builder = SymbolTableBuilder::new();
    for (index, row) in text.lines().enumerate() {
        let Some(row) = parse_line(row).map_err(|err| (index + 1, err))? else {
            continue;
        };
        let renamed = rename(row.function);
        builder.add_line(
            row.address,
            renamed.as_deref().unwrap_or(row.function),
            row.function_address,
            row.source_file,
            row.line,
        );
    }
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_row() {
        assert_eq!(
            parse_line("0x800124 800100 duppage lib/fork.rs:40"),
            Ok(Some(MapLine {
                address: 0x0080_0124,
                function_address: 0x0080_0100,
                function: "duppage",
                source_file: "lib/fork.rs",
                line: 40,
            }))
        );
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(parse_line("# address start function location"), Ok(None));
    }

    #[test]
    fn rejects_malformed_rows() {
        assert_eq!(parse_line("800000 800000 umain"), Err(MapError::FieldCount));
        assert_eq!(
            parse_line("800000 800000 umain a.rs:1 extra"),
            Err(MapError::FieldCount)
        );
        assert_eq!(parse_line("zz 800000 umain a.rs:1"), Err(MapError::Address));
        assert_eq!(parse_line("800000 800000 umain a.rs"), Err(MapError::Location));
        assert_eq!(parse_line("800000 800000 umain :3"), Err(MapError::Location));
        assert_eq!(
            parse_line("800000 800010 umain a.rs:1"),
            Err(MapError::FunctionAfterAddress)
        );
    }

    #[test]
    fn windows_style_paths_split_at_last_colon() {
        let row = parse_line("10 0 f C:/src/a.rs:7").unwrap().unwrap();
        assert_eq!(row.source_file, "C:/src/a.rs");
        assert_eq!(row.line, 7);
    }

    #[test]
    fn builds_table_from_map() {
        let data = build_from_map(
            "# emulated user program\n\
             800000 800000 umain user/forktree.rs:10\n\
             800100 800100 fork lib/fork.rs:80\n",
            |_| None,
        )
        .unwrap();
        let table = data.table().unwrap();

        let info = table.lookup(0x0080_0140).unwrap();
        assert_eq!(info.function_name, "fork");
        assert_eq!(info.function_address, 0x0080_0100);
        assert_eq!(info.line, 80);
    }

    #[test]
    fn rename_replaces_function_names() {
        let data = build_from_map("800000 800000 _ZN4forkE a.rs:1", |name| {
            (name == "_ZN4forkE").then(|| String::from("ulib::fork"))
        })
        .unwrap();
        let table = data.table().unwrap();
        assert_eq!(table.lookup(0x0080_0000).unwrap().function_name, "ulib::fork");
    }

    #[test]
    fn build_reports_line_number() {
        assert_eq!(
            build_from_map("800000 800000 umain a.rs:1\n\nbad\n", |_| None).err(),
            Some((3, MapError::FieldCount))
        );
    }
}
