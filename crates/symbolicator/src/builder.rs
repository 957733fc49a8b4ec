use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    vec::Vec,
};
use core::mem::size_of;

use crate::{FunctionEntry, Header, LineEntry, SourceFileEntry, StringRef, SymbolData};

/// Builder for constructing a symbol table.
///
/// Accumulates entries and strings, then builds a binary symbol table file.
#[derive(Default)]
pub struct SymbolTableBuilder {
    lines: Vec<LineEntry>,
    functions: Vec<FunctionEntry>,
    source_files: Vec<SourceFileEntry>,
    strings: Vec<u8>,
    string_cache: BTreeMap<String, StringRef>,
    function_cache: BTreeMap<(String, u64), u32>,
    file_cache: BTreeMap<String, u32>,
}

impl SymbolTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a line entry mapping an address to source location.
    ///
    /// `function_address` is the first address of the function containing `address`.
    pub fn add_line(
        &mut self,
        address: u64,
        function: &str,
        function_address: u64,
        source_file: &str,
        line: u32,
    ) {
        let function_id = self.intern_function(function, function_address);
        let source_file_id = self.intern_source_file(source_file);

        self.lines
            .push(LineEntry::new(address, function_id, source_file_id, line));
    }

    fn intern_function(&mut self, name: &str, address: u64) -> u32 {
        let key = (name.to_string(), address);
        if let Some(&id) = self.function_cache.get(&key) {
            return id;
        }

        let string_ref = self.intern_string(name);
        let id = self.functions.len() as u32;
        self.functions.push(FunctionEntry::new(string_ref, address));
        self.function_cache.insert(key, id);
        id
    }

    fn intern_source_file(&mut self, path: &str) -> u32 {
        if let Some(&id) = self.file_cache.get(path) {
            return id;
        }

        let string_ref = self.intern_string(path);
        let id = self.source_files.len() as u32;
        self.source_files.push(SourceFileEntry::new(string_ref));
        self.file_cache.insert(path.to_string(), id);
        id
    }

    fn intern_string(&mut self, s: &str) -> StringRef {
        if let Some(existing) = self.string_cache.get(s) {
            return *existing;
        }

        let string_ref = StringRef::new(self.strings.len() as u64, s.len() as u64);
        self.strings.extend_from_slice(s.as_bytes());
        self.string_cache.insert(s.to_string(), string_ref);
        string_ref
    }

    /// Builds the final binary symbol table.
    ///
    /// Sorts line entries by address and serializes all tables with header.
    pub fn build(mut self) -> SymbolData {
        self.lines.sort_by_key(|entry| entry.address);

        let lines_offset = size_of::<Header>();
        let lines_size = self.lines.len() * size_of::<LineEntry>();

        let functions_offset = lines_offset + lines_size;
        let functions_size = self.functions.len() * size_of::<FunctionEntry>();

        let source_files_offset = functions_offset + functions_size;
        let source_files_size = self.source_files.len() * size_of::<SourceFileEntry>();

        let string_pool_offset = source_files_offset + source_files_size;
        let string_pool_size = self.strings.len();

        let header = Header::new(
            lines_offset as u64,
            lines_size as u64,
            functions_offset as u64,
            functions_size as u64,
            source_files_offset as u64,
            source_files_size as u64,
            string_pool_offset as u64,
            string_pool_size as u64,
        );

        let mut output = Vec::with_capacity(string_pool_offset + string_pool_size);

        // SAFETY: all table types are `repr(C)` plain data without padding holes that
        // could be uninitialized; padding fields are explicit and zeroed.
        unsafe {
            output.extend_from_slice(as_bytes(core::slice::from_ref(&header)));
            output.extend_from_slice(as_bytes(&self.lines));
            output.extend_from_slice(as_bytes(&self.functions));
            output.extend_from_slice(as_bytes(&self.source_files));
        }
        output.extend_from_slice(&self.strings);

        SymbolData::new(&output)
    }
}

unsafe fn as_bytes<T>(items: &[T]) -> &[u8] {
    unsafe { core::slice::from_raw_parts(items.as_ptr() as *const u8, core::mem::size_of_val(items)) }
}
