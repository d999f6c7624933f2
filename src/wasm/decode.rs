//! Streaming decoder for the WebAssembly binary format (version 1).
//!
//! Walks the section sequence, validates order and framing, and populates
//! the module data model. Function bodies are captured as (start, end)
//! offsets only; instruction-level decoding is deferred to the code
//! generator, which pays that cost in parallel.

use std::collections::HashMap;

use sha1::{Digest, Sha1};

use crate::dwarf;
use crate::error::{CompileError, Result};
use crate::wasm::buffer::Buffer;
use crate::wasm::module::*;

#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    /// Compute a SHA-1 fingerprint per function body at read time.
    pub fingerprint: bool,
    /// Build the DWARF line lookup from `.debug_*` custom sections.
    pub debug_info: bool,
}

const SECTION_CUSTOM: u8 = 0;
const SECTION_TYPE: u8 = 1;
const SECTION_IMPORT: u8 = 2;
const SECTION_FUNCTION: u8 = 3;
const SECTION_TABLE: u8 = 4;
const SECTION_MEMORY: u8 = 5;
const SECTION_GLOBAL: u8 = 6;
const SECTION_EXPORT: u8 = 7;
const SECTION_START: u8 = 8;
const SECTION_ELEMENT: u8 = 9;
const SECTION_CODE: u8 = 10;
const SECTION_DATA: u8 = 11;
const SECTION_DATACOUNT: u8 = 12;

/// Position of a known section id in the required section order. Datacount
/// was added by a later proposal and sits between element and code.
fn section_rank(id: u8) -> Option<u8> {
    match id {
        SECTION_TYPE => Some(1),
        SECTION_IMPORT => Some(2),
        SECTION_FUNCTION => Some(3),
        SECTION_TABLE => Some(4),
        SECTION_MEMORY => Some(5),
        SECTION_GLOBAL => Some(6),
        SECTION_EXPORT => Some(7),
        SECTION_START => Some(8),
        SECTION_ELEMENT => Some(9),
        SECTION_DATACOUNT => Some(10),
        SECTION_CODE => Some(11),
        SECTION_DATA => Some(12),
        _ => None,
    }
}

pub fn decode<'a>(bytes: &'a [u8], options: DecodeOptions) -> Result<Module<'a>> {
    let mut buf = Buffer::new(bytes);

    match buf.read_bytes(4) {
        Ok(magic) if magic == b"\0asm" => {}
        _ => return Err(CompileError::BadMagic),
    }
    let version = match buf.read_u32_le() {
        Ok(version) => version,
        Err(_) => return Err(CompileError::BadVersion { found: 0 }),
    };
    if version != 1 {
        return Err(CompileError::BadVersion { found: version });
    }

    let mut module = Module::new(bytes);
    let mut function_type_indices: Vec<u32> = Vec::new();
    let mut data_count: Option<u32> = None;
    let mut debug_sections: HashMap<&'a str, &'a [u8]> = HashMap::new();
    let mut seen_code_section = false;

    let mut previous_id = 0u8;
    let mut previous_rank = 0u8;

    while !buf.at_end() {
        let section_offset = buf.offset();
        let id = buf.read_byte()?;
        let size = buf.read_var_u32()? as usize;
        let mut body = buf.sub_buffer(size)?;

        match id {
            SECTION_CUSTOM => {
                decode_custom_section(&mut body, &mut module, &mut debug_sections)?;
            }
            _ => {
                let rank = section_rank(id).ok_or(CompileError::UnknownSection {
                    id,
                    offset: section_offset,
                })?;
                if rank <= previous_rank {
                    return Err(CompileError::BadSectionOrder {
                        id,
                        previous: previous_id,
                        offset: section_offset,
                    });
                }
                previous_rank = rank;
                previous_id = id;

                match id {
                    SECTION_TYPE => decode_type_section(&mut body, &mut module)?,
                    SECTION_IMPORT => decode_import_section(&mut body, &mut module)?,
                    SECTION_FUNCTION => {
                        decode_function_section(&mut body, &module, &mut function_type_indices)?
                    }
                    SECTION_TABLE => decode_table_section(&mut body, &mut module)?,
                    SECTION_MEMORY => decode_memory_section(&mut body, &mut module)?,
                    SECTION_GLOBAL => decode_global_section(&mut body, &mut module)?,
                    SECTION_EXPORT => decode_export_section(&mut body, &mut module)?,
                    SECTION_START => {
                        let offset = body.offset();
                        let index = body.read_var_u32()?;
                        // The function section is already decoded here, but
                        // code bodies are not; check against the joint count.
                        let limit =
                            module.imported_function_count() + function_type_indices.len() as u32;
                        if index >= limit {
                            return Err(CompileError::IndexOutOfRange {
                                space: "function",
                                index,
                                limit,
                                offset,
                            });
                        }
                        module.start = Some(index);
                    }
                    SECTION_ELEMENT => decode_element_section(&mut body, &mut module)?,
                    SECTION_DATACOUNT => data_count = Some(body.read_var_u32()?),
                    SECTION_CODE => {
                        seen_code_section = true;
                        module.code_section_offset = body.offset();
                        decode_code_section(&mut body, &mut module, &function_type_indices, options)?
                    }
                    SECTION_DATA => decode_data_section(&mut body, &mut module)?,
                    _ => unreachable!("ranked section ids are all dispatched"),
                }
            }
        }

        if !body.at_end() {
            return Err(CompileError::BadSectionFraming {
                id,
                offset: body.offset(),
                message: format!("{} trailing byte(s) after section contents", body.remaining()),
            });
        }
    }

    if !function_type_indices.is_empty() && !seen_code_section {
        return Err(CompileError::BadSectionFraming {
            id: SECTION_CODE,
            offset: bytes.len(),
            message: format!(
                "function section declares {} function(s) but there is no code section",
                function_type_indices.len()
            ),
        });
    }

    if let Some(count) = data_count {
        if count as usize != module.data.len() {
            return Err(CompileError::BadSectionFraming {
                id: SECTION_DATACOUNT,
                offset: bytes.len(),
                message: format!(
                    "datacount section declares {} segment(s) but the data section has {}",
                    count,
                    module.data.len()
                ),
            });
        }
    }

    validate_index_spaces(&module)?;

    if options.debug_info && debug_sections.contains_key(".debug_line") {
        match dwarf::build_line_map(&debug_sections) {
            Ok(line_map) => module.line_map = Some(line_map),
            // Debug info is best-effort: a module with broken DWARF still
            // compiles, just without #line directives.
            Err(err) => log::warn!("ignoring malformed DWARF line info: {}", err),
        }
    }

    Ok(module)
}

fn framing(id: u8, offset: usize, message: impl Into<String>) -> CompileError {
    CompileError::BadSectionFraming { id, offset, message: message.into() }
}

fn decode_value_type(id: u8, buf: &mut Buffer) -> Result<ValueType> {
    let offset = buf.offset();
    match buf.read_byte()? {
        0x7f => Ok(ValueType::I32),
        0x7e => Ok(ValueType::I64),
        0x7d => Ok(ValueType::F32),
        0x7c => Ok(ValueType::F64),
        byte => Err(framing(id, offset, format!("unsupported value type {:#04x}", byte))),
    }
}

fn decode_limits(id: u8, buf: &mut Buffer) -> Result<Limits> {
    let offset = buf.offset();
    let max = match buf.read_byte()? {
        0x00 => false,
        0x01 => true,
        flag => return Err(framing(id, offset, format!("unsupported limits flag {:#04x}", flag))),
    };
    let min = buf.read_var_u32()?;
    let max = if max { Some(buf.read_var_u32()?) } else { None };
    if let Some(max) = max {
        if min > max {
            return Err(framing(id, offset, format!("limits minimum {} exceeds maximum {}", min, max)));
        }
    }
    Ok(Limits { min, max })
}

fn decode_table_type(id: u8, buf: &mut Buffer) -> Result<TableType> {
    let offset = buf.offset();
    match buf.read_byte()? {
        0x70 => {}
        byte => return Err(framing(id, offset, format!("unsupported table element type {:#04x}", byte))),
    }
    Ok(TableType { limits: decode_limits(id, buf)? })
}

fn decode_global_type(id: u8, buf: &mut Buffer) -> Result<GlobalType> {
    let value_type = decode_value_type(id, buf)?;
    let offset = buf.offset();
    let mutable = match buf.read_byte()? {
        0x00 => false,
        0x01 => true,
        byte => return Err(framing(id, offset, format!("unsupported mutability flag {:#04x}", byte))),
    };
    Ok(GlobalType { value_type, mutable })
}

/// A constant expression: exactly one const / global.get instruction,
/// followed by `end`.
fn decode_init_expr(id: u8, buf: &mut Buffer) -> Result<InitExpr> {
    let offset = buf.offset();
    let init = match buf.read_byte()? {
        0x41 => InitExpr::I32(buf.read_var_i32()? as u32),
        0x42 => InitExpr::I64(buf.read_var_i64()? as u64),
        0x43 => InitExpr::F32(buf.read_f32_bits()?),
        0x44 => InitExpr::F64(buf.read_f64_bits()?),
        0x23 => InitExpr::GlobalGet(buf.read_var_u32()?),
        byte => {
            return Err(framing(id, offset, format!("unsupported initializer opcode {:#04x}", byte)))
        }
    };
    let offset = buf.offset();
    match buf.read_byte()? {
        0x0b => Ok(init),
        byte => Err(framing(id, offset, format!("initializer not terminated by end, got {:#04x}", byte))),
    }
}

fn decode_type_section(buf: &mut Buffer, module: &mut Module) -> Result<()> {
    let count = buf.read_var_u32()?;
    for _ in 0..count {
        let offset = buf.offset();
        match buf.read_byte()? {
            0x60 => {}
            byte => {
                return Err(framing(SECTION_TYPE, offset, format!("unsupported type form {:#04x}", byte)))
            }
        }
        let param_count = buf.read_var_u32()?;
        let mut params = Vec::with_capacity(param_count as usize);
        for _ in 0..param_count {
            params.push(decode_value_type(SECTION_TYPE, buf)?);
        }
        let result_count = buf.read_var_u32()?;
        if result_count > 1 {
            return Err(framing(
                SECTION_TYPE,
                offset,
                format!("{} results, but the MVP allows at most one", result_count),
            ));
        }
        let mut results = Vec::with_capacity(result_count as usize);
        for _ in 0..result_count {
            results.push(decode_value_type(SECTION_TYPE, buf)?);
        }
        module.types.push(FuncType { params, results });
    }
    Ok(())
}

fn decode_import_section<'a>(buf: &mut Buffer<'a>, module: &mut Module<'a>) -> Result<()> {
    let count = buf.read_var_u32()?;
    for _ in 0..count {
        let module_name = buf.read_name()?.to_string();
        let field = buf.read_name()?.to_string();
        let offset = buf.offset();
        let desc = match buf.read_byte()? {
            0x00 => {
                let type_index = buf.read_var_u32()?;
                if type_index as usize >= module.types.len() {
                    return Err(CompileError::IndexOutOfRange {
                        space: "type",
                        index: type_index,
                        limit: module.types.len() as u32,
                        offset,
                    });
                }
                module.imported_function_types.push(type_index);
                ImportDesc::Func { type_index }
            }
            0x01 => {
                module.imported_table_count += 1;
                ImportDesc::Table(decode_table_type(SECTION_IMPORT, buf)?)
            }
            0x02 => {
                module.imported_memory_count += 1;
                ImportDesc::Memory(decode_memory_type(SECTION_IMPORT, buf)?)
            }
            0x03 => {
                let global_type = decode_global_type(SECTION_IMPORT, buf)?;
                module.imported_globals.push(global_type);
                ImportDesc::Global(global_type)
            }
            byte => {
                return Err(framing(SECTION_IMPORT, offset, format!("unsupported import kind {:#04x}", byte)))
            }
        };
        module.imports.push(Import { module: module_name, field, desc });
    }
    Ok(())
}

fn decode_memory_type(id: u8, buf: &mut Buffer) -> Result<MemoryType> {
    Ok(MemoryType { limits: decode_limits(id, buf)? })
}

fn decode_function_section(
    buf: &mut Buffer,
    module: &Module,
    function_type_indices: &mut Vec<u32>,
) -> Result<()> {
    let count = buf.read_var_u32()?;
    for _ in 0..count {
        let offset = buf.offset();
        let type_index = buf.read_var_u32()?;
        if type_index as usize >= module.types.len() {
            return Err(CompileError::IndexOutOfRange {
                space: "type",
                index: type_index,
                limit: module.types.len() as u32,
                offset,
            });
        }
        function_type_indices.push(type_index);
    }
    Ok(())
}

fn decode_table_section(buf: &mut Buffer, module: &mut Module) -> Result<()> {
    let count = buf.read_var_u32()?;
    for _ in 0..count {
        let table = decode_table_type(SECTION_TABLE, buf)?;
        module.tables.push(table);
    }
    Ok(())
}

fn decode_memory_section(buf: &mut Buffer, module: &mut Module) -> Result<()> {
    let count = buf.read_var_u32()?;
    for _ in 0..count {
        let memory = decode_memory_type(SECTION_MEMORY, buf)?;
        module.memories.push(memory);
    }
    Ok(())
}

fn decode_global_section(buf: &mut Buffer, module: &mut Module) -> Result<()> {
    let count = buf.read_var_u32()?;
    for _ in 0..count {
        let global_type = decode_global_type(SECTION_GLOBAL, buf)?;
        let offset = buf.offset();
        let init = decode_init_expr(SECTION_GLOBAL, buf)?;
        validate_init_expr(module, init, global_type.value_type, offset)?;
        module.globals.push(Global { global_type, init });
    }
    Ok(())
}

/// Initializer expressions may only read imported immutable globals, so they
/// are evaluable before any code runs.
fn validate_init_expr(
    module: &Module,
    init: InitExpr,
    expected: ValueType,
    offset: usize,
) -> Result<()> {
    let actual = match init {
        InitExpr::I32(_) => ValueType::I32,
        InitExpr::I64(_) => ValueType::I64,
        InitExpr::F32(_) => ValueType::F32,
        InitExpr::F64(_) => ValueType::F64,
        InitExpr::GlobalGet(index) => {
            let imported = module.imported_globals.len() as u32;
            if index >= imported {
                return Err(CompileError::IndexOutOfRange {
                    space: "imported global",
                    index,
                    limit: imported,
                    offset,
                });
            }
            let global_type = module.imported_globals[index as usize];
            if global_type.mutable {
                return Err(CompileError::TypeMismatch {
                    function: 0,
                    offset,
                    message: format!("initializer reads mutable imported global {}", index),
                });
            }
            global_type.value_type
        }
    };
    if actual != expected {
        return Err(CompileError::TypeMismatch {
            function: 0,
            offset,
            message: format!("initializer of type {} where {} is required", actual, expected),
        });
    }
    Ok(())
}

fn decode_export_section(buf: &mut Buffer, module: &mut Module) -> Result<()> {
    let count = buf.read_var_u32()?;
    for _ in 0..count {
        let name = buf.read_name()?.to_string();
        let offset = buf.offset();
        let kind = buf.read_byte()?;
        let index = buf.read_var_u32()?;
        let desc = match kind {
            0x00 => ExportDesc::Func(index),
            0x01 => ExportDesc::Table(index),
            0x02 => ExportDesc::Memory(index),
            0x03 => ExportDesc::Global(index),
            byte => {
                return Err(framing(SECTION_EXPORT, offset, format!("unsupported export kind {:#04x}", byte)))
            }
        };
        module.exports.push(Export { name, desc });
    }
    Ok(())
}

fn decode_element_section(buf: &mut Buffer, module: &mut Module) -> Result<()> {
    let count = buf.read_var_u32()?;
    for _ in 0..count {
        let table_index = buf.read_var_u32()?;
        let offset_expr_at = buf.offset();
        let offset = decode_init_expr(SECTION_ELEMENT, buf)?;
        validate_init_expr(module, offset, ValueType::I32, offset_expr_at)?;
        let function_count = buf.read_var_u32()?;
        let mut function_indices = Vec::with_capacity(function_count as usize);
        for _ in 0..function_count {
            function_indices.push(buf.read_var_u32()?);
        }
        module.elements.push(ElementSegment { table_index, offset, function_indices });
    }
    Ok(())
}

fn decode_code_section<'a>(
    buf: &mut Buffer<'a>,
    module: &mut Module<'a>,
    function_type_indices: &[u32],
    options: DecodeOptions,
) -> Result<()> {
    let count = buf.read_var_u32()?;
    if count as usize != function_type_indices.len() {
        return Err(framing(
            SECTION_CODE,
            buf.offset(),
            format!(
                "{} function bodies, but the function section declares {}",
                count,
                function_type_indices.len()
            ),
        ));
    }

    for (local_index, &type_index) in function_type_indices.iter().enumerate() {
        let body_size = buf.read_var_u32()? as usize;
        let body_start = buf.offset();
        let mut body = buf.sub_buffer(body_size)?;

        // The fingerprint covers the complete body bytes, locals
        // declarations included. It depends on nothing but this slice.
        let hash = if options.fingerprint {
            let digest = Sha1::digest(&module.bytes[body_start..body_start + body_size]);
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&digest);
            Some(hash)
        } else {
            None
        };

        // Locals are run-length encoded; the joint params + locals count has
        // to fit in 32 bits.
        let params = module.types[type_index as usize].params.len() as u32;
        let mut total = params;
        let run_count = body.read_var_u32()?;
        let mut locals = Vec::new();
        for _ in 0..run_count {
            let offset = body.offset();
            let run_len = body.read_var_u32()?;
            let value_type = decode_value_type(SECTION_CODE, &mut body)?;
            total = total.checked_add(run_len).ok_or(CompileError::IndexOutOfRange {
                space: "local",
                index: u32::max_value(),
                limit: u32::max_value(),
                offset,
            })?;
            locals.extend(std::iter::repeat(value_type).take(run_len as usize));
        }

        let code = body.offset()..body_start + body_size;
        if code.start >= code.end {
            return Err(framing(
                SECTION_CODE,
                body.offset(),
                format!("function {} has an empty instruction stream", local_index),
            ));
        }

        module.functions.push(Function { type_index, locals, code, hash });
        // The nested cursor bounded instruction reads; the body slice is
        // consumed as a whole here and disassembled by the code generator.
        let remaining = body.remaining();
        body.read_bytes(remaining)?;
    }
    Ok(())
}

fn decode_data_section<'a>(buf: &mut Buffer<'a>, module: &mut Module<'a>) -> Result<()> {
    let count = buf.read_var_u32()?;
    for _ in 0..count {
        let memory_index = buf.read_var_u32()?;
        let offset_expr_at = buf.offset();
        let offset = decode_init_expr(SECTION_DATA, buf)?;
        validate_init_expr(module, offset, ValueType::I32, offset_expr_at)?;
        let size = buf.read_var_u32()? as usize;
        let start = buf.offset();
        buf.read_bytes(size)?;
        module.data.push(DataSegment { memory_index, offset, payload: start..start + size });
    }
    Ok(())
}

fn decode_custom_section<'a>(
    buf: &mut Buffer<'a>,
    module: &mut Module<'a>,
    debug_sections: &mut HashMap<&'a str, &'a [u8]>,
) -> Result<()> {
    let name = buf.read_name()?;
    let remaining = buf.remaining();
    let data = buf.read_bytes(remaining)?;
    if name == "name" {
        // Name hints are best-effort: tools emit all kinds of extended name
        // subsections, so stop quietly at the first malformed entry.
        if let Err(err) = decode_name_section(data, module) {
            log::warn!("ignoring malformed name section: {}", err);
        }
    } else if name.starts_with(".debug") {
        debug_sections.insert(name, data);
    }
    Ok(())
}

fn decode_name_section(data: &[u8], module: &mut Module) -> Result<()> {
    let mut buf = Buffer::new(data);
    while !buf.at_end() {
        let subsection_id = buf.read_byte()?;
        let size = buf.read_var_u32()? as usize;
        let mut body = buf.sub_buffer(size)?;
        // Subsection 1 is the function name map; everything else (module
        // name, local names, extended subsections) is skipped.
        if subsection_id == 1 {
            let count = body.read_var_u32()?;
            for _ in 0..count {
                let index = body.read_var_u32()?;
                let name = body.read_name()?.to_string();
                module.function_names.insert(index, name);
            }
        }
    }
    Ok(())
}

/// Post-decode validation of every index an export, segment or start entry
/// references.
fn validate_index_spaces(module: &Module) -> Result<()> {
    let function_count = module.function_count();
    let table_count = module.table_count();
    let memory_count = module.memory_count();
    let global_count = module.global_count();

    for export in &module.exports {
        let (space, index, limit) = match export.desc {
            ExportDesc::Func(index) => ("function", index, function_count),
            ExportDesc::Table(index) => ("table", index, table_count),
            ExportDesc::Memory(index) => ("memory", index, memory_count),
            ExportDesc::Global(index) => ("global", index, global_count),
        };
        if index >= limit {
            return Err(CompileError::IndexOutOfRange { space, index, limit, offset: 0 });
        }
    }

    for element in &module.elements {
        if element.table_index >= table_count {
            return Err(CompileError::IndexOutOfRange {
                space: "table",
                index: element.table_index,
                limit: table_count,
                offset: 0,
            });
        }
        for &index in &element.function_indices {
            if index >= function_count {
                return Err(CompileError::IndexOutOfRange {
                    space: "function",
                    index,
                    limit: function_count,
                    offset: 0,
                });
            }
        }
    }

    for segment in &module.data {
        if segment.memory_index >= memory_count {
            return Err(CompileError::IndexOutOfRange {
                space: "memory",
                index: segment.memory_index,
                limit: memory_count,
                offset: 0,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal module builder for tests: sections are appended as raw
    /// (id, contents) pairs with the size prefix filled in.
    pub(crate) struct TestModule {
        bytes: Vec<u8>,
    }

    pub(crate) fn leb(value: u32) -> Vec<u8> {
        let mut value = value;
        let mut out = Vec::new();
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                out.push(byte);
                return out;
            }
            out.push(byte | 0x80);
        }
    }

    impl TestModule {
        pub(crate) fn new() -> Self {
            TestModule { bytes: b"\0asm\x01\0\0\0".to_vec() }
        }

        pub(crate) fn section(mut self, id: u8, contents: &[u8]) -> Self {
            self.bytes.push(id);
            self.bytes.extend(leb(contents.len() as u32));
            self.bytes.extend(contents);
            self
        }

        /// type section with a single `(i32…) -> (i32?)` style signature.
        pub(crate) fn single_type(self, params: &[u8], results: &[u8]) -> Self {
            let mut contents = vec![1, 0x60];
            contents.extend(leb(params.len() as u32));
            contents.extend(params);
            contents.extend(leb(results.len() as u32));
            contents.extend(results);
            self.section(SECTION_TYPE, &contents)
        }

        /// function section for bodies that all use type 0.
        pub(crate) fn function_section(self, bodies: &[&[u8]]) -> Self {
            let mut funcs = leb(bodies.len() as u32);
            for _ in bodies {
                funcs.extend(leb(0));
            }
            self.section(SECTION_FUNCTION, &funcs)
        }

        /// code section for bodies (no declared locals).
        pub(crate) fn code_section(self, bodies: &[&[u8]]) -> Self {
            let mut code = leb(bodies.len() as u32);
            for body in bodies {
                // no declared locals
                let mut with_locals = leb(0);
                with_locals.extend(*body);
                code.extend(leb(with_locals.len() as u32));
                code.extend(with_locals);
            }
            self.section(SECTION_CODE, &code)
        }

        /// function + code section for bodies that all use type 0.
        pub(crate) fn bodies(self, bodies: &[&[u8]]) -> Self {
            self.function_section(bodies).code_section(bodies)
        }

        pub(crate) fn build(self) -> Vec<u8> {
            self.bytes
        }
    }

    #[test]
    fn empty_module() {
        let bytes = TestModule::new().build();
        let module = decode(&bytes, DecodeOptions::default()).unwrap();
        assert!(module.types.is_empty());
        assert!(module.functions.is_empty());
        assert_eq!(module.function_count(), 0);
    }

    #[test]
    fn bad_magic_and_version() {
        assert_eq!(decode(b"\0wat\x01\0\0\0", DecodeOptions::default()).unwrap_err(), CompileError::BadMagic);
        assert_eq!(decode(b"\0as", DecodeOptions::default()).unwrap_err(), CompileError::BadMagic);
        assert_eq!(
            decode(b"\0asm\x02\0\0\0", DecodeOptions::default()).unwrap_err(),
            CompileError::BadVersion { found: 2 }
        );
    }

    #[test]
    fn identity_function_body_offsets() {
        // fn(x: i32) -> i32 { local.get 0 }
        let bytes = TestModule::new()
            .single_type(&[0x7f], &[0x7f])
            .bodies(&[&[0x20, 0x00, 0x0b]])
            .build();
        let module = decode(&bytes, DecodeOptions::default()).unwrap();
        assert_eq!(module.functions.len(), 1);
        let function = &module.functions[0];
        assert!(function.code.start < function.code.end);
        assert!(function.code.end <= bytes.len());
        assert_eq!(module.body_bytes(function), &[0x20, 0x00, 0x0b]);
    }

    #[test]
    fn section_order_is_enforced() {
        // memory(5) before table(4)
        let bytes = TestModule::new()
            .section(SECTION_MEMORY, &[0])
            .section(SECTION_TABLE, &[0])
            .build();
        match decode(&bytes, DecodeOptions::default()).unwrap_err() {
            CompileError::BadSectionOrder { id: SECTION_TABLE, previous: SECTION_MEMORY, .. } => {}
            other => panic!("expected BadSectionOrder, got {:?}", other),
        }

        // duplicate sections are also out of order
        let bytes = TestModule::new()
            .section(SECTION_TYPE, &[0])
            .section(SECTION_TYPE, &[0])
            .build();
        assert!(matches!(
            decode(&bytes, DecodeOptions::default()).unwrap_err(),
            CompileError::BadSectionOrder { .. }
        ));
    }

    #[test]
    fn unknown_section_id() {
        let bytes = TestModule::new().section(13, &[]).build();
        assert!(matches!(
            decode(&bytes, DecodeOptions::default()).unwrap_err(),
            CompileError::UnknownSection { id: 13, .. }
        ));
    }

    #[test]
    fn section_framing_trailing_bytes() {
        // type section with a correct single type, but one stray byte after.
        let mut contents = vec![1, 0x60, 0, 0];
        contents.push(0xaa);
        let bytes = TestModule::new().section(SECTION_TYPE, &contents).build();
        assert!(matches!(
            decode(&bytes, DecodeOptions::default()).unwrap_err(),
            CompileError::BadSectionFraming { id: SECTION_TYPE, .. }
        ));
    }

    #[test]
    fn datacount_mismatch_is_an_error() {
        let bytes = TestModule::new().section(SECTION_DATACOUNT, &[2]).build();
        assert!(matches!(
            decode(&bytes, DecodeOptions::default()).unwrap_err(),
            CompileError::BadSectionFraming { id: SECTION_DATACOUNT, .. }
        ));
    }

    #[test]
    fn name_section_function_names() {
        // subsection 1, one entry: function 0 -> "id"
        let mut name_payload = vec![4, b'n', b'a', b'm', b'e'];
        let entry = [1u8, 5, 1, 0, 2, b'i', b'd'];
        name_payload.extend(&entry);
        let bytes = TestModule::new()
            .single_type(&[0x7f], &[0x7f])
            .bodies(&[&[0x20, 0x00, 0x0b]])
            .section(SECTION_CUSTOM, &name_payload)
            .build();
        let module = decode(&bytes, DecodeOptions::default()).unwrap();
        assert_eq!(module.function_names.get(&0).map(String::as_str), Some("id"));
    }

    #[test]
    fn fingerprints_depend_only_on_body_bytes() {
        let options = DecodeOptions { fingerprint: true, debug_info: false };
        let body: &[u8] = &[0x20, 0x00, 0x0b];

        let a = TestModule::new().single_type(&[0x7f], &[0x7f]).bodies(&[body]).build();
        // Same body, but the module differs by an extra custom section and a
        // second function.
        let b = TestModule::new()
            .single_type(&[0x7f], &[0x7f])
            .bodies(&[body, &[0x41, 0x07, 0x0b]])
            .section(SECTION_CUSTOM, &[3, b'a', b'b', b'c', 0xff])
            .build();

        let a = decode(&a, options).unwrap();
        let b = decode(&b, options).unwrap();
        assert_eq!(a.functions[0].hash, b.functions[0].hash);
        assert_ne!(b.functions[0].hash, b.functions[1].hash);
    }

    #[test]
    fn export_index_out_of_range() {
        // export "f" func 3, but there are no functions at all.
        let contents = [1u8, 1, b'f', 0x00, 3];
        let bytes = TestModule::new().section(SECTION_EXPORT, &contents).build();
        assert!(matches!(
            decode(&bytes, DecodeOptions::default()).unwrap_err(),
            CompileError::IndexOutOfRange { space: "function", index: 3, .. }
        ));
    }
}
