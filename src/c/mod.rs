//! Module emitter: generates the header and the implementation file(s) for a
//! decoded module, and schedules per-function code generation across worker
//! threads.
//!
//! The caller thread writes the header, the skeleton (data segments, export
//! wrappers, instantiate/free) and, in single-file mode, the function bodies
//! appended to the skeleton. In partitioned mode the bodies go into
//! `s0001.c` / `d0001.c` style files, assigned in function index order, so a
//! second run over the same inputs produces byte-identical files no matter
//! how many workers run.

pub mod func;
pub mod names;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use rayon::prelude::*;

use crate::c::func::GenOptions;
use crate::c::names::Names;
use crate::wasm::fingerprint::Partition;
use crate::wasm::module::{ExportDesc, FuncType, ImportDesc, InitExpr, Module};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSegmentMode {
    /// Each segment is a C array literal.
    Arrays,
    /// Segments are concatenated into a `.dat` blob placed by a GNU LD
    /// linker script section.
    GnuLd,
    /// Mach-O sectcreate blob, accessed via an asm section symbol.
    Sectcreate1,
    /// Mach-O sectcreate blob, accessed via getsectdata.
    Sectcreate2,
}

#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Path of the skeleton implementation file; the header and partition
    /// files are derived from it.
    pub output_path: PathBuf,
    pub thread_count: usize,
    /// 0 writes all functions into the skeleton file.
    pub functions_per_file: u32,
    pub pretty: bool,
    pub debug: bool,
    pub multiple_modules: bool,
    pub data_segment_mode: DataSegmentMode,
}

pub fn write_module(
    module: &Module,
    module_name: &str,
    options: &WriteOptions,
    partition: Option<&Partition>,
) -> anyhow::Result<()> {
    let mut names = Names::new(module_name, options.multiple_modules);
    if let Some(partition) = partition {
        let static_types: HashMap<[u8; 20], u32> =
            partition.static_ids.iter().map(|id| (id.hash, id.type_index)).collect();
        for id in &partition.static_ids {
            names.set_digest_name(id.function_index, &id.hash);
        }
        for id in &partition.dynamic_ids {
            match static_types.get(&id.hash) {
                // Identical body bytes at an incompatible signature: the
                // plain digest symbol belongs to the reference build, so
                // qualify this one with its signature id.
                Some(&type_index) if type_index != id.type_index => {
                    names.set_qualified_digest_name(id.function_index, &id.hash, id.type_index)
                }
                _ => names.set_digest_name(id.function_index, &id.hash),
            }
        }
    }

    let header_path = options.output_path.with_extension("h");
    let header_name = header_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.h", module_name));
    let output_dir = options
        .output_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    // Bodies to emit, in function index order. Under a reference module only
    // the dynamic partition is emitted, and duplicate digests within the
    // module collapse into their first occurrence.
    let emitted = emitted_functions(module, partition);
    let file_prefix = if partition.is_some() { 'd' } else { 's' };

    let gen_options = GenOptions { pretty: options.pretty, debug: options.debug };

    if options.data_segment_mode != DataSegmentMode::Arrays {
        let blob: Vec<u8> = module
            .data
            .iter()
            .flat_map(|segment| module.payload_bytes(segment).iter().copied())
            .collect();
        let blob_path = options.output_path.with_extension("dat");
        fs::write(&blob_path, &blob)?;
        log::info!("wrote {} ({} bytes)", blob_path.display(), blob.len());
    }

    let header = header_text(module, &names, options);
    fs::write(&header_path, header)?;
    log::info!("wrote {}", header_path.display());

    let pool = rayon::ThreadPoolBuilder::new().num_threads(options.thread_count).build()?;

    let mut skeleton = skeleton_text(module, &names, options, &header_name);
    if options.functions_per_file == 0 {
        // Single-file mode: bodies are generated in parallel but appended in
        // index order, keeping the output independent of the worker count.
        let bodies = pool.install(|| {
            emitted
                .par_iter()
                .map(|&index| func::generate_function(module, &names, index, gen_options))
                .collect::<Result<Vec<_>, _>>()
        })?;
        for body in bodies {
            skeleton.push('\n');
            skeleton.push_str(&body);
        }
        fs::write(&options.output_path, skeleton)?;
        log::info!("wrote {} ({} function(s))", options.output_path.display(), emitted.len());
        return Ok(());
    }

    fs::write(&options.output_path, skeleton)?;
    log::info!("wrote {}", options.output_path.display());

    let chunks: Vec<(PathBuf, &[u32])> = emitted
        .chunks(options.functions_per_file as usize)
        .enumerate()
        .map(|(file_index, chunk)| {
            let file_name = format!("{}{:04}.c", file_prefix, file_index + 1);
            (output_dir.join(file_name), chunk)
        })
        .collect();

    // Files are the unit of parallel work; every worker owns the files it
    // writes and reads the module immutably. An error in one worker
    // short-circuits the join; finished files stay on disk.
    pool.install(|| {
        chunks.par_iter().try_for_each(|(path, indices)| -> anyhow::Result<()> {
            let mut out = String::new();
            out.push_str(&format!("#include \"{}\"\n", header_name));
            for &index in indices.iter() {
                out.push('\n');
                out.push_str(&func::generate_function(module, &names, index, gen_options)?);
            }
            fs::write(path, out)?;
            Ok(())
        })
    })?;

    log::info!(
        "wrote {} implementation file(s), {} function(s) total",
        chunks.len(),
        emitted.len()
    );
    Ok(())
}

fn emitted_functions(module: &Module, partition: Option<&Partition>) -> Vec<u32> {
    match partition {
        None => (module.imported_function_count()..module.function_count()).collect(),
        Some(partition) => {
            // A dynamic function whose (digest, signature) also sits in the
            // static partition is a duplicate body within this module: its
            // symbol comes from the reference build, so nothing to emit.
            let static_set: HashSet<([u8; 20], u32)> =
                partition.static_ids.iter().map(|id| (id.hash, id.type_index)).collect();
            let mut seen = HashSet::new();
            let mut indices: Vec<u32> = partition
                .dynamic_ids
                .iter()
                .filter(|id| !static_set.contains(&(id.hash, id.type_index)))
                .filter(|id| seen.insert((id.hash, id.type_index)))
                .map(|id| id.function_index)
                .collect();
            indices.sort_unstable();
            indices
        }
    }
}

// ----------------------------------------------------------------------
// Header

fn header_text(module: &Module, names: &Names, options: &WriteOptions) -> String {
    let guard = names.header_guard();
    let mut out = String::new();
    out.push_str(&format!("/* Generated by wasm2c from module '{}'. Do not edit. */\n", names.module()));
    out.push_str(&format!("#ifndef {}\n#define {}\n\n", guard, guard));
    out.push_str("#include \"wasm2c_rt.h\"\n\n");

    out.push_str(&instance_struct_text(module, names));
    out.push('\n');
    out.push_str(&accessor_macros_text(module, names));

    // Digest-derived linkage aliases, present when a reference module
    // partitions the functions. Static functions resolve to the reference
    // build's symbols through these.
    let mut aliases = String::new();
    for index in module.imported_function_count()..module.function_count() {
        if let Some(digest_name) = names.digest_name(index) {
            aliases.push_str(&format!("#define {} {}\n", names.function(index), digest_name));
        }
    }
    if !aliases.is_empty() {
        out.push('\n');
        out.push_str(&aliases);
    }

    out.push('\n');
    out.push_str(&function_prototypes_text(module, names, options));
    out.push('\n');
    out.push_str(&export_prototypes_text(module, names));

    out.push_str(&format!(
        "\nvoid {}({}* i, void* (*resolve)(const char*, const char*));\n",
        names.instantiate(),
        names.instance_struct()
    ));
    out.push_str(&format!("void {}({}* i);\n", names.free_instance(), names.instance_struct()));
    out.push_str(&format!(
        "wasmMemory* {}({}* i);\n",
        names.memory_accessor(),
        names.instance_struct()
    ));

    out.push_str(&format!("\n#endif /* {} */\n", guard));
    out
}

/// The C type of a function pointer field or cast for `func_type`, with the
/// instance passed as an untyped first argument.
fn function_pointer_type(func_type: &FuncType, declarator: &str) -> String {
    let result = match func_type.result() {
        Some(ty) => names::c_type(ty),
        None => "void",
    };
    let mut out = format!("{} (*{})(void*", result, declarator);
    for &param in &func_type.params {
        out.push_str(", ");
        out.push_str(names::c_type(param));
    }
    out.push(')');
    out
}

fn instance_struct_text(module: &Module, names: &Names) -> String {
    let struct_name = names.instance_struct();
    let mut out = format!("typedef struct {} {{\n", struct_name);
    let mut fields = 0;

    for (index, &type_index) in module.imported_function_types.iter().enumerate() {
        let func_type = &module.types[type_index as usize];
        let field = names.import_field('f', index as u32);
        out.push_str(&format!("{};\n", function_pointer_type(func_type, &field)));
        fields += 1;
    }
    for index in 0..module.memory_count() {
        let field = names.import_field('m', index);
        if index < module.imported_memory_count {
            out.push_str(&format!("wasmMemory* {};\n", field));
        } else {
            out.push_str(&format!("wasmMemory {};\n", field));
        }
        fields += 1;
    }
    for index in 0..module.table_count() {
        let field = names.import_field('t', index);
        if index < module.imported_table_count {
            out.push_str(&format!("wasmTable* {};\n", field));
        } else {
            out.push_str(&format!("wasmTable {};\n", field));
        }
        fields += 1;
    }
    for index in 0..module.global_count() {
        let global_type = module.global_type(index).unwrap();
        let field = names.import_field('g', index);
        if (index as usize) < module.imported_globals.len() {
            out.push_str(&format!("{}* {};\n", names::c_type(global_type.value_type), field));
        } else {
            out.push_str(&format!("{} {};\n", names::c_type(global_type.value_type), field));
        }
        fields += 1;
    }

    if fields == 0 {
        // C89 rejects empty structs.
        out.push_str("u8 unused;\n");
    }
    out.push_str(&format!("}} {};\n", struct_name));
    out
}

fn accessor_macros_text(module: &Module, names: &Names) -> String {
    let mut out = String::new();
    for index in 0..module.memory_count() {
        let field = names.import_field('m', index);
        if index < module.imported_memory_count {
            out.push_str(&format!("#define {}(i) ((i)->{})\n", names.memory_macro(index), field));
        } else {
            out.push_str(&format!("#define {}(i) (&(i)->{})\n", names.memory_macro(index), field));
        }
    }
    for index in 0..module.table_count() {
        let field = names.import_field('t', index);
        if index < module.imported_table_count {
            out.push_str(&format!("#define {}(i) ((i)->{})\n", names.table_macro(index), field));
        } else {
            out.push_str(&format!("#define {}(i) (&(i)->{})\n", names.table_macro(index), field));
        }
    }
    out
}

fn function_prototypes_text(module: &Module, names: &Names, options: &WriteOptions) -> String {
    // Debug symbol aliases carry the name-section names; they are skipped in
    // reference mode, where the digest names are the shared symbols.
    let emit_asm_aliases = options.debug && names.digest_name(module.imported_function_count()).is_none();
    let mut used_names: HashSet<String> = HashSet::new();

    let mut out = String::new();
    for index in module.imported_function_count()..module.function_count() {
        out.push_str(&func::signature(module, names, index));
        if emit_asm_aliases {
            if let Some(name) = module.function_names.get(&index) {
                let mut alias = names::sanitize(name);
                if !used_names.insert(alias.clone()) {
                    alias = format!("{}_{}", alias, index);
                    used_names.insert(alias.clone());
                }
                out.push_str(&format!(" __asm__(\"{}\")", alias));
            }
        }
        out.push_str(";\n");
    }
    out
}

fn export_prototypes_text(module: &Module, names: &Names) -> String {
    let mut out = String::new();
    for export in &module.exports {
        match export.desc {
            ExportDesc::Func(index) => {
                let func_type = module.function_type(index).unwrap();
                out.push_str(&export_function_signature(names, &export.name, func_type));
                out.push_str(";\n");
            }
            ExportDesc::Memory(_) => {
                out.push_str(&format!(
                    "wasmMemory* {}({}* i);\n",
                    names.export(&export.name),
                    names.instance_struct()
                ));
            }
            ExportDesc::Table(_) => {
                out.push_str(&format!(
                    "wasmTable* {}({}* i);\n",
                    names.export(&export.name),
                    names.instance_struct()
                ));
            }
            ExportDesc::Global(index) => {
                let global_type = module.global_type(index).unwrap();
                out.push_str(&format!(
                    "{}* {}({}* i);\n",
                    names::c_type(global_type.value_type),
                    names.export(&export.name),
                    names.instance_struct()
                ));
            }
        }
    }
    out
}

fn export_function_signature(names: &Names, export_name: &str, func_type: &FuncType) -> String {
    let result = match func_type.result() {
        Some(ty) => names::c_type(ty),
        None => "void",
    };
    let mut out = format!("{} {}({}* i", result, names.export(export_name), names.instance_struct());
    for (index, &param) in func_type.params.iter().enumerate() {
        out.push_str(&format!(", {} {}", names::c_type(param), names::local(index as u32)));
    }
    out.push(')');
    out
}

// ----------------------------------------------------------------------
// Skeleton: data segments, export wrappers, instantiate, free

fn skeleton_text(module: &Module, names: &Names, options: &WriteOptions, header_name: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("#include \"{}\"\n\n", header_name));
    out.push_str(&data_segments_text(module, names, options.data_segment_mode));
    out.push_str(&export_wrappers_text(module, names));
    out.push_str(&instantiate_text(module, names, options.data_segment_mode));
    out.push_str(&free_instance_text(module, names));
    out
}

/// Offset of every data segment's payload within the concatenated blob.
fn blob_offsets(module: &Module) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(module.data.len());
    let mut offset = 0;
    for segment in &module.data {
        offsets.push(offset);
        offset += segment.payload.len();
    }
    offsets
}

fn data_segments_text(module: &Module, names: &Names, mode: DataSegmentMode) -> String {
    let mut out = String::new();
    match mode {
        DataSegmentMode::Arrays => {
            for (index, segment) in module.data.iter().enumerate() {
                let payload = module.payload_bytes(segment);
                if payload.is_empty() {
                    continue;
                }
                out.push_str(&format!("static const u8 d{}[] = {{\n", index));
                for chunk in payload.chunks(16) {
                    let line = chunk.iter().map(|byte| format!("{:#04x}", byte)).join(", ");
                    out.push_str(&line);
                    out.push_str(",\n");
                }
                out.push_str("};\n");
            }
        }
        DataSegmentMode::GnuLd => {
            out.push_str(&format!(
                "/* Concatenated data segments, placed by the linker script section '{0}_data' from {0}.dat. */\n",
                names.module()
            ));
            out.push_str(&format!("extern const u8 {}_data_start[];\n", names.module()));
            out.push_str(&format!(
                "static const u8* {}Data(void) {{\nreturn {}_data_start;\n}}\n",
                names.module(),
                names.module()
            ));
        }
        DataSegmentMode::Sectcreate1 => {
            out.push_str(&format!(
                "static const u8* {}Data(void) {{\nextern const u8 data[] __asm(\"section$start$__DATA$__{}_data\");\nreturn data;\n}}\n",
                names.module(),
                names.module()
            ));
        }
        DataSegmentMode::Sectcreate2 => {
            out.push_str(&format!(
                "static const u8* {}Data(void) {{\nunsigned long size = 0;\nreturn (const u8*)getsectdata(\"__DATA\", \"__{}_data\", &size);\n}}\n",
                names.module(),
                names.module()
            ));
        }
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

fn export_wrappers_text(module: &Module, names: &Names) -> String {
    let mut out = String::new();
    for export in &module.exports {
        match export.desc {
            ExportDesc::Func(index) => {
                let func_type = module.function_type(index).unwrap().clone();
                out.push_str(&export_function_signature(names, &export.name, &func_type));
                out.push_str(" {\n");
                let mut arguments = String::new();
                for param_index in 0..func_type.params.len() {
                    arguments.push_str(&format!(", {}", names::local(param_index as u32)));
                }
                let call = if index < module.imported_function_count() {
                    format!("i->{}(i{})", names.import_field('f', index), arguments)
                } else {
                    format!("{}(i{})", names.function(index), arguments)
                };
                if func_type.result().is_some() {
                    out.push_str(&format!("return {};\n", call));
                } else {
                    out.push_str(&format!("{};\n", call));
                }
                out.push_str("}\n\n");
            }
            ExportDesc::Memory(index) => {
                out.push_str(&format!(
                    "wasmMemory* {}({}* i) {{\nreturn {}(i);\n}}\n\n",
                    names.export(&export.name),
                    names.instance_struct(),
                    names.memory_macro(index)
                ));
            }
            ExportDesc::Table(index) => {
                out.push_str(&format!(
                    "wasmTable* {}({}* i) {{\nreturn {}(i);\n}}\n\n",
                    names.export(&export.name),
                    names.instance_struct(),
                    names.table_macro(index)
                ));
            }
            ExportDesc::Global(index) => {
                let global_type = module.global_type(index).unwrap();
                let reference = if (index as usize) < module.imported_globals.len() {
                    format!("i->{}", names.import_field('g', index))
                } else {
                    format!("&i->{}", names.import_field('g', index))
                };
                out.push_str(&format!(
                    "{}* {}({}* i) {{\nreturn {};\n}}\n\n",
                    names::c_type(global_type.value_type),
                    names.export(&export.name),
                    names.instance_struct(),
                    reference
                ));
            }
        }
    }

    // The default-memory accessor exists even for modules without a memory.
    out.push_str(&format!(
        "wasmMemory* {}({}* i) {{\n",
        names.memory_accessor(),
        names.instance_struct()
    ));
    if module.memory_count() > 0 {
        out.push_str(&format!("return {}(i);\n", names.memory_macro(0)));
    } else {
        out.push_str("(void)i;\nreturn (wasmMemory*)0;\n");
    }
    out.push_str("}\n\n");
    out
}

/// Render a constant initializer. GlobalGet reads an imported immutable
/// global, which instantiate has already resolved.
fn init_expr_text(names: &Names, init: InitExpr) -> String {
    match init {
        InitExpr::I32(value) => names::i32_literal(value),
        InitExpr::I64(value) => names::i64_literal(value),
        InitExpr::F32(bits) => names::f32_literal(bits),
        InitExpr::F64(bits) => names::f64_literal(bits),
        InitExpr::GlobalGet(index) => format!("(*i->{})", names.import_field('g', index)),
    }
}

fn instantiate_text(module: &Module, names: &Names, mode: DataSegmentMode) -> String {
    let mut out = format!(
        "void {}({}* i, void* (*resolve)(const char*, const char*)) {{\n",
        names.instantiate(),
        names.instance_struct()
    );

    // Imports first: later initialisation (globals, segments) may read them.
    let mut function_index = 0u32;
    let mut memory_index = 0u32;
    let mut table_index = 0u32;
    let mut global_index = 0u32;
    for import in &module.imports {
        let resolve = format!("resolve(\"{}\", \"{}\")", import.module, import.field);
        match &import.desc {
            ImportDesc::Func { type_index } => {
                let func_type = &module.types[*type_index as usize];
                let cast = function_pointer_type(func_type, "");
                out.push_str(&format!(
                    "i->{} = ({}){};\n",
                    names.import_field('f', function_index),
                    cast,
                    resolve
                ));
                function_index += 1;
            }
            ImportDesc::Memory(_) => {
                out.push_str(&format!(
                    "i->{} = (wasmMemory*){};\n",
                    names.import_field('m', memory_index),
                    resolve
                ));
                memory_index += 1;
            }
            ImportDesc::Table(_) => {
                out.push_str(&format!(
                    "i->{} = (wasmTable*){};\n",
                    names.import_field('t', table_index),
                    resolve
                ));
                table_index += 1;
            }
            ImportDesc::Global(global_type) => {
                out.push_str(&format!(
                    "i->{} = ({}*){};\n",
                    names.import_field('g', global_index),
                    names::c_type(global_type.value_type),
                    resolve
                ));
                global_index += 1;
            }
        }
    }

    for (offset, memory) in module.memories.iter().enumerate() {
        let index = module.imported_memory_count + offset as u32;
        out.push_str(&format!(
            "wasmMemoryAllocate(&i->{}, {}u, {}u);\n",
            names.import_field('m', index),
            memory.limits.min,
            memory.limits.max.unwrap_or(65536)
        ));
    }
    for (offset, table) in module.tables.iter().enumerate() {
        let index = module.imported_table_count + offset as u32;
        out.push_str(&format!(
            "wasmTableAllocate(&i->{}, {}u, {}u);\n",
            names.import_field('t', index),
            table.limits.min,
            table.limits.max.unwrap_or(table.limits.min)
        ));
    }
    for (offset, global) in module.globals.iter().enumerate() {
        let index = module.imported_globals.len() as u32 + offset as u32;
        out.push_str(&format!(
            "i->{} = {};\n",
            names.import_field('g', index),
            init_expr_text(names, global.init)
        ));
    }

    for element in &module.elements {
        let table = format!("{}(i)", names.table_macro(element.table_index));
        out.push_str("{\n");
        out.push_str(&format!("u32 o = {};\n", init_expr_text(names, element.offset)));
        for (position, &function) in element.function_indices.iter().enumerate() {
            let type_id = module.canonical_type_index(module.function_type_index(function).unwrap());
            let reference = if function < module.imported_function_count() {
                format!("(void*)i->{}", names.import_field('f', function))
            } else {
                format!("(void*){}", names.function(function))
            };
            out.push_str(&format!("{}->elements[o + {}u].typeId = {}u;\n", table, position, type_id));
            out.push_str(&format!("{}->elements[o + {}u].fn = {};\n", table, position, reference));
        }
        out.push_str("}\n");
    }

    let offsets = blob_offsets(module);
    for (index, segment) in module.data.iter().enumerate() {
        let length = segment.payload.len();
        if length == 0 {
            continue;
        }
        let memory = format!("{}(i)", names.memory_macro(segment.memory_index));
        let source = match mode {
            DataSegmentMode::Arrays => format!("d{}", index),
            _ => format!("{}Data() + {}u", names.module(), offsets[index]),
        };
        out.push_str(&format!(
            "memcpy({}->data + {}, {}, {}u);\n",
            memory,
            init_expr_text(names, segment.offset),
            source,
            length
        ));
    }

    if let Some(start) = module.start {
        if start < module.imported_function_count() {
            out.push_str(&format!("i->{}(i);\n", names.import_field('f', start)));
        } else {
            out.push_str(&format!("{}(i);\n", names.function(start)));
        }
    }

    if module.imports.is_empty() {
        out.push_str("(void)resolve;\n");
    }
    out.push_str("}\n\n");
    out
}

fn free_instance_text(module: &Module, names: &Names) -> String {
    let mut out = format!("void {}({}* i) {{\n", names.free_instance(), names.instance_struct());
    let mut freed = false;
    for offset in 0..module.memories.len() {
        let index = module.imported_memory_count + offset as u32;
        out.push_str(&format!("wasmMemoryFree(&i->{});\n", names.import_field('m', index)));
        freed = true;
    }
    for offset in 0..module.tables.len() {
        let index = module.imported_table_count + offset as u32;
        out.push_str(&format!("wasmTableFree(&i->{});\n", names.import_field('t', index)));
        freed = true;
    }
    if !freed {
        out.push_str("(void)i;\n");
    }
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wasm::decode::tests::TestModule;
    use crate::wasm::decode::{decode, DecodeOptions};
    use crate::wasm::fingerprint::{sorted_function_ids, split_static_dynamic};

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("wasm2c-test-{}", name));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_options(dir: &Path, functions_per_file: u32, threads: usize) -> WriteOptions {
        WriteOptions {
            output_path: dir.join("mod.c"),
            thread_count: threads,
            functions_per_file,
            pretty: false,
            debug: false,
            multiple_modules: false,
            data_segment_mode: DataSegmentMode::Arrays,
        }
    }

    /// () -> () bodies `i32.const k; drop` for k in 0..count.
    fn counting_module(count: u8) -> Vec<u8> {
        let bodies: Vec<Vec<u8>> = (0..count).map(|k| vec![0x41, k, 0x1a, 0x0b]).collect();
        let body_refs: Vec<&[u8]> = bodies.iter().map(Vec::as_slice).collect();
        TestModule::new().single_type(&[], &[]).bodies(&body_refs).build()
    }

    #[test]
    fn empty_module_emits_header_and_trivial_instantiate() {
        let dir = test_dir("empty");
        let bytes = TestModule::new().build();
        let module = decode(&bytes, DecodeOptions::default()).unwrap();

        write_module(&module, "empty", &write_options(&dir, 0, 1), None).unwrap();

        let header = fs::read_to_string(dir.join("mod.h")).unwrap();
        assert!(header.contains("#ifndef EMPTY_H"));
        assert!(header.contains("typedef struct emptyInstance"));
        assert!(header.contains("void emptyInstantiate(emptyInstance* i, void* (*resolve)(const char*, const char*));"));
        assert!(header.contains("wasmMemory* empty_memory(emptyInstance* i);"));

        let skeleton = fs::read_to_string(dir.join("mod.c")).unwrap();
        assert!(skeleton.contains("void emptyInstantiate"));
        assert!(skeleton.contains("void emptyFreeInstance"));
    }

    #[test]
    fn partitioned_files_are_deterministic_across_thread_counts() {
        let bytes = counting_module(9);
        let module = decode(&bytes, DecodeOptions::default()).unwrap();

        let dir_a = test_dir("det-t1");
        let dir_b = test_dir("det-t8");
        write_module(&module, "det", &write_options(&dir_a, 2, 1), None).unwrap();
        write_module(&module, "det", &write_options(&dir_b, 2, 8), None).unwrap();

        // ceil(9 / 2) = 5 implementation files, static prefix.
        let mut file_names: Vec<String> = fs::read_dir(&dir_a)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        file_names.sort();
        assert_eq!(file_names, vec!["mod.c", "mod.h", "s0001.c", "s0002.c", "s0003.c", "s0004.c", "s0005.c"]);

        for file_name in &file_names {
            let a = fs::read(dir_a.join(file_name)).unwrap();
            let b = fs::read(dir_b.join(file_name)).unwrap();
            assert_eq!(a, b, "{} differs between thread counts", file_name);
        }
    }

    #[test]
    fn single_file_mode_appends_bodies() {
        let dir = test_dir("single");
        let bytes = counting_module(3);
        let module = decode(&bytes, DecodeOptions::default()).unwrap();
        write_module(&module, "single", &write_options(&dir, 0, 2), None).unwrap();

        let skeleton = fs::read_to_string(dir.join("mod.c")).unwrap();
        assert!(skeleton.contains("void f0(singleInstance* i)"));
        assert!(skeleton.contains("void f2(singleInstance* i)"));
        assert!(fs::read_dir(&dir).unwrap().count() == 2);
    }

    #[test]
    fn reference_mode_emits_digest_aliases_and_dynamic_files_only() {
        let fingerprint = DecodeOptions { fingerprint: true, debug_info: false };

        let bytes = counting_module(3);
        let reference_bytes = counting_module(2);
        let module = decode(&bytes, fingerprint).unwrap();
        let reference = decode(&reference_bytes, fingerprint).unwrap();

        let ids = sorted_function_ids(&module);
        let reference_ids = sorted_function_ids(&reference);
        let partition = split_static_dynamic(&ids, &reference_ids);
        assert_eq!(partition.static_ids.len(), 2);
        assert_eq!(partition.dynamic_ids.len(), 1);

        let dir = test_dir("reference");
        write_module(&module, "refmod", &write_options(&dir, 1, 1), Some(&partition)).unwrap();

        let header = fs::read_to_string(dir.join("mod.h")).unwrap();
        // All three functions are aliased to digest symbols...
        assert_eq!(header.matches("#define f").count(), 3);
        assert!(header.contains("#define f2 f_"));

        // ...but only the dynamic body is written, into a d-prefixed file.
        let d0001 = fs::read_to_string(dir.join("d0001.c")).unwrap();
        assert!(d0001.contains("void f2(refmodInstance* i)"));
        assert!(!dir.join("d0002.c").exists());
        assert!(!dir.join("s0001.c").exists());
    }

    #[test]
    fn data_segment_blob_modes_write_sidecar() {
        let dir = test_dir("blob");
        // memory section (min 1 page) + data section: one segment "abc" at 8.
        let data_contents: Vec<u8> = vec![
            1, // count
            0, // memory index
            0x41, 8, 0x0b, // i32.const 8
            3, b'a', b'b', b'c',
        ];
        let bytes = TestModule::new()
            .section(5, &[1, 0, 1])
            .section(11, &data_contents)
            .build();
        let module = decode(&bytes, DecodeOptions::default()).unwrap();

        let mut options = write_options(&dir, 0, 1);
        options.data_segment_mode = DataSegmentMode::GnuLd;
        write_module(&module, "blob", &options, None).unwrap();

        assert_eq!(fs::read(dir.join("mod.dat")).unwrap(), b"abc");
        let skeleton = fs::read_to_string(dir.join("mod.c")).unwrap();
        assert!(skeleton.contains("blob_data_start"));
        assert!(skeleton.contains("memcpy(MEM0(i)->data + 8u, blobData() + 0u, 3u);"));
    }
}
