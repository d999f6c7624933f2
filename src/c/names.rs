//! C identifiers, types and literals for the generated code.

use std::collections::HashMap;
use std::path::Path;

use crate::wasm::module::ValueType;

/// Storage is unsigned throughout the generated code; signed operations
/// cast at the point of use.
pub fn c_type(value_type: ValueType) -> &'static str {
    match value_type {
        ValueType::I32 => "u32",
        ValueType::I64 => "u64",
        ValueType::F32 => "f32",
        ValueType::F64 => "f64",
    }
}

pub fn signed_c_type(value_type: ValueType) -> &'static str {
    match value_type {
        ValueType::I32 => "i32",
        ValueType::I64 => "i64",
        ValueType::F32 => "f32",
        ValueType::F64 => "f64",
    }
}

pub fn i32_literal(value: u32) -> String {
    format!("{}u", value)
}

pub fn i64_literal(value: u64) -> String {
    format!("{}ull", value)
}

/// Float literals are emitted as reinterpreted bit patterns, which keeps
/// them bit-exact (NaN payloads included) under any C compiler.
pub fn f32_literal(bits: u32) -> String {
    format!("f32_reinterpret_i32({:#x}u)", bits)
}

pub fn f64_literal(bits: u64) -> String {
    format!("f64_reinterpret_i64({:#x}ull)", bits)
}

pub fn local(index: u32) -> String {
    format!("l{}", index)
}

pub fn temporary(index: u32) -> String {
    format!("v{}", index)
}

pub fn label(id: u32) -> String {
    format!("L{}", id)
}

/// Strip everything that is not alphanumeric; prefix identifiers that would
/// start with a digit or come out empty.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        }
    }
    if out.is_empty() || out.chars().next().unwrap().is_ascii_digit() {
        out.insert(0, '_');
    }
    out
}

/// Module name derived from the input path: basename without extension,
/// non-alphanumeric characters stripped.
pub fn module_name_from_path(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("module");
    sanitize(stem)
}

pub fn hex_digest(hash: &[u8; 20]) -> String {
    let mut out = String::with_capacity(40);
    for byte in hash {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Resolves names for everything the emitter and the code generator write:
/// local function names, instance fields, accessor macros, export wrappers.
#[derive(Debug)]
pub struct Names {
    module: String,
    /// `<module>_` under -m, otherwise empty.
    prefix: String,
    /// Digest-derived linkage names (`f_<sha1>`) per function index, present
    /// in reference-partitioned mode.
    digest_names: HashMap<u32, String>,
}

impl Names {
    pub fn new(module: &str, multiple_modules: bool) -> Self {
        Names {
            module: module.to_string(),
            prefix: if multiple_modules { format!("{}_", module) } else { String::new() },
            digest_names: HashMap::new(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn set_digest_name(&mut self, function_index: u32, hash: &[u8; 20]) {
        self.digest_names.insert(function_index, format!("f_{}", hex_digest(hash)));
    }

    /// Digest name qualified by a signature id, for a body whose plain
    /// digest symbol is already taken at another signature.
    pub fn set_qualified_digest_name(&mut self, function_index: u32, hash: &[u8; 20], type_index: u32) {
        self.digest_names
            .insert(function_index, format!("f_{}_{}", hex_digest(hash), type_index));
    }

    /// The name call sites and definitions use for a local function. In
    /// reference mode this is `#define`d to the digest-derived symbol.
    pub fn function(&self, index: u32) -> String {
        format!("{}f{}", self.prefix, index)
    }

    /// The digest-derived linkage symbol, if the module is partitioned
    /// against a reference.
    pub fn digest_name(&self, index: u32) -> Option<&str> {
        self.digest_names.get(&index).map(String::as_str)
    }

    /// Instance field for an imported function / memory / table / global.
    pub fn import_field(&self, kind: char, index: u32) -> String {
        format!("{}{}", kind, index)
    }

    pub fn memory_macro(&self, index: u32) -> String {
        format!("{}MEM{}", self.prefix, index)
    }

    pub fn table_macro(&self, index: u32) -> String {
        format!("{}TBL{}", self.prefix, index)
    }

    pub fn instance_struct(&self) -> String {
        format!("{}Instance", self.module)
    }

    pub fn export(&self, field: &str) -> String {
        format!("{}_{}", self.module, sanitize(field))
    }

    pub fn instantiate(&self) -> String {
        format!("{}Instantiate", self.module)
    }

    pub fn free_instance(&self) -> String {
        format!("{}FreeInstance", self.module)
    }

    pub fn memory_accessor(&self) -> String {
        format!("{}_memory", self.module)
    }

    pub fn header_guard(&self) -> String {
        format!("{}_H", self.module.to_ascii_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_and_prefixes() {
        assert_eq!(sanitize("my-module.v2"), "mymodulev2");
        assert_eq!(sanitize("__main"), "main");
        assert_eq!(sanitize("2池"), "_2");
        assert_eq!(sanitize("---"), "_");
    }

    #[test]
    fn module_name_from_path_uses_basename() {
        assert_eq!(module_name_from_path(Path::new("/tmp/my-game.wasm")), "mygame");
        assert_eq!(module_name_from_path(Path::new("app.opt.wasm")), "appopt");
    }

    #[test]
    fn function_names_with_and_without_prefix() {
        let names = Names::new("mod", false);
        assert_eq!(names.function(3), "f3");
        let names = Names::new("mod", true);
        assert_eq!(names.function(3), "mod_f3");
        assert_eq!(names.export("run main"), "mod_runmain");
        assert_eq!(names.instance_struct(), "modInstance");
    }

    #[test]
    fn digest_names_are_hex() {
        let mut names = Names::new("mod", false);
        names.set_digest_name(1, &[0xab; 20]);
        assert_eq!(names.digest_name(1).unwrap(), &format!("f_{}", "ab".repeat(20)));
        assert_eq!(names.digest_name(0), None);
    }
}
