//! DWARF line-number lookup for `#line` directives in debug mode.
//!
//! WebAssembly debug info lives in `.debug_*` custom sections; addresses in
//! the line-number program are offsets relative to the start of the code
//! section. The gimli structures borrow reference-counted section readers,
//! so the lookup is flattened into owned rows here, right after decoding,
//! which lets the emitter workers share it without synchronisation.

use std::collections::HashMap;
use std::rc::Rc;

use gimli::{EndianRcSlice, LittleEndian, Reader as _, SectionId};

#[derive(Debug, Clone, Copy)]
struct LineRow {
    address: u64,
    file: u32,
    line: u32,
}

/// Sorted `code offset → (file, line)` lookup.
#[derive(Debug)]
pub struct LineMap {
    files: Vec<String>,
    rows: Vec<LineRow>,
}

impl LineMap {
    /// The source position covering `code_offset` (relative to the code
    /// section start): the row with the greatest address not beyond it.
    pub fn lookup(&self, code_offset: u64) -> Option<(&str, u32)> {
        let index = match self.rows.binary_search_by(|row| row.address.cmp(&code_offset)) {
            Ok(index) => index,
            Err(0) => return None,
            Err(insertion) => insertion - 1,
        };
        let row = self.rows[index];
        Some((self.files[row.file as usize].as_str(), row.line))
    }
}

type Reader = EndianRcSlice<LittleEndian>;

pub fn build_line_map(sections: &HashMap<&str, &[u8]>) -> gimli::Result<LineMap> {
    // Identify DWARF sections by their custom section name. Missing
    // sections default to empty, which gimli accepts.
    let loader = |section: SectionId| -> gimli::Result<Reader> {
        let data = sections.get(section.name()).copied().unwrap_or(&[]);
        Ok(EndianRcSlice::new(Rc::from(data), LittleEndian))
    };
    // There is no supplementary object file.
    let sup_loader = |_| Ok(EndianRcSlice::new(Rc::from(&[][..]), LittleEndian));
    let dwarf = gimli::Dwarf::load(loader, sup_loader)?;

    let mut files: Vec<String> = Vec::new();
    let mut file_indices: HashMap<String, u32> = HashMap::new();
    let mut rows: Vec<LineRow> = Vec::new();

    let mut units = dwarf.units();
    while let Some(header) = units.next()? {
        let unit = dwarf.unit(header)?;
        let program = match unit.line_program.clone() {
            Some(program) => program,
            None => continue,
        };

        let mut program_rows = program.rows();
        while let Some((header, row)) = program_rows.next_row()? {
            if row.end_sequence() {
                continue;
            }
            let line = match row.line() {
                Some(line) => line as u32,
                None => continue,
            };

            let file_name = match row.file(header) {
                Some(file) => {
                    let name = dwarf.attr_string(&unit, file.path_name())?;
                    let name = name.to_string_lossy()?.into_owned();
                    match file.directory(header) {
                        Some(directory) => {
                            let directory = dwarf.attr_string(&unit, directory)?;
                            let directory = directory.to_string_lossy()?;
                            if directory.is_empty() {
                                name
                            } else {
                                format!("{}/{}", directory, name)
                            }
                        }
                        None => name,
                    }
                }
                None => continue,
            };

            let file = match file_indices.get(&file_name) {
                Some(&index) => index,
                None => {
                    let index = files.len() as u32;
                    files.push(file_name.clone());
                    file_indices.insert(file_name, index);
                    index
                }
            };

            rows.push(LineRow { address: row.address(), file, line });
        }
    }

    rows.sort_by_key(|row| row.address);
    Ok(LineMap { files, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_picks_greatest_row_at_or_below() {
        let map = LineMap {
            files: vec!["a.c".to_string(), "b.c".to_string()],
            rows: vec![
                LineRow { address: 0x10, file: 0, line: 3 },
                LineRow { address: 0x18, file: 0, line: 4 },
                LineRow { address: 0x30, file: 1, line: 9 },
            ],
        };
        assert_eq!(map.lookup(0x0f), None);
        assert_eq!(map.lookup(0x10), Some(("a.c", 3)));
        assert_eq!(map.lookup(0x2f), Some(("a.c", 4)));
        assert_eq!(map.lookup(0x1000), Some(("b.c", 9)));
    }
}
