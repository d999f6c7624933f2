//! Per-function code generator.
//!
//! Translates one Wasm function body to a C function in a single forward
//! pass, opcode by opcode. Two data structures drive the translation: the
//! typed operand stack, which mimics the execution of the Wasm stack
//! machine at emission time, and the label-frame stack, which reconstructs
//! structured control flow as labels and gotos. Stack entries are literals,
//! temporaries, or short pure C expressions; at every control fork and
//! observable mutation the non-temporary entries are spilled into fresh
//! temporaries, which makes the operand stack a set of single-assignment
//! values the C compiler can re-optimise freely.

use crate::c::names::{self, Names};
use crate::error::{CompileError, Result};
use crate::wasm::buffer::Buffer;
use crate::wasm::module::{FuncType, Module, ValueType};

#[derive(Debug, Clone, Copy)]
pub struct GenOptions {
    /// Indent statements by block depth.
    pub pretty: bool,
    /// Emit #line directives from the DWARF line map.
    pub debug: bool,
}

/// One abstract operand: a value the Wasm stack would hold at runtime.
#[derive(Debug, Clone)]
struct Operand {
    ty: ValueType,
    expr: Expr,
}

#[derive(Debug, Clone)]
enum Expr {
    /// A constant, rendered as a C literal.
    Literal(String),
    /// A previously materialised temporary `v{n}`.
    Temp(u32),
    /// A short pure expression (local or global reference). Never survives
    /// across a mutation of what it reads.
    Cell(String),
}

impl Operand {
    fn text(&self) -> String {
        match &self.expr {
            Expr::Literal(s) | Expr::Cell(s) => s.clone(),
            Expr::Temp(n) => names::temporary(*n),
        }
    }

    fn is_temp(&self) -> bool {
        matches!(self.expr, Expr::Temp(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    /// The function body itself; its end label is the epilogue.
    Func,
    Block,
    /// Branches target the head (continue) label, emitted at entry.
    Loop,
    If,
}

/// One entry of the label stack: a `block`, `loop`, `if`, or the function
/// frame at the bottom.
#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    result: Option<ValueType>,
    /// Operand stack height at entry; inner code may not pop below it.
    stack_height: usize,
    /// For a loop this is the continue label; otherwise the end label.
    label: u32,
    /// Target of the initial `if (!cond) goto …`.
    else_label: Option<u32>,
    /// Temporary receiving the result at merges, allocated on first use.
    result_temp: Option<u32>,
    /// Whether any branch targets `label`, i.e. the label must be emitted.
    label_used: bool,
    else_seen: bool,
}

struct FuncGen<'m, 'a> {
    module: &'m Module<'a>,
    names: &'m Names,
    options: GenOptions,
    /// Index in the joint function index space.
    function_index: u32,
    func_type: &'m FuncType,
    /// Parameter types followed by declared locals.
    locals: Vec<ValueType>,

    buf: Buffer<'a>,
    /// Offset of the opcode currently being translated, for error messages.
    op_offset: usize,

    stack: Vec<Operand>,
    frames: Vec<Frame>,
    /// Temp index -> type; all are declared up front (C89).
    temps: Vec<ValueType>,
    next_label: u32,
    /// The function's return slot, once allocated.
    return_temp: Option<u32>,

    body: String,
    reachable: bool,
    /// Nesting depth of skipped control constructs inside dead code.
    unreachable_depth: u32,
    last_line: Option<(&'m str, u32)>,
}

/// Generate the complete C definition for the local function at
/// `function_index` (joint index space).
pub fn generate_function(
    module: &Module,
    names: &Names,
    function_index: u32,
    options: GenOptions,
) -> Result<String> {
    let imported = module.imported_function_count();
    let function = &module.functions[(function_index - imported) as usize];
    let func_type = &module.types[function.type_index as usize];

    let mut locals = func_type.params.clone();
    locals.extend_from_slice(&function.locals);

    let body_bytes = module.body_bytes(function);
    let mut gen = FuncGen {
        module,
        names,
        options,
        function_index,
        func_type,
        locals,
        buf: Buffer::new(body_bytes),
        op_offset: function.code.start,
        stack: Vec::new(),
        frames: Vec::new(),
        temps: Vec::new(),
        next_label: 0,
        return_temp: None,
        body: String::new(),
        reachable: true,
        unreachable_depth: 0,
        last_line: None,
    };

    let func_frame_label = gen.alloc_label();
    gen.frames.push(Frame {
        kind: FrameKind::Func,
        result: func_type.result(),
        stack_height: 0,
        label: func_frame_label,
        else_label: None,
        result_temp: None,
        label_used: false,
        else_seen: false,
    });

    let code_start = function.code.start;
    while !gen.frames.is_empty() {
        gen.op_offset = code_start + gen.buf.offset();
        if gen.reachable {
            gen.emit_line_directive();
        }
        let opcode = gen.buf.read_byte().map_err(|err| gen.rebase(err, code_start))?;
        gen.translate(opcode).map_err(|err| gen.rebase(err, code_start))?;
    }

    if !gen.buf.at_end() {
        return Err(gen.type_error(format!("{} byte(s) after the function's final end", gen.buf.remaining())));
    }

    Ok(gen.assemble())
}

/// The C signature of the local function at `function_index`, without a
/// trailing semicolon.
pub fn signature(module: &Module, names: &Names, function_index: u32) -> String {
    let func_type = module
        .function_type(function_index)
        .expect("signature of a function index out of range");
    let result = match func_type.result() {
        Some(ty) => names::c_type(ty),
        None => "void",
    };
    let mut out = format!(
        "{} {}({}* i",
        result,
        names.function(function_index),
        names.instance_struct()
    );
    for (index, &param) in func_type.params.iter().enumerate() {
        out.push_str(&format!(", {} {}", names::c_type(param), names::local(index as u32)));
    }
    out.push(')');
    out
}

impl<'m, 'a> FuncGen<'m, 'a> {
    // ------------------------------------------------------------------
    // Text output

    fn stmt(&mut self, line: &str) {
        if self.options.pretty {
            for _ in 0..self.frames.len() {
                self.body.push_str("  ");
            }
        }
        self.body.push_str(line);
        self.body.push('\n');
    }

    /// Labels sit in column 0 regardless of pretty printing.
    fn label_stmt(&mut self, label: u32) {
        self.body.push_str(&names::label(label));
        self.body.push_str(":;\n");
    }

    fn emit_line_directive(&mut self) {
        if !self.options.debug {
            return;
        }
        let line_map = match &self.module.line_map {
            Some(line_map) => line_map,
            None => return,
        };
        let relative = (self.op_offset - self.module.code_section_offset) as u64;
        if let Some((file, line)) = line_map.lookup(relative) {
            if self.last_line != Some((file, line)) {
                self.last_line = Some((file, line));
                self.body.push_str(&format!("#line {} \"{}\"\n", line, file));
            }
        }
    }

    fn assemble(mut self) -> String {
        let mut out = signature(self.module, self.names, self.function_index);
        out.push_str(" {\n");

        let indent = if self.options.pretty { "  " } else { "" };
        // Zone 2: zero-initialised declared locals and the return slot,
        // then the temporaries.
        for (index, &ty) in self.locals.iter().enumerate().skip(self.func_type.params.len()) {
            out.push_str(&format!("{}{} {} = 0;\n", indent, names::c_type(ty), names::local(index as u32)));
        }
        for (index, &ty) in self.temps.iter().enumerate() {
            let init = if Some(index as u32) == self.return_temp { " = 0" } else { "" };
            out.push_str(&format!("{}{} {}{};\n", indent, names::c_type(ty), names::temporary(index as u32), init));
        }

        out.push_str(&self.body);
        out.push_str("}\n");
        self.body.clear();
        out
    }

    // ------------------------------------------------------------------
    // Abstract state

    fn alloc_label(&mut self) -> u32 {
        let label = self.next_label;
        self.next_label += 1;
        label
    }

    fn alloc_temp(&mut self, ty: ValueType) -> u32 {
        self.temps.push(ty);
        (self.temps.len() - 1) as u32
    }

    fn type_error(&self, message: impl Into<String>) -> CompileError {
        CompileError::TypeMismatch {
            function: self.function_index,
            offset: self.op_offset,
            message: message.into(),
        }
    }

    /// Buffer errors from the body cursor are relative to the body slice;
    /// rebase them onto module-absolute offsets.
    fn rebase(&self, err: CompileError, code_start: usize) -> CompileError {
        match err {
            CompileError::ReadShort { offset, wanted } => {
                CompileError::ReadShort { offset: offset + code_start, wanted }
            }
            CompileError::LebOverflow { offset } => {
                CompileError::LebOverflow { offset: offset + code_start }
            }
            other => other,
        }
    }

    fn push(&mut self, ty: ValueType, expr: Expr) {
        self.stack.push(Operand { ty, expr });
    }

    fn pop(&mut self, expected: Option<ValueType>) -> Result<Operand> {
        let floor = self.frames.last().map(|f| f.stack_height).unwrap_or(0);
        if self.stack.len() <= floor {
            return Err(self.type_error("operand stack is empty"));
        }
        let operand = self.stack.pop().unwrap();
        if let Some(expected) = expected {
            if operand.ty != expected {
                return Err(self.type_error(format!("expected {} operand, found {}", expected, operand.ty)));
            }
        }
        Ok(operand)
    }

    /// Materialise every stack entry that is not already a temporary.
    fn spill(&mut self) {
        for index in 0..self.stack.len() {
            if self.stack[index].is_temp() {
                continue;
            }
            let ty = self.stack[index].ty;
            let text = self.stack[index].text();
            let temp = self.alloc_temp(ty);
            self.stmt(&format!("{} = {};", names::temporary(temp), text));
            self.stack[index].expr = Expr::Temp(temp);
        }
    }

    /// Pop operands, emit an assignment of `init` to a fresh temporary, and
    /// push that temporary.
    fn push_assigned(&mut self, ty: ValueType, init: String) {
        let temp = self.alloc_temp(ty);
        self.stmt(&format!("{} = {};", names::temporary(temp), init));
        self.push(ty, Expr::Temp(temp));
    }

    fn result_temp(&mut self, frame_index: usize) -> Option<u32> {
        let ty = self.frames[frame_index].result?;
        if let Some(temp) = self.frames[frame_index].result_temp {
            return Some(temp);
        }
        let temp = self.alloc_temp(ty);
        self.frames[frame_index].result_temp = Some(temp);
        if self.frames[frame_index].kind == FrameKind::Func {
            self.return_temp = Some(temp);
        }
        Some(temp)
    }

    // ------------------------------------------------------------------
    // Environment lookups

    fn local_type(&self, index: u32) -> Result<ValueType> {
        self.locals.get(index as usize).copied().ok_or(CompileError::IndexOutOfRange {
            space: "local",
            index,
            limit: self.locals.len() as u32,
            offset: self.op_offset,
        })
    }

    fn global_ref(&self, index: u32) -> Result<(ValueType, bool, String)> {
        let global_type = self.module.global_type(index).ok_or(CompileError::IndexOutOfRange {
            space: "global",
            index,
            limit: self.module.global_count(),
            offset: self.op_offset,
        })?;
        let imported = (index as usize) < self.module.imported_globals.len();
        let text = if imported {
            format!("(*i->{})", self.names.import_field('g', index))
        } else {
            format!("i->{}", self.names.import_field('g', index))
        };
        Ok((global_type.value_type, global_type.mutable, text))
    }

    fn memory(&self) -> Result<String> {
        if self.module.memory_count() == 0 {
            return Err(CompileError::IndexOutOfRange {
                space: "memory",
                index: 0,
                limit: 0,
                offset: self.op_offset,
            });
        }
        Ok(format!("{}(i)", self.names.memory_macro(0)))
    }

    fn table(&self) -> Result<String> {
        if self.module.table_count() == 0 {
            return Err(CompileError::IndexOutOfRange {
                space: "table",
                index: 0,
                limit: 0,
                offset: self.op_offset,
            });
        }
        Ok(format!("{}(i)", self.names.table_macro(0)))
    }

    // ------------------------------------------------------------------
    // Immediates

    fn read_block_type(&mut self) -> Result<Option<ValueType>> {
        match self.buf.read_byte()? {
            0x40 => Ok(None),
            0x7f => Ok(Some(ValueType::I32)),
            0x7e => Ok(Some(ValueType::I64)),
            0x7d => Ok(Some(ValueType::F32)),
            0x7c => Ok(Some(ValueType::F64)),
            byte => Err(CompileError::UnsupportedProposal {
                function: self.function_index,
                offset: self.op_offset,
                opcode: byte as u32,
            }),
        }
    }

    /// (alignment hint, offset). The hint is validated as present but
    /// otherwise ignored.
    fn read_mem_arg(&mut self) -> Result<u32> {
        let _align = self.buf.read_var_u32()?;
        self.buf.read_var_u32()
    }

    // ------------------------------------------------------------------
    // Control flow

    fn push_frame(&mut self, kind: FrameKind, result: Option<ValueType>) -> usize {
        let label = self.alloc_label();
        let else_label = if kind == FrameKind::If { Some(self.alloc_label()) } else { None };
        self.frames.push(Frame {
            kind,
            result,
            stack_height: self.stack.len(),
            label,
            else_label,
            result_temp: None,
            label_used: false,
            else_seen: false,
        });
        self.frames.len() - 1
    }

    fn target_frame(&self, depth: u32) -> Result<usize> {
        let frames = self.frames.len() as u32;
        if depth >= frames {
            return Err(CompileError::LabelOutOfRange {
                function: self.function_index,
                offset: self.op_offset,
                depth,
                frames,
            });
        }
        Ok((frames - 1 - depth) as usize)
    }

    /// The result-copy assignment (if the target expects a value) and the
    /// goto target for a branch to `frame_index`. Loops take no values and
    /// branch to their continue label.
    fn branch_parts(&mut self, frame_index: usize) -> Result<(Option<String>, u32)> {
        if self.frames[frame_index].kind == FrameKind::Loop {
            return Ok((None, self.frames[frame_index].label));
        }
        self.frames[frame_index].label_used = true;
        let label = self.frames[frame_index].label;
        let assignment = match self.frames[frame_index].result {
            None => None,
            Some(ty) => {
                let value = self.stack.last().cloned().ok_or_else(|| self.type_error("branch expects a value, operand stack is empty"))?;
                if value.ty != ty {
                    return Err(self.type_error(format!("branch expects {}, found {}", ty, value.ty)));
                }
                let temp = self.result_temp(frame_index).unwrap();
                Some(format!("{} = {};", names::temporary(temp), value.text()))
            }
        };
        Ok((assignment, label))
    }

    /// After a terminator the stack is polymorphic; drop everything above
    /// the innermost frame.
    fn terminate(&mut self) {
        self.reachable = false;
        if let Some(frame) = self.frames.last() {
            self.stack.truncate(frame.stack_height);
        }
    }

    fn translate_end(&mut self) -> Result<()> {
        let frame = self.frames.pop().expect("end with no open frame");

        if self.reachable {
            let expected = frame.stack_height + frame.result.iter().count();
            if self.stack.len() != expected {
                self.frames.push(frame);
                return Err(self.type_error(format!(
                    "block ends with {} value(s) on the stack, {} declared",
                    self.stack.len(),
                    expected - self.frames.last().unwrap().stack_height
                )));
            }
        }

        match frame.kind {
            FrameKind::Func => self.end_function(frame),
            FrameKind::Loop => {
                // The continue label was emitted at the head; nothing may
                // branch to a loop's end, so there is no merge.
                if self.reachable {
                    if frame.result.is_some() {
                        let value = self.stack.pop().unwrap();
                        self.stack.truncate(frame.stack_height);
                        self.stack.push(value);
                    }
                } else {
                    self.stack.truncate(frame.stack_height);
                    if let Some(ty) = frame.result {
                        // Dead result; a fresh temp keeps the types sound.
                        let temp = self.alloc_temp(ty);
                        self.push(ty, Expr::Temp(temp));
                    }
                }
                Ok(())
            }
            FrameKind::Block => self.end_block_like(frame),
            FrameKind::If => {
                if !frame.else_seen {
                    if frame.result.is_some() {
                        return Err(self.type_error("if with a result but no else"));
                    }
                    // The not-taken path lands here.
                    let else_label = frame.else_label.unwrap();
                    self.stack.truncate(frame.stack_height);
                    self.label_stmt(else_label);
                    if frame.label_used {
                        self.label_stmt(frame.label);
                    }
                    self.reachable = true;
                    Ok(())
                } else {
                    self.end_block_like(frame)
                }
            }
        }
    }

    /// Shared end handling for blocks and if/else constructs: merge the
    /// fallthrough value into the result temp, emit the end label if any
    /// branch targets it, and push the merged result.
    fn end_block_like(&mut self, frame: Frame) -> Result<()> {
        let frame_was_reachable = self.reachable;
        let mut fallthrough = None;
        if frame_was_reachable && frame.result.is_some() {
            fallthrough = Some(self.stack.pop().unwrap());
        }
        self.stack.truncate(frame.stack_height);

        self.frames.push(frame);
        let frame_index = self.frames.len() - 1;

        if self.frames[frame_index].label_used {
            if let Some(value) = &fallthrough {
                let temp = self.result_temp(frame_index).unwrap();
                let line = format!("{} = {};", names::temporary(temp), value.text());
                self.stmt(&line);
            }
            let label = self.frames[frame_index].label;
            self.label_stmt(label);
            self.reachable = true;
        }

        let frame = self.frames.pop().unwrap();
        if let Some(ty) = frame.result {
            if frame.label_used || fallthrough.as_ref().map(|v| !v.is_temp()).unwrap_or(true) {
                let temp = match frame.result_temp {
                    Some(temp) => temp,
                    None => self.alloc_temp(ty),
                };
                if let (false, Some(value)) = (frame.label_used, &fallthrough) {
                    let line = format!("{} = {};", names::temporary(temp), value.text());
                    self.stmt(&line);
                }
                self.push(ty, Expr::Temp(temp));
            } else {
                // Single fallthrough producer that is already a temp.
                self.push(ty, fallthrough.unwrap().expr);
            }
        }
        Ok(())
    }

    fn end_function(&mut self, frame: Frame) -> Result<()> {
        // Keep the frame on the stack while emitting, so statements indent
        // at function depth.
        let reachable = self.reachable;
        self.frames.push(frame);
        let frame_index = self.frames.len() - 1;

        if self.frames[frame_index].label_used {
            if reachable && self.frames[frame_index].result.is_some() {
                let value = self.stack.pop().unwrap();
                let temp = self.result_temp(frame_index).unwrap();
                let line = format!("{} = {};", names::temporary(temp), value.text());
                self.stmt(&line);
            }
            let label = self.frames[frame_index].label;
            let result_temp = self.frames[frame_index].result_temp;
            self.label_stmt(label);
            match result_temp {
                Some(temp) => {
                    let line = format!("return {};", names::temporary(temp));
                    self.stmt(&line);
                }
                None => self.stmt("return;"),
            }
        } else if reachable {
            match self.frames[frame_index].result {
                Some(_) => {
                    let value = self.stack.pop().unwrap();
                    let line = format!("return {};", value.text());
                    self.stmt(&line);
                }
                None => self.stmt("return;"),
            }
        } else if let Some(ty) = self.frames[frame_index].result {
            // A function that only ever traps has neither a used epilogue
            // nor a reachable fallthrough; C still wants a return statement
            // for a non-void function.
            let line = format!("return {};", zero_literal(ty));
            self.stmt(&line);
        }

        self.frames.pop();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dead code

    /// Inside dead code only the control structure is tracked; immediates
    /// are still decoded so the stream stays in sync.
    fn skip_dead(&mut self, opcode: u8) -> Result<()> {
        match opcode {
            0x02 | 0x03 | 0x04 => {
                self.read_block_type()?;
                self.unreachable_depth += 1;
            }
            0x05 => {
                if self.unreachable_depth == 0 {
                    return self.translate_else();
                }
            }
            0x0b => {
                if self.unreachable_depth == 0 {
                    return self.translate_end();
                }
                self.unreachable_depth -= 1;
            }
            _ => self.skip_immediates(opcode)?,
        }
        Ok(())
    }

    fn skip_immediates(&mut self, opcode: u8) -> Result<()> {
        match opcode {
            // br, br_if, call, local/global ops, memory.size/grow
            0x0c | 0x0d | 0x10 | 0x20..=0x24 | 0x3f | 0x40 => {
                self.buf.read_var_u32()?;
            }
            0x0e => {
                let count = self.buf.read_var_u32()?;
                for _ in 0..=count {
                    self.buf.read_var_u32()?;
                }
            }
            0x11 => {
                self.buf.read_var_u32()?;
                self.buf.read_byte()?;
            }
            0x28..=0x3e => {
                self.read_mem_arg()?;
            }
            0x41 => {
                self.buf.read_var_i32()?;
            }
            0x42 => {
                self.buf.read_var_i64()?;
            }
            0x43 => {
                self.buf.read_f32_bits()?;
            }
            0x44 => {
                self.buf.read_f64_bits()?;
            }
            _ => {}
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Operator translation

    fn translate(&mut self, opcode: u8) -> Result<()> {
        if !self.reachable {
            return self.skip_dead(opcode);
        }

        use ValueType::*;
        match opcode {
            0x00 => {
                self.stmt("TRAP(wasmTrapUnreachable);");
                self.terminate();
            }
            0x01 => {} // nop

            // Control
            0x02 => {
                let result = self.read_block_type()?;
                self.push_frame(FrameKind::Block, result);
            }
            0x03 => {
                let result = self.read_block_type()?;
                let frame_index = self.push_frame(FrameKind::Loop, result);
                let label = self.frames[frame_index].label;
                self.label_stmt(label);
            }
            0x04 => {
                let result = self.read_block_type()?;
                self.spill();
                let condition = self.pop(Some(I32))?;
                let frame_index = self.push_frame(FrameKind::If, result);
                let else_label = self.frames[frame_index].else_label.unwrap();
                let line = format!("if (!({})) {{ goto {}; }}", condition.text(), names::label(else_label));
                self.stmt(&line);
            }
            0x05 => self.translate_else()?,
            0x0b => self.translate_end()?,
            0x0c => {
                let depth = self.buf.read_var_u32()?;
                let frame_index = self.target_frame(depth)?;
                self.spill();
                let (assignment, label) = self.branch_parts(frame_index)?;
                if let Some(assignment) = assignment {
                    self.stmt(&assignment);
                }
                let line = format!("goto {};", names::label(label));
                self.stmt(&line);
                self.terminate();
            }
            0x0d => {
                let depth = self.buf.read_var_u32()?;
                let frame_index = self.target_frame(depth)?;
                self.spill();
                let condition = self.pop(Some(I32))?;
                let (assignment, label) = self.branch_parts(frame_index)?;
                let line = match assignment {
                    Some(assignment) => format!(
                        "if ({}) {{ {} goto {}; }}",
                        condition.text(),
                        assignment,
                        names::label(label)
                    ),
                    None => format!("if ({}) {{ goto {}; }}", condition.text(), names::label(label)),
                };
                self.stmt(&line);
            }
            0x0e => {
                let count = self.buf.read_var_u32()?;
                let mut depths = Vec::with_capacity(count as usize + 1);
                for _ in 0..=count {
                    depths.push(self.buf.read_var_u32()?);
                }
                self.spill();
                let index = self.pop(Some(I32))?;
                let line = format!("switch ({}) {{", index.text());
                self.stmt(&line);
                let default_depth = *depths.last().unwrap();
                for (case, &depth) in depths[..depths.len() - 1].iter().enumerate() {
                    let frame_index = self.target_frame(depth)?;
                    let (assignment, label) = self.branch_parts(frame_index)?;
                    let line = format!(
                        "case {}: {}goto {};",
                        case,
                        assignment.map(|a| format!("{} ", a)).unwrap_or_default(),
                        names::label(label)
                    );
                    self.stmt(&line);
                }
                let frame_index = self.target_frame(default_depth)?;
                let (assignment, label) = self.branch_parts(frame_index)?;
                let line = format!(
                    "default: {}goto {};",
                    assignment.map(|a| format!("{} ", a)).unwrap_or_default(),
                    names::label(label)
                );
                self.stmt(&line);
                self.stmt("}");
                self.terminate();
            }
            0x0f => {
                self.spill();
                let (assignment, label) = self.branch_parts(0)?;
                if let Some(assignment) = assignment {
                    self.stmt(&assignment);
                }
                let line = format!("goto {};", names::label(label));
                self.stmt(&line);
                self.terminate();
            }

            // Calls
            0x10 => {
                let callee = self.buf.read_var_u32()?;
                let callee_type = self
                    .module
                    .function_type(callee)
                    .cloned()
                    .ok_or(CompileError::IndexOutOfRange {
                        space: "function",
                        index: callee,
                        limit: self.module.function_count(),
                        offset: self.op_offset,
                    })?;
                self.spill();
                let arguments = self.pop_arguments(&callee_type)?;
                let call = if callee < self.module.imported_function_count() {
                    format!("i->{}(i{})", self.names.import_field('f', callee), arguments)
                } else {
                    format!("{}(i{})", self.names.function(callee), arguments)
                };
                match callee_type.result() {
                    Some(ty) => self.push_assigned(ty, call),
                    None => {
                        let line = format!("{};", call);
                        self.stmt(&line);
                    }
                }
            }
            0x11 => {
                let type_index = self.buf.read_var_u32()?;
                if type_index as usize >= self.module.types.len() {
                    return Err(CompileError::IndexOutOfRange {
                        space: "type",
                        index: type_index,
                        limit: self.module.types.len() as u32,
                        offset: self.op_offset,
                    });
                }
                self.buf.read_byte()?; // reserved table index
                let callee_type = self.module.types[type_index as usize].clone();
                let type_id = self.module.canonical_type_index(type_index);
                let table = self.table()?;
                self.spill();
                let index = self.pop(Some(I32))?;
                let arguments = self.pop_arguments(&callee_type)?;

                let line = format!("if ({} >= {}->size) {{ TRAP(wasmTrapOutOfBounds); }}", index.text(), table);
                self.stmt(&line);
                let line = format!(
                    "if ({}->elements[{}].typeId != {}u || {}->elements[{}].fn == NULL) {{ TRAP(wasmTrapIndirectCallTypeMismatch); }}",
                    table, index.text(), type_id, table, index.text()
                );
                self.stmt(&line);

                let mut pointer_type = String::from("void*");
                for &param in &callee_type.params {
                    pointer_type.push_str(", ");
                    pointer_type.push_str(names::c_type(param));
                }
                let result = match callee_type.result() {
                    Some(ty) => names::c_type(ty),
                    None => "void",
                };
                let call = format!(
                    "(({} (*)({})){}->elements[{}].fn)(i{})",
                    result, pointer_type, table, index.text(), arguments
                );
                match callee_type.result() {
                    Some(ty) => self.push_assigned(ty, call),
                    None => {
                        let line = format!("{};", call);
                        self.stmt(&line);
                    }
                }
            }

            // Parametric
            0x1a => {
                self.pop(None)?;
            }
            0x1b => {
                let condition = self.pop(Some(I32))?;
                let b = self.pop(None)?;
                let a = self.pop(Some(b.ty))?;
                self.push_assigned(a.ty, format!("{} ? {} : {}", condition.text(), a.text(), b.text()));
            }

            // Variables
            0x20 => {
                let index = self.buf.read_var_u32()?;
                let ty = self.local_type(index)?;
                self.push(ty, Expr::Cell(names::local(index)));
            }
            0x21 => {
                let index = self.buf.read_var_u32()?;
                let ty = self.local_type(index)?;
                self.spill();
                let value = self.pop(Some(ty))?;
                let line = format!("{} = {};", names::local(index), value.text());
                self.stmt(&line);
            }
            0x22 => {
                let index = self.buf.read_var_u32()?;
                let ty = self.local_type(index)?;
                self.spill();
                let value = self.stack.last().cloned().ok_or_else(|| self.type_error("local.tee on an empty stack"))?;
                if value.ty != ty {
                    return Err(self.type_error(format!("local.tee expects {}, found {}", ty, value.ty)));
                }
                let line = format!("{} = {};", names::local(index), value.text());
                self.stmt(&line);
            }
            0x23 => {
                let index = self.buf.read_var_u32()?;
                let (ty, _mutable, text) = self.global_ref(index)?;
                self.push(ty, Expr::Cell(text));
            }
            0x24 => {
                let index = self.buf.read_var_u32()?;
                let (ty, mutable, text) = self.global_ref(index)?;
                if !mutable {
                    return Err(self.type_error(format!("global.set of immutable global {}", index)));
                }
                self.spill();
                let value = self.pop(Some(ty))?;
                let line = format!("{} = {};", text, value.text());
                self.stmt(&line);
            }

            // Memory
            0x28 => self.load(I32, "i32_load")?,
            0x29 => self.load(I64, "i64_load")?,
            0x2a => self.load(F32, "f32_load")?,
            0x2b => self.load(F64, "f64_load")?,
            0x2c => self.load(I32, "i32_load8_s")?,
            0x2d => self.load(I32, "i32_load8_u")?,
            0x2e => self.load(I32, "i32_load16_s")?,
            0x2f => self.load(I32, "i32_load16_u")?,
            0x30 => self.load(I64, "i64_load8_s")?,
            0x31 => self.load(I64, "i64_load8_u")?,
            0x32 => self.load(I64, "i64_load16_s")?,
            0x33 => self.load(I64, "i64_load16_u")?,
            0x34 => self.load(I64, "i64_load32_s")?,
            0x35 => self.load(I64, "i64_load32_u")?,
            0x36 => self.store(I32, "i32_store")?,
            0x37 => self.store(I64, "i64_store")?,
            0x38 => self.store(F32, "f32_store")?,
            0x39 => self.store(F64, "f64_store")?,
            0x3a => self.store(I32, "i32_store8")?,
            0x3b => self.store(I32, "i32_store16")?,
            0x3c => self.store(I64, "i64_store8")?,
            0x3d => self.store(I64, "i64_store16")?,
            0x3e => self.store(I64, "i64_store32")?,
            0x3f => {
                self.buf.read_byte()?; // reserved memory index
                let memory = self.memory()?;
                self.push_assigned(I32, format!("{}->pages", memory));
            }
            0x40 => {
                self.buf.read_byte()?;
                let memory = self.memory()?;
                self.spill();
                let delta = self.pop(Some(I32))?;
                self.push_assigned(I32, format!("wasmMemoryGrow({}, {})", memory, delta.text()));
            }

            // Constants
            0x41 => {
                let value = self.buf.read_var_i32()? as u32;
                self.push(I32, Expr::Literal(names::i32_literal(value)));
            }
            0x42 => {
                let value = self.buf.read_var_i64()? as u64;
                self.push(I64, Expr::Literal(names::i64_literal(value)));
            }
            0x43 => {
                let bits = self.buf.read_f32_bits()?;
                self.push(F32, Expr::Literal(names::f32_literal(bits)));
            }
            0x44 => {
                let bits = self.buf.read_f64_bits()?;
                self.push(F64, Expr::Literal(names::f64_literal(bits)));
            }

            // i32 comparisons
            0x45 => self.test_op(I32, "0u")?,
            0x46 => self.compare(I32, "==", false)?,
            0x47 => self.compare(I32, "!=", false)?,
            0x48 => self.compare(I32, "<", true)?,
            0x49 => self.compare(I32, "<", false)?,
            0x4a => self.compare(I32, ">", true)?,
            0x4b => self.compare(I32, ">", false)?,
            0x4c => self.compare(I32, "<=", true)?,
            0x4d => self.compare(I32, "<=", false)?,
            0x4e => self.compare(I32, ">=", true)?,
            0x4f => self.compare(I32, ">=", false)?,

            // i64 comparisons
            0x50 => self.test_op(I64, "0ull")?,
            0x51 => self.compare(I64, "==", false)?,
            0x52 => self.compare(I64, "!=", false)?,
            0x53 => self.compare(I64, "<", true)?,
            0x54 => self.compare(I64, "<", false)?,
            0x55 => self.compare(I64, ">", true)?,
            0x56 => self.compare(I64, ">", false)?,
            0x57 => self.compare(I64, "<=", true)?,
            0x58 => self.compare(I64, "<=", false)?,
            0x59 => self.compare(I64, ">=", true)?,
            0x5a => self.compare(I64, ">=", false)?,

            // float comparisons
            0x5b => self.compare(F32, "==", false)?,
            0x5c => self.compare(F32, "!=", false)?,
            0x5d => self.compare(F32, "<", false)?,
            0x5e => self.compare(F32, ">", false)?,
            0x5f => self.compare(F32, "<=", false)?,
            0x60 => self.compare(F32, ">=", false)?,
            0x61 => self.compare(F64, "==", false)?,
            0x62 => self.compare(F64, "!=", false)?,
            0x63 => self.compare(F64, "<", false)?,
            0x64 => self.compare(F64, ">", false)?,
            0x65 => self.compare(F64, "<=", false)?,
            0x66 => self.compare(F64, ">=", false)?,

            // i32 arithmetic
            0x67 => self.helper_unop(I32, "i32_clz")?,
            0x68 => self.helper_unop(I32, "i32_ctz")?,
            0x69 => self.helper_unop(I32, "i32_popcnt")?,
            0x6a => self.binop(I32, "+")?,
            0x6b => self.binop(I32, "-")?,
            0x6c => self.binop(I32, "*")?,
            0x6d => self.div_s(I32)?,
            0x6e => self.div_u(I32)?,
            0x6f => self.rem_s(I32)?,
            0x70 => self.rem_u(I32)?,
            0x71 => self.binop(I32, "&")?,
            0x72 => self.binop(I32, "|")?,
            0x73 => self.binop(I32, "^")?,
            0x74 => self.shift(I32, "<<", false)?,
            0x75 => self.shift(I32, ">>", true)?,
            0x76 => self.shift(I32, ">>", false)?,
            0x77 => self.rotate(I32, true)?,
            0x78 => self.rotate(I32, false)?,

            // i64 arithmetic
            0x79 => self.helper_unop(I64, "i64_clz")?,
            0x7a => self.helper_unop(I64, "i64_ctz")?,
            0x7b => self.helper_unop(I64, "i64_popcnt")?,
            0x7c => self.binop(I64, "+")?,
            0x7d => self.binop(I64, "-")?,
            0x7e => self.binop(I64, "*")?,
            0x7f => self.div_s(I64)?,
            0x80 => self.div_u(I64)?,
            0x81 => self.rem_s(I64)?,
            0x82 => self.rem_u(I64)?,
            0x83 => self.binop(I64, "&")?,
            0x84 => self.binop(I64, "|")?,
            0x85 => self.binop(I64, "^")?,
            0x86 => self.shift(I64, "<<", false)?,
            0x87 => self.shift(I64, ">>", true)?,
            0x88 => self.shift(I64, ">>", false)?,
            0x89 => self.rotate(I64, true)?,
            0x8a => self.rotate(I64, false)?,

            // f32 arithmetic
            0x8b => self.helper_unop(F32, "f32_abs")?,
            0x8c => self.neg(F32)?,
            0x8d => self.helper_unop(F32, "f32_ceil")?,
            0x8e => self.helper_unop(F32, "f32_floor")?,
            0x8f => self.helper_unop(F32, "f32_trunc")?,
            0x90 => self.helper_unop(F32, "f32_nearest")?,
            0x91 => self.helper_unop(F32, "f32_sqrt")?,
            0x92 => self.binop(F32, "+")?,
            0x93 => self.binop(F32, "-")?,
            0x94 => self.binop(F32, "*")?,
            0x95 => self.binop(F32, "/")?,
            0x96 => self.helper_binop(F32, "f32_min")?,
            0x97 => self.helper_binop(F32, "f32_max")?,
            0x98 => self.helper_binop(F32, "f32_copysign")?,

            // f64 arithmetic
            0x99 => self.helper_unop(F64, "f64_abs")?,
            0x9a => self.neg(F64)?,
            0x9b => self.helper_unop(F64, "f64_ceil")?,
            0x9c => self.helper_unop(F64, "f64_floor")?,
            0x9d => self.helper_unop(F64, "f64_trunc")?,
            0x9e => self.helper_unop(F64, "f64_nearest")?,
            0x9f => self.helper_unop(F64, "f64_sqrt")?,
            0xa0 => self.binop(F64, "+")?,
            0xa1 => self.binop(F64, "-")?,
            0xa2 => self.binop(F64, "*")?,
            0xa3 => self.binop(F64, "/")?,
            0xa4 => self.helper_binop(F64, "f64_min")?,
            0xa5 => self.helper_binop(F64, "f64_max")?,
            0xa6 => self.helper_binop(F64, "f64_copysign")?,

            // Conversions
            0xa7 => self.convert(I64, I32, "(u32)")?,
            0xa8 => self.trunc_float(F32, I32, true)?,
            0xa9 => self.trunc_float(F32, I32, false)?,
            0xaa => self.trunc_float(F64, I32, true)?,
            0xab => self.trunc_float(F64, I32, false)?,
            0xac => self.convert(I32, I64, "(u64)(i64)(i32)")?,
            0xad => self.convert(I32, I64, "(u64)")?,
            0xae => self.trunc_float(F32, I64, true)?,
            0xaf => self.trunc_float(F32, I64, false)?,
            0xb0 => self.trunc_float(F64, I64, true)?,
            0xb1 => self.trunc_float(F64, I64, false)?,
            0xb2 => self.convert(I32, F32, "(f32)(i32)")?,
            0xb3 => self.convert(I32, F32, "(f32)")?,
            0xb4 => self.convert(I64, F32, "(f32)(i64)")?,
            0xb5 => self.convert(I64, F32, "(f32)")?,
            0xb6 => self.convert(F64, F32, "(f32)")?,
            0xb7 => self.convert(I32, F64, "(f64)(i32)")?,
            0xb8 => self.convert(I32, F64, "(f64)")?,
            0xb9 => self.convert(I64, F64, "(f64)(i64)")?,
            0xba => self.convert(I64, F64, "(f64)")?,
            0xbb => self.convert(F32, F64, "(f64)")?,
            0xbc => self.helper_convert(F32, I32, "i32_reinterpret_f32")?,
            0xbd => self.helper_convert(F64, I64, "i64_reinterpret_f64")?,
            0xbe => self.helper_convert(I32, F32, "f32_reinterpret_i32")?,
            0xbf => self.helper_convert(I64, F64, "f64_reinterpret_i64")?,

            opcode => {
                return Err(CompileError::UnsupportedProposal {
                    function: self.function_index,
                    offset: self.op_offset,
                    opcode: opcode as u32,
                })
            }
        }
        Ok(())
    }

    fn translate_else(&mut self) -> Result<()> {
        let frame_index = self.frames.len() - 1;
        if self.frames[frame_index].kind != FrameKind::If || self.frames[frame_index].else_seen {
            return Err(self.type_error("else without a matching if"));
        }

        if self.reachable {
            if let Some(ty) = self.frames[frame_index].result {
                let value = self.pop(Some(ty))?;
                let temp = self.result_temp(frame_index).unwrap();
                let line = format!("{} = {};", names::temporary(temp), value.text());
                self.stmt(&line);
            }
            let expected = self.frames[frame_index].stack_height;
            if self.stack.len() != expected {
                return Err(self.type_error("then branch leaves extra values on the stack"));
            }
            self.frames[frame_index].label_used = true;
            let label = self.frames[frame_index].label;
            let line = format!("goto {};", names::label(label));
            self.stmt(&line);
        }

        let else_label = self.frames[frame_index].else_label.unwrap();
        self.label_stmt(else_label);
        let height = self.frames[frame_index].stack_height;
        self.stack.truncate(height);
        self.frames[frame_index].else_seen = true;
        self.reachable = true;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Operator helpers

    fn pop_arguments(&mut self, callee_type: &FuncType) -> Result<String> {
        let mut arguments = Vec::with_capacity(callee_type.params.len());
        for &param in callee_type.params.iter().rev() {
            arguments.push(self.pop(Some(param))?.text());
        }
        arguments.reverse();
        let mut out = String::new();
        for argument in arguments {
            out.push_str(", ");
            out.push_str(&argument);
        }
        Ok(out)
    }

    fn binop(&mut self, ty: ValueType, op: &str) -> Result<()> {
        let b = self.pop(Some(ty))?;
        let a = self.pop(Some(ty))?;
        self.push_assigned(ty, format!("{} {} {}", a.text(), op, b.text()));
        Ok(())
    }

    fn helper_binop(&mut self, ty: ValueType, helper: &str) -> Result<()> {
        let b = self.pop(Some(ty))?;
        let a = self.pop(Some(ty))?;
        self.push_assigned(ty, format!("{}({}, {})", helper, a.text(), b.text()));
        Ok(())
    }

    fn helper_unop(&mut self, ty: ValueType, helper: &str) -> Result<()> {
        let a = self.pop(Some(ty))?;
        self.push_assigned(ty, format!("{}({})", helper, a.text()));
        Ok(())
    }

    fn neg(&mut self, ty: ValueType) -> Result<()> {
        let a = self.pop(Some(ty))?;
        self.push_assigned(ty, format!("-{}", a.text()));
        Ok(())
    }

    fn test_op(&mut self, ty: ValueType, zero: &str) -> Result<()> {
        let a = self.pop(Some(ty))?;
        self.push_assigned(ValueType::I32, format!("(u32)({} == {})", a.text(), zero));
        Ok(())
    }

    /// Comparisons push an i32 0/1. Signed integer comparisons cast both
    /// operands at the point of use; storage stays unsigned.
    fn compare(&mut self, ty: ValueType, op: &str, signed: bool) -> Result<()> {
        let b = self.pop(Some(ty))?;
        let a = self.pop(Some(ty))?;
        let cast = if signed { names::signed_c_type(ty) } else { "" };
        let init = if signed {
            format!("(u32)(({}){} {} ({}){})", cast, a.text(), op, cast, b.text())
        } else {
            format!("(u32)({} {} {})", a.text(), op, b.text())
        };
        self.push_assigned(ValueType::I32, init);
        Ok(())
    }

    fn shift(&mut self, ty: ValueType, op: &str, signed: bool) -> Result<()> {
        let (mask, suffix) = int_width(ty);
        let b = self.pop(Some(ty))?;
        let a = self.pop(Some(ty))?;
        let count = format!("({} & {}{})", b.text(), mask, suffix);
        let init = if signed {
            // Arithmetic shift: cast to signed for the shift only.
            format!("({})(({}){} {} {})", names::c_type(ty), names::signed_c_type(ty), a.text(), op, count)
        } else {
            format!("{} {} {}", a.text(), op, count)
        };
        self.push_assigned(ty, init);
        Ok(())
    }

    /// C has no rotate operator; compose from shifts. The double mask keeps
    /// a zero rotate away from the undefined full-width shift.
    fn rotate(&mut self, ty: ValueType, left: bool) -> Result<()> {
        let (mask, suffix) = int_width(ty);
        let width = mask + 1;
        let b = self.pop(Some(ty))?;
        let a = self.pop(Some(ty))?;
        let n = format!("({} & {}{})", b.text(), mask, suffix);
        let complement = format!("(({}{} - {}) & {}{})", width, suffix, n, mask, suffix);
        let init = if left {
            format!("({} << {}) | ({} >> {})", a.text(), n, a.text(), complement)
        } else {
            format!("({} >> {}) | ({} << {})", a.text(), n, a.text(), complement)
        };
        self.push_assigned(ty, init);
        Ok(())
    }

    fn div_s(&mut self, ty: ValueType) -> Result<()> {
        let (zero, min, all_ones) = int_trap_constants(ty);
        let signed = names::signed_c_type(ty);
        let b = self.pop(Some(ty))?;
        let a = self.pop(Some(ty))?;
        let line = format!("if ({} == {}) {{ TRAP(wasmTrapDivByZero); }}", b.text(), zero);
        self.stmt(&line);
        let line = format!(
            "if ({} == {} && {} == {}) {{ TRAP(wasmTrapIntOverflow); }}",
            a.text(), min, b.text(), all_ones
        );
        self.stmt(&line);
        self.push_assigned(ty, format!("({})(({}){} / ({}){})", names::c_type(ty), signed, a.text(), signed, b.text()));
        Ok(())
    }

    fn div_u(&mut self, ty: ValueType) -> Result<()> {
        let (zero, _, _) = int_trap_constants(ty);
        let b = self.pop(Some(ty))?;
        let a = self.pop(Some(ty))?;
        let line = format!("if ({} == {}) {{ TRAP(wasmTrapDivByZero); }}", b.text(), zero);
        self.stmt(&line);
        self.push_assigned(ty, format!("{} / {}", a.text(), b.text()));
        Ok(())
    }

    /// Wasm defines INT_MIN rem -1 as 0 (no trap); the ternary keeps the C
    /// division away from that one undefined case.
    fn rem_s(&mut self, ty: ValueType) -> Result<()> {
        let (zero, _, all_ones) = int_trap_constants(ty);
        let signed = names::signed_c_type(ty);
        let b = self.pop(Some(ty))?;
        let a = self.pop(Some(ty))?;
        let line = format!("if ({} == {}) {{ TRAP(wasmTrapDivByZero); }}", b.text(), zero);
        self.stmt(&line);
        self.push_assigned(
            ty,
            format!(
                "{} == {} ? {} : ({})(({}){} % ({}){})",
                b.text(), all_ones, zero, names::c_type(ty), signed, a.text(), signed, b.text()
            ),
        );
        Ok(())
    }

    fn rem_u(&mut self, ty: ValueType) -> Result<()> {
        let (zero, _, _) = int_trap_constants(ty);
        let b = self.pop(Some(ty))?;
        let a = self.pop(Some(ty))?;
        let line = format!("if ({} == {}) {{ TRAP(wasmTrapDivByZero); }}", b.text(), zero);
        self.stmt(&line);
        self.push_assigned(ty, format!("{} % {}", a.text(), b.text()));
        Ok(())
    }

    fn convert(&mut self, from: ValueType, to: ValueType, cast: &str) -> Result<()> {
        let a = self.pop(Some(from))?;
        self.push_assigned(to, format!("{}{}", cast, a.text()));
        Ok(())
    }

    fn helper_convert(&mut self, from: ValueType, to: ValueType, helper: &str) -> Result<()> {
        let a = self.pop(Some(from))?;
        self.push_assigned(to, format!("{}({})", helper, a.text()));
        Ok(())
    }

    /// Float → integer truncation, guarded: NaN is an invalid conversion,
    /// out-of-range an integer overflow. The bounds are the exactly
    /// representable neighbours of the integer range.
    fn trunc_float(&mut self, from: ValueType, to: ValueType, signed: bool) -> Result<()> {
        let a = self.pop(Some(from))?;
        let line = format!("if ({} != {}) {{ TRAP(wasmTrapInvalidConversion); }}", a.text(), a.text());
        self.stmt(&line);

        let f = if from == ValueType::F32 { "f" } else { "" };
        let range = match (to, signed) {
            (ValueType::I32, true) => format!("{0} >= -2147483648.0{1} && {0} < 2147483648.0{1}", a.text(), f),
            (ValueType::I32, false) => format!("{0} > -1.0{1} && {0} < 4294967296.0{1}", a.text(), f),
            (ValueType::I64, true) => {
                format!("{0} >= -9223372036854775808.0{1} && {0} < 9223372036854775808.0{1}", a.text(), f)
            }
            (ValueType::I64, false) => {
                format!("{0} > -1.0{1} && {0} < 18446744073709551616.0{1}", a.text(), f)
            }
            _ => unreachable!("trunc target is an integer type"),
        };
        let line = format!("if (!({})) {{ TRAP(wasmTrapIntOverflow); }}", range);
        self.stmt(&line);

        let cast = match (to, signed) {
            (ValueType::I32, true) => "(u32)(i32)",
            (ValueType::I32, false) => "(u32)",
            (ValueType::I64, true) => "(u64)(i64)",
            (ValueType::I64, false) => "(u64)",
            _ => unreachable!(),
        };
        self.push_assigned(to, format!("{}{}", cast, a.text()));
        Ok(())
    }

    fn load(&mut self, result: ValueType, helper: &str) -> Result<()> {
        let offset = self.read_mem_arg()?;
        let memory = self.memory()?;
        let address = self.pop(Some(ValueType::I32))?;
        self.push_assigned(
            result,
            format!("{}({}, (u64){} + {}ull)", helper, memory, address.text(), offset),
        );
        Ok(())
    }

    fn store(&mut self, value_type: ValueType, helper: &str) -> Result<()> {
        let offset = self.read_mem_arg()?;
        let memory = self.memory()?;
        self.spill();
        let value = self.pop(Some(value_type))?;
        let address = self.pop(Some(ValueType::I32))?;
        let line = format!(
            "{}({}, (u64){} + {}ull, {});",
            helper, memory, address.text(), offset, value.text()
        );
        self.stmt(&line);
        Ok(())
    }
}

/// (shift mask, literal suffix) per integer type.
fn int_width(ty: ValueType) -> (u32, &'static str) {
    match ty {
        ValueType::I32 => (31, "u"),
        ValueType::I64 => (63, "ull"),
        _ => unreachable!("shifts and rotates are integer operations"),
    }
}

/// (zero, INT_MIN bit pattern, all-ones) literals per integer type.
fn int_trap_constants(ty: ValueType) -> (&'static str, &'static str, &'static str) {
    match ty {
        ValueType::I32 => ("0u", "0x80000000u", "0xffffffffu"),
        ValueType::I64 => ("0ull", "0x8000000000000000ull", "0xffffffffffffffffull"),
        _ => unreachable!("division is an integer operation"),
    }
}

fn zero_literal(ty: ValueType) -> &'static str {
    match ty {
        ValueType::I32 => "0u",
        ValueType::I64 => "0ull",
        ValueType::F32 | ValueType::F64 => "0",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wasm::decode::tests::TestModule;
    use crate::wasm::decode::{decode, DecodeOptions};

    const PLAIN: GenOptions = GenOptions { pretty: false, debug: false };

    /// Generate the first local function of a single-type test module.
    fn generate(params: &[u8], results: &[u8], body: &[u8]) -> Result<String> {
        let bytes = TestModule::new().single_type(params, results).bodies(&[body]).build();
        let module = decode(&bytes, DecodeOptions::default()).unwrap();
        let names = Names::new("test", false);
        generate_function(&module, &names, 0, PLAIN)
    }

    #[test]
    fn identity_returns_its_argument() {
        let c = generate(&[0x7f], &[0x7f], &[0x20, 0x00, 0x0b]).unwrap();
        assert!(c.starts_with("u32 f0(testInstance* i, u32 l0) {"), "{}", c);
        assert!(c.contains("return l0;"), "{}", c);
        // No branch used the epilogue, so no label is emitted.
        assert!(!c.contains("L0:"), "{}", c);
    }

    #[test]
    fn declared_locals_are_zero_initialised() {
        // (i64 local) local.get 1; drop
        let bytes = {
            let mut body = vec![1u8, 1, 0x7e]; // one run: 1 x i64
            body.extend(&[0x20, 0x01, 0x1a, 0x0b]);
            let mut code = vec![1u8];
            code.extend(crate::wasm::decode::tests::leb(body.len() as u32));
            code.extend(&body);
            TestModule::new()
                .single_type(&[0x7f], &[])
                .section(3, &[1, 0])
                .section(10, &code)
                .build()
        };
        let module = decode(&bytes, DecodeOptions::default()).unwrap();
        let names = Names::new("test", false);
        let c = generate_function(&module, &names, 0, PLAIN).unwrap();
        assert!(c.contains("u64 l1 = 0;"), "{}", c);
    }

    #[test]
    fn signed_division_is_guarded() {
        // (a: i32, b: i32) -> i32 { a / b }
        let c = generate(
            &[0x7f, 0x7f],
            &[0x7f],
            &[0x20, 0x00, 0x20, 0x01, 0x6d, 0x0b],
        )
        .unwrap();
        assert!(c.contains("if (l1 == 0u) { TRAP(wasmTrapDivByZero); }"), "{}", c);
        assert!(
            c.contains("if (l0 == 0x80000000u && l1 == 0xffffffffu) { TRAP(wasmTrapIntOverflow); }"),
            "{}",
            c
        );
        assert!(c.contains("(u32)((i32)l0 / (i32)l1)"), "{}", c);
    }

    #[test]
    fn remainder_guards_zero_but_not_overflow() {
        let c = generate(
            &[0x7f, 0x7f],
            &[0x7f],
            &[0x20, 0x00, 0x20, 0x01, 0x6f, 0x0b],
        )
        .unwrap();
        assert!(c.contains("TRAP(wasmTrapDivByZero)"), "{}", c);
        assert!(!c.contains("TRAP(wasmTrapIntOverflow)"), "{}", c);
        // INT_MIN % -1 is 0, not a trap.
        assert!(c.contains("l1 == 0xffffffffu ? 0u :"), "{}", c);
    }

    #[test]
    fn br_table_lowers_to_a_switch() {
        // block block block (br_table 0 1 (i)) end return 10 end return 20 end return 30
        let body = [
            0x02, 0x40, // block
            0x02, 0x40, // block
            0x02, 0x40, // block
            0x20, 0x00, // local.get 0
            0x0e, 0x02, 0x00, 0x01, 0x02, // br_table [0 1] default 2
            0x0b, // end
            0x41, 0x0a, 0x0f, // i32.const 10; return
            0x0b, // end
            0x41, 0x14, 0x0f, // i32.const 20; return
            0x0b, // end
            0x41, 0x1e, // i32.const 30
            0x0b, // end (function)
        ];
        let c = generate(&[0x7f], &[0x7f], &body).unwrap();
        // The index was spilled to a temporary before the fork.
        assert!(c.contains("switch (v0) {"), "{}", c);
        assert!(c.contains("case 0: goto"), "{}", c);
        assert!(c.contains("case 1: goto"), "{}", c);
        assert!(c.contains("default: goto"), "{}", c);
        // Three return paths through the epilogue.
        assert!(c.contains("return "), "{}", c);
    }

    #[test]
    fn loop_branches_hit_the_continue_label() {
        // loop br 0 end -- an infinite loop
        let body = [0x03, 0x40, 0x0c, 0x00, 0x0b, 0x0b];
        let c = generate(&[], &[], &body).unwrap();
        // The loop head label is emitted before the goto back to it.
        let head = c.find("L1:;").expect("loop head label");
        let jump = c.find("goto L1;").expect("back edge");
        assert!(head < jump, "{}", c);
    }

    #[test]
    fn if_else_merges_into_one_result() {
        // (c: i32) -> i32 { if (c) { 1 } else { 2 } }
        let body = [
            0x20, 0x00, // local.get 0
            0x04, 0x7f, // if (result i32)
            0x41, 0x01, // i32.const 1
            0x05, // else
            0x41, 0x02, // i32.const 2
            0x0b, // end
            0x0b, // end (function)
        ];
        let c = generate(&[0x7f], &[0x7f], &body).unwrap();
        assert!(c.contains("if (!("), "{}", c);
        // Both arms assign the same merge temporary.
        let assignments = c.matches("= 1u;").count() + c.matches("= 2u;").count();
        assert_eq!(assignments, 2, "{}", c);
    }

    #[test]
    fn unreachable_code_is_dropped() {
        // unreachable; i32.const 1; drop; end
        let body = [0x00, 0x41, 0x01, 0x1a, 0x0b];
        let c = generate(&[], &[], &body).unwrap();
        assert!(c.contains("TRAP(wasmTrapUnreachable);"), "{}", c);
        assert!(!c.contains("1u"), "{}", c);
    }

    #[test]
    fn memory_round_trip_uses_runtime_helpers() {
        // store an i64 at 0, load an i32 at 4
        let body = [
            0x41, 0x00, // i32.const 0
            0x42, 0x2a, // i64.const 42
            0x37, 0x03, 0x00, // i64.store align=8 offset=0
            0x41, 0x04, // i32.const 4
            0x28, 0x02, 0x00, // i32.load align=4 offset=0
            0x0b,
        ];
        let bytes = TestModule::new()
            .single_type(&[], &[0x7f])
            .function_section(&[&body])
            .section(5, &[1, 0, 1]) // memory, min 1 page
            .code_section(&[&body])
            .build();
        let module = decode(&bytes, DecodeOptions::default()).unwrap();
        let names = Names::new("test", false);
        let c = generate_function(&module, &names, 0, PLAIN).unwrap();
        assert!(c.contains("i64_store(MEM0(i), (u64)v0 + 0ull, v1);"), "{}", c);
        assert!(c.contains("i32_load(MEM0(i), "), "{}", c);
    }

    #[test]
    fn float_constants_keep_their_bit_pattern() {
        // f32.const with a NaN payload, returned as-is
        let body = [0x43, 0x01, 0x00, 0xc0, 0x7f, 0x0b];
        let c = generate(&[], &[0x7d], &body).unwrap();
        assert!(c.contains("f32_reinterpret_i32(0x7fc00001u)"), "{}", c);
    }

    #[test]
    fn calls_spill_and_dispatch_by_index() {
        // f0: () -> i32 { 7 }; f1: () -> i32 { call f0 }
        let bytes = TestModule::new()
            .single_type(&[], &[0x7f])
            .bodies(&[&[0x41, 0x07, 0x0b], &[0x10, 0x00, 0x0b]])
            .build();
        let module = decode(&bytes, DecodeOptions::default()).unwrap();
        let names = Names::new("test", false);
        let c = generate_function(&module, &names, 1, PLAIN).unwrap();
        assert!(c.contains("= f0(i);"), "{}", c);
    }

    #[test]
    fn type_mismatch_is_reported_with_position() {
        // i64.const 1; i32.const 1; i32.add
        let body = [0x42, 0x01, 0x41, 0x01, 0x6a, 0x0b];
        let err = generate(&[], &[0x7f], &body).unwrap_err();
        match err {
            CompileError::TypeMismatch { function: 0, .. } => {}
            other => panic!("expected TypeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn branch_depth_out_of_range() {
        let body = [0x0c, 0x05, 0x0b]; // br 5
        let err = generate(&[], &[], &body).unwrap_err();
        match err {
            CompileError::LabelOutOfRange { depth: 5, .. } => {}
            other => panic!("expected LabelOutOfRange, got {:?}", other),
        }
    }

    #[test]
    fn post_mvp_opcodes_are_unsupported() {
        let body = [0x41, 0x01, 0xc0, 0x0b]; // i32.extend8_s
        let err = generate(&[], &[0x7f], &body).unwrap_err();
        match err {
            CompileError::UnsupportedProposal { opcode: 0xc0, .. } => {}
            other => panic!("expected UnsupportedProposal, got {:?}", other),
        }
    }

    #[test]
    fn block_end_checks_declared_arity() {
        // two values at the end of a single-result function
        let body = [0x41, 0x01, 0x41, 0x02, 0x0b];
        let err = generate(&[], &[0x7f], &body).unwrap_err();
        assert!(matches!(err, CompileError::TypeMismatch { .. }), "{:?}", err);
    }

    #[test]
    fn shifts_mask_their_count_and_rotates_compose() {
        // (a, b) -> i32 { rotl(a << b, b) }
        let body = [0x20, 0x00, 0x20, 0x01, 0x74, 0x20, 0x01, 0x77, 0x0b];
        let c = generate(&[0x7f, 0x7f], &[0x7f], &body).unwrap();
        assert!(c.contains("l0 << (l1 & 31u)"), "{}", c);
        assert!(c.contains("(32u - (l1 & 31u)) & 31u"), "{}", c);
    }

    #[test]
    fn float_truncation_guards_nan_and_range() {
        // (f: f64) -> i32 { i32.trunc_f64_s f }
        let body = [0x20, 0x00, 0xaa, 0x0b];
        let c = generate(&[0x7c], &[0x7f], &body).unwrap();
        assert!(c.contains("if (l0 != l0) { TRAP(wasmTrapInvalidConversion); }"), "{}", c);
        assert!(
            c.contains("if (!(l0 >= -2147483648.0 && l0 < 2147483648.0)) { TRAP(wasmTrapIntOverflow); }"),
            "{}",
            c
        );
        assert!(c.contains("(u32)(i32)l0"), "{}", c);
    }

    #[test]
    fn pretty_mode_indents_by_block_depth() {
        let body = [0x02, 0x40, 0x01, 0x0b, 0x0b]; // block nop end
        let bytes = TestModule::new().single_type(&[], &[]).bodies(&[&body]).build();
        let module = decode(&bytes, DecodeOptions::default()).unwrap();
        let names = Names::new("test", false);
        let pretty = generate_function(&module, &names, 0, GenOptions { pretty: true, debug: false }).unwrap();
        let compact = generate_function(&module, &names, 0, PLAIN).unwrap();
        assert!(pretty.contains("\n  return;"), "{}", pretty);
        assert!(!compact.contains("\n  "), "{}", compact);
    }
}
