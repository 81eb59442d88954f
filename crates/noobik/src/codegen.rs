//! Assembly generation from the CFG.
//!
//! The generator walks the CFG one function at a time. Functions are
//! discovered by scanning `Start` nodes and parsing their
//! `entry: <name> (scope:<id>)` labels; for each one the reachable nodes are
//! collected and emitted in ascending id order, which makes the output a
//! deterministic function of its inputs.
//!
//! Register conventions on the Noobik machine:
//! - `r0` carries the return value (callee writes, caller reads);
//! - `r1..r6` are general scratch, caller-save across calls, handed out by a
//!   free-list allocator;
//! - `r7` is the reserved address scratch and is never allocated to
//!   expression evaluators;
//! - `fp`/`sp` frame the stack, which grows downward.
//!
//! The branch-immediate field of the target assembler zero-extends, so no
//! instruction is ever emitted with a negative immediate; subtractive
//! addressing always uses a positive magnitude and `SUB`.

use crate::ast::{Ast, AstKind, NodeId};
use crate::cfg::{Cfg, CfgNode, CfgNodeId, CfgNodeKind};
use crate::symbols::{GLOBAL_SCOPE, ScopeId, Symbol, SymbolId, SymbolKind, SymbolTable};

/// Knobs for the emitter.
#[derive(Debug, Clone, Copy)]
pub struct CodegenOptions {
    /// Interleave `; ...` comments with the instruction stream.
    pub emit_comments: bool,
    /// Emit the `_start` stub that sets up sp/fp and calls `_func_main`.
    pub emit_start_stub: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            emit_comments: true,
            emit_start_stub: true,
        }
    }
}

/// Generates the complete assembly text for `cfg`.
pub fn generate_assembly(cfg: &Cfg, ast: &Ast, table: &SymbolTable, options: &CodegenOptions) -> String {
    let mut generator = Generator {
        cfg,
        ast,
        table,
        options,
        out: String::new(),
        func_name: String::new(),
        func_scope: GLOBAL_SCOPE,
        label_seq: 0,
        regs: RegPool::new(),
        epilog_label: String::new(),
        return_sym: None,
        has_return_value: false,
        reachable: vec![false; cfg.len()],
    };

    generator.out.push_str("; ---- Noobik assembly generated from CFG ----\n\n");
    generator.out.push_str("[section cram]\n\n");

    if options.emit_start_stub {
        generator.out.push_str("_start:\n");
        generator.out.push_str("    MOVI sp, #0xFFFC\n");
        generator.out.push_str("    MOVI fp, #0xFFFC\n");
        generator.out.push_str("    CALL _func_main\n");
        generator.out.push_str("    HLT\n\n");
    }

    for function in collect_functions(cfg) {
        generator.emit_function(&function);
    }

    generator.out.push_str("[section name=dram, bank=dram, start=0x8000]\n");
    generator.out
}

/// One function discovered in the CFG.
struct FunctionInfo {
    name: String,
    scope: ScopeId,
    entry: CfgNodeId,
}

/// Parses a Start label of the form `entry: <name> (scope:<id>)`. The scope
/// part is optional and defaults to the global scope.
fn parse_entry_label(label: &str) -> Option<(String, u32)> {
    let rest = label.strip_prefix("entry:")?.trim_start();
    let name = match rest.find('(') {
        Some(pos) => rest[..pos].trim(),
        None => rest.trim(),
    };
    let scope = rest
        .find("scope:")
        .map_or(1, |pos| {
            let digits: String = rest[pos + "scope:".len()..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            digits.parse().unwrap_or(1)
        });
    Some((name.to_owned(), scope))
}

/// Scans for Start nodes in id order and keeps those with parseable labels.
fn collect_functions(cfg: &Cfg) -> Vec<FunctionInfo> {
    cfg.nodes()
        .filter(|n| n.kind == CfgNodeKind::Start)
        .filter_map(|n| {
            parse_entry_label(&n.label).map(|(name, scope)| FunctionInfo {
                name,
                scope: ScopeId::from_id(scope),
                entry: n.id,
            })
        })
        .collect()
}

/// Free-list allocator over the six general scratch registers.
struct RegPool {
    used: [bool; 8],
}

impl RegPool {
    fn new() -> Self {
        let mut pool = Self { used: [false; 8] };
        pool.reset();
        pool
    }

    /// r0 is the call return register and r7 the address scratch; neither is
    /// ever handed out.
    fn reset(&mut self) {
        self.used = [false; 8];
        self.used[0] = true;
        self.used[7] = true;
    }

    fn alloc(&mut self) -> Option<usize> {
        for r in 1..=6 {
            if !self.used[r] {
                self.used[r] = true;
                return Some(r);
            }
        }
        None
    }

    fn free(&mut self, r: usize) {
        if (1..=6).contains(&r) {
            self.used[r] = false;
        }
    }
}

const fn reg(r: usize) -> &'static str {
    const NAMES: [&str; 8] = ["r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7"];
    if r < 8 { NAMES[r] } else { "r?" }
}

struct Generator<'a> {
    cfg: &'a Cfg,
    ast: &'a Ast,
    table: &'a SymbolTable,
    options: &'a CodegenOptions,
    out: String,

    func_name: String,
    func_scope: ScopeId,
    /// Temp-label sequence, reset at function start.
    label_seq: u32,
    regs: RegPool,
    epilog_label: String,
    /// The symbol the epilogue loads into r0 (named-return convention).
    return_sym: Option<SymbolId>,
    has_return_value: bool,
    reachable: Vec<bool>,
}

impl Generator<'_> {
    // ========================================================================
    // Emission primitives
    // ========================================================================

    fn ins(&mut self, text: &str) {
        self.out.push_str("    ");
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn label(&mut self, name: &str) {
        self.out.push_str(name);
        self.out.push_str(":\n");
    }

    /// Optional commentary, dropped when comments are disabled.
    fn comment(&mut self, text: &str) {
        if self.options.emit_comments {
            self.out.push_str("; ");
            self.out.push_str(text);
            self.out.push('\n');
        }
    }

    /// Commentary that is part of the output contract (range errors,
    /// allocator fallback) and survives `emit_comments = false`.
    fn note(&mut self, text: &str) {
        self.out.push_str("; ");
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn node_label(&self, node: CfgNodeId) -> String {
        format!("_L_{}_{}", self.func_name, node.id())
    }

    fn new_label(&mut self, prefix: &str) -> String {
        let seq = self.label_seq;
        self.label_seq += 1;
        format!("_T_{}_{prefix}_{seq}", self.func_name)
    }

    /// Allocates a scratch register, falling back deterministically to r1
    /// when the pool is exhausted.
    fn alloc_reg(&mut self) -> usize {
        match self.regs.alloc() {
            Some(r) => r,
            None => {
                self.note("register pool exhausted; reusing r1");
                1
            }
        }
    }

    // ========================================================================
    // Addressing
    // ========================================================================

    /// Puts `fp + offset` into r7. The immediate field is zero-extended, so
    /// negative offsets become a positive magnitude and a SUB.
    fn emit_frame_addr(&mut self, offset: i32) {
        if offset == 0 {
            self.ins("MOV r7, fp");
        } else if offset > 0 {
            self.ins(&format!("MOVI r7, #{offset}"));
            self.ins("ADD r7, fp, r7");
        } else {
            self.ins(&format!("MOVI r7, #{}", -offset));
            self.ins("SUB r7, fp, r7");
        }
    }

    fn emit_stack_addr(&mut self, sym: &Symbol) {
        self.emit_frame_addr(sym.offset);
    }

    /// Address of a stack array's first element. The frame grows downward,
    /// so the first element sits in the highest word of the allocation.
    fn emit_stack_array_base(&mut self, sym: &Symbol) {
        let offset = if sym.offset < 0 {
            sym.offset + sym.size as i32 - 4
        } else {
            sym.offset
        };
        self.emit_frame_addr(offset);
    }

    /// Absolute address of a global or constant into r7.
    fn emit_abs_addr(&mut self, sym: &Symbol) {
        self.ins(&format!("LA r7, #{}", sym.address));
    }

    fn emit_load_symbol(&mut self, sym: &Symbol) -> usize {
        let r = self.alloc_reg();

        // arrays evaluate to their base address
        if sym.is_array {
            match sym.kind {
                SymbolKind::Global => {
                    self.emit_abs_addr(sym);
                    self.ins(&format!("MOV {}, r7", reg(r)));
                    return r;
                }
                SymbolKind::Local | SymbolKind::Parameter => {
                    self.emit_stack_array_base(sym);
                    self.ins(&format!("MOV {}, r7", reg(r)));
                    return r;
                }
                _ => {}
            }
        }

        match sym.kind {
            SymbolKind::Local | SymbolKind::Parameter => {
                self.emit_stack_addr(sym);
                self.ins(&format!("LDS {}, r7", reg(r)));
            }
            SymbolKind::Global => {
                self.emit_abs_addr(sym);
                self.ins(&format!("LD {}, r7", reg(r)));
            }
            SymbolKind::Constant => {
                self.emit_abs_addr(sym);
                self.ins(&format!("LDC {}, r7", reg(r)));
            }
            SymbolKind::Function => {
                self.ins(&format!("MOVI {}, #0", reg(r)));
            }
        }
        r
    }

    fn emit_store_symbol(&mut self, sym: &Symbol, value: usize) {
        match sym.kind {
            SymbolKind::Local | SymbolKind::Parameter => {
                self.emit_stack_addr(sym);
                self.ins(&format!("STS r7, {}", reg(value)));
            }
            SymbolKind::Global => {
                self.emit_abs_addr(sym);
                self.ins(&format!("ST r7, {}", reg(value)));
            }
            // stores through constants were already rejected
            SymbolKind::Constant | SymbolKind::Function => {}
        }
    }

    fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.table.lookup(name, self.func_scope).map(|id| self.table.symbol(id))
    }

    // ========================================================================
    // Expression evaluation
    // ========================================================================

    /// Lowers an expression tree, returning the register holding its value.
    fn eval_expr(&mut self, expr: NodeId) -> usize {
        match self.ast.kind(expr) {
            AstKind::IntLiteral => self.eval_int_literal(expr),

            AstKind::BoolLiteral => {
                let r = self.alloc_reg();
                let v = if self.ast.value(expr) == Some("true") { 1 } else { 0 };
                self.ins(&format!("MOVI {}, #{v}", reg(r)));
                r
            }

            AstKind::CharLiteral => {
                let r = self.alloc_reg();
                let code = decode_char_literal(self.ast.value(expr).unwrap_or(""));
                self.ins(&format!("MOVI {}, #{code}", reg(r)));
                r
            }

            AstKind::Identifier => {
                let name = self.ast.value(expr).unwrap_or("").to_owned();
                match self.lookup(&name).cloned() {
                    Some(sym) => self.emit_load_symbol(&sym),
                    None => {
                        let r = self.alloc_reg();
                        self.ins(&format!("MOVI {}, #0", reg(r)));
                        self.comment(&format!("unknown identifier '{name}'"));
                        r
                    }
                }
            }

            AstKind::UnaryExpr => self.eval_unary(expr),
            AstKind::BinaryExpr => self.eval_binary(expr),
            AstKind::Assignment | AstKind::IndexedAssignment => self.eval_assignment(expr),
            AstKind::CallExpr => self.eval_call(expr),

            AstKind::IndexExpr => {
                let (r_addr, on_stack) = self.emit_index_address(expr);
                if on_stack {
                    self.ins(&format!("LDS {0}, {0}", reg(r_addr)));
                } else {
                    self.ins(&format!("LD {0}, {0}", reg(r_addr)));
                }
                r_addr
            }

            AstKind::AddrOf => self.eval_addr_of(expr),

            AstKind::Deref => match self.ast.child(expr, 0) {
                Some(child) => {
                    let r = self.eval_expr(child);
                    self.ins(&format!("LD {0}, {0}", reg(r)));
                    r
                }
                None => {
                    let r = self.alloc_reg();
                    self.ins(&format!("MOVI {}, #0", reg(r)));
                    r
                }
            },

            kind => {
                let r = self.alloc_reg();
                self.ins(&format!("MOVI {}, #0", reg(r)));
                self.comment(&format!("unsupported expression node {kind}"));
                r
            }
        }
    }

    /// MOVI takes a zero-extended 16-bit immediate. Values 0..=65535 load
    /// directly, small negatives are built as `0 - |v|`, and anything wider
    /// is a range error: logged as a comment, lowered to a zero placeholder.
    fn eval_int_literal(&mut self, expr: NodeId) -> usize {
        let r = self.alloc_reg();
        let text = self.ast.value(expr).unwrap_or("0");
        let v = parse_int_literal(text);
        if (0..=65535).contains(&v) {
            self.ins(&format!("MOVI {}, #{v}", reg(r)));
        } else if v < 0 && -v <= 65535 {
            let tmp = self.alloc_reg();
            self.ins(&format!("MOVI {}, #0", reg(r)));
            self.ins(&format!("MOVI {}, #{}", reg(tmp), -v));
            self.ins(&format!("SUB {0}, {0}, {1}", reg(r), reg(tmp)));
            self.regs.free(tmp);
        } else {
            self.note(&format!("integer literal {text} is outside the 16-bit immediate range"));
            self.ins(&format!("MOVI {}, #0", reg(r)));
        }
        r
    }

    fn eval_unary(&mut self, expr: NodeId) -> usize {
        let Some(operand) = self.ast.child(expr, 0) else {
            let r = self.alloc_reg();
            self.ins(&format!("MOVI {}, #0", reg(r)));
            return r;
        };

        match self.ast.value(expr).unwrap_or("") {
            "!" => {
                // boolean not: (v == 0) ? 1 : 0
                let r = self.eval_expr(operand);
                let l_one = self.new_label("not1");
                let l_end = self.new_label("not_end");
                self.ins(&format!("CMPI {}, #0", reg(r)));
                self.ins(&format!("JEQ {l_one}"));
                self.ins(&format!("MOVI {}, #0", reg(r)));
                self.ins(&format!("JMP {l_end}"));
                self.label(&l_one);
                self.ins(&format!("MOVI {}, #1", reg(r)));
                self.label(&l_end);
                r
            }
            "-" => {
                let r = self.eval_expr(operand);
                self.ins(&format!("NEG {0}, {0}", reg(r)));
                r
            }
            "~" => {
                let r = self.eval_expr(operand);
                self.ins(&format!("NOT {0}, {0}", reg(r)));
                r
            }
            // unary plus is a no-op
            _ => self.eval_expr(operand),
        }
    }

    fn eval_binary(&mut self, expr: NodeId) -> usize {
        let (Some(lhs), Some(rhs)) = (self.ast.child(expr, 0), self.ast.child(expr, 1)) else {
            let r = self.alloc_reg();
            self.ins(&format!("MOVI {}, #0", reg(r)));
            return r;
        };
        let op = self.ast.value(expr).unwrap_or("").to_owned();

        if let Some(jump) = jump_for_comparison(&op) {
            let rl = self.eval_expr(lhs);
            let rr = self.eval_expr(rhs);
            let l_true = self.new_label("cmp_true");
            let l_end = self.new_label("cmp_end");
            self.ins(&format!("CMP {}, {}", reg(rl), reg(rr)));
            self.ins(&format!("{jump} {l_true}"));
            self.ins(&format!("MOVI {}, #0", reg(rl)));
            self.ins(&format!("JMP {l_end}"));
            self.label(&l_true);
            self.ins(&format!("MOVI {}, #1", reg(rl)));
            self.label(&l_end);
            self.regs.free(rr);
            return rl;
        }

        if op == "&&" || op == "||" {
            // materialize the boolean via the short-circuit branch emitter
            let dest = self.alloc_reg();
            let l_true = self.new_label("logic_true");
            let l_false = self.new_label("logic_false");
            let l_end = self.new_label("logic_end");
            self.emit_branch_on_expr(Some(expr), &l_true, &l_false);
            self.label(&l_true);
            self.ins(&format!("MOVI {}, #1", reg(dest)));
            self.ins(&format!("JMP {l_end}"));
            self.label(&l_false);
            self.ins(&format!("MOVI {}, #0", reg(dest)));
            self.label(&l_end);
            return dest;
        }

        let rl = self.eval_expr(lhs);
        let rr = self.eval_expr(rhs);
        let mnemonic = match op.as_str() {
            "+" => "ADD",
            "-" => "SUB",
            "*" => "MUL",
            "/" => "DIV",
            "%" => "MOD",
            "&" => "AND",
            "|" => "OR",
            "^" => "XOR",
            "<<" => "SHL",
            ">>" => "SHR",
            _ => {
                self.comment(&format!("unknown binary operator '{op}'"));
                "ADD"
            }
        };
        self.ins(&format!("{mnemonic} {0}, {0}, {1}", reg(rl), reg(rr)));
        self.regs.free(rr);
        rl
    }

    /// Address of `base[index]` into a fresh register. Returns the register
    /// and whether the element lives on the stack (LDS/STS) or in DRAM
    /// (LD/ST).
    fn emit_index_address(&mut self, index_expr: NodeId) -> (usize, bool) {
        let base = self.ast.child(index_expr, 0);
        let index = self.ast.child(index_expr, 1);

        let sym = base
            .filter(|&b| self.ast.kind(b) == AstKind::Identifier)
            .and_then(|b| self.ast.value(b))
            .map(str::to_owned)
            .and_then(|name| self.lookup(&name).cloned());

        let r_addr = self.alloc_reg();
        let on_stack = match &sym {
            Some(s) if s.is_stack_resident() => {
                self.emit_stack_array_base(s);
                self.ins(&format!("MOV {}, r7", reg(r_addr)));
                true
            }
            Some(s) if s.kind == SymbolKind::Global => {
                self.emit_abs_addr(s);
                self.ins(&format!("MOV {}, r7", reg(r_addr)));
                false
            }
            _ => {
                self.ins(&format!("MOVI {}, #0", reg(r_addr)));
                true
            }
        };

        let r_idx = match index {
            Some(index) => self.eval_expr(index),
            None => {
                let r = self.alloc_reg();
                self.ins(&format!("MOVI {}, #0", reg(r)));
                r
            }
        };

        // scale the index by the element size; powers of two shift
        let elem_size = sym
            .as_ref()
            .filter(|s| s.is_array && s.array_size > 0 && s.size > 0)
            .map_or(4, |s| (s.size / s.array_size).max(1));
        match elem_size {
            1 => {}
            2 | 4 | 8 | 16 => {
                let shift = elem_size.trailing_zeros();
                let r_sh = self.alloc_reg();
                self.ins(&format!("MOVI {}, #{shift}", reg(r_sh)));
                self.ins(&format!("SHL {0}, {0}, {1}", reg(r_idx), reg(r_sh)));
                self.regs.free(r_sh);
            }
            _ => {
                let r_mul = self.alloc_reg();
                self.ins(&format!("MOVI {}, #{elem_size}", reg(r_mul)));
                self.ins(&format!("MUL {0}, {0}, {1}", reg(r_idx), reg(r_mul)));
                self.regs.free(r_mul);
            }
        }

        // Stack arrays grow downward from their base slot, DRAM arrays grow
        // upward from their base address.
        if on_stack {
            self.ins(&format!("SUB {0}, {0}, {1}", reg(r_addr), reg(r_idx)));
        } else {
            self.ins(&format!("ADD {0}, {0}, {1}", reg(r_addr), reg(r_idx)));
        }
        self.regs.free(r_idx);

        (r_addr, on_stack)
    }

    fn eval_assignment(&mut self, expr: NodeId) -> usize {
        let (Some(lhs), Some(rhs)) = (self.ast.child(expr, 0), self.ast.child(expr, 1)) else {
            let r = self.alloc_reg();
            self.ins(&format!("MOVI {}, #0", reg(r)));
            return r;
        };

        if self.ast.kind(lhs) == AstKind::IndexExpr {
            let (r_addr, on_stack) = self.emit_index_address(lhs);
            let rv = self.eval_expr(rhs);
            if on_stack {
                self.ins(&format!("STS {}, {}", reg(r_addr), reg(rv)));
            } else {
                self.ins(&format!("ST {}, {}", reg(r_addr), reg(rv)));
            }
            self.regs.free(r_addr);
            return rv;
        }

        if self.ast.kind(lhs) != AstKind::Identifier {
            return self.eval_expr(rhs);
        }
        let name = self.ast.value(lhs).unwrap_or("").to_owned();
        let sym = self.lookup(&name).cloned();
        let rv = self.eval_expr(rhs);
        if let Some(sym) = sym {
            self.emit_store_symbol(&sym, rv);
        }
        rv
    }

    fn eval_addr_of(&mut self, expr: NodeId) -> usize {
        let r = self.alloc_reg();
        let sym = self
            .ast
            .child(expr, 0)
            .filter(|&c| self.ast.kind(c) == AstKind::Identifier)
            .and_then(|c| self.ast.value(c))
            .map(str::to_owned)
            .and_then(|name| self.lookup(&name).cloned());

        match sym {
            Some(sym) if sym.is_stack_resident() => {
                let offset = sym.offset;
                if offset >= 0 {
                    self.ins(&format!("MOVI {}, #{offset}", reg(r)));
                    self.ins(&format!("ADD {0}, fp, {0}", reg(r)));
                } else {
                    self.ins(&format!("MOVI {}, #{}", reg(r), -offset));
                    self.ins(&format!("SUB {0}, fp, {0}", reg(r)));
                }
            }
            Some(sym) if sym.kind == SymbolKind::Global => {
                self.ins(&format!("LA {}, #{}", reg(r), sym.address));
            }
            _ => {
                self.ins(&format!("MOVI {}, #0", reg(r)));
            }
        }
        r
    }

    /// Call sequence: caller-save live scratch registers, push arguments
    /// right-to-left, CALL, pop arguments, restore saved registers in
    /// reverse. The return value arrives in r0.
    fn eval_call(&mut self, expr: NodeId) -> usize {
        let name = self
            .ast
            .child(expr, 0)
            .and_then(|c| self.ast.value(c))
            .or_else(|| self.ast.value(expr))
            .unwrap_or("unknown")
            .to_owned();
        let args: Vec<NodeId> = self
            .ast
            .child(expr, 1)
            .map(|list| self.ast.children(list).to_vec())
            .unwrap_or_default();

        let mut saved = Vec::new();
        for r in 1..=6 {
            if self.regs.used[r] {
                self.ins(&format!("PUSH {}", reg(r)));
                saved.push(r);
                self.regs.used[r] = false;
            }
        }

        for &arg in args.iter().rev() {
            let ra = self.eval_expr(arg);
            self.ins(&format!("PUSH {}", reg(ra)));
            self.regs.free(ra);
        }

        self.ins(&format!("CALL _func_{name}"));

        for _ in 0..args.len() {
            self.ins("POP r7");
        }

        for &r in saved.iter().rev() {
            self.ins(&format!("POP {}", reg(r)));
            self.regs.used[r] = true;
        }

        self.regs.used[0] = true;
        0
    }

    // ========================================================================
    // Short-circuit branching
    // ========================================================================

    /// Lowers a condition to jumps without materializing a boolean.
    fn emit_branch_on_expr(&mut self, expr: Option<NodeId>, l_true: &str, l_false: &str) {
        let Some(expr) = expr else {
            self.ins(&format!("JMP {l_false}"));
            return;
        };

        if self.ast.kind(expr) == AstKind::BinaryExpr {
            let op = self.ast.value(expr).unwrap_or("").to_owned();
            let lhs = self.ast.child(expr, 0);
            let rhs = self.ast.child(expr, 1);

            if op == "&&" {
                let mid = self.new_label("and_mid");
                self.emit_branch_on_expr(lhs, &mid, l_false);
                self.label(&mid);
                self.emit_branch_on_expr(rhs, l_true, l_false);
                return;
            }
            if op == "||" {
                let mid = self.new_label("or_mid");
                self.emit_branch_on_expr(lhs, l_true, &mid);
                self.label(&mid);
                self.emit_branch_on_expr(rhs, l_true, l_false);
                return;
            }
            if let Some(jump) = jump_for_comparison(&op) {
                if let (Some(lhs), Some(rhs)) = (lhs, rhs) {
                    let rl = self.eval_expr(lhs);
                    let rr = self.eval_expr(rhs);
                    self.ins(&format!("CMP {}, {}", reg(rl), reg(rr)));
                    self.ins(&format!("{jump} {l_true}"));
                    self.ins(&format!("JMP {l_false}"));
                    self.regs.free(rr);
                    self.regs.free(rl);
                    return;
                }
            }
        }

        // `!x` branches with the labels swapped
        if self.ast.kind(expr) == AstKind::UnaryExpr && self.ast.value(expr) == Some("!") {
            if let Some(operand) = self.ast.child(expr, 0) {
                self.emit_branch_on_expr(Some(operand), l_false, l_true);
                return;
            }
        }

        // fallback: evaluate and compare against zero
        let rv = self.eval_expr(expr);
        self.ins(&format!("CMPI {}, #0", reg(rv)));
        self.ins(&format!("JNE {l_true}"));
        self.ins(&format!("JMP {l_false}"));
        self.regs.free(rv);
    }

    // ========================================================================
    // Node emission
    // ========================================================================

    fn emit_node(&mut self, node: &CfgNode) {
        self.regs.reset();

        match node.kind {
            CfgNodeKind::Start => {
                self.emit_prologue();
                if let Some(next) = node.default_next {
                    let label = self.node_label(next);
                    self.ins(&format!("JMP {label}"));
                }
            }

            CfgNodeKind::End => {
                let label = self.epilog_label.clone();
                self.ins(&format!("JMP {label}"));
            }

            CfgNodeKind::Error => {
                let message = node.error_message.as_deref().unwrap_or(&node.label).to_owned();
                self.comment(&format!("semantic error: {message}"));
                if let Some(next) = node.default_next {
                    let label = self.node_label(next);
                    self.ins(&format!("JMP {label}"));
                }
            }

            CfgNodeKind::Condition => {
                let l_true = match node.conditional_next {
                    Some(next) => self.node_label(next),
                    None => self.new_label("cond_true"),
                };
                let l_false = match node.default_next {
                    Some(next) => self.node_label(next),
                    None => self.new_label("cond_false"),
                };
                self.emit_branch_on_expr(node.exprs.first().copied(), &l_true, &l_false);
            }

            CfgNodeKind::Merge => {
                if let Some(next) = node.default_next {
                    let label = self.node_label(next);
                    self.ins(&format!("JMP {label}"));
                }
            }

            CfgNodeKind::Block => self.emit_block(node),
        }
    }

    fn emit_block(&mut self, node: &CfgNode) {
        let stmt_kind = node.stmt.map(|s| self.ast.kind(s));

        if stmt_kind == Some(AstKind::Return) {
            if let Some(&expr) = node.exprs.first() {
                let rv = self.eval_expr(expr);
                if rv != 0 {
                    self.ins(&format!("MOV r0, {}", reg(rv)));
                }
                self.regs.free(rv);
            }
            let label = self.epilog_label.clone();
            self.ins(&format!("JMP {label}"));
            return;
        }

        if stmt_kind == Some(AstKind::VarDeclaration) {
            // storage is already part of the frame
            if let Some(next) = node.default_next {
                let label = self.node_label(next);
                self.ins(&format!("JMP {label}"));
            }
            return;
        }

        if node.is_break {
            if let Some(next) = node.default_next {
                let label = self.node_label(next);
                self.ins(&format!("JMP {label}"));
            }
            return;
        }

        if let Some(&expr) = node.exprs.first() {
            let rv = self.eval_expr(expr);
            self.regs.free(rv);
        }
        if let Some(next) = node.default_next {
            let label = self.node_label(next);
            self.ins(&format!("JMP {label}"));
        }
    }

    // ========================================================================
    // Prologue / epilogue
    // ========================================================================

    fn emit_prologue(&mut self) {
        let frame = self.table.frame_size(self.func_scope);
        self.comment(&format!(
            "function {}, scope {}, frame={frame}",
            self.func_name,
            self.func_scope.id()
        ));
        self.ins("PUSH fp");
        self.ins("MOV fp, sp");
        if frame > 0 {
            self.ins(&format!("MOVI r7, #{frame}"));
            self.ins("SUB sp, sp, r7");
        }
    }

    fn emit_epilogue(&mut self) {
        let label = self.epilog_label.clone();
        self.label(&label);

        // Named-return convention: re-materialize r0 from the designated
        // return variable when the function yields a value.
        if self.has_return_value {
            if let Some(sym) = self.return_sym.map(|id| self.table.symbol(id).clone()) {
                match sym.kind {
                    SymbolKind::Global => {
                        self.emit_abs_addr(&sym);
                        self.ins("LD r0, r7");
                    }
                    SymbolKind::Constant => {
                        self.emit_abs_addr(&sym);
                        self.ins("LDC r0, r7");
                    }
                    SymbolKind::Local | SymbolKind::Parameter => {
                        self.emit_stack_addr(&sym);
                        self.ins("LDS r0, r7");
                    }
                    SymbolKind::Function => {}
                }
            }
        }

        self.ins("MOV sp, fp");
        self.ins("POP fp");
        self.ins("RET");
    }

    // ========================================================================
    // Function emission
    // ========================================================================

    fn mark_reachable(&mut self, entry: CfgNodeId) {
        self.reachable.iter_mut().for_each(|r| *r = false);
        let mut stack = vec![entry];
        while let Some(id) = stack.pop() {
            if self.reachable[id.index()] {
                continue;
            }
            self.reachable[id.index()] = true;
            let node = self.cfg.node(id);
            if let Some(next) = node.default_next {
                stack.push(next);
            }
            if let Some(next) = node.conditional_next {
                stack.push(next);
            }
        }
    }

    fn emit_function(&mut self, function: &FunctionInfo) {
        self.func_name.clone_from(&function.name);
        self.func_scope = function.scope;
        self.label_seq = 0;
        self.regs.reset();
        self.epilog_label = format!("_EPILOG_{}", self.func_name);

        // Return-value information, using the `result` / function-name local
        // convention of the source language.
        self.has_return_value = false;
        self.return_sym = None;
        if let Some(func_sym) = self
            .table
            .lookup(&function.name, GLOBAL_SCOPE)
            .filter(|&id| self.table.symbol(id).kind == SymbolKind::Function)
        {
            let return_type = self.table.symbol(func_sym).return_type.as_deref();
            self.has_return_value = return_type.is_some_and(|t| t != "void");
        }
        if self.has_return_value {
            self.return_sym = self
                .table
                .lookup("result", self.func_scope)
                .or_else(|| self.table.lookup(&function.name, self.func_scope))
                .filter(|&id| self.table.symbol(id).kind != SymbolKind::Function);
        }

        self.mark_reachable(function.entry);
        let nodes: Vec<CfgNodeId> = self
            .cfg
            .nodes()
            .filter(|n| self.reachable[n.id.index()])
            .map(|n| n.id)
            .collect();

        let func_label = format!("_func_{}", self.func_name);
        self.label(&func_label);
        self.comment(&format!("CFG nodes reachable: {}", nodes.len()));

        for id in nodes {
            let node = self.cfg.node(id).clone();
            let label = self.node_label(id);
            self.label(&label);
            if !node.label.is_empty() {
                let text = format!("node {}: {}", id.id(), node.label);
                self.comment(&text);
            }
            self.emit_node(&node);
            self.out.push('\n');
        }

        self.emit_epilogue();
        self.out.push('\n');
    }
}

/// Maps a comparison operator to its jump-on-true mnemonic.
fn jump_for_comparison(op: &str) -> Option<&'static str> {
    match op {
        "==" => Some("JEQ"),
        "!=" => Some("JNE"),
        "<" => Some("JLT"),
        "<=" => Some("JLE"),
        ">" => Some("JGT"),
        ">=" => Some("JGE"),
        _ => None,
    }
}

/// Parses a decimal or `0x` hex literal, tolerating a leading minus.
/// Malformed text decodes to zero; the range check happens at emission.
fn parse_int_literal(text: &str) -> i64 {
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).unwrap_or(0)
    } else {
        rest.parse::<i64>().unwrap_or(0)
    };
    if negative { -magnitude } else { magnitude }
}

/// Decodes a quoted char literal (`'a'`, `'\n'`) to its code point.
fn decode_char_literal(text: &str) -> u32 {
    let inner = text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')).unwrap_or(text);
    let mut chars = inner.chars();
    match (chars.next(), chars.next()) {
        (Some('\\'), Some(escape)) => match escape {
            'n' => 10,
            'r' => 13,
            't' => 9,
            '0' => 0,
            other => other as u32,
        },
        (Some(c), None) => c as u32,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build_cfg;
    use crate::parser::parse;
    use crate::semantic::analyze;

    fn assemble(source: &str) -> String {
        let mut ast = parse(source).unwrap();
        let mut table = analyze(&mut ast);
        let cfg = build_cfg(&mut ast, &mut table);
        generate_assembly(&cfg, &ast, &table, &CodegenOptions::default())
    }

    #[test]
    fn header_and_sections_are_exact() {
        let asm = assemble("method main(): int begin end");
        assert!(asm.starts_with("; ---- Noobik assembly generated from CFG ----\n\n[section cram]\n\n"));
        assert!(asm.ends_with("[section name=dram, bank=dram, start=0x8000]\n"));
    }

    #[test]
    fn entry_label_roundtrip() {
        assert_eq!(parse_entry_label("entry: main (scope:2)"), Some(("main".to_owned(), 2)));
        assert_eq!(parse_entry_label("entry:f"), Some(("f".to_owned(), 1)));
        assert_eq!(parse_entry_label("end-if"), None);
    }

    #[test]
    fn int_literal_parsing() {
        assert_eq!(parse_int_literal("42"), 42);
        assert_eq!(parse_int_literal("0x10"), 16);
        assert_eq!(parse_int_literal("-7"), -7);
        assert_eq!(parse_int_literal("junk"), 0);
    }

    #[test]
    fn char_literal_decoding() {
        assert_eq!(decode_char_literal("'a'"), 97);
        assert_eq!(decode_char_literal("'\\n'"), 10);
        assert_eq!(decode_char_literal("'\\0'"), 0);
    }

    #[test]
    fn empty_function_is_prologue_plus_epilogue() {
        let asm = assemble("method main(): int begin end");
        assert!(asm.contains("_func_main:"));
        assert!(asm.contains("PUSH fp\n    MOV fp, sp"));
        assert!(asm.contains("_EPILOG_main:\n    MOV sp, fp\n    POP fp\n    RET"));
        // no locals, no frame adjustment
        assert!(!asm.contains("SUB sp, sp, r7"));
    }
}
