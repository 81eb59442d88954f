//! Accumulated diagnostics and the end-of-run report.
//!
//! Semantic and CFG errors are collected, never thrown: each pass records a
//! [`Diagnostic`] and keeps going so a single run surfaces as many problems
//! as possible. Only parse failures and output I/O failures abort the
//! pipeline.

use std::fmt;

use crate::ast::Ast;
use crate::cfg::Cfg;
use crate::symbols::SymbolTable;

/// Buckets of accumulated (non-fatal) errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DiagnosticKind {
    /// Redeclaration in the same scope, parameter/local name clash.
    Declaration,
    /// Undeclared identifier use, call to an undeclared or non-function name.
    Resolution,
    /// Assignment to a constant.
    Assignment,
    /// An expression whose subexpression is already errored.
    Propagation,
    /// Non-error finding, e.g. a declared-but-unused variable.
    Warning,
}

/// One accumulated finding with file-line context.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub line: u32,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>, line: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            line,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}: {}", self.line, self.kind, self.message)
    }
}

/// Per-bucket error counts for the final user-visible summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Report {
    /// AST nodes carrying an error annotation.
    pub ast_errors: usize,
    /// Entries in the symbol table's error list.
    pub symbol_errors: usize,
    /// CFG nodes of kind `Error` (or flagged with an error).
    pub cfg_errors: usize,
    pub warnings: usize,
}

impl Report {
    /// Gathers counts from the three annotation sinks.
    pub fn collect(ast: &Ast, table: &SymbolTable, cfg: &Cfg) -> Self {
        Self {
            ast_errors: ast.error_count(),
            symbol_errors: table.errors.len(),
            cfg_errors: cfg.error_count(),
            warnings: table.warnings.len(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.ast_errors == 0 && self.symbol_errors == 0 && self.cfg_errors == 0
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "AST errors:          {}", self.ast_errors)?;
        writeln!(f, "symbol table errors: {}", self.symbol_errors)?;
        writeln!(f, "CFG node errors:     {}", self.cfg_errors)?;
        writeln!(f, "warnings:            {}", self.warnings)?;
        if !self.is_clean() {
            let total = self.ast_errors + self.symbol_errors + self.cfg_errors;
            writeln!(f, "analysis finished with {total} error(s)")?;
        }
        Ok(())
    }
}
