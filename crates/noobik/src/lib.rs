//! Compiler for the Noobik source language, a small Pascal-flavored
//! imperative language, targeting the Noobik 32-bit register machine with
//! its CRAM (code), SRAM (stack), DRAM (globals) and KRAM (constants) banks.
//!
//! The pipeline runs strictly in sequence:
//! parse → symbol table → call graph → CFG → codegen. Semantic errors
//! accumulate instead of aborting; only parse and output I/O failures stop
//! the run.

mod ast;
mod callgraph;
mod cfg;
mod codegen;
mod diagnostics;
mod dot;
mod parser;
mod semantic;
mod symbols;
mod token;

pub use crate::{
    ast::{Ast, AstKind, AstNode, NodeId},
    callgraph::CallGraph,
    cfg::{Cfg, CfgFunction, CfgNode, CfgNodeId, CfgNodeKind, Segment, build_cfg, expr_label},
    codegen::{CodegenOptions, generate_assembly},
    diagnostics::{Diagnostic, DiagnosticKind, Report},
    dot::{ast_to_dot, callgraph_to_dot, cfg_to_dot},
    parser::{ParseError, ParseResult, parse},
    semantic::{analyze, check_expression},
    symbols::{
        GLOBAL_SCOPE, Scope, ScopeId, ScopeKind, Symbol, SymbolId, SymbolKind, SymbolTable, scalar_size,
    },
    token::{LexError, Token, TokenKind, tokenize},
};
