//! Symbol-table construction and semantic checking.
//!
//! Analysis runs in two passes over the program AST. Pass 1 records every
//! function header (name, arity, parameter types, return type) in the global
//! scope so calls can resolve regardless of definition order. Pass 2 declares
//! top-level globals, then enters each function: a `Function` scope is
//! created and named after the function, parameters get positive fp offsets
//! left-to-right, and the body is walked with `Block` scopes opened for
//! if-arms and loop bodies. A bare `begin ... end` directly under a function
//! does not open a scope; functions own their top-level locals.
//!
//! All errors accumulate: the offending AST node is annotated, the table's
//! error list gains a structured diagnostic, and analysis continues.

use crate::ast::{Ast, AstKind, NodeId};
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::symbols::{GLOBAL_SCOPE, ScopeId, ScopeKind, SymbolKind, SymbolTable};

/// Builds the symbol table for `ast` and runs the semantic checks.
pub fn analyze(ast: &mut Ast) -> SymbolTable {
    let mut table = SymbolTable::new();
    let Some(root) = ast.root() else {
        return table;
    };

    let top_level: Vec<NodeId> = ast.children(root).to_vec();

    // Pass 1: function headers only.
    for &child in &top_level {
        if ast.kind(child) == AstKind::FunctionDef {
            declare_header(ast, &mut table, child);
        }
    }

    // Pass 2: globals first so every body sees them, then function bodies.
    for &child in &top_level {
        if ast.kind(child) == AstKind::VarDeclaration {
            declare_variables(ast, &mut table, child, GLOBAL_SCOPE);
        }
    }
    for &child in &top_level {
        if ast.kind(child) == AstKind::FunctionDef {
            analyze_function(ast, &mut table, child);
        }
    }

    table.audit_unused();
    table
}

/// One parameter as found in a signature: the `ArgDef` node, its name, and
/// its declared type.
struct Param {
    node: NodeId,
    name: String,
    data_type: String,
}

/// The `[params?, return-TypeRef?]` children of a `FunctionSignature`.
fn signature_parts(ast: &Ast, signature: NodeId) -> (Option<NodeId>, Option<NodeId>) {
    let mut params = None;
    let mut return_type = None;
    for &child in ast.children(signature) {
        match ast.kind(child) {
            AstKind::ArgList | AstKind::ArgDef => params = params.or(Some(child)),
            AstKind::TypeRef => return_type = return_type.or(Some(child)),
            _ => {}
        }
    }
    (params, return_type)
}

/// Flattens a parameter list.
///
/// The parser emits a flat `ArgList`, but older front ends chained later
/// `ArgDef`s as children of the first one, so both shapes are normalized
/// here: an `ArgDef` contributes itself plus any `ArgDef` children, a list
/// node contributes each child in turn.
fn collect_params(ast: &Ast, node: NodeId, out: &mut Vec<Param>) {
    match ast.kind(node) {
        AstKind::ArgDef => {
            let name = ast.value(node).unwrap_or("unknown").to_owned();
            let data_type = ast
                .children(node)
                .iter()
                .find(|&&c| ast.kind(c) == AstKind::TypeRef)
                .and_then(|&c| ast.value(c))
                .unwrap_or("unknown")
                .to_owned();
            out.push(Param {
                node,
                name,
                data_type,
            });
            for &child in ast.children(node) {
                if ast.kind(child) == AstKind::ArgDef {
                    collect_params(ast, child, out);
                }
            }
        }
        _ => {
            for &child in ast.children(node) {
                if ast.kind(child) == AstKind::ArgDef {
                    collect_params(ast, child, out);
                }
            }
        }
    }
}

/// Interprets a `TypeRef` node: either a base type name, or `"array"` with
/// `[size-literal, element-TypeRef]` children.
fn type_ref_info(ast: &Ast, type_ref: NodeId) -> (String, bool, u32) {
    if ast.value(type_ref) == Some("array") {
        let size = ast
            .child(type_ref, 0)
            .and_then(|c| ast.value(c))
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);
        let element = ast
            .child(type_ref, 1)
            .and_then(|c| ast.value(c))
            .unwrap_or("unknown")
            .to_owned();
        (element, true, size)
    } else {
        (ast.value(type_ref).unwrap_or("unknown").to_owned(), false, 0)
    }
}

fn declare_header(ast: &mut Ast, table: &mut SymbolTable, func_def: NodeId) {
    let Some(signature) = ast.child(func_def, 0).filter(|&s| ast.kind(s) == AstKind::FunctionSignature) else {
        return;
    };
    let name = ast.value(signature).unwrap_or("unknown").to_owned();
    let line = ast.line(signature);

    let (params, return_node) = signature_parts(ast, signature);
    let mut collected = Vec::new();
    if let Some(params) = params {
        collect_params(ast, params, &mut collected);
    }
    let param_types: Vec<String> = collected.iter().map(|p| p.data_type.clone()).collect();
    let return_type = return_node.and_then(|n| ast.value(n)).map(str::to_owned);

    if table.declare_function(&name, param_types, return_type, line).is_none() {
        let message = format!("function '{name}' is already declared");
        ast.set_error(signature, message.as_str());
        table
            .errors
            .push(Diagnostic::new(DiagnosticKind::Declaration, message, line));
    }
}

fn analyze_function(ast: &mut Ast, table: &mut SymbolTable, func_def: NodeId) {
    let Some(signature) = ast.child(func_def, 0).filter(|&s| ast.kind(s) == AstKind::FunctionSignature) else {
        return;
    };
    let name = ast.value(signature).unwrap_or("unknown").to_owned();
    let scope = table.push_scope(ScopeKind::Function, Some(name), GLOBAL_SCOPE);

    let (params, _) = signature_parts(ast, signature);
    let mut collected = Vec::new();
    if let Some(params) = params {
        collect_params(ast, params, &mut collected);
    }
    for param in collected {
        if table.declare_parameter(&param.name, &param.data_type, scope, ast.line(param.node)).is_none() {
            let message = format!("parameter '{}' is already declared", param.name);
            ast.set_error(param.node, message.as_str());
            table
                .errors
                .push(Diagnostic::new(DiagnosticKind::Declaration, message, ast.line(param.node)));
        }
    }

    if let Some(body) = ast.child(func_def, 1) {
        analyze_statement(ast, table, body, scope);
    }
}

fn analyze_statement(ast: &mut Ast, table: &mut SymbolTable, stmt: NodeId, scope: ScopeId) {
    match ast.kind(stmt) {
        AstKind::VarDeclaration => declare_variables(ast, table, stmt, scope),

        // Bare blocks do not open a scope of their own.
        AstKind::StatementBlock | AstKind::StatementList | AstKind::VarDeclList => {
            for child in ast.children(stmt).to_vec() {
                analyze_statement(ast, table, child, scope);
            }
        }

        AstKind::If => {
            if let Some(cond) = ast.child(stmt, 0) {
                check_expression(ast, table, cond, scope);
            }
            if let Some(then_stmt) = ast.child(stmt, 1) {
                let inner = table.push_scope(ScopeKind::Block, None, scope);
                analyze_statement(ast, table, then_stmt, inner);
            }
            if let Some(else_stmt) = ast.child(stmt, 2) {
                let inner = table.push_scope(ScopeKind::Block, None, scope);
                analyze_statement(ast, table, else_stmt, inner);
            }
        }

        AstKind::While => {
            if let Some(cond) = ast.child(stmt, 0) {
                check_expression(ast, table, cond, scope);
            }
            if let Some(body) = ast.child(stmt, 1) {
                let inner = table.push_scope(ScopeKind::Block, None, scope);
                analyze_statement(ast, table, body, inner);
            }
        }

        AstKind::Repeat => {
            // The until-expression sees names declared in the body.
            let inner = table.push_scope(ScopeKind::Block, None, scope);
            if let Some(body) = ast.child(stmt, 0) {
                analyze_statement(ast, table, body, inner);
            }
            if let Some(cond) = ast.child(stmt, 1) {
                check_expression(ast, table, cond, inner);
            }
        }

        AstKind::Return => {
            if let Some(expr) = ast.child(stmt, 0) {
                check_expression(ast, table, expr, scope);
            }
        }

        AstKind::ExprStatement => {
            if let Some(expr) = ast.child(stmt, 0) {
                check_expression(ast, table, expr, scope);
            }
        }

        _ => {}
    }
}

/// Declares every identifier of a `VarDeclaration`, all with the type and
/// array information of the declaration's `TypeRef`.
fn declare_variables(ast: &mut Ast, table: &mut SymbolTable, decl: NodeId, scope: ScopeId) {
    let Some(ids) = ast.child(decl, 0) else { return };
    let Some(type_ref) = ast.child(decl, 1) else { return };
    let (data_type, is_array, array_size) = type_ref_info(ast, type_ref);
    let is_const = ast.value(decl) == Some("const");

    let id_nodes: Vec<NodeId> = match ast.kind(ids) {
        AstKind::Identifier => vec![ids],
        _ => ast
            .children(ids)
            .iter()
            .copied()
            .filter(|&c| ast.kind(c) == AstKind::Identifier)
            .collect(),
    };

    for id in id_nodes {
        let name = ast.value(id).unwrap_or("unknown").to_owned();
        let line = ast.line(id);
        let declared = if is_const {
            table.declare_constant(&name, &data_type, scope, line)
        } else {
            table.declare_variable(&name, &data_type, is_array, array_size, scope, line)
        };
        if declared.is_none() {
            let message = format!("redeclaration of '{name}'");
            ast.set_error(id, message.as_str());
            table
                .errors
                .push(Diagnostic::new(DiagnosticKind::Declaration, message, line));
        } else {
            ast.set_data_type(id, data_type.as_str());
        }
    }
}

/// Recursive semantic check of one expression tree, resolving names from
/// `scope` out to global.
///
/// Marks the offending AST node and appends to the table's error list on
/// failure; a node that already carries an error keeps its first message and
/// is not reported twice (the CFG builder re-runs this checker). An
/// expression with an errored subexpression is marked errored itself.
/// Returns whether `expr` is errored after the check.
pub fn check_expression(ast: &mut Ast, table: &mut SymbolTable, expr: NodeId, scope: ScopeId) -> bool {
    match ast.kind(expr) {
        AstKind::Identifier => {
            let name = ast.value(expr).unwrap_or("unknown").to_owned();
            match table.lookup(&name, scope) {
                Some(sym) => {
                    table.symbol_mut(sym).used = true;
                    let data_type = table.symbol(sym).data_type.clone();
                    ast.set_data_type(expr, data_type);
                }
                // A node already annotated with a type was resolved by an
                // earlier pass through a narrower scope (the CFG builder
                // re-checks from the function scope, which cannot see
                // block-scoped declarations).
                None if ast.node(expr).data_type.is_some() => {}
                None => {
                    report(ast, table, expr, DiagnosticKind::Resolution, format!("Undeclared variable '{name}'"));
                }
            }
        }

        AstKind::CallExpr => {
            let name = ast.value(expr).unwrap_or("unknown").to_owned();
            match table.lookup(&name, GLOBAL_SCOPE) {
                None => {
                    report(ast, table, expr, DiagnosticKind::Resolution, format!("Undeclared function '{name}'"));
                }
                Some(sym) if table.symbol(sym).kind != SymbolKind::Function => {
                    report(ast, table, expr, DiagnosticKind::Resolution, format!("'{name}' is not a function"));
                }
                Some(sym) => {
                    table.symbol_mut(sym).used = true;
                    let return_type = table.symbol(sym).return_type.clone();
                    if let Some(ty) = return_type {
                        ast.set_data_type(expr, ty);
                    }
                }
            }

            let mut child_error = false;
            if let Some(args) = ast.child(expr, 1) {
                for arg in ast.children(args).to_vec() {
                    child_error |= check_expression(ast, table, arg, scope);
                }
            }
            if child_error {
                report(
                    ast,
                    table,
                    expr,
                    DiagnosticKind::Propagation,
                    format!("call to '{name}' has an errored argument"),
                );
            }
        }

        AstKind::Assignment | AstKind::IndexedAssignment => {
            let mut child_error = false;
            if let Some(lhs) = ast.child(expr, 0) {
                child_error |= check_assignment_target(ast, table, lhs, scope);
            }
            if let Some(rhs) = ast.child(expr, 1) {
                child_error |= check_expression(ast, table, rhs, scope);
            }
            if child_error {
                report(
                    ast,
                    table,
                    expr,
                    DiagnosticKind::Propagation,
                    "assignment has an errored operand",
                );
            }
        }

        AstKind::BinaryExpr => {
            let op = ast.value(expr).unwrap_or("?").to_owned();
            let mut child_error = false;
            for child in ast.children(expr).to_vec() {
                child_error |= check_expression(ast, table, child, scope);
            }
            if child_error {
                report(
                    ast,
                    table,
                    expr,
                    DiagnosticKind::Propagation,
                    format!("Invalid operands for operator '{op}'"),
                );
            }
        }

        AstKind::UnaryExpr => {
            let op = ast.value(expr).unwrap_or("?").to_owned();
            let mut child_error = false;
            for child in ast.children(expr).to_vec() {
                child_error |= check_expression(ast, table, child, scope);
            }
            if child_error {
                report(
                    ast,
                    table,
                    expr,
                    DiagnosticKind::Propagation,
                    format!("Invalid operand for unary operator '{op}'"),
                );
            }
        }

        AstKind::IndexExpr | AstKind::AddrOf | AstKind::Deref => {
            let mut child_error = false;
            for child in ast.children(expr).to_vec() {
                child_error |= check_expression(ast, table, child, scope);
            }
            if child_error {
                report(
                    ast,
                    table,
                    expr,
                    DiagnosticKind::Propagation,
                    "expression has an errored subexpression",
                );
            }
        }

        _ => {}
    }
    ast.has_error(expr)
}

/// Checks the left side of an assignment. Identifiers must resolve and must
/// not name a constant; index expressions are checked recursively.
fn check_assignment_target(ast: &mut Ast, table: &mut SymbolTable, lhs: NodeId, scope: ScopeId) -> bool {
    match ast.kind(lhs) {
        AstKind::Identifier => {
            let name = ast.value(lhs).unwrap_or("unknown").to_owned();
            match table.lookup(&name, scope) {
                // resolved through a narrower scope by an earlier pass
                None if ast.node(lhs).data_type.is_some() => {}
                None => {
                    report(ast, table, lhs, DiagnosticKind::Resolution, format!("Undeclared variable '{name}'"));
                }
                Some(sym) if table.symbol(sym).constant => {
                    report(
                        ast,
                        table,
                        lhs,
                        DiagnosticKind::Assignment,
                        format!("Cannot assign to constant '{name}'"),
                    );
                }
                Some(sym) => {
                    let symbol = table.symbol_mut(sym);
                    symbol.used = true;
                    symbol.modified = true;
                    symbol.initialized = true;
                    let data_type = symbol.data_type.clone();
                    ast.set_data_type(lhs, data_type);
                }
            }
            ast.has_error(lhs)
        }
        AstKind::IndexExpr => check_expression(ast, table, lhs, scope),
        _ => {
            report(ast, table, lhs, DiagnosticKind::Assignment, "invalid assignment target");
            true
        }
    }
}

/// Annotates `node` and appends to the error list, unless the node already
/// carries an error from an earlier pass.
fn report(ast: &mut Ast, table: &mut SymbolTable, node: NodeId, kind: DiagnosticKind, message: impl Into<String>) {
    if ast.has_error(node) {
        return;
    }
    let message = message.into();
    ast.set_error(node, message.as_str());
    table.errors.push(Diagnostic::new(kind, message, ast.line(node)));
}
