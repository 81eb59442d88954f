//! Control-flow graph construction.
//!
//! Each function body is lowered to a graph of typed nodes. Every node has at
//! most two out-edges: `default_next` (fall-through, or the false branch of a
//! condition) and `conditional_next` (the true branch, used only by
//! `Condition` nodes). Statement lowering returns a [`Segment`], an
//! entry/exit pair, and the caller chains segments into a linear flow.
//!
//! Nodes carry the AST subtrees of the expressions they evaluate, so
//! downstream passes never re-consult the statement structure. As a node
//! acquires an expression the builder runs the semantic expression checker
//! scoped to the enclosing function; a failed check flips the node to
//! `Error` and prefixes its label with a diagnostic.

use crate::ast::{Ast, AstKind, NodeId};
use crate::semantic::check_expression;
use crate::symbols::{GLOBAL_SCOPE, ScopeId, SymbolTable};

/// Index of a node in the CFG arena. Ids are dense and increase in creation
/// order across all functions; the code generator relies on this for
/// deterministic emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CfgNodeId(u32);

impl CfgNodeId {
    fn new(index: usize) -> Self {
        Self(index.try_into().expect("CFG too large"))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The numeric id used in labels (`_L_<fn>_<id>`).
    #[inline]
    pub fn id(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CfgNodeKind {
    Start,
    Block,
    Condition,
    Merge,
    End,
    Error,
}

/// One CFG node.
#[derive(Debug, Clone)]
pub struct CfgNode {
    pub id: CfgNodeId,
    pub kind: CfgNodeKind,
    pub label: String,
    /// The source statement this node was lowered from, if any.
    pub stmt: Option<NodeId>,
    /// Expression trees evaluated in this node, in evaluation order.
    /// Position 0 holds the test of a `Condition` node.
    pub exprs: Vec<NodeId>,
    pub default_next: Option<CfgNodeId>,
    pub conditional_next: Option<CfgNodeId>,
    pub has_error: bool,
    pub error_message: Option<String>,
    pub is_break: bool,
}

/// Entry/exit designators of one lowered function.
#[derive(Debug, Clone)]
pub struct CfgFunction {
    pub name: String,
    pub entry: CfgNodeId,
    pub exit: CfgNodeId,
}

/// The whole-program CFG: one connected component per function.
#[derive(Debug, Default)]
pub struct Cfg {
    nodes: Vec<CfgNode>,
    functions: Vec<CfgFunction>,
}

impl Cfg {
    pub fn node(&self, id: CfgNodeId) -> &CfgNode {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: CfgNodeId) -> &mut CfgNode {
        &mut self.nodes[id.index()]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &CfgNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn functions(&self) -> &[CfgFunction] {
        &self.functions
    }

    /// Nodes flagged with a semantic error.
    pub fn error_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.has_error).count()
    }

    fn add(&mut self, kind: CfgNodeKind, label: String, stmt: Option<NodeId>, expr: Option<NodeId>) -> CfgNodeId {
        let id = CfgNodeId::new(self.nodes.len());
        self.nodes.push(CfgNode {
            id,
            kind,
            label,
            stmt,
            exprs: expr.into_iter().collect(),
            default_next: None,
            conditional_next: None,
            has_error: false,
            error_message: None,
            is_break: false,
        });
        id
    }
}

/// An (entry, exit) pair returned by statement lowering. Either side may be
/// absent for statements that produce no nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Segment {
    pub entry: Option<CfgNodeId>,
    pub exit: Option<CfgNodeId>,
}

impl Segment {
    fn single(node: CfgNodeId) -> Self {
        Self {
            entry: Some(node),
            exit: Some(node),
        }
    }
}

/// Lowers every function of `ast` into one CFG.
///
/// Semantic annotations are written back into the AST and the symbol table's
/// error list as lowering proceeds.
pub fn build_cfg(ast: &mut Ast, table: &mut SymbolTable) -> Cfg {
    let mut builder = CfgBuilder {
        ast,
        table,
        cfg: Cfg::default(),
        loop_exits: Vec::new(),
        function_scope: GLOBAL_SCOPE,
    };
    builder.build_program();
    builder.cfg
}

struct CfgBuilder<'a> {
    ast: &'a mut Ast,
    table: &'a mut SymbolTable,
    cfg: Cfg,
    /// Innermost-last stack of loop-exit merge nodes, targeted by `break`.
    loop_exits: Vec<CfgNodeId>,
    function_scope: ScopeId,
}

impl CfgBuilder<'_> {
    fn build_program(&mut self) {
        let Some(root) = self.ast.root() else { return };
        for func_def in self.ast.children(root).to_vec() {
            if self.ast.kind(func_def) == AstKind::FunctionDef {
                self.build_function(func_def);
            }
        }
    }

    fn build_function(&mut self, func_def: NodeId) {
        let name = self
            .ast
            .child(func_def, 0)
            .and_then(|sig| self.ast.value(sig))
            .unwrap_or("unknown")
            .to_owned();
        let scope = self.table.function_scope(&name).unwrap_or(GLOBAL_SCOPE);
        self.function_scope = scope;
        self.loop_exits.clear();

        // This label is the contract with the code generator: it recovers the
        // function name and scope from it.
        let entry_label = format!("entry: {name} (scope:{})", scope.id());
        let entry = self.cfg.add(CfgNodeKind::Start, entry_label, None, None);

        let body_seg = match self.ast.child(func_def, 1) {
            Some(body) => self.build_statement(body),
            None => Segment::default(),
        };
        if let Some(body_entry) = body_seg.entry {
            self.link(entry, body_entry);
        }

        let exit = self.cfg.add(CfgNodeKind::End, "return".to_owned(), None, None);
        match body_seg.exit {
            Some(body_exit) if !self.cfg.node(body_exit).is_break => self.link(body_exit, exit),
            Some(_) => {}
            None => self.link(entry, exit),
        }

        self.cfg.functions.push(CfgFunction { name, entry, exit });
    }

    /// Sequence lowering: chains children, propagating the first entry and
    /// the last exit. After a break-terminated segment the remaining
    /// statements are still lowered (they stay as diagnosable nodes) but are
    /// not wired in sequence, so they end up unreachable.
    fn build_statements(&mut self, stmt_list: NodeId) -> Segment {
        let mut first = None;
        let mut last: Option<CfgNodeId> = None;
        let mut terminated = false;

        for child in self.ast.children(stmt_list).to_vec() {
            let seg = self.build_statement(child);
            if terminated {
                continue;
            }
            if first.is_none() {
                first = seg.entry;
            }
            if let (Some(prev), Some(entry)) = (last, seg.entry) {
                if !self.cfg.node(prev).is_break {
                    self.link(prev, entry);
                }
            }
            if seg.exit.is_some() {
                last = seg.exit;
            }
            if let Some(exit) = seg.exit {
                if self.cfg.node(exit).is_break {
                    terminated = true;
                }
            }
        }

        Segment { entry: first, exit: last }
    }

    fn build_statement(&mut self, stmt: NodeId) -> Segment {
        match self.ast.kind(stmt) {
            AstKind::ExprStatement => {
                let Some(expr) = self.ast.child(stmt, 0) else {
                    return Segment::default();
                };
                let label = self.expr_to_string(expr);
                let node = self.cfg.add(CfgNodeKind::Block, label, Some(stmt), Some(expr));
                self.check_node(node, expr);
                Segment::single(node)
            }

            AstKind::Return => {
                let expr = self.ast.child(stmt, 0);
                let label = match expr {
                    Some(e) => format!("return {}", self.expr_to_string(e)),
                    None => "return".to_owned(),
                };
                let node = self.cfg.add(CfgNodeKind::Block, label, Some(stmt), expr);
                if let Some(e) = expr {
                    self.check_node(node, e);
                }
                Segment::single(node)
            }

            AstKind::If => self.build_if(stmt),
            AstKind::While => self.build_while(stmt),
            AstKind::Repeat => self.build_repeat(stmt),

            AstKind::Break => {
                let node = self.cfg.add(CfgNodeKind::Block, "break".to_owned(), Some(stmt), None);
                if let Some(&exit) = self.loop_exits.last() {
                    self.cfg.node_mut(node).is_break = true;
                    self.link(node, exit);
                }
                Segment::single(node)
            }

            AstKind::StatementBlock | AstKind::StatementList | AstKind::VarDeclList => self.build_statements(stmt),

            AstKind::VarDeclaration => {
                // Storage is reserved by the symbol table; the node exists so
                // the declaration shows up in the graph, but yields no code.
                let node = self
                    .cfg
                    .add(CfgNodeKind::Block, "var-decl".to_owned(), Some(stmt), None);
                Segment::single(node)
            }

            _ => Segment::default(),
        }
    }

    fn build_if(&mut self, stmt: NodeId) -> Segment {
        let Some(cond) = self.ast.child(stmt, 0) else {
            return Segment::default();
        };
        let label = self.expr_to_string(cond);
        let cond_node = self.cfg.add(CfgNodeKind::Condition, label, Some(stmt), Some(cond));
        if self.check_node(cond_node, cond) {
            // An errored test has no usable branches; the error node stands
            // alone in the flow.
            return Segment::single(cond_node);
        }

        let then_seg = match self.ast.child(stmt, 1) {
            Some(then_stmt) => self.build_statement(then_stmt),
            None => Segment::default(),
        };
        let else_seg = match self.ast.child(stmt, 2) {
            Some(else_stmt) => self.build_statement(else_stmt),
            None => Segment::default(),
        };

        let merge = self.cfg.add(CfgNodeKind::Merge, "end-if".to_owned(), None, None);

        match then_seg.entry {
            Some(entry) => self.link_conditional(cond_node, entry),
            None => self.link_conditional(cond_node, merge),
        }
        match else_seg.entry {
            Some(entry) => self.link(cond_node, entry),
            None => self.link(cond_node, merge),
        }

        if let Some(exit) = then_seg.exit {
            if !self.cfg.node(exit).is_break {
                self.link(exit, merge);
            }
        }
        if let Some(exit) = else_seg.exit {
            if !self.cfg.node(exit).is_break {
                self.link(exit, merge);
            }
        }

        Segment {
            entry: Some(cond_node),
            exit: Some(merge),
        }
    }

    fn build_while(&mut self, stmt: NodeId) -> Segment {
        let Some(cond) = self.ast.child(stmt, 0) else {
            return Segment::default();
        };
        let label = self.expr_to_string(cond);
        let cond_node = self.cfg.add(CfgNodeKind::Condition, label, Some(stmt), Some(cond));
        if self.check_node(cond_node, cond) {
            return Segment::single(cond_node);
        }

        let exit_node = self.cfg.add(CfgNodeKind::Merge, "exit-while".to_owned(), None, None);

        self.loop_exits.push(exit_node);
        let body_seg = match self.ast.child(stmt, 1) {
            Some(body) => self.build_statement(body),
            None => Segment::default(),
        };
        self.loop_exits.pop();

        match body_seg.entry {
            Some(entry) => self.link_conditional(cond_node, entry),
            None => self.link_conditional(cond_node, exit_node),
        }
        if let Some(exit) = body_seg.exit {
            if !self.cfg.node(exit).is_break {
                // the loop back-edge
                self.link(exit, cond_node);
            }
        }
        self.link(cond_node, exit_node);

        Segment {
            entry: Some(cond_node),
            exit: Some(exit_node),
        }
    }

    fn build_repeat(&mut self, stmt: NodeId) -> Segment {
        let begin = self
            .cfg
            .add(CfgNodeKind::Merge, "begin-repeat".to_owned(), Some(stmt), None);
        let exit_node = self.cfg.add(CfgNodeKind::Merge, "exit-repeat".to_owned(), None, None);

        self.loop_exits.push(exit_node);
        let body_seg = match self.ast.child(stmt, 0) {
            Some(body) => self.build_statement(body),
            None => Segment::default(),
        };
        self.loop_exits.pop();

        if let Some(entry) = body_seg.entry {
            self.link(begin, entry);
        }

        let Some(until) = self.ast.child(stmt, 1) else {
            return Segment {
                entry: Some(begin),
                exit: Some(exit_node),
            };
        };

        let label = self.expr_to_string(until);
        let until_node = self.cfg.add(CfgNodeKind::Condition, label, Some(stmt), Some(until));
        let errored = self.check_node(until_node, until);

        match body_seg.exit {
            Some(exit) if !self.cfg.node(exit).is_break => self.link(exit, until_node),
            Some(_) => {}
            None => self.link(begin, until_node),
        }

        if errored {
            return Segment {
                entry: Some(begin),
                exit: Some(until_node),
            };
        }

        // until-true leaves the loop; until-false goes around again
        self.link_conditional(until_node, exit_node);
        self.link(until_node, begin);

        Segment {
            entry: Some(begin),
            exit: Some(exit_node),
        }
    }

    fn link(&mut self, from: CfgNodeId, to: CfgNodeId) {
        self.cfg.node_mut(from).default_next = Some(to);
    }

    fn link_conditional(&mut self, from: CfgNodeId, to: CfgNodeId) {
        self.cfg.node_mut(from).conditional_next = Some(to);
    }

    /// Runs the expression checker for a node that just acquired `expr`.
    /// On failure the node flips to `Error` and its label gains a prefix.
    /// Returns whether the node is now errored.
    fn check_node(&mut self, node: CfgNodeId, expr: NodeId) -> bool {
        let errored = check_expression(self.ast, self.table, expr, self.function_scope);
        if errored {
            let message = self
                .ast
                .error_message(expr)
                .unwrap_or("expression has an errored subexpression")
                .to_owned();
            let n = self.cfg.node_mut(node);
            n.kind = CfgNodeKind::Error;
            n.has_error = true;
            n.label = format!("error: {}", n.label);
            if n.error_message.is_none() {
                n.error_message = Some(message);
            }
        }
        errored
    }

    /// Compact source-like rendering of an expression for node labels.
    fn expr_to_string(&self, expr: NodeId) -> String {
        expr_label(self.ast, expr)
    }
}

/// Renders an expression subtree as a short diagnostic string.
pub fn expr_label(ast: &Ast, expr: NodeId) -> String {
    let value = ast.value(expr).unwrap_or("");
    match ast.kind(expr) {
        AstKind::Identifier | AstKind::IntLiteral | AstKind::BoolLiteral | AstKind::CharLiteral
        | AstKind::FloatLiteral => {
            if value.is_empty() {
                "?".to_owned()
            } else {
                value.to_owned()
            }
        }
        AstKind::StringLiteral => format!("\"{value}\""),
        AstKind::UnaryExpr => match ast.child(expr, 0) {
            Some(operand) => format!("{value}{}", expr_label(ast, operand)),
            None => value.to_owned(),
        },
        AstKind::Assignment | AstKind::IndexedAssignment => {
            match (ast.child(expr, 0), ast.child(expr, 1)) {
                (Some(lhs), Some(rhs)) => format!("{} := {}", expr_label(ast, lhs), expr_label(ast, rhs)),
                _ => ":=".to_owned(),
            }
        }
        AstKind::BinaryExpr => match (ast.child(expr, 0), ast.child(expr, 1)) {
            (Some(lhs), Some(rhs)) => {
                format!("({} {} {})", expr_label(ast, lhs), value, expr_label(ast, rhs))
            }
            _ => value.to_owned(),
        },
        AstKind::CallExpr => {
            let args = match ast.child(expr, 1) {
                Some(list) => ast
                    .children(list)
                    .iter()
                    .map(|&a| expr_label(ast, a))
                    .collect::<Vec<_>>()
                    .join(", "),
                None => String::new(),
            };
            format!("{value}({args})")
        }
        AstKind::IndexExpr => match (ast.child(expr, 0), ast.child(expr, 1)) {
            (Some(base), Some(index)) => format!("{}[{}]", expr_label(ast, base), expr_label(ast, index)),
            _ => "[]".to_owned(),
        },
        AstKind::AddrOf => match ast.child(expr, 0) {
            Some(operand) => format!("@{}", expr_label(ast, operand)),
            None => "@".to_owned(),
        },
        AstKind::Deref => match ast.child(expr, 0) {
            Some(operand) => format!("*{}", expr_label(ast, operand)),
            None => "*".to_owned(),
        },
        kind => {
            if value.is_empty() {
                format!("<{kind}>")
            } else {
                value.to_owned()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::semantic::analyze;

    fn lower(source: &str) -> (Ast, SymbolTable, Cfg) {
        let mut ast = parse(source).unwrap();
        let mut table = analyze(&mut ast);
        let cfg = build_cfg(&mut ast, &mut table);
        (ast, table, cfg)
    }

    #[test]
    fn empty_body_is_start_to_end() {
        let (_, _, cfg) = lower("method main(): int begin end");
        let func = &cfg.functions()[0];
        assert_eq!(cfg.node(func.entry).kind, CfgNodeKind::Start);
        assert_eq!(cfg.node(func.entry).default_next, Some(func.exit));
        assert_eq!(cfg.node(func.exit).kind, CfgNodeKind::End);
    }

    #[test]
    fn start_label_carries_scope() {
        let (_, table, cfg) = lower("method main(): int begin end");
        let entry = cfg.functions()[0].entry;
        let scope = table.function_scope("main").unwrap();
        assert_eq!(cfg.node(entry).label, format!("entry: main (scope:{})", scope.id()));
    }

    #[test]
    fn condition_nodes_have_both_edges() {
        let (_, _, cfg) = lower("method f(a: int): int begin if a > 0 then a := 1 else a := 2 end");
        for node in cfg.nodes() {
            if node.kind == CfgNodeKind::Condition {
                assert!(node.default_next.is_some());
                assert!(node.conditional_next.is_some());
                assert!(!node.exprs.is_empty());
            }
        }
    }

    #[test]
    fn break_targets_the_loop_exit_merge() {
        let (_, _, cfg) = lower(
            "method g(): int begin var i: int; i := 0; \
             while i < 10 do begin if i == 5 then break; i := i + 1 end end",
        );
        let break_node = cfg.nodes().find(|n| n.is_break).expect("break node");
        let target = cfg.node(break_node.default_next.expect("break edge"));
        assert_eq!(target.kind, CfgNodeKind::Merge);
        assert_eq!(target.label, "exit-while");
    }

    #[test]
    fn undeclared_name_flips_node_to_error() {
        let (ast, table, cfg) = lower("method f(): int begin y := 1 end");
        let error = cfg.nodes().find(|n| n.kind == CfgNodeKind::Error).expect("error node");
        assert!(error.has_error);
        assert!(error.error_message.as_deref().unwrap().contains("Undeclared variable 'y'"));
        assert_eq!(ast.error_count(), 2); // the identifier and the assignment
        assert_eq!(table.errors.len(), 2);
    }
}
