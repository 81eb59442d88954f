//! Graphviz DOT writers for the AST, the CFG, and the call graph.
//!
//! These produce the three persisted text outputs (`ast_output.dot`,
//! `cfg_output.dot`, `calltree_output.dot`). The CFG export nests each
//! node's expression trees inside a per-node cluster, linked to the owning
//! node with a dotted edge, and labels conditional edges `true` (dashed)
//! and `false`.

use std::fmt::Write;

use crate::ast::{Ast, AstKind, NodeId};
use crate::callgraph::CallGraph;
use crate::cfg::{Cfg, CfgNodeKind};

/// Escapes a label for a double-quoted DOT string.
fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            _ => out.push(c),
        }
    }
    out
}

/// Short display name for an expression-tree node.
fn op_name(ast: &Ast, node: NodeId) -> String {
    let value = ast.value(node).unwrap_or("");
    match ast.kind(node) {
        AstKind::Identifier => format!("Load({})", if value.is_empty() { "unknown" } else { value }),
        AstKind::IntLiteral | AstKind::BoolLiteral | AstKind::CharLiteral | AstKind::FloatLiteral => {
            if value.is_empty() {
                "Const".to_owned()
            } else {
                format!("Const({value})")
            }
        }
        AstKind::StringLiteral => format!("Const(\\\"{value}\\\")"),
        AstKind::Assignment | AstKind::IndexedAssignment => "Store".to_owned(),
        AstKind::CallExpr => {
            if value.is_empty() {
                "FunctionCall".to_owned()
            } else {
                format!("FunctionCall({value})")
            }
        }
        AstKind::IndexExpr => "Indexer".to_owned(),
        AstKind::AddrOf => "Addr".to_owned(),
        AstKind::Deref => "Deref".to_owned(),
        AstKind::MemberAccess => "Member".to_owned(),
        AstKind::BinaryExpr => match value {
            "+" => "Add".to_owned(),
            "-" => "Sub".to_owned(),
            "*" => "Mul".to_owned(),
            "/" => "Div".to_owned(),
            "%" => "Mod".to_owned(),
            "==" => "Eq".to_owned(),
            "!=" => "NotEq".to_owned(),
            "<" => "Lt".to_owned(),
            ">" => "Gt".to_owned(),
            "<=" => "LtEq".to_owned(),
            ">=" => "GtEq".to_owned(),
            "&" => "And".to_owned(),
            "|" => "Or".to_owned(),
            "^" => "Xor".to_owned(),
            "<<" => "LShift".to_owned(),
            ">>" => "RShift".to_owned(),
            "&&" => "LogicAnd".to_owned(),
            "||" => "LogicOr".to_owned(),
            _ => "BinOp".to_owned(),
        },
        AstKind::UnaryExpr => match value {
            "-" => "Neg".to_owned(),
            "+" => "Pos".to_owned(),
            "!" => "Not".to_owned(),
            "~" => "BitNot".to_owned(),
            _ => "UnOp".to_owned(),
        },
        kind => {
            if value.is_empty() {
                kind.to_string()
            } else {
                value.to_owned()
            }
        }
    }
}

// ============================================================================
// AST export
// ============================================================================

/// Renders the whole AST as a DOT digraph.
pub fn ast_to_dot(ast: &Ast) -> String {
    let mut out = String::new();
    out.push_str("digraph AST {\n");
    out.push_str("  rankdir=TB;\n");
    out.push_str("  node [fontname=\"Courier\", fontsize=10];\n\n");

    if let Some(root) = ast.root() {
        let mut counter = 0;
        write_ast_node(ast, root, &mut counter, &mut out);
    }

    out.push_str("}\n");
    out
}

fn write_ast_node(ast: &Ast, node: NodeId, counter: &mut usize, out: &mut String) -> usize {
    let id = *counter;
    *counter += 1;

    let kind = ast.kind(node);
    let label = match ast.value(node) {
        Some(value) => format!("{kind}\\n{}", escape(value)),
        None => kind.to_string(),
    };

    if ast.has_error(node) {
        let message = escape(ast.error_message(node).unwrap_or("error"));
        let _ = writeln!(
            out,
            "  node{id} [label=\"{label}\\nERROR: {message}\", shape=box, \
             fillcolor=\"#FF6B6B\", fontcolor=white, style=filled];"
        );
    } else {
        let _ = writeln!(out, "  node{id} [label=\"{label}\", shape=box, fillcolor=lightblue, style=filled];");
    }

    for &child in ast.children(node) {
        let child_id = write_ast_node(ast, child, counter, out);
        let _ = writeln!(out, "  node{id} -> node{child_id};");
    }
    id
}

// ============================================================================
// CFG export
// ============================================================================

/// Renders the CFG with per-node nested expression trees.
pub fn cfg_to_dot(cfg: &Cfg, ast: &Ast) -> String {
    let mut out = String::new();
    out.push_str("digraph CFG {\n");
    out.push_str("  rankdir=TB;\n");
    out.push_str("  node [fontname=\"Courier\", fontsize=10];\n");
    out.push_str("  edge [fontname=\"Courier\", fontsize=9];\n\n");

    // first pass: nodes, with expression trees in clusters
    for node in cfg.nodes() {
        let label = if node.has_error {
            let message = node.error_message.as_deref().unwrap_or("error");
            format!("{}\\nERROR: {}", escape(&node.label), escape(message))
        } else if node.label.is_empty() {
            format!("Node {}", node.id.id())
        } else {
            escape(&node.label)
        };

        let style = if node.has_error {
            "shape=box, fillcolor=\"#FF6B6B\", fontcolor=white, style=filled, penwidth=2"
        } else {
            match node.kind {
                CfgNodeKind::Condition => "shape=diamond, fillcolor=\"#FFD93D\", style=filled",
                CfgNodeKind::Merge => "shape=box, fillcolor=\"#95E1D3\", style=filled",
                CfgNodeKind::Start => "shape=circle, fillcolor=\"#6BCF7F\", style=filled",
                CfgNodeKind::End => "shape=circle, fillcolor=\"#FF9A76\", style=filled",
                CfgNodeKind::Block | CfgNodeKind::Error => "shape=box, fillcolor=lightblue, style=filled",
            }
        };

        if node.exprs.is_empty() {
            let _ = writeln!(out, "  node{} [label=\"{label}\", {style}];", node.id.id());
        } else {
            let _ = writeln!(out, "  subgraph cluster_node_{} {{", node.id.id());
            out.push_str("    style=filled;\n    color=\"#F0F0F0\";\n    margin=10;\n    label=\"\";\n");
            let _ = writeln!(out, "    node{} [label=\"{label}\", {style}];", node.id.id());

            for (tree_index, &expr) in node.exprs.iter().enumerate() {
                let tree_id = node.id.id() as usize * 1000 + tree_index;
                let mut counter = 0;
                write_expr_tree(ast, expr, tree_id, &mut counter, &mut out);
                if counter > 0 {
                    let _ = writeln!(
                        out,
                        "    node{} -> tree{tree_id}_node0 [style=dotted, label=\"expr_{tree_index}\"];",
                        node.id.id()
                    );
                }
            }
            out.push_str("  }\n");
        }
    }

    out.push_str("\n  // CFG edges\n");

    // second pass: edges
    for node in cfg.nodes() {
        if let Some(next) = node.conditional_next {
            let _ = writeln!(
                out,
                "  node{} -> node{} [label=\"true\", style=dashed];",
                node.id.id(),
                next.id()
            );
            if let Some(next) = node.default_next {
                let _ = writeln!(out, "  node{} -> node{} [label=\"false\"];", node.id.id(), next.id());
            }
        } else if let Some(next) = node.default_next {
            let _ = writeln!(out, "  node{} -> node{};", node.id.id(), next.id());
        }
    }

    out.push_str("}\n");
    out
}

fn write_expr_tree(ast: &Ast, node: NodeId, tree_id: usize, counter: &mut usize, out: &mut String) -> usize {
    let id = *counter;
    *counter += 1;

    let label = op_name(ast, node);
    if ast.has_error(node) {
        let message = escape(ast.error_message(node).unwrap_or("error"));
        let _ = writeln!(
            out,
            "    tree{tree_id}_node{id} [label=\"{label}\\nERROR: {message}\", shape=ellipse, \
             fillcolor=\"#FF6B6B\", fontcolor=white, style=filled, penwidth=2];"
        );
    } else if ast.kind(node) == AstKind::Identifier {
        let _ = writeln!(
            out,
            "    tree{tree_id}_node{id} [label=\"{label}\", shape=box, fillcolor=\"#A8E6CF\", style=filled];"
        );
    } else if matches!(
        ast.kind(node),
        AstKind::IntLiteral | AstKind::BoolLiteral | AstKind::CharLiteral | AstKind::FloatLiteral
    ) {
        let _ = writeln!(
            out,
            "    tree{tree_id}_node{id} [label=\"{label}\", shape=box, fillcolor=\"#FFD93D\", style=filled];"
        );
    } else {
        let _ = writeln!(
            out,
            "    tree{tree_id}_node{id} [label=\"{label}\", shape=ellipse, fillcolor=lightblue, style=filled];"
        );
    }

    for &child in ast.children(node) {
        let child_id = write_expr_tree(ast, child, tree_id, counter, out);
        let _ = writeln!(out, "    tree{tree_id}_node{id} -> tree{tree_id}_node{child_id};");
    }
    id
}

// ============================================================================
// Call graph export
// ============================================================================

/// Renders the call graph; `main` is highlighted.
pub fn callgraph_to_dot(graph: &CallGraph) -> String {
    let mut out = String::new();
    out.push_str("digraph CallGraph {\n");
    out.push_str("  rankdir=LR;\n");
    out.push_str("  node [shape=box, fontname=\"Courier\", fontsize=10];\n");
    out.push_str("  edge [fontname=\"Courier\", fontsize=9];\n\n");

    out.push_str("  // Functions\n");
    for name in graph.functions() {
        let color = if name == "main" { "lightgreen" } else { "white" };
        let _ = writeln!(out, "  \"{}\" [fillcolor={color}, style=filled];", escape(name));
    }

    out.push_str("\n  // Calls\n");
    for (caller, callee, count) in graph.edges() {
        if count == 1 {
            let _ = writeln!(out, "  \"{}\" -> \"{}\";", escape(caller), escape(callee));
        } else {
            let _ = writeln!(out, "  \"{}\" -> \"{}\" [label=\"{count}\"];", escape(caller), escape(callee));
        }
    }

    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build_cfg;
    use crate::parser::parse;
    use crate::semantic::analyze;

    #[test]
    fn escaping_covers_dot_specials() {
        assert_eq!(escape("a\"b\\c\nd<e>&"), "a\\\"b\\\\c\\nd&lt;e&gt;&amp;");
    }

    #[test]
    fn cfg_dot_labels_conditional_edges() {
        let mut ast = parse("method f(a: int): int begin if a > 0 then return 1 else return 0 end").unwrap();
        let mut table = analyze(&mut ast);
        let cfg = build_cfg(&mut ast, &mut table);
        let dot = cfg_to_dot(&cfg, &ast);
        assert!(dot.contains("[label=\"true\", style=dashed]"));
        assert!(dot.contains("[label=\"false\"]"));
        assert!(dot.contains("digraph CFG {"));
    }
}
