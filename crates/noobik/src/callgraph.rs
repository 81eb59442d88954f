//! Caller/callee edges extracted from the AST, used by diagnostics and the
//! call-graph exporter.

use indexmap::IndexMap;

use crate::ast::{Ast, AstKind, NodeId};

/// A multiset of `(caller, callee)` edges with call counts. Edge order is
/// first-seen, which keeps the exported graph deterministic.
#[derive(Debug, Default)]
pub struct CallGraph {
    edges: IndexMap<(String, String), u32>,
}

impl CallGraph {
    /// Walks every function body of `ast` and records each call site.
    pub fn build(ast: &Ast) -> Self {
        let mut graph = Self::default();
        let Some(root) = ast.root() else { return graph };

        for &func_def in ast.children(root) {
            if ast.kind(func_def) != AstKind::FunctionDef {
                continue;
            }
            let caller = ast
                .child(func_def, 0)
                .and_then(|sig| ast.value(sig))
                .unwrap_or("unknown")
                .to_owned();
            if let Some(body) = ast.child(func_def, 1) {
                graph.collect_calls(ast, body, &caller);
            }
        }
        graph
    }

    fn collect_calls(&mut self, ast: &Ast, node: NodeId, caller: &str) {
        if ast.kind(node) == AstKind::CallExpr {
            if let Some(callee) = ast.value(node) {
                self.add_call(caller, callee);
            }
        }
        for &child in ast.children(node) {
            self.collect_calls(ast, child, caller);
        }
    }

    /// Records one call, bumping the count of an existing edge.
    pub fn add_call(&mut self, caller: &str, callee: &str) {
        if callee == "unknown" {
            return;
        }
        *self
            .edges
            .entry((caller.to_owned(), callee.to_owned()))
            .or_insert(0) += 1;
    }

    /// `(caller, callee, count)` triples in first-seen order.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str, u32)> {
        self.edges
            .iter()
            .map(|((caller, callee), &count)| (caller.as_str(), callee.as_str(), count))
    }

    /// Every function name appearing in the graph, first-seen order.
    pub fn functions(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (caller, callee) in self.edges.keys() {
            if !names.contains(&caller.as_str()) {
                names.push(caller);
            }
            if !names.contains(&callee.as_str()) {
                names.push(callee);
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn counts_repeated_calls() {
        let ast = parse(
            "method helper(): int begin return 1 end \
             method main(): int begin helper(); helper(); return helper() end",
        )
        .unwrap();
        let graph = CallGraph::build(&ast);
        let edges: Vec<_> = graph.edges().collect();
        assert_eq!(edges, vec![("main", "helper", 3)]);
    }

    #[test]
    fn finds_calls_nested_in_expressions() {
        let ast = parse(
            "method f(n: int): int begin return n end \
             method main(): int begin var x: int; x := 1 + f(2) * f(3); return x end",
        )
        .unwrap();
        let graph = CallGraph::build(&ast);
        assert_eq!(graph.edges().next(), Some(("main", "f", 2)));
    }
}
