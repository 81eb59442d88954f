use noobik::{Ast, Cfg, CfgNodeKind, SymbolTable, analyze, build_cfg, parse};

fn lower(source: &str) -> (Ast, SymbolTable, Cfg) {
    let mut ast = parse(source).unwrap();
    let mut table = analyze(&mut ast);
    let cfg = build_cfg(&mut ast, &mut table);
    (ast, table, cfg)
}

/// Follows `default_next` from a node, returning the chain of node kinds.
fn default_chain(cfg: &Cfg, from: noobik::CfgNodeId, limit: usize) -> Vec<CfgNodeKind> {
    let mut kinds = Vec::new();
    let mut cursor = Some(from);
    while let Some(id) = cursor {
        if kinds.len() >= limit {
            break;
        }
        kinds.push(cfg.node(id).kind);
        cursor = cfg.node(id).default_next;
    }
    kinds
}

#[test]
fn straight_line_body_is_a_block_chain() {
    // Start -> Block(x := 42) -> Block(return x) -> End
    let (_, _, cfg) = lower("method main(): int begin var x: int; x := 42; return x end");
    let func = &cfg.functions()[0];
    let kinds = default_chain(&cfg, func.entry, 10);
    assert_eq!(
        kinds,
        vec![
            CfgNodeKind::Start,
            CfgNodeKind::Block, // var x
            CfgNodeKind::Block, // x := 42
            CfgNodeKind::Block, // return x
            CfgNodeKind::End,
        ]
    );
}

#[test]
fn condition_edges_cover_both_branches() {
    let (_, _, cfg) = lower("method f(a: int, b: int): int begin if a > 0 && b > 0 then return 1 else return 0 end");
    let cond = cfg
        .nodes()
        .find(|n| n.kind == CfgNodeKind::Condition)
        .expect("condition node");

    let then_node = cfg.node(cond.conditional_next.expect("true edge"));
    let else_node = cfg.node(cond.default_next.expect("false edge"));
    assert!(then_node.label.starts_with("return"));
    assert!(else_node.label.starts_with("return"));

    // the test expression is attached to the condition node
    assert_eq!(cond.exprs.len(), 1);
}

#[test]
fn if_without_else_falls_through_to_the_merge() {
    let (_, _, cfg) = lower("method f(a: int): int begin if a > 0 then a := 1; return a end");
    let cond = cfg
        .nodes()
        .find(|n| n.kind == CfgNodeKind::Condition)
        .expect("condition node");
    let merge = cfg.node(cond.default_next.unwrap());
    assert_eq!(merge.kind, CfgNodeKind::Merge);
    assert_eq!(merge.label, "end-if");
}

#[test]
fn while_loop_shape_with_break() {
    let (_, _, cfg) = lower(
        "method g(): int begin var i: int; i := 0; \
         while i < 10 do begin if i == 5 then break; i := i + 1 end; \
         return i end",
    );

    let while_cond = cfg
        .nodes()
        .find(|n| n.kind == CfgNodeKind::Condition && n.label.contains("< 10"))
        .expect("while condition");
    let exit_merge = cfg.node(while_cond.default_next.expect("false edge"));
    assert_eq!(exit_merge.kind, CfgNodeKind::Merge);
    assert_eq!(exit_merge.label, "exit-while");

    // the break node targets the same merge the condition's false edge does
    let break_node = cfg.nodes().find(|n| n.is_break).expect("break node");
    assert_eq!(break_node.default_next, Some(exit_merge.id));

    // the loop body's tail wires back to the condition
    let back_edge = cfg
        .nodes()
        .find(|n| n.default_next == Some(while_cond.id) && n.id != while_cond.id);
    assert!(back_edge.is_some(), "loop body should jump back to the condition");
}

#[test]
fn repeat_until_loops_back_to_its_begin_merge() {
    let (_, _, cfg) = lower(
        "method f(): int begin var i: int; i := 0; \
         repeat i := i + 1 until i >= 3; return i end",
    );

    let begin = cfg
        .nodes()
        .find(|n| n.label == "begin-repeat")
        .expect("begin-repeat merge");
    let until = cfg
        .nodes()
        .find(|n| n.kind == CfgNodeKind::Condition && n.label.contains(">="))
        .expect("until condition");

    // until-true leaves the loop, until-false goes around again
    assert_eq!(cfg.node(until.conditional_next.unwrap()).label, "exit-repeat");
    assert_eq!(until.default_next, Some(begin.id));
}

#[test]
fn statements_after_break_are_not_wired_in_sequence() {
    let (_, _, cfg) = lower(
        "method f(): int begin \
         while 1 == 1 do begin break; f() end; \
         return 0 end",
    );
    // the call after break is lowered but nothing flows into it
    let orphan = cfg
        .nodes()
        .find(|n| n.label.contains("f()"))
        .expect("trailing statement node");
    let has_predecessor = cfg
        .nodes()
        .any(|n| n.default_next == Some(orphan.id) || n.conditional_next == Some(orphan.id));
    assert!(!has_predecessor, "break terminates the sequence");
}

#[test]
fn structural_invariants_hold_for_every_node() {
    let (_, _, cfg) = lower(
        "method fact(n: int): int begin \
           if n <= 1 then return 1; \
           return n * fact(n - 1) \
         end \
         method main(): int begin var i: int; i := 0; \
           while i < 3 do begin if i == 2 then break; i := i + 1 end; \
           return fact(i) \
         end",
    );

    for node in cfg.nodes() {
        match node.kind {
            CfgNodeKind::Start => {
                assert!(node.conditional_next.is_none());
                assert!(node.exprs.is_empty());
            }
            CfgNodeKind::End => {
                assert!(node.default_next.is_none());
                assert!(node.conditional_next.is_none());
                assert!(node.exprs.is_empty());
            }
            CfgNodeKind::Condition => {
                assert!(node.default_next.is_some());
                assert!(node.conditional_next.is_some());
                assert!(!node.exprs.is_empty());
            }
            CfgNodeKind::Merge => {
                assert!(node.conditional_next.is_none());
                assert!(node.exprs.is_empty());
            }
            CfgNodeKind::Block | CfgNodeKind::Error => {}
        }
        if node.is_break {
            let target = cfg.node(node.default_next.expect("break edge"));
            assert_eq!(target.kind, CfgNodeKind::Merge);
        }
    }
}

#[test]
fn rebuilding_yields_an_isomorphic_graph() {
    let source = "method f(a: int): int begin \
                  if a > 0 then begin var i: int; i := 0; \
                  while i < a do i := i + 1; return i end else return 0 end";
    let (_, _, first) = lower(source);
    let (_, _, second) = lower(source);

    assert_eq!(first.len(), second.len());
    for (a, b) in first.nodes().zip(second.nodes()) {
        assert_eq!(a.kind, b.kind);
        assert_eq!(a.label, b.label);
        assert_eq!(a.default_next, b.default_next);
        assert_eq!(a.conditional_next, b.conditional_next);
        assert_eq!(a.is_break, b.is_break);
    }
}

#[test]
fn undeclared_identifier_produces_one_error_entry() {
    // the diagnostic appears on the AST node, the CFG node, and in the
    // table's error list; the run still completes
    let (ast, table, cfg) = lower("method f(): int begin return y end");

    let error_node = cfg
        .nodes()
        .find(|n| n.kind == CfgNodeKind::Error)
        .expect("error node");
    assert!(error_node.has_error);
    assert!(
        error_node
            .error_message
            .as_deref()
            .unwrap()
            .contains("Undeclared variable 'y'")
    );

    assert_eq!(table.errors.len(), 1);
    assert_eq!(ast.error_count(), 1);
    assert_eq!(cfg.error_count(), 1);
}

#[test]
fn empty_function_produces_start_to_end() {
    let (_, _, cfg) = lower("method main(): int begin end");
    let func = &cfg.functions()[0];
    assert_eq!(cfg.node(func.entry).default_next, Some(func.exit));
}
