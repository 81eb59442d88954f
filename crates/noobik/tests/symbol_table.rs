use noobik::{GLOBAL_SCOPE, SymbolKind, SymbolTable, analyze, parse};

fn analyze_source(source: &str) -> (noobik::Ast, SymbolTable) {
    let mut ast = parse(source).unwrap();
    let table = analyze(&mut ast);
    (ast, table)
}

#[test]
fn assign_and_return_a_constant_layout() {
    // `main` returns int, local x at offset -4, frame size 4
    let (_, table) = analyze_source("method main(): int begin var x: int; x := 42; return x end");

    let main = table.lookup("main", GLOBAL_SCOPE).expect("main declared");
    assert_eq!(table.symbol(main).kind, SymbolKind::Function);
    assert_eq!(table.symbol(main).return_type.as_deref(), Some("int"));

    let scope = table.function_scope("main").expect("main scope");
    let x = table.lookup("x", scope).expect("x declared");
    assert_eq!(table.symbol(x).kind, SymbolKind::Local);
    assert_eq!(table.symbol(x).offset, -4);
    assert_eq!(table.frame_size(scope), 4);
}

#[test]
fn parameters_sit_past_saved_fp_and_return_address() {
    let (_, table) = analyze_source("method f(a: int, b: int, c: long): int begin return a end");
    let scope = table.function_scope("f").unwrap();

    let a = table.symbol(table.lookup("a", scope).unwrap());
    let b = table.symbol(table.lookup("b", scope).unwrap());
    let c = table.symbol(table.lookup("c", scope).unwrap());
    assert_eq!((a.kind, a.offset), (SymbolKind::Parameter, 8));
    assert_eq!((b.kind, b.offset), (SymbolKind::Parameter, 12));
    assert_eq!((c.kind, c.offset), (SymbolKind::Parameter, 16));

    let f = table.symbol(table.lookup("f", GLOBAL_SCOPE).unwrap());
    assert_eq!(f.param_count, 3);
    assert_eq!(f.param_types, vec!["int", "int", "long"]);
}

#[test]
fn every_symbol_resolves_from_its_own_scope() {
    let (_, table) = analyze_source(
        "var g: int \
         method f(a: int): int begin var x: int; x := a + g; return x end",
    );
    for scope in table.scopes() {
        for symbol in table.symbols_in_scope(scope.id) {
            let resolved = table.lookup(&symbol.name, scope.id).expect("resolves");
            assert_eq!(table.symbol(resolved).name, symbol.name);
            assert_eq!(table.symbol(resolved).scope, scope.id);
        }
    }
}

#[test]
fn global_array_gets_dram_address_and_size() {
    let (_, table) = analyze_source("var a: array[8] of int \n var b: int \n method main(): int begin end");
    let a = table.symbol(table.lookup("a", GLOBAL_SCOPE).unwrap());
    assert_eq!(a.kind, SymbolKind::Global);
    assert!(a.is_array);
    assert_eq!(a.array_size, 8);
    assert_eq!(a.size, 32);
    assert_eq!(a.address, 0);
    assert_eq!(a.offset, 0);

    // addresses are monotonically increasing, address == offset
    let b = table.symbol(table.lookup("b", GLOBAL_SCOPE).unwrap());
    assert_eq!(b.address, 32);
    assert_eq!(b.offset, 32);
}

#[test]
fn size_model_matches_the_word_oriented_backend() {
    let (_, table) = analyze_source(
        "method f(): int begin \
           var a: int; var b: long; var c: ulong; var d: din; var e: byte \
         end",
    );
    let scope = table.function_scope("f").unwrap();
    let size = |name: &str| table.symbol(table.lookup(name, scope).unwrap()).size;
    assert_eq!(size("a"), 4);
    assert_eq!(size("b"), 8);
    assert_eq!(size("c"), 8);
    assert_eq!(size("d"), 8);
    assert_eq!(size("e"), 4);
    assert_eq!(table.frame_size(scope), 32);
}

#[test]
fn redeclaration_is_an_error_not_an_overwrite() {
    let (ast, table) = analyze_source("method f(): int begin var x: int; var x: int; x := 1 end");
    assert_eq!(table.errors.len(), 1);
    assert!(table.errors[0].message.contains("redeclaration of 'x'"));
    assert!(ast.error_count() >= 1);

    // the original symbol survives with its original offset
    let scope = table.function_scope("f").unwrap();
    let x = table.symbol(table.lookup("x", scope).unwrap());
    assert_eq!(x.offset, -4);
}

#[test]
fn branch_scopes_allow_shadowing_but_share_the_frame() {
    let (_, table) = analyze_source(
        "method f(c: int): int begin \
           var x: int; \
           if c > 0 then begin var x: int; x := 1 end; \
           return x \
         end",
    );
    // both `x`s exist, in different scopes, at distinct frame slots
    assert_eq!(table.errors.len(), 0);
    let scope = table.function_scope("f").unwrap();
    assert_eq!(table.frame_size(scope), 8);
}

#[test]
fn constants_reject_assignment() {
    let (_, table) = analyze_source("const limit: int \n method f(): int begin limit := 3; return limit end");
    // the assignment error plus the propagation mark on the expression
    assert_eq!(table.errors.len(), 2);
    assert!(table.errors[0].message.contains("Cannot assign to constant 'limit'"));
}

#[test]
fn unused_locals_warn_but_do_not_error() {
    let (_, table) = analyze_source("method f(): int begin var unused: int; return 0 end");
    assert!(table.errors.is_empty());
    assert_eq!(table.warnings.len(), 1);
    assert!(table.warnings[0].message.contains("'unused' is never used"));
}

#[test]
fn chained_parameter_lists_normalize_like_flat_ones() {
    use noobik::{Ast, AstKind};

    // Older front ends chain later ArgDefs as children of the first one
    // instead of emitting a flat list; both shapes must declare the same
    // parameters at the same offsets.
    let mut ast = Ast::new();
    let program = ast.add(AstKind::Program, None, 1);
    let func = ast.add(AstKind::FunctionDef, None, 1);
    let sig = ast.add(AstKind::FunctionSignature, Some("f".to_owned()), 1);

    let a = ast.add(AstKind::ArgDef, Some("a".to_owned()), 1);
    let a_ty = ast.add(AstKind::TypeRef, Some("int".to_owned()), 1);
    ast.add_child(a, a_ty);
    let b = ast.add(AstKind::ArgDef, Some("b".to_owned()), 1);
    let b_ty = ast.add(AstKind::TypeRef, Some("long".to_owned()), 1);
    ast.add_child(b, b_ty);
    ast.add_child(a, b); // the chain

    ast.add_child(sig, a);
    let ret = ast.add(AstKind::TypeRef, Some("int".to_owned()), 1);
    ast.add_child(sig, ret);
    let body = ast.add(AstKind::StatementBlock, None, 1);
    ast.add_child(func, sig);
    ast.add_child(func, body);
    ast.add_child(program, func);
    ast.set_root(program);

    let table = analyze(&mut ast);
    let scope = table.function_scope("f").unwrap();
    assert_eq!(table.symbol(table.lookup("a", scope).unwrap()).offset, 8);
    assert_eq!(table.symbol(table.lookup("b", scope).unwrap()).offset, 12);

    let f = table.symbol(table.lookup("f", GLOBAL_SCOPE).unwrap());
    assert_eq!(f.param_count, 2);
    assert_eq!(f.param_types, vec!["int", "long"]);
}

#[test]
fn undeclared_use_is_recorded_and_analysis_continues() {
    let (ast, table) = analyze_source(
        "method f(): int begin y := 1; z := 2; return 0 end",
    );
    // one resolution error per undeclared name plus propagation marks;
    // analysis reached the second statement
    assert!(table.errors.iter().any(|e| e.message.contains("Undeclared variable 'y'")));
    assert!(table.errors.iter().any(|e| e.message.contains("Undeclared variable 'z'")));
    assert!(ast.error_count() >= 2);
}
