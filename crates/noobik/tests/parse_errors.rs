use noobik::{ParseError, parse};

fn parse_err(source: &str) -> ParseError {
    parse(source).expect_err("source should not parse")
}

#[test]
fn missing_end_is_a_syntax_error() {
    let err = parse_err("method main(): int begin return 0");
    assert!(err.to_string().contains("syntax error"));
}

#[test]
fn stray_token_reports_its_line() {
    let err = parse_err("method f()\nbegin\n  return )\nend");
    match err {
        ParseError::Syntax { line, .. } => assert_eq!(line, 3),
        ParseError::Lex(_) => panic!("expected a syntax error"),
    }
}

#[test]
fn top_level_statement_is_rejected() {
    let err = parse_err("x := 1");
    assert!(err.to_string().contains("expected method or var"));
}

#[test]
fn missing_then_is_reported() {
    let err = parse_err("method f(a: int) begin if a > 0 return a end");
    assert!(err.to_string().contains("expected Then"));
}

#[test]
fn unterminated_comment_is_a_lex_error() {
    let err = parse_err("method f() begin { never closed end");
    assert!(matches!(err, ParseError::Lex(_)));
    assert!(err.to_string().contains("unterminated block comment"));
}

#[test]
fn repeat_requires_until() {
    let err = parse_err("method f() begin repeat f() end");
    assert!(err.to_string().contains("expected Until"));
}

#[test]
fn array_size_must_be_a_literal() {
    let err = parse_err("var a: array[n] of int");
    assert!(err.to_string().contains("expected IntLiteral"));
}

#[test]
fn semantic_errors_do_not_fail_parsing() {
    // undeclared names are the analyzer's business, not the parser's
    assert!(parse("method f(): int begin return nowhere_declared end").is_ok());
}
