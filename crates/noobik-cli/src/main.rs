use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use noobik::{CallGraph, CodegenOptions, Report, analyze, ast_to_dot, build_cfg, callgraph_to_dot, cfg_to_dot, generate_assembly, parse};

struct Args {
    input: PathBuf,
    /// Directory for the DOT outputs (`-o`).
    dot_dir: Option<PathBuf>,
    /// Assembly output file (`-asm`).
    asm_path: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let mut input = None;
    let mut dot_dir = None;
    let mut asm_path = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-o" => {
                let dir = args.next().ok_or("-o requires a directory argument")?;
                dot_dir = Some(PathBuf::from(dir));
            }
            "-asm" => {
                let path = args.next().ok_or("-asm requires a file argument")?;
                asm_path = Some(PathBuf::from(path));
            }
            _ if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            _ => {
                if input.is_some() {
                    return Err("more than one input file given".to_owned());
                }
                input = Some(PathBuf::from(arg));
            }
        }
    }

    Ok(Args {
        input: input.ok_or("usage: noobik <source> [-o <dot-dir>] [-asm <file>]")?,
        dot_dir,
        asm_path,
    })
}

fn write_output(path: &Path, contents: &str) -> Result<(), String> {
    fs::write(path, contents).map_err(|err| format!("failed to write {}: {err}", path.display()))
}

fn run(args: &Args) -> Result<Report, String> {
    let source = fs::read_to_string(&args.input)
        .map_err(|err| format!("failed to read {}: {err}", args.input.display()))?;

    let mut ast = parse(&source).map_err(|err| err.to_string())?;
    let mut table = analyze(&mut ast);
    let callgraph = CallGraph::build(&ast);
    let cfg = build_cfg(&mut ast, &mut table);

    if let Some(dir) = &args.dot_dir {
        fs::create_dir_all(dir).map_err(|err| format!("failed to create {}: {err}", dir.display()))?;
        write_output(&dir.join("ast_output.dot"), &ast_to_dot(&ast))?;
        write_output(&dir.join("cfg_output.dot"), &cfg_to_dot(&cfg, &ast))?;
        write_output(&dir.join("calltree_output.dot"), &callgraph_to_dot(&callgraph))?;
    }

    if let Some(path) = &args.asm_path {
        let asm = generate_assembly(&cfg, &ast, &table, &CodegenOptions::default());
        write_output(path, &asm)?;
    }

    for diagnostic in table.errors.iter().chain(table.warnings.iter()) {
        eprintln!("{diagnostic}");
    }

    Ok(Report::collect(&ast, &table, &cfg))
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    match run(&args) {
        Ok(report) => {
            // Semantic errors are reported but do not fail the run; only
            // parse and I/O failures do.
            eprint!("{report}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
