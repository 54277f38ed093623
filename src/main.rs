mod analyze;
mod ast;
mod bytecode;
mod lang;
mod lexer;
mod optimize;
mod parser;
mod runtime;
mod token;

use std::io::{self, BufRead, Write};
use std::{env, fs, process};

use crate::bytecode::{Bytecode, Compiler};
use crate::lang::Value;
use crate::lexer::Lexer;
use crate::optimize::optimize;
use crate::parser::Parser;
use crate::runtime::Vm;

use tracing_subscriber::EnvFilter;

fn main() {
    let args: Vec<String> = env::args().collect();

    let tokens_only = args.contains(&"--tokens".to_string());
    let show_ast = args.contains(&"--ast".to_string());
    let show_bc = args.contains(&"--bc".to_string()) || args.contains(&"--bytecode".to_string());
    let no_opt = args.contains(&"--no-opt".to_string());
    let repl = args.contains(&"-i".to_string()) || args.contains(&"--repl".to_string());
    let verbose = args.contains(&"-v".to_string());

    init_logging(verbose);

    if args.contains(&"--help".to_string()) || args.contains(&"-h".to_string()) {
        print_usage();
        return;
    }

    let save_path = flag_value(&args, "-o");
    let load_path = flag_value(&args, "--run-bc");

    // First non-flag argument (that is not a flag's value) is the filename.
    let filename = args
        .iter()
        .enumerate()
        .skip(1)
        .find(|(i, a)| {
            !a.starts_with('-')
                && args.get(i - 1).map(String::as_str) != Some("-o")
                && args.get(i - 1).map(String::as_str) != Some("--run-bc")
        })
        .map(|(_, a)| a.clone());

    if let Some(path) = load_path {
        run_saved_unit(&path);
        return;
    }

    match filename {
        Some(filename) => match fs::read_to_string(&filename) {
            Ok(source) => {
                if tokens_only {
                    dump_tokens(&source);
                } else {
                    run_source(&source, show_ast, show_bc, no_opt, save_path.as_deref());
                }
            }
            Err(e) => {
                eprintln!("Failed to read '{}': {}", filename, e);
                process::exit(1);
            }
        },
        None => {
            if repl || args.len() == 1 {
                run_repl(no_opt);
            } else {
                print_usage();
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn print_usage() {
    println!("CINDER - expression language compiler and VM");
    println!();
    println!("Usage:");
    println!("  cinder                    Start interactive REPL");
    println!("  cinder <file.cin>         Compile, optimize and run a program");
    println!("  cinder --repl, -i         Start interactive REPL");
    println!("  cinder --tokens <file>    Show tokens only");
    println!("  cinder --ast <file>       Show the parsed AST");
    println!("  cinder --bc <file>        Show disassembly before running");
    println!("  cinder --no-opt <file>    Skip the peephole optimizer");
    println!("  cinder -o <out> <file>    Also write the compiled unit to <out>");
    println!("  cinder --run-bc <unit>    Execute a previously saved unit");
    println!("  cinder -v                 Debug-level logging");
    println!("  cinder --help, -h         Show this help");
}

fn dump_tokens(source: &str) {
    match Lexer::new(source).tokenize() {
        Ok(tokens) => {
            for spanned in tokens {
                println!(
                    "{}:{}  {:?}",
                    spanned.span.line, spanned.span.col, spanned.token
                );
            }
        }
        Err(e) => {
            eprintln!("Lexer error: {}", e);
            process::exit(1);
        }
    }
}

fn run_source(source: &str, show_ast: bool, show_bc: bool, no_opt: bool, save: Option<&str>) {
    let tokens = match Lexer::new(source).tokenize() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Lexer error: {}", e);
            process::exit(1);
        }
    };

    let ast = match Parser::new(tokens).parse() {
        Ok(ast) => ast,
        Err(e) => {
            eprintln!("Parse error: {}", e);
            process::exit(1);
        }
    };

    if show_ast {
        println!("{:#?}", ast);
        return;
    }

    let bc = match Compiler::new().compile(&ast) {
        Ok(bc) => bc,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let bc = if no_opt {
        bc
    } else {
        match optimize(&bc) {
            Ok(bc) => bc,
            Err(e) => {
                eprintln!("{}", e);
                process::exit(1);
            }
        }
    };

    if show_bc {
        println!("{}", bc);
    }

    if let Some(path) = save {
        save_unit(&bc, path);
    }

    let mut vm = Vm::new();
    if let Err(e) = vm.execute(&bc) {
        eprintln!("{}", e);
        process::exit(1);
    }

    if let Some(value) = vm.last_popped() {
        if *value != Value::Void {
            println!("{}", value);
        }
    }
}

fn save_unit(bc: &Bytecode, path: &str) {
    match postcard::to_allocvec(bc) {
        Ok(bytes) => {
            if let Err(e) = fs::write(path, bytes) {
                eprintln!("Failed to write '{}': {}", path, e);
                process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Failed to encode unit: {}", e);
            process::exit(1);
        }
    }
}

fn run_saved_unit(path: &str) {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Failed to read '{}': {}", path, e);
            process::exit(1);
        }
    };

    let bc: Bytecode = match postcard::from_bytes(&bytes) {
        Ok(bc) => bc,
        Err(e) => {
            eprintln!("'{}' is not a compiled unit: {}", path, e);
            process::exit(1);
        }
    };

    let mut vm = Vm::new();
    if let Err(e) = vm.execute(&bc) {
        eprintln!("{}", e);
        process::exit(1);
    }
    if let Some(value) = vm.last_popped() {
        if *value != Value::Void {
            println!("{}", value);
        }
    }
}

/// Line-oriented loop. One compiler and one VM live across lines so
/// variable slots keep their bindings; errors print and the loop goes on.
fn run_repl(no_opt: bool) {
    println!("cinder repl - ctrl-d to exit");

    let mut compiler = Compiler::new();
    let mut vm = Vm::new();

    let stdin = io::stdin();
    loop {
        print!(">> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("read error: {}", e);
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        let tokens = match Lexer::new(&line).tokenize() {
            Ok(t) => t,
            Err(e) => {
                eprintln!("Lexer error: {}", e);
                continue;
            }
        };
        let ast = match Parser::new(tokens).parse() {
            Ok(ast) => ast,
            Err(e) => {
                eprintln!("Parse error: {}", e);
                continue;
            }
        };
        let bc = match compiler.compile(&ast) {
            Ok(bc) => bc,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };
        let bc = if no_opt {
            bc
        } else {
            match optimize(&bc) {
                Ok(bc) => bc,
                Err(e) => {
                    eprintln!("{}", e);
                    continue;
                }
            }
        };

        if let Err(e) = vm.execute(&bc) {
            eprintln!("{}", e);
            continue;
        }
        if let Some(value) = vm.last_popped() {
            println!("{}", value);
        }
    }
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;
    use crate::bytecode::casts::cast;
    use crate::bytecode::Opcode;
    use crate::lang::Kind;

    /// Full pipeline: lex, parse, compile, optionally optimize, execute.
    fn run(source: &str, optimized: bool) -> Value {
        let tokens = Lexer::new(source).tokenize().expect("lexing should succeed");
        let ast = Parser::new(tokens).parse().expect("parsing should succeed");
        let bc = Compiler::new()
            .compile(&ast)
            .expect("compilation should succeed");
        let bc = if optimized {
            optimize(&bc).expect("optimization should succeed")
        } else {
            bc
        };

        let mut vm = Vm::new();
        vm.execute(&bc).expect("execution should succeed");
        vm.last_popped().cloned().expect("a value should be popped")
    }

    fn eval(source: &str) -> Value {
        run(source, false)
    }

    #[test]
    fn int_addition_yields_int() {
        assert_eq!(eval("1 + 2;"), Value::Int32(3));
    }

    #[test]
    fn mixed_addition_yields_float() {
        assert_eq!(eval("1 + 2.0;"), Value::Float64(3.0));
    }

    #[test]
    fn string_coercion_concatenates() {
        assert_eq!(eval("1 + '2';"), Value::Str("12".to_string()));
    }

    #[test]
    fn negated_bool_is_minus_one() {
        assert_eq!(eval("-true;"), Value::Int32(-1));
    }

    #[test]
    fn division_of_ints_is_float() {
        assert_eq!(eval("1 / 2;"), Value::Float64(0.5));
        assert_eq!(eval("7 % 4;"), Value::Float64(3.0));
    }

    #[test]
    fn variables_flow_through() {
        assert_eq!(eval("var x = 2; var y = x * 3; y + 1;"), Value::Int32(7));
        assert_eq!(eval("var s = 'a'; s + s;"), Value::Str("aa".to_string()));
    }

    #[test]
    fn assignment_yields_the_stored_value() {
        assert_eq!(eval("var x = 0; x = 5;"), Value::Int32(5));
    }

    #[test]
    fn optimized_programs_compute_the_same_values() {
        for source in [
            "1 + 2;",
            "1 + 2.0;",
            "1 + '2';",
            "-true;",
            "var x = 2; x + 3;",
            "'ab' + 'ab';",
        ] {
            assert_eq!(run(source, false), run(source, true), "for {source}");
        }
    }

    #[test]
    fn stack_stays_balanced_across_statements() {
        let tokens = Lexer::new("1; 2.0; 'x'; 1 + 2;").tokenize().unwrap();
        let ast = Parser::new(tokens).parse().unwrap();
        let bc = Compiler::new().compile(&ast).unwrap();

        let mut vm = Vm::new();
        let before = vm.stack_depth();
        vm.execute(&bc).unwrap();
        assert_eq!(vm.stack_depth(), before);
    }

    #[test]
    fn repl_session_keeps_bindings() {
        let mut compiler = Compiler::new();
        let mut vm = Vm::new();

        for (line, expected) in [
            ("var x = 40;", None),
            ("x + 2;", Some(Value::Int32(42))),
            ("x = x + 1;", Some(Value::Int32(41))),
            ("x * 2;", Some(Value::Int32(82))),
        ] {
            let tokens = Lexer::new(line).tokenize().unwrap();
            let ast = Parser::new(tokens).parse().unwrap();
            let bc = compiler.compile(&ast).unwrap();
            let bc = optimize(&bc).unwrap();
            vm.execute(&bc).unwrap();
            if let Some(expected) = expected {
                assert_eq!(vm.last_popped(), Some(&expected), "for line {line}");
            }
        }
    }

    #[test]
    fn saved_units_execute_identically() {
        let tokens = Lexer::new("1 + '2';").tokenize().unwrap();
        let ast = Parser::new(tokens).parse().unwrap();
        let bc = optimize(&Compiler::new().compile(&ast).unwrap()).unwrap();

        let bytes = postcard::to_allocvec(&bc).unwrap();
        let loaded: Bytecode = postcard::from_bytes(&bytes).unwrap();

        let mut vm = Vm::new();
        vm.execute(&loaded).unwrap();
        assert_eq!(vm.last_popped(), Some(&Value::Str("12".to_string())));
    }

    // Cast round-trip property: for every pair reachable in the cast
    // graph, K1 → K2 → K1 preserves the value, except that float64
    // fractions truncate through int32.

    fn literal_load(kind: Kind, bc: &mut Bytecode) {
        match kind {
            Kind::Bool => {
                bc.emit(Opcode::BoolLoad, &[1]);
            }
            Kind::Int32 => {
                bc.emit(Opcode::I32Load, &[9]);
            }
            Kind::Float64 => {
                bc.emit(Opcode::F64Load, &[(9.0f64).to_bits()]);
            }
            Kind::Str => {
                let off = bc.store(b"9\0") as u64;
                bc.emit(Opcode::StrLoad, &[off, 1]);
            }
            _ => unreachable!("no literal load for {kind}"),
        }
    }

    #[test]
    fn cast_round_trips_preserve_integral_values() {
        for from in [Kind::Int32, Kind::Float64, Kind::Str] {
            for to in [Kind::Int32, Kind::Float64, Kind::Str] {
                let (Ok(out), Ok(back)) = (cast(from, to), cast(to, from)) else {
                    continue;
                };
                let mut bc = Bytecode::new();
                literal_load(from, &mut bc);
                for op in out.iter().chain(&back) {
                    bc.emit(*op, &[]);
                }

                let mut vm = Vm::new();
                vm.execute(&bc).unwrap();
                let got = vm.pop_result().unwrap();

                let mut expected = Bytecode::new();
                literal_load(from, &mut expected);
                let mut vm2 = Vm::new();
                vm2.execute(&expected).unwrap();
                assert_eq!(got, vm2.pop_result().unwrap(), "{from} -> {to} -> {from}");
            }
        }
    }

    #[test]
    fn float_round_trip_through_int32_truncates() {
        let mut bc = Bytecode::new();
        bc.emit(Opcode::F64Load, &[(2.75f64).to_bits()]);
        bc.emit(Opcode::F2I, &[]);
        bc.emit(Opcode::I2F, &[]);

        let mut vm = Vm::new();
        vm.execute(&bc).unwrap();
        assert_eq!(vm.pop_result(), Some(Value::Float64(2.0)));
    }

    #[test]
    fn bool_round_trip_through_the_two_hop_path() {
        // bool → float64 has no direct edge; the found path goes through
        // int32 and true survives as 1.
        let mut bc = Bytecode::new();
        bc.emit(Opcode::BoolLoad, &[1]);
        for op in cast(Kind::Bool, Kind::Float64).unwrap() {
            bc.emit(op, &[]);
        }
        let mut vm = Vm::new();
        vm.execute(&bc).unwrap();
        assert_eq!(vm.pop_result(), Some(Value::Float64(1.0)));
    }
}
