use std::{fs, path::PathBuf, process::ExitCode};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::LevelFilter;

use metac::driver::Diagnostic;

#[derive(Parser, Debug)]
#[command(name = "metac", version, about = "Compiler and bytecode interpreter for the Meta language")]
struct Args {
    /// Log level: 0 = errors only, 1 = progress, 2 = everything.
    #[arg(short = 'l', value_name = "LEVEL", default_value_t = 0)]
    log_level: u8,

    /// Stop after parsing and print the syntax tree.
    #[arg(short = 'p')]
    parse_only: bool,

    /// Compile to bytecode and print its disassembly.
    #[arg(short = 'b')]
    bytecode: bool,

    /// Execute the compiled bytecode.
    #[arg(short = 'r')]
    run: bool,

    /// Trace every executed instruction.
    #[arg(short = 'd')]
    debug: bool,

    /// The Meta source file to compile.
    file: PathBuf,
}

fn main() -> ExitCode {
    match try_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn try_main() -> Result<()> {
    let args = Args::parse();
    if args.log_level > 2 {
        bail!("log level must be between 0 and 2");
    }
    init_logging(args.log_level);

    let source = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;

    let mut ast = match metac::parser::parse(&source) {
        Ok(ast) => ast,
        Err(diagnostics) => return report(&diagnostics),
    };
    if args.parse_only {
        print!("{}", ast.dump());
        return Ok(());
    }

    let analysis = match metac::resolve_comptime(&mut ast) {
        Ok(analysis) => analysis,
        Err(error) => {
            if let Some(diagnostics) = error.diagnostics() {
                return report(diagnostics);
            }
            return Err(error.into());
        }
    };

    if !args.bytecode && !args.run {
        // Nothing left to do: the pipeline through compile-time
        // resolution is the whole job without a backend selected.
        return Ok(());
    }

    let image = metac::compile_program(&analysis.types, &analysis.symbols, &ast)?;
    if args.bytecode && !args.run {
        print!("{}", metac::disassemble(&image, &source));
    }
    if args.run {
        let result = metac::run(&image, args.debug)?;
        log::debug!("execution finished with top-of-stack {result}");
    }
    Ok(())
}

fn report(diagnostics: &[Diagnostic]) -> Result<()> {
    for diagnostic in diagnostics {
        eprintln!("{diagnostic}");
    }
    bail!("{} error(s) reported", diagnostics.len())
}

fn init_logging(level: u8) {
    let filter = match level {
        0 => LevelFilter::Error,
        1 => LevelFilter::Info,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(filter)
        .parse_default_env()
        .init();
}
