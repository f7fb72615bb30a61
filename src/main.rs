//! Punto de entrada ("driver").
//!
//! Este módulo orquesta las diferentes fases del proceso de
//! compilación y expone una CLI.

use anyhow::{self, Context};
use bitflags::bitflags;
use c0c::{codegen, error::Diagnostics, lex::Lexer, parse, source};
use clap::{Arg, Command};
use log::{debug, info, LevelFilter};

use std::{
    fs::{self, File},
    io::{self, Write},
    path::Path,
    process,
};

bitflags! {
    /// Fases seleccionadas desde la línea de comandos.
    struct Stages: u8 {
        const SCAN = 1 << 0;
        const PARSE = 1 << 1;
        const CHECK = 1 << 2;
        const IR = 1 << 3;
        const CODEGEN = 1 << 4;
    }
}

impl Stages {
    /// Extensión de salida de la fase más avanzada que produce texto.
    fn extension(self) -> Option<&'static str> {
        [
            (Stages::CODEGEN, "s"),
            (Stages::IR, "ir"),
            (Stages::PARSE, "ast"),
            (Stages::SCAN, "tokens"),
        ]
        .into_iter()
        .find(|(stage, _)| self.contains(*stage))
        .map(|(_, extension)| extension)
    }

    /// Determina si alguna fase posterior a `stage` fue seleccionada.
    fn beyond(self, stage: Stages) -> bool {
        self.bits() > stage.bits() | (stage.bits() - 1)
    }
}

fn main() -> anyhow::Result<()> {
    // Parsing de CLI
    let args = Command::new("C0 compiler")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("input")
                .value_name("INPUT")
                .required(true)
                .help("C0 source file"),
        )
        .arg(Arg::new("scan").long("scan").help("Dump the token stream"))
        .arg(Arg::new("parse").long("parse").help("Dump the syntax tree"))
        .arg(
            Arg::new("check")
                .long("check")
                .help("Stop after semantic analysis"),
        )
        .arg(Arg::new("ir").long("ir").help("Dump the intermediate representation"))
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .takes_value(true)
                .value_name("FILE")
                .help("Output file ('-' for stdout)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log compiler phases"),
        )
        .get_matches();

    let level = if args.is_present("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let mut stages = Stages::empty();
    for (flag, stage) in [
        ("scan", Stages::SCAN),
        ("parse", Stages::PARSE),
        ("check", Stages::CHECK),
        ("ir", Stages::IR),
    ] {
        if args.is_present(flag) {
            stages |= stage;
        }
    }

    if stages.is_empty() {
        stages = Stages::CODEGEN;
    }

    // Se extraen argumentos necesarios
    let input = args
        .value_of("input")
        .context("No input file was given")?;

    let text = fs::read_to_string(input)
        .with_context(|| format!("Failed to read source file: {}", input))?;

    let mut listing = Vec::new();
    if let Err(diagnostics) = compile(input, &text, stages, &mut listing)? {
        eprint!("{}", diagnostics);
        process::exit(1);
    }

    let extension = match stages.extension() {
        Some(extension) => extension,
        None => return Ok(()),
    };

    let output = match args.value_of("output") {
        Some(output) => output.to_owned(),
        None => Path::new(input)
            .with_extension(extension)
            .to_string_lossy()
            .into_owned(),
    };

    match output.as_str() {
        "-" => io::stdout()
            .write_all(&listing)
            .context("Failed to write to stdout")?,

        path => {
            let mut file = File::create(path)
                .with_context(|| format!("Failed to open for writing: {}", path))?;

            file.write_all(&listing)
                .with_context(|| format!("Failed to write output file: {}", path))?;

            info!("Wrote {} bytes to {}", listing.len(), path);
        }
    }

    Ok(())
}

/// Ejecuta las fases seleccionadas, escribiendo la salida de cada una.
///
/// Los errores de E/S y los errores del programa fuente se separan: los
/// primeros abortan, los segundos se reportan como [`Diagnostics`].
fn compile<W: Write>(
    name: &str,
    text: &str,
    stages: Stages,
    output: &mut W,
) -> anyhow::Result<Result<(), Diagnostics>> {
    let (start, stream) = source::consume(name, text);

    let tokens = match Lexer::new(start.clone(), stream).tokenize() {
        Ok(tokens) => tokens,
        Err(error) => return Ok(Err(Diagnostics::from(error).kind("Lexical error"))),
    };

    debug!("Scanned {} tokens from {}", tokens.len(), name);

    if stages.contains(Stages::SCAN) {
        for token in &tokens {
            writeln!(output, "{}\t{}", token.location(), token.as_ref())?;
        }
    }

    if !stages.beyond(Stages::SCAN) {
        return Ok(Ok(()));
    }

    let ast = match parse::parse(&tokens, start) {
        Ok(ast) => ast,
        Err(error) => return Ok(Err(Diagnostics::from(error).kind("Syntax error"))),
    };

    debug!("Parsed {} declarations", ast.declarations().len());

    if stages.contains(Stages::PARSE) {
        writeln!(output, "{:#?}", ast)?;
    }

    if !stages.beyond(Stages::PARSE) {
        return Ok(Ok(()));
    }

    let checked = match ast.analyze() {
        Ok(checked) => checked,
        Err(error) => return Ok(Err(Diagnostics::from(error).kind("Semantic error"))),
    };

    if !stages.beyond(Stages::CHECK) {
        return Ok(Ok(()));
    }

    let program = checked.lower();
    if stages.contains(Stages::IR) {
        write!(output, "{}", program)?;
    }

    if stages.contains(Stages::CODEGEN) {
        codegen::emit(&program, output).context("Failed to emit assembly")?;
    }

    Ok(Ok(()))
}
