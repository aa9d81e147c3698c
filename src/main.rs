//! Punto de entrada ("driver").
//!
//! Este módulo lee el documento de bloques, invoca al compilador y
//! escribe el programa resultante. Expone una CLI.

use anyhow::{self, bail, Context};
use blockc::Graph;
use clap::{self, crate_version, Arg, Command};
use tracing::info;
use tracing_subscriber::EnvFilter;

use std::{
    fs::{self, File},
    io::{self, Read, Write},
    process,
};

fn main() -> anyhow::Result<()> {
    // Parsing de CLI
    let args = Command::new("Blocks to Flipper Zero compiler")
        .version(crate_version!())
        .arg(
            Arg::new("input")
                .value_name("INPUT")
                .help("Block document ('-' or absent for stdin)"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .takes_value(true)
                .value_name("FILE")
                .help("Output file ('-' or absent for stdout)"),
        )
        .arg(
            Arg::new("manifest")
                .long("manifest")
                .takes_value(true)
                .value_name("FILE")
                .help("Also write the application.fam manifests to FILE"),
        )
        .arg(
            Arg::new("strict")
                .long("strict")
                .help("Exit with failure if any block was degraded"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log compiler internals to stderr"),
        )
        .get_matches();

    init_logging(args.is_present("verbose"));

    let source = match args.value_of("input") {
        None | Some("-") => {
            let mut source = String::new();
            io::stdin()
                .read_to_string(&mut source)
                .context("Failed to read from stdin")?;

            source
        }

        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to open for reading: {}", path))?,
    };

    let graph = Graph::from_json(&source).context("Failed to load block document")?;
    let artifact = blockc::compile(&graph);

    match args.value_of("output") {
        None | Some("-") => io::stdout()
            .write_all(artifact.text().as_bytes())
            .context("Failed to emit to stdout")?,

        Some(path) => {
            let mut file = File::create(path)
                .with_context(|| format!("Failed to open for writing: {}", path))?;

            file.write_all(artifact.text().as_bytes())
                .with_context(|| format!("Failed to emit to file: {}", path))?;
        }
    }

    if let Some(path) = args.value_of("manifest") {
        let manifests = artifact.manifests();
        if manifests.is_empty() {
            bail!("The program declares no application manifest");
        }

        let mut text = manifests.join("\n\n");
        text.push('\n');

        fs::write(path, text).with_context(|| format!("Failed to write manifest: {}", path))?;
    }

    let diagnostics = artifact.diagnostics();
    info!(degradations = diagnostics.len(), "compilation finished");

    if args.is_present("strict") && !diagnostics.is_empty() {
        io::stdout().flush().context("Failed to flush stdout")?;
        eprint!("{}", diagnostics);
        process::exit(1);
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "blockc=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .without_time()
        .init();
}
