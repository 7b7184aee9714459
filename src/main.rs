//! Command-line interface for ramrod

#[cfg(feature = "cli")]
use clap::Parser;

#[cfg(feature = "cli")]
use std::fs;
#[cfg(feature = "cli")]
use std::io::Write;
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
use ramrod::error::{Error, UnknownVersionError};
#[cfg(feature = "cli")]
use ramrod::loaders::Source;
#[cfg(feature = "cli")]
use ramrod::{Registry, UpdateOptions, UpdateRequest, Version};

#[cfg(feature = "cli")]
#[derive(Parser, Debug)]
#[command(name = "ramrod")]
#[command(author, version, about = "Upgrade STIX and CybOX documents to a newer version", long_about = None)]
struct Cli {
    /// Document to update
    #[arg(short, long, value_name = "FILE")]
    infile: PathBuf,

    /// Output file (defaults to stdout)
    #[arg(short, long, value_name = "FILE")]
    outfile: Option<PathBuf>,

    /// Source version, overriding the one the document declares
    #[arg(long, value_name = "VERSION")]
    from: Option<String>,

    /// Target version (defaults to the latest)
    #[arg(long, value_name = "VERSION")]
    to: Option<String>,

    /// Leave controlled vocabularies untouched
    #[arg(long)]
    disable_vocab_update: bool,

    /// Keep vacant optional elements and empty optional attributes
    #[arg(long)]
    disable_remove_optionals: bool,

    /// Remove untranslatable content and renumber colliding ids
    #[arg(short, long)]
    force: bool,

    /// JSON rule bundle replacing built-in steps
    #[arg(short, long, value_name = "FILE")]
    rules: Option<PathBuf>,

    /// Write the output without indentation
    #[arg(long)]
    compact: bool,
}

#[cfg(feature = "cli")]
fn main() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{}", diagnostic(&e));
        std::process::exit(1);
    }
}

#[cfg(feature = "cli")]
fn run(cli: Cli) -> Result<(), Error> {
    let mut registry = Registry::builtin();
    if let Some(rules) = &cli.rules {
        registry.load_bundle_file(rules)?;
    }

    let options = UpdateOptions::default()
        .with_update_vocabularies(!cli.disable_vocab_update)
        .with_remove_optionals(!cli.disable_remove_optionals);
    let mut request = UpdateRequest::new().with_options(options).with_force(cli.force);

    if let Some(from) = &cli.from {
        let version = Version::parse(from).ok_or_else(|| UnknownVersionError::input(Some(from.clone())))?;
        request = request.with_from(version);
    }
    if let Some(to) = &cli.to {
        request = request.with_to(to.parse()?);
    }

    let results = registry.update(Source::path(&cli.infile), &request)?;
    let output = results.to_bytes(!cli.compact)?;

    if !results.removed.is_empty() {
        eprintln!("Removed {} untranslatable item(s):", results.removed.len());
        for removed in &results.removed {
            eprintln!("  {}", removed.node_info(removed.root()));
        }
    }
    for id in results.remapped.keys() {
        eprintln!("Remapped non-unique id '{}' to: {}", id, results.new_ids(id).join(", "));
    }

    match &cli.outfile {
        Some(path) => fs::write(path, output)?,
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            lock.write_all(&output)?;
            lock.flush()?;
        }
    }
    Ok(())
}

#[cfg(feature = "cli")]
fn diagnostic(err: &Error) -> String {
    match err {
        Error::Untranslatable(_) => format!("Error: {}\n\nRun with --force to remove untranslatable content and renumber ids.", err),
        Error::InvalidVersion(_) | Error::UnknownVersion(_) => {
            format!("Error: {}\n\nUse --from to state the source version.", err)
        }
        _ => format!("Error: {}", err),
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Rebuild with --features cli");
    std::process::exit(1);
}
