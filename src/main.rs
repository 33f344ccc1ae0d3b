extern crate clap;
use clap::{Parser, Subcommand};
use log::{debug, error};
use thiserror::Error;
use vpe_object::{VpeObject, VpeObjectError};

mod dump;
mod logger;
mod table;

use table::Table;

#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Print JSON instead of a table
    #[clap(long, global = true)]
    json: bool,

    /// More logging; repeat for more detail
    #[clap(short, long, global = true, parse(from_occurrences))]
    verbose: u64,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// File, optional header and data directories
    Headers {
        #[clap(value_name = "FILENAME")]
        filename: String,
    },
    Sections {
        #[clap(value_name = "FILENAME")]
        filename: String,
    },
    Symbols {
        #[clap(value_name = "FILENAME")]
        filename: String,
        /// Demangle Rust symbol names
        #[clap(long)]
        demangle: bool,
    },
    Relocations {
        #[clap(value_name = "FILENAME")]
        filename: String,
    },
    Imports {
        #[clap(value_name = "FILENAME")]
        filename: String,
    },
    DelayImports {
        #[clap(value_name = "FILENAME")]
        filename: String,
    },
    Exports {
        #[clap(value_name = "FILENAME")]
        filename: String,
    },
    BaseRelocs {
        #[clap(value_name = "FILENAME")]
        filename: String,
    },
    Debug {
        #[clap(value_name = "FILENAME")]
        filename: String,
    },
    Tls {
        #[clap(value_name = "FILENAME")]
        filename: String,
    },
    LoadConfig {
        #[clap(value_name = "FILENAME")]
        filename: String,
    },
}

impl Commands {
    fn filename(&self) -> &str {
        match self {
            Commands::Headers { filename }
            | Commands::Sections { filename }
            | Commands::Symbols { filename, .. }
            | Commands::Relocations { filename }
            | Commands::Imports { filename }
            | Commands::DelayImports { filename }
            | Commands::Exports { filename }
            | Commands::BaseRelocs { filename }
            | Commands::Debug { filename }
            | Commands::Tls { filename }
            | Commands::LoadConfig { filename } => filename,
        }
    }

    fn report_name(&self) -> &'static str {
        match self {
            Commands::Headers { .. } => "headers",
            Commands::Sections { .. } => "sections",
            Commands::Symbols { .. } => "symbols",
            Commands::Relocations { .. } => "relocations",
            Commands::Imports { .. } => "imports",
            Commands::DelayImports { .. } => "delay-imports",
            Commands::Exports { .. } => "exports",
            Commands::BaseRelocs { .. } => "base-relocs",
            Commands::Debug { .. } => "debug",
            Commands::Tls { .. } => "tls",
            Commands::LoadConfig { .. } => "load-config",
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Parse {
        path: String,
        source: VpeObjectError,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn report(command: &Commands, obj: &VpeObject) -> Result<Table, VpeObjectError> {
    match command {
        Commands::Headers { .. } => Ok(dump::headers(obj)),
        Commands::Sections { .. } => dump::sections(obj),
        Commands::Symbols { demangle, .. } => dump::symbols(obj, *demangle),
        Commands::Relocations { .. } => dump::relocations(obj),
        Commands::Imports { .. } => dump::imports(obj),
        Commands::DelayImports { .. } => dump::delay_imports(obj),
        Commands::Exports { .. } => dump::exports(obj),
        Commands::BaseRelocs { .. } => dump::base_relocs(obj),
        Commands::Debug { .. } => dump::debug(obj),
        Commands::Tls { .. } => dump::tls(obj),
        Commands::LoadConfig { .. } => dump::load_config(obj),
    }
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let path = cli.command.filename();
    let data = std::fs::read(path).map_err(|source| CliError::Io {
        path: path.to_string(),
        source,
    })?;
    debug!("read {} bytes from {}", data.len(), path);

    let parse_err = |source| CliError::Parse {
        path: path.to_string(),
        source,
    };
    let obj = VpeObject::from_bytes(&data).map_err(parse_err)?;
    let table = report(&cli.command, &obj).map_err(parse_err)?;

    if cli.json {
        println!("{}", table.to_json(path, cli.command.report_name())?);
    } else {
        table.print();
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    if let Err(e) = run(&cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}
