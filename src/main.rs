//! Stratum CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::MetadataFormat;

#[derive(Parser)]
#[command(name = "stratum")]
#[command(about = "Type dependency and inheritance graphs of compiled modules", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// How module files are decoded
    #[arg(long, value_enum, global = true, default_value_t = MetadataFormat::Cil)]
    metadata: MetadataFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze dependencies within or between configured packages
    Analyze {
        /// Packaging configuration (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Package to analyze; repeat for several (default: all)
        #[arg(short, long = "package")]
        packages: Vec<String>,

        /// Only keep types that take part in an edge
        #[arg(long)]
        used_types_only: bool,

        /// Write the document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the inheritance neighborhood of one type
    Inherit {
        /// Directory containing the modules
        #[arg(short, long)]
        dir: PathBuf,

        /// Full name of the type to focus on
        #[arg(short = 't', long = "type")]
        type_name: String,

        /// Keep platform base library types in the graph
        #[arg(long)]
        keep_platform_types: bool,

        /// Write the document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the types defined in a module
    Types {
        /// Module file
        #[arg(short, long)]
        module: PathBuf,

        /// Case-insensitive substring of the full name
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so documents on stdout stay clean
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "stratum={log_level},stratum_analyzer={log_level},stratum_core={log_level}"
        )))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Analyze {
            config,
            packages,
            used_types_only,
            output,
        } => commands::analyze(cli.metadata, config, packages, used_types_only, output).await,
        Commands::Inherit {
            dir,
            type_name,
            keep_platform_types,
            output,
        } => commands::inherit(cli.metadata, dir, type_name, !keep_platform_types, output).await,
        Commands::Types { module, filter } => commands::types(cli.metadata, module, filter),
        Commands::Version => {
            println!("Stratum v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
