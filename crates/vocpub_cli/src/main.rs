//! Vocpub CLI - publishes vocbench exports to GitHub as pull requests.

mod commands;
mod config;
mod progress;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::Term;
use tracing_subscriber::EnvFilter;

use crate::commands::output::OutputFormat;

#[derive(Parser)]
#[command(name = "vocpub")]
#[command(version)]
#[command(about = "Publish vocbench vocabulary exports to GitHub as pull requests")]
#[command(
    long_about = "Vocpub authenticates as a GitHub App installation, commits each vocabulary's \
export to a per-vocabulary publish branch of its lexicon repository and opens (or updates) a \
pull request for review. Republishing an unchanged export writes nothing."
)]
#[command(after_long_help = r#"EXAMPLES
    Publish one vocabulary from a single RDF/XML export:
        $ vocpub publish skos --source exports/skos.rdf

    Publish several vocabularies from a drop directory (skos/ or skos.rdf, geo/ or geo.rdf):
        $ vocpub publish skos geo --source exports/

    Show where vocabularies would be published:
        $ vocpub targets skos geo

    Accept exports pushed by vocbench over HTTP:
        $ vocpub serve --bind 0.0.0.0:8080

CONFIGURATION
    Vocpub reads configuration from:
      1. ~/.config/vocpub/config.toml (or $XDG_CONFIG_HOME/vocpub/config.toml)
      2. ./vocpub.toml
      3. Environment variables (VOCPUB_* prefix, e.g., VOCPUB_TARGETS__OWNER)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    VOCPUB_GITHUB__APP_ID            GitHub App id (legacy: GH_APP_ID)
    VOCPUB_GITHUB__PRIVATE_KEY       GitHub App private key (legacy: GH_APP_PRIVATE_KEY)
    VOCPUB_GITHUB__INSTALLATION_ID   Installation id (discovered from the owner if unset)
    VOCPUB_TARGETS__OWNER            Organization owning the lexicon repositories
    VOCPUB_SERVER__INCOMING_SECRET   Bearer secret for /upload (legacy: INCOMING_SECRET)
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish vocabulary exports from a file drop
    Publish {
        /// Vocabulary id(s) - can specify multiple
        #[arg(required = true)]
        vocabularies: Vec<String>,

        /// Export file or directory (a directory of per-vocabulary exports when publishing several)
        #[arg(short, long)]
        source: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,

        /// Maximum vocabularies published at once (default from config or 4)
        #[arg(short = 'c', long)]
        concurrency: Option<usize>,

        /// Cancel the run after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
    /// Show how vocabularies resolve to repositories
    Targets {
        /// Vocabulary id(s) - can specify multiple
        #[arg(required = true)]
        vocabularies: Vec<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Run the HTTP intake endpoint
    Serve {
        /// Listen address (default from config or 0.0.0.0:8080)
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
    /// Generate man page(s)
    Man {
        /// Output directory for man pages (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(interactive: bool) {
    // Spinners own the terminal during an interactive publish
    let default_filter = if interactive {
        "vocpub=warn,vocpub_cli=warn"
    } else {
        "vocpub=info,vocpub_cli=info"
    };
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(default_filter),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(Term::stderr().is_term())
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Completions { shell } => return commands::meta::handle_completions(*shell),
        Commands::Man { output } => return commands::meta::handle_man(output.clone()),
        _ => {}
    }

    let interactive =
        matches!(cli.command, Commands::Publish { .. }) && Term::stderr().is_term();
    init_tracing(interactive);

    // Load configuration (config file -> env vars -> defaults)
    let config = config::Config::load();

    match cli.command {
        Commands::Publish {
            vocabularies,
            source,
            output,
            concurrency,
            deadline_secs,
        } => {
            let args = commands::publish::PublishArgs {
                vocabularies,
                source,
                output,
                concurrency,
                deadline_secs,
            };
            commands::publish::handle_publish(args, config).await?;
        }
        Commands::Targets {
            vocabularies,
            output,
        } => {
            commands::targets::handle_targets(vocabularies, output, &config).await?;
        }
        Commands::Serve { bind } => {
            commands::serve::handle_serve(bind, &config).await?;
        }
        Commands::Completions { .. } | Commands::Man { .. } => {}
    }

    Ok(())
}
