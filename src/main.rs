//! # Corpus Analysis CLI (`qca`)
//!
//! ## Usage
//!
//! ```bash
//! qca --config ./config/qca.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `qca analyze` | Run one analysis over a corpus and export its tables |
//! | `qca export` | Re-export a saved result as CSV / TSV |
//! | `qca synthesize` | Cross-document synthesis for one mapping question |
//! | `qca import-ris` | Turn a RIS export into document files |
//! | `qca schema` | Print the response schema for a mode selection |
//! | `qca serve` | Start the local HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! # Preview the instruction and schema without calling the service
//! qca analyze --mode all --dir ./papers \
//!     --phenomenological-question "How is caregiving lived?" \
//!     --thematic-question "What themes describe burnout?" \
//!     --questions-file ./questions.txt --dry-run
//!
//! # Systematic mapping of two PDFs, CSV only
//! qca analyze --mode systematic --question "What is the study's objective?" \
//!     --doc A.pdf --doc B.pdf --format csv --save-json out/result.json
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use corpus_analysis::commands::{self, AnalyzeOptions};
use corpus_analysis::config;
use corpus_analysis::progress::ProgressMode;
use corpus_analysis::server;

/// Qualitative corpus analysis through a hosted completion service.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file at the default path means built-in defaults.
#[derive(Parser)]
#[command(
    name = "qca",
    about = "Schema-constrained qualitative analysis of document corpora",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/qca.toml")]
    config: PathBuf,

    /// Log diagnostics at debug level (overrides RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a corpus in one completion call and export every table.
    ///
    /// Validation and the corpus-size check run before anything leaves the
    /// process. With `--dry-run` the composed instruction and schema are
    /// printed and no credential is needed.
    Analyze {
        /// Analysis mode: phenomenological, thematic, systematic, or all. Repeatable.
        #[arg(long = "mode", required = true)]
        modes: Vec<String>,

        /// Research question for the phenomenological mode.
        #[arg(long)]
        phenomenological_question: Option<String>,

        /// Research question for the thematic mode.
        #[arg(long)]
        thematic_question: Option<String>,

        /// Mapping question for the systematic mode. Repeatable.
        #[arg(long = "question")]
        questions: Vec<String>,

        /// File with one mapping question per line.
        #[arg(long)]
        questions_file: Option<PathBuf>,

        /// Document to include (.pdf, .txt, .md). Repeatable.
        #[arg(long = "doc")]
        docs: Vec<PathBuf>,

        /// Directory scanned for documents. Repeatable.
        #[arg(long = "dir")]
        dirs: Vec<PathBuf>,

        /// RIS file whose records become documents. Repeatable.
        #[arg(long)]
        ris: Vec<PathBuf>,

        /// Output directory for tables (default: `[export].dir`).
        #[arg(long)]
        out: Option<PathBuf>,

        /// csv, tsv or both (default: `[export].format`).
        #[arg(long)]
        format: Option<String>,

        /// Also write the raw result as JSON.
        #[arg(long)]
        save_json: Option<PathBuf>,

        /// Print instruction, schema and corpus size; make no call.
        #[arg(long)]
        dry_run: bool,

        /// Progress on stderr: off, human or json (default: human on a TTY).
        #[arg(long)]
        progress: Option<String>,
    },

    /// Re-export a saved result JSON as tables.
    Export {
        /// Result file written by `analyze --save-json`.
        #[arg(long)]
        result: PathBuf,

        #[arg(long)]
        out: Option<PathBuf>,

        #[arg(long)]
        format: Option<String>,
    },

    /// Synthesize the answers to one mapping question across documents.
    Synthesize {
        #[arg(long)]
        result: PathBuf,

        #[arg(long)]
        question: String,

        /// Write the Markdown here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Import a RIS file: open-access PDFs where available, text fallbacks otherwise.
    ImportRis {
        file: PathBuf,

        #[arg(long)]
        out: PathBuf,

        /// Skip the network and write fallbacks only.
        #[arg(long)]
        offline: bool,
    },

    /// Print the response schema for a mode selection.
    Schema {
        #[arg(long = "mode", required = true)]
        modes: Vec<String>,
    },

    /// Start the local HTTP API on `[server].bind`.
    Serve,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("corpus_analysis=debug,qca=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Analyze {
            modes,
            phenomenological_question,
            thematic_question,
            questions,
            questions_file,
            docs,
            dirs,
            ris,
            out,
            format,
            save_json,
            dry_run,
            progress,
        } => {
            let progress = match progress.as_deref() {
                Some(mode) => ProgressMode::parse(mode)?,
                None => ProgressMode::default_for_tty(),
            };
            let opts = AnalyzeOptions {
                modes,
                phenomenological_question,
                thematic_question,
                questions,
                questions_file,
                docs,
                dirs,
                ris,
                out,
                format,
                save_json,
                dry_run,
                progress,
            };
            commands::run_analyze(&cfg, &opts).await?;
        }
        Commands::Export {
            result,
            out,
            format,
        } => {
            commands::run_export(&cfg, &result, out.as_deref(), format.as_deref())?;
        }
        Commands::Synthesize {
            result,
            question,
            out,
        } => {
            commands::run_synthesize(&cfg, &result, &question, out.as_deref()).await?;
        }
        Commands::ImportRis { file, out, offline } => {
            commands::run_import_ris(&cfg, &file, &out, offline).await?;
        }
        Commands::Schema { modes } => {
            commands::run_schema(&cfg, &modes)?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
