//! Command-line interface definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tecvault")]
#[command(about = "Hybrid retrieval and parallel analysis over technical documents")]
#[command(version)]
pub struct Cli {
    /// Path to the engine configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest a plain-text document: chunk, embed, persist
    Ingest {
        /// Text file to ingest
        file: PathBuf,

        /// Equipment name the document is about
        #[arg(long)]
        equipment: Option<String>,

        /// Manufacturer name
        #[arg(long)]
        manufacturer: Option<String>,

        /// Document type (manual, datasheet, pliego, ...)
        #[arg(long, default_value = "otro")]
        doc_type: String,

        /// Mark as a vault document
        #[arg(long)]
        vault: bool,

        /// Extract equipment/manufacturer facts with the generation model
        /// when not given explicitly
        #[arg(long)]
        auto_facts: bool,
    },

    /// Ingest files and run a hybrid search over them
    Search {
        /// Query text
        query: String,

        /// Text files to ingest before searching
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Override the configured top-k
        #[arg(long)]
        top_k: Option<usize>,

        /// Restrict candidates to vault documents
        #[arg(long)]
        vault_only: bool,

        /// Disable equipment entity filtering
        #[arg(long)]
        no_entity_filter: bool,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ingest files and run a structured parallel analysis
    Analyze {
        /// TOML file defining the prompt tasks
        #[arg(long)]
        tasks: PathBuf,

        /// Analysis type label recorded with the run
        #[arg(long, default_value = "documentacion")]
        analysis_type: String,

        /// Use the standard model tier instead of mini
        #[arg(long)]
        standard: bool,

        /// Text files to analyze
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Inspect or change the runtime retrieval configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show database statistics
    Stats,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show all configuration entries
    Show,

    /// Update one configuration key
    Set { key: String, value: String },

    /// Show recent configuration changes
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Reset every key to its default value
    Reset,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
