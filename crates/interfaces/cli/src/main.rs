mod memory_cmds;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use lore_config::AppConfig;
use lore_memory::{MemoryManager, MemoryType, PurgeScope, RuleExtractor};

#[derive(Debug, Parser)]
#[command(
    name = "lore",
    version,
    about = "Personal long-term memory kept in plain markdown files"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config/default.toml")]
    config: PathBuf,
    /// Directory a relative `memory.root` resolves against.
    #[arg(long, default_value = ".")]
    project_root: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Rank stored memories against a query.
    Search {
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
        /// Print the prompt block instead of the scored list.
        #[arg(long)]
        block: bool,
    },
    /// Store one entry directly.
    Add {
        #[arg(long)]
        key: String,
        #[arg(long = "type", value_enum)]
        mem_type: CliMemoryType,
        #[arg(long)]
        content: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Run the extraction pipeline over one user message.
    Extract {
        text: String,
        /// `auto`, `profile`, `fact` or `episode`.
        #[arg(long = "type", default_value = "auto")]
        type_override: String,
        /// Propose entries with the phrase-rule extractor.
        #[arg(long)]
        rules: bool,
    },
    /// Re-canonicalise and merge one partition.
    Repair {
        #[arg(long = "type", value_enum)]
        mem_type: CliMemoryType,
    },
    /// Delete memories of one type, or everything.
    Purge {
        #[arg(long, value_enum, default_value = "all")]
        scope: CliPurgeScope,
        #[arg(long)]
        yes: bool,
    },
    /// Delete episode files past the retention window.
    Prune,
    /// Rescan every partition and rewrite the key index.
    Reindex,
    Stats,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMemoryType {
    Profile,
    Fact,
    Episode,
}

impl From<CliMemoryType> for MemoryType {
    fn from(value: CliMemoryType) -> Self {
        match value {
            CliMemoryType::Profile => MemoryType::Profile,
            CliMemoryType::Fact => MemoryType::Fact,
            CliMemoryType::Episode => MemoryType::Episode,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliPurgeScope {
    All,
    Profile,
    Fact,
    Episode,
}

impl From<CliPurgeScope> for PurgeScope {
    fn from(value: CliPurgeScope) -> Self {
        match value {
            CliPurgeScope::All => PurgeScope::All,
            CliPurgeScope::Profile => PurgeScope::Profile,
            CliPurgeScope::Fact => PurgeScope::Fact,
            CliPurgeScope::Episode => PurgeScope::Episode,
        }
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.telemetry.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    debug!(config = %cli.config.display(), root = %config.memory.root, "configuration loaded");

    let memory = MemoryManager::open(&config.memory, &cli.project_root)?;

    match cli.command {
        Commands::Search {
            query,
            top_k,
            block,
        } => memory_cmds::run_memory_search(&memory, &query, top_k, block)?,
        Commands::Add {
            key,
            mem_type,
            content,
            tags,
        } => memory_cmds::run_memory_add(&memory, &key, mem_type.into(), &content, &tags)?,
        Commands::Extract {
            text,
            type_override,
            rules,
        } => {
            let type_override = MemoryType::parse_override(&type_override)?;
            let memory = if rules {
                memory.with_extractor(RuleExtractor::default())
            } else {
                memory
            };
            memory_cmds::run_memory_extract(&memory, &text, type_override)?;
        }
        Commands::Repair { mem_type } => memory_cmds::run_memory_repair(&memory, mem_type.into())?,
        Commands::Purge { scope, yes } => memory_cmds::run_memory_purge(&memory, scope.into(), yes)?,
        Commands::Prune => memory_cmds::run_memory_prune(&memory)?,
        Commands::Reindex => memory_cmds::run_memory_reindex(&memory)?,
        Commands::Stats => memory_cmds::run_memory_stats(&memory)?,
    }

    Ok(())
}
