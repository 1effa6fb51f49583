//! # Redmine Knowledge Agent CLI (`redmine-ka`)
//!
//! ## Usage
//!
//! ```bash
//! redmine-ka --config ./config/redmine.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `redmine-ka list-projects` | List projects visible to the API key |
//! | `redmine-ka fetch` | Mirror issues and wiki pages into Markdown |
//! | `redmine-ka convert-textile <file>` | Convert a Textile file to Markdown |
//! | `redmine-ka extract <file>` | Run attachment extraction on a local file |
//!
//! `convert-textile` and `extract` do not read the configuration file.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use redmine_knowledge_agent::client::RedmineClient;
use redmine_knowledge_agent::config::{self, ProcessingConfig};
use redmine_knowledge_agent::converter::{TextileConverter, DEFAULT_ATTACHMENT_PREFIX};
use redmine_knowledge_agent::factory::ProcessorFactory;
use redmine_knowledge_agent::fetch::{self, FetchOptions};
use redmine_knowledge_agent::logging;

/// Mirror Redmine issues and wiki pages into Markdown for RAG indexing.
///
/// Commands that talk to Redmine read a TOML configuration file. See
/// `config/redmine.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "redmine-ka",
    about = "Redmine Knowledge Agent: mirror Redmine issues and wiki pages into Markdown",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/redmine.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List projects visible to the configured API key.
    ListProjects,

    /// Fetch issues, wiki pages, and attachments into Markdown documents.
    ///
    /// Every project of every configured output is fetched unless
    /// `--projects` narrows the run. Attachments already on disk are not
    /// downloaded again.
    Fetch {
        /// Comma-separated project identifiers to fetch.
        #[arg(long, value_delimiter = ',')]
        projects: Vec<String>,

        /// Do not download or extract attachments.
        #[arg(long)]
        skip_attachments: bool,

        /// Do not fetch wiki pages.
        #[arg(long)]
        skip_wiki: bool,
    },

    /// Convert a Textile file to Markdown.
    ConvertTextile {
        /// Textile input file.
        input: PathBuf,

        /// Write Markdown here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Path prefix for local image references.
        #[arg(long, default_value = DEFAULT_ATTACHMENT_PREFIX)]
        attachment_prefix: String,
    },

    /// Extract text from a local attachment and print it as JSON.
    Extract {
        /// File to process.
        file: PathBuf,

        /// MIME type to dispatch on (guessed from the file name when omitted).
        #[arg(long)]
        mime: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::ConvertTextile {
            input,
            output,
            attachment_prefix,
        } => {
            logging::init("warn", "console")?;
            let textile = std::fs::read_to_string(input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let markdown = TextileConverter::new(attachment_prefix.as_str()).convert(&textile);
            match output {
                Some(path) => {
                    std::fs::write(path, format!("{}\n", markdown))
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("wrote {}", path.display());
                }
                None => println!("{}", markdown),
            }
            return Ok(());
        }
        Commands::Extract { file, mime } => {
            logging::init("warn", "console")?;
            let factory = ProcessorFactory::new(&ProcessingConfig::default());
            let content = factory.process_file(file, mime.as_deref());
            println!("{}", serde_json::to_string_pretty(&content)?);
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.level, &cfg.logging.format)?;

    match cli.command {
        Commands::ListProjects => {
            let client = RedmineClient::new(&cfg.redmine)?;
            let projects = client.list_projects()?;
            if projects.is_empty() {
                println!("No projects found.");
            }
            for project in projects {
                let description = project.description.unwrap_or_default();
                let excerpt: String = description
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .chars()
                    .take(60)
                    .collect();
                if excerpt.is_empty() {
                    println!("[{}] {}", project.identifier, project.name);
                } else {
                    println!("[{}] {} - {}", project.identifier, project.name, excerpt);
                }
            }
        }
        Commands::Fetch {
            projects,
            skip_attachments,
            skip_wiki,
        } => {
            let options = FetchOptions {
                projects,
                skip_attachments,
                skip_wiki,
            };
            fetch::run_fetch(&cfg, &options)?;
        }
        Commands::ConvertTextile { .. } | Commands::Extract { .. } => unreachable!(),
    }

    Ok(())
}
