use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use parley::cli::{index, ingest, list, search, show, tag};
use parley::config::Config;
use parley::resolve::ResolverRegistry;
use parley::store::ArchiveStore;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Local archive and full-text search for AI editor chat history")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "parley.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an ingestion pass over the configured sources
    Ingest {
        /// Restrict to one source (cursor, claude, legacy)
        #[arg(short, long)]
        source: Option<String>,

        /// Re-resolve everything instead of an incremental pass
        #[arg(long)]
        full: bool,
    },

    /// List archived chats
    List {
        /// Filter by workspace hash
        #[arg(short, long)]
        workspace: Option<String>,

        /// Filter by mode (chat, edit, agent, plan, debug, ask)
        #[arg(short, long)]
        mode: Option<String>,

        /// Filter by source (cursor, claude, legacy)
        #[arg(long)]
        source: Option<String>,

        /// Filter by tag (normalized form)
        #[arg(short, long)]
        tag: Option<String>,

        /// Only chats updated on or after this day (YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,

        /// Only chats updated on or before this day (YYYY-MM-DD)
        #[arg(long)]
        until: Option<String>,

        /// Only empty chats
        #[arg(long, conflicts_with = "non_empty")]
        empty: bool,

        /// Only chats with messages
        #[arg(long)]
        non_empty: bool,

        #[arg(short, long, default_value_t = 100)]
        limit: i64,
    },

    /// List known workspaces
    Workspaces,

    /// Full-text search over message content
    Search {
        /// FTS query
        query: Vec<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: i64,
    },

    /// Show one chat with its messages
    Show {
        /// Chat id or external identity
        chat: String,

        /// Include rich-text payloads
        #[arg(long)]
        raw: bool,
    },

    /// Tag management
    Tag {
        #[command(subcommand)]
        command: TagCommands,
    },

    /// Check (and optionally rebuild) the search index
    Index {
        #[arg(long)]
        rebuild: bool,
    },

    /// Delete all chats that archived with zero messages
    PurgeEmpty,
}

#[derive(Subcommand)]
enum TagCommands {
    /// Add tags to a chat
    Add {
        /// Chat id or external identity
        chat: String,
        /// Labels, hierarchical namespace/value form
        tags: Vec<String>,
    },
    /// Remove tags from a chat
    Rm {
        chat: String,
        tags: Vec<String>,
    },
    /// List all tags with usage counts
    List,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load config
    let config = Config::load(&cli.config).unwrap_or_default();

    // Initialize store (applies schema migrations; fatal on mismatch)
    let mut store = ArchiveStore::open(&config.database_path())?;

    match cli.command {
        Commands::Ingest { source, full } => {
            let registry = ResolverRegistry::new(&config);
            ingest::run(&mut store, &registry, source, full)?;
        }
        Commands::List {
            workspace,
            mode,
            source,
            tag,
            since,
            until,
            empty,
            non_empty,
            limit,
        } => {
            let empty = match (empty, non_empty) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            list::run(
                &store, workspace, mode, source, tag, since, until, empty, limit,
            )?;
        }
        Commands::Workspaces => {
            list::workspaces(&store)?;
        }
        Commands::Search { query, limit } => {
            search::run(&store, &query.join(" "), limit)?;
        }
        Commands::Show { chat, raw } => {
            show::run(&store, &chat, raw)?;
        }
        Commands::Tag { command } => match command {
            TagCommands::Add { chat, tags } => tag::add(&store, &chat, tags)?,
            TagCommands::Rm { chat, tags } => tag::remove(&store, &chat, tags)?,
            TagCommands::List => tag::list(&store)?,
        },
        Commands::Index { rebuild } => {
            index::run(&store, rebuild)?;
        }
        Commands::PurgeEmpty => {
            let deleted = store.delete_empty_chats()?;
            println!("Deleted {deleted} empty chat(s)");
        }
    }

    Ok(())
}
