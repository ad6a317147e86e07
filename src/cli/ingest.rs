//! Ingest command implementation

use anyhow::{bail, Result};

use crate::ingest::{IngestEngine, PassMode};
use crate::resolve::ResolverRegistry;
use crate::store::ArchiveStore;

pub fn run(
    store: &mut ArchiveStore,
    registry: &ResolverRegistry,
    source: Option<String>,
    full: bool,
) -> Result<()> {
    let mode = if full {
        PassMode::Full
    } else {
        PassMode::Incremental
    };

    let resolvers = match &source {
        Some(source) => match registry.get(source) {
            Some(resolver) => vec![resolver],
            None => bail!("unknown or unconfigured source: {source}"),
        },
        None => registry.available_resolvers(),
    };

    if resolvers.is_empty() {
        println!("No sources available. Check your configuration.");
        return Ok(());
    }

    for resolver in resolvers {
        if !resolver.is_available() {
            println!(
                "Skipping {} ({}): source not present",
                resolver.source().as_str(),
                resolver.description()
            );
            continue;
        }

        println!(
            "Ingesting {} ({})...",
            resolver.source().as_str(),
            resolver.description()
        );

        let summary = IngestEngine::new(store).run_pass(resolver, mode)?;
        println!(
            "  {} seen, {} created, {} updated, {} messages, {} skipped",
            summary.seen,
            summary.created,
            summary.updated,
            summary.messages_written,
            summary.errors
        );
    }

    Ok(())
}
