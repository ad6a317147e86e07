//! Conversation resolvers.
//!
//! One resolver per source family. A resolver consumes its family's raw
//! store readers and produces normalized [`ResolvedConversation`] values;
//! nothing loosely typed crosses this boundary outward.

mod claude;
mod cursor;
mod legacy;

pub use claude::ClaudeResolver;
pub use cursor::CursorResolver;
pub use legacy::LegacyResolver;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::Config;
use crate::model::{ResolvedConversation, SourceKind};

/// Result of one resolution sweep over a source family.
#[derive(Debug, Default)]
pub struct ResolveOutcome {
    pub conversations: Vec<ResolvedConversation>,
    /// Records skipped because they were malformed or unreadable.
    pub skipped: u32,
}

/// A source family's resolver.
pub trait ConversationResolver: Send + Sync {
    fn source(&self) -> SourceKind;

    fn description(&self) -> &str;

    /// Check if this resolver's data source exists
    fn is_available(&self) -> bool;

    /// Resolve conversations, optionally bounded to those updated at or
    /// after `since` (the incremental watermark). Records whose update time
    /// cannot be determined are included conservatively.
    fn resolve(&self, since: Option<DateTime<Utc>>) -> Result<ResolveOutcome>;
}

/// Registry of configured resolvers
pub struct ResolverRegistry {
    resolvers: Vec<Box<dyn ConversationResolver>>,
}

impl ResolverRegistry {
    pub fn new(config: &Config) -> Self {
        let mut registry = Self { resolvers: vec![] };

        if config.is_source_enabled("cursor") {
            registry.register(Box::new(CursorResolver::new(config.source_path("cursor"))));
        }

        if config.is_source_enabled("claude") {
            match (config.claude_org_id(), config.claude_session_cookie()) {
                (Some(org_id), Some(cookie)) => {
                    match ClaudeResolver::new(&config.claude.base_url, &org_id, &cookie) {
                        Ok(resolver) => registry.register(Box::new(resolver)),
                        Err(e) => debug!(error = %e, "claude resolver not registered"),
                    }
                }
                _ => debug!("claude resolver not registered: missing credentials"),
            }
        }

        if config.is_source_enabled("legacy") {
            if let Some(dir) = config.legacy_import_dir() {
                match LegacyResolver::new(dir, &config.legacy.pattern) {
                    Ok(resolver) => registry.register(Box::new(resolver)),
                    Err(e) => debug!(error = %e, "legacy resolver not registered"),
                }
            }
        }

        registry
    }

    pub fn register(&mut self, resolver: Box<dyn ConversationResolver>) {
        self.resolvers.push(resolver);
    }

    pub fn available_resolvers(&self) -> Vec<&dyn ConversationResolver> {
        self.resolvers
            .iter()
            .filter(|r| r.is_available())
            .map(|r| r.as_ref())
            .collect()
    }

    pub fn all_resolvers(&self) -> Vec<&dyn ConversationResolver> {
        self.resolvers.iter().map(|r| r.as_ref()).collect()
    }

    pub fn get(&self, source: &str) -> Option<&dyn ConversationResolver> {
        self.resolvers
            .iter()
            .find(|r| r.source().as_str() == source)
            .map(|r| r.as_ref())
    }
}
