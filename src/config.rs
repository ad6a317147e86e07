//! Configuration management with YAML support

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub sources: HashMap<String, SourceConfig>,

    #[serde(default)]
    pub claude: ClaudeConfig,

    #[serde(default)]
    pub legacy: LegacyConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

/// Per-source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Override for the source's storage root (workspace storage dir,
    /// global storage dir, or snapshot dir depending on the source).
    #[serde(default)]
    pub base_path: Option<String>,
}

/// Chat-service API credentials. Falls back to CLAUDE_ORG_ID and
/// CLAUDE_SESSION_COOKIE environment variables when unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaudeConfig {
    #[serde(default)]
    pub org_id: Option<String>,

    #[serde(default)]
    pub session_cookie: Option<String>,

    #[serde(default = "default_claude_base_url")]
    pub base_url: String,
}

/// Legacy snapshot import configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyConfig {
    #[serde(default)]
    pub import_dir: Option<String>,

    #[serde(default = "default_legacy_pattern")]
    pub pattern: String,
}

// Default value functions
fn default_database_path() -> String {
    "~/.local/share/parley/parley.db".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_claude_base_url() -> String {
    "https://claude.ai/api".to_string()
}

fn default_legacy_pattern() -> String {
    "chat_data_*.json".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            import_dir: None,
            pattern: default_legacy_pattern(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            sources: HashMap::new(),
            claude: ClaudeConfig::default(),
            legacy: LegacyConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./parley.yaml (current directory)
    /// 3. ~/.config/parley/parley.yaml
    pub fn load(path: &str) -> Result<Self> {
        let search_paths = vec![
            shellexpand::tilde(path).to_string(),
            "parley.yaml".to_string(),
            shellexpand::tilde("~/.config/parley/parley.yaml").to_string(),
        ];

        for search_path in &search_paths {
            if std::path::Path::new(search_path).exists() {
                let content = std::fs::read_to_string(search_path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        // No config file found, use defaults
        Ok(Config::default())
    }

    /// Get the database path, expanding ~ to home directory
    pub fn database_path(&self) -> PathBuf {
        let expanded = shellexpand::tilde(&self.database.path).to_string();
        PathBuf::from(expanded)
    }

    /// Check if a source is enabled (sources are on unless disabled)
    pub fn is_source_enabled(&self, source_id: &str) -> bool {
        self.sources.get(source_id).map_or(true, |s| s.enabled)
    }

    /// Get the base path override for a source, if configured
    pub fn source_path(&self, source_id: &str) -> Option<PathBuf> {
        self.sources
            .get(source_id)
            .and_then(|s| s.base_path.as_ref())
            .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
    }

    /// Legacy snapshot directory, if configured
    pub fn legacy_import_dir(&self) -> Option<PathBuf> {
        self.legacy
            .import_dir
            .as_ref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
    }

    /// Chat-service org id, config value or environment fallback
    pub fn claude_org_id(&self) -> Option<String> {
        self.claude
            .org_id
            .clone()
            .or_else(|| std::env::var("CLAUDE_ORG_ID").ok())
    }

    /// Chat-service session cookie, config value or environment fallback
    pub fn claude_session_cookie(&self) -> Option<String> {
        self.claude
            .session_cookie
            .clone()
            .or_else(|| std::env::var("CLAUDE_SESSION_COOKIE").ok())
    }
}
