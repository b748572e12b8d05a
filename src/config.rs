// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for cadgrep
//!
//! Loads configuration from .cadgreprc.toml in the current directory (or the
//! indexed root) or ~/.config/cadgrep/config.toml

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Output format for results (mirrored from cli for library use)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOutputFormat {
    #[default]
    Text,
    Json,
}

/// Embedding provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderType {
    #[default]
    Command,
    Builtin,
    Hash,
}

/// Text classifier keyword lists. Unset lists use the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Alloy codes, material words and their synonyms
    pub material_keywords: Option<Vec<String>>,
    /// Tolerance symbols and fit-class codes
    pub tolerance_keywords: Option<Vec<String>>,
    /// Regular expressions for thread designators
    pub thread_patterns: Option<Vec<String>>,
    /// Roughness markers and glyphs
    pub surface_finish_markers: Option<Vec<String>>,
}

/// Drawing summary configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Block-name keywords marking a bill of materials
    pub bom_keywords: Option<Vec<String>>,
    /// Number of key dimensions to report
    pub key_dimensions: Option<usize>,
}

impl SummaryConfig {
    /// Get key dimension count (defaults to 5)
    pub fn key_dimensions(&self) -> usize {
        self.key_dimensions.unwrap_or(5)
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider type (command, builtin, hash)
    pub provider: Option<EmbeddingProviderType>,
    /// Model identifier for the embedding provider
    pub model: Option<String>,
    /// Command to execute for command provider
    pub command: Option<String>,
    /// Vector dimension of the hash provider
    pub dimension: Option<usize>,
    /// Number of payloads sent to the provider per call
    pub batch_size: Option<usize>,
}

impl EmbeddingConfig {
    /// Get provider type (defaults to Command)
    pub fn provider(&self) -> EmbeddingProviderType {
        self.provider.unwrap_or_default()
    }

    /// Get model identifier (defaults to "local-model-id")
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or("local-model-id")
    }

    /// Get command (defaults to "embedder")
    pub fn command(&self) -> &str {
        self.command.as_deref().unwrap_or("embedder")
    }

    /// Get hash provider dimension (defaults to 256)
    pub fn dimension(&self) -> usize {
        self.dimension.filter(|d| *d > 0).unwrap_or(256)
    }

    /// Get embedding batch size (defaults to 50)
    pub fn batch_size(&self) -> usize {
        self.batch_size.filter(|b| *b > 0).unwrap_or(50)
    }
}

/// Search configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Results returned when no limit is given
    pub default_limit: Option<usize>,
    /// Keep only the best record per drawing
    pub per_drawing: Option<bool>,
}

impl SearchConfig {
    /// Get default limit (defaults to 20)
    pub fn default_limit(&self) -> usize {
        self.default_limit.unwrap_or(20)
    }

    /// Get per-drawing dedup (defaults to false)
    pub fn per_drawing(&self) -> bool {
        self.per_drawing.unwrap_or(false)
    }
}

/// Import configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Entities written per transaction
    pub batch_size: Option<usize>,
}

impl ImportConfig {
    /// Get import batch size (defaults to 100)
    pub fn batch_size(&self) -> usize {
        self.batch_size.filter(|b| *b > 0).unwrap_or(100)
    }
}

/// Indexing configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Paths/patterns to exclude from indexing
    pub exclude_paths: Vec<String>,
    /// Maximum drawing size in bytes to index (default: 64MB)
    pub max_file_size: Option<u64>,
}

impl IndexConfig {
    /// Get exclude paths
    pub fn exclude_paths(&self) -> &[String] {
        &self.exclude_paths
    }

    /// Get max file size (default: 64MB)
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size.unwrap_or(64 * 1024 * 1024)
    }
}

/// Configuration loaded from .cadgreprc.toml or ~/.config/cadgrep/config.toml
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default output format (text or json)
    pub default_format: Option<String>,

    /// Classifier keyword lists
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Summary configuration
    #[serde(default)]
    pub summary: SummaryConfig,

    /// Embedding configuration
    #[serde(default)]
    pub embeddings: EmbeddingConfig,

    /// Search configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Import configuration
    #[serde(default)]
    pub import: ImportConfig,

    /// Index configuration
    #[serde(default)]
    pub index: IndexConfig,
}

impl Config {
    /// Load configuration from files
    ///
    /// Precedence (highest to lowest):
    /// 1. .cadgreprc.toml in current directory
    /// 2. ~/.config/cadgrep/config.toml
    pub fn load() -> Self {
        Self::load_for(Path::new("."))
    }

    /// Same as [`Config::load`], looking for `.cadgreprc.toml` in `root`
    pub fn load_for(root: &Path) -> Self {
        if let Some(config) = Self::load_from_path(&root.join(".cadgreprc.toml")) {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config").join("cadgrep").join("config.toml");
            if let Some(config) = Self::load_from_path(&config_path) {
                return config;
            }
        }

        Self::default()
    }

    fn load_from_path(path: &PathBuf) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                eprintln!("Warning: Failed to parse {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Get output format from config, parsing the string to ConfigOutputFormat
    pub fn output_format(&self) -> Option<ConfigOutputFormat> {
        self.default_format.as_ref().and_then(|s| match s.to_lowercase().as_str() {
            "json" => Some(ConfigOutputFormat::Json),
            "text" => Some(ConfigOutputFormat::Text),
            _ => None,
        })
    }

    /// Merge CLI limit with config (CLI wins)
    pub fn merge_limit(&self, cli_value: Option<usize>) -> usize {
        cli_value.unwrap_or_else(|| self.search.default_limit())
    }

    /// Get the classifier configuration
    pub fn classifier(&self) -> &ClassifierConfig {
        &self.classifier
    }

    /// Get the summary configuration
    pub fn summary(&self) -> &SummaryConfig {
        &self.summary
    }

    /// Get the embedding configuration
    pub fn embeddings(&self) -> &EmbeddingConfig {
        &self.embeddings
    }

    /// Get the search configuration
    pub fn search(&self) -> &SearchConfig {
        &self.search
    }

    /// Get the import configuration
    pub fn import(&self) -> &ImportConfig {
        &self.import
    }

    /// Get the index configuration
    pub fn index(&self) -> &IndexConfig {
        &self.index
    }
}
