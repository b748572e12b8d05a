// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding provider interface and implementations.
//!
//! Three providers sit behind [`EmbeddingProvider`]: an external command, the
//! builtin fastembed model and an offline feature-hashing embedder.

use crate::config::{EmbeddingConfig, EmbeddingProviderType};
use anyhow::{bail, Context, Result};
#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use serde_json::Value;
use std::borrow::Cow;
use std::env;
use std::io::Write;
use std::process::{Command, Stdio};

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
const DEFAULT_FASTEMBED_MODEL: &str = "minilm";
const DEFAULT_FASTEMBED_BATCH_SIZE: usize = 512;
const MAX_FASTEMBED_BATCH_SIZE: usize = 1024;
const DEFAULT_FASTEMBED_MAX_CHARS: usize = 2000;

/// Tuning for the builtin provider.
#[derive(Debug, Clone)]
pub struct EmbeddingProviderConfig {
    pub model_name: String,
    pub batch_size: usize,
    pub max_chars: usize,
    pub normalize: bool,
}

impl EmbeddingProviderConfig {
    /// Config batch size, overridden by the `FASTEMBED_*` variables when set.
    pub fn from_env(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = env::var("FASTEMBED_MODEL")
            .ok()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "minilm".to_string());

        let mut batch_size = parse_usize_env("FASTEMBED_BATCH_SIZE", config.batch_size())?;
        if batch_size == 0 {
            batch_size = DEFAULT_FASTEMBED_BATCH_SIZE;
        }
        if batch_size > MAX_FASTEMBED_BATCH_SIZE {
            tracing::warn!(
                "FASTEMBED_BATCH_SIZE={} exceeds max {}; clamping",
                batch_size,
                MAX_FASTEMBED_BATCH_SIZE
            );
            batch_size = MAX_FASTEMBED_BATCH_SIZE;
        }

        let mut max_chars = parse_usize_env("FASTEMBED_MAX_CHARS", DEFAULT_FASTEMBED_MAX_CHARS)?;
        if max_chars == 0 {
            max_chars = DEFAULT_FASTEMBED_MAX_CHARS;
        }

        let normalize = parse_bool_env("FASTEMBED_NORMALIZE", true)?;

        Ok(Self {
            model_name,
            batch_size,
            max_chars,
            normalize,
        })
    }
}

impl Default for EmbeddingProviderConfig {
    fn default() -> Self {
        Self {
            model_name: "minilm".to_string(),
            batch_size: DEFAULT_FASTEMBED_BATCH_SIZE,
            max_chars: DEFAULT_FASTEMBED_MAX_CHARS,
            normalize: true,
        }
    }
}

/// Converts payload text to vectors.
///
/// Implementations return one vector per input, in input order, all of the
/// same dimension.
pub trait EmbeddingProvider: Send {
    /// Returns the model identifier.
    fn model_id(&self) -> &str;

    /// Returns the batch size used by the provider.
    fn batch_size(&self) -> usize;

    /// Generates embeddings for the given texts.
    fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Generates an embedding for a single text.
    fn embed_one(&mut self, text: &str) -> Result<Vec<f32>> {
        let mut result = self.embed_texts(&[text.to_string()])?;
        result
            .pop()
            .ok_or_else(|| anyhow::anyhow!("No embedding returned"))
    }
}

/// Builds the provider selected in the `[embeddings]` config section.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    let provider: Box<dyn EmbeddingProvider> = match config.provider() {
        EmbeddingProviderType::Command => Box::new(CommandProvider::new(
            config.command().to_string(),
            config.model().to_string(),
            config.batch_size(),
        )),
        EmbeddingProviderType::Hash => Box::new(
            HashEmbedder::new(config.dimension()).with_batch_size(config.batch_size()),
        ),
        EmbeddingProviderType::Builtin => builtin_provider(config)?,
    };
    tracing::debug!(
        "Using embedding provider {:?} (model {})",
        config.provider(),
        provider.model_id()
    );
    Ok(provider)
}

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
fn builtin_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    Ok(Box::new(FastEmbedder::new(EmbeddingProviderConfig::from_env(config)?)?))
}

#[cfg(all(target_os = "macos", target_arch = "x86_64"))]
fn builtin_provider(_config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    bail!("The builtin embedding provider is not available on this platform; use provider = \"command\" or \"hash\"")
}

/// FastEmbed provider using sentence-transformers/all-MiniLM-L6-v2.
#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
pub struct FastEmbedder {
    embedder: TextEmbedding,
    config: EmbeddingProviderConfig,
    model_id: String,
}

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
impl FastEmbedder {
    pub fn new(config: EmbeddingProviderConfig) -> Result<Self> {
        let model = parse_model_name(&config.model_name)?;
        let model_id = model.to_string();
        let embedder = TextEmbedding::try_new(InitOptions::new(model))
            .context("Failed to initialize fastembed model")?;

        Ok(Self {
            embedder,
            config,
            model_id,
        })
    }
}

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
impl EmbeddingProvider for FastEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let prepared = truncate_texts(texts, self.config.max_chars);
        let mut embeddings = self
            .embedder
            .embed(&prepared, Some(self.config.batch_size))?;

        if self.config.normalize {
            for embedding in embeddings.iter_mut() {
                l2_normalize(embedding);
            }
        }

        Ok(embeddings)
    }
}

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
fn parse_model_name(raw: &str) -> Result<EmbeddingModel> {
    match raw.trim().to_lowercase().as_str() {
        ""
        | "minilm"
        | "all-minilm-l6-v2"
        | "allminilm-l6-v2"
        | "sentence-transformers/all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        other => bail!(
            "Unsupported FASTEMBED_MODEL '{}'. Supported value: {}",
            other,
            DEFAULT_FASTEMBED_MODEL
        ),
    }
}

/// Shells out to an external command.
///
/// The command reads `{"model": ..., "texts": [...]}` on stdin and prints a
/// JSON array of vectors, or an object holding one under `embeddings`,
/// `vectors` or `data`.
pub struct CommandProvider {
    command: String,
    model: String,
    batch_size: usize,
}

impl CommandProvider {
    pub fn new(command: String, model: String, batch_size: usize) -> Self {
        Self {
            command,
            model,
            batch_size: batch_size.max(1),
        }
    }

    fn run_command(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let payload = serde_json::json!({
            "model": self.model,
            "texts": texts,
        });

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn embedding command: {}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(payload.to_string().as_bytes())
                .context("Failed to write embeddings payload to stdin")?;
        }

        let output = child
            .wait_with_output()
            .context("Failed to read embeddings command output")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Embedding command failed (status {}): {}",
                output.status,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let vectors = parse_vectors(stdout.trim())?;
        if vectors.len() != texts.len() {
            bail!(
                "Embedding command returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            );
        }
        Ok(vectors)
    }
}

impl EmbeddingProvider for CommandProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.run_command(texts)
    }
}

fn parse_vectors(raw: &str) -> Result<Vec<Vec<f32>>> {
    let parsed: Value = serde_json::from_str(raw)
        .with_context(|| "Failed to parse embeddings command output as JSON")?;

    let rows = match parsed {
        Value::Array(arr) => arr,
        Value::Object(mut obj) => {
            let value = ["embeddings", "vectors", "data"]
                .iter()
                .find_map(|key| obj.remove(*key))
                .ok_or_else(|| anyhow::anyhow!("Embeddings command output missing 'embeddings' field"))?;
            match value {
                Value::Array(arr) => arr,
                _ => bail!("Embeddings output must be a JSON array"),
            }
        }
        _ => bail!("Embeddings command output must be JSON array or object"),
    };

    rows.iter()
        .map(|row| {
            row.as_array()
                .ok_or_else(|| anyhow::anyhow!("Embedding row must be an array"))?
                .iter()
                .map(|value| {
                    value
                        .as_f64()
                        .ok_or_else(|| anyhow::anyhow!("Embedding value must be a number"))
                        .map(|v| v as f32)
                })
                .collect::<Result<Vec<f32>>>()
        })
        .collect()
}

/// Deterministic feature-hashing embedder.
///
/// Each whitespace token, and each `key:value` field's key and value parts,
/// is hashed with blake3 into one of `dimension` signed buckets. The result is
/// L2-normalized. Needs no model files, so it also serves air-gapped setups.
pub struct HashEmbedder {
    model: String,
    dimension: usize,
    batch_size: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            model: format!("hash-{}", dimension),
            dimension,
            batch_size: DEFAULT_FASTEMBED_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str) {
        let hash = blake3::hash(feature.as_bytes());
        let bytes = hash.as_bytes();
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[..8]);
        let bucket = (u64::from_le_bytes(word) % self.dimension as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.split_whitespace() {
            let token = token.to_lowercase();
            self.add_feature(&mut vector, &token);
            if let Some((key, value)) = token.split_once(':') {
                self.add_feature(&mut vector, key);
                for part in value.split(',').filter(|p| !p.is_empty()) {
                    self.add_feature(&mut vector, part);
                }
            }
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
fn truncate_texts(texts: &[String], max_chars: usize) -> Vec<Cow<'_, str>> {
    texts
        .iter()
        .map(|text| truncate_to_chars(text.as_str(), max_chars))
        .collect()
}

#[cfg_attr(all(target_os = "macos", target_arch = "x86_64"), allow(dead_code))]
fn truncate_to_chars(input: &str, max_chars: usize) -> Cow<'_, str> {
    if max_chars == 0 {
        return Cow::Borrowed("");
    }

    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => Cow::Owned(input[..idx].to_string()),
        None => Cow::Borrowed(input),
    }
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

fn parse_usize_env(name: &str, default: usize) -> Result<usize> {
    match env::var(name) {
        Ok(raw) => {
            let value = raw.trim();
            if value.is_empty() {
                Ok(default)
            } else {
                value
                    .parse::<usize>()
                    .with_context(|| format!("Invalid {} value: {}", name, value))
            }
        }
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("Failed to read {}", name)),
    }
}

fn parse_bool_env(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(raw) => {
            let value = raw.trim().to_lowercase();
            if value.is_empty() {
                return Ok(default);
            }
            match value.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => bail!("Invalid {} value: {}", name, other),
            }
        }
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("Failed to read {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn test_hash_embedder_is_deterministic() {
        let mut provider = HashEmbedder::new(64);
        assert_eq!(provider.model_id(), "hash-64");

        let texts = vec![
            "type:CIRCLE layer:HOLES".to_string(),
            "type:TEXT text:SUS304".to_string(),
        ];
        let first = provider.embed_texts(&texts).unwrap();
        let second = provider.embed_texts(&texts).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|v| v.len() == 64));
        assert!((norm(&first[0]) - 1.0).abs() < 1e-5);
        assert_ne!(first[0], first[1]);
    }

    #[test]
    fn test_hash_embedder_shares_features() {
        let mut provider = HashEmbedder::new(256);
        let a = provider.embed_one("type:CIRCLE layer:HOLES file:a.dxf").unwrap();
        let b = provider.embed_one("type:CIRCLE layer:HOLES file:b.dxf").unwrap();
        let c = provider.embed_one("type:MTEXT text:GENERAL NOTES").unwrap();
        let dot = |x: &[f32], y: &[f32]| x.iter().zip(y).map(|(p, q)| p * q).sum::<f32>();
        assert!(dot(&a, &b) > dot(&a, &c));
    }

    #[test]
    fn test_empty_embed() {
        let mut provider = HashEmbedder::new(32);
        let result = provider.embed_texts(&[]).unwrap();
        assert!(result.is_empty());
        let blank = provider.embed_one("   ").unwrap();
        assert!(blank.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_create_provider_from_config() {
        let config: crate::config::Config =
            toml::from_str("[embeddings]\nprovider = \"hash\"\ndimension = 12\nbatch_size = 4\n")
                .unwrap();
        let mut provider = create_provider(config.embeddings()).unwrap();
        assert_eq!(provider.batch_size(), 4);
        assert_eq!(provider.embed_one("x").unwrap().len(), 12);
    }

    #[test]
    fn test_parse_vectors_shapes() {
        assert_eq!(
            parse_vectors("[[1, 2], [3.5, 4]]").unwrap(),
            vec![vec![1.0, 2.0], vec![3.5, 4.0]]
        );
        assert_eq!(
            parse_vectors(r#"{"vectors": [[0.5]]}"#).unwrap(),
            vec![vec![0.5]]
        );
        assert!(parse_vectors(r#"{"other": []}"#).is_err());
        assert!(parse_vectors(r#"[["a"]]"#).is_err());
        assert!(parse_vectors("not json").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_provider_round_trip() {
        let mut provider = CommandProvider::new(
            r#"cat > /dev/null; echo '{"embeddings": [[1, 0], [0, 1]]}'"#.to_string(),
            "test-model".to_string(),
            8,
        );
        let vectors = provider
            .embed_texts(&["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);

        // One vector for two texts is a provider failure.
        let mut short = CommandProvider::new(
            r#"cat > /dev/null; echo '[[1, 0]]'"#.to_string(),
            "test-model".to_string(),
            8,
        );
        assert!(short
            .embed_texts(&["a".to_string(), "b".to_string()])
            .is_err());

        let mut failing =
            CommandProvider::new("exit 3".to_string(), "test-model".to_string(), 8);
        assert!(failing.embed_texts(&["a".to_string()]).is_err());
    }

    #[test]
    fn test_truncate_to_chars() {
        let input = "hello";
        assert_eq!(
            truncate_to_chars(input, 2),
            Cow::<str>::Owned("he".to_string())
        );
        assert_eq!(truncate_to_chars(input, 5), Cow::Borrowed(input));
        assert_eq!(truncate_to_chars("寸法公差", 2), Cow::<str>::Owned("寸法".to_string()));
    }
}
