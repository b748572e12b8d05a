// SPDX-License-Identifier: MIT OR Apache-2.0

//! Drawing scanner using the ignore crate (same as ripgrep)

use anyhow::{Context, Result};
use cadgrep::storage::STORE_DIR;
use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

/// Lists drawing files under a root, respecting .gitignore
pub struct DrawingScanner {
    root: PathBuf,
    extensions: Vec<String>,
    exclude_paths: Vec<String>,
    max_file_size: Option<u64>,
}

impl DrawingScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extensions: vec!["dxf".into()],
            exclude_paths: Vec::new(),
            max_file_size: None,
        }
    }

    /// Scan for files with these extensions instead (lowercase, no dot)
    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|e| e.to_string()).collect();
        self
    }

    /// Skip paths matching these glob patterns
    pub fn with_excludes(mut self, patterns: Vec<String>) -> Self {
        self.exclude_paths = patterns;
        self
    }

    /// Skip files larger than this many bytes
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    /// Matching file paths, sorted
    pub fn list_files(&self) -> Result<Vec<PathBuf>> {
        let mut overrides = OverrideBuilder::new(&self.root);
        for pattern in &self.exclude_paths {
            overrides
                .add(&format!("!{}", pattern))
                .with_context(|| format!("Invalid exclude pattern: {}", pattern))?;
        }
        let overrides = overrides.build().context("Invalid exclude patterns")?;

        let (tx, rx) = mpsc::channel();

        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .git_ignore(true)
            .git_exclude(true)
            .max_filesize(self.max_file_size)
            .overrides(overrides)
            .filter_entry(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| name != STORE_DIR)
                    .unwrap_or(true)
            })
            .build_parallel();

        let extensions = self.extensions.clone();

        walker.run(|| {
            let tx = tx.clone();
            let extensions = extensions.clone();

            Box::new(move |entry| {
                if let Ok(entry) = entry {
                    let path = entry.path();
                    if path.is_file() {
                        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                            if extensions.contains(&ext.to_lowercase()) {
                                let _ = tx.send(path.to_path_buf());
                            }
                        }
                    }
                }
                ignore::WalkState::Continue
            })
        });

        drop(tx);
        let mut files: Vec<PathBuf> = rx.into_iter().collect();
        files.sort();
        Ok(files)
    }
}

/// A single file, or every matching file under a directory
pub fn resolve_inputs(input: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        anyhow::bail!("Input not found: {}", input.display());
    }
    DrawingScanner::new(input)
        .with_extensions(extensions)
        .list_files()
}
