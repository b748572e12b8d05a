// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding module - turns drawing and entity payloads into vectors
//!
//! Providers sit behind the [`EmbeddingProvider`] trait; the pipeline feeds
//! them stored records that still lack a vector.

pub mod pipeline;
pub mod provider;

pub use pipeline::{EmbedOptions, EmbedReport, EmbeddingPipeline};
#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
pub use provider::FastEmbedder;
pub use provider::{
    create_provider, CommandProvider, EmbeddingProvider, EmbeddingProviderConfig, HashEmbedder,
};
