// SPDX-License-Identifier: MIT OR Apache-2.0

//! cadgrep - Semantic extraction and similarity search over CAD drawings
//!
//! Shared modules for the cadgrep CLI tool: DXF parsing, text
//! classification, drawing summaries, embedding payloads, the local drawing
//! store and brute-force similarity search.

pub mod analysis;
pub mod classify;
pub mod config;
pub mod dxf;
pub mod embedding;
pub mod errors;
pub mod model;
pub mod output;
pub mod payload;
pub mod similarity;
pub mod storage;
pub mod utils;
