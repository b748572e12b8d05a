// SPDX-License-Identifier: MIT OR Apache-2.0

//! Indexer module - commands that write parsed drawings and vectors

pub mod embed;
pub mod import;
pub mod index;
pub mod parse;
pub mod scanner;
