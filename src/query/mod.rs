// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query module - search, analysis and store statistics commands

pub mod analyze;
pub mod search;
pub mod stats;
