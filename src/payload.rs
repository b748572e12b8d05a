// SPDX-License-Identifier: MIT OR Apache-2.0

//! Canonical embedding payloads
//!
//! A payload is one line of `key:value` fields joined by single spaces, with
//! absent fields omitted. The same record always yields the same payload.

use crate::model::{DrawingMeta, EntityRecord};

fn flatten(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn push_field(parts: &mut Vec<String>, key: &str, value: &str) {
    let value = flatten(value);
    if !value.is_empty() {
        parts.push(format!("{}:{}", key, value));
    }
}

/// Payload of one entity. `filename` is the owning drawing's file name.
pub fn entity_payload(record: &EntityRecord, filename: &str) -> String {
    let mut parts = Vec::new();
    push_field(&mut parts, "type", record.kind().as_str());
    if let Some(layer) = &record.layer {
        push_field(&mut parts, "layer", layer);
    }
    if let Some(color) = record.color {
        push_field(&mut parts, "color", &color.to_string());
    }
    push_field(&mut parts, "file", filename);
    if let Some(text) = record.text() {
        push_field(&mut parts, "text", text);
    }
    if let Some(linetype) = &record.linetype {
        push_field(&mut parts, "linetype", linetype);
    }
    if let Some(name) = record.block_name() {
        push_field(&mut parts, "name", name);
    }
    if let Some(measurement) = record.measurement() {
        push_field(&mut parts, "measurement", &format!("{:?}", measurement));
    }
    parts.join(" ")
}

/// Payload of a drawing.
pub fn drawing_payload(meta: &DrawingMeta) -> String {
    let mut parts = Vec::new();
    push_field(&mut parts, "filename", &meta.filename);
    if let Some(version) = &meta.version {
        push_field(&mut parts, "version", version);
    }
    if !meta.layers.is_empty() {
        push_field(&mut parts, "layers", &meta.layers.join(","));
    }
    if !meta.entity_counts.is_empty() {
        let counts: Vec<String> = meta
            .entity_counts
            .iter()
            .map(|(kind, count)| format!("{}:{}", kind, count))
            .collect();
        push_field(&mut parts, "entities", &counts.join(","));
    }
    if parts.is_empty() {
        // Only reachable for a drawing without a file name.
        parts.push(format!("path:{}", flatten(&meta.path)));
    }
    parts.join(" ")
}
