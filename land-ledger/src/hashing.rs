//! Canonical encoding and hashing of ledger blocks.
//!
//! The block hash is SHA-256 over a fixed sequence of length-prefixed
//! fields. Each field is written as its UTF-8 byte length (`u32`, big-endian)
//! followed by the bytes themselves, so no delimiter can be forged by field
//! content. Field order for hash version `v1`:
//!
//! ```text
//! hash_version, block_id, case_id, height, event_type, officer_id,
//! project_id, occurred_at, previous_hash, nonce, metadata, remarks
//! ```
//!
//! `height` is decimal, `occurred_at` is RFC 3339 with nanoseconds and a `Z`
//! suffix, and `metadata` is [`canonical_json`].

use chrono::SecondsFormat;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::{LedgerBlock, Metadata};

/// Compute SHA256 hash of content.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Recompute the hash of a block from its stored fields.
///
/// `current_hash` and `is_valid` are not part of the input.
pub fn compute_block_hash(block: &LedgerBlock) -> String {
    let height = block.height.to_string();
    let occurred_at = block
        .occurred_at
        .to_rfc3339_opts(SecondsFormat::Nanos, true);
    let metadata = canonical_metadata(&block.metadata);

    let fields: [&str; 12] = [
        &block.hash_version,
        &block.block_id,
        &block.case_id,
        &height,
        block.event_type.as_str(),
        &block.officer_id,
        &block.project_id,
        &occurred_at,
        &block.previous_hash,
        &block.nonce,
        &metadata,
        &block.remarks,
    ];

    let mut hasher = Sha256::new();
    for field in fields {
        let bytes = field.as_bytes();
        hasher.update((bytes.len() as u32).to_be_bytes());
        hasher.update(bytes);
    }
    hex::encode(hasher.finalize())
}

/// Deterministic JSON rendering with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

/// [`canonical_json`] of a metadata map.
pub fn canonical_metadata(metadata: &Metadata) -> String {
    let mut out = String::new();
    write_object(metadata, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_object(map, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        // Scalars already render canonically
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_object(map: &Metadata, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_value(&map[key.as_str()], out);
    }
    out.push('}');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventType, GENESIS_HASH, HASH_VERSION};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn sample_block() -> LedgerBlock {
        let mut metadata = Metadata::new();
        metadata.insert("measured_area".to_string(), json!(5.5));
        metadata.insert("unit".to_string(), json!("hectare"));

        LedgerBlock {
            block_id: "SY-100:MeasurementRecorded:1:abcd".to_string(),
            case_id: "SY-100".to_string(),
            height: 0,
            event_type: EventType::MeasurementRecorded,
            officer_id: "officer-1".to_string(),
            project_id: "project-1".to_string(),
            occurred_at: Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap(),
            metadata,
            remarks: "Measurement recorded".to_string(),
            previous_hash: GENESIS_HASH.to_string(),
            nonce: "00ff".to_string(),
            hash_version: HASH_VERSION.to_string(),
            current_hash: String::new(),
            is_valid: None,
        }
    }

    #[test]
    fn test_compute_hash() {
        let hash1 = compute_hash(b"hello");
        let hash2 = compute_hash(b"hello");
        let hash3 = compute_hash(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let a = json!({"b": 1, "a": {"z": [3, {"y": 1, "x": 2}], "c": null}});
        let b = json!({"a": {"c": null, "z": [3, {"x": 2, "y": 1}]}, "b": 1});

        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"c":null,"z":[3,{"x":2,"y":1}]},"b":1}"#);
    }

    #[test]
    fn test_block_hash_is_deterministic() {
        let block = sample_block();
        assert_eq!(compute_block_hash(&block), compute_block_hash(&block.clone()));
    }

    #[test]
    fn test_block_hash_ignores_verdict_and_stored_hash() {
        let block = sample_block();
        let mut judged = block.clone();
        judged.is_valid = Some(false);
        judged.current_hash = "anything".to_string();

        assert_eq!(compute_block_hash(&block), compute_block_hash(&judged));
    }

    #[test]
    fn test_block_hash_covers_every_field() {
        let base = compute_block_hash(&sample_block());

        let mutations: Vec<Box<dyn Fn(&mut LedgerBlock)>> = vec![
            Box::new(|b: &mut LedgerBlock| b.block_id.push('x')),
            Box::new(|b: &mut LedgerBlock| b.case_id.push('x')),
            Box::new(|b: &mut LedgerBlock| b.height += 1),
            Box::new(|b: &mut LedgerBlock| b.event_type = EventType::AwardDeclared),
            Box::new(|b: &mut LedgerBlock| b.officer_id.push('x')),
            Box::new(|b: &mut LedgerBlock| b.project_id.push('x')),
            Box::new(|b: &mut LedgerBlock| b.occurred_at += chrono::Duration::nanoseconds(1)),
            Box::new(|b: &mut LedgerBlock| b.previous_hash.replace_range(0..1, "1")),
            Box::new(|b: &mut LedgerBlock| b.nonce.push('0')),
            Box::new(|b: &mut LedgerBlock| {
                b.metadata.insert("measured_area".to_string(), json!(5.6));
            }),
            Box::new(|b: &mut LedgerBlock| b.remarks.push('.')),
            Box::new(|b: &mut LedgerBlock| b.hash_version = "v2".to_string()),
        ];

        for mutate in mutations {
            let mut block = sample_block();
            mutate(&mut block);
            assert_ne!(compute_block_hash(&block), base);
        }
    }

    #[test]
    fn test_length_prefix_prevents_field_shifting() {
        let mut a = sample_block();
        a.officer_id = "officer-1".to_string();
        a.project_id = "project-1".to_string();

        let mut b = sample_block();
        b.officer_id = "officer-1project-".to_string();
        b.project_id = "1".to_string();

        assert_ne!(compute_block_hash(&a), compute_block_hash(&b));
    }
}
