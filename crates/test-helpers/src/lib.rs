//! Test fixtures for fleetload.
//!
//! Provides small but realistic fact, report and catalog documents, plus a
//! helper that lays them out on disk the way a sample corpus is expected to
//! look (`facts/`, `reports/`, `catalogs/`).

use fleetload_types::{CommandKind, Document};
use serde_json::{json, Value};
use std::fs;
use std::io;
use std::path::Path;

/// Unwrap a `json!` object literal into a [`Document`].
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("fixture must be a JSON object, got {other}"),
    }
}

/// A facts command with a mix of numeric, string, nested and list facts.
pub fn sample_facts(seed: u64) -> Document {
    document(json!({
        "certname": format!("sample-{seed}"),
        "environment": "production",
        "producer_timestamp": "2020-01-01T00:00:00Z",
        "producer": "puppetserver",
        "values": {
            "uptime_seconds": 1000 + seed,
            "load_average": 0.75,
            "kernel": "Linux",
            "is_virtual": true,
            "memory": {
                "system": {
                    "total_bytes": 8_589_934_592u64,
                    "used_bytes": 4_294_967_296u64,
                    "capacity": "50.00%"
                }
            },
            "disks": [{"size_bytes": 1024}],
            "temperature": -12.5
        }
    }))
}

/// A store-report command body.
pub fn sample_report(seed: u64) -> Document {
    document(json!({
        "certname": format!("sample-{seed}"),
        "environment": "production",
        "status": "unchanged",
        "puppet_version": "7.0.0",
        "metrics": [{"category": "time", "name": "total", "value": 12.3}],
        "resources": []
    }))
}

/// A replace-catalog command body.
pub fn sample_catalog(seed: u64) -> Document {
    document(json!({
        "certname": format!("sample-{seed}"),
        "version": format!("{seed}"),
        "environment": "production",
        "resources": [{"type": "Class", "title": "Main", "tags": ["class"]}],
        "edges": []
    }))
}

/// Fixture document of the given kind.
pub fn sample_of(kind: CommandKind, seed: u64) -> Document {
    match kind {
        CommandKind::Facts => sample_facts(seed),
        CommandKind::Reports => sample_report(seed),
        CommandKind::Catalogs => sample_catalog(seed),
    }
}

/// Write `counts[kind]` fixture documents per kind under `root/<kind>/`.
///
/// Counts are given in [`CommandKind::ALL`] order (facts, reports, catalogs).
pub fn write_sample_tree(root: &Path, counts: [usize; 3]) -> io::Result<()> {
    for (kind, count) in CommandKind::ALL.into_iter().zip(counts) {
        let dir = root.join(kind.dir_name());
        fs::create_dir_all(&dir)?;
        for i in 0..count {
            let doc = Value::Object(sample_of(kind, i as u64));
            fs::write(dir.join(format!("{i:04}.json")), doc.to_string())?;
        }
    }
    Ok(())
}
