//! Payload mutation.
//!
//! Keeps the simulated fleet from submitting byte-identical commands forever:
//!
//! - facts: every numeric fact drifts on every submission; non-numeric facts
//!   are static. Optionally, deterministic "orphan" facts are merged in to
//!   stress payload growth.
//! - reports and catalogs: identity.

use fleetload_types::{certname, values_mut, Document, Hash};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{Map, Number, Value};

/// Upper bound (exclusive) on orphan facts per host and on nesting depth.
const ORPHAN_SCALE: f64 = 10.0;

/// Leaf value of every orphan fact chain.
const ORPHAN_LEAF: &str = "val";

/// Return a mutated copy of `doc`. The input is never modified.
///
/// Documents with an object-valued `values` field are treated as facts and
/// get numeric drift; with `apply_orphans`, orphan facts for the document's
/// certname are merged into `values` as well. Anything else comes back as an
/// unmodified copy.
pub fn mutate<R: Rng + ?Sized>(doc: &Document, apply_orphans: bool, rng: &mut R) -> Document {
    let mut out = doc.clone();
    mutate_in_place(&mut out, apply_orphans, rng);
    out
}

/// [`mutate`] for a document the caller already owns a private copy of.
pub fn mutate_in_place<R: Rng + ?Sized>(doc: &mut Document, apply_orphans: bool, rng: &mut R) {
    let name = certname(doc).map(str::to_owned);

    if let Some(values) = values_mut(doc) {
        drift_in_place(values, rng);

        if apply_orphans {
            if let Some(name) = name {
                values.extend(generate_orphan_facts(&name));
            }
        }
    }
}

/// Copy of `values` with every numeric leaf `v` replaced by `v * r`,
/// `r` drawn fresh from `[0, 1)` per leaf.
///
/// Nested objects are recursed into. Arrays are left alone, including any
/// numbers inside them.
pub fn drift_numerics<R: Rng + ?Sized>(
    values: &Map<String, Value>,
    rng: &mut R,
) -> Map<String, Value> {
    let mut out = values.clone();
    drift_in_place(&mut out, rng);
    out
}

fn drift_in_place<R: Rng + ?Sized>(values: &mut Map<String, Value>, rng: &mut R) {
    for value in values.values_mut() {
        match value {
            Value::Number(n) => {
                if let Some(drifted) = drift_number(n, rng) {
                    *value = Value::Number(drifted);
                }
            }
            Value::Object(nested) => drift_in_place(nested, rng),
            Value::Null | Value::Bool(_) | Value::String(_) | Value::Array(_) => {}
        }
    }
}

fn drift_number<R: Rng + ?Sized>(n: &Number, rng: &mut R) -> Option<Number> {
    let v = n.as_f64()?;
    let r: f64 = rng.gen();
    Number::from_f64(v * r)
}

/// Deterministic pseudo-random draw in `[0, 1)` keyed by `key`.
fn keyed_unit(key: &str) -> f64 {
    let seed = Hash::of_key(key).seed();
    ChaCha8Rng::from_seed(seed).gen()
}

fn keyed_count(key: &str) -> usize {
    (ORPHAN_SCALE * keyed_unit(key)).floor() as usize
}

/// Orphan facts for a host.
///
/// Depends on `certname` alone: between 0 and 9 facts, each a chain of
/// between 0 and 9 single-key objects ending in `"val"`. Fact and level
/// names are derived from Blake3 hashes so that every host grows a
/// different, but reproducible, shape.
pub fn generate_orphan_facts(certname: &str) -> Map<String, Value> {
    let count = keyed_count(certname);
    let mut facts = Map::new();

    for num in 0..count {
        let fact_key = format!("{certname}-{num}");
        let name = format!("orphan-{}", Hash::of_key(&fact_key).short_hex());
        let levels = keyed_count(&fact_key);
        let chain = nested_chain(&name, levels);
        facts.insert(name, chain);
    }

    facts
}

/// `levels` nested single-key objects under `prefix`, innermost value `"val"`.
fn nested_chain(prefix: &str, levels: usize) -> Value {
    (0..levels)
        .rev()
        .fold(Value::String(ORPHAN_LEAF.to_string()), |inner, level| {
            let key = format!(
                "{prefix}-{}",
                Hash::of_key(&format!("{prefix}{level}")).short_hex()
            );
            let mut wrapper = Map::new();
            wrapper.insert(key, inner);
            Value::Object(wrapper)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetload_test_helpers::{document, sample_catalog, sample_facts, sample_report};
    use serde_json::json;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    fn depth(value: &Value) -> usize {
        match value {
            Value::Object(map) => {
                assert_eq!(map.len(), 1, "orphan chains are single-key");
                1 + depth(map.values().next().unwrap())
            }
            Value::String(s) => {
                assert_eq!(s, ORPHAN_LEAF);
                0
            }
            other => panic!("unexpected orphan value {other}"),
        }
    }

    fn assert_drifted(original: &Value, drifted: &Value) {
        match (original, drifted) {
            (Value::Number(o), Value::Number(d)) => {
                let (o, d) = (o.as_f64().unwrap(), d.as_f64().unwrap());
                if o >= 0.0 {
                    assert!(d >= 0.0 && (d < o || o == 0.0), "{d} not in [0, {o})");
                } else {
                    assert!(d <= 0.0 && d > o, "{d} not in ({o}, 0]");
                }
            }
            (Value::Object(o), Value::Object(d)) => {
                let ok: Vec<_> = o.keys().collect();
                let dk: Vec<_> = d.keys().collect();
                assert_eq!(ok, dk, "key sets must be preserved");
                for (k, v) in o {
                    assert_drifted(v, &d[k]);
                }
            }
            (o, d) => assert_eq!(o, d, "non-numeric leaves are unchanged"),
        }
    }

    #[test]
    fn test_drift_keeps_numbers_in_range() {
        let doc = sample_facts(3);
        let mut rng = rng();

        for _ in 0..50 {
            let out = mutate(&doc, false, &mut rng);
            assert_drifted(&doc["values"], &out["values"]);
        }
    }

    #[test]
    fn test_drift_skips_arrays() {
        let values = document(json!({"disks": [{"size": 10}, 5], "n": 4}));
        let out = drift_numerics(&values, &mut rng());
        assert_eq!(out["disks"], values["disks"]);
        assert_ne!(out["n"], json!(4));
    }

    #[test]
    fn test_drift_only_touches_values() {
        let doc = document(json!({"certname": "a", "epoch": 10, "values": {"x": 1.5}}));
        let out = mutate(&doc, false, &mut rng());
        assert_eq!(out["epoch"], json!(10));
        assert_eq!(out["certname"], json!("a"));
    }

    #[test]
    fn test_mutate_leaves_input_untouched() {
        let doc = sample_facts(1);
        let snapshot = doc.clone();
        let _ = mutate(&doc, true, &mut rng());
        assert_eq!(doc, snapshot);
    }

    #[test]
    fn test_reports_and_catalogs_pass_through() {
        let mut rng = rng();
        let report = sample_report(0);
        let catalog = sample_catalog(0);
        assert_eq!(mutate(&report, true, &mut rng), report);
        assert_eq!(mutate(&catalog, true, &mut rng), catalog);
    }

    #[test]
    fn test_same_seed_same_drift() {
        let doc = sample_facts(9);
        let a = mutate(&doc, false, &mut ChaCha8Rng::seed_from_u64(5));
        let b = mutate(&doc, false, &mut ChaCha8Rng::seed_from_u64(5));
        assert_eq!(a, b);
    }

    #[test]
    fn test_orphans_are_deterministic() {
        assert_eq!(
            generate_orphan_facts("host-17"),
            generate_orphan_facts("host-17")
        );
    }

    #[test]
    fn test_orphan_shape() {
        for i in 0..50 {
            let certname = format!("host-{i}");
            let facts = generate_orphan_facts(&certname);
            assert_eq!(facts.len(), keyed_count(&certname));
            assert!(facts.len() < 10);
            for (name, chain) in &facts {
                assert!(name.starts_with("orphan-"));
                assert!(depth(chain) < 10);
            }
        }
    }

    #[test]
    fn test_orphan_count_varies_across_hosts() {
        let counts: std::collections::HashSet<_> = (0..100)
            .map(|i| generate_orphan_facts(&format!("host-{i}")).len())
            .collect();
        assert!(counts.len() > 1, "counts should vary: {counts:?}");
    }

    #[test]
    fn test_nested_chain_keys_use_prefix() {
        let chain = nested_chain("orphan-abc", 3);
        assert_eq!(depth(&chain), 3);

        let mut cursor = &chain;
        while let Value::Object(map) = cursor {
            let (key, inner) = map.iter().next().unwrap();
            assert!(key.starts_with("orphan-abc-"));
            cursor = inner;
        }
        assert_eq!(nested_chain("p", 0), json!("val"));
    }

    #[test]
    fn test_orphans_merged_into_values() {
        let mut doc = sample_facts(0);
        fleetload_types::set_certname(&mut doc, "host-3");
        let orphans = generate_orphan_facts("host-3");

        let out = mutate(&doc, true, &mut rng());
        let values = out["values"].as_object().unwrap();
        for (name, chain) in &orphans {
            assert_eq!(values.get(name), Some(chain));
        }
        assert!(values.contains_key("kernel"));
    }

    #[test]
    fn test_orphans_need_certname() {
        let doc = document(json!({"values": {"a": "b"}}));
        let out = mutate(&doc, true, &mut rng());
        assert_eq!(out, doc);
    }
}
