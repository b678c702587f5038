//! Structural agreement between two JSON verdicts.

use serde_json::Value;

/// Placeholder for a key present in only one verdict.
pub const MISSING: &str = "<missing>";

/// Agreement score in `0..=100`.
///
/// For two objects: the share of keys present in both whose serialized
/// values are equal, rounded. Either object being empty scores 0. Any other
/// pair of values scores 100 when equal and 0 otherwise.
pub fn consensus_score(a: &Value, b: &Value) -> u8 {
    let (a, b) = match (a, b) {
        (Value::Object(a), Value::Object(b)) => (a, b),
        _ => return if a == b { 100 } else { 0 },
    };
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let common: Vec<&String> = a.keys().filter(|k| b.contains_key(*k)).collect();
    let matches = common.iter().filter(|k| a.get(**k) == b.get(**k)).count();

    let ratio = matches as f64 / common.len().max(1) as f64;
    (ratio * 100.0).round() as u8
}

/// Every key whose serialized values differ, as `"key: <a> vs <b>"`.
///
/// Keys of `a` come first in their order, then keys only in `b`. Non-object
/// verdicts that differ yield a single `"verdict: <a> vs <b>"` entry.
pub fn disagreements(a: &Value, b: &Value) -> Vec<String> {
    let (a, b) = match (a, b) {
        (Value::Object(a), Value::Object(b)) => (a, b),
        _ if a == b => return Vec::new(),
        _ => return vec![format!("verdict: {} vs {}", a, b)],
    };

    let render = |v: Option<&Value>| v.map_or_else(|| MISSING.to_string(), Value::to_string);

    a.keys()
        .chain(b.keys().filter(|k| !a.contains_key(*k)))
        .filter(|k| a.get(*k) != b.get(*k))
        .map(|k| format!("{}: {} vs {}", k, render(a.get(k)), render(b.get(k))))
        .collect()
}
