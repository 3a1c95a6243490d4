//! Structural comparison of internal and legacy responses, for shadow-mode logs.

use crate::codec::XmlValue;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Placeholder for values when only key differences are reported.
pub const HIDDEN_VALUE: &str = "hidden";

/// Differences between two decoded responses. An empty object means equal.
///
/// Lists of text compare order-insensitively. Lists of maps are matched by the
/// index key named in `key_indexes` for their parent key. With `keys_only`
/// every value is replaced by [`HIDDEN_VALUE`] so the result is safe to log.
pub fn diff_values(
    internal: &XmlValue,
    legacy: &XmlValue,
    key_indexes: &HashMap<String, String>,
    keys_only: bool,
) -> Value {
    match (internal, legacy) {
        (XmlValue::Map(_), XmlValue::Map(_)) => Value::Object(diff_maps(internal, legacy, key_indexes, keys_only)),
        _ if internal == legacy => Value::Object(Map::new()),
        _ => json!({
            "internal": hide(internal, keys_only),
            "legacy": hide(legacy, keys_only),
        }),
    }
}

fn entries(value: &XmlValue) -> BTreeMap<String, &XmlValue> {
    value
        .as_map()
        .map(|m| m.iter().map(|(k, v)| (k.to_string(), v)).collect())
        .unwrap_or_default()
}

fn diff_maps(
    internal: &XmlValue,
    legacy: &XmlValue,
    key_indexes: &HashMap<String, String>,
    keys_only: bool,
) -> Map<String, Value> {
    let internal = entries(internal);
    let legacy = entries(legacy);
    let mut result = Map::new();

    let only_internal: Map<String, Value> = internal
        .iter()
        .filter(|(k, _)| !legacy.contains_key(*k))
        .map(|(k, v)| (k.clone(), hide(v, keys_only)))
        .collect();
    if !only_internal.is_empty() {
        result.insert("keys_only_in_internal".to_string(), Value::Object(only_internal));
    }

    let only_legacy: Map<String, Value> = legacy
        .iter()
        .filter(|(k, _)| !internal.contains_key(*k))
        .map(|(k, v)| (k.clone(), hide(v, keys_only)))
        .collect();
    if !only_legacy.is_empty() {
        result.insert("keys_only_in_legacy".to_string(), Value::Object(only_legacy));
    }

    for (key, internal_value) in &internal {
        let Some(legacy_value) = legacy.get(key) else {
            continue;
        };
        if let (XmlValue::Map(_), XmlValue::Map(_)) = (internal_value, legacy_value) {
            let nested = diff_maps(internal_value, legacy_value, key_indexes, keys_only);
            if !nested.is_empty() {
                result.insert(key.clone(), Value::Object(nested));
            }
            continue;
        }
        if internal_value == legacy_value {
            continue;
        }
        if let (XmlValue::List(a), XmlValue::List(b)) = (internal_value, legacy_value) {
            if let Some(index_key) = key_indexes.get(key) {
                if all_maps(a) && all_maps(b) {
                    result.insert(key.clone(), diff_list_of_maps(a, b, index_key, keys_only));
                    continue;
                }
            }
            if let (Some(mut a), Some(mut b)) = (sorted_texts(a), sorted_texts(b)) {
                a.sort_unstable();
                b.sort_unstable();
                if a == b {
                    continue;
                }
            }
        }
        result.insert(
            key.clone(),
            json!({
                "internal": hide(internal_value, keys_only),
                "legacy": hide(legacy_value, keys_only),
            }),
        );
    }
    result
}

/// Match list entries on `index_key` and report unmatched or changed entries.
pub fn diff_list_of_maps(
    internal: &[XmlValue],
    legacy: &[XmlValue],
    index_key: &str,
    keys_only: bool,
) -> Value {
    let index = |items: &[XmlValue]| -> BTreeMap<String, XmlValue> {
        items
            .iter()
            .filter_map(|item| {
                let id = item.get(index_key)?.as_text()?.to_string();
                Some((id, item.clone()))
            })
            .collect()
    };
    let internal = index(internal);
    let legacy = index(legacy);

    let only_internal: Vec<&XmlValue> = internal
        .iter()
        .filter(|(k, _)| !legacy.contains_key(*k))
        .map(|(_, v)| v)
        .collect();
    let only_legacy: Vec<&XmlValue> = legacy
        .iter()
        .filter(|(k, _)| !internal.contains_key(*k))
        .map(|(_, v)| v)
        .collect();
    let different: Vec<(&String, &XmlValue, &XmlValue)> = internal
        .iter()
        .filter_map(|(k, v)| legacy.get(k).filter(|l| *l != v).map(|l| (k, v, l)))
        .collect();

    if keys_only {
        return json!({
            "index_key": index_key,
            "count_found_only_in_internal": only_internal.len(),
            "count_found_only_in_legacy": only_legacy.len(),
            "count_different_values": different.len(),
        });
    }

    let different: Map<String, Value> = different
        .into_iter()
        .map(|(k, i, l)| (k.clone(), json!({"internal": i.to_json(), "legacy": l.to_json()})))
        .collect();
    json!({
        "index_key": index_key,
        "found_only_in_internal": only_internal.iter().map(|v| v.to_json()).collect::<Vec<_>>(),
        "found_only_in_legacy": only_legacy.iter().map(|v| v.to_json()).collect::<Vec<_>>(),
        "different_values": different,
    })
}

fn hide(value: &XmlValue, keys_only: bool) -> Value {
    if keys_only {
        Value::String(HIDDEN_VALUE.to_string())
    } else {
        value.to_json()
    }
}

fn all_maps(items: &[XmlValue]) -> bool {
    items.iter().all(|i| matches!(i, XmlValue::Map(_)))
}

fn sorted_texts(items: &[XmlValue]) -> Option<Vec<&str>> {
    items.iter().map(XmlValue::as_text).collect()
}
