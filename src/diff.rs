use serde_json::{Map, Value};

/// One changed leaf: dotted path, previous value, new value.
pub(crate) type Change = (String, Value, Value);

/// Walks two JSON documents and records every leaf that differs. Arrays are
/// compared as whole values; keys only present in `previous` are reported
/// with a `null` new value.
pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<Change>,
) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = join(path_prefix, key);
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None if curr_val.is_object() => {
                        diff_json(&Value::Object(Map::new()), curr_val, &path, changes);
                    }
                    None => changes.push((path, Value::Null, curr_val.clone())),
                }
            }
            for (key, prev_val) in prev_map {
                if !curr_map.contains_key(key) {
                    changes.push((join(path_prefix, key), prev_val.clone(), Value::Null));
                }
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn changes(prev: Value, curr: Value) -> Vec<Change> {
        let mut out = Vec::new();
        diff_json(&prev, &curr, "", &mut out);
        out
    }

    #[test]
    fn identical_documents_have_no_changes() {
        let doc = json!({"operationMode": "REGULAR", "targetAirVolume": 40});
        assert!(changes(doc.clone(), doc).is_empty());
    }

    #[test]
    fn nested_leaf_change_uses_dotted_path() {
        let out = changes(
            json!({"circuit": {"live": {"airVolume": "40"}}}),
            json!({"circuit": {"live": {"airVolume": "55"}}}),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, "circuit.live.airVolume");
        assert_eq!(out[0].1, json!("40"));
        assert_eq!(out[0].2, json!("55"));
    }

    #[test]
    fn added_and_removed_keys() {
        let out = changes(json!({"a": 1}), json!({"b": {"c": 2}}));
        assert!(out.contains(&("b.c".to_string(), Value::Null, json!(2))));
        assert!(out.contains(&("a".to_string(), json!(1), Value::Null)));
    }

    #[test]
    fn arrays_compare_as_values() {
        let out = changes(json!({"events": [1, 2]}), json!({"events": [2, 1]}));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, "events");
    }
}
