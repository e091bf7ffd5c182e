//! Deep merge of configuration documents.

use serde_json::Value as Json;

/// Merge `overlay` into `base`: mappings merge key by key, anything else in `overlay` replaces
/// the value in `base` wholesale (sequences included).
pub fn deep_merge(base: &mut Json, overlay: Json) {
    match (base, overlay) {
        (Json::Object(base_map), Json::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn merged(mut base: Json, overlay: Json) -> Json {
        deep_merge(&mut base, overlay);
        base
    }

    #[test]
    fn nested_mappings_merge_key_by_key() {
        let out = merged(json!({"a": {"x": 1, "y": 2}}), json!({"a": {"y": 3, "z": 4}}));
        assert_eq!(out, json!({"a": {"x": 1, "y": 3, "z": 4}}));
    }

    #[test]
    fn sequences_are_replaced_not_appended() {
        let out = merged(json!({"hosts": ["a", "b"], "keep": true}), json!({"hosts": ["c"]}));
        assert_eq!(out, json!({"hosts": ["c"], "keep": true}));
    }

    #[test]
    fn type_changes_take_the_override() {
        let out = merged(json!({"a": {"deep": 1}, "b": 1}), json!({"a": "flat", "b": {"now": "map"}}));
        assert_eq!(out, json!({"a": "flat", "b": {"now": "map"}}));
    }

    #[test]
    fn deep_levels_and_nulls() {
        let mut base = json!({"controller": {"metrics": {"enabled": false, "port": 10254}}, "gone": 1});
        deep_merge(&mut base, json!({"controller": {"metrics": {"enabled": true}}, "gone": null}));
        assert_eq!(base, json!({"controller": {"metrics": {"enabled": true, "port": 10254}}, "gone": null}));
    }
}
