use serde_json::Value;

/// Drops keys the schema doesn't declare and values whose observed
/// type doesn't match the declared one. Silent by design — mismatches
/// are dropped without signaling the model.
pub fn filter_tool_input(input: &Value, schema: &Value) -> Value {
    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Value::Object(Default::default());
    };
    let Some(input_map) = input.as_object() else {
        return Value::Object(Default::default());
    };

    let mut filtered = serde_json::Map::new();
    for (key, value) in input_map {
        let Some(prop_schema) = properties.get(key) else {
            continue;
        };
        let Some(declared_type) = prop_schema.get("type").and_then(|t| t.as_str()) else {
            filtered.insert(key.clone(), value.clone());
            continue;
        };
        if value_matches_type(value, declared_type) {
            filtered.insert(key.clone(), value.clone());
        }
    }

    Value::Object(filtered)
}

fn value_matches_type(value: &Value, declared: &str) -> bool {
    match declared {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "properties": {
                "path": {"type": "string"},
                "count": {"type": "integer"},
            }
        })
    }

    #[test]
    fn drops_undeclared_keys() {
        let input = json!({"path": "a.txt", "evil": "rm -rf /"});
        let filtered = filter_tool_input(&input, &schema());
        assert_eq!(filtered, json!({"path": "a.txt"}));
    }

    #[test]
    fn drops_type_mismatched_values() {
        let input = json!({"path": "a.txt", "count": "not a number"});
        let filtered = filter_tool_input(&input, &schema());
        assert_eq!(filtered, json!({"path": "a.txt"}));
    }

    #[test]
    fn keeps_type_valid_subset() {
        let input = json!({"path": "a.txt", "count": 3});
        let filtered = filter_tool_input(&input, &schema());
        assert_eq!(filtered, json!({"path": "a.txt", "count": 3}));
    }
}
