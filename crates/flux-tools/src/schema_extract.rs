use serde_json::Value;

/// Extracts the `SCHEMA = { ... }` literal from a tool's source text
/// without executing it. This is a deliberate simplification: a full
/// Python parser isn't part of this workspace's dependency stack, so
/// the dict literal is located by brace balancing and parsed as JSON
/// after normalizing single-quoted keys/strings to double quotes.
/// Tool authors are expected to write `SCHEMA` as JSON-compatible
/// Python (the common case in practice).
pub fn extract_schema(code: &str) -> Option<Value> {
    let start = code.find("SCHEMA")?;
    let eq_pos = code[start..].find('=')? + start;
    let brace_start = code[eq_pos..].find('{')? + eq_pos;

    let mut depth = 0i32;
    let mut end = None;
    for (i, c) in code[brace_start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(brace_start + i + 1);
                    break;
                }
            }
            _ => {}
        }
    }
    let end = end?;
    let literal = &code[brace_start..end];
    let normalized = normalize_python_literal(literal);
    serde_json::from_str(&normalized).ok()
}

fn normalize_python_literal(src: &str) -> String {
    let quoted: String = src.chars().map(|c| if c == '\'' { '"' } else { c }).collect();
    quoted
        .replace("True", "true")
        .replace("False", "false")
        .replace("None", "null")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_simple_schema() {
        let code = r#"
SCHEMA = {
    "name": "hello_tool",
    "description": "says hi",
    "input_schema": {"type": "object", "properties": {}}
}

def main(**kwargs):
    return "hi"
"#;
        let schema = extract_schema(code).unwrap();
        assert_eq!(schema["name"], json!("hello_tool"));
    }

    #[test]
    fn missing_schema_returns_none() {
        assert!(extract_schema("def main(**kwargs):\n    pass\n").is_none());
    }
}
