// Stable JSON serialization: object keys sorted, no insignificant whitespace.
//
// Hash inputs must not depend on map iteration order or on whether
// serde_json was built with `preserve_order`, so objects are re-sorted here.

use serde_json::Value;

/// Serialize `value` with recursively sorted object keys.
pub fn stable_stringify(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Serialize any `Serialize` value through `stable_stringify`.
pub fn stable_stringify_serialize<T: serde::Serialize>(value: &T) -> serde_json::Result<String> {
    let value = serde_json::to_value(value)?;
    Ok(stable_stringify(&value))
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(flag) => out.push_str(if *flag { "true" } else { "false" }),
        Value::Number(number) => out.push_str(&number.to_string()),
        Value::String(text) => write_string(out, text),
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key]);
            }
            out.push('}');
        }
    }
}

fn write_string(out: &mut String, text: &str) {
    // Serializing a &str cannot fail.
    out.push_str(&serde_json::to_string(text).unwrap_or_else(|_| String::from("\"\"")));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_recursively() {
        let value = json!({ "b": 1, "a": { "z": true, "m": null }, "c": [ { "y": 1, "x": 2 } ] });
        assert_eq!(
            stable_stringify(&value),
            r#"{"a":{"m":null,"z":true},"b":1,"c":[{"x":2,"y":1}]}"#
        );
    }

    #[test]
    fn escapes_strings_like_serde_json() {
        let value = json!({ "text": "line\n\"quoted\"" });
        assert_eq!(stable_stringify(&value), r#"{"text":"line\n\"quoted\""}"#);
    }

    #[test]
    fn array_order_is_preserved() {
        assert_eq!(stable_stringify(&json!([3, 1, 2])), "[3,1,2]");
    }

    #[test]
    fn serialize_helper_matches_value_path() {
        #[derive(serde::Serialize)]
        struct Pair {
            zeta: u8,
            alpha: &'static str,
        }

        let rendered = stable_stringify_serialize(&Pair { zeta: 1, alpha: "a" }).unwrap();
        assert_eq!(rendered, r#"{"alpha":"a","zeta":1}"#);
    }
}
