use serde_json::Value;

/// Attributes added by dataset servers for their own bookkeeping, removed from served documents.
pub const TRANSIENT_ATTRIBUTES: &[&str] = &["_xpublish_id"];

/// Remove null entries and transient attributes from `value`, recursively.
///
/// Non-finite numbers cannot be represented by [`Value`], so [`parse_json_lenient`] parses them as null and they are removed here too.
/// Sanitising a sanitised document does not change it.
pub fn sanitize(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|key, value| {
                !value.is_null() && !TRANSIENT_ATTRIBUTES.contains(&key.as_str())
            });
            map.values_mut().for_each(sanitize);
        }
        Value::Array(values) => {
            values.retain(|value| !value.is_null());
            values.iter_mut().for_each(sanitize);
        }
        _ => {}
    }
}

/// Parse JSON which may contain the bare `NaN`, `Infinity` and `-Infinity` tokens written by Python.
///
/// Those tokens are parsed as null.
///
/// # Errors
/// Returns a [`serde_json::Error`] if `json` is not valid JSON after replacing those tokens.
pub fn parse_json_lenient(json: &[u8]) -> Result<Value, serde_json::Error> {
    serde_json::from_slice(json).or_else(|err| {
        let replaced = replace_non_finite(json);
        if replaced == json {
            Err(err)
        } else {
            serde_json::from_slice(&replaced)
        }
    })
}

fn replace_non_finite(json: &[u8]) -> Vec<u8> {
    const TOKENS: [&[u8]; 3] = [b"-Infinity", b"Infinity", b"NaN"];
    let mut out = Vec::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;
    while i < json.len() {
        let byte = json[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
        } else if byte == b'"' {
            in_string = true;
        } else if let Some(token) = TOKENS.iter().find(|token| json[i..].starts_with(token)) {
            out.extend_from_slice(b"null");
            i += token.len();
            continue;
        }
        out.push(byte);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn sanitize_document() {
        let mut document = json!({
            "zarr_format": 2,
            "fill_value": null,
            "filters": null,
            "shape": [4, 2],
            "attributes": {
                "_xpublish_id": "d1",
                "units": "K",
                "missing": null,
                "flags": [1, null, 2],
            },
        });
        sanitize(&mut document);
        let expected = json!({
            "zarr_format": 2,
            "shape": [4, 2],
            "attributes": {
                "units": "K",
                "flags": [1, 2],
            },
        });
        assert_eq!(document, expected);

        sanitize(&mut document);
        assert_eq!(document, expected);
    }

    #[test]
    fn parse_non_finite() {
        let value = parse_json_lenient(
            br#"{"a": NaN, "b": [Infinity, -Infinity, 1.5], "c": "NaN and Infinity", "d": "\"NaN"}"#,
        )
        .unwrap();
        assert_eq!(
            value,
            json!({"a": null, "b": [null, null, 1.5], "c": "NaN and Infinity", "d": "\"NaN"})
        );

        let mut value = value;
        sanitize(&mut value);
        assert_eq!(
            value,
            json!({"b": [1.5], "c": "NaN and Infinity", "d": "\"NaN"})
        );

        assert!(parse_json_lenient(b"{\"a\": nan}").is_err());
        assert_eq!(parse_json_lenient(b"[1]").unwrap(), json!([1]));
    }
}
