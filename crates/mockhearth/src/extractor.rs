//! Location expressions (JSONPath for JSON bodies, XPath for XML bodies) used
//! to pull a string value out of a structured request body for a body-clause
//! condition.

use crate::scenario::BodyContentType;

/// Extracts the string form of whatever `path` selects inside `body`,
/// dispatching on the content-type hint. Returns `None` if the body doesn't
/// parse as the expected format or the path doesn't resolve.
pub fn extract(body: &[u8], content_type: BodyContentType, path: &str) -> Option<String> {
    let text = std::str::from_utf8(body).ok()?;
    match content_type {
        BodyContentType::Json => extract_json_path(text, path),
        BodyContentType::Xml => extract_xpath(text, path),
    }
}

/// Infers JSON vs XML from the body's leading non-whitespace byte, used when
/// a body clause has no explicit `content_type` hint.
pub fn infer_content_type(body: &[u8]) -> Option<BodyContentType> {
    let first = body.iter().find(|b| !b.is_ascii_whitespace())?;
    match first {
        b'{' | b'[' => Some(BodyContentType::Json),
        b'<' => Some(BodyContentType::Xml),
        _ => None,
    }
}

fn extract_json_path(body: &str, path: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;

    let path = path.strip_prefix("$.").unwrap_or(path);
    let path = path.strip_prefix('$').unwrap_or(path);

    let value = navigate_json(&json, path)?;

    Some(match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
        _ => value.to_string(),
    })
}

/// Navigates a parsed JSON document following a dotted/bracketed JSONPath-ish
/// path (`a.b[0].c`, `items[*]`). Returns the value at the end of the path.
fn navigate_json<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    if path.is_empty() {
        return Some(value);
    }

    let (segment, rest) = if let Some(bracket_pos) = path.find('[') {
        let dot_pos = path.find('.');
        match dot_pos {
            Some(d) if d < bracket_pos => {
                let (seg, rest) = path.split_at(d);
                (seg, rest.strip_prefix('.').unwrap_or(rest))
            }
            _ => {
                let (seg, rest) = path.split_at(bracket_pos);
                (seg, rest)
            }
        }
    } else if let Some(dot_pos) = path.find('.') {
        let (seg, rest) = path.split_at(dot_pos);
        (seg, rest.strip_prefix('.').unwrap_or(rest))
    } else {
        (path, "")
    };

    if segment.is_empty() && path.starts_with('[') {
        if let Some(end) = path.find(']') {
            let index_str = &path[1..end];
            let rest = path[end + 1..]
                .strip_prefix('.')
                .unwrap_or(&path[end + 1..]);

            if index_str == "*" {
                if let serde_json::Value::Array(arr) = value {
                    for item in arr {
                        if let Some(result) = navigate_json(item, rest) {
                            return Some(result);
                        }
                    }
                }
                return None;
            } else if let Ok(index) = index_str.parse::<usize>() {
                let arr = value.as_array()?;
                let item = arr.get(index)?;
                return navigate_json(item, rest);
            }
        }
        return None;
    }

    let obj = value.as_object()?;
    let next = obj.get(segment)?;
    navigate_json(next, rest)
}

/// Resolves a JSONPath-like `data_path` to an array, for the pagination step.
/// `$` selects the root document itself.
pub fn resolve_array_path<'a>(
    value: &'a serde_json::Value,
    data_path: &str,
) -> Option<&'a [serde_json::Value]> {
    let path = data_path.strip_prefix('$').unwrap_or(data_path);
    let path = path.strip_prefix('.').unwrap_or(path);
    let target = navigate_json(value, path)?;
    target.as_array().map(|v| v.as_slice())
}

fn extract_xpath(body: &str, path: &str) -> Option<String> {
    use sxd_document::parser;
    use sxd_xpath::{evaluate_xpath, Value};

    let package = parser::parse(body).ok()?;
    let document = package.as_document();

    match evaluate_xpath(&document, path) {
        Ok(value) => match value {
            Value::String(s) => Some(s),
            Value::Number(n) => {
                if n.fract() == 0.0 {
                    Some(format!("{}", n as i64))
                } else {
                    Some(n.to_string())
                }
            }
            Value::Boolean(b) => Some(b.to_string()),
            Value::Nodeset(nodes) => nodes.iter().next().map(|node| node.string_value()),
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_simple_json_field() {
        let body = br#"{"a": 1, "b": "two"}"#;
        assert_eq!(
            extract(body, BodyContentType::Json, "$.a"),
            Some("1".to_string())
        );
        assert_eq!(
            extract(body, BodyContentType::Json, "$.b"),
            Some("two".to_string())
        );
    }

    #[test]
    fn extracts_nested_and_indexed_json() {
        let body = br#"{"items": [{"name": "x"}, {"name": "y"}]}"#;
        assert_eq!(
            extract(body, BodyContentType::Json, "$.items[1].name"),
            Some("y".to_string())
        );
    }

    #[test]
    fn extracts_xpath_text() {
        let body = "<root><name>ferris</name></root>";
        assert_eq!(
            extract(body.as_bytes(), BodyContentType::Xml, "/root/name/text()"),
            Some("ferris".to_string())
        );
    }

    #[test]
    fn infers_content_type_from_leading_byte() {
        assert_eq!(infer_content_type(b"  {\"a\":1}"), Some(BodyContentType::Json));
        assert_eq!(infer_content_type(b"<root/>"), Some(BodyContentType::Xml));
        assert_eq!(infer_content_type(b"plain text"), None);
    }

    #[test]
    fn resolves_array_at_data_path() {
        let value: serde_json::Value = serde_json::from_str(r#"{"items":[1,2,3]}"#).unwrap();
        let arr = resolve_array_path(&value, "$.items").unwrap();
        assert_eq!(arr.len(), 3);

        let root: serde_json::Value = serde_json::from_str(r#"[1,2,3]"#).unwrap();
        assert_eq!(resolve_array_path(&root, "$").unwrap().len(), 3);
    }
}
