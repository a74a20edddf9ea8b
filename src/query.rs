//! Query-string construction for endpoint paths.

use serde_json::Value;
use url::form_urlencoded;

/// Builds a URL query string from a flat list of parameters.
///
/// Null and empty-string values are omitted. Arrays repeat the key once per
/// element. The result has no leading `?` and is empty when nothing remains.
///
/// # Examples
///
/// ```
/// use compliance_client::query::build_query;
/// use serde_json::json;
///
/// let query = build_query([
///     ("status", json!(["pending", "approved"])),
///     ("search", json!("")),
///     ("page", json!(1)),
///     ("assignee", json!(null)),
/// ]);
/// assert_eq!(query, "status=pending&status=approved&page=1");
/// ```
pub fn build_query<I, K>(params: I) -> String
where
    I: IntoIterator<Item = (K, Value)>,
    K: AsRef<str>,
{
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Some(item) = scalar(item) {
                        serializer.append_pair(key.as_ref(), &item);
                    }
                }
            }
            other => {
                if let Some(value) = scalar(other) {
                    serializer.append_pair(key.as_ref(), &value);
                }
            }
        }
    }
    serializer.finish()
}

/// Appends the query built from `params` to `path`.
pub fn with_query<I, K>(path: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, Value)>,
    K: AsRef<str>,
{
    let query = build_query(params);
    if query.is_empty() {
        path.to_string()
    } else if path.contains('?') {
        format!("{path}&{query}")
    } else {
        format!("{path}?{query}")
    }
}

fn scalar(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        nested => Some(nested.to_string()),
    }
}
