//! URL value encoding for query strings and form bodies.
//!
//! Two entry points produce the same wire format (`k=v&k=v`, keys sorted
//! ascending, `application/x-www-form-urlencoded` escaping):
//!
//! - [`encode_map`] for plain string pairs
//! - [`encode_struct`] for any `Serialize` record or map
//!
//! Record fields are keyed by their serde name, so `#[serde(rename = "id")]`
//! sets the query key. Fields marked `#[serde(flatten)]` are inlined at the
//! parent level. Any other nested record, map or sequence is **not** expanded:
//! it is emitted as its compact JSON text.
//!
//! ```ignore
//! #[derive(Serialize)]
//! struct Page { #[serde(rename = "offset")] offset: u32 }
//!
//! #[derive(Serialize)]
//! struct Query {
//!     #[serde(rename = "id")]
//!     id: u64,
//!     #[serde(flatten)]
//!     page: Page,
//! }
//!
//! assert_eq!(encode_struct(&Query { id: 2, page: Page { offset: 10 } })?, "id=2&offset=10");
//! ```

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Struct-mode encoding failures.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EncodeError {
    /// The top-level value is not a record or a map
    #[error("cannot encode {0} as URL values, expected a struct or map")]
    Unsupported(&'static str),

    /// The value could not be serialized
    #[error("failed to serialize URL values: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Final percent-encoding step failed
    #[error("failed to URL-encode values: {0}")]
    UrlEncode(#[from] serde_urlencoded::ser::Error),
}

/// Encode string pairs as a URL query string with keys in ascending order.
///
/// When a key repeats, the last value wins.
pub fn encode_map<I, K, V>(values: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let sorted: BTreeMap<String, String> = values
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    encode_pairs(&sorted)
}

/// Encode a record or map into a URL query string.
///
/// # Errors
///
/// Returns [`EncodeError::Unsupported`] when `value` does not serialize to a
/// record or map (sequences, scalars, unit), and [`EncodeError::Serialize`]
/// when serde rejects the value (e.g. a map with non-string keys).
pub fn encode_struct<T>(value: &T) -> Result<String, EncodeError>
where
    T: Serialize + ?Sized,
{
    let fields = match serde_json::to_value(value)? {
        Value::Object(fields) => fields,
        other => return Err(EncodeError::Unsupported(value_kind(&other))),
    };

    let sorted: BTreeMap<String, String> = fields
        .into_iter()
        .map(|(key, value)| (key, render_scalar(value)))
        .collect();
    Ok(encode_pairs(&sorted))
}

fn encode_pairs(pairs: &BTreeMap<String, String>) -> String {
    // Serializing a sequence of string pairs cannot fail.
    serde_urlencoded::to_string(pairs).unwrap_or_default()
}

/// Textual form of a single field value.
fn render_scalar(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        nested @ (Value::Array(_) | Value::Object(_)) => nested.to_string(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a map",
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_encode_map_sorts_keys() {
        let encoded = encode_map([("b", "2"), ("a", "1")]);
        assert_eq!(encoded, "a=1&b=2");
    }

    #[test]
    fn test_encode_map_is_stable_for_hash_maps() {
        let mut values = HashMap::new();
        for key in ["zeta", "alpha", "mid", "beta", "omega"] {
            values.insert(key.to_owned(), key.to_uppercase());
        }
        let first = encode_map(values.clone());
        for _ in 0..16 {
            assert_eq!(encode_map(values.clone()), first);
        }
        assert_eq!(
            first,
            "alpha=ALPHA&beta=BETA&mid=MID&omega=OMEGA&zeta=ZETA"
        );
    }

    #[test]
    fn test_encode_map_escapes_reserved_characters() {
        let encoded = encode_map([("q", "a b&c=d"), ("name", "golang/rust")]);
        assert_eq!(encoded, "name=golang%2Frust&q=a+b%26c%3Dd");
    }

    #[test]
    fn test_encode_map_empty() {
        assert_eq!(encode_map(Vec::<(String, String)>::new()), "");
    }

    #[test]
    fn test_encode_struct_uses_renamed_keys_and_flatten() {
        #[derive(Serialize)]
        struct Anon {
            #[serde(rename = "f")]
            flag: bool,
        }

        #[derive(Serialize)]
        struct Query {
            #[serde(rename = "id")]
            id: i32,
            #[serde(flatten)]
            anon: Anon,
        }

        let query = Query {
            id: 2,
            anon: Anon { flag: true },
        };
        assert_eq!(encode_struct(&query).unwrap(), "f=true&id=2");
    }

    #[test]
    fn test_encode_struct_nested_flatten_levels() {
        #[derive(Serialize)]
        struct Page {
            #[serde(rename = "offset")]
            offset: u32,
        }

        #[derive(Serialize)]
        struct UserVip {
            #[serde(rename = "is_vip")]
            is_vip: bool,
            #[serde(flatten)]
            page: Page,
        }

        #[derive(Serialize)]
        struct Query {
            #[serde(rename = "id")]
            id: u32,
            #[serde(rename = "name")]
            name: String,
            #[serde(flatten)]
            vip: UserVip,
        }

        let query = Query {
            id: 1,
            name: "golang".to_owned(),
            vip: UserVip {
                is_vip: true,
                page: Page { offset: 0 },
            },
        };
        assert_eq!(
            encode_struct(&query).unwrap(),
            "id=1&is_vip=true&name=golang&offset=0"
        );
    }

    #[test]
    fn test_encode_struct_field_name_used_without_rename() {
        #[derive(Serialize)]
        #[allow(non_snake_case)]
        struct Query {
            PageSize: u32,
        }

        assert_eq!(encode_struct(&Query { PageSize: 20 }).unwrap(), "PageSize=20");
    }

    #[test]
    fn test_encode_struct_named_nested_record_not_expanded() {
        #[derive(Serialize)]
        struct Inner {
            a: u32,
        }

        #[derive(Serialize)]
        struct Outer {
            inner: Inner,
            tags: Vec<&'static str>,
        }

        let encoded = encode_struct(&Outer {
            inner: Inner { a: 1 },
            tags: vec!["x", "y"],
        })
        .unwrap();
        assert_eq!(
            encoded,
            "inner=%7B%22a%22%3A1%7D&tags=%5B%22x%22%2C%22y%22%5D"
        );
    }

    #[test]
    fn test_encode_struct_accepts_maps_and_references() {
        let mut values = HashMap::new();
        values.insert("a", serde_json::json!(1));
        values.insert("b", serde_json::json!("two"));
        assert_eq!(encode_struct(&values).unwrap(), "a=1&b=two");
        assert_eq!(encode_struct(&&values).unwrap(), "a=1&b=two");
    }

    #[test]
    fn test_encode_struct_none_renders_empty() {
        #[derive(Serialize)]
        struct Query {
            cursor: Option<String>,
        }
        assert_eq!(encode_struct(&Query { cursor: None }).unwrap(), "cursor=");
    }

    #[test]
    fn test_encode_struct_rejects_sequences_and_scalars() {
        assert!(matches!(
            encode_struct(&vec![1, 2, 3]),
            Err(EncodeError::Unsupported("a sequence"))
        ));
        assert!(matches!(
            encode_struct(&42),
            Err(EncodeError::Unsupported("a number"))
        ));
        assert!(matches!(
            encode_struct(&()),
            Err(EncodeError::Unsupported("null"))
        ));
    }

    #[test]
    fn test_encode_struct_matches_map_mode() {
        #[derive(Serialize)]
        struct Query {
            b: &'static str,
            a: &'static str,
        }
        assert_eq!(
            encode_struct(&Query { b: "2", a: "1" }).unwrap(),
            encode_map([("b", "2"), ("a", "1")])
        );
    }
}
