//! Request parameters and canonical key forms.

use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// One identity value, as given by a caller.
///
/// `Key::Int(5)` and `Key::Text("5")` are the same key once canonicalized.
/// Text is otherwise kept as given, so `"007"` stays `"007"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
  Int(i64),
  Text(String),
}

impl Key {
  /// Normalized string form used for cache lookups and deduplication.
  pub fn canonical(&self) -> String {
    match self {
      Key::Int(n) => n.to_string(),
      Key::Text(s) => s.trim().to_string(),
    }
  }

  /// JSON form for request bodies: numbers stay numbers.
  pub fn to_json(&self) -> Value {
    canonical_to_json(&self.canonical())
  }
}

impl fmt::Display for Key {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.canonical())
  }
}

impl From<i64> for Key {
  fn from(n: i64) -> Self {
    Key::Int(n)
  }
}

impl From<i32> for Key {
  fn from(n: i32) -> Self {
    Key::Int(n.into())
  }
}

impl From<u32> for Key {
  fn from(n: u32) -> Self {
    Key::Int(n.into())
  }
}

impl From<&str> for Key {
  fn from(s: &str) -> Self {
    Key::Text(s.to_string())
  }
}

impl From<String> for Key {
  fn from(s: String) -> Self {
    Key::Text(s)
  }
}

impl From<&String> for Key {
  fn from(s: &String) -> Self {
    Key::Text(s.clone())
  }
}

/// The integer a canonical key spells exactly, if any. `"7"` is 7, while
/// `"007"` and `"+7"` are text.
fn as_int(key: &str) -> Option<i64> {
  key.parse::<i64>().ok().filter(|n| n.to_string() == key)
}

/// JSON value for a canonical key string.
pub fn canonical_to_json(key: &str) -> Value {
  match as_int(key) {
    Some(n) => Value::from(n),
    None => Value::from(key),
  }
}

/// Canonical string for a JSON scalar found in a server response.
pub fn json_to_canonical(value: &Value) -> Option<String> {
  match value {
    Value::Number(n) => Some(match n.as_i64() {
      Some(i) => i.to_string(),
      None => n.to_string(),
    }),
    Value::String(s) => Some(Key::Text(s.clone()).canonical()),
    _ => None,
  }
}

/// Order canonical keys numerically where possible, numbers first.
pub fn compare_canonical(a: &str, b: &str) -> Ordering {
  match (as_int(a), as_int(b)) {
    (Some(a), Some(b)) => a.cmp(&b),
    (Some(_), None) => Ordering::Less,
    (None, Some(_)) => Ordering::Greater,
    (None, None) => a.cmp(b),
  }
}

/// Sort and de-duplicate canonical keys.
pub fn sort_canonical(keys: &mut Vec<String>) {
  keys.sort_by(|a, b| compare_canonical(a, b));
  keys.dedup();
}

/// Named lists of values for multi-parameter entities, e.g.
/// `{codeset_ids: [1, 2], cids: [9]}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompoundParams(BTreeMap<String, Vec<Key>>);

impl CompoundParams {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add (or replace) the values for `name`.
  pub fn with<K: Into<Key>>(mut self, name: &str, values: impl IntoIterator<Item = K>) -> Self {
    self
      .0
      .insert(name.to_string(), values.into_iter().map(Into::into).collect());
    self
  }

  pub fn get(&self, name: &str) -> Option<&[Key]> {
    self.0.get(name).map(Vec::as_slice)
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.0.keys().map(String::as_str)
  }

  /// Total number of values across all names.
  pub fn value_count(&self) -> usize {
    self.0.values().map(Vec::len).sum()
  }

  /// Sorted, de-duplicated canonical values per name, names in order.
  pub fn canonical_values(&self) -> Vec<(&str, Vec<String>)> {
    self
      .0
      .iter()
      .map(|(name, values)| {
        let mut canonical: Vec<String> = values.iter().map(Key::canonical).collect();
        sort_canonical(&mut canonical);
        (name.as_str(), canonical)
      })
      .collect()
  }

  /// Order-independent key for the whole parameter set:
  /// `cids=9;codeset_ids=1,2`.
  pub fn canonical_key(&self) -> String {
    self
      .canonical_values()
      .into_iter()
      .map(|(name, values)| format!("{}={}", name, values.join(",")))
      .collect::<Vec<_>>()
      .join(";")
  }

  /// JSON object of arrays, in canonical order.
  pub fn to_json(&self) -> Value {
    let map: Map<String, Value> = self
      .canonical_values()
      .into_iter()
      .map(|(name, values)| {
        (
          name.to_string(),
          Value::Array(values.iter().map(|v| canonical_to_json(v)).collect()),
        )
      })
      .collect();
    Value::Object(map)
  }
}

/// Parameters for one fetch. Must match the entity's declared shape.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchParams {
  /// Whole-slice entities take no parameters
  None,
  /// Identity keys of a per-key batch entity
  Keys(Vec<Key>),
  /// Named parameters of a single-compound-key entity
  Compound(CompoundParams),
}

impl FetchParams {
  pub fn keys<K: Into<Key>>(keys: impl IntoIterator<Item = K>) -> Self {
    FetchParams::Keys(keys.into_iter().map(Into::into).collect())
  }

  pub fn describe(&self) -> &'static str {
    match self {
      FetchParams::None => "no parameters",
      FetchParams::Keys(_) => "a key list",
      FetchParams::Compound(_) => "compound parameters",
    }
  }
}

impl From<CompoundParams> for FetchParams {
  fn from(params: CompoundParams) -> Self {
    FetchParams::Compound(params)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_canonical_key_forms() {
    assert_eq!(Key::from(42).canonical(), "42");
    assert_eq!(Key::from(" 42 ").canonical(), "42");
    assert_eq!(Key::from("007").canonical(), "007");
    assert_eq!(Key::from("+5").canonical(), "+5");
    assert_eq!(Key::from("5").canonical(), Key::from(5).canonical());
    assert_eq!(Key::from("SNOMED").canonical(), "SNOMED");
    assert_eq!(Key::from(-3).to_json(), json!(-3));
    assert_eq!(Key::from("abc").to_json(), json!("abc"));
    assert_eq!(Key::from("007").to_json(), json!("007"));
  }

  #[test]
  fn test_json_to_canonical() {
    assert_eq!(json_to_canonical(&json!(12)).as_deref(), Some("12"));
    assert_eq!(json_to_canonical(&json!("12")).as_deref(), Some("12"));
    assert_eq!(json_to_canonical(&json!("007")).as_deref(), Some("007"));
    assert_eq!(json_to_canonical(&json!(null)), None);
    assert_eq!(json_to_canonical(&json!([1])), None);
  }

  #[test]
  fn test_sort_canonical_numeric_first() {
    let mut keys = vec!["10".to_string(), "b".into(), "9".into(), "a".into(), "9".into()];
    sort_canonical(&mut keys);
    assert_eq!(keys, vec!["9", "10", "a", "b"]);

    let mut padded = vec!["7".to_string(), "007".into()];
    sort_canonical(&mut padded);
    assert_eq!(padded, vec!["7", "007"]);
  }

  #[test]
  fn test_compound_key_is_order_independent() {
    let a = CompoundParams::new()
      .with("codeset_ids", [1, 2])
      .with("cids", [9]);
    let b = CompoundParams::new()
      .with("cids", ["9"])
      .with("codeset_ids", [2, 1]);
    assert_eq!(a.canonical_key(), b.canonical_key());
    assert_eq!(a.canonical_key(), "cids=9;codeset_ids=1,2");
    assert_eq!(a.value_count(), 3);
  }

  #[test]
  fn test_compound_to_json() {
    let params = CompoundParams::new().with("codeset_ids", [3, 1]).with("cids", Vec::<i64>::new());
    assert_eq!(params.to_json(), json!({"cids": [], "codeset_ids": [1, 3]}));
  }
}
